mod parser;
mod paths;
mod pipeline;
mod scanner;
mod types;

pub use parser::parse_file;
pub use paths::{cache_path, default_data_dir};
pub use pipeline::{load, load_with_cache};
pub use scanner::{count_projects, scan_dir};
pub use types::{
    CachedLoadResult, DiscoveredFile, FileStats, IngestError, LoadResult, ProgressFn, Result,
};
