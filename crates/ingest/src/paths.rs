use std::path::PathBuf;

/// Resolves the Claude data directory: `CBURN_DATA_DIR`, else `~/.claude`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("CBURN_DATA_DIR") {
        return PathBuf::from(path);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".claude");
    }
    PathBuf::from(".claude")
}

/// Resolves the metric cache database path under the XDG cache directory.
/// Deleting the file forces a full reparse on the next load.
pub fn cache_path() -> PathBuf {
    cache_dir().join("metrics.db")
}

pub fn cache_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME")
        && !xdg.is_empty()
    {
        return PathBuf::from(xdg).join("cburn");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".cache").join("cburn");
    }
    PathBuf::from(".cache").join("cburn")
}
