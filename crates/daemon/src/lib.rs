mod events;
mod lifecycle;
mod service;

pub use events::{Delta, Event, EventKind, Snapshot, Status};
pub use lifecycle::{
    LifecycleError, RuntimeState, ensure_not_running, process_alive, read_pid, read_state,
    remove_control_files, state_path, stop, write_pid, write_state,
};
pub use service::{DaemonConfig, DaemonError, Service};
