use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

/// Sidecar state written next to the PID file for out-of-band tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeState {
    pub pid: i32,
    pub addr: String,
    pub started_at: DateTime<Utc>,
    pub data_dir: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("daemon already running (pid {0})")]
    AlreadyRunning(i32),
    #[error("daemon is not running")]
    NotRunning,
    #[error("signal daemon process: {0}")]
    Signal(Errno),
    #[error("daemon (pid {0}) did not exit in time")]
    DidNotExit(i32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Path of the sidecar state file: `<pid_file>.json`.
pub fn state_path(pid_file: &Path) -> PathBuf {
    let mut os = pid_file.as_os_str().to_owned();
    os.push(".json");
    PathBuf::from(os)
}

pub fn write_pid(path: &Path, pid: i32) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, format!("{pid}\n"))
}

pub fn read_pid(path: &Path) -> io::Result<i32> {
    let data = fs::read_to_string(path)?;
    let pid = data
        .trim()
        .parse::<i32>()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid pid file"))?;
    if pid <= 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid pid"));
    }
    Ok(pid)
}

pub fn write_state(path: &Path, state: &RuntimeState) -> io::Result<()> {
    let mut data = serde_json::to_vec_pretty(state)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    data.push(b'\n');
    fs::write(path, data)
}

pub fn read_state(path: &Path) -> io::Result<RuntimeState> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// True when a process with this pid exists. EPERM means the process is
/// alive but owned by someone else, which still counts.
pub fn process_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Fails when the PID file points at a live process; otherwise removes the
/// stale PID file and sidecar.
pub fn ensure_not_running(pid_file: &Path) -> Result<(), LifecycleError> {
    let pid = match read_pid(pid_file) {
        Ok(pid) => pid,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if process_alive(pid) {
        return Err(LifecycleError::AlreadyRunning(pid));
    }
    remove_control_files(pid_file);
    Ok(())
}

/// Removes the PID file and its sidecar, ignoring missing files.
pub fn remove_control_files(pid_file: &Path) {
    let _ = fs::remove_file(pid_file);
    let _ = fs::remove_file(state_path(pid_file));
}

/// Sends SIGTERM and waits up to eight seconds for the process to exit.
/// Never escalates to SIGKILL; a stubborn daemon is reported instead.
pub fn stop(pid_file: &Path) -> Result<i32, LifecycleError> {
    let pid = read_pid(pid_file).map_err(|_| LifecycleError::NotRunning)?;

    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(LifecycleError::Signal)?;

    let deadline = Instant::now() + Duration::from_secs(8);
    while Instant::now() < deadline {
        if !process_alive(pid) {
            remove_control_files(pid_file);
            return Ok(pid);
        }
        std::thread::sleep(Duration::from_millis(150));
    }

    Err(LifecycleError::DidNotExit(pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Far above any realistic pid_max, so the probe reports dead.
    const DEAD_PID: i32 = 99_999_999;

    #[test]
    fn pid_file_round_trips() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cburnd.pid");
        write_pid(&path, 4242).expect("write");
        assert_eq!(read_pid(&path).expect("read"), 4242);
    }

    #[test]
    fn read_pid_rejects_garbage() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cburnd.pid");
        fs::write(&path, "not-a-pid\n").expect("write");
        assert!(read_pid(&path).is_err());
    }

    #[test]
    fn ensure_not_running_accepts_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(ensure_not_running(&dir.path().join("cburnd.pid")).is_ok());
    }

    #[test]
    fn ensure_not_running_rejects_live_process() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cburnd.pid");
        write_pid(&path, std::process::id() as i32).expect("write");
        assert!(matches!(
            ensure_not_running(&path),
            Err(LifecycleError::AlreadyRunning(_))
        ));
    }

    #[test]
    fn ensure_not_running_clears_stale_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cburnd.pid");
        write_pid(&path, DEAD_PID).expect("write pid");
        write_state(
            &state_path(&path),
            &RuntimeState {
                pid: DEAD_PID,
                addr: "127.0.0.1:8787".to_string(),
                started_at: Utc::now(),
                data_dir: "/tmp".to_string(),
            },
        )
        .expect("write state");

        ensure_not_running(&path).expect("should clear stale files");
        assert!(!path.exists());
        assert!(!state_path(&path).exists());
    }

    #[test]
    fn state_round_trips() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cburnd.pid.json");
        let state = RuntimeState {
            pid: 7,
            addr: "127.0.0.1:9000".to_string(),
            started_at: Utc::now(),
            data_dir: "/data".to_string(),
        };
        write_state(&path, &state).expect("write");
        let loaded = read_state(&path).expect("read");
        assert_eq!(loaded.pid, 7);
        assert_eq!(loaded.addr, "127.0.0.1:9000");
    }

    #[test]
    fn stop_without_pid_file_reports_not_running() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(matches!(
            stop(&dir.path().join("cburnd.pid")),
            Err(LifecycleError::NotRunning)
        ));
    }

    #[test]
    fn dead_pid_probe_is_false() {
        assert!(!process_alive(DEAD_PID));
        assert!(process_alive(std::process::id() as i32));
    }
}
