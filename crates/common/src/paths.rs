use std::path::{Path, PathBuf};

// Well-known filenames used within the workspace directory
const PID_FILE_NAME: &str = "fornaxd.pid";
const DATA_DB_NAME: &str = "telemetry.sqlite3";
const LOG_DIR_NAME: &str = "logs";

/// Path to the daemon PID file inside the workspace.
pub fn pid_file(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(PID_FILE_NAME)
}

/// Path to the telemetry SQLite database inside the workspace.
pub fn data_db(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(DATA_DB_NAME)
}

/// Directory for the daemon's rolling log files.
pub fn log_dir(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(LOG_DIR_NAME)
}
