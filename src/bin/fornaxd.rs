use fornax::daemon::coordinator::Coordinator;
use fornax::daemon::server::http::spawn_http_server;
use fornax::storage::sqlite3::SqliteStore;
use fornax::storage::{DeviceDirectory, EventStore};
use fornax_common::config::AppConfig;
use fornax_common::paths;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn ensure_workspace_dir(workspace_dir: &PathBuf) {
    if !workspace_dir.exists() {
        std::fs::create_dir_all(workspace_dir).unwrap_or_else(|e| {
            eprintln!("Failed to create workspace directory: {}", e);
            std::process::exit(1);
        });
    }
}

fn is_process_running(pid: u32) -> bool {
    std::process::Command::new("ps")
        .args(["-p", &pid.to_string()])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn write_pid_file(pid_file: &PathBuf) {
    if pid_file.exists() {
        match std::fs::read_to_string(pid_file) {
            Ok(content) => {
                if let Ok(existing_pid) = content.trim().parse::<u32>() {
                    if is_process_running(existing_pid) {
                        eprintln!("Fornax daemon is already running (PID: {})", existing_pid);
                        std::process::exit(1);
                    } else {
                        info!(
                            "Removing stale PID file (process {} no longer exists)",
                            existing_pid
                        );
                        let _ = std::fs::remove_file(pid_file);
                    }
                }
            }
            Err(_) => {
                info!("Removing unreadable PID file");
                let _ = std::fs::remove_file(pid_file);
            }
        }
    }

    let current_pid = std::process::id();
    std::fs::write(pid_file, current_pid.to_string()).unwrap_or_else(|e| {
        eprintln!("Failed to write PID file: {}", e);
        std::process::exit(1);
    });
}

fn cleanup_pid_file(pid_file: &PathBuf) {
    match std::fs::read_to_string(pid_file) {
        Ok(content) => {
            if content.trim().parse::<u32>() == Ok(std::process::id()) {
                if let Err(e) = std::fs::remove_file(pid_file) {
                    error!("Failed to remove PID file: {}", e);
                }
            } else {
                error!("PID file no longer belongs to this process; leaving it in place");
            }
        }
        Err(e) => error!("Failed to read PID file for cleanup: {}", e),
    }
}

fn setup_file_logging(log_dir: &PathBuf, max_files: usize) {
    std::fs::create_dir_all(log_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create log directory: {}", e);
        std::process::exit(1);
    });

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("fornaxd")
        .filename_suffix("log")
        .max_log_files(max_files)
        .build(log_dir)
        .unwrap_or_else(|e| {
            eprintln!("Failed to create log appender: {}", e);
            std::process::exit(1);
        });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .with_timer(fmt::time::ChronoUtc::new(
                    "%Y-%m-%dT%H:%M:%S%.6fZ".to_string(),
                )),
        )
        .with(env_filter)
        .init();
}

fn load_app_config() -> AppConfig {
    match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn main() {
    let config = load_app_config();
    ensure_workspace_dir(&config.workspace_dir);

    let log_dir = paths::log_dir(&config.workspace_dir);
    setup_file_logging(&log_dir, config.log_max_files);

    let pid_file = paths::pid_file(&config.workspace_dir);
    write_pid_file(&pid_file);

    info!("Starting Fornax daemon (fornaxd)");

    let db_path = paths::data_db(&config.workspace_dir);
    let store = match SqliteStore::new(&db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open telemetry store: {e:#}");
            cleanup_pid_file(&pid_file);
            std::process::exit(1);
        }
    };

    let coordinator = match Coordinator::new(
        Arc::clone(&store) as Arc<dyn EventStore>,
        store as Arc<dyn DeviceDirectory>,
        config.ingest_shards,
        config.feed_capacity,
    ) {
        Ok(coordinator) => Arc::new(coordinator),
        Err(e) => {
            error!("Failed to start ingestion core: {e:#}");
            cleanup_pid_file(&pid_file);
            std::process::exit(1);
        }
    };

    let server = spawn_http_server(
        config.listen_addr.clone(),
        Arc::clone(&coordinator),
        coordinator.threads(),
    );
    let result = match server {
        Ok(handle) => handle.join(),
        Err(e) => {
            error!("Failed to start telemetry server: {e:#}");
            cleanup_pid_file(&pid_file);
            std::process::exit(1);
        }
    };

    cleanup_pid_file(&pid_file);

    if result.is_err() {
        error!("Telemetry server thread panicked");
        std::process::exit(1);
    }
}
