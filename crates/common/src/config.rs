use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub workspace_dir: PathBuf,
    pub listen_addr: String,
    pub ingest_shards: usize,
    pub feed_capacity: usize,
    pub log_max_files: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Be resilient in environments without HOME by falling back to CWD.
        let base_dir = dirs::home_dir()
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let workspace_dir = base_dir.join(".fornax");

        Self {
            workspace_dir,
            listen_addr: "127.0.0.1:5000".to_string(),
            ingest_shards: 4,
            feed_capacity: 1024,
            log_max_files: 7,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let workspace_dir = Self::default().workspace_dir;
        let config_path = workspace_dir.join("config.toml");

        let mut builder = Config::builder()
            // Avoid panics on non-UTF8 paths by using lossy conversion.
            .set_default("workspace_dir", workspace_dir.to_string_lossy().as_ref())?
            .set_default("listen_addr", "127.0.0.1:5000")?
            .set_default("ingest_shards", 4)?
            .set_default("feed_capacity", 1024)?
            .set_default("log_max_files", 7)?;

        // Load config file if it exists
        if config_path.exists() {
            builder = builder.add_source(File::from(config_path));
        }

        // Allow environment variables to override config
        builder = builder.add_source(Environment::with_prefix("FORNAX"));

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }
}
