use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_files_root")]
    pub files_root: PathBuf,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// `name=value` pairs sent as the session cookie.
    #[serde(default)]
    pub cookies: Vec<String>,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_speed")]
    pub speed: u32,
    #[serde(default)]
    pub page_size: Option<usize>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("gallery.db")
}

fn default_files_root() -> PathBuf {
    PathBuf::from("files")
}

fn default_base_url() -> String {
    "https://www.furaffinity.net".to_string()
}

fn default_user_agent() -> String {
    format!("gallery-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> u64 {
    30
}

fn default_speed() -> u32 {
    1
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            files_root: default_files_root(),
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            cookies: Vec::new(),
            request_timeout_secs: default_timeout(),
            speed: default_speed(),
            page_size: None,
        }
    }
}

/// Load `Config.toml` (optional) overlaid with `GALLERY_SYNC__*` variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("GALLERY_SYNC").separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
