use matjip_shared::config::ViewConfig;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_PATH: &str = "data/points.redb";
const DEFAULT_DATA_DIR: &str = "data/regions";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Region files imported when the store is empty.
    pub data_dir: PathBuf,
    pub view: ViewConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };

        ServerConfig {
            port: lookup("PORT")
                .and_then(|v| v.trim().parse::<u16>().ok())
                .filter(|&p| p > 0)
                .unwrap_or(DEFAULT_PORT),
            db_path: path("DB_PATH", DEFAULT_DB_PATH),
            data_dir: path("DATA_DIR", DEFAULT_DATA_DIR),
            view: ViewConfig::from_lookup(&lookup),
        }
    }
}
