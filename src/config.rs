use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
}

impl Config {
    pub fn new(db_path: Option<PathBuf>, timeout_ms: Option<u64>) -> Self {
        Self {
            db_path: db_path.unwrap_or_else(Self::default_path),
            store_timeout: timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_STORE_TIMEOUT),
        }
    }

    pub fn default_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "hire") {
            proj_dirs.data_dir().join("hire.db")
        } else {
            PathBuf::from("hire.db")
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_values_win() {
        let config = Config::new(Some(PathBuf::from("/tmp/x.db")), Some(250));
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.store_timeout, Duration::from_millis(250));
    }

    #[test]
    fn defaults_point_at_hire_db() {
        let config = Config::default();
        assert_eq!(config.store_timeout, DEFAULT_STORE_TIMEOUT);
        assert!(config.db_path.ends_with("hire.db"));
    }
}
