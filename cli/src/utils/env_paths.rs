use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Environment-based path configuration
#[derive(Debug, Clone)]
pub struct EnvPaths {
    pub data_path: PathBuf,
    pub configuration_path: PathBuf,
}

impl EnvPaths {
    /// Load paths from environment variables with defaults
    pub fn load() -> Result<Self> {
        Self::load_with_base(None)
    }

    /// Load paths from environment variables with an optional base directory
    pub fn load_with_base(base_dir: Option<PathBuf>) -> Result<Self> {
        let base = match base_dir {
            Some(base) => base,
            None => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                let env_file = cwd.join(".env");
                if env_file.exists() {
                    dotenvy::from_path(&env_file).ok();
                }
                cwd
            }
        };

        Ok(Self {
            data_path: Self::get_path_from_env("DATA_PATH", "./data", &base),
            configuration_path: Self::get_path_from_env("CONFIGURATION_PATH", "./config", &base),
        })
    }

    /// Get a path from environment variable or use default
    fn get_path_from_env(var_name: &str, default: &str, base_dir: &Path) -> PathBuf {
        let path = PathBuf::from(env::var(var_name).unwrap_or_else(|_| default.to_string()));

        if path.is_relative() {
            base_dir.join(path)
        } else {
            path
        }
    }

    /// Get the user database path
    pub fn user_database_path(&self) -> PathBuf {
        self.data_path.join("user-backend").join("portal_user.db")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_path.join("user-backend").join("audit.log")
    }

    /// Get the logs directory path
    pub fn logs_path(&self) -> PathBuf {
        self.data_path.join("logs")
    }

    pub fn route_policy_path(&self) -> PathBuf {
        self.configuration_path.join(api::server::ROUTE_POLICY_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Tests mutate process-wide environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_env_paths_with_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::remove_var("DATA_PATH");
        env::remove_var("CONFIGURATION_PATH");

        let base = PathBuf::from("/srv/portal");
        let paths = EnvPaths::load_with_base(Some(base.clone())).unwrap();

        assert_eq!(paths.data_path, base.join("./data"));
        assert!(paths
            .user_database_path()
            .ends_with("user-backend/portal_user.db"));
        assert!(paths.audit_log_path().ends_with("user-backend/audit.log"));
        assert!(paths.logs_path().ends_with("data/logs"));
        assert!(paths.route_policy_path().ends_with("config/route-policy.yaml"));
    }

    #[test]
    fn test_env_paths_with_absolute_env_vars() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("custom_data");
        let config = temp_dir.path().join("custom_config");

        env::set_var("DATA_PATH", &data);
        env::set_var("CONFIGURATION_PATH", &config);

        let paths = EnvPaths::load_with_base(Some(PathBuf::from("/ignored"))).unwrap();
        assert_eq!(paths.data_path, data);
        assert_eq!(paths.configuration_path, config);

        env::remove_var("DATA_PATH");
        env::remove_var("CONFIGURATION_PATH");
    }

    #[test]
    fn test_env_paths_relative_to_base() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("DATA_PATH", "var/portal");
        env::remove_var("CONFIGURATION_PATH");

        let temp_dir = TempDir::new().unwrap();
        let paths = EnvPaths::load_with_base(Some(temp_dir.path().to_path_buf())).unwrap();
        assert_eq!(paths.data_path, temp_dir.path().join("var/portal"));

        env::remove_var("DATA_PATH");
    }
}
