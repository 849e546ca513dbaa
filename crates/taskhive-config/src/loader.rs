//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a file, falling back to defaults when it is missing.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: Config = toml::from_str(&expanded)?;
        Self::expand_paths(&mut config);
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    fn expand_paths(config: &mut Config) {
        if let Some(path) = config.store.path.take() {
            config.store.path = Some(Self::expand_pathbuf(&path));
        }
        if let Some(dir) = config.logging.dir.take() {
            config.logging.dir = Some(Self::expand_pathbuf(&dir));
        }
    }

    fn expand_pathbuf(path: &Path) -> PathBuf {
        PathBuf::from(Self::expand_path(&path.to_string_lossy()))
    }

    /// Expand shell-style paths (e.g., `~/.taskhive`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ScheduleSpec, StoreBackend};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_expand_path() {
        let expanded = ConfigLoader::expand_path("~/.taskhive");
        assert!(!expanded.starts_with('~'));
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
            [store]
            backend = "sqlite"
            path = "/var/lib/taskhive/jobs.db"
            namespace = "billing"

            [workers]
            count = 8
            poll_interval_ms = 250
            visibility_timeout_secs = 600

            [jobs]
            max_retries = 5
            backoff = "linear"

            [[scheduler.jobs]]
            id = "nightly-report"
            job_type = "report"
            payload = { format = "pdf" }
            schedule = { kind = "daily", hour = 2, minute = 0 }

            [[scheduler.jobs]]
            id = "heartbeat"
            job_type = "ping"
            enabled = false
            schedule = { kind = "interval", every_secs = 30 }
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.namespace, "billing");
        assert_eq!(config.workers.count, 8);
        assert_eq!(config.workers.visibility_timeout_secs, Some(600));
        assert_eq!(config.jobs.max_retries, 5);
        assert_eq!(config.scheduler.jobs.len(), 2);

        let report = &config.scheduler.jobs[0];
        assert_eq!(report.schedule, ScheduleSpec::Daily { hour: 2, minute: 0 });
        assert_eq!(report.payload["format"], "pdf");
        assert!(!config.scheduler.jobs[1].enabled);
    }

    #[test]
    fn test_env_var_expansion() {
        // SAFETY: test-local variable name, no other thread reads it.
        unsafe { std::env::set_var("TASKHIVE_TEST_NAMESPACE", "from-env") };
        let config = ConfigLoader::load_str(
            r#"
            [store]
            namespace = "${TASKHIVE_TEST_NAMESPACE}"
            "#,
        )
        .unwrap();
        assert_eq!(config.store.namespace, "from-env");
    }

    #[test]
    fn test_missing_env_var() {
        let result = ConfigLoader::load_str(
            r#"
            [store]
            namespace = "${TASKHIVE_SURELY_UNSET_VARIABLE}"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[workers]").unwrap();
        writeln!(file, "count = 2").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.workers.count, 2);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/taskhive.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));

        let config = ConfigLoader::load_or_default(Path::new("/nonexistent/path/taskhive.toml")).unwrap();
        assert_eq!(config.workers.count, 4);
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }
}
