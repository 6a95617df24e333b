use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::StaffbookError;
use crate::migration::RecoveryMode;

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "STAFFBOOK_";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 8080,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StorageConfig {
    /// Directory holding every tabular store. Empty means the platform data directory.
    pub data_dir: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub staffbook: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const STAFFBOOK_LEVEL: &str = "info";

    fn ensure_valid(&mut self) {
        let str_original = self.staffbook.clone();
        self.staffbook = self.staffbook.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.staffbook.as_str()) {
            eprintln!(
                "Config error: staffbook log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::STAFFBOOK_LEVEL
            );
            self.staffbook = Self::STAFFBOOK_LEVEL.to_owned();
        }
    }

    /// Log spec understood by flexi_logger.
    pub fn log_spec(&self) -> String {
        format!("staffbook={}", self.staffbook)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            staffbook: Self::STAFFBOOK_LEVEL.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MigrationConfig {
    recovery: String,
}

impl MigrationConfig {
    pub fn recovery_mode(&self) -> RecoveryMode {
        // ensure_valid guarantees a parseable value; fall back rather than panic
        self.recovery.parse().unwrap_or_default()
    }

    fn ensure_valid(&mut self) {
        let str_original = self.recovery.clone();
        self.recovery = self.recovery.trim().to_ascii_lowercase();
        if self.recovery.parse::<RecoveryMode>().is_err() {
            let default = RecoveryMode::default();
            eprintln!(
                "Config error: migration recovery mode of '{}' is invalid - using default of '{}'",
                str_original, default
            );
            self.recovery = default.to_string();
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            recovery: RecoveryMode::default().to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub migration: MigrationConfig,
}

impl Config {
    pub fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "staffbook")
    }

    pub fn default_config_path(project_dirs: &ProjectDirs) -> PathBuf {
        project_dirs.data_local_dir().join(CONFIG_FILE_NAME)
    }

    /// Loads the configuration from a TOML file, layered over the defaults and under
    /// `STAFFBOOK_*` environment variables (`__` separates nested keys).
    /// If the file is missing, the defaults are written there first.
    /// If the merged configuration fails to parse, defaults are used.
    pub fn load_config(config_path: &Path) -> Self {
        let default_config = Config::default();

        if !config_path.exists() {
            Self::write_default(config_path, &default_config);
        }

        let mut config = Self::extract(config_path).unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    /// Merges defaults, the TOML file and the environment without any fallback.
    pub fn extract(config_path: &Path) -> Result<Self, StaffbookError> {
        let config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        Ok(config)
    }

    fn write_default(config_path: &Path, default_config: &Config) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(default_config) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.migration.ensure_valid();
    }

    /// The configured data directory, or the platform default when unset.
    pub fn data_dir(&self, project_dirs: Option<&ProjectDirs>) -> PathBuf {
        let configured = self.storage.data_dir.trim();
        if !configured.is_empty() {
            return PathBuf::from(configured);
        }
        match project_dirs {
            Some(dirs) => dirs.data_local_dir().join("data"),
            None => PathBuf::from("data"),
        }
    }
}

/// Locations of every file the engine reads or writes, all under one data directory.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub data_dir: PathBuf,
    pub schema: PathBuf,
    pub snapshot: PathBuf,
    pub records: PathBuf,
    pub archive: PathBuf,
    pub templates: PathBuf,
    pub audit_log: PathBuf,
    pub intent: PathBuf,
    pub backups: PathBuf,
    pub logs: PathBuf,
}

impl StorePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        StorePaths {
            schema: data_dir.join("fields_schema.csv"),
            snapshot: data_dir.join("fields_mapping.csv"),
            records: data_dir.join("employees.csv"),
            archive: data_dir.join("employees_archive.csv"),
            templates: data_dir.join("templates.csv"),
            audit_log: data_dir.join("audit_log.csv"),
            intent: data_dir.join("migration_intent.json"),
            backups: data_dir.join("backups"),
            logs: data_dir.join("logs"),
            data_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_missing_config_file_is_written_with_defaults() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("nested").join(CONFIG_FILE_NAME);
            let config = Config::load_config(&path);

            assert!(path.exists());
            assert_eq!(config.server.port, 8080);
            assert_eq!(config.migration.recovery_mode(), RecoveryMode::IntentLog);
            Ok(())
        });
    }

    #[test]
    fn test_file_values_and_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE_NAME,
                r#"
                [server]
                host = "0.0.0.0"
                port = 9000

                [migration]
                recovery = "backup"
                "#,
            )?;
            jail.set_env("STAFFBOOK_SERVER__PORT", "9100");
            jail.set_env("STAFFBOOK_STORAGE__DATA_DIR", "/srv/staffbook");

            let config = Config::load_config(Path::new(CONFIG_FILE_NAME));
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.server.port, 9100);
            assert_eq!(config.migration.recovery_mode(), RecoveryMode::Backup);
            assert_eq!(config.data_dir(None), PathBuf::from("/srv/staffbook"));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE_NAME,
                r#"
                [logging]
                staffbook = " LOUD "

                [migration]
                recovery = "pray"
                "#,
            )?;

            let config = Config::load_config(Path::new(CONFIG_FILE_NAME));
            assert_eq!(config.logging.staffbook, "info");
            assert_eq!(config.migration.recovery_mode(), RecoveryMode::IntentLog);
            Ok(())
        });
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE_NAME, "[server]\nport = \"eighty\"\n")?;

            let result = Config::extract(Path::new(CONFIG_FILE_NAME));
            assert!(matches!(result, Err(StaffbookError::ConfigError(_))));

            let config = Config::load_config(Path::new(CONFIG_FILE_NAME));
            assert_eq!(config.server.port, 8080);
            Ok(())
        });
    }

    #[test]
    fn test_log_level_is_normalized() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE_NAME, "[logging]\nstaffbook = \" DEBUG \"\n")?;
            let config = Config::load_config(Path::new(CONFIG_FILE_NAME));
            assert_eq!(config.logging.log_spec(), "staffbook=debug");
            Ok(())
        });
    }

    #[test]
    fn test_store_paths_share_data_dir() {
        let paths = StorePaths::new("/tmp/sb");
        assert_eq!(paths.schema, PathBuf::from("/tmp/sb/fields_schema.csv"));
        assert_eq!(paths.snapshot, PathBuf::from("/tmp/sb/fields_mapping.csv"));
        assert_eq!(paths.intent, PathBuf::from("/tmp/sb/migration_intent.json"));
    }
}
