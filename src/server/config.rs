use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_SECRET_KEY: &str = "default-secret-key";
pub const DEFAULT_ENCRYPTION_KEY: &str = "default-encryption_key";

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    /// Signs management session JWTs.
    pub secret_key: String,
    /// Process-wide secret the channel config cipher key is derived from.
    pub encryption_key: String,
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub registration_enabled: bool,
    pub log_dir: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    secret_key: Option<String>,
    encryption_key: Option<String>,
    database_url: Option<String>,
    server_host: Option<String>,
    server_port: Option<u16>,
    registration_enabled: Option<bool>,
    log_dir: Option<String>,
}

fn default_database_url() -> String {
    "sqlite://notifyhub.db".to_string()
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            encryption_key: DEFAULT_ENCRYPTION_KEY.to_string(),
            database_url: default_database_url(),
            server_host: default_server_host(),
            server_port: 5000,
            registration_enabled: true,
            log_dir: default_log_dir(),
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();
        Self::load_from(config_path, std::env::vars())
    }

    /// Layers defaults, the optional TOML file and the given environment, in that order.
    pub fn load_from<I>(config_path: Option<&str>, env_vars: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        // 1. Load from file (optional)
        let file_config: PartialServerConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            } else {
                PartialServerConfig::default()
            }
        } else {
            PartialServerConfig::default()
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_iter(env_vars)
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        let defaults = ServerConfig::default();
        Ok(ServerConfig {
            secret_key: env_config
                .secret_key
                .or(file_config.secret_key)
                .unwrap_or(defaults.secret_key),
            encryption_key: env_config
                .encryption_key
                .or(file_config.encryption_key)
                .unwrap_or(defaults.encryption_key),
            database_url: env_config
                .database_url
                .or(file_config.database_url)
                .unwrap_or(defaults.database_url),
            server_host: env_config
                .server_host
                .or(file_config.server_host)
                .unwrap_or(defaults.server_host),
            server_port: env_config
                .server_port
                .or(file_config.server_port)
                .unwrap_or(defaults.server_port),
            registration_enabled: env_config
                .registration_enabled
                .or(file_config.registration_enabled)
                .unwrap_or(defaults.registration_enabled),
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or(defaults.log_dir),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// True when either secret is still the built-in development value.
    pub fn uses_default_secrets(&self) -> bool {
        self.secret_key == DEFAULT_SECRET_KEY || self.encryption_key == DEFAULT_ENCRYPTION_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let config = ServerConfig::load_from(None, Vec::new()).unwrap();
        assert_eq!(config.database_url, "sqlite://notifyhub.db");
        assert_eq!(config.bind_address(), "127.0.0.1:5000");
        assert!(config.registration_enabled);
        assert!(config.uses_default_secrets());
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server_port = 8081\nencryption_key = \"from-file\"\nregistration_enabled = false"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = ServerConfig::load_from(
            Some(&path),
            env(&[("ENCRYPTION_KEY", "from-env"), ("SECRET_KEY", "s3cret")]),
        )
        .unwrap();

        assert_eq!(config.server_port, 8081);
        assert_eq!(config.encryption_key, "from-env");
        assert!(!config.registration_enabled);
        assert!(!config.uses_default_secrets());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            ServerConfig::load_from(Some("/nonexistent/notifyhub.toml"), Vec::new()).unwrap();
        assert_eq!(config.log_dir, "logs");
    }

    #[test]
    fn invalid_port_in_environment_is_an_error() {
        let result = ServerConfig::load_from(None, env(&[("SERVER_PORT", "not-a-port")]));
        assert!(result.is_err());
    }
}
