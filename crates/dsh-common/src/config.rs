use std::path::{Path, PathBuf};

/// Startup configuration taken from environment variables.
/// File-based service config lives next to the service that owns it;
/// only process-level knobs and secrets come from the environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Path of the JSON config file.
    pub config_path: PathBuf,
    /// API key for the content classifier. Never logged.
    pub classifier_api_key: Option<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/dnshield/config.json"),
            classifier_api_key: None,
        }
    }
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DNSHIELD_CONFIG") {
            config.config_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("DNSHIELD_CLASSIFIER_API_KEY") {
            if !v.is_empty() {
                config.classifier_api_key = Some(v);
            }
        }

        config
    }

    /// Load the .env file (if any) then read the environment.
    pub fn load(env_file: Option<&Path>) -> Self {
        if let Some(path) = env_file {
            load_dotenv(path);
        } else {
            let candidates = [PathBuf::from("/etc/dnshield/.env"), PathBuf::from(".env")];
            for candidate in &candidates {
                if candidate.exists() {
                    load_dotenv(candidate);
                    break;
                }
            }
        }

        Self::from_env()
    }
}

/// Minimal .env loader (KEY=VALUE per line). Existing variables win.
fn load_dotenv(path: &Path) {
    if let Ok(content) = std::fs::read_to_string(path) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if std::env::var(key).is_err() {
                    // SAFETY: called before spawning any threads (single-threaded init)
                    unsafe { std::env::set_var(key, value) };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EnvConfig::default();
        assert_eq!(config.config_path, PathBuf::from("/etc/dnshield/config.json"));
        assert!(config.classifier_api_key.is_none());
    }
}
