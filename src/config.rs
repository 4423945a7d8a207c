use crate::error::PipelineError;
use crate::translate::TEST_COLLECTION_PREFIX;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "register-stac.toml";

fn default_scheme() -> String {
    "https".to_string()
}

fn default_prefix() -> String {
    TEST_COLLECTION_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    100
}

fn default_builder_program() -> String {
    "/usr/local/bin/stac".to_string()
}

/// Username/password pair for HTTP basic authentication.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(flatten)]
    pub credentials: Credentials,
}

impl Endpoint {
    fn validate(&self, section: &str) -> Result<(), PipelineError> {
        if self.host.trim().is_empty() {
            return Err(PipelineError::Config(format!("[{section}] host is empty")));
        }
        Url::parse(&format!("{}://{}", self.scheme, self.host)).map_err(|err| {
            PipelineError::Config(format!("[{section}] invalid host {:?}: {err}", self.host))
        })?;
        if self.credentials.username.trim().is_empty() {
            return Err(PipelineError::Config(format!("[{section}] username is empty")));
        }
        if self.credentials.password.is_empty() {
            return Err(PipelineError::Config(format!("[{section}] password is empty")));
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BuilderConfig {
    #[serde(default = "default_builder_program")]
    pub program: String,
    /// Arguments placed before the platform sub-command.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            program: default_builder_program(),
            args: vec![],
        }
    }
}

/// Run configuration. Loaded once, then only ever borrowed.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub output_dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub collection_prefix: String,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    pub source: Endpoint,
    pub target: Endpoint,
    #[serde(default)]
    pub builder: BuilderConfig,
}

impl Config {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| PipelineError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, PipelineError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(PipelineError::Config("output_dir is empty".to_string()));
        }
        if self.builder.program.trim().is_empty() {
            return Err(PipelineError::Config("[builder] program is empty".to_string()));
        }
        self.source.validate("source")?;
        self.target.validate("target")?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_TOML: &str = r#"
        output_dir = "/tmp/register-stac"

        [source]
        host = "dhr1.example.org"
        username = "reader"
        password = "secret"

        [target]
        host = "resto.example.org"
        username = "writer"
        password = "secret2"
    "#;

    #[test]
    fn test_defaults_are_applied() {
        let config = Config::from_toml(CONFIG_TOML).unwrap();
        assert_eq!(config.collection_prefix, "mp-");
        assert!(config.use_cache);
        assert_eq!(config.timeout(), Duration::from_secs(100));
        assert_eq!(config.source.scheme, "https");
        assert_eq!(config.source.credentials, Credentials::new("reader", "secret"));
        assert_eq!(config.builder.program, "/usr/local/bin/stac");
        assert!(config.builder.args.is_empty());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = Config::from_toml(include_str!("../register-stac.example.toml")).unwrap();
        assert_eq!(config.target.host, "resto.example.org");
    }

    #[test]
    fn test_missing_credentials_are_rejected() {
        let content = CONFIG_TOML.replace("password = \"secret2\"", "password = \"\"");
        assert!(matches!(
            Config::from_toml(&content),
            Err(PipelineError::Config(_))
        ));

        let content = CONFIG_TOML.replace("username = \"reader\"", "");
        assert!(matches!(
            Config::from_toml(&content),
            Err(PipelineError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_invalid_host_is_rejected() {
        let content = CONFIG_TOML.replace("dhr1.example.org", "bad host");
        assert!(matches!(
            Config::from_toml(&content),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_password_is_not_printed() {
        let config = Config::from_toml(CONFIG_TOML).unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret"));
        assert!(printed.contains("reader"));
    }

    #[test]
    fn test_serialized_config_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let config = Config::from_toml(CONFIG_TOML).unwrap().without_cache();
        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let read = Config::read(&path).unwrap();
        assert_eq!(read, config);
        assert!(!read.use_cache);
    }
}
