//! Configuration Store
//!
//! Layered loading: built-in defaults, then an optional TOML file, then
//! `CREWSTREAM__SECTION__KEY` environment variables. Saving writes pretty TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ENV_PREFIX;
use crate::error::ConfigError;

/// Upper bound on synthetic working stages per run
const MAX_WORKING_STEPS: usize = 100;

/// Unified crewstream configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings
    pub server: ServerConfig,

    /// Step emitter pacing and run limits
    pub stream: StreamConfig,

    /// Blocking worker pool sizing
    pub workers: WorkerConfig,

    /// Document index built at startup
    pub index: IndexConfig,

    /// Crew execution backend
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Upgrade path; any other path is rejected during the handshake
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
            path: "/ws".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Pause after each setup/working record, 0 disables pacing
    pub step_delay_ms: u64,
    /// Number of periodic "Processing..." records
    pub working_steps: usize,
    /// Force-close a session whose run takes longer than this, 0 or unset means no limit
    pub max_run_secs: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 1000,
            working_steps: 3,
            max_run_secs: None,
        }
    }
}

impl StreamConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn max_run(&self) -> Option<Duration> {
        self.max_run_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum blocking pulls in flight across all sessions
    pub max_blocking: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_blocking: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub data_dir: PathBuf,
    /// Passages returned per lookup
    pub top_k: usize,
    /// Rank passages by BGE-small embeddings; term overlap when off or when
    /// the model cannot be loaded
    pub embeddings: bool,
    /// Where the embedding model is downloaded to, defaults to
    /// `<cache_dir>/crewstream/models`
    pub model_cache_dir: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            top_k: 5,
            embeddings: true,
            model_cache_dir: None,
        }
    }
}

impl IndexConfig {
    pub fn resolved_model_cache_dir(&self) -> Option<PathBuf> {
        self.model_cache_dir
            .clone()
            .or_else(super::get_model_cache_dir)
    }
}

/// Which runner executes the crew
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineBackend {
    /// Deterministic local execution over the document index
    #[default]
    Offline,
    /// OpenAI-compatible `/chat/completions` endpoint
    ChatCompletions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub backend: PipelineBackend,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Sampling for the answer written from retrieved passages
    pub lookup_temperature: f32,
    pub lookup_max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: PipelineBackend::Offline,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 4000,
            lookup_temperature: 0.0,
            lookup_max_tokens: 1000,
            timeout_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then `path` (or the first file found in
    /// the standard locations), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => super::find_config_file(),
        };

        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(file) = &file {
            tracing::debug!("Loading configuration from {}", file.display());
            builder = builder.add_source(
                config::File::from(file.as_path())
                    .format(config::FileFormat::Toml)
                    .required(path.is_some()),
            );
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::invalid(format!(
                "server.path must start with '/', got '{}'",
                self.server.path
            )));
        }
        if self.workers.max_blocking == 0 {
            return Err(ConfigError::invalid("workers.max_blocking must be at least 1"));
        }
        if self.stream.working_steps > MAX_WORKING_STEPS {
            return Err(ConfigError::invalid(format!(
                "stream.working_steps must be at most {MAX_WORKING_STEPS}"
            )));
        }
        if self.pipeline.backend == PipelineBackend::ChatCompletions
            && self.pipeline.model.trim().is_empty()
        {
            return Err(ConfigError::invalid(
                "pipeline.model is required for the chat_completions backend",
            ));
        }
        Ok(())
    }

    /// `bind:port` for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    /// Copy safe to print: secrets masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.pipeline.api_key.is_some() {
            config.pipeline.api_key = Some("********".to_string());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.path, "/ws");
        assert_eq!(config.stream.working_steps, 3);
        assert_eq!(config.stream.step_delay(), Duration::from_secs(1));
        assert_eq!(config.stream.max_run(), None);
        assert_eq!(config.pipeline.backend, PipelineBackend::Offline);
        assert_eq!(config.pipeline.lookup_temperature, 0.0);
        assert_eq!(config.pipeline.lookup_max_tokens, 1000);
        assert!(config.index.embeddings);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_model_cache_dir_wins() {
        let index = IndexConfig {
            model_cache_dir: Some(PathBuf::from("/tmp/models")),
            ..Default::default()
        };
        assert_eq!(
            index.resolved_model_cache_dir(),
            Some(PathBuf::from("/tmp/models"))
        );
    }

    #[test]
    fn test_zero_max_run_means_unlimited() {
        let stream = StreamConfig {
            max_run_secs: Some(0),
            ..Default::default()
        };
        assert_eq!(stream.max_run(), None);
    }

    #[test]
    fn test_load_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("crewstream.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9100

[stream]
step_delay_ms = 0
max_run_secs = 30

[pipeline]
backend = "chat_completions"
model = "llama3-70b-8192"
"#,
        )?;

        let config = Config::load(Some(&path))?;
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.stream.step_delay_ms, 0);
        assert_eq!(config.stream.max_run(), Some(Duration::from_secs(30)));
        assert_eq!(config.pipeline.backend, PipelineBackend::ChatCompletions);
        assert_eq!(config.pipeline.model, "llama3-70b-8192");
        assert_eq!(config.index.top_k, 5);
        Ok(())
    }

    #[test]
    fn test_env_overrides_file() -> Result<(), Box<dyn std::error::Error>> {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("crewstream.toml");
        std::fs::write(&path, "[workers]\nmax_blocking = 2\n")?;

        std::env::set_var("CREWSTREAM__WORKERS__MAX_BLOCKING", "16");
        std::env::set_var("CREWSTREAM__PIPELINE__API_KEY", "secret-key");
        let loaded = Config::load(Some(&path));
        std::env::remove_var("CREWSTREAM__WORKERS__MAX_BLOCKING");
        std::env::remove_var("CREWSTREAM__PIPELINE__API_KEY");

        let config = loaded?;
        assert_eq!(config.workers.max_blocking, 16);
        assert_eq!(config.pipeline.api_key.as_deref(), Some("secret-key"));
        assert_eq!(
            config.redacted().pipeline.api_key.as_deref(),
            Some("********")
        );
        Ok(())
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let result = Config::load(Some(Path::new("/nonexistent/crewstream.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.server.path = "ws".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = Config::default();
        config.workers.max_blocking = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stream.working_steps = MAX_WORKING_STEPS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.backend = PipelineBackend::ChatCompletions;
        config.pipeline.model = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_writes_loadable_toml() -> Result<(), Box<dyn std::error::Error>> {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("crewstream.toml");

        let mut config = Config::default();
        config.server.port = 8123;
        config.save(&path)?;

        let loaded = Config::load(Some(&path))?;
        assert_eq!(loaded, config);
        Ok(())
    }
}
