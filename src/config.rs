//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// Default bound of the job queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Service configuration, read from the environment in `main`.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// libSQL database file.
    pub db_path: PathBuf,
    /// HTTP listen port.
    pub port: u16,
    /// Static root on disk; also the URL prefix it is served under.
    pub static_dir: String,
    /// Subdirectory of `static_dir` holding generated images.
    pub images_subdir: String,
    /// Maximum number of buffered jobs.
    pub queue_capacity: usize,
    /// Images older than this many days are swept.
    pub cleanup_days: u64,
    /// How often the sweep runs. `None` disables it.
    pub cleanup_interval: Option<Duration>,
    /// Allowed CORS origins. `*` allows any.
    pub cors_origins: Vec<String>,
    /// Directory for rolling log files, in addition to stderr.
    pub log_dir: Option<PathBuf>,
    /// Image generator settings.
    pub generator: GeneratorConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/future-viewings.db"),
            port: 8080,
            static_dir: "static".to_string(),
            images_subdir: "images".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            cleanup_days: 14,
            cleanup_interval: Some(Duration::from_secs(86_400)), // daily
            cors_origins: vec!["*".to_string()],
            log_dir: None,
            generator: GeneratorConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Build from `FV_*` / `OPENAI_API_KEY` environment variables, falling back
    /// to defaults for anything missing or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let db_path = std::env::var("FV_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let port: u16 = env_parse("FV_PORT").unwrap_or(defaults.port);

        let static_dir = std::env::var("FV_STATIC_DIR")
            .ok()
            .map(|s| s.trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.static_dir);

        let images_subdir = std::env::var("FV_IMAGES_SUBDIR")
            .ok()
            .map(|s| s.trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.images_subdir);

        let queue_capacity: usize = env_parse::<usize>("FV_QUEUE_CAPACITY")
            .unwrap_or(defaults.queue_capacity)
            .max(1);

        let cleanup_days: u64 = env_parse("FV_CLEANUP_DAYS").unwrap_or(defaults.cleanup_days);

        let cleanup_interval = match env_parse::<u64>("FV_CLEANUP_INTERVAL_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.cleanup_interval,
        };

        let cors_origins: Vec<String> = std::env::var("FV_CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let log_dir = std::env::var("FV_LOG_DIR").ok().map(PathBuf::from);

        Self {
            db_path,
            port,
            static_dir,
            images_subdir,
            queue_capacity,
            cleanup_days,
            cleanup_interval,
            cors_origins,
            log_dir,
            generator: GeneratorConfig::from_env(),
        }
    }

    /// On-disk directory generated images are written to.
    pub fn images_dir(&self) -> PathBuf {
        PathBuf::from(&self.static_dir).join(&self.images_subdir)
    }
}

/// Image generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// API key. `None` means every generation fails.
    pub api_key: Option<SecretString>,
    /// Image model name.
    pub model: String,
    /// API base URL, without trailing slash.
    pub base_url: String,
    /// Requested image size.
    pub size: String,
    /// Requested image quality.
    pub quality: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "dall-e-3".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl GeneratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
            model: std::env::var("FV_IMAGE_MODEL").unwrap_or(defaults.model),
            base_url: std::env::var("FV_OPENAI_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            timeout: env_parse::<u64>("FV_GENERATION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            ..defaults
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
