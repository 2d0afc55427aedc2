use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::models::Hyperparameters;
use crate::services::scheduler::SchedulerOptions;
use crate::services::trainer::TrainerOptions;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// PostgreSQL connection URL; the in-memory rating store is used when unset
    #[serde(default)]
    pub database_url: Option<String>,

    /// Redis connection URL; recommendation caching is disabled when unset
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Directory holding versioned model files
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// JSON movie catalog, read when no database is configured
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    #[serde(default = "default_top_n")]
    pub default_top_n: usize,

    /// Latent dimension K
    #[serde(default = "default_factors")]
    pub factors: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_regularization")]
    pub regularization: f64,

    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Standard deviation of the initial latent factors
    #[serde(default = "default_init_std")]
    pub init_std: f64,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_divergence_window")]
    pub divergence_window: usize,

    #[serde(default = "default_divergence_tolerance")]
    pub divergence_tolerance: f64,

    /// Seconds between scheduled retrains (0 disables the timer)
    #[serde(default = "default_retrain_interval_secs")]
    pub retrain_interval_secs: u64,

    /// New ratings that trigger a retrain (0 disables the threshold)
    #[serde(default = "default_retrain_threshold")]
    pub retrain_threshold: u64,

    /// Upper bound on a single training run in seconds (0 disables)
    #[serde(default)]
    pub training_timeout_secs: u64,

    #[serde(default = "default_retrain_on_startup")]
    pub retrain_on_startup: bool,

    /// TTL for cached recommendation lists
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_top_n() -> usize {
    10
}

fn default_factors() -> usize {
    50
}

fn default_learning_rate() -> f64 {
    0.005
}

fn default_regularization() -> f64 {
    0.02
}

fn default_epochs() -> usize {
    20
}

fn default_init_std() -> f64 {
    0.1
}

fn default_seed() -> u64 {
    42
}

fn default_divergence_window() -> usize {
    3
}

fn default_divergence_tolerance() -> f64 {
    0.01
}

fn default_retrain_interval_secs() -> u64 {
    60 * 60 * 24
}

fn default_retrain_threshold() -> u64 {
    1_000
}

fn default_retrain_on_startup() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would make every training cycle fail
    pub fn validate(&self) -> anyhow::Result<()> {
        self.hyperparameters()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid hyperparameters: {}", e))?;
        if !(self.init_std.is_finite() && self.init_std > 0.0) {
            anyhow::bail!("INIT_STD must be a positive number, got {}", self.init_std);
        }
        if !(self.divergence_tolerance.is_finite() && self.divergence_tolerance >= 0.0) {
            anyhow::bail!(
                "DIVERGENCE_TOLERANCE must be a non-negative number, got {}",
                self.divergence_tolerance
            );
        }
        if self.default_top_n == 0 {
            anyhow::bail!("DEFAULT_TOP_N must be at least 1");
        }
        Ok(())
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            factors: self.factors,
            learning_rate: self.learning_rate,
            regularization: self.regularization,
            epochs: self.epochs,
        }
    }

    pub fn trainer_options(&self) -> TrainerOptions {
        TrainerOptions {
            init_std: self.init_std,
            seed: self.seed,
            divergence_window: self.divergence_window,
            divergence_tolerance: self.divergence_tolerance,
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            interval: non_zero_secs(self.retrain_interval_secs),
            rating_threshold: (self.retrain_threshold > 0).then_some(self.retrain_threshold),
            training_timeout: non_zero_secs(self.training_timeout_secs),
            run_on_start: self.retrain_on_startup,
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
