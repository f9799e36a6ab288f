use crate::cluster::kmeans::InitPolicy;
use crate::compress::ClusteringStrategy;
use crate::error::{Result, VqError};
use serde::{Deserialize, Serialize};

/// Largest codebook addressable by the 16-bit index arrays of the artifact.
pub const MAX_CODEBOOK_SIZE: usize = 1 << 15;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub kmeans: KMeansConfig,
    #[serde(default)]
    pub agoras: AgorasConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_strategy")]
    pub strategy: ClusteringStrategy,
    #[serde(default = "default_color_clusters")]
    pub color_clusters: usize,
    #[serde(default = "default_geometry_clusters")]
    pub geometry_clusters: usize,
    #[serde(default = "default_color_iterations")]
    pub color_iterations: usize,
    #[serde(default = "default_geometry_iterations")]
    pub geometry_iterations: usize,
    #[serde(default = "default_color_sample_sets")]
    pub color_sample_sets: usize,
    #[serde(default = "default_geometry_sample_sets")]
    pub geometry_sample_sets: usize,
    #[serde(default = "default_estimate_time")]
    pub estimate_time: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub init: InitPolicy,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgorasConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_shrink_factor")]
    pub shrink_factor: f64,
    #[serde(default = "default_margin_divisor")]
    pub margin_divisor: usize,
    /// Upper bound on rows per sample set. Growth stops here and the run
    /// fails with `NonConverged` instead of doubling without end.
    #[serde(default = "default_max_sample_size")]
    pub max_sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Rows per distance-service chunk during full assignment.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Fixed RNG seed. `None` draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Worker threads for the distance service. 0 keeps the rayon default.
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_strategy() -> ClusteringStrategy {
    std::env::var("SPLATVQ_STRATEGY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(ClusteringStrategy::KMeans)
}
fn default_color_clusters() -> usize {
    std::env::var("SPLATVQ_COLOR_CLUSTERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4096)
}
fn default_geometry_clusters() -> usize {
    std::env::var("SPLATVQ_GEOMETRY_CLUSTERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4096)
}
fn default_color_iterations() -> usize {
    100
}
fn default_geometry_iterations() -> usize {
    3000
}
fn default_color_sample_sets() -> usize {
    5
}
fn default_geometry_sample_sets() -> usize {
    50
}
fn default_estimate_time() -> bool {
    true
}
fn default_batch_size() -> usize {
    std::env::var("SPLATVQ_BATCH_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100_000)
}
fn default_progress_interval() -> usize {
    500
}
fn default_max_attempts() -> usize {
    1000
}
fn default_shrink_factor() -> f64 {
    0.95
}
fn default_margin_divisor() -> usize {
    40
}
fn default_max_sample_size() -> usize {
    131_072
}
fn default_chunk_size() -> usize {
    std::env::var("SPLATVQ_CHUNK_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10_000)
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    std::env::var("SPLATVQ_LOG_FORMAT").unwrap_or_else(|_| "text".to_string())
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            color_clusters: default_color_clusters(),
            geometry_clusters: default_geometry_clusters(),
            color_iterations: default_color_iterations(),
            geometry_iterations: default_geometry_iterations(),
            color_sample_sets: default_color_sample_sets(),
            geometry_sample_sets: default_geometry_sample_sets(),
            estimate_time: default_estimate_time(),
        }
    }
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            init: InitPolicy::default(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl Default for AgorasConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            shrink_factor: default_shrink_factor(),
            margin_divisor: default_margin_divisor(),
            max_sample_size: default_max_sample_size(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            seed: std::env::var("SPLATVQ_SEED")
                .ok()
                .and_then(|v| v.parse().ok()),
            threads: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults.
    /// After loading, env var overrides are applied so that:
    /// env var > TOML file > defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|e| {
                    VqError::Config(format!("failed to read config file {p}: {e}"))
                })?;
                Self::from_toml(&content)?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| VqError::Config(format!("failed to parse config: {e}")))
    }

    /// Reject settings no clustering run can satisfy.
    pub fn validate(&self) -> Result<()> {
        let c = &self.compression;
        for (name, k) in [
            ("color_clusters", c.color_clusters),
            ("geometry_clusters", c.geometry_clusters),
        ] {
            if k == 0 {
                return Err(VqError::Config(format!("{name} must be > 0")));
            }
            if k > MAX_CODEBOOK_SIZE {
                return Err(VqError::Config(format!(
                    "{name} ({k}) exceeds the 16-bit index capacity ({MAX_CODEBOOK_SIZE})"
                )));
            }
        }
        if c.color_sample_sets < 2 || c.geometry_sample_sets < 2 {
            return Err(VqError::Config(
                "AGORAS needs at least 2 sample sets per group".into(),
            ));
        }
        if self.kmeans.batch_size == 0 {
            return Err(VqError::Config("kmeans.batch_size must be > 0".into()));
        }
        if self.runtime.chunk_size == 0 {
            return Err(VqError::Config("runtime.chunk_size must be > 0".into()));
        }
        if !(self.agoras.shrink_factor > 0.0 && self.agoras.shrink_factor < 1.0) {
            return Err(VqError::Config(format!(
                "agoras.shrink_factor must be in (0, 1), got {}",
                self.agoras.shrink_factor
            )));
        }
        if self.agoras.margin_divisor == 0
            || self.agoras.max_attempts == 0
            || self.agoras.max_sample_size == 0
        {
            return Err(VqError::Config(
                "agoras.margin_divisor, agoras.max_attempts and agoras.max_sample_size must be > 0"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides on top of file/default values.
    fn apply_env_overrides(&mut self) {
        // Compression
        if let Some(v) = std::env::var("SPLATVQ_STRATEGY")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.compression.strategy = v;
        }
        if let Some(v) = std::env::var("SPLATVQ_COLOR_CLUSTERS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.compression.color_clusters = v;
        }
        if let Some(v) = std::env::var("SPLATVQ_GEOMETRY_CLUSTERS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.compression.geometry_clusters = v;
        }

        // K-Means
        if let Some(v) = std::env::var("SPLATVQ_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.kmeans.batch_size = v;
        }

        // AGORAS
        if let Some(v) = std::env::var("SPLATVQ_AGORAS_MAX_SAMPLE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.agoras.max_sample_size = v;
        }

        // Runtime
        if let Some(v) = std::env::var("SPLATVQ_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.runtime.chunk_size = v;
        }
        if let Some(v) = std::env::var("SPLATVQ_SEED")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.runtime.seed = Some(v);
        }

        // Logging
        if let Ok(v) = std::env::var("SPLATVQ_LOG_FORMAT") {
            self.logging.format = v;
        }
    }
}
