//! Application startup and the two top-level pipelines.
//!
//! Kept out of `main.rs` so config resolution, CLI overrides and the
//! compress/uncompress runs are testable under `cargo test --lib`.

use std::path::Path;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::compress::{ClusteringStrategy, CompressedArtifact, Compressor};
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::model::PointModel;

/// Resolve the configuration file path.
///
/// Priority:
/// 1. `SPLATVQ_CONFIG` environment variable
/// 2. `./splatvq.toml` if it exists
/// 3. None (use defaults)
pub fn resolve_config_path() -> Option<String> {
    std::env::var("SPLATVQ_CONFIG").ok().or_else(|| {
        let default = "splatvq.toml";
        std::path::Path::new(default)
            .exists()
            .then(|| default.to_string())
    })
}

/// Initialize tracing subscriber from logging config.
///
/// Supports JSON and plain text formats. Uses `RUST_LOG` env var if set,
/// otherwise falls back to `config.logging.level`.
pub fn init_logging(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub agoras: bool,
    pub color_clusters: Option<usize>,
    pub geometry_clusters: Option<usize>,
    pub color_iterations: Option<usize>,
    pub geometry_iterations: Option<usize>,
    pub sample_sets: Option<usize>,
}

impl Overrides {
    /// Apply on top of `config` and re-validate the result.
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        let c = &mut config.compression;
        if self.agoras {
            c.strategy = ClusteringStrategy::Agoras;
        }
        if let Some(v) = self.color_clusters {
            c.color_clusters = v;
        }
        if let Some(v) = self.geometry_clusters {
            c.geometry_clusters = v;
        }
        if let Some(v) = self.color_iterations {
            c.color_iterations = v;
        }
        if let Some(v) = self.geometry_iterations {
            c.geometry_iterations = v;
        }
        if let Some(v) = self.sample_sets {
            c.geometry_sample_sets = v;
        }
        config.validate()
    }
}

/// Load a point model, quantize it and write the artifact.
pub fn run_compress(config: &Config, input: &Path, output: &Path) -> Result<CompressedArtifact> {
    let start = Instant::now();
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        strategy = %config.compression.strategy,
        "compressing"
    );

    let model = PointModel::load(input)?;
    let ctx = ExecutionContext::cpu(&config.runtime)?;
    let compressor = Compressor::new(config.clone(), ctx)?;
    let artifact = compressor.compress(&model)?;
    artifact.save(output)?;

    tracing::info!(
        elapsed_secs = start.elapsed().as_secs_f64(),
        "total time"
    );
    Ok(artifact)
}

/// Read an artifact and write the reconstructed point model.
pub fn run_uncompress(input: &Path, output: &Path) -> Result<PointModel> {
    let start = Instant::now();
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        "decompressing"
    );

    let artifact = CompressedArtifact::load(input)?;
    let model = artifact.decompress()?;
    model.save(output)?;

    tracing::info!(
        points = model.num_points(),
        elapsed_secs = start.elapsed().as_secs_f64(),
        "total time"
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeGroup, AttributeTensor};

    #[test]
    fn test_overrides_apply() {
        let mut config = Config::default();
        let overrides = Overrides {
            agoras: true,
            color_clusters: Some(64),
            geometry_iterations: Some(12),
            sample_sets: Some(8),
            ..Default::default()
        };
        overrides.apply(&mut config).unwrap();
        assert_eq!(config.compression.strategy, ClusteringStrategy::Agoras);
        assert_eq!(config.compression.color_clusters, 64);
        assert_eq!(config.compression.geometry_iterations, 12);
        assert_eq!(config.compression.geometry_sample_sets, 8);
        assert_eq!(config.compression.color_sample_sets, 5);
    }

    #[test]
    fn test_overrides_revalidate() {
        let mut config = Config::default();
        let overrides = Overrides {
            geometry_clusters: Some(0),
            ..Default::default()
        };
        assert!(overrides.apply(&mut config).is_err());
    }

    #[test]
    fn test_compress_then_uncompress_files() {
        let n = 120;
        let ramp = |dim: usize, m: usize| {
            AttributeTensor::new(dim, (0..n * dim).map(|v| (v % m) as f32 * 0.1).collect())
                .unwrap()
        };
        let model = PointModel::new(
            ramp(3, 50),
            vec![0.25; n],
            ramp(3, 23),
            ramp(3, 11),
            ramp(4, 7),
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("model.svqm");
        let packed = dir.path().join("model.svq");
        let restored = dir.path().join("restored.svqm");
        model.save(&input).unwrap();

        let mut config = Config::default();
        config.compression.color_clusters = 4;
        config.compression.geometry_clusters = 4;
        config.compression.color_iterations = 3;
        config.compression.geometry_iterations = 3;
        config.compression.estimate_time = false;
        config.kmeans.batch_size = 32;
        config.runtime.seed = Some(9);

        let artifact = run_compress(&config, &input, &packed).unwrap();
        let decoded = run_uncompress(&packed, &restored).unwrap();
        assert_eq!(PointModel::load(&restored).unwrap(), decoded);

        let q = artifact.group(AttributeGroup::Scale);
        for i in 0..n {
            assert_eq!(
                decoded.attribute(AttributeGroup::Scale).row(i),
                q.codebook.row(q.indices[i] as usize)
            );
        }
    }
}
