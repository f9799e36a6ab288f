//! Quantization orchestrator.
//!
//! Runs the configured clustering strategy over the colour, scale and
//! rotation groups of a [`PointModel`] independently and assembles the
//! resulting codebooks and indices into a [`CompressedArtifact`].

pub mod artifact;
pub mod estimate;

use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::{Agoras, AgorasParams, KMeans};
use crate::config::{Config, MAX_CODEBOOK_SIZE};
use crate::context::ExecutionContext;
use crate::error::{Result, VqError};
use crate::model::PointModel;
use crate::types::{AttributeGroup, AttributeTensor, QuantizedAttribute};

pub use artifact::CompressedArtifact;

/// Which clustering algorithm builds the codebooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusteringStrategy {
    /// Mini-batch k-means with fixed iteration counts.
    #[default]
    #[serde(rename = "kmeans")]
    KMeans,
    /// Sample-based cluster discovery, no iteration count.
    #[serde(rename = "agoras")]
    Agoras,
}

impl FromStr for ClusteringStrategy {
    type Err = VqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kmeans" | "k-means" => Ok(ClusteringStrategy::KMeans),
            "agoras" => Ok(ClusteringStrategy::Agoras),
            other => Err(VqError::Config(format!(
                "unknown clustering strategy: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ClusteringStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusteringStrategy::KMeans => f.write_str("kmeans"),
            ClusteringStrategy::Agoras => f.write_str("agoras"),
        }
    }
}

/// Cluster count, k-means iterations and AGORAS sample sets for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPlan {
    pub clusters: usize,
    pub iterations: usize,
    pub sample_sets: usize,
}

/// Independent RNG stream per group so one group's draws never shift another's.
pub(crate) fn group_stream(group: AttributeGroup) -> u64 {
    match group {
        AttributeGroup::Color => 1,
        AttributeGroup::Scale => 2,
        AttributeGroup::Rotation => 3,
    }
}

#[derive(Debug)]
pub struct Compressor {
    config: Config,
    ctx: ExecutionContext,
}

impl Compressor {
    pub fn new(config: Config, ctx: ExecutionContext) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, ctx })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn plan(&self, group: AttributeGroup) -> GroupPlan {
        let c = &self.config.compression;
        match group {
            AttributeGroup::Color => GroupPlan {
                clusters: c.color_clusters,
                iterations: c.color_iterations,
                sample_sets: c.color_sample_sets,
            },
            AttributeGroup::Scale | AttributeGroup::Rotation => GroupPlan {
                clusters: c.geometry_clusters,
                iterations: c.geometry_iterations,
                sample_sets: c.geometry_sample_sets,
            },
        }
    }

    /// Build the codebook and indices for one attribute group.
    pub fn quantize_group(
        &self,
        group: AttributeGroup,
        data: &AttributeTensor,
    ) -> Result<QuantizedAttribute> {
        let plan = self.plan(group);
        if plan.clusters > MAX_CODEBOOK_SIZE {
            return Err(VqError::Validation(format!(
                "{group}: {} clusters exceed the 16-bit index capacity",
                plan.clusters
            )));
        }
        let rng = self.ctx.rng(group_stream(group));
        let strategy = self.config.compression.strategy;
        let start = Instant::now();

        info!(
            group = %group,
            strategy = %strategy,
            n = data.len(),
            dim = data.dim(),
            k = plan.clusters,
            "quantizing attribute group"
        );

        let quantized = match strategy {
            ClusteringStrategy::KMeans => {
                let km = &self.config.kmeans;
                KMeans::init(data, plan.clusters, km.init, &self.ctx, rng)?.run(
                    plan.iterations,
                    km.batch_size,
                    km.progress_interval,
                )?
            }
            ClusteringStrategy::Agoras => {
                let params =
                    AgorasParams::new(plan.clusters, plan.sample_sets, &self.config.agoras);
                let (quantized, report) = Agoras::new(data, params, &self.ctx, rng)?.run()?;
                debug!(group = %group, report = ?report, "AGORAS report");
                quantized
            }
        };

        let residual = estimate::average_residual(data, &quantized)?;
        debug!(group = %group, residual = ?residual, "average residual");
        info!(
            group = %group,
            k = quantized.k(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "attribute group quantized"
        );
        Ok(quantized)
    }

    pub fn compress(&self, model: &PointModel) -> Result<CompressedArtifact> {
        let start = Instant::now();

        if self.config.compression.strategy == ClusteringStrategy::KMeans
            && self.config.compression.estimate_time
        {
            estimate::predict_total_time(model, &self.config, &self.ctx)?;
        }

        let color = self.quantize_group(AttributeGroup::Color, model.attribute(AttributeGroup::Color))?;
        let scale = self.quantize_group(AttributeGroup::Scale, model.attribute(AttributeGroup::Scale))?;
        let rotation =
            self.quantize_group(AttributeGroup::Rotation, model.attribute(AttributeGroup::Rotation))?;

        let artifact = CompressedArtifact::from_parts(model, color, scale, rotation)?;
        let stored = artifact.stored_bytes();
        info!(
            points = model.num_points(),
            raw_bytes = model.raw_bytes(),
            stored_bytes = stored,
            ratio = model.raw_bytes() as f64 / stored.max(1) as f64,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "compression complete"
        );
        Ok(artifact)
    }
}
