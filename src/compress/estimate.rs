//! Advisory estimates: projected k-means wall-clock time and the mean
//! quantization residual of a finished group.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use tracing::info;

use super::group_stream;
use crate::cluster::KMeans;
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::error::{Result, VqError};
use crate::model::PointModel;
use crate::types::{AttributeGroup, AttributeTensor, QuantizedAttribute};

/// Stream offset keeping estimate draws apart from the real run's.
const ESTIMATE_STREAM_OFFSET: u64 = 0x100;

/// Time one k-means step on `data` and extrapolate to `iterations`.
pub fn predict_group_time(
    data: &AttributeTensor,
    k: usize,
    iterations: usize,
    config: &Config,
    ctx: &ExecutionContext,
    rng: StdRng,
) -> Result<Duration> {
    let mut kmeans = KMeans::init(data, k, config.kmeans.init, ctx, rng)?;
    let start = Instant::now();
    kmeans.step(config.kmeans.batch_size);
    let per_iteration = start.elapsed();
    Ok(per_iteration.saturating_mul(iterations.min(u32::MAX as usize) as u32))
}

/// Sum of the projected k-means time over all three groups.
pub fn predict_total_time(
    model: &PointModel,
    config: &Config,
    ctx: &ExecutionContext,
) -> Result<Duration> {
    let c = &config.compression;
    let mut total = Duration::ZERO;
    for group in AttributeGroup::ALL {
        let (k, iterations) = match group {
            AttributeGroup::Color => (c.color_clusters, c.color_iterations),
            AttributeGroup::Scale | AttributeGroup::Rotation => {
                (c.geometry_clusters, c.geometry_iterations)
            }
        };
        let rng = ctx.rng(ESTIMATE_STREAM_OFFSET + group_stream(group));
        let t = predict_group_time(model.attribute(group), k, iterations, config, ctx, rng)?;
        info!(group = %group, minutes = t.as_secs_f64() / 60.0, "predicted k-means time");
        total += t;
    }
    info!(minutes = total.as_secs_f64() / 60.0, "predicted total compression time");
    Ok(total)
}

/// Per-dimension mean of `original - codebook[index]`.
pub fn average_residual(original: &AttributeTensor, quantized: &QuantizedAttribute) -> Result<Vec<f32>> {
    if original.dim() != quantized.codebook.dim() {
        return Err(VqError::DimensionMismatch {
            expected: original.dim(),
            actual: quantized.codebook.dim(),
        });
    }
    if original.len() != quantized.indices.len() {
        return Err(VqError::Validation(format!(
            "{} rows but {} indices",
            original.len(),
            quantized.indices.len()
        )));
    }

    let dim = original.dim();
    let mut sums = vec![0.0f64; dim];
    for (row, &idx) in original.rows().zip(quantized.indices.iter()) {
        let center = quantized.codebook.row(idx as usize);
        for ((s, &v), &c) in sums.iter_mut().zip(row).zip(center) {
            *s += (v - c) as f64;
        }
    }
    let n = original.len().max(1) as f64;
    Ok(sums.into_iter().map(|s| (s / n) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::CpuDistance;
    use std::sync::Arc;

    #[test]
    fn test_average_residual() {
        let data = AttributeTensor::from_rows(&[[1.0f32, 0.0], [3.0, 2.0]]).unwrap();
        let codebook = AttributeTensor::from_rows(&[[2.0f32, 0.0]]).unwrap();
        let q = QuantizedAttribute::new(codebook, vec![0, 0]).unwrap();
        assert_eq!(average_residual(&data, &q).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_average_residual_shape_checks() {
        let data = AttributeTensor::from_rows(&[[1.0f32, 0.0]]).unwrap();
        let q = QuantizedAttribute::new(AttributeTensor::from_rows(&[[1.0f32]]).unwrap(), vec![0])
            .unwrap();
        assert!(matches!(
            average_residual(&data, &q),
            Err(VqError::DimensionMismatch { .. })
        ));

        let q = QuantizedAttribute::new(
            AttributeTensor::from_rows(&[[1.0f32, 0.0]]).unwrap(),
            vec![0, 0],
        )
        .unwrap();
        assert!(average_residual(&data, &q).is_err());
    }

    #[test]
    fn test_predict_total_time_runs() {
        let n = 200;
        let model = PointModel::new(
            AttributeTensor::zeros(n, 3),
            vec![0.0; n],
            AttributeTensor::new(3, (0..n * 3).map(|v| v as f32).collect()).unwrap(),
            AttributeTensor::new(3, (0..n * 3).map(|v| (v % 17) as f32).collect()).unwrap(),
            AttributeTensor::new(4, (0..n * 4).map(|v| (v % 13) as f32).collect()).unwrap(),
        )
        .unwrap();
        let mut config = Config::default();
        config.compression.color_clusters = 8;
        config.compression.geometry_clusters = 8;
        config.kmeans.batch_size = 50;
        let ctx = ExecutionContext::new(Arc::new(CpuDistance::default()), 64, Some(5));
        let total = predict_total_time(&model, &config, &ctx).unwrap();
        assert!(total < Duration::from_secs(3600));
    }
}
