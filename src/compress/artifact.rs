//! The persisted result of a compression run.
//!
//! Positions and opacities are kept at half precision. Each attribute group
//! stores an `f32` codebook plus one `i16` index per point.

use std::path::Path;

use bytes::Bytes;
use half::f16;
use tracing::info;

use crate::archive::{self, Archive, ArchiveWriter};
use crate::config::MAX_CODEBOOK_SIZE;
use crate::error::{Result, VqError};
use crate::model::{PointModel, DC_DIM, ROTATION_DIM, SCALE_DIM};
use crate::types::{AttributeGroup, AttributeTensor, QuantizedAttribute};

const MEAN: &str = "mean";
const OPACITY: &str = "opacity";

#[derive(Debug, Clone, PartialEq)]
pub struct CompressedArtifact {
    means: Vec<f16>,
    opacities: Vec<f16>,
    color: QuantizedAttribute,
    scale: QuantizedAttribute,
    rotation: QuantizedAttribute,
}

impl CompressedArtifact {
    /// Combine the quantized groups with the model's reduced-precision
    /// positions and opacities.
    pub fn from_parts(
        model: &PointModel,
        color: QuantizedAttribute,
        scale: QuantizedAttribute,
        rotation: QuantizedAttribute,
    ) -> Result<Self> {
        let artifact = Self {
            means: to_f16(model.positions().as_slice()),
            opacities: to_f16(model.opacities()),
            color,
            scale,
            rotation,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn num_points(&self) -> usize {
        self.opacities.len()
    }

    pub fn means(&self) -> &[f16] {
        &self.means
    }

    pub fn opacities(&self) -> &[f16] {
        &self.opacities
    }

    pub fn group(&self, group: AttributeGroup) -> &QuantizedAttribute {
        match group {
            AttributeGroup::Color => &self.color,
            AttributeGroup::Scale => &self.scale,
            AttributeGroup::Rotation => &self.rotation,
        }
    }

    /// Every group must cover every point, fit 16-bit indices and keep the
    /// codebook width its attributes have in a point model.
    fn validate(&self) -> Result<()> {
        let n = self.num_points();
        if self.means.len() != n * 3 {
            return Err(VqError::CorruptArtifact(format!(
                "{} mean values for {n} points",
                self.means.len()
            )));
        }
        for group in AttributeGroup::ALL {
            let q = self.group(group);
            if q.indices.len() != n {
                return Err(VqError::CorruptArtifact(format!(
                    "{group}: {} indices for {n} points",
                    q.indices.len()
                )));
            }
            if q.k() > MAX_CODEBOOK_SIZE {
                return Err(VqError::CorruptArtifact(format!(
                    "{group}: codebook of {} entries exceeds 16-bit indexing",
                    q.k()
                )));
            }
            let dim = q.codebook.dim();
            let width_ok = match group {
                AttributeGroup::Color => dim >= DC_DIM && dim % DC_DIM == 0,
                AttributeGroup::Scale => dim == SCALE_DIM,
                AttributeGroup::Rotation => dim == ROTATION_DIM,
            };
            if !width_ok {
                return Err(VqError::CorruptArtifact(format!(
                    "{group}: codebook width {dim} does not fit the attribute"
                )));
            }
            q.validate()?;
        }
        Ok(())
    }

    /// Array bytes the artifact occupies before container framing and deflate.
    pub fn stored_bytes(&self) -> usize {
        let mut bytes = (self.means.len() + self.opacities.len()) * 2;
        for group in AttributeGroup::ALL {
            let q = self.group(group);
            bytes += q.codebook.as_slice().len() * 4 + q.indices.len() * 2;
        }
        bytes
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let n = self.num_points();
        let mut w = ArchiveWriter::new();
        w.put_f16(MEAN, &[n, 3], &self.means)?;
        w.put_f16(OPACITY, &[n, 1], &self.opacities)?;
        for group in AttributeGroup::ALL {
            let q = self.group(group);
            let (codebook_name, indices_name) = group.array_names();
            w.put_f32(
                codebook_name,
                &[q.k(), q.codebook.dim()],
                q.codebook.as_slice(),
            )?;
            let indices = q
                .indices
                .iter()
                .map(|&i| {
                    i16::try_from(i).map_err(|_| {
                        VqError::Validation(format!("{group}: index {i} does not fit in i16"))
                    })
                })
                .collect::<Result<Vec<i16>>>()?;
            w.put_i16(indices_name, &[n], &indices)?;
        }
        w.finish()
    }

    pub fn from_bytes(data: Bytes) -> Result<Self> {
        let archive = Archive::from_bytes(data).map_err(|e| match e {
            VqError::ChecksumMismatch { .. } => VqError::CorruptArtifact(e.to_string()),
            other => other,
        })?;

        let (_, means) = archive.f16(MEAN)?;
        let (_, opacities) = archive.f16(OPACITY)?;
        let artifact = Self {
            means,
            opacities,
            color: read_group(&archive, AttributeGroup::Color)?,
            scale: read_group(&archive, AttributeGroup::Scale)?,
            rotation: read_group(&archive, AttributeGroup::Rotation)?,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        archive::write(path.as_ref(), &bytes)?;
        info!(
            path = %path.as_ref().display(),
            points = self.num_points(),
            bytes = bytes.len(),
            "saved compressed artifact"
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let artifact = Self::from_bytes(Bytes::from(data))?;
        info!(
            path = %path.as_ref().display(),
            points = artifact.num_points(),
            "loaded compressed artifact"
        );
        Ok(artifact)
    }

    /// Rebuild a full point model by gathering codebook rows through the
    /// stored indices.
    pub fn decompress(&self) -> Result<PointModel> {
        let positions = AttributeTensor::new(3, to_f32(&self.means))?;
        PointModel::new(
            positions,
            to_f32(&self.opacities),
            self.color.reconstruct(),
            self.scale.reconstruct(),
            self.rotation.reconstruct(),
        )
    }
}

fn read_group(archive: &Archive, group: AttributeGroup) -> Result<QuantizedAttribute> {
    let (codebook_name, indices_name) = group.array_names();

    let (shape, values) = archive.f32(codebook_name)?;
    let dim = match shape.as_slice() {
        [_, dim] if *dim > 0 => *dim,
        _ => {
            return Err(VqError::CorruptArtifact(format!(
                "{codebook_name}: bad codebook shape {shape:?}"
            )))
        }
    };
    let codebook = AttributeTensor::new(dim, values)
        .map_err(|e| VqError::CorruptArtifact(format!("{codebook_name}: {e}")))?;

    let (_, raw) = archive.i16(indices_name)?;
    let indices = raw
        .iter()
        .enumerate()
        .map(|(pos, &i)| {
            u32::try_from(i).map_err(|_| {
                VqError::CorruptArtifact(format!(
                    "{indices_name}: negative index {i} at position {pos}"
                ))
            })
        })
        .collect::<Result<Vec<u32>>>()?;

    QuantizedAttribute::new(codebook, indices)
}

fn to_f16(values: &[f32]) -> Vec<f16> {
    values.iter().map(|&v| f16::from_f32(v)).collect()
}

fn to_f32(values: &[f16]) -> Vec<f32> {
    values.iter().map(|v| v.to_f32()).collect()
}
