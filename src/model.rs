//! Radiance-field point model: per-point positions, opacities and the three
//! attribute groups that get quantized.

use std::path::Path;

use tracing::info;

use crate::archive::{self, Archive, ArchiveWriter};
use crate::error::{Result, VqError};
use crate::types::{AttributeGroup, AttributeTensor};

/// DC colour coefficients per point (one per RGB channel).
pub const DC_DIM: usize = 3;
/// Colour row width for degree-3 spherical harmonics: 3 DC + 45 rest.
pub const SH3_COLOR_DIM: usize = 48;
pub const SCALE_DIM: usize = 3;
pub const ROTATION_DIM: usize = 4;

const XYZ: &str = "xyz";
const OPACITY: &str = "opacity";
const FEATURES: &str = "features";
const SCALING: &str = "scaling";
const ROTATION: &str = "rotation";

#[derive(Debug, Clone, PartialEq)]
pub struct PointModel {
    positions: AttributeTensor,
    opacities: Vec<f32>,
    color: AttributeTensor,
    scale: AttributeTensor,
    rotation: AttributeTensor,
}

impl PointModel {
    /// Assemble a model, checking every tensor covers the same points.
    pub fn new(
        positions: AttributeTensor,
        opacities: Vec<f32>,
        color: AttributeTensor,
        scale: AttributeTensor,
        rotation: AttributeTensor,
    ) -> Result<Self> {
        expect_dim(&positions, 3)?;
        expect_dim(&scale, SCALE_DIM)?;
        expect_dim(&rotation, ROTATION_DIM)?;
        if color.dim() < DC_DIM || color.dim() % DC_DIM != 0 {
            return Err(VqError::Validation(format!(
                "color rows must hold a multiple of {DC_DIM} coefficients, got {}",
                color.dim()
            )));
        }

        let n = positions.len();
        for (name, len) in [
            ("opacities", opacities.len()),
            ("color", color.len()),
            ("scale", scale.len()),
            ("rotation", rotation.len()),
        ] {
            if len != n {
                return Err(VqError::Validation(format!(
                    "{name} covers {len} points, positions cover {n}"
                )));
            }
        }

        Ok(Self {
            positions,
            opacities,
            color,
            scale,
            rotation,
        })
    }

    pub fn num_points(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &AttributeTensor {
        &self.positions
    }

    pub fn opacities(&self) -> &[f32] {
        &self.opacities
    }

    pub fn attribute(&self, group: AttributeGroup) -> &AttributeTensor {
        match group {
            AttributeGroup::Color => &self.color,
            AttributeGroup::Scale => &self.scale,
            AttributeGroup::Rotation => &self.rotation,
        }
    }

    /// The DC term of point `i`'s colour row.
    pub fn features_dc(&self, i: usize) -> &[f32] {
        &self.color.row(i)[..DC_DIM]
    }

    /// Higher-order spherical-harmonic coefficients of point `i`.
    pub fn features_rest(&self, i: usize) -> &[f32] {
        &self.color.row(i)[DC_DIM..]
    }

    /// Bytes needed to hold every attribute as raw `f32`.
    pub fn raw_bytes(&self) -> usize {
        let floats = self.positions.as_slice().len()
            + self.opacities.len()
            + self.color.as_slice().len()
            + self.scale.as_slice().len()
            + self.rotation.as_slice().len();
        floats * std::mem::size_of::<f32>()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let n = self.num_points();
        let mut w = ArchiveWriter::new();
        w.put_f32(XYZ, &[n, 3], self.positions.as_slice())?;
        w.put_f32(OPACITY, &[n, 1], &self.opacities)?;
        w.put_f32(FEATURES, &[n, self.color.dim()], self.color.as_slice())?;
        w.put_f32(SCALING, &[n, SCALE_DIM], self.scale.as_slice())?;
        w.put_f32(ROTATION, &[n, ROTATION_DIM], self.rotation.as_slice())?;
        let bytes = w.finish()?;
        archive::write(path.as_ref(), &bytes)?;
        info!(path = %path.as_ref().display(), points = n, bytes = bytes.len(), "saved point model");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let archive = Archive::read(path.as_ref())?;
        let model = Self::new(
            read_tensor(&archive, XYZ)?,
            archive.f32(OPACITY)?.1,
            read_tensor(&archive, FEATURES)?,
            read_tensor(&archive, SCALING)?,
            read_tensor(&archive, ROTATION)?,
        )?;
        info!(path = %path.as_ref().display(), points = model.num_points(), "loaded point model");
        Ok(model)
    }
}

fn expect_dim(t: &AttributeTensor, dim: usize) -> Result<()> {
    if t.dim() != dim {
        return Err(VqError::DimensionMismatch {
            expected: dim,
            actual: t.dim(),
        });
    }
    Ok(())
}

fn read_tensor(archive: &Archive, name: &str) -> Result<AttributeTensor> {
    let (shape, values) = archive.f32(name)?;
    match shape.as_slice() {
        [_, dim] => AttributeTensor::new(*dim, values),
        _ => Err(VqError::CorruptArtifact(format!(
            "array {name} should be two-dimensional, got shape {shape:?}"
        ))),
    }
}
