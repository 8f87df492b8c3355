//! Binary persistence of B-spline transforms.
//!
//! Layout: an 8-byte format tag, the header size as a little-endian `u32`,
//! the fixed-width header, then `num_coefficients` raw `f32` values.

use super::bspline::{lattice_size, BSplineTransform};
use crate::error::{CoreError, Result};
use crate::image::{Roi, VolumeGeometry};
use crate::spatial::{direction_from_cosines, direction_to_cosines, Point3, Spacing3};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Format tag written at the start of every transform file.
pub const FORMAT_TAG: [u8; 8] = *b"FFDXFM01";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TransformHeader {
    origin: [f64; 3],
    spacing: [f64; 3],
    dims: [u64; 3],
    roi_offset: [u64; 3],
    roi_dim: [u64; 3],
    vox_per_rgn: [u64; 3],
    grid_spacing: [f64; 3],
    direction: [f64; 9],
    num_coefficients: u64,
}

fn header_config() -> impl bincode::config::Config {
    bincode::config::legacy()
}

fn encode_header(header: &TransformHeader) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(header, header_config())
        .map_err(|e| CoreError::format(format!("cannot encode header: {}", e)))
}

/// Encoded size of the fixed-width header.
fn header_size() -> Result<usize> {
    Ok(encode_header(&TransformHeader::default())?.len())
}

fn to_u64(v: [usize; 3]) -> [u64; 3] {
    v.map(|x| x as u64)
}

fn to_usize(v: [u64; 3]) -> Result<[usize; 3]> {
    let mut out = [0usize; 3];
    for d in 0..3 {
        out[d] = usize::try_from(v[d])
            .map_err(|_| CoreError::format(format!("dimension {} does not fit in usize", v[d])))?;
    }
    Ok(out)
}

impl BSplineTransform {
    /// Write the transform to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        tracing::info!("Saved B-spline transform to {}", path.display());
        Ok(())
    }

    /// Read a transform previously written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let transform = Self::read_from(&mut reader)?;
        tracing::info!(
            "Loaded B-spline transform from {} ({} coefficients)",
            path.display(),
            transform.num_coefficients()
        );
        Ok(transform)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let g = self.geometry();
        let roi = self.roi();
        let header = TransformHeader {
            origin: [g.origin().x, g.origin().y, g.origin().z],
            spacing: [g.spacing().x, g.spacing().y, g.spacing().z],
            dims: to_u64(g.dims()),
            roi_offset: to_u64(roi.offset),
            roi_dim: to_u64(roi.dim),
            vox_per_rgn: to_u64(self.vox_per_rgn()),
            grid_spacing: self.grid_spacing(),
            direction: direction_to_cosines(g.direction()),
            num_coefficients: self.num_coefficients() as u64,
        };
        let encoded = encode_header(&header)?;

        writer.write_all(&FORMAT_TAG)?;
        writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
        writer.write_all(&encoded)?;
        if cfg!(target_endian = "little") {
            writer.write_all(bytemuck::cast_slice::<f32, u8>(self.coefficients()))?;
        } else {
            for c in self.coefficients() {
                writer.write_all(&c.to_le_bytes())?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut tag = [0u8; 8];
        reader
            .read_exact(&mut tag)
            .map_err(|e| CoreError::format(format!("missing format tag: {}", e)))?;
        if tag != FORMAT_TAG {
            return Err(CoreError::format(format!(
                "unknown format tag {:?}",
                String::from_utf8_lossy(&tag)
            )));
        }

        let mut size_bytes = [0u8; 4];
        reader
            .read_exact(&mut size_bytes)
            .map_err(|e| CoreError::format(format!("missing header size: {}", e)))?;
        let stored_size = u32::from_le_bytes(size_bytes) as usize;
        let expected_size = header_size()?;
        if stored_size != expected_size {
            return Err(CoreError::format(format!(
                "header size {} does not match expected {}",
                stored_size, expected_size
            )));
        }

        let mut header_bytes = vec![0u8; stored_size];
        reader
            .read_exact(&mut header_bytes)
            .map_err(|e| CoreError::format(format!("truncated header: {}", e)))?;
        let (header, _): (TransformHeader, usize) =
            bincode::serde::decode_from_slice(&header_bytes, header_config())
                .map_err(|e| CoreError::format(format!("cannot decode header: {}", e)))?;

        let geometry = VolumeGeometry::new(
            to_usize(header.dims)?,
            Point3::from(header.origin),
            Spacing3::from(header.spacing),
            direction_from_cosines(&header.direction),
        )
        .map_err(|e| CoreError::format(format!("stored geometry is invalid: {}", e)))?;
        let roi = Roi::new(to_usize(header.roi_offset)?, to_usize(header.roi_dim)?);
        if !roi.fits(geometry.dims()) {
            return Err(CoreError::format(format!(
                "stored ROI offset {:?} dim {:?} does not fit volume {:?}",
                roi.offset,
                roi.dim,
                geometry.dims()
            )));
        }
        let vox_per_rgn = to_usize(header.vox_per_rgn)?;
        let (_, cdims, num_coefficients) = lattice_size(roi.dim, vox_per_rgn).ok_or_else(|| {
            CoreError::format(format!(
                "stored lattice for ROI dim {:?} with {:?} voxels per region is invalid",
                roi.dim, vox_per_rgn
            ))
        })?;
        if header.num_coefficients != num_coefficients as u64 {
            return Err(CoreError::format(format!(
                "header declares {} coefficients but lattice {:?} needs {}",
                header.num_coefficients, cdims, num_coefficients
            )));
        }

        // The block must be present before the lattice is allocated.
        let byte_len = num_coefficients
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or_else(|| CoreError::format("coefficient block size overflows"))?;
        let mut bytes = Vec::new();
        Read::take(&mut *reader, byte_len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != byte_len {
            return Err(CoreError::format(format!(
                "truncated coefficients: expected {} bytes, found {}",
                byte_len,
                bytes.len()
            )));
        }

        let mut transform = Self::with_vox_per_rgn(&geometry, roi, vox_per_rgn)
            .map_err(|e| CoreError::format(format!("stored lattice is invalid: {}", e)))?;
        for (c, chunk) in transform.coefficients_mut().iter_mut().zip(bytes.chunks_exact(4)) {
            *c = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(transform)
    }
}
