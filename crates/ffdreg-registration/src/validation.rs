//! Input and configuration checks run before a session starts.

use crate::config::RegistrationConfig;
use crate::error::{RegistrationError, Result};
use ffdreg_core::{Roi, RoiMask, Volume};

/// Smallest and largest accepted bin counts.
pub const MIN_BINS: usize = 2;
pub const MAX_BINS: usize = 1024;

/// Validate a histogram bin count.
pub fn validate_bins(num_bins: usize, which: &str) -> Result<()> {
    if num_bins < MIN_BINS {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} bins must be at least {}, got {}",
            which, MIN_BINS, num_bins
        )));
    }
    if num_bins > MAX_BINS {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} bins too large: {}",
            which, num_bins
        )));
    }
    Ok(())
}

/// Validate iteration or evaluation budgets.
pub fn validate_iterations(iterations: usize, which: &str) -> Result<()> {
    if iterations == 0 {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} must be positive",
            which
        )));
    }
    if iterations > 1_000_000 {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} too large: {}",
            which, iterations
        )));
    }
    Ok(())
}

fn validate_positive(value: f64, which: &str) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} must be positive and finite, got {}",
            which, value
        )));
    }
    Ok(())
}

/// Validate every field of a configuration.
pub fn validate_config(config: &RegistrationConfig) -> Result<()> {
    validate_bins(config.fixed_bins, "Fixed")?;
    validate_bins(config.moving_bins, "Moving")?;
    validate_iterations(config.max_iterations, "Maximum iterations")?;
    validate_iterations(config.max_evaluations, "Maximum evaluations")?;
    if config.min_iterations > config.max_iterations {
        return Err(RegistrationError::invalid_configuration(format!(
            "Minimum iterations ({}) exceed maximum iterations ({})",
            config.min_iterations, config.max_iterations
        )));
    }
    if !(config.convergence_tolerance.is_finite() && config.convergence_tolerance >= 0.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "Convergence tolerance must be non-negative, got {}",
            config.convergence_tolerance
        )));
    }
    validate_positive(config.coefficient_bound, "Coefficient bound")?;
    validate_positive(config.initial_step, "Initial step")?;
    for (d, &k) in config.knot_spacing.iter().enumerate() {
        validate_positive(k, &format!("Knot spacing along axis {}", d))?;
    }
    if config.lbfgs_history == 0 || config.lbfgs_history > 100 {
        return Err(RegistrationError::invalid_configuration(format!(
            "L-BFGS history must be in [1, 100], got {}",
            config.lbfgs_history
        )));
    }
    Ok(())
}

/// Validate that a volume has at least two voxels along every axis.
pub fn validate_volume(volume: &Volume, which: &str) -> Result<()> {
    let dims = volume.dims();
    if dims.iter().any(|&d| d < 2) {
        return Err(RegistrationError::dimension_mismatch(format!(
            "{} volume needs at least 2 voxels per axis, got {:?}",
            which, dims
        )));
    }
    Ok(())
}

/// Validate that an ROI lies inside a volume of `dims`.
pub fn validate_roi(roi: &Roi, dims: [usize; 3]) -> Result<()> {
    if !roi.fits(dims) {
        return Err(RegistrationError::dimension_mismatch(format!(
            "ROI offset {:?} dim {:?} does not fit volume {:?}",
            roi.offset, roi.dim, dims
        )));
    }
    Ok(())
}

/// Validate that a mask has the same shape as its volume.
pub fn validate_mask(mask: &RoiMask, volume: &Volume) -> Result<()> {
    if mask.dims() != volume.dims() {
        return Err(RegistrationError::ShapeMismatch {
            expected: volume.dims().to_vec(),
            actual: mask.dims().to_vec(),
        });
    }
    Ok(())
}
