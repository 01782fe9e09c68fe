//! Frame stacking by reduction factor.
//!
//! The decoder emits `rf` spectrogram frames per step as one tall column.
//! Stacked row `d * rf + k` holds mel channel `d` of frame `k` in the group.

use candle_core::Tensor;

use crate::{Error, Result};

fn check_factor(reduction_factor: usize) -> Result<()> {
    if reduction_factor == 0 {
        return Err(Error::Config("reduction_factor must be at least 1".into()));
    }
    Ok(())
}

/// `[D, N]` → `[D * rf, N / rf]`; trailing frames that do not fill a group
/// are dropped.
pub fn stack_frames(features: &Tensor, reduction_factor: usize) -> Result<Tensor> {
    check_factor(reduction_factor)?;
    let (channels, frames) = features.dims2()?;
    if reduction_factor == 1 {
        return Ok(features.clone());
    }
    let groups = frames / reduction_factor;
    if groups == 0 {
        return Ok(Tensor::zeros(
            (channels * reduction_factor, 0),
            features.dtype(),
            features.device(),
        )?);
    }
    let stacked = features
        .narrow(1, 0, groups * reduction_factor)?
        .reshape((channels, groups, reduction_factor))?
        .transpose(1, 2)?
        .contiguous()?
        .reshape((channels * reduction_factor, groups))?;
    Ok(stacked)
}

/// `[D * rf, M]` → `[D, M * rf]`.
pub fn unstack_frames(features: &Tensor, reduction_factor: usize) -> Result<Tensor> {
    check_factor(reduction_factor)?;
    let (stacked_channels, groups) = features.dims2()?;
    if stacked_channels % reduction_factor != 0 {
        return Err(Error::Config(format!(
            "{stacked_channels} stacked channels are not divisible by reduction factor {reduction_factor}"
        )));
    }
    if reduction_factor == 1 {
        return Ok(features.clone());
    }
    let channels = stacked_channels / reduction_factor;
    let unstacked = features
        .reshape((channels, reduction_factor, groups))?
        .transpose(1, 2)?
        .contiguous()?
        .reshape((channels, groups * reduction_factor))?;
    Ok(unstacked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    /// `[channels, frames]` with element `(d, n)` = `100 * d + n`.
    fn ramp(channels: usize, frames: usize) -> Tensor {
        let data: Vec<f32> = (0..channels)
            .flat_map(|d| (0..frames).map(move |n| (100 * d + n) as f32))
            .collect();
        Tensor::from_vec(data, (channels, frames), &Device::Cpu).unwrap()
    }

    #[test]
    fn stacked_layout() {
        let stacked = stack_frames(&ramp(2, 7), 3).unwrap();
        assert_eq!(stacked.dims(), &[6, 2]);
        let rows = stacked.to_vec2::<f32>().unwrap();
        // Row d*rf + k, column g holds channel d of frame g*rf + k
        for d in 0..2 {
            for k in 0..3 {
                for g in 0..2 {
                    let expected = (100 * d + g * 3 + k) as f32;
                    assert_eq!(rows[d * 3 + k][g], expected, "d={d} k={k} g={g}");
                }
            }
        }
    }

    #[test]
    fn unstack_restores_whole_groups() {
        let source = ramp(4, 10);
        let restored = unstack_frames(&stack_frames(&source, 2).unwrap(), 2).unwrap();
        assert_eq!(
            restored.to_vec2::<f32>().unwrap(),
            source.to_vec2::<f32>().unwrap()
        );

        // Remainder frames 9 and 10 of 11 are gone after a 3-stack
        let restored = unstack_frames(&stack_frames(&ramp(1, 11), 3).unwrap(), 3).unwrap();
        assert_eq!(restored.dims(), &[1, 9]);
    }

    #[test]
    fn factor_one_is_identity() {
        let source = ramp(3, 5);
        assert_eq!(stack_frames(&source, 1).unwrap().dims(), &[3, 5]);
        assert_eq!(unstack_frames(&source, 1).unwrap().dims(), &[3, 5]);
    }

    #[test]
    fn short_input_stacks_to_nothing() {
        let stacked = stack_frames(&ramp(2, 2), 4).unwrap();
        assert_eq!(stacked.dims(), &[8, 0]);
    }

    #[test]
    fn invalid_factors() {
        assert!(matches!(stack_frames(&ramp(2, 4), 0), Err(Error::Config(_))));
        assert!(matches!(unstack_frames(&ramp(5, 4), 2), Err(Error::Config(_))));
    }
}
