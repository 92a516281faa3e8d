// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::backend::cpu_gemm::gemm_packed;
use crate::memory::AlignedBuf;
use rayon::prelude::*;
use rk_core::error::KernelResult;
use rk_core::plan::{ConvAlgorithm, ConvPlan};
use rk_core::shape::ConvShape;
use tracing::debug;

/// Host-side direct convolution engine.
///
/// The execution plan is chosen once from the shape, and the im2col patch
/// workspace (when the plan needs one) is allocated exactly once here and
/// reused by every call. Dropping the engine releases it.
pub struct CpuConv2d {
    shape: ConvShape,
    plan: ConvPlan,
    workspace: AlignedBuf,
}

impl CpuConv2d {
    pub fn new(shape: ConvShape) -> KernelResult<Self> {
        let plan = ConvPlan::select(&shape);
        let workspace = AlignedBuf::try_zeroed(plan.workspace_len())?;
        debug!(
            algorithm = ?plan.algorithm(),
            workspace_bytes = plan.workspace_bytes(),
            "selected host convolution plan"
        );
        Ok(Self {
            shape,
            plan,
            workspace,
        })
    }

    pub fn shape(&self) -> &ConvShape {
        &self.shape
    }

    pub fn plan(&self) -> &ConvPlan {
        &self.plan
    }

    /// Runs the convolution fixed at construction: `output = input ⊛ kernel`.
    ///
    /// Buffer lengths must equal the shape's `input_len`, `kernel_len` and
    /// `output_len`. That agreement is the caller's contract, checked by
    /// debug assertions only. The output is fully overwritten. `&mut self`
    /// keeps the workspace exclusive to one call at a time; run concurrent
    /// convolutions on separate instances.
    pub fn conv2d(
        &mut self,
        input: &[f32],
        kernel: &[f32],
        output: &mut [f32],
    ) -> KernelResult<()> {
        let shape = self.shape;
        debug_assert_eq!(input.len(), shape.input_len());
        debug_assert_eq!(kernel.len(), shape.kernel_len());
        debug_assert_eq!(output.len(), shape.output_len());

        match self.plan.algorithm() {
            ConvAlgorithm::Direct => direct_conv(&shape, input, kernel, output),
            ConvAlgorithm::Im2colGemm => {
                lower_patches(&shape, input, self.workspace.as_mut_slice());
                let spatial = shape.spatial_out();
                let span = shape.span();
                let f = shape.out_channels();
                for n in 0..shape.batch() {
                    let patches = &self.workspace[n * spatial * span..(n + 1) * spatial * span];
                    let out = &mut output[n * f * spatial..(n + 1) * f * spatial];
                    gemm_packed(out, kernel, patches, f, span, spatial);
                }
            }
        }
        Ok(())
    }
}

fn direct_conv(shape: &ConvShape, input: &[f32], kernel: &[f32], output: &mut [f32]) {
    let (c, h, w) = (shape.in_channels(), shape.in_height(), shape.in_width());
    let (kh, kw) = (shape.kernel_height(), shape.kernel_width());
    let (oh, ow) = (shape.out_height(), shape.out_width());
    let spatial = shape.spatial_out();
    let f_count = shape.out_channels();
    let span = shape.span();

    output
        .par_chunks_mut(spatial)
        .enumerate()
        .for_each(|(plane, out_plane)| {
            let n = plane / f_count;
            let f = plane % f_count;
            let image = &input[n * c * h * w..(n + 1) * c * h * w];
            let taps = &kernel[f * span..(f + 1) * span];
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = 0.0f32;
                    for ch in 0..c {
                        let in_plane = &image[ch * h * w..(ch + 1) * h * w];
                        let tap_plane = &taps[ch * kh * kw..(ch + 1) * kh * kw];
                        for ky in 0..kh {
                            let row_off = (oy + ky) * w + ox;
                            let row = &in_plane[row_off..row_off + kw];
                            let tap_row = &tap_plane[ky * kw..(ky + 1) * kw];
                            for kx in 0..kw {
                                acc += row[kx] * tap_row[kx];
                            }
                        }
                    }
                    out_plane[oy * ow + ox] = acc;
                }
            }
        });
}

/// Lowers NCHW input into the `[n*oh*ow][c*y*x]` patch matrix.
fn lower_patches(shape: &ConvShape, input: &[f32], patches: &mut [f32]) {
    let (c, h, w) = (shape.in_channels(), shape.in_height(), shape.in_width());
    let (kh, kw) = (shape.kernel_height(), shape.kernel_width());
    let ow = shape.out_width();
    let spatial = shape.spatial_out();
    let span = shape.span();

    patches
        .par_chunks_mut(span)
        .enumerate()
        .for_each(|(row, patch)| {
            let n = row / spatial;
            let site = row % spatial;
            let oy = site / ow;
            let ox = site % ow;
            let image = &input[n * c * h * w..(n + 1) * c * h * w];
            let mut k = 0;
            for ch in 0..c {
                let plane = &image[ch * h * w..(ch + 1) * h * w];
                for ky in 0..kh {
                    let row_off = (oy + ky) * w + ox;
                    patch[k..k + kw].copy_from_slice(&plane[row_off..row_off + kw]);
                    k += kw;
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rk_core::reference;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|v| ((v % 13) as f32) - 6.0).collect()
    }

    #[test]
    fn direct_plan_matches_reference() {
        let shape = ConvShape::new(1, 2, 5, 5, 2, 3, 3).unwrap();
        let mut engine = CpuConv2d::new(shape).unwrap();
        assert_eq!(engine.plan().algorithm(), ConvAlgorithm::Direct);

        let input = ramp(shape.input_len());
        let kernel = ramp(shape.kernel_len());
        let mut output = vec![0.0; shape.output_len()];
        engine.conv2d(&input, &kernel, &mut output).unwrap();

        let mut expected = vec![0.0; shape.output_len()];
        reference::conv2d(&shape, &input, &kernel, &mut expected);
        assert_eq!(output, expected);
    }

    #[test]
    fn gemm_plan_matches_reference() {
        let shape = ConvShape::new(2, 4, 16, 16, 8, 3, 3).unwrap();
        let mut engine = CpuConv2d::new(shape).unwrap();
        assert_eq!(engine.plan().algorithm(), ConvAlgorithm::Im2colGemm);

        let input = ramp(shape.input_len());
        let kernel = ramp(shape.kernel_len());
        let mut output = vec![0.0; shape.output_len()];
        engine.conv2d(&input, &kernel, &mut output).unwrap();

        let mut expected = vec![0.0; shape.output_len()];
        reference::conv2d(&shape, &input, &kernel, &mut expected);
        for (a, b) in output.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn single_tap_kernel_scales_the_input() {
        let shape = ConvShape::new(1, 1, 4, 4, 1, 1, 1).unwrap();
        let mut engine = CpuConv2d::new(shape).unwrap();
        let input = ramp(shape.input_len());
        let kernel = vec![2.5];
        let mut output = vec![0.0; shape.output_len()];
        engine.conv2d(&input, &kernel, &mut output).unwrap();
        for (o, i) in output.iter().zip(input.iter()) {
            assert_eq!(*o, i * 2.5);
        }
    }

    #[test]
    fn single_tap_kernel_selects_one_channel_through_the_gemm_path() {
        let shape = ConvShape::new(1, 16, 32, 32, 16, 1, 1).unwrap();
        let mut engine = CpuConv2d::new(shape).unwrap();
        assert_eq!(engine.plan().algorithm(), ConvAlgorithm::Im2colGemm);

        let input = ramp(shape.input_len());
        let mut kernel = vec![0.0; shape.kernel_len()];
        // Filter 3 reads channel 5 scaled by 2.5; every other filter is zero.
        kernel[3 * shape.span() + 5] = 2.5;
        let mut output = vec![0.0; shape.output_len()];
        engine.conv2d(&input, &kernel, &mut output).unwrap();

        let plane = shape.spatial_out();
        for f in 0..shape.out_channels() {
            let out_plane = &output[f * plane..(f + 1) * plane];
            if f == 3 {
                let in_plane = &input[5 * plane..6 * plane];
                for (o, i) in out_plane.iter().zip(in_plane.iter()) {
                    assert_eq!(*o, i * 2.5);
                }
            } else {
                assert!(out_plane.iter().all(|&v| v == 0.0));
            }
        }
    }

    #[test]
    fn repeated_calls_are_bitwise_identical() {
        let shape = ConvShape::new(1, 4, 16, 16, 8, 3, 3).unwrap();
        let mut engine = CpuConv2d::new(shape).unwrap();
        let input = ramp(shape.input_len());
        let kernel = ramp(shape.kernel_len());

        let mut first = vec![0.0; shape.output_len()];
        engine.conv2d(&input, &kernel, &mut first).unwrap();
        let mut second = vec![7.0; shape.output_len()];
        engine.conv2d(&input, &kernel, &mut second).unwrap();
        assert_eq!(first, second);
    }
}
