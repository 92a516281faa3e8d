// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Scalar reference implementations.
//!
//! These are the oracles the engine tests compare against. They favour the
//! most literal loop nest over any staging or blocking, so they stay
//! independent of the execution strategies under test. Nothing here is
//! called by the engines themselves.

use crate::shape::{ConvShape, CpShape};

/// Direct valid convolution over NCHW input and `[f][c][y][x]` kernel.
pub fn conv2d(shape: &ConvShape, input: &[f32], kernel: &[f32], output: &mut [f32]) {
    debug_assert_eq!(input.len(), shape.input_len());
    debug_assert_eq!(kernel.len(), shape.kernel_len());
    debug_assert_eq!(output.len(), shape.output_len());

    let (c, h, w) = (shape.in_channels(), shape.in_height(), shape.in_width());
    let (kh, kw) = (shape.kernel_height(), shape.kernel_width());
    let (oh, ow) = (shape.out_height(), shape.out_width());

    for n in 0..shape.batch() {
        for f in 0..shape.out_channels() {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = 0.0f32;
                    for ch in 0..c {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let input_idx = ((n * c + ch) * h + oy + ky) * w + ox + kx;
                                let kernel_idx = ((f * c + ch) * kh + ky) * kw + kx;
                                acc += input[input_idx] * kernel[kernel_idx];
                            }
                        }
                    }
                    output[((n * shape.out_channels() + f) * oh + oy) * ow + ox] = acc;
                }
            }
        }
    }
}

/// One output cell of the factorized contraction, as the literal four-index
/// sum over rank, channel, height and width.
pub fn dense_cp_cell(
    shape: &CpShape,
    activation: &[f32],
    factor0: &[f32],
    factor1: &[f32],
    factor2: &[f32],
    o: usize,
    p: usize,
    q: usize,
) -> f32 {
    let (c, h, w) = (shape.channels(), shape.height(), shape.width());
    let (oc, hp, wq) = (
        shape.reduced_channels(),
        shape.reduced_height(),
        shape.reduced_width(),
    );
    let rank = shape.rank();

    let mut acc = 0.0f32;
    for r in 0..rank {
        for ch in 0..c {
            let k0 = factor0[(ch * oc + o) * rank + r];
            for y in 0..h {
                let k1 = factor1[(y * hp + p) * rank + r];
                for x in 0..w {
                    let k2 = factor2[(x * wq + q) * rank + r];
                    acc += activation[(ch * h + y) * w + x] * k0 * k1 * k2;
                }
            }
        }
    }
    acc
}

/// Full factorized contraction via [`dense_cp_cell`].
pub fn dense_cp(
    shape: &CpShape,
    activation: &[f32],
    factor0: &[f32],
    factor1: &[f32],
    factor2: &[f32],
    output: &mut [f32],
) {
    debug_assert_eq!(activation.len(), shape.activation_len());
    debug_assert_eq!(factor0.len(), shape.factor0_len());
    debug_assert_eq!(factor1.len(), shape.factor1_len());
    debug_assert_eq!(factor2.len(), shape.factor2_len());
    debug_assert_eq!(output.len(), shape.output_len());

    let (hp, wq) = (shape.reduced_height(), shape.reduced_width());
    for o in 0..shape.reduced_channels() {
        for p in 0..hp {
            for q in 0..wq {
                output[(o * hp + p) * wq + q] =
                    dense_cp_cell(shape, activation, factor0, factor1, factor2, o, p, q);
            }
        }
    }
}

/// Materializes the implicit weight `[c][h][w][o][p][q]` from the factors.
///
/// Only tests use this; the engines never form the full tensor.
pub fn recompose_weight(
    shape: &CpShape,
    factor0: &[f32],
    factor1: &[f32],
    factor2: &[f32],
) -> Vec<f32> {
    let (c, h, w) = (shape.channels(), shape.height(), shape.width());
    let (oc, hp, wq) = (
        shape.reduced_channels(),
        shape.reduced_height(),
        shape.reduced_width(),
    );
    let rank = shape.rank();

    let mut weight = vec![0.0f32; c * h * w * oc * hp * wq];
    for ch in 0..c {
        for y in 0..h {
            for x in 0..w {
                for o in 0..oc {
                    for p in 0..hp {
                        for q in 0..wq {
                            let mut acc = 0.0f32;
                            for r in 0..rank {
                                acc += factor0[(ch * oc + o) * rank + r]
                                    * factor1[(y * hp + p) * rank + r]
                                    * factor2[(x * wq + q) * rank + r];
                            }
                            let idx = ((((ch * h + y) * w + x) * oc + o) * hp + p) * wq + q;
                            weight[idx] = acc;
                        }
                    }
                }
            }
        }
    }
    weight
}

/// Contracts the activation against an explicit weight from
/// [`recompose_weight`].
pub fn contract_with_weight(
    shape: &CpShape,
    activation: &[f32],
    weight: &[f32],
    output: &mut [f32],
) {
    debug_assert_eq!(activation.len(), shape.activation_len());
    debug_assert_eq!(output.len(), shape.output_len());
    let cells = shape.output_len();
    debug_assert_eq!(weight.len(), shape.activation_len() * cells);

    output.fill(0.0);
    for (site, &value) in activation.iter().enumerate() {
        let row = &weight[site * cells..(site + 1) * cells];
        for (cell, out) in output.iter_mut().enumerate() {
            *out += value * row[cell];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_identity_kernel_passes_input_through() {
        let shape = ConvShape::new(1, 1, 3, 3, 1, 1, 1).unwrap();
        let input = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let kernel = vec![1.0];
        let mut output = vec![0.0; shape.output_len()];
        conv2d(&shape, &input, &kernel, &mut output);
        assert_eq!(output, input);
    }

    #[test]
    fn conv_sums_over_channels() {
        let shape = ConvShape::new(1, 2, 2, 2, 1, 2, 2).unwrap();
        let input = vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0];
        let kernel = vec![1.0; 8];
        let mut output = vec![0.0; 1];
        conv2d(&shape, &input, &kernel, &mut output);
        assert_eq!(output[0], 12.0);
    }

    #[test]
    fn rank_one_contraction_separates() {
        // With all-ones factors and rank 1 every output cell is the plain
        // sum of the activation.
        let shape = CpShape::new(2, 2, 2, 1, 1, 1, 1).unwrap();
        let activation: Vec<f32> = (1..=8).map(|v| v as f32).collect();
        let f0 = vec![1.0; shape.factor0_len()];
        let f1 = vec![1.0; shape.factor1_len()];
        let f2 = vec![1.0; shape.factor2_len()];
        let mut output = vec![0.0; 1];
        dense_cp(&shape, &activation, &f0, &f1, &f2, &mut output);
        assert_eq!(output[0], 36.0);
    }

    #[test]
    fn recomposed_weight_matches_cell_sum() {
        let shape = CpShape::new(2, 3, 2, 2, 1, 2, 3).unwrap();
        let f0: Vec<f32> = (0..shape.factor0_len()).map(|v| v as f32 * 0.25).collect();
        let f1: Vec<f32> = (0..shape.factor1_len()).map(|v| v as f32 * 0.5).collect();
        let f2: Vec<f32> = (0..shape.factor2_len()).map(|v| 1.0 - v as f32 * 0.125).collect();
        let activation: Vec<f32> = (0..shape.activation_len())
            .map(|v| (v % 5) as f32 - 2.0)
            .collect();

        let weight = recompose_weight(&shape, &f0, &f1, &f2);
        let mut via_weight = vec![0.0; shape.output_len()];
        contract_with_weight(&shape, &activation, &weight, &mut via_weight);

        let mut direct = vec![0.0; shape.output_len()];
        dense_cp(&shape, &activation, &f0, &f1, &f2, &mut direct);

        for (a, b) in direct.iter().zip(via_weight.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }
}
