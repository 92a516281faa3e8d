// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::memory::AlignedBuf;
use rayon::prelude::*;
use rk_core::error::KernelResult;
use rk_core::shape::CpShape;
use tracing::debug;

/// Host-side factorized contraction engine.
///
/// Evaluates `O[o,p,q] = Σ_r Σ_c Σ_h Σ_w U[c,h,w]·K0[c,o,r]·K1[h,p,r]·K2[w,q,r]`
/// as three staged mode contractions per rank slice. The implicit full
/// weight tensor is never formed.
///
/// Rank slices are independent, so they are distributed across the rayon
/// pool: each rank writes its own slice of the engine's partial buffer,
/// and a second pass folds the slices per output cell in ascending rank
/// order. No two tasks ever touch the same cell, and the fixed fold order
/// makes repeated calls bitwise identical. With `RANKTORCH_DETERMINISTIC`
/// (or its `_REDUCTION` override) set, the rank loop instead runs
/// sequentially in ascending order.
pub struct CpuDenseCp {
    shape: CpShape,
    stage1: AlignedBuf,
    stage2: AlignedBuf,
    partials: AlignedBuf,
}

struct RankScratch {
    stage1: Vec<f32>,
    stage2: Vec<f32>,
}

impl RankScratch {
    fn new(shape: &CpShape) -> Self {
        Self {
            stage1: vec![0.0; shape.stage1_len()],
            stage2: vec![0.0; shape.stage2_len()],
        }
    }
}

impl CpuDenseCp {
    pub fn new(shape: CpShape) -> KernelResult<Self> {
        let stage1 = AlignedBuf::try_zeroed(shape.stage1_len())?;
        let stage2 = AlignedBuf::try_zeroed(shape.stage2_len())?;
        let partials =
            AlignedBuf::try_zeroed(shape.rank().saturating_mul(shape.output_len()))?;
        debug!(
            rank = shape.rank(),
            output = shape.output_len(),
            "constructed host contraction engine"
        );
        Ok(Self {
            shape,
            stage1,
            stage2,
            partials,
        })
    }

    pub fn shape(&self) -> &CpShape {
        &self.shape
    }

    /// Contracts the three factors against the activation.
    ///
    /// Buffer lengths must equal the shape's `activation_len`, the three
    /// `factorN_len`s and `output_len`; only debug assertions re-check
    /// this. The output is zeroed before accumulation, so stale contents
    /// never leak through.
    pub fn contract(
        &mut self,
        activation: &[f32],
        factor0: &[f32],
        factor1: &[f32],
        factor2: &[f32],
        output: &mut [f32],
    ) -> KernelResult<()> {
        let shape = self.shape;
        debug_assert_eq!(activation.len(), shape.activation_len());
        debug_assert_eq!(factor0.len(), shape.factor0_len());
        debug_assert_eq!(factor1.len(), shape.factor1_len());
        debug_assert_eq!(factor2.len(), shape.factor2_len());
        debug_assert_eq!(output.len(), shape.output_len());

        output.fill(0.0);

        if rank_config::determinism::lock_reduction_order() {
            for r in 0..shape.rank() {
                contract_channels(&shape, activation, factor0, r, self.stage1.as_mut_slice());
                contract_height(&shape, &self.stage1, factor1, r, self.stage2.as_mut_slice());
                contract_width_accumulate(&shape, &self.stage2, factor2, r, output);
            }
            return Ok(());
        }

        let out_len = shape.output_len();
        self.partials
            .as_mut_slice()
            .par_chunks_mut(out_len)
            .enumerate()
            .for_each_init(
                || RankScratch::new(&shape),
                |scratch, (r, partial)| {
                    contract_channels(&shape, activation, factor0, r, &mut scratch.stage1);
                    contract_height(&shape, &scratch.stage1, factor1, r, &mut scratch.stage2);
                    partial.fill(0.0);
                    contract_width_accumulate(&shape, &scratch.stage2, factor2, r, partial);
                },
            );

        let partials = self.partials.as_slice();
        output.par_iter_mut().enumerate().for_each(|(cell, out)| {
            let mut acc = 0.0f32;
            for r in 0..shape.rank() {
                acc += partials[r * out_len + cell];
            }
            *out = acc;
        });
        Ok(())
    }
}

/// Mode-0 contraction of one rank slice:
/// `T1[o,h,w] = Σ_c U[c,h,w] · K0[c,o,r]`.
fn contract_channels(shape: &CpShape, activation: &[f32], factor0: &[f32], r: usize, t1: &mut [f32]) {
    let (c, sites) = (shape.channels(), shape.height() * shape.width());
    let oc = shape.reduced_channels();
    let rank = shape.rank();

    t1.fill(0.0);
    for o in 0..oc {
        let plane = &mut t1[o * sites..(o + 1) * sites];
        for ch in 0..c {
            let k0 = factor0[(ch * oc + o) * rank + r];
            let image = &activation[ch * sites..(ch + 1) * sites];
            for (t, u) in plane.iter_mut().zip(image.iter()) {
                *t += u * k0;
            }
        }
    }
}

/// Mode-1 contraction of one rank slice:
/// `T2[o,p,w] = Σ_h T1[o,h,w] · K1[h,p,r]`.
fn contract_height(shape: &CpShape, t1: &[f32], factor1: &[f32], r: usize, t2: &mut [f32]) {
    let (h, w) = (shape.height(), shape.width());
    let (oc, hp) = (shape.reduced_channels(), shape.reduced_height());
    let rank = shape.rank();

    t2.fill(0.0);
    for o in 0..oc {
        let src = &t1[o * h * w..(o + 1) * h * w];
        for p in 0..hp {
            let row = &mut t2[(o * hp + p) * w..(o * hp + p + 1) * w];
            for y in 0..h {
                let k1 = factor1[(y * hp + p) * rank + r];
                let src_row = &src[y * w..(y + 1) * w];
                for (t, s) in row.iter_mut().zip(src_row.iter()) {
                    *t += s * k1;
                }
            }
        }
    }
}

/// Mode-2 contraction of one rank slice, accumulated into the caller's
/// partial: `acc[o,p,q] += Σ_w T2[o,p,w] · K2[w,q,r]`.
fn contract_width_accumulate(
    shape: &CpShape,
    t2: &[f32],
    factor2: &[f32],
    r: usize,
    acc: &mut [f32],
) {
    let w = shape.width();
    let (oc, hp, wq) = (
        shape.reduced_channels(),
        shape.reduced_height(),
        shape.reduced_width(),
    );
    let rank = shape.rank();

    for o in 0..oc {
        for p in 0..hp {
            let row = &t2[(o * hp + p) * w..(o * hp + p + 1) * w];
            let out_row = &mut acc[(o * hp + p) * wq..(o * hp + p + 1) * wq];
            for (q, out) in out_row.iter_mut().enumerate() {
                let mut sum = 0.0f32;
                for (x, t) in row.iter().enumerate() {
                    sum += t * factor2[(x * wq + q) * rank + r];
                }
                *out += sum;
            }
        }
    }
}
