// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::shape::ConvShape;
use serde::{Deserialize, Serialize};

/// Execution strategies of the convolution engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConvAlgorithm {
    /// Full reduction per output cell, no workspace.
    Direct,
    /// Lower the input into a patch matrix, then run one GEMM against the
    /// kernel. The patch matrix is the engine's workspace.
    Im2colGemm,
}

/// The one-time execution plan of a convolution engine.
///
/// Selected from the problem shape at construction and never revisited; the
/// workspace length is exact, so the engine allocates exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvPlan {
    algorithm: ConvAlgorithm,
    workspace_len: usize,
}

const IM2COL_VOLUME_THRESHOLD: usize = 32 * 32 * 32;

impl ConvPlan {
    /// Picks the algorithm for the given shape.
    ///
    /// Small problems keep the direct reduction; once the GEMM volume
    /// `rows * span * out_channels` is large enough to amortize the patch
    /// lowering, the im2col route wins.
    pub fn select(shape: &ConvShape) -> Self {
        let volume = shape
            .patch_rows()
            .saturating_mul(shape.span())
            .saturating_mul(shape.out_channels());
        if volume >= IM2COL_VOLUME_THRESHOLD {
            Self {
                algorithm: ConvAlgorithm::Im2colGemm,
                workspace_len: shape.patches_len(),
            }
        } else {
            Self {
                algorithm: ConvAlgorithm::Direct,
                workspace_len: 0,
            }
        }
    }

    pub fn algorithm(&self) -> ConvAlgorithm {
        self.algorithm
    }

    /// Workspace size in `f32` elements.
    pub fn workspace_len(&self) -> usize {
        self.workspace_len
    }

    /// Workspace size in bytes.
    pub fn workspace_bytes(&self) -> usize {
        self.workspace_len * std::mem::size_of::<f32>()
    }
}
