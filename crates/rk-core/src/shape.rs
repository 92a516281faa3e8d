// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{invalid_shape, KernelResult};
use serde::{Deserialize, Serialize};

fn validate_positive(value: usize, label: &str) -> KernelResult<()> {
    if value == 0 {
        return Err(invalid_shape(format!("{label} must be positive")));
    }
    Ok(())
}

/// Geometry of one direct-convolution problem.
///
/// Activations and outputs are row-major NCHW, the kernel is `[f][c][y][x]`.
/// Every size is validated once here; the engines trust the shape afterwards
/// and never re-derive geometry per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvShape {
    batch: usize,
    in_channels: usize,
    in_height: usize,
    in_width: usize,
    out_channels: usize,
    kernel_height: usize,
    kernel_width: usize,
}

impl ConvShape {
    pub fn new(
        batch: usize,
        in_channels: usize,
        in_height: usize,
        in_width: usize,
        out_channels: usize,
        kernel_height: usize,
        kernel_width: usize,
    ) -> KernelResult<Self> {
        validate_positive(batch, "batch")?;
        validate_positive(in_channels, "in_channels")?;
        validate_positive(in_height, "in_height")?;
        validate_positive(in_width, "in_width")?;
        validate_positive(out_channels, "out_channels")?;
        validate_positive(kernel_height, "kernel_height")?;
        validate_positive(kernel_width, "kernel_width")?;
        if kernel_height > in_height || kernel_width > in_width {
            return Err(invalid_shape(format!(
                "kernel {kernel_height}x{kernel_width} exceeds input {in_height}x{in_width}"
            )));
        }
        Ok(Self {
            batch,
            in_channels,
            in_height,
            in_width,
            out_channels,
            kernel_height,
            kernel_width,
        })
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn in_height(&self) -> usize {
        self.in_height
    }

    pub fn in_width(&self) -> usize {
        self.in_width
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_height(&self) -> usize {
        self.kernel_height
    }

    pub fn kernel_width(&self) -> usize {
        self.kernel_width
    }

    /// Valid-convolution output height.
    pub fn out_height(&self) -> usize {
        self.in_height - self.kernel_height + 1
    }

    /// Valid-convolution output width.
    pub fn out_width(&self) -> usize {
        self.in_width - self.kernel_width + 1
    }

    /// Elements of one im2col patch row: `c * y * x`.
    pub fn span(&self) -> usize {
        self.in_channels * self.kernel_height * self.kernel_width
    }

    /// Output cells per image: `oh * ow`.
    pub fn spatial_out(&self) -> usize {
        self.out_height() * self.out_width()
    }

    /// Rows of the im2col patch matrix: `n * oh * ow`.
    pub fn patch_rows(&self) -> usize {
        self.batch * self.spatial_out()
    }

    pub fn input_len(&self) -> usize {
        self.batch * self.in_channels * self.in_height * self.in_width
    }

    pub fn kernel_len(&self) -> usize {
        self.out_channels * self.span()
    }

    pub fn output_len(&self) -> usize {
        self.batch * self.out_channels * self.spatial_out()
    }

    pub fn patches_len(&self) -> usize {
        self.patch_rows() * self.span()
    }
}

/// Geometry of one factorized contraction.
///
/// The activation is `[c][h][w]`, the factors are row-major
/// `[c][o][r]`, `[h][p][r]` and `[w][q][r]`, and the output is `[o][p][q]`.
/// Each spatial axis carries a `(full, reduced)` pair; the rank is shared by
/// all three factors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpShape {
    channels: usize,
    height: usize,
    width: usize,
    reduced_channels: usize,
    reduced_height: usize,
    reduced_width: usize,
    rank: usize,
}

impl CpShape {
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        reduced_channels: usize,
        reduced_height: usize,
        reduced_width: usize,
        rank: usize,
    ) -> KernelResult<Self> {
        validate_positive(channels, "channels")?;
        validate_positive(height, "height")?;
        validate_positive(width, "width")?;
        validate_positive(reduced_channels, "reduced_channels")?;
        validate_positive(reduced_height, "reduced_height")?;
        validate_positive(reduced_width, "reduced_width")?;
        validate_positive(rank, "rank")?;
        Ok(Self {
            channels,
            height,
            width,
            reduced_channels,
            reduced_height,
            reduced_width,
            rank,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn reduced_channels(&self) -> usize {
        self.reduced_channels
    }

    pub fn reduced_height(&self) -> usize {
        self.reduced_height
    }

    pub fn reduced_width(&self) -> usize {
        self.reduced_width
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn activation_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn factor0_len(&self) -> usize {
        self.channels * self.reduced_channels * self.rank
    }

    pub fn factor1_len(&self) -> usize {
        self.height * self.reduced_height * self.rank
    }

    pub fn factor2_len(&self) -> usize {
        self.width * self.reduced_width * self.rank
    }

    pub fn output_len(&self) -> usize {
        self.reduced_channels * self.reduced_height * self.reduced_width
    }

    /// Elements of the first staged intermediate for one rank slice:
    /// `o * h * w` after the channel contraction.
    pub fn stage1_len(&self) -> usize {
        self.reduced_channels * self.height * self.width
    }

    /// Elements of the second staged intermediate for one rank slice:
    /// `o * p * w` after the height contraction.
    pub fn stage2_len(&self) -> usize {
        self.reduced_channels * self.reduced_height * self.width
    }
}
