// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod cpu_conv;
pub mod cpu_cp;
pub(crate) mod cpu_gemm;
pub mod zero_out;

#[cfg(feature = "wgpu")]
pub mod wgpu_context;

#[cfg(feature = "wgpu")]
pub mod wgpu_conv;

#[cfg(feature = "wgpu")]
pub mod wgpu_cp;

#[cfg(feature = "wgpu")]
pub mod wgpu_zero_out;
