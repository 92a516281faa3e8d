// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Inference engines for low-rank factorized layers.
//!
//! Two engine families live here. The direct convolution engines run a
//! classical 2-D valid convolution from a full `[f][c][y][x]` kernel; the
//! factorized contraction engines evaluate a three-factor decomposition
//! against a fixed-shape activation without ever materializing the implicit
//! full weight tensor.
//!
//! Every engine is constructed from a validated shape, selects its execution
//! plan once, allocates its workspace exactly once, and releases everything
//! on drop. Calls take `&mut self`: one instance never runs two overlapping
//! computations, and concurrency means separate instances.
//!
//! CPU engines are always present. The `wgpu` feature adds GPU engines that
//! share a process-wide device context; callers probe
//! [`backend::wgpu_context::is_available`] before relying on them.

pub mod backend;
pub mod memory;
pub mod util;

pub use backend::cpu_conv::CpuConv2d;
pub use backend::cpu_cp::CpuDenseCp;
pub use backend::zero_out::zero_out;

#[cfg(feature = "wgpu")]
pub use backend::wgpu_conv::WgpuConv2d;
#[cfg(feature = "wgpu")]
pub use backend::wgpu_cp::WgpuDenseCp;
#[cfg(feature = "wgpu")]
pub use backend::wgpu_zero_out::WgpuZeroOut;
