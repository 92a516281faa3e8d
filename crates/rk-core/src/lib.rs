// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Shared foundation of the RankTorch engines: problem shapes validated at
//! construction, one-time execution-plan selection, the error taxonomy, and
//! scalar reference implementations used as test oracles.

pub mod error;
pub mod plan;
pub mod reference;
pub mod shape;

pub use error::{KernelError, KernelResult};
pub use plan::{ConvAlgorithm, ConvPlan};
pub use shape::{ConvShape, CpShape};
