// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use thiserror::Error;

pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// Failure taxonomy of the engines.
///
/// The first four variants can only occur while constructing an engine;
/// a constructed engine holds its plan and workspace for its whole lifetime
/// and its calls can only fail with [`KernelError::Launch`]. No variant is
/// retried anywhere.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    #[error("no suitable GPU adapter")]
    NoAdapter,
    #[error("device request failed: {0}")]
    DeviceRequest(String),
    #[error("workspace allocation of {bytes} bytes failed")]
    WorkspaceAllocation { bytes: usize },
    #[error("kernel launch failed in {stage}: {message}")]
    Launch {
        stage: &'static str,
        message: String,
    },
}

pub fn invalid_shape(message: impl Into<String>) -> KernelError {
    KernelError::InvalidShape(message.into())
}

pub fn launch(stage: &'static str, message: impl Into<String>) -> KernelError {
    KernelError::Launch {
        stage,
        message: message.into(),
    }
}
