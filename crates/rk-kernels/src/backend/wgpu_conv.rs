// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

#![cfg(feature = "wgpu")]

use crate::backend::wgpu_context::{groups_for, kernel_context, KernelContext, ShaderKind};
use rk_core::{ConvAlgorithm, ConvPlan, ConvShape, KernelResult};
use std::sync::Arc;
use tracing::debug;
use wgpu::util::DeviceExt;
use wgpu::{Buffer, ComputePipeline};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ConvParams {
    batch: u32,
    in_channels: u32,
    in_height: u32,
    in_width: u32,
    out_channels: u32,
    kernel_height: u32,
    kernel_width: u32,
    span: u32,
    out_height: u32,
    out_width: u32,
    spatial: u32,
    patch_rows: u32,
}

impl ConvParams {
    fn from_shape(shape: &ConvShape) -> Self {
        Self {
            batch: shape.batch() as u32,
            in_channels: shape.in_channels() as u32,
            in_height: shape.in_height() as u32,
            in_width: shape.in_width() as u32,
            out_channels: shape.out_channels() as u32,
            kernel_height: shape.kernel_height() as u32,
            kernel_width: shape.kernel_width() as u32,
            span: shape.span() as u32,
            out_height: shape.out_height() as u32,
            out_width: shape.out_width() as u32,
            spatial: shape.spatial_out() as u32,
            patch_rows: shape.patch_rows() as u32,
        }
    }
}

enum ConvStrategy {
    Direct {
        pipeline: Arc<ComputePipeline>,
    },
    Im2colGemm {
        lower: Arc<ComputePipeline>,
        multiply: Arc<ComputePipeline>,
        patches: Buffer,
    },
}

/// GPU convolution engine over NCHW f32 storage buffers.
///
/// Construction picks the lowering strategy for the fixed problem shape,
/// compiles the pipelines it needs and allocates the im2col workspace
/// once when the plan calls for one. Each [`conv2d`](Self::conv2d) call
/// then only encodes, submits and waits.
pub struct WgpuConv2d {
    ctx: Arc<KernelContext>,
    shape: ConvShape,
    plan: ConvPlan,
    params: Buffer,
    strategy: ConvStrategy,
}

impl WgpuConv2d {
    pub fn new(shape: ConvShape) -> KernelResult<Self> {
        let ctx = kernel_context()?;
        let plan = ConvPlan::select(&shape);
        let params = ctx
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("rk.kernels.conv.params"),
                contents: bytemuck::bytes_of(&ConvParams::from_shape(&shape)),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let strategy = match plan.algorithm() {
            ConvAlgorithm::Direct => ConvStrategy::Direct {
                pipeline: ctx.pipeline_for(ShaderKind::ConvDirect),
            },
            ConvAlgorithm::Im2colGemm => ConvStrategy::Im2colGemm {
                lower: ctx.pipeline_for(ShaderKind::ConvIm2col),
                multiply: ctx.pipeline_for(ShaderKind::ConvGemm),
                patches: ctx.create_workspace("rk.kernels.conv.patches", plan.workspace_len())?,
            },
        };
        debug!(
            algorithm = ?plan.algorithm(),
            workspace_bytes = plan.workspace_bytes(),
            "selected device convolution plan"
        );
        Ok(Self {
            ctx,
            shape,
            plan,
            params,
            strategy,
        })
    }

    pub fn shape(&self) -> &ConvShape {
        &self.shape
    }

    pub fn plan(&self) -> &ConvPlan {
        &self.plan
    }

    /// Runs the planned convolution. `input`, `kernel` and `output` must be
    /// storage buffers sized for the engine's shape; the call blocks until
    /// the device has finished.
    pub fn conv2d(&mut self, input: &Buffer, kernel: &Buffer, output: &Buffer) -> KernelResult<()> {
        let shape = self.shape;
        let mut encoder =
            self.ctx
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("rk.kernels.conv.encoder"),
                });
        match &self.strategy {
            ConvStrategy::Direct { pipeline } => {
                let bind = self.ctx.wide_bind_group(
                    "rk.kernels.conv_direct.bind",
                    input,
                    kernel,
                    output,
                    &self.params,
                );
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("rk.kernels.conv_direct"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind, &[]);
                pass.dispatch_workgroups(
                    groups_for(shape.out_width(), 8),
                    groups_for(shape.out_height(), 8),
                    (shape.batch() * shape.out_channels()) as u32,
                );
            }
            ConvStrategy::Im2colGemm {
                lower,
                multiply,
                patches,
            } => {
                let lower_bind = self.ctx.narrow_bind_group(
                    "rk.kernels.conv_im2col.bind",
                    input,
                    patches,
                    &self.params,
                );
                let multiply_bind = self.ctx.wide_bind_group(
                    "rk.kernels.conv_gemm.bind",
                    patches,
                    kernel,
                    output,
                    &self.params,
                );
                {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("rk.kernels.conv_im2col"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(lower);
                    pass.set_bind_group(0, &lower_bind, &[]);
                    pass.dispatch_workgroups(
                        groups_for(shape.span(), 16),
                        groups_for(shape.spatial_out(), 4),
                        shape.batch() as u32,
                    );
                }
                {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("rk.kernels.conv_gemm"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(multiply);
                    pass.set_bind_group(0, &multiply_bind, &[]);
                    pass.dispatch_workgroups(
                        groups_for(shape.spatial_out(), 16),
                        groups_for(shape.out_channels(), 16),
                        shape.batch() as u32,
                    );
                }
            }
        }
        self.ctx.submit_checked(encoder, "conv2d")
    }
}

impl Drop for WgpuConv2d {
    fn drop(&mut self) {
        if let ConvStrategy::Im2colGemm { patches, .. } = &self.strategy {
            patches.destroy();
        }
        self.params.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::ConvParams;

    #[test]
    fn params_pack_without_padding() {
        assert_eq!(std::mem::size_of::<ConvParams>(), 12 * 4);
    }
}
