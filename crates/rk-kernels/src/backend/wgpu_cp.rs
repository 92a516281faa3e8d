// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

#![cfg(feature = "wgpu")]

use crate::backend::wgpu_context::{groups_for, kernel_context, KernelContext, ShaderKind};
use rk_core::{CpShape, KernelResult};
use std::sync::Arc;
use tracing::debug;
use wgpu::util::DeviceExt;
use wgpu::{Buffer, ComputePipeline};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct CpParams {
    channels: u32,
    height: u32,
    width: u32,
    reduced_channels: u32,
    reduced_height: u32,
    reduced_width: u32,
    rank: u32,
    pad0: u32,
}

impl CpParams {
    fn from_shape(shape: &CpShape) -> Self {
        Self {
            channels: shape.channels() as u32,
            height: shape.height() as u32,
            width: shape.width() as u32,
            reduced_channels: shape.reduced_channels() as u32,
            reduced_height: shape.reduced_height() as u32,
            reduced_width: shape.reduced_width() as u32,
            rank: shape.rank() as u32,
            pad0: 0,
        }
    }
}

/// GPU engine for the rank-separable dense contraction.
///
/// The implicit six-way weight is never formed. Every rank runs the
/// three mode contractions into its own slice of the staged workspaces,
/// and a final pass folds the per-rank partials into the output, so no
/// two invocations ever write the same cell. All workspaces are sized
/// and allocated at construction for the engine's fixed shape.
pub struct WgpuDenseCp {
    ctx: Arc<KernelContext>,
    shape: CpShape,
    params: Buffer,
    mode0: Arc<ComputePipeline>,
    mode1: Arc<ComputePipeline>,
    mode2: Arc<ComputePipeline>,
    reduce: Arc<ComputePipeline>,
    stage1: Buffer,
    stage2: Buffer,
    partials: Buffer,
}

impl WgpuDenseCp {
    pub fn new(shape: CpShape) -> KernelResult<Self> {
        let ctx = kernel_context()?;
        let params = ctx
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("rk.kernels.cp.params"),
                contents: bytemuck::bytes_of(&CpParams::from_shape(&shape)),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let stage1 =
            ctx.create_workspace("rk.kernels.cp.stage1", shape.rank() * shape.stage1_len())?;
        let stage2 =
            ctx.create_workspace("rk.kernels.cp.stage2", shape.rank() * shape.stage2_len())?;
        let partials =
            ctx.create_workspace("rk.kernels.cp.partials", shape.rank() * shape.output_len())?;
        debug!(
            rank = shape.rank(),
            output = shape.output_len(),
            "constructed device contraction engine"
        );
        Ok(Self {
            mode0: ctx.pipeline_for(ShaderKind::CpMode0),
            mode1: ctx.pipeline_for(ShaderKind::CpMode1),
            mode2: ctx.pipeline_for(ShaderKind::CpMode2),
            reduce: ctx.pipeline_for(ShaderKind::CpRankReduce),
            ctx,
            shape,
            params,
            stage1,
            stage2,
            partials,
        })
    }

    pub fn shape(&self) -> &CpShape {
        &self.shape
    }

    /// Contracts the activation against the three factors. All four input
    /// buffers and the output must be storage buffers sized for the
    /// engine's shape; the call blocks until the device has finished. The
    /// final pass overwrites every output cell, so stale contents never
    /// leak through.
    pub fn contract(
        &mut self,
        activation: &Buffer,
        factor0: &Buffer,
        factor1: &Buffer,
        factor2: &Buffer,
        output: &Buffer,
    ) -> KernelResult<()> {
        let rank = self.shape.rank() as u32;
        let mut encoder =
            self.ctx
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("rk.kernels.cp.encoder"),
                });

        let mode0_bind = self.ctx.wide_bind_group(
            "rk.kernels.cp_mode0.bind",
            activation,
            factor0,
            &self.stage1,
            &self.params,
        );
        let mode1_bind = self.ctx.wide_bind_group(
            "rk.kernels.cp_mode1.bind",
            &self.stage1,
            factor1,
            &self.stage2,
            &self.params,
        );
        let mode2_bind = self.ctx.wide_bind_group(
            "rk.kernels.cp_mode2.bind",
            &self.stage2,
            factor2,
            &self.partials,
            &self.params,
        );
        let reduce_bind = self.ctx.narrow_bind_group(
            "rk.kernels.cp_rank_reduce.bind",
            &self.partials,
            output,
            &self.params,
        );

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("rk.kernels.cp_mode0"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.mode0);
            pass.set_bind_group(0, &mode0_bind, &[]);
            pass.dispatch_workgroups(groups_for(self.shape.stage1_len(), 64), rank, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("rk.kernels.cp_mode1"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.mode1);
            pass.set_bind_group(0, &mode1_bind, &[]);
            pass.dispatch_workgroups(groups_for(self.shape.stage2_len(), 64), rank, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("rk.kernels.cp_mode2"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.mode2);
            pass.set_bind_group(0, &mode2_bind, &[]);
            pass.dispatch_workgroups(groups_for(self.shape.output_len(), 64), rank, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("rk.kernels.cp_rank_reduce"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.reduce);
            pass.set_bind_group(0, &reduce_bind, &[]);
            pass.dispatch_workgroups(groups_for(self.shape.output_len(), 64), 1, 1);
        }

        self.ctx.submit_checked(encoder, "contract")
    }
}

impl Drop for WgpuDenseCp {
    fn drop(&mut self) {
        self.stage1.destroy();
        self.stage2.destroy();
        self.partials.destroy();
        self.params.destroy();
    }
}
