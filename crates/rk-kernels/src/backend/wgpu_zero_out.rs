// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

#![cfg(feature = "wgpu")]

//! Smallest possible device engine, kept as the dispatch-path canary:
//! if this one misbehaves, the fault is in the plumbing, not in a kernel.

use crate::backend::wgpu_context::{groups_for, kernel_context, KernelContext, ShaderKind};
use rk_core::KernelResult;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use wgpu::{Buffer, ComputePipeline};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ZeroOutParams {
    len: u32,
}

pub struct WgpuZeroOut {
    ctx: Arc<KernelContext>,
    len: usize,
    params: Buffer,
    pipeline: Arc<ComputePipeline>,
}

impl WgpuZeroOut {
    pub fn new(len: usize) -> KernelResult<Self> {
        let ctx = kernel_context()?;
        let params = ctx
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("rk.kernels.zero_out.params"),
                contents: bytemuck::bytes_of(&ZeroOutParams { len: len as u32 }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        Ok(Self {
            pipeline: ctx.pipeline_for(ShaderKind::ZeroOut),
            ctx,
            len,
            params,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies element zero of `input` into `output` and zeroes the rest.
    pub fn run(&mut self, input: &Buffer, output: &Buffer) -> KernelResult<()> {
        let bind =
            self.ctx
                .narrow_bind_group("rk.kernels.zero_out.bind", input, output, &self.params);
        let mut encoder =
            self.ctx
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("rk.kernels.zero_out.encoder"),
                });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("rk.kernels.zero_out"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind, &[]);
            pass.dispatch_workgroups(groups_for(self.len, 64), 1, 1);
        }
        self.ctx.submit_checked(encoder, "zero_out")
    }
}

impl Drop for WgpuZeroOut {
    fn drop(&mut self) {
        self.params.destroy();
    }
}
