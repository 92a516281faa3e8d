// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

#![cfg(feature = "wgpu")]

//! Process-wide wgpu device context shared by the GPU engines.
//!
//! Adapter, device and queue are acquired once and cached; compute
//! pipelines are compiled lazily per shader and cached too, since the
//! problem shapes travel in uniform buffers rather than in the shader
//! text. Engine-owned state (workspaces, uniforms) stays per instance.

use rk_core::error::{launch, KernelError, KernelResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use wgpu::{
    BindGroup, BindGroupLayout, Buffer, BufferUsages, CommandEncoder, ComputePipeline, Device,
    PipelineLayout, Queue,
};

const CONV_DIRECT_WGSL: &str = include_str!("../shaders/conv_direct.wgsl");
const CONV_IM2COL_WGSL: &str = include_str!("../shaders/conv_im2col.wgsl");
const CONV_GEMM_WGSL: &str = include_str!("../shaders/conv_gemm.wgsl");
const CP_MODE0_WGSL: &str = include_str!("../shaders/cp_mode0.wgsl");
const CP_MODE1_WGSL: &str = include_str!("../shaders/cp_mode1.wgsl");
const CP_MODE2_WGSL: &str = include_str!("../shaders/cp_mode2.wgsl");
const CP_RANK_REDUCE_WGSL: &str = include_str!("../shaders/cp_rank_reduce.wgsl");
const ZERO_OUT_WGSL: &str = include_str!("../shaders/zero_out.wgsl");

/// Compute shaders known to the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ShaderKind {
    ConvDirect,
    ConvIm2col,
    ConvGemm,
    CpMode0,
    CpMode1,
    CpMode2,
    CpRankReduce,
    ZeroOut,
}

impl ShaderKind {
    fn source(self) -> &'static str {
        match self {
            ShaderKind::ConvDirect => CONV_DIRECT_WGSL,
            ShaderKind::ConvIm2col => CONV_IM2COL_WGSL,
            ShaderKind::ConvGemm => CONV_GEMM_WGSL,
            ShaderKind::CpMode0 => CP_MODE0_WGSL,
            ShaderKind::CpMode1 => CP_MODE1_WGSL,
            ShaderKind::CpMode2 => CP_MODE2_WGSL,
            ShaderKind::CpRankReduce => CP_RANK_REDUCE_WGSL,
            ShaderKind::ZeroOut => ZERO_OUT_WGSL,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ShaderKind::ConvDirect => "rk.kernels.conv_direct",
            ShaderKind::ConvIm2col => "rk.kernels.conv_im2col",
            ShaderKind::ConvGemm => "rk.kernels.conv_gemm",
            ShaderKind::CpMode0 => "rk.kernels.cp_mode0",
            ShaderKind::CpMode1 => "rk.kernels.cp_mode1",
            ShaderKind::CpMode2 => "rk.kernels.cp_mode2",
            ShaderKind::CpRankReduce => "rk.kernels.cp_rank_reduce",
            ShaderKind::ZeroOut => "rk.kernels.zero_out",
        }
    }

    /// Whether the shader binds two read-only storage buffers or one.
    fn wide_bindings(self) -> bool {
        !matches!(self, ShaderKind::ConvIm2col | ShaderKind::CpRankReduce | ShaderKind::ZeroOut)
    }
}

/// Shared device handle. Callers that stage their own storage buffers get
/// the device and queue from here; everything else on it is engine plumbing.
pub struct KernelContext {
    device: Arc<Device>,
    queue: Arc<Queue>,
    narrow_layout: BindGroupLayout,
    narrow_pipeline_layout: PipelineLayout,
    wide_layout: BindGroupLayout,
    wide_pipeline_layout: PipelineLayout,
    pipelines: Mutex<HashMap<ShaderKind, Arc<ComputePipeline>>>,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl KernelContext {
    fn new() -> KernelResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(async {
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
        })
        .ok_or(KernelError::NoAdapter)?;

        let (device, queue) = pollster::block_on(async {
            adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("rk.kernels.device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: adapter.limits(),
                    },
                    None,
                )
                .await
        })
        .map_err(|err| KernelError::DeviceRequest(err.to_string()))?;

        let device: Arc<Device> = Arc::new(device);
        let queue: Arc<Queue> = Arc::new(queue);

        let narrow_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rk.kernels.narrow_layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                uniform_entry(2),
            ],
        });
        let narrow_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("rk.kernels.narrow_pipeline_layout"),
                bind_group_layouts: &[&narrow_layout],
                push_constant_ranges: &[],
            });

        let wide_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rk.kernels.wide_layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                uniform_entry(3),
            ],
        });
        let wide_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("rk.kernels.wide_pipeline_layout"),
            bind_group_layouts: &[&wide_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            device,
            queue,
            narrow_layout,
            narrow_pipeline_layout,
            wide_layout,
            wide_pipeline_layout,
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    pub fn device(&self) -> &Device {
        self.device.as_ref()
    }

    pub fn queue(&self) -> &Queue {
        self.queue.as_ref()
    }

    pub(crate) fn pipeline_for(&self, kind: ShaderKind) -> Arc<ComputePipeline> {
        let mut pipelines = self.pipelines.lock().unwrap();
        if let Some(pipeline) = pipelines.get(&kind) {
            return pipeline.clone();
        }

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kind.label()),
                source: wgpu::ShaderSource::Wgsl(kind.source().into()),
            });
        let layout = if kind.wide_bindings() {
            &self.wide_pipeline_layout
        } else {
            &self.narrow_pipeline_layout
        };
        let pipeline = Arc::new(self.device.create_compute_pipeline(
            &wgpu::ComputePipelineDescriptor {
                label: Some(kind.label()),
                layout: Some(layout),
                module: &shader,
                entry_point: "main",
            },
        ));
        pipelines.insert(kind, pipeline.clone());
        pipeline
    }

    pub(crate) fn narrow_bind_group(
        &self,
        label: &str,
        src: &Buffer,
        dst: &Buffer,
        params: &Buffer,
    ) -> BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.narrow_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: src.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: dst.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }

    pub(crate) fn wide_bind_group(
        &self,
        label: &str,
        a: &Buffer,
        b: &Buffer,
        dst: &Buffer,
        params: &Buffer,
    ) -> BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.wide_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: a.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: b.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: dst.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    }

    /// Creates an engine-owned workspace buffer, reporting out-of-memory as
    /// a construction error instead of surfacing it later as a device loss.
    pub(crate) fn create_workspace(&self, label: &str, len: usize) -> KernelResult<Buffer> {
        let bytes = len * std::mem::size_of::<f32>();
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes as u64,
            usage: BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        if pollster::block_on(self.device.pop_error_scope()).is_some() {
            return Err(KernelError::WorkspaceAllocation { bytes });
        }
        Ok(buffer)
    }

    /// Submits the encoded passes and waits for the device, reporting any
    /// validation fault as a launch error for the named stage.
    pub(crate) fn submit_checked(
        &self,
        encoder: CommandEncoder,
        stage: &'static str,
    ) -> KernelResult<()> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.submit(Some(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(launch(stage, err.to_string()));
        }
        Ok(())
    }
}

/// Workgroup count covering `len` items at `per_group` items per group.
pub(crate) fn groups_for(len: usize, per_group: usize) -> u32 {
    ((len + per_group - 1) / per_group) as u32
}

static CONTEXT: OnceLock<Arc<KernelContext>> = OnceLock::new();

pub fn kernel_context() -> KernelResult<Arc<KernelContext>> {
    if let Some(ctx) = CONTEXT.get() {
        return Ok(ctx.clone());
    }
    let ctx = Arc::new(KernelContext::new()?);
    let _ = CONTEXT.set(ctx.clone());
    Ok(ctx)
}

/// Whether a usable GPU device could be acquired in this process.
pub fn is_available() -> bool {
    kernel_context().is_ok()
}
