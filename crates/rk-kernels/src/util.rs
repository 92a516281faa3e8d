// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

#![cfg(feature = "wgpu")]

//! Host/device transfer helpers for the wgpu engines.
//!
//! Callers own their input and output buffers; these helpers cover the
//! common cases of uploading f32 data, sizing an output buffer and reading
//! results back synchronously.

use rk_core::error::{launch, KernelResult};
use wgpu::util::DeviceExt;
use wgpu::{Buffer, BufferUsages, Device, Maintain, MapMode, Queue};

/// Uploads an f32 slice into a storage buffer.
pub fn upload_f32(device: &Device, label: &str, data: &[f32]) -> Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(data),
        usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
    })
}

/// Allocates an uninitialised storage buffer sized for `len` f32 elements,
/// readable back through [`readback_f32`].
pub fn alloc_output_f32(device: &Device, label: &str, len: usize) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: (len * std::mem::size_of::<f32>()) as u64,
        usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

/// Copies `len` f32 elements out of `src`, blocking until the device has
/// finished all submitted work.
pub fn readback_f32(
    device: &Device,
    queue: &Queue,
    src: &Buffer,
    len: usize,
) -> KernelResult<Vec<f32>> {
    let size_bytes = (len * std::mem::size_of::<f32>()) as u64;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("rk.kernels.readback"),
        size: size_bytes,
        usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("rk.kernels.readback.encoder"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size_bytes);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(Maintain::Wait);
    match receiver.recv() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(launch("readback", err.to_string())),
        Err(_) => return Err(launch("readback", "map callback dropped")),
    }

    let data = slice.get_mapped_range();
    let mut out = vec![0.0f32; len];
    out.copy_from_slice(bytemuck::cast_slice(&data));
    drop(data);
    staging.unmap();
    Ok(out)
}
