// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rk_core::error::{KernelError, KernelResult};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

const ALIGNMENT: usize = 16;

/// Fixed-size, 16-byte aligned workspace buffer.
///
/// Engines allocate one of these per instance at construction and reuse it
/// for every call; there is no grow path. Allocation failure is reported,
/// not aborted on, so a failed construction leaves no half-built engine.
#[derive(Debug)]
pub struct AlignedBuf {
    ptr: NonNull<f32>,
    len: usize,
}

// The buffer is the sole owner of its allocation, so moving it between
// threads or sharing immutable references is sound.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    /// Allocates `len` zeroed elements.
    pub fn try_zeroed(len: usize) -> KernelResult<Self> {
        if len == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len: 0,
            });
        }
        let bytes = len
            .checked_mul(mem::size_of::<f32>())
            .ok_or(KernelError::WorkspaceAllocation { bytes: usize::MAX })?;
        let layout = Layout::from_size_align(bytes, ALIGNMENT)
            .map_err(|_| KernelError::WorkspaceAllocation { bytes })?;
        let raw = unsafe { alloc_zeroed(layout) };
        match NonNull::new(raw as *mut f32) {
            Some(ptr) => Ok(Self { ptr, len }),
            None => Err(KernelError::WorkspaceAllocation { bytes }),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        if self.len != 0 {
            // The layout was validated when the allocation succeeded.
            let layout = unsafe {
                Layout::from_size_align_unchecked(self.len * mem::size_of::<f32>(), ALIGNMENT)
            };
            unsafe {
                dealloc(self.ptr.as_ptr() as *mut u8, layout);
            }
        }
    }
}

impl Deref for AlignedBuf {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}
