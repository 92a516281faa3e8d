// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Blocked f32 GEMM against a column-packed right-hand side.
//!
//! `rhs` is expected as `[cols][inner]` row-major, which is exactly the
//! natural layout of a `[f][c*y*x]` convolution kernel: the GEMM consumes
//! the kernel without any repacking. Callers guarantee the slice lengths;
//! the shapes they derive from were validated at engine construction.

use rayon::prelude::*;

const TM: usize = 8;
const TN: usize = 12;

#[cfg(feature = "simd")]
use wide::f32x8;

/// dst[row][col] = Σ_k lhs[row][k] * rhs[col][k], dst fully overwritten.
pub(crate) fn gemm_packed(
    dst: &mut [f32],
    lhs: &[f32],
    rhs: &[f32],
    rows: usize,
    inner: usize,
    cols: usize,
) {
    debug_assert_eq!(dst.len(), rows * cols);
    debug_assert_eq!(lhs.len(), rows * inner);
    debug_assert_eq!(rhs.len(), cols * inner);

    dst.fill(0.0);
    if rows == 0 || inner == 0 || cols == 0 {
        return;
    }

    let full_blocks = cols / TN;
    let tail = cols % TN;

    for block in 0..full_blocks {
        let col_start = block * TN;
        let rhs_block = &rhs[col_start * inner..(col_start + TN) * inner];
        compute_block(dst, lhs, rows, inner, cols, col_start, TN, rhs_block);
    }

    if tail > 0 {
        let col_start = full_blocks * TN;
        let rhs_block = &rhs[col_start * inner..(col_start + tail) * inner];
        compute_block(dst, lhs, rows, inner, cols, col_start, tail, rhs_block);
    }
}

#[allow(clippy::too_many_arguments)]
#[inline]
fn compute_block(
    dst: &mut [f32],
    lhs: &[f32],
    rows: usize,
    inner: usize,
    cols: usize,
    col_start: usize,
    width: usize,
    rhs_block: &[f32],
) {
    debug_assert_eq!(rhs_block.len(), width * inner);

    if width == TN {
        let full_row_blocks = rows / TM;
        if full_row_blocks > 0 {
            let prefix_rows = full_row_blocks * TM;
            let lhs_prefix = &lhs[..prefix_rows * inner];
            let dst_prefix = &mut dst[..prefix_rows * cols];
            dst_prefix
                .par_chunks_mut(cols * TM)
                .zip(lhs_prefix.par_chunks(TM * inner))
                .for_each(|(dst_chunk, lhs_chunk)| unsafe {
                    microkernel_8x12(
                        lhs_chunk.as_ptr(),
                        rhs_block.as_ptr(),
                        dst_chunk.as_mut_ptr().add(col_start),
                        inner,
                        inner,
                        cols,
                        inner,
                    );
                });
        }

        let processed_rows = full_row_blocks * TM;
        if processed_rows < rows {
            scalar_block(
                dst,
                lhs,
                inner,
                cols,
                processed_rows,
                rows - processed_rows,
                col_start,
                width,
                rhs_block,
            );
        }
    } else if width > 0 {
        scalar_block(dst, lhs, inner, cols, 0, rows, col_start, width, rhs_block);
    }
}

#[allow(clippy::too_many_arguments)]
#[inline]
fn scalar_block(
    dst: &mut [f32],
    lhs: &[f32],
    inner: usize,
    cols: usize,
    row_start: usize,
    height: usize,
    col_start: usize,
    width: usize,
    rhs_block: &[f32],
) {
    for local_row in 0..height {
        let global_row = row_start + local_row;
        let lhs_row = &lhs[global_row * inner..(global_row + 1) * inner];
        for local_col in 0..width {
            let rhs_col = &rhs_block[local_col * inner..(local_col + 1) * inner];
            let mut acc = 0.0f32;
            for k in 0..inner {
                acc += lhs_row[k] * rhs_col[k];
            }
            dst[global_row * cols + col_start + local_col] += acc;
        }
    }
}

#[inline(always)]
unsafe fn microkernel_8x12(
    a: *const f32,
    b: *const f32,
    c: *mut f32,
    lda: usize,
    ldb: usize,
    ldc: usize,
    k: usize,
) {
    #[cfg(feature = "simd")]
    {
        microkernel_8x12_simd(a, b, c, lda, ldb, ldc, k);
    }

    #[cfg(not(feature = "simd"))]
    {
        microkernel_8x12_scalar(a, b, c, lda, ldb, ldc, k);
    }
}

#[cfg(feature = "simd")]
#[inline(always)]
unsafe fn microkernel_8x12_simd(
    a: *const f32,
    b: *const f32,
    c: *mut f32,
    lda: usize,
    ldb: usize,
    ldc: usize,
    k: usize,
) {
    let mut acc = [f32x8::splat(0.0); TN];

    for p in 0..k {
        let mut a_values = [0.0f32; TM];
        for r in 0..TM {
            a_values[r] = *a.add(r * lda + p);
        }
        let a_vec = f32x8::from(a_values);

        for col in 0..TN {
            let b_val = *b.add(col * ldb + p);
            acc[col] = acc[col] + a_vec * f32x8::splat(b_val);
        }
    }

    for col in 0..TN {
        let values = acc[col].to_array();
        for row in 0..TM {
            *c.add(row * ldc + col) += values[row];
        }
    }
}

#[cfg(not(feature = "simd"))]
#[inline(always)]
unsafe fn microkernel_8x12_scalar(
    a: *const f32,
    b: *const f32,
    c: *mut f32,
    lda: usize,
    ldb: usize,
    ldc: usize,
    k: usize,
) {
    let mut acc = [[0.0f32; TM]; TN];

    for p in 0..k {
        let mut a_values = [0.0f32; TM];
        for r in 0..TM {
            a_values[r] = *a.add(r * lda + p);
        }

        for col in 0..TN {
            let b_val = *b.add(col * ldb + p);
            for row in 0..TM {
                acc[col][row] += a_values[row] * b_val;
            }
        }
    }

    for col in 0..TN {
        for row in 0..TM {
            *c.add(row * ldc + col) += acc[col][row];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gemm_naive(lhs: &[f32], rhs: &[f32], rows: usize, inner: usize, cols: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; rows * cols];
        for row in 0..rows {
            for col in 0..cols {
                let mut acc = 0.0f32;
                for k in 0..inner {
                    acc += lhs[row * inner + k] * rhs[col * inner + k];
                }
                out[row * cols + col] = acc;
            }
        }
        out
    }

    #[test]
    fn matches_naive_on_odd_sizes() {
        // 13 columns exercises one full TN block plus a tail column, 17 rows
        // exercises two TM row blocks plus a scalar remainder.
        let (rows, inner, cols) = (17, 5, 13);
        let lhs: Vec<f32> = (0..rows * inner).map(|v| (v % 7) as f32 - 3.0).collect();
        let rhs: Vec<f32> = (0..cols * inner).map(|v| (v % 11) as f32 * 0.5).collect();

        let mut dst = vec![1.0f32; rows * cols];
        gemm_packed(&mut dst, &lhs, &rhs, rows, inner, cols);

        let expected = gemm_naive(&lhs, &rhs, rows, inner, cols);
        for (a, b) in dst.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn overwrites_stale_destination() {
        let lhs = vec![0.0f32; 4];
        let rhs = vec![0.0f32; 4];
        let mut dst = vec![9.0f32; 4];
        gemm_packed(&mut dst, &lhs, &rhs, 2, 2, 2);
        assert_eq!(dst, vec![0.0; 4]);
    }
}
