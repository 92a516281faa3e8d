// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Bring-up kernel: copy element zero, zero the rest.
//!
//! Deliberately trivial. It exists so the dispatch plumbing of a backend
//! can be validated before the real engines are trusted on it.

/// `output[0] = input[0]`, every other element 0.
pub fn zero_out(input: &[f32], output: &mut [f32]) {
    debug_assert_eq!(input.len(), output.len());
    output.fill(0.0);
    if let (Some(first_out), Some(first_in)) = (output.first_mut(), input.first()) {
        *first_out = *first_in;
    }
}
