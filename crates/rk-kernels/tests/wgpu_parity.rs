// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of RankTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

#![cfg(feature = "wgpu")]

use rand::Rng;
use rank_config::determinism::rng_from_label;
use rk_core::{ConvAlgorithm, ConvShape, CpShape};
use rk_kernels::backend::wgpu_context::{is_available, kernel_context};
use rk_kernels::util::{alloc_output_f32, readback_f32, upload_f32};
use rk_kernels::{zero_out, CpuConv2d, CpuDenseCp, WgpuConv2d, WgpuDenseCp, WgpuZeroOut};

fn filled(label: &str, len: usize) -> Vec<f32> {
    let mut rng = rng_from_label(label);
    (0..len).map(|_| rng.gen_range(-0.5..0.5)).collect()
}

fn assert_close(actual: &[f32], expected: &[f32], rtol: f32, atol: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let tol = atol + rtol * a.abs().max(e.abs());
        assert!(
            (a - e).abs() <= tol,
            "cell {i}: device {a} vs host {e}"
        );
    }
}

fn conv_parity(shape: ConvShape, expected_algorithm: ConvAlgorithm, label: &str) {
    let ctx = kernel_context().unwrap();
    let input = filled(&format!("{label}.input"), shape.input_len());
    let kernel = filled(&format!("{label}.kernel"), shape.kernel_len());

    let mut host = CpuConv2d::new(shape).unwrap();
    let mut host_out = vec![0.0; shape.output_len()];
    host.conv2d(&input, &kernel, &mut host_out).unwrap();

    let mut device = WgpuConv2d::new(shape).unwrap();
    assert_eq!(device.plan().algorithm(), expected_algorithm);
    assert_eq!(device.plan(), host.plan());

    let input_buf = upload_f32(ctx.device(), "parity.conv.input", &input);
    let kernel_buf = upload_f32(ctx.device(), "parity.conv.kernel", &kernel);
    let out_buf = alloc_output_f32(ctx.device(), "parity.conv.out", shape.output_len());
    device.conv2d(&input_buf, &kernel_buf, &out_buf).unwrap();
    let device_out = readback_f32(ctx.device(), ctx.queue(), &out_buf, shape.output_len()).unwrap();

    assert_close(&device_out, &host_out, 1e-4, 1e-5);
}

#[test]
fn direct_convolution_matches_host() {
    if !is_available() {
        return;
    }
    conv_parity(
        ConvShape::new(1, 2, 6, 7, 3, 3, 2).unwrap(),
        ConvAlgorithm::Direct,
        "parity.conv.direct",
    );
}

#[test]
fn lowered_convolution_matches_host() {
    if !is_available() {
        return;
    }
    conv_parity(
        ConvShape::new(2, 4, 16, 16, 8, 3, 3).unwrap(),
        ConvAlgorithm::Im2colGemm,
        "parity.conv.gemm",
    );
}

#[test]
fn contraction_matches_host_at_production_scale() {
    if !is_available() {
        return;
    }
    let ctx = kernel_context().unwrap();
    let shape = CpShape::new(16, 16, 16, 4, 4, 4, 137).unwrap();
    let activation = filled("parity.cp.activation", shape.activation_len());
    let factor0 = filled("parity.cp.factor0", shape.factor0_len());
    let factor1 = filled("parity.cp.factor1", shape.factor1_len());
    let factor2 = filled("parity.cp.factor2", shape.factor2_len());

    let mut host = CpuDenseCp::new(shape).unwrap();
    let mut host_out = vec![0.0; shape.output_len()];
    host.contract(&activation, &factor0, &factor1, &factor2, &mut host_out)
        .unwrap();

    let mut device = WgpuDenseCp::new(shape).unwrap();
    let activation_buf = upload_f32(ctx.device(), "parity.cp.activation", &activation);
    let factor0_buf = upload_f32(ctx.device(), "parity.cp.factor0", &factor0);
    let factor1_buf = upload_f32(ctx.device(), "parity.cp.factor1", &factor1);
    let factor2_buf = upload_f32(ctx.device(), "parity.cp.factor2", &factor2);
    let out_buf = alloc_output_f32(ctx.device(), "parity.cp.out", shape.output_len());
    device
        .contract(
            &activation_buf,
            &factor0_buf,
            &factor1_buf,
            &factor2_buf,
            &out_buf,
        )
        .unwrap();
    let device_out = readback_f32(ctx.device(), ctx.queue(), &out_buf, shape.output_len()).unwrap();

    assert_close(&device_out, &host_out, 2e-3, 1e-2);
}

#[test]
fn repeated_device_contractions_are_identical() {
    if !is_available() {
        return;
    }
    let ctx = kernel_context().unwrap();
    let shape = CpShape::new(5, 6, 7, 3, 2, 4, 11).unwrap();
    let activation = filled("parity.cp.repeat.activation", shape.activation_len());
    let factor0 = filled("parity.cp.repeat.factor0", shape.factor0_len());
    let factor1 = filled("parity.cp.repeat.factor1", shape.factor1_len());
    let factor2 = filled("parity.cp.repeat.factor2", shape.factor2_len());

    let mut device = WgpuDenseCp::new(shape).unwrap();
    let activation_buf = upload_f32(ctx.device(), "parity.cp.repeat.activation", &activation);
    let factor0_buf = upload_f32(ctx.device(), "parity.cp.repeat.factor0", &factor0);
    let factor1_buf = upload_f32(ctx.device(), "parity.cp.repeat.factor1", &factor1);
    let factor2_buf = upload_f32(ctx.device(), "parity.cp.repeat.factor2", &factor2);
    let out_buf = alloc_output_f32(ctx.device(), "parity.cp.repeat.out", shape.output_len());

    let mut runs = Vec::new();
    for _ in 0..2 {
        device
            .contract(
                &activation_buf,
                &factor0_buf,
                &factor1_buf,
                &factor2_buf,
                &out_buf,
            )
            .unwrap();
        runs.push(
            readback_f32(ctx.device(), ctx.queue(), &out_buf, shape.output_len()).unwrap(),
        );
    }
    assert_eq!(runs[0], runs[1]);
}

#[test]
fn zero_out_matches_host_fixture() {
    if !is_available() {
        return;
    }
    let ctx = kernel_context().unwrap();
    let input = [5.0f32, 4.0, 3.0, 2.0, 1.0];
    let mut host_out = [0.0f32; 5];
    zero_out(&input, &mut host_out);

    let mut device = WgpuZeroOut::new(input.len()).unwrap();
    let input_buf = upload_f32(ctx.device(), "parity.zero_out.input", &input);
    let out_buf = alloc_output_f32(ctx.device(), "parity.zero_out.out", input.len());
    device.run(&input_buf, &out_buf).unwrap();
    let device_out = readback_f32(ctx.device(), ctx.queue(), &out_buf, input.len()).unwrap();

    assert_eq!(device_out, host_out);
    assert_eq!(device_out, [5.0, 0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn device_engines_build_and_drop_in_a_loop() {
    if !is_available() {
        return;
    }
    let conv_shape = ConvShape::new(2, 4, 16, 16, 8, 3, 3).unwrap();
    let cp_shape = CpShape::new(8, 8, 8, 2, 2, 2, 16).unwrap();
    for _ in 0..16 {
        let conv = WgpuConv2d::new(conv_shape).unwrap();
        assert_eq!(conv.plan().algorithm(), ConvAlgorithm::Im2colGemm);
        let _cp = WgpuDenseCp::new(cp_shape).unwrap();
    }
}
