//! Shared helpers for assembling small vertex programs in tests.

// Each integration test binary compiles its own copy; not every helper is
// used by every binary.
#![allow(dead_code)]

use pica_isa::encode;
use pica_shader::{Float24, InputVertex, ShaderSetup};

/// Builds a setup whose program and swizzle table start with the given
/// words; everything else stays at its default.
pub fn setup_from(code: &[u32], swizzles: &[u32]) -> ShaderSetup {
    let mut setup = ShaderSetup::default();
    setup.program_code[..code.len()].copy_from_slice(code);
    setup.swizzle_data[..swizzles.len()].copy_from_slice(swizzles);
    setup
}

/// Identity swizzle table: descriptor 0 is full-mask/no-swizzle, and the
/// per-component masks live at 1..=4 (X at 1, W at 4).
pub fn identity_and_component_swizzles() -> Vec<u32> {
    let mut swizzles = vec![encode::swizzle_identity()];
    for component in 0..4 {
        swizzles.push(encode::swizzle(
            8 >> component,
            [pica_isa::IDENTITY_SELECTOR; 3],
            [false; 3],
        ));
    }
    swizzles
}

pub fn input_with(attrs: &[[f32; 4]]) -> InputVertex {
    let mut input = InputVertex::default();
    for (slot, attr) in input.attr.iter_mut().zip(attrs.iter()) {
        *slot = attr.map(Float24::from_f32);
    }
    input
}

/// Maps output register `reg`'s four components to four consecutive
/// output-vertex fields starting at `base`.
pub fn map_output(setup: &mut ShaderSetup, reg: usize, base: u8) {
    setup.output_register_map[reg] = [base, base + 1, base + 2, base + 3];
}

pub fn f24s(values: [f32; 4]) -> [Float24; 4] {
    values.map(Float24::from_f32)
}
