use pica_isa::{
    BOOL_UNIFORMS, FLOAT_UNIFORMS, INT_UNIFORMS, MAX_PROGRAM_CODE_WORDS, MAX_SWIZZLE_PATTERNS,
};

use crate::f24::Float24;
use crate::state::SEMANTIC_INVALID;

/// The float uniform bank (`c0..c95`).
///
/// 16-byte alignment is load-bearing: the JIT reads these vectors with
/// aligned `movaps` loads.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
pub struct FloatUniforms(pub [[f32; 4]; FLOAT_UNIFORMS]);

/// The three uniform banks visible to a running shader.
///
/// The layout is `#[repr(C)]` because the JIT addresses the banks by fixed
/// byte offsets from a single base pointer.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Uniforms {
    pub f: FloatUniforms,
    /// Integer uniforms, one `{count, start, increment, unused}` byte
    /// quadruple per register.
    pub i: [[u8; 4]; INT_UNIFORMS],
    pub b: [bool; BOOL_UNIFORMS],
}

impl Default for Uniforms {
    fn default() -> Self {
        Self {
            f: FloatUniforms([[0.0; 4]; FLOAT_UNIFORMS]),
            i: [[0; 4]; INT_UNIFORMS],
            b: [false; BOOL_UNIFORMS],
        }
    }
}

impl Uniforms {
    /// Stores a float uniform, quantising each lane through the 24-bit
    /// representation as the hardware upload path does.
    pub fn set_float(&mut self, index: usize, value: [f32; 4]) {
        self.f.0[index] = value.map(|v| Float24::quantize(v).to_f32());
    }

    /// Stores an integer uniform as `{count, start, increment}`.
    pub fn set_int(&mut self, index: usize, count: u8, start: u8, increment: u8) {
        self.i[index] = [count, start, increment, 0];
    }

    pub fn set_bool(&mut self, index: usize, value: bool) {
        self.b[index] = value;
    }
}

/// Everything that is fixed for the duration of a draw: the program, its
/// operand-descriptor table, the uniform banks, and the input/output
/// register maps.
///
/// The caller must not mutate a `ShaderSetup` between
/// [`ShaderCore::setup`](crate::ShaderCore::setup) and the
/// [`ShaderCore::run`](crate::ShaderCore::run) calls it covers.
#[derive(Debug, Clone)]
pub struct ShaderSetup {
    pub program_code: [u32; MAX_PROGRAM_CODE_WORDS],
    pub swizzle_data: [u32; MAX_SWIZZLE_PATTERNS],
    pub uniforms: Uniforms,
    /// Offset of the first instruction executed per vertex.
    pub entry_point: u32,
    /// `input_register_map[i]` is the input register receiving the vertex's
    /// `i`-th attribute. No aliasing check is performed.
    pub input_register_map: [u8; 16],
    /// Per output register, the output-vertex field index each component
    /// maps to; [`SEMANTIC_INVALID`] leaves the field zero. Only the first
    /// seven output registers are forwarded.
    pub output_register_map: [[u8; 4]; 7],
}

impl Default for ShaderSetup {
    fn default() -> Self {
        let mut input_register_map = [0u8; 16];
        for (i, slot) in input_register_map.iter_mut().enumerate() {
            *slot = i as u8;
        }
        Self {
            program_code: [0; MAX_PROGRAM_CODE_WORDS],
            swizzle_data: [0; MAX_SWIZZLE_PATTERNS],
            uniforms: Uniforms::default(),
            entry_point: 0,
            input_register_map,
            output_register_map: [[SEMANTIC_INVALID; 4]; 7],
        }
    }
}
