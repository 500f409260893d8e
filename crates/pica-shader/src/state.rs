use bytemuck::{Pod, Zeroable};

use crate::f24::Float24;

/// Maximum depth of the flow-control call stack.
pub const CALL_STACK_DEPTH: usize = 16;

/// Number of scalar fields in [`OutputVertex`].
pub const OUTPUT_VERTEX_SCALARS: usize = 24;

/// Semantic-map value meaning "this component is not output"; the
/// corresponding output field stays zero so no denormals leak downstream.
pub const SEMANTIC_INVALID: u8 = 0x1F;

/// Output-vertex field indices used by the semantic map
/// (`ShaderSetup::output_register_map`).
pub mod semantic {
    pub const POSITION_X: u8 = 0;
    pub const POSITION_Y: u8 = 1;
    pub const POSITION_Z: u8 = 2;
    pub const POSITION_W: u8 = 3;
    pub const QUATERNION_X: u8 = 4;
    pub const QUATERNION_Y: u8 = 5;
    pub const QUATERNION_Z: u8 = 6;
    pub const QUATERNION_W: u8 = 7;
    pub const COLOR_R: u8 = 8;
    pub const COLOR_G: u8 = 9;
    pub const COLOR_B: u8 = 10;
    pub const COLOR_A: u8 = 11;
    pub const TEXCOORD0_U: u8 = 12;
    pub const TEXCOORD0_V: u8 = 13;
    pub const TEXCOORD1_U: u8 = 14;
    pub const TEXCOORD1_V: u8 = 15;
    pub const VIEW_X: u8 = 18;
    pub const VIEW_Y: u8 = 19;
    pub const VIEW_Z: u8 = 20;
    pub const TEXCOORD2_U: u8 = 22;
    pub const TEXCOORD2_V: u8 = 23;
}

/// One vertex's input attributes, before the attribute register map is
/// applied.
#[derive(Debug, Clone, Copy)]
pub struct InputVertex {
    pub attr: [[Float24; 4]; 16],
}

impl Default for InputVertex {
    fn default() -> Self {
        Self {
            attr: [[Float24::ZERO; 4]; 16],
        }
    }
}

/// The fixed output record produced per vertex.
///
/// The fields form a flat array of [`OUTPUT_VERTEX_SCALARS`] scalars whose
/// indices match the hardware semantic ids in [`semantic`]; the private pads
/// cover the ids no named field claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct OutputVertex {
    pub pos: [Float24; 4],
    pub quat: [Float24; 4],
    pub color: [Float24; 4],
    pub tc0: [Float24; 2],
    pub tc1: [Float24; 2],
    pad0: [Float24; 2],
    pub view: [Float24; 3],
    pad1: Float24,
    pub tc2: [Float24; 2],
}

impl OutputVertex {
    pub fn as_scalars(&self) -> &[Float24; OUTPUT_VERTEX_SCALARS] {
        bytemuck::cast_ref(self)
    }

    pub fn as_scalars_mut(&mut self) -> &mut [Float24; OUTPUT_VERTEX_SCALARS] {
        bytemuck::cast_mut(self)
    }
}

/// The shader-writable register files.
///
/// `#[repr(C)]` with 16-byte alignment because the JIT addresses individual
/// vectors as `base + file offset + index * 16` with aligned SSE loads and
/// stores.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
pub struct UnitRegisters {
    pub input: [[f32; 4]; 16],
    pub output: [[f32; 4]; 16],
    pub temporary: [[f32; 4]; 16],
}

impl Default for UnitRegisters {
    fn default() -> Self {
        Self {
            input: [[0.0; 4]; 16],
            output: [[0.0; 4]; 16],
            temporary: [[0.0; 4]; 16],
        }
    }
}

/// One flow-control record: where the current scope ends, where to resume,
/// and the loop bookkeeping (`repeat_counter` remaining iterations,
/// `loop_increment` added to the loop counter per iteration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStackElement {
    pub final_address: u32,
    pub return_address: u32,
    pub repeat_counter: u8,
    pub loop_increment: u8,
    pub loop_address: u32,
}

/// State owned by one shader unit invocation.
///
/// The 3DS has four shader units processing vertices in parallel; keeping
/// the per-invocation state in one value leaves that door open even though
/// this implementation runs them serially.
#[derive(Debug, Clone)]
pub struct UnitState {
    pub registers: UnitRegisters,
    pub program_counter: u32,
    /// Per-component results of the last `CMP`.
    pub conditional_code: [bool; 2],
    /// Two `MOVA` offsets plus the loop counter, which doubles as a third
    /// offset.
    pub address_registers: [i32; 3],
    pub call_stack: Vec<CallStackElement>,
    pub debug: DebugData,
}

/// Execution counters consumed by the shader dump.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugData {
    /// Highest program counter reached, exclusive.
    pub max_offset: u32,
    /// Highest operand-descriptor id used, exclusive.
    pub max_opdesc_id: u32,
}

impl Default for UnitState {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitState {
    pub fn new() -> Self {
        Self {
            registers: UnitRegisters::default(),
            program_counter: 0,
            conditional_code: [false; 2],
            address_registers: [0; 3],
            call_stack: Vec::with_capacity(CALL_STACK_DEPTH),
            debug: DebugData::default(),
        }
    }
}
