//! PICA200 vertex shader instruction set.
//!
//! This crate decodes the 32-bit instruction words and operand-descriptor
//! (swizzle) words of the PICA200 programmable vertex pipeline into typed
//! views. Decoding is total: unassigned opcode slots decode to
//! [`OpCode::Unknown`] and field accessors clip to their native bit widths,
//! so no input can fail to decode.
//!
//! The execution back-ends (interpreter and JIT) live in `pica-shader`; this
//! crate deliberately has no execution state so it can be reused by
//! disassemblers and tooling.

pub mod encode;
mod instruction;
mod opcode;
mod registers;
mod swizzle;

pub use instruction::{
    CommonView, CompareOp, FlowCondition, FlowView, Instruction, MadView,
};
pub use opcode::{OpCode, OpForm};
pub use registers::{DestRegister, DestRegisterFile, SourceRegister, SourceRegisterFile};
pub use swizzle::{SwizzlePattern, IDENTITY_SELECTOR};

/// Maximum number of 32-bit words in the shader program memory.
pub const MAX_PROGRAM_CODE_WORDS: usize = 1024;

/// Number of entries in the operand-descriptor (swizzle pattern) table.
pub const MAX_SWIZZLE_PATTERNS: usize = 128;

/// Size of the float uniform bank (`c0..c95`).
pub const FLOAT_UNIFORMS: usize = 96;

/// Size of the integer uniform bank (`i0..i3`).
pub const INT_UNIFORMS: usize = 4;

/// Size of the boolean uniform bank (`b0..b15`).
pub const BOOL_UNIFORMS: usize = 16;
