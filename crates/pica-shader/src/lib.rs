//! PICA200 vertex shader execution core.
//!
//! The crate API is centered around [`ShaderCore`], which owns the two
//! execution back-ends and the compiled-shader cache:
//! - the interpreter ([`interp`]), the portable reference back-end
//! - the x86-64 JIT ([`jit`]), which lowers a program to SSE code once and
//!   reuses it for every vertex of every draw that shares the program
//!
//! A caller drives one vertex batch as `setup` (once per program change)
//! followed by `run` per vertex; `shutdown` drops all compiled code. Program
//! code, swizzle table, and uniforms live in [`ShaderSetup`] and must not
//! change between `setup` and the runs it covers.

mod core;
mod error;
mod f24;
pub mod interp;
mod setup;
mod state;

#[cfg(all(target_arch = "x86_64", any(unix, windows)))]
pub mod jit;

pub use crate::core::{JitAccuracy, JitConfig, ShaderConfig, ShaderCore};
pub use error::CompileError;
pub use f24::Float24;
pub use setup::{FloatUniforms, ShaderSetup, Uniforms};
pub use state::{
    semantic, CallStackElement, DebugData, InputVertex, OutputVertex, UnitRegisters, UnitState,
    CALL_STACK_DEPTH, OUTPUT_VERTEX_SCALARS, SEMANTIC_INVALID,
};
