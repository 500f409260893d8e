use thiserror::Error;

/// Errors surfaced while lowering a shader program to host code.
///
/// These are compatibility or resource failures, not data faults: a program
/// that trips one would have been mis-executed or crashed on, so `setup`
/// reports it instead of installing a broken entrypoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("backwards {op} to {target:#05x} at offset {offset:#05x} is not supported")]
    BackwardsBranch {
        op: &'static str,
        target: u32,
        offset: u32,
    },

    #[error("nested loop at offset {offset:#05x} is not supported")]
    NestedLoop { offset: u32 },

    #[error("recursive call to {target:#05x} at offset {offset:#05x} is not supported")]
    RecursionLimit { target: u32, offset: u32 },

    #[error("executable code region exhausted ({needed} bytes needed, {available} available)")]
    OutOfCodeMemory { needed: usize, available: usize },

    #[error("mapping {size} bytes of executable memory failed")]
    ExecMapFailed { size: usize },
}
