/// Operation encoded in the top 6 bits of an instruction word.
///
/// `CMP`, `MAD`, and `MADI` occupy several raw slots because their operand
/// fields spill into the low opcode bits; [`OpCode::from_raw`] folds the
/// ranges so the rest of the crate only ever sees the effective opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Add,
    Dp3,
    Dp4,
    Mul,
    Slt,
    Flr,
    Max,
    Min,
    Rcp,
    Rsq,
    Mova,
    Mov,
    Slti,
    Nop,
    End,
    Call,
    Callc,
    Callu,
    Ifu,
    Ifc,
    Loop,
    Jmpc,
    Jmpu,
    Cmp,
    Madi,
    Mad,
    Unknown(u8),
}

impl OpCode {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x3F {
            0x00 => Self::Add,
            0x01 => Self::Dp3,
            0x02 => Self::Dp4,
            0x08 => Self::Mul,
            0x0A => Self::Slt,
            0x0B => Self::Flr,
            0x0C => Self::Max,
            0x0D => Self::Min,
            0x0E => Self::Rcp,
            0x0F => Self::Rsq,
            0x12 => Self::Mova,
            0x13 => Self::Mov,
            0x1B => Self::Slti,
            0x21 => Self::Nop,
            0x22 => Self::End,
            0x24 => Self::Call,
            0x25 => Self::Callc,
            0x26 => Self::Callu,
            0x27 => Self::Ifu,
            0x28 => Self::Ifc,
            0x29 => Self::Loop,
            0x2C => Self::Jmpc,
            0x2D => Self::Jmpu,
            0x2E..=0x2F => Self::Cmp,
            0x30..=0x37 => Self::Madi,
            0x38..=0x3F => Self::Mad,
            other => Self::Unknown(other),
        }
    }

    /// Returns the canonical raw slot. For opcodes that span several slots
    /// this is the lowest one.
    pub fn raw(&self) -> u8 {
        match self {
            Self::Add => 0x00,
            Self::Dp3 => 0x01,
            Self::Dp4 => 0x02,
            Self::Mul => 0x08,
            Self::Slt => 0x0A,
            Self::Flr => 0x0B,
            Self::Max => 0x0C,
            Self::Min => 0x0D,
            Self::Rcp => 0x0E,
            Self::Rsq => 0x0F,
            Self::Mova => 0x12,
            Self::Mov => 0x13,
            Self::Slti => 0x1B,
            Self::Nop => 0x21,
            Self::End => 0x22,
            Self::Call => 0x24,
            Self::Callc => 0x25,
            Self::Callu => 0x26,
            Self::Ifu => 0x27,
            Self::Ifc => 0x28,
            Self::Loop => 0x29,
            Self::Jmpc => 0x2C,
            Self::Jmpu => 0x2D,
            Self::Cmp => 0x2E,
            Self::Madi => 0x30,
            Self::Mad => 0x38,
            Self::Unknown(raw) => *raw,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Dp3 => "dp3",
            Self::Dp4 => "dp4",
            Self::Mul => "mul",
            Self::Slt => "slt",
            Self::Flr => "flr",
            Self::Max => "max",
            Self::Min => "min",
            Self::Rcp => "rcp",
            Self::Rsq => "rsq",
            Self::Mova => "mova",
            Self::Mov => "mov",
            Self::Slti => "slti",
            Self::Nop => "nop",
            Self::End => "end",
            Self::Call => "call",
            Self::Callc => "callc",
            Self::Callu => "callu",
            Self::Ifu => "ifu",
            Self::Ifc => "ifc",
            Self::Loop => "loop",
            Self::Jmpc => "jmpc",
            Self::Jmpu => "jmpu",
            Self::Cmp => "cmp",
            Self::Madi => "madi",
            Self::Mad => "mad",
            Self::Unknown(_) => "unknown",
        }
    }

    pub fn form(&self) -> OpForm {
        match self {
            Self::Add
            | Self::Dp3
            | Self::Dp4
            | Self::Mul
            | Self::Slt
            | Self::Flr
            | Self::Max
            | Self::Min
            | Self::Rcp
            | Self::Rsq
            | Self::Mova
            | Self::Mov
            | Self::Cmp => OpForm::Common,
            Self::Slti => OpForm::CommonInverted,
            Self::Mad => OpForm::Mad,
            Self::Madi => OpForm::MadInverted,
            Self::Call
            | Self::Callc
            | Self::Callu
            | Self::Ifu
            | Self::Ifc
            | Self::Loop
            | Self::Jmpc
            | Self::Jmpu => OpForm::Flow,
            Self::Nop => OpForm::Nop,
            Self::End => OpForm::End,
            Self::Unknown(_) => OpForm::Unknown,
        }
    }
}

/// Instruction word form, governing which field view applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpForm {
    /// Arithmetic, register-form sources: 7-bit src1 (offsettable), 5-bit src2.
    Common,
    /// Arithmetic with inverted sources: 5-bit src1, 7-bit src2 (offsettable).
    CommonInverted,
    /// Multiply-add, register-form src2 and src3.
    Mad,
    /// Multiply-add with an immediate-form (7-bit) src3 and 5-bit src2.
    MadInverted,
    /// Structured control flow.
    Flow,
    Nop,
    End,
    Unknown,
}
