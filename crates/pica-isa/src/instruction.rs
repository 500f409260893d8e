use crate::opcode::OpCode;
use crate::registers::{DestRegister, SourceRegister};

/// One 32-bit PICA instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn opcode(&self) -> OpCode {
        OpCode::from_raw((self.0 >> 26) as u8)
    }

    /// Field view for `OpForm::Common` / `OpForm::CommonInverted` words.
    pub fn common(&self) -> CommonView {
        CommonView(self.0)
    }

    /// Field view for `OpForm::Mad` / `OpForm::MadInverted` words.
    pub fn mad(&self) -> MadView {
        MadView(self.0)
    }

    /// Field view for `OpForm::Flow` words.
    pub fn flow(&self) -> FlowView {
        FlowView(self.0)
    }
}

/// Comparison operator of a `CMP` component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Unknown(u8),
}

impl CompareOp {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 0x7 {
            0 => Self::Equal,
            1 => Self::NotEqual,
            2 => Self::LessThan,
            3 => Self::LessEqual,
            4 => Self::GreaterThan,
            5 => Self::GreaterEqual,
            other => Self::Unknown(other as u8),
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            Self::Equal => 0,
            Self::NotEqual => 1,
            Self::LessThan => 2,
            Self::LessEqual => 3,
            Self::GreaterThan => 4,
            Self::GreaterEqual => 5,
            Self::Unknown(raw) => *raw,
        }
    }
}

/// Arithmetic-form fields.
///
/// The inverted variants (`slti` and friends) swap the source field widths:
/// the 7-bit, address-offsettable selector moves from src1 to src2.
#[derive(Debug, Clone, Copy)]
pub struct CommonView(u32);

impl CommonView {
    pub fn operand_desc_id(&self) -> usize {
        (self.0 & 0x7F) as usize
    }

    pub fn src1(&self, inverted: bool) -> SourceRegister {
        if inverted {
            SourceRegister::from_raw((self.0 >> 14) & 0x1F)
        } else {
            SourceRegister::from_raw((self.0 >> 12) & 0x7F)
        }
    }

    pub fn src2(&self, inverted: bool) -> SourceRegister {
        if inverted {
            SourceRegister::from_raw((self.0 >> 7) & 0x7F)
        } else {
            SourceRegister::from_raw((self.0 >> 7) & 0x1F)
        }
    }

    /// 0 = no offset, 1/2 = address offsets, 3 = loop counter.
    pub fn address_register_index(&self) -> usize {
        ((self.0 >> 19) & 0x3) as usize
    }

    pub fn dest(&self) -> DestRegister {
        DestRegister::from_raw((self.0 >> 21) & 0x1F)
    }

    pub fn compare_op_x(&self) -> CompareOp {
        CompareOp::from_raw((self.0 >> 24) & 0x7)
    }

    pub fn compare_op_y(&self) -> CompareOp {
        CompareOp::from_raw((self.0 >> 21) & 0x7)
    }
}

/// Multiply-add-form fields. The operand-descriptor id narrows to 5 bits to
/// make room for the third source.
#[derive(Debug, Clone, Copy)]
pub struct MadView(u32);

impl MadView {
    pub fn operand_desc_id(&self) -> usize {
        (self.0 & 0x1F) as usize
    }

    pub fn src1(&self) -> SourceRegister {
        SourceRegister::from_raw((self.0 >> 17) & 0x7F)
    }

    pub fn src2(&self, inverted: bool) -> SourceRegister {
        if inverted {
            SourceRegister::from_raw((self.0 >> 12) & 0x1F)
        } else {
            SourceRegister::from_raw((self.0 >> 10) & 0x7F)
        }
    }

    pub fn src3(&self, inverted: bool) -> SourceRegister {
        if inverted {
            SourceRegister::from_raw((self.0 >> 5) & 0x7F)
        } else {
            SourceRegister::from_raw((self.0 >> 5) & 0x1F)
        }
    }

    pub fn dest(&self) -> DestRegister {
        DestRegister::from_raw((self.0 >> 24) & 0x1F)
    }
}

/// Condition operator of a flow-control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowCondition {
    Or,
    And,
    JustX,
    JustY,
}

impl FlowCondition {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 0x3 {
            0 => Self::Or,
            1 => Self::And,
            2 => Self::JustX,
            _ => Self::JustY,
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            Self::Or => 0,
            Self::And => 1,
            Self::JustX => 2,
            Self::JustY => 3,
        }
    }
}

/// Flow-control-form fields.
#[derive(Debug, Clone, Copy)]
pub struct FlowView(u32);

impl FlowView {
    pub fn num_instructions(&self) -> u32 {
        self.0 & 0xFF
    }

    pub fn dest_offset(&self) -> u32 {
        (self.0 >> 10) & 0xFFF
    }

    pub fn op(&self) -> FlowCondition {
        FlowCondition::from_raw((self.0 >> 22) & 0x3)
    }

    pub fn bool_uniform_id(&self) -> usize {
        ((self.0 >> 22) & 0xF) as usize
    }

    pub fn int_uniform_id(&self) -> usize {
        ((self.0 >> 22) & 0x3) as usize
    }

    pub fn refy(&self) -> bool {
        self.0 & (1 << 24) != 0
    }

    pub fn refx(&self) -> bool {
        self.0 & (1 << 25) != 0
    }
}
