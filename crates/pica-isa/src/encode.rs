//! Instruction and operand-descriptor word builders.
//!
//! These mirror the decode views in the rest of the crate and exist for the
//! benefit of tests, benches, and tooling that assemble small programs.

use crate::instruction::{CompareOp, FlowCondition};
use crate::opcode::OpCode;
use crate::registers::{DestRegister, SourceRegister};
use crate::swizzle::IDENTITY_SELECTOR;

/// Arithmetic word with register-form sources (7-bit src1, 5-bit src2).
pub fn common(
    op: OpCode,
    dest: DestRegister,
    src1: SourceRegister,
    src2: SourceRegister,
    address_register_index: usize,
    operand_desc_id: usize,
) -> u32 {
    ((op.raw() as u32) << 26)
        | ((dest.raw() as u32) << 21)
        | (((address_register_index as u32) & 0x3) << 19)
        | ((src1.raw() as u32) << 12)
        | (((src2.raw() as u32) & 0x1F) << 7)
        | ((operand_desc_id as u32) & 0x7F)
}

/// Arithmetic word with inverted sources (5-bit src1, 7-bit src2).
pub fn common_inverted(
    op: OpCode,
    dest: DestRegister,
    src1: SourceRegister,
    src2: SourceRegister,
    address_register_index: usize,
    operand_desc_id: usize,
) -> u32 {
    ((op.raw() as u32) << 26)
        | ((dest.raw() as u32) << 21)
        | (((address_register_index as u32) & 0x3) << 19)
        | (((src1.raw() as u32) & 0x1F) << 14)
        | ((src2.raw() as u32) << 7)
        | ((operand_desc_id as u32) & 0x7F)
}

/// `CMP` word. The X operator's high bit doubles as the opcode's low bit,
/// which is why `CMP` owns two raw opcode slots.
pub fn cmp(
    src1: SourceRegister,
    src2: SourceRegister,
    op_x: CompareOp,
    op_y: CompareOp,
    address_register_index: usize,
    operand_desc_id: usize,
) -> u32 {
    (0b10111u32 << 27)
        | ((op_x.raw() as u32) << 24)
        | ((op_y.raw() as u32) << 21)
        | (((address_register_index as u32) & 0x3) << 19)
        | ((src1.raw() as u32) << 12)
        | (((src2.raw() as u32) & 0x1F) << 7)
        | ((operand_desc_id as u32) & 0x7F)
}

/// `MAD` word (register-form src2/src3). The destination's high bits double
/// as the opcode's low bits.
pub fn mad(
    dest: DestRegister,
    src1: SourceRegister,
    src2: SourceRegister,
    src3: SourceRegister,
    operand_desc_id: usize,
) -> u32 {
    (0b111u32 << 29)
        | ((dest.raw() as u32) << 24)
        | ((src1.raw() as u32) << 17)
        | ((src2.raw() as u32) << 10)
        | (((src3.raw() as u32) & 0x1F) << 5)
        | ((operand_desc_id as u32) & 0x1F)
}

/// `MADI` word (5-bit src2, 7-bit src3).
pub fn madi(
    dest: DestRegister,
    src1: SourceRegister,
    src2: SourceRegister,
    src3: SourceRegister,
    operand_desc_id: usize,
) -> u32 {
    (0b110u32 << 29)
        | ((dest.raw() as u32) << 24)
        | ((src1.raw() as u32) << 17)
        | (((src2.raw() as u32) & 0x1F) << 12)
        | ((src3.raw() as u32) << 5)
        | ((operand_desc_id as u32) & 0x1F)
}

/// Flow word with a condition-code expression (`CALLC`, `IFC`, `JMPC`).
pub fn flow_cond(
    op: OpCode,
    dest_offset: u32,
    num_instructions: u32,
    cond: FlowCondition,
    refx: bool,
    refy: bool,
) -> u32 {
    ((op.raw() as u32) << 26)
        | ((refx as u32) << 25)
        | ((refy as u32) << 24)
        | ((cond.raw() as u32) << 22)
        | ((dest_offset & 0xFFF) << 10)
        | (num_instructions & 0xFF)
}

/// Flow word gated on a boolean uniform (`CALLU`, `IFU`, `JMPU`).
pub fn flow_bool(op: OpCode, dest_offset: u32, num_instructions: u32, bool_uniform_id: usize) -> u32 {
    ((op.raw() as u32) << 26)
        | (((bool_uniform_id as u32) & 0xF) << 22)
        | ((dest_offset & 0xFFF) << 10)
        | (num_instructions & 0xFF)
}

/// Unconditional `CALL`.
pub fn call(dest_offset: u32, num_instructions: u32) -> u32 {
    ((OpCode::Call.raw() as u32) << 26) | ((dest_offset & 0xFFF) << 10) | (num_instructions & 0xFF)
}

/// `LOOP` gated on an integer uniform.
pub fn loop_int(int_uniform_id: usize, dest_offset: u32) -> u32 {
    ((OpCode::Loop.raw() as u32) << 26)
        | (((int_uniform_id as u32) & 0x3) << 22)
        | ((dest_offset & 0xFFF) << 10)
}

pub fn nop() -> u32 {
    (OpCode::Nop.raw() as u32) << 26
}

pub fn end() -> u32 {
    (OpCode::End.raw() as u32) << 26
}

/// Operand-descriptor word from a write mask, per-source raw selectors, and
/// per-source negate flags.
pub fn swizzle(dest_mask: u8, selectors: [u8; 3], negate: [bool; 3]) -> u32 {
    ((dest_mask as u32) & 0xF)
        | ((negate[0] as u32) << 4)
        | ((selectors[0] as u32) << 5)
        | ((negate[1] as u32) << 13)
        | ((selectors[1] as u32) << 14)
        | ((negate[2] as u32) << 22)
        | ((selectors[2] as u32) << 23)
}

/// Identity operand descriptor: full write mask, no swizzle, no negation.
pub fn swizzle_identity() -> u32 {
    swizzle(0xF, [IDENTITY_SELECTOR; 3], [false; 3])
}

/// Builds an 8-bit raw selector from four component indices, component 0
/// first.
pub fn selector(components: [usize; 4]) -> u8 {
    let mut sel = 0u8;
    for (i, &c) in components.iter().enumerate() {
        debug_assert!(c < 4);
        sel |= (c as u8) << (6 - 2 * i);
    }
    sel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use proptest::prelude::*;

    #[test]
    fn selector_identity() {
        assert_eq!(selector([0, 1, 2, 3]), IDENTITY_SELECTOR);
        assert_eq!(selector([0, 0, 0, 0]), 0x00);
        assert_eq!(selector([3, 3, 3, 3]), 0xFF);
    }

    proptest! {
        #[test]
        fn common_round_trips(
            dest_raw in 0u32..32,
            src1_raw in 0u32..128,
            src2_raw in 0u32..32,
            adi in 0usize..4,
            desc in 0usize..128,
        ) {
            let word = common(
                OpCode::Mul,
                DestRegister::from_raw(dest_raw),
                SourceRegister::from_raw(src1_raw),
                SourceRegister::from_raw(src2_raw),
                adi,
                desc,
            );
            let c = Instruction(word).common();
            prop_assert_eq!(Instruction(word).opcode(), OpCode::Mul);
            prop_assert_eq!(c.dest().raw() as u32, dest_raw);
            prop_assert_eq!(c.src1(false).raw() as u32, src1_raw);
            prop_assert_eq!(c.src2(false).raw() as u32, src2_raw);
            prop_assert_eq!(c.address_register_index(), adi);
            prop_assert_eq!(c.operand_desc_id(), desc);
        }

        #[test]
        fn swizzle_round_trips(
            mask in 0u8..16,
            sels in prop::array::uniform3(0u8..=255),
            negs in prop::array::uniform3(any::<bool>()),
        ) {
            let swiz = crate::SwizzlePattern(swizzle(mask, sels, negs));
            prop_assert_eq!(swiz.dest_mask(), mask);
            for src in 1..=3 {
                prop_assert_eq!(swiz.raw_selector(src), sels[src - 1]);
                prop_assert_eq!(swiz.negate(src), negs[src - 1]);
            }
        }
    }
}
