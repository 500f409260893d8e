//! x86-64 JIT back-end.
//!
//! Lowers a whole vertex program to SSE code once and reuses the entrypoint
//! for every vertex. Structured control flow is compiled by recursive
//! descent: `CALL` ranges are inlined, `IF`/`LOOP`/`JMP` become forward
//! branches patched after their bodies are emitted, so no host-side return
//! stack exists at run time.
//!
//! The effect of an entrypoint on `UnitRegisters` is defined to equal
//! running the interpreter over the same program, so any semantic deviation
//! between the two back-ends is a bug in one of them.

mod cache;
mod emitter;

pub use cache::{program_fingerprint, ShaderCache};
pub use emitter::CodeRegion;

use tracing::debug;

use pica_isa::{
    Instruction, OpCode, OpForm, SourceRegister, SourceRegisterFile, SwizzlePattern,
    CompareOp, DestRegister, DestRegisterFile, FlowCondition, FLOAT_UNIFORMS,
    IDENTITY_SELECTOR, MAX_PROGRAM_CODE_WORDS,
};

use crate::core::JitAccuracy;
use crate::error::CompileError;
use crate::interp::warn_unknown_opcode;
use crate::setup::{ShaderSetup, Uniforms};
use crate::state::{UnitRegisters, CALL_STACK_DEPTH};
use emitter::{Cond, Emitter, Reg, Xmm};

/// Size of the executable region backing all compiled programs.
pub const CODE_REGION_SIZE: usize = 4 * 1024 * 1024;

/// A compiled program. The callee-saved registers are preserved; address
/// and loop registers start zeroed on every entry.
pub type EntryPoint = unsafe extern "sysv64" fn(*mut UnitRegisters, *const Uniforms);

// Register plan. rax/rbx/rcx/rdx and xmm0/xmm4 are scratch within a single
// lowered instruction; everything below keeps its role for the whole
// program.

/// Pointer to the unit's register files.
const REGISTERS: Reg = Reg::R15;
/// Pointer to the uniform banks.
const UNIFORMS: Reg = Reg::R9;
/// Address offset registers set by `MOVA` (raw signed indices).
const ADDROFFS_REG_0: Reg = Reg::R10;
const ADDROFFS_REG_1: Reg = Reg::R11;
/// The loop counter, which doubles as the third address offset.
const LOOPCOUNT_REG: Reg = Reg::R12;
/// Remaining loop iterations.
const LOOPCOUNT: Reg = Reg::Rsi;
/// Loop counter increment per iteration.
const LOOPINC: Reg = Reg::Rdi;
/// X and Y results of the last `CMP`.
const COND0: Reg = Reg::R13;
const COND1: Reg = Reg::R14;

const SCRATCH: Xmm = Xmm::Xmm0;
const SRC1: Xmm = Xmm::Xmm1;
const SRC2: Xmm = Xmm::Xmm2;
const SRC3: Xmm = Xmm::Xmm3;
const SCRATCH2: Xmm = Xmm::Xmm4;
/// Constant vector of 1.0 lanes.
const ONE: Xmm = Xmm::Xmm14;
/// Constant vector of sign-bit masks, for negation via `xorps`.
const NEGBIT: Xmm = Xmm::Xmm15;

const OFF_INPUT: i32 = std::mem::offset_of!(UnitRegisters, input) as i32;
const OFF_OUTPUT: i32 = std::mem::offset_of!(UnitRegisters, output) as i32;
const OFF_TEMPORARY: i32 = std::mem::offset_of!(UnitRegisters, temporary) as i32;
const OFF_UNIFORM_F: i32 = std::mem::offset_of!(Uniforms, f) as i32;
const OFF_UNIFORM_I: i32 = std::mem::offset_of!(Uniforms, i) as i32;
const OFF_UNIFORM_B: i32 = std::mem::offset_of!(Uniforms, b) as i32;

type CompileFn =
    for<'e, 's> fn(&'e mut ProgramCompiler<'s>, Instruction) -> Result<(), CompileError>;

/// Dense opcode-slot dispatch table, indexed by the raw 6-bit opcode.
const INSTR_TABLE: [Option<CompileFn>; 64] = [
    Some(|c, i| c.compile_add(i)),   // 0x00 add
    Some(|c, i| c.compile_dp3(i)),   // 0x01 dp3
    Some(|c, i| c.compile_dp4(i)),   // 0x02 dp4
    None,                            // 0x03 dph
    None,                            // 0x04
    None,                            // 0x05 ex2
    None,                            // 0x06 lg2
    None,                            // 0x07
    Some(|c, i| c.compile_mul(i)),   // 0x08 mul
    None,                            // 0x09 sge
    Some(|c, i| c.compile_slt(i)),   // 0x0a slt
    Some(|c, i| c.compile_flr(i)),   // 0x0b flr
    Some(|c, i| c.compile_max(i)),   // 0x0c max
    Some(|c, i| c.compile_min(i)),   // 0x0d min
    Some(|c, i| c.compile_rcp(i)),   // 0x0e rcp
    Some(|c, i| c.compile_rsq(i)),   // 0x0f rsq
    None,                            // 0x10
    None,                            // 0x11
    Some(|c, i| c.compile_mova(i)),  // 0x12 mova
    Some(|c, i| c.compile_mov(i)),   // 0x13 mov
    None,                            // 0x14
    None,                            // 0x15
    None,                            // 0x16
    None,                            // 0x17
    None,                            // 0x18 dphi
    None,                            // 0x19
    None,                            // 0x1a sgei
    Some(|c, i| c.compile_slt(i)),   // 0x1b slti
    None,                            // 0x1c
    None,                            // 0x1d
    None,                            // 0x1e
    None,                            // 0x1f
    None,                            // 0x20
    Some(|c, i| c.compile_nop(i)),   // 0x21 nop
    Some(|c, i| c.compile_end(i)),   // 0x22 end
    None,                            // 0x23 breakc
    Some(|c, i| c.compile_call(i)),  // 0x24 call
    Some(|c, i| c.compile_callc(i)), // 0x25 callc
    Some(|c, i| c.compile_callu(i)), // 0x26 callu
    Some(|c, i| c.compile_if(i)),    // 0x27 ifu
    Some(|c, i| c.compile_if(i)),    // 0x28 ifc
    Some(|c, i| c.compile_loop(i)),  // 0x29 loop
    None,                            // 0x2a emit
    None,                            // 0x2b setemit
    Some(|c, i| c.compile_jmp(i)),   // 0x2c jmpc
    Some(|c, i| c.compile_jmp(i)),   // 0x2d jmpu
    Some(|c, i| c.compile_cmp(i)),   // 0x2e cmp
    Some(|c, i| c.compile_cmp(i)),   // 0x2f cmp
    Some(|c, i| c.compile_mad(i)),   // 0x30 madi
    Some(|c, i| c.compile_mad(i)),   // 0x31 madi
    Some(|c, i| c.compile_mad(i)),   // 0x32 madi
    Some(|c, i| c.compile_mad(i)),   // 0x33 madi
    Some(|c, i| c.compile_mad(i)),   // 0x34 madi
    Some(|c, i| c.compile_mad(i)),   // 0x35 madi
    Some(|c, i| c.compile_mad(i)),   // 0x36 madi
    Some(|c, i| c.compile_mad(i)),   // 0x37 madi
    Some(|c, i| c.compile_mad(i)),   // 0x38 mad
    Some(|c, i| c.compile_mad(i)),   // 0x39 mad
    Some(|c, i| c.compile_mad(i)),   // 0x3a mad
    Some(|c, i| c.compile_mad(i)),   // 0x3b mad
    Some(|c, i| c.compile_mad(i)),   // 0x3c mad
    Some(|c, i| c.compile_mad(i)),   // 0x3d mad
    Some(|c, i| c.compile_mad(i)),   // 0x3e mad
    Some(|c, i| c.compile_mad(i)),   // 0x3f mad
];

/// Owns the executable region and compiles programs into it.
pub struct JitCompiler {
    region: CodeRegion,
    accuracy: JitAccuracy,
    has_sse41: bool,
    has_fma: bool,
}

impl JitCompiler {
    pub fn new(accuracy: JitAccuracy) -> Result<Self, CompileError> {
        Ok(Self {
            region: CodeRegion::new(CODE_REGION_SIZE)?,
            accuracy,
            has_sse41: std::arch::is_x86_feature_detected!("sse4.1"),
            has_fma: std::arch::is_x86_feature_detected!("fma"),
        })
    }

    pub fn compile(&mut self, setup: &ShaderSetup) -> Result<EntryPoint, CompileError> {
        let mut compiler = ProgramCompiler {
            setup,
            e: Emitter::new(),
            cursor: setup.entry_point as usize,
            looping: false,
            inline_stack: Vec::new(),
            accuracy: self.accuracy,
            has_sse41: self.has_sse41,
            has_fma: self.has_fma,
        };
        compiler.compile_program()?;
        let code = compiler.e.code();
        let entry = self.region.append(code)?;
        debug!(
            bytes = code.len(),
            entry_offset = setup.entry_point,
            region_used = self.region.used(),
            "compiled shader program"
        );
        // The region stays mapped (and the bytes stay immutable) until
        // `clear`, which also drops every handed-out entrypoint.
        Ok(unsafe { std::mem::transmute::<*const u8, EntryPoint>(entry) })
    }

    /// Resets the code region; all previously returned entrypoints become
    /// invalid.
    pub fn clear(&mut self) {
        self.region.clear();
    }
}

struct ProgramCompiler<'a> {
    setup: &'a ShaderSetup,
    e: Emitter,
    /// Offset of the next instruction to lower.
    cursor: usize,
    looping: bool,
    /// Ranges currently being inlined by `CALL`, outermost first. Bounds the
    /// compile-time recursion the same way the call stack bounds the
    /// interpreter.
    inline_stack: Vec<(u32, u32)>,
    accuracy: JitAccuracy,
    has_sse41: bool,
    has_fma: bool,
}

/// Reorders a descriptor selector into a `shufps` immediate (the two field
/// orders are reversed).
fn shufps_imm(selector: u8) -> u8 {
    ((selector & 0xC0) >> 6)
        | ((selector & 0x03) << 6)
        | ((selector & 0x0C) << 2)
        | ((selector & 0x30) >> 2)
}

/// `cmpps` predicate immediates for the `CMP` operators. GT and GE lower to
/// not-less-equal and not-less-than, which order NaN exactly like the
/// interpreter's predicates.
fn cmpps_imm(op: CompareOp) -> Option<u8> {
    match op {
        CompareOp::Equal => Some(0),
        CompareOp::NotEqual => Some(4),
        CompareOp::LessThan => Some(1),
        CompareOp::LessEqual => Some(2),
        CompareOp::GreaterThan => Some(6),
        CompareOp::GreaterEqual => Some(5),
        CompareOp::Unknown(_) => None,
    }
}

impl<'a> ProgramCompiler<'a> {
    fn compile_program(&mut self) -> Result<(), CompileError> {
        // Prologue: preserve callee-saved registers, take over the argument
        // registers, and zero the address/loop/condition state.
        self.e.push_r64(Reg::Rbx);
        self.e.push_r64(Reg::Rbp);
        self.e.push_r64(Reg::R12);
        self.e.push_r64(Reg::R13);
        self.e.push_r64(Reg::R14);
        self.e.push_r64(Reg::R15);
        self.e.mov_rr64(REGISTERS, Reg::Rdi);
        self.e.mov_rr64(UNIFORMS, Reg::Rsi);
        self.e.xor_rr64(ADDROFFS_REG_0, ADDROFFS_REG_0);
        self.e.xor_rr64(ADDROFFS_REG_1, ADDROFFS_REG_1);
        self.e.xor_rr64(LOOPCOUNT_REG, LOOPCOUNT_REG);
        self.e.xor_rr64(COND0, COND0);
        self.e.xor_rr64(COND1, COND1);

        // Materialise the constant vectors without touching memory:
        // all-ones shifted into 0x3F800000 (1.0f) and 0x80000000.
        self.e.pcmpeqd(ONE, ONE);
        self.e.pslld_imm(ONE, 25);
        self.e.psrld_imm(ONE, 2);
        self.e.pcmpeqd(NEGBIT, NEGBIT);
        self.e.pslld_imm(NEGBIT, 31);

        while self.cursor < MAX_PROGRAM_CODE_WORDS {
            self.compile_next_instr()?;
        }

        // A program that runs off the end of program memory terminates like
        // the interpreter does.
        self.compile_epilogue();
        Ok(())
    }

    fn compile_next_instr(&mut self) -> Result<(), CompileError> {
        let instr = Instruction(self.setup.program_code[self.cursor]);
        self.cursor += 1;

        let slot = (instr.0 >> 26) as usize;
        match INSTR_TABLE[slot] {
            Some(handler) => handler(self, instr),
            None => {
                warn_unknown_opcode(slot as u8);
                Ok(())
            }
        }
    }

    /// Compiles instructions up to and including `stop`.
    fn compile_block(&mut self, stop: u32) -> Result<(), CompileError> {
        while self.cursor <= stop as usize && self.cursor < MAX_PROGRAM_CODE_WORDS {
            self.compile_next_instr()?;
        }
        Ok(())
    }

    fn compile_epilogue(&mut self) {
        self.e.pop_r64(Reg::R15);
        self.e.pop_r64(Reg::R14);
        self.e.pop_r64(Reg::R13);
        self.e.pop_r64(Reg::R12);
        self.e.pop_r64(Reg::Rbp);
        self.e.pop_r64(Reg::Rbx);
        self.e.ret();
    }

    fn swizzle_of(&self, instr: Instruction) -> SwizzlePattern {
        let desc_id = match instr.opcode().form() {
            OpForm::Mad | OpForm::MadInverted => instr.mad().operand_desc_id(),
            _ => instr.common().operand_desc_id(),
        };
        SwizzlePattern(self.setup.swizzle_data[desc_id])
    }

    /// Loads source `src_num` into `dest`, applying relative addressing,
    /// the component selector, and negation.
    fn compile_swizzle_src(
        &mut self,
        instr: Instruction,
        src_num: usize,
        reg: SourceRegister,
        dest: Xmm,
    ) {
        let form = instr.opcode().form();
        let is_mad = matches!(form, OpForm::Mad | OpForm::MadInverted);

        let (base, disp) = match reg.file() {
            SourceRegisterFile::FloatUniform => {
                (UNIFORMS, OFF_UNIFORM_F + (reg.index() * 16) as i32)
            }
            SourceRegisterFile::Input => (REGISTERS, OFF_INPUT + (reg.index() * 16) as i32),
            SourceRegisterFile::Temporary => {
                (REGISTERS, OFF_TEMPORARY + (reg.index() * 16) as i32)
            }
        };

        // MAD/MADI never use the address offset registers, so their loads
        // are always direct.
        let mut loaded = false;
        if !is_mad {
            let offset_src = if form == OpForm::CommonInverted { 2 } else { 1 };
            let adi = instr.common().address_register_index();
            if src_num == offset_src
                && adi != 0
                && reg.file() == SourceRegisterFile::FloatUniform
            {
                let addr_reg = [ADDROFFS_REG_0, ADDROFFS_REG_1, LOOPCOUNT_REG][adi - 1];
                self.compile_masked_indexed_load(dest, addr_reg, reg.index());
                loaded = true;
            }
        }
        if !loaded {
            self.e.movaps_load(dest, base, disp);
        }

        let swizzle = self.swizzle_of(instr);
        let selector = swizzle.raw_selector(src_num);
        if selector != IDENTITY_SELECTOR {
            self.e.shufps(dest, dest, shufps_imm(selector));
        }
        if swizzle.negate(src_num) {
            self.e.xorps(dest, NEGBIT);
        }
    }

    /// Indexed uniform load with the effective index wrapped into the bank:
    /// `dest = f[(index + offset_reg) mod 96]`.
    fn compile_masked_indexed_load(&mut self, dest: Xmm, offset_reg: Reg, index: usize) {
        self.e.mov_rr32(Reg::Rax, offset_reg);
        self.e.add_r32_imm32(Reg::Rax, index as u32);
        self.e.mov_r32_imm32(Reg::Rcx, FLOAT_UNIFORMS as u32);
        self.e.cdq();
        self.e.idiv_r32(Reg::Rcx);
        self.e.test_rr32(Reg::Rdx, Reg::Rdx);
        let nonneg = self.e.jcc_fixup(Cond::NotSign);
        self.e.add_r32_imm32(Reg::Rdx, FLOAT_UNIFORMS as u32);
        self.e.set_jump_target(nonneg);
        self.e.shl_r32_imm8(Reg::Rdx, 4);
        self.e.movaps_load_indexed(dest, UNIFORMS, Reg::Rdx, OFF_UNIFORM_F);
    }

    /// Stores `src` to the destination register under the write mask.
    fn compile_dest_enable(&mut self, instr: Instruction, src: Xmm) {
        let dest = match instr.opcode().form() {
            OpForm::Mad | OpForm::MadInverted => instr.mad().dest(),
            _ => instr.common().dest(),
        };
        let disp = Self::dest_offset(dest);
        let mask = self.swizzle_of(instr).dest_mask();

        if mask == 0xF {
            self.e.movaps_store(REGISTERS, disp, src);
        } else if mask != 0 {
            self.e.movaps_load(SCRATCH, REGISTERS, disp);
            if self.has_sse41 {
                // blendps immediate bit 0 selects lane X; the descriptor
                // mask has X in bit 3.
                let blend = ((mask & 8) >> 3) | ((mask & 4) >> 1) | ((mask & 2) << 1) | ((mask & 1) << 3);
                self.e.blendps(SCRATCH, src, blend);
            } else {
                self.e.movaps_rr(SCRATCH2, src);
                self.e.unpckhps(SCRATCH2, SCRATCH);
                self.e.unpcklps(SCRATCH, src);
                let sel: u8 = (if mask & 8 != 0 { 1 } else { 0 })
                    | (if mask & 4 != 0 { 3 } else { 2 }) << 2
                    | (if mask & 2 != 0 { 0 } else { 1 }) << 4
                    | (if mask & 1 != 0 { 2 } else { 3 }) << 6;
                self.e.shufps(SCRATCH, SCRATCH2, sel);
            }
            self.e.movaps_store(REGISTERS, disp, SCRATCH);
        }
    }

    fn dest_offset(dest: DestRegister) -> i32 {
        let file = match dest.file() {
            DestRegisterFile::Output => OFF_OUTPUT,
            DestRegisterFile::Temporary => OFF_TEMPORARY,
        };
        file + (dest.index() * 16) as i32
    }

    /// Leaves `eax` zero iff the condition-code expression is false.
    fn compile_evaluate_condition(&mut self, instr: Instruction) {
        let flow = instr.flow();
        let refx = flow.refx() as u32;
        let refy = flow.refy() as u32;
        match flow.op() {
            FlowCondition::Or => {
                self.e.mov_rr32(Reg::Rax, COND0);
                self.e.mov_rr32(Reg::Rbx, COND1);
                self.e.xor_r32_imm32(Reg::Rax, refx ^ 1);
                self.e.xor_r32_imm32(Reg::Rbx, refy ^ 1);
                self.e.or_rr32(Reg::Rax, Reg::Rbx);
            }
            FlowCondition::And => {
                self.e.mov_rr32(Reg::Rax, COND0);
                self.e.mov_rr32(Reg::Rbx, COND1);
                self.e.xor_r32_imm32(Reg::Rax, refx ^ 1);
                self.e.xor_r32_imm32(Reg::Rbx, refy ^ 1);
                self.e.and_rr32(Reg::Rax, Reg::Rbx);
            }
            FlowCondition::JustX => {
                self.e.mov_rr32(Reg::Rax, COND0);
                self.e.xor_r32_imm32(Reg::Rax, refx ^ 1);
            }
            FlowCondition::JustY => {
                self.e.mov_rr32(Reg::Rax, COND1);
                self.e.xor_r32_imm32(Reg::Rax, refy ^ 1);
            }
        }
    }

    /// Sets ZF iff the boolean uniform is false.
    fn compile_uniform_condition(&mut self, instr: Instruction) {
        let offset = OFF_UNIFORM_B + instr.flow().bool_uniform_id() as i32;
        self.e.cmp_mem8_imm8(UNIFORMS, offset, 0);
    }

    fn compile_add(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.compile_swizzle_src(instr, 2, instr.common().src2(false), SRC2);
        self.e.addps(SRC1, SRC2);
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_dp3(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.compile_swizzle_src(instr, 2, instr.common().src2(false), SRC2);
        self.e.mulps(SRC1, SRC2);
        self.e.movaps_rr(SRC2, SRC1);
        self.e.shufps(SRC2, SRC2, 0x55); // broadcast lane 1
        self.e.movaps_rr(SRC3, SRC1);
        self.e.shufps(SRC3, SRC3, 0xAA); // broadcast lane 2
        self.e.shufps(SRC1, SRC1, 0x00); // broadcast lane 0
        self.e.addps(SRC1, SRC2);
        self.e.addps(SRC1, SRC3);
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_dp4(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.compile_swizzle_src(instr, 2, instr.common().src2(false), SRC2);
        self.e.mulps(SRC1, SRC2);
        self.e.movaps_rr(SRC2, SRC1);
        self.e.shufps(SRC1, SRC1, 0xB1); // xyzw -> yxwz
        self.e.addps(SRC1, SRC2);
        self.e.movaps_rr(SRC2, SRC1);
        self.e.shufps(SRC1, SRC1, 0x1B); // xyzw -> wzyx
        self.e.addps(SRC1, SRC2);
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_mul(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.compile_swizzle_src(instr, 2, instr.common().src2(false), SRC2);
        self.e.mulps(SRC1, SRC2);
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_slt(&mut self, instr: Instruction) -> Result<(), CompileError> {
        let inverted = instr.opcode().form() == OpForm::CommonInverted;
        self.compile_swizzle_src(instr, 1, instr.common().src1(inverted), SRC1);
        self.compile_swizzle_src(instr, 2, instr.common().src2(inverted), SRC2);
        self.e.cmpps(SRC1, SRC2, 1); // less-than
        self.e.andps(SRC1, ONE);
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_flr(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        if self.has_sse41 {
            self.e.roundps(SRC1, SRC1, 1); // toward negative infinity
        } else {
            // Truncate, then subtract one wherever truncation rounded up.
            self.e.movaps_rr(SCRATCH, SRC1);
            self.e.cvttps2dq(SRC1, SRC1);
            self.e.cvtdq2ps(SRC1, SRC1);
            self.e.cmpps(SCRATCH, SRC1, 1);
            self.e.andps(SCRATCH, ONE);
            self.e.subps(SRC1, SCRATCH);
        }
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_max(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.compile_swizzle_src(instr, 2, instr.common().src2(false), SRC2);
        self.e.maxps(SRC1, SRC2);
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_min(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.compile_swizzle_src(instr, 2, instr.common().src2(false), SRC2);
        self.e.minps(SRC1, SRC2);
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_rcp(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.e.shufps(SRC1, SRC1, 0x00); // lane X feeds every enabled lane
        match self.accuracy {
            JitAccuracy::Precise => {
                self.e.movaps_rr(SCRATCH, ONE);
                self.e.divps(SCRATCH, SRC1);
                self.e.movaps_rr(SRC1, SCRATCH);
            }
            JitAccuracy::Approximate => self.e.rcpps(SRC1, SRC1),
        }
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_rsq(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.e.shufps(SRC1, SRC1, 0x00);
        match self.accuracy {
            JitAccuracy::Precise => {
                self.e.sqrtps(SRC1, SRC1);
                self.e.movaps_rr(SCRATCH, ONE);
                self.e.divps(SCRATCH, SRC1);
                self.e.movaps_rr(SRC1, SCRATCH);
            }
            JitAccuracy::Approximate => self.e.rsqrtps(SRC1, SRC1),
        }
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_mova(&mut self, instr: Instruction) -> Result<(), CompileError> {
        let swizzle = self.swizzle_of(instr);
        let write_x = swizzle.dest_component_enabled(0);
        let write_y = swizzle.dest_component_enabled(1);
        if !write_x && !write_y {
            return Ok(());
        }

        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.e.cvttps2dq(SRC1, SRC1);
        self.e.movq_r64_xmm(Reg::Rax, SRC1);

        if write_x && write_y {
            self.e.movsxd_r64_r32(ADDROFFS_REG_0, Reg::Rax);
            self.e.shr_r64_imm8(Reg::Rax, 32);
            self.e.movsxd_r64_r32(ADDROFFS_REG_1, Reg::Rax);
        } else if write_x {
            self.e.movsxd_r64_r32(ADDROFFS_REG_0, Reg::Rax);
        } else {
            self.e.shr_r64_imm8(Reg::Rax, 32);
            self.e.movsxd_r64_r32(ADDROFFS_REG_1, Reg::Rax);
        }
        Ok(())
    }

    fn compile_mov(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_cmp(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_swizzle_src(instr, 1, instr.common().src1(false), SRC1);
        self.compile_swizzle_src(instr, 2, instr.common().src2(false), SRC2);

        let imm_x = cmpps_imm(instr.common().compare_op_x());
        let imm_y = cmpps_imm(instr.common().compare_op_y());

        if let (Some(x), Some(y)) = (imm_x, imm_y) {
            if x == y {
                // Same operator: one packed compare covers both components.
                self.e.cmpps(SRC1, SRC2, x);
                self.e.movq_r64_xmm(COND0, SRC1);
                self.e.mov_rr64(COND1, COND0);
                self.e.shr_r32_imm8(COND0, 31);
                self.e.shr_r64_imm8(COND1, 63);
                return Ok(());
            }
        }
        if let Some(x) = imm_x {
            self.e.movaps_rr(SCRATCH, SRC1);
            self.e.cmpss(SCRATCH, SRC2, x);
            self.e.movq_r64_xmm(COND0, SCRATCH);
            self.e.shr_r32_imm8(COND0, 31);
        }
        if let Some(y) = imm_y {
            self.e.cmpps(SRC1, SRC2, y);
            self.e.movq_r64_xmm(COND1, SRC1);
            self.e.shr_r64_imm8(COND1, 63);
        }
        // Unknown operators leave their condition register untouched, like
        // the interpreter.
        Ok(())
    }

    fn compile_mad(&mut self, instr: Instruction) -> Result<(), CompileError> {
        let inverted = instr.opcode() == OpCode::Madi;
        let mad = instr.mad();
        self.compile_swizzle_src(instr, 1, mad.src1(), SRC1);
        self.compile_swizzle_src(instr, 2, mad.src2(inverted), SRC2);
        self.compile_swizzle_src(instr, 3, mad.src3(inverted), SRC3);
        if self.has_fma {
            self.e.vfmadd213ps(SRC1, SRC2, SRC3);
        } else {
            self.e.mulps(SRC1, SRC2);
            self.e.addps(SRC1, SRC3);
        }
        self.compile_dest_enable(instr, SRC1);
        Ok(())
    }

    fn compile_nop(&mut self, _instr: Instruction) -> Result<(), CompileError> {
        Ok(())
    }

    fn compile_end(&mut self, _instr: Instruction) -> Result<(), CompileError> {
        self.compile_epilogue();
        Ok(())
    }

    /// Inlines the called range; no host call instruction is emitted.
    ///
    /// A range that calls back into itself would inline forever, so a call
    /// to a range already on the inline stack (or past the interpreter's
    /// call-stack depth) is rejected, like the `looping` guard above.
    fn compile_call_range(&mut self, dest: u32, num: u32) -> Result<(), CompileError> {
        if self.inline_stack.contains(&(dest, num)) || self.inline_stack.len() >= CALL_STACK_DEPTH
        {
            return Err(CompileError::RecursionLimit {
                target: dest,
                offset: self.cursor as u32 - 1,
            });
        }
        self.inline_stack.push((dest, num));

        let saved = self.cursor;
        self.cursor = dest as usize;
        let end = (dest.wrapping_add(num) as usize).min(MAX_PROGRAM_CODE_WORDS);
        while self.cursor < end {
            self.compile_next_instr()?;
        }
        self.cursor = saved;

        self.inline_stack.pop();
        Ok(())
    }

    fn compile_call(&mut self, instr: Instruction) -> Result<(), CompileError> {
        let flow = instr.flow();
        self.compile_call_range(flow.dest_offset(), flow.num_instructions())
    }

    fn compile_callc(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_evaluate_condition(instr);
        self.e.test_rr32(Reg::Rax, Reg::Rax);
        let skip = self.e.jcc_fixup(Cond::Zero);
        self.compile_call(instr)?;
        self.e.set_jump_target(skip);
        Ok(())
    }

    fn compile_callu(&mut self, instr: Instruction) -> Result<(), CompileError> {
        self.compile_uniform_condition(instr);
        let skip = self.e.jcc_fixup(Cond::Zero);
        self.compile_call(instr)?;
        self.e.set_jump_target(skip);
        Ok(())
    }

    fn compile_if(&mut self, instr: Instruction) -> Result<(), CompileError> {
        let flow = instr.flow();
        let dest = flow.dest_offset();
        if (dest as usize) < self.cursor {
            return Err(CompileError::BackwardsBranch {
                op: "if",
                target: dest,
                offset: self.cursor as u32 - 1,
            });
        }

        if instr.opcode() == OpCode::Ifu {
            self.compile_uniform_condition(instr);
        } else {
            self.compile_evaluate_condition(instr);
            self.e.test_rr32(Reg::Rax, Reg::Rax);
        }
        let to_else = self.e.jcc_fixup(Cond::Zero);

        self.compile_block(dest.wrapping_sub(1))?;

        if flow.num_instructions() == 0 {
            self.e.set_jump_target(to_else);
            return Ok(());
        }

        let over_else = self.e.jmp_fixup();
        self.e.set_jump_target(to_else);
        self.compile_block(dest + flow.num_instructions() - 1)?;
        self.e.set_jump_target(over_else);
        Ok(())
    }

    fn compile_loop(&mut self, instr: Instruction) -> Result<(), CompileError> {
        let flow = instr.flow();
        let dest = flow.dest_offset();
        if (dest as usize) < self.cursor {
            return Err(CompileError::BackwardsBranch {
                op: "loop",
                target: dest,
                offset: self.cursor as u32 - 1,
            });
        }
        if self.looping {
            return Err(CompileError::NestedLoop {
                offset: self.cursor as u32 - 1,
            });
        }
        self.looping = true;

        // The integer uniform packs {count, start, increment} into one
        // 32-bit load.
        let offset = OFF_UNIFORM_I + (flow.int_uniform_id() * 4) as i32;
        self.e.mov_r32_mem(LOOPCOUNT, UNIFORMS, offset);
        self.e.mov_rr32(LOOPCOUNT_REG, LOOPCOUNT);
        self.e.shr_r32_imm8(LOOPCOUNT_REG, 8);
        self.e.and_r32_imm32(LOOPCOUNT_REG, 0xFF); // start
        self.e.mov_rr32(LOOPINC, LOOPCOUNT);
        self.e.shr_r32_imm8(LOOPINC, 16);
        self.e.and_r32_imm32(LOOPINC, 0xFF); // increment
        self.e.and_r32_imm32(LOOPCOUNT, 0xFF);
        self.e.add_r32_imm32(LOOPCOUNT, 1); // count + 1 iterations

        let loop_start = self.e.pos();
        self.compile_block(dest)?;
        self.e.add_rr32(LOOPCOUNT_REG, LOOPINC);
        self.e.sub_r32_imm8(LOOPCOUNT, 1);
        self.e.jcc_to(Cond::NotZero, loop_start);

        self.looping = false;
        Ok(())
    }

    fn compile_jmp(&mut self, instr: Instruction) -> Result<(), CompileError> {
        let flow = instr.flow();
        let dest = flow.dest_offset();
        if (dest as usize) < self.cursor {
            return Err(CompileError::BackwardsBranch {
                op: "jmp",
                target: dest,
                offset: self.cursor as u32 - 1,
            });
        }

        if instr.opcode() == OpCode::Jmpc {
            self.compile_evaluate_condition(instr);
            self.e.test_rr32(Reg::Rax, Reg::Rax);
        } else {
            self.compile_uniform_condition(instr);
        }
        let taken = self.e.jcc_fixup(Cond::NotZero);

        self.compile_block(dest.wrapping_sub(1))?;

        self.e.set_jump_target(taken);
        Ok(())
    }
}
