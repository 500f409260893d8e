//! Direct execution of PICA vertex programs against [`UnitState`].
//!
//! The interpreter is the portable reference back-end: the JIT is defined to
//! have the same observable effect, so every semantic choice here (NaN
//! ordering in comparisons, truncation in `MOVA`, the uniform-index mask on
//! relative addressing) is written to match what the emitted SSE code does.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::warn;

use pica_isa::{
    CompareOp, FlowCondition, FlowView, Instruction, OpCode, OpForm, SourceRegister,
    SourceRegisterFile, SwizzlePattern, FLOAT_UNIFORMS, MAX_PROGRAM_CODE_WORDS,
};

use crate::setup::ShaderSetup;
use crate::state::{CallStackElement, UnitState, CALL_STACK_DEPTH};

/// Runs the program from `state.program_counter` until `END` (or until the
/// program counter runs off the end of program memory, which terminates the
/// run the same way the JIT's fallback epilogue does).
pub fn run_interpreter(setup: &ShaderSetup, state: &mut UnitState) {
    loop {
        if let Some(top) = state.call_stack.last_mut() {
            if state.program_counter == top.final_address {
                state.address_registers[2] += top.loop_increment as i32;

                if top.repeat_counter == 0 {
                    state.program_counter = top.return_address;
                    state.call_stack.pop();
                } else {
                    top.repeat_counter -= 1;
                    state.program_counter = top.loop_address;
                }
                continue;
            }
        }

        let pc = state.program_counter;
        if pc as usize >= MAX_PROGRAM_CODE_WORDS {
            break;
        }
        let instr = Instruction(setup.program_code[pc as usize]);
        state.debug.max_offset = state.debug.max_offset.max(pc + 1);

        let opcode = instr.opcode();
        match opcode.form() {
            OpForm::Common | OpForm::CommonInverted => {
                exec_arithmetic(setup, state, opcode, instr);
            }
            OpForm::Mad | OpForm::MadInverted => {
                exec_mad(setup, state, opcode == OpCode::Madi, instr);
            }
            OpForm::Flow => {
                exec_flow(setup, state, opcode, instr.flow());
            }
            OpForm::Nop => {}
            OpForm::End => break,
            OpForm::Unknown => warn_unknown_opcode(opcode.raw()),
        }

        state.program_counter = state.program_counter.wrapping_add(1);
    }
}

/// Loads a source register, applying the relative-addressing offset to
/// float-uniform sources. The effective uniform index wraps modulo the bank
/// size, matching the masked indexed load the JIT emits.
fn load_source(
    setup: &ShaderSetup,
    state: &UnitState,
    reg: SourceRegister,
    address_offset: i32,
) -> [f32; 4] {
    match reg.file() {
        SourceRegisterFile::Input => state.registers.input[reg.index()],
        SourceRegisterFile::Temporary => state.registers.temporary[reg.index()],
        SourceRegisterFile::FloatUniform => {
            let index =
                (reg.index() as i32 + address_offset).rem_euclid(FLOAT_UNIFORMS as i32) as usize;
            setup.uniforms.f.0[index]
        }
    }
}

fn apply_swizzle(raw: [f32; 4], swizzle: SwizzlePattern, src_num: usize) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (component, lane) in out.iter_mut().enumerate() {
        *lane = raw[swizzle.selector(src_num, component)];
    }
    if swizzle.negate(src_num) {
        for lane in &mut out {
            *lane = -*lane;
        }
    }
    out
}

fn dest_slot<'a>(state: &'a mut UnitState, instr: Instruction, mad: bool) -> &'a mut [f32; 4] {
    let dest = if mad {
        instr.mad().dest()
    } else {
        instr.common().dest()
    };
    match dest.file() {
        pica_isa::DestRegisterFile::Output => &mut state.registers.output[dest.index()],
        pica_isa::DestRegisterFile::Temporary => &mut state.registers.temporary[dest.index()],
    }
}

/// Matches the semantics of `cvttps2dq`: truncation toward zero, with
/// out-of-range and NaN inputs collapsing to the integer indefinite value.
fn truncate_to_i32(value: f32) -> i32 {
    if value.is_nan() || value < -2_147_483_648.0 || value >= 2_147_483_648.0 {
        i32::MIN
    } else {
        value as i32
    }
}

/// Comparison predicates written the way `cmpps` implements them, so NaN
/// operands order identically in both back-ends: GT is not-less-equal and
/// GE is not-less-than, both true on unordered inputs.
fn compare(op: CompareOp, lhs: f32, rhs: f32) -> Option<bool> {
    match op {
        CompareOp::Equal => Some(lhs == rhs),
        CompareOp::NotEqual => Some(lhs != rhs),
        CompareOp::LessThan => Some(lhs < rhs),
        CompareOp::LessEqual => Some(lhs <= rhs),
        CompareOp::GreaterThan => Some(!(lhs <= rhs)),
        CompareOp::GreaterEqual => Some(!(lhs < rhs)),
        CompareOp::Unknown(raw) => {
            warn_unknown_compare(raw);
            None
        }
    }
}

fn exec_arithmetic(setup: &ShaderSetup, state: &mut UnitState, opcode: OpCode, instr: Instruction) {
    let common = instr.common();
    let inverted = opcode.form() == OpForm::CommonInverted;
    let swizzle = SwizzlePattern(setup.swizzle_data[common.operand_desc_id()]);
    state.debug.max_opdesc_id = state
        .debug
        .max_opdesc_id
        .max(common.operand_desc_id() as u32 + 1);

    // src1 carries the address offset for register-form ops, src2 for the
    // inverted forms.
    let address_offset = match common.address_register_index() {
        0 => 0,
        idx => state.address_registers[idx - 1],
    };
    let (off1, off2) = if inverted {
        (0, address_offset)
    } else {
        (address_offset, 0)
    };

    let src1 = apply_swizzle(
        load_source(setup, state, common.src1(inverted), off1),
        swizzle,
        1,
    );
    let src2 = apply_swizzle(
        load_source(setup, state, common.src2(inverted), off2),
        swizzle,
        2,
    );

    match opcode {
        OpCode::Add => commit(state, instr, swizzle, |i| src1[i] + src2[i]),
        OpCode::Mul => commit(state, instr, swizzle, |i| src1[i] * src2[i]),
        OpCode::Flr => commit(state, instr, swizzle, |i| src1[i].floor()),
        OpCode::Max => {
            // maxps: the second operand wins on unordered inputs.
            commit(state, instr, swizzle, |i| {
                if src1[i] > src2[i] {
                    src1[i]
                } else {
                    src2[i]
                }
            })
        }
        OpCode::Min => commit(state, instr, swizzle, |i| {
            if src1[i] < src2[i] {
                src1[i]
            } else {
                src2[i]
            }
        }),
        OpCode::Dp3 => {
            let dot = (src1[0] * src2[0] + src1[1] * src2[1]) + src1[2] * src2[2];
            commit(state, instr, swizzle, |_| dot);
        }
        OpCode::Dp4 => {
            // Pairwise sum, the order the JIT's shuffle-add sequence uses.
            let dot = (src1[0] * src2[0] + src1[1] * src2[1])
                + (src1[2] * src2[2] + src1[3] * src2[3]);
            commit(state, instr, swizzle, |_| dot);
        }
        OpCode::Rcp => {
            let value = 1.0 / src1[0];
            commit(state, instr, swizzle, |_| value);
        }
        OpCode::Rsq => {
            let value = 1.0 / src1[0].sqrt();
            commit(state, instr, swizzle, |_| value);
        }
        OpCode::Mov => commit(state, instr, swizzle, |i| src1[i]),
        OpCode::Slt | OpCode::Slti => commit(state, instr, swizzle, |i| {
            if src1[i] < src2[i] {
                1.0
            } else {
                0.0
            }
        }),
        OpCode::Mova => {
            for i in 0..2 {
                if swizzle.dest_component_enabled(i) {
                    state.address_registers[i] = truncate_to_i32(src1[i]);
                }
            }
        }
        OpCode::Cmp => {
            let ops = [common.compare_op_x(), common.compare_op_y()];
            for (i, op) in ops.into_iter().enumerate() {
                if let Some(result) = compare(op, src1[i], src2[i]) {
                    state.conditional_code[i] = result;
                }
            }
        }
        _ => warn_unknown_opcode(opcode.raw()),
    }
}

fn commit(
    state: &mut UnitState,
    instr: Instruction,
    swizzle: SwizzlePattern,
    value: impl Fn(usize) -> f32,
) {
    let dest = dest_slot(state, instr, false);
    for i in 0..4 {
        if swizzle.dest_component_enabled(i) {
            dest[i] = value(i);
        }
    }
}

fn exec_mad(setup: &ShaderSetup, state: &mut UnitState, inverted: bool, instr: Instruction) {
    let mad = instr.mad();
    let swizzle = SwizzlePattern(setup.swizzle_data[mad.operand_desc_id()]);
    state.debug.max_opdesc_id = state
        .debug
        .max_opdesc_id
        .max(mad.operand_desc_id() as u32 + 1);

    // MAD sources are never address-offset.
    let src1 = apply_swizzle(load_source(setup, state, mad.src1(), 0), swizzle, 1);
    let src2 = apply_swizzle(load_source(setup, state, mad.src2(inverted), 0), swizzle, 2);
    let src3 = apply_swizzle(load_source(setup, state, mad.src3(inverted), 0), swizzle, 3);

    let dest = dest_slot(state, instr, true);
    for i in 0..4 {
        if swizzle.dest_component_enabled(i) {
            dest[i] = src1[i] * src2[i] + src3[i];
        }
    }
}

fn evaluate_condition(state: &UnitState, flow: FlowView) -> bool {
    let x = flow.refx() == state.conditional_code[0];
    let y = flow.refy() == state.conditional_code[1];
    match flow.op() {
        FlowCondition::Or => x || y,
        FlowCondition::And => x && y,
        FlowCondition::JustX => x,
        FlowCondition::JustY => y,
    }
}

/// Enters a scope `[offset, offset + num_instructions)` that returns to
/// `return_address` once the program counter crosses its end, repeating
/// `repeat_counter` extra times for loops.
///
/// Past [`CALL_STACK_DEPTH`] the scope is not entered and execution falls
/// through to the next instruction; such a program would have been rejected
/// by the JIT at compile time, and aborting the host over it is not an
/// option.
fn enter_scope(
    state: &mut UnitState,
    offset: u32,
    num_instructions: u32,
    return_address: u32,
    repeat_counter: u8,
    loop_increment: u8,
) {
    if state.call_stack.len() >= CALL_STACK_DEPTH {
        warn_call_stack_exhausted();
        return;
    }
    // The main loop increments the program counter after every instruction,
    // so park it one short of the scope entry.
    state.program_counter = offset.wrapping_sub(1);
    state.call_stack.push(CallStackElement {
        final_address: offset.wrapping_add(num_instructions),
        return_address,
        repeat_counter,
        loop_increment,
        loop_address: offset,
    });
}

fn exec_flow(setup: &ShaderSetup, state: &mut UnitState, opcode: OpCode, flow: FlowView) {
    let pc = state.program_counter;
    match opcode {
        OpCode::Jmpc => {
            if evaluate_condition(state, flow) {
                state.program_counter = flow.dest_offset().wrapping_sub(1);
            }
        }
        OpCode::Jmpu => {
            if setup.uniforms.b[flow.bool_uniform_id()] {
                state.program_counter = flow.dest_offset().wrapping_sub(1);
            }
        }
        OpCode::Call => {
            enter_scope(
                state,
                flow.dest_offset(),
                flow.num_instructions(),
                pc + 1,
                0,
                0,
            );
        }
        OpCode::Callu => {
            if setup.uniforms.b[flow.bool_uniform_id()] {
                enter_scope(
                    state,
                    flow.dest_offset(),
                    flow.num_instructions(),
                    pc + 1,
                    0,
                    0,
                );
            }
        }
        OpCode::Callc => {
            if evaluate_condition(state, flow) {
                enter_scope(
                    state,
                    flow.dest_offset(),
                    flow.num_instructions(),
                    pc + 1,
                    0,
                    0,
                );
            }
        }
        OpCode::Ifu | OpCode::Ifc => {
            let taken = if opcode == OpCode::Ifu {
                setup.uniforms.b[flow.bool_uniform_id()]
            } else {
                evaluate_condition(state, flow)
            };
            let else_end = flow.dest_offset() + flow.num_instructions();
            if taken {
                enter_scope(
                    state,
                    pc + 1,
                    flow.dest_offset().wrapping_sub(pc + 1),
                    else_end,
                    0,
                    0,
                );
            } else {
                enter_scope(
                    state,
                    flow.dest_offset(),
                    flow.num_instructions(),
                    else_end,
                    0,
                    0,
                );
            }
        }
        OpCode::Loop => {
            let [count, start, increment, _] = setup.uniforms.i[flow.int_uniform_id()];
            state.address_registers[2] = start as i32;
            // Body is [pc + 1, dest_offset] inclusive, count + 1 iterations.
            enter_scope(
                state,
                pc + 1,
                flow.dest_offset().wrapping_sub(pc),
                flow.dest_offset() + 1,
                count,
                increment,
            );
        }
        _ => warn_unknown_opcode(opcode.raw()),
    }
}

pub(crate) fn warn_unknown_opcode(raw: u8) {
    static WARNED: AtomicU64 = AtomicU64::new(0);
    let bit = 1u64 << (raw & 63);
    if WARNED.fetch_or(bit, Ordering::Relaxed) & bit == 0 {
        warn!(opcode = raw as u32, "unhandled shader opcode, executing as nop");
    }
}

fn warn_unknown_compare(raw: u8) {
    static WARNED: AtomicU64 = AtomicU64::new(0);
    let bit = 1u64 << (raw & 63);
    if WARNED.fetch_or(bit, Ordering::Relaxed) & bit == 0 {
        warn!(
            op = raw as u32,
            "unknown compare mode, leaving condition code unchanged"
        );
    }
}

fn warn_call_stack_exhausted() {
    static WARNED: AtomicBool = AtomicBool::new(false);
    if !WARNED.swap(true, Ordering::Relaxed) {
        warn!(
            depth = CALL_STACK_DEPTH,
            "shader call stack exhausted, skipping scope entry"
        );
    }
}
