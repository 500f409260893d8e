//! JIT back-end: interpreter equivalence across the instruction set, cache
//! behaviour, and unsupported-control-flow rejection.

#![cfg(all(target_arch = "x86_64", any(unix, windows)))]

mod common;

use common::{input_with, map_output, setup_from};
use pica_isa::{encode, CompareOp, DestRegister, FlowCondition, OpCode, SourceRegister};
use pica_shader::interp::run_interpreter;
use pica_shader::jit::JitCompiler;
use pica_shader::{
    semantic, CompileError, JitAccuracy, JitConfig, ShaderConfig, ShaderCore, ShaderSetup,
    UnitRegisters, UnitState,
};

fn core_with_jit(enabled: bool) -> ShaderCore {
    let config = ShaderConfig {
        jit: JitConfig {
            enabled,
            accuracy: JitAccuracy::Precise,
        },
        dump_shaders: false,
    };
    ShaderCore::new(config).expect("shader core")
}

fn run_interp(setup: &ShaderSetup, inputs: &[[f32; 4]]) -> UnitState {
    let mut state = UnitState::new();
    for (slot, value) in state.registers.input.iter_mut().zip(inputs.iter()) {
        *slot = *value;
    }
    state.program_counter = setup.entry_point;
    run_interpreter(setup, &mut state);
    state
}

fn run_jit(setup: &ShaderSetup, inputs: &[[f32; 4]]) -> UnitState {
    let mut jit = JitCompiler::new(JitAccuracy::Precise).expect("jit");
    let entry = jit.compile(setup).expect("compile");
    let mut state = UnitState::new();
    for (slot, value) in state.registers.input.iter_mut().zip(inputs.iter()) {
        *slot = *value;
    }
    unsafe { entry(&mut state.registers, &setup.uniforms) };
    state
}

/// Component-wise comparison under the documented 2^-22 tolerance; exact
/// (bit-level) agreement is the common case.
fn assert_registers_match(interp: &UnitRegisters, jit: &UnitRegisters, context: &str) {
    let files = [
        ("o", &interp.output, &jit.output),
        ("r", &interp.temporary, &jit.temporary),
    ];
    for (name, a_file, b_file) in files {
        for (index, (a_reg, b_reg)) in a_file.iter().zip(b_file.iter()).enumerate() {
            for (lane, (&a, &b)) in a_reg.iter().zip(b_reg.iter()).enumerate() {
                if a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()) {
                    continue;
                }
                let tolerance = a.abs().max(b.abs()) * 2f32.powi(-22);
                assert!(
                    (a - b).abs() <= tolerance,
                    "{context}: {name}{index}.{lane}: interpreter {a} vs jit {b}"
                );
            }
        }
    }
}

fn assert_equivalent(setup: &ShaderSetup, inputs: &[[f32; 4]], context: &str) {
    let interp = run_interp(setup, inputs);
    let jit = run_jit(setup, inputs);
    assert_registers_match(&interp.registers, &jit.registers, context);
}

fn mov(dest: DestRegister, src: SourceRegister, desc: usize) -> u32 {
    encode::common(OpCode::Mov, dest, src, SourceRegister::temporary(0), 0, desc)
}

#[test]
fn arithmetic_ops_match_interpreter() {
    let binary = |op, dest| {
        encode::common(
            op,
            DestRegister::temporary(dest),
            SourceRegister::input(0),
            SourceRegister::input(1),
            0,
            0,
        )
    };
    let setup = setup_from(
        &[
            binary(OpCode::Add, 0),
            binary(OpCode::Mul, 1),
            binary(OpCode::Max, 2),
            binary(OpCode::Min, 3),
            binary(OpCode::Slt, 4),
            binary(OpCode::Dp3, 5),
            binary(OpCode::Dp4, 6),
            encode::common(
                OpCode::Flr,
                DestRegister::temporary(7),
                SourceRegister::input(0),
                SourceRegister::input(1),
                0,
                0,
            ),
            encode::end(),
        ],
        &[encode::swizzle_identity()],
    );
    for inputs in [
        [[1.5, -2.25, 3.0, 0.5], [2.0, 4.0, -1.0, 16.0]],
        [[-7.75, 0.0, -0.0, 123.5], [0.25, -0.25, 8.0, -123.5]],
        [[f32::NAN, 1.0, f32::INFINITY, -1.0], [1.0, f32::NAN, 2.0, f32::NEG_INFINITY]],
    ] {
        assert_equivalent(&setup, &inputs, "arithmetic");
    }
}

#[test]
fn swizzles_negation_and_masks_match_interpreter() {
    let reversed = encode::selector([3, 2, 1, 0]);
    let broadcast_y = encode::selector([1, 1, 1, 1]);
    let swizzles = [
        encode::swizzle_identity(),
        encode::swizzle(0xF, [reversed, broadcast_y, 0x1B], [true, false, false]),
        encode::swizzle(0b1010, [broadcast_y, reversed, 0x1B], [false, true, false]),
        encode::swizzle(0b0001, [0x1B, 0x1B, 0x1B], [true, true, false]),
    ];
    let setup = setup_from(
        &[
            encode::common(
                OpCode::Add,
                DestRegister::temporary(0),
                SourceRegister::input(0),
                SourceRegister::input(1),
                0,
                1,
            ),
            encode::common(
                OpCode::Mul,
                DestRegister::temporary(1),
                SourceRegister::input(0),
                SourceRegister::input(1),
                0,
                2,
            ),
            encode::common(
                OpCode::Add,
                DestRegister::temporary(2),
                SourceRegister::input(0),
                SourceRegister::input(1),
                0,
                3,
            ),
            encode::end(),
        ],
        &swizzles,
    );
    assert_equivalent(
        &setup,
        &[[1.0, -2.0, 3.5, -4.25], [0.5, 8.0, -1.5, 2.0]],
        "swizzle",
    );
}

#[test]
fn rcp_rsq_match_interpreter_in_precise_mode() {
    let setup = setup_from(
        &[
            encode::common(
                OpCode::Rcp,
                DestRegister::temporary(0),
                SourceRegister::input(0),
                SourceRegister::temporary(0),
                0,
                0,
            ),
            encode::common(
                OpCode::Rsq,
                DestRegister::temporary(1),
                SourceRegister::input(1),
                SourceRegister::temporary(0),
                0,
                0,
            ),
            encode::end(),
        ],
        &[encode::swizzle_identity()],
    );
    for inputs in [
        [[4.0, 0.0, 0.0, 0.0], [16.0, 0.0, 0.0, 0.0]],
        [[-0.375, 0.0, 0.0, 0.0], [2.0, 0.0, 0.0, 0.0]],
        [[0.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]],
    ] {
        assert_equivalent(&setup, &inputs, "rcp/rsq");
    }
}

#[test]
fn relative_addressing_matches_interpreter() {
    let mask_x = encode::swizzle(0b1000, [0x1B; 3], [false; 3]);
    let mask_y = encode::swizzle(0b0100, [0x1B; 3], [false; 3]);
    let program = [
        encode::common(
            OpCode::Mova,
            DestRegister::temporary(0),
            SourceRegister::input(0),
            SourceRegister::temporary(0),
            0,
            1,
        ),
        encode::common(
            OpCode::Mova,
            DestRegister::temporary(0),
            SourceRegister::input(1),
            SourceRegister::temporary(0),
            0,
            2,
        ),
        encode::common(
            OpCode::Mov,
            DestRegister::temporary(1),
            SourceRegister::float_uniform(20),
            SourceRegister::temporary(0),
            1,
            0,
        ),
        encode::common(
            OpCode::Mov,
            DestRegister::temporary(2),
            SourceRegister::float_uniform(50),
            SourceRegister::temporary(0),
            2,
            0,
        ),
        encode::end(),
    ];
    let mut setup = setup_from(&program, &[encode::swizzle_identity(), mask_x, mask_y]);
    for i in 0..96 {
        setup.uniforms.set_float(i, [i as f32, -(i as f32), 0.5 * i as f32, 1.0]);
    }
    for inputs in [
        [[3.0, 0.0, 0.0, 0.0], [0.0, 11.0, 0.0, 0.0]],
        [[-30.0, 0.0, 0.0, 0.0], [0.0, -51.0, 0.0, 0.0]],
        [[200.0, 0.0, 0.0, 0.0], [0.0, 95.0, 0.0, 0.0]],
    ] {
        assert_equivalent(&setup, &inputs, "relative addressing");
    }
}

#[test]
fn cmp_and_conditional_flow_match_interpreter() {
    let operators = [
        (CompareOp::Equal, CompareOp::Equal),
        (CompareOp::NotEqual, CompareOp::LessThan),
        (CompareOp::LessEqual, CompareOp::GreaterThan),
        (CompareOp::GreaterEqual, CompareOp::GreaterEqual),
    ];
    for (op_x, op_y) in operators {
        let program = [
            encode::cmp(
                SourceRegister::input(0),
                SourceRegister::input(1),
                op_x,
                op_y,
                0,
                0,
            ),
            encode::flow_cond(OpCode::Ifc, 3, 1, FlowCondition::And, true, true),
            mov(DestRegister::output(0), SourceRegister::float_uniform(1), 0),
            mov(DestRegister::output(0), SourceRegister::float_uniform(2), 0),
            encode::flow_cond(OpCode::Jmpc, 6, 0, FlowCondition::JustY, false, true),
            mov(DestRegister::output(1), SourceRegister::float_uniform(1), 0),
            encode::end(),
        ];
        let mut setup = setup_from(&program, &[encode::swizzle_identity()]);
        setup.uniforms.set_float(1, [1.0; 4]);
        setup.uniforms.set_float(2, [2.0; 4]);
        for inputs in [
            [[1.0, 2.0, 0.0, 0.0], [1.0, 3.0, 0.0, 0.0]],
            [[4.0, 2.0, 0.0, 0.0], [1.0, 2.0, 0.0, 0.0]],
            [[f32::NAN, f32::NAN, 0.0, 0.0], [1.0, f32::NAN, 0.0, 0.0]],
        ] {
            assert_equivalent(&setup, &inputs, &format!("cmp {op_x:?}/{op_y:?}"));
        }
    }
}

#[test]
fn calls_and_boolean_conditions_match_interpreter() {
    let program = [
        encode::cmp(
            SourceRegister::input(0),
            SourceRegister::input(1),
            CompareOp::LessThan,
            CompareOp::Equal,
            0,
            0,
        ),
        encode::flow_cond(OpCode::Callc, 7, 1, FlowCondition::And, true, true),
        encode::flow_bool(OpCode::Callu, 8, 1, 3),
        encode::flow_bool(OpCode::Ifu, 5, 1, 4),
        mov(DestRegister::temporary(2), SourceRegister::float_uniform(1), 0),
        mov(DestRegister::temporary(2), SourceRegister::float_uniform(2), 0),
        encode::end(),
        // callc target:
        mov(DestRegister::temporary(0), SourceRegister::float_uniform(1), 0),
        // callu target:
        mov(DestRegister::temporary(1), SourceRegister::float_uniform(2), 0),
    ];
    let mut setup = setup_from(&program, &[encode::swizzle_identity()]);
    setup.uniforms.set_float(1, [1.0, -1.0, 2.0, -2.0]);
    setup.uniforms.set_float(2, [3.0, -3.0, 4.0, -4.0]);
    for (b3, b4) in [(false, false), (true, false), (false, true), (true, true)] {
        setup.uniforms.set_bool(3, b3);
        setup.uniforms.set_bool(4, b4);
        for inputs in [
            [[1.0, 2.0, 0.0, 0.0], [2.0, 2.0, 0.0, 0.0]],
            [[3.0, 2.0, 0.0, 0.0], [2.0, 2.0, 0.0, 0.0]],
        ] {
            assert_equivalent(&setup, &inputs, &format!("calls b3={b3} b4={b4}"));
        }
    }
}

#[test]
fn call_subroutine_past_end_matches_interpreter() {
    let program = [
        encode::call(3, 1),
        mov(DestRegister::output(1), SourceRegister::temporary(0), 0),
        encode::end(),
        mov(DestRegister::temporary(0), SourceRegister::input(0), 0),
    ];
    let setup = setup_from(&program, &[encode::swizzle_identity()]);
    assert_equivalent(&setup, &[[6.0, 5.0, 4.0, 3.0]], "call");
}

#[test]
fn loop_with_counter_addressing_matches_interpreter() {
    let program = [
        encode::loop_int(1, 2),
        encode::common(
            OpCode::Add,
            DestRegister::temporary(0),
            SourceRegister::float_uniform(1),
            SourceRegister::temporary(0),
            0,
            0,
        ),
        encode::common(
            OpCode::Add,
            DestRegister::temporary(3),
            SourceRegister::float_uniform(10),
            SourceRegister::temporary(3),
            3,
            0,
        ),
        mov(DestRegister::output(0), SourceRegister::temporary(0), 0),
        mov(DestRegister::output(1), SourceRegister::temporary(3), 0),
        encode::end(),
    ];
    let mut setup = setup_from(&program, &[encode::swizzle_identity()]);
    setup.uniforms.set_int(1, 4, 0, 2);
    setup.uniforms.set_float(1, [1.0; 4]);
    for i in 2..96 {
        setup.uniforms.set_float(i, [i as f32, 1.0, -1.0, 0.25]);
    }
    assert_equivalent(&setup, &[], "loop");

    // A second shape: count 0 runs the body once, start past the bank end
    // exercises wrapping.
    setup.uniforms.set_int(1, 0, 90, 17);
    assert_equivalent(&setup, &[], "loop count 0");
}

#[test]
fn mad_and_madi_match_interpreter() {
    let program = [
        encode::mad(
            DestRegister::temporary(0),
            SourceRegister::input(0),
            SourceRegister::float_uniform(7),
            SourceRegister::temporary(1),
            0,
        ),
        encode::madi(
            DestRegister::temporary(2),
            SourceRegister::input(0),
            SourceRegister::temporary(1),
            SourceRegister::float_uniform(8),
            0,
        ),
        encode::end(),
    ];
    let mut setup = setup_from(&program, &[encode::swizzle_identity()]);
    setup.uniforms.set_float(7, [0.5, -1.5, 2.5, -3.5]);
    setup.uniforms.set_float(8, [4.0, 3.0, 2.0, 1.0]);
    assert_equivalent(&setup, &[[1.0, 2.0, -3.0, 0.25]], "mad/madi");
}

#[test]
fn full_pipeline_matches_between_cores() {
    let program = [
        encode::common(
            OpCode::Dp4,
            DestRegister::temporary(0),
            SourceRegister::float_uniform(0),
            SourceRegister::input(0),
            0,
            0,
        ),
        mov(DestRegister::temporary(2), SourceRegister::float_uniform(2), 0),
        encode::mad(
            DestRegister::output(0),
            SourceRegister::temporary(0),
            SourceRegister::float_uniform(1),
            SourceRegister::temporary(2),
            0,
        ),
        mov(DestRegister::output(1), SourceRegister::input(1), 0),
        encode::end(),
    ];
    let mut setup = setup_from(&program, &[encode::swizzle_identity()]);
    setup.uniforms.set_float(0, [0.5, -1.25, 2.0, 0.125]);
    setup.uniforms.set_float(1, [3.0, -0.5, 1.5, 2.0]);
    setup.uniforms.set_float(2, [0.25, 0.5, -4.0, 1.0]);
    map_output(&mut setup, 0, semantic::POSITION_X);
    map_output(&mut setup, 1, semantic::COLOR_R);

    let input = input_with(&[[1.0, 2.0, -3.0, 4.0], [-2.0, 0.5, 0.75, 100.0]]);

    let mut interp_core = core_with_jit(false);
    interp_core.setup(&setup).expect("setup");
    let mut state = UnitState::new();
    let interp_out = interp_core.run(&setup, &mut state, &input, 2);

    let mut jit_core = core_with_jit(true);
    jit_core.setup(&setup).expect("setup");
    let mut state = UnitState::new();
    let jit_out = jit_core.run(&setup, &mut state, &input, 2);

    assert_eq!(interp_out, jit_out);
    // Color saturation applied on both paths.
    assert_eq!(jit_out.color[0].to_f32(), 1.0);
    assert_eq!(jit_out.color[3].to_f32(), 1.0);
}

// --- cache behaviour ---

#[test]
fn repeated_setup_reuses_the_compiled_entrypoint() {
    let setup = setup_from(
        &[
            mov(DestRegister::output(0), SourceRegister::input(0), 0),
            encode::end(),
        ],
        &[encode::swizzle_identity()],
    );
    let mut core = core_with_jit(true);
    core.setup(&setup).expect("first setup");
    let first = core.current_entry_point().map(|f| f as usize);
    core.setup(&setup).expect("second setup");
    let second = core.current_entry_point().map(|f| f as usize);
    assert_eq!(first, second);
    assert_eq!(core.cached_programs(), 1);
}

#[test]
fn mutating_the_program_compiles_a_new_entrypoint() {
    let mut setup = setup_from(
        &[
            mov(DestRegister::output(0), SourceRegister::input(0), 0),
            encode::end(),
        ],
        &[encode::swizzle_identity()],
    );
    let mut core = core_with_jit(true);
    core.setup(&setup).expect("setup");
    let first = core.current_entry_point().map(|f| f as usize);

    setup.program_code[0] = mov(DestRegister::output(0), SourceRegister::input(1), 0);
    core.setup(&setup).expect("setup after mutation");
    let second = core.current_entry_point().map(|f| f as usize);

    assert_ne!(first, second);
    assert_eq!(core.cached_programs(), 2);
}

#[test]
fn shutdown_clears_the_cache_and_recompiles() {
    let setup = setup_from(
        &[
            mov(DestRegister::output(0), SourceRegister::input(0), 0),
            encode::end(),
        ],
        &[encode::swizzle_identity()],
    );
    let mut core = core_with_jit(true);
    core.setup(&setup).expect("setup");
    assert_eq!(core.cached_programs(), 1);

    core.shutdown();
    assert_eq!(core.cached_programs(), 0);
    assert!(core.current_entry_point().is_none());

    core.setup(&setup).expect("setup after shutdown");
    assert_eq!(core.cached_programs(), 1);

    // The recompiled entrypoint still works.
    let mut state = UnitState::new();
    let mut mapped = setup.clone();
    map_output(&mut mapped, 0, semantic::POSITION_X);
    let out = core.run(&mapped, &mut state, &input_with(&[[1.0, 2.0, 3.0, 4.0]]), 1);
    assert_eq!(out.pos[0].to_f32(), 1.0);
}

#[test]
fn backwards_control_flow_is_rejected_at_compile_time() {
    let backwards_jmp = setup_from(
        &[
            encode::nop(),
            encode::flow_cond(OpCode::Jmpc, 0, 0, FlowCondition::JustX, true, false),
            encode::end(),
        ],
        &[encode::swizzle_identity()],
    );
    let mut core = core_with_jit(true);
    assert!(matches!(
        core.setup(&backwards_jmp),
        Err(CompileError::BackwardsBranch { op: "jmp", .. })
    ));

    let nested_loop = {
        let mut setup = setup_from(
            &[
                encode::loop_int(0, 2),
                encode::loop_int(1, 2),
                encode::nop(),
                encode::end(),
            ],
            &[encode::swizzle_identity()],
        );
        setup.uniforms.set_int(0, 1, 0, 1);
        setup.uniforms.set_int(1, 1, 0, 1);
        setup
    };
    assert!(matches!(
        core.setup(&nested_loop),
        Err(CompileError::NestedLoop { .. })
    ));
}

#[test]
fn recursive_call_inlining_is_rejected_at_compile_time() {
    // A range that calls back into itself can never finish inlining.
    let recursive = setup_from(
        &[encode::call(0, 1), encode::end()],
        &[encode::swizzle_identity()],
    );
    let mut core = core_with_jit(true);
    assert!(matches!(
        core.setup(&recursive),
        Err(CompileError::RecursionLimit { target: 0, .. })
    ));

    // Mutual recursion through an intermediate range is caught the same way.
    let mutual = setup_from(
        &[
            encode::call(3, 1),
            encode::end(),
            encode::nop(),
            encode::call(4, 1),
            encode::call(3, 1),
        ],
        &[encode::swizzle_identity()],
    );
    assert!(matches!(
        core.setup(&mutual),
        Err(CompileError::RecursionLimit { .. })
    ));
}

#[test]
fn jit_disabled_core_never_installs_an_entrypoint() {
    let setup = setup_from(
        &[
            mov(DestRegister::output(0), SourceRegister::input(0), 0),
            encode::end(),
        ],
        &[encode::swizzle_identity()],
    );
    let mut core = core_with_jit(false);
    core.setup(&setup).expect("setup");
    assert!(core.current_entry_point().is_none());
}
