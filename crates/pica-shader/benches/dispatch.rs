use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pica_isa::{encode, DestRegister, OpCode, SourceRegister, IDENTITY_SELECTOR};
use pica_shader::{
    semantic, Float24, InputVertex, JitConfig, ShaderConfig, ShaderCore, ShaderSetup, UnitState,
};

/// A typical position transform: four row dot products into `o0` plus a
/// color passthrough.
fn transform_setup() -> ShaderSetup {
    let mut swizzles = vec![encode::swizzle_identity()];
    for component in 0..4 {
        swizzles.push(encode::swizzle(
            8 >> component,
            [IDENTITY_SELECTOR; 3],
            [false; 3],
        ));
    }

    let row = |uniform: usize, desc: usize| {
        encode::common(
            OpCode::Dp4,
            DestRegister::output(0),
            SourceRegister::float_uniform(uniform),
            SourceRegister::input(0),
            0,
            desc,
        )
    };
    let program = [
        row(0, 1),
        row(1, 2),
        row(2, 3),
        row(3, 4),
        encode::common(
            OpCode::Mov,
            DestRegister::output(1),
            SourceRegister::input(1),
            SourceRegister::temporary(0),
            0,
            0,
        ),
        encode::end(),
    ];

    let mut setup = ShaderSetup::default();
    setup.program_code[..program.len()].copy_from_slice(&program);
    setup.swizzle_data[..swizzles.len()].copy_from_slice(&swizzles);
    for row in 0..4 {
        let mut values = [0.0f32; 4];
        values[row] = 1.0;
        values[3] += 0.5;
        setup.uniforms.set_float(row, values);
    }
    setup.output_register_map[0] = [
        semantic::POSITION_X,
        semantic::POSITION_Y,
        semantic::POSITION_Z,
        semantic::POSITION_W,
    ];
    setup.output_register_map[1] = [
        semantic::COLOR_R,
        semantic::COLOR_G,
        semantic::COLOR_B,
        semantic::COLOR_A,
    ];
    setup
}

fn input_vertex() -> InputVertex {
    let mut input = InputVertex::default();
    input.attr[0] = [1.0, 2.0, 3.0, 1.0].map(Float24::from_f32);
    input.attr[1] = [0.25, 0.5, 0.75, 1.0].map(Float24::from_f32);
    input
}

fn bench_backend(c: &mut Criterion, name: &str, jit_enabled: bool) {
    let setup = transform_setup();
    let input = input_vertex();
    let config = ShaderConfig {
        jit: JitConfig {
            enabled: jit_enabled,
            ..JitConfig::default()
        },
        dump_shaders: false,
    };
    let mut core = ShaderCore::new(config).expect("shader core");
    core.setup(&setup).expect("setup");
    let mut state = UnitState::new();

    c.bench_function(name, |b| {
        b.iter(|| black_box(core.run(&setup, &mut state, black_box(&input), 2)))
    });
}

fn bench_dispatch(c: &mut Criterion) {
    bench_backend(c, "transform/interpreter", false);
    #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
    bench_backend(c, "transform/jit", true);
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
