use tracing::trace;

use pica_isa::MAX_PROGRAM_CODE_WORDS;

use crate::error::CompileError;
use crate::f24::Float24;
use crate::interp::run_interpreter;
use crate::setup::ShaderSetup;
use crate::state::{DebugData, InputVertex, OutputVertex, UnitState};

#[cfg(all(target_arch = "x86_64", any(unix, windows)))]
use crate::jit::{program_fingerprint, EntryPoint, JitCompiler, ShaderCache};

/// Precision of the JIT's `RCP`/`RSQ` lowering. What the hardware actually
/// computes is unverified; `Precise` keeps the two back-ends within the
/// documented tolerance, `Approximate` trades that for the raw reciprocal
/// instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitAccuracy {
    #[default]
    Precise,
    Approximate,
}

#[derive(Debug, Clone)]
pub struct JitConfig {
    /// When false (or on hosts without the x86-64 back-end) every vertex
    /// runs through the interpreter.
    pub enabled: bool,
    pub accuracy: JitAccuracy,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            accuracy: JitAccuracy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShaderConfig {
    pub jit: JitConfig,
    /// Emit a `trace!` dump of the executed program after each run.
    pub dump_shaders: bool,
}

/// The vertex-shader execution core: dispatches each vertex to the
/// interpreter or a cached JIT entrypoint and post-processes the output
/// registers into the fixed output-vertex record.
///
/// Lifecycle: construct once, call [`setup`](Self::setup) per program
/// change, [`run`](Self::run) per vertex, [`shutdown`](Self::shutdown) when
/// the emulator session ends.
pub struct ShaderCore {
    config: ShaderConfig,
    #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
    jit: Option<JitCompiler>,
    #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
    cache: ShaderCache,
    #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
    current: Option<EntryPoint>,
}

impl ShaderCore {
    pub fn new(config: ShaderConfig) -> Result<Self, CompileError> {
        #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
        let jit = if config.jit.enabled {
            Some(JitCompiler::new(config.jit.accuracy)?)
        } else {
            None
        };
        Ok(Self {
            config,
            #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
            jit,
            #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
            cache: ShaderCache::new(),
            #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
            current: None,
        })
    }

    pub fn config(&self) -> &ShaderConfig {
        &self.config
    }

    /// Prepares for a batch of runs over `setup`: on a cache miss the
    /// program is compiled and cached under its fingerprint, so repeated
    /// setups of the same program compile at most once.
    pub fn setup(&mut self, setup: &ShaderSetup) -> Result<(), CompileError> {
        #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
        if let Some(jit) = &mut self.jit {
            let fingerprint = program_fingerprint(setup);
            let entry = match self.cache.get(fingerprint) {
                Some(entry) => entry,
                None => {
                    // Drop the previous entrypoint first: if compilation
                    // fails, runs fall back to the interpreter rather than
                    // dispatching a stale program.
                    self.current = None;
                    let entry = jit.compile(setup)?;
                    self.cache.insert(fingerprint, entry);
                    entry
                }
            };
            self.current = Some(entry);
        }
        #[cfg(not(all(target_arch = "x86_64", any(unix, windows))))]
        let _ = setup;
        Ok(())
    }

    /// Executes one vertex and returns the fixed output record.
    pub fn run(
        &mut self,
        setup: &ShaderSetup,
        state: &mut UnitState,
        input: &InputVertex,
        num_attributes: usize,
    ) -> OutputVertex {
        state.program_counter = setup.entry_point;
        state.debug = DebugData::default();
        state.conditional_code = [false; 2];
        state.address_registers = [0; 3];
        state.call_stack.clear();

        for (attr, &reg) in input
            .attr
            .iter()
            .zip(setup.input_register_map.iter())
            .take(num_attributes.min(16))
        {
            state.registers.input[(reg & 0xF) as usize] = attr.map(Float24::to_f32);
        }

        self.dispatch(setup, state);

        if self.config.dump_shaders {
            self.dump(setup, state);
        }

        let mut ret = OutputVertex::default();
        let scalars = ret.as_scalars_mut();
        for (output, map) in state
            .registers
            .output
            .iter()
            .zip(setup.output_register_map.iter())
        {
            for (component, &semantic) in map.iter().enumerate() {
                // SEMANTIC_INVALID (and anything else out of range) leaves
                // the field zero.
                if let Some(slot) = scalars.get_mut(semantic as usize) {
                    *slot = Float24::from_f32(output[component]);
                }
            }
        }

        // The hardware takes the absolute value and saturates vertex colors
        // before interpolation.
        for c in ret.color.iter_mut() {
            *c = Float24::from_f32(c.to_f32().abs().min(1.0));
        }

        trace!(
            pos = ?ret.pos.map(Float24::to_f32),
            color = ?ret.color.map(Float24::to_f32),
            tc0 = ?ret.tc0.map(Float24::to_f32),
            "output vertex"
        );
        ret
    }

    #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
    fn dispatch(&self, setup: &ShaderSetup, state: &mut UnitState) {
        match self.current {
            Some(entry) if self.jit.is_some() => unsafe {
                entry(&mut state.registers, &setup.uniforms)
            },
            _ => run_interpreter(setup, state),
        }
    }

    #[cfg(not(all(target_arch = "x86_64", any(unix, windows))))]
    fn dispatch(&self, setup: &ShaderSetup, state: &mut UnitState) {
        run_interpreter(setup, state);
    }

    /// Drops all compiled code and cache entries. The next `setup`
    /// recompiles from scratch.
    pub fn shutdown(&mut self) {
        #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
        {
            self.current = None;
            self.cache.clear();
            if let Some(jit) = &mut self.jit {
                jit.clear();
            }
        }
    }

    /// The entrypoint `run` would dispatch to, if a compiled one is
    /// installed.
    #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
    pub fn current_entry_point(&self) -> Option<EntryPoint> {
        self.current
    }

    #[cfg(all(target_arch = "x86_64", any(unix, windows)))]
    pub fn cached_programs(&self) -> usize {
        self.cache.len()
    }

    fn dump(&self, setup: &ShaderSetup, state: &UnitState) {
        let words = (state.debug.max_offset as usize)
            .max(setup.entry_point as usize + 1)
            .min(MAX_PROGRAM_CODE_WORDS);
        let descriptors = (state.debug.max_opdesc_id as usize).min(setup.swizzle_data.len());
        trace!(
            entry = setup.entry_point,
            max_offset = state.debug.max_offset,
            max_opdesc_id = state.debug.max_opdesc_id,
            code = ?&setup.program_code[..words],
            swizzles = ?&setup.swizzle_data[..descriptors],
            "shader dump"
        );
    }
}
