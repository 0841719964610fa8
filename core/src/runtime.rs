/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Wasmtime execution bridge for generated modules.
 *
 * Instantiates a generated module, links every `kernel` import to a host
 * handler (bound by export name), and invokes generated functions against
 * a caller-chosen execution-context pointer. Kernel imports with no bound
 * handler still link (every call is recorded, handled or not), so a
 * module generated against a partially-implemented export table remains
 * runnable.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::abi;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use wasmtime::{Caller, Engine, Extern, Linker, Module, Store};

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, Clone)]
pub struct RunError {
    pub message: String,
    pub context: String,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.context, self.message)
    }
}

impl std::error::Error for RunError {}

fn run_error(context: &str, message: impl fmt::Display) -> RunError {
    RunError {
        message: message.to_string(),
        context: context.to_string(),
    }
}

// =============================================================================
// Host State
// =============================================================================

/// A kernel handler receives the execution-context pointer and a mutable
/// view of the module's linear memory.
pub type KernelHandler = Arc<dyn Fn(u32, &mut [u8]) + Send + Sync>;

/// Per-run host state: every kernel call is recorded as (export, state).
#[derive(Debug, Clone, Default)]
pub struct HostState {
    pub kernel_calls: Vec<(String, u32)>,
}

/// Result of one invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub kernel_calls: Vec<(String, u32)>,
    /// Snapshot of linear memory after the call returned.
    pub memory: Vec<u8>,
}

// =============================================================================
// Public API
// =============================================================================

pub struct ModuleRuntime {
    engine: Engine,
    module: Module,
    handlers: HashMap<String, KernelHandler>,
}

impl ModuleRuntime {
    pub fn load(bytes: &[u8]) -> Result<Self, RunError> {
        let engine = Engine::default();
        let module = Module::from_binary(&engine, bytes)
            .map_err(|e| run_error("runtime::load", format!("failed to load module: {e}")))?;
        Ok(Self {
            engine,
            module,
            handlers: HashMap::new(),
        })
    }

    /// Bind a host handler for a kernel export. Last binding wins.
    pub fn bind_kernel<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(u32, &mut [u8]) + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Arc::new(handler));
    }

    /// Invoke one generated function by name with the given context
    /// pointer. Each run gets a fresh store, so state does not leak
    /// between invocations.
    pub fn run(&self, entry: &str, state_ptr: u32) -> Result<RunReport, RunError> {
        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        self.link_kernel_imports(&mut linker)?;

        let mut store = Store::new(&self.engine, HostState::default());
        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| run_error("runtime::instantiate", e))?;

        let func = instance
            .get_typed_func::<i32, ()>(&mut store, entry)
            .map_err(|e| run_error("runtime::get_func", format!("no export '{entry}': {e}")))?;
        func.call(&mut store, state_ptr as i32)
            .map_err(|e| run_error("runtime::call", format!("'{entry}' trapped: {e}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| run_error("runtime::memory", "module exports no memory"))?;
        let memory = memory.data(&store).to_vec();

        Ok(RunReport {
            kernel_calls: store.data().kernel_calls.clone(),
            memory,
        })
    }

    fn link_kernel_imports(&self, linker: &mut Linker<HostState>) -> Result<(), RunError> {
        for import in self.module.imports() {
            if import.module() != abi::KERNEL_MODULE {
                continue;
            }
            let name = import.name().to_string();
            let handler = self.handlers.get(&name).cloned();
            let recorded = name.clone();
            linker
                .func_wrap(
                    abi::KERNEL_MODULE,
                    &name,
                    move |mut caller: Caller<'_, HostState>, state: i32| {
                        caller
                            .data_mut()
                            .kernel_calls
                            .push((recorded.clone(), state as u32));
                        if let Some(handler) = &handler {
                            if let Some(Extern::Memory(memory)) = caller.get_export("memory") {
                                handler(state as u32, memory.data_mut(&mut caller));
                            }
                        }
                    },
                )
                .map_err(|e| {
                    run_error("runtime::link", format!("failed to link kernel::{name}: {e}"))
                })?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ModuleGenerator;
    use crate::memory::MemoryImage;
    use crate::module::{FunctionBody, ModuleBuilder};
    use crate::options::CodegenOptions;
    use crate::symbols::{
        ExportResolver, FunctionKind, FunctionSymbol, KernelExport, SymbolTable,
    };
    use crate::translate::{FunctionBodyTranslator, TranslateError, TranslateRequest};
    use wasm_encoder::{Instruction as I, MemArg};

    const STATE_MARKER: i32 = 7;

    /// Writes the marker through the state pointer.
    struct MarkerTranslator;

    impl FunctionBodyTranslator for MarkerTranslator {
        fn translate(
            &mut self,
            _request: TranslateRequest<'_>,
        ) -> Result<FunctionBody, TranslateError> {
            Ok(FunctionBody {
                locals: Vec::new(),
                instructions: vec![
                    I::LocalGet(0),
                    I::I32Const(STATE_MARKER),
                    I::I32Store(MemArg {
                        offset: 0,
                        align: 0,
                        memory_index: 0,
                    }),
                    I::End,
                ],
            })
        }
    }

    fn generate_scenario() -> Vec<u8> {
        let mut catalog = SymbolTable::new();
        catalog.insert(FunctionSymbol {
            start_address: 0x1000,
            name: "sub_1000".to_string(),
            kind: FunctionKind::User,
            ordinal: None,
        });
        catalog.insert(FunctionSymbol {
            start_address: 0x2000,
            name: "KeBugCheck".to_string(),
            kind: FunctionKind::KernelImport,
            ordinal: Some(162),
        });
        catalog.insert(FunctionSymbol {
            start_address: 0x3000,
            name: "NtClose".to_string(),
            kind: FunctionKind::KernelImport,
            ordinal: Some(12),
        });

        let mut resolver = ExportResolver::new();
        resolver.register(KernelExport {
            ordinal: 162,
            name: "KeBugCheck".to_string(),
            implemented: false,
        });
        resolver.register(KernelExport {
            ordinal: 12,
            name: "NtClose".to_string(),
            implemented: true,
        });

        let memory = Arc::new(MemoryImage::new(0x1000, vec![0; 0x4000]));
        let mut module = ModuleBuilder::new("xex", "/guest/default.xex");
        let mut translator = MarkerTranslator;
        let mut generator = ModuleGenerator::new(
            memory,
            &catalog,
            &resolver,
            &mut translator,
            &mut module,
            CodegenOptions::default(),
        );
        generator.generate().expect("generate failed");
        drop(generator);
        module.finish().expect("finish failed")
    }

    #[test]
    fn test_stub_invocation_has_no_effect() {
        let bytes = generate_scenario();
        let runtime = ModuleRuntime::load(&bytes).expect("load failed");

        let report = runtime.run("KeBugCheck", 64).expect("run failed");
        assert!(report.kernel_calls.is_empty(), "a stub bridges to nothing");
        assert!(
            report.memory.iter().all(|&b| b == 0),
            "a stub must not touch memory"
        );
    }

    #[test]
    fn test_thunk_reaches_bound_handler() {
        let bytes = generate_scenario();
        let mut runtime = ModuleRuntime::load(&bytes).expect("load failed");
        runtime.bind_kernel("NtClose", |state, memory| {
            memory[state as usize] = 0xab;
        });

        let report = runtime.run("NtClose", 128).expect("run failed");
        assert_eq!(report.kernel_calls, vec![("NtClose".to_string(), 128)]);
        assert_eq!(report.memory[128], 0xab, "handler writes through the context");
    }

    #[test]
    fn test_thunk_without_handler_is_recorded() {
        let bytes = generate_scenario();
        let runtime = ModuleRuntime::load(&bytes).expect("load failed");

        let report = runtime.run("NtClose", 96).expect("run failed");
        assert_eq!(report.kernel_calls, vec![("NtClose".to_string(), 96)]);
    }

    #[test]
    fn test_user_function_writes_state() {
        let bytes = generate_scenario();
        let runtime = ModuleRuntime::load(&bytes).expect("load failed");

        let report = runtime.run("sub_1000", 64).expect("run failed");
        assert_eq!(
            &report.memory[64..68],
            &(STATE_MARKER as u32).to_le_bytes(),
            "marker must land at the context base"
        );
        assert!(report.kernel_calls.is_empty());
    }
}
