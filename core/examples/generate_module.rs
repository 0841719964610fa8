/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Skiff Recompiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! Generate a module from a three-function catalog and run it on the host.

#[cfg(not(target_arch = "wasm32"))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use skiff_core::generator::ModuleGenerator;
    use skiff_core::memory::MemoryImage;
    use skiff_core::module::{FunctionBody, ModuleBuilder};
    use skiff_core::options::CodegenOptions;
    use skiff_core::runtime::ModuleRuntime;
    use skiff_core::symbols::{ExportResolver, KernelExport, SymbolTable};
    use skiff_core::translate::{FunctionBodyTranslator, TranslateError, TranslateRequest};
    use std::sync::Arc;
    use wasm_encoder::{Instruction, MemArg};

    /// Stand-in for the real per-function translator: every user function
    /// stores a counter bump into its execution context.
    struct DemoTranslator;

    impl FunctionBodyTranslator for DemoTranslator {
        fn translate(
            &mut self,
            request: TranslateRequest<'_>,
        ) -> Result<FunctionBody, TranslateError> {
            let marker = request.symbol.start_address as i32;
            Ok(FunctionBody {
                locals: Vec::new(),
                instructions: vec![
                    Instruction::LocalGet(0),
                    Instruction::I32Const(marker),
                    Instruction::I32Store(MemArg {
                        offset: 0,
                        align: 0,
                        memory_index: 0,
                    }),
                    Instruction::End,
                ],
            })
        }
    }

    let catalog = SymbolTable::from_json(
        r#"{
            "version": 1,
            "functions": [
                { "start_address": 4096,  "name": "sub_1000",   "kind": "user" },
                { "start_address": 8192,  "name": "KeBugCheck", "kind": "kernel_import", "ordinal": 162 },
                { "start_address": 12288, "name": "NtClose",    "kind": "kernel_import", "ordinal": 12 }
            ]
        }"#,
    )?;

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

    let image = Arc::new(MemoryImage::new(0x1000, vec![0; 0x4000]));
    let mut module = ModuleBuilder::new("demo", "/guest/demo.xex");
    let mut translator = DemoTranslator;
    let mut generator = ModuleGenerator::new(
        image,
        &catalog,
        &resolver,
        &mut translator,
        &mut module,
        CodegenOptions::default(),
    );
    generator.generate()?;
    drop(generator);

    print!("{}", module.describe());
    let bytes = module.finish()?;
    println!("emitted {} bytes", bytes.len());

    let mut runtime = ModuleRuntime::load(&bytes)?;
    runtime.bind_kernel("NtClose", |state, memory| {
        memory[state as usize] = 1;
    });

    let report = runtime.run("sub_1000", 64)?;
    println!(
        "sub_1000 wrote {:?} at the context base",
        &report.memory[64..68]
    );

    let report = runtime.run("NtClose", 64)?;
    println!("NtClose bridged to host: {:?}", report.kernel_calls);

    let report = runtime.run("KeBugCheck", 64)?;
    println!(
        "KeBugCheck is a safe no-op ({} kernel calls recorded)",
        report.kernel_calls.len()
    );

    Ok(())
}

#[cfg(target_arch = "wasm32")]
fn main() {
    println!("The host runtime bridge is not available on wasm32 targets.");
}
