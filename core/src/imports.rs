/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Kernel import materialization.
 *
 * Every kernel-import symbol the guest can call resolves to a real
 * function in the generated module, whether or not the host implements
 * the export:
 *
 *   - missing export: a stub whose body performs no work and returns
 *     immediately, so a guest call lands on a safe no-op instead of
 *     undefined behavior;
 *   - implemented export: a thunk that bridges to the host routine. The
 *     host routine is imported under the export's name with the same
 *     uniform signature, and the thunk forwards the execution-context
 *     pointer unchanged. Guest argument state lives in the context block,
 *     so passing the pointer is the argument transfer.
 *
 * Neither path registers anything with the function registry; kernel
 * imports are fully resolved here, during the declaration pass.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::abi;
use crate::module::{FunctionBody, ModuleBuilder};
use crate::pipeline::OptimizationPipeline;
use crate::symbols::{FunctionSymbol, KernelExport};
use crate::verify::VerifyError;
use wasm_encoder::Instruction;

/// Materialize a stub for an import with no host implementation.
pub fn add_missing_import(
    module: &mut ModuleBuilder,
    pipeline: &OptimizationPipeline,
    symbol: &FunctionSymbol,
) -> Result<(), VerifyError> {
    let decl = abi::declare_function(module, &symbol.name);
    let mut body = FunctionBody::empty();
    pipeline.run(module, decl, &mut body)?;
    module.attach_body(decl, body);
    Ok(())
}

/// Materialize a thunk bridging to an implemented host export.
pub fn add_present_import(
    module: &mut ModuleBuilder,
    pipeline: &OptimizationPipeline,
    symbol: &FunctionSymbol,
    export: &KernelExport,
) -> Result<(), VerifyError> {
    let host = abi::declare_kernel_import(module, &export.name);
    let decl = abi::declare_function(module, &symbol.name);
    let mut body = FunctionBody {
        locals: Vec::new(),
        instructions: vec![Instruction::LocalGet(0), Instruction::Call(host), Instruction::End],
    };
    pipeline.run(module, decl, &mut body)?;
    module.attach_body(decl, body);
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
