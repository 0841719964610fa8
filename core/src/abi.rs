/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * The uniform calling convention for generated code.
 *
 * Every function Skiff emits (translated guest functions, import stubs,
 * import thunks, and the kernel host imports they bridge to) shares one
 * signature: a single opaque pointer to the per-call execution context
 * ("state"), no results. The convention is fixed ahead of translation so
 * generated calls between functions are binary-compatible with no
 * per-call-site adaptation; in the WebAssembly backend it is realized as
 * one shared type-section entry that every declaration references.
 *
 * Two guarantees ride on the convention and are relied upon downstream:
 * the state pointer is non-aliasing (no two live context blocks overlap),
 * and generated bodies never unwind (translated code contains no
 * exception-style control flow).
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::module::{FuncDecl, ModuleBuilder};
use wasm_encoder::ValType;

/// Import module name under which kernel host routines are linked.
pub const KERNEL_MODULE: &str = "kernel";

/// The single parameter: a linear-memory address of the execution context.
const ABI_PARAMS: [ValType; 1] = [ValType::I32];
const ABI_RESULTS: [ValType; 0] = [];

/// Type-section index of the module-wide signature, created on first use.
pub fn abi_type_index(module: &mut ModuleBuilder) -> u32 {
    module.type_index(&ABI_PARAMS, &ABI_RESULTS)
}

/// Declare a function with the uniform signature. Declaring a name already
/// present returns the existing declaration (lookup-or-create).
pub fn declare_function(module: &mut ModuleBuilder, name: &str) -> FuncDecl {
    let type_index = abi_type_index(module);
    module.declare_function(name, type_index)
}

/// Register a kernel host import carrying the uniform signature, returning
/// its absolute function index.
pub fn declare_kernel_import(module: &mut ModuleBuilder, name: &str) -> u32 {
    let type_index = abi_type_index(module);
    module.declare_host_import(KERNEL_MODULE, name, type_index)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_opaque_parameter() {
        let mut m = ModuleBuilder::new("xex", "/guest/default.xex");
        let decl = declare_function(&mut m, "sub_1000");
        let (params, results) = m.func_type(decl.type_index);
        assert_eq!(params, [ValType::I32], "exactly one state pointer");
        assert!(results.is_empty(), "no return value");
    }

    #[test]
    fn test_all_declarations_share_one_type() {
        let mut m = ModuleBuilder::new("xex", "/guest/default.xex");
        let a = declare_function(&mut m, "sub_1000");
        let b = declare_function(&mut m, "sub_2000");
        let host = declare_kernel_import(&mut m, "NtClose");

        assert_eq!(a.type_index, b.type_index);
        assert_eq!(m.type_of_function(host), Some(a.type_index));
    }

    #[test]
    fn test_declare_idempotent_across_paths() {
        let mut m = ModuleBuilder::new("xex", "/guest/default.xex");
        let a = declare_function(&mut m, "sub_1000");
        let b = declare_function(&mut m, "sub_1000");
        assert_eq!(a, b);
        assert_eq!(m.defined_count(), 1);
    }
}
