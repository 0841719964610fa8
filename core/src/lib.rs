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

pub mod abi;
pub mod debug_info;
pub mod generator;
pub mod imports;
pub mod memory;
pub mod module;
pub mod options;
pub mod pipeline;
#[cfg(not(target_arch = "wasm32"))]
pub mod runtime;
pub mod symbols;
pub mod translate;
pub mod verify;

pub use generator::{CodegenFunction, GenerateError, ModuleGenerator, TranslationFailure};
pub use module::ModuleBuilder;
pub use options::CodegenOptions;
