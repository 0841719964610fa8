/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * The seam between module orchestration and per-function translation.
 *
 * The function body translator is a peer component: it decodes one guest
 * function's instructions out of the memory image and produces the body
 * for an already-declared function. The generator never looks inside a
 * body; it only runs the result through the optimization pipeline and
 * attaches it.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::memory::{MemoryError, MemoryImage};
use crate::module::{FuncDecl, FunctionBody, ModuleBuilder};
use crate::symbols::{FunctionSymbol, SymbolCatalog};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("unsupported guest construct at {address:#010x}: {detail}")]
    Unsupported { address: u32, detail: String },
    #[error("guest memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// Everything a translator may consult while building one body.
///
/// All declarations already exist when a request is issued, so the
/// translator may resolve a call to any function in the catalog (including
/// ones declared after the current symbol) via
/// `catalog.function_at(..)` + `module.lookup_function(..)`.
pub struct TranslateRequest<'a> {
    pub image: &'a MemoryImage,
    pub catalog: &'a dyn SymbolCatalog,
    pub symbol: &'a FunctionSymbol,
    pub module: &'a mut ModuleBuilder,
    /// The function's own declaration.
    pub decl: FuncDecl,
}

/// Fills in a declared function's body from guest instructions.
pub trait FunctionBodyTranslator {
    fn translate(&mut self, request: TranslateRequest<'_>) -> Result<FunctionBody, TranslateError>;
}
