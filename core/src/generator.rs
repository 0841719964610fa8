/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Whole-module code generation orchestrator.
 *
 * Drives two passes over the symbol catalog. The declaration pass creates
 * a uniform-ABI declaration for every user function (recorded in the
 * function registry) and fully resolves every kernel import into a stub or
 * thunk. Only once every declaration exists does the build pass hand each
 * registered function to the body translator: a body may forward-reference
 * any declaration in the module, so the barrier between the passes is
 * load-bearing. The debug-info compile unit is opened before the first
 * pass and finalized exactly once after the last body.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::abi;
use crate::debug_info::DebugInfoEmitter;
use crate::imports;
use crate::memory::MemoryImage;
use crate::module::{FuncDecl, FunctionBody, ModuleBuilder};
use crate::options::CodegenOptions;
use crate::pipeline::OptimizationPipeline;
use crate::symbols::{CatalogError, ExportResolver, FunctionKind, FunctionSymbol, SymbolCatalog};
use crate::translate::{FunctionBodyTranslator, TranslateError, TranslateRequest};
use crate::verify::VerifyError;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("symbol catalog unavailable: {0}")]
    Catalog(#[from] CatalogError),
    #[error("verification of '{name}' at {address:#010x} failed: {source}")]
    Verification {
        address: u32,
        name: String,
        source: VerifyError,
    },
}

/// One user function's generation record: the symbol paired with its
/// declaration handle and declaration type.
#[derive(Debug)]
pub struct CodegenFunction {
    pub symbol: Arc<FunctionSymbol>,
    pub decl: FuncDecl,
    /// False when the translator failed and the safe stub was substituted.
    pub translated: bool,
}

/// Record of a body the translator could not produce. The function still
/// exists in the module with the no-op stub body.
#[derive(Debug)]
pub struct TranslationFailure {
    pub address: u32,
    pub name: String,
    pub reason: TranslateError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    DebugInfoOpen,
    Declared,
    Built,
    Finalized,
}

/// The only component the rest of the emulator talks to for code
/// generation. Borrows its collaborators for the duration of the run;
/// holds its own reference on the memory image so the image outlives
/// generation regardless of what the caller does with theirs.
pub struct ModuleGenerator<'a> {
    memory: Arc<MemoryImage>,
    catalog: &'a dyn SymbolCatalog,
    resolver: &'a ExportResolver,
    translator: &'a mut dyn FunctionBodyTranslator,
    module: &'a mut ModuleBuilder,
    pipeline: OptimizationPipeline,
    registry: BTreeMap<u32, CodegenFunction>,
    failures: Vec<TranslationFailure>,
    phase: Phase,
}

impl<'a> ModuleGenerator<'a> {
    pub fn new(
        memory: Arc<MemoryImage>,
        catalog: &'a dyn SymbolCatalog,
        resolver: &'a ExportResolver,
        translator: &'a mut dyn FunctionBodyTranslator,
        module: &'a mut ModuleBuilder,
        options: CodegenOptions,
    ) -> Self {
        Self {
            memory,
            catalog,
            resolver,
            translator,
            module,
            pipeline: OptimizationPipeline::new(options),
            registry: BTreeMap::new(),
            failures: Vec::new(),
            phase: Phase::Uninitialized,
        }
    }

    /// Generate the whole module.
    ///
    /// On `Err` the caller must discard the module: a catalog failure
    /// leaves it unpopulated, a verification failure means a defective
    /// translator or import builder was caught before a corrupt body could
    /// be attached.
    pub fn generate(&mut self) -> Result<(), GenerateError> {
        assert_eq!(
            self.phase,
            Phase::Uninitialized,
            "generate() runs once per generator"
        );

        let debug = DebugInfoEmitter::open(self.module.name(), self.module.source_path());
        self.phase = Phase::DebugInfoOpen;

        self.declare_all()?;
        self.phase = Phase::Declared;

        self.build_all()?;
        self.phase = Phase::Built;

        debug.finalize(self.module);
        self.phase = Phase::Finalized;
        Ok(())
    }

    /// The record generated for a user function, if `address` was one.
    /// Kernel-import addresses and dropped duplicates were never
    /// registered and return `None`.
    pub fn lookup_generated(&self, address: u32) -> Option<&CodegenFunction> {
        self.registry.get(&address)
    }

    pub fn translation_failures(&self) -> &[TranslationFailure] {
        &self.failures
    }

    pub fn generated_count(&self) -> usize {
        self.registry.len()
    }

    /// Declaration pass. Must complete for all symbols before any body is
    /// built: declarations are the stable targets for forward references.
    fn declare_all(&mut self) -> Result<(), GenerateError> {
        let functions = self.catalog.functions()?;
        log::debug!(
            "declaring {} functions for module '{}'",
            functions.len(),
            self.module.name()
        );

        for symbol in functions {
            match symbol.kind {
                FunctionKind::User => self.prepare_function(symbol),
                FunctionKind::KernelImport => {
                    let address = symbol.start_address;
                    let name = symbol.name.clone();
                    self.add_import(&symbol)
                        .map_err(|source| GenerateError::Verification {
                            address,
                            name,
                            source,
                        })?;
                }
                // The catalog contract forbids unclassified symbols here;
                // seeing one is a defect in the catalog, not guest data.
                FunctionKind::Unknown => panic!(
                    "symbol catalog produced an unclassified function {:#010x} ({})",
                    symbol.start_address, symbol.name
                ),
            }
        }
        Ok(())
    }

    /// Declare one user function, first write wins per start address. The
    /// duplicate is dropped before any module declaration is made, so no
    /// body-less function can leak into the output.
    fn prepare_function(&mut self, symbol: Arc<FunctionSymbol>) {
        match self.registry.entry(symbol.start_address) {
            Entry::Occupied(existing) => {
                log::debug!(
                    "dropping duplicate symbol {} at {:#010x} (kept {})",
                    symbol.name,
                    symbol.start_address,
                    existing.get().symbol.name
                );
            }
            Entry::Vacant(slot) => {
                let decl = abi::declare_function(self.module, &symbol.name);
                slot.insert(CodegenFunction {
                    symbol,
                    decl,
                    translated: false,
                });
            }
        }
    }

    /// Resolve one kernel import into a thunk (implemented export) or a
    /// stub (missing export, or unresolvable ordinal). Never touches the
    /// registry.
    fn add_import(&mut self, symbol: &FunctionSymbol) -> Result<(), VerifyError> {
        let export = symbol
            .ordinal
            .and_then(|ordinal| self.resolver.resolve(ordinal));
        match export {
            Some(export) if export.is_implemented() => {
                imports::add_present_import(self.module, &self.pipeline, symbol, export)
            }
            _ => imports::add_missing_import(self.module, &self.pipeline, symbol),
        }
    }

    /// Build pass over the registry in guest-address order. Each build is
    /// independent of every other once all declarations exist.
    fn build_all(&mut self) -> Result<(), GenerateError> {
        for (address, cgf) in self.registry.iter_mut() {
            log::debug!("building {} at {address:#010x}", cgf.symbol.name);

            let request = TranslateRequest {
                image: &self.memory,
                catalog: self.catalog,
                symbol: &cgf.symbol,
                module: &mut *self.module,
                decl: cgf.decl,
            };
            let mut body = match self.translator.translate(request) {
                Ok(body) => {
                    cgf.translated = true;
                    body
                }
                Err(reason) => {
                    log::warn!(
                        "translation of {} at {address:#010x} failed, substituting stub: {reason}",
                        cgf.symbol.name
                    );
                    self.failures.push(TranslationFailure {
                        address: *address,
                        name: cgf.symbol.name.clone(),
                        reason,
                    });
                    FunctionBody::empty()
                }
            };

            self.pipeline
                .run(&*self.module, cgf.decl, &mut body)
                .map_err(|source| GenerateError::Verification {
                    address: *address,
                    name: cgf.symbol.name.clone(),
                    source,
                })?;
            self.module.attach_body(cgf.decl, body);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
