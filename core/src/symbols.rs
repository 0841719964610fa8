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

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Version tag carried by the symbol database artifact. Bumped whenever the
/// static-analysis stage changes the record layout.
const SYMBOL_DOC_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("symbol database unavailable: {0}")]
    Unavailable(String),
    #[error("symbol database parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("symbol database format v{found} not supported (expected v{expected})")]
    UnsupportedVersion { expected: u32, found: u32 },
}

/// Classification assigned by the static-analysis stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// Discovered code that analysis could not classify. The catalog
    /// contract forbids handing these to code generation.
    Unknown,
    /// A function belonging to the guest program itself.
    User,
    /// A guest-visible reference to host-provided functionality, keyed by
    /// export ordinal.
    KernelImport,
}

/// One guest function as discovered by static analysis.
///
/// The start address is the stable identity for all cross-references; two
/// symbols must not share a start address within one catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSymbol {
    pub start_address: u32,
    pub name: String,
    pub kind: FunctionKind,
    /// Export ordinal; present only for kernel imports.
    #[serde(default)]
    pub ordinal: Option<u32>,
}

/// Descriptor for one host-provided kernel routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelExport {
    pub ordinal: u32,
    pub name: String,
    /// Whether the host actually provides a body for this export. Guests
    /// may reference exports the host has not implemented yet.
    pub implemented: bool,
}

impl KernelExport {
    pub fn is_implemented(&self) -> bool {
        self.implemented
    }
}

/// Maps export ordinals to their host descriptors.
#[derive(Debug, Default)]
pub struct ExportResolver {
    exports: BTreeMap<u32, KernelExport>,
}

impl ExportResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last registration wins for a given ordinal.
    pub fn register(&mut self, export: KernelExport) {
        self.exports.insert(export.ordinal, export);
    }

    pub fn resolve(&self, ordinal: u32) -> Option<&KernelExport> {
        self.exports.get(&ordinal)
    }
}

/// Read access to the discovered function set.
pub trait SymbolCatalog {
    /// Every discovered function, in discovery order. Duplicate start
    /// addresses are passed through; the consumer decides which one wins.
    fn functions(&self) -> Result<Vec<Arc<FunctionSymbol>>, CatalogError>;

    /// The function whose body starts at `address`, if analysis found one.
    fn function_at(&self, address: u32) -> Option<Arc<FunctionSymbol>>;
}

/// In-memory symbol catalog, usually loaded from the JSON artifact written
/// by the static-analysis stage.
#[derive(Debug, Default)]
pub struct SymbolTable {
    functions: Vec<Arc<FunctionSymbol>>,
    by_address: BTreeMap<u32, Arc<FunctionSymbol>>,
}

/// On-disk artifact shape. The version field is the integrity check: a
/// mismatched producer is rejected before any record is trusted.
#[derive(Deserialize)]
struct SymbolDoc {
    version: u32,
    functions: Vec<FunctionSymbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let doc: SymbolDoc = serde_json::from_str(json)?;
        if doc.version != SYMBOL_DOC_VERSION {
            return Err(CatalogError::UnsupportedVersion {
                expected: SYMBOL_DOC_VERSION,
                found: doc.version,
            });
        }
        let mut table = Self::new();
        for symbol in doc.functions {
            table.insert(symbol);
        }
        Ok(table)
    }

    /// Append a symbol in discovery order. The address index keeps the
    /// first symbol seen at a given address.
    pub fn insert(&mut self, symbol: FunctionSymbol) -> Arc<FunctionSymbol> {
        let symbol = Arc::new(symbol);
        self.functions.push(symbol.clone());
        self.by_address
            .entry(symbol.start_address)
            .or_insert_with(|| symbol.clone());
        symbol
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl SymbolCatalog for SymbolTable {
    fn functions(&self) -> Result<Vec<Arc<FunctionSymbol>>, CatalogError> {
        Ok(self.functions.clone())
    }

    fn function_at(&self, address: u32) -> Option<Arc<FunctionSymbol>> {
        self.by_address.get(&address).cloned()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn user(address: u32, name: &str) -> FunctionSymbol {
        FunctionSymbol {
            start_address: address,
            name: name.to_string(),
            kind: FunctionKind::User,
            ordinal: None,
        }
    }

    #[test]
    fn test_from_json_round() {
        let json = r#"{
            "version": 1,
            "functions": [
                { "start_address": 4096, "name": "sub_1000", "kind": "user" },
                { "start_address": 8192, "name": "KeBugCheck", "kind": "kernel_import", "ordinal": 162 }
            ]
        }"#;
        let table = SymbolTable::from_json(json).expect("load failed");
        assert_eq!(table.len(), 2);

        let sym = table.function_at(8192).expect("missing kernel symbol");
        assert_eq!(sym.kind, FunctionKind::KernelImport);
        assert_eq!(sym.ordinal, Some(162));
        assert_eq!(sym.name, "KeBugCheck");
    }

    #[test]
    fn test_from_json_rejects_wrong_version() {
        let json = r#"{ "version": 9, "functions": [] }"#;
        let err = SymbolTable::from_json(json).unwrap_err();
        assert!(
            matches!(err, CatalogError::UnsupportedVersion { found: 9, .. }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_address_index_keeps_first() {
        let mut table = SymbolTable::new();
        table.insert(user(0x1000, "sub_1000"));
        table.insert(user(0x1000, "sub_1000_alias"));

        // Discovery order preserves both, the address index keeps the first.
        assert_eq!(table.len(), 2);
        assert_eq!(table.function_at(0x1000).unwrap().name, "sub_1000");
    }

    #[test]
    fn test_export_resolver_lookup() {
        let mut resolver = ExportResolver::new();
        resolver.register(KernelExport {
            ordinal: 12,
            name: "NtClose".to_string(),
            implemented: true,
        });

        assert!(resolver.resolve(12).unwrap().is_implemented());
        assert!(resolver.resolve(13).is_none());
    }
}
