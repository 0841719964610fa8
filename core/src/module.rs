/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Destination module for Skiff code generation.
 *
 * `ModuleBuilder` owns the WebAssembly section state while a module is
 * being generated: the deduplicated type table, the host import table, the
 * declared functions and their bodies, and any debug custom sections.
 * `finish()` assembles the final binary via `wasm-encoder`.
 *
 * The function index space is imports first, then declared functions, so
 * absolute indices of declared functions are only stable once no further
 * imports will be added. The generator guarantees that by completing the
 * declaration pass before any user body is built.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write as _;
use thiserror::Error;
use wasm_encoder::{
    CodeSection, CustomSection, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    ImportSection, Instruction, MemorySection, MemoryType, Module, NameSection, TypeSection,
    ValType,
};

/// Linear memory limits for generated modules, in 64 KiB pages. The first
/// pages hold per-call execution context blocks; the rest is scratch for
/// translated code.
const MEMORY_MIN_PAGES: u64 = 1;
const MEMORY_MAX_PAGES: u64 = 16;

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("function '{0}' was declared but never given a body")]
    MissingBody(String),
}

/// Handle to one declared function. Cheap to copy; only meaningful for the
/// builder that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncDecl {
    /// Position within the declared (non-import) function table.
    pub(crate) defined_index: u32,
    /// Type-section index of the declaration's signature.
    pub type_index: u32,
}

/// One function body in the backend's form: extra locals plus the
/// instruction sequence, including the closing `end`.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub locals: Vec<(u32, ValType)>,
    pub instructions: Vec<Instruction<'static>>,
}

impl FunctionBody {
    /// The trivial body: performs no work and returns immediately.
    pub fn empty() -> Self {
        Self {
            locals: Vec::new(),
            instructions: vec![Instruction::End],
        }
    }
}

struct ImportEntry {
    module: String,
    field: String,
    type_index: u32,
}

struct FuncEntry {
    name: String,
    type_index: u32,
    body: Option<FunctionBody>,
}

/// Builder for one generated module. Owned by the caller of the generator;
/// the generator only populates it.
pub struct ModuleBuilder {
    name: String,
    source_path: String,
    types: Vec<(Vec<ValType>, Vec<ValType>)>,
    imports: Vec<ImportEntry>,
    import_index: HashMap<(String, String), u32>,
    funcs: Vec<FuncEntry>,
    func_index: HashMap<String, u32>,
    custom_sections: Vec<(String, Vec<u8>)>,
    name_section: Option<NameSection>,
}

impl ModuleBuilder {
    pub fn new(name: &str, source_path: &str) -> Self {
        Self {
            name: name.to_string(),
            source_path: source_path.to_string(),
            types: Vec::new(),
            imports: Vec::new(),
            import_index: HashMap::new(),
            funcs: Vec::new(),
            func_index: HashMap::new(),
            custom_sections: Vec::new(),
            name_section: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    /// Index of the given signature in the type section, creating it on
    /// first use. The type table stays tiny (one shared entry per ABI), so
    /// a linear scan is fine.
    pub fn type_index(&mut self, params: &[ValType], results: &[ValType]) -> u32 {
        for (i, (p, r)) in self.types.iter().enumerate() {
            if p == params && r == results {
                return i as u32;
            }
        }
        self.types.push((params.to_vec(), results.to_vec()));
        (self.types.len() - 1) as u32
    }

    /// Register a host import, returning its absolute function index.
    /// Idempotent per (module, field); import indices never shift because
    /// imports always precede declared functions in the index space.
    pub fn declare_host_import(&mut self, module: &str, field: &str, type_index: u32) -> u32 {
        let key = (module.to_string(), field.to_string());
        if let Some(&index) = self.import_index.get(&key) {
            return index;
        }
        let index = self.imports.len() as u32;
        self.imports.push(ImportEntry {
            module: module.to_string(),
            field: field.to_string(),
            type_index,
        });
        self.import_index.insert(key, index);
        index
    }

    /// Declare a function, or return the existing declaration if the name
    /// is already present (lookup-or-create).
    pub fn declare_function(&mut self, name: &str, type_index: u32) -> FuncDecl {
        if let Some(&defined_index) = self.func_index.get(name) {
            let existing = &self.funcs[defined_index as usize];
            debug_assert_eq!(
                existing.type_index, type_index,
                "redeclaration of '{name}' with a different signature"
            );
            return FuncDecl {
                defined_index,
                type_index: existing.type_index,
            };
        }
        let defined_index = self.funcs.len() as u32;
        self.funcs.push(FuncEntry {
            name: name.to_string(),
            type_index,
            body: None,
        });
        self.func_index.insert(name.to_string(), defined_index);
        FuncDecl {
            defined_index,
            type_index,
        }
    }

    pub fn lookup_function(&self, name: &str) -> Option<FuncDecl> {
        self.func_index.get(name).map(|&defined_index| FuncDecl {
            defined_index,
            type_index: self.funcs[defined_index as usize].type_index,
        })
    }

    pub fn attach_body(&mut self, decl: FuncDecl, body: FunctionBody) {
        self.funcs[decl.defined_index as usize].body = Some(body);
    }

    pub fn has_body(&self, decl: FuncDecl) -> bool {
        self.funcs[decl.defined_index as usize].body.is_some()
    }

    pub fn import_count(&self) -> u32 {
        self.imports.len() as u32
    }

    pub fn defined_count(&self) -> u32 {
        self.funcs.len() as u32
    }

    /// Total size of the function index space (imports + declared).
    pub fn function_count(&self) -> u32 {
        self.import_count() + self.defined_count()
    }

    /// Absolute index of a declared function. Stable once the declaration
    /// pass is complete.
    pub fn function_index(&self, decl: FuncDecl) -> u32 {
        self.import_count() + decl.defined_index
    }

    /// Signature type index of any function in the index space.
    pub fn type_of_function(&self, absolute_index: u32) -> Option<u32> {
        let imports = self.import_count();
        if absolute_index < imports {
            Some(self.imports[absolute_index as usize].type_index)
        } else {
            self.funcs
                .get((absolute_index - imports) as usize)
                .map(|f| f.type_index)
        }
    }

    pub fn func_type(&self, type_index: u32) -> (&[ValType], &[ValType]) {
        let (params, results) = &self.types[type_index as usize];
        (params, results)
    }

    /// (module, field) pairs of the import table, in index order.
    pub fn import_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.imports
            .iter()
            .map(|e| (e.module.as_str(), e.field.as_str()))
    }

    /// Names of declared functions, in defined-index order.
    pub fn declared_names(&self) -> impl Iterator<Item = &str> {
        self.funcs.iter().map(|f| f.name.as_str())
    }

    pub fn add_custom_section(&mut self, name: &str, data: Vec<u8>) {
        self.custom_sections.push((name.to_string(), data));
    }

    pub fn set_name_section(&mut self, section: NameSection) {
        self.name_section = Some(section);
    }

    /// Deterministic text listing of the index space, for diagnostics.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "module {} ({})", self.name, self.source_path);
        for (i, e) in self.imports.iter().enumerate() {
            let _ = writeln!(out, "import {} {}::{}", i, e.module, e.field);
        }
        for (i, f) in self.funcs.iter().enumerate() {
            let state = if f.body.is_some() { "body" } else { "pending" };
            let _ = writeln!(
                out,
                "func {} {} [{}]",
                self.import_count() as usize + i,
                f.name,
                state
            );
        }
        out
    }

    /// Assemble the final binary. Fails if any declared function never
    /// received a body; a body-less declaration cannot be encoded.
    pub fn finish(self) -> Result<Vec<u8>, ModuleError> {
        let mut module = Module::new();

        // --- Type Section ---
        let mut types = TypeSection::new();
        for (params, results) in &self.types {
            types.ty().function(params.clone(), results.clone());
        }
        module.section(&types);

        // --- Import Section ---
        if !self.imports.is_empty() {
            let mut imports = ImportSection::new();
            for e in &self.imports {
                imports.import(&e.module, &e.field, EntityType::Function(e.type_index));
            }
            module.section(&imports);
        }

        // --- Function Section ---
        let mut functions = FunctionSection::new();
        for f in &self.funcs {
            functions.function(f.type_index);
        }
        module.section(&functions);

        // --- Memory Section ---
        let mut memories = MemorySection::new();
        memories.memory(MemoryType {
            minimum: MEMORY_MIN_PAGES,
            maximum: Some(MEMORY_MAX_PAGES),
            memory64: false,
            shared: false,
            page_size_log2: None,
        });
        module.section(&memories);

        // --- Export Section ---
        // Memory plus every declared function by name, so the host runtime
        // can reach any generated function directly.
        let mut exports = ExportSection::new();
        exports.export("memory", ExportKind::Memory, 0);
        for (i, f) in self.funcs.iter().enumerate() {
            exports.export(&f.name, ExportKind::Func, self.imports.len() as u32 + i as u32);
        }
        module.section(&exports);

        // --- Code Section ---
        let mut codes = CodeSection::new();
        for f in &self.funcs {
            let body = f
                .body
                .as_ref()
                .ok_or_else(|| ModuleError::MissingBody(f.name.clone()))?;
            let mut func = Function::new(body.locals.iter().copied());
            for instr in &body.instructions {
                func.instruction(instr);
            }
            codes.function(&func);
        }
        module.section(&codes);

        // --- Debug custom sections ---
        for (name, data) in &self.custom_sections {
            module.section(&CustomSection {
                name: Cow::Borrowed(name.as_str()),
                data: Cow::Borrowed(data.as_slice()),
            });
        }
        if let Some(names) = &self.name_section {
            module.section(names);
        }

        Ok(module.finish())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ABI: (&[ValType], &[ValType]) = (&[ValType::I32], &[]);

    fn builder() -> ModuleBuilder {
        ModuleBuilder::new("xex", "/guest/default.xex")
    }

    #[test]
    fn test_declare_is_lookup_or_create() {
        let mut m = builder();
        let ty = m.type_index(ABI.0, ABI.1);
        let a = m.declare_function("sub_1000", ty);
        let b = m.declare_function("sub_1000", ty);
        assert_eq!(a, b, "redeclaration must return the existing handle");
        assert_eq!(m.defined_count(), 1);
        assert_eq!(m.lookup_function("sub_1000"), Some(a));
        assert_eq!(m.lookup_function("sub_2000"), None);
    }

    #[test]
    fn test_type_dedup() {
        let mut m = builder();
        let a = m.type_index(ABI.0, ABI.1);
        let b = m.type_index(ABI.0, ABI.1);
        let c = m.type_index(&[ValType::I64], &[ValType::I64]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_import_precedes_declared_in_index_space() {
        let mut m = builder();
        let ty = m.type_index(ABI.0, ABI.1);
        let host = m.declare_host_import("kernel", "NtClose", ty);
        let host_again = m.declare_host_import("kernel", "NtClose", ty);
        let decl = m.declare_function("NtClose", ty);

        assert_eq!(host, 0);
        assert_eq!(host, host_again, "import registration is idempotent");
        assert_eq!(m.function_index(decl), 1);
        assert_eq!(m.type_of_function(0), Some(ty));
        assert_eq!(m.type_of_function(1), Some(ty));
        assert_eq!(m.type_of_function(2), None);
    }

    #[test]
    fn test_finish_requires_bodies() {
        let mut m = builder();
        let ty = m.type_index(ABI.0, ABI.1);
        m.declare_function("sub_1000", ty);

        let err = m.finish().unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"function 'sub_1000' was declared but never given a body"
        );
    }

    #[test]
    fn test_finish_emits_valid_module() {
        let mut m = builder();
        let ty = m.type_index(ABI.0, ABI.1);
        let decl = m.declare_function("sub_1000", ty);
        m.attach_body(decl, FunctionBody::empty());

        let bytes = m.finish().expect("finish failed");
        assert_eq!(&bytes[0..4], b"\0asm", "invalid WASM magic number");
        wasmparser::Validator::new()
            .validate_all(&bytes)
            .expect("module failed validation");
    }

    #[test]
    fn test_describe_listing() {
        let mut m = builder();
        let ty = m.type_index(ABI.0, ABI.1);
        m.declare_host_import("kernel", "NtClose", ty);
        let decl = m.declare_function("sub_1000", ty);
        m.attach_body(decl, FunctionBody::empty());
        m.declare_function("sub_2000", ty);

        let expected = "module xex (/guest/default.xex)\n\
                        import 0 kernel::NtClose\n\
                        func 1 sub_1000 [body]\n\
                        func 2 sub_2000 [pending]\n";
        assert_eq!(m.describe(), expected);
    }
}
