/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Debug information for generated modules.
 *
 * One compile-unit descriptor per module, opened before the declaration
 * pass and finalized exactly once after every body is in place. The
 * descriptor lands in a `skiff.unit` custom section (JSON payload); the
 * standard `name` section carries the module and per-function names so
 * host-side tooling can symbolize traps.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::module::ModuleBuilder;
use serde::Serialize;
use wasm_encoder::{NameMap, NameSection};

/// Custom-section name of the compile-unit descriptor.
pub const COMPILE_UNIT_SECTION: &str = "skiff.unit";

const PRODUCER: &str = "skiff";

#[derive(Serialize)]
struct CompileUnit<'a> {
    producer: &'a str,
    module: &'a str,
    source_dir: &'a str,
    functions: u32,
}

/// Per-module debug-info builder.
///
/// `finalize` consumes the emitter, so a descriptor cannot be finalized
/// twice; dropping an emitter without finalizing leaves the module without
/// debug sections, which is the caller's failure to complete generation.
pub struct DebugInfoEmitter {
    module_name: String,
    source_dir: String,
}

impl DebugInfoEmitter {
    /// Open the compile unit for a module. The directory component of the
    /// source path scopes the unit, mirroring where the guest binary came
    /// from.
    pub fn open(module_name: &str, source_path: &str) -> Self {
        let source_dir = match source_path.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        };
        Self {
            module_name: module_name.to_string(),
            source_dir,
        }
    }

    /// Write the name section and the compile-unit descriptor into the
    /// module. Consumes the emitter: a unit is finalized exactly once.
    pub fn finalize(self, module: &mut ModuleBuilder) {
        let mut names = NameSection::new();
        names.module(&self.module_name);

        let mut functions = NameMap::new();
        let imports: Vec<String> = module
            .import_entries()
            .map(|(_, field)| field.to_string())
            .collect();
        let declared: Vec<String> = module.declared_names().map(str::to_string).collect();
        for (i, field) in imports.iter().enumerate() {
            functions.append(i as u32, field);
        }
        for (i, name) in declared.iter().enumerate() {
            functions.append(imports.len() as u32 + i as u32, name);
        }
        names.functions(&functions);

        let unit = CompileUnit {
            producer: PRODUCER,
            module: &self.module_name,
            source_dir: &self.source_dir,
            functions: module.function_count(),
        };
        let payload = serde_json::to_vec(&unit).expect("compile unit serialization is infallible");

        module.add_custom_section(COMPILE_UNIT_SECTION, payload);
        module.set_name_section(names);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi;
    use crate::module::{FunctionBody, ModuleBuilder};
    use wasmparser::{Parser, Payload};

    #[test]
    fn test_source_dir_derivation() {
        let emitter = DebugInfoEmitter::open("xex", "/guest/media/default.xex");
        assert_eq!(emitter.source_dir, "/guest/media");

        let bare = DebugInfoEmitter::open("xex", "default.xex");
        assert_eq!(bare.source_dir, "");
    }

    #[test]
    fn test_finalize_emits_unit_and_names() {
        let mut m = ModuleBuilder::new("xex", "/guest/default.xex");
        abi::declare_kernel_import(&mut m, "NtClose");
        let decl = abi::declare_function(&mut m, "sub_1000");
        m.attach_body(decl, FunctionBody::empty());

        DebugInfoEmitter::open(m.name(), m.source_path()).finalize(&mut m);
        let bytes = m.finish().expect("finish failed");
        wasmparser::Validator::new()
            .validate_all(&bytes)
            .expect("module failed validation");

        let mut unit_sections = 0;
        let mut saw_name_section = false;
        for payload in Parser::new(0).parse_all(&bytes) {
            if let Payload::CustomSection(reader) = payload.expect("parse failed") {
                match reader.name() {
                    COMPILE_UNIT_SECTION => {
                        unit_sections += 1;
                        let text = std::str::from_utf8(reader.data()).unwrap();
                        assert!(text.contains("\"producer\":\"skiff\""), "{text}");
                        assert!(text.contains("\"source_dir\":\"/guest\""), "{text}");
                    }
                    "name" => saw_name_section = true,
                    _ => {}
                }
            }
        }
        assert_eq!(unit_sections, 1, "exactly one compile unit per module");
        assert!(saw_name_section, "name section missing");
    }
}
