/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Per-function optimization pipeline.
 *
 * A fixed pass sequence at a fixed aggressiveness, tuned for speed without
 * growing code size: straight-line constant folding, dead-code elision
 * behind unconditional terminators, and local set/get fusion. The sequence
 * runs only when the module-wide optimize flag is set; structural
 * verification runs unconditionally and a body that fails it is never
 * attached.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::module::{FuncDecl, FunctionBody, ModuleBuilder};
use crate::options::CodegenOptions;
use crate::verify::{self, VerifyError};
use wasm_encoder::Instruction;

pub struct OptimizationPipeline {
    options: CodegenOptions,
}

impl OptimizationPipeline {
    pub fn new(options: CodegenOptions) -> Self {
        Self { options }
    }

    /// Optimize (conditionally) and verify (always) one body in place.
    pub fn run(
        &self,
        module: &ModuleBuilder,
        decl: FuncDecl,
        body: &mut FunctionBody,
    ) -> Result<(), VerifyError> {
        if self.options.optimize {
            fold_constants(body);
            elide_dead_code(body);
            fuse_local_pairs(body);
        }
        verify::verify_body(module, decl, body)
    }
}

/// Collapse `const, const, binop` windows. Works against the emitted
/// stream directly, so folds cascade: `1 2 add 3 add` becomes `6`.
fn fold_constants(body: &mut FunctionBody) {
    let mut out: Vec<Instruction<'static>> = Vec::with_capacity(body.instructions.len());
    for inst in body.instructions.drain(..) {
        if let Some(folded) = fold_window(&out, &inst) {
            out.pop();
            out.pop();
            out.push(folded);
        } else {
            out.push(inst);
        }
    }
    body.instructions = out;
}

fn fold_window(
    out: &[Instruction<'static>],
    op: &Instruction<'static>,
) -> Option<Instruction<'static>> {
    use Instruction as I;
    match out {
        [.., I::I32Const(a), I::I32Const(b)] => {
            let v = match op {
                I::I32Add => a.wrapping_add(*b),
                I::I32Sub => a.wrapping_sub(*b),
                I::I32Mul => a.wrapping_mul(*b),
                I::I32And => a & b,
                I::I32Or => a | b,
                I::I32Xor => a ^ b,
                _ => return None,
            };
            Some(I::I32Const(v))
        }
        [.., I::I64Const(a), I::I64Const(b)] => {
            let v = match op {
                I::I64Add => a.wrapping_add(*b),
                I::I64Sub => a.wrapping_sub(*b),
                I::I64Mul => a.wrapping_mul(*b),
                I::I64And => a & b,
                I::I64Or => a | b,
                I::I64Xor => a ^ b,
                _ => return None,
            };
            Some(I::I64Const(v))
        }
        _ => None,
    }
}

/// Drop instructions that follow an unconditional terminator within the
/// same control frame. Frames opened inside the dead region are dropped
/// whole; the `else`/`end` closing the live frame is kept.
fn elide_dead_code(body: &mut FunctionBody) {
    let mut out: Vec<Instruction<'static>> = Vec::with_capacity(body.instructions.len());
    let mut skipping = false;
    let mut skip_depth = 0u32;

    for inst in body.instructions.drain(..) {
        if skipping {
            match inst {
                Instruction::Block(_) | Instruction::Loop(_) | Instruction::If(_) => {
                    skip_depth += 1;
                }
                Instruction::End => {
                    if skip_depth > 0 {
                        skip_depth -= 1;
                    } else {
                        skipping = false;
                        out.push(Instruction::End);
                    }
                }
                Instruction::Else => {
                    if skip_depth == 0 {
                        skipping = false;
                        out.push(Instruction::Else);
                    }
                }
                _ => {}
            }
            continue;
        }

        let is_terminator = matches!(
            &inst,
            Instruction::Return
                | Instruction::Unreachable
                | Instruction::Br(_)
                | Instruction::BrTable(..)
        );
        out.push(inst);
        if is_terminator {
            skipping = true;
            skip_depth = 0;
        }
    }
    body.instructions = out;
}

/// `local.set n; local.get n` is a `local.tee n`.
fn fuse_local_pairs(body: &mut FunctionBody) {
    let mut out: Vec<Instruction<'static>> = Vec::with_capacity(body.instructions.len());
    for inst in body.instructions.drain(..) {
        if let Instruction::LocalGet(n) = &inst {
            if matches!(out.last(), Some(Instruction::LocalSet(m)) if m == n) {
                let n = *n;
                out.pop();
                out.push(Instruction::LocalTee(n));
                continue;
            }
        }
        out.push(inst);
    }
    body.instructions = out;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi;
    use crate::module::ModuleBuilder;
    use wasm_encoder::{BlockType, Instruction as I, ValType};

    fn fixture() -> (ModuleBuilder, FuncDecl) {
        let mut m = ModuleBuilder::new("xex", "/guest/default.xex");
        let decl = abi::declare_function(&mut m, "sub_1000");
        (m, decl)
    }

    fn pipeline(optimize: bool) -> OptimizationPipeline {
        OptimizationPipeline::new(CodegenOptions { optimize })
    }

    fn body(instructions: Vec<I<'static>>) -> FunctionBody {
        FunctionBody {
            locals: Vec::new(),
            instructions,
        }
    }

    #[test]
    fn test_constant_folding_cascades() {
        let (m, decl) = fixture();
        let mut b = body(vec![
            I::I32Const(1),
            I::I32Const(2),
            I::I32Add,
            I::I32Const(3),
            I::I32Add,
            I::Drop,
            I::End,
        ]);
        pipeline(true).run(&m, decl, &mut b).expect("run failed");

        assert_eq!(b.instructions.len(), 3);
        assert!(matches!(b.instructions[0], I::I32Const(6)));
    }

    #[test]
    fn test_dead_code_elided_after_return() {
        let (m, decl) = fixture();
        let mut b = body(vec![I::Return, I::I32Const(1), I::Drop, I::End]);
        pipeline(true).run(&m, decl, &mut b).expect("run failed");

        assert_eq!(b.instructions.len(), 2);
        assert!(matches!(b.instructions[0], I::Return));
        assert!(matches!(b.instructions[1], I::End));
    }

    #[test]
    fn test_dead_code_keeps_live_else_arm() {
        let (m, decl) = fixture();
        let mut b = body(vec![
            I::LocalGet(0),
            I::If(BlockType::Empty),
            I::Return,
            I::I32Const(5),
            I::Drop,
            I::Else,
            I::Nop,
            I::End,
            I::End,
        ]);
        pipeline(true).run(&m, decl, &mut b).expect("run failed");

        assert_eq!(b.instructions.len(), 7);
        assert!(matches!(b.instructions[2], I::Return));
        assert!(matches!(b.instructions[3], I::Else));
    }

    #[test]
    fn test_local_set_get_fused_to_tee() {
        let (m, decl) = fixture();
        let mut b = FunctionBody {
            locals: vec![(1, ValType::I32)],
            instructions: vec![I::I32Const(5), I::LocalSet(1), I::LocalGet(1), I::Drop, I::End],
        };
        pipeline(true).run(&m, decl, &mut b).expect("run failed");

        assert_eq!(b.instructions.len(), 4);
        assert!(matches!(b.instructions[1], I::LocalTee(1)));
    }

    #[test]
    fn test_sequence_skipped_when_disabled() {
        let (m, decl) = fixture();
        let mut b = body(vec![I::I32Const(1), I::I32Const(2), I::I32Add, I::Drop, I::End]);
        pipeline(false).run(&m, decl, &mut b).expect("run failed");

        assert_eq!(b.instructions.len(), 5, "body must be untouched");
    }

    #[test]
    fn test_verification_runs_regardless_of_flag() {
        let (m, decl) = fixture();
        let mut b = body(vec![I::Block(BlockType::Empty), I::End]);
        let err = pipeline(false).run(&m, decl, &mut b).unwrap_err();
        assert!(matches!(err, VerifyError::UnclosedFrame { .. }));
    }
}
