/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Structural verification of generated function bodies.
 *
 * Runs over every body (translated, stub, or thunk) before it is
 * attached to the module. A failure here is a defect in the translator or
 * the import builder, never in guest data: the walk checks the shape that
 * any well-formed body must have (balanced control frames, indices in
 * range, branches within the open frame stack, calls carrying the module
 * ABI) without interpreting what the body computes.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::module::{FuncDecl, FunctionBody, ModuleBuilder};
use thiserror::Error;
use wasm_encoder::Instruction;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("function body is empty")]
    Empty,
    #[error("instruction {position}: `else` outside an `if` frame")]
    ElseOutsideIf { position: usize },
    #[error("instruction {position}: unreachable, the function frame is already closed")]
    TrailingCode { position: usize },
    #[error("body leaves {open} control frame(s) unclosed")]
    UnclosedFrame { open: usize },
    #[error("instruction {position}: branch depth {depth} exceeds {open} open frame(s)")]
    BranchDepth {
        position: usize,
        depth: u32,
        open: usize,
    },
    #[error("instruction {position}: local index {index} out of range ({count} available)")]
    LocalIndex {
        position: usize,
        index: u32,
        count: u32,
    },
    #[error("instruction {position}: call target {index} out of range ({count} functions)")]
    CallTarget {
        position: usize,
        index: u32,
        count: u32,
    },
    #[error("instruction {position}: call target {index} does not carry the module ABI")]
    CallConvention { position: usize, index: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Func,
    Block,
    Loop,
    If,
    Else,
}

/// Verify one body against the module it will be attached to.
pub fn verify_body(
    module: &ModuleBuilder,
    decl: FuncDecl,
    body: &FunctionBody,
) -> Result<(), VerifyError> {
    if body.instructions.is_empty() {
        return Err(VerifyError::Empty);
    }

    let (params, _) = module.func_type(decl.type_index);
    let local_count = params.len() as u32 + body.locals.iter().map(|(n, _)| n).sum::<u32>();
    let function_count = module.function_count();

    let mut frames = vec![Frame::Func];

    for (position, instr) in body.instructions.iter().enumerate() {
        if frames.is_empty() {
            return Err(VerifyError::TrailingCode { position });
        }
        match instr {
            Instruction::Block(_) => frames.push(Frame::Block),
            Instruction::Loop(_) => frames.push(Frame::Loop),
            Instruction::If(_) => frames.push(Frame::If),
            Instruction::Else => match frames.last_mut() {
                Some(top @ Frame::If) => *top = Frame::Else,
                _ => return Err(VerifyError::ElseOutsideIf { position }),
            },
            Instruction::End => {
                frames.pop();
            }
            Instruction::Br(depth) | Instruction::BrIf(depth) => {
                check_branch(position, *depth, &frames)?;
            }
            Instruction::BrTable(targets, default) => {
                for depth in targets.iter() {
                    check_branch(position, *depth, &frames)?;
                }
                check_branch(position, *default, &frames)?;
            }
            Instruction::LocalGet(index)
            | Instruction::LocalSet(index)
            | Instruction::LocalTee(index) => {
                if *index >= local_count {
                    return Err(VerifyError::LocalIndex {
                        position,
                        index: *index,
                        count: local_count,
                    });
                }
            }
            Instruction::Call(index) => {
                if *index >= function_count {
                    return Err(VerifyError::CallTarget {
                        position,
                        index: *index,
                        count: function_count,
                    });
                }
                // One calling convention module-wide: every call site must
                // target the shared ABI signature.
                if module.type_of_function(*index) != Some(decl.type_index) {
                    return Err(VerifyError::CallConvention {
                        position,
                        index: *index,
                    });
                }
            }
            _ => {}
        }
    }

    if !frames.is_empty() {
        return Err(VerifyError::UnclosedFrame { open: frames.len() });
    }
    Ok(())
}

fn check_branch(position: usize, depth: u32, frames: &[Frame]) -> Result<(), VerifyError> {
    if depth as usize >= frames.len() {
        return Err(VerifyError::BranchDepth {
            position,
            depth,
            open: frames.len(),
        });
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
