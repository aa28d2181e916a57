//! Initial conversion from the classified control flow graph to a
//! structured form tree.
//!
//! The translator dispatches over vertex classes and builds compound form
//! elements; the cleaners in [`cleanup`] and the classifier in
//! [`short_circuit`] then strip the residual machine branches out of each
//! compound form. Two post-passes finish the job: while-loop intro jumps
//! are removed (the block layout is "jump to condition, test at bottom"),
//! and every cond-no-else resolves its final destination register.

mod cleanup;
mod inspect;
mod short_circuit;

use crate::error::StructureError;
use crate::forms::{CondEntry, CondNoElseEntry, ElemId, ElementKind, FormId, FormPool, ScEntry, ScKind};
use crate::ir::atomic::ConditionKind;
use crate::ir::cfg::CfgVtx;
use crate::ir::func::{Function, OpTable, RegUseInfo};

use cleanup::{
    clean_up_break, clean_up_cond_no_else, clean_up_cond_with_else, clean_up_infinite_while_loop,
    clean_up_return, clean_up_until_loop, merge_cond_else_with_sc_cond,
};
use inspect::{branch_at, condition_branch, extracted_condition};
use short_circuit::{clean_up_sc, try_sc_as_abs, try_sc_as_ash, try_sc_as_type_of};

/// Read-only per-function inputs shared by the whole pass.
pub(crate) struct BuildCtx<'a> {
    pub name: &'a str,
    pub ops: &'a OpTable,
    pub reg_use: Option<&'a RegUseInfo>,
}

/// Build the structured form tree for a function whose CFG was fully
/// classified. On success `top_form` is set; on a structural error the
/// function is left without one and a warning is logged — other functions
/// are unaffected.
pub fn build_initial_forms(func: &mut Function) {
    if !func.cfg.is_fully_resolved() {
        return;
    }

    let ctx = BuildCtx {
        name: &func.name,
        ops: &func.ops,
        reg_use: func.reg_use.as_ref(),
    };
    match build_top_level(&mut func.pool, &ctx, func.cfg.get_single_top_level()) {
        Ok(root) => func.top_form = Some(root),
        Err(err) => {
            tracing::warn!("Failed to build initial forms in {}: {}", func.name, err);
        }
    }
}

fn build_top_level(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    top: &CfgVtx,
) -> Result<FormId, StructureError> {
    let mut elems = Vec::new();
    insert_cfg_into_list(pool, ctx, top, &mut elems)?;
    let root = pool.alloc_sequence_form(None, elems);

    for form in collect_forms(pool, root) {
        clean_up_while_loops(pool, form)?;
    }

    for elem in collect_elems(pool, root) {
        if matches!(pool.kind(elem), ElementKind::CondNoElse { .. }) {
            cleanup::clean_up_cond_no_else_final(pool, ctx, elem)?;
        }
    }

    Ok(root)
}

/// Every form reachable from `root`, parents before children.
fn collect_forms(pool: &FormPool, root: FormId) -> Vec<FormId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(form) = stack.pop() {
        out.push(form);
        for &elem in &pool.form(form).elems {
            stack.extend(pool.kind(elem).child_forms());
        }
    }
    out
}

/// Every element reachable from `root`.
fn collect_elems(pool: &FormPool, root: FormId) -> Vec<ElemId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(form) = stack.pop() {
        for &elem in &pool.form(form).elems {
            out.push(elem);
            stack.extend(pool.kind(elem).child_forms());
        }
    }
    out
}

/// Flatten a vertex into an element list: sequences recurse, blocks inline
/// their atomic ops, and anything else is translated and its elements
/// spliced in. This keeps sequences from nesting in the output.
fn insert_cfg_into_list(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    vtx: &CfgVtx,
    output: &mut Vec<ElemId>,
) -> Result<(), StructureError> {
    match vtx {
        CfgVtx::Sequence(children) => {
            for child in children {
                insert_cfg_into_list(pool, ctx, child, output)?;
            }
            Ok(())
        }
        CfgVtx::Block(block) => {
            for op_id in ctx.ops.block_ops(*block) {
                output.push(ctx.ops.ops[op_id].get_as_form(pool));
            }
            Ok(())
        }
        _ => {
            let form = cfg_to_form(pool, ctx, vtx)?;
            output.extend(pool.form(form).elems.clone());
            Ok(())
        }
    }
}

/// Translate one classified vertex into a form.
pub(crate) fn cfg_to_form(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    vtx: &CfgVtx,
) -> Result<FormId, StructureError> {
    match vtx {
        CfgVtx::Block(block) => {
            let mut elems = Vec::new();
            for op_id in ctx.ops.block_ops(*block) {
                elems.push(ctx.ops.ops[op_id].get_as_form(pool));
            }
            Ok(pool.alloc_sequence_form(None, elems))
        }

        CfgVtx::Sequence(_) => {
            let mut elems = Vec::new();
            insert_cfg_into_list(pool, ctx, vtx, &mut elems)?;
            Ok(pool.alloc_sequence_form(None, elems))
        }

        CfgVtx::WhileLoop { condition, body } => {
            let condition = cfg_to_form(pool, ctx, condition)?;
            let body = cfg_to_form(pool, ctx, body)?;
            // Not cleaned here: the intro jump lives in a sibling block, so
            // the post-pass finishes while loops.
            let elem = pool.alloc_element(ElementKind::While {
                condition,
                body,
                cleaned: false,
            });
            Ok(pool.alloc_single_form(None, elem))
        }

        CfgVtx::UntilLoop { condition, body } => {
            let condition = cfg_to_form(pool, ctx, condition)?;
            let body = cfg_to_form(pool, ctx, body)?;
            let elem = pool.alloc_element(ElementKind::Until { condition, body });
            let result = pool.alloc_single_form(None, elem);
            clean_up_until_loop(pool, elem)?;
            Ok(result)
        }

        CfgVtx::UntilLoopSingle { block } => {
            let condition = cfg_to_form(pool, ctx, block)?;
            let body = pool.alloc_single_element_form(None, ElementKind::Empty);
            let elem = pool.alloc_element(ElementKind::Until { condition, body });
            let result = pool.alloc_single_form(None, elem);
            clean_up_until_loop(pool, elem)?;
            Ok(result)
        }

        CfgVtx::InfiniteLoop { block } => {
            let condition = pool.alloc_single_element_form(
                None,
                ElementKind::Condition {
                    kind: ConditionKind::Always,
                    src: Vec::new(),
                },
            );
            let body = cfg_to_form(pool, ctx, block)?;
            let elem = pool.alloc_element(ElementKind::While {
                condition,
                body,
                cleaned: false,
            });
            let result = pool.alloc_single_form(None, elem);
            clean_up_infinite_while_loop(pool, elem)?;
            Ok(result)
        }

        CfgVtx::CondWithElse { entries, else_vtx } => {
            // The CFG pass may recognize arms out of order and produce fake
            // nesting, turning a plain cond into a cond-with-else. Try to
            // compact that back before building the normal form.
            let else_form = cfg_to_form(pool, ctx, else_vtx)?;
            if let Some(merged) = merge_cond_else_with_sc_cond(pool, ctx, entries, else_form)? {
                return Ok(merged);
            }

            let mut built = Vec::new();
            for entry in entries {
                built.push(CondEntry {
                    condition: cfg_to_form(pool, ctx, &entry.condition)?,
                    body: cfg_to_form(pool, ctx, &entry.body)?,
                    cleaned: false,
                });
            }
            let elem = pool.alloc_element(ElementKind::CondWithElse {
                entries: built,
                else_body: else_form,
            });
            let result = pool.alloc_single_form(None, elem);
            clean_up_cond_with_else(pool, elem)?;
            Ok(result)
        }

        CfgVtx::CondNoElse { entries } => {
            let mut built = Vec::new();
            for entry in entries {
                built.push(CondNoElseEntry {
                    condition: cfg_to_form(pool, ctx, &entry.condition)?,
                    body: cfg_to_form(pool, ctx, &entry.body)?,
                    cleaned: false,
                    false_destination: None,
                    original_branch: None,
                });
            }
            let elem = pool.alloc_element(ElementKind::CondNoElse {
                entries: built,
                final_destination: None,
                used_as_value: false,
            });
            let result = pool.alloc_single_form(None, elem);
            clean_up_cond_no_else(pool, result)?;
            Ok(result)
        }

        CfgVtx::ShortCircuit { entries } => {
            // The special forms share the short-circuit branch shape; try
            // them before the boolean chains.
            if let Some(form) = try_sc_as_type_of(pool, ctx, entries)? {
                return Ok(form);
            }
            if let Some(form) = try_sc_as_ash(pool, ctx, entries)? {
                return Ok(form);
            }
            if let Some(form) = try_sc_as_abs(pool, ctx, entries)? {
                return Ok(form);
            }
            if entries.len() == 1 {
                return Err(StructureError::WeirdShortCircuit);
            }

            let mut built = Vec::new();
            for entry in entries {
                built.push(ScEntry {
                    condition: cfg_to_form(pool, ctx, entry)?,
                });
            }
            let elem = pool.alloc_element(ElementKind::ShortCircuit {
                kind: ScKind::Undetermined,
                entries: built,
                final_result: None,
                used_as_value: false,
            });
            let result = pool.alloc_single_form(None, elem);
            clean_up_sc(pool, ctx, elem)?;
            Ok(result)
        }

        CfgVtx::GotoEnd {
            body,
            unreachable_block,
        } => {
            let return_code = cfg_to_form(pool, ctx, body)?;
            let dead_code = cfg_to_form(pool, ctx, unreachable_block)?;
            let elem = pool.alloc_element(ElementKind::Return {
                return_code,
                dead_code,
            });
            let result = pool.alloc_single_form(None, elem);
            clean_up_return(pool, elem)?;
            Ok(result)
        }

        CfgVtx::Break {
            body,
            unreachable_block,
        } => {
            let return_code = cfg_to_form(pool, ctx, body)?;
            let dead_code = cfg_to_form(pool, ctx, unreachable_block)?;
            let elem = pool.alloc_element(ElementKind::Break {
                return_code,
                dead_code,
            });
            let result = pool.alloc_single_form(None, elem);
            clean_up_break(pool, elem)?;
            Ok(result)
        }

        CfgVtx::Goto { .. } => Err(StructureError::UnsupportedVertex("goto")),
    }
}

/// Finish while loops in one form: the block before each uncleaned while
/// ends with a jump to the loop condition, which is removed, and the
/// condition's bottom-tested branch becomes the lifted predicate.
fn clean_up_while_loops(pool: &mut FormPool, sequence: FormId) -> Result<(), StructureError> {
    let mut to_remove = Vec::new();

    for i in 0..pool.form_len(sequence) {
        let elem = pool.at(sequence, i);
        let condition = match pool.kind(elem) {
            ElementKind::While {
                condition,
                cleaned: false,
                ..
            } => *condition,
            _ => continue,
        };

        if i == 0 {
            return Err(StructureError::MissingWhileIntro);
        }
        let prev = pool.at(sequence, i - 1);
        let intro = match pool.kind(prev) {
            ElementKind::Branch(op) => op.clone(),
            _ => return Err(StructureError::MissingWhileIntro),
        };
        // The CFG pass already checked the jump target; only the shape is
        // re-checked here.
        if intro.condition.kind != ConditionKind::Always || !intro.delay.is_nop() {
            return Err(StructureError::BadBranch(
                "while intro jump is not an unconditional nop-delay branch".to_string(),
            ));
        }
        to_remove.push(i - 1);

        let (branch_id, slot) =
            condition_branch(pool, condition).ok_or(StructureError::MissingTrailingBranch)?;
        let branch = branch_at(pool, branch_id).clone();
        if !branch.delay.is_nop() {
            return Err(StructureError::BadBranch(
                "while condition branch has a non-nop delay slot".to_string(),
            ));
        }
        // The bottom-tested branch re-enters the loop on the true
        // predicate, so no inversion.
        let replacement = extracted_condition(pool, &branch.condition, false);
        pool.replace_back(slot, replacement);

        if let ElementKind::While { cleaned, .. } = &mut pool.elem_mut(elem).kind {
            *cleaned = true;
        }
    }

    for idx in to_remove.into_iter().rev() {
        pool.form_mut(sequence).elems.remove(idx);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{form_to_string, verify_form_tree};
    use crate::ir::atomic::{ExprKind, LoadKind, Register};
    use crate::ir::cfg::CondVtxEntry;
    use crate::testutil::{block, AtomSpec::*, DelaySpec, FuncBuilder};

    const V0: Register = Register::V0;
    const V1: Register = Register::V1;
    const A0: Register = Register::A0;
    const A1: Register = Register::A1;
    const A2: Register = Register::A2;
    const A3: Register = Register::A3;
    const T0: Register = Register::T0;
    const T1: Register = Register::T1;
    const S5: Register = Register::S5;

    fn build_and_print(func: &mut Function) -> String {
        build_initial_forms(func);
        let root = func.top_form.expect("pass should succeed");
        verify_form_tree(&func.pool, root).expect("tree invariants");
        form_to_string(&func.pool, root)
    }

    #[test]
    fn infinite_loop_strips_self_jump() {
        let mut fb = FuncBuilder::new("loop-forever");
        fb.begin_block();
        fb.set2(A0, ExprKind::Add, R(A0), I(1));
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let b0 = fb.end_block();

        let mut func = fb.build(CfgVtx::InfiniteLoop {
            block: Box::new(block(b0)),
        });
        assert_eq!(build_and_print(&mut func), "(while #t (set! a0 (+ a0 1)))");
    }

    #[test]
    fn infinite_loop_with_only_jump_gets_empty_body() {
        let mut fb = FuncBuilder::new("spin");
        fb.begin_block();
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let b0 = fb.end_block();

        let mut func = fb.build(CfgVtx::InfiniteLoop {
            block: Box::new(block(b0)),
        });
        assert_eq!(build_and_print(&mut func), "(while #t (empty))");
    }

    #[test]
    fn while_loop_intro_jump_removed() {
        let mut fb = FuncBuilder::new("count-up");
        fb.begin_block();
        fb.set_atom(T0, I(7));
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let pre = fb.end_block();
        fb.begin_block();
        fb.branch(ConditionKind::Truthy, &[R(A0)], DelaySpec::Nop, false);
        let cond = fb.end_block();
        fb.begin_block();
        fb.set2(A0, ExprKind::Add, R(A0), I(1));
        let body = fb.end_block();
        fb.begin_block();
        fb.set_atom(V0, R(A0));
        let after = fb.end_block();

        let mut func = fb.build(CfgVtx::Sequence(vec![
            block(pre),
            CfgVtx::WhileLoop {
                condition: Box::new(block(cond)),
                body: Box::new(block(body)),
            },
            block(after),
        ]));
        assert_eq!(
            build_and_print(&mut func),
            "(begin (set! t0 7) (while (truthy a0) (set! a0 (+ a0 1))) (set! v0 a0))"
        );
    }

    #[test]
    fn while_without_intro_jump_fails() {
        let mut fb = FuncBuilder::new("bad-while");
        fb.begin_block();
        fb.branch(ConditionKind::Truthy, &[R(A0)], DelaySpec::Nop, false);
        let cond = fb.end_block();
        fb.begin_block();
        fb.set2(A0, ExprKind::Add, R(A0), I(1));
        let body = fb.end_block();

        let mut func = fb.build(CfgVtx::WhileLoop {
            condition: Box::new(block(cond)),
            body: Box::new(block(body)),
        });
        build_initial_forms(&mut func);
        assert!(func.top_form.is_none());
    }

    #[test]
    fn until_loop_condition_inverted() {
        let mut fb = FuncBuilder::new("count-down");
        fb.begin_block();
        fb.branch(ConditionKind::GeqZeroSigned, &[R(A0)], DelaySpec::Nop, false);
        let cond = fb.end_block();
        fb.begin_block();
        fb.set2(A0, ExprKind::Add, R(A0), I(-1));
        let body = fb.end_block();

        let mut func = fb.build(CfgVtx::UntilLoop {
            condition: Box::new(block(cond)),
            body: Box::new(block(body)),
        });
        assert_eq!(
            build_and_print(&mut func),
            "(until (<0.s a0) (set! a0 (+ a0 -1)))"
        );
    }

    #[test]
    fn until_loop_single_block() {
        let mut fb = FuncBuilder::new("drain");
        fb.begin_block();
        fb.set2(A0, ExprKind::Add, R(A0), I(-1));
        fb.branch(ConditionKind::GeqZeroSigned, &[R(A0)], DelaySpec::Nop, false);
        let b0 = fb.end_block();

        let mut func = fb.build(CfgVtx::UntilLoopSingle {
            block: Box::new(block(b0)),
        });
        assert_eq!(
            build_and_print(&mut func),
            "(until (begin (set! a0 (+ a0 -1)) (<0.s a0)) (empty))"
        );
    }

    #[test]
    fn compare_recognized_from_degenerate_cond() {
        let mut fb = FuncBuilder::new("is-negative");
        fb.begin_block();
        fb.branch(
            ConditionKind::LessThanZeroSigned,
            &[R(A0)],
            DelaySpec::SetTrue(V0),
            true,
        );
        let cond = fb.end_block();
        fb.begin_block();
        fb.set_atom(V0, Sym("#f"));
        let body = fb.end_block();

        let mut func = fb.build(CfgVtx::CondNoElse {
            entries: vec![CondVtxEntry {
                condition: block(cond),
                body: block(body),
            }],
        });
        assert_eq!(build_and_print(&mut func), "(set! v0 (<0.s a0))");
    }

    #[test]
    fn compare_conversion_splices_side_effects() {
        let mut fb = FuncBuilder::new("is-negative-after");
        fb.begin_block();
        fb.set_atom(T0, I(1));
        fb.branch(
            ConditionKind::LessThanZeroSigned,
            &[R(A0)],
            DelaySpec::SetTrue(V0),
            true,
        );
        let cond = fb.end_block();
        fb.begin_block();
        fb.set_atom(V0, Sym("#f"));
        let body = fb.end_block();

        let mut func = fb.build(CfgVtx::CondNoElse {
            entries: vec![CondVtxEntry {
                condition: block(cond),
                body: block(body),
            }],
        });
        assert_eq!(
            build_and_print(&mut func),
            "(begin (set! t0 1) (set! v0 (<0.s a0)))"
        );
    }

    #[test]
    fn and_chain() {
        let mut fb = FuncBuilder::new("all-of");
        fb.begin_block();
        fb.branch(ConditionKind::False, &[R(A1)], DelaySpec::SetFalse(V0), false);
        let b0 = fb.end_block();
        fb.begin_block();
        fb.branch(ConditionKind::False, &[R(A2)], DelaySpec::SetFalse(V0), false);
        let b1 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V0, R(A3));
        let b2 = fb.end_block();

        let mut func = fb.build(CfgVtx::ShortCircuit {
            entries: vec![block(b0), block(b1), block(b2)],
        });
        assert_eq!(
            build_and_print(&mut func),
            "(and (truthy a1) (truthy a2) (set! v0 a3))"
        );

        let root = func.top_form.unwrap();
        let sc = func.pool.try_as_single_element(root).unwrap();
        match func.pool.kind(sc).clone() {
            ElementKind::ShortCircuit {
                kind,
                final_result,
                used_as_value,
                ..
            } => {
                assert_eq!(kind, ScKind::And);
                assert_eq!(final_result.unwrap().reg, V0);
                // No liveness report: conservatively not a value.
                assert!(!used_as_value);
            }
            other => panic!("expected short circuit, got {other:?}"),
        }
    }

    #[test]
    fn and_chain_used_as_value_with_liveness() {
        let mut fb = FuncBuilder::new("all-of-live");
        fb.enable_reg_use();
        fb.begin_block();
        fb.branch(ConditionKind::False, &[R(A1)], DelaySpec::SetFalse(V0), false);
        let b0 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V0, R(A2));
        let b1 = fb.end_block();

        let mut func = fb.build(CfgVtx::ShortCircuit {
            entries: vec![block(b0), block(b1)],
        });
        build_initial_forms(&mut func);
        let root = func.top_form.unwrap();
        let sc = func.pool.try_as_single_element(root).unwrap();
        match func.pool.kind(sc).clone() {
            ElementKind::ShortCircuit { used_as_value, .. } => assert!(used_as_value),
            other => panic!("expected short circuit, got {other:?}"),
        }
    }

    #[test]
    fn or_chain() {
        let mut fb = FuncBuilder::new("any-of");
        fb.begin_block();
        fb.branch(ConditionKind::Truthy, &[R(A1)], DelaySpec::SetTrue(V0), false);
        let b0 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V0, R(A2));
        let b1 = fb.end_block();

        let mut func = fb.build(CfgVtx::ShortCircuit {
            entries: vec![block(b0), block(b1)],
        });
        assert_eq!(build_and_print(&mut func), "(or (truthy a1) (set! v0 a2))");
    }

    #[test]
    fn mixed_polarity_splits_into_nested_chains() {
        let mut fb = FuncBuilder::new("and-of-or");
        fb.begin_block();
        fb.branch(ConditionKind::False, &[R(A1)], DelaySpec::SetFalse(V0), false);
        let b0 = fb.end_block();
        fb.begin_block();
        fb.branch(ConditionKind::Truthy, &[R(A2)], DelaySpec::SetTrue(V0), false);
        let b1 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V0, R(A3));
        let b2 = fb.end_block();

        let mut func = fb.build(CfgVtx::ShortCircuit {
            entries: vec![block(b0), block(b1), block(b2)],
        });
        assert_eq!(
            build_and_print(&mut func),
            "(and (truthy a1) (or (truthy a2) (set! v0 a3)))"
        );
    }

    #[test]
    fn abs_idiom() {
        let mut fb = FuncBuilder::new("int-abs");
        fb.begin_block();
        fb.branch(
            ConditionKind::LessThanZeroSigned,
            &[R(V1)],
            DelaySpec::Negate(V0, V1),
            true,
        );
        let b0 = fb.end_block();

        let mut func = fb.build(CfgVtx::ShortCircuit {
            entries: vec![block(b0)],
        });
        assert_eq!(build_and_print(&mut func), "(set! v0 (abs v1))");
    }

    #[test]
    fn ash_idiom() {
        let mut fb = FuncBuilder::new("shift-either-way");
        fb.begin_block();
        fb.branch(
            ConditionKind::GeqZeroSigned,
            &[R(S5)],
            DelaySpec::Dsllv(A0, A0, S5),
            true,
        );
        let b0 = fb.end_block();
        fb.begin_block();
        fb.set1(A1, ExprKind::Neg, R(S5));
        fb.set2(A0, ExprKind::RightShiftArith, R(A0), R(A1));
        let b1 = fb.end_block();

        let mut func = fb.build(CfgVtx::ShortCircuit {
            entries: vec![block(b0), block(b1)],
        });
        assert_eq!(build_and_print(&mut func), "(set! a0 (ash a0 s5))");

        let root = func.top_form.unwrap();
        let set = func.pool.try_as_single_element(root).unwrap();
        let src = match func.pool.kind(set) {
            ElementKind::SetVar { src, .. } => *src,
            other => panic!("expected set, got {other:?}"),
        };
        let ash = func.pool.try_as_single_element(src).unwrap();
        match func.pool.kind(ash).clone() {
            ElementKind::Ash {
                clobber, is_arith, ..
            } => {
                assert_eq!(clobber.unwrap().reg, A1);
                assert!(is_arith);
            }
            other => panic!("expected ash, got {other:?}"),
        }
    }

    #[test]
    fn type_of_idiom() {
        let mut fb = FuncBuilder::new("get-type");
        fb.begin_block();
        fb.set_atom(T1, I(9));
        fb.set2(V1, ExprKind::LeftShift, R(A0), I(61));
        fb.branch(ConditionKind::Zero, &[R(V1)], DelaySpec::SetBinteger(V1), true);
        let b0 = fb.end_block();
        fb.begin_block();
        fb.branch(
            ConditionKind::GreaterThanZeroSigned,
            &[R(V1)],
            DelaySpec::SetPair(V1),
            true,
        );
        let b1 = fb.end_block();
        fb.begin_block();
        fb.load(V1, LoadKind::Unsigned, 4, A0, -4);
        let b2 = fb.end_block();

        let mut func = fb.build(CfgVtx::ShortCircuit {
            entries: vec![block(b0), block(b1), block(b2)],
        });
        // The shift and the branch disappear; earlier ops stay.
        assert_eq!(
            build_and_print(&mut func),
            "(begin (set! t1 9) (set! v1 (type-of a0)))"
        );
    }

    #[test]
    fn type_of_records_clobber_when_temp_differs() {
        let mut fb = FuncBuilder::new("get-type-clobber");
        fb.begin_block();
        fb.set_atom(T1, I(0));
        fb.set2(V1, ExprKind::LeftShift, R(A0), I(61));
        fb.branch(ConditionKind::Zero, &[R(V1)], DelaySpec::SetBinteger(V0), true);
        let b0 = fb.end_block();
        fb.begin_block();
        fb.branch(
            ConditionKind::GreaterThanZeroSigned,
            &[R(V1)],
            DelaySpec::SetPair(V0),
            true,
        );
        let b1 = fb.end_block();
        fb.begin_block();
        fb.load(V0, LoadKind::Unsigned, 4, A0, -4);
        let b2 = fb.end_block();

        let mut func = fb.build(CfgVtx::ShortCircuit {
            entries: vec![block(b0), block(b1), block(b2)],
        });
        build_initial_forms(&mut func);
        let root = func.top_form.unwrap();

        let set = func.pool.at(root, 1);
        let src = match func.pool.kind(set) {
            ElementKind::SetVar { dst, src, .. } => {
                assert_eq!(dst.reg, V0);
                *src
            }
            other => panic!("expected set, got {other:?}"),
        };
        let type_of = func.pool.try_as_single_element(src).unwrap();
        match func.pool.kind(type_of).clone() {
            ElementKind::TypeOf { clobber, .. } => assert_eq!(clobber.unwrap().reg, V1),
            other => panic!("expected type-of, got {other:?}"),
        }
    }

    #[test]
    fn return_strips_trailing_jump() {
        let mut fb = FuncBuilder::new("early-out");
        fb.begin_block();
        fb.set_atom(V0, I(42));
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let body = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(0));
        let dead = fb.end_block();

        let mut func = fb.build(CfgVtx::GotoEnd {
            body: Box::new(block(body)),
            unreachable_block: Box::new(block(dead)),
        });
        assert_eq!(
            build_and_print(&mut func),
            "(return (set! v0 42) (set! v1 0))"
        );
    }

    #[test]
    fn break_strips_trailing_jump() {
        let mut fb = FuncBuilder::new("scope-exit");
        fb.begin_block();
        fb.set_atom(V0, I(42));
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let body = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(0));
        let dead = fb.end_block();

        let mut func = fb.build(CfgVtx::Break {
            body: Box::new(block(body)),
            unreachable_block: Box::new(block(dead)),
        });
        assert_eq!(
            build_and_print(&mut func),
            "(break (set! v0 42) (set! v1 0))"
        );
    }

    #[test]
    fn cond_with_else_extracts_inverted_conditions() {
        let mut fb = FuncBuilder::new("pick");
        fb.begin_block();
        fb.branch(ConditionKind::Zero, &[R(A0)], DelaySpec::Nop, false);
        let cond = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(1));
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let body = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(2));
        let else_b = fb.end_block();

        let mut func = fb.build(CfgVtx::CondWithElse {
            entries: vec![CondVtxEntry {
                condition: block(cond),
                body: block(body),
            }],
            else_vtx: Box::new(block(else_b)),
        });
        assert_eq!(
            build_and_print(&mut func),
            "(cond ((nonzero? a0) (set! v1 1)) (else (set! v1 2)))"
        );
    }

    #[test]
    fn cond_with_else_lone_branch_body_becomes_empty() {
        let mut fb = FuncBuilder::new("pick-nothing");
        fb.begin_block();
        fb.branch(ConditionKind::Zero, &[R(A0)], DelaySpec::Nop, false);
        let cond = fb.end_block();
        fb.begin_block();
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let body = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(2));
        let else_b = fb.end_block();

        let mut func = fb.build(CfgVtx::CondWithElse {
            entries: vec![CondVtxEntry {
                condition: block(cond),
                body: block(body),
            }],
            else_vtx: Box::new(block(else_b)),
        });
        assert_eq!(
            build_and_print(&mut func),
            "(cond ((nonzero? a0) (empty)) (else (set! v1 2)))"
        );
    }

    #[test]
    fn cond_no_else_records_destinations() {
        let mut fb = FuncBuilder::new("two-arms");
        fb.enable_reg_use();
        fb.begin_block();
        let arm0 = fb.branch(ConditionKind::Zero, &[R(A0)], DelaySpec::SetFalse(V0), false);
        let c0 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(1));
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let b0 = fb.end_block();
        fb.begin_block();
        fb.branch(ConditionKind::Nonzero, &[R(T1)], DelaySpec::SetFalse(V0), false);
        let c1 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(2));
        let b1 = fb.end_block();
        fb.unused(arm0, V0);

        let mut func = fb.build(CfgVtx::CondNoElse {
            entries: vec![
                CondVtxEntry {
                    condition: block(c0),
                    body: block(b0),
                },
                CondVtxEntry {
                    condition: block(c1),
                    body: block(b1),
                },
            ],
        });
        assert_eq!(
            build_and_print(&mut func),
            "(cond ((nonzero? a0) (set! v1 1)) ((zero? t1) (set! v1 2)))"
        );

        let root = func.top_form.unwrap();
        let cne = func.pool.try_as_single_element(root).unwrap();
        match func.pool.kind(cne).clone() {
            ElementKind::CondNoElse {
                final_destination,
                used_as_value,
                ..
            } => {
                assert_eq!(final_destination, Some(V0));
                assert!(used_as_value);
            }
            other => panic!("expected cond, got {other:?}"),
        }
    }

    #[test]
    fn cond_else_merges_with_leading_short_circuit() {
        let mut fb = FuncBuilder::new("flattened");
        fb.enable_reg_use();
        fb.begin_block();
        let cwe_branch = fb.branch(ConditionKind::Zero, &[R(A0)], DelaySpec::SetFalse(V0), false);
        let c0 = fb.end_block();
        fb.begin_block();
        fb.set_atom(T0, I(1));
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let bo0 = fb.end_block();
        fb.begin_block();
        let sc_branch = fb.branch(ConditionKind::False, &[R(A1)], DelaySpec::SetFalse(V0), false);
        let s0 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V0, R(A2));
        let s1 = fb.end_block();
        fb.begin_block();
        let arm1 = fb.branch(ConditionKind::Zero, &[R(A3)], DelaySpec::SetFalse(V0), false);
        let c1 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(1));
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let b1 = fb.end_block();
        fb.begin_block();
        fb.branch(ConditionKind::Nonzero, &[R(T1)], DelaySpec::SetFalse(V0), false);
        let c2 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(2));
        let b2 = fb.end_block();
        fb.unused(cwe_branch, V0);
        fb.unused(sc_branch, V0);
        fb.unused(arm1, V0);

        let mut func = fb.build(CfgVtx::CondWithElse {
            entries: vec![CondVtxEntry {
                condition: block(c0),
                body: block(bo0),
            }],
            else_vtx: Box::new(CfgVtx::Sequence(vec![
                CfgVtx::ShortCircuit {
                    entries: vec![block(s0), block(s1)],
                },
                CfgVtx::CondNoElse {
                    entries: vec![
                        CondVtxEntry {
                            condition: block(c1),
                            body: block(b1),
                        },
                        CondVtxEntry {
                            condition: block(c2),
                            body: block(b2),
                        },
                    ],
                },
            ])),
        });
        assert_eq!(
            build_and_print(&mut func),
            "(cond ((nonzero? a0) (set! t0 1)) \
             ((begin (and (truthy a1) (set! v0 a2)) (nonzero? a3)) (set! v1 1)) \
             ((zero? t1) (set! v1 2)))"
        );

        let root = func.top_form.unwrap();
        let cne = func.pool.try_as_single_element(root).unwrap();
        match func.pool.kind(cne).clone() {
            ElementKind::CondNoElse {
                entries,
                final_destination,
                used_as_value,
            } => {
                assert_eq!(entries.len(), 3);
                assert_eq!(final_destination, Some(V0));
                assert!(used_as_value);
            }
            other => panic!("expected cond, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_vertex_leaves_function_without_forms() {
        let mut fb = FuncBuilder::new("has-goto");
        fb.begin_block();
        fb.set_atom(V0, I(1));
        let b0 = fb.end_block();

        let mut func = fb.build(CfgVtx::Sequence(vec![
            block(b0),
            CfgVtx::Goto { target: b0 },
        ]));
        build_initial_forms(&mut func);
        assert!(func.top_form.is_none());
    }

    #[test]
    fn single_entry_short_circuit_with_no_idiom_fails() {
        let mut fb = FuncBuilder::new("weird-sc");
        fb.begin_block();
        fb.branch(ConditionKind::Truthy, &[R(A0)], DelaySpec::SetFalse(V0), false);
        let b0 = fb.end_block();

        let mut func = fb.build(CfgVtx::ShortCircuit {
            entries: vec![block(b0)],
        });
        build_initial_forms(&mut func);
        assert!(func.top_form.is_none());
    }

    #[test]
    fn unresolved_cfg_is_skipped_silently() {
        let mut fb = FuncBuilder::new("unresolved");
        fb.begin_block();
        fb.set_atom(V0, I(1));
        let b0 = fb.end_block();

        let mut func = fb.build(block(b0));
        func.cfg.fully_resolved = false;
        build_initial_forms(&mut func);
        assert!(func.top_form.is_none());
    }

    #[test]
    fn cond_arm_with_unconditional_branch_fails() {
        let mut fb = FuncBuilder::new("bad-cond");
        fb.begin_block();
        fb.branch(ConditionKind::Always, &[], DelaySpec::SetFalse(V0), false);
        let c0 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(1));
        let b0 = fb.end_block();

        let mut func = fb.build(CfgVtx::CondNoElse {
            entries: vec![CondVtxEntry {
                condition: block(c0),
                body: block(b0),
            }],
        });
        build_initial_forms(&mut func);
        assert!(func.top_form.is_none());
    }

    /// Re-running the cleaners over a finished tree changes nothing: every
    /// cleaned flag short-circuits.
    #[test]
    fn pass_is_idempotent_on_built_tree() {
        let mut fb = FuncBuilder::new("idempotent");
        fb.begin_block();
        fb.set_atom(T0, I(7));
        fb.branch(ConditionKind::Always, &[], DelaySpec::Nop, false);
        let pre = fb.end_block();
        fb.begin_block();
        fb.branch(ConditionKind::Truthy, &[R(A0)], DelaySpec::Nop, false);
        let cond = fb.end_block();
        fb.begin_block();
        fb.set2(A0, ExprKind::Add, R(A0), I(1));
        let body = fb.end_block();
        fb.begin_block();
        fb.branch(ConditionKind::Zero, &[R(A1)], DelaySpec::SetFalse(V0), false);
        let c0 = fb.end_block();
        fb.begin_block();
        fb.set_atom(V1, I(1));
        let b0 = fb.end_block();

        let mut func = fb.build(CfgVtx::Sequence(vec![
            block(pre),
            CfgVtx::WhileLoop {
                condition: Box::new(block(cond)),
                body: Box::new(block(body)),
            },
            CfgVtx::CondNoElse {
                entries: vec![CondVtxEntry {
                    condition: block(c0),
                    body: block(b0),
                }],
            },
        ]));
        build_initial_forms(&mut func);
        let root = func.top_form.expect("pass should succeed");
        let before = form_to_string(&func.pool, root);

        let ctx = BuildCtx {
            name: &func.name,
            ops: &func.ops,
            reg_use: func.reg_use.as_ref(),
        };
        for form in collect_forms(&func.pool, root) {
            clean_up_while_loops(&mut func.pool, form).expect("while rerun");
        }
        for elem in collect_elems(&func.pool, root) {
            if matches!(func.pool.kind(elem), ElementKind::CondNoElse { .. }) {
                cleanup::clean_up_cond_no_else_final(&mut func.pool, &ctx, elem)
                    .expect("cond rerun");
            }
        }

        assert_eq!(form_to_string(&func.pool, root), before);
        verify_form_tree(&func.pool, root).expect("tree invariants");
    }
}
