//! Removing the residual internal branches from compound forms.
//!
//! Each cleaner takes a freshly translated form, finds the machine-level
//! branches the structural idiom implies, and replaces them with lifted
//! booleans (or deletes them). Entries carry `cleaned` flags so re-running
//! a cleaner is a no-op.

use crate::error::StructureError;
use crate::forms::{CondNoElseEntry, ElemId, ElementKind, FormId, FormPool};
use crate::ir::atomic::{Atom, BranchDelay, ConditionKind};
use crate::ir::cfg::CondVtxEntry;

use super::inspect::{
    branch_at, condition_branch, condition_branch_in_sequence, extracted_condition,
};
use super::{cfg_to_form, BuildCtx};

/// Remove the unconditional nop-delay jump a form ends with. If the form
/// has other elements the branch is popped; a lone branch is replaced by
/// an `Empty` element so the case still appears in the tree.
pub(super) fn strip_trailing_jump(
    pool: &mut FormPool,
    form: FormId,
) -> Result<(), StructureError> {
    let (branch_id, slot) =
        condition_branch(pool, form).ok_or(StructureError::MissingTrailingBranch)?;
    let branch = branch_at(pool, branch_id);
    if !branch.delay.is_nop() {
        return Err(StructureError::BadBranch(
            "jump to end has a non-nop delay slot".to_string(),
        ));
    }
    if branch.condition.kind != ConditionKind::Always {
        return Err(StructureError::BadBranch(
            "jump to end is not unconditional".to_string(),
        ));
    }

    match condition_branch_in_sequence(pool, form)? {
        Some((_, seq)) => {
            pool.pop_back(seq);
        }
        None => {
            let empty = pool.alloc_element(ElementKind::Empty);
            pool.replace_back(slot, empty);
        }
    }
    Ok(())
}

/// Replace the branch at the end of an until loop's condition with the
/// lifted predicate. The machine branch jumps out of the loop on the
/// negated until-predicate, so the extraction inverts.
pub(super) fn clean_up_until_loop(
    pool: &mut FormPool,
    until: ElemId,
) -> Result<(), StructureError> {
    let condition = match pool.kind(until) {
        ElementKind::Until { condition, .. } => *condition,
        _ => unreachable!("element is not an until loop"),
    };
    let (branch_id, slot) =
        condition_branch(pool, condition).ok_or(StructureError::MissingTrailingBranch)?;
    let branch = branch_at(pool, branch_id).clone();
    if !branch.delay.is_nop() {
        return Err(StructureError::BadBranch(
            "until condition branch has a non-nop delay slot".to_string(),
        ));
    }
    let replacement = extracted_condition(pool, &branch.condition, true);
    pool.replace_back(slot, replacement);
    Ok(())
}

/// Remove the self-jump at the end of an infinite while loop's body.
pub(super) fn clean_up_infinite_while_loop(
    pool: &mut FormPool,
    while_elem: ElemId,
) -> Result<(), StructureError> {
    let body = match pool.kind(while_elem) {
        ElementKind::While { body, .. } => *body,
        _ => unreachable!("element is not a while loop"),
    };
    strip_trailing_jump(pool, body)?;
    if let ElementKind::While { cleaned, .. } = &mut pool.elem_mut(while_elem).kind {
        *cleaned = true;
    }
    Ok(())
}

/// Remove the internal branches of a cond-with-else: each arm's condition
/// ends with a skip-this-arm branch (inverted on extraction) and each body
/// ends with a jump over the remaining arms.
pub(super) fn clean_up_cond_with_else(
    pool: &mut FormPool,
    cwe: ElemId,
) -> Result<(), StructureError> {
    let entries = match pool.kind(cwe) {
        ElementKind::CondWithElse { entries, .. } => entries.clone(),
        _ => unreachable!("element is not a cond-with-else"),
    };
    for (idx, entry) in entries.iter().enumerate() {
        if entry.cleaned {
            continue;
        }
        let (branch_id, slot) =
            condition_branch(pool, entry.condition).ok_or(StructureError::MissingTrailingBranch)?;
        let branch = branch_at(pool, branch_id).clone();
        if !branch.delay.is_nop() {
            return Err(StructureError::BadBranch(
                "cond arm branch has a non-nop delay slot".to_string(),
            ));
        }
        // The branch skipped this arm on a false predicate.
        let replacement = extracted_condition(pool, &branch.condition, true);
        pool.replace_back(slot, replacement);

        strip_trailing_jump(pool, entry.body)?;

        if let ElementKind::CondWithElse { entries, .. } = &mut pool.elem_mut(cwe).kind {
            entries[idx].cleaned = true;
        }
    }
    Ok(())
}

/// Remove the branch in a return.
pub(super) fn clean_up_return(pool: &mut FormPool, ret: ElemId) -> Result<(), StructureError> {
    let return_code = match pool.kind(ret) {
        ElementKind::Return { return_code, .. } => *return_code,
        _ => unreachable!("element is not a return"),
    };
    strip_trailing_jump(pool, return_code)
}

/// Remove the branch in a break (a return from a non-function scope).
pub(super) fn clean_up_break(pool: &mut FormPool, brk: ElemId) -> Result<(), StructureError> {
    let return_code = match pool.kind(brk) {
        ElementKind::Break { return_code, .. } => *return_code,
        _ => unreachable!("element is not a break"),
    };
    strip_trailing_jump(pool, return_code)
}

/// The atom of a single-element identity-expression form.
fn atom_src(pool: &FormPool, form: FormId) -> Option<Atom> {
    let elem = pool.try_as_single_element(form)?;
    match pool.kind(elem) {
        ElementKind::Expr(expr) if expr.is_identity() => Some(expr.get_arg(0).clone()),
        _ => None,
    }
}

/// A comparison producing a boolean is recognized upstream as a
/// single-arm cond whose body sets the destination to `#f`. Rebuild it as
/// `(set! dst <comparison>)`. The cond must be the last element of
/// `parent_form`.
fn convert_cond_no_else_to_compare(
    pool: &mut FormPool,
    parent_form: FormId,
) -> Result<(), StructureError> {
    let cne = pool
        .back(parent_form)
        .ok_or_else(|| StructureError::BadCond("no conditional to convert".to_string()))?;
    let entry = match pool.kind(cne) {
        ElementKind::CondNoElse { entries, .. } if entries.len() == 1 => entries[0].clone(),
        _ => {
            return Err(StructureError::BadCond(
                "compare conversion needs exactly one arm".to_string(),
            ))
        }
    };

    let (branch_id, _) =
        condition_branch(pool, entry.condition).ok_or(StructureError::MissingTrailingBranch)?;
    let branch = branch_at(pool, branch_id).clone();

    let body_elem = pool
        .try_as_single_element(entry.body)
        .ok_or_else(|| StructureError::BadCond("compare body is not a single set".to_string()))?;
    let dst = match pool.kind(body_elem) {
        ElementKind::SetVar { dst, src, .. } => {
            let atom = atom_src(pool, *src).ok_or_else(|| {
                StructureError::BadCond("compare body source is not an atom".to_string())
            })?;
            if atom.sym_name() != Some("#f") || !atom.is_sym_ptr() {
                return Err(StructureError::BadCond(
                    "compare body does not set the false symbol".to_string(),
                ));
            }
            *dst
        }
        _ => {
            return Err(StructureError::BadCond(
                "compare body is not a set".to_string(),
            ))
        }
    };

    let condition_was_lone_branch = pool
        .try_as_single_element(entry.condition)
        .is_some_and(|e| pool.kind(e).is_branch());

    let condition = extracted_condition(pool, &branch.condition, false);
    let condition_form = pool.alloc_single_form(None, condition);
    let replacement = pool.alloc_element(ElementKind::SetVar {
        dst,
        src: condition_form,
        is_sequence_point: true,
    });

    if condition_was_lone_branch {
        pool.replace_back(parent_form, replacement);
    } else {
        // The condition is a run of side-effecting ops ending in the
        // branch: swap the branch for the new set and splice the whole run
        // into the parent in place of the cond.
        let seq = entry.condition;
        pool.pop_back(seq);
        pool.push_back(seq, replacement);

        pool.pop_back(parent_form);
        let elems = pool.form(seq).elems.clone();
        for elem in elems {
            pool.push_back(parent_form, elem);
        }
    }
    Ok(())
}

/// Replace the internal branches of a cond-no-else, recording which
/// registers its delay slots set to `#f`. A single-arm cond whose branch
/// delay sets `#t` is really a boolean-producing comparison and is
/// converted outright. The cond must be the last element of `parent_form`.
pub(super) fn clean_up_cond_no_else(
    pool: &mut FormPool,
    parent_form: FormId,
) -> Result<(), StructureError> {
    let cne = pool
        .back(parent_form)
        .ok_or_else(|| StructureError::BadCond("no conditional to clean".to_string()))?;
    let entries = match pool.kind(cne) {
        ElementKind::CondNoElse { entries, .. } => entries.clone(),
        _ => unreachable!("element is not a cond-no-else"),
    };

    for (idx, entry) in entries.iter().enumerate() {
        if entry.cleaned {
            continue;
        }

        let (branch_id, slot) =
            condition_branch(pool, entry.condition).ok_or(StructureError::MissingTrailingBranch)?;
        let branch = branch_at(pool, branch_id).clone();

        if matches!(branch.delay, BranchDelay::SetRegTrue { .. }) && entries.len() == 1 {
            return convert_cond_no_else_to_compare(pool, parent_form);
        }

        let false_destination = match &branch.delay {
            BranchDelay::SetRegFalse { dst } => Some(*dst),
            BranchDelay::Nop => None,
            _ => {
                return Err(StructureError::BadBranch(
                    "cond arm delay slot neither nop nor set-false".to_string(),
                ))
            }
        };
        if branch.condition.kind == ConditionKind::Always {
            return Err(StructureError::BadCond(
                "cond arm with an unconditional branch".to_string(),
            ));
        }

        let replacement = extracted_condition(pool, &branch.condition, true);
        pool.replace_back(slot, replacement);

        if let ElementKind::CondNoElse { entries, .. } = &mut pool.elem_mut(cne).kind {
            let e = &mut entries[idx];
            if false_destination.is_some() {
                e.false_destination = false_destination;
            }
            e.original_branch = Some(branch_id);
            e.cleaned = true;
        }

        if idx + 1 != entries.len() {
            strip_trailing_jump(pool, entry.body)?;
        }
    }
    Ok(())
}

/// Top-level finish for a cond-no-else: promote the recorded false
/// destinations to the cond's final destination register and decide
/// whether the boolean it produces is actually consumed.
pub(super) fn clean_up_cond_no_else_final(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    cne: ElemId,
) -> Result<(), StructureError> {
    let entries = match pool.kind(cne) {
        ElementKind::CondNoElse { entries, .. } => entries.clone(),
        _ => unreachable!("element is not a cond-no-else"),
    };

    let mut final_dst = None;
    for entry in &entries {
        match entry.false_destination {
            Some(fd) => final_dst = Some(fd.reg),
            None => {
                return Err(StructureError::BadCond(
                    "cond arm never recorded a false destination".to_string(),
                ))
            }
        }
    }
    let final_dst = final_dst.ok_or_else(|| {
        StructureError::BadCond("cond with no arms at final cleanup".to_string())
    })?;

    let last = entries.last().ok_or_else(|| {
        StructureError::BadCond("cond with no arms at final cleanup".to_string())
    })?;
    let last_branch_id = last
        .original_branch
        .ok_or_else(|| StructureError::BadCond("cond arm lost its original branch".to_string()))?;
    let last_branch = branch_at(pool, last_branch_id).clone();

    let mut used_as_value = false;
    if let Some(reg_use) = ctx.reg_use {
        let info = &reg_use.op[last_branch.op_id];
        used_as_value = !info.written_and_unused.contains(&final_dst);
    }

    // All earlier false writes must be dead — the cond's own result
    // subsumes them.
    for entry in &entries[..entries.len() - 1] {
        if let Some(reg_use) = ctx.reg_use {
            let branch_id = entry.original_branch.ok_or_else(|| {
                StructureError::BadCond("cond arm lost its original branch".to_string())
            })?;
            let branch = branch_at(pool, branch_id);
            let fd = entry.false_destination.ok_or_else(|| {
                StructureError::BadCond("cond arm never recorded a false destination".to_string())
            })?;
            if !reg_use.op[branch.op_id].written_and_unused.contains(&fd.reg) {
                return Err(StructureError::BadCond(
                    "intermediate false write is not dead".to_string(),
                ));
            }
        }
    }

    if let ElementKind::CondNoElse {
        final_destination,
        used_as_value: uv,
        ..
    } = &mut pool.elem_mut(cne).kind
    {
        *final_destination = Some(final_dst);
        *uv = used_as_value;
    }
    Ok(())
}

/// The CFG pass sometimes recognizes arms out of order and wraps what is
/// really more cond arms into an else. When the else is exactly a leading
/// short circuit followed by another cond, flatten the whole thing into
/// one cond-no-else. Returns `None` on any structural mismatch so the
/// plain cond-with-else path runs instead.
pub(super) fn merge_cond_else_with_sc_cond(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    cwe_entries: &[CondVtxEntry],
    else_form: FormId,
) -> Result<Option<FormId>, StructureError> {
    if pool.form_len(else_form) != 2 {
        return Ok(None);
    }
    let first = pool.at(else_form, 0);
    let second = pool.at(else_form, 1);
    if !matches!(pool.kind(first), ElementKind::ShortCircuit { .. }) {
        return Ok(None);
    }
    let nested_entries = match pool.kind(second) {
        ElementKind::CondNoElse { entries, .. } => entries.clone(),
        _ => return Ok(None),
    };

    let mut entries: Vec<CondNoElseEntry> = Vec::new();
    for entry in cwe_entries {
        entries.push(CondNoElseEntry {
            condition: cfg_to_form(pool, ctx, &entry.condition)?,
            body: cfg_to_form(pool, ctx, &entry.body)?,
            cleaned: false,
            false_destination: None,
            original_branch: None,
        });
    }

    // The nested cond's first condition gains the short circuit as a
    // leading side effect.
    let first_condition = pool.alloc_empty_form();
    pool.push_back(first_condition, first);
    let nested_first_elems = pool.form(nested_entries[0].condition).elems.clone();
    for elem in nested_first_elems {
        pool.push_back(first_condition, elem);
    }
    let mut nested = nested_entries;
    nested[0].condition = first_condition;
    entries.extend(nested);

    let cne = pool.alloc_element(ElementKind::CondNoElse {
        entries,
        final_destination: None,
        used_as_value: false,
    });
    let result = pool.alloc_single_form(None, cne);
    clean_up_cond_no_else(pool, result)?;
    Ok(Some(result))
}
