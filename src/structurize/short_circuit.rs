//! Classifying short-circuit vertices.
//!
//! A short-circuit vertex is a chain of conditionals feeding one result
//! register. Most are `and`/`or` chains, but the compiler also lowers a
//! few intrinsics through the same branch shape: `abs`, `ash` (bidirectional
//! shift) and `type-of`. The special forms are tried first; whatever they
//! reject is classified as a boolean chain, splitting nested chains apart
//! when the delay-slot polarities disagree.

use crate::error::StructureError;
use crate::forms::{ElemId, ElementKind, FormId, FormPool, ScEntry, ScKind};
use crate::ir::atomic::{Atom, BranchDelay, ConditionKind, ExprKind, Register, Variable};
use crate::ir::cfg::CfgVtx;

use super::inspect::{
    branch_at, condition_branch, delay_sets_false, delay_sets_truthy, extracted_condition,
};
use super::{cfg_to_form, BuildCtx};

/// A matched `(set! dst (op arg…))` element.
struct SetOpMatch {
    dst: Variable,
    args: Vec<Atom>,
}

/// Match an element against `(set! dst (kind src…))` where every source is
/// a register. `None` filters are wildcards.
fn match_set_op(
    pool: &FormPool,
    elem: ElemId,
    kind: ExprKind,
    dst: Option<Register>,
    srcs: &[Option<Register>],
) -> Option<SetOpMatch> {
    let (dst_var, src_form) = match pool.kind(elem) {
        ElementKind::SetVar { dst, src, .. } => (*dst, *src),
        _ => return None,
    };
    if let Some(want) = dst {
        if want != dst_var.reg {
            return None;
        }
    }
    let expr_elem = pool.try_as_single_element(src_form)?;
    let expr = match pool.kind(expr_elem) {
        ElementKind::Expr(expr) => expr,
        _ => return None,
    };
    if expr.kind != kind || expr.args.len() != srcs.len() {
        return None;
    }
    for (arg, want) in expr.args.iter().zip(srcs) {
        let var = arg.as_var()?;
        if let Some(want) = want {
            if *want != var.reg {
                return None;
            }
        }
    }
    Some(SetOpMatch {
        dst: dst_var,
        args: expr.args.clone(),
    })
}

/// Try to convert a one-entry short circuit into an integer `abs`:
/// `bltzl src, L; dsubu dst, r0, src`.
pub(super) fn try_sc_as_abs(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    entries: &[CfgVtx],
) -> Result<Option<FormId>, StructureError> {
    if entries.len() != 1 || !matches!(entries[0], CfgVtx::Block(_)) {
        return Ok(None);
    }
    let b0 = cfg_to_form(pool, ctx, &entries[0])?;

    let branch = match pool.back(b0) {
        Some(back) => match pool.kind(back) {
            ElementKind::Branch(op) => op.clone(),
            _ => return Ok(None),
        },
        None => return Ok(None),
    };

    if !branch.likely || branch.condition.kind != ConditionKind::LessThanZeroSigned {
        return Ok(None);
    }
    let (output, negated) = match &branch.delay {
        BranchDelay::Negate { dst, src } => (*dst, *src),
        _ => return Ok(None),
    };
    let input = match branch.condition.src(0).as_var() {
        Some(var) => *var,
        None => return Ok(None),
    };
    if input.reg != negated.reg {
        return Ok(None);
    }

    pool.pop_back(b0);
    let src_var = pool.alloc_single_element_form(None, ElementKind::Atom(Atom::Var(input)));
    let src_abs = pool.alloc_single_element_form(None, ElementKind::Abs { source: src_var });
    let replacement = pool.alloc_element(ElementKind::SetVar {
        dst: output,
        src: src_abs,
        is_sequence_point: true,
    });
    pool.push_back(b0, replacement);
    Ok(Some(b0))
}

/// Try to convert a two-entry short circuit into an `ash` — the shift
/// whose sign picks the direction:
///
/// ```text
/// bgezl s5, L      ; s5 is the shift amount
/// dsllv a0, a0, s5 ; a0 is both input and output
///
/// dsubu a1, r0, s5 ; a1 is a temp
/// dsrav a0, a0, a1
/// ```
pub(super) fn try_sc_as_ash(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    entries: &[CfgVtx],
) -> Result<Option<FormId>, StructureError> {
    if entries.len() != 2 || !matches!(entries[1], CfgVtx::Block(_)) {
        return Ok(None);
    }
    let b0 = cfg_to_form(pool, ctx, &entries[0])?;
    let b1 = cfg_to_form(pool, ctx, &entries[1])?;

    let branch = match pool.back(b0) {
        Some(back) => match pool.kind(back) {
            ElementKind::Branch(op) => op.clone(),
            _ => return Ok(None),
        },
        None => return Ok(None),
    };
    if pool.form_len(b1) != 2 {
        return Ok(None);
    }

    if !branch.likely || branch.condition.kind != ConditionKind::GeqZeroSigned {
        return Ok(None);
    }
    let (result, value_in, sa_in2) = match &branch.delay {
        BranchDelay::Dsllv { dst, value, shift } => (*dst, *value, *shift),
        _ => return Ok(None),
    };
    let sa_in = match branch.condition.src(0).as_var() {
        Some(var) => *var,
        None => return Ok(None),
    };
    if sa_in.reg != sa_in2.reg {
        return Ok(None);
    }

    let dsubu_candidate = pool.at(b1, 0);
    let dsrav_candidate = pool.at(b1, 1);

    let dsubu = match match_set_op(
        pool,
        dsubu_candidate,
        ExprKind::Neg,
        None,
        &[Some(sa_in.reg)],
    ) {
        Some(m) => m,
        None => return Ok(None),
    };
    let clobber = dsubu.dst.reg;

    let arith = match_set_op(
        pool,
        dsrav_candidate,
        ExprKind::RightShiftArith,
        Some(result.reg),
        &[Some(value_in.reg), Some(clobber)],
    );
    let logical = match_set_op(
        pool,
        dsrav_candidate,
        ExprKind::RightShiftLogic,
        Some(result.reg),
        &[Some(value_in.reg), Some(clobber)],
    );
    let (is_arith, shift_match) = match (arith, logical) {
        (Some(m), _) => (true, m),
        (None, Some(m)) => (false, m),
        (None, None) => return Ok(None),
    };

    let clobber_var = (clobber != result.reg).then_some(dsubu.dst);
    let value_atom = shift_match.args[0].clone();
    let shift_atom = branch.condition.src(0).clone();

    pool.pop_back(b0);
    let value_form = pool.alloc_single_element_form(None, ElementKind::Atom(value_atom));
    let shift_form = pool.alloc_single_element_form(None, ElementKind::Atom(shift_atom));
    let ash_form = pool.alloc_single_element_form(
        None,
        ElementKind::Ash {
            shift: shift_form,
            value: value_form,
            clobber: clobber_var,
            is_arith,
        },
    );
    let replacement = pool.alloc_element(ElementKind::SetVar {
        dst: result,
        src: ash_form,
        is_sequence_point: true,
    });
    pool.push_back(b0, replacement);
    Ok(Some(b0))
}

/// Try to convert a three-entry short circuit into a `type-of`:
///
/// ```text
///     dsll32 v1, a0, 29   ; (set! v1 (shl a0 61))
///     beql v1, r0, L60
///     lw v1, binteger(s7)
///
///     bgtzl v1, L60
///     lw v1, pair(s7)
///
///     lwu v1, -4(a0)      ; basics store their type at -4
/// L60:
/// ```
pub(super) fn try_sc_as_type_of(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    entries: &[CfgVtx],
) -> Result<Option<FormId>, StructureError> {
    if entries.len() != 3
        || !matches!(entries[1], CfgVtx::Block(_))
        || !matches!(entries[2], CfgVtx::Block(_))
    {
        return Ok(None);
    }

    let b0 = cfg_to_form(pool, ctx, &entries[0])?;
    if pool.form_len(b0) <= 1 {
        return Ok(None);
    }
    let b1 = cfg_to_form(pool, ctx, &entries[1])?;
    let b2 = cfg_to_form(pool, ctx, &entries[2])?;

    let second_branch = match pool.try_as_single_element(b1) {
        Some(elem) => match pool.kind(elem) {
            ElementKind::Branch(op) => op.clone(),
            _ => return Ok(None),
        },
        None => return Ok(None),
    };
    let (else_dst, else_src) = match pool.try_as_single_element(b2) {
        Some(elem) => match pool.kind(elem) {
            ElementKind::SetVar { dst, src, .. } => (*dst, *src),
            _ => return Ok(None),
        },
        None => return Ok(None),
    };

    // Second-to-last op of the first block: the shift that exposes the tag
    // bits.
    let set_shift = pool.at(b0, pool.form_len(b0) - 2);
    let (temp_reg0, shift_src) = match pool.kind(set_shift) {
        ElementKind::SetVar { dst, src, .. } => (*dst, *src),
        _ => return Ok(None),
    };
    let shift_expr = match pool.try_as_single_element(shift_src) {
        Some(elem) => match pool.kind(elem) {
            ElementKind::Expr(expr) if expr.kind == ExprKind::LeftShift => expr.clone(),
            _ => return Ok(None),
        },
        None => return Ok(None),
    };
    let src_reg = match shift_expr.get_arg(0).as_var() {
        Some(var) => *var,
        None => return Ok(None),
    };
    if shift_expr.get_arg(1).as_int() != Some(61) {
        return Ok(None);
    }

    let first_branch = match pool.back(b0) {
        Some(back) => match pool.kind(back) {
            ElementKind::Branch(op) => op.clone(),
            _ => return Ok(None),
        },
        None => return Ok(None),
    };
    let dst_reg = match &first_branch.delay {
        BranchDelay::SetBinteger { dst } => *dst,
        _ => return Ok(None),
    };
    if first_branch.condition.kind != ConditionKind::Zero || !first_branch.likely {
        return Ok(None);
    }
    let temp_reg = match first_branch.condition.src(0).as_var() {
        Some(var) => *var,
        None => return Ok(None),
    };
    if temp_reg.reg != temp_reg0.reg {
        return Ok(None);
    }

    let dst_reg2 = match &second_branch.delay {
        BranchDelay::SetPair { dst } => *dst,
        _ => return Ok(None),
    };
    if second_branch.condition.kind != ConditionKind::GreaterThanZeroSigned
        || !second_branch.likely
        || dst_reg2.reg != dst_reg.reg
    {
        return Ok(None);
    }

    // The else case loads the type of a basic from 4 bytes before it.
    if else_dst.reg != dst_reg.reg {
        return Ok(None);
    }
    let load_addr = match pool.try_as_single_element(else_src) {
        Some(elem) => match pool.kind(elem) {
            ElementKind::LoadSource {
                kind: crate::ir::atomic::LoadKind::Unsigned,
                size: 4,
                addr,
            } => *addr,
            _ => return Ok(None),
        },
        None => return Ok(None),
    };
    let load_expr = match pool.try_as_single_element(load_addr) {
        Some(elem) => match pool.kind(elem) {
            ElementKind::Expr(expr) if expr.kind == ExprKind::Add => expr.clone(),
            _ => return Ok(None),
        },
        None => return Ok(None),
    };
    match load_expr.get_arg(0).as_var() {
        Some(var) if var.reg == src_reg.reg => {}
        _ => return Ok(None),
    }
    if load_expr.get_arg(1).as_int() != Some(-4) {
        return Ok(None);
    }

    let clobber = (temp_reg.reg != dst_reg.reg).then_some(temp_reg);

    // Drop the branch and the shift; everything before them stays.
    pool.pop_back(b0);
    pool.pop_back(b0);

    let obj = pool.alloc_single_element_form(
        None,
        ElementKind::Atom(shift_expr.get_arg(0).clone()),
    );
    let type_of = pool.alloc_single_element_form(
        None,
        ElementKind::TypeOf {
            source: obj,
            clobber,
        },
    );
    let replacement = pool.alloc_element(ElementKind::SetVar {
        dst: else_dst,
        src: type_of,
        is_sequence_point: true,
    });
    pool.push_back(b0, replacement);
    Ok(Some(b0))
}

/// Try to classify a short circuit as the given boolean combinator. Every
/// non-last entry must end in a branch whose delay slot sets the same
/// register to false (`and`) or truthy (`or`).
///
/// An `and` chain also matches `or` as a very strange chain, so callers
/// must try `and` first.
fn try_classify_sc(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    sc: ElemId,
    kind: ScKind,
) -> Result<bool, StructureError> {
    let entries = match pool.kind(sc) {
        ElementKind::ShortCircuit { entries, .. } => entries.clone(),
        _ => unreachable!("element is not a short circuit"),
    };
    let delay_matches: fn(&crate::ir::atomic::BranchOp) -> bool = match kind {
        ScKind::And => delay_sets_false,
        ScKind::Or => delay_sets_truthy,
        ScKind::Undetermined => unreachable!("cannot classify as undetermined"),
    };

    let mut dest: Option<Variable> = None;
    for entry in &entries[..entries.len() - 1] {
        let (branch_id, _) =
            condition_branch(pool, entry.condition).ok_or(StructureError::MissingTrailingBranch)?;
        let branch = branch_at(pool, branch_id);
        if !delay_matches(branch) {
            return Ok(false);
        }
        let written = branch.delay.dst_var().copied().ok_or_else(|| {
            StructureError::BadBranch("short circuit delay writes no register".to_string())
        })?;
        match dest {
            None => dest = Some(written),
            Some(first) => {
                if first.reg != written.reg {
                    return Ok(false);
                }
            }
        }
    }
    let dest = match dest {
        Some(dest) => dest,
        None => return Ok(false),
    };

    if let ElementKind::ShortCircuit {
        kind: k,
        final_result,
        ..
    } = &mut pool.elem_mut(sc).kind
    {
        *k = kind;
        *final_result = Some(dest);
    }

    let mut live_out: Option<bool> = None;
    for (i, entry) in entries[..entries.len() - 1].iter().enumerate() {
        let (branch_id, slot) =
            condition_branch(pool, entry.condition).ok_or(StructureError::MissingTrailingBranch)?;
        let branch = branch_at(pool, branch_id).clone();

        if let Some(reg_use) = ctx.reg_use {
            let this_live_out = !reg_use.op[branch.op_id]
                .written_and_unused
                .contains(&dest.reg);
            match live_out {
                None => live_out = Some(this_live_out),
                Some(first) if first != this_live_out => {
                    tracing::error!(
                        "Bad live out result on {}. At 0 was {} now at {} is {}",
                        ctx.name,
                        first,
                        i,
                        this_live_out
                    );
                }
                _ => {}
            }
        }

        // `and` tests continue on the truthy side of the branch, so the
        // lifted boolean is the inverse of the branch predicate; `or`
        // continues on the false side and keeps it as-is.
        let replacement = extracted_condition(pool, &branch.condition, kind == ScKind::And);
        pool.replace_back(slot, replacement);
    }

    if let ElementKind::ShortCircuit { used_as_value, .. } = &mut pool.elem_mut(sc).kind {
        *used_as_value = live_out.unwrap_or(false);
    }
    Ok(true)
}

/// Split a short circuit whose entries change polarity partway through:
/// the CFG pass flattens `(and x (or y z))` into one vertex. Entries from
/// the first polarity change on become a nested short circuit, classified
/// recursively, and the outer chain is classified again with the nested
/// one as its final entry. Works at any nesting depth.
fn try_splitting_nested_sc(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    sc: ElemId,
) -> Result<(), StructureError> {
    let entries = match pool.kind(sc) {
        ElementKind::ShortCircuit { entries, .. } => entries.clone(),
        _ => unreachable!("element is not a short circuit"),
    };

    let polarity = |pool: &FormPool, condition: FormId| -> Result<bool, StructureError> {
        let (branch_id, _) =
            condition_branch(pool, condition).ok_or(StructureError::MissingTrailingBranch)?;
        let branch = branch_at(pool, branch_id);
        let is_and = delay_sets_false(branch);
        let is_or = delay_sets_truthy(branch);
        if is_and == is_or {
            return Err(StructureError::BadBranch(
                "short circuit delay has no polarity".to_string(),
            ));
        }
        Ok(is_and)
    };

    let first_is_and = polarity(pool, entries[0].condition)?;
    let mut first_different = None;
    for (i, entry) in entries.iter().enumerate().take(entries.len() - 1).skip(1) {
        if polarity(pool, entry.condition)? != first_is_and {
            first_different = Some(i);
            break;
        }
    }
    let split_at = first_different.ok_or(StructureError::UnclassifiedShortCircuit)?;

    let nested: Vec<ScEntry> = entries[split_at..].to_vec();
    if let ElementKind::ShortCircuit { entries, .. } = &mut pool.elem_mut(sc).kind {
        entries.truncate(split_at);
    }

    let nested_sc = pool.alloc_element(ElementKind::ShortCircuit {
        kind: ScKind::Undetermined,
        entries: nested,
        final_result: None,
        used_as_value: false,
    });
    clean_up_sc(pool, ctx, nested_sc)?;

    let nested_form = pool.alloc_single_form(Some(sc), nested_sc);
    if let ElementKind::ShortCircuit { entries, .. } = &mut pool.elem_mut(sc).kind {
        entries.push(ScEntry {
            condition: nested_form,
        });
    }

    clean_up_sc(pool, ctx, sc)
}

/// Classify one short circuit, splitting it into nested ones if its
/// polarities are mixed.
pub(super) fn clean_up_sc(
    pool: &mut FormPool,
    ctx: &BuildCtx<'_>,
    sc: ElemId,
) -> Result<(), StructureError> {
    let len = match pool.kind(sc) {
        ElementKind::ShortCircuit { entries, .. } => entries.len(),
        _ => unreachable!("element is not a short circuit"),
    };
    if len <= 1 {
        return Err(StructureError::BadCond(
            "short circuit with a single entry".to_string(),
        ));
    }
    if !try_classify_sc(pool, ctx, sc, ScKind::And)? && !try_classify_sc(pool, ctx, sc, ScKind::Or)?
    {
        try_splitting_nested_sc(pool, ctx, sc)?;
    }
    Ok(())
}
