//! Locating and classifying the residual branches at the ends of forms.

use crate::error::StructureError;
use crate::forms::{ElemId, ElementKind, FormId, FormPool};
use crate::ir::atomic::{BranchDelay, BranchOp, Condition, ConditionKind};

/// Find the branch a form ends with, together with the form whose last
/// slot holds it (so the slot can be rewritten). If the trailing element
/// is a return or break, the branch it swallowed sits at the end of its
/// dead code, so the search recurses there.
pub(crate) fn condition_branch(pool: &FormPool, form: FormId) -> Option<(ElemId, FormId)> {
    let back = pool.back(form)?;
    match pool.kind(back) {
        ElementKind::Branch(_) => Some((back, form)),
        ElementKind::Return { dead_code, .. } | ElementKind::Break { dead_code, .. } => {
            condition_branch(pool, *dead_code)
        }
        _ => None,
    }
}

/// Like [`condition_branch`], but only when the form has more than one
/// element — the caller wants to pop the branch rather than rewrite its
/// slot, and popping a single-element form would leave it empty.
/// A multi-element form that does not end in a branch is malformed here.
pub(crate) fn condition_branch_in_sequence(
    pool: &FormPool,
    form: FormId,
) -> Result<Option<(ElemId, FormId)>, StructureError> {
    match pool.back(form) {
        Some(back) if pool.form_len(form) > 1 => {
            if !pool.kind(back).is_branch() {
                return Err(StructureError::BadBranch(
                    "multi-element form does not end in a branch".to_string(),
                ));
            }
            Ok(Some((back, form)))
        }
        _ => Ok(None),
    }
}

/// The branch op of an element known to be a branch.
pub(crate) fn branch_at(pool: &FormPool, elem: ElemId) -> &BranchOp {
    match pool.kind(elem) {
        ElementKind::Branch(op) => op,
        _ => unreachable!("element is not a branch"),
    }
}

/// Does the delay slot set a register to the false symbol?
/// A `beql s7, x` followed by `or y, x, r0` counts too — the compiler
/// emits this on comparisons to false for reasons unknown.
pub(crate) fn delay_sets_false(branch: &BranchOp) -> bool {
    if matches!(branch.delay, BranchDelay::SetRegFalse { .. }) {
        return true;
    }
    if branch.condition.kind == ConditionKind::False {
        if let BranchDelay::SetRegReg { src, .. } = &branch.delay {
            if let Some(cond_var) = branch.condition.src(0).as_var() {
                return cond_var.reg == src.reg;
            }
        }
    }
    false
}

/// Does the delay slot set a register to a truthy value, as in an `or`
/// chain? Either it sets `#t` outright, or the branch tested the value
/// for not-false and the delay slot forwards that same value.
pub(crate) fn delay_sets_truthy(branch: &BranchOp) -> bool {
    if matches!(branch.delay, BranchDelay::SetRegTrue { .. }) {
        return true;
    }
    if branch.condition.kind == ConditionKind::Truthy {
        if let BranchDelay::SetRegReg { src, .. } = &branch.delay {
            if let Some(cond_var) = branch.condition.src(0).as_var() {
                return cond_var.reg == src.reg;
            }
        }
    }
    false
}

/// Lift a branch predicate into a standalone condition element,
/// optionally flipping its polarity.
pub(crate) fn extracted_condition(
    pool: &mut FormPool,
    condition: &Condition,
    invert: bool,
) -> ElemId {
    let kind = if invert {
        condition.kind.invert()
    } else {
        condition.kind
    };
    pool.alloc_element(ElementKind::Condition {
        kind,
        src: condition.src.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::atomic::{Atom, Register, Variable};
    use crate::ir::func::OpId;

    fn var(reg: Register) -> Variable {
        Variable {
            reg,
            op_id: OpId::new(0),
        }
    }

    fn branch(kind: ConditionKind, src: Vec<Atom>, delay: BranchDelay) -> BranchOp {
        BranchOp {
            condition: Condition::new(kind, src),
            delay,
            likely: false,
            op_id: OpId::new(0),
        }
    }

    fn alloc_branch(pool: &mut FormPool, op: BranchOp) -> ElemId {
        pool.alloc_element(ElementKind::Branch(op))
    }

    #[test]
    fn finds_trailing_branch() {
        let mut pool = FormPool::new();
        let b = alloc_branch(
            &mut pool,
            branch(ConditionKind::Always, vec![], BranchDelay::Nop),
        );
        let form = pool.alloc_single_form(None, b);
        assert_eq!(condition_branch(&pool, form), Some((b, form)));
    }

    #[test]
    fn recurses_through_return_dead_code() {
        let mut pool = FormPool::new();
        let b = alloc_branch(
            &mut pool,
            branch(ConditionKind::Always, vec![], BranchDelay::Nop),
        );
        let dead = pool.alloc_single_form(None, b);
        let code = pool.alloc_single_element_form(None, ElementKind::Empty);
        let ret = pool.alloc_element(ElementKind::Return {
            return_code: code,
            dead_code: dead,
        });
        let form = pool.alloc_single_form(None, ret);
        assert_eq!(condition_branch(&pool, form), Some((b, dead)));
    }

    #[test]
    fn no_branch_found() {
        let mut pool = FormPool::new();
        let form = pool.alloc_single_element_form(None, ElementKind::Empty);
        assert_eq!(condition_branch(&pool, form), None);
    }

    #[test]
    fn in_sequence_requires_multiple_elements() {
        let mut pool = FormPool::new();
        let b = alloc_branch(
            &mut pool,
            branch(ConditionKind::Always, vec![], BranchDelay::Nop),
        );
        let form = pool.alloc_single_form(None, b);
        assert_eq!(condition_branch_in_sequence(&pool, form).unwrap(), None);

        let e = pool.alloc_element(ElementKind::Empty);
        let b2 = alloc_branch(
            &mut pool,
            branch(ConditionKind::Always, vec![], BranchDelay::Nop),
        );
        let multi = pool.alloc_sequence_form(None, vec![e, b2]);
        assert_eq!(
            condition_branch_in_sequence(&pool, multi).unwrap(),
            Some((b2, multi))
        );
    }

    #[test]
    fn in_sequence_rejects_non_branch_tail() {
        let mut pool = FormPool::new();
        let a = pool.alloc_element(ElementKind::Empty);
        let b = pool.alloc_element(ElementKind::Empty);
        let form = pool.alloc_sequence_form(None, vec![a, b]);
        assert!(condition_branch_in_sequence(&pool, form).is_err());
    }

    #[test]
    fn set_reg_false_delay() {
        let b = branch(
            ConditionKind::Truthy,
            vec![Atom::Var(var(Register::A0))],
            BranchDelay::SetRegFalse {
                dst: var(Register::V0),
            },
        );
        assert!(delay_sets_false(&b));
        assert!(!delay_sets_truthy(&b));
    }

    #[test]
    fn false_compare_with_forwarding_delay_sets_false() {
        // beql s7, a0 ; or v0, a0, r0
        let b = branch(
            ConditionKind::False,
            vec![Atom::Var(var(Register::A0))],
            BranchDelay::SetRegReg {
                dst: var(Register::V0),
                src: var(Register::A0),
            },
        );
        assert!(delay_sets_false(&b));

        let mismatched = branch(
            ConditionKind::False,
            vec![Atom::Var(var(Register::A0))],
            BranchDelay::SetRegReg {
                dst: var(Register::V0),
                src: var(Register::A1),
            },
        );
        assert!(!delay_sets_false(&mismatched));
    }

    #[test]
    fn truthy_forwarding_delay_sets_truthy() {
        let b = branch(
            ConditionKind::Truthy,
            vec![Atom::Var(var(Register::A0))],
            BranchDelay::SetRegReg {
                dst: var(Register::V0),
                src: var(Register::A0),
            },
        );
        assert!(delay_sets_truthy(&b));
        assert!(!delay_sets_false(&b));
    }

    #[test]
    fn extraction_inverts_on_request() {
        let mut pool = FormPool::new();
        let cond = Condition::new(ConditionKind::Zero, vec![Atom::Var(var(Register::A0))]);
        let direct = extracted_condition(&mut pool, &cond, false);
        let flipped = extracted_condition(&mut pool, &cond, true);
        assert!(matches!(
            pool.kind(direct),
            ElementKind::Condition {
                kind: ConditionKind::Zero,
                ..
            }
        ));
        assert!(matches!(
            pool.kind(flipped),
            ElementKind::Condition {
                kind: ConditionKind::Nonzero,
                ..
            }
        ));
    }
}
