//! Single-line s-expression rendering of form trees.
//!
//! The notation follows the source language the decompiler targets:
//! `(set! v0 (abs v1))`, `(while #t …)`, conditions as `(<0.s a0)`.
//! Meant for tests and debugging, not for final output.

use crate::forms::element::{ElemId, ElementKind, FormId, ScKind};
use crate::forms::pool::FormPool;
use crate::ir::atomic::{Atom, BranchDelay, BranchOp, Condition, ConditionKind, ExprKind, LoadKind, SimpleExpr};

fn atom_to_string(atom: &Atom) -> String {
    match atom {
        Atom::Var(v) => v.reg.to_string(),
        Atom::Int(i) => i.to_string(),
        Atom::SymPtr(s) if s == "#f" || s == "#t" => s.clone(),
        Atom::SymPtr(s) => format!("'{s}"),
        Atom::SymVal(s) => s.clone(),
    }
}

fn expr_op_token(kind: ExprKind) -> &'static str {
    match kind {
        ExprKind::Identity => "",
        ExprKind::Add => "+",
        ExprKind::Sub => "-",
        ExprKind::Mul => "*",
        ExprKind::Div => "/",
        ExprKind::And => "logand",
        ExprKind::Or => "logior",
        ExprKind::Xor => "logxor",
        ExprKind::Neg => "-",
        ExprKind::LeftShift => "shl",
        ExprKind::RightShiftArith => "sar",
        ExprKind::RightShiftLogic => "shr",
    }
}

fn expr_to_string(expr: &SimpleExpr) -> String {
    if expr.is_identity() {
        return atom_to_string(&expr.args[0]);
    }
    let args: Vec<String> = expr.args.iter().map(atom_to_string).collect();
    format!("({} {})", expr_op_token(expr.kind), args.join(" "))
}

fn condition_to_string(kind: ConditionKind, src: &[Atom]) -> String {
    let op = match kind {
        ConditionKind::Always => return "#t".to_string(),
        ConditionKind::Never => return "#f".to_string(),
        ConditionKind::False => "not",
        ConditionKind::Truthy => "truthy",
        ConditionKind::Zero => "zero?",
        ConditionKind::Nonzero => "nonzero?",
        ConditionKind::Equal => "=",
        ConditionKind::NotEqual => "!=",
        ConditionKind::LessThanSigned => "<.s",
        ConditionKind::GeqSigned => ">=.s",
        ConditionKind::GreaterThanSigned => ">.s",
        ConditionKind::LeqSigned => "<=.s",
        ConditionKind::LessThanUnsigned => "<.u",
        ConditionKind::GeqUnsigned => ">=.u",
        ConditionKind::GreaterThanUnsigned => ">.u",
        ConditionKind::LeqUnsigned => "<=.u",
        ConditionKind::LessThanZeroSigned => "<0.s",
        ConditionKind::GeqZeroSigned => ">=0.s",
        ConditionKind::GreaterThanZeroSigned => ">0.s",
        ConditionKind::LeqZeroSigned => "<=0.s",
    };
    let args: Vec<String> = src.iter().map(atom_to_string).collect();
    format!("({} {})", op, args.join(" "))
}

fn delay_to_string(delay: &BranchDelay) -> String {
    match delay {
        BranchDelay::Nop => "(nop!)".to_string(),
        BranchDelay::SetRegFalse { dst } => format!("(set! {} #f)", dst.reg),
        BranchDelay::SetRegTrue { dst } => format!("(set! {} #t)", dst.reg),
        BranchDelay::SetRegReg { dst, src } => format!("(set! {} {})", dst.reg, src.reg),
        BranchDelay::SetBinteger { dst } => format!("(set! {} binteger)", dst.reg),
        BranchDelay::SetPair { dst } => format!("(set! {} pair)", dst.reg),
        BranchDelay::Negate { dst, src } => format!("(set! {} (- {}))", dst.reg, src.reg),
        BranchDelay::Dsllv { dst, value, shift } => {
            format!("(set! {} (shl {} {}))", dst.reg, value.reg, shift.reg)
        }
    }
}

fn branch_to_string(branch: &BranchOp) -> String {
    let Condition { kind, src } = &branch.condition;
    format!(
        "(b{}! {} {})",
        if branch.likely { "l" } else { "" },
        condition_to_string(*kind, src),
        delay_to_string(&branch.delay)
    )
}

/// Elements of `form` joined with spaces (no wrapping).
fn seq_inline(pool: &FormPool, form: FormId) -> String {
    pool.form(form)
        .elems
        .iter()
        .map(|&e| elem_to_string(pool, e))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a form: its single element, or a `(begin …)` sequence.
pub fn form_to_string(pool: &FormPool, form: FormId) -> String {
    match pool.form(form).elems.as_slice() {
        [single] => elem_to_string(pool, *single),
        _ => format!("(begin {})", seq_inline(pool, form)),
    }
}

/// Render one element.
pub fn elem_to_string(pool: &FormPool, elem: ElemId) -> String {
    match pool.kind(elem) {
        ElementKind::Empty => "(empty)".to_string(),
        ElementKind::Expr(expr) => expr_to_string(expr),
        ElementKind::Atom(atom) => atom_to_string(atom),
        ElementKind::SetVar { dst, src, .. } => {
            format!("(set! {} {})", dst.reg, form_to_string(pool, *src))
        }
        ElementKind::LoadSource { kind, size, addr } => {
            let sig = match kind {
                LoadKind::Unsigned => "u",
                LoadKind::Signed => "s",
                LoadKind::Float => "f",
            };
            format!("(l.{}{} {})", sig, size, form_to_string(pool, *addr))
        }
        ElementKind::Branch(branch) => branch_to_string(branch),
        ElementKind::Condition { kind, src } => condition_to_string(*kind, src),
        ElementKind::While {
            condition, body, ..
        } => format!(
            "(while {} {})",
            form_to_string(pool, *condition),
            seq_inline(pool, *body)
        ),
        ElementKind::Until { condition, body } => format!(
            "(until {} {})",
            form_to_string(pool, *condition),
            seq_inline(pool, *body)
        ),
        ElementKind::CondWithElse { entries, else_body } => {
            let mut out = String::from("(cond");
            for e in entries {
                out.push_str(&format!(
                    " ({} {})",
                    form_to_string(pool, e.condition),
                    seq_inline(pool, e.body)
                ));
            }
            out.push_str(&format!(" (else {}))", seq_inline(pool, *else_body)));
            out
        }
        ElementKind::CondNoElse { entries, .. } => {
            let mut out = String::from("(cond");
            for e in entries {
                out.push_str(&format!(
                    " ({} {})",
                    form_to_string(pool, e.condition),
                    seq_inline(pool, e.body)
                ));
            }
            out.push(')');
            out
        }
        ElementKind::ShortCircuit { kind, entries, .. } => {
            let op = match kind {
                ScKind::Undetermined => "sc",
                ScKind::And => "and",
                ScKind::Or => "or",
            };
            let parts: Vec<String> = entries
                .iter()
                .map(|e| form_to_string(pool, e.condition))
                .collect();
            format!("({} {})", op, parts.join(" "))
        }
        ElementKind::Return {
            return_code,
            dead_code,
        } => format!(
            "(return {} {})",
            form_to_string(pool, *return_code),
            form_to_string(pool, *dead_code)
        ),
        ElementKind::Break {
            return_code,
            dead_code,
        } => format!(
            "(break {} {})",
            form_to_string(pool, *return_code),
            form_to_string(pool, *dead_code)
        ),
        ElementKind::Abs { source } => format!("(abs {})", form_to_string(pool, *source)),
        ElementKind::Ash { shift, value, .. } => format!(
            "(ash {} {})",
            form_to_string(pool, *value),
            form_to_string(pool, *shift)
        ),
        ElementKind::TypeOf { source, .. } => {
            format!("(type-of {})", form_to_string(pool, *source))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::atomic::{Register, Variable};
    use crate::ir::func::OpId;

    fn var(reg: Register) -> Variable {
        Variable {
            reg,
            op_id: OpId::new(0),
        }
    }

    #[test]
    fn prints_set_with_expr() {
        let mut pool = FormPool::new();
        let src = pool.alloc_single_element_form(
            None,
            ElementKind::Expr(SimpleExpr::binary(
                ExprKind::Add,
                Atom::Var(var(Register::A0)),
                Atom::Int(1),
            )),
        );
        let set = pool.alloc_element(ElementKind::SetVar {
            dst: var(Register::A0),
            src,
            is_sequence_point: true,
        });
        assert_eq!(elem_to_string(&pool, set), "(set! a0 (+ a0 1))");
    }

    #[test]
    fn prints_conditions() {
        assert_eq!(condition_to_string(ConditionKind::Always, &[]), "#t");
        assert_eq!(
            condition_to_string(
                ConditionKind::LessThanZeroSigned,
                &[Atom::Var(var(Register::A0))]
            ),
            "(<0.s a0)"
        );
    }

    #[test]
    fn prints_false_symbol_bare() {
        assert_eq!(atom_to_string(&Atom::SymPtr("#f".to_string())), "#f");
        assert_eq!(atom_to_string(&Atom::SymPtr("pair".to_string())), "'pair");
    }

    #[test]
    fn multi_element_form_wraps_in_begin() {
        let mut pool = FormPool::new();
        let a = pool.alloc_element(ElementKind::Empty);
        let b = pool.alloc_element(ElementKind::Empty);
        let form = pool.alloc_sequence_form(None, vec![a, b]);
        assert_eq!(form_to_string(&pool, form), "(begin (empty) (empty))");
    }
}
