//! The structured form tree: `Form` sequences of tagged elements.
//!
//! Forms and elements live in a per-function arena ([`crate::forms::FormPool`])
//! and refer to each other by handle. Parent links point the other way and
//! are recomputed whenever a node is inserted somewhere new.

use serde::{Deserialize, Serialize};

use crate::define_entity;
use crate::ir::atomic::{
    Atom, BranchOp, ConditionKind, LoadKind, Register, SimpleExpr, Variable,
};

define_entity!(FormId);
define_entity!(ElemId);

/// An ordered sequence of elements. The last slot can be rewritten in
/// place, which is how cleaners patch residual branches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Form {
    pub elems: Vec<ElemId>,
    /// The element this form is a direct child of, if any.
    pub parent: Option<ElemId>,
}

/// One node of the form tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormElement {
    pub kind: ElementKind,
    /// The form this element currently sits in.
    pub parent: Option<FormId>,
}

/// One arm of a cond-with-else.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CondEntry {
    pub condition: FormId,
    pub body: FormId,
    pub cleaned: bool,
}

/// One arm of a cond-no-else.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CondNoElseEntry {
    pub condition: FormId,
    pub body: FormId,
    pub cleaned: bool,
    /// The register the arm's branch delay slot set to `#f`, when it did.
    pub false_destination: Option<Variable>,
    /// The branch element the condition ended with, saved before it was
    /// replaced. The final pass needs its op id for liveness lookups.
    pub original_branch: Option<ElemId>,
}

/// One arm of a short circuit (just the condition; there are no bodies).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScEntry {
    pub condition: FormId,
}

/// Boolean combinator of a short circuit.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ScKind {
    /// Not yet classified. Never survives the pass.
    Undetermined,
    And,
    Or,
}

/// The element variants of the form tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ElementKind {
    /// A case with no code in it, kept so the tree still records that the
    /// source tested for it.
    Empty,
    Expr(SimpleExpr),
    Atom(Atom),
    SetVar {
        dst: Variable,
        src: FormId,
        is_sequence_point: bool,
    },
    LoadSource {
        kind: LoadKind,
        size: u16,
        addr: FormId,
    },
    Branch(BranchOp),
    /// A lifted boolean — a branch predicate with the branch target gone.
    Condition { kind: ConditionKind, src: Vec<Atom> },
    While {
        condition: FormId,
        body: FormId,
        cleaned: bool,
    },
    Until {
        condition: FormId,
        body: FormId,
    },
    CondWithElse {
        entries: Vec<CondEntry>,
        else_body: FormId,
    },
    CondNoElse {
        entries: Vec<CondNoElseEntry>,
        final_destination: Option<Register>,
        used_as_value: bool,
    },
    ShortCircuit {
        kind: ScKind,
        entries: Vec<ScEntry>,
        final_result: Option<Variable>,
        used_as_value: bool,
    },
    Return {
        return_code: FormId,
        dead_code: FormId,
    },
    Break {
        return_code: FormId,
        dead_code: FormId,
    },
    Abs { source: FormId },
    Ash {
        shift: FormId,
        value: FormId,
        clobber: Option<Variable>,
        is_arith: bool,
    },
    TypeOf {
        source: FormId,
        clobber: Option<Variable>,
    },
}

impl ElementKind {
    /// The forms this element directly owns, in source order.
    pub fn child_forms(&self) -> Vec<FormId> {
        match self {
            ElementKind::Empty
            | ElementKind::Expr(_)
            | ElementKind::Atom(_)
            | ElementKind::Branch(_)
            | ElementKind::Condition { .. } => Vec::new(),
            ElementKind::SetVar { src, .. } => vec![*src],
            ElementKind::LoadSource { addr, .. } => vec![*addr],
            ElementKind::While {
                condition, body, ..
            }
            | ElementKind::Until { condition, body } => vec![*condition, *body],
            ElementKind::CondWithElse { entries, else_body } => {
                let mut out: Vec<FormId> =
                    entries.iter().flat_map(|e| [e.condition, e.body]).collect();
                out.push(*else_body);
                out
            }
            ElementKind::CondNoElse { entries, .. } => {
                entries.iter().flat_map(|e| [e.condition, e.body]).collect()
            }
            ElementKind::ShortCircuit { entries, .. } => {
                entries.iter().map(|e| e.condition).collect()
            }
            ElementKind::Return {
                return_code,
                dead_code,
            }
            | ElementKind::Break {
                return_code,
                dead_code,
            } => vec![*return_code, *dead_code],
            ElementKind::Abs { source } => vec![*source],
            ElementKind::Ash { shift, value, .. } => vec![*shift, *value],
            ElementKind::TypeOf { source, .. } => vec![*source],
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, ElementKind::Branch(_))
    }
}
