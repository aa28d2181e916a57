//! The atomic-op vocabulary produced by the upstream block analysis.
//!
//! These are the per-basic-block operations the structuring pass consumes:
//! register moves with simple expression or load sources, and branches with
//! their delay-slot semantics. Everything here is immutable input; the pass
//! converts ops to form elements with [`AtomicOp::get_as_form`].

use serde::{Deserialize, Serialize};

use crate::forms::{ElemId, ElementKind, FormPool};
use crate::ir::func::OpId;

/// A general-purpose register of the source machine, by MIPS index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Register(pub u8);

impl Register {
    pub const V0: Register = Register(2);
    pub const V1: Register = Register(3);
    pub const A0: Register = Register(4);
    pub const A1: Register = Register(5);
    pub const A2: Register = Register(6);
    pub const A3: Register = Register(7);
    pub const T0: Register = Register(8);
    pub const T1: Register = Register(9);
    pub const S5: Register = Register(21);
    /// Holds the symbol table base; also the false symbol `#f` itself.
    pub const S7: Register = Register(23);
}

const REG_NAMES: [&str; 32] = [
    "r0", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7",
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "s8", "ra",
];

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match REG_NAMES.get(self.0 as usize) {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "r?{}", self.0),
        }
    }
}

/// A single register access, tied to the atomic op that performs it.
/// Later passes map `(reg, op_id)` pairs to program variables.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Variable {
    pub reg: Register,
    pub op_id: OpId,
}

/// The leaf operand of a simple expression or condition.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Atom {
    Var(Variable),
    Int(i64),
    /// A pointer to an interned symbol (e.g. `#f`, `binteger`).
    SymPtr(String),
    /// The value stored in a symbol's cell.
    SymVal(String),
}

impl Atom {
    /// The variable, for `Var` atoms.
    pub fn as_var(&self) -> Option<&Variable> {
        match self {
            Atom::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Atom::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_sym_ptr(&self) -> bool {
        matches!(self, Atom::SymPtr(_))
    }

    pub fn sym_name(&self) -> Option<&str> {
        match self {
            Atom::SymPtr(s) | Atom::SymVal(s) => Some(s),
            _ => None,
        }
    }
}

/// Kinds of register-to-register expressions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ExprKind {
    /// A plain copy of the single argument.
    Identity,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Neg,
    LeftShift,
    RightShiftArith,
    RightShiftLogic,
}

impl ExprKind {
    pub fn arg_count(self) -> usize {
        match self {
            ExprKind::Identity | ExprKind::Neg => 1,
            _ => 2,
        }
    }
}

/// A side-effect-free expression over atoms.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SimpleExpr {
    pub kind: ExprKind,
    pub args: Vec<Atom>,
}

impl SimpleExpr {
    pub fn identity(arg: Atom) -> SimpleExpr {
        SimpleExpr {
            kind: ExprKind::Identity,
            args: vec![arg],
        }
    }

    pub fn unary(kind: ExprKind, arg: Atom) -> SimpleExpr {
        debug_assert_eq!(kind.arg_count(), 1);
        SimpleExpr {
            kind,
            args: vec![arg],
        }
    }

    pub fn binary(kind: ExprKind, a: Atom, b: Atom) -> SimpleExpr {
        debug_assert_eq!(kind.arg_count(), 2);
        SimpleExpr {
            kind,
            args: vec![a, b],
        }
    }

    pub fn is_identity(&self) -> bool {
        self.kind == ExprKind::Identity
    }

    pub fn get_arg(&self, i: usize) -> &Atom {
        &self.args[i]
    }
}

/// The predicate a branch op tests.
///
/// Kinds come in inverse pairs so that [`ConditionKind::invert`] is total
/// and involutive. This is the only place condition polarity is flipped.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ConditionKind {
    Always,
    Never,
    /// The source is the false symbol.
    False,
    /// The source is anything but the false symbol.
    Truthy,
    Zero,
    Nonzero,
    Equal,
    NotEqual,
    LessThanSigned,
    GeqSigned,
    GreaterThanSigned,
    LeqSigned,
    LessThanUnsigned,
    GeqUnsigned,
    GreaterThanUnsigned,
    LeqUnsigned,
    LessThanZeroSigned,
    GeqZeroSigned,
    GreaterThanZeroSigned,
    LeqZeroSigned,
}

impl ConditionKind {
    /// Return the inverse predicate (e.g. Zero ↔ Nonzero, Always ↔ Never).
    pub fn invert(self) -> ConditionKind {
        match self {
            ConditionKind::Always => ConditionKind::Never,
            ConditionKind::Never => ConditionKind::Always,
            ConditionKind::False => ConditionKind::Truthy,
            ConditionKind::Truthy => ConditionKind::False,
            ConditionKind::Zero => ConditionKind::Nonzero,
            ConditionKind::Nonzero => ConditionKind::Zero,
            ConditionKind::Equal => ConditionKind::NotEqual,
            ConditionKind::NotEqual => ConditionKind::Equal,
            ConditionKind::LessThanSigned => ConditionKind::GeqSigned,
            ConditionKind::GeqSigned => ConditionKind::LessThanSigned,
            ConditionKind::GreaterThanSigned => ConditionKind::LeqSigned,
            ConditionKind::LeqSigned => ConditionKind::GreaterThanSigned,
            ConditionKind::LessThanUnsigned => ConditionKind::GeqUnsigned,
            ConditionKind::GeqUnsigned => ConditionKind::LessThanUnsigned,
            ConditionKind::GreaterThanUnsigned => ConditionKind::LeqUnsigned,
            ConditionKind::LeqUnsigned => ConditionKind::GreaterThanUnsigned,
            ConditionKind::LessThanZeroSigned => ConditionKind::GeqZeroSigned,
            ConditionKind::GeqZeroSigned => ConditionKind::LessThanZeroSigned,
            ConditionKind::GreaterThanZeroSigned => ConditionKind::LeqZeroSigned,
            ConditionKind::LeqZeroSigned => ConditionKind::GreaterThanZeroSigned,
        }
    }

    pub fn arg_count(self) -> usize {
        use ConditionKind::*;
        match self {
            Always | Never => 0,
            False | Truthy | Zero | Nonzero | LessThanZeroSigned | GeqZeroSigned
            | GreaterThanZeroSigned | LeqZeroSigned => 1,
            _ => 2,
        }
    }
}

/// A branch predicate with its source atoms.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    pub src: Vec<Atom>,
}

impl Condition {
    pub fn new(kind: ConditionKind, src: Vec<Atom>) -> Condition {
        debug_assert_eq!(kind.arg_count(), src.len());
        Condition { kind, src }
    }

    pub fn always() -> Condition {
        Condition {
            kind: ConditionKind::Always,
            src: Vec::new(),
        }
    }

    pub fn src(&self, i: usize) -> &Atom {
        &self.src[i]
    }
}

/// What the instruction in a branch's delay slot does.
///
/// MIPS executes the delay slot whether or not the branch is taken (for
/// likely branches, only when taken); the compiler uses it to assign the
/// branch's logical "otherwise" value.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum BranchDelay {
    Nop,
    /// `dst` is set to the false symbol.
    SetRegFalse { dst: Variable },
    /// `dst` is set to the true symbol.
    SetRegTrue { dst: Variable },
    /// `dst` is set to another register.
    SetRegReg { dst: Variable, src: Variable },
    /// `dst` is set to the `binteger` type object.
    SetBinteger { dst: Variable },
    /// `dst` is set to the `pair` type object.
    SetPair { dst: Variable },
    /// `dst = -src`.
    Negate { dst: Variable, src: Variable },
    /// `dst = value << shift` (the left-shift half of the ash idiom).
    Dsllv {
        dst: Variable,
        value: Variable,
        shift: Variable,
    },
}

impl BranchDelay {
    /// The variable this delay slot writes, if any.
    pub fn dst_var(&self) -> Option<&Variable> {
        match self {
            BranchDelay::Nop => None,
            BranchDelay::SetRegFalse { dst }
            | BranchDelay::SetRegTrue { dst }
            | BranchDelay::SetRegReg { dst, .. }
            | BranchDelay::SetBinteger { dst }
            | BranchDelay::SetPair { dst }
            | BranchDelay::Negate { dst, .. }
            | BranchDelay::Dsllv { dst, .. } => Some(dst),
        }
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, BranchDelay::Nop)
    }
}

/// A conditional or unconditional branch with its delay slot.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BranchOp {
    pub condition: Condition,
    pub delay: BranchDelay,
    /// Set for the `*l` opcodes, whose delay slot is annulled on
    /// fall-through.
    pub likely: bool,
    pub op_id: OpId,
}

/// Signedness/width class of a memory load.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum LoadKind {
    Unsigned,
    Signed,
    Float,
}

/// The source side of a register set.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum SetSource {
    Expr(SimpleExpr),
    Load {
        kind: LoadKind,
        size: u16,
        addr: SimpleExpr,
    },
}

/// `dst := src` — a register move from an expression or memory.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SetVarOp {
    pub dst: Variable,
    pub src: SetSource,
}

/// One basic-block-local operation.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum AtomicOp {
    Set(SetVarOp),
    Branch(BranchOp),
}

impl AtomicOp {
    /// Convert this op to a form element owned by `pool`.
    pub fn get_as_form(&self, pool: &mut FormPool) -> ElemId {
        match self {
            AtomicOp::Set(set) => {
                let src = match &set.src {
                    SetSource::Expr(expr) => {
                        pool.alloc_single_element_form(None, ElementKind::Expr(expr.clone()))
                    }
                    SetSource::Load { kind, size, addr } => {
                        let addr =
                            pool.alloc_single_element_form(None, ElementKind::Expr(addr.clone()));
                        pool.alloc_single_element_form(
                            None,
                            ElementKind::LoadSource {
                                kind: *kind,
                                size: *size,
                                addr,
                            },
                        )
                    }
                };
                pool.alloc_element(ElementKind::SetVar {
                    dst: set.dst,
                    src,
                    is_sequence_point: true,
                })
            }
            AtomicOp::Branch(branch) => pool.alloc_element(ElementKind::Branch(branch.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [ConditionKind; 20] = [
        ConditionKind::Always,
        ConditionKind::Never,
        ConditionKind::False,
        ConditionKind::Truthy,
        ConditionKind::Zero,
        ConditionKind::Nonzero,
        ConditionKind::Equal,
        ConditionKind::NotEqual,
        ConditionKind::LessThanSigned,
        ConditionKind::GeqSigned,
        ConditionKind::GreaterThanSigned,
        ConditionKind::LeqSigned,
        ConditionKind::LessThanUnsigned,
        ConditionKind::GeqUnsigned,
        ConditionKind::GreaterThanUnsigned,
        ConditionKind::LeqUnsigned,
        ConditionKind::LessThanZeroSigned,
        ConditionKind::GeqZeroSigned,
        ConditionKind::GreaterThanZeroSigned,
        ConditionKind::LeqZeroSigned,
    ];

    /// Inverting twice gets back the original kind, for every kind.
    #[test]
    fn invert_is_involutive() {
        for kind in ALL_KINDS {
            assert_eq!(kind.invert().invert(), kind, "{kind:?}");
        }
    }

    /// No kind is its own inverse.
    #[test]
    fn invert_always_flips() {
        for kind in ALL_KINDS {
            assert_ne!(kind.invert(), kind, "{kind:?}");
        }
    }

    #[test]
    fn register_names() {
        assert_eq!(Register::V0.to_string(), "v0");
        assert_eq!(Register::S7.to_string(), "s7");
        assert_eq!(Register(0).to_string(), "r0");
        assert_eq!(Register(31).to_string(), "ra");
    }

    #[test]
    fn delay_dst_var() {
        use crate::entity::EntityRef;
        let v = Variable {
            reg: Register::V0,
            op_id: OpId::new(0),
        };
        assert!(BranchDelay::Nop.dst_var().is_none());
        assert_eq!(
            BranchDelay::SetRegFalse { dst: v }.dst_var().unwrap().reg,
            Register::V0
        );
    }
}
