pub mod atomic;
pub mod cfg;
pub mod func;

pub use atomic::{
    Atom, AtomicOp, BranchDelay, BranchOp, Condition, ConditionKind, ExprKind, LoadKind, Register,
    SetSource, SetVarOp, SimpleExpr, Variable,
};
pub use cfg::{CfgVtx, CondVtxEntry, ControlFlowGraph};
pub use func::{BlockId, Function, OpId, OpRange, OpTable, RegUseInfo, RegUseOp};
