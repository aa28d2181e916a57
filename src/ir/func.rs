//! Per-function analysis state: atomic op table, liveness, and the form
//! tree output.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::define_entity;
use crate::entity::{EntityRef, PrimaryMap};
use crate::forms::{FormId, FormPool};
use crate::ir::atomic::{AtomicOp, Register};
use crate::ir::cfg::ControlFlowGraph;

define_entity!(BlockId);
define_entity!(OpId);

/// Half-open range `[first, end)` of a block's ops in the flat op arena.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OpRange {
    pub first: OpId,
    pub end: OpId,
}

/// The atomic ops of a function, flat, with per-block ranges.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OpTable {
    pub blocks: PrimaryMap<BlockId, OpRange>,
    pub ops: PrimaryMap<OpId, AtomicOp>,
}

impl OpTable {
    pub fn block_ops(&self, block: BlockId) -> impl Iterator<Item = OpId> {
        let range = self.blocks[block];
        (range.first.index()..range.end.index()).map(OpId::new)
    }
}

/// Liveness facts for one op.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegUseOp {
    /// Registers this op writes whose value is never read afterwards.
    pub written_and_unused: HashSet<Register>,
}

/// Per-op liveness report from the register-use analysis.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegUseInfo {
    pub op: PrimaryMap<OpId, RegUseOp>,
}

/// A function under analysis.
///
/// The form pool exclusively owns every form and element built for this
/// function; `top_form` and all internal references are handles into it
/// and die with it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub cfg: ControlFlowGraph,
    pub ops: OpTable,
    /// `None` when the register-use analysis did not run.
    pub reg_use: Option<RegUseInfo>,
    pub pool: FormPool,
    /// The root of the structured form tree, once built.
    pub top_form: Option<FormId>,
}

impl Function {
    pub fn new(name: impl Into<String>, cfg: ControlFlowGraph, ops: OpTable) -> Function {
        Function {
            name: name.into(),
            cfg,
            ops,
            reg_use: None,
            pool: FormPool::new(),
            top_form: None,
        }
    }
}
