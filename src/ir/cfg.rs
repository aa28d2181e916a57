//! The classified control-flow vertex tree handed over by the CFG
//! recognizer.
//!
//! Each vertex has already been matched against a structural idiom; this
//! pass only translates the tree, it never re-derives shapes. Irreducible
//! functions never reach us — the recognizer reports them as not fully
//! resolved and the driver skips them.

use serde::{Deserialize, Serialize};

use crate::ir::func::BlockId;

/// One condition/body arm of a cond vertex.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CondVtxEntry {
    pub condition: CfgVtx,
    pub body: CfgVtx,
}

/// A classified control-flow vertex.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CfgVtx {
    /// A straight-line run of atomic ops.
    Block(BlockId),
    /// Children executed in order. Sequences are flattened on translation
    /// and never nest in the output.
    Sequence(Vec<CfgVtx>),
    /// Top-tested loop. The layout is "jump to condition; test at bottom",
    /// so the intro jump sits in the preceding sibling block.
    WhileLoop {
        condition: Box<CfgVtx>,
        body: Box<CfgVtx>,
    },
    /// Bottom-tested loop; the branch exits on the negated predicate.
    UntilLoop {
        condition: Box<CfgVtx>,
        body: Box<CfgVtx>,
    },
    /// An until loop whose body collapsed into the condition block.
    UntilLoopSingle { block: Box<CfgVtx> },
    /// `(while #t …)` — a body block ending in a jump to itself.
    InfiniteLoop { block: Box<CfgVtx> },
    /// Multi-arm conditional with a mandatory else arm.
    CondWithElse {
        entries: Vec<CondVtxEntry>,
        else_vtx: Box<CfgVtx>,
    },
    /// Multi-arm conditional without an else arm.
    CondNoElse { entries: Vec<CondVtxEntry> },
    /// A chain of conditionals feeding a common result register.
    ShortCircuit { entries: Vec<CfgVtx> },
    /// A jump to the function end: a return, plus the unreachable code
    /// between the jump and the end.
    GotoEnd {
        body: Box<CfgVtx>,
        unreachable_block: Box<CfgVtx>,
    },
    /// A return from a non-function scope.
    Break {
        body: Box<CfgVtx>,
        unreachable_block: Box<CfgVtx>,
    },
    /// A goto the recognizer could not classify. The structuring pass
    /// rejects these.
    Goto { target: BlockId },
}

/// The per-function CFG as this pass sees it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlFlowGraph {
    pub top: CfgVtx,
    pub fully_resolved: bool,
}

impl ControlFlowGraph {
    pub fn new(top: CfgVtx) -> ControlFlowGraph {
        ControlFlowGraph {
            top,
            fully_resolved: true,
        }
    }

    /// Whether every vertex was classified. False means the function is
    /// skipped by downstream passes.
    pub fn is_fully_resolved(&self) -> bool {
        self.fully_resolved
    }

    /// The single root vertex of the classified tree.
    pub fn get_single_top_level(&self) -> &CfgVtx {
        &self.top
    }
}
