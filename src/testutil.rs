//! Test-only builders for op tables and functions.
//!
//! Ops are numbered in push order, so variables and branch ops pick up the
//! id of the op being built automatically.

use crate::entity::{EntityRef, PrimaryMap};
use crate::forms::FormPool;
use crate::ir::atomic::{
    Atom, AtomicOp, BranchDelay, BranchOp, Condition, ConditionKind, ExprKind, LoadKind, Register,
    SetSource, SetVarOp, SimpleExpr, Variable,
};
use crate::ir::cfg::{CfgVtx, ControlFlowGraph};
use crate::ir::func::{BlockId, Function, OpId, OpRange, OpTable, RegUseInfo, RegUseOp};

/// Operand shorthand for building expressions and conditions.
#[derive(Clone, Copy)]
pub(crate) enum AtomSpec {
    R(Register),
    I(i64),
    Sym(&'static str),
}

/// Delay-slot shorthand; registers become variables of the branch op.
#[derive(Clone, Copy)]
pub(crate) enum DelaySpec {
    Nop,
    SetFalse(Register),
    SetTrue(Register),
    SetReg(Register, Register),
    SetBinteger(Register),
    SetPair(Register),
    Negate(Register, Register),
    Dsllv(Register, Register, Register),
}

pub(crate) struct FuncBuilder {
    name: String,
    ops: PrimaryMap<OpId, AtomicOp>,
    blocks: PrimaryMap<BlockId, OpRange>,
    reg_use: PrimaryMap<OpId, RegUseOp>,
    has_reg_use: bool,
    block_start: Option<u32>,
}

impl FuncBuilder {
    pub fn new(name: &str) -> FuncBuilder {
        FuncBuilder {
            name: name.to_string(),
            ops: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            reg_use: PrimaryMap::new(),
            has_reg_use: false,
            block_start: None,
        }
    }

    /// Attach an (initially all-live) register-use report to the function.
    pub fn enable_reg_use(&mut self) {
        self.has_reg_use = true;
    }

    /// Mark `reg` as written-and-unused at `op`.
    pub fn unused(&mut self, op: OpId, reg: Register) {
        self.has_reg_use = true;
        self.reg_use[op].written_and_unused.insert(reg);
    }

    fn next(&self) -> OpId {
        OpId::new(self.ops.len() as u32)
    }

    fn var(&self, reg: Register) -> Variable {
        Variable {
            reg,
            op_id: self.next(),
        }
    }

    fn atom(&self, spec: AtomSpec) -> Atom {
        match spec {
            AtomSpec::R(reg) => Atom::Var(self.var(reg)),
            AtomSpec::I(value) => Atom::Int(value),
            AtomSpec::Sym(name) => Atom::SymPtr(name.to_string()),
        }
    }

    fn push(&mut self, op: AtomicOp) -> OpId {
        self.reg_use.push(RegUseOp::default());
        self.ops.push(op)
    }

    pub fn begin_block(&mut self) {
        self.block_start = Some(self.ops.len() as u32);
    }

    pub fn end_block(&mut self) -> BlockId {
        let first = self.block_start.take().expect("no open block");
        self.blocks.push(OpRange {
            first: OpId::new(first),
            end: OpId::new(self.ops.len() as u32),
        })
    }

    /// `(set! dst atom)`
    pub fn set_atom(&mut self, dst: Register, src: AtomSpec) -> OpId {
        let dst = self.var(dst);
        let expr = SimpleExpr::identity(self.atom(src));
        self.push(AtomicOp::Set(SetVarOp {
            dst,
            src: SetSource::Expr(expr),
        }))
    }

    /// `(set! dst (kind a))`
    pub fn set1(&mut self, dst: Register, kind: ExprKind, a: AtomSpec) -> OpId {
        let dst = self.var(dst);
        let expr = SimpleExpr::unary(kind, self.atom(a));
        self.push(AtomicOp::Set(SetVarOp {
            dst,
            src: SetSource::Expr(expr),
        }))
    }

    /// `(set! dst (kind a b))`
    pub fn set2(&mut self, dst: Register, kind: ExprKind, a: AtomSpec, b: AtomSpec) -> OpId {
        let dst = self.var(dst);
        let expr = SimpleExpr::binary(kind, self.atom(a), self.atom(b));
        self.push(AtomicOp::Set(SetVarOp {
            dst,
            src: SetSource::Expr(expr),
        }))
    }

    /// `(set! dst (load base+offset))`
    pub fn load(
        &mut self,
        dst: Register,
        kind: LoadKind,
        size: u16,
        base: Register,
        offset: i64,
    ) -> OpId {
        let dst = self.var(dst);
        let addr = SimpleExpr::binary(
            ExprKind::Add,
            Atom::Var(self.var(base)),
            Atom::Int(offset),
        );
        self.push(AtomicOp::Set(SetVarOp {
            dst,
            src: SetSource::Load { kind, size, addr },
        }))
    }

    pub fn branch(
        &mut self,
        kind: ConditionKind,
        srcs: &[AtomSpec],
        delay: DelaySpec,
        likely: bool,
    ) -> OpId {
        let op_id = self.next();
        let condition = Condition::new(kind, srcs.iter().map(|s| self.atom(*s)).collect());
        let delay = match delay {
            DelaySpec::Nop => BranchDelay::Nop,
            DelaySpec::SetFalse(dst) => BranchDelay::SetRegFalse { dst: self.var(dst) },
            DelaySpec::SetTrue(dst) => BranchDelay::SetRegTrue { dst: self.var(dst) },
            DelaySpec::SetReg(dst, src) => BranchDelay::SetRegReg {
                dst: self.var(dst),
                src: self.var(src),
            },
            DelaySpec::SetBinteger(dst) => BranchDelay::SetBinteger { dst: self.var(dst) },
            DelaySpec::SetPair(dst) => BranchDelay::SetPair { dst: self.var(dst) },
            DelaySpec::Negate(dst, src) => BranchDelay::Negate {
                dst: self.var(dst),
                src: self.var(src),
            },
            DelaySpec::Dsllv(dst, value, shift) => BranchDelay::Dsllv {
                dst: self.var(dst),
                value: self.var(value),
                shift: self.var(shift),
            },
        };
        self.push(AtomicOp::Branch(BranchOp {
            condition,
            delay,
            likely,
            op_id,
        }))
    }

    pub fn build(self, top: CfgVtx) -> Function {
        Function {
            name: self.name,
            cfg: ControlFlowGraph::new(top),
            ops: OpTable {
                blocks: self.blocks,
                ops: self.ops,
            },
            reg_use: self
                .has_reg_use
                .then_some(RegUseInfo { op: self.reg_use }),
            pool: FormPool::new(),
            top_form: None,
        }
    }
}

/// Shorthand for a block vertex.
pub(crate) fn block(id: BlockId) -> CfgVtx {
    CfgVtx::Block(id)
}
