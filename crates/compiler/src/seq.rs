//! Instruction sequences
//!
//! The compiler's intermediate form: a statement list annotated with the
//! registers it reads before writing (`needs`) and the registers it may
//! overwrite (`modifies`). The combinators keep those sets honest, and
//! `preserving` uses them to wrap a sequence in save/restore pairs only
//! when a following sequence actually needs a register the earlier one
//! clobbers — the key optimization that makes register spills rare.

use cassette_core::ops::Op;
use cassette_core::value::Value;

/// The two live registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegSet(u8);

pub const ENV: RegSet = RegSet(0b01);
pub const CONT: RegSet = RegSet(0b10);

impl RegSet {
    pub fn empty() -> RegSet {
        RegSet(0)
    }

    pub fn both() -> RegSet {
        ENV.union(CONT)
    }

    pub const fn union(self, other: RegSet) -> RegSet {
        RegSet(self.0 | other.0)
    }

    pub fn difference(self, other: RegSet) -> RegSet {
        RegSet(self.0 & !other.0)
    }

    pub fn contains(self, other: RegSet) -> bool {
        self.0 & other.0 == other.0
    }
}

pub type Label = u32;

/// One element of a sequence's statement stream. `Arg` values follow the
/// opcode they belong to; `LabelRef` stands where a jump offset or code
/// address will go; `SourcePos` marks where subsequent code came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stmt {
    Op(Op),
    Arg(Value),
    Label(Label),
    LabelRef(Label),
    SourcePos(u32),
}

#[derive(Debug, Clone, Default)]
pub struct Seq {
    pub needs: RegSet,
    pub modifies: RegSet,
    pub stmts: Vec<Stmt>,
}

impl Seq {
    pub fn empty() -> Seq {
        Seq::default()
    }

    pub fn new(needs: RegSet, modifies: RegSet, stmts: Vec<Stmt>) -> Seq {
        Seq {
            needs,
            modifies,
            stmts,
        }
    }

    /// A register-neutral opcode run.
    pub fn of_ops(stmts: Vec<Stmt>) -> Seq {
        Seq::new(RegSet::empty(), RegSet::empty(), stmts)
    }
}

/// Sequential composition: the second sequence's needs are only inherited
/// where the first doesn't already produce them.
pub fn append(a: Seq, b: Seq) -> Seq {
    let needs = a.needs.union(b.needs.difference(a.modifies));
    let modifies = a.modifies.union(b.modifies);
    let mut stmts = a.stmts;
    stmts.extend(b.stmts);
    Seq::new(needs, modifies, stmts)
}

/// Composition of branches that are never both taken.
pub fn parallel(a: Seq, b: Seq) -> Seq {
    let needs = a.needs.union(b.needs);
    let modifies = a.modifies.union(b.modifies);
    let mut stmts = a.stmts;
    stmts.extend(b.stmts);
    Seq::new(needs, modifies, stmts)
}

/// Append out-of-line code (a lambda body behind a jump) without letting it
/// contribute to the register sets.
pub fn tack_on(a: Seq, b: Seq) -> Seq {
    let mut stmts = a.stmts;
    stmts.extend(b.stmts);
    Seq::new(a.needs, a.modifies, stmts)
}

/// `append(a, b)`, saving and restoring each register in `regs` around `a`
/// when `a` clobbers it and `b` needs it.
pub fn preserving(regs: RegSet, a: Seq, b: Seq) -> Seq {
    let mut save = RegSet::empty();
    for reg in [ENV, CONT] {
        if regs.contains(reg) && a.modifies.contains(reg) && b.needs.contains(reg) {
            save = save.union(reg);
        }
    }
    if save == RegSet::empty() {
        return append(a, b);
    }

    let mut stmts = Vec::with_capacity(a.stmts.len() + 4);
    if save.contains(ENV) {
        stmts.push(Stmt::Op(Op::SaveEnv));
    }
    if save.contains(CONT) {
        stmts.push(Stmt::Op(Op::SaveCont));
    }
    stmts.extend(a.stmts);
    if save.contains(CONT) {
        stmts.push(Stmt::Op(Op::RestCont));
    }
    if save.contains(ENV) {
        stmts.push(Stmt::Op(Op::RestEnv));
    }

    let wrapped = Seq::new(a.needs.union(save), a.modifies.difference(save), stmts);
    append(wrapped, b)
}

/// What should happen after a sub-expression produces its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Fall through to the following code
    Next,
    /// Return to the caller
    Return,
    /// Jump to a label
    Jump(Label),
}

pub fn end_with(linkage: Linkage, seq: Seq) -> Seq {
    match linkage {
        Linkage::Next => seq,
        Linkage::Return => append(
            seq,
            Seq::new(CONT, RegSet::empty(), vec![Stmt::Op(Op::Return)]),
        ),
        Linkage::Jump(label) => append(
            seq,
            Seq::of_ops(vec![Stmt::Op(Op::Jump), Stmt::LabelRef(label)]),
        ),
    }
}
