//! Bytecode compiler
//!
//! Walks the heap AST and emits instruction sequences with register
//! need/modify tracking (see [`crate::seq`]). Every compile function takes
//! a linkage describing what should happen after the expression's value is
//! on the stack: fall through, return to the caller, or jump to a label.
//! Sub-expressions compile with `Next` except in tail position, where the
//! caller's `Return` is inherited — which is what makes tail calls run in
//! constant stack.
//!
//! Variable references resolve at compile time to `(depth, slot)`
//! coordinates; an unresolved name is reported here, not at runtime. A
//! call whose operator resolves into the base frame is a primitive call
//! and skips the `Link`, since primitives never jump.

use crate::env::CompileEnv;
use crate::parser::{node_children, node_inner, node_pos, node_tag};
use crate::seq::{self, CONT, ENV, Label, Linkage, RegSet, Seq, Stmt};
use cassette_core::heap::Heap;
use cassette_core::ops::Op;
use cassette_core::value::{FALSE, NIL, TRUE, Value, symbol_hash};
use cassette_runtime::primitives::{self, Arity};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    /// Source byte offset
    pub pos: u32,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompileError {}

/// What the compiler knows about another module in the project.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub id: u8,
    /// Top-level binding names in definition order
    pub exports: Vec<Value>,
}

/// Module name hash to module info.
pub type ModuleIndex = HashMap<u32, ModuleInfo>;

// special-form tags
const TAG_STRING: Value = Value::Symbol(symbol_hash("\""));
const TAG_SYMBOL: Value = Value::Symbol(symbol_hash(":"));
const TAG_LIST: Value = Value::Symbol(symbol_hash("["));
const TAG_TUPLE: Value = Value::Symbol(symbol_hash("#["));
const TAG_MAP: Value = Value::Symbol(symbol_hash("{"));
const TAG_DO: Value = Value::Symbol(symbol_hash("do"));
const TAG_LET: Value = Value::Symbol(symbol_hash("let"));
const TAG_DEF: Value = Value::Symbol(symbol_hash("def"));
const TAG_IMPORT: Value = Value::Symbol(symbol_hash("import"));
const TAG_IF: Value = Value::Symbol(symbol_hash("if"));
const TAG_AND: Value = Value::Symbol(symbol_hash("and"));
const TAG_OR: Value = Value::Symbol(symbol_hash("or"));
const TAG_LAMBDA: Value = Value::Symbol(symbol_hash("->"));
const TAG_ACCESS: Value = Value::Symbol(symbol_hash("."));
const TAG_NOT: Value = Value::Symbol(symbol_hash("not"));
const TAG_LEN: Value = Value::Symbol(symbol_hash("#"));
const TAG_ADD: Value = Value::Symbol(symbol_hash("+"));
const TAG_SUB: Value = Value::Symbol(symbol_hash("-"));
const TAG_MUL: Value = Value::Symbol(symbol_hash("*"));
const TAG_DIV: Value = Value::Symbol(symbol_hash("/"));
const TAG_REM: Value = Value::Symbol(symbol_hash("%"));
const TAG_CONS: Value = Value::Symbol(symbol_hash("|"));
const TAG_IN: Value = Value::Symbol(symbol_hash("in"));
const TAG_GT: Value = Value::Symbol(symbol_hash(">"));
const TAG_LT: Value = Value::Symbol(symbol_hash("<"));
const TAG_EQ: Value = Value::Symbol(symbol_hash("=="));

pub struct Compiler<'a> {
    heap: &'a mut Heap,
    modules: &'a ModuleIndex,
    env: CompileEnv,
    next_label: Label,
}

impl<'a> Compiler<'a> {
    pub fn new(heap: &'a mut Heap, modules: &'a ModuleIndex) -> Self {
        let names: Vec<Value> = primitives::table()
            .iter()
            .map(|def| heap.symbols.intern(def.name))
            .collect();
        Compiler {
            heap,
            modules,
            env: CompileEnv::base(&names),
            next_label: 0,
        }
    }

    /// Compile the entry file's body; the value of its last statement is
    /// the program result, left on the stack at `Halt`.
    pub fn compile_entry(&mut self, body: Value) -> Result<Seq, CompileError> {
        let stmts = self.body_stmts(body);
        let block = self.compile_block(&stmts, Linkage::Next, None)?;
        Ok(seq::append(block, Seq::of_ops(vec![Stmt::Op(Op::Halt)])))
    }

    /// Compile a named module as a zero-argument thunk stored in module
    /// cache slot `id`. The thunk body runs the module statements, builds
    /// the export map, re-caches itself as that map (so later imports get
    /// the cached value), and returns the map.
    pub fn compile_module_thunk(&mut self, body: Value, id: u8) -> Result<Seq, CompileError> {
        let stmts = self.body_stmts(body);
        let body_label = self.fresh_label();
        let after = self.fresh_label();

        let block = self.compile_block(&stmts, Linkage::Return, Some(id))?;

        let mut body_stmts = vec![Stmt::Label(body_label)];
        body_stmts.extend(block.stmts);
        let body_seq = Seq::new(block.needs, block.modifies, body_stmts);

        let creation = Seq::new(
            ENV,
            RegSet::empty(),
            vec![
                Stmt::Op(Op::Const),
                Stmt::LabelRef(body_label),
                Stmt::Op(Op::Const),
                Stmt::Arg(Value::Int(0)),
                Stmt::Op(Op::Lambda),
                Stmt::Op(Op::Jump),
                Stmt::LabelRef(after),
            ],
        );

        let define = Seq::of_ops(vec![
            Stmt::Label(after),
            Stmt::Op(Op::Module),
            Stmt::Arg(Value::Int(i32::from(id))),
        ]);

        Ok(seq::append(seq::tack_on(creation, body_seq), define))
    }

    fn fresh_label(&mut self) -> Label {
        self.next_label += 1;
        self.next_label
    }

    fn err(&self, message: impl Into<String>, pos: u32) -> CompileError {
        CompileError {
            message: message.into(),
            pos,
        }
    }

    fn byte_arg(&self, n: usize, what: &str, pos: u32) -> Result<Stmt, CompileError> {
        if n > u8::MAX as usize {
            return Err(self.err(format!("{what} too large ({n})"), pos));
        }
        Ok(Stmt::Arg(Value::Int(n as i32)))
    }

    /// Normalize a file or block body to a statement list.
    fn body_stmts(&self, body: Value) -> Vec<Value> {
        if node_tag(self.heap, body) == Some(TAG_DO) {
            node_children(self.heap, body)
        } else {
            vec![body]
        }
    }

    // ---- expressions ----

    fn compile_expr(&mut self, node: Value, linkage: Linkage) -> Result<Seq, CompileError> {
        let pos = node_pos(self.heap, node);
        let inner = node_inner(self.heap, node);

        let seq = match inner {
            v if v == NIL || v == TRUE || v == FALSE => self.compile_const(v, linkage),
            Value::Int(_) | Value::Float(_) => self.compile_const(inner, linkage),
            Value::Symbol(_) => self.compile_var(inner, pos, linkage)?,
            Value::Pair(_) => match self.heap.head(inner) {
                Some(tag @ Value::Symbol(_)) => self.compile_form(tag, node, pos, linkage)?,
                Some(Value::Pair(_)) => {
                    let items = self.heap.list_items(inner);
                    self.compile_application(&items, pos, linkage)?
                }
                _ => return Err(self.err("malformed expression", pos)),
            },
            _ => return Err(self.err("malformed expression", pos)),
        };

        let mut stmts = vec![Stmt::SourcePos(pos)];
        stmts.extend(seq.stmts);
        Ok(Seq::new(seq.needs, seq.modifies, stmts))
    }

    fn compile_form(
        &mut self,
        tag: Value,
        node: Value,
        pos: u32,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        // `Value` holds floats, so tag symbols compare with `==` rather
        // than appearing as match patterns
        if tag == TAG_STRING {
            let sym = self.heap.tail(node_inner(self.heap, node)).unwrap_or(NIL);
            Ok(seq::end_with(
                linkage,
                Seq::of_ops(vec![
                    Stmt::Op(Op::Const),
                    Stmt::Arg(sym),
                    Stmt::Op(Op::Str),
                ]),
            ))
        } else if tag == TAG_SYMBOL {
            let sym = self.heap.tail(node_inner(self.heap, node)).unwrap_or(NIL);
            Ok(self.compile_const(sym, linkage))
        } else if tag == TAG_LIST {
            let items = node_children(self.heap, node);
            self.compile_list(&items, linkage)
        } else if tag == TAG_TUPLE {
            let items = node_children(self.heap, node);
            self.compile_tuple(&items, pos, linkage)
        } else if tag == TAG_MAP {
            let entries = node_children(self.heap, node);
            self.compile_map(&entries, linkage)
        } else if tag == TAG_DO {
            let stmts = node_children(self.heap, node);
            self.compile_block(&stmts, linkage, None)
        } else if tag == TAG_IF {
            let children = node_children(self.heap, node);
            if children.len() != 3 {
                return Err(self.err("malformed if", pos));
            }
            self.compile_if(children[0], children[1], children[2], linkage)
        } else if tag == TAG_AND || tag == TAG_OR {
            let children = node_children(self.heap, node);
            if children.len() != 2 {
                return Err(self.err("malformed logical expression", pos));
            }
            if tag == TAG_AND {
                self.compile_and(children[0], children[1], linkage)
            } else {
                self.compile_or(children[0], children[1], linkage)
            }
        } else if tag == TAG_LAMBDA {
            let children = node_children(self.heap, node);
            if children.len() != 2 {
                return Err(self.err("malformed lambda", pos));
            }
            let params = self.heap.list_items(children[0]);
            self.compile_lambda(&params, children[1], pos, linkage)
        } else if tag == TAG_ACCESS {
            let children = node_children(self.heap, node);
            if children.len() != 2 {
                return Err(self.err("malformed access", pos));
            }
            self.compile_opcode(&[children[0], children[1]], Op::Get, linkage)
        } else if tag == TAG_NOT {
            self.compile_unary(node, Op::Not, pos, linkage)
        } else if tag == TAG_LEN {
            self.compile_unary(node, Op::Len, pos, linkage)
        } else if tag == TAG_SUB {
            let children = node_children(self.heap, node);
            match children.len() {
                1 => self.compile_opcode(&children, Op::Neg, linkage),
                2 => self.compile_opcode(&children, Op::Sub, linkage),
                _ => Err(self.err("malformed subtraction", pos)),
            }
        } else if tag == TAG_ADD {
            self.compile_binary(node, Op::Add, pos, linkage)
        } else if tag == TAG_MUL {
            self.compile_binary(node, Op::Mul, pos, linkage)
        } else if tag == TAG_DIV {
            self.compile_binary(node, Op::Div, pos, linkage)
        } else if tag == TAG_REM {
            self.compile_binary(node, Op::Rem, pos, linkage)
        } else if tag == TAG_GT {
            self.compile_binary(node, Op::Gt, pos, linkage)
        } else if tag == TAG_LT {
            self.compile_binary(node, Op::Lt, pos, linkage)
        } else if tag == TAG_EQ {
            self.compile_binary(node, Op::Eq, pos, linkage)
        } else if tag == TAG_IN {
            self.compile_binary(node, Op::In, pos, linkage)
        } else if tag == TAG_CONS {
            let children = node_children(self.heap, node);
            if children.len() != 2 {
                return Err(self.err("malformed cons", pos));
            }
            // tail first so Pair pops head from the top
            let tail = self.compile_expr(children[1], Linkage::Next)?;
            let head = self.compile_expr(children[0], Linkage::Next)?;
            let seq = seq::append(
                seq::preserving(ENV, tail, head),
                Seq::of_ops(vec![Stmt::Op(Op::Pair)]),
            );
            Ok(seq::end_with(linkage, seq))
        } else if tag == TAG_LET || tag == TAG_DEF || tag == TAG_IMPORT {
            Err(self.err("binding form is only allowed inside a block", pos))
        } else {
            // operators without opcodes (<=, >=, !=, <>, ..) call their
            // primitive through the base frame
            let children = node_children(self.heap, node);
            self.compile_primitive_tag(tag, &children, pos, linkage)
        }
    }

    fn compile_const(&mut self, value: Value, linkage: Linkage) -> Seq {
        seq::end_with(
            linkage,
            Seq::of_ops(vec![Stmt::Op(Op::Const), Stmt::Arg(value)]),
        )
    }

    fn compile_var(&mut self, name: Value, pos: u32, linkage: Linkage) -> Result<Seq, CompileError> {
        let (depth, slot) = self.resolve(name, pos)?;
        Ok(seq::end_with(linkage, self.lookup_seq(depth, slot, pos)?))
    }

    fn resolve(&self, name: Value, pos: u32) -> Result<(u32, u32), CompileError> {
        self.env.find(name).ok_or_else(|| {
            let shown = self.heap.symbols.name(name).unwrap_or("?");
            self.err(format!("undefined variable \"{shown}\""), pos)
        })
    }

    fn lookup_seq(&self, depth: u32, slot: u32, pos: u32) -> Result<Seq, CompileError> {
        Ok(Seq::new(
            ENV,
            RegSet::empty(),
            vec![
                Stmt::Op(Op::Lookup),
                self.byte_arg(depth as usize, "scope depth", pos)?,
                self.byte_arg(slot as usize, "frame slot", pos)?,
            ],
        ))
    }

    fn compile_unary(
        &mut self,
        node: Value,
        op: Op,
        pos: u32,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        let children = node_children(self.heap, node);
        if children.len() != 1 {
            return Err(self.err("malformed unary expression", pos));
        }
        self.compile_opcode(&children, op, linkage)
    }

    fn compile_binary(
        &mut self,
        node: Value,
        op: Op,
        pos: u32,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        let children = node_children(self.heap, node);
        if children.len() != 2 {
            return Err(self.err("malformed binary expression", pos));
        }
        self.compile_opcode(&children, op, linkage)
    }

    /// Operands left to right, then a single opcode.
    fn compile_opcode(
        &mut self,
        operands: &[Value],
        op: Op,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        let mut seq = Seq::empty();
        for operand in operands {
            let operand_seq = self.compile_expr(*operand, Linkage::Next)?;
            seq = seq::preserving(ENV, seq, operand_seq);
        }
        Ok(seq::end_with(
            linkage,
            seq::append(seq, Seq::of_ops(vec![Stmt::Op(op)])),
        ))
    }

    /// List literal: `nil`, then items back to front, consing as we go.
    fn compile_list(&mut self, items: &[Value], linkage: Linkage) -> Result<Seq, CompileError> {
        let mut seq = Seq::of_ops(vec![Stmt::Op(Op::Nil)]);
        for item in items.iter().rev() {
            let item_seq = self.compile_expr(*item, Linkage::Next)?;
            seq = seq::append(
                seq::preserving(ENV, seq, item_seq),
                Seq::of_ops(vec![Stmt::Op(Op::Pair)]),
            );
        }
        Ok(seq::end_with(linkage, seq))
    }

    /// Tuple literal: allocate, then fill each slot.
    fn compile_tuple(
        &mut self,
        items: &[Value],
        pos: u32,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        let mut seq = Seq::of_ops(vec![
            Stmt::Op(Op::Tuple),
            self.byte_arg(items.len(), "tuple literal", pos)?,
        ]);
        for (i, item) in items.iter().enumerate() {
            let item_seq = self.compile_expr(*item, Linkage::Next)?;
            let fill = seq::append(
                item_seq,
                Seq::of_ops(vec![Stmt::Op(Op::Set), self.byte_arg(i, "tuple slot", pos)?]),
            );
            seq = seq::preserving(ENV, seq, fill);
        }
        Ok(seq::end_with(linkage, seq))
    }

    /// Map literal: empty map, then one `Put` per entry.
    fn compile_map(&mut self, entries: &[Value], linkage: Linkage) -> Result<Seq, CompileError> {
        let mut seq = Seq::of_ops(vec![Stmt::Op(Op::Map)]);
        for entry in entries {
            let key = self.heap.head(*entry).unwrap_or(NIL);
            let value = self.heap.tail(*entry).unwrap_or(NIL);
            let value_seq = self.compile_expr(value, Linkage::Next)?;
            let put = seq::append(
                value_seq,
                Seq::of_ops(vec![
                    Stmt::Op(Op::Const),
                    Stmt::Arg(key),
                    Stmt::Op(Op::Put),
                ]),
            );
            seq = seq::preserving(ENV, seq, put);
        }
        Ok(seq::end_with(linkage, seq))
    }

    /// `a and b`: keep a falsy `a` as the result, otherwise drop it and
    /// evaluate `b`.
    fn compile_and(&mut self, a: Value, b: Value, linkage: Linkage) -> Result<Seq, CompileError> {
        let true_label = self.fresh_label();
        let after = self.fresh_label();

        let a_seq = self.compile_expr(a, Linkage::Next)?;
        let b_seq = self.compile_expr(b, linkage)?;

        let a_linkage = match linkage {
            Linkage::Next => Linkage::Jump(after),
            other => other,
        };
        let branch = seq::end_with(
            a_linkage,
            Seq::of_ops(vec![Stmt::Op(Op::Branch), Stmt::LabelRef(true_label)]),
        );

        let rest = seq::append(
            branch,
            seq::append(
                Seq::of_ops(vec![Stmt::Label(true_label), Stmt::Op(Op::Pop)]),
                seq::append(b_seq, Seq::of_ops(vec![Stmt::Label(after)])),
            ),
        );
        Ok(seq::preserving(RegSet::both(), a_seq, rest))
    }

    /// `a or b`: keep a truthy `a`, otherwise drop it and evaluate `b`.
    fn compile_or(&mut self, a: Value, b: Value, linkage: Linkage) -> Result<Seq, CompileError> {
        let after = self.fresh_label();
        let keep_target = match linkage {
            Linkage::Jump(label) => label,
            _ => after,
        };

        let a_seq = self.compile_expr(a, Linkage::Next)?;
        let b_seq = self.compile_expr(b, linkage)?;

        let mut rest = seq::append(
            Seq::of_ops(vec![
                Stmt::Op(Op::Branch),
                Stmt::LabelRef(keep_target),
                Stmt::Op(Op::Pop),
            ]),
            seq::append(b_seq, Seq::of_ops(vec![Stmt::Label(after)])),
        );
        if linkage == Linkage::Return {
            // the short-circuit path lands here with `a` on the stack
            rest = seq::append(
                rest,
                Seq::new(CONT, RegSet::empty(), vec![Stmt::Op(Op::Return)]),
            );
        }
        Ok(seq::preserving(RegSet::both(), a_seq, rest))
    }

    fn compile_if(
        &mut self,
        predicate: Value,
        consequent: Value,
        alternative: Value,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        let true_label = self.fresh_label();
        let after = self.fresh_label();

        let pred = seq::append(
            self.compile_expr(predicate, Linkage::Next)?,
            Seq::of_ops(vec![Stmt::Op(Op::Branch), Stmt::LabelRef(true_label)]),
        );

        let alt_linkage = match linkage {
            Linkage::Next => Linkage::Jump(after),
            other => other,
        };
        let alt = seq::append(
            Seq::of_ops(vec![Stmt::Op(Op::Pop)]),
            self.compile_expr(alternative, alt_linkage)?,
        );
        let cons = seq::append(
            Seq::of_ops(vec![Stmt::Label(true_label), Stmt::Op(Op::Pop)]),
            self.compile_expr(consequent, linkage)?,
        );

        let branches = seq::append(
            seq::parallel(alt, cons),
            Seq::of_ops(vec![Stmt::Label(after)]),
        );
        Ok(seq::preserving(RegSet::both(), pred, branches))
    }

    /// `(params) -> body`: push a closure over the inline body, which is
    /// jumped over at creation. The body destructures its arguments in
    /// reverse so slots match source order, then runs with `Return`
    /// linkage.
    fn compile_lambda(
        &mut self,
        params: &[Value],
        body: Value,
        pos: u32,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        let body_label = self.fresh_label();
        let after = self.fresh_label();
        let n = params.len();

        self.env.extend(n);
        for (i, param) in params.iter().enumerate() {
            self.env.set(i, *param);
        }
        let body_seq = self.compile_expr(body, Linkage::Return);
        self.env.pop();
        let body_seq = body_seq?;

        let mut inline = vec![Stmt::Label(body_label)];
        if n > 0 {
            inline.push(Stmt::Op(Op::Tuple));
            inline.push(self.byte_arg(n, "parameter list", pos)?);
            inline.push(Stmt::Op(Op::Extend));
            for i in 0..n {
                inline.push(Stmt::Op(Op::Define));
                inline.push(self.byte_arg(n - i - 1, "parameter slot", pos)?);
            }
        }
        inline.extend(body_seq.stmts);
        inline.push(Stmt::Label(after));

        let creation = Seq::new(
            ENV,
            RegSet::empty(),
            vec![
                Stmt::Op(Op::Const),
                Stmt::LabelRef(body_label),
                Stmt::Op(Op::Const),
                self.byte_arg(n, "parameter count", pos)?,
                Stmt::Op(Op::Lambda),
                Stmt::Op(Op::Jump),
                Stmt::LabelRef(after),
            ],
        );

        Ok(seq::end_with(
            linkage,
            seq::tack_on(creation, Seq::of_ops(inline)),
        ))
    }

    /// A call: arguments left to right, then the operator, then `Apply`.
    /// Non-tail calls to unknown operators record the return point with
    /// `Link`; tail calls don't, which reuses the caller's continuation.
    fn compile_application(
        &mut self,
        items: &[Value],
        pos: u32,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        let operator = items[0];
        let args = &items[1..];

        let mut args_seq = Seq::empty();
        for arg in args {
            let arg_seq = self.compile_expr(*arg, Linkage::Next)?;
            args_seq = seq::preserving(ENV, args_seq, arg_seq);
        }

        // statically-known primitive call?
        if let Value::Symbol(_) = node_inner(self.heap, operator) {
            let name = node_inner(self.heap, operator);
            if let Some((depth, slot)) = self.env.find(name) {
                if self.env.is_primitive_depth(depth) {
                    return self.finish_primitive_call(
                        args_seq,
                        depth,
                        slot,
                        args.len(),
                        pos,
                        linkage,
                    );
                }
            }
        }

        let op_seq = self.compile_expr(operator, Linkage::Next)?;
        let call = seq::preserving(ENV, args_seq, op_seq);
        self.finish_call(call, args.len(), pos, linkage)
    }

    /// Operators like `<=` and `<>` that have no opcode and no identifier
    /// syntax; they always live in the primitive frame.
    fn compile_primitive_tag(
        &mut self,
        tag: Value,
        args: &[Value],
        pos: u32,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        let Some((depth, slot)) = self.env.find(tag) else {
            let shown = self.heap.symbols.name(tag).unwrap_or("?");
            return Err(self.err(format!("unknown form \"{shown}\""), pos));
        };
        let mut args_seq = Seq::empty();
        for arg in args {
            let arg_seq = self.compile_expr(*arg, Linkage::Next)?;
            args_seq = seq::preserving(ENV, args_seq, arg_seq);
        }
        self.finish_primitive_call(args_seq, depth, slot, args.len(), pos, linkage)
    }

    fn finish_primitive_call(
        &mut self,
        args_seq: Seq,
        depth: u32,
        slot: u32,
        argc: usize,
        pos: u32,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        if let Some(def) = primitives::table().get(slot as usize) {
            if let Arity::Exact(expected) = def.arity {
                if usize::from(expected) != argc {
                    return Err(self.err(
                        format!("{} expects {expected} arguments, got {argc}", def.name),
                        pos,
                    ));
                }
            }
        }
        let call = seq::preserving(ENV, args_seq, self.lookup_seq(depth, slot, pos)?);
        let apply = Seq::of_ops(vec![
            Stmt::Op(Op::Apply),
            self.byte_arg(argc, "argument count", pos)?,
        ]);
        Ok(seq::end_with(linkage, seq::append(call, apply)))
    }

    fn finish_call(
        &mut self,
        call: Seq,
        argc: usize,
        pos: u32,
        linkage: Linkage,
    ) -> Result<Seq, CompileError> {
        let argc_stmt = self.byte_arg(argc, "argument count", pos)?;
        match linkage {
            Linkage::Return => {
                // no Link: the callee inherits our continuation. The
                // trailing Return fires for primitive and value applies,
                // which fall through instead of jumping.
                let apply = Seq::new(
                    CONT,
                    ENV,
                    vec![Stmt::Op(Op::Apply), argc_stmt, Stmt::Op(Op::Return)],
                );
                Ok(seq::preserving(CONT, call, apply))
            }
            Linkage::Next => {
                let after = self.fresh_label();
                let apply = Seq::new(
                    RegSet::empty(),
                    RegSet::both(),
                    vec![
                        Stmt::Op(Op::Link),
                        Stmt::LabelRef(after),
                        Stmt::Op(Op::Apply),
                        argc_stmt,
                        Stmt::Label(after),
                    ],
                );
                Ok(seq::append(call, apply))
            }
            Linkage::Jump(label) => {
                let next_form = self.finish_call(call, argc, pos, Linkage::Next)?;
                Ok(seq::end_with(Linkage::Jump(label), next_form))
            }
        }
    }

    // ---- blocks ----

    /// Compile a statement block. With `module_id` set this is a module
    /// body: every statement result is discarded and the block ends by
    /// building the export map, re-caching the module, and returning it.
    fn compile_block(
        &mut self,
        stmts: &[Value],
        linkage: Linkage,
        module_id: Option<u8>,
    ) -> Result<Seq, CompileError> {
        if stmts.is_empty() && module_id.is_none() {
            return Ok(seq::end_with(linkage, Seq::of_ops(vec![Stmt::Op(Op::Nil)])));
        }

        let num_assigns = self.count_assigns(stmts);
        let has_frame = num_assigns > 0;

        let extend = if has_frame {
            self.env.extend(num_assigns);
            self.prebind_defs(stmts);
            Seq::new(
                RegSet::empty(),
                ENV,
                vec![
                    Stmt::Op(Op::Tuple),
                    self.byte_arg(num_assigns, "block bindings", 0)?,
                    Stmt::Op(Op::Extend),
                ],
            )
        } else {
            Seq::empty()
        };

        let mut exports: Vec<(usize, Value)> = Vec::new();
        let mut slot = 0usize;
        let mut acc = Seq::empty();
        let mut returned = false;

        let compiled: Result<(), CompileError> = (|| {
            for (i, stmt) in stmts.iter().enumerate() {
                let last = i == stmts.len() - 1;
                let tag = node_tag(self.heap, *stmt);
                let pos = node_pos(self.heap, *stmt);

                let stmt_seq = if tag == Some(TAG_LET) || tag == Some(TAG_DEF) {
                    let mut piece = Seq::empty();
                    for assign in node_children(self.heap, *stmt) {
                        let parts = self.heap.list_items(assign);
                        if parts.len() != 2 {
                            return Err(self.err("malformed binding", pos));
                        }
                        let (name, value) = (parts[0], parts[1]);
                        let value_seq = self.compile_expr(value, Linkage::Next)?;
                        let define = Seq::new(
                            ENV,
                            RegSet::empty(),
                            vec![Stmt::Op(Op::Define), self.byte_arg(slot, "binding slot", pos)?],
                        );
                        piece = seq::append(piece, seq::preserving(ENV, value_seq, define));
                        self.env.set(slot, name);
                        exports.push((slot, name));
                        slot += 1;
                    }
                    if last && module_id.is_none() {
                        piece = seq::append(piece, Seq::of_ops(vec![Stmt::Op(Op::Nil)]));
                    }
                    piece
                } else if tag == Some(TAG_IMPORT) {
                    let mut piece = Seq::empty();
                    for entry in node_children(self.heap, *stmt) {
                        let parts = self.heap.list_items(entry);
                        if parts.len() != 2 {
                            return Err(self.err("malformed import", pos));
                        }
                        let import_seq =
                            self.compile_import(parts[0], parts[1], &mut slot, pos)?;
                        piece = seq::preserving(ENV, piece, import_seq);
                    }
                    if last && module_id.is_none() {
                        piece = seq::append(piece, Seq::of_ops(vec![Stmt::Op(Op::Nil)]));
                    }
                    piece
                } else {
                    let stmt_linkage = if last && module_id.is_none() && linkage == Linkage::Return
                    {
                        returned = true;
                        Linkage::Return
                    } else {
                        Linkage::Next
                    };
                    let mut piece = self.compile_expr(*stmt, stmt_linkage)?;
                    if !last || module_id.is_some() {
                        piece = seq::append(piece, Seq::of_ops(vec![Stmt::Op(Op::Pop)]));
                    }
                    piece
                };

                let regs = if last { RegSet::both() } else { ENV };
                acc = seq::preserving(regs, std::mem::take(&mut acc), stmt_seq);
            }
            Ok(())
        })();

        if let Err(e) = compiled {
            if has_frame {
                self.env.pop();
            }
            return Err(e);
        }

        // block epilogue: discard the frame; module bodies first snapshot
        // their bindings into the export map and re-cache themselves. When
        // the last statement already returned, the epilogue would be dead
        // code, so none is emitted (a spill around the body would otherwise
        // leave an unmatched save on the call stack).
        if returned {
            if has_frame {
                self.env.pop();
            }
            return Ok(seq::append(extend, acc));
        }

        let mut tail = Seq::empty();
        if let Some(id) = module_id {
            let mut stmts = vec![Stmt::Op(Op::Map)];
            for (slot, name) in &exports {
                stmts.push(Stmt::Op(Op::Lookup));
                stmts.push(Stmt::Arg(Value::Int(0)));
                stmts.push(self.byte_arg(*slot, "export slot", 0)?);
                stmts.push(Stmt::Op(Op::Const));
                stmts.push(Stmt::Arg(*name));
                stmts.push(Stmt::Op(Op::Put));
            }
            stmts.push(Stmt::Op(Op::Dup));
            stmts.push(Stmt::Op(Op::Module));
            stmts.push(Stmt::Arg(Value::Int(i32::from(id))));
            let needs = if has_frame { ENV } else { RegSet::empty() };
            tail = seq::append(tail, Seq::new(needs, RegSet::empty(), stmts));
        }
        if has_frame {
            tail = seq::append(
                tail,
                Seq::new(ENV, ENV, vec![Stmt::Op(Op::Export), Stmt::Op(Op::Pop)]),
            );
        }
        match linkage {
            Linkage::Return => {
                tail = seq::append(
                    tail,
                    Seq::new(CONT, RegSet::empty(), vec![Stmt::Op(Op::Return)]),
                );
            }
            Linkage::Jump(label) => {
                tail = seq::end_with(Linkage::Jump(label), tail);
            }
            Linkage::Next => {}
        }

        if !tail.stmts.is_empty() {
            acc = seq::preserving(RegSet::both(), acc, tail);
        }

        if has_frame {
            self.env.pop();
        }
        Ok(seq::append(extend, acc))
    }

    /// Bindings the block frame must hold: one slot per `let`/`def`
    /// binding, one per aliased import, one per export of an `import … as
    /// *`.
    fn count_assigns(&self, stmts: &[Value]) -> usize {
        let mut count = 0;
        for stmt in stmts {
            match node_tag(self.heap, *stmt) {
                Some(tag) if tag == TAG_LET || tag == TAG_DEF => {
                    count += node_children(self.heap, *stmt).len();
                }
                Some(tag) if tag == TAG_IMPORT => {
                    for entry in node_children(self.heap, *stmt) {
                        let parts = self.heap.list_items(entry);
                        if parts.len() != 2 {
                            continue;
                        }
                        if parts[1] == NIL {
                            count += self.module_exports_len(parts[0]);
                        } else {
                            count += 1;
                        }
                    }
                }
                _ => {}
            }
        }
        count
    }

    fn module_exports_len(&self, name: Value) -> usize {
        match name {
            Value::Symbol(hash) => self
                .modules
                .get(&hash)
                .map(|info| info.exports.len())
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Give `def` bindings their slots before any statement compiles, so
    /// mutually recursive functions can see each other.
    fn prebind_defs(&mut self, stmts: &[Value]) {
        let mut slot = 0usize;
        for stmt in stmts {
            match node_tag(self.heap, *stmt) {
                Some(tag) if tag == TAG_LET => {
                    slot += node_children(self.heap, *stmt).len();
                }
                Some(tag) if tag == TAG_DEF => {
                    for assign in node_children(self.heap, *stmt) {
                        let parts = self.heap.list_items(assign);
                        if parts.len() == 2 {
                            self.env.set(slot, parts[0]);
                        }
                        slot += 1;
                    }
                }
                Some(tag) if tag == TAG_IMPORT => {
                    for entry in node_children(self.heap, *stmt) {
                        let parts = self.heap.list_items(entry);
                        if parts.len() != 2 {
                            continue;
                        }
                        slot += if parts[1] == NIL {
                            self.module_exports_len(parts[0])
                        } else {
                            1
                        };
                    }
                }
                _ => {}
            }
        }
    }

    /// One import: call the module thunk through the cache, then bind the
    /// export map under its alias, or unpack every export with keyed map
    /// applications.
    fn compile_import(
        &mut self,
        name: Value,
        alias: Value,
        slot: &mut usize,
        pos: u32,
    ) -> Result<Seq, CompileError> {
        let Value::Symbol(hash) = name else {
            return Err(self.err("malformed import", pos));
        };
        let Some(info) = self.modules.get(&hash).cloned() else {
            let shown = self.heap.symbols.name(name).unwrap_or("?");
            return Err(self.err(format!("module \"{shown}\" not found"), pos));
        };

        let after = self.fresh_label();
        let load = Seq::new(
            RegSet::empty(),
            RegSet::both(),
            vec![
                Stmt::Op(Op::Link),
                Stmt::LabelRef(after),
                Stmt::Op(Op::Load),
                Stmt::Arg(Value::Int(i32::from(info.id))),
                Stmt::Op(Op::Apply),
                Stmt::Arg(Value::Int(0)),
                Stmt::Label(after),
            ],
        );

        if alias != NIL {
            let define = Seq::new(
                ENV,
                RegSet::empty(),
                vec![Stmt::Op(Op::Define), self.byte_arg(*slot, "import slot", pos)?],
            );
            self.env.set(*slot, alias);
            *slot += 1;
            return Ok(seq::append(load, define));
        }

        // import M as *
        if info.exports.is_empty() {
            return Ok(seq::append(load, Seq::of_ops(vec![Stmt::Op(Op::Pop)])));
        }
        let mut seq = load;
        let count = info.exports.len();
        for (j, export) in info.exports.iter().enumerate() {
            let mut stmts = Vec::new();
            if j + 1 < count {
                stmts.push(Stmt::Op(Op::Dup));
            }
            stmts.push(Stmt::Op(Op::Const));
            stmts.push(Stmt::Arg(*export));
            stmts.push(Stmt::Op(Op::Swap));
            stmts.push(Stmt::Op(Op::Apply));
            stmts.push(Stmt::Arg(Value::Int(1)));
            stmts.push(Stmt::Op(Op::Define));
            stmts.push(self.byte_arg(*slot, "import slot", pos)?);
            seq = seq::append(seq, Seq::new(ENV, RegSet::empty(), stmts));
            self.env.set(*slot, *export);
            *slot += 1;
        }
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn compile_source(source: &str) -> Result<(Heap, Seq), CompileError> {
        let mut heap = Heap::new();
        let ast = parser::parse(source, &mut heap).expect("parse");
        let modules = ModuleIndex::new();
        let mut compiler = Compiler::new(&mut heap, &modules);
        let seq = compiler.compile_entry(ast.body)?;
        Ok((heap, seq))
    }

    fn ops_of(seq: &Seq) -> Vec<Op> {
        seq.stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::Op(op) => Some(*op),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_constant_compiles_to_const_and_halt() {
        let (_, seq) = compile_source("42").unwrap();
        assert_eq!(ops_of(&seq), vec![Op::Const, Op::Halt]);
    }

    #[test]
    fn test_arithmetic_operand_order() {
        let (_, seq) = compile_source("1 - 2").unwrap();
        assert_eq!(ops_of(&seq), vec![Op::Const, Op::Const, Op::Sub, Op::Halt]);
    }

    #[test]
    fn test_undefined_variable_is_a_compile_error() {
        let err = compile_source("missing").unwrap_err();
        assert!(err.message.contains("undefined variable"));
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_let_extends_a_frame() {
        let (_, seq) = compile_source("let x = 1\nx").unwrap();
        let ops = ops_of(&seq);
        assert_eq!(
            ops,
            vec![
                Op::Tuple,
                Op::Extend,
                Op::Const,
                Op::Define,
                Op::Lookup,
                Op::Export,
                Op::Pop,
                Op::Halt
            ]
        );
    }

    #[test]
    fn test_primitive_call_has_no_link() {
        let (_, seq) = compile_source("head([1])").unwrap();
        let ops = ops_of(&seq);
        assert!(!ops.contains(&Op::Link));
        assert!(ops.contains(&Op::Apply));
    }

    #[test]
    fn test_non_primitive_call_links() {
        let (_, seq) = compile_source("let f = x -> x\nf(1)").unwrap();
        let ops = ops_of(&seq);
        assert!(ops.contains(&Op::Link));
    }

    #[test]
    fn test_tail_call_does_not_link() {
        // the recursive call sits in tail position inside the lambda body
        let (_, seq) = compile_source("def (loop n) loop(n)\nloop(0)").unwrap();
        let ops = ops_of(&seq);
        // exactly one Link: the top-level call; the tail call has none
        let links = ops.iter().filter(|op| **op == Op::Link).count();
        assert_eq!(links, 1);
    }

    #[test]
    fn test_primitive_arity_checked_at_compile_time() {
        let err = compile_source("head(1, 2)").unwrap_err();
        assert!(err.message.contains("head"));
    }

    #[test]
    fn test_branch_has_pops_on_both_arms() {
        let (_, seq) = compile_source("if true do 1 else 2 end").unwrap();
        let ops = ops_of(&seq);
        assert_eq!(ops.iter().filter(|op| **op == Op::Pop).count(), 2);
        assert!(ops.contains(&Op::Branch));
    }

    #[test]
    fn test_lambda_defines_params_in_reverse() {
        let (_, seq) = compile_source("(a, b) -> a").unwrap();
        let args: Vec<i32> = seq
            .stmts
            .iter()
            .zip(seq.stmts.iter().skip(1))
            .filter_map(|(s, next)| match (s, next) {
                (Stmt::Op(Op::Define), Stmt::Arg(Value::Int(n))) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(args, vec![1, 0]);
    }

    #[test]
    fn test_binding_form_rejected_in_expression() {
        // the grammar already keeps `let` out of expression position
        let mut heap = Heap::new();
        assert!(parser::parse("[let x = 1]", &mut heap).is_err());
    }

    #[test]
    fn test_missing_module_reported() {
        let err = compile_source("import Nowhere\nNowhere").unwrap_err();
        assert!(err.message.contains("not found"));
    }

    #[test]
    fn test_operator_without_opcode_calls_primitive() {
        let (_, seq) = compile_source("1 <= 2").unwrap();
        let ops = ops_of(&seq);
        assert!(ops.contains(&Op::Lookup));
        assert!(ops.contains(&Op::Apply));
    }
}
