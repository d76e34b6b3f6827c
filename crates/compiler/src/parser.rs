//! Pratt parser
//!
//! Parses source text into an AST made of heap values, so the tree can
//! traverse the collector and compiler passes can treat it as plain data.
//! Every node is `(pos . inner)` where `pos` is the byte offset of the
//! node's first token. `inner` is one of:
//!
//! - an immediate (number, `nil`, `true`, `false`)
//! - a raw symbol (an identifier reference)
//! - `(tag . payload)` with a symbol tag — special forms, literals, and
//!   operators; string and symbol literals carry their payload symbol
//!   directly, everything else carries a list of child nodes
//! - a list whose head is itself a wrapped node — an application
//!
//! Parenthesized groups of exactly one expression are plain grouping;
//! empty and multi-expression groups are argument lists that splice into
//! the enclosing juxtaposition call (`f(a, b)`) or serve as parameter
//! lists on the left of `->`.

use crate::lexer::{Lexer, Token, TokenKind};
use cassette_core::heap::Heap;
use cassette_core::value::{FALSE, NIL, TRUE, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// EOF in the middle of an expression; a REPL should ask for more input
    Partial,
    Syntax {
        message: String,
        pos: u32,
        line: u32,
        column: u32,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Partial => write!(f, "unexpected end of input"),
            ParseError::Syntax { message, line, column, .. } => {
                write!(f, "{message} at {}:{}", line + 1, column + 1)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// A parsed file: optional module header plus the body node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ast {
    pub module: Option<Value>,
    pub body: Value,
}

// precedence ladder, low to high
type Prec = u8;
const PREC_NONE: Prec = 0;
const PREC_EXPR: Prec = 1;
const PREC_PIPE: Prec = 2;
const PREC_LAMBDA: Prec = 3;
const PREC_OR: Prec = 4;
const PREC_AND: Prec = 5;
const PREC_EQUAL: Prec = 6;
const PREC_COMPARE: Prec = 7;
const PREC_MEMBER: Prec = 8;
const PREC_PAIR: Prec = 9;
const PREC_SUM: Prec = 10;
const PREC_PRODUCT: Prec = 11;
const PREC_UNARY: Prec = 12;
const PREC_ACCESS: Prec = 13;

fn infix_prec(kind: TokenKind) -> Prec {
    use TokenKind::*;
    match kind {
        PipeArrow => PREC_PIPE,
        Arrow => PREC_LAMBDA,
        Or => PREC_OR,
        And => PREC_AND,
        EqualEqual | BangEqual => PREC_EQUAL,
        Less | LessEqual | Greater | GreaterEqual => PREC_COMPARE,
        In | DotDot => PREC_MEMBER,
        Bar => PREC_PAIR,
        Plus | Minus => PREC_SUM,
        Star | Slash | Percent => PREC_PRODUCT,
        Dot | LBracket => PREC_ACCESS,
        _ => PREC_NONE,
    }
}

fn has_prefix(kind: TokenKind) -> bool {
    use TokenKind::*;
    matches!(
        kind,
        Num | Str
            | Id
            | Colon
            | True
            | False
            | Nil
            | Minus
            | Not
            | Hash
            | LParen
            | LBracket
            | TupleStart
            | LBrace
            | Do
            | If
            | Cond
            | Backslash
    )
}

/// A prefix parse is either a single expression or an argument list from a
/// non-singleton parenthesized group.
enum Parsed {
    One(Value),
    Args(Vec<Value>, u32),
}

pub fn parse(source: &str, heap: &mut Heap) -> Result<Ast, ParseError> {
    Parser::new(source, heap).parse_file()
}

pub struct Parser<'src, 'heap> {
    lexer: Lexer<'src>,
    heap: &'heap mut Heap,
}

impl<'src, 'heap> Parser<'src, 'heap> {
    pub fn new(source: &'src str, heap: &'heap mut Heap) -> Self {
        for tag in [
            "do", "let", "def", "import", "module", "if", "and", "or", "->", "\"", ":", "[",
            "#[", "{", ".", "not", "#", "-", "+", "*", "/", "%", "|", "in", ">", "<", "==",
            "!=", "<=", ">=", "<>", "..", "nil", "true", "false",
        ] {
            heap.symbols.intern(tag);
        }
        Parser {
            lexer: Lexer::new(source),
            heap,
        }
    }

    fn parse_file(&mut self) -> Result<Ast, ParseError> {
        self.skip_newlines();

        let module = if self.check(TokenKind::Module) {
            self.lexer.advance();
            let (name, _) = self.parse_id()?;
            Some(name)
        } else {
            None
        };

        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if self.lexer.at_end() {
                break;
            }
            stmts.push(self.parse_stmt()?);
        }

        let body = match stmts.len() {
            0 => self.node(0, NIL),
            1 => stmts[0],
            _ => {
                let tag = self.sym("do");
                self.tag_node(0, tag, &stmts)
            }
        };

        Ok(Ast { module, body })
    }

    // ---- statements ----

    fn parse_stmt(&mut self) -> Result<Value, ParseError> {
        match self.lexer.peek().kind {
            TokenKind::Let => self.parse_let(),
            TokenKind::Def => self.parse_def(),
            TokenKind::Import => self.parse_import(),
            _ => self.parse_call(),
        }
    }

    /// `let x = e` or `let x = e, y = e`
    fn parse_let(&mut self) -> Result<Value, ParseError> {
        let pos = self.lexer.advance().pos;
        let mut assigns = Vec::new();
        loop {
            self.skip_newlines();
            if self.lexer.at_end() {
                return Err(ParseError::Partial);
            }
            let (name, _) = self.parse_id()?;
            self.expect(TokenKind::Equal, "expected \"=\"")?;
            self.skip_newlines();
            let value = self.parse_call()?;
            let assign = self.heap.list_from(&[name, value]);
            assigns.push(assign);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        let tag = self.sym("let");
        Ok(self.tag_node(pos, tag, &assigns))
    }

    /// `def (f a b) body` — a `let` binding a lambda, pre-bound for
    /// recursion
    fn parse_def(&mut self) -> Result<Value, ParseError> {
        let pos = self.lexer.advance().pos;
        self.expect(TokenKind::LParen, "expected \"(\" after def")?;
        let (name, _) = self.parse_id()?;
        let mut params = Vec::new();
        while !self.match_token(TokenKind::RParen) {
            if self.lexer.at_end() {
                return Err(ParseError::Partial);
            }
            let (param, _) = self.parse_id()?;
            params.push(param);
        }
        self.skip_newlines();
        let body = self.parse_call()?;
        let lambda = self.lambda_node(pos, &params, body);
        let assign = self.heap.list_from(&[name, lambda]);
        let tag = self.sym("def");
        Ok(self.tag_node(pos, tag, &[assign]))
    }

    /// `import M`, `import M as A`, `import M as *`
    fn parse_import(&mut self) -> Result<Value, ParseError> {
        let pos = self.lexer.advance().pos;
        if self.lexer.at_end() {
            return Err(ParseError::Partial);
        }
        let (name, _) = self.parse_id()?;
        let alias = if self.match_token(TokenKind::As) {
            if self.match_token(TokenKind::Star) {
                NIL
            } else {
                self.parse_id()?.0
            }
        } else {
            name
        };
        let entry = self.heap.list_from(&[name, alias]);
        let tag = self.sym("import");
        Ok(self.tag_node(pos, tag, &[entry]))
    }

    /// Juxtaposition call: `f x y`, with parenthesized argument lists
    /// splicing in (`f(a, b)`), or just the expression when nothing
    /// follows.
    fn parse_call(&mut self) -> Result<Value, ParseError> {
        let first = self.parse_expr(PREC_EXPR)?;
        let (mut items, mut had_args) = match first {
            Parsed::One(value) => (vec![value], false),
            Parsed::Args(items, pos) if items.is_empty() => {
                return Ok(self.node(pos, NIL));
            }
            Parsed::Args(_, pos) => {
                return Err(self.err_at("unexpected argument list", pos));
            }
        };

        while has_prefix(self.lexer.peek().kind) {
            match self.parse_expr(PREC_EXPR)? {
                Parsed::One(value) => items.push(value),
                Parsed::Args(args, _) => {
                    had_args = true;
                    items.extend(args);
                }
            }
        }

        if items.len() == 1 && !had_args {
            return Ok(items[0]);
        }
        let pos = self.node_pos(items[0]);
        let list = self.heap.list_from(&items);
        Ok(self.node(pos, list))
    }

    // ---- expressions ----

    fn parse_expr(&mut self, min_prec: Prec) -> Result<Parsed, ParseError> {
        if self.lexer.at_end() {
            return Err(ParseError::Partial);
        }
        let mut left = self.parse_prefix()?;

        loop {
            let kind = self.lexer.peek().kind;
            let prec = infix_prec(kind);
            if prec == PREC_NONE || prec < min_prec {
                break;
            }
            left = self.parse_infix(left, kind, prec)?;
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Parsed, ParseError> {
        use TokenKind::*;
        let token = self.lexer.peek();
        let parsed = match token.kind {
            Num => {
                self.lexer.advance();
                let value = self.number_value(token)?;
                self.node(token.pos, value)
            }
            Str => {
                self.lexer.advance();
                let content = unescape(token.lexeme);
                let sym = self.intern(&content, token)?;
                let tag = self.sym("\"");
                let inner = self.heap.pair(tag, sym);
                self.node(token.pos, inner)
            }
            Id => {
                self.lexer.advance();
                let sym = self.intern(token.lexeme, token)?;
                self.node(token.pos, sym)
            }
            Colon => {
                self.lexer.advance();
                let id = self.expect(TokenKind::Id, "expected symbol name after \":\"")?;
                let sym = self.intern(id.lexeme, id)?;
                let tag = self.sym(":");
                let inner = self.heap.pair(tag, sym);
                self.node(token.pos, inner)
            }
            True => {
                self.lexer.advance();
                self.node(token.pos, TRUE)
            }
            False => {
                self.lexer.advance();
                self.node(token.pos, FALSE)
            }
            Nil => {
                self.lexer.advance();
                self.node(token.pos, NIL)
            }
            Minus | Not | Hash => {
                self.lexer.advance();
                let operand = self.parse_expr(PREC_UNARY)?;
                let operand = self.one(operand, token.pos)?;
                let tag = self.op_sym(token.kind);
                self.tag_node(token.pos, tag, &[operand])
            }
            LParen => return self.parse_group(),
            LBracket => self.parse_list()?,
            TupleStart => self.parse_tuple()?,
            LBrace => self.parse_map()?,
            Do => self.parse_do()?,
            If => self.parse_if()?,
            Cond => self.parse_cond()?,
            Backslash => return self.parse_backslash_params(),
            Error => {
                return Err(self.err_token(
                    format!("unexpected character \"{}\"", token.lexeme),
                    token,
                ));
            }
            Eof => return Err(ParseError::Partial),
            _ => return Err(self.err_token("expected expression".to_string(), token)),
        };
        Ok(Parsed::One(parsed))
    }

    fn parse_infix(
        &mut self,
        left: Parsed,
        kind: TokenKind,
        prec: Prec,
    ) -> Result<Parsed, ParseError> {
        use TokenKind::*;
        let token = self.lexer.advance();
        match kind {
            Arrow => {
                let params = self.params_from(left)?;
                self.skip_newlines();
                let body = self.parse_expr(PREC_LAMBDA)?; // right-assoc
                let body = self.one(body, token.pos)?;
                Ok(Parsed::One(self.lambda_node(token.pos, &params, body)))
            }
            PipeArrow => {
                let lhs = self.one(left, token.pos)?;
                self.skip_newlines();
                let next = self.lexer.peek();
                // bare unary operators make useful pipe targets: `xs |> #`
                if matches!(next.kind, TokenKind::Hash | TokenKind::Not) {
                    self.lexer.advance();
                    let tag = self.op_sym(next.kind);
                    return Ok(Parsed::One(self.tag_node(token.pos, tag, &[lhs])));
                }
                let f = self.parse_expr(PREC_PIPE + 1)?;
                let f = self.one(f, token.pos)?;
                let call = self.heap.list_from(&[f, lhs]);
                Ok(Parsed::One(self.node(token.pos, call)))
            }
            Dot => {
                let lhs = self.one(left, token.pos)?;
                let id = self.expect(TokenKind::Id, "expected field name after \".\"")?;
                let sym = self.intern(id.lexeme, id)?;
                let colon = self.sym(":");
                let key_inner = self.heap.pair(colon, sym);
                let key = self.node(id.pos, key_inner);
                let tag = self.sym(".");
                Ok(Parsed::One(self.tag_node(token.pos, tag, &[lhs, key])))
            }
            LBracket => {
                let lhs = self.one(left, token.pos)?;
                self.skip_newlines();
                let key = self.parse_expr(PREC_EXPR)?;
                let key = self.one(key, token.pos)?;
                self.skip_newlines();
                self.expect(TokenKind::RBracket, "expected \"]\"")?;
                let tag = self.sym(".");
                Ok(Parsed::One(self.tag_node(token.pos, tag, &[lhs, key])))
            }
            And | Or => {
                let lhs = self.one(left, token.pos)?;
                self.skip_newlines();
                let rhs = self.parse_expr(prec)?; // right-assoc
                let rhs = self.one(rhs, token.pos)?;
                let tag = self.sym(if kind == And { "and" } else { "or" });
                Ok(Parsed::One(self.tag_node(token.pos, tag, &[lhs, rhs])))
            }
            _ => {
                // left-associative binary operator
                let lhs = self.one(left, token.pos)?;
                self.skip_newlines();
                let rhs = self.parse_expr(prec + 1)?;
                let rhs = self.one(rhs, token.pos)?;
                let tag = self.op_sym(kind);
                Ok(Parsed::One(self.tag_node(token.pos, tag, &[lhs, rhs])))
            }
        }
    }

    fn parse_group(&mut self) -> Result<Parsed, ParseError> {
        let open = self.lexer.advance();
        self.skip_newlines();
        let mut items = Vec::new();
        loop {
            if self.match_token(TokenKind::RParen) {
                break;
            }
            if self.lexer.at_end() {
                return Err(ParseError::Partial);
            }
            let item = self.parse_call()?;
            items.push(item);
            self.match_token(TokenKind::Comma);
            self.skip_newlines();
        }
        if items.len() == 1 {
            Ok(Parsed::One(items[0]))
        } else {
            Ok(Parsed::Args(items, open.pos))
        }
    }

    fn parse_backslash_params(&mut self) -> Result<Parsed, ParseError> {
        let open = self.lexer.advance();
        let mut params = Vec::new();
        while self.check(TokenKind::Id) {
            let id = self.lexer.advance();
            let sym = self.intern(id.lexeme, id)?;
            params.push(self.node(id.pos, sym));
        }
        Ok(Parsed::Args(params, open.pos))
    }

    fn parse_list(&mut self) -> Result<Value, ParseError> {
        let open = self.lexer.advance();
        let items = self.bracketed_items(TokenKind::RBracket, "expected \"]\"")?;
        let tag = self.sym("[");
        Ok(self.tag_node(open.pos, tag, &items))
    }

    fn parse_tuple(&mut self) -> Result<Value, ParseError> {
        let open = self.lexer.advance();
        let items = self.bracketed_items(TokenKind::RBracket, "expected \"]\"")?;
        let tag = self.sym("#[");
        Ok(self.tag_node(open.pos, tag, &items))
    }

    fn bracketed_items(
        &mut self,
        close: TokenKind,
        expected: &str,
    ) -> Result<Vec<Value>, ParseError> {
        self.skip_newlines();
        let mut items = Vec::new();
        loop {
            if self.match_token(close) {
                return Ok(items);
            }
            if self.lexer.at_end() {
                return Err(ParseError::Partial);
            }
            items.push(self.parse_call()?);
            if !self.match_token(TokenKind::Comma) {
                self.skip_newlines();
                self.expect(close, expected)?;
                return Ok(items);
            }
            self.skip_newlines();
        }
    }

    fn parse_map(&mut self) -> Result<Value, ParseError> {
        let open = self.lexer.advance();
        self.skip_newlines();
        let mut entries = Vec::new();
        loop {
            if self.match_token(TokenKind::RBrace) {
                break;
            }
            if self.lexer.at_end() {
                return Err(ParseError::Partial);
            }
            let id = self.expect(TokenKind::Id, "expected map key")?;
            let key = self.intern(id.lexeme, id)?;
            self.expect(TokenKind::Colon, "expected \":\" after map key")?;
            self.skip_newlines();
            let value = self.parse_call()?;
            entries.push(self.heap.pair(key, value));
            self.match_token(TokenKind::Comma);
            self.skip_newlines();
        }
        let tag = self.sym("{");
        Ok(self.tag_node(open.pos, tag, &entries))
    }

    fn parse_do(&mut self) -> Result<Value, ParseError> {
        let open = self.lexer.advance();
        let stmts = self.stmt_block(&[TokenKind::End])?;
        self.lexer.advance(); // end
        let tag = self.sym("do");
        Ok(self.tag_node(open.pos, tag, &stmts))
    }

    fn parse_if(&mut self) -> Result<Value, ParseError> {
        let open = self.lexer.advance();
        let predicate = self.parse_expr(PREC_EXPR)?;
        let predicate = self.one(predicate, open.pos)?;
        self.expect(TokenKind::Do, "expected \"do\" after if condition")?;

        let consequent = self.stmt_block(&[TokenKind::Else])?;
        self.lexer.advance(); // else
        let consequent = self.block_node(open.pos, consequent)?;

        let alternative = self.stmt_block(&[TokenKind::End])?;
        self.lexer.advance(); // end
        let alternative = self.block_node(open.pos, alternative)?;

        let tag = self.sym("if");
        Ok(self.tag_node(open.pos, tag, &[predicate, consequent, alternative]))
    }

    /// `cond p1 -> c1 … else a end` as right-nested ifs.
    fn parse_cond(&mut self) -> Result<Value, ParseError> {
        let open = self.lexer.advance();
        self.parse_clauses(open.pos)
    }

    fn parse_clauses(&mut self, pos: u32) -> Result<Value, ParseError> {
        self.skip_separators();
        if self.lexer.at_end() {
            return Err(ParseError::Partial);
        }
        if self.match_token(TokenKind::Else) {
            self.skip_newlines();
            let alternative = self.parse_call()?;
            self.skip_separators();
            self.expect(TokenKind::End, "expected \"end\" after cond")?;
            return Ok(alternative);
        }

        let predicate = self.parse_expr(PREC_LAMBDA + 1)?;
        let predicate = self.one(predicate, pos)?;
        self.skip_newlines();
        self.expect(TokenKind::Arrow, "expected \"->\" in cond clause")?;
        self.skip_newlines();
        let consequent = self.parse_call()?;
        let alternative = self.parse_clauses(pos)?;

        let tag = self.sym("if");
        Ok(self.tag_node(pos, tag, &[predicate, consequent, alternative]))
    }

    /// Statements until one of `closers`, which is left unconsumed.
    fn stmt_block(&mut self, closers: &[TokenKind]) -> Result<Vec<Value>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            let kind = self.lexer.peek().kind;
            if closers.contains(&kind) {
                return Ok(stmts);
            }
            if self.lexer.at_end() {
                return Err(ParseError::Partial);
            }
            stmts.push(self.parse_stmt()?);
        }
    }

    fn block_node(&mut self, pos: u32, stmts: Vec<Value>) -> Result<Value, ParseError> {
        match stmts.len() {
            0 => Ok(self.node(pos, NIL)),
            1 => Ok(stmts[0]),
            _ => {
                let tag = self.sym("do");
                Ok(self.tag_node(pos, tag, &stmts))
            }
        }
    }

    // ---- helpers ----

    fn parse_id(&mut self) -> Result<(Value, u32), ParseError> {
        if self.lexer.at_end() {
            return Err(ParseError::Partial);
        }
        let token = self.expect(TokenKind::Id, "expected identifier")?;
        Ok((self.intern(token.lexeme, token)?, token.pos))
    }

    fn params_from(&mut self, parsed: Parsed) -> Result<Vec<Value>, ParseError> {
        let nodes = match parsed {
            Parsed::One(node) => vec![node],
            Parsed::Args(nodes, _) => nodes,
        };
        let mut params = Vec::new();
        for node in nodes {
            let inner = self.node_inner(node);
            match inner {
                Value::Symbol(_) => params.push(inner),
                _ => {
                    return Err(self.err_at("expected parameter name", self.node_pos(node)));
                }
            }
        }
        Ok(params)
    }

    fn lambda_node(&mut self, pos: u32, params: &[Value], body: Value) -> Value {
        // params ride as a raw symbol list, not as wrapped nodes
        let params_list = self.heap.list_from(params);
        let tag = self.sym("->");
        let children = self.heap.list_from(&[params_list, body]);
        let inner = self.heap.pair(tag, children);
        self.node(pos, inner)
    }

    fn number_value(&mut self, token: Token) -> Result<Value, ParseError> {
        let text: String = token.lexeme.chars().filter(|c| *c != '_').collect();
        if let Some(hex) = text.strip_prefix("0x") {
            let n = u32::from_str_radix(hex, 16)
                .map_err(|_| self.err_token("bad hex literal".to_string(), token))?;
            return Ok(Value::Int(n as i32));
        }
        if let Some(bin) = text.strip_prefix("0b") {
            let n = u32::from_str_radix(bin, 2)
                .map_err(|_| self.err_token("bad binary literal".to_string(), token))?;
            return Ok(Value::Int(n as i32));
        }
        if text.contains('.') {
            let f: f32 = text
                .parse()
                .map_err(|_| self.err_token("bad number literal".to_string(), token))?;
            return Ok(Value::Float(f));
        }
        let n: i64 = text
            .parse()
            .map_err(|_| self.err_token("bad number literal".to_string(), token))?;
        Ok(Value::Int(n as i32))
    }

    fn one(&mut self, parsed: Parsed, _pos: u32) -> Result<Value, ParseError> {
        match parsed {
            Parsed::One(value) => Ok(value),
            Parsed::Args(items, group_pos) if items.is_empty() => {
                Ok(self.node(group_pos, NIL))
            }
            Parsed::Args(_, group_pos) => {
                Err(self.err_at("unexpected argument list", group_pos))
            }
        }
    }

    fn intern(&mut self, text: &str, token: Token) -> Result<Value, ParseError> {
        self.heap
            .symbols
            .try_intern(text)
            .map_err(|e| self.err_token(e.to_string(), token))
    }

    fn sym(&mut self, name: &str) -> Value {
        self.heap.symbols.intern(name)
    }

    fn op_sym(&mut self, kind: TokenKind) -> Value {
        use TokenKind::*;
        let name = match kind {
            Plus => "+",
            Minus => "-",
            Star => "*",
            Slash => "/",
            Percent => "%",
            EqualEqual => "==",
            BangEqual => "!=",
            Less => "<",
            LessEqual => "<=",
            Greater => ">",
            GreaterEqual => ">=",
            Bar => "|",
            In => "in",
            DotDot => "..",
            Hash => "#",
            Not => "not",
            _ => "?",
        };
        self.sym(name)
    }

    fn node(&mut self, pos: u32, inner: Value) -> Value {
        self.heap.pair(Value::Int(pos as i32), inner)
    }

    fn tag_node(&mut self, pos: u32, tag: Value, children: &[Value]) -> Value {
        let list = self.heap.list_from(children);
        let inner = self.heap.pair(tag, list);
        self.node(pos, inner)
    }

    fn node_pos(&self, node: Value) -> u32 {
        node_pos(self.heap, node)
    }

    fn node_inner(&self, node: Value) -> Value {
        node_inner(self.heap, node)
    }

    fn check(&mut self, kind: TokenKind) -> bool {
        self.lexer.peek().kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.lexer.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<Token<'src>, ParseError> {
        let token = self.lexer.peek();
        if token.kind == TokenKind::Eof {
            return Err(ParseError::Partial);
        }
        if token.kind != kind {
            return Err(self.err_token(
                format!("{message}, got \"{}\"", short_lexeme(token)),
                token,
            ));
        }
        Ok(self.lexer.advance())
    }

    fn skip_newlines(&mut self) {
        while self.match_token(TokenKind::Newline) {}
    }

    /// Newlines and commas both separate statements.
    fn skip_separators(&mut self) {
        while self.match_token(TokenKind::Newline) || self.match_token(TokenKind::Comma) {}
    }

    fn err_token(&self, message: String, token: Token) -> ParseError {
        ParseError::Syntax {
            message,
            pos: token.pos,
            line: token.line,
            column: token.column,
        }
    }

    fn err_at(&mut self, message: &str, pos: u32) -> ParseError {
        let token = self.lexer.peek();
        ParseError::Syntax {
            message: message.to_string(),
            pos,
            line: token.line,
            column: token.column,
        }
    }
}

fn short_lexeme(token: Token) -> String {
    match token.kind {
        TokenKind::Newline => "newline".to_string(),
        TokenKind::Eof => "end of input".to_string(),
        _ => token.lexeme.chars().take(12).collect(),
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

// ---- AST inspection (used by the compiler and the project scanner) ----

pub fn node_pos(heap: &Heap, node: Value) -> u32 {
    heap.head(node)
        .and_then(Value::as_int)
        .unwrap_or(0)
        .max(0) as u32
}

pub fn node_inner(heap: &Heap, node: Value) -> Value {
    heap.tail(node).unwrap_or(NIL)
}

/// Tag symbol of a special form, if the node is one.
pub fn node_tag(heap: &Heap, node: Value) -> Option<Value> {
    match node_inner(heap, node) {
        inner @ Value::Pair(_) if !inner.is_nil() => match heap.head(inner) {
            Some(tag @ Value::Symbol(_)) => Some(tag),
            _ => None,
        },
        _ => None,
    }
}

/// Child list of a tagged node.
pub fn node_children(heap: &Heap, node: Value) -> Vec<Value> {
    let inner = node_inner(heap, node);
    match heap.tail(inner) {
        Some(children) => heap.list_items(children),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cassette_core::value::symbol_hash;

    fn parse_ok(source: &str) -> (Heap, Ast) {
        let mut heap = Heap::new();
        let ast = parse(source, &mut heap).unwrap();
        (heap, ast)
    }

    fn tag_name(heap: &Heap, node: Value) -> String {
        node_tag(heap, node)
            .and_then(|t| heap.symbols.name(t).map(str::to_string))
            .unwrap_or_default()
    }

    #[test]
    fn test_parse_number_literal() {
        let (heap, ast) = parse_ok("42");
        assert_eq!(node_inner(&heap, ast.body), Value::Int(42));
    }

    #[test]
    fn test_parse_infix_precedence() {
        let (heap, ast) = parse_ok("1 + 2 * 3");
        assert_eq!(tag_name(&heap, ast.body), "+");
        let children = node_children(&heap, ast.body);
        assert_eq!(node_inner(&heap, children[0]), Value::Int(1));
        assert_eq!(tag_name(&heap, children[1]), "*");
    }

    #[test]
    fn test_parse_grouping() {
        let (heap, ast) = parse_ok("(1 + 2) * 3");
        assert_eq!(tag_name(&heap, ast.body), "*");
        let children = node_children(&heap, ast.body);
        assert_eq!(tag_name(&heap, children[0]), "+");
    }

    #[test]
    fn test_parse_call_with_args() {
        let (heap, ast) = parse_ok("f(1, 2)");
        // application: inner is a list whose head is a wrapped node
        assert_eq!(node_tag(&heap, ast.body), None);
        let inner = node_inner(&heap, ast.body);
        let items = heap.list_items(inner);
        assert_eq!(items.len(), 3);
        assert_eq!(node_inner(&heap, items[0]), Value::Symbol(symbol_hash("f")));
        assert_eq!(node_inner(&heap, items[1]), Value::Int(1));
    }

    #[test]
    fn test_parse_zero_arg_call() {
        let (heap, ast) = parse_ok("f()");
        let inner = node_inner(&heap, ast.body);
        let items = heap.list_items(inner);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_parse_juxtaposition_call() {
        let (heap, ast) = parse_ok("f x y");
        let items = heap.list_items(node_inner(&heap, ast.body));
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_parse_lambda_forms() {
        let (heap, ast) = parse_ok("(x, y) -> x + y");
        assert_eq!(tag_name(&heap, ast.body), "->");
        let children = node_children(&heap, ast.body);
        let params = heap.list_items(children[0]);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], Value::Symbol(symbol_hash("x")));

        let (heap, ast) = parse_ok("\\x y -> x");
        assert_eq!(tag_name(&heap, ast.body), "->");
        let children = node_children(&heap, ast.body);
        assert_eq!(heap.list_len(children[0]), 2);

        let (heap, ast) = parse_ok("x -> x");
        let children = node_children(&heap, ast.body);
        assert_eq!(heap.list_len(children[0]), 1);

        let (heap, ast) = parse_ok("() -> 1");
        let children = node_children(&heap, ast.body);
        assert_eq!(heap.list_len(children[0]), 0);
    }

    #[test]
    fn test_parse_let_and_def() {
        let (heap, ast) = parse_ok("let x = 1, y = 2");
        assert_eq!(tag_name(&heap, ast.body), "let");
        assert_eq!(node_children(&heap, ast.body).len(), 2);

        let (heap, ast) = parse_ok("def (inc n) n + 1");
        assert_eq!(tag_name(&heap, ast.body), "def");
        let assigns = node_children(&heap, ast.body);
        let assign = heap.list_items(assigns[0]);
        assert_eq!(assign[0], Value::Symbol(symbol_hash("inc")));
        assert_eq!(tag_name(&heap, assign[1]), "->");
    }

    #[test]
    fn test_parse_collections() {
        let (heap, ast) = parse_ok("[1, 2, 3]");
        assert_eq!(tag_name(&heap, ast.body), "[");
        assert_eq!(node_children(&heap, ast.body).len(), 3);

        let (heap, ast) = parse_ok("#[1, 2]");
        assert_eq!(tag_name(&heap, ast.body), "#[");

        let (heap, ast) = parse_ok("{a: 1, b: 2}");
        assert_eq!(tag_name(&heap, ast.body), "{");
        assert_eq!(node_children(&heap, ast.body).len(), 2);
    }

    #[test]
    fn test_parse_access_and_index() {
        let (heap, ast) = parse_ok("m.key");
        assert_eq!(tag_name(&heap, ast.body), ".");
        let children = node_children(&heap, ast.body);
        assert_eq!(tag_name(&heap, children[1]), ":");

        let (heap, ast) = parse_ok("xs[1]");
        assert_eq!(tag_name(&heap, ast.body), ".");
        let children = node_children(&heap, ast.body);
        assert_eq!(node_inner(&heap, children[1]), Value::Int(1));
    }

    #[test]
    fn test_parse_if_and_do() {
        let (heap, ast) = parse_ok("if x do 1 else 2 end");
        assert_eq!(tag_name(&heap, ast.body), "if");
        assert_eq!(node_children(&heap, ast.body).len(), 3);

        let (heap, ast) = parse_ok("do\nlet x = 1\nx\nend");
        assert_eq!(tag_name(&heap, ast.body), "do");
        assert_eq!(node_children(&heap, ast.body).len(), 2);
    }

    #[test]
    fn test_parse_cond_desugars_to_ifs() {
        let (heap, ast) = parse_ok("cond\nx == 1 -> 10\nx == 2 -> 20\nelse 0\nend");
        assert_eq!(tag_name(&heap, ast.body), "if");
        let children = node_children(&heap, ast.body);
        assert_eq!(tag_name(&heap, children[2]), "if");
    }

    #[test]
    fn test_parse_pipe() {
        let (heap, ast) = parse_ok("[1, 2, 3] |> #");
        assert_eq!(tag_name(&heap, ast.body), "#");

        let (heap, ast) = parse_ok("x |> f");
        // becomes the application (f x)
        assert_eq!(node_tag(&heap, ast.body), None);
        let items = heap.list_items(node_inner(&heap, ast.body));
        assert_eq!(items.len(), 2);
        assert_eq!(node_inner(&heap, items[0]), Value::Symbol(symbol_hash("f")));
    }

    #[test]
    fn test_parse_module_header_and_import() {
        let mut heap = Heap::new();
        let ast = parse("module M\nlet x = 1\nx", &mut heap).unwrap();
        assert_eq!(ast.module, Some(Value::Symbol(symbol_hash("M"))));

        let (heap, ast) = parse_ok("import Lib as L");
        assert_eq!(tag_name(&heap, ast.body), "import");
        let entries = node_children(&heap, ast.body);
        let entry = heap.list_items(entries[0]);
        assert_eq!(entry[0], Value::Symbol(symbol_hash("Lib")));
        assert_eq!(entry[1], Value::Symbol(symbol_hash("L")));

        let (heap, ast) = parse_ok("import Lib as *");
        let entries = node_children(&heap, ast.body);
        let entry = heap.list_items(entries[0]);
        assert_eq!(entry[1], NIL);
    }

    #[test]
    fn test_partial_parse_at_eof() {
        let mut heap = Heap::new();
        assert_eq!(parse("do\n1 + 2", &mut heap), Err(ParseError::Partial));
        let mut heap = Heap::new();
        assert_eq!(parse("let x =", &mut heap), Err(ParseError::Partial));
        let mut heap = Heap::new();
        assert_eq!(parse("(1 +", &mut heap), Err(ParseError::Partial));
    }

    #[test]
    fn test_syntax_error_has_position() {
        let mut heap = Heap::new();
        match parse("let 5 = 1", &mut heap) {
            Err(ParseError::Syntax { line, .. }) => assert_eq!(line, 0),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_strings_and_symbols() {
        let (heap, ast) = parse_ok("\"hi\\nthere\"");
        assert_eq!(tag_name(&heap, ast.body), "\"");
        let payload = heap.tail(node_inner(&heap, ast.body)).unwrap();
        assert_eq!(heap.symbols.name(payload), Some("hi\nthere"));

        let (heap, ast) = parse_ok(":blue");
        assert_eq!(tag_name(&heap, ast.body), ":");
    }

    #[test]
    fn test_newlines_skipped_inside_expressions() {
        let (heap, ast) = parse_ok("1 +\n2");
        assert_eq!(tag_name(&heap, ast.body), "+");
    }
}
