//! AST printer
//!
//! Renders a parsed tree back to source text. Printing then reparsing
//! yields a structurally identical tree (positions aside), which is the
//! round-trip property the parser tests lean on; it also makes compiler
//! diagnostics and tooling able to show code they only have as heap data.
//! Operators print fully parenthesized, which the parser's grouping rule
//! erases again.

use crate::parser::{node_children, node_inner, node_tag};
use cassette_core::heap::Heap;
use cassette_core::value::{FALSE, NIL, TRUE, Value, symbol_hash};

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
const TAG_SUB: Value = Value::Symbol(symbol_hash("-"));

pub fn print_ast(heap: &Heap, node: Value) -> String {
    let inner = node_inner(heap, node);
    match inner {
        v if v == NIL => "nil".to_string(),
        v if v == TRUE => "true".to_string(),
        v if v == FALSE => "false".to_string(),
        Value::Int(n) => format!("{n}"),
        Value::Float(f) => format!("{f:?}"),
        Value::Symbol(_) => heap.symbols.name(inner).unwrap_or("?").to_string(),
        Value::Pair(_) => match heap.head(inner) {
            Some(tag @ Value::Symbol(_)) => print_form(heap, tag, node),
            Some(Value::Pair(_)) => print_application(heap, inner),
            _ => "nil".to_string(),
        },
        _ => "?".to_string(),
    }
}

fn print_form(heap: &Heap, tag: Value, node: Value) -> String {
    let children = node_children(heap, node);
    // tag symbols compare with `==` since `Value` holds floats and cannot
    // appear as a match pattern
    if tag == TAG_STRING {
        let payload = heap.tail(node_inner(heap, node)).unwrap_or(NIL);
        let text = heap.symbols.name(payload).unwrap_or("");
        format!("\"{}\"", escape(text))
    } else if tag == TAG_SYMBOL {
        let payload = heap.tail(node_inner(heap, node)).unwrap_or(NIL);
        format!(":{}", heap.symbols.name(payload).unwrap_or("?"))
    } else if tag == TAG_LIST {
        format!("[{}]", join(heap, &children))
    } else if tag == TAG_TUPLE {
        format!("#[{}]", join(heap, &children))
    } else if tag == TAG_MAP {
        let entries: Vec<String> = children
            .iter()
            .map(|entry| {
                let key = heap.head(*entry).unwrap_or(NIL);
                let value = heap.tail(*entry).unwrap_or(NIL);
                format!(
                    "{}: {}",
                    heap.symbols.name(key).unwrap_or("?"),
                    print_ast(heap, value)
                )
            })
            .collect();
        format!("{{{}}}", entries.join(", "))
    } else if tag == TAG_DO {
        let stmts: Vec<String> = children.iter().map(|s| print_ast(heap, *s)).collect();
        format!("do\n{}\nend", stmts.join("\n"))
    } else if tag == TAG_LET {
        let assigns: Vec<String> = children
            .iter()
            .map(|assign| {
                let name = heap.list_get(*assign, 0).unwrap_or(NIL);
                let value = heap.list_get(*assign, 1).unwrap_or(NIL);
                format!(
                    "{} = {}",
                    heap.symbols.name(name).unwrap_or("?"),
                    print_ast(heap, value)
                )
            })
            .collect();
        format!("let {}", assigns.join(", "))
    } else if tag == TAG_DEF {
        // def prints back as `def (name params) body`
        let assign = children.first().copied().unwrap_or(NIL);
        let name = heap.list_get(assign, 0).unwrap_or(NIL);
        let lambda = heap.list_get(assign, 1).unwrap_or(NIL);
        let lambda_children = node_children(heap, lambda);
        let params = lambda_children.first().copied().unwrap_or(NIL);
        let body = lambda_children.get(1).copied().unwrap_or(NIL);
        let mut header = vec![heap.symbols.name(name).unwrap_or("?").to_string()];
        for param in heap.list_items(params) {
            header.push(heap.symbols.name(param).unwrap_or("?").to_string());
        }
        format!("def ({}) {}", header.join(" "), print_ast(heap, body))
    } else if tag == TAG_IMPORT {
        let parts: Vec<String> = children
            .iter()
            .map(|entry| {
                let name = heap.list_get(*entry, 0).unwrap_or(NIL);
                let alias = heap.list_get(*entry, 1).unwrap_or(NIL);
                let name_text = heap.symbols.name(name).unwrap_or("?");
                if alias == NIL {
                    format!("import {name_text} as *")
                } else if alias == name {
                    format!("import {name_text}")
                } else {
                    format!(
                        "import {name_text} as {}",
                        heap.symbols.name(alias).unwrap_or("?")
                    )
                }
            })
            .collect();
        parts.join("\n")
    } else if tag == TAG_IF && children.len() == 3 {
        format!(
            "if {} do {} else {} end",
            print_ast(heap, children[0]),
            print_block(heap, children[1]),
            print_block(heap, children[2]),
        )
    } else if (tag == TAG_AND || tag == TAG_OR) && children.len() == 2 {
        let word = if tag == TAG_AND { "and" } else { "or" };
        format!(
            "({} {word} {})",
            print_ast(heap, children[0]),
            print_ast(heap, children[1])
        )
    } else if tag == TAG_LAMBDA && children.len() == 2 {
        let params: Vec<String> = heap
            .list_items(children[0])
            .iter()
            .map(|p| heap.symbols.name(*p).unwrap_or("?").to_string())
            .collect();
        format!("({}) -> {}", params.join(", "), print_ast(heap, children[1]))
    } else if tag == TAG_ACCESS && children.len() == 2 {
        let obj = print_ast(heap, children[0]);
        let key = children[1];
        if node_tag(heap, key) == Some(TAG_SYMBOL) {
            let sym = heap.tail(node_inner(heap, key)).unwrap_or(NIL);
            format!("({obj}).{}", heap.symbols.name(sym).unwrap_or("?"))
        } else {
            format!("({obj})[{}]", print_ast(heap, key))
        }
    } else if (tag == TAG_NOT || tag == TAG_LEN || tag == TAG_SUB) && children.len() == 1 {
        let op = heap.symbols.name(tag).unwrap_or("?");
        let space = if tag == TAG_NOT { " " } else { "" };
        format!("{op}{space}({})", print_ast(heap, children[0]))
    } else if children.len() == 2 {
        // every remaining tag is a binary operator
        let op = heap.symbols.name(tag).unwrap_or("?");
        format!(
            "({} {op} {})",
            print_ast(heap, children[0]),
            print_ast(heap, children[1])
        )
    } else {
        "?".to_string()
    }
}

/// An if-branch: either a single statement or a nested `do` whose
/// statements can print inline between the surrounding keywords.
fn print_block(heap: &Heap, node: Value) -> String {
    if node_tag(heap, node) == Some(TAG_DO) {
        let stmts: Vec<String> = node_children(heap, node)
            .iter()
            .map(|s| print_ast(heap, *s))
            .collect();
        stmts.join("\n")
    } else {
        print_ast(heap, node)
    }
}

fn print_application(heap: &Heap, inner: Value) -> String {
    let items = heap.list_items(inner);
    let operator = print_ast(heap, items[0]);
    let needs_parens = !matches!(node_inner(heap, items[0]), Value::Symbol(_));
    let operator = if needs_parens {
        format!("({operator})")
    } else {
        operator
    };
    let args = join(heap, &items[1..]);
    format!("{operator}({args})")
}

fn join(heap: &Heap, nodes: &[Value]) -> String {
    nodes
        .iter()
        .map(|n| print_ast(heap, *n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    /// Print-parse-print must reach a fixpoint: the second print equals
    /// the first, so the reparsed tree is structurally the same.
    fn assert_round_trip(source: &str) {
        let mut heap = Heap::new();
        let ast = parser::parse(source, &mut heap).expect("parse original");
        let printed = print_ast(&heap, ast.body);

        let mut heap2 = Heap::new();
        let ast2 = parser::parse(&printed, &mut heap2)
            .unwrap_or_else(|e| panic!("reparse failed for {printed:?}: {e}"));
        let printed2 = print_ast(&heap2, ast2.body);

        assert_eq!(printed, printed2, "round trip diverged for {source:?}");
    }

    #[test]
    fn test_round_trip_literals() {
        assert_round_trip("42");
        assert_round_trip("3.5");
        assert_round_trip("\"a \\\"quoted\\\" string\"");
        assert_round_trip(":sym");
        assert_round_trip("nil");
        assert_round_trip("true");
    }

    #[test]
    fn test_round_trip_operators() {
        assert_round_trip("1 + 2 * 3");
        assert_round_trip("(1 + 2) * 3");
        assert_round_trip("a and b or c");
        assert_round_trip("1 | [2, 3]");
        assert_round_trip("x in [1, 2]");
        assert_round_trip("1 <= 2");
        assert_round_trip("-x");
        assert_round_trip("#xs");
    }

    #[test]
    fn test_round_trip_collections() {
        assert_round_trip("[1, [2, 3], {a: 1}]");
        assert_round_trip("#[1, 2, 3]");
        assert_round_trip("{a: 1, b: [2]}");
    }

    #[test]
    fn test_round_trip_functions() {
        assert_round_trip("(x, y) -> x + y");
        assert_round_trip("let make = n -> x -> x + n\nmake(3)");
        assert_round_trip("f(1, 2)");
        assert_round_trip("f()");
    }

    #[test]
    fn test_round_trip_statements() {
        assert_round_trip("let x = 1, y = 2\nx + y");
        assert_round_trip("def (fact n) if n == 0 do 1 else n * fact(n - 1) end");
        assert_round_trip("do\nlet x = 1\nx\nend");
        assert_round_trip("if a do 1 else 2 end");
        assert_round_trip("m.key + xs[0]");
    }
}
