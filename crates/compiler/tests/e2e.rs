//! End-to-end tests: source text through the full pipeline and the VM.

use cassette_core::chunk::Chunk;
use cassette_core::value::{FALSE, NIL, TRUE, Value};
use cassette_runtime::error::ErrorKind;
use cassette_runtime::vm::Vm;
use cassettec::{BuildError, build_source, build_sources};

fn run(source: &str) -> (Vm, Result<Value, cassette_runtime::error::VmError>) {
    let chunk = build_source("test.ct", source).expect("build");
    let mut vm = Vm::new(0);
    vm.load(&chunk);
    let result = vm.run(&chunk);
    (vm, result)
}

fn eval(source: &str) -> Value {
    let (_, result) = run(source);
    result.expect("run")
}

fn eval_err(source: &str) -> ErrorKind {
    let (_, result) = run(source);
    result.expect_err("expected a runtime error").kind
}

#[test]
fn test_arithmetic_block() {
    // S1
    assert_eq!(eval("do (1 + 2) * 3 end"), Value::Int(9));
}

#[test]
fn test_lexical_binding_and_closure() {
    // S2
    let source = "let make = (n) -> (x) -> x + n\nlet add3 = make(3)\nadd3(4)";
    assert_eq!(eval(source), Value::Int(7));
}

#[test]
fn test_tail_recursion_runs_in_constant_stack() {
    // S3
    let source = "def (count n acc) if n == 0 do acc else count(n - 1, acc + 1) end\n\
                  count(100000, 0)";
    let (vm, result) = run(source);
    assert_eq!(result.unwrap(), Value::Int(100_000));
    // one result value; no leftover frames from 100k calls
    assert_eq!(vm.stack.len(), 1);
    assert!(vm.call_stack.is_empty());
}

#[test]
fn test_list_operations() {
    // S4
    assert_eq!(eval("[1, 2, 3] |> #"), Value::Int(3));
    assert_eq!(eval("head([1, 2, 3])"), Value::Int(1));
    assert_eq!(eval("[1, 2, 3][1]"), Value::Int(2));
    assert_eq!(eval("(tail([1, 2]))[0]"), Value::Int(2));
}

#[test]
fn test_map_access() {
    // S5
    assert_eq!(eval("{a: 1, b: 2}.a + {a: 1, b: 2}.b"), Value::Int(3));
    assert_eq!(eval_err("{a: 1}.missing"), ErrorKind::Key);
}

#[test]
fn test_module_import_memoizes() {
    // S6
    let sources = [
        ("main.ct".to_string(), "import M\nM.foo".to_string()),
        ("m.ct".to_string(), "module M\nlet foo = 42".to_string()),
    ];
    let chunk = build_sources(&sources).expect("build");
    let mut vm = Vm::new(0);
    vm.load(&chunk);
    assert_eq!(vm.run(&chunk).unwrap(), Value::Int(42));
    // after the first import the cache slot holds the export map, not the
    // thunk, so the module body can never run twice
    assert!(vm.heap.is_map(vm.modules[0]));
}

#[test]
fn test_import_twice_yields_same_exports() {
    let sources = [
        (
            "main.ct".to_string(),
            "import M as A\nimport M as B\nA.foo + B.foo".to_string(),
        ),
        ("m.ct".to_string(), "module M\nlet foo = 21".to_string()),
    ];
    let chunk = build_sources(&sources).expect("build");
    let mut vm = Vm::new(0);
    vm.load(&chunk);
    assert_eq!(vm.run(&chunk).unwrap(), Value::Int(42));
}

#[test]
fn test_import_star_defines_each_export() {
    let sources = [
        ("main.ct".to_string(), "import M as *\nfoo + bar".to_string()),
        (
            "m.ct".to_string(),
            "module M\nlet foo = 40\nlet bar = 2".to_string(),
        ),
    ];
    let chunk = build_sources(&sources).expect("build");
    let mut vm = Vm::new(0);
    vm.load(&chunk);
    assert_eq!(vm.run(&chunk).unwrap(), Value::Int(42));
}

#[test]
fn test_transitive_imports() {
    let sources = [
        ("main.ct".to_string(), "import A\nA.value".to_string()),
        (
            "a.ct".to_string(),
            "module A\nimport B\nlet value = B.base + 1".to_string(),
        ),
        ("b.ct".to_string(), "module B\nlet base = 9".to_string()),
    ];
    let chunk = build_sources(&sources).expect("build");
    let mut vm = Vm::new(0);
    vm.load(&chunk);
    assert_eq!(vm.run(&chunk).unwrap(), Value::Int(10));
}

#[test]
fn test_short_circuit_keeps_operand_value() {
    assert_eq!(eval("false or 2"), Value::Int(2));
    assert_eq!(eval("3 or 2"), Value::Int(3));
    assert_eq!(eval("false and 2"), FALSE);
    assert_eq!(eval("1 and 2"), Value::Int(2));
    assert_eq!(eval("nil or false"), FALSE);
}

#[test]
fn test_cond_picks_first_truthy_clause() {
    let source = "let x = 2\n\
                  cond\n\
                  x == 1 -> :one\n\
                  x == 2 -> :two\n\
                  else :other\n\
                  end";
    let (vm, result) = run(source);
    let value = result.unwrap();
    assert_eq!(vm.heap.symbols.name(value), Some("two"));
}

#[test]
fn test_let_shadowing() {
    let source = "let x = 1\ndo\nlet x = 2\nx\nend + x";
    assert_eq!(eval(source), Value::Int(3));
}

#[test]
fn test_mutual_recursion_in_a_block() {
    let source = "def (even? n) if n == 0 do true else odd?(n - 1) end\n\
                  def (odd? n) if n == 0 do false else even?(n - 1) end\n\
                  even?(10)";
    assert_eq!(eval(source), TRUE);
}

#[test]
fn test_strings_and_concat() {
    let (vm, result) = run("\"foo\" <> \"bar\"");
    let value = result.unwrap();
    assert_eq!(vm.heap.binary_bytes(value).as_deref(), Some(&b"foobar"[..]));
    assert_eq!(eval("#\"hello\""), Value::Int(5));
    assert_eq!(eval("\"abc\"[1]"), Value::Int(b'b' as i32));
}

#[test]
fn test_tuples() {
    assert_eq!(eval("#[10, 20, 30][2]"), Value::Int(30));
    assert_eq!(eval("# #[1, 2]"), Value::Int(2));
    assert_eq!(eval("2 in #[1, 2]"), TRUE);
}

#[test]
fn test_range_and_membership() {
    assert_eq!(eval("#(1 .. 11)"), Value::Int(10));
    assert_eq!(eval("3 in [1, 2, 3]"), TRUE);
    assert_eq!(eval("9 in (0 .. 5)"), FALSE);
}

#[test]
fn test_map_primitives_are_persistent() {
    let source = "let m = {a: 1}\n\
                  let m2 = map-set(m, :b, 2)\n\
                  #(map-keys(m)) + #(map-keys(m2))";
    assert_eq!(eval(source), Value::Int(3));
    assert_eq!(eval("map-get(map-del({a: 1}, :a), :a)"), NIL);
}

#[test]
fn test_results_and_unwrap() {
    assert_eq!(eval("unwrap!(:ok | 5)"), Value::Int(5));
    assert_eq!(eval("unwrap(:error | :bad, 0)"), Value::Int(0));
    assert_eq!(eval("ok?(:ok | 1)"), TRUE);
    assert_eq!(eval_err("unwrap!(:error | :bad)"), ErrorKind::Runtime);
}

#[test]
fn test_type_predicates() {
    assert_eq!(eval("integer?(1)"), TRUE);
    assert_eq!(eval("float?(1.5)"), TRUE);
    assert_eq!(eval("function?(x -> x)"), TRUE);
    assert_eq!(eval("function?(head)"), TRUE);
    assert_eq!(eval("map?({})"), TRUE);
    assert_eq!(eval("binary?(\"s\")"), TRUE);
}

#[test]
fn test_runtime_errors_have_kinds() {
    assert_eq!(eval_err("1 / 0"), ErrorKind::Arithmetic);
    assert_eq!(eval_err("1 + :sym"), ErrorKind::Type);
    assert_eq!(eval_err("[1][5]"), ErrorKind::Key);
    assert_eq!(eval_err("panic!(\"boom\")"), ErrorKind::Runtime);
    // dynamic arity mismatch
    assert_eq!(eval_err("let f = (x, y) -> x\nf(1)"), ErrorKind::Arity);
}

#[test]
fn test_primitive_values_are_first_class() {
    // a primitive stored in a variable goes through the dynamic call path
    assert_eq!(eval("let f = head\nf([7, 8])"), Value::Int(7));
}

#[test]
fn test_higher_order_functions() {
    let source = "def (twice f x) f(f(x))\n\
                  twice(n -> n * 3, 2)";
    assert_eq!(eval(source), Value::Int(18));
}

#[test]
fn test_gc_preserves_live_data_under_pressure() {
    // builds 50k cons cells, forcing several collections with live data
    let source = "def (build n acc) if n == 0 do acc else build(n - 1, n | acc) end\n\
                  let xs = build(50000, nil)\n\
                  head(xs) + #xs";
    assert_eq!(eval(source), Value::Int(50_001));
}

#[test]
fn test_stack_balance_for_expressions() {
    // every expression leaves exactly one value
    for source in [
        "1",
        "1 + 2",
        "[1, 2, 3]",
        "{a: 1}",
        "#[1]",
        "if true do 1 else 2 end",
        "do\nlet x = 1\nlet y = 2\nx + y\nend",
        "(x -> x)(9)",
    ] {
        let (vm, result) = run(source);
        assert!(result.is_ok(), "failed: {source}");
        assert_eq!(vm.stack.len(), 1, "unbalanced stack for {source}");
    }
}

#[test]
fn test_assignment_as_last_statement_yields_nil() {
    assert_eq!(eval("do\nlet x = 1\nend"), NIL);
}

#[test]
fn test_chunk_serialization_round_trip() {
    let chunk = build_source("test.ct", "let x = 40\nx + 2").expect("build");
    let bytes = chunk.serialize();
    let back = Chunk::deserialize(&bytes).expect("deserialize");
    let mut vm = Vm::new(0);
    vm.load(&back);
    assert_eq!(vm.run(&back).unwrap(), Value::Int(42));
}

#[test]
fn test_partial_parse_is_distinguished() {
    match build_source("test.ct", "do\n1 + 2") {
        Err(BuildError::Parse { error, .. }) => {
            assert_eq!(error, cassettec::ParseError::Partial);
        }
        other => panic!("expected partial parse, got ok={}", other.is_ok()),
    }
}

#[test]
fn test_undefined_variable_fails_at_compile_time() {
    match build_source("test.ct", "1 + nope") {
        Err(BuildError::Compile { error, .. }) => {
            assert!(error.message.contains("undefined variable"));
        }
        other => panic!("expected compile error, got ok={}", other.is_ok()),
    }
}

#[test]
fn test_missing_module_fails_at_compile_time() {
    match build_source("test.ct", "import Ghost\nGhost") {
        Err(BuildError::Compile { error, .. }) => {
            assert!(error.message.contains("not found"));
        }
        other => panic!("expected compile error, got ok={}", other.is_ok()),
    }
}

#[test]
fn test_random_is_seeded_and_deterministic() {
    let chunk = build_source("test.ct", "random()").expect("build");
    let mut vm1 = Vm::new(123);
    vm1.load(&chunk);
    let a = vm1.run(&chunk).unwrap();
    let mut vm2 = Vm::new(123);
    vm2.load(&chunk);
    let b = vm2.run(&chunk).unwrap();
    assert_eq!(a, b);
    match a {
        Value::Float(f) => assert!((0.0..1.0).contains(&f)),
        other => panic!("expected float, got {other:?}"),
    }
}

#[test]
fn test_project_files_on_disk() {
    use std::io::Write;
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib.ct");
    let main = dir.path().join("main.ct");
    std::fs::File::create(&lib)
        .unwrap()
        .write_all(b"module Lib\nlet twelve = 12\n")
        .unwrap();
    std::fs::File::create(&main)
        .unwrap()
        .write_all(b"import Lib\nLib.twelve * 2\n")
        .unwrap();

    let config = cassettec::BuildConfig::default();
    let chunk = cassettec::build_project(&main, &[lib], &config).expect("build");
    let mut vm = Vm::new(0);
    vm.load(&chunk);
    assert_eq!(vm.run(&chunk).unwrap(), Value::Int(24));
}

#[test]
fn test_stdlib_directory_joins_the_project() {
    use std::io::Write;
    let dir = tempfile::tempdir().unwrap();
    let std_dir = dir.path().join("stdlib");
    std::fs::create_dir(&std_dir).unwrap();
    std::fs::File::create(std_dir.join("math.ct"))
        .unwrap()
        .write_all(b"module Math\ndef (square x) x * x\n")
        .unwrap();
    let main = dir.path().join("main.ct");
    std::fs::File::create(&main)
        .unwrap()
        .write_all(b"import Math\nlet sq = Math.square\nsq(6)\n")
        .unwrap();

    let config = cassettec::BuildConfig {
        stdlib: Some(std_dir),
        ..Default::default()
    };
    let chunk = cassettec::build_project(&main, &[], &config).expect("build");
    let mut vm = Vm::new(0);
    vm.load(&chunk);
    assert_eq!(vm.run(&chunk).unwrap(), Value::Int(36));
}
