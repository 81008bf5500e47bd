// End-to-end execution tests: scan, parse, load and run SCL programs with
// output captured in memory.

use pretty_assertions::assert_eq;
use scl::error::{LoadError, RuntimeError, RuntimeErrorKind, SclError};
use scl::interpreter::{ControlSignal, Interpreter, InterpreterConfig};
use scl::value::Value;
use scl::{lexer, loader, parser, runner};

/// Run a program, returning its exit code (or error) and everything it displayed.
fn run(source: &str) -> (Result<i64, SclError>, String) {
    run_with(source, InterpreterConfig::default())
}

fn run_with(source: &str, config: InterpreterConfig) -> (Result<i64, SclError>, String) {
    let mut out = Vec::new();
    let result = runner::run_source(source, &mut out, config);
    (result, String::from_utf8(out).unwrap())
}

fn runtime_error(result: Result<i64, SclError>) -> RuntimeError {
    match result {
        Err(SclError::Runtime(error)) => error,
        other => panic!("expected a runtime error, got {:?}", other),
    }
}

fn load_error(result: Result<i64, SclError>) -> LoadError {
    match result {
        Err(SclError::Load(error)) => error,
        other => panic!("expected a load error, got {:?}", other),
    }
}

#[test]
fn exit_zero_alone_prints_nothing() {
    let (result, output) = run("implementations
function main is
begin
  exit 0
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "");
}

#[test]
fn displays_joined_operands() {
    let (result, output) = run("implementations
function main is
variables
  define x of type integer
begin
  set x = 42
  display \"Value of x:\", x
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "Value of x: 42\n");
}

#[test]
fn struct_fields_through_heap_pointer() {
    let (result, output) = run("specifications
  struct Datablock is
    define stname of type char
    define age of type integer
    define jobcode of type integer
  endstruct Datablock
implementations
function main is
variables
  define node pointer of type Datablock
begin
  create node
  set node->age = 30
  display node->age
  display node^
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "30\nDatablock {stname: \"\", age: 30, jobcode: 0}\n");
}

#[test]
fn exit_unwinds_every_frame() {
    let source = "implementations
function inner is
begin
  display \"inner\"
  exit 7
  display \"unreachable\"
endfun inner
function outer is
begin
  call inner
  display \"after inner\"
endfun outer
function main is
begin
  call outer
  display \"after outer\"
endfun main
";
    let program = parser::parse(lexer::scan(source)).into_result().unwrap();
    let registries = loader::load(program).unwrap();
    let mut interpreter = Interpreter::new(&registries, Vec::new(), InterpreterConfig::default());

    assert_eq!(interpreter.run().unwrap(), 7);
    assert_eq!(interpreter.environment().depth(), 0);
    assert_eq!(String::from_utf8(interpreter.into_output()).unwrap(), "inner\n");
}

#[test]
fn local_shadows_global_without_touching_it() {
    let (result, output) = run("global declarations
  variables
    define count of type integer
implementations
function bump is
variables
  define count of type integer
begin
  set count = 99
  display \"local\", count
endfun bump
function main is
begin
  set count = 5
  call bump
  display \"global\", count
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "local 99\nglobal 5\n");
}

#[test]
fn numeric_promotion_and_truncating_division() {
    let (result, output) = run("implementations
function main is
variables
  define i of type integer
  define d of type double
begin
  set i = 7 / 2
  set d = i + 0.5
  display i, d, 7.0 / 2, -7 / 2
  set d = 4
  set i = 2.9
  display d, i
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "3 3.5 3.5 -3\n4.0 2\n");
}

#[test]
fn use_after_destroy_is_reported_where_it_happens() {
    let (result, output) = run("specifications
  struct Datablock is
    define age of type integer
  endstruct Datablock
implementations
function main is
variables
  define node pointer of type Datablock
begin
  create node
  destroy node
  display node->age
endfun main
");
    let error = runtime_error(result);
    assert_eq!(error.kind, RuntimeErrorKind::UseAfterDestroy);
    assert_eq!(error.span.map(|span| span.line), Some(12));
    assert_eq!(error.function.as_deref(), Some("main"));
    assert_eq!(output, "");
}

#[test]
fn destroying_twice_is_a_double_free() {
    let (result, _) = run("implementations
function main is
variables
  define p pointer of type integer
begin
  create p
  destroy p
  destroy p
endfun main
");
    assert_eq!(runtime_error(result).kind, RuntimeErrorKind::DoubleFree);
}

#[test]
fn destroying_null_or_stack_addresses_is_invalid() {
    for statement in ["destroy p", "set p = &x\n  destroy p"] {
        let source = format!(
            "implementations
function main is
variables
  define x of type integer
  define p pointer of type integer
begin
  {}
endfun main
",
            statement
        );
        let (result, _) = run(&source);
        assert_eq!(runtime_error(result).kind, RuntimeErrorKind::InvalidPointer);
    }
}

#[test]
fn pointers_to_locals_read_and_write_through() {
    let (result, output) = run("implementations
function main is
variables
  define x of type integer
  define p pointer of type integer
begin
  set x = 1
  set p = &x
  set p^ = p^ + 41
  display x, p == &x, p == null
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "42 true false\n");
}

#[test]
fn pointer_into_returned_frame_dangles() {
    let (result, _) = run("implementations
function leak return type pointer of type integer is
variables
  define local of type integer
begin
  return &local
endfun leak
function main is
variables
  define p pointer of type integer
begin
  set p = leak()
  display p^
endfun main
");
    assert_eq!(runtime_error(result).kind, RuntimeErrorKind::DanglingPointer);
}

#[test]
fn null_member_access_is_reported() {
    let (result, _) = run("specifications
  struct Node is
    define value of type integer
  endstruct Node
implementations
function main is
variables
  define n pointer of type Node
begin
  set n->value = 1
endfun main
");
    assert_eq!(runtime_error(result).kind, RuntimeErrorKind::NullPointer);
}

#[test]
fn unknown_field_is_reported() {
    let (result, _) = run("specifications
  struct Node is
    define value of type integer
  endstruct Node
implementations
function main is
variables
  define n pointer of type Node
begin
  create n
  display n->missing
endfun main
");
    assert_eq!(runtime_error(result).kind, RuntimeErrorKind::UnknownField);
}

#[test]
fn falling_off_a_valued_function_is_missing_return() {
    let (result, _) = run("implementations
function half return type integer parameters n of type integer is
begin
  if n > 0 then
    return n / 2
  endif
endfun half
function main is
variables
  define r of type integer
begin
  set r = half(-4)
endfun main
");
    let error = runtime_error(result);
    assert_eq!(error.kind, RuntimeErrorKind::MissingReturn);
    assert_eq!(error.function.as_deref(), Some("half"));
}

#[test]
fn void_function_in_expression_is_a_type_mismatch() {
    let (result, _) = run("implementations
function greet is
begin
  display \"hi\"
endfun greet
function main is
variables
  define r of type integer
begin
  set r = greet()
endfun main
");
    assert_eq!(runtime_error(result).kind, RuntimeErrorKind::TypeMismatch);
}

#[test]
fn unregistered_calls_are_simulated() {
    let source = "implementations
function main is
variables
  define r of type integer
begin
  call printf using \"hello\", 3
  set r = lookup(1) + 5
  display r
endfun main
";
    let program = parser::parse(lexer::scan(source)).into_result().unwrap();
    let registries = loader::load(program).unwrap();
    let mut interpreter = Interpreter::new(&registries, Vec::new(), InterpreterConfig::default());

    assert_eq!(interpreter.run().unwrap(), 0);

    let calls = interpreter.external_calls();
    let names: Vec<&str> = calls.iter().map(|call| call.name.as_str()).collect();
    assert_eq!(names, vec!["printf", "lookup"]);
    assert_eq!(calls[0].args, vec![Value::Text("hello".into()), Value::Integer(3)]);
    assert_eq!(calls[0].span.line, 6);
    assert_eq!(interpreter.output(), &b"5\n".to_vec());
}

#[test]
fn arrays_and_counting_loops() {
    let (result, output) = run("implementations
function main is
variables
  define squares array[5] of type integer
  define i of type integer
  define total of type integer
begin
  for i = 0 to 4 do
    set squares[i] = i * i
  endfor
  for i = 4 to 0 step -1 do
    set total = total + squares[i]
  endfor
  display squares, total, i
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "[0, 1, 4, 9, 16] 30 -1\n");
}

#[test]
fn array_index_past_the_end_fails() {
    let (result, _) = run("implementations
function main is
variables
  define items array[2] of type integer
begin
  set items[2] = 1
endfun main
");
    assert_eq!(runtime_error(result).kind, RuntimeErrorKind::IndexOutOfBounds);
}

#[test]
fn while_loops_and_recursion() {
    let (result, output) = run("implementations
function fact return type integer parameters n of type integer is
begin
  if n <= 1 then
    return 1
  else
    return n * fact(n - 1)
  endif
endfun fact
function main is
variables
  define i of type integer
begin
  while i < 3 do
    increment i
  endwhile
  decrement i
  display i, fact(5)
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "2 120\n");
}

#[test]
fn runaway_recursion_hits_the_depth_limit() {
    let (result, _) = run_with(
        "implementations
function forever parameters n of type integer is
begin
  call forever using n + 1
endfun forever
function main is
begin
  call forever using 0
endfun main
",
        InterpreterConfig { max_call_depth: 16 },
    );
    assert_eq!(runtime_error(result).kind, RuntimeErrorKind::StackOverflow);
}

#[test]
fn default_depth_limit_is_reached_before_the_host_stack_runs_out() {
    let (result, _) = run("implementations
function forever parameters n of type integer is
begin
  call forever using n + 1
endfun forever
function main is
begin
  call forever using 0
endfun main
");
    let error = runtime_error(result);
    assert_eq!(error.kind, RuntimeErrorKind::StackOverflow);
    assert!(error.message.contains("maximum call depth of 256"), "{}", error.message);

    let (result, _) = run("implementations
function deeper return type integer parameters n of type integer is
begin
  return deeper(n + 1) + 1
endfun deeper
function main is
begin
  display deeper(0)
endfun main
");
    assert_eq!(runtime_error(result).kind, RuntimeErrorKind::StackOverflow);
}

#[test]
fn constants_are_read_only() {
    let (result, output) = run("symbol MAX 10
global declarations
  constants
    define LIMIT = MAX * 2 of type integer
implementations
function main is
begin
  display LIMIT
  set LIMIT = 1
endfun main
");
    assert_eq!(runtime_error(result).kind, RuntimeErrorKind::AssignToConstant);
    assert_eq!(output, "20\n");
}

#[test]
fn struct_values_copy_on_assignment() {
    let (result, output) = run("specifications
  struct Point is
    define x of type integer
    define y of type integer
  endstruct Point
implementations
function main is
variables
  define a of type Point
  define b of type Point
begin
  set a.x = 3
  set b = a
  set b.y = 4
  display a, b, b.x + b.y
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "Point {x: 3, y: 0} Point {x: 3, y: 4} 7\n");
}

#[test]
fn runtime_failures_by_kind() {
    let cases = [
        ("display 1 / 0", RuntimeErrorKind::DivisionByZero),
        ("display 1.5 / 0.0", RuntimeErrorKind::DivisionByZero),
        ("display missing", RuntimeErrorKind::UndefinedVariable),
        ("if 1 then display 1 endif", RuntimeErrorKind::TypeMismatch),
        ("set x = \"text\"", RuntimeErrorKind::TypeMismatch),
        ("display true && 1", RuntimeErrorKind::TypeMismatch),
        ("define x of type integer", RuntimeErrorKind::Redeclaration),
        ("call twice using 1", RuntimeErrorKind::ArityMismatch),
        ("display x^", RuntimeErrorKind::TypeMismatch),
        ("set x = &(x + 1)", RuntimeErrorKind::NotAddressable),
        ("display x->age", RuntimeErrorKind::InvalidMemberAccess),
        ("display x.age", RuntimeErrorKind::InvalidMemberAccess),
        (
            "define p pointer of type integer\n  set p = &x\n  display p->f",
            RuntimeErrorKind::InvalidMemberAccess,
        ),
    ];

    for (statement, kind) in cases {
        let source = format!(
            "implementations
function twice return type integer parameters a of type integer, b of type integer is
begin
  return a * 2
endfun twice
function main is
variables
  define x of type integer
begin
  {}
endfun main
",
            statement
        );
        let (result, _) = run(&source);
        assert_eq!(runtime_error(result).kind, kind, "statement: {}", statement);
    }
}

#[test]
fn logic_short_circuits() {
    let (result, output) = run("implementations
function main is
begin
  display false and 1 / 0 == 1, true or missing, not false
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "false true true\n");
}

#[test]
fn program_without_main_has_no_entry_point() {
    let (result, _) = run("implementations
function helper is
begin
endfun helper
");
    assert_eq!(runtime_error(result).kind, RuntimeErrorKind::NoEntryPoint);
}

#[test]
fn load_phase_rejects_inconsistent_programs() {
    let (result, _) = run("implementations
function main is
begin
endfun main
function main is
begin
endfun main
");
    assert!(matches!(
        load_error(result),
        LoadError::DuplicateDefinition { what: "function", .. }
    ));

    let (result, _) = run("global declarations
  variables
    define n of type Nothing
implementations
function main is
begin
endfun main
");
    assert!(matches!(load_error(result), LoadError::UnknownType { .. }));

    let (result, _) = run("forward declarations
  function later return type integer
implementations
function main is
begin
endfun main
");
    assert!(matches!(load_error(result), LoadError::UnresolvedForward { .. }));

    let (result, _) = run("forward declarations
  function later return type integer parameters a of type integer
implementations
function later return type integer is
begin
  return 1
endfun later
function main is
begin
endfun main
");
    assert!(matches!(load_error(result), LoadError::ForwardMismatch { .. }));

    let (result, _) = run("specifications
  struct Loop is
    define inner of type Loop
  endstruct Loop
implementations
function main is
begin
endfun main
");
    assert!(matches!(load_error(result), LoadError::RecursiveStruct { .. }));

    let (result, output) = run("implementations
function main is
begin
  while true do
    define q of type Nope
    display q
  endwhile
  exit 3
endfun main
");
    match load_error(result) {
        LoadError::UnknownType { name, span } => {
            assert_eq!(name, "Nope");
            assert_eq!(span.line, 5);
        }
        other => panic!("expected an unknown type, got {:?}", other),
    }
    assert_eq!(output, "");
}

#[test]
fn oversized_storage_is_refused_before_running() {
    let (result, output) = run("implementations
function main is
variables
  define a array[100000000000] of type integer
begin
  display \"unreachable\"
endfun main
");
    assert!(matches!(
        load_error(result),
        LoadError::TooLarge { slots: 100000000000, .. }
    ));
    assert_eq!(output, "");

    // Nested sizes multiply through struct fields
    let (result, _) = run("specifications
  struct Row is
    define cells array[1024] of type integer
  endstruct Row
implementations
function main is
begin
  define grid array[2048] of type Row
endfun main
");
    assert!(matches!(load_error(result), LoadError::TooLarge { slots: 2097152, .. }));

    // Up to the limit is fine
    let (result, output) = run("implementations
function main is
variables
  define a array[1000] of type integer
begin
  set a[999] = 7
  display a[999]
endfun main
");
    assert_eq!(result.unwrap(), 0);
    assert_eq!(output, "7\n");
}

#[test]
fn syntax_errors_refuse_execution() {
    let (result, output) = run("implementations
function main is
begin
  display \"should not run\"
  set x 1
endfun main
");
    match result {
        Err(SclError::Syntax(errors)) => assert_eq!(errors.len(), 1),
        other => panic!("expected syntax errors, got {:?}", other),
    }
    assert_eq!(output, "");
}

#[test]
fn staged_files_match_in_memory_run() {
    let source = "implementations
function main is
begin
  display \"staged\", 1 + 1
  exit 3
endfun main
";
    let tokens = runner::scan_source(source);
    let tokens_json = serde_json::to_string(&tokens).unwrap();

    let parsed = runner::parse_tokens(serde_json::from_str(&tokens_json).unwrap());
    let ast_json = serde_json::to_string(&parsed).unwrap();

    let mut out = Vec::new();
    let code = runner::execute_parsed(
        serde_json::from_str(&ast_json).unwrap(),
        &mut out,
        InterpreterConfig::default(),
    )
    .unwrap();

    assert_eq!(code, 3);
    assert_eq!(String::from_utf8(out).unwrap(), "staged 2\n");
}

#[test]
fn single_statements_report_their_control_signal() {
    let source = "implementations
function main is
begin
  display 6 * 7
  return 2
  exit 4
endfun main
";
    let program = parser::parse(lexer::scan(source)).into_result().unwrap();
    let body = program.functions[0].body.clone();
    let registries = loader::Registries::default();
    let mut interpreter = Interpreter::new(&registries, Vec::new(), InterpreterConfig::default());

    assert_eq!(interpreter.execute(&body[0]).unwrap(), ControlSignal::Normal);
    assert_eq!(
        interpreter.execute(&body[1]).unwrap(),
        ControlSignal::Return(Some(Value::Integer(2)))
    );
    assert_eq!(interpreter.execute(&body[2]).unwrap(), ControlSignal::Exit(4));
    assert_eq!(String::from_utf8(interpreter.into_output()).unwrap(), "42\n");
}
