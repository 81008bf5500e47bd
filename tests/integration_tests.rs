// Integration Tests for the SCL Parser
//
// Table-driven robustness suites: every case is scanned and parsed, and the
// outcome is checked against the expected success or error text. Panics are
// caught and reported as crashes.

use pretty_assertions::assert_eq;
use scl::ast::{Expr, Program, Stmt};
use scl::error::SyntaxError;
use scl::lexer;
use scl::parser::{self, ParseOutput};

/// Test result for a single test case
#[derive(Debug)]
pub enum TestResult {
    Pass,
    Fail(String),
    Crash(String),
}

/// Individual test case
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub input: String,
    pub should_succeed: bool,
    pub expected_error_contains: Option<String>,
}

/// Test suite containing multiple test cases
#[derive(Debug)]
pub struct TestSuite {
    pub name: String,
    pub tests: Vec<TestCase>,
}

impl TestSuite {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tests: Vec::new(),
        }
    }

    pub fn add_test(&mut self, test: TestCase) {
        self.tests.push(test);
    }

    /// Run all tests in this suite
    pub fn run(&self) -> TestSuiteResults {
        let mut results = TestSuiteResults::new(&self.name);

        println!("Running test suite: {}", self.name);
        println!("{}", "=".repeat(50));

        for test in &self.tests {
            let result = run_single_test(test);
            results.add_result(&test.name, result);
        }

        results.print_summary();
        results
    }
}

/// Results for a test suite run
#[derive(Debug)]
pub struct TestSuiteResults {
    pub suite_name: String,
    pub results: Vec<(String, TestResult)>,
    pub passed: usize,
    pub failed: usize,
    pub crashed: usize,
}

impl TestSuiteResults {
    pub fn new(suite_name: &str) -> Self {
        Self {
            suite_name: suite_name.to_string(),
            results: Vec::new(),
            passed: 0,
            failed: 0,
            crashed: 0,
        }
    }

    pub fn add_result(&mut self, test_name: &str, result: TestResult) {
        match &result {
            TestResult::Pass => {
                self.passed += 1;
                println!("  ✓ {}", test_name);
            }
            TestResult::Fail(msg) => {
                self.failed += 1;
                println!("  ✗ {}: {}", test_name, msg);
            }
            TestResult::Crash(msg) => {
                self.crashed += 1;
                println!("  💥 {}: CRASHED - {}", test_name, msg);
            }
        }
        self.results.push((test_name.to_string(), result));
    }

    pub fn print_summary(&self) {
        println!();
        println!("Test Suite: {} - Summary", self.suite_name);
        println!("{}", "-".repeat(30));
        println!("Passed:  {}", self.passed);
        println!("Failed:  {}", self.failed);
        println!("Crashed: {}", self.crashed);
        println!("Total:   {}", self.results.len());

        if self.crashed > 0 {
            println!("\n⚠️  WARNING: {} tests caused crashes!", self.crashed);
        }

        if self.failed > 0 {
            println!("\n❌ {} tests had unexpected results.", self.failed);
        }
        println!();
    }

    pub fn is_all_passed(&self) -> bool {
        self.crashed == 0 && self.failed == 0
    }
}

/// Run a single test case
fn run_single_test(test: &TestCase) -> TestResult {
    // Catch any panics to detect crashes
    let result = std::panic::catch_unwind(|| parse_input(&test.input));

    match result {
        Ok(parse_result) => match (parse_result, test.should_succeed) {
            (Ok(_), true) => TestResult::Pass,
            (Ok(_), false) => TestResult::Fail("Expected parsing to fail, but it succeeded".to_string()),
            (Err(errors), false) => {
                // Check if any error contains expected text
                match &test.expected_error_contains {
                    Some(expected) if !errors.iter().any(|error| error.message.contains(expected)) => {
                        TestResult::Fail(format!(
                            "No error message contains '{}', got: {:?}",
                            expected,
                            errors.iter().map(|error| &error.message).collect::<Vec<_>>()
                        ))
                    }
                    _ => TestResult::Pass,
                }
            }
            (Err(errors), true) => TestResult::Fail(format!(
                "Expected parsing to succeed, but got error: {}",
                errors[0]
            )),
        },
        Err(panic_info) => {
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Unknown panic".to_string()
            };
            TestResult::Crash(panic_msg)
        }
    }
}

fn parse_source(input: &str) -> ParseOutput {
    parser::parse(lexer::scan(input))
}

/// Parse input and return result
fn parse_input(input: &str) -> Result<Program, Vec<SyntaxError>> {
    parse_source(input).into_result()
}

/// Wrap statements in a minimal `main`.
fn in_main(body: &str) -> String {
    format!(
        "implementations\nfunction main is\nvariables\n  define x of type integer\nbegin\n{}\nendfun main\n",
        body
    )
}

/// Test case builder for convenience
impl TestCase {
    pub fn should_succeed(name: &str, input: &str) -> Self {
        Self {
            name: name.to_string(),
            input: input.to_string(),
            should_succeed: true,
            expected_error_contains: None,
        }
    }

    pub fn should_fail(name: &str, input: &str) -> Self {
        Self {
            name: name.to_string(),
            input: input.to_string(),
            should_succeed: false,
            expected_error_contains: None,
        }
    }

    pub fn should_fail_with_message(name: &str, input: &str, expected_msg: &str) -> Self {
        Self {
            name: name.to_string(),
            input: input.to_string(),
            should_succeed: false,
            expected_error_contains: Some(expected_msg.to_string()),
        }
    }
}

// ============================================================================
// Test Suite Creation Functions
// ============================================================================

fn create_malformed_expressions_tests() -> TestSuite {
    let mut suite = TestSuite::new("Malformed Expressions");

    suite.add_test(TestCase::should_fail_with_message(
        "unmatched_opening_paren",
        &in_main("display (1 + 2"),
        "Expected ')' after expression",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "unmatched_opening_paren_nested",
        &in_main("set x = ((1 + 2)"),
        "Expected ')' after expression",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "unmatched_closing_paren",
        &in_main("display 1 + 2)"),
        "Expected statement, found ')'",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "empty_parentheses",
        &in_main("display ()"),
        "Empty parentheses are not allowed",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "missing_right_operand",
        &in_main("set x = 1 +"),
        "Expected expression after '+'",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "missing_index_bracket",
        &in_main("set x = a[1"),
        "Expected ']' after index",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "display_without_operands",
        &in_main("display"),
        "Expected expression, found 'endfun'",
    ));

    suite
}

fn create_edge_case_tests() -> TestSuite {
    let mut suite = TestSuite::new("Edge Cases");

    suite.add_test(TestCase::should_fail_with_message(
        "empty_input",
        "",
        "Expected 'implementations' section",
    ));
    suite.add_test(TestCase::should_succeed("only_implementations", "implementations"));
    suite.add_test(TestCase::should_succeed("empty_body", &in_main("")));
    suite.add_test(TestCase::should_succeed(
        "comments_everywhere",
        &in_main("// leading\nset x = 1 /* inline */ + 2"),
    ));

    let deep_parens = "(".repeat(100) + "1" + &")".repeat(100);
    suite.add_test(TestCase::should_succeed(
        "deeply_nested_parens",
        &in_main(&format!("display {}", deep_parens)),
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "unterminated_string",
        &in_main("display \"hello"),
        "unrecognized input",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "malformed_number",
        &in_main("set x = 12ab"),
        "unrecognized input '12ab'",
    ));

    suite
}

fn create_operator_tests() -> TestSuite {
    let mut suite = TestSuite::new("Operator Tests");

    suite.add_test(TestCase::should_fail("double_plus", &in_main("set x = 1 ++ 2")));
    // Parsed as 1 - (-2)
    suite.add_test(TestCase::should_succeed("double_minus", &in_main("set x = 1 -- 2")));

    suite.add_test(TestCase::should_succeed("comparison_equal", &in_main("set x = 1 == 2")));
    suite.add_test(TestCase::should_succeed("comparison_not_equal", &in_main("set x = 1 != 2")));
    suite.add_test(TestCase::should_succeed("comparison_less_equal", &in_main("set x = 1 <= 2")));
    suite.add_test(TestCase::should_succeed(
        "word_and_symbol_logic",
        &in_main("set x = a and not b || c && !d or e"),
    ));
    suite.add_test(TestCase::should_succeed(
        "pointer_operators",
        &in_main("set p->age = q^ + 1\nset r = &x\nset s = &p^"),
    ));

    suite
}

fn create_control_flow_tests() -> TestSuite {
    let mut suite = TestSuite::new("Control Flow Tests");

    suite.add_test(TestCase::should_succeed(
        "valid_if_else",
        &in_main("if x > 1 then\n display x\nelse\n display 0\nendif"),
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "if_missing_then",
        &in_main("if x > 1 display x endif"),
        "Expected 'then' after if condition",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "if_missing_endif",
        &in_main("if x > 1 then display x"),
        "Expected 'endif' to close if statement",
    ));

    suite.add_test(TestCase::should_succeed(
        "valid_while",
        &in_main("while x < 3 do increment x endwhile"),
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "while_missing_do",
        &in_main("while x < 3 increment x endwhile"),
        "Expected 'do' after while condition",
    ));

    suite.add_test(TestCase::should_succeed(
        "valid_for_with_step",
        &in_main("for x = 10 to 1 step -1 do display x endfor"),
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "for_missing_to",
        &in_main("for x = 1 10 do display x endfor"),
        "Expected 'to' in for statement",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "stray_block_closer",
        &in_main("display 1\nendwhile"),
        "Unexpected 'endwhile' in body of function 'main'",
    ));

    suite
}

fn create_statement_tests() -> TestSuite {
    let mut suite = TestSuite::new("Statement Tests");

    suite.add_test(TestCase::should_succeed(
        "simple_set_and_display",
        &in_main("set x = 42\ndisplay \"Value of x:\", x"),
    ));
    suite.add_test(TestCase::should_succeed(
        "optional_semicolons",
        &in_main("set x = 1;\ndisplay x;\nexit"),
    ));
    suite.add_test(TestCase::should_succeed(
        "keywords_ignore_case",
        &in_main("SET x = 1\nDisplay x"),
    ));
    suite.add_test(TestCase::should_succeed(
        "call_forms",
        &in_main("call reset\ncall show using 1, 2\ncall draw(3)"),
    ));
    suite.add_test(TestCase::should_succeed(
        "heap_statements",
        &in_main("create node\nset node->next = null\ndestroy node"),
    ));
    suite.add_test(TestCase::should_succeed(
        "array_elements",
        &in_main("set items[1] = items[0] + 2"),
    ));
    suite.add_test(TestCase::should_succeed(
        "local_definition",
        &in_main("define y of type double\nset y = 1.5"),
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "set_invalid_target",
        &in_main("set 1 = x"),
        "Invalid target for 'set'",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "set_missing_equals",
        &in_main("set x 5"),
        "Expected '=' in set statement",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "call_missing_paren",
        &in_main("call draw(1, 2"),
        "Expected ')' after arguments",
    ));
    suite.add_test(TestCase::should_fail("call_trailing_comma", &in_main("call draw(1, 2,)")));
    suite.add_test(TestCase::should_fail_with_message(
        "definition_missing_type",
        &in_main("define y of integer"),
        "Expected 'type' after 'of'",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "create_needs_place",
        &in_main("create 3"),
        "Invalid target for 'create'",
    ));

    suite
}

fn create_program_structure_tests() -> TestSuite {
    let mut suite = TestSuite::new("Program Structure Tests");

    suite.add_test(TestCase::should_succeed(
        "all_sections",
        r#"import "scl.h"
symbol MAX 10
forward declarations
  function add return type integer parameters a of type integer, b of type integer
specifications
  struct Datablock is
    define stname of type char
    define age of type integer
    define next pointer of type Datablock
  endstruct Datablock
global declarations
  constants
    define LIMIT = 5 of type integer
  variables
    define total of type double
    define table array[4] of type float
implementations
function add return type integer parameters a of type integer, b of type integer is
begin
  return a + b
endfun add
function main is
variables
  define node pointer of type Datablock
begin
  create node
  set node->age = add(1, 2)
  display node->age
  exit 0
endfun main
"#,
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "function_before_implementations",
        "function main is\nbegin\nendfun main",
        "Expected 'implementations' before function definitions",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "statement_at_top_level",
        "display 1\nimplementations",
        "Unexpected 'display' at top level",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "header_missing_is",
        "implementations\nfunction main\nbegin\n  display 1\nendfun main",
        "Expected 'is' after the header of function 'main'",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "endfun_name_mismatch",
        "implementations\nfunction main is\nbegin\nendfun mian",
        "Function name mismatch",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "struct_missing_endstruct",
        "specifications\n  struct Foo is\n    define a of type integer\nimplementations",
        "Expected 'endstruct' to close struct 'Foo'",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "symbol_needs_literal",
        "symbol MAX other\nimplementations",
        "Symbol 'MAX' must be bound to a literal",
    ));
    suite.add_test(TestCase::should_fail_with_message(
        "array_needs_length",
        "global declarations\n  variables\n    define t array[n] of type integer\nimplementations",
        "Expected array length",
    ));

    suite
}

// ============================================================================
// Main Test Function
// ============================================================================

#[test]
fn comprehensive_parser_tests() {
    println!("🧪 SCL Parser Robustness Test Suite");
    println!("====================================\n");

    let suites = vec![
        create_malformed_expressions_tests(),
        create_edge_case_tests(),
        create_operator_tests(),
        create_control_flow_tests(),
        create_statement_tests(),
        create_program_structure_tests(),
    ];

    let mut all_passed = true;
    for suite in suites {
        let results = suite.run();
        if !results.is_all_passed() {
            all_passed = false;
        }
    }

    assert!(all_passed, "Some parser tests failed. See output above for details.");
}

// ============================================================================
// Recovery Tests
// ============================================================================

#[test]
fn missing_endfun_is_reported_and_next_function_still_parses() {
    let source = "implementations
function helper is
begin
  display \"in helper\"
function main is
begin
  display \"in main\"
endfun main
";
    let output = parse_source(source);

    assert_eq!(output.errors.len(), 1);
    assert_eq!(output.errors[0].line, 5);
    assert!(output.errors[0].message.contains("Expected 'endfun helper'"));

    let names: Vec<&str> = output
        .program
        .functions
        .iter()
        .map(|function| function.name.as_str())
        .collect();
    assert_eq!(names, vec!["helper", "main"]);
}

#[test]
fn one_pass_reports_every_broken_statement() {
    let source = "implementations
function main is
begin
  set x 1
  display x
  if x then display 1
  set y = 2
endfun main
";
    let output = parse_source(source);

    let lines: Vec<usize> = output.errors.iter().map(|error| error.line).collect();
    assert_eq!(lines, vec![4, 8]);
    assert!(output.errors[0].message.contains("Expected '=' in set statement"));
    assert!(output.errors[1].message.contains("Expected 'endif'"));

    // The statements around the broken ones survive
    let body = &output.program.functions[0].body;
    assert_eq!(body.len(), 1);
    assert!(matches!(body[0], Stmt::Display { .. }));
}

#[test]
fn broken_block_header_is_reported_once() {
    let output = parse_source(&in_main(
        "while true do\n  if x = 1 then\n    display 1\n  endif\nendwhile\ndisplay 2",
    ));

    assert_eq!(output.errors.len(), 1, "{:?}", output.errors);
    assert!(output.errors[0].message.contains("Expected 'then' after if condition"));
    assert_eq!(output.errors[0].line, 7);

    // The broken if is skipped as a whole; the loop around it closes normally
    let body = &output.program.functions[0].body;
    assert_eq!(body.len(), 2);
    assert!(matches!(&body[0], Stmt::While { body, .. } if body.is_empty()));
    assert!(matches!(body[1], Stmt::Display { .. }));

    // Nested blocks of the same kind inside the skipped one are balanced
    let output = parse_source(&in_main(
        "for x = 1 10 do\n  for x = 1 to 2 do display x endfor\nendfor\ndisplay 3",
    ));
    assert_eq!(output.errors.len(), 1, "{:?}", output.errors);
    assert!(output.errors[0].message.contains("Expected 'to' in for statement"));
    let body = &output.program.functions[0].body;
    assert_eq!(body.len(), 1);
    assert!(matches!(body[0], Stmt::Display { .. }));
}

#[test]
fn error_positions_use_interchange_format() {
    let output = parse_source("implementations\nfunction main is\nbegin\n  set x = \nendfun main");
    assert_eq!(
        output.errors[0].to_string(),
        "Syntax Error at line 5, column 1: Expected expression, found 'endfun'"
    );
}

#[test]
fn for_loops_lower_to_counter_statements() {
    let output = parse_source(&in_main("for x = 5 to 1 step -2 do display x endfor"));
    assert!(output.is_ok());

    let Stmt::For {
        initializer,
        condition,
        step,
        body,
        ..
    } = &output.program.functions[0].body[0]
    else {
        panic!("expected a for statement");
    };

    assert!(matches!(initializer.as_ref(), Stmt::Set { .. }));
    assert!(matches!(
        condition,
        Expr::Binary {
            operator: scl::ast::BinaryOp::GreaterEqual,
            ..
        }
    ));
    assert!(matches!(step.as_ref(), Stmt::Set { .. }));
    assert_eq!(body.len(), 1);
}

#[test]
fn ast_file_tags_every_node() {
    let output = parse_source(&in_main("set x = 1"));
    let json = serde_json::to_value(&output).unwrap();

    let statement = &json["program"]["functions"][0]["body"][0];
    assert_eq!(statement["type"], "Set");
    assert_eq!(statement["target"]["type"], "Identifier");
    assert_eq!(statement["value"]["type"], "Literal");
    assert_eq!(json["errors"], serde_json::json!([]));

    let restored: ParseOutput = serde_json::from_value(json).unwrap();
    assert_eq!(restored, output);
}
