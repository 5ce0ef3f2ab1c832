//! End-to-end language scenarios: source in, final variables out.

use botscript::compiler::compile;
use botscript::diag::DiagnosticKind;
use botscript::env::{EnvSchema, TypeTag};
use botscript::value::Value;
use botscript::vm::{DEFAULT_BUDGET, Vm};
use indoc::indoc;

fn run_script(source: &str) -> Vm {
    let program = compile(source, &EnvSchema::default_game());
    assert!(
        program.is_ok(),
        "unexpected diagnostics: {:?}",
        program.diagnostics
    );
    let mut vm = Vm::new();
    vm.load(program);
    while vm.run(DEFAULT_BUDGET) {}
    let state = vm.state();
    assert!(state.halted, "script should halt");
    assert!(state.error.is_none(), "unexpected error: {:?}", state.error);
    vm
}

fn number_var(vm: &Vm, name: &str) -> f64 {
    match vm.var(name) {
        Some(Value::Number(value)) => *value,
        other => panic!("expected number for '{name}', got {other:?}"),
    }
}

#[test]
fn evaluates_grouped_arithmetic() {
    let vm = run_script("x = (2 + 3) * 4 - 6 / 2\n");
    assert_eq!(number_var(&vm, "x"), 17.0);
}

#[test]
fn computes_fibonacci_with_a_while_loop() {
    let vm = run_script(indoc! {"
        a = 0
        b = 1
        count = 0
        while count < 10:
            temp = a
            a = b
            b = temp + b
            count = count + 1
    "});
    assert_eq!(number_var(&vm, "a"), 55.0);
}

#[test]
fn sums_squares_with_a_for_loop() {
    let vm = run_script(indoc! {"
        total = 0
        for i in [1, 2, 3, 4, 5]:
            total = total + i * i
    "});
    assert_eq!(number_var(&vm, "total"), 55.0);
}

#[test]
fn computes_factorial_recursively() {
    let vm = run_script(indoc! {"
        def factorial(n):
            if n <= 1:
                return 1
            return n * factorial(n - 1)
        x = factorial(5)
    "});
    assert_eq!(number_var(&vm, "x"), 120.0);
}

#[test]
fn continue_skips_exactly_the_matching_iteration() {
    let vm = run_script(indoc! {"
        x = 0
        total = 0
        visited = 0
        while x < 5:
            x = x + 1
            if x == 3:
                continue
            visited = visited + 1
            total = total + x
    "});
    // 1 + 2 + 4 + 5; the x == 3 pass is skipped, the others are not
    assert_eq!(number_var(&vm, "total"), 12.0);
    assert_eq!(number_var(&vm, "visited"), 4.0);
    assert_eq!(number_var(&vm, "x"), 5.0);
}

#[test]
fn misspelled_unit_attribute_gets_a_suggestion() {
    let schema = EnvSchema::default_game().with_self_type(TypeTag::object("Bot"));
    let program = compile("self.forw()\n", &schema);
    assert!(!program.is_ok());
    assert!(program.code.is_empty());

    let diagnostic = &program.diagnostics[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::AttributeError);
    assert!(
        diagnostic.message.contains("did you mean 'forward'"),
        "message: {}",
        diagnostic.message
    );
}

#[test]
fn function_writes_mutate_the_single_global_scope() {
    // Parameters shadow and restore; every other assignment writes through.
    let vm = run_script(indoc! {"
        count = 10
        n = 7
        def poke(n):
            count = count + n
            return count
        r = poke(5)
    "});
    assert_eq!(number_var(&vm, "count"), 15.0);
    assert_eq!(number_var(&vm, "n"), 7.0, "parameter binding must be restored");
    assert_eq!(number_var(&vm, "r"), 15.0);
}

#[test]
fn locals_without_parameter_shadowing_persist_after_return() {
    let vm = run_script(indoc! {"
        def mark():
            created = 42
            return 1
        mark()
    "});
    assert_eq!(number_var(&vm, "created"), 42.0);
}

#[test]
fn nested_function_definitions_hoist_and_call() {
    let vm = run_script(indoc! {"
        def outer():
            def inner():
                return 2
            return inner() + 1
        x = outer()
    "});
    assert_eq!(number_var(&vm, "x"), 3.0);
}

#[test]
fn tuple_position_literals_index_like_lists() {
    let vm = run_script(indoc! {"
        p = (3, 4)
        x = p[0]
        z = p[1]
    "});
    assert_eq!(number_var(&vm, "x"), 3.0);
    assert_eq!(number_var(&vm, "z"), 4.0);
}

#[test]
fn string_escapes_survive_to_runtime() {
    let vm = run_script("s = \"a\\tb\"\nn = len(s)\n");
    assert_eq!(vm.var("s"), Some(&Value::Str("a\tb".to_string())));
    assert_eq!(number_var(&vm, "n"), 3.0);
}

#[test]
fn elif_chains_pick_the_matching_arm() {
    let vm = run_script(indoc! {"
        grade = 0
        score = 77
        if score >= 90:
            grade = 4
        elif score >= 75:
            grade = 3
        elif score >= 60:
            grade = 2
        else:
            grade = 1
    "});
    assert_eq!(number_var(&vm, "grade"), 3.0);
}

#[test]
fn augmented_assignment_operators_apply() {
    let vm = run_script(indoc! {"
        x = 8
        x += 2
        x -= 1
        x *= 3
        x /= 9
    "});
    assert_eq!(number_var(&vm, "x"), 3.0);
}

#[test]
fn power_and_floordiv_and_mod_evaluate() {
    let vm = run_script(indoc! {"
        p = 2 ** 10
        f = 17 // 5
        m = 17 % 5
    "});
    assert_eq!(number_var(&vm, "p"), 1024.0);
    assert_eq!(number_var(&vm, "f"), 3.0);
    assert_eq!(number_var(&vm, "m"), 2.0);
}

#[test]
fn not_and_logical_values_flow_through_conditions() {
    let vm = run_script(indoc! {"
        x = 0
        if not []:
            x = x + 1
        if 0 or 'fallback':
            x = x + 1
        if 1 and [2]:
            x = x + 1
    "});
    assert_eq!(number_var(&vm, "x"), 3.0);
}

#[test]
fn iteration_over_range_matches_list_iteration() {
    let vm = run_script(indoc! {"
        total = 0
        for i in range(1, 6):
            total += i
    "});
    assert_eq!(number_var(&vm, "total"), 15.0);
}
