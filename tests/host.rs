//! Host-integration scenarios: environment injection, budgeted slicing,
//! blocking host calls, and lifecycle control.

use std::cell::Cell;
use std::rc::Rc;

use botscript::compiler::compile;
use botscript::env::{EnvSchema, TypeTag};
use botscript::host::{HostError, HostFn, HostObject, HostReturn};
use botscript::value::Value;
use botscript::vm::{DEFAULT_BUDGET, Vm};
use indoc::indoc;

struct Enemy {
    health: f64,
}

impl HostObject for Enemy {
    fn type_name(&self) -> &str {
        "Enemy"
    }

    fn getattr(&self, name: &str) -> Result<Value, HostError> {
        match name {
            "health" => Ok(Value::Number(self.health)),
            _ => Err(HostError::new(format!("Enemy has no attribute '{name}'"))),
        }
    }
}

struct Unit {
    health: f64,
    fire: Value,
}

impl Unit {
    fn value(health: f64) -> Value {
        Value::host(Self {
            health,
            fire: HostFn::value("fire", |_args: &[Value]| {
                Ok(HostReturn::Value(Value::Bool(true)))
            }),
        })
    }
}

impl HostObject for Unit {
    fn type_name(&self) -> &str {
        "Bot"
    }

    fn getattr(&self, name: &str) -> Result<Value, HostError> {
        match name {
            "health" => Ok(Value::Number(self.health)),
            "scan" => Ok(HostFn::value("scan", |_args: &[Value]| {
                Ok(HostReturn::Value(Value::List(vec![
                    Value::host(Enemy { health: 40.0 }),
                    Value::host(Enemy { health: 65.0 }),
                ])))
            })),
            "fire" => Ok(self.fire.clone()),
            _ => Err(HostError::new(format!("Bot has no attribute '{name}'"))),
        }
    }
}

fn compile_with(source: &str, names: &[&str], self_type: Option<&str>) -> botscript::bytecode::CompiledProgram {
    let mut schema = EnvSchema::default_game();
    for name in names {
        schema.bindings.insert(name.to_string(), TypeTag::Any);
    }
    if let Some(tag) = self_type {
        schema = schema.with_self_type(TypeTag::object(tag));
    }
    let program = compile(source, &schema);
    assert!(
        program.is_ok(),
        "unexpected diagnostics: {:?}",
        program.diagnostics
    );
    program
}

fn run_to_halt(vm: &mut Vm) {
    while vm.run(DEFAULT_BUDGET) {}
    let state = vm.state();
    assert!(state.error.is_none(), "unexpected error: {:?}", state.error);
}

fn number_var(vm: &Vm, name: &str) -> f64 {
    match vm.var(name) {
        Some(Value::Number(value)) => *value,
        other => panic!("expected number for '{name}', got {other:?}"),
    }
}

#[test]
fn host_function_is_called_exactly_once() {
    let calls = Rc::new(Cell::new(0u32));
    let seen = calls.clone();
    let my_func = HostFn::value("myFunc", move |args: &[Value]| {
        seen.set(seen.get() + 1);
        let n = args[0].as_number().expect("numeric argument");
        Ok(HostReturn::Value(Value::Number(n * 2.0)))
    });

    let program = compile_with("x = myFunc(21)\n", &["myFunc"], None);
    let mut vm = Vm::new();
    vm.load(program);
    vm.set_environment([("myFunc".to_string(), my_func)]);
    run_to_halt(&mut vm);

    assert_eq!(number_var(&vm, "x"), 42.0);
    assert_eq!(calls.get(), 1);
}

#[test]
fn short_circuit_suppresses_host_side_effects() {
    let calls = Rc::new(Cell::new(0u32));
    let seen = calls.clone();
    let probe = HostFn::value("probe", move |_args: &[Value]| {
        seen.set(seen.get() + 1);
        Ok(HostReturn::Value(Value::Bool(true)))
    });

    let program = compile_with(
        indoc! {"
            a = False and probe()
            b = True or probe()
            c = probe()
        "},
        &["probe"],
        None,
    );
    let mut vm = Vm::new();
    vm.load(program);
    vm.set_environment([("probe".to_string(), probe)]);
    run_to_halt(&mut vm);

    assert_eq!(calls.get(), 1, "only the unconditional call may fire");
    assert_eq!(vm.var("a"), Some(&Value::Bool(false)));
    assert_eq!(vm.var("b"), Some(&Value::Bool(true)));
    assert_eq!(vm.var("c"), Some(&Value::Bool(true)));
}

#[test]
fn budgeted_slices_complete_long_loops_within_the_bound() {
    let source = indoc! {"
        i = 0
        while i < 100:
            i += 1
    "};

    // Count the exact instruction steps with a reference VM.
    let mut reference = Vm::new();
    reference.load(compile_with(source, &[], None));
    let mut steps = 1usize; // the halting step is not reported as running
    while reference.step() {
        steps += 1;
    }

    let mut vm = Vm::new();
    vm.load(compile_with(source, &[], None));
    let mut slices = 0usize;
    loop {
        slices += 1;
        if !vm.run(50) {
            break;
        }
    }

    assert!(vm.state().halted);
    assert_eq!(number_var(&vm, "i"), 100.0);
    assert!(
        slices <= steps.div_ceil(50),
        "{slices} slices for {steps} steps"
    );
}

#[test]
fn start_rewinds_a_loaded_program_for_reuse() {
    let source = "x = 1\ny = x + 1\n";
    let mut vm = Vm::new();
    vm.load(compile_with(source, &[], None));
    run_to_halt(&mut vm);
    assert_eq!(number_var(&vm, "y"), 2.0);
    assert!(vm.state().halted);

    vm.start();
    let state = vm.state();
    assert_eq!(state.ip, 0);
    assert_eq!(state.stack_depth, 0);
    assert!(state.running);
    assert!(!state.halted);

    run_to_halt(&mut vm);
    assert_eq!(number_var(&vm, "y"), 2.0);
}

#[test]
fn reserved_environment_names_resolve_end_to_end() {
    struct Core;
    impl HostObject for Core {
        fn type_name(&self) -> &str {
            "Core"
        }
        fn getattr(&self, name: &str) -> Result<Value, HostError> {
            match name {
                "health" => Ok(Value::Number(1000.0)),
                _ => Err(HostError::new(format!("Core has no attribute '{name}'"))),
            }
        }
    }

    let nearest = HostFn::value("nearest", |args: &[Value]| {
        let Some(Value::List(candidates)) = args.first() else {
            return Err(HostError::new("nearest() expects a list"));
        };
        Ok(HostReturn::Value(
            candidates.first().cloned().unwrap_or(Value::None),
        ))
    });

    let program = compile_with(
        indoc! {"
            ammo = BULLET
            squad_hp = B2.health
            core_hp = CORE.health
            target = nearest(self.scan())
            target_hp = target.health
        "},
        &[],
        Some("Bot"),
    );
    let mut vm = Vm::new();
    vm.load(program);
    vm.set_environment([
        ("BULLET".to_string(), Value::Number(0.0)),
        ("B2".to_string(), Unit::value(80.0)),
        ("CORE".to_string(), Value::host(Core)),
        ("nearest".to_string(), nearest),
        ("self".to_string(), Unit::value(100.0)),
    ]);
    run_to_halt(&mut vm);

    assert_eq!(number_var(&vm, "ammo"), 0.0);
    assert_eq!(number_var(&vm, "squad_hp"), 80.0);
    assert_eq!(number_var(&vm, "core_hp"), 1000.0);
    assert_eq!(number_var(&vm, "target_hp"), 40.0);
}

#[test]
fn blocking_fire_call_spans_multiple_ticks() {
    let cooldown = Rc::new(Cell::new(3u32));
    let remaining = cooldown.clone();
    let fire = HostFn::value("fire", move |_args: &[Value]| {
        if remaining.get() > 0 {
            remaining.set(remaining.get() - 1);
            Ok(HostReturn::Yield)
        } else {
            Ok(HostReturn::Value(Value::Bool(true)))
        }
    });

    let unit = Value::host(Unit {
        health: 100.0,
        fire,
    });

    let program = compile_with("hit = self.fire()\n", &[], Some("Bot"));
    let mut vm = Vm::new();
    vm.load(program);
    vm.set_environment([("self".to_string(), unit)]);

    let mut ticks = 0usize;
    while vm.run(DEFAULT_BUDGET) {
        ticks += 1;
        assert!(ticks < 20, "fire never completed");
    }

    assert_eq!(cooldown.get(), 0);
    assert_eq!(ticks, 3, "one tick per cooldown yield");
    assert_eq!(vm.var("hit"), Some(&Value::Bool(true)));
}
