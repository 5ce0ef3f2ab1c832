use std::fs;
use std::io::{self, Read};

use anyhow::{Context, Result, bail};
use botscript::env::TypeTag;
use botscript::{DEFAULT_BUDGET, EnvSchema, Vm, compile};

/// Safety valve for scripts that never halt when run outside a game host.
const MAX_SLICES: usize = 100_000;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let mut budget = DEFAULT_BUDGET;
    let mut dump_bytecode = false;
    let mut self_type: Option<String> = None;
    let mut input_path: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--budget" | "-b" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing value after {arg}"))?;
                budget = value
                    .parse()
                    .with_context(|| format!("Parsing budget '{value}'"))?;
            }
            "--self-type" => {
                self_type = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("Missing type name after {arg}"))?,
                );
            }
            "--dump-bytecode" => {
                dump_bytecode = true;
            }
            _ => {
                input_path = Some(arg);
                if args.next().is_some() {
                    bail!("Only one input file is supported");
                }
                break;
            }
        }
    }

    let source = if let Some(path) = input_path {
        fs::read_to_string(&path).with_context(|| format!("Reading {path}"))?
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Reading stdin")?;
        buffer
    };

    let mut schema = EnvSchema::default_game();
    if let Some(name) = self_type {
        let tag = TypeTag::parse(&name).map_err(|e| anyhow::anyhow!(e))?;
        schema = schema.with_self_type(tag);
    }

    let program = compile(&source, &schema);
    if !program.is_ok() {
        for diagnostic in &program.diagnostics {
            eprintln!("{diagnostic}");
        }
        std::process::exit(1);
    }

    if dump_bytecode {
        print!("{}", program.disassemble());
        return Ok(());
    }

    let mut vm = Vm::new();
    vm.load(program);

    let mut slices = 0usize;
    while vm.run(budget) {
        slices += 1;
        if slices > MAX_SLICES {
            bail!("Script did not halt within {MAX_SLICES} slices of {budget} instructions");
        }
    }

    let state = vm.state();
    if let Some(error) = &state.error {
        eprintln!("{error}");
        std::process::exit(1);
    }

    let mut names: Vec<&String> = state.vars.keys().collect();
    names.sort();
    for name in names {
        let value = &state.vars[name];
        if matches!(value, botscript::Value::Builtin(_)) {
            continue;
        }
        println!("{name} = {}", value.to_output());
    }
    Ok(())
}
