//! Stack-based virtual machine with deterministic stepwise execution.
//!
//! A host drives the VM in budgeted slices: `run(budget)` executes at most
//! `budget` instructions, suspending only between instructions. Host calls
//! that are not ready yet yield without advancing the instruction pointer,
//! so the same CALL is re-attempted on the next slice.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::builtins::BuiltinFunction;
use crate::bytecode::{CompiledProgram, Constant, Instruction, Op};
use crate::diag::{RuntimeError, RuntimeErrorKind};
use crate::host::HostReturn;
use crate::value::{ListIter, Value};

/// Instructions per tick in the production host.
pub const DEFAULT_BUDGET: usize = 50;

/// Activation record for a user-function call.
///
/// Variables live in one global scope; a frame only remembers the bindings
/// its parameters shadowed so they can be restored on return. Assignments
/// to any other name inside a function write straight through to globals.
struct Frame {
    return_ip: usize,
    caller_function: Option<usize>,
    saved: Vec<(String, Option<Value>)>,
}

enum Flow {
    Next,
    Jump(usize),
    Yield,
    Halt,
}

/// Read-only snapshot for debuggers and telemetry.
#[derive(Debug, Clone)]
pub struct VmState {
    pub ip: usize,
    pub stack_depth: usize,
    pub vars: HashMap<String, Value>,
    pub running: bool,
    pub paused: bool,
    pub halted: bool,
    pub error: Option<RuntimeError>,
}

pub struct Vm {
    program: CompiledProgram,
    /// Code currently executing: `None` is top-level, otherwise an index
    /// into the function pool.
    current: Option<usize>,
    ip: usize,
    stack: Vec<Value>,
    vars: HashMap<String, Value>,
    frames: Vec<Frame>,
    running: bool,
    paused: bool,
    halted: bool,
    error: Option<RuntimeError>,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            program: CompiledProgram::default(),
            current: None,
            ip: 0,
            stack: Vec::new(),
            vars: HashMap::new(),
            frames: Vec::new(),
            running: false,
            paused: false,
            halted: true,
            error: None,
        }
    }

    /// Installs a program, resets execution state, and seeds the builtins.
    pub fn load(&mut self, program: CompiledProgram) {
        self.program = program;
        self.vars.clear();
        for builtin in BuiltinFunction::all() {
            self.vars
                .insert(builtin.name().to_string(), Value::Builtin(builtin));
        }
        self.start();
    }

    /// Installs host bindings into the global scope. Must happen before
    /// execution; names the compiler resolved against the schema are
    /// expected to be present here.
    pub fn set_environment(&mut self, env: impl IntoIterator<Item = (String, Value)>) {
        for (name, value) in env {
            self.vars.insert(name, value);
        }
    }

    /// Rewinds to the first instruction and clears the stack, frames, and
    /// any error. Variables survive so the snapshot stays inspectable.
    pub fn start(&mut self) {
        self.current = None;
        self.ip = 0;
        self.stack.clear();
        self.frames.clear();
        self.error = None;
        self.paused = false;
        self.running = !self.program.code.is_empty();
        self.halted = !self.running;
    }

    /// Executes exactly one instruction unless halted or paused. Returns
    /// whether the VM is still running afterwards.
    pub fn step(&mut self) -> bool {
        if !self.running || self.paused {
            return self.running;
        }
        self.step_internal();
        self.running
    }

    /// Executes up to `budget` instructions, short-circuiting on halt,
    /// error, or a host yield. Returns whether the VM is still running.
    pub fn run(&mut self, budget: usize) -> bool {
        for _ in 0..budget {
            if !self.running || self.paused {
                break;
            }
            if self.step_internal() {
                break;
            }
        }
        self.running
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Retires the program without clearing state.
    pub fn stop(&mut self) {
        self.running = false;
        self.halted = true;
    }

    pub fn state(&self) -> VmState {
        VmState {
            ip: self.ip,
            stack_depth: self.stack.len(),
            vars: self.vars.clone(),
            running: self.running,
            paused: self.paused,
            halted: self.halted,
            error: self.error.clone(),
        }
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn error(&self) -> Option<&RuntimeError> {
        self.error.as_ref()
    }

    /// Runs one instruction; returns true if a host call yielded.
    fn step_internal(&mut self) -> bool {
        let Some(instruction) = self.current_code().get(self.ip).cloned() else {
            self.running = false;
            self.halted = true;
            return false;
        };

        match self.execute(&instruction) {
            Ok(Flow::Next) => {
                self.ip += 1;
                false
            }
            Ok(Flow::Jump(target)) => {
                self.ip = target;
                false
            }
            Ok(Flow::Yield) => {
                trace!(ip = self.ip, "host call yielded");
                true
            }
            Ok(Flow::Halt) => {
                self.running = false;
                self.halted = true;
                false
            }
            Err(error) => {
                self.fail(error);
                false
            }
        }
    }

    fn current_code(&self) -> &[Instruction] {
        match self.current {
            None => &self.program.code,
            Some(index) => self
                .program
                .functions
                .get(index)
                .map(|f| f.code.as_slice())
                .unwrap_or(&[]),
        }
    }

    fn fail(&mut self, error: RuntimeError) {
        debug!(%error, "vm fault");
        self.error = Some(error);
        self.running = false;
        self.halted = true;
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<Flow, RuntimeError> {
        let line = instruction.line;
        match &instruction.op {
            Op::LoadConst(index) => {
                let value = match self.program.constants.get(*index) {
                    Some(Constant::Number(n)) => Value::Number(*n),
                    Some(Constant::Str(s)) => Value::Str(s.clone()),
                    Some(Constant::Bool(b)) => Value::Bool(*b),
                    Some(Constant::None) => Value::None,
                    None => {
                        return Err(RuntimeError::new(
                            RuntimeErrorKind::TypeError,
                            "internal: constant index out of range",
                            line,
                        ));
                    }
                };
                self.stack.push(value);
                Ok(Flow::Next)
            }
            Op::LoadVar(name) => {
                let value = self.vars.get(name).cloned().ok_or_else(|| {
                    RuntimeError::new(
                        RuntimeErrorKind::NameError,
                        format!("'{name}' is not defined"),
                        line,
                    )
                })?;
                self.stack.push(value);
                Ok(Flow::Next)
            }
            Op::StoreVar(name) => {
                let value = self.pop(line)?;
                self.vars.insert(name.clone(), value);
                Ok(Flow::Next)
            }
            Op::LoadAttr(name) => {
                let object = self.pop(line)?;
                match object {
                    Value::Host(host) => {
                        let value = host.getattr(name).map_err(|e| {
                            RuntimeError::new(RuntimeErrorKind::AttributeError, e.message, line)
                        })?;
                        self.stack.push(value);
                        Ok(Flow::Next)
                    }
                    other => Err(RuntimeError::new(
                        RuntimeErrorKind::AttributeError,
                        format!("{} has no attribute '{name}'", other.type_name()),
                        line,
                    )),
                }
            }
            Op::BuildList(count) => {
                if self.stack.len() < *count {
                    return Err(self.underflow(line));
                }
                let values = self.stack.split_off(self.stack.len() - count);
                self.stack.push(Value::List(values));
                Ok(Flow::Next)
            }
            Op::GetIndex => {
                let index = self.pop(line)?;
                let object = self.pop(line)?;
                let value = index_value(&object, &index, line)?;
                self.stack.push(value);
                Ok(Flow::Next)
            }
            Op::BinaryAdd
            | Op::BinarySub
            | Op::BinaryMul
            | Op::BinaryDiv
            | Op::BinaryFloorDiv
            | Op::BinaryMod
            | Op::BinaryPow => {
                self.binary_arithmetic(&instruction.op, line)?;
                Ok(Flow::Next)
            }
            Op::CompareEq
            | Op::CompareNe
            | Op::CompareLt
            | Op::CompareGt
            | Op::CompareLe
            | Op::CompareGe => {
                self.compare(&instruction.op, line)?;
                Ok(Flow::Next)
            }
            Op::UnaryNeg => {
                let value = self.pop(line)?;
                let number = value.as_number().ok_or_else(|| {
                    RuntimeError::new(
                        RuntimeErrorKind::TypeError,
                        format!("bad operand type for unary -: {}", value.type_name()),
                        line,
                    )
                })?;
                self.stack.push(Value::Number(-number));
                Ok(Flow::Next)
            }
            Op::UnaryNot => {
                let value = self.pop(line)?;
                self.stack.push(Value::Bool(!value.is_truthy()));
                Ok(Flow::Next)
            }
            Op::Jump(target) => Ok(Flow::Jump(*target)),
            Op::PopJumpIfFalse(target) => {
                let value = self.pop(line)?;
                if value.is_truthy() {
                    Ok(Flow::Next)
                } else {
                    Ok(Flow::Jump(*target))
                }
            }
            Op::JumpIfFalse(target) => {
                let value = self.stack.last().ok_or_else(|| self.underflow(line))?;
                if value.is_truthy() {
                    Ok(Flow::Next)
                } else {
                    Ok(Flow::Jump(*target))
                }
            }
            Op::JumpIfTrue(target) => {
                let value = self.stack.last().ok_or_else(|| self.underflow(line))?;
                if value.is_truthy() {
                    Ok(Flow::Jump(*target))
                } else {
                    Ok(Flow::Next)
                }
            }
            Op::GetIter => {
                let value = self.pop(line)?;
                match value {
                    Value::List(items) => {
                        self.stack.push(Value::Iter(ListIter { items, index: 0 }));
                        Ok(Flow::Next)
                    }
                    other => Err(RuntimeError::new(
                        RuntimeErrorKind::TypeError,
                        format!("{} object is not iterable", other.type_name()),
                        line,
                    )),
                }
            }
            Op::ForIter(target) => {
                let next = match self.stack.last_mut() {
                    Some(Value::Iter(iter)) => {
                        if iter.index < iter.items.len() {
                            let value = iter.items[iter.index].clone();
                            iter.index += 1;
                            Some(value)
                        } else {
                            None
                        }
                    }
                    _ => {
                        return Err(RuntimeError::new(
                            RuntimeErrorKind::TypeError,
                            "internal: FOR_ITER without iterator",
                            line,
                        ));
                    }
                };
                match next {
                    Some(value) => {
                        self.stack.push(value);
                        Ok(Flow::Next)
                    }
                    None => {
                        self.stack.pop();
                        Ok(Flow::Jump(*target))
                    }
                }
            }
            Op::Call(arity) => self.call(*arity, line),
            Op::MakeFunction(index) => {
                self.stack.push(Value::Function(*index));
                Ok(Flow::Next)
            }
            Op::ReturnValue => {
                let result = self.pop(line)?;
                let Some(frame) = self.frames.pop() else {
                    // Unreachable for compiler output; hand-built programs
                    // just end here.
                    return Ok(Flow::Halt);
                };
                for (name, old) in frame.saved {
                    match old {
                        Some(value) => {
                            self.vars.insert(name, value);
                        }
                        None => {
                            self.vars.remove(&name);
                        }
                    }
                }
                self.current = frame.caller_function;
                self.stack.push(result);
                Ok(Flow::Jump(frame.return_ip))
            }
            Op::Pop => {
                self.pop(line)?;
                Ok(Flow::Next)
            }
            Op::Nop => Ok(Flow::Next),
            Op::Halt => Ok(Flow::Halt),
        }
    }

    fn call(&mut self, arity: usize, line: u32) -> Result<Flow, RuntimeError> {
        if self.stack.len() < arity + 1 {
            return Err(self.underflow(line));
        }
        let callee_index = self.stack.len() - arity - 1;
        let callee = self.stack[callee_index].clone();

        match callee {
            Value::Function(function) => {
                let Some(proto) = self.program.functions.get(function) else {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::TypeError,
                        "internal: function index out of range",
                        line,
                    ));
                };
                let name = proto.name.clone();
                let params = proto.params.clone();
                if params.len() != arity {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::TypeError,
                        format!("{name}() takes {} arguments, got {arity}", params.len()),
                        line,
                    ));
                }

                let args = self.stack.split_off(callee_index + 1);
                self.stack.pop();
                let mut saved = Vec::with_capacity(params.len());
                for (param, value) in params.iter().zip(args) {
                    saved.push((param.clone(), self.vars.insert(param.clone(), value)));
                }
                self.frames.push(Frame {
                    return_ip: self.ip + 1,
                    caller_function: self.current,
                    saved,
                });
                self.current = Some(function);
                Ok(Flow::Jump(0))
            }
            Value::Builtin(builtin) => {
                let args = self.stack.split_off(callee_index + 1);
                self.stack.pop();
                let result = builtin
                    .call(&args)
                    .map_err(|message| {
                        RuntimeError::new(RuntimeErrorKind::TypeError, message, line)
                    })?;
                self.stack.push(result);
                Ok(Flow::Next)
            }
            Value::Host(host) => {
                // Arguments stay on the stack until the host produces a
                // value, so a yielding call can be re-attempted verbatim.
                let args = &self.stack[callee_index + 1..];
                match host.call(args) {
                    Ok(HostReturn::Value(value)) => {
                        self.stack.truncate(callee_index);
                        self.stack.push(value);
                        Ok(Flow::Next)
                    }
                    Ok(HostReturn::Yield) => Ok(Flow::Yield),
                    Err(e) => Err(RuntimeError::new(
                        RuntimeErrorKind::TypeError,
                        e.message,
                        line,
                    )),
                }
            }
            other => Err(RuntimeError::new(
                RuntimeErrorKind::TypeError,
                format!("{} object is not callable", other.type_name()),
                line,
            )),
        }
    }

    fn binary_arithmetic(&mut self, op: &Op, line: u32) -> Result<(), RuntimeError> {
        let right = self.pop(line)?;
        let left = self.pop(line)?;

        if let (Op::BinaryAdd, Value::Str(a), Value::Str(b)) = (op, &left, &right) {
            self.stack.push(Value::Str(format!("{a}{b}")));
            return Ok(());
        }

        let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
            return Err(RuntimeError::new(
                RuntimeErrorKind::TypeError,
                format!(
                    "unsupported operand types: {} and {}",
                    left.type_name(),
                    right.type_name()
                ),
                line,
            ));
        };

        // Division by zero follows IEEE: inf/NaN, never a fault.
        let result = match op {
            Op::BinaryAdd => a + b,
            Op::BinarySub => a - b,
            Op::BinaryMul => a * b,
            Op::BinaryDiv => a / b,
            Op::BinaryFloorDiv => (a / b).floor(),
            Op::BinaryMod => a % b,
            Op::BinaryPow => a.powf(b),
            _ => unreachable!("non-arithmetic opcode"),
        };
        self.stack.push(Value::Number(result));
        Ok(())
    }

    fn compare(&mut self, op: &Op, line: u32) -> Result<(), RuntimeError> {
        let right = self.pop(line)?;
        let left = self.pop(line)?;

        let result = match op {
            Op::CompareEq => values_equal(&left, &right),
            Op::CompareNe => !values_equal(&left, &right),
            _ => {
                if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
                    match op {
                        Op::CompareLt => a < b,
                        Op::CompareGt => a > b,
                        Op::CompareLe => a <= b,
                        Op::CompareGe => a >= b,
                        _ => unreachable!("non-comparison opcode"),
                    }
                } else if let (Value::Str(a), Value::Str(b)) = (&left, &right) {
                    match op {
                        Op::CompareLt => a < b,
                        Op::CompareGt => a > b,
                        Op::CompareLe => a <= b,
                        Op::CompareGe => a >= b,
                        _ => unreachable!("non-comparison opcode"),
                    }
                } else {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::TypeError,
                        format!(
                            "cannot order {} and {}",
                            left.type_name(),
                            right.type_name()
                        ),
                        line,
                    ));
                }
            }
        };
        self.stack.push(Value::Bool(result));
        Ok(())
    }

    fn pop(&mut self, line: u32) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| self.underflow(line))
    }

    fn underflow(&self, line: u32) -> RuntimeError {
        RuntimeError::new(
            RuntimeErrorKind::TypeError,
            "internal: operand stack underflow",
            line,
        )
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Equality coerces Bool to Number so `1 == True`; everything else is
/// structural, with host objects comparing by identity.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn index_value(object: &Value, index: &Value, line: u32) -> Result<Value, RuntimeError> {
    let Some(raw) = index.as_number() else {
        return Err(RuntimeError::new(
            RuntimeErrorKind::TypeError,
            format!("indices must be numbers, got {}", index.type_name()),
            line,
        ));
    };
    if raw.fract() != 0.0 {
        return Err(RuntimeError::new(
            RuntimeErrorKind::TypeError,
            format!("indices must be whole numbers, got {raw}"),
            line,
        ));
    }

    match object {
        Value::List(values) => {
            if raw < 0.0 || raw >= values.len() as f64 {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::IndexError,
                    "list index out of range",
                    line,
                ));
            }
            Ok(values[raw as usize].clone())
        }
        Value::Str(text) => {
            if raw < 0.0 {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::IndexError,
                    "string index out of range",
                    line,
                ));
            }
            text.chars()
                .nth(raw as usize)
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| {
                    RuntimeError::new(
                        RuntimeErrorKind::IndexError,
                        "string index out of range",
                        line,
                    )
                })
        }
        other => Err(RuntimeError::new(
            RuntimeErrorKind::TypeError,
            format!("{} object is not subscriptable", other.type_name()),
            line,
        )),
    }
}
