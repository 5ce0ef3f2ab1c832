//! Stack-machine instruction set consumed by the VM.
//!
//! Instructions follow a Python-like operand-stack model where expression
//! evaluation pushes values and operators/calls consume them. Jump targets
//! are absolute instruction indices within their owning code sequence;
//! `code.len()` is a legal target meaning fall-through past the last
//! instruction.

use std::fmt;

use crate::diag::Diagnostic;

/// Compile-time literal stored in the program's constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Number(f64),
    Str(String),
    Bool(bool),
    None,
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Number(value) => write!(f, "{value}"),
            Constant::Str(value) => write!(f, "{value:?}"),
            Constant::Bool(true) => write!(f, "True"),
            Constant::Bool(false) => write!(f, "False"),
            Constant::None => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    LoadConst(usize),
    LoadVar(String),
    StoreVar(String),
    LoadAttr(String),
    BuildList(usize),
    GetIndex,
    BinaryAdd,
    BinarySub,
    BinaryMul,
    BinaryDiv,
    BinaryFloorDiv,
    BinaryMod,
    BinaryPow,
    CompareEq,
    CompareNe,
    CompareLt,
    CompareGt,
    CompareLe,
    CompareGe,
    UnaryNeg,
    UnaryNot,
    Jump(usize),
    PopJumpIfFalse(usize),
    /// Non-popping, for short-circuit `and`.
    JumpIfFalse(usize),
    /// Non-popping, for short-circuit `or`.
    JumpIfTrue(usize),
    GetIter,
    ForIter(usize),
    Call(usize),
    MakeFunction(usize),
    ReturnValue,
    Pop,
    Nop,
    Halt,
}

/// One bytecode instruction plus the 1-based source line that best explains
/// it, used for diagnostics and debuggers.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub line: u32,
}

impl Instruction {
    pub fn new(op: Op, line: u32) -> Self {
        Self { op, line }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.line)?;
        match &self.op {
            Op::LoadConst(index) => write!(f, "LOAD_CONST {index}"),
            Op::LoadVar(name) => write!(f, "LOAD_VAR {name}"),
            Op::StoreVar(name) => write!(f, "STORE_VAR {name}"),
            Op::LoadAttr(name) => write!(f, "LOAD_ATTR {name}"),
            Op::BuildList(count) => write!(f, "BUILD_LIST {count}"),
            Op::GetIndex => write!(f, "GET_INDEX"),
            Op::BinaryAdd => write!(f, "BINARY_ADD"),
            Op::BinarySub => write!(f, "BINARY_SUB"),
            Op::BinaryMul => write!(f, "BINARY_MUL"),
            Op::BinaryDiv => write!(f, "BINARY_DIV"),
            Op::BinaryFloorDiv => write!(f, "BINARY_FLOORDIV"),
            Op::BinaryMod => write!(f, "BINARY_MOD"),
            Op::BinaryPow => write!(f, "BINARY_POW"),
            Op::CompareEq => write!(f, "COMPARE_EQ"),
            Op::CompareNe => write!(f, "COMPARE_NE"),
            Op::CompareLt => write!(f, "COMPARE_LT"),
            Op::CompareGt => write!(f, "COMPARE_GT"),
            Op::CompareLe => write!(f, "COMPARE_LE"),
            Op::CompareGe => write!(f, "COMPARE_GE"),
            Op::UnaryNeg => write!(f, "UNARY_NEG"),
            Op::UnaryNot => write!(f, "UNARY_NOT"),
            Op::Jump(target) => write!(f, "JUMP {target}"),
            Op::PopJumpIfFalse(target) => write!(f, "POP_JUMP_IF_FALSE {target}"),
            Op::JumpIfFalse(target) => write!(f, "JUMP_IF_FALSE {target}"),
            Op::JumpIfTrue(target) => write!(f, "JUMP_IF_TRUE {target}"),
            Op::GetIter => write!(f, "GET_ITER"),
            Op::ForIter(target) => write!(f, "FOR_ITER {target}"),
            Op::Call(arity) => write!(f, "CALL {arity}"),
            Op::MakeFunction(index) => write!(f, "MAKE_FUNCTION {index}"),
            Op::ReturnValue => write!(f, "RETURN_VALUE"),
            Op::Pop => write!(f, "POP"),
            Op::Nop => write!(f, "NOP"),
            Op::Halt => write!(f, "HALT"),
        }
    }
}

/// Body of one `def`, hoisted into the program's flat function pool.
///
/// Function code shares the program's constant pool and ends with an
/// implicit `LOAD_CONST None; RETURN_VALUE` fallthrough.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionProto {
    pub name: String,
    pub params: Vec<String>,
    pub code: Vec<Instruction>,
}

/// Fully compiled program consumed by the VM.
///
/// On compile failure `code` is empty and `diagnostics` holds the errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledProgram {
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub functions: Vec<FunctionProto>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompiledProgram {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            diagnostics,
            ..Self::default()
        }
    }

    /// Adds a constant to the pool, reusing an existing equal scalar.
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        if let Some(index) = self.constants.iter().position(|c| *c == constant) {
            return index;
        }
        self.constants.push(constant);
        self.constants.len() - 1
    }

    /// Textual listing of the whole program for debuggers.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        render_code(&mut out, &self.code);
        for (index, function) in self.functions.iter().enumerate() {
            out.push_str(&format!(
                "\nfunction {index} {}({}):\n",
                function.name,
                function.params.join(", ")
            ));
            render_code(&mut out, &function.code);
        }
        out
    }
}

fn render_code(out: &mut String, code: &[Instruction]) {
    for instruction in code {
        out.push_str(&instruction.to_string());
        out.push('\n');
    }
}
