//! AST → bytecode lowering with static name and attribute checking.
//!
//! Compilation never panics on user input: every failure is collected as a
//! structured `Diagnostic`. All diagnostics are fatal, so a failed compile
//! returns a program with empty code and the errors attached.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{BinaryOp, CompareOp, Expr, ExprKind, LogicalOp, Stmt, StmtKind};
use crate::bytecode::{CompiledProgram, Constant, FunctionProto, Instruction, Op};
use crate::diag::Diagnostic;
use crate::env::{EnvSchema, TypeTag, builtin_call_tag, builtin_tag};
use crate::lexer;
use crate::parser;

/// Placeholder jump target, patched before the surrounding construct ends.
const UNPATCHED: usize = usize::MAX;

pub fn compile(source: &str, schema: &EnvSchema) -> CompiledProgram {
    let tokens = match lexer::tokenize(source) {
        Ok(tokens) => tokens,
        Err(error) => {
            let span = error.position().unwrap_or_default();
            debug!(error = %error, "tokenize failed");
            return CompiledProgram::failed(vec![Diagnostic::syntax(error.to_string(), span)]);
        }
    };

    let statements = match parser::parse_tokens(tokens) {
        Ok(statements) => statements,
        Err(diagnostic) => {
            debug!(error = %diagnostic, "parse failed");
            return CompiledProgram::failed(vec![diagnostic]);
        }
    };

    let mut compiler = Compiler::new(schema);
    compiler.compile_program(&statements);
    compiler.finish()
}

struct LoopFrame {
    /// Continue target: the condition for `while`, the FOR_ITER for `for`.
    start: usize,
    /// A `for` loop keeps its iterator on the operand stack, so `break`
    /// must pop it before jumping out.
    is_for: bool,
    break_jumps: Vec<usize>,
}

struct Compiler<'a> {
    schema: &'a EnvSchema,
    program: CompiledProgram,
    code: Vec<Instruction>,
    scopes: Vec<HashMap<String, TypeTag>>,
    loops: Vec<LoopFrame>,
    function_depth: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Compiler<'a> {
    fn new(schema: &'a EnvSchema) -> Self {
        let mut globals = HashMap::new();
        if let Some(self_tag) = &schema.self_type {
            globals.insert("self".to_string(), self_tag.clone());
        }
        Self {
            schema,
            program: CompiledProgram::default(),
            code: Vec::new(),
            scopes: vec![globals],
            loops: Vec::new(),
            function_depth: 0,
            diagnostics: Vec::new(),
        }
    }

    fn compile_program(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.compile_statement(statement);
        }
        let line = self.last_line(1);
        self.emit(Op::Halt, line);
    }

    fn finish(mut self) -> CompiledProgram {
        if !self.diagnostics.is_empty() {
            debug!(errors = self.diagnostics.len(), "compile failed");
            return CompiledProgram::failed(self.diagnostics);
        }
        self.program.code = self.code;
        debug!(
            instructions = self.program.code.len(),
            constants = self.program.constants.len(),
            functions = self.program.functions.len(),
            "compile finished"
        );
        self.program
    }

    fn compile_statement(&mut self, statement: &Stmt) {
        let line = statement.line;
        match &statement.kind {
            StmtKind::Assign { name, value } => {
                let tag = self.type_of(value);
                self.compile_expression(value);
                self.emit(Op::StoreVar(name.clone()), line);
                self.declare(name, tag);
            }
            StmtKind::AugAssign { name, op, value } => {
                if self.resolve(name).is_none() {
                    self.diagnostics
                        .push(Diagnostic::name_error(format!("'{name}' is not defined"), line));
                }
                self.emit(Op::LoadVar(name.clone()), line);
                self.compile_expression(value);
                self.emit(binary_instruction(*op), line);
                self.emit(Op::StoreVar(name.clone()), line);
            }
            StmtKind::Expr(expr) => {
                self.compile_expression(expr);
                self.emit(Op::Pop, expr.line);
            }
            StmtKind::If {
                condition,
                then_body,
                else_body,
            } => {
                self.compile_expression(condition);
                let branch = self.emit(Op::PopJumpIfFalse(UNPATCHED), condition.line);
                self.compile_block(then_body);
                if else_body.is_empty() {
                    let end = self.code.len();
                    self.patch_jump(branch, end);
                } else {
                    let exit_line = self.last_line(line);
                    let exit = self.emit(Op::Jump(UNPATCHED), exit_line);
                    let else_start = self.code.len();
                    self.patch_jump(branch, else_start);
                    self.compile_block(else_body);
                    let end = self.code.len();
                    self.patch_jump(exit, end);
                }
            }
            StmtKind::While { condition, body } => {
                let start = self.code.len();
                self.compile_expression(condition);
                let exit = self.emit(Op::PopJumpIfFalse(UNPATCHED), condition.line);
                self.loops.push(LoopFrame {
                    start,
                    is_for: false,
                    break_jumps: Vec::new(),
                });
                self.compile_block(body);
                let back_line = self.last_line(line);
                self.emit(Op::Jump(start), back_line);
                self.close_loop(exit);
            }
            StmtKind::For {
                target,
                iterable,
                body,
            } => {
                let element_tag = element_tag(self.type_of(iterable));
                self.compile_expression(iterable);
                self.emit(Op::GetIter, iterable.line);
                let start = self.code.len();
                let exit = self.emit(Op::ForIter(UNPATCHED), line);
                self.emit(Op::StoreVar(target.clone()), line);
                self.declare(target, element_tag);
                self.loops.push(LoopFrame {
                    start,
                    is_for: true,
                    break_jumps: Vec::new(),
                });
                self.compile_block(body);
                let back_line = self.last_line(line);
                self.emit(Op::Jump(start), back_line);
                self.close_loop(exit);
            }
            StmtKind::FunctionDef { name, params, body } => {
                self.declare(name, TypeTag::Any);
                let index = self.program.functions.len();
                self.program.functions.push(FunctionProto {
                    name: name.clone(),
                    params: params.clone(),
                    code: Vec::new(),
                });
                self.compile_function_body(index, params, body);
                self.emit(Op::MakeFunction(index), line);
                self.emit(Op::StoreVar(name.clone()), line);
            }
            StmtKind::Return(value) => {
                if self.function_depth == 0 {
                    self.diagnostics.push(Diagnostic::syntax(
                        "'return' outside function",
                        crate::token::Span::new(line, 1),
                    ));
                }
                match value {
                    Some(expr) => self.compile_expression(expr),
                    None => {
                        let none = self.program.add_constant(Constant::None);
                        self.emit(Op::LoadConst(none), line);
                    }
                }
                self.emit(Op::ReturnValue, line);
            }
            StmtKind::Break => {
                let Some(is_for) = self.loops.last().map(|frame| frame.is_for) else {
                    self.diagnostics.push(Diagnostic::syntax(
                        "'break' outside loop",
                        crate::token::Span::new(line, 1),
                    ));
                    return;
                };
                if is_for {
                    self.emit(Op::Pop, line);
                }
                let jump = self.emit(Op::Jump(UNPATCHED), line);
                if let Some(frame) = self.loops.last_mut() {
                    frame.break_jumps.push(jump);
                }
            }
            StmtKind::Continue => {
                let Some(start) = self.loops.last().map(|frame| frame.start) else {
                    self.diagnostics.push(Diagnostic::syntax(
                        "'continue' outside loop",
                        crate::token::Span::new(line, 1),
                    ));
                    return;
                };
                self.emit(Op::Jump(start), line);
            }
        }
    }

    fn compile_block(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.compile_statement(statement);
        }
    }

    /// Compiles a `def` body into its reserved function-pool slot. The body
    /// gets a fresh emission buffer and loop stack; the scope stack grows by
    /// one level holding the parameters.
    fn compile_function_body(&mut self, index: usize, params: &[String], body: &[Stmt]) {
        let saved_code = std::mem::take(&mut self.code);
        let saved_loops = std::mem::take(&mut self.loops);
        self.function_depth += 1;

        let mut scope = HashMap::new();
        for param in params {
            scope.insert(param.clone(), TypeTag::Any);
        }
        self.scopes.push(scope);

        self.compile_block(body);
        let last_line = self.last_line(body.last().map(|s| s.line).unwrap_or(1));
        let none = self.program.add_constant(Constant::None);
        self.emit(Op::LoadConst(none), last_line);
        self.emit(Op::ReturnValue, last_line);

        self.scopes.pop();
        self.function_depth -= 1;
        self.loops = saved_loops;
        self.program.functions[index].code = std::mem::replace(&mut self.code, saved_code);
    }

    fn compile_expression(&mut self, expr: &Expr) {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Number(value) => {
                let index = self.program.add_constant(Constant::Number(*value));
                self.emit(Op::LoadConst(index), line);
            }
            ExprKind::Str(value) => {
                let index = self.program.add_constant(Constant::Str(value.clone()));
                self.emit(Op::LoadConst(index), line);
            }
            ExprKind::Bool(value) => {
                let index = self.program.add_constant(Constant::Bool(*value));
                self.emit(Op::LoadConst(index), line);
            }
            ExprKind::None => {
                let index = self.program.add_constant(Constant::None);
                self.emit(Op::LoadConst(index), line);
            }
            ExprKind::Name(name) => {
                if self.resolve(name).is_none() {
                    self.diagnostics
                        .push(Diagnostic::name_error(format!("'{name}' is not defined"), line));
                }
                self.emit(Op::LoadVar(name.clone()), line);
            }
            ExprKind::Binary { left, op, right } => {
                self.compile_expression(left);
                self.compile_expression(right);
                self.emit(binary_instruction(*op), line);
            }
            ExprKind::Neg(operand) => {
                self.compile_expression(operand);
                self.emit(Op::UnaryNeg, line);
            }
            ExprKind::Compare { left, op, right } => {
                self.compile_expression(left);
                self.compile_expression(right);
                let op = match op {
                    CompareOp::Eq => Op::CompareEq,
                    CompareOp::Ne => Op::CompareNe,
                    CompareOp::Lt => Op::CompareLt,
                    CompareOp::Gt => Op::CompareGt,
                    CompareOp::Le => Op::CompareLe,
                    CompareOp::Ge => Op::CompareGe,
                };
                self.emit(op, line);
            }
            ExprKind::Logical { left, op, right } => {
                self.compile_expression(left);
                let short = match op {
                    LogicalOp::And => self.emit(Op::JumpIfFalse(UNPATCHED), line),
                    LogicalOp::Or => self.emit(Op::JumpIfTrue(UNPATCHED), line),
                };
                self.emit(Op::Pop, line);
                self.compile_expression(right);
                let end = self.code.len();
                self.patch_jump(short, end);
            }
            ExprKind::Not(operand) => {
                self.compile_expression(operand);
                self.emit(Op::UnaryNot, line);
            }
            ExprKind::Call { callee, args } => {
                self.compile_expression(callee);
                for arg in args {
                    self.compile_expression(arg);
                }
                self.emit(Op::Call(args.len()), line);
            }
            ExprKind::Attribute { object, name } => {
                self.compile_expression(object);
                self.check_attribute(object, name, line);
                self.emit(Op::LoadAttr(name.clone()), line);
            }
            ExprKind::Index { object, index } => {
                self.compile_expression(object);
                self.compile_expression(index);
                self.emit(Op::GetIndex, line);
            }
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for item in items {
                    self.compile_expression(item);
                }
                self.emit(Op::BuildList(items.len()), line);
            }
        }
    }

    /// Flags unknown attributes on receivers whose static tag names a
    /// schema-declared object type. Dynamic receivers stay unchecked.
    fn check_attribute(&mut self, object: &Expr, name: &str, line: u32) {
        let TypeTag::Object(type_name) = self.type_of(object) else {
            return;
        };
        let Some(type_schema) = self.schema.attributes_of(&type_name) else {
            return;
        };
        if type_schema.attributes.contains_key(name) {
            return;
        }

        let mut message = format!("{type_name} has no attribute '{name}'");
        let mut declared: Vec<&String> = type_schema.attributes.keys().collect();
        declared.sort();
        if let Some(candidate) = suggest(name, &declared) {
            message.push_str(&format!("; did you mean '{candidate}'?"));
        }
        self.diagnostics
            .push(Diagnostic::attribute_error(message, line));
    }

    /// Best-effort static tag of an expression. Unknown is `Any`, which
    /// silences attribute checks further down the chain.
    fn type_of(&self, expr: &Expr) -> TypeTag {
        match &expr.kind {
            ExprKind::Number(_) => TypeTag::Number,
            ExprKind::Str(_) => TypeTag::Str,
            ExprKind::Bool(_) => TypeTag::Bool,
            ExprKind::None => TypeTag::Any,
            ExprKind::Name(name) => self.resolve(name).unwrap_or(TypeTag::Any),
            ExprKind::Binary { .. } | ExprKind::Neg(_) => TypeTag::Number,
            ExprKind::Compare { .. } | ExprKind::Not(_) => TypeTag::Bool,
            ExprKind::Logical { .. } => TypeTag::Any,
            ExprKind::Call { callee, .. } => match &callee.kind {
                ExprKind::Name(name) => builtin_call_tag(name).unwrap_or(TypeTag::Any),
                // A callable attribute's schema tag is the tag of its call
                // result, e.g. scan → List[Enemy].
                ExprKind::Attribute { .. } => self.type_of(callee),
                _ => TypeTag::Any,
            },
            ExprKind::Attribute { object, name } => {
                let TypeTag::Object(type_name) = self.type_of(object) else {
                    return TypeTag::Any;
                };
                self.schema
                    .attributes_of(&type_name)
                    .and_then(|schema| schema.attributes.get(name).cloned())
                    .unwrap_or(TypeTag::Any)
            }
            ExprKind::Index { object, .. } => match self.type_of(object) {
                TypeTag::List(element) => *element,
                TypeTag::Str => TypeTag::Str,
                _ => TypeTag::Any,
            },
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                TypeTag::List(Box::new(unify_tags(items.iter().map(|i| self.type_of(i)))))
            }
        }
    }

    fn resolve(&self, name: &str) -> Option<TypeTag> {
        for scope in self.scopes.iter().rev() {
            if let Some(tag) = scope.get(name) {
                return Some(tag.clone());
            }
        }
        self.schema
            .binding_tag(name)
            .or_else(|| builtin_tag(name))
    }

    fn declare(&mut self, name: &str, tag: TypeTag) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), tag);
        }
    }

    fn emit(&mut self, op: Op, line: u32) -> usize {
        self.code.push(Instruction::new(op, line));
        self.code.len() - 1
    }

    fn patch_jump(&mut self, at: usize, target: usize) {
        match &mut self.code[at].op {
            Op::Jump(t)
            | Op::PopJumpIfFalse(t)
            | Op::JumpIfFalse(t)
            | Op::JumpIfTrue(t)
            | Op::ForIter(t) => *t = target,
            other => debug_assert!(false, "patched non-jump instruction {other:?}"),
        }
    }

    fn close_loop(&mut self, exit: usize) {
        let end = self.code.len();
        self.patch_jump(exit, end);
        if let Some(frame) = self.loops.pop() {
            for jump in frame.break_jumps {
                self.patch_jump(jump, end);
            }
        }
    }

    fn last_line(&self, fallback: u32) -> u32 {
        self.code.last().map(|i| i.line).unwrap_or(fallback)
    }
}

fn binary_instruction(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::BinaryAdd,
        BinaryOp::Sub => Op::BinarySub,
        BinaryOp::Mul => Op::BinaryMul,
        BinaryOp::Div => Op::BinaryDiv,
        BinaryOp::FloorDiv => Op::BinaryFloorDiv,
        BinaryOp::Mod => Op::BinaryMod,
        BinaryOp::Pow => Op::BinaryPow,
    }
}

fn element_tag(tag: TypeTag) -> TypeTag {
    match tag {
        TypeTag::List(element) => *element,
        _ => TypeTag::Any,
    }
}

fn unify_tags(tags: impl Iterator<Item = TypeTag>) -> TypeTag {
    let mut unified: Option<TypeTag> = None;
    for tag in tags {
        match &unified {
            None => unified = Some(tag),
            Some(existing) if *existing == tag => {}
            Some(_) => return TypeTag::Any,
        }
    }
    unified.unwrap_or(TypeTag::Any)
}

/// Picks a "did you mean" candidate: a declared name the miss prefixes, or
/// the closest name within Levenshtein distance 2. Candidates must be
/// sorted so ties resolve deterministically.
fn suggest<'c>(miss: &str, candidates: &[&'c String]) -> Option<&'c str> {
    for candidate in candidates {
        if candidate.starts_with(miss) {
            return Some(candidate.as_str());
        }
    }
    let mut best: Option<(usize, &str)> = None;
    for candidate in candidates {
        let distance = levenshtein(miss, candidate);
        if distance <= 2 && best.is_none_or(|(d, _)| distance < d) {
            best = Some((distance, candidate.as_str()));
        }
    }
    best.map(|(_, candidate)| candidate)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
