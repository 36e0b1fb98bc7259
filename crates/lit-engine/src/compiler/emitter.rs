//! Single-pass bytecode emitter.
//!
//! Walks the optimized AST once, maintaining a stack of function compilers
//! (one per enclosing function, lambda or method). Each compiler owns its
//! locals, upvalue table and stack-depth bookkeeping; module-private slots
//! are shared emitter state. Name resolution at a use site goes
//! local → upvalue → module private → global.

use lit_core::{ObjHandle, Value};

use crate::compiler::chunk::Chunk;
use crate::compiler::opcode::Opcode;
use crate::compiler::optimizer::Optimization;
use crate::errors::{CompileError, CompileErrorKind};
use crate::parser::ast::{Expression, Literal, Param, Statement};
use crate::parser::token::TokenKind;
use crate::vm::object::{FieldAccessor, Function, Module, Obj};
use crate::vm::table::Table;
use crate::vm::State;

const UNINITIALIZED: i32 = i32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Regular,
    Script,
    Method,
    StaticMethod,
    Constructor,
}

impl FunctionKind {
    fn is_method(self) -> bool {
        matches!(
            self,
            FunctionKind::Method | FunctionKind::StaticMethod | FunctionKind::Constructor
        )
    }
}

struct Local {
    name: String,
    depth: i32,
    captured: bool,
    constant: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct CompilerUpvalue {
    index: u8,
    is_local: bool,
}

/// Per-function compile state.
struct FnCompiler {
    locals: Vec<Local>,
    upvalues: Vec<CompilerUpvalue>,
    scope_depth: i32,
    kind: FunctionKind,
    skip_return: bool,
    loop_depth: usize,
    slots: i32,
    function: Function,
}

struct Private {
    initialized: bool,
    constant: bool,
}

pub struct Emitter<'s> {
    state: &'s mut State,
    compilers: Vec<FnCompiler>,
    privates: Vec<Private>,
    breaks: Vec<usize>,
    continues: Vec<usize>,
    module: ObjHandle,
    module_name: String,
    class_name: Option<String>,
    have_superclass: bool,
    prev_was_expr_stmt: bool,
    emit_reference: usize,
    last_line: usize,
}

impl<'s> Emitter<'s> {
    pub fn new(state: &'s mut State) -> Self {
        Self {
            state,
            compilers: Vec::new(),
            privates: Vec::new(),
            breaks: Vec::new(),
            continues: Vec::new(),
            module: ObjHandle(0),
            module_name: String::new(),
            class_name: None,
            have_superclass: false,
            prev_was_expr_stmt: false,
            emit_reference: 0,
            last_line: 1,
        }
    }

    /// Emit a whole module. Diagnostics go through the state; the returned
    /// module is only installed into the module registry when emission
    /// produced no errors.
    pub fn emit_module(mut self, name: &str, statements: &[Statement]) -> ObjHandle {
        self.module_name = name.to_string();
        let name_handle = self.state.intern(name);
        let (module, is_new) = match self.state.modules.get(name_handle) {
            Some(value) => (value.as_object().expect("module registry holds objects"), false),
            None => {
                let module = self.state.alloc(Obj::Module(Module {
                    name: name_handle,
                    privates: Vec::new(),
                    private_names: Table::new(),
                    main_function: None,
                    main_fiber: None,
                    return_value: Value::NULL,
                    ran: false,
                }));
                (module, true)
            }
        };
        self.module = module;

        // A module that ran before keeps its private slots; every old slot
        // is already initialized.
        let old_count = self.state.module(module).privates.len();
        for _ in 0..old_count {
            self.privates.push(Private {
                initialized: true,
                constant: false,
            });
        }

        self.init_compiler(FunctionKind::Script);
        self.resolve_statements(statements);
        for statement in statements {
            if self.emit_statement(statement) {
                break;
            }
        }
        self.end_scope(self.last_line as u16);
        let main = self.end_compiler(Some(name_handle));
        self.state.module_mut(module).main_function = Some(main);

        if self
            .state
            .optimization
            .is_enabled(Optimization::PrivateNames)
        {
            self.state.module_mut(module).private_names.clear();
        }
        if is_new && !self.state.had_error {
            self.state.modules.set(name_handle, Value::object(module));
        }
        self.state.module_mut(module).ran = true;
        module
    }

    // ---- compiler stack ------------------------------------------------

    fn init_compiler(&mut self, kind: FunctionKind) {
        let mut chunk = Chunk::new();
        if self.state.optimization.is_enabled(Optimization::LineInfo) {
            chunk.has_line_info = false;
        }
        let function = Function {
            chunk,
            name: None,
            arg_count: 0,
            upvalue_count: 0,
            max_slots: 1,
            vararg: false,
            module: self.module,
        };
        let slot_zero = if kind.is_method() { "this" } else { "" };
        self.compilers.push(FnCompiler {
            locals: vec![Local {
                name: slot_zero.to_string(),
                depth: -1,
                captured: false,
                constant: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            kind,
            skip_return: false,
            loop_depth: 0,
            slots: 1,
            function,
        });
    }

    fn end_compiler(&mut self, name: Option<ObjHandle>) -> ObjHandle {
        if !self.current().skip_return {
            self.emit_return(self.last_line as u16);
            self.current_mut().skip_return = true;
        }
        let mut compiler = self.compilers.pop().expect("compiler stack underflow");
        if name.is_some() {
            compiler.function.name = name;
        }
        self.state.alloc(Obj::Function(compiler.function))
    }

    fn current(&self) -> &FnCompiler {
        self.compilers.last().expect("no active compiler")
    }

    fn current_mut(&mut self) -> &mut FnCompiler {
        self.compilers.last_mut().expect("no active compiler")
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.current_mut().function.chunk
    }

    fn chunk_len(&self) -> usize {
        self.current().function.chunk.code.len()
    }

    fn error(&mut self, line: usize, kind: CompileErrorKind) {
        let error = CompileError::new(kind, line);
        self.state.raise_compile_error(&error);
    }

    // ---- byte emission -------------------------------------------------

    fn emit_byte(&mut self, line: u16, byte: u8) {
        let line = line.max(self.last_line as u16);
        self.chunk_mut().write(byte, line);
        self.last_line = line as usize;
    }

    fn track_slots(&mut self, delta: i32) {
        let compiler = self.current_mut();
        compiler.slots += delta;
        if compiler.slots > compiler.function.max_slots as i32 {
            compiler.function.max_slots = compiler.slots as usize;
        }
    }

    fn emit_op(&mut self, line: u16, op: Opcode) {
        self.emit_byte(line, op as u8);
        self.track_slots(op.stack_effect());
    }

    fn emit_ops(&mut self, line: u16, a: Opcode, b: Opcode) {
        self.emit_op(line, a);
        self.emit_op(line, b);
    }

    fn emit_arged_op(&mut self, line: u16, op: Opcode, arg: u8) {
        self.emit_op(line, op);
        self.emit_byte(line, arg);
    }

    /// Calls and invokes: the operand says how many stack slots vanish.
    fn emit_varying_op(&mut self, line: u16, op: Opcode, arg: u8) {
        self.emit_byte(line, op as u8);
        self.emit_byte(line, arg);
        self.track_slots(-(arg as i32));
    }

    fn emit_short(&mut self, line: u16, value: u16) {
        self.emit_byte(line, (value >> 8) as u8);
        self.emit_byte(line, (value & 0xff) as u8);
    }

    fn emit_byte_or_short(&mut self, line: u16, short_op: Opcode, long_op: Opcode, index: u16) {
        if index > u8::MAX as u16 {
            self.emit_op(line, long_op);
            self.emit_short(line, index);
        } else {
            self.emit_arged_op(line, short_op, index as u8);
        }
    }

    fn add_constant(&mut self, line: usize, value: Value) -> u16 {
        let index = self.chunk_mut().add_constant(value);
        if index >= u16::MAX as usize {
            self.error(line, CompileErrorKind::TooManyConstants);
            return 0;
        }
        index as u16
    }

    fn emit_constant(&mut self, line: usize, value: Value) {
        let index = self.chunk_mut().add_constant(value);
        if index < u8::MAX as usize {
            self.emit_arged_op(line as u16, Opcode::Constant, index as u8);
        } else if index < u16::MAX as usize {
            self.emit_op(line as u16, Opcode::ConstantLong);
            self.emit_short(line as u16, index as u16);
        } else {
            self.error(line, CompileErrorKind::TooManyConstants);
        }
    }

    fn string_constant(&mut self, line: usize, text: &str) -> u16 {
        let value = self.state.string_value(text);
        self.add_constant(line, value)
    }

    fn emit_string_constant(&mut self, line: usize, text: &str) {
        let value = self.state.string_value(text);
        self.emit_constant(line, value);
    }

    // ---- jumps ---------------------------------------------------------

    fn emit_jump(&mut self, op: Opcode, line: u16) -> usize {
        self.emit_op(line, op);
        self.emit_byte(line, 0xff);
        self.emit_byte(line, 0xff);
        self.chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize, line: usize) {
        let jump = self.chunk_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error(line, CompileErrorKind::JumpTooBig);
        }
        let code = &mut self.chunk_mut().code;
        code[offset] = ((jump >> 8) & 0xff) as u8;
        code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, start: usize, line: u16) {
        self.emit_op(line, Opcode::JumpBack);
        let offset = self.chunk_len() - start + 2;
        if offset > u16::MAX as usize {
            self.error(line as usize, CompileErrorKind::JumpTooBig);
        }
        self.emit_short(line, offset as u16);
    }

    fn patch_loop_jumps(&mut self, jumps: &mut Vec<usize>, mark: usize, line: usize) {
        while jumps.len() > mark {
            let offset = jumps.pop().expect("loop jump list shrank unexpectedly");
            self.patch_jump(offset, line);
        }
    }

    // ---- scopes, locals, upvalues, privates ----------------------------

    fn begin_scope(&mut self) {
        self.current_mut().scope_depth += 1;
    }

    fn end_scope(&mut self, line: u16) {
        self.current_mut().scope_depth -= 1;
        loop {
            let compiler = self.current();
            let depth = compiler.scope_depth;
            match compiler.locals.last() {
                Some(local) if local.depth != UNINITIALIZED && local.depth > depth => {
                    let captured = local.captured;
                    self.current_mut().locals.pop();
                    if captured {
                        self.emit_op(line, Opcode::CloseUpvalue);
                    } else {
                        self.emit_op(line, Opcode::Pop);
                    }
                }
                _ => break,
            }
        }
    }

    fn add_local(&mut self, name: &str, line: usize, constant: bool) -> usize {
        if self.current().locals.len() >= u16::MAX as usize {
            self.error(line, CompileErrorKind::TooManyLocals);
        }
        let depth = self.current().scope_depth;
        let mut redefined = false;
        for local in self.current().locals.iter().rev() {
            if local.depth != UNINITIALIZED && local.depth < depth {
                break;
            }
            if local.name == name {
                redefined = true;
                break;
            }
        }
        if redefined {
            self.error(
                line,
                CompileErrorKind::VarRedefined {
                    name: name.to_string(),
                },
            );
        }
        self.current_mut().locals.push(Local {
            name: name.to_string(),
            depth: UNINITIALIZED,
            captured: false,
            constant,
        });
        self.current().locals.len() - 1
    }

    fn mark_local_initialized(&mut self, index: usize) {
        let depth = self.current().scope_depth;
        self.current_mut().locals[index].depth = depth;
    }

    fn resolve_local(&mut self, compiler: usize, name: &str, line: usize) -> Option<usize> {
        let mut uninitialized = false;
        let mut found = None;
        for (i, local) in self.compilers[compiler].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == UNINITIALIZED {
                    uninitialized = true;
                }
                found = Some(i);
                break;
            }
        }
        if uninitialized {
            self.error(
                line,
                CompileErrorKind::VariableUsedInInit {
                    name: name.to_string(),
                },
            );
        }
        found
    }

    fn add_upvalue(&mut self, compiler: usize, index: u8, is_local: bool, line: usize) -> usize {
        let upvalue = CompilerUpvalue { index, is_local };
        if let Some(existing) = self.compilers[compiler]
            .upvalues
            .iter()
            .position(|u| *u == upvalue)
        {
            return existing;
        }
        if self.compilers[compiler].upvalues.len() >= u8::MAX as usize {
            self.error(line, CompileErrorKind::TooManyUpvalues);
            return 0;
        }
        self.compilers[compiler].upvalues.push(upvalue);
        self.compilers[compiler].function.upvalue_count += 1;
        self.compilers[compiler].function.upvalue_count - 1
    }

    fn resolve_upvalue(&mut self, compiler: usize, name: &str, line: usize) -> Option<usize> {
        if compiler == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(compiler - 1, name, line) {
            self.compilers[compiler - 1].locals[local].captured = true;
            return Some(self.add_upvalue(compiler, local as u8, true, line));
        }
        if let Some(upvalue) = self.resolve_upvalue(compiler - 1, name, line) {
            return Some(self.add_upvalue(compiler, upvalue as u8, false, line));
        }
        None
    }

    fn add_private(&mut self, name: &str, line: usize, constant: bool) -> usize {
        if self.privates.len() >= u16::MAX as usize {
            self.error(line, CompileErrorKind::TooManyPrivates);
        }
        let key = self.state.intern(name);
        if let Some(existing) = self.state.module(self.module).private_names.get(key) {
            self.error(
                line,
                CompileErrorKind::VarRedefined {
                    name: name.to_string(),
                },
            );
            return existing.as_number() as usize;
        }
        let index = self.privates.len();
        self.privates.push(Private {
            initialized: false,
            constant,
        });
        let module = self.state.module_mut(self.module);
        module.private_names.set(key, Value::number(index as f64));
        module.privates.push(Value::NULL);
        index
    }

    fn mark_private_initialized(&mut self, index: usize) {
        self.privates[index].initialized = true;
    }

    fn resolve_private(&mut self, name: &str, line: usize) -> Option<usize> {
        let key = self.state.strings.lookup(name)?;
        let index = self.state.module(self.module).private_names.get(key)?;
        let index = index.as_number() as usize;
        if !self.privates[index].initialized {
            self.error(
                line,
                CompileErrorKind::VariableUsedInInit {
                    name: name.to_string(),
                },
            );
        }
        Some(index)
    }

    /// Pre-register module-level declarations so later statements can
    /// reference earlier ones (and forward references error properly).
    fn resolve_statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            match statement {
                Statement::Var {
                    line,
                    name,
                    constant,
                    ..
                } => {
                    let index = self.add_private(name, *line, *constant);
                    self.mark_private_initialized(index);
                }
                Statement::Function {
                    line,
                    name,
                    exported: false,
                    ..
                } => {
                    let index = self.add_private(name, *line, false);
                    self.mark_private_initialized(index);
                }
                _ => {}
            }
        }
    }

    // ---- functions -----------------------------------------------------

    fn emit_return(&mut self, line: u16) {
        if self.current().kind == FunctionKind::Constructor {
            self.emit_arged_op(line, Opcode::GetLocal, 0);
            self.emit_op(line, Opcode::Return);
        } else if self.prev_was_expr_stmt && !self.current().function.chunk.code.is_empty() {
            // The last expression statement's value becomes the return
            // value: drop its trailing POP.
            let chunk = self.chunk_mut();
            chunk.code.pop();
            if chunk.has_line_info {
                if let Some((_, count)) = chunk.lines.last_mut() {
                    *count -= 1;
                    if *count == 0 {
                        chunk.lines.pop();
                    }
                }
            }
            self.emit_op(line, Opcode::Return);
        } else {
            self.emit_ops(line, Opcode::Null, Opcode::Return);
        }
    }

    /// Declare parameters as locals; returns true when the list ends in a
    /// vararg. Defaults compile to a NULL_OR patch over the default
    /// expression.
    fn emit_parameters(&mut self, parameters: &[Param], line: usize) -> bool {
        for parameter in parameters {
            let index = self.add_local(&parameter.name, line, false);
            self.mark_local_initialized(index);
            if parameter.name == "..." {
                return true;
            }
            if let Some(default) = &parameter.default_value {
                self.emit_byte_or_short(
                    line as u16,
                    Opcode::GetLocal,
                    Opcode::GetLocalLong,
                    index as u16,
                );
                let jump = self.emit_jump(Opcode::NullOr, line as u16);
                self.emit_expression(default);
                self.patch_jump(jump, line);
                self.emit_byte_or_short(
                    line as u16,
                    Opcode::SetLocal,
                    Opcode::SetLocalLong,
                    index as u16,
                );
                self.emit_op(line as u16, Opcode::Pop);
            }
        }
        false
    }

    /// Compile a function body in a fresh compiler and emit the closure
    /// (or plain constant when nothing is captured).
    fn emit_function_object(
        &mut self,
        kind: FunctionKind,
        name: ObjHandle,
        params: &[Param],
        body: Option<&Statement>,
        line: usize,
    ) -> ObjHandle {
        self.init_compiler(kind);
        self.begin_scope();
        let vararg = self.emit_parameters(params, line);
        if let Some(body) = body {
            let single_expression = matches!(
                body,
                Statement::Expression { pop: false, .. }
            );
            if single_expression {
                self.current_mut().skip_return = true;
            }
            self.emit_statement(body);
            if single_expression {
                self.emit_op(self.last_line as u16, Opcode::Return);
            }
        }
        self.end_scope(self.last_line as u16);
        let upvalues = self.current().upvalues.clone();
        let handle = self.end_compiler(Some(name));
        {
            let function = self.state.function_mut(handle);
            function.arg_count = params.len();
            function.max_slots += params.len();
            function.vararg = vararg;
        }
        let upvalue_count = self.state.function(handle).upvalue_count;
        if upvalue_count > 0 {
            self.emit_op(self.last_line as u16, Opcode::Closure);
            let constant = self.add_constant(line, Value::object(handle));
            self.emit_short(self.last_line as u16, constant);
            for upvalue in upvalues {
                let line = self.last_line as u16;
                self.emit_byte(line, upvalue.is_local as u8);
                self.emit_byte(line, upvalue.index);
            }
        } else {
            self.emit_constant(self.last_line as usize, Value::object(handle));
        }
        handle
    }

    // ---- expressions ---------------------------------------------------

    fn emit_expression(&mut self, expression: &Expression) {
        match expression {
            Expression::Literal { line, value } => self.emit_literal(*line, value),
            Expression::Binary {
                line,
                op,
                left,
                right,
            } => self.emit_binary(*line, *op, left, right),
            Expression::Unary { line, op, right } => {
                self.emit_expression(right);
                let op = match op {
                    TokenKind::Minus => Opcode::Negate,
                    TokenKind::Bang => Opcode::Not,
                    TokenKind::Tilde => Opcode::BNot,
                    other => {
                        self.error(*line, CompileErrorKind::UnknownExpression {
                            id: *other as usize,
                        });
                        return;
                    }
                };
                self.emit_op(*line as u16, op);
            }
            Expression::Variable { line, name } => self.emit_variable(*line, name),
            Expression::Assign {
                line,
                target,
                value,
            } => self.emit_assign(*line, target, value),
            Expression::Call {
                line,
                callee,
                args,
                object_init,
            } => self.emit_call(*line, callee, args, object_init.as_deref()),
            Expression::Get {
                line,
                object,
                name,
                ..
            } => {
                self.emit_get(*line, object, name);
            }
            Expression::Set {
                line,
                object,
                name,
                value,
            } => {
                self.emit_expression(object);
                self.emit_expression(value);
                self.emit_string_constant(*line, name);
                self.emit_op(self.last_line as u16, Opcode::SetField);
            }
            Expression::Lambda { line, params, body } => {
                let name = format!("[lambda {}:{}]", self.module_name, line);
                let name = self.state.intern(&name);
                self.emit_function_object(FunctionKind::Regular, name, params, Some(body), *line);
            }
            Expression::Array { line, values } => {
                self.emit_op(*line as u16, Opcode::Array);
                for value in values {
                    self.emit_expression(value);
                    self.emit_op(self.last_line as u16, Opcode::PushArrayElement);
                }
            }
            Expression::Object { line, keys, values } => {
                self.emit_op(*line as u16, Opcode::Object);
                for (key, value) in keys.iter().zip(values) {
                    self.emit_string_constant(self.last_line, key);
                    self.emit_expression(value);
                    self.emit_op(self.last_line as u16, Opcode::PushObjectField);
                }
            }
            Expression::Subscript { line, array, index } => {
                self.emit_expression(array);
                self.emit_expression(index);
                self.emit_op(*line as u16, Opcode::SubscriptGet);
            }
            Expression::This { line } => self.emit_this(*line),
            Expression::Super { line, method, .. } => self.emit_super(*line, method),
            Expression::Range { line, from, to } => {
                self.emit_expression(to);
                self.emit_expression(from);
                self.emit_op(*line as u16, Opcode::Range);
            }
            Expression::Ternary {
                line,
                condition,
                then_branch,
                else_branch,
            } => {
                self.emit_expression(condition);
                let else_jump = self.emit_jump(Opcode::JumpIfFalse, *line as u16);
                self.emit_expression(then_branch);
                let end_jump = self.emit_jump(Opcode::Jump, self.last_line as u16);
                self.patch_jump(else_jump, else_branch.line());
                self.emit_expression(else_branch);
                self.patch_jump(end_jump, self.last_line);
            }
            Expression::Interpolation { line, parts } => {
                self.emit_op(*line as u16, Opcode::Array);
                for part in parts {
                    self.emit_expression(part);
                    self.emit_op(self.last_line as u16, Opcode::PushArrayElement);
                }
                self.emit_varying_op(self.last_line as u16, Opcode::Invoke, 0);
                let join = self.string_constant(self.last_line, "join");
                self.emit_short(self.last_line as u16, join);
            }
            Expression::Reference { line, target } => {
                if !matches!(
                    target.as_ref(),
                    Expression::Variable { .. }
                        | Expression::Get { .. }
                        | Expression::This { .. }
                        | Expression::Super { .. }
                ) {
                    self.error(*line, CompileErrorKind::InvalidReferenceTarget);
                    return;
                }
                let old = self.emit_reference;
                self.emit_reference += 1;
                self.emit_expression(target);
                self.emit_reference = old;
            }
        }
    }

    fn emit_literal(&mut self, line: usize, value: &Literal) {
        match value {
            Literal::Null => self.emit_op(line as u16, Opcode::Null),
            Literal::Bool(true) => self.emit_op(line as u16, Opcode::True),
            Literal::Bool(false) => self.emit_op(line as u16, Opcode::False),
            Literal::Number(n) => self.emit_constant(line, Value::number(*n)),
            Literal::String(s) => {
                let value = self.state.string_value(s);
                self.emit_constant(line, value);
            }
        }
    }

    fn emit_binary(&mut self, line: usize, op: TokenKind, left: &Expression, right: &Expression) {
        self.emit_expression(left);
        if matches!(
            op,
            TokenKind::AmpAmp | TokenKind::BarBar | TokenKind::QuestionQuestion
        ) {
            let jump_op = match op {
                TokenKind::BarBar => Opcode::Or,
                TokenKind::QuestionQuestion => Opcode::NullOr,
                _ => Opcode::And,
            };
            let jump = self.emit_jump(jump_op, self.last_line as u16);
            self.emit_expression(right);
            self.patch_jump(jump, self.last_line);
            return;
        }
        self.emit_expression(right);
        match op {
            TokenKind::Plus => self.emit_op(line as u16, Opcode::Add),
            TokenKind::Minus => self.emit_op(line as u16, Opcode::Subtract),
            TokenKind::Star => self.emit_op(line as u16, Opcode::Multiply),
            TokenKind::StarStar => self.emit_op(line as u16, Opcode::Power),
            TokenKind::Slash => self.emit_op(line as u16, Opcode::Divide),
            TokenKind::Sharp => self.emit_op(line as u16, Opcode::FloorDivide),
            TokenKind::Percent => self.emit_op(line as u16, Opcode::Mod),
            TokenKind::Is => self.emit_op(line as u16, Opcode::Is),
            TokenKind::EqualEqual => self.emit_op(line as u16, Opcode::Equal),
            TokenKind::BangEqual => self.emit_ops(line as u16, Opcode::Equal, Opcode::Not),
            TokenKind::Greater => self.emit_op(line as u16, Opcode::Greater),
            TokenKind::GreaterEqual => self.emit_op(line as u16, Opcode::GreaterEqual),
            TokenKind::Less => self.emit_op(line as u16, Opcode::Less),
            TokenKind::LessEqual => self.emit_op(line as u16, Opcode::LessEqual),
            TokenKind::LessLess => self.emit_op(line as u16, Opcode::LShift),
            TokenKind::GreaterGreater => self.emit_op(line as u16, Opcode::RShift),
            TokenKind::Bar => self.emit_op(line as u16, Opcode::BOr),
            TokenKind::Amp => self.emit_op(line as u16, Opcode::BAnd),
            TokenKind::Caret => self.emit_op(line as u16, Opcode::BXor),
            other => self.error(
                line,
                CompileErrorKind::UnknownExpression {
                    id: other as usize,
                },
            ),
        }
    }

    fn emit_variable(&mut self, line: usize, name: &str) {
        let reference = self.emit_reference > 0;
        if reference {
            self.emit_reference -= 1;
        }
        let compiler = self.compilers.len() - 1;
        if let Some(index) = self.resolve_local(compiler, name, line) {
            if reference {
                self.emit_op(line as u16, Opcode::ReferenceLocal);
                self.emit_short(line as u16, index as u16);
            } else {
                self.emit_byte_or_short(
                    line as u16,
                    Opcode::GetLocal,
                    Opcode::GetLocalLong,
                    index as u16,
                );
            }
            return;
        }
        if let Some(index) = self.resolve_upvalue(compiler, name, line) {
            if reference {
                self.emit_arged_op(line as u16, Opcode::ReferenceUpvalue, index as u8);
            } else {
                self.emit_arged_op(line as u16, Opcode::GetUpvalue, index as u8);
            }
            return;
        }
        if let Some(index) = self.resolve_private(name, line) {
            if reference {
                self.emit_op(line as u16, Opcode::ReferencePrivate);
                self.emit_short(line as u16, index as u16);
            } else {
                self.emit_byte_or_short(
                    line as u16,
                    Opcode::GetPrivate,
                    Opcode::GetPrivateLong,
                    index as u16,
                );
            }
            return;
        }
        let constant = self.string_constant(line, name);
        self.emit_op(
            line as u16,
            if reference {
                Opcode::ReferenceGlobal
            } else {
                Opcode::GetGlobal
            },
        );
        self.emit_short(line as u16, constant);
    }

    fn emit_assign(&mut self, line: usize, target: &Expression, value: &Expression) {
        match target {
            Expression::Variable { name, .. } => {
                self.emit_expression(value);
                let compiler = self.compilers.len() - 1;
                if let Some(index) = self.resolve_local(compiler, name, line) {
                    if self.current().locals[index].constant {
                        self.error(
                            line,
                            CompileErrorKind::ConstantModified {
                                name: name.to_string(),
                            },
                        );
                    }
                    self.emit_byte_or_short(
                        line as u16,
                        Opcode::SetLocal,
                        Opcode::SetLocalLong,
                        index as u16,
                    );
                    return;
                }
                if let Some(index) = self.resolve_upvalue(compiler, name, line) {
                    self.emit_arged_op(line as u16, Opcode::SetUpvalue, index as u8);
                    return;
                }
                if let Some(index) = self.resolve_private(name, line) {
                    if self.privates[index].constant {
                        self.error(
                            line,
                            CompileErrorKind::ConstantModified {
                                name: name.to_string(),
                            },
                        );
                    }
                    self.emit_byte_or_short(
                        line as u16,
                        Opcode::SetPrivate,
                        Opcode::SetPrivateLong,
                        index as u16,
                    );
                    return;
                }
                let constant = self.string_constant(line, name);
                self.emit_op(line as u16, Opcode::SetGlobal);
                self.emit_short(line as u16, constant);
            }
            Expression::Get { object, name, .. } => {
                self.emit_expression(object);
                self.emit_expression(value);
                self.emit_string_constant(line, name);
                self.emit_op(self.last_line as u16, Opcode::SetField);
            }
            Expression::Subscript { array, index, .. } => {
                self.emit_expression(array);
                self.emit_expression(index);
                self.emit_expression(value);
                self.emit_op(self.last_line as u16, Opcode::SubscriptSet);
            }
            Expression::Reference { target, .. } => {
                self.emit_expression(value);
                self.emit_expression(target);
                self.emit_op(line as u16, Opcode::SetReference);
            }
            _ => self.error(line, CompileErrorKind::InvalidAssignmentTarget),
        }
    }

    /// Property read with null propagation: a null receiver skips the
    /// field fetch and leaves null behind.
    fn emit_get(&mut self, line: usize, object: &Expression, name: &str) {
        let reference = self.emit_reference > 0;
        if reference {
            self.emit_reference -= 1;
        }
        self.emit_expression(object);
        let jump = self.emit_jump(Opcode::JumpIfNull, self.last_line as u16);
        self.emit_string_constant(self.last_line, name);
        self.emit_op(
            self.last_line as u16,
            if reference {
                Opcode::ReferenceField
            } else {
                Opcode::GetField
            },
        );
        self.patch_jump(jump, self.last_line);
    }

    fn emit_call(
        &mut self,
        line: usize,
        callee: &Expression,
        args: &[Expression],
        object_init: Option<&Expression>,
    ) {
        enum CallKind<'a> {
            Plain,
            Method { name: &'a str },
            Super { method: &'a str },
        }
        let kind = match callee {
            Expression::Get { object, name, .. } => {
                self.emit_expression(object);
                CallKind::Method { name }
            }
            Expression::Super { line, method, .. } => {
                self.check_super(*line);
                self.emit_arged_op(*line as u16, Opcode::GetLocal, 0);
                CallKind::Super { method }
            }
            other => {
                self.emit_expression(other);
                CallKind::Plain
            }
        };

        // A null method-call receiver skips the whole invoke.
        let null_jump = match kind {
            CallKind::Method { .. } => {
                Some(self.emit_jump(Opcode::JumpIfNull, self.last_line as u16))
            }
            _ => None,
        };

        for arg in args {
            if let Expression::Variable { name, line } = arg {
                if name == "..." {
                    let compiler = self.compilers.len() - 1;
                    let slot = self.resolve_local(compiler, "...", *line).unwrap_or(0);
                    self.emit_arged_op(*line as u16, Opcode::Vararg, slot as u8);
                    break;
                }
            }
            self.emit_expression(arg);
        }

        match kind {
            CallKind::Plain => {
                self.emit_varying_op(line as u16, Opcode::Call, args.len() as u8);
            }
            CallKind::Method { name } => {
                self.emit_varying_op(line as u16, Opcode::Invoke, args.len() as u8);
                let constant = self.string_constant(self.last_line, name);
                self.emit_short(self.last_line as u16, constant);
            }
            CallKind::Super { method } => {
                let compiler = self.compilers.len() - 1;
                let index = self.resolve_upvalue(compiler, "super", line).unwrap_or(0);
                self.emit_arged_op(line as u16, Opcode::GetUpvalue, index as u8);
                self.emit_varying_op(self.last_line as u16, Opcode::InvokeSuper, args.len() as u8);
                let constant = self.string_constant(self.last_line, method);
                self.emit_short(self.last_line as u16, constant);
            }
        }
        if let Some(jump) = null_jump {
            self.patch_jump(jump, self.last_line);
        }

        if let Some(Expression::Object { keys, values, .. }) = object_init {
            for (key, value) in keys.iter().zip(values) {
                self.emit_string_constant(value.line(), key);
                self.emit_expression(value);
                self.emit_op(self.last_line as u16, Opcode::PushObjectField);
            }
        }
    }

    fn emit_this(&mut self, line: usize) {
        let kind = self.current().kind;
        if kind == FunctionKind::StaticMethod {
            self.error(
                line,
                CompileErrorKind::ThisMisuse {
                    context: "in static methods",
                },
            );
        }
        if matches!(kind, FunctionKind::Constructor | FunctionKind::Method) {
            self.emit_arged_op(line as u16, Opcode::GetLocal, 0);
            return;
        }
        let compiler = self.compilers.len() - 1;
        match self.resolve_upvalue(compiler, "this", line) {
            Some(index) => self.emit_arged_op(line as u16, Opcode::GetUpvalue, index as u8),
            None => self.error(
                line,
                CompileErrorKind::ThisMisuse {
                    context: "in functions outside of any class",
                },
            ),
        }
    }

    fn check_super(&mut self, line: usize) {
        if self.current().kind == FunctionKind::StaticMethod {
            self.error(
                line,
                CompileErrorKind::SuperMisuse {
                    context: "in static methods",
                },
            );
        } else if !self.have_superclass {
            let class = self.class_name.clone().unwrap_or_default();
            self.error(line, CompileErrorKind::NoSuper { class });
        }
    }

    fn emit_super(&mut self, line: usize, method: &str) {
        self.check_super(line);
        let compiler = self.compilers.len() - 1;
        let index = self.resolve_upvalue(compiler, "super", line).unwrap_or(0);
        self.emit_arged_op(line as u16, Opcode::GetLocal, 0);
        self.emit_arged_op(line as u16, Opcode::GetUpvalue, index as u8);
        self.emit_op(line as u16, Opcode::GetSuperMethod);
        let constant = self.string_constant(line, method);
        self.emit_short(line as u16, constant);
    }

    // ---- statements ----------------------------------------------------

    /// Emit one statement. Returns true when the statement terminates the
    /// surrounding function body (a top-level return).
    fn emit_statement(&mut self, statement: &Statement) -> bool {
        match statement {
            Statement::Expression { line, expr, pop } => {
                self.emit_expression(expr);
                if *pop {
                    self.emit_op(*line as u16, Opcode::Pop);
                }
            }
            Statement::Block { statements, .. } => {
                self.begin_scope();
                for statement in statements {
                    if self.emit_statement(statement) {
                        break;
                    }
                }
                self.end_scope(self.last_line as u16);
            }
            Statement::Var {
                line,
                name,
                constant,
                init,
            } => self.emit_var(*line, name, *constant, init.as_ref()),
            Statement::If {
                line,
                condition,
                then_branch,
                elseif_conditions,
                elseif_branches,
                else_branch,
            } => self.emit_if(
                *line,
                condition,
                then_branch,
                elseif_conditions,
                elseif_branches,
                else_branch.as_deref(),
            ),
            Statement::While {
                line,
                condition,
                body,
            } => self.emit_while(*line, condition, body),
            Statement::For {
                line,
                init,
                var,
                condition,
                increment,
                body,
                c_style,
            } => self.emit_for(
                *line,
                init.as_ref(),
                var.as_deref(),
                condition.as_ref(),
                increment.as_ref(),
                body.as_deref(),
                *c_style,
            ),
            Statement::Continue { line } => {
                if self.current().loop_depth == 0 {
                    self.error(*line, CompileErrorKind::LoopJumpMisuse { keyword: "continue" });
                }
                let jump = self.emit_jump(Opcode::Jump, *line as u16);
                self.continues.push(jump);
            }
            Statement::Break { line } => {
                if self.current().loop_depth == 0 {
                    self.error(*line, CompileErrorKind::LoopJumpMisuse { keyword: "break" });
                }
                self.emit_op(*line as u16, Opcode::PopLocals);
                let depth = self.current().scope_depth;
                let count = self
                    .current()
                    .locals
                    .iter()
                    .rev()
                    .take_while(|local| local.depth != UNINITIALIZED && local.depth >= depth)
                    .filter(|local| !local.captured)
                    .count();
                self.emit_short(*line as u16, count as u16);
                let jump = self.emit_jump(Opcode::Jump, *line as u16);
                self.breaks.push(jump);
            }
            Statement::Function {
                line,
                name,
                params,
                body,
                exported,
            } => self.emit_function_statement(*line, name, params, body, *exported),
            Statement::Return { line, value } => {
                if self.current().kind == FunctionKind::Constructor {
                    self.error(*line, CompileErrorKind::ReturnFromConstructor);
                }
                match value {
                    Some(value) => self.emit_expression(value),
                    None => self.emit_op(self.last_line as u16, Opcode::Null),
                }
                self.emit_op(self.last_line as u16, Opcode::Return);
                if self.current().scope_depth == 0 {
                    self.current_mut().skip_return = true;
                }
                return true;
            }
            Statement::Method {
                line,
                name,
                params,
                body,
                is_static,
            } => self.emit_method(*line, name, params, body, *is_static),
            Statement::Class {
                line,
                name,
                parent,
                members,
            } => self.emit_class(*line, name, parent.as_deref(), members),
            Statement::Field {
                line,
                name,
                getter,
                setter,
                is_static,
            } => self.emit_field(*line, name, getter.as_deref(), setter.as_deref(), *is_static),
        }
        self.prev_was_expr_stmt = matches!(statement, Statement::Expression { .. });
        false
    }

    fn emit_var(&mut self, line: usize, name: &str, constant: bool, init: Option<&Expression>) {
        let is_private = self.compilers.len() == 1 && self.current().scope_depth == 0;
        let index = if is_private {
            // Pre-registered by resolve_statements; declarations nested in
            // unbraced branches register here instead.
            match self.resolve_private(name, line) {
                Some(index) => index,
                None => self.add_private(name, line, constant),
            }
        } else {
            self.add_local(name, line, constant)
        };
        match init {
            Some(init) => self.emit_expression(init),
            None => self.emit_op(line as u16, Opcode::Null),
        }
        if is_private {
            self.mark_private_initialized(index);
            self.emit_byte_or_short(
                line as u16,
                Opcode::SetPrivate,
                Opcode::SetPrivateLong,
                index as u16,
            );
            // Privates do not live on the stack; drop the value.
            self.emit_op(line as u16, Opcode::Pop);
        } else {
            self.mark_local_initialized(index);
            self.emit_byte_or_short(
                line as u16,
                Opcode::SetLocal,
                Opcode::SetLocalLong,
                index as u16,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_if(
        &mut self,
        line: usize,
        condition: &Expression,
        then_branch: &Statement,
        elseif_conditions: &[Expression],
        elseif_branches: &[Statement],
        else_branch: Option<&Statement>,
    ) {
        self.emit_expression(condition);
        let mut else_jump = self.emit_jump(Opcode::JumpIfFalse, line as u16);
        self.emit_statement(then_branch);
        let mut end_jumps = vec![self.emit_jump(Opcode::Jump, self.last_line as u16)];

        for (condition, branch) in elseif_conditions.iter().zip(elseif_branches) {
            self.patch_jump(else_jump, condition.line());
            self.emit_expression(condition);
            else_jump = self.emit_jump(Opcode::JumpIfFalse, self.last_line as u16);
            self.emit_statement(branch);
            end_jumps.push(self.emit_jump(Opcode::Jump, self.last_line as u16));
        }

        match else_branch {
            Some(branch) => {
                self.patch_jump(else_jump, branch.line());
                self.emit_statement(branch);
            }
            None => self.patch_jump(else_jump, self.last_line),
        }
        for jump in end_jumps {
            self.patch_jump(jump, self.last_line);
        }
    }

    fn emit_while(&mut self, line: usize, condition: &Expression, body: &Statement) {
        let start = self.chunk_len();
        let break_mark = self.breaks.len();
        let continue_mark = self.continues.len();
        self.current_mut().loop_depth += 1;
        self.emit_expression(condition);
        let exit_jump = self.emit_jump(Opcode::JumpIfFalse, line as u16);
        self.emit_statement(body);
        let mut continues = std::mem::take(&mut self.continues);
        self.patch_loop_jumps(&mut continues, continue_mark, self.last_line);
        self.continues = continues;
        self.emit_loop(start, self.last_line as u16);
        self.patch_jump(exit_jump, self.last_line);
        let mut breaks = std::mem::take(&mut self.breaks);
        self.patch_loop_jumps(&mut breaks, break_mark, self.last_line);
        self.breaks = breaks;
        self.current_mut().loop_depth -= 1;
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_for(
        &mut self,
        line: usize,
        init: Option<&Expression>,
        var: Option<&Statement>,
        condition: Option<&Expression>,
        increment: Option<&Expression>,
        body: Option<&Statement>,
        c_style: bool,
    ) {
        self.begin_scope();
        let break_mark = self.breaks.len();
        let continue_mark = self.continues.len();
        self.current_mut().loop_depth += 1;

        if c_style {
            if let Some(var) = var {
                self.emit_statement(var);
            } else if let Some(init) = init {
                self.emit_expression(init);
                self.emit_op(self.last_line as u16, Opcode::Pop);
            }
            let mut start = self.chunk_len();
            let mut exit_jump = None;
            if let Some(condition) = condition {
                self.emit_expression(condition);
                exit_jump = Some(self.emit_jump(Opcode::JumpIfFalse, self.last_line as u16));
            }
            if let Some(increment) = increment {
                let body_jump = self.emit_jump(Opcode::Jump, self.last_line as u16);
                let increment_start = self.chunk_len();
                self.emit_expression(increment);
                self.emit_op(self.last_line as u16, Opcode::Pop);
                self.emit_loop(start, self.last_line as u16);
                start = increment_start;
                self.patch_jump(body_jump, self.last_line);
            }
            self.begin_scope();
            if let Some(body) = body {
                // Bodies that are blocks share the loop scope; no double
                // scope around their statements.
                match body {
                    Statement::Block { statements, .. } => {
                        for statement in statements {
                            if self.emit_statement(statement) {
                                break;
                            }
                        }
                    }
                    other => {
                        self.emit_statement(other);
                    }
                }
            }
            let mut continues = std::mem::take(&mut self.continues);
            self.patch_loop_jumps(&mut continues, continue_mark, self.last_line);
            self.continues = continues;
            self.end_scope(self.last_line as u16);
            self.emit_loop(start, self.last_line as u16);
            if let Some(exit_jump) = exit_jump {
                self.patch_jump(exit_jump, self.last_line);
            }
        } else {
            // for (var x in sequence) lowers to the iterator protocol:
            //   seq = sequence; iter = null
            //   while (iter = seq.iterator(iter)) != null:
            //     x = seq.iteratorValue(iter); body
            let sequence = self.add_local("seq ", line, false);
            self.mark_local_initialized(sequence);
            if let Some(condition) = condition {
                self.emit_expression(condition);
            } else {
                self.emit_op(line as u16, Opcode::Null);
            }
            self.emit_byte_or_short(
                self.last_line as u16,
                Opcode::SetLocal,
                Opcode::SetLocalLong,
                sequence as u16,
            );
            let iterator = self.add_local("iter ", line, false);
            self.mark_local_initialized(iterator);
            self.emit_op(self.last_line as u16, Opcode::Null);
            self.emit_byte_or_short(
                self.last_line as u16,
                Opcode::SetLocal,
                Opcode::SetLocalLong,
                iterator as u16,
            );

            let start = self.chunk_len();
            // iter = seq.iterator(iter)
            self.emit_byte_or_short(
                self.last_line as u16,
                Opcode::GetLocal,
                Opcode::GetLocalLong,
                sequence as u16,
            );
            self.emit_byte_or_short(
                self.last_line as u16,
                Opcode::GetLocal,
                Opcode::GetLocalLong,
                iterator as u16,
            );
            self.emit_varying_op(self.last_line as u16, Opcode::Invoke, 1);
            let iterator_name = self.string_constant(self.last_line, "iterator");
            self.emit_short(self.last_line as u16, iterator_name);
            self.emit_byte_or_short(
                self.last_line as u16,
                Opcode::SetLocal,
                Opcode::SetLocalLong,
                iterator as u16,
            );
            let exit_jump = self.emit_jump(Opcode::JumpIfNullPopping, self.last_line as u16);

            self.begin_scope();
            // var x = seq.iteratorValue(iter)
            if let Some(Statement::Var { name, .. }) = var {
                let local = self.add_local(name, line, false);
                self.mark_local_initialized(local);
                self.emit_byte_or_short(
                    self.last_line as u16,
                    Opcode::GetLocal,
                    Opcode::GetLocalLong,
                    sequence as u16,
                );
                self.emit_byte_or_short(
                    self.last_line as u16,
                    Opcode::GetLocal,
                    Opcode::GetLocalLong,
                    iterator as u16,
                );
                self.emit_varying_op(self.last_line as u16, Opcode::Invoke, 1);
                let value_name = self.string_constant(self.last_line, "iteratorValue");
                self.emit_short(self.last_line as u16, value_name);
                self.emit_byte_or_short(
                    self.last_line as u16,
                    Opcode::SetLocal,
                    Opcode::SetLocalLong,
                    local as u16,
                );
            }
            if let Some(body) = body {
                match body {
                    Statement::Block { statements, .. } => {
                        for statement in statements {
                            if self.emit_statement(statement) {
                                break;
                            }
                        }
                    }
                    other => {
                        self.emit_statement(other);
                    }
                }
            }
            let mut continues = std::mem::take(&mut self.continues);
            self.patch_loop_jumps(&mut continues, continue_mark, self.last_line);
            self.continues = continues;
            self.end_scope(self.last_line as u16);
            self.emit_loop(start, self.last_line as u16);
            self.patch_jump(exit_jump, self.last_line);
        }

        let mut breaks = std::mem::take(&mut self.breaks);
        self.patch_loop_jumps(&mut breaks, break_mark, self.last_line);
        self.breaks = breaks;
        self.end_scope(self.last_line as u16);
        self.current_mut().loop_depth -= 1;
    }

    fn emit_function_statement(
        &mut self,
        line: usize,
        name: &str,
        params: &[Param],
        body: &Statement,
        exported: bool,
    ) {
        let is_private =
            !exported && self.compilers.len() == 1 && self.current().scope_depth == 0;
        let is_local = !exported && !is_private;
        let mut index = 0;
        if is_private {
            index = match self.resolve_private(name, line) {
                Some(index) => index,
                None => self.add_private(name, line, false),
            };
            self.mark_private_initialized(index);
        } else if is_local {
            index = self.add_local(name, line, false);
            self.mark_local_initialized(index);
        }
        let name_handle = self.state.intern(name);
        self.emit_function_object(FunctionKind::Regular, name_handle, params, Some(body), line);
        if exported {
            self.emit_op(self.last_line as u16, Opcode::SetGlobal);
            let constant = self.add_constant(line, Value::object(name_handle));
            self.emit_short(self.last_line as u16, constant);
            self.emit_op(self.last_line as u16, Opcode::Pop);
        } else if is_private {
            self.emit_byte_or_short(
                self.last_line as u16,
                Opcode::SetPrivate,
                Opcode::SetPrivateLong,
                index as u16,
            );
            self.emit_op(self.last_line as u16, Opcode::Pop);
        }
        // Local functions stay on the stack: the value is the local slot.
    }

    fn emit_method(
        &mut self,
        line: usize,
        name: &str,
        params: &[Param],
        body: &Statement,
        is_static: bool,
    ) {
        let constructor = name == "constructor";
        if constructor && is_static {
            self.error(line, CompileErrorKind::StaticConstructor);
        }
        let kind = if constructor {
            FunctionKind::Constructor
        } else if is_static {
            FunctionKind::StaticMethod
        } else {
            FunctionKind::Method
        };
        let class_name = self.class_name.clone().unwrap_or_default();
        let full_name = format!("{class_name}:{name}");
        let full_name = self.state.intern(&full_name);
        self.emit_function_object(kind, full_name, params, Some(body), line);
        self.emit_op(
            self.last_line as u16,
            if is_static {
                Opcode::StaticField
            } else {
                Opcode::Method
            },
        );
        let constant = self.string_constant(line, name);
        self.emit_short(self.last_line as u16, constant);
    }

    fn emit_class(
        &mut self,
        line: usize,
        name: &str,
        parent: Option<&str>,
        members: &[Statement],
    ) {
        self.class_name = Some(name.to_string());
        if let Some(parent) = parent {
            let constant = self.string_constant(line, parent);
            self.emit_op(self.last_line as u16, Opcode::GetGlobal);
            self.emit_short(self.last_line as u16, constant);
        }
        self.emit_op(line as u16, Opcode::Class);
        let name_constant = self.string_constant(self.last_line, name);
        self.emit_short(self.last_line as u16, name_constant);
        if parent.is_some() {
            self.emit_op(self.last_line as u16, Opcode::Inherit);
            self.have_superclass = true;
            self.begin_scope();
            let super_local = self.add_local("super", line, false);
            self.mark_local_initialized(super_local);
        }
        for member in members {
            if let Statement::Var {
                line, name, init, ..
            } = member
            {
                match init {
                    Some(init) => self.emit_expression(init),
                    None => self.emit_op(*line as u16, Opcode::Null),
                }
                self.emit_op(*line as u16, Opcode::StaticField);
                let constant = self.string_constant(*line, name);
                self.emit_short(*line as u16, constant);
            } else {
                self.emit_statement(member);
            }
        }
        self.emit_op(self.last_line as u16, Opcode::Pop);
        if parent.is_some() {
            self.end_scope(self.last_line as u16);
        }
        self.class_name = None;
        self.have_superclass = false;
    }

    fn emit_field(
        &mut self,
        line: usize,
        name: &str,
        getter: Option<&Statement>,
        setter: Option<&Statement>,
        is_static: bool,
    ) {
        let kind = if is_static {
            FunctionKind::StaticMethod
        } else {
            FunctionKind::Method
        };
        let class_name = self.class_name.clone().unwrap_or_default();
        let getter = getter.map(|body| {
            let full = format!("{class_name}:get {name}");
            let full = self.state.intern(&full);
            self.compile_accessor(kind, full, body, line, false)
        });
        let setter = setter.map(|body| {
            let full = format!("{class_name}:set {name}");
            let full = self.state.intern(&full);
            self.compile_accessor(kind, full, body, line, true)
        });
        let name_handle = self.state.intern(name);
        let field = self.state.alloc(Obj::Field(FieldAccessor {
            name: name_handle,
            getter: getter.map(Value::object),
            setter: setter.map(Value::object),
        }));
        self.emit_constant(line, Value::object(field));
        self.emit_op(
            line as u16,
            if is_static {
                Opcode::StaticField
            } else {
                Opcode::DefineField
            },
        );
        let constant = self.string_constant(line, name);
        self.emit_short(line as u16, constant);
    }

    /// Compile a getter or setter body without emitting the function onto
    /// the stack: accessors live inside Field constants.
    fn compile_accessor(
        &mut self,
        kind: FunctionKind,
        name: ObjHandle,
        body: &Statement,
        line: usize,
        setter: bool,
    ) -> ObjHandle {
        self.init_compiler(kind);
        if setter {
            let index = self.add_local("value", line, false);
            self.mark_local_initialized(index);
        }
        self.begin_scope();
        self.emit_statement(body);
        self.end_scope(self.last_line as u16);
        let handle = self.end_compiler(Some(name));
        if setter {
            let function = self.state.function_mut(handle);
            function.arg_count = 1;
            function.max_slots += 1;
        }
        handle
    }
}
