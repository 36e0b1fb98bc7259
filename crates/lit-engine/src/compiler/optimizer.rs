//! AST-level optimizer.
//!
//! Runs between the parser and the emitter, controlled by a per-state
//! bit-set of switches. With every switch off the AST passes through
//! untouched, so the unoptimized pipeline is exactly the parser's output.

use crate::parser::ast::{Expression, Literal, Statement};
use crate::parser::token::TokenKind;

/// Individual optimization switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Optimization {
    ConstantFolding,
    LiteralFolding,
    UnusedVar,
    UnreachableCode,
    EmptyBody,
    LineInfo,
    PrivateNames,
    CFor,
}

pub const OPTIMIZATION_COUNT: usize = Optimization::CFor as usize + 1;

/// Preset bundles of switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    None,
    Repl,
    Debug,
    Release,
    Extreme,
}

/// The per-state switch set. Defaults to the `Debug` preset.
#[derive(Debug, Clone)]
pub struct OptimizationSettings {
    states: [bool; OPTIMIZATION_COUNT],
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        let mut settings = Self {
            states: [false; OPTIMIZATION_COUNT],
        };
        settings.set_level(OptimizationLevel::Debug);
        settings
    }
}

impl OptimizationSettings {
    pub fn is_enabled(&self, optimization: Optimization) -> bool {
        self.states[optimization as usize]
    }

    pub fn set_enabled(&mut self, optimization: Optimization, enabled: bool) {
        self.states[optimization as usize] = enabled;
    }

    pub fn set_all(&mut self, enabled: bool) {
        self.states = [enabled; OPTIMIZATION_COUNT];
    }

    pub fn any_enabled(&self) -> bool {
        self.states.iter().any(|s| *s)
    }

    pub fn set_level(&mut self, level: OptimizationLevel) {
        use Optimization::*;
        match level {
            OptimizationLevel::None => self.set_all(false),
            OptimizationLevel::Repl => {
                self.set_all(true);
                for opt in [UnusedVar, UnreachableCode, EmptyBody, LineInfo, PrivateNames] {
                    self.set_enabled(opt, false);
                }
            }
            OptimizationLevel::Debug => {
                self.set_all(true);
                for opt in [UnusedVar, LineInfo, PrivateNames] {
                    self.set_enabled(opt, false);
                }
            }
            OptimizationLevel::Release => {
                self.set_all(true);
                self.set_enabled(LineInfo, false);
            }
            OptimizationLevel::Extreme => self.set_all(true),
        }
    }
}

/// A `const` binding with a literal value, eligible for propagation.
struct ConstBinding {
    name: String,
    depth: usize,
    value: Literal,
}

pub struct Optimizer<'s> {
    settings: &'s OptimizationSettings,
    constants: Vec<ConstBinding>,
    depth: usize,
}

impl<'s> Optimizer<'s> {
    pub fn new(settings: &'s OptimizationSettings) -> Self {
        Self {
            settings,
            constants: Vec::new(),
            depth: 0,
        }
    }

    fn enabled(&self, optimization: Optimization) -> bool {
        self.settings.is_enabled(optimization)
    }

    pub fn optimize(&mut self, statements: &mut Vec<Statement>) {
        if !self.settings.any_enabled() {
            return;
        }
        self.optimize_statements(statements);
        self.constants.clear();
    }

    fn begin_scope(&mut self) {
        self.depth += 1;
    }

    fn end_scope(&mut self) {
        self.depth -= 1;
        let depth = self.depth;
        self.constants.retain(|c| c.depth <= depth);
    }

    fn resolve_constant(&self, name: &str) -> Option<&Literal> {
        self.constants
            .iter()
            .rev()
            .find(|c| c.name == name)
            .map(|c| &c.value)
    }

    fn optimize_statements(&mut self, statements: &mut Vec<Statement>) {
        for statement in statements.iter_mut() {
            self.optimize_statement(statement);
        }
        if self.enabled(Optimization::UnreachableCode) {
            if let Some(end) = statements.iter().position(|s| {
                matches!(
                    s,
                    Statement::Return { .. } | Statement::Break { .. } | Statement::Continue { .. }
                )
            }) {
                statements.truncate(end + 1);
            }
        }
        if self.enabled(Optimization::UnusedVar) {
            self.drop_unused_vars(statements);
        }
    }

    fn optimize_statement(&mut self, statement: &mut Statement) {
        match statement {
            Statement::Expression { expr, .. } => self.optimize_expression(expr),
            Statement::Block { statements, .. } => {
                self.begin_scope();
                self.optimize_statements(statements);
                self.end_scope();
            }
            Statement::Var {
                name,
                constant,
                init,
                ..
            } => {
                if let Some(init) = init {
                    self.optimize_expression(init);
                }
                if self.enabled(Optimization::ConstantFolding) && *constant {
                    if let Some(Expression::Literal { value, .. }) = init.as_ref() {
                        self.constants.push(ConstBinding {
                            name: name.clone(),
                            depth: self.depth,
                            value: value.clone(),
                        });
                    }
                }
            }
            Statement::If {
                condition,
                then_branch,
                elseif_conditions,
                elseif_branches,
                else_branch,
                line,
            } => {
                self.optimize_expression(condition);
                self.optimize_statement(then_branch);
                for cond in elseif_conditions.iter_mut() {
                    self.optimize_expression(cond);
                }
                for branch in elseif_branches.iter_mut() {
                    self.optimize_statement(branch);
                }
                if let Some(branch) = else_branch {
                    self.optimize_statement(branch);
                }
                if self.enabled(Optimization::UnreachableCode) && elseif_conditions.is_empty() {
                    if let Some(literal) = condition.as_literal() {
                        // A literal condition collapses the whole statement
                        // to the branch that would run.
                        let line = *line;
                        let replacement = if !literal.is_falsey() {
                            std::mem::replace(
                                then_branch.as_mut(),
                                Statement::Block {
                                    line,
                                    statements: Vec::new(),
                                },
                            )
                        } else if let Some(branch) = else_branch.take() {
                            *branch
                        } else {
                            Statement::Block {
                                line,
                                statements: Vec::new(),
                            }
                        };
                        *statement = replacement;
                    }
                }
            }
            Statement::While {
                condition, body, ..
            } => {
                self.optimize_expression(condition);
                self.optimize_statement(body);
                let removable = condition
                    .as_literal()
                    .map(|lit| lit.is_falsey())
                    .unwrap_or(false)
                    && self.enabled(Optimization::UnreachableCode);
                let empty = self.enabled(Optimization::EmptyBody) && statement_is_empty(body);
                if removable || (empty && condition.as_literal().is_some()) {
                    *statement = Statement::Block {
                        line: statement.line(),
                        statements: Vec::new(),
                    };
                }
            }
            Statement::For { .. } => self.optimize_for(statement),
            Statement::Function { body, params, .. } => {
                self.begin_scope();
                for param in params.iter_mut() {
                    if let Some(default) = &mut param.default_value {
                        self.optimize_expression(default);
                    }
                }
                self.optimize_statement(body);
                self.end_scope();
            }
            Statement::Return { value, .. } => {
                if let Some(value) = value {
                    self.optimize_expression(value);
                }
            }
            Statement::Method { body, params, .. } => {
                self.begin_scope();
                for param in params.iter_mut() {
                    if let Some(default) = &mut param.default_value {
                        self.optimize_expression(default);
                    }
                }
                self.optimize_statement(body);
                self.end_scope();
            }
            Statement::Class { members, .. } => {
                for member in members.iter_mut() {
                    self.optimize_statement(member);
                }
            }
            Statement::Field { getter, setter, .. } => {
                if let Some(getter) = getter {
                    self.optimize_statement(getter);
                }
                if let Some(setter) = setter {
                    self.optimize_statement(setter);
                }
            }
            Statement::Continue { .. } | Statement::Break { .. } => {}
        }
    }

    fn optimize_for(&mut self, statement: &mut Statement) {
        if let Statement::For {
            init,
            var,
            condition,
            increment,
            body,
            c_style,
            line,
        } = statement
        {
            self.begin_scope();
            if let Some(init) = init {
                self.optimize_expression(init);
            }
            if let Some(var) = var {
                self.optimize_statement(var);
            }
            if let Some(condition) = condition {
                self.optimize_expression(condition);
            }
            if let Some(increment) = increment {
                self.optimize_expression(increment);
            }
            if let Some(body) = body {
                self.optimize_statement(body);
            }
            self.end_scope();

            if self.enabled(Optimization::EmptyBody)
                && body.as_deref().map(statement_is_empty).unwrap_or(true)
                && *c_style
                && condition
                    .as_ref()
                    .map(|c| c.as_literal().is_some())
                    .unwrap_or(true)
            {
                *statement = Statement::Block {
                    line: *line,
                    statements: Vec::new(),
                };
                return;
            }

            // for (var i in <a> .. <b>) with literal ascending bounds becomes
            // the equivalent three-clause loop, skipping the iterator calls.
            if !*c_style && self.enabled(Optimization::CFor) {
                let bounds = match condition.as_ref() {
                    Some(Expression::Range { from, to, .. }) => {
                        match (from.as_literal(), to.as_literal()) {
                            (Some(Literal::Number(from)), Some(Literal::Number(to)))
                                if from < to =>
                            {
                                Some((*from, *to))
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                };
                if let (Some((from, to)), Some(var_stmt)) = (bounds, var.as_deref()) {
                    if let Statement::Var { name, .. } = var_stmt {
                        let line = *line;
                        let name = name.clone();
                        let counter = |l| Expression::Variable {
                            line: l,
                            name: name.clone(),
                        };
                        *var = Some(Box::new(Statement::Var {
                            line,
                            name: name.clone(),
                            constant: false,
                            init: Some(Expression::literal(line, Literal::Number(from))),
                        }));
                        // The range iterator includes its upper bound.
                        *condition = Some(Expression::Binary {
                            line,
                            op: TokenKind::LessEqual,
                            left: Box::new(counter(line)),
                            right: Box::new(Expression::literal(line, Literal::Number(to))),
                        });
                        *increment = Some(Expression::Assign {
                            line,
                            target: Box::new(counter(line)),
                            value: Box::new(Expression::Binary {
                                line,
                                op: TokenKind::Plus,
                                left: Box::new(counter(line)),
                                right: Box::new(Expression::literal(line, Literal::Number(1.0))),
                            }),
                        });
                        *c_style = true;
                    }
                }
            }
        }
    }

    /// Remove `var` declarations that are never read, when dropping the
    /// initializer cannot change behavior.
    fn drop_unused_vars(&mut self, statements: &mut Vec<Statement>) {
        let names: Vec<String> = statements
            .iter()
            .filter_map(|s| match s {
                Statement::Var {
                    name,
                    init,
                    constant: false,
                    ..
                } if init
                    .as_ref()
                    .map(|e| matches!(e, Expression::Literal { .. } | Expression::Lambda { .. }))
                    .unwrap_or(true) =>
                {
                    Some(name.clone())
                }
                _ => None,
            })
            .collect();
        let unused: Vec<&String> = names
            .iter()
            .filter(|name| {
                !statements.iter().any(|s| statement_reads_name(s, name))
            })
            .collect();
        if unused.is_empty() {
            return;
        }
        let unused: Vec<String> = unused.into_iter().cloned().collect();
        statements.retain(|s| match s {
            Statement::Var { name, .. } => !unused.contains(name),
            _ => true,
        });
    }

    fn optimize_expression(&mut self, expression: &mut Expression) {
        use Expression::*;
        match expression {
            Literal { .. } | This { .. } | Super { .. } => {}
            Variable { name, .. } => {
                if self.enabled(Optimization::ConstantFolding) {
                    if let Some(value) = self.resolve_constant(name) {
                        let value = value.clone();
                        *expression = Expression::Literal {
                            line: expression.line(),
                            value,
                        };
                    }
                }
            }
            Binary {
                op, left, right, ..
            } => {
                self.optimize_expression(left);
                let op = *op;
                // Short-circuit operators decide from the left literal alone.
                if self.enabled(Optimization::LiteralFolding)
                    && matches!(
                        op,
                        TokenKind::AmpAmp | TokenKind::BarBar | TokenKind::QuestionQuestion
                    )
                {
                    if let Some(lit) = left.as_literal() {
                        let take_right = match op {
                            TokenKind::AmpAmp => !lit.is_falsey(),
                            TokenKind::BarBar => lit.is_falsey(),
                            _ => matches!(lit, self::Literal::Null),
                        };
                        self.optimize_expression(right);
                        let replacement = if take_right {
                            std::mem::replace(
                                right.as_mut(),
                                Expression::literal(0, self::Literal::Null),
                            )
                        } else {
                            std::mem::replace(
                                left.as_mut(),
                                Expression::literal(0, self::Literal::Null),
                            )
                        };
                        *expression = replacement;
                        return;
                    }
                }
                self.optimize_expression(right);
                if self.enabled(Optimization::LiteralFolding) {
                    if let (Some(a), Some(b)) = (left.as_literal(), right.as_literal()) {
                        if let Some(folded) = evaluate_binary(a, b, op) {
                            *expression = Expression::Literal {
                                line: expression.line(),
                                value: folded,
                            };
                        }
                    }
                }
            }
            Unary { op, right, .. } => {
                self.optimize_expression(right);
                if self.enabled(Optimization::LiteralFolding) {
                    let op = *op;
                    if let Some(value) = right.as_literal() {
                        if let Some(folded) = evaluate_unary(value, op) {
                            *expression = Expression::Literal {
                                line: expression.line(),
                                value: folded,
                            };
                        }
                    }
                }
            }
            Assign { target, value, .. } => {
                // The target stays as written: substituting a propagated
                // constant would turn it into a literal.
                if !matches!(target.as_ref(), Variable { .. }) {
                    self.optimize_expression(target);
                }
                self.optimize_expression(value);
            }
            Call { callee, args, object_init, .. } => {
                self.optimize_expression(callee);
                for arg in args.iter_mut() {
                    self.optimize_expression(arg);
                }
                if let Some(init) = object_init {
                    self.optimize_expression(init);
                }
            }
            Get { object, .. } => self.optimize_expression(object),
            Set { object, value, .. } => {
                self.optimize_expression(object);
                self.optimize_expression(value);
            }
            Lambda { body, params, .. } => {
                self.begin_scope();
                for param in params.iter_mut() {
                    if let Some(default) = &mut param.default_value {
                        self.optimize_expression(default);
                    }
                }
                self.optimize_statement(body);
                self.end_scope();
            }
            Array { values, .. } => {
                for value in values.iter_mut() {
                    self.optimize_expression(value);
                }
            }
            Object { values, .. } => {
                for value in values.iter_mut() {
                    self.optimize_expression(value);
                }
            }
            Subscript { array, index, .. } => {
                self.optimize_expression(array);
                self.optimize_expression(index);
            }
            Range { from, to, .. } => {
                self.optimize_expression(from);
                self.optimize_expression(to);
            }
            Ternary {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.optimize_expression(condition);
                self.optimize_expression(then_branch);
                self.optimize_expression(else_branch);
                if self.enabled(Optimization::LiteralFolding) {
                    if let Some(lit) = condition.as_literal() {
                        let take_then = !lit.is_falsey();
                        let replacement = std::mem::replace(
                            if take_then {
                                then_branch.as_mut()
                            } else {
                                else_branch.as_mut()
                            },
                            Expression::literal(0, self::Literal::Null),
                        );
                        *expression = replacement;
                    }
                }
            }
            Interpolation { parts, .. } => {
                for part in parts.iter_mut() {
                    self.optimize_expression(part);
                }
            }
            Reference { target, .. } => self.optimize_expression(target),
        }
    }
}

fn statement_is_empty(statement: &Statement) -> bool {
    match statement {
        Statement::Block { statements, .. } => statements.is_empty(),
        _ => false,
    }
}

/// Conservative read-detection used by unused-var removal: any appearance
/// of the name (read, write or shadow) counts as a use.
fn statement_reads_name(statement: &Statement, name: &str) -> bool {
    fn expr_reads(expression: &Expression, name: &str) -> bool {
        use Expression::*;
        match expression {
            Variable { name: n, .. } => n == name,
            Literal { .. } | This { .. } | Super { .. } => false,
            Binary { left, right, .. } => expr_reads(left, name) || expr_reads(right, name),
            Unary { right, .. } => expr_reads(right, name),
            Assign { target, value, .. } => expr_reads(target, name) || expr_reads(value, name),
            Call { callee, args, object_init, .. } => {
                expr_reads(callee, name)
                    || args.iter().any(|a| expr_reads(a, name))
                    || object_init
                        .as_ref()
                        .map(|o| expr_reads(o, name))
                        .unwrap_or(false)
            }
            Get { object, .. } => expr_reads(object, name),
            Set { object, value, .. } => expr_reads(object, name) || expr_reads(value, name),
            Lambda { body, params, .. } => {
                params
                    .iter()
                    .any(|p| p.default_value.as_ref().map(|d| expr_reads(d, name)).unwrap_or(false))
                    || statement_reads_name(body, name)
            }
            Array { values, .. } => values.iter().any(|v| expr_reads(v, name)),
            Object { values, .. } => values.iter().any(|v| expr_reads(v, name)),
            Subscript { array, index, .. } => expr_reads(array, name) || expr_reads(index, name),
            Range { from, to, .. } => expr_reads(from, name) || expr_reads(to, name),
            Ternary {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                expr_reads(condition, name)
                    || expr_reads(then_branch, name)
                    || expr_reads(else_branch, name)
            }
            Interpolation { parts, .. } => parts.iter().any(|p| expr_reads(p, name)),
            Reference { target, .. } => expr_reads(target, name),
        }
    }

    match statement {
        Statement::Expression { expr, .. } => expr_reads(expr, name),
        Statement::Block { statements, .. } => {
            statements.iter().any(|s| statement_reads_name(s, name))
        }
        Statement::Var { init, .. } => init
            .as_ref()
            .map(|e| expr_reads(e, name))
            .unwrap_or(false),
        Statement::If {
            condition,
            then_branch,
            elseif_conditions,
            elseif_branches,
            else_branch,
            ..
        } => {
            expr_reads(condition, name)
                || statement_reads_name(then_branch, name)
                || elseif_conditions.iter().any(|c| expr_reads(c, name))
                || elseif_branches.iter().any(|b| statement_reads_name(b, name))
                || else_branch
                    .as_ref()
                    .map(|b| statement_reads_name(b, name))
                    .unwrap_or(false)
        }
        Statement::While {
            condition, body, ..
        } => expr_reads(condition, name) || statement_reads_name(body, name),
        Statement::For {
            init,
            var,
            condition,
            increment,
            body,
            ..
        } => {
            init.as_ref().map(|e| expr_reads(e, name)).unwrap_or(false)
                || var
                    .as_ref()
                    .map(|v| statement_reads_name(v, name))
                    .unwrap_or(false)
                || condition.as_ref().map(|e| expr_reads(e, name)).unwrap_or(false)
                || increment.as_ref().map(|e| expr_reads(e, name)).unwrap_or(false)
                || body
                    .as_ref()
                    .map(|b| statement_reads_name(b, name))
                    .unwrap_or(false)
        }
        Statement::Function { body, .. } => statement_reads_name(body, name),
        Statement::Return { value, .. } => {
            value.as_ref().map(|e| expr_reads(e, name)).unwrap_or(false)
        }
        Statement::Method { body, .. } => statement_reads_name(body, name),
        Statement::Class { members, .. } => {
            members.iter().any(|m| statement_reads_name(m, name))
        }
        Statement::Field { getter, setter, .. } => {
            getter
                .as_ref()
                .map(|g| statement_reads_name(g, name))
                .unwrap_or(false)
                || setter
                    .as_ref()
                    .map(|s| statement_reads_name(s, name))
                    .unwrap_or(false)
        }
        Statement::Continue { .. } | Statement::Break { .. } => false,
    }
}

fn evaluate_binary(a: &Literal, b: &Literal, op: TokenKind) -> Option<Literal> {
    use TokenKind::*;
    if let (Literal::Number(a), Literal::Number(b)) = (a, b) {
        let (a, b) = (*a, *b);
        return Some(match op {
            Plus => Literal::Number(a + b),
            Minus => Literal::Number(a - b),
            Star => Literal::Number(a * b),
            StarStar => Literal::Number(a.powf(b)),
            Slash => Literal::Number(a / b),
            Sharp => Literal::Number((a / b).floor()),
            Percent => Literal::Number(a % b),
            Amp => Literal::Number(((a as i64) & (b as i64)) as f64),
            Bar => Literal::Number(((a as i64) | (b as i64)) as f64),
            Caret => Literal::Number(((a as i64) ^ (b as i64)) as f64),
            LessLess => Literal::Number(((a as i64) << (b as i64)) as f64),
            GreaterGreater => Literal::Number(((a as i64) >> (b as i64)) as f64),
            Greater => Literal::Bool(a > b),
            GreaterEqual => Literal::Bool(a >= b),
            Less => Literal::Bool(a < b),
            LessEqual => Literal::Bool(a <= b),
            EqualEqual => Literal::Bool(a == b),
            BangEqual => Literal::Bool(a != b),
            _ => return None,
        });
    }
    match op {
        EqualEqual => Some(Literal::Bool(a == b)),
        BangEqual => Some(Literal::Bool(a != b)),
        _ => None,
    }
}

fn evaluate_unary(value: &Literal, op: TokenKind) -> Option<Literal> {
    match op {
        TokenKind::Minus => match value {
            Literal::Number(n) => Some(Literal::Number(-n)),
            _ => None,
        },
        TokenKind::Bang => Some(Literal::Bool(value.is_falsey())),
        TokenKind::Tilde => match value {
            Literal::Number(n) => Some(Literal::Number(!(*n as i64) as f64)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn optimize_source(source: &str, level: OptimizationLevel) -> Vec<Statement> {
        let mut statements = Parser::new(source).parse().expect("parse failed");
        let mut settings = OptimizationSettings::default();
        settings.set_level(level);
        Optimizer::new(&settings).optimize(&mut statements);
        statements
    }

    #[test]
    fn folds_arithmetic() {
        let statements = optimize_source("print(1 + 2 * 3)", OptimizationLevel::Release);
        let Statement::Expression { expr, .. } = &statements[0] else {
            panic!("expected expression statement");
        };
        let Expression::Call { args, .. } = expr else {
            panic!("expected call");
        };
        assert_eq!(args[0].as_literal(), Some(&Literal::Number(7.0)));
    }

    #[test]
    fn folds_short_circuit() {
        let statements = optimize_source("print(false && sideEffect())", OptimizationLevel::Release);
        let Statement::Expression { expr, .. } = &statements[0] else {
            panic!("expected expression statement");
        };
        let Expression::Call { args, .. } = expr else {
            panic!("expected call");
        };
        assert_eq!(args[0].as_literal(), Some(&Literal::Bool(false)));
    }

    #[test]
    fn none_level_keeps_ast() {
        let statements = optimize_source("print(1 + 2)", OptimizationLevel::None);
        let Statement::Expression { expr, .. } = &statements[0] else {
            panic!("expected expression statement");
        };
        let Expression::Call { args, .. } = expr else {
            panic!("expected call");
        };
        assert!(matches!(args[0], Expression::Binary { .. }));
    }

    #[test]
    fn dead_if_branch_is_removed() {
        let statements = optimize_source(
            "if (false) { print(1) } else { print(2) }",
            OptimizationLevel::Release,
        );
        assert!(matches!(&statements[0], Statement::Block { .. }));
    }

    #[test]
    fn const_propagates() {
        let statements = optimize_source("const k = 2\nprint(k + 1)", OptimizationLevel::Release);
        let Statement::Expression { expr, .. } = &statements[1] else {
            panic!("expected expression statement");
        };
        let Expression::Call { args, .. } = expr else {
            panic!("expected call");
        };
        assert_eq!(args[0].as_literal(), Some(&Literal::Number(3.0)));
    }

    #[test]
    fn range_for_becomes_c_style() {
        let statements = optimize_source(
            "for (var i in 0 .. 3) print(i)",
            OptimizationLevel::Release,
        );
        let Statement::For { c_style, condition, .. } = &statements[0] else {
            panic!("expected for");
        };
        assert!(*c_style);
        assert!(matches!(
            condition.as_ref().unwrap(),
            Expression::Binary {
                op: TokenKind::LessEqual,
                ..
            }
        ));
    }
}
