//! Expression parsing: the prefix and infix handlers wired into the rule
//! table in `parser::RULES`.

use crate::errors::CompileErrorKind;
use crate::parser::ast::{Expression, Literal, Param, Statement};
use crate::parser::token::{TokenKind, TokenValue};
use crate::parser::{get_rule, ParseResult, Parser, Precedence};

pub fn number(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let value = match parser.previous.value {
        TokenValue::Number(n) => n,
        _ => 0.0,
    };
    Ok(Expression::literal(line, Literal::Number(value)))
}

pub fn literal(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let value = match parser.previous.kind {
        TokenKind::True => Literal::Bool(true),
        TokenKind::False => Literal::Bool(false),
        _ => Literal::Null,
    };
    Ok(Expression::literal(line, value))
}

pub fn string(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let text = match &parser.previous.value {
        TokenValue::String(s) => s.clone(),
        _ => String::new(),
    };
    Ok(Expression::literal(line, Literal::String(text)))
}

/// `$"a {x} b"` — the scanner hands us literal chunks as Interpolation
/// tokens, one per embedded expression, with a plain String token at the
/// tail.
pub fn interpolation(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let mut parts = Vec::new();
    loop {
        if let TokenValue::String(chunk) = &parser.previous.value {
            if !chunk.is_empty() {
                parts.push(Expression::literal(
                    parser.previous.line,
                    Literal::String(chunk.clone()),
                ));
            }
        }
        parts.push(parser.parse_expression()?);
        if !parser.matches(TokenKind::Interpolation) {
            break;
        }
    }
    parser.consume(TokenKind::String, "end of interpolated string")?;
    if let TokenValue::String(chunk) = &parser.previous.value {
        if !chunk.is_empty() {
            parts.push(Expression::literal(
                parser.previous.line,
                Literal::String(chunk.clone()),
            ));
        }
    }
    Ok(Expression::Interpolation { line, parts })
}

pub fn variable_expression(parser: &mut Parser, can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let name = parser.previous.lexeme.clone();
    let variable = Expression::Variable { line, name };
    if can_assign && parser.matches(TokenKind::Equal) {
        let value = parser.parse_expression()?;
        return Ok(Expression::Assign {
            line,
            target: Box::new(variable),
            value: Box::new(value),
        });
    }
    Ok(variable)
}

/// `...` in argument position refers to the enclosing function's vararg
/// array; the emitter resolves it as a local named "...".
pub fn vararg(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    Ok(Expression::Variable {
        line: parser.previous.line,
        name: "...".to_string(),
    })
}

pub fn unary(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let op = parser.previous.kind;
    let right = parser.parse_precedence(Precedence::Unary)?;
    Ok(Expression::Unary {
        line,
        op,
        right: Box::new(right),
    })
}

pub fn binary(parser: &mut Parser, left: Expression, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let op = parser.previous.kind;
    parser.ignore_new_lines();
    let precedence = get_rule(op).precedence.one_higher();
    let right = parser.parse_precedence(precedence)?;
    Ok(Expression::Binary {
        line,
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn and(parser: &mut Parser, left: Expression, _can_assign: bool) -> ParseResult<Expression> {
    short_circuit(parser, left, TokenKind::AmpAmp, Precedence::And)
}

pub fn or(parser: &mut Parser, left: Expression, _can_assign: bool) -> ParseResult<Expression> {
    short_circuit(parser, left, TokenKind::BarBar, Precedence::Or)
}

pub fn null_filter(
    parser: &mut Parser,
    left: Expression,
    _can_assign: bool,
) -> ParseResult<Expression> {
    short_circuit(parser, left, TokenKind::QuestionQuestion, Precedence::Null)
}

fn short_circuit(
    parser: &mut Parser,
    left: Expression,
    op: TokenKind,
    precedence: Precedence,
) -> ParseResult<Expression> {
    let line = parser.previous.line;
    parser.ignore_new_lines();
    let right = parser.parse_precedence(precedence.one_higher())?;
    Ok(Expression::Binary {
        line,
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn convert_compound_operator(op: TokenKind) -> TokenKind {
    use TokenKind::*;
    match op {
        PlusEqual | PlusPlus => Plus,
        MinusEqual | MinusMinus => Minus,
        StarEqual => Star,
        SlashEqual => Slash,
        SharpEqual => Sharp,
        PercentEqual => Percent,
        CaretEqual => Caret,
        BarEqual => Bar,
        AmpEqual => Amp,
        other => other,
    }
}

/// `x += e`, `x++` and friends desugar to `x = x <op> e`.
pub fn compound(parser: &mut Parser, left: Expression, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let op = parser.previous.kind;
    let right = if op == TokenKind::PlusPlus || op == TokenKind::MinusMinus {
        Expression::literal(line, Literal::Number(1.0))
    } else {
        let precedence = get_rule(op).precedence.one_higher();
        parser.ignore_new_lines();
        parser.parse_precedence(precedence)?
    };
    let binary = Expression::Binary {
        line,
        op: convert_compound_operator(op),
        left: Box::new(left.clone()),
        right: Box::new(right),
    };
    Ok(Expression::Assign {
        line,
        target: Box::new(left),
        value: Box::new(binary),
    })
}

/// Either `?.name` / `?->name` (null-tolerant access) or the `cond ? a : b`
/// ternary, depending on what follows the question mark.
pub fn ternary_or_question(
    parser: &mut Parser,
    left: Expression,
    can_assign: bool,
) -> ParseResult<Expression> {
    let line = parser.previous.line;
    if parser.matches(TokenKind::Dot) || parser.matches(TokenKind::SmallArrow) {
        parser.consume(TokenKind::Identifier, "property name after '?.'")?;
        let name = parser.previous.lexeme.clone();
        return finish_get(parser, left, name, line, true, can_assign);
    }
    let then_branch = parser.parse_expression()?;
    parser.ignore_new_lines();
    parser.consume(TokenKind::Colon, "':' after expression")?;
    parser.ignore_new_lines();
    let else_branch = parser.parse_expression()?;
    Ok(Expression::Ternary {
        line,
        condition: Box::new(left),
        then_branch: Box::new(then_branch),
        else_branch: Box::new(else_branch),
    })
}

pub fn dot(parser: &mut Parser, left: Expression, can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    parser.ignore_new_lines();
    parser.consume(TokenKind::Identifier, "property name after '.'")?;
    let name = parser.previous.lexeme.clone();
    finish_get(parser, left, name, line, false, can_assign)
}

fn finish_get(
    parser: &mut Parser,
    object: Expression,
    name: String,
    line: usize,
    questionable: bool,
    can_assign: bool,
) -> ParseResult<Expression> {
    if can_assign && parser.matches(TokenKind::Equal) {
        let value = parser.parse_expression()?;
        return Ok(Expression::Set {
            line,
            object: Box::new(object),
            name,
            value: Box::new(value),
        });
    }
    Ok(Expression::Get {
        line,
        object: Box::new(object),
        name,
        questionable,
        ignore_result: false,
    })
}

pub fn range(parser: &mut Parser, left: Expression, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let to = parser.parse_precedence(Precedence::Range.one_higher())?;
    Ok(Expression::Range {
        line,
        from: Box::new(left),
        to: Box::new(to),
    })
}

pub fn subscript(parser: &mut Parser, left: Expression, can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    parser.ignore_new_lines();
    let index = parser.parse_expression()?;
    parser.ignore_new_lines();
    parser.consume(TokenKind::RightBracket, "']' after subscript")?;
    let subscript = Expression::Subscript {
        line,
        array: Box::new(left),
        index: Box::new(index),
    };
    if can_assign && parser.matches(TokenKind::Equal) {
        let value = parser.parse_expression()?;
        return Ok(Expression::Assign {
            line,
            target: Box::new(subscript),
            value: Box::new(value),
        });
    }
    Ok(subscript)
}

pub fn call(parser: &mut Parser, callee: Expression, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let mut args = Vec::new();
    parser.ignore_new_lines();
    while !parser.check(TokenKind::RightParen) {
        parser.ignore_new_lines();
        args.push(parser.parse_expression()?);
        parser.ignore_new_lines();
        if !parser.matches(TokenKind::Comma) {
            break;
        }
    }
    parser.ignore_new_lines();
    parser.consume(TokenKind::RightParen, "')' after arguments")?;
    if args.len() > 255 {
        return Err(parser.raise_at_previous(CompileErrorKind::TooManyFunctionArgs {
            count: args.len(),
        }));
    }
    Ok(Expression::Call {
        line,
        callee: Box::new(callee),
        args,
        object_init: None,
    })
}

pub fn this(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    Ok(Expression::This {
        line: parser.previous.line,
    })
}

pub fn super_(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    if !(parser.matches(TokenKind::Dot) || parser.matches(TokenKind::SmallArrow)) {
        // `super(...)` calls the parent constructor.
        return Ok(Expression::Super {
            line,
            method: "constructor".to_string(),
            ignore_result: false,
        });
    }
    parser.consume(TokenKind::Identifier, "super method name after '.'")?;
    Ok(Expression::Super {
        line,
        method: parser.previous.lexeme.clone(),
        ignore_result: false,
    })
}

/// Prefix `ref target` — creates a first-class reference to a slot.
pub fn reference(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    parser.ignore_new_lines();
    let target = parser.parse_precedence(Precedence::Call)?;
    Ok(Expression::Reference {
        line,
        target: Box::new(target),
    })
}

/// Prefix `*reference = value` — assignment through a reference.
pub fn dereference(parser: &mut Parser, can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let target = parser.parse_precedence(Precedence::Call)?;
    let reference = Expression::Reference {
        line,
        target: Box::new(target),
    };
    if can_assign && parser.matches(TokenKind::Equal) {
        let value = parser.parse_expression()?;
        return Ok(Expression::Assign {
            line,
            target: Box::new(reference),
            value: Box::new(value),
        });
    }
    Ok(reference)
}

pub fn array(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    let mut values = Vec::new();
    parser.ignore_new_lines();
    while !parser.check(TokenKind::RightBracket) {
        parser.ignore_new_lines();
        values.push(parser.parse_expression()?);
        parser.ignore_new_lines();
        if !parser.matches(TokenKind::Comma) {
            break;
        }
    }
    parser.ignore_new_lines();
    parser.consume(TokenKind::RightBracket, "']' after array literal")?;
    Ok(Expression::Array { line, values })
}

pub fn object(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    object_body(parser, line)
}

/// Parses `key = value, ...}` with the opening brace already consumed.
pub fn object_body(parser: &mut Parser, line: usize) -> ParseResult<Expression> {
    let mut keys = Vec::new();
    let mut values = Vec::new();
    parser.ignore_new_lines();
    while !parser.check(TokenKind::RightBrace) {
        parser.ignore_new_lines();
        parser.consume(TokenKind::Identifier, "key string after '{'")?;
        keys.push(parser.previous.lexeme.clone());
        parser.ignore_new_lines();
        parser.consume(TokenKind::Equal, "'=' after key string")?;
        parser.ignore_new_lines();
        values.push(parser.parse_expression()?);
        parser.ignore_new_lines();
        if !parser.matches(TokenKind::Comma) {
            break;
        }
    }
    parser.ignore_new_lines();
    parser.consume(TokenKind::RightBrace, "'}' after object literal")?;
    Ok(Expression::Object { line, keys, values })
}

/// `new Name(args)` with an optional `{ field = value }` initializer tail.
pub fn new_expression(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    parser.consume(TokenKind::Identifier, "class name after 'new'")?;
    let callee = Expression::Variable {
        line,
        name: parser.previous.lexeme.clone(),
    };
    parser.consume(TokenKind::LeftParen, "'(' after class name")?;
    let mut expression = call(parser, callee, false)?;
    if parser.matches(TokenKind::LeftBrace) {
        let init = object_body(parser, parser.previous.line)?;
        if let Expression::Call { object_init, .. } = &mut expression {
            *object_init = Some(Box::new(init));
        }
    }
    Ok(expression)
}

/// Decide between a parenthesized expression and a lambda by scanning ahead
/// to the matching `)` and checking for `=>`.
pub fn grouping_or_lambda(parser: &mut Parser, _can_assign: bool) -> ParseResult<Expression> {
    let line = parser.previous.line;
    if is_lambda_ahead(parser) {
        return lambda(parser, line);
    }
    parser.ignore_new_lines();
    let expression = parser.parse_expression()?;
    parser.ignore_new_lines();
    parser.consume(TokenKind::RightParen, "')' after grouping expression")?;
    Ok(expression)
}

fn is_lambda_ahead(parser: &mut Parser) -> bool {
    // The '(' is already consumed; `current` is the first token after it.
    let mut depth = 1usize;
    let mut n = 0usize;
    let closing = loop {
        let kind = if n == 0 {
            parser.current.kind
        } else {
            parser.peek_ahead(n - 1).kind
        };
        match kind {
            TokenKind::LeftParen => depth += 1,
            TokenKind::RightParen => {
                depth -= 1;
                if depth == 0 {
                    break n;
                }
            }
            TokenKind::Eof => return false,
            _ => {}
        }
        n += 1;
    };
    // Skip newlines after the ')' and look for '=>'.
    let mut k = closing;
    loop {
        let kind = parser.peek_ahead(k).kind;
        if kind == TokenKind::NewLine {
            k += 1;
            continue;
        }
        return kind == TokenKind::Arrow;
    }
}

fn lambda(parser: &mut Parser, line: usize) -> ParseResult<Expression> {
    let params = parse_parameters(parser)?;
    parser.consume(TokenKind::RightParen, "')' after lambda parameters")?;
    parser.ignore_new_lines();
    parser.consume(TokenKind::Arrow, "'=>' after lambda parameters")?;
    parser.ignore_new_lines();
    let body = if parser.check(TokenKind::LeftBrace) {
        crate::parser::stmt::parse_statement(parser)?
    } else {
        // Single-expression body: the value is the return value.
        let expr = parser.parse_expression()?;
        Statement::Expression {
            line: expr.line(),
            expr,
            pop: false,
        }
    };
    Ok(Expression::Lambda {
        line,
        params,
        body: Box::new(body),
    })
}

/// Shared by lambdas, functions and methods: `a, b = default, ...`.
pub fn parse_parameters(parser: &mut Parser) -> ParseResult<Vec<Param>> {
    let mut params: Vec<Param> = Vec::new();
    let mut had_default = false;
    parser.ignore_new_lines();
    while !parser.check(TokenKind::RightParen) {
        parser.ignore_new_lines();
        if parser.matches(TokenKind::DotDotDot) {
            params.push(Param {
                name: "...".to_string(),
                default_value: None,
            });
            break;
        }
        parser.consume(TokenKind::Identifier, "parameter name")?;
        let name = parser.previous.lexeme.clone();
        let default_value = if parser.matches(TokenKind::Equal) {
            parser.ignore_new_lines();
            Some(parser.parse_expression()?)
        } else {
            if had_default {
                return Err(parser.raise(CompileErrorKind::DefaultArgNotTrailing));
            }
            None
        };
        had_default = had_default || default_value.is_some();
        params.push(Param {
            name,
            default_value,
        });
        parser.ignore_new_lines();
        if !parser.matches(TokenKind::Comma) {
            break;
        }
    }
    Ok(params)
}
