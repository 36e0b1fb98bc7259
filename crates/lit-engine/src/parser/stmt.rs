//! Statement and declaration parsing.

use crate::errors::CompileErrorKind;
use crate::parser::ast::{Expression, Statement};
use crate::parser::expr::parse_parameters;
use crate::parser::token::TokenKind;
use crate::parser::{ParseResult, Parser};

pub fn parse_declaration(parser: &mut Parser) -> ParseResult<Statement> {
    parser.ignore_new_lines();
    match parser.current.kind {
        TokenKind::Class => parse_class(parser),
        TokenKind::Function => {
            parser.advance();
            parse_function(parser, false)
        }
        TokenKind::Export => {
            parser.advance();
            parser.ignore_new_lines();
            parser.consume(TokenKind::Function, "'function' after 'export'")?;
            parse_function(parser, true)
        }
        _ => parse_statement(parser),
    }
}

pub fn parse_statement(parser: &mut Parser) -> ParseResult<Statement> {
    parser.ignore_new_lines();
    match parser.current.kind {
        TokenKind::Var | TokenKind::Const => parse_var_declaration(parser),
        TokenKind::If => parse_if(parser),
        TokenKind::While => parse_while(parser),
        TokenKind::For => parse_for(parser),
        TokenKind::Return => parse_return(parser),
        TokenKind::Continue => {
            parser.advance();
            Ok(Statement::Continue {
                line: parser.previous.line,
            })
        }
        TokenKind::Break => {
            parser.advance();
            Ok(Statement::Break {
                line: parser.previous.line,
            })
        }
        TokenKind::LeftBrace => parse_block(parser),
        TokenKind::Eof => Err(parser.raise(CompileErrorKind::MissingStatement)),
        _ => {
            let expr = parser.parse_expression()?;
            Ok(Statement::Expression {
                line: expr.line(),
                expr,
                pop: true,
            })
        }
    }
}

fn parse_block(parser: &mut Parser) -> ParseResult<Statement> {
    parser.consume(TokenKind::LeftBrace, "'{'")?;
    let line = parser.previous.line;
    let mut statements = Vec::new();
    loop {
        parser.ignore_new_lines();
        while parser.matches(TokenKind::Semicolon) {
            parser.ignore_new_lines();
        }
        if parser.check(TokenKind::RightBrace) || parser.is_at_end() {
            break;
        }
        statements.push(parse_declaration(parser)?);
    }
    parser.consume(TokenKind::RightBrace, "'}' after block")?;
    Ok(Statement::Block { line, statements })
}

fn parse_var_declaration(parser: &mut Parser) -> ParseResult<Statement> {
    let constant = parser.check(TokenKind::Const);
    parser.advance();
    let line = parser.previous.line;
    parser.consume(TokenKind::Identifier, "variable name")?;
    let name = parser.previous.lexeme.clone();
    let init = if parser.matches(TokenKind::Equal) {
        Some(parser.parse_expression()?)
    } else {
        None
    };
    Ok(Statement::Var {
        line,
        name,
        constant,
        init,
    })
}

fn parse_if(parser: &mut Parser) -> ParseResult<Statement> {
    parser.advance();
    let line = parser.previous.line;
    parser.ignore_new_lines();
    parser.consume(TokenKind::LeftParen, "'(' after 'if'")?;
    parser.ignore_new_lines();
    let condition = parser.parse_expression()?;
    parser.ignore_new_lines();
    parser.consume(TokenKind::RightParen, "')' after if condition")?;
    let then_branch = parse_statement(parser)?;

    let mut elseif_conditions = Vec::new();
    let mut elseif_branches = Vec::new();
    let mut else_branch = None;
    loop {
        let newlines_start = parser.check(TokenKind::NewLine);
        // An else may sit on the next line; look past the newlines without
        // committing to them.
        if newlines_start {
            let mut n = 0;
            while parser.peek_ahead(n).kind == TokenKind::NewLine {
                n += 1;
            }
            if parser.peek_ahead(n).kind != TokenKind::Else {
                break;
            }
            parser.ignore_new_lines();
        }
        if !parser.matches(TokenKind::Else) {
            break;
        }
        parser.ignore_new_lines();
        if parser.matches(TokenKind::If) {
            parser.ignore_new_lines();
            parser.consume(TokenKind::LeftParen, "'(' after 'else if'")?;
            parser.ignore_new_lines();
            elseif_conditions.push(parser.parse_expression()?);
            parser.ignore_new_lines();
            parser.consume(TokenKind::RightParen, "')' after else if condition")?;
            elseif_branches.push(parse_statement(parser)?);
            continue;
        }
        if else_branch.is_some() {
            return Err(parser.raise(CompileErrorKind::MultipleElseBranches));
        }
        else_branch = Some(Box::new(parse_statement(parser)?));
    }

    Ok(Statement::If {
        line,
        condition,
        then_branch: Box::new(then_branch),
        elseif_conditions,
        elseif_branches,
        else_branch,
    })
}

fn parse_while(parser: &mut Parser) -> ParseResult<Statement> {
    parser.advance();
    let line = parser.previous.line;
    parser.consume(TokenKind::LeftParen, "'(' after 'while'")?;
    parser.ignore_new_lines();
    let condition = parser.parse_expression()?;
    parser.ignore_new_lines();
    parser.consume(TokenKind::RightParen, "')' after while condition")?;
    let body = parse_statement(parser)?;
    Ok(Statement::While {
        line,
        condition,
        body: Box::new(body),
    })
}

fn parse_for(parser: &mut Parser) -> ParseResult<Statement> {
    parser.advance();
    let line = parser.previous.line;
    parser.consume(TokenKind::LeftParen, "'(' after 'for'")?;
    parser.ignore_new_lines();

    let mut init = None;
    let mut var = None;
    let mut condition = None;
    let mut increment = None;
    let mut c_style = true;

    if parser.matches(TokenKind::Var) {
        let var_line = parser.previous.line;
        parser.consume(TokenKind::Identifier, "variable name after 'var'")?;
        let name = parser.previous.lexeme.clone();
        if parser.matches(TokenKind::In) {
            // for (var x in sequence)
            c_style = false;
            condition = Some(parser.parse_expression()?);
            var = Some(Box::new(Statement::Var {
                line: var_line,
                name,
                constant: false,
                init: None,
            }));
        } else {
            let value = if parser.matches(TokenKind::Equal) {
                Some(parser.parse_expression()?)
            } else {
                None
            };
            var = Some(Box::new(Statement::Var {
                line: var_line,
                name,
                constant: false,
                init: value,
            }));
            parser.consume(TokenKind::Semicolon, "';' after for-loop initializer")?;
        }
    } else if !parser.matches(TokenKind::Semicolon) {
        init = Some(parser.parse_expression()?);
        if parser.check(TokenKind::In) {
            return Err(parser.raise(CompileErrorKind::VarMissingInForIn));
        }
        parser.consume(TokenKind::Semicolon, "';' after for-loop initializer")?;
    }

    if c_style {
        parser.ignore_new_lines();
        if !parser.check(TokenKind::Semicolon) {
            condition = Some(parser.parse_expression()?);
        }
        parser.consume(TokenKind::Semicolon, "';' after for-loop condition")?;
        parser.ignore_new_lines();
        if !parser.check(TokenKind::RightParen) {
            increment = Some(parser.parse_expression()?);
        }
    }

    parser.ignore_new_lines();
    parser.consume(TokenKind::RightParen, "')' after for clauses")?;
    parser.ignore_new_lines();
    let body = parse_statement(parser)?;

    Ok(Statement::For {
        line,
        init,
        var,
        condition,
        increment,
        body: Some(Box::new(body)),
        c_style,
    })
}

fn parse_return(parser: &mut Parser) -> ParseResult<Statement> {
    parser.advance();
    let line = parser.previous.line;
    let value = if parser.check(TokenKind::NewLine)
        || parser.check(TokenKind::Semicolon)
        || parser.check(TokenKind::RightBrace)
        || parser.is_at_end()
    {
        None
    } else {
        Some(parser.parse_expression()?)
    };
    Ok(Statement::Return { line, value })
}

fn parse_function(parser: &mut Parser, exported: bool) -> ParseResult<Statement> {
    let line = parser.previous.line;
    parser.consume(TokenKind::Identifier, "function name")?;
    let name = parser.previous.lexeme.clone();
    parser.consume(TokenKind::LeftParen, "'(' after function name")?;
    let params = parse_parameters(parser)?;
    parser.consume(TokenKind::RightParen, "')' after function parameters")?;
    if params.len() > 255 {
        return Err(parser.raise(CompileErrorKind::TooManyFunctionArgs {
            count: params.len(),
        }));
    }
    parser.ignore_new_lines();
    let body = parse_statement(parser)?;
    Ok(Statement::Function {
        line,
        name,
        params,
        body: Box::new(body),
        exported,
    })
}

fn parse_class(parser: &mut Parser) -> ParseResult<Statement> {
    parser.advance();
    let line = parser.previous.line;
    parser.consume(TokenKind::Identifier, "class name")?;
    let name = parser.previous.lexeme.clone();

    let parent = if parser.matches(TokenKind::Colon) {
        parser.ignore_new_lines();
        parser.consume(TokenKind::Identifier, "parent class name after ':'")?;
        let parent_name = parser.previous.lexeme.clone();
        if parent_name == name {
            return Err(parser.raise_at_previous(CompileErrorKind::SelfInheritedClass));
        }
        Some(parent_name)
    } else {
        None
    };

    parser.ignore_new_lines();
    parser.consume(TokenKind::LeftBrace, "'{' before class body")?;
    let mut members = Vec::new();
    let mut seen_method = false;
    loop {
        parser.ignore_new_lines();
        if parser.check(TokenKind::RightBrace) || parser.is_at_end() {
            break;
        }
        let member = parse_class_member(parser, &mut seen_method)?;
        members.push(member);
    }
    parser.consume(TokenKind::RightBrace, "'}' after class body")?;

    Ok(Statement::Class {
        line,
        name,
        parent,
        members,
    })
}

fn parse_class_member(parser: &mut Parser, seen_method: &mut bool) -> ParseResult<Statement> {
    let is_static = parser.matches(TokenKind::Static);
    if is_static {
        parser.ignore_new_lines();
    }

    if parser.check(TokenKind::Var) || parser.check(TokenKind::Const) {
        // Static field with an initializer. Instance state lives in the
        // instance's field table, so plain `var` members are static-only.
        if !is_static {
            return Err(parser.raise(CompileErrorKind::ExpectationUnmet {
                expected: "'static' before a class field".to_string(),
                got: parser.current.lexeme.clone(),
            }));
        }
        if *seen_method {
            return Err(parser.raise(CompileErrorKind::StaticFieldsAfterMethods));
        }
        return parse_var_declaration(parser);
    }

    if parser.matches(TokenKind::Operator) {
        if is_static {
            return Err(parser.raise_at_previous(CompileErrorKind::StaticOperator));
        }
        parser.ignore_new_lines();
        let line = parser.current.line;
        let name = parse_operator_name(parser)?;
        *seen_method = true;
        return parse_method_rest(parser, line, name, false);
    }

    parser.consume(TokenKind::Identifier, "method or field name")?;
    let line = parser.previous.line;
    let name = parser.previous.lexeme.clone();

    if parser.check(TokenKind::LeftBrace) {
        // Field accessor block: name { get { ... } set { ... } }
        return parse_field(parser, line, name, is_static);
    }

    if name == "constructor" && is_static {
        return Err(parser.raise_at_previous(CompileErrorKind::StaticConstructor));
    }
    *seen_method = true;
    parse_method_rest(parser, line, name, is_static)
}

fn parse_operator_name(parser: &mut Parser) -> ParseResult<String> {
    use TokenKind::*;
    let kind = parser.current.kind;
    match kind {
        Plus | Minus | Star | StarStar | Slash | Sharp | Percent | Bar | Amp | Caret | Less
        | LessEqual | Greater | GreaterEqual | EqualEqual | BangEqual | LessLess | GreaterGreater
        | Bang | Tilde => {
            parser.advance();
            Ok(parser.previous.lexeme.clone())
        }
        LeftBracket => {
            parser.advance();
            parser.consume(RightBracket, "']' after '[' operator")?;
            Ok("[]".to_string())
        }
        _ => Err(parser.raise(CompileErrorKind::ExpectationUnmet {
            expected: "operator name".to_string(),
            got: parser.current.lexeme.clone(),
        })),
    }
}

fn parse_method_rest(
    parser: &mut Parser,
    line: usize,
    name: String,
    is_static: bool,
) -> ParseResult<Statement> {
    parser.consume(TokenKind::LeftParen, "'(' after method name")?;
    let params = parse_parameters(parser)?;
    parser.consume(TokenKind::RightParen, "')' after method parameters")?;
    if params.len() > 255 {
        return Err(parser.raise(CompileErrorKind::TooManyFunctionArgs {
            count: params.len(),
        }));
    }
    parser.ignore_new_lines();
    let body = parse_statement(parser)?;
    Ok(Statement::Method {
        line,
        name,
        params,
        body: Box::new(body),
        is_static,
    })
}

fn parse_field(
    parser: &mut Parser,
    line: usize,
    name: String,
    is_static: bool,
) -> ParseResult<Statement> {
    parser.consume(TokenKind::LeftBrace, "'{' before field body")?;
    let mut getter = None;
    let mut setter = None;
    parser.ignore_new_lines();
    if parser.matches(TokenKind::Get) {
        parser.ignore_new_lines();
        getter = Some(Box::new(parse_statement(parser)?));
        parser.ignore_new_lines();
    }
    if parser.matches(TokenKind::Set) {
        parser.ignore_new_lines();
        setter = Some(Box::new(parse_statement(parser)?));
        parser.ignore_new_lines();
    }
    if getter.is_none() && setter.is_none() {
        return Err(parser.raise(CompileErrorKind::NoGetterAndSetter));
    }
    parser.consume(TokenKind::RightBrace, "'}' after field body")?;
    Ok(Statement::Field {
        line,
        name,
        getter,
        setter,
        is_static,
    })
}
