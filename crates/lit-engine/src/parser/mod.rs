//! Recursive-descent parser with a Pratt precedence table.
//!
//! The parser owns the scanner and pulls tokens on demand, with an unbounded
//! (but cached) lookahead queue used only for lambda disambiguation. Errors
//! never abort parsing: the offending statement is skipped to the next
//! statement boundary and collection continues, so one run reports every
//! diagnostic in the file.

pub mod ast;
pub mod expr;
pub mod preprocessor;
pub mod scanner;
pub mod stmt;
pub mod token;

use std::collections::VecDeque;

use once_cell::sync::Lazy;

use crate::errors::{CompileError, CompileErrorKind};
use ast::{Expression, Statement};
use scanner::Scanner;
use token::{Token, TokenKind, TokenValue, TOKEN_KIND_COUNT};

/// Binding strength, low to high. The parser loops while the next infix
/// operator binds at least as tightly as the requested level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precedence {
    None,
    Assignment, // =
    Or,         // ||
    And,        // &&
    BOr,        // | ^
    BAnd,       // &
    Shift,      // << >>
    Equality,   // == !=
    Comparison, // < > <= >=
    Compound,   // += -= *= /= ++ --
    Term,       // + -
    Factor,     // * / % #
    Is,         // is
    Range,      // ..
    Unary,      // ! - ~
    Null,       // ??
    Call,       // . () []
    Primary,
}

impl Precedence {
    pub fn one_higher(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => BOr,
            BOr => BAnd,
            BAnd => Shift,
            Shift => Equality,
            Equality => Comparison,
            Comparison => Compound,
            Compound => Term,
            Term => Factor,
            Factor => Is,
            Is => Range,
            Range => Unary,
            Unary => Null,
            Null => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

/// Signals that the current statement failed to parse; the statement loop
/// synchronizes and keeps going. The diagnostic itself has already been
/// recorded by the raise site.
#[derive(Debug)]
pub struct ParseInterrupt;

pub type ParseResult<T> = Result<T, ParseInterrupt>;

type PrefixFn = fn(&mut Parser, bool) -> ParseResult<Expression>;
type InfixFn = fn(&mut Parser, Expression, bool) -> ParseResult<Expression>;

#[derive(Clone, Copy)]
pub struct ParseRule {
    pub prefix: Option<PrefixFn>,
    pub infix: Option<InfixFn>,
    pub precedence: Precedence,
}

const EMPTY_RULE: ParseRule = ParseRule {
    prefix: None,
    infix: None,
    precedence: Precedence::None,
};

static RULES: Lazy<[ParseRule; TOKEN_KIND_COUNT]> = Lazy::new(|| {
    use TokenKind::*;
    let mut rules = [EMPTY_RULE; TOKEN_KIND_COUNT];
    let mut set = |kind: TokenKind, prefix: Option<PrefixFn>, infix: Option<InfixFn>, prec| {
        rules[kind as usize] = ParseRule {
            prefix,
            infix,
            precedence: prec,
        };
    };
    set(
        LeftParen,
        Some(expr::grouping_or_lambda),
        Some(expr::call),
        Precedence::Call,
    );
    set(LeftBrace, Some(expr::object), None, Precedence::None);
    set(
        LeftBracket,
        Some(expr::array),
        Some(expr::subscript),
        Precedence::Call,
    );
    set(Minus, Some(expr::unary), Some(expr::binary), Precedence::Term);
    set(Plus, None, Some(expr::binary), Precedence::Term);
    set(Slash, None, Some(expr::binary), Precedence::Factor);
    set(Sharp, None, Some(expr::binary), Precedence::Factor);
    set(Star, Some(expr::dereference), Some(expr::binary), Precedence::Factor);
    set(StarStar, None, Some(expr::binary), Precedence::Factor);
    set(Percent, None, Some(expr::binary), Precedence::Factor);
    set(Is, None, Some(expr::binary), Precedence::Is);
    set(Bang, Some(expr::unary), None, Precedence::None);
    set(Tilde, Some(expr::unary), None, Precedence::None);
    set(BangEqual, None, Some(expr::binary), Precedence::Equality);
    set(EqualEqual, None, Some(expr::binary), Precedence::Equality);
    set(Greater, None, Some(expr::binary), Precedence::Comparison);
    set(GreaterEqual, None, Some(expr::binary), Precedence::Comparison);
    set(Less, None, Some(expr::binary), Precedence::Comparison);
    set(LessEqual, None, Some(expr::binary), Precedence::Comparison);
    set(GreaterGreater, None, Some(expr::binary), Precedence::Shift);
    set(LessLess, None, Some(expr::binary), Precedence::Shift);
    set(Bar, None, Some(expr::binary), Precedence::BOr);
    set(Caret, None, Some(expr::binary), Precedence::BOr);
    set(Amp, None, Some(expr::binary), Precedence::BAnd);
    set(BarBar, None, Some(expr::or), Precedence::Or);
    set(AmpAmp, None, Some(expr::and), Precedence::And);
    set(QuestionQuestion, None, Some(expr::null_filter), Precedence::Null);
    set(
        Question,
        None,
        Some(expr::ternary_or_question),
        Precedence::Assignment,
    );
    for kind in [
        PlusEqual,
        MinusEqual,
        StarEqual,
        SlashEqual,
        SharpEqual,
        PercentEqual,
        CaretEqual,
        BarEqual,
        AmpEqual,
        PlusPlus,
        MinusMinus,
    ] {
        set(kind, None, Some(expr::compound), Precedence::Compound);
    }
    set(Number, Some(expr::number), None, Precedence::None);
    set(String, Some(expr::string), None, Precedence::None);
    set(
        Interpolation,
        Some(expr::interpolation),
        None,
        Precedence::None,
    );
    set(
        Identifier,
        Some(expr::variable_expression),
        None,
        Precedence::None,
    );
    set(New, Some(expr::new_expression), None, Precedence::None);
    set(True, Some(expr::literal), None, Precedence::None);
    set(False, Some(expr::literal), None, Precedence::None);
    set(Null, Some(expr::literal), None, Precedence::None);
    set(This, Some(expr::this), None, Precedence::None);
    set(Super, Some(expr::super_), None, Precedence::None);
    set(Ref, Some(expr::reference), None, Precedence::None);
    set(Dot, None, Some(expr::dot), Precedence::Call);
    set(DotDot, None, Some(expr::range), Precedence::Range);
    set(DotDotDot, Some(expr::vararg), None, Precedence::None);
    rules
});

pub fn get_rule(kind: TokenKind) -> &'static ParseRule {
    &RULES[kind as usize]
}

pub struct Parser<'src> {
    scanner: Scanner<'src>,
    lookahead: VecDeque<Token>,
    pub previous: Token,
    pub current: Token,
    pub errors: Vec<CompileError>,
    panic_mode: bool,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> Self {
        let mut parser = Self {
            scanner: Scanner::new(source),
            lookahead: VecDeque::new(),
            previous: Token::eof(0),
            current: Token::eof(0),
            errors: Vec::new(),
            panic_mode: false,
        };
        parser.advance();
        parser
    }

    /// Parse a whole module. Returns the statement list, or the collected
    /// diagnostics when anything failed.
    pub fn parse(mut self) -> Result<Vec<Statement>, Vec<CompileError>> {
        let mut statements = Vec::new();
        self.ignore_separators();
        while !self.is_at_end() {
            match stmt::parse_declaration(&mut self) {
                Ok(statement) => statements.push(statement),
                Err(ParseInterrupt) => self.synchronize(),
            }
            self.ignore_separators();
        }
        if self.errors.is_empty() {
            Ok(statements)
        } else {
            Err(self.errors)
        }
    }

    fn next_token(&mut self) -> Token {
        if let Some(token) = self.lookahead.pop_front() {
            token
        } else {
            self.scanner.scan_token()
        }
    }

    /// Peek `n` tokens past `current` without consuming anything.
    pub fn peek_ahead(&mut self, n: usize) -> &Token {
        while self.lookahead.len() <= n {
            let token = self.scanner.scan_token();
            self.lookahead.push_back(token);
        }
        &self.lookahead[n]
    }

    pub fn advance(&mut self) {
        self.previous = std::mem::replace(&mut self.current, Token::eof(0));
        loop {
            let token = self.next_token();
            if token.kind == TokenKind::Error {
                if let TokenValue::Error(error) = &token.value {
                    self.record(error.clone());
                }
                continue;
            }
            self.current = token;
            break;
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.current.kind == TokenKind::Eof
    }

    pub fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    pub fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    pub fn ignore_new_lines(&mut self) {
        while self.check(TokenKind::NewLine) {
            self.advance();
        }
    }

    fn ignore_separators(&mut self) {
        while self.check(TokenKind::NewLine) || self.check(TokenKind::Semicolon) {
            self.advance();
        }
    }

    pub fn consume(&mut self, kind: TokenKind, expected: &str) -> ParseResult<()> {
        if self.check(kind) {
            self.advance();
            return Ok(());
        }
        Err(self.raise(CompileErrorKind::ExpectationUnmet {
            expected: expected.to_string(),
            got: self.current.lexeme.clone(),
        }))
    }

    fn record(&mut self, error: CompileError) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.errors.push(error);
    }

    /// Record a diagnostic at the current token and interrupt the statement.
    pub fn raise(&mut self, kind: CompileErrorKind) -> ParseInterrupt {
        let line = self.current.line;
        self.record(CompileError::new(kind, line));
        ParseInterrupt
    }

    /// Same, anchored at the already-consumed token.
    pub fn raise_at_previous(&mut self, kind: CompileErrorKind) -> ParseInterrupt {
        let line = self.previous.line;
        self.record(CompileError::new(kind, line));
        ParseInterrupt
    }

    /// Skip tokens to the next statement boundary and leave panic mode.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        loop {
            match self.current.kind {
                TokenKind::Eof => return,
                TokenKind::NewLine | TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::Class
                | TokenKind::Function
                | TokenKind::Var
                | TokenKind::Const
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    /// The Pratt core: parse at the given minimum binding strength.
    pub fn parse_precedence(&mut self, precedence: Precedence) -> ParseResult<Expression> {
        self.advance();
        let prefix = match get_rule(self.previous.kind).prefix {
            Some(prefix) => prefix,
            None => {
                let previous = self.previous.lexeme.clone();
                let got = self.current.lexeme.clone();
                return Err(self.raise_at_previous(CompileErrorKind::ExpectedExpression {
                    previous,
                    got,
                }));
            }
        };
        let can_assign = precedence <= Precedence::Assignment;
        let mut expression = prefix(self, can_assign)?;
        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            let infix = get_rule(self.previous.kind)
                .infix
                .expect("rule with precedence must have an infix handler");
            expression = infix(self, expression, can_assign)?;
        }
        if can_assign && self.matches(TokenKind::Equal) {
            return Err(self.raise_at_previous(CompileErrorKind::InvalidAssignmentTarget));
        }
        Ok(expression)
    }

    pub fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.ignore_new_lines();
        self.parse_precedence(Precedence::Assignment)
    }
}
