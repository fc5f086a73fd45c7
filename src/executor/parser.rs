//! Tokenizer and recursive-descent parser for geometry scripts.
//!
//! The accepted language is a small, Python-shaped subset: assignments
//! (plain, augmented, attribute, index and tuple targets), expression
//! statements, `for` loops, `pass`, and expressions over numbers,
//! strings, f-strings, lists, tuples, attribute access, indexing and calls.
//! Anything else is a syntax error, which keeps the interpreter's surface
//! an allow-list.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Syntax error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Debug, Clone, PartialEq)]
pub enum FPart {
    Literal(String),
    Expr {
        source: String,
        spec: Option<String>,
        line: usize,
        column: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Number(f64),
    Str(String),
    FStr(Vec<FPart>),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
}

const OPERATORS: [&str; 31] = [
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "(", ")", "[",
    "]", "{", "}", ",", ".", ":", "=", "+", "-", "*", "/", "%", "<", ">", ";",
];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
    tokens: Vec<Token>,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        depth: 0,
        indents: vec![0],
        at_line_start: true,
        tokens: Vec::new(),
    }
    .run()
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, tok: Tok, line: usize, column: usize) {
        self.tokens.push(Token { tok, line, column });
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line, self.column, message)
    }

    fn last_is_newline(&self) -> bool {
        matches!(self.tokens.last().map(|t| &t.tok), None | Some(Tok::Newline))
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.depth == 0 {
                if !self.indentation()? {
                    continue;
                }
            }

            let Some(c) = self.peek() else { break };
            let (line, column) = (self.line, self.column);
            match c {
                ' ' | '\t' | '\r' | '\u{feff}' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    if self.depth == 0 {
                        if !self.last_is_newline() {
                            self.push(Tok::Newline, line, column);
                        }
                        self.at_line_start = true;
                    }
                }
                '"' | '\'' => {
                    let text = self.string(c)?;
                    self.push(Tok::Str(text), line, column);
                }
                c if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) => {
                    let value = self.number()?;
                    self.push(Tok::Number(value), line, column);
                }
                c if c.is_alphabetic() || c == '_' => {
                    let mut name = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_alphanumeric() || c == '_' {
                            name.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }

                    let quote = self.peek().filter(|q| *q == '"' || *q == '\'');
                    match (name.to_ascii_lowercase().as_str(), quote) {
                        ("f", Some(q)) => {
                            let raw = self.string(q)?;
                            let parts = split_fstring(&raw, line, column)?;
                            self.push(Tok::FStr(parts), line, column);
                        }
                        ("r", Some(q)) => {
                            let raw = self.raw_string(q)?;
                            self.push(Tok::Str(raw), line, column);
                        }
                        (_, Some(_)) => {
                            return Err(SyntaxError::new(line, column, format!("unsupported string prefix '{}'", name)))
                        }
                        _ => self.push(Tok::Name(name), line, column),
                    }
                }
                _ => {
                    let rest: String = self.chars[self.pos..self.chars.len().min(self.pos + 3)].iter().collect();
                    let op = OPERATORS
                        .iter()
                        .find(|op| rest.starts_with(*op))
                        .copied()
                        .ok_or_else(|| self.error(format!("invalid character '{}'", c)))?;
                    for _ in 0..op.chars().count() {
                        self.bump();
                    }
                    match op {
                        "(" | "[" | "{" => self.depth += 1,
                        ")" | "]" | "}" => {
                            if self.depth == 0 {
                                return Err(SyntaxError::new(line, column, format!("unmatched '{}'", op)));
                            }
                            self.depth -= 1;
                        }
                        _ => {}
                    }
                    if op == ";" {
                        if !self.last_is_newline() {
                            self.push(Tok::Newline, line, column);
                        }
                    } else {
                        self.push(Tok::Op(op), line, column);
                    }
                }
            }
        }

        if self.depth > 0 {
            return Err(self.error("unexpected end of input inside brackets"));
        }
        let (line, column) = (self.line, self.column);
        if !self.last_is_newline() {
            self.push(Tok::Newline, line, column);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, line, column);
        }
        self.push(Tok::Eof, line, column);
        Ok(self.tokens)
    }

    /// Measure leading whitespace. Returns false when the line turned out
    /// blank or comment-only and was consumed.
    fn indentation(&mut self) -> Result<bool, SyntaxError> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width += 4,
                '\r' | '\u{feff}' => {}
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            None => return Ok(false),
            Some('\n') => {
                self.bump();
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(false);
            }
            _ => {}
        }

        self.at_line_start = false;
        let current = self.indents.last().copied().unwrap_or(0);
        let (line, column) = (self.line, self.column);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent, line, column);
        } else if width < current {
            while width < self.indents.last().copied().unwrap_or(0) {
                self.indents.pop();
                self.push(Tok::Dedent, line, column);
            }
            if width != self.indents.last().copied().unwrap_or(0) {
                return Err(SyntaxError::new(
                    line,
                    column,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(true)
    }

    fn number(&mut self) -> Result<f64, SyntaxError> {
        let (line, column) = (self.line, self.column);
        let mut literal = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                literal.push(c);
            } else if c == '_' {
                // digit separator
            } else if (c == 'e' || c == 'E')
                && (self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+' | '-'))
                        && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                literal.push(c);
                self.bump();
                if let Some(sign) = self.peek().filter(|s| *s == '+' || *s == '-') {
                    literal.push(sign);
                    self.bump();
                }
                continue;
            } else {
                break;
            }
            self.bump();
        }

        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(SyntaxError::new(line, column, "invalid number literal"));
        }
        literal
            .parse()
            .map_err(|_| SyntaxError::new(line, column, format!("invalid number literal '{}'", literal)))
    }

    fn is_triple(&self, quote: char) -> bool {
        self.peek() == Some(quote) && self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote)
    }

    fn string(&mut self, quote: char) -> Result<String, SyntaxError> {
        let (line, column) = (self.line, self.column);
        let triple = self.is_triple(quote);
        for _ in 0..if triple { 3 } else { 1 } {
            self.bump();
        }

        let mut text = String::new();
        loop {
            if triple && self.is_triple(quote) {
                for _ in 0..3 {
                    self.bump();
                }
                return Ok(text);
            }
            match self.bump() {
                None => return Err(SyntaxError::new(line, column, "unterminated string literal")),
                Some('\n') if !triple => {
                    return Err(SyntaxError::new(line, column, "unterminated string literal"))
                }
                Some(c) if c == quote && !triple => return Ok(text),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('0') => text.push('\0'),
                    Some('\\') => text.push('\\'),
                    Some('\'') => text.push('\''),
                    Some('"') => text.push('"'),
                    Some('\n') => {}
                    Some(other) => {
                        text.push('\\');
                        text.push(other);
                    }
                    None => return Err(SyntaxError::new(line, column, "unterminated string literal")),
                },
                Some(c) => text.push(c),
            }
        }
    }

    fn raw_string(&mut self, quote: char) -> Result<String, SyntaxError> {
        let (line, column) = (self.line, self.column);
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(SyntaxError::new(line, column, "unterminated string literal")),
                Some(c) if c == quote => return Ok(text),
                Some(c) => text.push(c),
            }
        }
    }
}

fn split_fstring(raw: &str, line: usize, column: usize) -> Result<Vec<FPart>, SyntaxError> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '{' => {
                let start = i + 1;
                let mut depth = 0;
                let mut end = None;
                for (j, c) in chars.iter().enumerate().skip(start) {
                    match c {
                        '(' | '[' => depth += 1,
                        ')' | ']' => depth -= 1,
                        '}' if depth == 0 => {
                            end = Some(j);
                            break;
                        }
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| SyntaxError::new(line, column, "f-string: expecting '}'"))?;
                let inner: String = chars[start..end].iter().collect();

                let (source, spec) = match inner.rfind(':') {
                    Some(k) if !inner[..k].contains('[') || inner[..k].matches('[').count() == inner[..k].matches(']').count() => {
                        (inner[..k].to_string(), Some(inner[k + 1..].to_string()))
                    }
                    _ => (inner.clone(), None),
                };
                if source.trim().is_empty() {
                    return Err(SyntaxError::new(line, column, "f-string: empty expression not allowed"));
                }
                if !literal.is_empty() {
                    parts.push(FPart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(FPart::Expr {
                    source: source.trim().to_string(),
                    spec,
                    line,
                    column,
                });
                i = end + 1;
            }
            '}' => return Err(SyntaxError::new(line, column, "f-string: single '}' is not allowed")),
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(FPart::Literal(literal));
    }
    Ok(parts)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    FStr(Vec<FStrPart>),
    Bool(bool),
    None,
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Attribute(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStrPart {
    Literal(String),
    Value { expr: Expr, spec: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Attribute(Expr, String),
    Index(Expr, Expr),
    Tuple(Vec<Target>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Assign(Target, Expr),
    AugAssign(Target, BinOp, Expr),
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Pass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// Statements the language recognises but deliberately does not run
const UNSUPPORTED_KEYWORDS: [&str; 20] = [
    "if", "elif", "else", "while", "def", "class", "return", "import", "from", "with", "try",
    "except", "finally", "raise", "lambda", "global", "nonlocal", "del", "yield", "assert",
];

/// Nested expressions and loop bodies a script may open
const MAX_NESTING: usize = 100;

pub fn parse(source: &str) -> Result<Program, SyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

fn parse_embedded_expression(source: &str, line: usize, column: usize, depth: usize) -> Result<Expr, SyntaxError> {
    let relocate = |mut e: SyntaxError| {
        e.line = line;
        e.column = column;
        e
    };
    let tokens = tokenize(source).map_err(relocate)?;
    let mut parser = Parser { tokens, pos: 0, depth };
    let expr = parser.expression().map_err(relocate)?;
    if !matches!(parser.peek().tok, Tok::Newline | Tok::Eof) {
        return Err(SyntaxError::new(line, column, "f-string: invalid expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, tok: &Tok) -> bool {
        &self.peek().tok == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(&self.peek().tok, Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().tok, Tok::Name(n) if n == keyword)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Run one recursive production, failing past `MAX_NESTING` levels
    fn nested<T>(&mut self, production: impl FnOnce(&mut Self) -> Result<T, SyntaxError>) -> Result<T, SyntaxError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here(format!("nesting exceeds {} levels", MAX_NESTING)));
        }
        self.depth += 1;
        let result = production(self);
        self.depth -= 1;
        result
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.peek();
        SyntaxError::new(token.line, token.column, message)
    }

    fn expect_op(&mut self, op: &str) -> Result<(), SyntaxError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected '{}'", op)))
        }
    }

    fn end_of_statement(&mut self) -> Result<(), SyntaxError> {
        match self.peek().tok {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof | Tok::Dedent => Ok(()),
            _ => Err(self.error_here("invalid syntax")),
        }
    }

    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        let token = self.peek().clone();
        let line = token.line;

        if let Tok::Name(name) = &token.tok {
            if name == "for" {
                return self.nested(Self::for_statement);
            }
            if name == "pass" {
                self.advance();
                self.end_of_statement()?;
                return Ok(Stmt {
                    kind: StmtKind::Pass,
                    line,
                });
            }
            if UNSUPPORTED_KEYWORDS.contains(&name.as_str()) {
                return Err(SyntaxError::new(
                    token.line,
                    token.column,
                    format!("'{}' statements are not supported", name),
                ));
            }
        }
        if token.tok == Tok::Indent {
            return Err(SyntaxError::new(token.line, token.column, "unexpected indent"));
        }

        let first = self.expression_list()?;
        let kind = if self.eat_op("=") {
            let mut targets = vec![self.to_target(first, &token)?];
            let mut value = self.expression_list()?;
            while self.eat_op("=") {
                targets.push(self.to_target(value, &token)?);
                value = self.expression_list()?;
            }
            if targets.len() > 1 {
                return Err(SyntaxError::new(
                    token.line,
                    token.column,
                    "chained assignment is not supported",
                ));
            }
            StmtKind::Assign(targets.remove(0), value)
        } else if let Some(op) = self.augmented_op() {
            let target = self.to_target(first, &token)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(SyntaxError::new(
                    token.line,
                    token.column,
                    "illegal expression for augmented assignment",
                ));
            }
            let value = self.expression()?;
            StmtKind::AugAssign(target, op, value)
        } else {
            StmtKind::Expr(first)
        };

        self.end_of_statement()?;
        Ok(Stmt { kind, line })
    }

    fn augmented_op(&mut self) -> Option<BinOp> {
        let op = match &self.peek().tok {
            Tok::Op("+=") => BinOp::Add,
            Tok::Op("-=") => BinOp::Sub,
            Tok::Op("*=") => BinOp::Mul,
            Tok::Op("/=") => BinOp::Div,
            Tok::Op("//=") => BinOp::FloorDiv,
            Tok::Op("%=") => BinOp::Mod,
            Tok::Op("**=") => BinOp::Pow,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn to_target(&self, expr: Expr, at: &Token) -> Result<Target, SyntaxError> {
        match expr {
            Expr::Name(name) => {
                if matches!(name.as_str(), "True" | "False" | "None") {
                    Err(SyntaxError::new(at.line, at.column, format!("cannot assign to {}", name)))
                } else {
                    Ok(Target::Name(name))
                }
            }
            Expr::Attribute(object, attr) => Ok(Target::Attribute(*object, attr)),
            Expr::Index(object, index) => Ok(Target::Index(*object, *index)),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|item| self.to_target(item, at))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(SyntaxError::new(at.line, at.column, "cannot assign to expression")),
        }
    }

    fn for_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let for_token = self.advance();

        let mut names = Vec::new();
        loop {
            match self.advance() {
                Token {
                    tok: Tok::Name(name), ..
                } if name != "in" => names.push(Target::Name(name)),
                other => {
                    return Err(SyntaxError::new(other.line, other.column, "expected loop variable"))
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        let target = if names.len() == 1 {
            names.remove(0)
        } else {
            Target::Tuple(names)
        };

        if !self.at_keyword("in") {
            return Err(self.error_here("expected 'in'"));
        }
        self.advance();
        let iter = self.expression_list()?;
        self.expect_op(":")?;

        let body = self.block()?;
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            line: for_token.line,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        if !self.at(&Tok::Newline) {
            // single-line body: `for i in range(3): x = i`
            return Ok(vec![self.statement()?]);
        }
        self.advance();
        if !self.at(&Tok::Indent) {
            return Err(self.error_here("expected an indented block"));
        }
        self.advance();

        let mut body = Vec::new();
        while !self.at(&Tok::Dedent) && !self.at(&Tok::Eof) {
            body.push(self.statement()?);
        }
        if self.at(&Tok::Dedent) {
            self.advance();
        }
        Ok(body)
    }

    /// `a, b` without brackets becomes a tuple
    fn expression_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.expression()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.starts_expression() {
                items.push(self.expression()?);
            } else {
                break;
            }
        }
        Ok(Expr::Tuple(items))
    }

    fn starts_expression(&self) -> bool {
        match &self.peek().tok {
            Tok::Name(n) => !matches!(n.as_str(), "in" | "for"),
            Tok::Number(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "-" | "+"),
            _ => false,
        }
    }

    pub fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and_expr()?;
        while self.at_keyword("or") {
            self.advance();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.not_expr()?;
        while self.at_keyword("and") {
            self.advance();
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, SyntaxError> {
        if self.at_keyword("not") {
            self.advance();
            return Ok(Expr::Not(Box::new(self.nested(Self::not_expr)?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.arith()?;
        let op = match &self.peek().tok {
            Tok::Op("==") => CmpOp::Eq,
            Tok::Op("!=") => CmpOp::Ne,
            Tok::Op("<") => CmpOp::Lt,
            Tok::Op("<=") => CmpOp::Le,
            Tok::Op(">") => CmpOp::Gt,
            Tok::Op(">=") => CmpOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.arith()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.term()?;
        loop {
            let op = match &self.peek().tok {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.unary()?;
        loop {
            let op = match &self.peek().tok {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        self.nested(Self::signed)
    }

    fn signed(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_op("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat_op("+") {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            // right-associative and binds tighter than unary minus on the left
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op(".") {
                match self.advance() {
                    Token {
                        tok: Tok::Name(attr), ..
                    } => expr = Expr::Attribute(Box::new(expr), attr),
                    other => {
                        return Err(SyntaxError::new(other.line, other.column, "expected attribute name"))
                    }
                }
            } else if self.eat_op("(") {
                let (args, kwargs) = self.call_arguments()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                if self.at_op(":") {
                    return Err(self.error_here("slicing is not supported"));
                }
                let index = self.expression()?;
                if self.at_op(":") {
                    return Err(self.error_here("slicing is not supported"));
                }
                self.expect_op("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SyntaxError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        while !self.at_op(")") {
            if self.at_op("*") || self.at_op("**") {
                return Err(self.error_here("argument unpacking is not supported"));
            }

            let is_keyword = matches!(&self.peek().tok, Tok::Name(_))
                && matches!(self.tokens.get(self.pos + 1).map(|t| &t.tok), Some(Tok::Op("=")));
            if is_keyword {
                let Tok::Name(name) = self.advance().tok else {
                    unreachable!("checked above")
                };
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error_here(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error_here("positional argument follows keyword argument"));
                }
                args.push(self.expression()?);
            }

            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn sequence(&mut self, close: &str) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        while !self.at_op(close) {
            items.push(self.expression()?);
            if self.at_keyword("for") {
                return Err(self.error_here("comprehensions are not supported"));
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(close)?;
        Ok(items)
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.advance();
        match token.tok {
            Tok::Number(n) => Ok(Expr::Number(n)),
            Tok::Str(mut s) => {
                // adjacent literals concatenate
                while let Tok::Str(next) = &self.peek().tok {
                    s.push_str(next);
                    self.advance();
                }
                Ok(Expr::Str(s))
            }
            Tok::FStr(parts) => {
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    out.push(match part {
                        FPart::Literal(text) => FStrPart::Literal(text),
                        FPart::Expr {
                            source,
                            spec,
                            line,
                            column,
                        } => FStrPart::Value {
                            expr: parse_embedded_expression(&source, line, column, self.depth)?,
                            spec,
                        },
                    });
                }
                Ok(Expr::FStr(out))
            }
            Tok::Name(name) => match name.as_str() {
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "None" => Ok(Expr::None),
                "lambda" | "yield" | "await" => Err(SyntaxError::new(
                    token.line,
                    token.column,
                    format!("'{}' is not supported", name),
                )),
                "and" | "or" | "in" | "for" | "if" | "else" | "import" | "from" => Err(SyntaxError::new(
                    token.line,
                    token.column,
                    "invalid syntax",
                )),
                _ => Ok(Expr::Name(name)),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expression()?;
                if self.at_keyword("for") {
                    return Err(self.error_here("generator expressions are not supported"));
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                self.expect_op(",")?;
                let mut items = vec![first];
                items.extend(self.sequence(")")?);
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => Ok(Expr::List(self.sequence("]")?)),
            Tok::Op("{") => Err(SyntaxError::new(
                token.line,
                token.column,
                "dict and set literals are not supported",
            )),
            Tok::Indent => Err(SyntaxError::new(token.line, token.column, "unexpected indent")),
            Tok::Newline | Tok::Eof | Tok::Dedent => Err(SyntaxError::new(
                token.line,
                token.column,
                "unexpected end of statement",
            )),
            Tok::Op(op) => Err(SyntaxError::new(
                token.line,
                token.column,
                format!("invalid syntax near '{}'", op),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_indentation() {
        let tokens = tokenize("for i in range(2):\n    x = i\ny = 1\n").unwrap();
        let kinds: Vec<&Tok> = tokens.iter().map(|t| &t.tok).collect();

        assert!(kinds.contains(&&Tok::Indent));
        assert!(kinds.contains(&&Tok::Dedent));
        assert_eq!(kinds.last(), Some(&&Tok::Eof));
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let program = parse("# header\n\nx = 1  # trailing\n\n   # indented comment\ny = 2").unwrap();
        assert_eq!(program.body.len(), 2);
    }

    #[test]
    fn test_brackets_continue_lines() {
        let program = parse("v = App.Vector(\n    1,\n    2,\n    3,\n)\n").unwrap();
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_attribute_assignment_target() {
        let program = parse("box.Placement.Base = App.Vector(1, 2, 3)").unwrap();
        match &program.body[0].kind {
            StmtKind::Assign(Target::Attribute(object, attr), _) => {
                assert_eq!(attr, "Base");
                assert!(matches!(object, Expr::Attribute(_, a) if a == "Placement"));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_keyword_arguments_and_precedence() {
        let program = parse("r = max(1, 2 + 3 * 4 ** 2, key=None)").unwrap();
        let StmtKind::Assign(_, Expr::Call { args, kwargs, .. }) = &program.body[0].kind else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 2);
        assert_eq!(kwargs[0].0, "key");
    }

    #[test]
    fn test_fstring_parts() {
        let program = parse("label = f\"Bolt_{i + 1:.1f} {{x}}\"").unwrap();
        let StmtKind::Assign(_, Expr::FStr(parts)) = &program.body[0].kind else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[1], FStrPart::Value { spec: Some(s), .. } if s == ".1f"));
        assert_eq!(parts[2], FStrPart::Literal(" {x}".into()));
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse("x = 1\ny = (2 +\n").unwrap_err();
        assert_eq!(err.line, 3);

        let err = parse("x = 1\n  y = 2").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unexpected indent"));

        let err = parse("a = 1\nb = = 2").unwrap_err();
        assert_eq!((err.line, err.column), (2, 5));
        assert!(err.to_string().starts_with("Syntax error at line 2, column 5"));
    }

    #[test]
    fn test_nesting_limit() {
        let err = parse(&format!("x = {}1", "-".repeat(4900))).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("nesting exceeds 100 levels"));

        assert!(parse(&format!("x = {}1", "not ".repeat(150))).is_err());
        assert!(parse(&format!("x = {}1{}", "[".repeat(150), "]".repeat(150))).is_err());
        assert!(parse(&format!("{}pass", "for i in a: ".repeat(150))).is_err());

        assert!(parse(&format!("x = {}1{}", "(".repeat(40), ")".repeat(40))).is_ok());
        assert!(parse("y = 2 ** 3 ** 2\nz = -(-(-1))").is_ok());
    }

    #[test]
    fn test_unsupported_statements_rejected() {
        for source in ["def f():\n    pass", "while True:\n    pass", "if x:\n    y = 1", "import os"] {
            let err = parse(source).unwrap_err();
            assert!(err.message.contains("not supported"), "{}: {}", source, err);
        }
        assert!(parse("d = {'a': 1}").is_err());
        assert!(parse("xs = [i for i in range(3)]").is_err());
    }

    #[test]
    fn test_tuple_targets_and_single_line_for() {
        let program = parse("a, b = 1, 2\nfor x, y in [[1, 2]]: total = x + y").unwrap();
        assert!(matches!(&program.body[0].kind, StmtKind::Assign(Target::Tuple(t), Expr::Tuple(_)) if t.len() == 2));
        assert!(matches!(&program.body[1].kind, StmtKind::For { target: Target::Tuple(_), .. }));
    }
}
