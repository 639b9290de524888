//! Boolean expression language for alert queries and assertions
//!
//! Expressions are parsed once when the configuration is resolved and
//! evaluated against a JSON scope such as `{ "response": { ... } }`:
//!
//! ```text
//! response.status >= 500 || response.time > 2000
//! has(response.body, 'token') && startsWith(response.headers['content-type'], 'application/json')
//! ```
//!
//! Missing paths evaluate to `null`. Comparing values of different kinds with
//! `<` and friends is an evaluation error.

use std::fmt;

use serde_json::{Number, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unexpected character '{found}' at position {position}")]
    UnexpectedChar { found: char, position: usize },

    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),

    #[error("unexpected token '{found}' at position {position}, expected {expected}")]
    UnexpectedToken {
        found: String,
        position: usize,
        expected: &'static str,
    },

    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEnd(&'static str),

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{function}() takes {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("cannot apply '{operator}' to {left} and {right}")]
    TypeMismatch {
        operator: &'static str,
        left: &'static str,
        right: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{n}"),
            TokenKind::Str(s) => write!(f, "'{s}'"),
            TokenKind::Ident(i) => write!(f, "{i}"),
            TokenKind::Op(op) => write!(f, "{op}"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Comma => write!(f, ","),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
}

// longest operators first
const OPERATORS: [&str; 13] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-",
];

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let position = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '.' if !chars.get(i + 1).is_some_and(char::is_ascii_digit) => TokenKind::Dot,
            ',' => TokenKind::Comma,
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExpressionError::UnterminatedString(position)),
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('n') => text.push('\n'),
                                Some('t') => text.push('\t'),
                                Some(other) => text.push(*other),
                                None => return Err(ExpressionError::UnterminatedString(position)),
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => break,
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                TokenKind::Str(text)
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while chars.get(i + 1).is_some_and(|ch| ch.is_ascii_digit() || *ch == '.') {
                    i += 1;
                }
                let text: String = chars[start..=i].iter().collect();
                let number = text.parse::<f64>().map_err(|_| ExpressionError::UnexpectedChar {
                    found: c,
                    position,
                })?;
                TokenKind::Number(number)
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while chars
                    .get(i + 1)
                    .is_some_and(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '$')
                {
                    i += 1;
                }
                TokenKind::Ident(chars[start..=i].iter().collect())
            }
            _ => {
                let rest: String = chars[i..].iter().take(3).collect();
                let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                    return Err(ExpressionError::UnexpectedChar { found: c, position });
                };
                i += op.chars().count() - 1;
                TokenKind::Op(match *op {
                    "===" => "==",
                    "!==" => "!=",
                    other => other,
                })
            }
        };

        tokens.push(Token { kind, position });
        i += 1;
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Has,
    Includes,
    StartsWith,
    EndsWith,
    Lowercase,
    Uppercase,
    Size,
}

impl Function {
    fn lookup(name: &str) -> Option<Function> {
        Some(match name {
            "has" => Function::Has,
            "includes" => Function::Includes,
            "startsWith" => Function::StartsWith,
            "endsWith" => Function::EndsWith,
            "lowercase" => Function::Lowercase,
            "uppercase" => Function::Uppercase,
            "size" => Function::Size,
            _ => return None,
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Function::Has => "has",
            Function::Includes => "includes",
            Function::StartsWith => "startsWith",
            Function::EndsWith => "endsWith",
            Function::Lowercase => "lowercase",
            Function::Uppercase => "uppercase",
            Function::Size => "size",
        }
    }

    fn arity(&self) -> usize {
        match self {
            Function::Has | Function::Includes | Function::StartsWith | Function::EndsWith => 2,
            Function::Lowercase | Function::Uppercase | Function::Size => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Variable(String),
    Member(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Negate(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(Function, Vec<Node>),
}

/// Names that may start a path.
const ROOTS: [&str; 1] = ["response"];

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.cursor).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        self.cursor += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(TokenKind::Ident(i)) if i == keyword)
    }

    fn peek_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(TokenKind::Op(o)) if *o == op)
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken {
                found: token.kind.to_string(),
                position: token.position,
                expected,
            }),
            None => Err(ExpressionError::UnexpectedEnd(expected)),
        }
    }

    fn parse(mut self) -> Result<Node, ExpressionError> {
        let node = self.or()?;
        if let Some(token) = self.advance() {
            return Err(ExpressionError::UnexpectedToken {
                found: token.kind.to_string(),
                position: token.position,
                expected: "end of expression",
            });
        }
        Ok(node)
    }

    fn or(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.and()?;
        while self.peek_op("||") || self.peek_keyword("or") {
            self.advance();
            let right = self.and()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.comparison()?;
        while self.peek_op("&&") || self.peek_keyword("and") {
            self.advance();
            let right = self.comparison()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Op("==")) => BinaryOp::Eq,
                Some(TokenKind::Op("!=")) => BinaryOp::Ne,
                Some(TokenKind::Op("<")) => BinaryOp::Lt,
                Some(TokenKind::Op("<=")) => BinaryOp::Le,
                Some(TokenKind::Op(">")) => BinaryOp::Gt,
                Some(TokenKind::Op(">=")) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.additive()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Node, ExpressionError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Op("+")) => BinaryOp::Add,
                Some(TokenKind::Op("-")) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Node, ExpressionError> {
        if self.peek_op("!") || self.peek_keyword("not") {
            self.advance();
            return Ok(Node::Not(Box::new(self.unary()?)));
        }
        if self.peek_op("-") {
            self.advance();
            return Ok(Node::Negate(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Node, ExpressionError> {
        let mut node = self.primary()?;
        loop {
            match self.peek() {
                Some(TokenKind::Dot) => {
                    self.advance();
                    match self.advance() {
                        Some(Token {
                            kind: TokenKind::Ident(name),
                            ..
                        }) => {
                            node = Node::Member(
                                Box::new(node),
                                Box::new(Node::Literal(Value::String(name))),
                            );
                        }
                        Some(token) => {
                            return Err(ExpressionError::UnexpectedToken {
                                found: token.kind.to_string(),
                                position: token.position,
                                expected: "a field name",
                            });
                        }
                        None => return Err(ExpressionError::UnexpectedEnd("a field name")),
                    }
                }
                Some(TokenKind::LBracket) => {
                    self.advance();
                    let key = self.or()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    node = Node::Member(Box::new(node), Box::new(key));
                }
                _ => return Ok(node),
            }
        }
    }

    fn primary(&mut self) -> Result<Node, ExpressionError> {
        let Some(token) = self.advance() else {
            return Err(ExpressionError::UnexpectedEnd("a value"));
        };

        match token.kind {
            TokenKind::Number(n) => Ok(Node::Literal(number(n))),
            TokenKind::Str(s) => Ok(Node::Literal(Value::String(s))),
            TokenKind::LParen => {
                let inner = self.or()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                let literal = match name.as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    "null" => Some(Value::Null),
                    _ => None,
                };

                if let Some(value) = literal {
                    Ok(Node::Literal(value))
                } else if matches!(self.peek(), Some(TokenKind::LParen)) {
                    self.call(name)
                } else if ROOTS.contains(&name.as_str()) {
                    Ok(Node::Variable(name))
                } else {
                    Err(ExpressionError::UnknownIdentifier(name))
                }
            }
            other => Err(ExpressionError::UnexpectedToken {
                found: other.to_string(),
                position: token.position,
                expected: "a value",
            }),
        }
    }

    fn call(&mut self, name: String) -> Result<Node, ExpressionError> {
        let function = Function::lookup(&name).ok_or(ExpressionError::UnknownFunction(name))?;
        self.expect(TokenKind::LParen, "'('")?;

        let mut args = Vec::new();
        if !matches!(self.peek(), Some(TokenKind::RParen)) {
            loop {
                args.push(self.or()?);
                if matches!(self.peek(), Some(TokenKind::Comma)) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;

        if args.len() != function.arity() {
            return Err(ExpressionError::Arity {
                function: function.name(),
                expected: function.arity(),
                found: args.len(),
            });
        }

        Ok(Node::Call(function, args))
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Truthiness of a JSON value: `null`, `false`, `0` and `""` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn member(base: &Value, key: &Value) -> Value {
    match (base, key) {
        (Value::Object(fields), Value::String(key)) => fields
            .get(key)
            .or_else(|| fields.get(&key.to_lowercase()))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Array(items), Value::Number(index)) => index
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Array(items), Value::String(index)) => index
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExpressionError> {
    let mismatch = || ExpressionError::TypeMismatch {
        operator: op.symbol(),
        left: kind(&left),
        right: kind(&right),
    };

    match op {
        BinaryOp::Eq => Ok(Value::Bool(loosely_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!loosely_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(mismatch)?;

            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => a
                .as_f64()
                .zip(b.as_f64())
                .map(|(a, b)| number(a + b))
                .ok_or_else(mismatch),
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::String(a), other @ (Value::Number(_) | Value::Bool(_))) => {
                Ok(Value::String(format!("{a}{other}")))
            }
            _ => Err(mismatch()),
        },
        BinaryOp::Sub => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => a
                .as_f64()
                .zip(b.as_f64())
                .map(|(a, b)| number(a - b))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
    }
}

fn call(function: Function, args: Vec<Value>) -> Result<Value, ExpressionError> {
    let mut args = args.into_iter();
    let first = args.next().unwrap_or(Value::Null);
    let second = args.next().unwrap_or(Value::Null);

    let text_mismatch = |value: &Value| ExpressionError::TypeMismatch {
        operator: function.name(),
        left: kind(value),
        right: "string",
    };

    let result = match function {
        Function::Has => match (&first, &second) {
            (Value::Object(fields), Value::String(key)) => {
                fields.contains_key(key) || fields.contains_key(&key.to_lowercase())
            }
            (Value::Array(_), _) => !member(&first, &second).is_null(),
            _ => false,
        },
        Function::Includes => match (&first, &second) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| loosely_equal(item, needle)),
            _ => false,
        },
        Function::StartsWith => match (&first, &second) {
            (Value::String(text), Value::String(prefix)) => text.starts_with(prefix.as_str()),
            _ => false,
        },
        Function::EndsWith => match (&first, &second) {
            (Value::String(text), Value::String(suffix)) => text.ends_with(suffix.as_str()),
            _ => false,
        },
        Function::Lowercase => {
            return match first {
                Value::String(text) => Ok(Value::String(text.to_lowercase())),
                Value::Null => Ok(Value::Null),
                other => Err(text_mismatch(&other)),
            };
        }
        Function::Uppercase => {
            return match first {
                Value::String(text) => Ok(Value::String(text.to_uppercase())),
                Value::Null => Ok(Value::Null),
                other => Err(text_mismatch(&other)),
            };
        }
        Function::Size => {
            return match &first {
                Value::String(text) => Ok(Value::from(text.chars().count())),
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(fields) => Ok(Value::from(fields.len())),
                Value::Null => Ok(Value::from(0)),
                other => Err(ExpressionError::TypeMismatch {
                    operator: "size",
                    left: kind(other),
                    right: "collection",
                }),
            };
        }
    };

    Ok(Value::Bool(result))
}

fn evaluate(node: &Node, scope: &Value) -> Result<Value, ExpressionError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Variable(name) => Ok(scope.get(name).cloned().unwrap_or(Value::Null)),
        Node::Member(base, key) => {
            let base = evaluate(base, scope)?;
            let key = evaluate(key, scope)?;
            Ok(member(&base, &key))
        }
        Node::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, scope)?))),
        Node::Negate(inner) => {
            let value = evaluate(inner, scope)?;
            match value.as_f64() {
                Some(n) => Ok(number(-n)),
                None => Err(ExpressionError::TypeMismatch {
                    operator: "-",
                    left: "number",
                    right: kind(&value),
                }),
            }
        }
        Node::And(left, right) => {
            if !is_truthy(&evaluate(left, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&evaluate(right, scope)?)))
        }
        Node::Or(left, right) => {
            if is_truthy(&evaluate(left, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&evaluate(right, scope)?)))
        }
        Node::Binary(op, left, right) => {
            let left = evaluate(left, scope)?;
            let right = evaluate(right, scope)?;
            binary(*op, left, right)
        }
        Node::Call(function, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, args)
        }
    }
}

/// A parsed alert expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Expression, ExpressionError> {
        let tokens = tokenize(source)?;
        let root = Parser { tokens, cursor: 0 }.parse()?;

        Ok(Expression {
            source: source.to_string(),
            root,
        })
    }

    pub fn evaluate(&self, scope: &Value) -> Result<Value, ExpressionError> {
        evaluate(&self.root, scope)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}
