//! Condition expression evaluation
//!
//! A deliberately small grammar:
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := primary ( op primary )?     op: == != === !== < <= > >=
//! primary := number | 'string' | "string" | true | false | null
//!          | ${path} | "(" or ")"
//! ```
//!
//! Bare `${path}` references resolve against the run's [`VariableStore`] and
//! keep their JSON type. Placeholders inside a quoted string are substituted
//! as text, so `'${status}' == 'paid'` compares the stringified value.
//! There is no function call syntax and no assignment.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use std::cmp::Ordering;

use super::variables::VariableStore;

/// Errors that can occur during expression evaluation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Invalid expression syntax: {0}")]
    InvalidSyntax(String),

    #[error("Cannot compare {left} with {right}")]
    TypeMismatch { left: String, right: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Var(String),
    Template(String),
    LParen,
    RParen,
    Not,
    And,
    Or,
    Compare(CompareOp),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Var(String),
    /// Quoted string containing placeholders
    Template(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

/// Evaluate a condition to a boolean
pub fn evaluate(expression: &str, vars: &VariableStore) -> Result<bool, ExpressionError> {
    evaluate_value(expression, vars).map(|v| is_truthy(&v))
}

/// Evaluate an expression to its raw value
pub fn evaluate_value(expression: &str, vars: &VariableStore) -> Result<Value, ExpressionError> {
    let expr = parse(expression)?;
    eval(&expr, vars)
}

/// Check an expression for syntax errors without evaluating it
pub fn check_syntax(expression: &str) -> Result<(), ExpressionError> {
    parse(expression).map(|_| ())
}

fn parse(expression: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(ExpressionError::InvalidSyntax("empty expression".to_string()));
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExpressionError::InvalidSyntax(format!(
            "unexpected token {:?} in '{}'",
            parser.tokens[parser.pos], expression
        )));
    }
    Ok(expr)
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let syntax = |msg: String| ExpressionError::InvalidSyntax(msg);

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '$' if next == Some('{') => {
                let start = i + 2;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == '}')
                    .map(|p| start + p)
                    .ok_or_else(|| syntax(format!("unterminated placeholder in '{}'", input)))?;
                let path: String = chars[start..end].iter().collect();
                let path = path.trim();
                if path.is_empty() {
                    return Err(syntax("empty placeholder".to_string()));
                }
                tokens.push(Token::Var(path.to_string()));
                i = end + 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax(format!("unterminated string in '{}'", input))),
                        Some('\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                value.push(escaped);
                            }
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                if value.contains("${") {
                    tokens.push(Token::Template(value));
                } else {
                    tokens.push(Token::Literal(Value::String(value)));
                }
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' | '!' if next == Some('=') => {
                let strict = chars.get(i + 2) == Some(&'=');
                let op = match (c, strict) {
                    ('=', false) => CompareOp::Eq,
                    ('=', true) => CompareOp::StrictEq,
                    ('!', false) => CompareOp::Ne,
                    _ => CompareOp::StrictNe,
                };
                tokens.push(Token::Compare(op));
                i += if strict { 3 } else { 2 };
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                let op = match (c, inclusive) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                tokens.push(Token::Compare(op));
                i += if inclusive { 2 } else { 1 };
            }
            c if c.is_ascii_digit()
                || (c == '-'
                    && next.is_some_and(|n| n.is_ascii_digit())
                    && !matches!(tokens.last(), Some(Token::Literal(_) | Token::Var(_) | Token::Template(_) | Token::RParen))) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .ok_or_else(|| syntax(format!("invalid number '{}'", text)))?;
                let value = match text.parse::<i64>() {
                    Ok(n) => Value::from(n),
                    Err(_) => Value::Number(number),
                };
                tokens.push(Token::Literal(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let value = match word.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    _ => return Err(syntax(format!("unexpected identifier '{}'", word))),
                };
                tokens.push(Token::Literal(value));
            }
            other => return Err(syntax(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_primary()?;
        if let Some(Token::Compare(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_primary()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Literal(value)) => Ok(Expr::Literal(value)),
            Some(Token::Var(path)) => Ok(Expr::Var(path)),
            Some(Token::Template(text)) => Ok(Expr::Template(text)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ExpressionError::InvalidSyntax("missing ')'".to_string())),
                }
            }
            Some(token) => Err(ExpressionError::InvalidSyntax(format!(
                "unexpected token {:?}",
                token
            ))),
            None => Err(ExpressionError::InvalidSyntax(
                "unexpected end of expression".to_string(),
            )),
        }
    }
}

fn eval(expr: &Expr, vars: &VariableStore) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(path) => vars.lookup(path).cloned(),
        Expr::Template(text) => vars.substitute_str(text).map(Value::String),
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&eval(inner, vars)?))),
        Expr::And(left, right) => {
            if !is_truthy(&eval(left, vars)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&eval(right, vars)?)))
        }
        Expr::Or(left, right) => {
            if is_truthy(&eval(left, vars)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&eval(right, vars)?)))
        }
        Expr::Compare(op, left, right) => {
            let left = eval(left, vars)?;
            let right = eval(right, vars)?;
            compare(*op, &left, &right).map(Value::Bool)
        }
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    match op {
        CompareOp::Eq => Ok(loose_eq(left, right)),
        CompareOp::Ne => Ok(!loose_eq(left, right)),
        CompareOp::StrictEq => Ok(strict_eq(left, right)),
        CompareOp::StrictNe => Ok(!strict_eq(left, right)),
        CompareOp::Lt => order(left, right).map(|o| o == Ordering::Less),
        CompareOp::Le => order(left, right).map(|o| o != Ordering::Greater),
        CompareOp::Gt => order(left, right).map(|o| o == Ordering::Greater),
        CompareOp::Ge => order(left, right).map(|o| o != Ordering::Less),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (as_number(left), as_number(right)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            s.trim() == b.to_string()
        }
        _ => strict_eq(left, right),
    }
}

fn as_timestamp(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn order(left: &Value, right: &Value) -> Result<Ordering, ExpressionError> {
    let mismatch = || ExpressionError::TypeMismatch {
        left: left.to_string(),
        right: right.to_string(),
    };

    match (left, right) {
        (Value::String(a), Value::String(b)) => {
            if let (Some(x), Some(y)) = (as_timestamp(a), as_timestamp(b)) {
                return Ok(x.cmp(&y));
            }
            if let (Ok(x), Ok(y)) = (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                return x.partial_cmp(&y).ok_or_else(mismatch);
            }
            Ok(a.cmp(b))
        }
        _ => match (as_number(left), as_number(right)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
    }
}

/// Truthiness of a condition result
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            !s.is_empty()
                && s != "false"
                && s != "0"
                && s.to_lowercase() != "null"
                && s.to_lowercase() != "none"
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}
