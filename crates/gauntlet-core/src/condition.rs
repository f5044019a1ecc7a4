//! Condition expressions gating jobs and steps.
//!
//! The grammar is a small subset of the GitHub Actions expression language:
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := cmp ( "&&" cmp )*
//! cmp     := unary ( ("==" | "!=") unary | "contains" unary )?
//! unary   := "!" unary | primary
//! primary := literal | "(" or ")" | ident "(" args ")" | path
//! ```
//!
//! Evaluation never raises. Anything that touches a missing or null value
//! evaluates to `false`, so a gated job or step is skipped rather than run.

use crate::interpolation::InterpolationContext;
use crate::{Error, Result};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// A parsed, reusable condition.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Parse a condition. A surrounding `${{ ... }}` is accepted and stripped.
    pub fn parse(source: &str) -> Result<Self> {
        let inner = strip_template(source);
        let tokens = tokenize(inner).map_err(|message| Error::InvalidCondition {
            expression: source.to_string(),
            message,
        })?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or().map_err(|message| Error::InvalidCondition {
            expression: source.to_string(),
            message,
        })?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::InvalidCondition {
                expression: source.to_string(),
                message: format!("unexpected token {:?}", parser.tokens[parser.pos]),
            });
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a boolean. Null, missing and non-boolean falsy values are `false`.
    pub fn evaluate(&self, ctx: &InterpolationContext) -> bool {
        truthy(&self.expr.eval(ctx))
    }

    /// Evaluate to a raw value, as used by `${{ ... }}` interpolation.
    pub fn evaluate_value(&self, ctx: &InterpolationContext) -> Value {
        self.expr.eval(ctx)
    }

    /// Whether the expression calls one of the job status functions.
    ///
    /// Step conditions without a status function are implicitly combined
    /// with `success()`.
    pub fn has_status_function(&self) -> bool {
        self.expr.has_status_function()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and evaluate in one go, failing safe to `false` on a parse error.
pub fn evaluate_str(source: &str, ctx: &InterpolationContext) -> bool {
    match Condition::parse(source) {
        Ok(condition) => condition.evaluate(ctx),
        Err(e) => {
            warn!(condition = %source, error = %e, "Unparseable condition treated as false");
            false
        }
    }
}

fn strip_template(source: &str) -> &str {
    let trimmed = source.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    Comma,
    Not,
    Eq,
    Ne,
    And,
    Or,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut literal = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        // '' escapes a single quote, as in GitHub expressions
                        Some(&q) if q == quote && quote == '\'' && chars.get(i + 1) == Some(&'\'') => {
                            literal.push('\'');
                            i += 2;
                        }
                        Some(&q) if q == quote => {
                            i += 1;
                            break;
                        }
                        Some(&other) => {
                            literal.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number `{}`", text))?;
                tokens.push(Token::Num(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character `{}`", other)),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Contains,
    StartsWith,
    EndsWith,
    Always,
    Success,
    Failure,
    Cancelled,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "contains" => Some(Function::Contains),
            "startswith" => Some(Function::StartsWith),
            "endswith" => Some(Function::EndsWith),
            "always" => Some(Function::Always),
            "success" => Some(Function::Success),
            "failure" => Some(Function::Failure),
            "cancelled" => Some(Function::Cancelled),
            _ => None,
        }
    }

    fn arity(&self) -> usize {
        match self {
            Function::Contains | Function::StartsWith | Function::EndsWith => 2,
            Function::Always | Function::Success | Function::Failure | Function::Cancelled => 0,
        }
    }

    fn is_status(&self) -> bool {
        matches!(
            self,
            Function::Always | Function::Success | Function::Failure | Function::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> std::result::Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of expression", expected)),
        }
    }

    fn parse_or(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_cmp()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_cmp()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> std::result::Result<Expr, String> {
        let left = self.parse_unary()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.pos += 1;
                let right = self.parse_unary()?;
                Ok(Expr::Eq(Box::new(left), Box::new(right)))
            }
            Some(Token::Ne) => {
                self.pos += 1;
                let right = self.parse_unary()?;
                Ok(Expr::Ne(Box::new(left), Box::new(right)))
            }
            // infix `a contains b`
            Some(Token::Ident(word))
                if word.eq_ignore_ascii_case("contains")
                    && self.peek_at(1) != Some(&Token::LParen) =>
            {
                self.pos += 1;
                let right = self.parse_unary()?;
                Ok(Expr::Call(Function::Contains, vec![left, right]))
            }
            _ => Ok(left),
        }
    }

    fn parse_unary(&mut self) -> std::result::Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> std::result::Result<Expr, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let function = Function::from_name(&name)
                        .ok_or_else(|| format!("unknown function `{}`", name))?;
                    let args = self.parse_args()?;
                    if args.len() != function.arity() {
                        return Err(format!(
                            "`{}` takes {} argument(s), got {}",
                            name,
                            function.arity(),
                            args.len()
                        ));
                    }
                    return Ok(Expr::Call(function, args));
                }
                match name.as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" => Ok(Expr::Literal(Value::Null)),
                    _ => {
                        if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
                            return Err(format!("malformed path `{}`", name));
                        }
                        Ok(Expr::Path(name.split('.').map(str::to_string).collect()))
                    }
                }
            }
            Some(token) => Err(format!("unexpected token {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_args(&mut self) -> std::result::Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                Some(token) => return Err(format!("expected `,` or `)`, found {:?}", token)),
                None => return Err("unterminated argument list".to_string()),
            }
        }
        Ok(args)
    }
}

impl Expr {
    fn eval(&self, ctx: &InterpolationContext) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::Path(segments) => ctx.lookup(segments).unwrap_or(Value::Null),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(ctx))),
            Expr::Eq(left, right) => {
                let (l, r) = (left.eval(ctx), right.eval(ctx));
                Value::Bool(!l.is_null() && !r.is_null() && loosely_equal(&l, &r))
            }
            Expr::Ne(left, right) => {
                let (l, r) = (left.eval(ctx), right.eval(ctx));
                Value::Bool(!l.is_null() && !r.is_null() && !loosely_equal(&l, &r))
            }
            Expr::And(left, right) => {
                if !truthy(&left.eval(ctx)) {
                    return Value::Bool(false);
                }
                Value::Bool(truthy(&right.eval(ctx)))
            }
            Expr::Or(left, right) => {
                if truthy(&left.eval(ctx)) {
                    return Value::Bool(true);
                }
                Value::Bool(truthy(&right.eval(ctx)))
            }
            Expr::Call(function, args) => Value::Bool(call(*function, args, ctx)),
        }
    }

    fn has_status_function(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Path(_) => false,
            Expr::Not(inner) => inner.has_status_function(),
            Expr::Eq(l, r) | Expr::Ne(l, r) | Expr::And(l, r) | Expr::Or(l, r) => {
                l.has_status_function() || r.has_status_function()
            }
            Expr::Call(function, args) => {
                function.is_status() || args.iter().any(Expr::has_status_function)
            }
        }
    }
}

fn call(function: Function, args: &[Expr], ctx: &InterpolationContext) -> bool {
    match function {
        Function::Always => true,
        Function::Success => !ctx.job_failed && !ctx.cancelled,
        Function::Failure => ctx.job_failed,
        Function::Cancelled => ctx.cancelled,
        Function::Contains | Function::StartsWith | Function::EndsWith => {
            let haystack = args[0].eval(ctx);
            let needle = args[1].eval(ctx);
            if haystack.is_null() || needle.is_null() {
                return false;
            }
            match (function, &haystack) {
                (Function::Contains, Value::Array(items)) => {
                    items.iter().any(|item| loosely_equal(item, &needle))
                }
                (Function::Contains, _) => render(&haystack).contains(&render(&needle)),
                (Function::StartsWith, _) => render(&haystack).starts_with(&render(&needle)),
                (Function::EndsWith, _) => render(&haystack).ends_with(&render(&needle)),
                _ => false,
            }
        }
    }
}

/// Render a value the way it appears when interpolated into a command.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(_), Value::Number(_)) | (Value::Number(_), Value::String(_)) => {
            render(left) == render(right)
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TriggerEvent;
    use pretty_assertions::assert_eq;

    fn ctx_with_body(body: Option<&str>) -> InterpolationContext {
        let mut event = TriggerEvent::pull_request("refs/pull/1/head", "abc123");
        event.body = body.map(str::to_string);
        InterpolationContext::for_event(event)
    }

    #[test]
    fn test_body_contains_token() {
        let ctx = ctx_with_body(Some("please /build-new-image now"));
        assert!(evaluate_str("contains(event.body, '/build-new-image')", &ctx));
        assert!(evaluate_str(
            "${{ contains(github.event.pull_request.body, '/build-new-image') }}",
            &ctx
        ));
    }

    #[test]
    fn test_body_without_token() {
        let ctx = ctx_with_body(Some("just a refactor"));
        assert!(!evaluate_str("contains(event.body, '/build-new-image')", &ctx));
    }

    #[test]
    fn test_null_body_is_false_without_error() {
        let ctx = ctx_with_body(None);
        let condition = Condition::parse("contains(event.body, '/build-new-image')").unwrap();
        assert!(!condition.evaluate(&ctx));
        assert!(!evaluate_str("event.body == 'x'", &ctx));
        assert!(!evaluate_str("event.body != 'x'", &ctx));
    }

    #[test]
    fn test_missing_field_without_context_is_false() {
        let ctx = InterpolationContext::new();
        assert!(!evaluate_str("contains(event.body, 'x')", &ctx));
        assert!(!evaluate_str("matrix.os == 'ubuntu'", &ctx));
    }

    #[test]
    fn test_legacy_infix_contains() {
        let ctx = ctx_with_body(Some("run /build-new-image"));
        assert!(!evaluate_str("event.body contains /build-new-image", &ctx));
        assert!(evaluate_str("event.body contains '/build-new-image'", &ctx));
    }

    #[test]
    fn test_and_or_short_circuit() {
        let mut ctx = ctx_with_body(Some("hello"));
        ctx.matrix
            .insert("os".to_string(), Value::String("ubuntu-22.04".to_string()));
        assert!(evaluate_str(
            "matrix.os == 'ubuntu-22.04' && contains(event.body, 'hell')",
            &ctx
        ));
        assert!(evaluate_str("false || startsWith(matrix.os, 'ubuntu')", &ctx));
        assert!(!evaluate_str("!(matrix.os == 'ubuntu-22.04')", &ctx));
    }

    #[test]
    fn test_status_functions() {
        let mut ctx = InterpolationContext::new();
        assert!(evaluate_str("success()", &ctx));
        assert!(!evaluate_str("failure()", &ctx));
        ctx.job_failed = true;
        assert!(!evaluate_str("success()", &ctx));
        assert!(evaluate_str("failure()", &ctx));
        assert!(evaluate_str("always()", &ctx));

        assert!(Condition::parse("always()").unwrap().has_status_function());
        assert!(
            !Condition::parse("contains(event.body, 'x')")
                .unwrap()
                .has_status_function()
        );
    }

    #[test]
    fn test_numbers_compare_with_strings() {
        let mut ctx = InterpolationContext::new();
        ctx.matrix.insert("nodes".to_string(), serde_json::json!(3));
        assert!(evaluate_str("matrix.nodes == '3'", &ctx));
        assert!(evaluate_str("matrix.nodes == 3", &ctx));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Condition::parse("contains(event.body").is_err());
        assert!(Condition::parse("nosuchfn(1)").is_err());
        assert!(Condition::parse("'unterminated").is_err());
        assert!(Condition::parse("a == ").is_err());
        assert!(!evaluate_str("a ==", &InterpolationContext::new()));
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&serde_json::json!(3)), "3");
        assert_eq!(render(&serde_json::json!("v1.27.3")), "v1.27.3");
        assert_eq!(render(&Value::Null), "");
    }
}
