//! Backend-reported function evaluation.
//!
//! Backends may report a `filter_function` and a `goodness_function`: small
//! expressions over the normalized stats of a candidate, for example
//!
//! ```text
//! stats.free_capacity_gb > share.size * 2 and capabilities.dedupe
//! extra.tier == 'gold' ? 100 : 50
//! ```
//!
//! Variables live in four scopes: `stats` (the typed host stats), `capabilities`
//! (the raw report), `extra` (the share type's extra specs) and `share` (the
//! share's own properties). Nested capability maps are reached with further
//! dots.
//!
//! Precedence, loosest first: `? :`, `or`/`||`, `and`/`&&`, `not`/`!`,
//! comparisons (`< <= > >= == = != <>`), `+ -`, `* / %`, unary `-`, `^`.
//! Functions: `abs`, `min`, `max`.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::error::{EvaluatorError, EvaluatorResult};
use crate::stats::NormalizedStats;

/// Result of an evaluation, or a variable's value.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl Operand {
    fn from_json(name: &str, value: &Value) -> EvaluatorResult<Self> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(Operand::Number)
                .ok_or_else(|| EvaluatorError::Type(format!("{name} is not a finite number"))),
            Value::Bool(b) => Ok(Operand::Bool(*b)),
            Value::String(s) => Ok(Operand::Text(s.clone())),
            Value::Null => Err(EvaluatorError::UnknownVariable(name.to_string())),
            Value::Array(_) | Value::Object(_) => {
                Err(EvaluatorError::Type(format!("{name} is not a scalar")))
            }
        }
    }

    /// Numeric view: booleans count as 1 and 0, text must parse.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(n) => Some(*n),
            Operand::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Operand::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Operand::Number(n) => *n != 0.0,
            Operand::Bool(b) => *b,
            Operand::Text(s) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
        }
    }

    fn number(&self) -> EvaluatorResult<f64> {
        self.as_number()
            .ok_or_else(|| EvaluatorError::Type(format!("'{self}' is not a number")))
    }

    /// Text used for non-numeric comparisons. Boolean words compare
    /// case-insensitively.
    fn compare_text(&self) -> String {
        match self {
            Operand::Text(s) if s.eq_ignore_ascii_case("true") => "true".to_string(),
            Operand::Text(s) if s.eq_ignore_ascii_case("false") => "false".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Number(n) => write!(f, "{n}"),
            Operand::Bool(b) => write!(f, "{b}"),
            Operand::Text(s) => f.write_str(s),
        }
    }
}

/// Parse `function` and evaluate it against one candidate.
pub fn evaluate(function: &str, stats: &NormalizedStats) -> EvaluatorResult<Operand> {
    let expr = Parser::new(tokenize(function)?).parse()?;
    let scope = Scope::new(stats)?;
    scope.eval(&expr)
}

// ── Tokens ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Sym(&'static str),
}

const SYMBOLS: &[&str] = &[
    "<=", ">=", "==", "!=", "<>", "&&", "||", "<", ">", "=", "!", "+", "-", "*", "/", "%", "^", "(",
    ")", ",", "?", ":",
];

fn tokenize(input: &str) -> EvaluatorResult<Vec<(usize, Token)>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let text = &input[start..i];
            let n = text.parse().map_err(|_| EvaluatorError::Parse {
                offset: start,
                message: format!("bad number '{text}'"),
            })?;
            tokens.push((start, Token::Number(n)));
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'.')) {
                i += 1;
            }
            let word = &input[start..i];
            let token = match word.to_ascii_lowercase().as_str() {
                "and" => Token::Sym("&&"),
                "or" => Token::Sym("||"),
                "not" => Token::Sym("!"),
                _ => Token::Ident(word.to_string()),
            };
            tokens.push((start, token));
            continue;
        }

        if c == b'\'' || c == b'"' {
            let Some(len) = input[i + 1..].find(c as char) else {
                return Err(EvaluatorError::Parse {
                    offset: start,
                    message: "unterminated string".to_string(),
                });
            };
            tokens.push((start, Token::Text(input[i + 1..i + 1 + len].to_string())));
            i += len + 2;
            continue;
        }

        let Some(sym) = SYMBOLS.iter().find(|s| input[i..].starts_with(**s)) else {
            return Err(EvaluatorError::Parse {
                offset: start,
                message: format!("unexpected character '{}'", &input[i..].chars().next().unwrap_or('?')),
            });
        };
        tokens.push((start, Token::Sym(sym)));
        i += sym.len();
    }
    Ok(tokens)
}

// ── Parser ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Operand),
    Variable(String),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<(usize, Token)>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> EvaluatorResult<Expr> {
        let expr = self.ternary()?;
        if self.pos < self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn error(&self, message: &str) -> EvaluatorError {
        let offset = self
            .tokens
            .get(self.pos)
            .map_or_else(|| self.tokens.last().map_or(0, |(o, _)| *o), |(o, _)| *o);
        EvaluatorError::Parse {
            offset,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    /// Consume the next token if it is one of `syms`.
    fn eat(&mut self, syms: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Sym(s)) if syms.contains(s) => {
                let s = *s;
                self.pos += 1;
                Some(s)
            }
            _ => None,
        }
    }

    fn expect(&mut self, sym: &'static str) -> EvaluatorResult<()> {
        self.eat(&[sym])
            .map(|_| ())
            .ok_or_else(|| self.error(&format!("expected '{sym}'")))
    }

    fn ternary(&mut self) -> EvaluatorResult<Expr> {
        let cond = self.or()?;
        if self.eat(&["?"]).is_none() {
            return Ok(cond);
        }
        let then = self.ternary()?;
        self.expect(":")?;
        let otherwise = self.ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn or(&mut self) -> EvaluatorResult<Expr> {
        let mut left = self.and()?;
        while let Some(op) = self.eat(&["||"]) {
            left = Expr::Binary(op, Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> EvaluatorResult<Expr> {
        let mut left = self.not()?;
        while let Some(op) = self.eat(&["&&"]) {
            left = Expr::Binary(op, Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> EvaluatorResult<Expr> {
        if self.eat(&["!"]).is_some() {
            return Ok(Expr::Unary("!", Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> EvaluatorResult<Expr> {
        let left = self.additive()?;
        match self.eat(&["<=", ">=", "==", "=", "!=", "<>", "<", ">"]) {
            Some(op) => Ok(Expr::Binary(op, Box::new(left), Box::new(self.additive()?))),
            None => Ok(left),
        }
    }

    fn additive(&mut self) -> EvaluatorResult<Expr> {
        let mut left = self.multiplicative()?;
        while let Some(op) = self.eat(&["+", "-"]) {
            left = Expr::Binary(op, Box::new(left), Box::new(self.multiplicative()?));
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> EvaluatorResult<Expr> {
        let mut left = self.unary()?;
        while let Some(op) = self.eat(&["*", "/", "%"]) {
            left = Expr::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> EvaluatorResult<Expr> {
        match self.eat(&["-", "+"]) {
            Some(op) => Ok(Expr::Unary(op, Box::new(self.unary()?))),
            None => self.power(),
        }
    }

    /// `^` binds tighter than unary minus and associates right.
    fn power(&mut self) -> EvaluatorResult<Expr> {
        let base = self.primary()?;
        match self.eat(&["^"]) {
            Some(op) => Ok(Expr::Binary(op, Box::new(base), Box::new(self.unary()?))),
            None => Ok(base),
        }
    }

    fn primary(&mut self) -> EvaluatorResult<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of input"));
        };
        match token {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Literal(Operand::Number(n)))
            }
            Token::Text(s) => {
                self.pos += 1;
                Ok(Expr::Literal(Operand::Text(s)))
            }
            Token::Ident(name) => {
                self.pos += 1;
                if self.eat(&["("]).is_some() {
                    let mut args = Vec::new();
                    if self.eat(&[")"]).is_none() {
                        loop {
                            args.push(self.ternary()?);
                            if self.eat(&[","]).is_none() {
                                break;
                            }
                        }
                        self.expect(")")?;
                    }
                    return Ok(Expr::Call(name.to_ascii_lowercase(), args));
                }
                if name.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Literal(Operand::Bool(true)));
                }
                if name.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Literal(Operand::Bool(false)));
                }
                Ok(Expr::Variable(name))
            }
            Token::Sym("(") => {
                self.pos += 1;
                let inner = self.ternary()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Sym(s) => Err(self.error(&format!("unexpected '{s}'"))),
        }
    }
}

// ── Evaluation ─────────────────────────────────────────────────────

struct Scope<'a> {
    stats: &'a NormalizedStats,
    host_stats: serde_json::Map<String, Value>,
}

impl<'a> Scope<'a> {
    fn new(stats: &'a NormalizedStats) -> EvaluatorResult<Self> {
        let host_stats = match serde_json::to_value(&stats.host_stats) {
            Ok(Value::Object(map)) => map,
            Ok(_) => serde_json::Map::new(),
            Err(e) => return Err(EvaluatorError::Type(format!("host stats: {e}"))),
        };
        Ok(Self { stats, host_stats })
    }

    fn lookup(&self, name: &str) -> EvaluatorResult<Operand> {
        let unknown = || EvaluatorError::UnknownVariable(name.to_string());
        let (scope, path) = name.split_once('.').ok_or_else(unknown)?;
        let mut segments = path.split('.');
        let first = segments.next().ok_or_else(unknown)?;

        let mut value = match scope {
            "stats" => self.host_stats.get(first),
            "capabilities" => self.stats.host_caps.get(first),
            "extra" => self.stats.extra_specs.get(first),
            "share" => self.stats.share_stats.get(first),
            _ => None,
        }
        .ok_or_else(unknown)?;
        for key in segments {
            value = value.as_object().and_then(|m| m.get(key)).ok_or_else(unknown)?;
        }
        Operand::from_json(name, value)
    }

    fn eval(&self, expr: &Expr) -> EvaluatorResult<Operand> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Variable(name) => self.lookup(name),
            Expr::Unary("!", inner) => Ok(Operand::Bool(!self.eval(inner)?.truthy())),
            Expr::Unary("-", inner) => Ok(Operand::Number(-self.eval(inner)?.number()?)),
            Expr::Unary(_, inner) => Ok(Operand::Number(self.eval(inner)?.number()?)),
            Expr::Binary("&&", l, r) => {
                Ok(Operand::Bool(self.eval(l)?.truthy() && self.eval(r)?.truthy()))
            }
            Expr::Binary("||", l, r) => {
                Ok(Operand::Bool(self.eval(l)?.truthy() || self.eval(r)?.truthy()))
            }
            Expr::Binary(op, l, r) => {
                let (l, r) = (self.eval(l)?, self.eval(r)?);
                match *op {
                    "+" | "-" | "*" | "/" | "%" | "^" => arithmetic(op, l.number()?, r.number()?),
                    _ => Ok(Operand::Bool(compare(op, &l, &r))),
                }
            }
            Expr::Ternary(cond, then, otherwise) => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a)?.number())
                    .collect::<EvaluatorResult<Vec<f64>>>()?;
                call(name, &args)
            }
        }
    }
}

fn arithmetic(op: &str, l: f64, r: f64) -> EvaluatorResult<Operand> {
    let n = match op {
        "+" => l + r,
        "-" => l - r,
        "*" => l * r,
        "/" | "%" if r == 0.0 => return Err(EvaluatorError::DivisionByZero),
        "/" => l / r,
        "%" => l % r,
        _ => l.powf(r),
    };
    Ok(Operand::Number(n))
}

/// Numeric comparison when both sides are numbers, text otherwise.
fn compare(op: &str, l: &Operand, r: &Operand) -> bool {
    let ordering = match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(l.compare_text().cmp(&r.compare_text())),
    };
    let Some(ordering) = ordering else {
        return matches!(op, "!=" | "<>");
    };
    match op {
        "<" => ordering == Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        ">" => ordering == Ordering::Greater,
        ">=" => ordering != Ordering::Less,
        "==" | "=" => ordering == Ordering::Equal,
        _ => ordering != Ordering::Equal,
    }
}

fn call(name: &str, args: &[f64]) -> EvaluatorResult<Operand> {
    let arity = |want: &str| EvaluatorError::Type(format!("{name}() takes {want}"));
    let n = match name {
        "abs" => match args {
            [x] => x.abs(),
            _ => return Err(arity("one argument")),
        },
        "max" | "min" if args.is_empty() => return Err(arity("at least one argument")),
        "max" => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "min" => args.iter().copied().fold(f64::INFINITY, f64::min),
        other => return Err(EvaluatorError::UnknownFunction(other.to_string())),
    };
    Ok(Operand::Number(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::generate_stats;
    use serde_json::json;
    use tidepool_state::{BackendState, Capacity, RequestSpec};

    fn stats() -> NormalizedStats {
        let mut backend = BackendState::new("a@lvm#p");
        backend.total_capacity_gb = Capacity::Known(100.0);
        backend.free_capacity_gb = Some(Capacity::Known(40.0));
        backend.allocated_capacity_gb = 60.0;
        backend.capabilities.insert("tier".into(), json!("gold"));
        backend.capabilities.insert("iops".into(), json!({"read": 5000}));
        backend.capabilities.insert("replicas".into(), json!(["a", "b"]));

        let mut request = RequestSpec::default();
        request.share_type.extra_specs.insert("dedupe".into(), json!("True"));
        request.resource_properties.insert("size".into(), json!(10));
        generate_stats(&backend, &request)
    }

    fn eval(function: &str) -> EvaluatorResult<Operand> {
        evaluate(function, &stats())
    }

    #[test]
    fn arithmetic_follows_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Operand::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), Operand::Number(9.0));
        assert_eq!(eval("-2 ^ 2").unwrap(), Operand::Number(-4.0));
        assert_eq!(eval("2 ^ 3 ^ 2").unwrap(), Operand::Number(512.0));
        assert_eq!(eval("7 % 4 + 10 / 4").unwrap(), Operand::Number(5.5));
    }

    #[test]
    fn reads_every_scope() {
        assert_eq!(eval("stats.free_capacity_gb").unwrap(), Operand::Number(40.0));
        assert_eq!(eval("capabilities.tier").unwrap(), Operand::Text("gold".into()));
        assert_eq!(eval("capabilities.iops.read").unwrap(), Operand::Number(5000.0));
        assert_eq!(eval("extra.dedupe").unwrap(), Operand::Text("True".into()));
        assert_eq!(eval("share.size").unwrap(), Operand::Number(10.0));
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval("stats.free_capacity_gb > share.size * 2").unwrap(), Operand::Bool(true));
        assert_eq!(
            eval("stats.allocated_capacity_gb < 50 or capabilities.tier == 'gold'").unwrap(),
            Operand::Bool(true)
        );
        assert_eq!(eval("not (1 <> 1) && 3 >= 3").unwrap(), Operand::Bool(true));
        assert_eq!(eval("extra.dedupe == true").unwrap(), Operand::Bool(true));
        assert_eq!(eval("capabilities.tier = \"silver\"").unwrap(), Operand::Bool(false));
    }

    #[test]
    fn ternary_and_functions() {
        assert_eq!(eval("capabilities.tier == 'gold' ? 100 : 50").unwrap(), Operand::Number(100.0));
        assert_eq!(eval("max(1, stats.free_capacity_gb, 3)").unwrap(), Operand::Number(40.0));
        assert_eq!(eval("min(4, 2) + abs(-3)").unwrap(), Operand::Number(5.0));
    }

    #[test]
    fn bad_functions_are_errors() {
        assert!(matches!(eval("1 +"), Err(EvaluatorError::Parse { .. })));
        assert!(matches!(eval("(1 + 2"), Err(EvaluatorError::Parse { .. })));
        assert!(matches!(eval("1 2"), Err(EvaluatorError::Parse { .. })));
        assert!(matches!(eval("'open"), Err(EvaluatorError::Parse { .. })));
        assert!(matches!(eval("1 # 2"), Err(EvaluatorError::Parse { .. })));
        assert_eq!(
            eval("stats.no_such_field"),
            Err(EvaluatorError::UnknownVariable("stats.no_such_field".into()))
        );
        assert_eq!(eval("free > 1"), Err(EvaluatorError::UnknownVariable("free".into())));
        assert_eq!(eval("sqrt(4)"), Err(EvaluatorError::UnknownFunction("sqrt".into())));
        assert_eq!(eval("1 / (2 - 2)"), Err(EvaluatorError::DivisionByZero));
        assert!(matches!(eval("capabilities.tier + 1"), Err(EvaluatorError::Type(_))));
        assert!(matches!(eval("capabilities.replicas"), Err(EvaluatorError::Type(_))));
    }
}
