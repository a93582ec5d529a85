//! Extra-spec expression matching.
//!
//! A requirement is either a bare value (equality) or an operator followed by
//! an operand:
//!
//! | operator | meaning |
//! |---|---|
//! | `=` | numeric, value >= operand |
//! | `==` `!=` `>=` `<=` | numeric comparison |
//! | `s==` `s!=` `s<` `s<=` `s>` `s>=` | string comparison |
//! | `<in>` | operand is a substring of value |
//! | `<is>` | boolean equality, both sides parsed leniently |
//! | `<or> a <or> b` | value equals any alternative |
//!
//! Matching is total: anything unparseable is a non-match, and an unknown
//! leading token falls back to equality against the whole requirement text.

use serde_json::Value;
use tidepool_state::parse_bool_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    NumAtLeast,
    NumEq,
    NumNe,
    NumGe,
    NumLe,
    StrEq,
    StrNe,
    StrLt,
    StrLe,
    StrGt,
    StrGe,
    In,
    Is,
    Or,
}

impl Op {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "=" => Op::NumAtLeast,
            "==" => Op::NumEq,
            "!=" => Op::NumNe,
            ">=" => Op::NumGe,
            "<=" => Op::NumLe,
            "s==" => Op::StrEq,
            "s!=" => Op::StrNe,
            "s<" => Op::StrLt,
            "s<=" => Op::StrLe,
            "s>" => Op::StrGt,
            "s>=" => Op::StrGe,
            "<in>" => Op::In,
            "<is>" => Op::Is,
            "<or>" => Op::Or,
            _ => return None,
        })
    }
}

/// Does the capability `value` satisfy the requirement expression `req`?
pub fn match_requirement(value: &Value, req: &str) -> bool {
    let mut words = req.split_whitespace();
    let op = words.next().and_then(Op::parse);

    let Some(op) = op else {
        return bare_equals(value, req);
    };
    let Some(text) = value_text(value) else {
        return false;
    };

    if op == Op::Or {
        // `<or> a <or> b <or>`: every other word is an alternative.
        return words.step_by(2).any(|alt| alt == text);
    }

    let Some(operand) = words.next() else {
        return false;
    };

    match op {
        Op::NumAtLeast => numeric(&text, operand, |x, y| x >= y),
        Op::NumEq => numeric(&text, operand, |x, y| x == y),
        Op::NumNe => numeric(&text, operand, |x, y| x != y),
        Op::NumGe => numeric(&text, operand, |x, y| x >= y),
        Op::NumLe => numeric(&text, operand, |x, y| x <= y),
        Op::StrEq => text == operand,
        Op::StrNe => text != operand,
        Op::StrLt => text.as_str() < operand,
        Op::StrLe => text.as_str() <= operand,
        Op::StrGt => text.as_str() > operand,
        Op::StrGe => text.as_str() >= operand,
        Op::In => text.contains(operand),
        Op::Is => lenient_bool(value) == parse_bool_str(operand).unwrap_or(false),
        Op::Or => false,
    }
}

/// Render a capability value as the text operators compare against.
///
/// `null` has no text form; objects and arrays render as compact JSON.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("True".to_string()),
        Value::Bool(false) => Some("False".to_string()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if f.fract() == 0.0 && n.is_f64() && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        other => Some(other.to_string()),
    }
}

fn bare_equals(value: &Value, req: &str) -> bool {
    let Some(text) = value_text(value) else {
        return false;
    };
    if text == req {
        return true;
    }
    // Booleans compare case-insensitively: `true` matches `True`.
    match (parse_bool_str(&text), parse_bool_str(req)) {
        (Some(a), Some(b)) => is_bool_word(&text) && is_bool_word(req) && a == b,
        _ => false,
    }
}

fn is_bool_word(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "false")
}

fn lenient_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() == Some(1.0),
        Value::String(s) => parse_bool_str(s).unwrap_or(false),
        _ => false,
    }
}

fn numeric(text: &str, operand: &str, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (text.trim().parse::<f64>(), operand.parse::<f64>()) {
        (Ok(x), Ok(y)) => cmp(x, y),
        _ => false,
    }
}
