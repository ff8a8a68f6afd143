// Spreadsheet-style formula evaluator.
// Supports: numbers, strings, booleans, names (VALUE + row columns), functions,
// arithmetic (+, -, *, /, ^, %), concatenation (&) and comparisons (<, >, =, <=, >=, <>).
//
// Row columns are exposed as upper-cased names with every character other than
// a letter, digit or underscore replaced by `_` ("trade id" -> TRADE_ID).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use unirecon_core::{Row, Value};

use crate::error::TransformationError;
use crate::evaluator::{TransformationEvaluator, TransformationKind};

const FUNCTIONS: &[&str] = &[
    "IF", "AND", "OR", "NOT", "UPPER", "LOWER", "TRIM", "LEFT", "RIGHT", "MID", "LEN",
    "CONCATENATE", "CONCAT", "SUBSTITUTE", "ROUND", "ABS", "SUM", "MIN", "MAX", "ISBLANK",
    "VALUE", "TEXT",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Decimal),
    Text(String),
    Boolean(bool),
    /// `VALUE` or a sanitized column name
    Name(String),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Empty/omitted argument (e.g. the trailing slot in `IF(a,b,)`)
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    // Comparison
    Lt,      // <
    Gt,      // >
    Eq,      // =
    LtEq,    // <=
    GtEq,    // >=
    NotEq,   // <>
    // String
    Concat,  // &
    // Exponentiation
    Pow,     // ^
}

/// Parse a formula; the leading `=` is optional.
pub fn parse(formula: &str) -> Result<Expr, String> {
    let formula = formula.trim();
    let input = formula.strip_prefix('=').unwrap_or(formula);
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("Empty formula".to_string());
    }
    let (expr, pos) = parse_comparison(&tokens, 0)?;
    if pos < tokens.len() {
        return Err(format!("Unexpected token at position {}", pos));
    }
    Ok(expr)
}

#[derive(Debug, Clone)]
enum Token {
    Number(Decimal),
    StringLit(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
    Ampersand,
    Caret,
    Percent,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '*' => { tokens.push(Token::Star); chars.next(); }
            '/' => { tokens.push(Token::Slash); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
            '&' => { tokens.push(Token::Ampersand); chars.next(); }
            '^' => { tokens.push(Token::Caret); chars.next(); }
            '%' => { tokens.push(Token::Percent); chars.next(); }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => { tokens.push(Token::LtEq); chars.next(); }
                    Some('>') => { tokens.push(Token::NotEq); chars.next(); }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if let Some(&'=') = chars.peek() {
                    tokens.push(Token::GtEq);
                    chars.next();
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '=' => { tokens.push(Token::Eq); chars.next(); }
            '"' => {
                // String literal; "" inside is an escaped quote
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => {
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                s.push('"');
                            } else {
                                break;
                            }
                        }
                        Some(ch) => s.push(ch),
                        None => return Err("Unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::StringLit(s));
            }
            'A'..='Z' | 'a'..='z' | '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident.to_uppercase()));
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let num = Decimal::from_str(&num_str).map_err(|_| format!("Invalid number: {}", num_str))?;
                tokens.push(Token::Number(num));
            }
            _ => return Err(format!("Unexpected character: {}", c)),
        }
    }

    Ok(tokens)
}

// Lowest precedence: comparison operators
fn parse_comparison(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_concat(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Lt => Op::Lt,
            Token::Gt => Op::Gt,
            Token::Eq => Op::Eq,
            Token::LtEq => Op::LtEq,
            Token::GtEq => Op::GtEq,
            Token::NotEq => Op::NotEq,
            _ => break,
        };
        let (right, new_pos) = parse_concat(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_concat(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_add_sub(tokens, pos)?;

    while let Some(Token::Ampersand) = tokens.get(pos) {
        let (right, new_pos) = parse_add_sub(tokens, pos + 1)?;
        left = binary(Op::Concat, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_power(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            _ => break,
        };
        let (right, new_pos) = parse_power(tokens, pos + 1)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

// Exponentiation (^) - right-associative
fn parse_power(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (base, pos) = parse_percent(tokens, pos)?;

    if let Some(Token::Caret) = tokens.get(pos) {
        let (exponent, new_pos) = parse_power(tokens, pos + 1)?;
        return Ok((binary(Op::Pow, base, exponent), new_pos));
    }

    Ok((base, pos))
}

// Percent postfix (%) desugars to * 0.01
fn parse_percent(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut expr, mut pos) = parse_primary(tokens, pos)?;

    while let Some(Token::Percent) = tokens.get(pos) {
        expr = binary(Op::Mul, expr, Expr::Number(Decimal::new(1, 2)));
        pos += 1;
    }

    Ok((expr, pos))
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let Some(token) = tokens.get(pos) else {
        return Err("Unexpected end of expression".to_string());
    };

    match token {
        Token::Number(n) => Ok((Expr::Number(*n), pos + 1)),
        Token::StringLit(s) => Ok((Expr::Text(s.clone()), pos + 1)),
        Token::Ident(name) => {
            if let Some(Token::LParen) = tokens.get(pos + 1) {
                let (args, new_pos) = parse_function_args(tokens, pos + 2)?;
                return Ok((Expr::Function { name: name.clone(), args }, new_pos));
            }
            match name.as_str() {
                "TRUE" => Ok((Expr::Boolean(true), pos + 1)),
                "FALSE" => Ok((Expr::Boolean(false), pos + 1)),
                _ => Ok((Expr::Name(name.clone()), pos + 1)),
            }
        }
        Token::LParen => {
            let (expr, pos) = parse_comparison(tokens, pos + 1)?;
            match tokens.get(pos) {
                Some(Token::RParen) => Ok((expr, pos + 1)),
                Some(_) => Err("Expected closing parenthesis".to_string()),
                None => Err("Missing closing parenthesis".to_string()),
            }
        }
        Token::Plus => parse_primary(tokens, pos + 1),
        Token::Minus => {
            let (expr, pos) = parse_primary(tokens, pos + 1)?;
            Ok((binary(Op::Sub, Expr::Number(Decimal::ZERO), expr), pos))
        }
        _ => Err(format!("Unexpected token at position {}", pos)),
    }
}

fn parse_function_args(tokens: &[Token], pos: usize) -> Result<(Vec<Expr>, usize), String> {
    let mut args = Vec::new();
    let mut pos = pos;

    if let Some(Token::RParen) = tokens.get(pos) {
        return Ok((args, pos + 1));
    }

    loop {
        match tokens.get(pos) {
            Some(Token::RParen) => {
                args.push(Expr::Empty);
                return Ok((args, pos + 1));
            }
            Some(Token::Comma) => {
                args.push(Expr::Empty);
                pos += 1;
                continue;
            }
            _ => {}
        }

        let (arg, new_pos) = parse_comparison(tokens, pos)?;
        args.push(arg);
        pos = new_pos;

        match tokens.get(pos) {
            Some(Token::RParen) => return Ok((args, pos + 1)),
            Some(Token::Comma) => pos += 1,
            Some(_) => return Err("Expected comma or closing parenthesis".to_string()),
            None => return Err("Missing closing parenthesis in function call".to_string()),
        }
    }
}

fn binary(op: Op, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp { op, left: Box::new(left), right: Box::new(right) }
}

/// Reject calls to functions this evaluator does not implement.
fn check_functions(expr: &Expr) -> Result<(), String> {
    match expr {
        Expr::Function { name, args } => {
            if !FUNCTIONS.contains(&name.as_str()) {
                return Err(format!("Unknown function: {}", name));
            }
            args.iter().try_for_each(check_functions)
        }
        Expr::BinaryOp { left, right, .. } => {
            check_functions(left)?;
            check_functions(right)
        }
        _ => Ok(()),
    }
}

/// Upper-case a column name and replace anything but letters, digits and `_`.
pub fn sanitize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "_".to_string();
    }
    trimmed
        .to_uppercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect()
}

// =============================================================================
// Evaluation
// =============================================================================

struct Scope<'a> {
    names: HashMap<String, &'a Value>,
}

impl<'a> Scope<'a> {
    fn new(value: &'a Value, row: &'a Row) -> Self {
        let mut names: HashMap<String, &'a Value> = row
            .iter()
            .map(|(column, v)| (sanitize_name(column), v))
            .collect();
        names.insert("VALUE".to_string(), value);
        Self { names }
    }
}

fn eval(expr: &Expr, scope: &Scope) -> Result<Value, String> {
    match expr {
        Expr::Number(n) => Ok(Value::Decimal(*n)),
        Expr::Text(s) => Ok(Value::Text(s.clone())),
        Expr::Boolean(b) => Ok(Value::Bool(*b)),
        Expr::Empty => Ok(Value::Null),
        Expr::Name(name) => scope
            .names
            .get(name)
            .map(|v| (*v).clone())
            .ok_or_else(|| format!("#NAME? Unknown name: {}", name)),
        Expr::BinaryOp { op, left, right } => {
            let l = eval(left, scope)?;
            let r = eval(right, scope)?;
            eval_binary(*op, &l, &r)
        }
        Expr::Function { name, args } => eval_function(name, args, scope),
    }
}

fn eval_binary(op: Op, l: &Value, r: &Value) -> Result<Value, String> {
    let overflow = || "#NUM! arithmetic overflow".to_string();
    match op {
        Op::Add => Ok(Value::Decimal(to_number(l)?.checked_add(to_number(r)?).ok_or_else(overflow)?)),
        Op::Sub => Ok(Value::Decimal(to_number(l)?.checked_sub(to_number(r)?).ok_or_else(overflow)?)),
        Op::Mul => Ok(Value::Decimal(to_number(l)?.checked_mul(to_number(r)?).ok_or_else(overflow)?)),
        Op::Div => {
            let divisor = to_number(r)?;
            if divisor.is_zero() {
                return Err("#DIV/0!".to_string());
            }
            Ok(Value::Decimal(to_number(l)?.checked_div(divisor).ok_or_else(overflow)?))
        }
        Op::Pow => Ok(Value::Decimal(power(to_number(l)?, to_number(r)?)?)),
        Op::Concat => Ok(Value::Text(format!("{}{}", to_text(l), to_text(r)))),
        Op::Lt => Ok(Value::Bool(compare(l, r)? == Ordering::Less)),
        Op::Gt => Ok(Value::Bool(compare(l, r)? == Ordering::Greater)),
        Op::Eq => Ok(Value::Bool(compare(l, r)? == Ordering::Equal)),
        Op::LtEq => Ok(Value::Bool(compare(l, r)? != Ordering::Greater)),
        Op::GtEq => Ok(Value::Bool(compare(l, r)? != Ordering::Less)),
        Op::NotEq => Ok(Value::Bool(compare(l, r)? != Ordering::Equal)),
    }
}

fn eval_function(name: &str, args: &[Expr], scope: &Scope) -> Result<Value, String> {
    let arg = |i: usize| -> Result<Value, String> {
        args.get(i).map(|e| eval(e, scope)).unwrap_or(Ok(Value::Null))
    };

    match name {
        "IF" => {
            arity(name, args, 2, 3)?;
            if to_bool(&arg(0)?)? {
                arg(1)
            } else if args.len() > 2 {
                arg(2)
            } else {
                Ok(Value::Bool(false))
            }
        }
        "AND" | "OR" => {
            arity(name, args, 1, usize::MAX)?;
            let mut values = Vec::with_capacity(args.len());
            for i in 0..args.len() {
                values.push(to_bool(&arg(i)?)?);
            }
            Ok(Value::Bool(if name == "AND" {
                values.iter().all(|b| *b)
            } else {
                values.iter().any(|b| *b)
            }))
        }
        "NOT" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(!to_bool(&arg(0)?)?))
        }
        "UPPER" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Text(to_text(&arg(0)?).to_uppercase()))
        }
        "LOWER" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Text(to_text(&arg(0)?).to_lowercase()))
        }
        "TRIM" => {
            arity(name, args, 1, 1)?;
            let text = to_text(&arg(0)?);
            Ok(Value::Text(text.split_whitespace().collect::<Vec<_>>().join(" ")))
        }
        "LEFT" | "RIGHT" => {
            arity(name, args, 1, 2)?;
            let text: Vec<char> = to_text(&arg(0)?).chars().collect();
            let n = if args.len() > 1 { to_count(&arg(1)?)? } else { 1 }.min(text.len());
            let slice = if name == "LEFT" { &text[..n] } else { &text[text.len() - n..] };
            Ok(Value::Text(slice.iter().collect()))
        }
        "MID" => {
            arity(name, args, 3, 3)?;
            let text: Vec<char> = to_text(&arg(0)?).chars().collect();
            let start = to_count(&arg(1)?)?;
            if start < 1 {
                return Err("#VALUE! MID start must be at least 1".to_string());
            }
            let len = to_count(&arg(2)?)?;
            let from = (start - 1).min(text.len());
            let to = from.saturating_add(len).min(text.len());
            Ok(Value::Text(text[from..to].iter().collect()))
        }
        "LEN" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Decimal(Decimal::from(to_text(&arg(0)?).chars().count())))
        }
        "CONCATENATE" | "CONCAT" => {
            let mut out = String::new();
            for i in 0..args.len() {
                out.push_str(&to_text(&arg(i)?));
            }
            Ok(Value::Text(out))
        }
        "SUBSTITUTE" => {
            arity(name, args, 3, 3)?;
            let text = to_text(&arg(0)?);
            let old = to_text(&arg(1)?);
            if old.is_empty() {
                return Ok(Value::Text(text));
            }
            Ok(Value::Text(text.replace(&old, &to_text(&arg(2)?))))
        }
        "ROUND" => {
            arity(name, args, 1, 2)?;
            let n = to_number(&arg(0)?)?;
            let digits = if args.len() > 1 { to_number(&arg(1)?)? } else { Decimal::ZERO };
            Ok(Value::Decimal(round_half_away(n, digits)?))
        }
        "ABS" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Decimal(to_number(&arg(0)?)?.abs()))
        }
        "SUM" | "MIN" | "MAX" => {
            let mut numbers = Vec::with_capacity(args.len());
            for i in 0..args.len() {
                let v = arg(i)?;
                if !v.is_null() {
                    numbers.push(to_number(&v)?);
                }
            }
            let result = match name {
                "SUM" => numbers
                    .iter()
                    .try_fold(Decimal::ZERO, |acc, n| acc.checked_add(*n))
                    .ok_or_else(|| "#NUM! arithmetic overflow".to_string())?,
                "MIN" => numbers.iter().copied().min().unwrap_or(Decimal::ZERO),
                _ => numbers.iter().copied().max().unwrap_or(Decimal::ZERO),
            };
            Ok(Value::Decimal(result))
        }
        "ISBLANK" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Bool(arg(0)?.is_blank()))
        }
        "VALUE" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Decimal(to_number(&arg(0)?)?))
        }
        "TEXT" => {
            arity(name, args, 2, 2)?;
            Ok(Value::Text(format_text(&arg(0)?, &to_text(&arg(1)?))?))
        }
        _ => Err(format!("Unknown function: {}", name)),
    }
}

fn arity(name: &str, args: &[Expr], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        if min == max {
            return Err(format!("{} expects {} argument(s), got {}", name, min, args.len()));
        }
        return Err(format!("{} expects at least {} argument(s), got {}", name, min, args.len()));
    }
    Ok(())
}

fn to_number(v: &Value) -> Result<Decimal, String> {
    match v {
        Value::Null => Ok(Decimal::ZERO),
        Value::Bool(b) => Ok(if *b { Decimal::ONE } else { Decimal::ZERO }),
        other => other.to_decimal().map_err(|e| format!("#VALUE! {}", e)),
    }
}

fn to_count(v: &Value) -> Result<usize, String> {
    to_number(v)?
        .trunc()
        .to_usize()
        .ok_or_else(|| format!("#VALUE! expected a non-negative count, got {}", v))
}

fn to_text(v: &Value) -> String {
    match v {
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Decimal(d) => d.normalize().to_string(),
        other => other.to_string(),
    }
}

fn to_bool(v: &Value) -> Result<bool, String> {
    match v {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Integer(i) => Ok(*i != 0),
        Value::Decimal(d) => Ok(!d.is_zero()),
        Value::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
            "TRUE" => Ok(true),
            "FALSE" => Ok(false),
            _ => Err(format!("#VALUE! cannot convert '{}' to a boolean", s)),
        },
        other => Err(format!("#VALUE! cannot convert '{}' to a boolean", other)),
    }
}

fn is_numeric(v: &Value) -> bool {
    matches!(v, Value::Null | Value::Integer(_) | Value::Decimal(_))
}

// Mixed-type ordering follows spreadsheets: numbers < text < booleans.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null | Value::Integer(_) | Value::Decimal(_) => 0,
        Value::Bool(_) => 2,
        _ => 1,
    }
}

fn compare(l: &Value, r: &Value) -> Result<Ordering, String> {
    match (l, r) {
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        _ if is_numeric(l) && is_numeric(r) => Ok(to_number(l)?.cmp(&to_number(r)?)),
        _ if type_rank(l) == 1 && (type_rank(r) == 1 || r.is_null())
            || l.is_null() && type_rank(r) == 1 =>
        {
            Ok(to_text(l).to_lowercase().cmp(&to_text(r).to_lowercase()))
        }
        _ => Ok(type_rank(l).cmp(&type_rank(r))),
    }
}

fn power(base: Decimal, exponent: Decimal) -> Result<Decimal, String> {
    if exponent.fract().is_zero() {
        if let Some(n) = exponent.to_i64().filter(|n| n.unsigned_abs() <= 1024) {
            let mut acc = Decimal::ONE;
            for _ in 0..n.unsigned_abs() {
                acc = acc.checked_mul(base).ok_or_else(|| "#NUM! arithmetic overflow".to_string())?;
            }
            if n >= 0 {
                return Ok(acc);
            }
            return Decimal::ONE.checked_div(acc).ok_or_else(|| "#DIV/0!".to_string());
        }
    }
    let (b, e) = match (base.to_f64(), exponent.to_f64()) {
        (Some(b), Some(e)) => (b, e),
        _ => return Err("#NUM! invalid power operands".to_string()),
    };
    Decimal::from_f64(b.powf(e)).ok_or_else(|| "#NUM! result is not a finite number".to_string())
}

fn round_half_away(n: Decimal, digits: Decimal) -> Result<Decimal, String> {
    let digits = digits.trunc().to_i32().ok_or_else(|| "#VALUE! invalid digit count".to_string())?;
    if digits >= 0 {
        return Ok(n.round_dp_with_strategy(digits as u32, RoundingStrategy::MidpointAwayFromZero));
    }
    let factor = power(Decimal::TEN, Decimal::from(-digits))?;
    let scaled = n.checked_div(factor).ok_or_else(|| "#NUM! arithmetic overflow".to_string())?;
    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .checked_mul(factor)
        .ok_or_else(|| "#NUM! arithmetic overflow".to_string())
}

fn format_text(v: &Value, format: &str) -> Result<String, String> {
    let lower = format.to_ascii_lowercase();
    if lower.contains('y') || lower.contains('d') {
        let date = v.to_date().map_err(|e| format!("#VALUE! {}", e))?;
        let pattern = lower
            .replace('%', "%%")
            .replace("yyyy", "%Y")
            .replace("yy", "%y")
            .replace("mm", "%m")
            .replace("dd", "%d");
        return Ok(date.format(&pattern).to_string());
    }

    let n = to_number(v)?;
    let decimals = format
        .split_once('.')
        .map(|(_, frac)| frac.chars().filter(|c| *c == '0' || *c == '#').count())
        .unwrap_or(0);
    let rounded = n.round_dp_with_strategy(decimals as u32, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.*}", decimals, rounded);
    if format.contains(',') {
        Ok(group_thousands(&text))
    } else {
        Ok(text)
    }
}

fn group_thousands(text: &str) -> String {
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac_part {
        Some(f) => format!("{sign}{grouped}.{f}"),
        None => format!("{sign}{grouped}"),
    }
}

// =============================================================================
// Evaluator
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct FormulaEvaluator;

impl TransformationEvaluator for FormulaEvaluator {
    fn kind(&self) -> TransformationKind {
        TransformationKind::Formula
    }

    fn validate(&self, config: &str) -> Result<(), TransformationError> {
        if config.trim().is_empty() {
            return Err(TransformationError::validation("Formula cannot be empty"));
        }
        parse(config)
            .and_then(|expr| check_functions(&expr))
            .map_err(|e| TransformationError::validation(format!("Formula validation failed: {}", e)))
    }

    /// A blank formula, or one that evaluates to blank, keeps the current value.
    fn evaluate(&self, value: &Value, row: &Row, config: &str) -> Result<Value, TransformationError> {
        if config.trim().is_empty() {
            return Ok(value.clone());
        }
        let expr = parse(config)
            .map_err(|e| TransformationError::evaluation(format!("Formula evaluation failed: {}", e)))?;
        let scope = Scope::new(value, row);
        match eval(&expr, &scope) {
            Ok(Value::Null) => Ok(value.clone()),
            Ok(result) => Ok(result),
            Err(e) => Err(TransformationError::evaluation(format!("Formula evaluation failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn run(formula: &str, value: Value, row: &Row) -> Result<Value, TransformationError> {
        FormulaEvaluator.evaluate(&value, row, formula)
    }

    #[test]
    fn test_arithmetic_precedence() {
        let out = run("=1 + 2 * 3 ^ 2", Value::Null, &Row::new()).unwrap();
        assert_eq!(out, Value::Decimal(dec("19")));
        let out = run("(1 + 2) * 3", Value::Null, &Row::new()).unwrap();
        assert_eq!(out, Value::Decimal(dec("9")));
        let out = run("=-2 ^ 2", Value::Null, &Row::new()).unwrap();
        assert_eq!(out, Value::Decimal(dec("4")));
        let out = run("=50%", Value::Null, &Row::new()).unwrap();
        assert_eq!(out, Value::Decimal(dec("0.5")));
    }

    #[test]
    fn test_value_and_columns() {
        let row: Row = [("notional amt", "1000"), ("ccy", "usd")].into_iter().collect();
        let out = run("=VALUE * NOTIONAL_AMT", Value::text("0.5"), &row).unwrap();
        assert_eq!(out, Value::Decimal(dec("500.0")));
        let out = run("=UPPER(ccy) & \"-\" & VALUE", Value::text("X"), &row).unwrap();
        assert_eq!(out, Value::text("USD-X"));
    }

    #[test]
    fn test_if_and_comparisons() {
        let row: Row = [("side", "BUY")].into_iter().collect();
        let out = run("=IF(SIDE = \"buy\", VALUE, -VALUE)", Value::text("10"), &row).unwrap();
        assert_eq!(out, Value::text("10"));
        let row: Row = [("side", "SELL")].into_iter().collect();
        let out = run("=IF(SIDE = \"buy\", VALUE, -VALUE)", Value::text("10"), &row).unwrap();
        assert_eq!(out, Value::Decimal(dec("-10")));
        let out = run("=AND(1 < 2, \"a\" <> \"b\", NOT(FALSE))", Value::Null, &Row::new()).unwrap();
        assert_eq!(out, Value::Bool(true));
    }

    #[test]
    fn test_text_functions() {
        let out = run("=MID(VALUE, 2, 3)", Value::text("abcdef"), &Row::new()).unwrap();
        assert_eq!(out, Value::text("bcd"));
        let out = run("=LEFT(VALUE) & RIGHT(VALUE, 2)", Value::text("abcdef"), &Row::new()).unwrap();
        assert_eq!(out, Value::text("aef"));
        let out = run("=TRIM(VALUE)", Value::text("  a   b "), &Row::new()).unwrap();
        assert_eq!(out, Value::text("a b"));
        let out = run("=SUBSTITUTE(VALUE, \"-\", \"\")", Value::text("2024-01-05"), &Row::new()).unwrap();
        assert_eq!(out, Value::text("20240105"));
        let out = run("=LEN(VALUE)", Value::text("héllo"), &Row::new()).unwrap();
        assert_eq!(out, Value::Decimal(dec("5")));
    }

    #[test]
    fn test_round_and_text_formatting() {
        let out = run("=ROUND(VALUE, 2)", Value::text("2.345"), &Row::new()).unwrap();
        assert_eq!(out, Value::Decimal(dec("2.35")));
        let out = run("=ROUND(1250, -2)", Value::Null, &Row::new()).unwrap();
        assert_eq!(out, Value::Decimal(dec("1300")));
        let out = run("=TEXT(VALUE, \"#,##0.00\")", Value::text("1234567.891"), &Row::new()).unwrap();
        assert_eq!(out, Value::text("1,234,567.89"));
        let out = run("=TEXT(VALUE, \"dd/mm/yyyy\")", Value::text("2024-03-05"), &Row::new()).unwrap();
        assert_eq!(out, Value::text("05/03/2024"));
    }

    #[test]
    fn test_blank_result_keeps_value() {
        let out = run("=IF(FALSE, 1, )", Value::text("keep"), &Row::new()).unwrap();
        assert_eq!(out, Value::text("keep"));
    }

    #[test]
    fn test_errors() {
        let err = run("=1/0", Value::Null, &Row::new()).unwrap_err();
        assert!(err.to_string().contains("#DIV/0!"));
        let err = run("=MISSING + 1", Value::Null, &Row::new()).unwrap_err();
        assert!(err.to_string().contains("Unknown name: MISSING"));
        let err = run("=\"abc\" + 1", Value::Null, &Row::new()).unwrap_err();
        assert!(err.to_string().contains("#VALUE!"));
    }

    #[test]
    fn test_validation() {
        assert!(FormulaEvaluator.validate("=UPPER(VALUE)").is_ok());
        assert!(FormulaEvaluator.validate("=VLOOKUP(VALUE, 1)").is_err());
        assert!(FormulaEvaluator.validate("=(1 + 2").is_err());
        assert!(FormulaEvaluator.validate("  ").is_err());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("trade id"), "TRADE_ID");
        assert_eq!(sanitize_name("amount(usd)"), "AMOUNT_USD_");
        assert_eq!(sanitize_name(" "), "_");
    }
}
