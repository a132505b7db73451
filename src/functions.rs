//! Custom SQL functions registered on every run database connection.
//!
//! | Name      | Kind      | Result                                   |
//! |-----------|-----------|------------------------------------------|
//! | `var`     | aggregate | population variance, NULL when empty     |
//! | `stddev`  | aggregate | population standard deviation            |
//! | `norm1`   | aggregate | sum of absolute values                   |
//! | `norm2`   | aggregate | square root of the sum of squares        |
//! | `sprintf` | scalar    | printf-style formatting of one argument  |
//! | `sqrt`    | scalar    | square root                              |
//! | `pow`     | scalar    | `x` raised to `y`                        |
//!
//! NULL inputs are skipped by the aggregates and propagated by the scalars.

use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::Connection;
use std::iter::Peekable;
use std::str::Chars;

use crate::storage::Value;

/// Register all custom functions on `conn`.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_aggregate_function("var", 1, flags, Variance)?;
    conn.create_aggregate_function("stddev", 1, flags, StdDeviation)?;
    conn.create_aggregate_function("norm1", 1, flags, Norm1)?;
    conn.create_aggregate_function("norm2", 1, flags, Norm2)?;

    conn.create_scalar_function("sprintf", 2, flags, |ctx| {
        let Some(format) = ctx.get::<Option<String>>(0)? else {
            return Ok(None);
        };
        let arg = Value::from(ctx.get_raw(1));
        sprintf(&format, &arg)
            .map(Some)
            .map_err(|msg| rusqlite::Error::UserFunctionError(msg.into()))
    })?;

    conn.create_scalar_function("sqrt", 1, flags, |ctx| {
        match ctx.get::<Option<f64>>(0)? {
            Some(x) if x < 0.0 => Err(rusqlite::Error::UserFunctionError(
                "math domain error".into(),
            )),
            x => Ok(x.map(f64::sqrt)),
        }
    })?;

    conn.create_scalar_function("pow", 2, flags, |ctx| {
        let base = ctx.get::<Option<f64>>(0)?;
        let exp = ctx.get::<Option<f64>>(1)?;
        Ok(base.zip(exp).map(|(b, e)| b.powf(e)))
    })?;

    Ok(())
}

/// Running count, mean and sum of squared deviations (Welford).
#[derive(Debug, Default, Clone, Copy)]
pub struct Moments {
    n: u64,
    mean: f64,
    m2: f64,
}

impl Moments {
    pub fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Population variance, `None` when no values were pushed.
    pub fn variance(&self) -> Option<f64> {
        if self.n == 0 {
            None
        } else {
            Some(self.m2 / self.n as f64)
        }
    }
}

struct Variance;

impl Aggregate<Moments, Option<f64>> for Variance {
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<Moments> {
        Ok(Moments::default())
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut Moments) -> rusqlite::Result<()> {
        if let Some(x) = ctx.get::<Option<f64>>(0)? {
            acc.push(x);
        }
        Ok(())
    }

    fn finalize(&self, _: &mut Context<'_>, acc: Option<Moments>) -> rusqlite::Result<Option<f64>> {
        Ok(acc.and_then(|m| m.variance()))
    }
}

struct StdDeviation;

impl Aggregate<Moments, Option<f64>> for StdDeviation {
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<Moments> {
        Ok(Moments::default())
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut Moments) -> rusqlite::Result<()> {
        if let Some(x) = ctx.get::<Option<f64>>(0)? {
            acc.push(x);
        }
        Ok(())
    }

    fn finalize(&self, _: &mut Context<'_>, acc: Option<Moments>) -> rusqlite::Result<Option<f64>> {
        Ok(acc.and_then(|m| m.variance()).map(f64::sqrt))
    }
}

struct Norm1;

impl Aggregate<f64, f64> for Norm1 {
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<f64> {
        Ok(0.0)
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut f64) -> rusqlite::Result<()> {
        if let Some(x) = ctx.get::<Option<f64>>(0)? {
            *acc += x.abs();
        }
        Ok(())
    }

    fn finalize(&self, _: &mut Context<'_>, acc: Option<f64>) -> rusqlite::Result<f64> {
        Ok(acc.unwrap_or(0.0))
    }
}

struct Norm2;

impl Aggregate<f64, f64> for Norm2 {
    fn init(&self, _: &mut Context<'_>) -> rusqlite::Result<f64> {
        Ok(0.0)
    }

    fn step(&self, ctx: &mut Context<'_>, acc: &mut f64) -> rusqlite::Result<()> {
        if let Some(x) = ctx.get::<Option<f64>>(0)? {
            *acc += x * x;
        }
        Ok(())
    }

    fn finalize(&self, _: &mut Context<'_>, acc: Option<f64>) -> rusqlite::Result<f64> {
        Ok(acc.unwrap_or(0.0).sqrt())
    }
}

/// Upper bound on directive width and precision.
const MAX_FIELD: usize = 1024;

/// Read a decimal width or precision, at most [`MAX_FIELD`].
fn number(chars: &mut Peekable<Chars<'_>>, what: &str) -> Result<usize, String> {
    let mut n: usize = 0;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add(d as usize))
            .filter(|n| *n <= MAX_FIELD)
            .ok_or_else(|| format!("{} too big", what))?;
        chars.next();
    }
    Ok(n)
}

/// A parsed `%[flags][width][.precision]conversion` directive.
#[derive(Debug, Default)]
struct Directive {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
    conversion: char,
}

/// Format `arg` with a printf-style `format` holding exactly one directive.
pub fn sprintf(format: &str, arg: &Value) -> Result<String, String> {
    let mut out = String::with_capacity(format.len() + 8);
    let mut chars = format.chars().peekable();
    let mut used = false;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut directive = Directive::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => directive.left = true,
                '+' => directive.plus = true,
                ' ' => directive.space = true,
                '0' => directive.zero = true,
                '#' => directive.alt = true,
                _ => break,
            }
            chars.next();
        }
        directive.width = number(&mut chars, "width")?;
        if chars.peek() == Some(&'.') {
            chars.next();
            directive.precision = Some(number(&mut chars, "precision")?);
        }
        directive.conversion = chars
            .next()
            .ok_or_else(|| "incomplete format".to_string())?;

        if directive.conversion == '%' {
            out.push('%');
            continue;
        }
        if used {
            return Err("not enough arguments for format string".to_string());
        }
        used = true;
        out.push_str(&format_one(&directive, arg)?);
    }

    if !used {
        return Err("not all arguments converted during string formatting".to_string());
    }
    Ok(out)
}

fn format_one(directive: &Directive, arg: &Value) -> Result<String, String> {
    let (body, numeric) = match directive.conversion {
        'd' | 'i' | 'u' => (with_sign(directive, as_int(arg)?.to_string()), true),
        'x' | 'X' | 'o' => {
            let n = as_int(arg)?;
            let magnitude = n.unsigned_abs();
            let digits = match directive.conversion {
                'x' => format!("{:x}", magnitude),
                'X' => format!("{:X}", magnitude),
                _ => format!("{:o}", magnitude),
            };
            let prefix = match (directive.alt, directive.conversion) {
                (true, 'x') => "0x",
                (true, 'X') => "0X",
                (true, _) => "0o",
                (false, _) => "",
            };
            let sign = if n < 0 { "-" } else { "" };
            (with_sign(directive, format!("{}{}{}", sign, prefix, digits)), true)
        }
        'f' | 'F' => {
            let x = as_float(arg)?;
            let body = special_float(x, directive.conversion)
                .unwrap_or_else(|| format!("{:.*}", directive.precision.unwrap_or(6), x));
            (with_sign(directive, body), true)
        }
        'e' | 'E' => {
            let x = as_float(arg)?;
            let body = special_float(x, directive.conversion)
                .unwrap_or_else(|| exponential(x, directive.precision.unwrap_or(6), directive.conversion));
            (with_sign(directive, body), true)
        }
        'g' | 'G' => {
            let x = as_float(arg)?;
            let body = special_float(x, directive.conversion).unwrap_or_else(|| general(directive, x));
            (with_sign(directive, body), true)
        }
        's' => {
            let mut s = arg.to_string();
            if let Some(p) = directive.precision {
                s = s.chars().take(p).collect();
            }
            (s, false)
        }
        'r' => {
            let s = match arg {
                Value::String(s) => format!("'{}'", s),
                Value::Null => "None".to_string(),
                other => other.to_string(),
            };
            (s, false)
        }
        other => return Err(format!("unsupported format character '{}'", other)),
    };

    Ok(pad(directive, body, numeric))
}

fn as_int(arg: &Value) -> Result<i64, String> {
    match arg {
        Value::Int(n) => Ok(*n),
        Value::Float(f) => Ok(f.trunc() as i64),
        other => Err(format!("a number is required, not '{}'", other)),
    }
}

fn as_float(arg: &Value) -> Result<f64, String> {
    match arg {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        other => Err(format!("a number is required, not '{}'", other)),
    }
}

fn special_float(x: f64, conversion: char) -> Option<String> {
    let s = if x.is_nan() {
        "nan"
    } else if x == f64::INFINITY {
        "inf"
    } else if x == f64::NEG_INFINITY {
        "-inf"
    } else {
        return None;
    };
    Some(if conversion.is_ascii_uppercase() {
        s.to_uppercase()
    } else {
        s.to_string()
    })
}

/// `d.ddde+XX` with at least two exponent digits.
fn exponential(x: f64, precision: usize, conversion: char) -> String {
    let raw = format!("{:.*e}", precision, x);
    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let e = if conversion == 'E' || conversion == 'G' { 'E' } else { 'e' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.abs())
}

fn general(directive: &Directive, x: f64) -> String {
    let precision = match directive.precision {
        Some(0) => 1,
        Some(p) => p,
        None => 6,
    };
    let exp = if x == 0.0 {
        0
    } else {
        let raw = format!("{:.*e}", precision - 1, x);
        raw.split_once('e')
            .and_then(|(_, e)| e.parse::<i32>().ok())
            .unwrap_or(0)
    };

    let body = if exp < -4 || exp >= precision as i32 {
        exponential(x, precision - 1, directive.conversion)
    } else {
        format!("{:.*}", (precision as i32 - 1 - exp).max(0) as usize, x)
    };

    if directive.alt {
        return body;
    }
    match body.split_once(['e', 'E']) {
        Some((mantissa, rest)) => {
            let e = &body[mantissa.len()..mantissa.len() + 1];
            format!("{}{}{}", strip_zeros(mantissa), e, rest)
        }
        None => strip_zeros(&body).to_string(),
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn with_sign(directive: &Directive, body: String) -> String {
    if body.starts_with('-') {
        body
    } else if directive.plus {
        format!("+{}", body)
    } else if directive.space {
        format!(" {}", body)
    } else {
        body
    }
}

fn pad(directive: &Directive, body: String, numeric: bool) -> String {
    let len = body.chars().count();
    if len >= directive.width {
        return body;
    }
    let fill = directive.width - len;

    if directive.left {
        return format!("{}{}", body, " ".repeat(fill));
    }
    if directive.zero && numeric && !body.ends_with("nan") && !body.ends_with("inf") {
        let sign_len = body
            .find(|c: char| !matches!(c, '-' | '+' | ' '))
            .unwrap_or(0);
        let prefix_len = if body[sign_len..].starts_with("0x")
            || body[sign_len..].starts_with("0X")
            || body[sign_len..].starts_with("0o")
        {
            2
        } else {
            0
        };
        let (head, tail) = body.split_at(sign_len + prefix_len);
        return format!("{}{}{}", head, "0".repeat(fill), tail);
    }
    format!("{}{}", " ".repeat(fill), body)
}
