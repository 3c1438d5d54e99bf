//! Raw-to-physical value conversions.
//!
//! Conversions are resolved into this closed enum at decode time and
//! applied vectorized over a whole channel. Identity keeps the native
//! sample type; every other form computes into `Float64`.

use crate::{Error, Result, signal::Samples};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Conversion {
    Identity,
    /// `phys = offset + scale * raw`
    Linear { scale: f64, offset: f64 },
    /// `phys = (n[0]*raw^2 + n[1]*raw + n[2]) / (d[0]*raw^2 + d[1]*raw + d[2])`
    Rational {
        numerator: [f64; 3],
        denominator: [f64; 3],
    },
    /// Breakpoint table, clamped at both ends. With `interpolate` the
    /// value is linearly interpolated between breakpoints, otherwise the
    /// nearest breakpoint's value is used.
    Tabular {
        pairs: Vec<(f64, f64)>,
        interpolate: bool,
    },
    /// MCD-2 MC algebraic expression over a single variable.
    Formula { expression: String },
    /// Exact-match table with a fallback value.
    Lookup { pairs: Vec<(f64, f64)>, default: f64 },
}

impl Conversion {
    pub fn is_identity(&self) -> bool {
        matches!(self, Conversion::Identity)
    }

    /// Normalize forms that are identity in disguise.
    pub(crate) fn normalized(self) -> Conversion {
        match self {
            Conversion::Linear { scale, offset } if scale == 1.0 && offset == 0.0 => {
                Conversion::Identity
            }
            other => other,
        }
    }

    /// Apply the conversion to a whole channel of raw samples.
    pub fn apply(&self, raw: &Samples) -> Result<Samples> {
        if self.is_identity() {
            return Ok(raw.clone());
        }
        if !raw.is_numeric() {
            return Err(Error::InvalidConversion {
                reason: "conversion applied to non-numeric samples".into(),
            });
        }
        let n = raw.len();
        let mut out = Vec::with_capacity(n);
        match self {
            Conversion::Identity => unreachable!(),
            Conversion::Linear { scale, offset } => {
                for i in 0..n {
                    let x = raw.value_f64(i).unwrap_or(f64::NAN);
                    out.push(offset + scale * x);
                }
            }
            Conversion::Rational {
                numerator: [n2, n1, n0],
                denominator: [d2, d1, d0],
            } => {
                for i in 0..n {
                    let x = raw.value_f64(i).unwrap_or(f64::NAN);
                    let num = n2 * x * x + n1 * x + n0;
                    let den = d2 * x * x + d1 * x + d0;
                    // IEEE division: a zero denominator yields inf/NaN for
                    // that sample instead of failing the whole channel.
                    out.push(num / den);
                }
            }
            Conversion::Tabular { pairs, interpolate } => {
                for i in 0..n {
                    let x = raw.value_f64(i).unwrap_or(f64::NAN);
                    out.push(table_value(pairs, *interpolate, x));
                }
            }
            Conversion::Formula { expression } => {
                let expr = Expr::parse(expression)?;
                for i in 0..n {
                    let x = raw.value_f64(i).unwrap_or(f64::NAN);
                    out.push(expr.eval(x));
                }
            }
            Conversion::Lookup { pairs, default } => {
                for i in 0..n {
                    let x = raw.value_f64(i).unwrap_or(f64::NAN);
                    let hit = pairs.iter().find(|(k, _)| *k == x).map(|(_, v)| *v);
                    out.push(hit.unwrap_or(*default));
                }
            }
        }
        Ok(Samples::Float64(out))
    }
}

fn table_value(pairs: &[(f64, f64)], interpolate: bool, x: f64) -> f64 {
    if pairs.is_empty() {
        return f64::NAN;
    }
    if x <= pairs[0].0 {
        return pairs[0].1;
    }
    let last = pairs[pairs.len() - 1];
    if x >= last.0 {
        return last.1;
    }
    // First breakpoint with key >= x; the clamps above guarantee 1..len.
    let hi = pairs.partition_point(|(k, _)| *k < x);
    let (k1, v1) = pairs[hi];
    if k1 == x {
        return v1;
    }
    let (k0, v0) = pairs[hi - 1];
    if interpolate {
        v0 + (v1 - v0) * (x - k0) / (k1 - k0)
    } else if (x - k0) <= (k1 - x) {
        v0
    } else {
        v1
    }
}

// Grammar:
// expr    = term (('+' | '-') term)*
// term    = power (('*' | '/') power)*
// power   = unary ('^' power)?          (right associative, '**' == '^')
// unary   = '-' unary | primary
// primary = NUMBER | IDENT | IDENT '(' expr ')' | '(' expr ')'
//
// Any bare identifier is the conversion variable; a known identifier
// followed by '(' is a function call.
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Variable,
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Sqrt,
    Exp,
    Log,
    Log10,
    Abs,
    Floor,
    Ceil,
}

impl Func {
    fn by_name(name: &str) -> Option<Func> {
        Some(match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "sqrt" => Func::Sqrt,
            "exp" => Func::Exp,
            "log" | "ln" => Func::Log,
            "log10" => Func::Log10,
            "abs" => Func::Abs,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            _ => return None,
        })
    }

    fn eval(self, x: f64) -> f64 {
        match self {
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Asin => x.asin(),
            Func::Acos => x.acos(),
            Func::Atan => x.atan(),
            Func::Sinh => x.sinh(),
            Func::Cosh => x.cosh(),
            Func::Tanh => x.tanh(),
            Func::Sqrt => x.sqrt(),
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Log10 => x.log10(),
            Func::Abs => x.abs(),
            Func::Floor => x.floor(),
            Func::Ceil => x.ceil(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

impl Expr {
    fn parse(source: &str) -> Result<Expr> {
        let tokens = tokenize(source).map_err(|reason| Error::InvalidConversion {
            reason: format!("formula {source:?}: {reason}"),
        })?;
        let mut pos = 0;
        let expr = parse_expr(&tokens, &mut pos).map_err(|reason| Error::InvalidConversion {
            reason: format!("formula {source:?}: {reason}"),
        })?;
        if pos != tokens.len() {
            return Err(Error::InvalidConversion {
                reason: format!("formula {source:?}: trailing tokens"),
            });
        }
        Ok(expr)
    }

    fn eval(&self, x: f64) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Variable => x,
            Expr::Neg(e) => -e.eval(x),
            Expr::Add(a, b) => a.eval(x) + b.eval(x),
            Expr::Sub(a, b) => a.eval(x) - b.eval(x),
            Expr::Mul(a, b) => a.eval(x) * b.eval(x),
            Expr::Div(a, b) => a.eval(x) / b.eval(x),
            Expr::Pow(a, b) => a.eval(x).powf(b.eval(x)),
            Expr::Call(f, e) => f.eval(e.eval(x)),
        }
    }
}

fn tokenize(expr: &str) -> core::result::Result<Vec<Token>, &'static str> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                tokens.push(Token::Plus);
                chars.next();
            }
            '-' => {
                tokens.push(Token::Minus);
                chars.next();
            }
            '*' => {
                chars.next();
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::Caret);
                } else {
                    tokens.push(Token::Star);
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                chars.next();
            }
            '^' => {
                tokens.push(Token::Caret);
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name));
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() || ch == '.' || ch == 'e' || ch == 'E' {
                        num_str.push(ch);
                        chars.next();
                        if (ch == 'e' || ch == 'E')
                            && matches!(chars.peek(), Some('-') | Some('+'))
                        {
                            num_str.push(chars.next().ok_or("truncated exponent")?);
                        }
                    } else {
                        break;
                    }
                }
                let n: f64 = num_str.parse().map_err(|_| "invalid number")?;
                tokens.push(Token::Number(n));
            }
            _ => return Err("unexpected character"),
        }
    }

    Ok(tokens)
}

fn parse_expr(tokens: &[Token], pos: &mut usize) -> core::result::Result<Expr, &'static str> {
    let mut left = parse_term(tokens, pos)?;
    while *pos < tokens.len() {
        match tokens[*pos] {
            Token::Plus => {
                *pos += 1;
                left = Expr::Add(Box::new(left), Box::new(parse_term(tokens, pos)?));
            }
            Token::Minus => {
                *pos += 1;
                left = Expr::Sub(Box::new(left), Box::new(parse_term(tokens, pos)?));
            }
            _ => break,
        }
    }
    Ok(left)
}

fn parse_term(tokens: &[Token], pos: &mut usize) -> core::result::Result<Expr, &'static str> {
    let mut left = parse_power(tokens, pos)?;
    while *pos < tokens.len() {
        match tokens[*pos] {
            Token::Star => {
                *pos += 1;
                left = Expr::Mul(Box::new(left), Box::new(parse_power(tokens, pos)?));
            }
            Token::Slash => {
                *pos += 1;
                left = Expr::Div(Box::new(left), Box::new(parse_power(tokens, pos)?));
            }
            _ => break,
        }
    }
    Ok(left)
}

fn parse_power(tokens: &[Token], pos: &mut usize) -> core::result::Result<Expr, &'static str> {
    let base = parse_unary(tokens, pos)?;
    if *pos < tokens.len() && tokens[*pos] == Token::Caret {
        *pos += 1;
        // Right associative.
        let exp = parse_power(tokens, pos)?;
        Ok(Expr::Pow(Box::new(base), Box::new(exp)))
    } else {
        Ok(base)
    }
}

fn parse_unary(tokens: &[Token], pos: &mut usize) -> core::result::Result<Expr, &'static str> {
    if *pos < tokens.len() && tokens[*pos] == Token::Minus {
        *pos += 1;
        Ok(Expr::Neg(Box::new(parse_unary(tokens, pos)?)))
    } else {
        parse_primary(tokens, pos)
    }
}

fn parse_primary(tokens: &[Token], pos: &mut usize) -> core::result::Result<Expr, &'static str> {
    if *pos >= tokens.len() {
        return Err("unexpected end of expression");
    }
    match &tokens[*pos] {
        Token::Number(n) => {
            *pos += 1;
            Ok(Expr::Number(*n))
        }
        Token::Ident(name) => {
            *pos += 1;
            if *pos < tokens.len() && tokens[*pos] == Token::LParen {
                let func = Func::by_name(name).ok_or("unknown function")?;
                *pos += 1;
                let arg = parse_expr(tokens, pos)?;
                if *pos >= tokens.len() || tokens[*pos] != Token::RParen {
                    return Err("expected closing parenthesis");
                }
                *pos += 1;
                Ok(Expr::Call(func, Box::new(arg)))
            } else if name == "pi" {
                Ok(Expr::Number(core::f64::consts::PI))
            } else {
                Ok(Expr::Variable)
            }
        }
        Token::LParen => {
            *pos += 1;
            let inner = parse_expr(tokens, pos)?;
            if *pos >= tokens.len() || tokens[*pos] != Token::RParen {
                return Err("expected closing parenthesis");
            }
            *pos += 1;
            Ok(inner)
        }
        _ => Err("unexpected token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, x: f64) -> f64 {
        Expr::parse(src).unwrap().eval(x)
    }

    #[test]
    fn variable_and_linear() {
        assert!((eval("X", 5.0) - 5.0).abs() < 1e-12);
        assert!((eval("2*X + 1", 3.0) - 7.0).abs() < 1e-12);
        assert!((eval("v * 2 + 1", 3.0) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn power_forms() {
        assert!((eval("X^2", 3.0) - 9.0).abs() < 1e-12);
        assert!((eval("X**2", 3.0) - 9.0).abs() < 1e-12);
        assert!((eval("2^3^2", 1.0) - 512.0).abs() < 1e-9);
    }

    #[test]
    fn functions() {
        assert!((eval("3 * sin(v)", 0.5) - 3.0 * 0.5f64.sin()).abs() < 1e-12);
        assert!((eval("sqrt(X) + 1", 16.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn negative_and_precedence() {
        assert!((eval("-X", 5.0) + 5.0).abs() < 1e-12);
        assert!((eval("(X + 1) * 2", 3.0) - 8.0).abs() < 1e-12);
        assert!((eval("1.5e-2 * X", 100.0) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn parse_errors() {
        assert!(Expr::parse("2 +").is_err());
        assert!(Expr::parse("foo(1)").is_err());
        assert!(Expr::parse("(1").is_err());
        assert!(Expr::parse("1 2").is_err());
    }

    #[test]
    fn linear_apply() {
        let conv = Conversion::Linear {
            scale: 2.0,
            offset: 1.0,
        };
        let raw = Samples::UnsignedInteger(vec![0, 1, 2]);
        assert_eq!(
            conv.apply(&raw).unwrap(),
            Samples::Float64(vec![1.0, 3.0, 5.0])
        );
    }

    #[test]
    fn trivial_linear_normalizes_to_identity() {
        let conv = Conversion::Linear {
            scale: 1.0,
            offset: 0.0,
        }
        .normalized();
        assert!(conv.is_identity());
    }

    #[test]
    fn rational_zero_denominator_is_nan() {
        let conv = Conversion::Rational {
            numerator: [0.0, 1.0, 0.0],
            denominator: [0.0, 1.0, 0.0],
        };
        let out = conv.apply(&Samples::Float64(vec![0.0, 2.0])).unwrap();
        match out {
            Samples::Float64(v) => {
                assert!(v[0].is_nan());
                assert!((v[1] - 1.0).abs() < 1e-12);
            }
            other => panic!("unexpected samples {other:?}"),
        }
    }

    #[test]
    fn tabular_clamps_and_interpolates() {
        let pairs = vec![(0.0, 0.0), (10.0, 100.0)];
        let interp = Conversion::Tabular {
            pairs: pairs.clone(),
            interpolate: true,
        };
        let out = interp
            .apply(&Samples::Float64(vec![-5.0, 5.0, 20.0]))
            .unwrap();
        assert_eq!(out, Samples::Float64(vec![0.0, 50.0, 100.0]));

        let nearest = Conversion::Tabular {
            pairs,
            interpolate: false,
        };
        let out = nearest.apply(&Samples::Float64(vec![4.0, 6.0])).unwrap();
        assert_eq!(out, Samples::Float64(vec![0.0, 100.0]));
    }

    #[test]
    fn lookup_falls_back_to_default() {
        let conv = Conversion::Lookup {
            pairs: vec![(1.0, 10.0), (2.0, 20.0)],
            default: -1.0,
        };
        let out = conv
            .apply(&Samples::UnsignedInteger(vec![1, 3, 2]))
            .unwrap();
        assert_eq!(out, Samples::Float64(vec![10.0, -1.0, 20.0]));
    }

    #[test]
    fn identity_preserves_native_type() {
        let raw = Samples::SignedInteger(vec![-1, 2]);
        assert_eq!(Conversion::Identity.apply(&raw).unwrap(), raw);
    }

    #[test]
    fn text_samples_reject_numeric_conversion() {
        let conv = Conversion::Linear {
            scale: 2.0,
            offset: 0.0,
        };
        let raw = Samples::Text(vec!["a".into()]);
        assert!(matches!(
            conv.apply(&raw),
            Err(Error::InvalidConversion { .. })
        ));
    }
}
