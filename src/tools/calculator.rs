//! 算术表达式能力：calculate_expression
//!
//! 递归下降求值，支持 + - * / // % **、括号、一元正负号、常用数学函数与常量 pi / e。
//! 整数运算保持整数（溢出时退化为浮点），`/` 总是得到浮点，`//` 与 `%` 按向下取整语义。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn render(self) -> String {
        match self {
            Num::Int(i) => i.to_string(),
            Num::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 => {
                format!("{:.1}", f)
            }
            Num::Float(f) => f.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Num),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    LParen,
    RParen,
    Comma,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // 科学计数法：仅当 e 后面跟数字（或符号 + 数字）
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let num = if text.contains(['.', 'e', 'E']) {
                    Num::Float(text.parse().map_err(|_| format!("invalid number '{text}'"))?)
                } else {
                    match text.parse::<i64>() {
                        Ok(n) => Num::Int(n),
                        Err(_) => Num::Float(
                            text.parse().map_err(|_| format!("invalid number '{text}'"))?,
                        ),
                    }
                };
                tokens.push(Token::Num(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::StarStar);
                i += 2;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::SlashSlash);
                i += 2;
            }
            '^' => {
                tokens.push(Token::StarStar);
                i += 1;
            }
            _ => {
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => return Err(format!("unexpected character '{other}'")),
                });
                i += 1;
            }
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

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            Some(t) => Err(format!("expected {want:?}, found {t:?}")),
            None => Err(format!("expected {want:?}, found end of input")),
        }
    }

    fn expr(&mut self) -> Result<Num, String> {
        let mut acc = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    acc = add(acc, self.term()?);
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    acc = sub(acc, self.term()?);
                }
                _ => return Ok(acc),
            }
        }
    }

    fn term(&mut self) -> Result<Num, String> {
        let mut acc = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Token::Star,
                Some(Token::Slash) => Token::Slash,
                Some(Token::SlashSlash) => Token::SlashSlash,
                Some(Token::Percent) => Token::Percent,
                _ => return Ok(acc),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            acc = match op {
                Token::Star => mul(acc, rhs),
                Token::Slash => div(acc, rhs)?,
                Token::SlashSlash => floor_div(acc, rhs)?,
                _ => modulo(acc, rhs)?,
            };
        }
    }

    fn unary(&mut self) -> Result<Num, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(neg(self.unary()?))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    /// 幂运算右结合，且优先级高于左侧一元负号：-2**2 == -4
    fn power(&mut self) -> Result<Num, String> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::StarStar) {
            self.pos += 1;
            let exp = self.unary()?;
            return pow(base, exp);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Num, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let v = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(v)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        args.push(self.expr()?);
                        while self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                            args.push(self.expr()?);
                        }
                    }
                    self.expect(Token::RParen)?;
                    call(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(t) => Err(format!("unexpected token {t:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn add(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x
            .checked_add(y)
            .map(Num::Int)
            .unwrap_or(Num::Float(x as f64 + y as f64)),
        _ => Num::Float(a.as_f64() + b.as_f64()),
    }
}

fn sub(a: Num, b: Num) -> Num {
    add(a, neg(b))
}

fn mul(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x
            .checked_mul(y)
            .map(Num::Int)
            .unwrap_or(Num::Float(x as f64 * y as f64)),
        _ => Num::Float(a.as_f64() * b.as_f64()),
    }
}

fn neg(a: Num) -> Num {
    match a {
        Num::Int(x) => x.checked_neg().map(Num::Int).unwrap_or(Num::Float(-(x as f64))),
        Num::Float(f) => Num::Float(-f),
    }
}

fn div(a: Num, b: Num) -> Result<Num, String> {
    if b.as_f64() == 0.0 {
        return Err("division by zero".to_string());
    }
    Ok(Num::Float(a.as_f64() / b.as_f64()))
}

fn floor_div(a: Num, b: Num) -> Result<Num, String> {
    if b.as_f64() == 0.0 {
        return Err("integer division or modulo by zero".to_string());
    }
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match (x.checked_div(y), x.checked_rem(y)) {
            (Some(q), Some(r)) => {
                let adjust = r != 0 && ((r < 0) != (y < 0));
                Ok(Num::Int(if adjust { q - 1 } else { q }))
            }
            // i64::MIN // -1 溢出
            _ => Ok(Num::Float((x as f64 / y as f64).floor())),
        },
        _ => Ok(Num::Float((a.as_f64() / b.as_f64()).floor())),
    }
}

/// 结果符号与除数一致
fn modulo(a: Num, b: Num) -> Result<Num, String> {
    if b.as_f64() == 0.0 {
        return Err("integer division or modulo by zero".to_string());
    }
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => {
            // 只有 i64::MIN % -1 会溢出，其余数为 0
            let r = x.checked_rem(y).unwrap_or(0);
            // r 与 y 异号时相加不会溢出
            Ok(Num::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
        }
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            Ok(Num::Float(((x % y) + y) % y))
        }
    }
}

fn pow(a: Num, b: Num) -> Result<Num, String> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        if (0..=u32::MAX as i64).contains(&y) {
            if let Some(v) = x.checked_pow(y as u32) {
                return Ok(Num::Int(v));
            }
        }
    }
    if a.as_f64() == 0.0 && b.as_f64() < 0.0 {
        return Err("0.0 cannot be raised to a negative power".to_string());
    }
    Ok(Num::Float(a.as_f64().powf(b.as_f64())))
}

fn constant(name: &str) -> Result<Num, String> {
    match name {
        "pi" => Ok(Num::Float(std::f64::consts::PI)),
        "e" => Ok(Num::Float(std::f64::consts::E)),
        "tau" => Ok(Num::Float(std::f64::consts::TAU)),
        "inf" => Ok(Num::Float(f64::INFINITY)),
        other => Err(format!("name '{other}' is not defined")),
    }
}

fn call(name: &str, args: &[Num]) -> Result<Num, String> {
    let one = |f: fn(f64) -> f64| -> Result<Num, String> {
        match args {
            [x] => Ok(Num::Float(f(x.as_f64()))),
            _ => Err(format!("{name}() takes exactly one argument ({} given)", args.len())),
        }
    };
    match name {
        "sqrt" => match args {
            [x] if x.as_f64() < 0.0 => Err("math domain error".to_string()),
            _ => one(f64::sqrt),
        },
        "sin" => one(f64::sin),
        "cos" => one(f64::cos),
        "tan" => one(f64::tan),
        "asin" => one(f64::asin),
        "acos" => one(f64::acos),
        "atan" => one(f64::atan),
        "exp" => one(f64::exp),
        "log10" => one(f64::log10),
        "log2" => one(f64::log2),
        "degrees" => one(f64::to_degrees),
        "radians" => one(f64::to_radians),
        "log" => match args {
            [x] if x.as_f64() > 0.0 => Ok(Num::Float(x.as_f64().ln())),
            [x, base] if x.as_f64() > 0.0 && base.as_f64() > 0.0 => {
                Ok(Num::Float(x.as_f64().ln() / base.as_f64().ln()))
            }
            [_] | [_, _] => Err("math domain error".to_string()),
            _ => Err("log() takes one or two arguments".to_string()),
        },
        "abs" => match args {
            [Num::Int(x)] => Ok(x.checked_abs().map(Num::Int).unwrap_or(Num::Float((*x as f64).abs()))),
            [Num::Float(f)] => Ok(Num::Float(f.abs())),
            _ => Err("abs() takes exactly one argument".to_string()),
        },
        "floor" | "ceil" | "round" => match args {
            [Num::Int(x)] => Ok(Num::Int(*x)),
            [Num::Float(f)] => {
                let v = match name {
                    "floor" => f.floor(),
                    "ceil" => f.ceil(),
                    _ => round_half_even(*f),
                };
                Ok(Num::Int(v as i64))
            }
            [x, Num::Int(digits)] if name == "round" => {
                let scale = 10f64.powi(*digits as i32);
                Ok(Num::Float(round_half_even(x.as_f64() * scale) / scale))
            }
            _ => Err(format!("{name}() takes exactly one argument")),
        },
        "pow" => match args {
            [a, b] => pow(*a, *b),
            _ => Err("pow() takes exactly two arguments".to_string()),
        },
        "min" | "max" if !args.is_empty() => {
            let pick = |acc: Num, x: &Num| {
                let better = if name == "min" {
                    x.as_f64() < acc.as_f64()
                } else {
                    x.as_f64() > acc.as_f64()
                };
                if better {
                    *x
                } else {
                    acc
                }
            };
            Ok(args[1..].iter().fold(args[0], pick))
        }
        other => Err(format!("name '{other}' is not defined")),
    }
}

/// 银行家舍入（.5 取偶）
fn round_half_even(f: f64) -> f64 {
    let r = f.round();
    if (f - f.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - f.signum()
    } else {
        r
    }
}

/// 求值入口：返回展示文本
pub fn evaluate(expression: &str) -> Result<String, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if let Some(t) = parser.peek() {
        return Err(format!("unexpected token {t:?}"));
    }
    Ok(value.render())
}

#[derive(Deserialize, JsonSchema)]
pub struct CalculateArgs {
    /// 算术表达式，例如 "2 + 2" 或 "sqrt(16) * 3"
    pub expression: String,
}

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculate_expression"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression (+ - * / // % **, parentheses, sqrt/sin/cos/log/abs/round..., constants pi and e)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CalculateArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: CalculateArgs = parse_args(args)?;
        evaluate(&args.expression).map(Value::String)
    }
}
