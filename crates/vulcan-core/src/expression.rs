//! Template and expression parsing
//!
//! String scalars in a config may embed expressions:
//! - `${var.region}` - variable access
//! - `${var.ports[0]}` / `${var.tags["env"]}` - indexing
//! - `${lookup(var.versions, "nginx", "latest")}` - function calls
//! - `${abs(var.offset - 10)}` - arithmetic on numbers
//! - `$${literal}` - escaped (literal) `${`
//!
//! Parsing produces a [`Template`]: literal text interleaved with parsed
//! [`Expr`] trees. Evaluation lives in [`crate::scope`].

use std::fmt;

use crate::error::{Error, Result};

/// A parsed template string
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    parts: Vec<TemplatePart>,
}

/// One piece of a template
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    /// Literal text (escapes already applied)
    Literal(String),
    /// An embedded `${ ... }` expression
    Interpolation(Expr),
}

/// Expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value
    Literal(Literal),
    /// A dotted variable access such as `var.region`
    VariableAccess { name: String },
    /// `target[key]`
    Index { target: Box<Expr>, key: Box<Expr> },
    /// `func(args...)`
    Call { func: String, args: Vec<Expr> },
    /// A binary arithmetic operation
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary minus on a non-literal operand
    Negate(Box<Expr>),
}

/// Literal values in expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    fn symbol(self) -> char {
        match self {
            ArithmeticOp::Add => '+',
            ArithmeticOp::Sub => '-',
            ArithmeticOp::Mul => '*',
            ArithmeticOp::Div => '/',
            ArithmeticOp::Mod => '%',
        }
    }
}

impl Template {
    /// Parse a template string
    pub fn parse(input: &str) -> Result<Self> {
        TemplateParser::new(input).parse()
    }

    /// The original template text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Literal and interpolation parts, in order
    pub fn parts(&self) -> &[TemplatePart] {
        &self.parts
    }

    /// The expression when the whole template is exactly one interpolation
    pub fn single_expression(&self) -> Option<&Expr> {
        match self.parts.as_slice() {
            [TemplatePart::Interpolation(expr)] => Some(expr),
            _ => None,
        }
    }

    /// All embedded expressions, in order
    pub fn expressions(&self) -> impl Iterator<Item = &Expr> {
        self.parts.iter().filter_map(|part| match part {
            TemplatePart::Interpolation(expr) => Some(expr),
            TemplatePart::Literal(_) => None,
        })
    }
}

impl Expr {
    /// Visit this node and every descendant, parents before children
    pub fn accept<F: FnMut(&Expr)>(&self, f: &mut F) {
        f(self);
        match self {
            Expr::Index { target, key } => {
                target.accept(f);
                key.accept(f);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.accept(f);
                }
            }
            Expr::Arithmetic { left, right, .. } => {
                left.accept(f);
                right.accept(f);
            }
            Expr::Negate(inner) => inner.accept(f),
            Expr::Literal(_) | Expr::VariableAccess { .. } => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Literal::String(s)) => write!(f, "{:?}", s),
            Expr::Literal(Literal::Integer(i)) => write!(f, "{}", i),
            Expr::Literal(Literal::Float(n)) => write!(f, "{}", n),
            Expr::Literal(Literal::Bool(b)) => write!(f, "{}", b),
            Expr::VariableAccess { name } => write!(f, "{}", name),
            Expr::Index { target, key } => write!(f, "{}[{}]", target, key),
            Expr::Call { func, args } => {
                write!(f, "{}(", func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Arithmetic { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Negate(inner) => write!(f, "-{}", inner),
        }
    }
}

/// Parser for templates and the expressions inside them
/// Deepest nesting of parentheses, indexes, call arguments and negations
const MAX_NESTING: usize = 128;

struct TemplateParser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> TemplateParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    fn parse(mut self) -> Result<Template> {
        let mut parts: Vec<TemplatePart> = Vec::new();

        while !self.is_eof() {
            if self.rest().starts_with("$${") {
                self.pos += 3;
                push_literal(&mut parts, "${");
            } else if self.rest().starts_with("${") {
                self.pos += 2;
                self.skip_whitespace();
                if self.current() == Some('}') {
                    return Err(self.error("Empty interpolation expression"));
                }
                let expr = self.parse_expr()?;
                self.skip_whitespace();
                match self.current() {
                    Some('}') => self.advance(),
                    Some(c) => {
                        return Err(self.error(format!("Unexpected character '{}'", c)));
                    }
                    None => return Err(self.error("Unexpected end of input in interpolation")),
                }
                parts.push(TemplatePart::Interpolation(expr));
            } else {
                let literal = self.collect_literal();
                push_literal(&mut parts, &literal);
            }
        }

        Ok(Template {
            source: self.input.to_string(),
            parts,
        })
    }

    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current() {
            if !c.is_whitespace() {
                break;
            }
            self.advance();
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let column = self.input[..self.pos].chars().count() + 1;
        Error::parse(format!(
            "{} at column {} in '{}'",
            message.into(),
            column,
            self.input
        ))
    }

    /// Collect literal text until the next interpolation or escape
    fn collect_literal(&mut self) -> String {
        let start = self.pos;
        while !self.is_eof() && !self.rest().starts_with("${") && !self.rest().starts_with("$${")
        {
            self.advance();
        }
        self.input[start..self.pos].to_string()
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.nested(Self::parse_additive)
    }

    /// Run a recursive production, bounded by `MAX_NESTING`
    fn nested(&mut self, parse: fn(&mut Self) -> Result<Expr>) -> Result<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("Expression nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_whitespace();
            let op = match self.current() {
                Some('+') => ArithmeticOp::Add,
                Some('-') => ArithmeticOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = match self.current() {
                Some('*') => ArithmeticOp::Mul,
                Some('/') => ArithmeticOp::Div,
                Some('%') => ArithmeticOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.skip_whitespace();
        if self.current() != Some('-') {
            return self.parse_postfix();
        }
        self.advance();
        Ok(match self.nested(Self::parse_unary)? {
            Expr::Literal(Literal::Integer(i)) => Expr::Literal(Literal::Integer(-i)),
            Expr::Literal(Literal::Float(f)) => Expr::Literal(Literal::Float(-f)),
            other => Expr::Negate(Box::new(other)),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            self.skip_whitespace();
            if self.current() != Some('[') {
                return Ok(expr);
            }
            self.advance();
            let key = self.parse_expr()?;
            self.skip_whitespace();
            if self.current() != Some(']') {
                return Err(self.error("Expected ']' to close index"));
            }
            self.advance();
            expr = Expr::Index {
                target: Box::new(expr),
                key: Box::new(key),
            };
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        self.skip_whitespace();
        match self.current() {
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some('"') => Ok(Expr::Literal(Literal::String(self.parse_string()?))),
            Some('(') => {
                self.advance();
                let expr = self.parse_expr()?;
                self.skip_whitespace();
                if self.current() != Some(')') {
                    return Err(self.error("Expected ')'"));
                }
                self.advance();
                Ok(expr)
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.collect_identifier();
                self.skip_whitespace();
                if self.current() == Some('(') {
                    let args = self.parse_call_args(&ident)?;
                    return Ok(Expr::Call { func: ident, args });
                }
                Ok(match ident.as_str() {
                    "true" => Expr::Literal(Literal::Bool(true)),
                    "false" => Expr::Literal(Literal::Bool(false)),
                    _ => Expr::VariableAccess { name: ident },
                })
            }
            Some(c) => Err(self.error(format!("Unexpected character '{}'", c))),
            None => Err(self.error("Unexpected end of input in interpolation")),
        }
    }

    fn parse_number(&mut self) -> Result<Expr> {
        let start = self.pos;
        while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        let is_float = self.current() == Some('.')
            && self.rest()[1..].starts_with(|c: char| c.is_ascii_digit());
        if is_float {
            self.advance();
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.input[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(|f| Expr::Literal(Literal::Float(f)))
                .map_err(|_| self.error(format!("Invalid number '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(|i| Expr::Literal(Literal::Integer(i)))
                .map_err(|_| self.error(format!("Integer '{}' out of range", text)))
        }
    }

    fn parse_string(&mut self) -> Result<String> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(value);
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.current() {
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some(c) => return Err(self.error(format!("Invalid escape '\\{}'", c))),
                        None => return Err(self.error("Unterminated string")),
                    };
                    value.push(escaped);
                    self.advance();
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
                None => return Err(self.error("Unterminated string")),
            }
        }
    }

    fn parse_call_args(&mut self, func: &str) -> Result<Vec<Expr>> {
        self.advance(); // (
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.current() == Some(')') {
            self.advance();
            return Ok(args);
        }

        loop {
            args.push(self.parse_expr()?);
            self.skip_whitespace();
            match self.current() {
                Some(',') => self.advance(),
                Some(')') => {
                    self.advance();
                    return Ok(args);
                }
                _ => {
                    return Err(self.error(format!("Expected ',' or ')' in call to {}", func)));
                }
            }
        }
    }

    /// Collect a dotted identifier (alphanumeric, _, -, ., *)
    fn collect_identifier(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.current() {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '*') {
                self.advance();
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_string()
    }
}

fn push_literal(parts: &mut Vec<TemplatePart>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(TemplatePart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(TemplatePart::Literal(text.to_string()));
    }
}

/// Parse a template string
pub fn parse(input: &str) -> Result<Template> {
    Template::parse(input)
}

/// Check if a string needs processing (has interpolations OR escape sequences)
pub fn needs_processing(input: &str) -> bool {
    input.contains("${")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn var(name: &str) -> Expr {
        Expr::VariableAccess { name: name.into() }
    }

    fn single(input: &str) -> Expr {
        let template = parse(input).unwrap();
        template.single_expression().cloned().unwrap()
    }

    #[test]
    fn test_parse_literal() {
        let template = parse("hello world").unwrap();
        assert_eq!(
            template.parts(),
            &[TemplatePart::Literal("hello world".into())]
        );
        assert!(template.single_expression().is_none());
    }

    #[test]
    fn test_parse_variable_access() {
        assert_eq!(single("${var.region}"), var("var.region"));
        assert_eq!(single("${ var.region }"), var("var.region"));
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(
            single(r#"${var.tags["env"]}"#),
            Expr::Index {
                target: Box::new(var("var.tags")),
                key: Box::new(Expr::Literal(Literal::String("env".into()))),
            }
        );
        assert_eq!(
            single("${var.ports[1]}"),
            Expr::Index {
                target: Box::new(var("var.ports")),
                key: Box::new(Expr::Literal(Literal::Integer(1))),
            }
        );
    }

    #[test]
    fn test_parse_call() {
        assert_eq!(
            single(r#"${lookup(var.versions, "nginx", "latest")}"#),
            Expr::Call {
                func: "lookup".into(),
                args: vec![
                    var("var.versions"),
                    Expr::Literal(Literal::String("nginx".into())),
                    Expr::Literal(Literal::String("latest".into())),
                ],
            }
        );
        assert_eq!(
            single("${keys()}"),
            Expr::Call {
                func: "keys".into(),
                args: vec![],
            }
        );
    }

    #[test]
    fn test_parse_negative_literal() {
        assert_eq!(single("${-5}"), Expr::Literal(Literal::Integer(-5)));
        assert_eq!(
            single("${abs(-2.5)}"),
            Expr::Call {
                func: "abs".into(),
                args: vec![Expr::Literal(Literal::Float(-2.5))],
            }
        );
        assert_eq!(
            single("${-var.offset}"),
            Expr::Negate(Box::new(var("var.offset")))
        );
    }

    #[test]
    fn test_parse_arithmetic_precedence() {
        let expr = single("${1 + 2 * 3}");
        assert_eq!(expr.to_string(), "(1 + (2 * 3))");

        let expr = single("${(1 + 2) * 3}");
        assert_eq!(expr.to_string(), "((1 + 2) * 3)");
    }

    #[test]
    fn test_parse_bool_literals() {
        assert_eq!(single("${true}"), Expr::Literal(Literal::Bool(true)));
        assert_eq!(single("${false}"), Expr::Literal(Literal::Bool(false)));
    }

    #[test]
    fn test_parse_concatenation() {
        let template = parse("http://${var.host}:${var.port}/").unwrap();
        assert_eq!(template.parts().len(), 5);
        assert_eq!(template.expressions().count(), 2);
        assert!(template.single_expression().is_none());
    }

    #[test]
    fn test_parse_escape() {
        let template = parse("$${not_interpolated} and ${var.x}").unwrap();
        assert_eq!(
            template.parts(),
            &[
                TemplatePart::Literal("${not_interpolated} and ".into()),
                TemplatePart::Interpolation(var("var.x")),
            ]
        );
    }

    #[test]
    fn test_parse_string_escapes() {
        assert_eq!(
            single(r#"${"a\"b\\c\n"}"#),
            Expr::Literal(Literal::String("a\"b\\c\n".into()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("${}").unwrap_err().to_string().contains("Empty"));
        assert!(parse("${var.x").is_err());
        assert!(parse("${var.x[0}").is_err());
        assert!(parse(r#"${"open}"#).is_err());
        assert!(parse("${lookup(var.m, 1}").is_err());
        assert!(parse("${var.x ! 1}").is_err());
        assert!(parse("${99999999999999999999}").is_err());
    }

    #[test]
    fn test_parse_error_mentions_source() {
        let err = parse("prefix ${var.x").unwrap_err();
        assert!(err.to_string().contains("'prefix ${var.x'"));
    }

    #[test]
    fn test_accept_visits_parent_before_children() {
        let expr = single(r#"${lookup(var.m[0], "k")}"#);
        let mut seen = Vec::new();
        expr.accept(&mut |node| seen.push(node.to_string()));

        assert_eq!(
            seen,
            vec![
                r#"lookup(var.m[0], "k")"#.to_string(),
                "var.m[0]".to_string(),
                "var.m".to_string(),
                "0".to_string(),
                r#""k""#.to_string(),
            ]
        );
    }

    #[test]
    fn test_deep_nesting_is_an_error() {
        let deep = format!("${{{}1{}}}", "(".repeat(20_000), ")".repeat(20_000));
        let err = parse(&deep).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert!(err.to_string().contains("Expression nested too deeply"));

        let negations = format!("${{{}1}}", "-".repeat(20_000));
        assert!(parse(&negations).is_err());

        let shallow = format!("${{{}1{}}}", "(".repeat(100), ")".repeat(100));
        assert!(parse(&shallow).is_ok());
    }

    #[test]
    fn test_needs_processing() {
        assert!(needs_processing("${var.x}"));
        assert!(needs_processing("$${escaped}"));
        assert!(!needs_processing("plain $ text {}"));
    }
}
