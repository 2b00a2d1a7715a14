//! Arithmetic evaluator for the `calculator` tool.
//!
//! Grammar:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := '-' unary | '+' unary | factor
//! factor := number | '(' expr ')'
//! ```
//!
//! Nothing outside this grammar is ever evaluated.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use operarius_core::tools::{object_schema, string_property, Tool, ToolError, ToolOutput, ToolResult};
use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

use super::required_str;

static ALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9+\-*/().\s]+$").expect("calculator regex"));

/// Maximum nesting of parentheses and unary operators.
const MAX_DEPTH: usize = 64;

/// Maximum expression length in bytes.
const MAX_EXPRESSION_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("expression is empty")]
    Empty,

    #[error("expression contains invalid characters")]
    InvalidCharacters,

    #[error("expression is too long")]
    TooLong,

    #[error("unexpected '{found}' at position {position}")]
    Unexpected { found: char, position: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("expression nested too deeply")]
    TooDeep,

    #[error("result is not a finite number")]
    NotFinite,
}

impl From<CalcError> for ToolError {
    fn from(err: CalcError) -> Self {
        ToolError::InvalidArguments(err.to_string())
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(CalcError::TooLong);
    }
    if expression.trim().is_empty() {
        return Err(CalcError::Empty);
    }
    if !ALLOWED_CHARS.is_match(expression) {
        return Err(CalcError::InvalidCharacters);
    }

    let mut parser = Parser {
        chars: expression.char_indices().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    parser.skip_whitespace();
    if let Some(&(position, found)) = parser.chars.get(parser.pos) {
        return Err(CalcError::Unexpected { found, position });
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

struct Parser {
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn skip_whitespace(&mut self) {
        while self.chars.get(self.pos).is_some_and(|(_, c)| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            if op == '+' {
                value += rhs;
            } else {
                value -= rhs;
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            if op == '*' {
                value *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err(CalcError::DivisionByZero);
                }
                value /= rhs;
            }
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some(sign @ ('-' | '+')) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary();
                self.depth -= 1;
                let value = value?;
                Ok(if sign == '-' { -value } else { value })
            }
            _ => self.factor(),
        }
    }

    fn factor(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                self.descend()?;
                let value = self.expr();
                self.depth -= 1;
                let value = value?;
                match self.peek() {
                    Some(')') => {
                        self.pos += 1;
                        Ok(value)
                    }
                    Some(found) => Err(CalcError::Unexpected {
                        found,
                        position: self.chars[self.pos].0,
                    }),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(found) => Err(CalcError::Unexpected {
                found,
                position: self.chars[self.pos].0,
            }),
            None => Err(CalcError::UnexpectedEnd),
        }
    }

    fn number(&mut self) -> Result<f64, CalcError> {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|(_, c)| c.is_ascii_digit() || *c == '.')
        {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos].iter().map(|&(_, c)| c).collect();
        literal
            .parse::<f64>()
            .map_err(|_| CalcError::InvalidNumber(literal))
    }

    fn descend(&mut self) -> Result<(), CalcError> {
        if self.depth >= MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        self.depth += 1;
        Ok(())
    }
}

/// Safe arithmetic calculator.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression using + - * / and parentheses"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({ "expression": string_property("Arithmetic expression, e.g. (2 + 3) * 4") }),
            vec!["expression".to_string()],
        )
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        let expression = required_str(&args, "expression")?;
        let result = evaluate(expression)?;
        Ok(ToolOutput::success(json!({
            "expression": expression,
            "result": result,
        })))
    }
}
