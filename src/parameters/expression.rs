//! Expression parsing and evaluation for parameter ties
//!
//! Tie expressions are plain arithmetic over parameter names. Names may carry
//! function prefixes (`f0.Height`, `f1.f0.Sigma`), so identifiers accept dots
//! after their first character.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::recognize,
    multi::many0,
    number::complete::double,
    sequence::pair,
    IResult, Parser,
};
use std::collections::HashMap;
use std::fmt::Write;
use thiserror::Error;

/// Error that can occur during expression parsing or evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Failed to parse expression: {message}")]
    ParseError { message: String },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Undefined function: {name}")]
    UndefinedFunction { name: String },
}

/// Result type for expression evaluation
type ExprResult<T> = Result<T, ExpressionError>;

/// Expression AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant number
    Number(f64),

    /// Variable reference
    Variable(String),

    /// Unary operations
    Unary(UnaryOp, Box<Expression>),

    /// Binary operations
    Binary(BinaryOp, Box<Expression>, Box<Expression>),

    /// Function call
    Function(String, Vec<Expression>),
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
}

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    /// Addition (+)
    Add,

    /// Subtraction (-)
    Sub,

    /// Multiplication (*)
    Mul,

    /// Division (/)
    Div,

    /// Power (^)
    Pow,
}

impl BinaryOp {
    fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
            BinaryOp::Pow => '^',
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
            BinaryOp::Pow => 4,
        }
    }
}

const UNARY_PRECEDENCE: u8 = 3;
const ATOM_PRECEDENCE: u8 = 5;

/// Context for expression evaluation, providing variable values
pub trait EvaluationContext {
    /// Get the value of a variable
    fn get_variable(&self, name: &str) -> ExprResult<f64>;
}

/// Simple implementation of EvaluationContext using a HashMap
#[derive(Debug, Clone, Default)]
pub struct SimpleContext {
    variables: HashMap<String, f64>,
}

impl SimpleContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable value
    pub fn set_variable(&mut self, name: &str, value: f64) {
        self.variables.insert(name.to_string(), value);
    }
}

impl EvaluationContext for SimpleContext {
    fn get_variable(&self, name: &str) -> ExprResult<f64> {
        self.variables
            .get(name)
            .copied()
            .ok_or_else(|| ExpressionError::UndefinedVariable {
                name: name.to_string(),
            })
    }
}

impl Expression {
    /// Parse an expression from a string
    pub fn parse(input: &str) -> ExprResult<Self> {
        match expr_parser(input.trim()) {
            Ok((remainder, expr)) => {
                if remainder.trim().is_empty() {
                    Ok(expr)
                } else {
                    Err(ExpressionError::ParseError {
                        message: format!("Unexpected trailing characters: '{}'", remainder),
                    })
                }
            }
            Err(e) => Err(ExpressionError::ParseError {
                message: format!("'{}': {:?}", input, e),
            }),
        }
    }

    /// Evaluate the expression with the given context
    pub fn evaluate<C: EvaluationContext + ?Sized>(&self, context: &C) -> ExprResult<f64> {
        match self {
            Self::Number(n) => Ok(*n),

            Self::Variable(name) => context.get_variable(name),

            Self::Unary(UnaryOp::Neg, expr) => Ok(-expr.evaluate(context)?),

            Self::Binary(op, left, right) => {
                let lhs = left.evaluate(context)?;
                let rhs = right.evaluate(context)?;

                match op {
                    BinaryOp::Add => Ok(lhs + rhs),
                    BinaryOp::Sub => Ok(lhs - rhs),
                    BinaryOp::Mul => Ok(lhs * rhs),
                    BinaryOp::Div => {
                        if rhs == 0.0 {
                            Err(ExpressionError::DivisionByZero)
                        } else {
                            Ok(lhs / rhs)
                        }
                    }
                    BinaryOp::Pow => Ok(lhs.powf(rhs)),
                }
            }

            Self::Function(name, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(context))
                    .collect::<ExprResult<Vec<f64>>>()?;
                call_function(name, &values)
            }
        }
    }

    /// Find all variable names used in the expression, sorted and deduplicated
    pub fn variables(&self) -> Vec<String> {
        let mut vars = Vec::new();
        self.collect_variables(&mut vars);
        vars.sort();
        vars.dedup();
        vars
    }

    fn collect_variables(&self, vars: &mut Vec<String>) {
        match self {
            Self::Number(_) => {}
            Self::Variable(name) => vars.push(name.clone()),
            Self::Unary(_, expr) => expr.collect_variables(vars),
            Self::Binary(_, left, right) => {
                left.collect_variables(vars);
                right.collect_variables(vars);
            }
            Self::Function(_, args) => {
                for arg in args {
                    arg.collect_variables(vars);
                }
            }
        }
    }

    /// Render the expression back to text, renaming every variable through
    /// `rename`. Returns `None` if `rename` rejects any variable.
    ///
    /// The output parses back into an equal expression.
    pub fn render<F>(&self, rename: &F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::new();
        self.write_to(&mut out, 0, rename)?;
        Some(out)
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Number(n) if *n < 0.0 => UNARY_PRECEDENCE,
            Self::Number(_) | Self::Variable(_) | Self::Function(..) => ATOM_PRECEDENCE,
            Self::Unary(..) => UNARY_PRECEDENCE,
            Self::Binary(op, ..) => op.precedence(),
        }
    }

    fn write_to<F>(&self, out: &mut String, min_precedence: u8, rename: &F) -> Option<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parenthesize = self.precedence() < min_precedence;
        if parenthesize {
            out.push('(');
        }
        match self {
            Self::Number(n) => {
                let _ = write!(out, "{}", n);
            }
            Self::Variable(name) => out.push_str(&rename(name)?),
            Self::Unary(UnaryOp::Neg, expr) => {
                out.push('-');
                expr.write_to(out, UNARY_PRECEDENCE, rename)?;
            }
            Self::Binary(op, left, right) => {
                let (left_min, right_min) = match op {
                    // Right-associative, and the exponent is parsed as a unary
                    BinaryOp::Pow => (ATOM_PRECEDENCE, UNARY_PRECEDENCE),
                    _ => (op.precedence(), op.precedence() + 1),
                };
                left.write_to(out, left_min, rename)?;
                out.push(op.symbol());
                right.write_to(out, right_min, rename)?;
            }
            Self::Function(name, args) => {
                out.push_str(name);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    arg.write_to(out, 0, rename)?;
                }
                out.push(')');
            }
        }
        if parenthesize {
            out.push(')');
        }
        Some(())
    }
}

fn call_function(name: &str, args: &[f64]) -> ExprResult<f64> {
    let one_arg = |f: fn(f64) -> f64| -> ExprResult<f64> {
        match args {
            [value] => Ok(f(*value)),
            _ => Err(ExpressionError::InvalidOperation {
                message: format!("{}() requires 1 argument, got {}", name, args.len()),
            }),
        }
    };

    match name {
        "sin" => one_arg(f64::sin),
        "cos" => one_arg(f64::cos),
        "tan" => one_arg(f64::tan),
        "exp" => one_arg(f64::exp),
        "log" | "ln" => one_arg(f64::ln),
        "log10" => one_arg(f64::log10),
        "sqrt" => one_arg(f64::sqrt),
        "abs" => one_arg(f64::abs),
        "max" | "min" => {
            if args.len() < 2 {
                return Err(ExpressionError::InvalidOperation {
                    message: format!(
                        "{}() requires at least 2 arguments, got {}",
                        name,
                        args.len()
                    ),
                });
            }
            if name == "max" {
                Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            } else {
                Ok(args.iter().copied().fold(f64::INFINITY, f64::min))
            }
        }
        _ => Err(ExpressionError::UndefinedFunction {
            name: name.to_string(),
        }),
    }
}

// Parser functions using nom

fn ws(input: &str) -> IResult<&str, &str> {
    multispace0(input)
}

fn number(input: &str) -> IResult<&str, f64> {
    double(input)
}

/// Match `c` after optional whitespace
fn symbol(input: &str, c: char) -> IResult<&str, char> {
    let (input, _) = ws(input)?;
    char(c).parse(input)
}

/// Parse an identifier: a letter or underscore followed by letters, digits,
/// underscores or dots
fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_"), tag(".")))),
    ))
    .parse(input)
}

/// Parse a comma-separated list of expressions (for function arguments)
fn args_list(input: &str) -> IResult<&str, Vec<Expression>> {
    let (mut input, first) = expr_parser(input)?;
    let mut args = vec![first];
    while let Ok((rest, _)) = symbol(input, ',') {
        let (rest, arg) = expr_parser(rest)?;
        args.push(arg);
        input = rest;
    }
    Ok((input, args))
}

/// Parse a variable or a function call, both of which start with an identifier
fn named(input: &str) -> IResult<&str, Expression> {
    let (input, name) = identifier(input)?;
    match symbol(input, '(') {
        Ok((rest, _)) => {
            if let Ok((rest, _)) = symbol(rest, ')') {
                return Ok((rest, Expression::Function(name.to_string(), vec![])));
            }
            let (rest, args) = args_list(rest)?;
            let (rest, _) = symbol(rest, ')')?;
            Ok((rest, Expression::Function(name.to_string(), args)))
        }
        Err(_) => Ok((input, Expression::Variable(name.to_string()))),
    }
}

/// Parse a parenthesized expression
fn parens(input: &str) -> IResult<&str, Expression> {
    let (input, _) = symbol(input, '(')?;
    let (input, expr) = expr_parser(input)?;
    let (input, _) = symbol(input, ')')?;
    Ok((input, expr))
}

/// Parse a primary expression (number, variable, function call, or parenthesized expression)
fn primary(input: &str) -> IResult<&str, Expression> {
    let (input, _) = ws(input)?;
    // Names go first so that identifiers such as `nan_fraction` are not read
    // as the float literal `nan`.
    if let Ok(result) = named(input) {
        return Ok(result);
    }
    if input.starts_with('(') {
        return parens(input);
    }
    let (input, value) = number(input)?;
    Ok((input, Expression::Number(value)))
}

/// Parse a unary expression (-expr)
fn unary(input: &str) -> IResult<&str, Expression> {
    match symbol(input, '-') {
        Ok((rest, _)) => {
            let (rest, expr) = unary(rest)?;
            Ok((rest, Expression::Unary(UnaryOp::Neg, Box::new(expr))))
        }
        Err(_) => power(input),
    }
}

/// Parse a power expression (expr ^ expr), right-associative
fn power(input: &str) -> IResult<&str, Expression> {
    let (input, base) = primary(input)?;
    match symbol(input, '^') {
        Ok((rest, _)) => {
            let (rest, exponent) = unary(rest)?;
            Ok((
                rest,
                Expression::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)),
            ))
        }
        Err(_) => Ok((input, base)),
    }
}

/// Parse a left-associative chain of `operand (op operand)*`
fn chain<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Expression>,
    ops: &[(char, BinaryOp)],
) -> IResult<&'a str, Expression> {
    let (mut input, mut left) = operand(input)?;
    'outer: loop {
        for &(c, op) in ops {
            if let Ok((rest, _)) = symbol(input, c) {
                let (rest, right) = operand(rest)?;
                left = Expression::Binary(op, Box::new(left), Box::new(right));
                input = rest;
                continue 'outer;
            }
        }
        return Ok((input, left));
    }
}

/// Parse a multiplicative expression (expr * expr, expr / expr)
fn term(input: &str) -> IResult<&str, Expression> {
    chain(input, unary, &[('*', BinaryOp::Mul), ('/', BinaryOp::Div)])
}

/// Parse an additive expression (expr + expr, expr - expr)
fn expr_parser(input: &str) -> IResult<&str, Expression> {
    chain(input, term, &[('+', BinaryOp::Add), ('-', BinaryOp::Sub)])
}
