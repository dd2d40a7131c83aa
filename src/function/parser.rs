//! Building functions by name and from their text form.
//!
//! The text form is what [`ModelFunction::as_string`] produces:
//!
//! ```text
//! name=Gaussian,Height=10,implicit=(Sigma=0.4),ties=(Sigma=0.4),constraints=(0<Height)
//! name=Gaussian,Height=10;name=FlatBackground;ties=(f1.A0=0.1*f0.Height)
//! ```
//!
//! A leaf is a comma-separated list of `key=value` items starting with its
//! name. A composite is a `;`-separated list of children, where nested
//! composites are wrapped in parentheses and a final `ties=(...)` item holds
//! ties between children.
//!
//! Parameters written as `name=value` are explicitly set. Values that were
//! not chosen explicitly go in the `implicit=(...)` list, or are left out
//! when they equal the declared default.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::{FitError, Result};
use crate::function::{CompositeFunction, ModelFunction};
use crate::models::{ExpDecay, FlatBackground, Gaussian, LinearBackground, Lorentzian, Polynomial};
use crate::parameters::BoundaryConstraint;

type Constructor = Arc<dyn Fn() -> Box<dyn ModelFunction> + Send + Sync>;

/// Registry of leaf constructors keyed by function name.
///
/// # Example
///
/// ```rust
/// use fitcore::function::{FunctionFactory, ModelFunction};
///
/// let factory = FunctionFactory::new();
/// let model = factory
///     .parse("name=Gaussian,Height=2,PeakCentre=1,Sigma=0.5;name=FlatBackground,A0=0.1")
///     .unwrap();
/// assert!(model.is_composite());
/// assert_eq!(model.parameter_by_name("f0.Height").unwrap(), 2.0);
/// ```
#[derive(Clone)]
pub struct FunctionFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl std::fmt::Debug for FunctionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionFactory")
            .field("names", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for FunctionFactory {
    fn default() -> Self {
        let mut factory = Self {
            constructors: BTreeMap::new(),
        };
        factory.register("Gaussian", || Box::new(Gaussian::new()));
        factory.register("Lorentzian", || Box::new(Lorentzian::new()));
        factory.register("FlatBackground", || Box::new(FlatBackground::new()));
        factory.register("LinearBackground", || Box::new(LinearBackground::new()));
        factory.register("Polynomial", || Box::new(Polynomial::new(2)));
        factory.register("ExpDecay", || Box::new(ExpDecay::new()));
        factory
    }
}

impl FunctionFactory {
    /// A factory knowing every built-in model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor used for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn ModelFunction> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.constructors.keys().map(String::as_str)
    }

    /// A fresh function with default parameter values.
    pub fn create(&self, name: &str) -> Result<Box<dyn ModelFunction>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| FitError::InvalidArgument(format!("unknown function '{}'", name)))?;
        Ok(constructor())
    }

    /// Build a function from its text form.
    ///
    /// Text containing a top-level `;`, or wrapped in parentheses, is a
    /// composite; the empty string is an empty composite. Anything else is a
    /// single leaf.
    pub fn parse(&self, text: &str) -> Result<Box<dyn ModelFunction>> {
        let text = text.trim();
        if let Some(inner) = strip_enclosing_parens(text) {
            return Ok(Box::new(self.parse_composite(inner)?));
        }
        if text.is_empty() || split_top_level(text, ';')?.len() > 1 {
            return Ok(Box::new(self.parse_composite(text)?));
        }
        self.parse_leaf(text)
    }

    fn parse_composite(&self, text: &str) -> Result<CompositeFunction> {
        let mut composite = CompositeFunction::new();
        let mut ties = Vec::new();
        for item in split_top_level(text, ';')? {
            if item.is_empty() {
                continue;
            }
            if let Some(list) = item.strip_prefix("ties=") {
                ties.push(list);
            } else if let Some(inner) = strip_enclosing_parens(item) {
                composite.add_child(self.parse_composite(inner)?)?;
            } else {
                composite.add_boxed_child(self.parse_leaf(item)?)?;
            }
        }
        for list in ties {
            apply_ties(&mut composite, list)?;
        }
        debug!(
            children = composite.n_children(),
            n_params = composite.n_params(),
            "parsed composite function"
        );
        Ok(composite)
    }

    fn parse_leaf(&self, text: &str) -> Result<Box<dyn ModelFunction>> {
        let items = split_top_level(text, ',')?;
        let mut items = items.into_iter().filter(|item| !item.is_empty());
        let (key, name) = items
            .next()
            .and_then(split_key_value)
            .ok_or_else(|| FitError::Parse(format!("missing function name in '{}'", text)))?;
        if key != "name" {
            return Err(FitError::Parse(format!(
                "function definition must start with 'name=', got '{}'",
                text
            )));
        }

        let mut function = self.create(name)?;
        let mut explicit = HashSet::new();
        let mut implicit = Vec::new();
        let mut ties = Vec::new();
        let mut constraints = Vec::new();
        for item in items {
            let (key, value) = split_key_value(item)
                .ok_or_else(|| FitError::Parse(format!("expected key=value, got '{}'", item)))?;
            match key {
                "ties" => ties.push(value),
                "constraints" => constraints.push(value),
                "implicit" => implicit.push(value),
                _ if function.attributes().iter().any(|(name, _)| name == key) => {
                    function.set_attribute(key, value)?;
                }
                _ => {
                    function.set_parameter_by_name(key, parse_value(key, value)?)?;
                    explicit.insert(function.parameter_index_of(key)?);
                }
            }
        }
        for list in implicit {
            for item in split_top_level(list_body(list)?, ',')? {
                let (key, value) = split_key_value(item).ok_or_else(|| {
                    FitError::Parse(format!("expected name=value, got '{}'", item))
                })?;
                let i = function.parameter_index_of(key)?;
                function.set_parameter(i, parse_value(key, value)?, false)?;
            }
        }
        for list in ties {
            apply_ties(function.as_mut(), list)?;
        }
        // fixing by a constant tie marks the value explicit; only values
        // written as `name=value` keep that mark
        for i in 0..function.n_params() {
            if !explicit.contains(&i) && function.is_explicitly_set(i)? {
                let value = function.parameter(i)?;
                function.set_parameter(i, value, false)?;
            }
        }
        for list in constraints {
            for (name, constraint) in parse_constraints(list)? {
                let i = function.parameter_index_of(&name)?;
                function.add_constraint(i, constraint)?;
            }
        }
        Ok(function)
    }
}

fn parse_value(name: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| FitError::Parse(format!("invalid value '{}' for parameter '{}'", value, name)))
}

/// Bounds items and `name.penalty=factor` items of one `constraints=(...)`
/// list. A penalty item applies to the constraint on the same parameter.
fn parse_constraints(list: &str) -> Result<Vec<(String, BoundaryConstraint)>> {
    let mut parsed: Vec<(String, BoundaryConstraint)> = Vec::new();
    for item in split_top_level(list_body(list)?, ',')? {
        if item.is_empty() {
            continue;
        }
        if !item.contains('=') {
            parsed.push(BoundaryConstraint::parse(item)?);
            continue;
        }
        let (name, factor) = BoundaryConstraint::parse_penalty(item)?;
        let (_, constraint) = parsed
            .iter_mut()
            .find(|(constrained, _)| *constrained == name)
            .ok_or_else(|| {
                FitError::Parse(format!("penalty factor for unconstrained parameter '{}'", name))
            })?;
        *constraint = constraint.with_penalty_factor(factor)?;
    }
    Ok(parsed)
}

fn apply_ties(function: &mut dyn ModelFunction, list: &str) -> Result<()> {
    for item in split_top_level(list_body(list)?, ',')? {
        if item.is_empty() {
            continue;
        }
        let (name, expression) = split_key_value(item)
            .ok_or_else(|| FitError::Parse(format!("expected name=expression, got '{}'", item)))?;
        function.tie(name, expression)?;
    }
    Ok(())
}

fn split_key_value(item: &str) -> Option<(&str, &str)> {
    let (key, value) = item.split_once('=')?;
    Some((key.trim(), value.trim()))
}

fn list_body(list: &str) -> Result<&str> {
    strip_enclosing_parens(list)
        .ok_or_else(|| FitError::Parse(format!("expected a parenthesized list, got '{}'", list)))
}

/// Split `text` at every `sep` outside parentheses. Parts are trimmed.
pub(crate) fn split_top_level(text: &str, sep: char) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| FitError::Parse(format!("unbalanced ')' in '{}'", text)))?;
            }
            c if c == sep && depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(FitError::Parse(format!("unbalanced '(' in '{}'", text)));
    }
    parts.push(text[start..].trim());
    Ok(parts)
}

/// The inside of `text` if the whole of it is one parenthesized group.
pub(crate) fn strip_enclosing_parens(text: &str) -> Option<&str> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0usize;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1)?,
            _ => {}
        }
    }
    (depth == 0).then_some(inner.trim())
}
