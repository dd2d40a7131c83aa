//! Ties: a declared parameter whose value is computed from other parameters.

use std::collections::HashSet;

use crate::error::{FitError, Result};
use crate::function::ModelFunction;
use crate::parameters::expression::{EvaluationContext, Expression, ExpressionError};
use crate::parameters::reference::{FunctionId, ParameterReference, ParameterValues};

/// A tie of `target` to an expression over other parameters.
///
/// Variable names in the expression are bound to [`ParameterReference`]s
/// when the tie is created, so the tie keeps working however the tree is
/// reshaped afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Tie {
    target: ParameterReference,
    expression: Expression,
    bindings: Vec<(String, ParameterReference)>,
}

struct BoundContext<'a> {
    bindings: &'a [(String, ParameterReference)],
    values: &'a ParameterValues,
}

impl EvaluationContext for BoundContext<'_> {
    fn get_variable(&self, name: &str) -> std::result::Result<f64, ExpressionError> {
        self.bindings
            .iter()
            .find(|(var, _)| var == name)
            .and_then(|(_, reference)| self.values.get(reference))
            .ok_or_else(|| ExpressionError::UndefinedVariable {
                name: name.to_string(),
            })
    }
}

impl Tie {
    /// Create a tie. Every variable of `expression` must have a binding.
    pub fn new(
        target: ParameterReference,
        expression: Expression,
        bindings: Vec<(String, ParameterReference)>,
    ) -> Result<Self> {
        for var in expression.variables() {
            if !bindings.iter().any(|(name, _)| *name == var) {
                return Err(FitError::LogicError(format!(
                    "tie variable '{}' is not bound to a parameter",
                    var
                )));
            }
        }
        if bindings.iter().any(|(_, reference)| *reference == target) {
            return Err(FitError::LogicError(
                "a parameter cannot be tied to itself".to_string(),
            ));
        }
        Ok(Self {
            target,
            expression,
            bindings,
        })
    }

    /// Parse `text` and bind each variable through `resolve`.
    pub fn parse<F>(target: ParameterReference, text: &str, resolve: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<ParameterReference>,
    {
        let expression = Expression::parse(text)?;
        let bindings = expression
            .variables()
            .into_iter()
            .map(|var| {
                let reference = resolve(&var)?;
                Ok((var, reference))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(target, expression, bindings)
    }

    pub fn target(&self) -> &ParameterReference {
        &self.target
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Parameters the expression reads.
    pub fn references(&self) -> impl Iterator<Item = &ParameterReference> + '_ {
        self.bindings.iter().map(|(_, reference)| reference)
    }

    /// A tie with no variables; it pins the parameter to a constant.
    pub fn is_constant(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Whether the expression reads a parameter of any function in `functions`.
    pub fn references_any(&self, functions: &HashSet<FunctionId>) -> bool {
        self.references()
            .any(|reference| functions.contains(&reference.function()))
    }

    /// Whether every parameter the expression reads belongs to `functions`.
    pub fn references_only(&self, functions: &HashSet<FunctionId>) -> bool {
        self.references()
            .all(|reference| functions.contains(&reference.function()))
    }

    /// Evaluate the tie against a snapshot.
    ///
    /// Returns `Ok(None)` when a referenced function is missing from the
    /// snapshot, which happens when a subtree refreshes its ties in isolation;
    /// the tied parameter then keeps its current value.
    pub fn evaluate(&self, values: &ParameterValues) -> Result<Option<f64>> {
        if self.references().any(|reference| values.get(reference).is_none()) {
            return Ok(None);
        }
        let context = BoundContext {
            bindings: &self.bindings,
            values,
        };
        Ok(Some(self.expression.evaluate(&context)?))
    }

    /// Expression text with parameter names relative to `root`, or `None` if
    /// some referenced parameter is not inside `root`.
    pub fn expression_string(&self, root: &dyn ModelFunction) -> Option<String> {
        self.expression.render(&|var: &str| {
            let (_, reference) = self.bindings.iter().find(|(name, _)| name == var)?;
            let index = root.parameter_index(reference)?;
            root.parameter_name(index).ok()
        })
    }
}
