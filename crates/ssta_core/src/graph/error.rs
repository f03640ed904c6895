//! Error types for expression-graph construction and evaluation.

use thiserror::Error;

/// Errors raised by graph construction, forward evaluation and the
/// backward pass.
///
/// Every failure is reported immediately with the offending value; no
/// partial results or NaNs are propagated silently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    /// Division by zero, either detected at construction (dividing by the
    /// zero constant) or during forward evaluation.
    #[error("division by zero")]
    DivisionByZero,

    /// Logarithm of a negative operand.
    #[error("logarithm of negative operand: {value}")]
    LogOfNegative {
        /// The operand value that was rejected.
        value: f64,
    },

    /// Square root of a negative operand.
    #[error("square root of negative operand: {value}")]
    SqrtOfNegative {
        /// The operand value that was rejected.
        value: f64,
    },

    /// `0^0` is undefined and rejected at construction and evaluation.
    #[error("zero raised to the power of zero")]
    ZeroPowZero,

    /// A variable was read before any value was assigned to it.
    #[error("variable {id} read before a value was assigned")]
    VariableUnset {
        /// Arena id of the offending node.
        id: u32,
    },

    /// `set_value` was called on a node that is not a variable.
    #[error("node {id} is not a variable")]
    NotAVariable {
        /// Arena id of the offending node.
        id: u32,
    },

    /// A custom function was invoked with the wrong number of arguments.
    #[error("function '{name}' expects {expected} arguments, got {got}")]
    ArityMismatch {
        /// Function name as given at definition time.
        name: String,
        /// Declared arity.
        expected: usize,
        /// Number of arguments supplied at the call site.
        got: usize,
    },

    /// A function handle does not refer to any defined function.
    #[error("invalid function handle {id}")]
    InvalidFunction {
        /// The raw handle value.
        id: u32,
    },

    /// A raw gradient callback returned the wrong number of partials.
    #[error("gradient callback for '{name}' returned {got} partials, expected {expected}")]
    GradientArity {
        /// Function name as given at definition time.
        name: String,
        /// Declared arity.
        expected: usize,
        /// Number of partials the callback returned.
        got: usize,
    },
}
