//! Custom functions: reusable subgraphs (or raw closures) invoked through
//! call nodes.
//!
//! A graph-defined function builds its body exactly once against private
//! placeholder variables; every call site is a single node carrying the
//! argument ids. During forward evaluation the placeholders are assigned
//! the call's argument values (which invalidates the body's caches through
//! the normal parent walk) and the body is evaluated. During the backward
//! pass the partials with respect to each argument come from a local
//! adjoint sweep over the body, so nothing leaks into the surrounding pass
//! or across nested invocations.

use std::fmt;

use super::{ExprError, Graph, NodeId, Op};

/// Handle to a function defined on a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub(crate) u32);

impl FuncId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

type ValueFn = Box<dyn Fn(&[f64]) -> Result<f64, ExprError>>;
type GradFn = Box<dyn Fn(&[f64]) -> Result<Vec<f64>, ExprError>>;

pub(crate) enum FunctionKind {
    /// Body graph over placeholder variables, built once at definition.
    Body { params: Vec<NodeId>, body: NodeId },
    /// Raw value/gradient closures, bypassing graph construction.
    Raw { value: ValueFn, gradient: GradFn },
}

pub(crate) struct Function {
    pub(crate) name: String,
    pub(crate) arity: usize,
    pub(crate) kind: FunctionKind,
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FunctionKind::Body { .. } => "body",
            FunctionKind::Raw { .. } => "raw",
        };
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("kind", &kind)
            .finish()
    }
}

impl Graph {
    /// Defines a function of `arity` arguments by building its body graph
    /// once against placeholder variables.
    ///
    /// The builder receives the graph and the placeholder ids and returns
    /// the body root. The placeholders are ordinary variables; callers must
    /// not keep using them outside the body.
    pub fn define_fn<F>(&mut self, arity: usize, name: &str, build: F) -> Result<FuncId, ExprError>
    where
        F: FnOnce(&mut Graph, &[NodeId]) -> Result<NodeId, ExprError>,
    {
        let params: Vec<NodeId> = (0..arity).map(|_| self.variable()).collect();
        let body = build(self, &params)?;
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Function {
            name: name.to_string(),
            arity,
            kind: FunctionKind::Body { params, body },
        });
        Ok(id)
    }

    /// Defines a function from raw value and gradient closures.
    ///
    /// The gradient closure must return exactly `arity` partials.
    pub fn define_raw_fn<V, D>(&mut self, arity: usize, name: &str, value: V, gradient: D) -> FuncId
    where
        V: Fn(&[f64]) -> Result<f64, ExprError> + 'static,
        D: Fn(&[f64]) -> Result<Vec<f64>, ExprError> + 'static,
    {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Function {
            name: name.to_string(),
            arity,
            kind: FunctionKind::Raw {
                value: Box::new(value),
                gradient: Box::new(gradient),
            },
        });
        id
    }

    /// Inserts a call node applying `func` to `args`.
    pub fn call(&mut self, func: FuncId, args: &[NodeId]) -> Result<NodeId, ExprError> {
        let f = self.function(func)?;
        if args.len() != f.arity {
            return Err(ExprError::ArityMismatch {
                name: f.name.clone(),
                expected: f.arity,
                got: args.len(),
            });
        }
        Ok(self.push(Op::Call {
            func,
            args: args.to_vec(),
        }))
    }

    /// Evaluates `func` directly on raw inputs, outside any call node.
    ///
    /// Placeholder assignment goes through the normal invalidation walk, so
    /// repeated queries with different inputs never observe a stale cache.
    pub fn call_value(&mut self, func: FuncId, inputs: &[f64]) -> Result<f64, ExprError> {
        self.check_arity(func, inputs.len())?;
        self.eval_function(func, inputs)
    }

    /// Gradient of `func` at raw inputs, one partial per argument.
    pub fn call_gradient(&mut self, func: FuncId, inputs: &[f64]) -> Result<Vec<f64>, ExprError> {
        self.check_arity(func, inputs.len())?;
        self.call_partials(func, inputs)
    }

    pub(crate) fn function(&self, func: FuncId) -> Result<&Function, ExprError> {
        self.functions
            .get(func.index())
            .ok_or(ExprError::InvalidFunction { id: func.0 })
    }

    fn check_arity(&self, func: FuncId, got: usize) -> Result<(), ExprError> {
        let f = self.function(func)?;
        if got != f.arity {
            return Err(ExprError::ArityMismatch {
                name: f.name.clone(),
                expected: f.arity,
                got,
            });
        }
        Ok(())
    }

    /// Forward evaluation of a call node: evaluate the arguments, then the
    /// function on their values.
    pub(crate) fn call_forward(&mut self, func: FuncId, args: &[NodeId]) -> Result<f64, ExprError> {
        self.check_arity(func, args.len())?;
        let mut argv = Vec::with_capacity(args.len());
        for &a in args {
            argv.push(self.value(a)?);
        }
        self.eval_function(func, &argv)
    }

    fn eval_function(&mut self, func: FuncId, argv: &[f64]) -> Result<f64, ExprError> {
        let (params, body) = match &self.function(func)?.kind {
            FunctionKind::Raw { value, .. } => return value(argv),
            FunctionKind::Body { params, body } => (params.clone(), *body),
        };
        for (&p, &v) in params.iter().zip(argv.iter()) {
            self.set_value(p, v)?;
        }
        self.value(body)
    }

    /// Partials of `func` at `argv`, via a local adjoint sweep over the
    /// body (or the raw gradient closure). Never touches per-node gradient
    /// slots.
    pub(crate) fn call_partials(&mut self, func: FuncId, argv: &[f64]) -> Result<Vec<f64>, ExprError> {
        let (params, body) = match &self.function(func)?.kind {
            FunctionKind::Raw { gradient, .. } => {
                let f = self.function(func)?;
                let (name, arity) = (f.name.clone(), f.arity);
                let partials = gradient(argv)?;
                if partials.len() != arity {
                    return Err(ExprError::GradientArity {
                        name,
                        expected: arity,
                        got: partials.len(),
                    });
                }
                return Ok(partials);
            }
            FunctionKind::Body { params, body } => (params.clone(), *body),
        };
        for (&p, &v) in params.iter().zip(argv.iter()) {
            self.set_value(p, v)?;
        }
        let adj = self.reverse_sweep(body, 1.0)?;
        Ok(params
            .iter()
            .map(|p| adj.get(p).copied().unwrap_or(0.0))
            .collect())
    }
}
