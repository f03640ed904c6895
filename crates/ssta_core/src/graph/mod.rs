//! Shared expression DAG with reverse-mode automatic differentiation.
//!
//! The graph is an arena: nodes live in a `Vec` owned by [`Graph`] and are
//! addressed by copyable [`NodeId`] handles. Child links are ids; each node
//! additionally keeps a list of parent ids that is used only to invalidate
//! cached values when a variable is reassigned. Because the arena owns every
//! node for the lifetime of the graph, sharing a subexpression between many
//! consumers is just copying an id.
//!
//! Construction applies a fixed set of identity simplifications (`x + 0 → x`,
//! `x * 1 → x`, ...). The three constants 0, 1 and −1 are interned so the id
//! comparisons behind those rewrites fire reliably.

mod autodiff;
mod error;
mod function;

pub use error::ExprError;
pub use function::FuncId;

use serde::Serialize;

pub(crate) use function::Function;

/// Handle to a node in a [`Graph`] arena.
///
/// Ids are assigned in creation order and are only meaningful for the graph
/// that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw arena index, for diagnostics.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Node operation. Operands are arena ids.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Op {
    Const(f64),
    Variable,
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    Div(NodeId, NodeId),
    Pow(NodeId, NodeId),
    Exp(NodeId),
    Ln(NodeId),
    Sqrt(NodeId),
    Erf(NodeId),
    /// Bivariate standard-normal CDF `Φ₂(h, k; ρ)` as a single primitive,
    /// so the quadrature inside it is never differentiated term by term.
    Phi2(NodeId, NodeId, NodeId),
    Call {
        func: FuncId,
        args: Vec<NodeId>,
    },
}

impl Op {
    /// Operand ids in positional order. For call nodes these are the call
    /// arguments, not the function body.
    pub(crate) fn operands(&self) -> Vec<NodeId> {
        match self {
            Op::Const(_) | Op::Variable => Vec::new(),
            Op::Exp(x) | Op::Ln(x) | Op::Sqrt(x) | Op::Erf(x) => vec![*x],
            Op::Add(l, r) | Op::Sub(l, r) | Op::Mul(l, r) | Op::Div(l, r) | Op::Pow(l, r) => {
                vec![*l, *r]
            }
            Op::Phi2(h, k, r) => vec![*h, *k, *r],
            Op::Call { args, .. } => args.clone(),
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Op::Const(_) => "const",
            Op::Variable => "var",
            Op::Add(..) => "+",
            Op::Sub(..) => "-",
            Op::Mul(..) => "*",
            Op::Div(..) => "/",
            Op::Pow(..) => "^",
            Op::Exp(_) => "exp",
            Op::Ln(_) => "ln",
            Op::Sqrt(_) => "sqrt",
            Op::Erf(_) => "erf",
            Op::Phi2(..) => "phi2",
            Op::Call { .. } => "call",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) op: Op,
    /// Cached forward value; `None` until evaluated or after invalidation.
    pub(crate) value: Option<f64>,
    /// Accumulated adjoint; `None` until a backward pass reaches the node.
    pub(crate) grad: Option<f64>,
    /// Nodes that use this node as an operand. Invalidation only.
    pub(crate) parents: Vec<NodeId>,
}

/// Diagnostic record for one node, as produced by [`Graph::dump`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeDump {
    /// Arena id.
    pub id: u32,
    /// Operation tag (`"const"`, `"var"`, `"+"`, ..., or the function name
    /// for call nodes).
    pub op: String,
    /// Cached forward value, if one is set.
    pub value: Option<f64>,
    /// Accumulated gradient, if a backward pass has reached this node.
    pub grad: Option<f64>,
    /// Operand ids in positional order.
    pub operands: Vec<u32>,
}

/// Default Simpson point count for the Φ₂ primitive.
pub const DEFAULT_PHI2_POINTS: usize = 128;

/// Arena-owned expression DAG.
///
/// A `Graph` is an isolated unit of state: values, gradients and custom
/// function definitions never cross graph boundaries. Code that wants
/// parallelism runs one graph per thread.
#[derive(Debug)]
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) functions: Vec<Function>,
    zero: NodeId,
    one: NodeId,
    minus_one: NodeId,
    pub(crate) phi2_points: usize,
    pub(crate) trace_backward: bool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates an empty graph holding only the interned 0, 1 and −1
    /// constants.
    pub fn new() -> Self {
        let mut g = Graph {
            nodes: Vec::new(),
            functions: Vec::new(),
            zero: NodeId(0),
            one: NodeId(0),
            minus_one: NodeId(0),
            phi2_points: DEFAULT_PHI2_POINTS,
            trace_backward: false,
        };
        g.zero = g.push(Op::Const(0.0));
        g.one = g.push(Op::Const(1.0));
        g.minus_one = g.push(Op::Const(-1.0));
        g
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` only before the interned constants exist, i.e. never.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Enables or disables per-contribution `trace!` events during backward
    /// passes.
    pub fn set_backward_trace(&mut self, enabled: bool) {
        self.trace_backward = enabled;
    }

    /// Sets the Simpson point count used by the Φ₂ primitive (forced to an
    /// even value of at least 2). Default is [`DEFAULT_PHI2_POINTS`].
    pub fn set_phi2_points(&mut self, n: usize) {
        let n = n.max(2);
        self.phi2_points = n + (n % 2);
    }

    fn push(&mut self, op: Op) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let value = match op {
            Op::Const(c) => Some(c),
            _ => None,
        };
        let operands = op.operands();
        self.nodes.push(Node {
            op,
            value,
            grad: None,
            parents: Vec::new(),
        });
        for o in operands {
            self.nodes[o.index()].parents.push(id);
        }
        id
    }

    // ------------------------------------------------------------------
    // Leaves
    // ------------------------------------------------------------------

    /// The interned constant 0.
    pub fn zero(&self) -> NodeId {
        self.zero
    }

    /// The interned constant 1.
    pub fn one(&self) -> NodeId {
        self.one
    }

    /// The interned constant −1.
    pub fn minus_one(&self) -> NodeId {
        self.minus_one
    }

    /// Creates a constant node. 0, 1 and −1 return the interned nodes.
    pub fn constant(&mut self, v: f64) -> NodeId {
        if v == 0.0 {
            self.zero
        } else if v == 1.0 {
            self.one
        } else if v == -1.0 {
            self.minus_one
        } else {
            self.push(Op::Const(v))
        }
    }

    /// Creates an unset variable. Reading it before [`Graph::set_value`]
    /// is an error.
    pub fn variable(&mut self) -> NodeId {
        self.push(Op::Variable)
    }

    /// Creates a variable initialised to `v`.
    pub fn variable_with(&mut self, v: f64) -> NodeId {
        let id = self.push(Op::Variable);
        self.nodes[id.index()].value = Some(v);
        id
    }

    /// Assigns a new value to a variable and invalidates every cached value
    /// downstream of it.
    pub fn set_value(&mut self, id: NodeId, v: f64) -> Result<(), ExprError> {
        if !matches!(self.nodes[id.index()].op, Op::Variable) {
            return Err(ExprError::NotAVariable { id: id.0 });
        }
        self.invalidate_dependents(id);
        self.nodes[id.index()].value = Some(v);
        Ok(())
    }

    /// Walks parent links from `id`, clearing cached values. Stops at nodes
    /// that are already invalid, so repeated assignments stay cheap.
    fn invalidate_dependents(&mut self, id: NodeId) {
        let mut stack = self.nodes[id.index()].parents.clone();
        while let Some(p) = stack.pop() {
            let node = &mut self.nodes[p.index()];
            if node.value.take().is_some() {
                stack.extend(node.parents.iter().copied());
            }
        }
    }

    /// Cached forward value, if any. Does not evaluate.
    pub fn cached_value(&self, id: NodeId) -> Option<f64> {
        self.nodes[id.index()].value
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    /// `l + r`, with `x + 0 → x`.
    pub fn add(&mut self, l: NodeId, r: NodeId) -> NodeId {
        if l == self.zero {
            return r;
        }
        if r == self.zero {
            return l;
        }
        self.push(Op::Add(l, r))
    }

    /// `l - r`, with `x - 0 → x` and `0 - x → -x`.
    pub fn sub(&mut self, l: NodeId, r: NodeId) -> NodeId {
        if r == self.zero {
            return l;
        }
        if l == self.zero {
            return self.neg(r);
        }
        self.push(Op::Sub(l, r))
    }

    /// `-x` as `(-1) * x`, with `-(-x) → x`.
    pub fn neg(&mut self, x: NodeId) -> NodeId {
        if x == self.zero {
            return self.zero;
        }
        if x == self.minus_one {
            return self.one;
        }
        if x == self.one {
            return self.minus_one;
        }
        if let Op::Mul(l, r) = self.nodes[x.index()].op {
            if l == self.minus_one {
                return r;
            }
            if r == self.minus_one {
                return l;
            }
        }
        self.push(Op::Mul(self.minus_one, x))
    }

    /// `l * r`, with `x * 0 → 0` and `x * 1 → x`.
    pub fn mul(&mut self, l: NodeId, r: NodeId) -> NodeId {
        if l == self.zero || r == self.zero {
            return self.zero;
        }
        if l == self.one {
            return r;
        }
        if r == self.one {
            return l;
        }
        self.push(Op::Mul(l, r))
    }

    /// `l / r`, with `x / 1 → x`, `x / -1 → -x` and `x / x → 1`. Dividing
    /// by the interned zero constant is rejected at construction.
    pub fn div(&mut self, l: NodeId, r: NodeId) -> Result<NodeId, ExprError> {
        if r == self.zero {
            return Err(ExprError::DivisionByZero);
        }
        if l == self.zero {
            return Ok(self.zero);
        }
        if r == self.one {
            return Ok(l);
        }
        if r == self.minus_one {
            return Ok(self.neg(l));
        }
        if l == r {
            return Ok(self.one);
        }
        Ok(self.push(Op::Div(l, r)))
    }

    /// `l ^ r`, with `x^1 → x`, `x^0 → 1` and `0^x → 0`. `0^0` is rejected.
    pub fn pow(&mut self, l: NodeId, r: NodeId) -> Result<NodeId, ExprError> {
        if l == self.zero && r == self.zero {
            return Err(ExprError::ZeroPowZero);
        }
        if r == self.one {
            return Ok(l);
        }
        if r == self.zero {
            return Ok(self.one);
        }
        if l == self.zero {
            return Ok(self.zero);
        }
        Ok(self.push(Op::Pow(l, r)))
    }

    /// `exp(x)`.
    pub fn exp(&mut self, x: NodeId) -> NodeId {
        self.push(Op::Exp(x))
    }

    /// `ln(x)`. Negative operands are rejected at evaluation time.
    pub fn ln(&mut self, x: NodeId) -> NodeId {
        self.push(Op::Ln(x))
    }

    /// `sqrt(x)`. Negative operands are rejected at evaluation time.
    pub fn sqrt(&mut self, x: NodeId) -> NodeId {
        self.push(Op::Sqrt(x))
    }

    /// `erf(x)`.
    pub fn erf(&mut self, x: NodeId) -> NodeId {
        self.push(Op::Erf(x))
    }

    /// `Φ₂(h, k; ρ)` - the bivariate standard-normal CDF primitive.
    ///
    /// Forward evaluation integrates Drezner's single-integral reduction
    /// with the graph's configured Simpson point count; the backward pass
    /// uses the closed-form partials, so this node differentiates exactly.
    pub fn phi2(&mut self, h: NodeId, k: NodeId, rho: NodeId) -> NodeId {
        self.push(Op::Phi2(h, k, rho))
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// One record per live node, in arena order.
    pub fn dump(&self) -> Vec<NodeDump> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let op = match &n.op {
                    Op::Call { func, .. } => self
                        .functions
                        .get(func.index())
                        .map(|f| format!("fn:{}", f.name))
                        .unwrap_or_else(|| "fn:?".to_string()),
                    other => other.tag().to_string(),
                };
                NodeDump {
                    id: i as u32,
                    op,
                    value: n.value,
                    grad: n.grad,
                    operands: n.op.operands().iter().map(|o| o.0).collect(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------
    // Construction and simplification
    // ------------------------------------------------------------------

    #[test]
    fn test_interned_constants() {
        let mut g = Graph::new();
        assert_eq!(g.constant(0.0), g.zero());
        assert_eq!(g.constant(1.0), g.one());
        assert_eq!(g.constant(-1.0), g.minus_one());
        let a = g.constant(2.5);
        let b = g.constant(2.5);
        assert_ne!(a, b); // only the three specials are interned
    }

    #[test]
    fn test_add_sub_identities() {
        let mut g = Graph::new();
        let x = g.variable_with(3.0);
        let zero = g.zero();
        assert_eq!(g.add(x, zero), x);
        assert_eq!(g.add(zero, x), x);
        assert_eq!(g.sub(x, zero), x);
        let neg = g.sub(zero, x);
        assert_ne!(neg, x);
        assert_eq!(g.value(neg).unwrap(), -3.0);
    }

    #[test]
    fn test_mul_div_identities() {
        let mut g = Graph::new();
        let x = g.variable_with(3.0);
        let (zero, one, minus_one) = (g.zero(), g.one(), g.minus_one());
        assert_eq!(g.mul(x, zero), zero);
        assert_eq!(g.mul(zero, x), zero);
        assert_eq!(g.mul(x, one), x);
        assert_eq!(g.mul(one, x), x);
        assert_eq!(g.div(x, one).unwrap(), x);
        assert_eq!(g.div(x, x).unwrap(), one);
        let n = g.div(x, minus_one).unwrap();
        assert_eq!(g.value(n).unwrap(), -3.0);
        assert_eq!(g.div(x, zero), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn test_double_negation_collapses() {
        let mut g = Graph::new();
        let x = g.variable_with(3.0);
        let n = g.neg(x);
        assert_eq!(g.neg(n), x);
    }

    #[test]
    fn test_pow_identities() {
        let mut g = Graph::new();
        let x = g.variable_with(3.0);
        let (zero, one) = (g.zero(), g.one());
        assert_eq!(g.pow(x, one).unwrap(), x);
        assert_eq!(g.pow(x, zero).unwrap(), one);
        assert_eq!(g.pow(zero, x).unwrap(), zero);
        assert_eq!(g.pow(zero, zero), Err(ExprError::ZeroPowZero));
    }

    // ------------------------------------------------------------------
    // Variables and invalidation
    // ------------------------------------------------------------------

    #[test]
    fn test_set_value_rejects_non_variable() {
        let mut g = Graph::new();
        let c = g.constant(2.0);
        assert!(matches!(
            g.set_value(c, 1.0),
            Err(ExprError::NotAVariable { .. })
        ));
    }

    #[test]
    fn test_reassignment_invalidates_dependents() {
        let mut g = Graph::new();
        let x = g.variable_with(2.0);
        let c = g.constant(3.0);
        let y = g.mul(x, c);
        assert_eq!(g.value(y).unwrap(), 6.0);
        assert_eq!(g.cached_value(y), Some(6.0));

        g.set_value(x, 5.0).unwrap();
        assert_eq!(g.cached_value(y), None);
        assert_eq!(g.value(y).unwrap(), 15.0);
    }

    #[test]
    fn test_invalidation_reaches_grandparents() {
        let mut g = Graph::new();
        let x = g.variable_with(1.0);
        let c = g.constant(2.0);
        let y = g.add(x, c);
        let z = g.mul(y, y);
        assert_eq!(g.value(z).unwrap(), 9.0);
        g.set_value(x, 2.0).unwrap();
        assert_eq!(g.cached_value(y), None);
        assert_eq!(g.cached_value(z), None);
        assert_eq!(g.value(z).unwrap(), 16.0);
    }

    // ------------------------------------------------------------------
    // Dump
    // ------------------------------------------------------------------

    #[test]
    fn test_dump_records() {
        let mut g = Graph::new();
        let x = g.variable_with(2.0);
        let c = g.constant(4.0);
        let y = g.add(x, c);
        g.value(y).unwrap();

        let dump = g.dump();
        assert_eq!(dump.len(), g.len());
        let rec = &dump[y.index()];
        assert_eq!(rec.op, "+");
        assert_eq!(rec.value, Some(6.0));
        assert_eq!(rec.operands, vec![x.raw(), c.raw()]);
    }

    #[test]
    fn test_phi2_points_forced_even() {
        let mut g = Graph::new();
        g.set_phi2_points(7);
        assert_eq!(g.phi2_points, 8);
        g.set_phi2_points(0);
        assert_eq!(g.phi2_points, 2);
    }
}
