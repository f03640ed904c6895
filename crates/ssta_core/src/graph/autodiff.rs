//! Forward evaluation and the reverse-mode backward sweep.
//!
//! Forward values are memoized per node and cleared by variable
//! reassignment. The backward pass runs one sweep over the reverse
//! post-order of the subgraph below the root, accumulating adjoints in a
//! local map first and only then adding them into the per-node gradient
//! slots. Custom-function partials reuse the same sweep on the function
//! body with a fresh local map, so nested calls never leak gradient state
//! into the outer pass.

use std::collections::HashMap;

use tracing::trace;

use crate::math::bivariate::{bivariate_normal_cdf, bivariate_normal_pdf};
use crate::math::distributions::{norm_cdf, norm_pdf};

use super::{ExprError, Graph, NodeId, Op};

impl Graph {
    /// Evaluates the subgraph below `id`, memoizing every node on the way.
    pub fn value(&mut self, id: NodeId) -> Result<f64, ExprError> {
        if let Some(v) = self.nodes[id.index()].value {
            return Ok(v);
        }
        let op = self.nodes[id.index()].op.clone();
        let v = match op {
            Op::Const(c) => c,
            Op::Variable => return Err(ExprError::VariableUnset { id: id.0 }),
            Op::Add(l, r) => self.value(l)? + self.value(r)?,
            Op::Sub(l, r) => self.value(l)? - self.value(r)?,
            Op::Mul(l, r) => self.value(l)? * self.value(r)?,
            Op::Div(l, r) => {
                let (lv, rv) = (self.value(l)?, self.value(r)?);
                if rv == 0.0 {
                    return Err(ExprError::DivisionByZero);
                }
                lv / rv
            }
            Op::Pow(l, r) => {
                let (lv, rv) = (self.value(l)?, self.value(r)?);
                if lv == 0.0 && rv == 0.0 {
                    return Err(ExprError::ZeroPowZero);
                }
                lv.powf(rv)
            }
            Op::Exp(x) => self.value(x)?.exp(),
            Op::Ln(x) => {
                let xv = self.value(x)?;
                if xv < 0.0 {
                    return Err(ExprError::LogOfNegative { value: xv });
                }
                xv.ln()
            }
            Op::Sqrt(x) => {
                let xv = self.value(x)?;
                if xv < 0.0 {
                    return Err(ExprError::SqrtOfNegative { value: xv });
                }
                xv.sqrt()
            }
            Op::Erf(x) => {
                let xv = self.value(x)?;
                libm::erf(xv)
            }
            Op::Phi2(h, k, r) => {
                let (hv, kv, rv) = (self.value(h)?, self.value(k)?, self.value(r)?);
                bivariate_normal_cdf(hv, kv, rv.clamp(-1.0, 1.0), self.phi2_points)
            }
            Op::Call { func, ref args } => self.call_forward(func, args)?,
        };
        self.nodes[id.index()].value = Some(v);
        Ok(v)
    }

    /// Reverse post-order of the subgraph below `root` (children before
    /// parents). Iterative so deep chains cannot overflow the stack.
    fn topo_order(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if visited[id.index()] {
                continue;
            }
            visited[id.index()] = true;
            stack.push((id, true));
            for o in self.nodes[id.index()].op.operands() {
                if !visited[o.index()] {
                    stack.push((o, false));
                }
            }
        }
        order
    }

    /// One reverse sweep seeded at `root`, returning the adjoint of every
    /// reached node in a local map. Shared by [`Graph::backward_seeded`]
    /// and the custom-function partial computation.
    pub(crate) fn reverse_sweep(
        &mut self,
        root: NodeId,
        seed: f64,
    ) -> Result<HashMap<NodeId, f64>, ExprError> {
        self.value(root)?;
        let order = self.topo_order(root);
        let mut adj: HashMap<NodeId, f64> = HashMap::with_capacity(order.len());
        adj.insert(root, seed);

        for &id in order.iter().rev() {
            let g = match adj.get(&id) {
                Some(&g) => g,
                None => continue,
            };
            let op = self.nodes[id.index()].op.clone();
            match op {
                Op::Const(_) | Op::Variable => {}
                Op::Add(l, r) => {
                    self.propagate(&mut adj, id, l, g, 1.0);
                    self.propagate(&mut adj, id, r, g, 1.0);
                }
                Op::Sub(l, r) => {
                    self.propagate(&mut adj, id, l, g, 1.0);
                    self.propagate(&mut adj, id, r, g, -1.0);
                }
                Op::Mul(l, r) => {
                    let (lv, rv) = (self.value(l)?, self.value(r)?);
                    self.propagate(&mut adj, id, l, g, rv);
                    self.propagate(&mut adj, id, r, g, lv);
                }
                Op::Div(l, r) => {
                    let (lv, rv) = (self.value(l)?, self.value(r)?);
                    self.propagate(&mut adj, id, l, g, 1.0 / rv);
                    self.propagate(&mut adj, id, r, g, -lv / (rv * rv));
                }
                Op::Pow(l, r) => {
                    let (lv, rv) = (self.value(l)?, self.value(r)?);
                    let v = self.value(id)?;
                    self.propagate(&mut adj, id, l, g, rv * lv.powf(rv - 1.0));
                    // The exponent's partial needs ln of the base; a
                    // non-positive base pins that direction to zero.
                    let dr = if lv > 0.0 { v * lv.ln() } else { 0.0 };
                    self.propagate(&mut adj, id, r, g, dr);
                }
                Op::Exp(x) => {
                    let v = self.value(id)?;
                    self.propagate(&mut adj, id, x, g, v);
                }
                Op::Ln(x) => {
                    let xv = self.value(x)?;
                    self.propagate(&mut adj, id, x, g, 1.0 / xv);
                }
                Op::Sqrt(x) => {
                    let v = self.value(id)?;
                    self.propagate(&mut adj, id, x, g, 0.5 / v);
                }
                Op::Erf(x) => {
                    let xv = self.value(x)?;
                    let d = std::f64::consts::FRAC_2_SQRT_PI * (-xv * xv).exp();
                    self.propagate(&mut adj, id, x, g, d);
                }
                Op::Phi2(h, k, r) => {
                    let (hv, kv, rv) = (self.value(h)?, self.value(k)?, self.value(r)?);
                    let rv = rv.clamp(-1.0, 1.0);
                    let s = (1.0 - rv * rv).max(1e-12).sqrt();
                    let dh = norm_pdf(hv) * norm_cdf((kv - rv * hv) / s);
                    let dk = norm_pdf(kv) * norm_cdf((hv - rv * kv) / s);
                    let dr = bivariate_normal_pdf(hv, kv, rv);
                    self.propagate(&mut adj, id, h, g, dh);
                    self.propagate(&mut adj, id, k, g, dk);
                    self.propagate(&mut adj, id, r, g, dr);
                }
                Op::Call { func, ref args } => {
                    let mut argv = Vec::with_capacity(args.len());
                    for &a in args.iter() {
                        argv.push(self.value(a)?);
                    }
                    let partials = self.call_partials(func, &argv)?;
                    for (&a, &p) in args.iter().zip(partials.iter()) {
                        self.propagate(&mut adj, id, a, g, p);
                    }
                }
            }
        }
        Ok(adj)
    }

    #[inline]
    fn propagate(
        &self,
        adj: &mut HashMap<NodeId, f64>,
        from: NodeId,
        to: NodeId,
        upstream: f64,
        partial: f64,
    ) {
        if self.trace_backward {
            trace!(
                target: "ssta_core::backward",
                from = from.0,
                to = to.0,
                upstream,
                partial,
                "adjoint contribution"
            );
        }
        *adj.entry(to).or_insert(0.0) += upstream * partial;
    }

    /// Backward pass seeded with 1 at `root`. Contributions add into each
    /// node's accumulated gradient, so sensitivities of a sum of roots can
    /// be collected across several calls; use [`Graph::zero_all_grad`] to
    /// start a fresh accumulation.
    pub fn backward(&mut self, root: NodeId) -> Result<(), ExprError> {
        self.backward_seeded(root, 1.0)
    }

    /// Backward pass with an explicit seed at `root`.
    pub fn backward_seeded(&mut self, root: NodeId, seed: f64) -> Result<(), ExprError> {
        let adj = self.reverse_sweep(root, seed)?;
        for (id, g) in adj {
            let slot = &mut self.nodes[id.index()].grad;
            *slot = Some(slot.unwrap_or(0.0) + g);
        }
        Ok(())
    }

    /// Clears every accumulated gradient in the graph.
    pub fn zero_all_grad(&mut self) {
        for n in &mut self.nodes {
            n.grad = None;
        }
    }

    /// Accumulated gradient of `id`; 0 if no backward pass has reached it.
    pub fn gradient(&self, id: NodeId) -> f64 {
        self.nodes[id.index()].grad.unwrap_or(0.0)
    }
}
