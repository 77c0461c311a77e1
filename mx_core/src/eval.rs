//! The per-node evaluation contract.
//!
//! `Graph::evaluate(node, forward_order, adjoint_order)` runs one node's
//! evaluation step. The caller is responsible for visiting nodes in
//! dependency order (primal and forward) or reverse dependency order
//! (adjoint); [`crate::EvalPlan`] does exactly that.

use log::{trace, warn};

use crate::error::{MxError, OrderViolation, Result};
use crate::graph::Graph;
use crate::node::{Mode, Mx, NodeId, Op};
use crate::ops::{self, Kernel, Operand};

impl Graph {
    /// Evaluate one node.
    ///
    /// - `(0, 0)`: primal value from the dependencies' values.
    /// - `(1, 0)`: primal value, then the forward tangent from the
    ///   dependencies' tangents.
    /// - `(0, 1)`: primal value, then distribute this node's adjoint into its
    ///   dependencies' adjoint buffers (accumulating).
    ///
    /// Forward and adjoint work cannot be mixed in one call, and only first
    /// order sensitivities exist.
    pub fn evaluate(&mut self, mx: Mx, forward_order: u32, adjoint_order: u32) -> Result<()> {
        let i = self.index(mx)?;
        if forward_order > 0 && adjoint_order > 0 {
            return Err(MxError::order(
                mx.id,
                OrderViolation::MixedModes {
                    forward: forward_order,
                    adjoint: adjoint_order,
                },
            ));
        }
        let order = forward_order.max(adjoint_order);
        if order > 1 {
            return Err(MxError::order(mx.id, OrderViolation::UnsupportedOrder(order)));
        }

        trace!(
            "evaluate {} ({}) fwd={} adj={}",
            mx.id,
            self.nodes[i].op.kind(),
            forward_order,
            adjoint_order
        );

        // The primal step is part of every call.
        self.eval_primal(i)?;
        if adjoint_order == 1 {
            self.eval_adjoint(i)?;
        } else if forward_order == 1 {
            self.eval_forward(i)?;
        }
        Ok(())
    }

    /// Report a freshness violation, or only log it on a permissive graph.
    fn violation(&self, i: usize, violation: OrderViolation) -> Result<()> {
        let err = MxError::order(NodeId(i), violation);
        if self.options.strict {
            return Err(err);
        }
        warn!("{}", err);
        Ok(())
    }

    /// Check that every dependency holds a fresh buffer of the given order.
    fn check_deps(&self, i: usize, order: usize, mode: Mode) -> Result<()> {
        for dep in &self.nodes[i].deps {
            if !self.nodes[dep.id.0].is_fresh(order, self.pass, mode) {
                self.violation(
                    i,
                    OrderViolation::StaleDependency {
                        dependency: dep.id,
                        order,
                    },
                )?;
            }
        }
        Ok(())
    }

    fn operands(&self, i: usize, with_tangents: bool) -> Vec<Operand<'_>> {
        self.nodes[i]
            .deps
            .iter()
            .map(|d| {
                let dep = &self.nodes[d.id.0];
                Operand {
                    shape: dep.shape,
                    value: &dep.values[0],
                    tangent: if with_tangents { &dep.values[1] } else { &[] },
                }
            })
            .collect()
    }

    fn eval_primal(&mut self, i: usize) -> Result<()> {
        let Some(kernel) = Kernel::of(&self.nodes[i].op) else {
            return Ok(());
        };
        self.check_deps(i, 0, Mode::Primal)?;

        let mut out = std::mem::take(&mut self.nodes[i].values[0]);
        {
            let args = self.operands(i, false);
            ops::primal(kernel, &args, &mut out);
        }
        let pass = self.pass;
        let node = &mut self.nodes[i];
        node.values[0] = out;
        node.stamp(0, pass, Mode::Primal);
        Ok(())
    }

    fn eval_forward(&mut self, i: usize) -> Result<()> {
        let Some(kernel) = Kernel::of(&self.nodes[i].op) else {
            return self.leaf_forward(i);
        };
        self.check_deps(i, 1, Mode::Forward)?;

        let mut out = std::mem::take(&mut self.nodes[i].values[1]);
        {
            let args = self.operands(i, true);
            ops::forward(kernel, &args, &self.nodes[i].values[0], &mut out);
        }
        let pass = self.pass;
        let node = &mut self.nodes[i];
        node.values[1] = out;
        node.stamp(1, pass, Mode::Forward);
        Ok(())
    }

    /// The tangent of a symbol is its seed; a constant's is zero.
    fn leaf_forward(&mut self, i: usize) -> Result<()> {
        let pass = self.pass;
        if let Op::Symbol { .. } = self.nodes[i].op {
            if !self.nodes[i].is_fresh(1, pass, Mode::Forward) {
                self.violation(i, OrderViolation::StaleBuffer { order: 1 })?;
            }
            return Ok(());
        }
        let node = &mut self.nodes[i];
        node.values[1].fill(0.0);
        node.stamp(1, pass, Mode::Forward);
        Ok(())
    }

    /// Runs after `eval_primal`, so dependency values are fresh and the
    /// node's own value is current.
    fn eval_adjoint(&mut self, i: usize) -> Result<()> {
        let Some(kernel) = Kernel::of(&self.nodes[i].op) else {
            return Ok(());
        };
        if !self.nodes[i].is_fresh(1, self.pass, Mode::Adjoint) {
            self.violation(i, OrderViolation::StaleBuffer { order: 1 })?;
        }

        // One zeroed buffer per dependency slot, so a dependency listed twice
        // receives both contributions.
        let mut sens: Vec<Vec<f64>> = self.nodes[i]
            .deps
            .iter()
            .map(|d| vec![0.0; self.nodes[d.id.0].shape.numel()])
            .collect();
        {
            let args = self.operands(i, false);
            let node = &self.nodes[i];
            ops::adjoint(kernel, &args, &node.values[0], &node.values[1], &mut sens);
        }

        let deps: Vec<usize> = self.nodes[i].deps.iter().map(|d| d.id.0).collect();
        for (dep, contribution) in deps.into_iter().zip(&sens) {
            self.accumulate_adjoint(dep, contribution);
        }
        Ok(())
    }
}
