//! Evaluation driver.
//!
//! An [`EvalPlan`] fixes the set of nodes needed for some outputs and the
//! order to visit them in, then runs whole sweeps:
//! 1. primal and forward sweeps visit nodes dependencies-first,
//! 2. the adjoint sweep visits them in reverse, so every node has received
//!    all contributions from its parents before distributing its own.

use std::collections::HashMap;

use log::debug;

use crate::error::{MxError, Result};
use crate::graph::Graph;
use crate::node::{Mx, NodeId, Op};

/// Adjoints of the symbols in a plan, read back after an adjoint sweep.
#[derive(Debug, Clone)]
pub struct Sensitivities {
    /// Map from symbol node to its adjoint.
    adjoints: HashMap<NodeId, Vec<f64>>,
    /// Map from symbol name to (node, adjoint) for symbols with that name.
    /// Several symbols may share a name.
    name_to_adjoints: HashMap<String, Vec<(NodeId, Vec<f64>)>>,
}

impl Sensitivities {
    /// Adjoint of a specific symbol, or `None` if it is not part of the plan.
    pub fn wrt(&self, symbol: &Mx) -> Option<&[f64]> {
        self.adjoints.get(&symbol.id()).map(Vec::as_slice)
    }

    /// Adjoint of a symbol by name; the first match if the name is shared.
    pub fn by_name(&self, name: &str) -> Option<&[f64]> {
        self.name_to_adjoints
            .get(name)
            .and_then(|entries| entries.first().map(|(_, a)| a.as_slice()))
    }

    /// Adjoints keyed by symbol name. Symbols sharing a name are summed
    /// entrywise (their shapes must agree for the sum to be meaningful).
    pub fn all_named(&self) -> HashMap<String, Vec<f64>> {
        self.name_to_adjoints
            .iter()
            .map(|(name, entries)| {
                let mut total = entries[0].1.clone();
                for (_, a) in &entries[1..] {
                    for (t, v) in total.iter_mut().zip(a) {
                        *t += v;
                    }
                }
                (name.clone(), total)
            })
            .collect()
    }
}

/// Visiting order for the nodes that a set of outputs depends on.
#[derive(Debug, Clone)]
pub struct EvalPlan {
    outputs: Vec<Mx>,
    order: Vec<Mx>,
}

impl EvalPlan {
    pub fn new(graph: &Graph, outputs: &[Mx]) -> Result<Self> {
        for &out in outputs {
            graph.index(out)?;
        }
        let order = topological_sort(graph, outputs);
        debug!(
            "plan for {} outputs covers {} of {} nodes",
            outputs.len(),
            order.len(),
            graph.len()
        );
        Ok(EvalPlan {
            outputs: outputs.to_vec(),
            order,
        })
    }

    pub fn outputs(&self) -> &[Mx] {
        &self.outputs
    }

    /// Nodes in dependency-first order, each exactly once.
    pub fn order(&self) -> &[Mx] {
        &self.order
    }

    fn check_graph(&self, graph: &Graph) -> Result<()> {
        match self.order.first() {
            Some(&mx) => graph.index(mx).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Start a new pass and compute every planned node's value.
    ///
    /// Returns the value of each output.
    pub fn primal(&self, graph: &mut Graph) -> Result<Vec<Vec<f64>>> {
        self.check_graph(graph)?;
        let pass = graph.begin_pass();
        debug!("primal sweep, pass {}, {} nodes", pass, self.order.len());
        for &mx in &self.order {
            graph.evaluate(mx, 0, 0)?;
        }
        self.collect(graph, |g, mx| g.value(mx))
    }

    /// Start a new pass and propagate the given symbol tangents forward.
    ///
    /// Symbols without a seed get a zero tangent. Returns the tangent of each
    /// output.
    pub fn forward(&self, graph: &mut Graph, seeds: &[(Mx, &[f64])]) -> Result<Vec<Vec<f64>>> {
        self.check_graph(graph)?;
        let pass = graph.begin_pass();
        debug!("forward sweep, pass {}, {} seeds", pass, seeds.len());

        for &mx in &self.order {
            if graph.is_symbol(mx)? {
                let n = graph.shape(mx)?.numel();
                graph.seed_forward(mx, &vec![0.0; n])?;
            }
        }
        for &(mx, tangent) in seeds {
            graph.seed_forward(mx, tangent)?;
        }
        for &mx in &self.order {
            graph.evaluate(mx, 1, 0)?;
        }
        self.collect(graph, |g, mx| g.tangent(mx))
    }

    /// Propagate output cotangents back to every planned node, within the
    /// current pass (after [`EvalPlan::primal`] or [`EvalPlan::forward`]).
    ///
    /// Seeds on the same node add up. Any tangents held in order-1 buffers
    /// are overwritten.
    pub fn adjoint(&self, graph: &mut Graph, seeds: &[(Mx, &[f64])]) -> Result<Sensitivities> {
        self.check_graph(graph)?;
        debug!("adjoint sweep, pass {}, {} seeds", graph.pass(), seeds.len());

        // Every planned node starts from a zero adjoint, so contributions can
        // be added in whatever order parents are visited.
        for &mx in &self.order {
            graph.reset_adjoint(mx)?;
        }
        for &(mx, cotangent) in seeds {
            if !self.order.contains(&mx) {
                return Err(MxError::NotInPlan(mx.id()));
            }
            graph.seed_adjoint(mx, cotangent)?;
        }
        for &mx in self.order.iter().rev() {
            graph.evaluate(mx, 0, 1)?;
        }

        let mut adjoints = HashMap::new();
        let mut name_to_adjoints: HashMap<String, Vec<(NodeId, Vec<f64>)>> = HashMap::new();
        for &mx in &self.order {
            if let Op::Symbol { name } = graph.op(mx)? {
                let adj = graph.adjoint(mx)?.to_vec();
                name_to_adjoints
                    .entry(name.clone())
                    .or_default()
                    .push((mx.id(), adj.clone()));
                adjoints.insert(mx.id(), adj);
            }
        }
        Ok(Sensitivities {
            adjoints,
            name_to_adjoints,
        })
    }

    fn collect<'g>(
        &self,
        graph: &'g Graph,
        read: impl Fn(&'g Graph, Mx) -> Result<&'g [f64]>,
    ) -> Result<Vec<Vec<f64>>> {
        self.outputs
            .iter()
            .map(|&mx| read(graph, mx).map(<[f64]>::to_vec))
            .collect()
    }
}

/// Dependency-first order of all nodes reachable from `roots`.
///
/// Every dependency sits at a smaller arena index than its user, so marking
/// the reachable nodes and emitting them by ascending index is a valid
/// topological order. The marking uses an explicit worklist, which keeps
/// arbitrarily deep graphs off the call stack.
fn topological_sort(graph: &Graph, roots: &[Mx]) -> Vec<Mx> {
    let mut reachable = vec![false; graph.nodes.len()];
    let mut worklist: Vec<Mx> = roots.to_vec();

    while let Some(mx) = worklist.pop() {
        let i = mx.id().index();
        if reachable[i] {
            continue;
        }
        reachable[i] = true;
        worklist.extend(graph.nodes[i].deps.iter().filter(|d| !reachable[d.id().index()]));
    }

    reachable
        .iter()
        .enumerate()
        .filter_map(|(i, &r)| r.then_some(i))
        .map(|i| Mx {
            graph: graph.id,
            id: NodeId(i),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrderViolation;
    use crate::shape::Shape;

    #[test]
    fn test_topological_sort_simple() {
        let mut g = Graph::new();
        let x = g.scalar_symbol("x");
        let y = g.scalar_symbol("y");
        let z = g.add(x, y).unwrap();

        let plan = EvalPlan::new(&g, &[z]).unwrap();
        let order = plan.order();
        assert_eq!(order.len(), 3);
        assert_eq!(order[2], z);
        let pos = |m: Mx| order.iter().position(|&o| o == m).unwrap();
        assert!(pos(x) < pos(z));
        assert!(pos(y) < pos(z));
    }

    #[test]
    fn test_topological_sort_shared_node() {
        let mut g = Graph::new();
        let x = g.scalar_symbol("x");
        let z = g.mul(x, x).unwrap();
        let w = g.horzcat(&[z, x, z]).unwrap();

        let plan = EvalPlan::new(&g, &[w, z]).unwrap();
        assert_eq!(plan.order(), &[x, z, w]);
    }

    #[test]
    fn test_plan_skips_unreachable_nodes() {
        let mut g = Graph::new();
        let x = g.scalar_symbol("x");
        let _unused = g.exp(x).unwrap();
        let y = g.sin(x).unwrap();
        let plan = EvalPlan::new(&g, &[y]).unwrap();
        assert_eq!(plan.order(), &[x, y]);
    }

    #[test]
    fn test_primal_forward_adjoint() {
        // z = sin(x) * y, elementwise on 2x1
        let mut g = Graph::new();
        let x = g.symbol("x", Shape::column(2));
        let y = g.symbol("y", Shape::column(2));
        let s = g.sin(x).unwrap();
        let z = g.mul(s, y).unwrap();
        g.set_value(x, &[0.5, 1.0]).unwrap();
        g.set_value(y, &[2.0, 3.0]).unwrap();

        let plan = EvalPlan::new(&g, &[z]).unwrap();
        let values = plan.primal(&mut g).unwrap();
        assert!((values[0][0] - 2.0 * 0.5_f64.sin()).abs() < 1e-12);
        assert!((values[0][1] - 3.0 * 1.0_f64.sin()).abs() < 1e-12);

        let tangents = plan.forward(&mut g, &[(x, &[1.0, 0.0])]).unwrap();
        assert!((tangents[0][0] - 2.0 * 0.5_f64.cos()).abs() < 1e-12);
        assert_eq!(tangents[0][1], 0.0);

        let sens = plan.adjoint(&mut g, &[(z, &[1.0, 1.0])]).unwrap();
        let dx = sens.wrt(&x).unwrap();
        assert!((dx[0] - 2.0 * 0.5_f64.cos()).abs() < 1e-12);
        assert!((dx[1] - 3.0 * 1.0_f64.cos()).abs() < 1e-12);
        let dy = sens.by_name("y").unwrap();
        assert!((dy[1] - 1.0_f64.sin()).abs() < 1e-12);
        assert!(sens.by_name("nonexistent").is_none());
    }

    #[test]
    fn test_adjoint_requires_primal_in_pass() {
        // The output's own value is recomputed, but its dependency's is not.
        let mut g = Graph::new();
        let x = g.scalar_symbol("x");
        let y = g.exp(x).unwrap();
        let z = g.sin(y).unwrap();
        let plan = EvalPlan::new(&g, &[z]).unwrap();
        plan.primal(&mut g).unwrap();
        g.begin_pass();
        assert!(matches!(
            plan.adjoint(&mut g, &[(z, &[1.0])]),
            Err(MxError::InvalidEvaluationOrder {
                violation: OrderViolation::StaleDependency { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_adjoint_is_repeatable() {
        let mut g = Graph::new();
        let x = g.scalar_symbol("x");
        let y = g.exp(x).unwrap();
        g.set_value(x, &[0.0]).unwrap();
        let plan = EvalPlan::new(&g, &[y]).unwrap();
        plan.primal(&mut g).unwrap();
        let first = plan.adjoint(&mut g, &[(y, &[1.0])]).unwrap();
        let second = plan.adjoint(&mut g, &[(y, &[1.0])]).unwrap();
        assert_eq!(first.wrt(&x), Some(&[1.0][..]));
        assert_eq!(second.wrt(&x), Some(&[1.0][..]));
    }

    #[test]
    fn test_forward_seed_must_be_symbol() {
        let mut g = Graph::new();
        let x = g.scalar_symbol("x");
        let y = g.exp(x).unwrap();
        let plan = EvalPlan::new(&g, &[y]).unwrap();
        assert_eq!(
            plan.forward(&mut g, &[(y, &[1.0])]),
            Err(MxError::NotASymbol(y.id()))
        );
    }

    #[test]
    fn test_adjoint_seed_outside_plan() {
        let mut g = Graph::new();
        let x = g.scalar_symbol("x");
        let y = g.exp(x).unwrap();
        let other = g.sin(x).unwrap();
        let plan = EvalPlan::new(&g, &[y]).unwrap();
        plan.primal(&mut g).unwrap();
        assert!(matches!(
            plan.adjoint(&mut g, &[(other, &[1.0])]),
            Err(MxError::NotInPlan(_))
        ));
    }

    #[test]
    fn test_all_named_sums_shared_names() {
        let mut g = Graph::new();
        let a = g.scalar_symbol("p");
        let b = g.scalar_symbol("p");
        let two = g.scalar(2.0);
        let b2 = g.mul(b, two).unwrap();
        let z = g.add(a, b2).unwrap();
        let plan = EvalPlan::new(&g, &[z]).unwrap();
        plan.primal(&mut g).unwrap();
        let sens = plan.adjoint(&mut g, &[(z, &[1.0])]).unwrap();
        assert_eq!(sens.all_named()["p"], vec![3.0]);
        assert_eq!(sens.wrt(&a), Some(&[1.0][..]));
        assert_eq!(sens.wrt(&b), Some(&[2.0][..]));
    }

    #[test]
    fn test_deep_chain() {
        let mut g = Graph::new();
        let x = g.scalar_symbol("x");
        let mut y = x;
        for _ in 0..200_000 {
            y = g.sin(y).unwrap();
        }
        g.set_value(x, &[0.5]).unwrap();

        let plan = EvalPlan::new(&g, &[y]).unwrap();
        assert_eq!(plan.order().len(), 200_001);
        assert_eq!(plan.order()[0], x);
        assert_eq!(plan.order()[200_000], y);

        let value = plan.primal(&mut g).unwrap()[0][0];
        assert!(value > 0.0 && value < 0.5);
        let sens = plan.adjoint(&mut g, &[(y, &[1.0])]).unwrap();
        let dx = sens.wrt(&x).unwrap()[0];
        assert!(dx > 0.0 && dx < 1.0);
    }

    #[test]
    fn test_order_covers_duplicates() {
        let mut g = Graph::new();
        let x = g.scalar_symbol("x");
        let y = g.exp(x).unwrap();
        let y2 = g.duplicate(y).unwrap();
        let z = g.add(y, y2).unwrap();
        let plan = EvalPlan::new(&g, &[z]).unwrap();
        assert_eq!(plan.order(), &[x, y, y2, z]);
    }
}
