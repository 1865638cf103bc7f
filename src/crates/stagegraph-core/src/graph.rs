//! Graph construction and validation
//!
//! A [`GraphBuilder`] collects stages and typed edges and turns them into an
//! immutable [`Graph`]. Problems are reported as early as possible:
//!
//! - [`add_stage`](GraphBuilder::add_stage) rejects duplicate ids
//! - [`add_edge`](GraphBuilder::add_edge) rejects unknown ids and edges whose
//!   kind differs from the receiving stage's input kind
//! - [`build`](GraphBuilder::build) checks the whole graph: at least one entry
//!   stage, no edge carrying a kind its source never emits, and no stage that
//!   cannot be reached from an entry
//!
//! An entry stage is a stage with no incoming edges, or one registered with
//! [`StageSpec::as_entry`].
//!
//! # Graph Structure
//!
//! ```text
//!              Transaction            Scored
//!   ingest ───────────────▶ score ───────────▶ alert
//!      │                                        ▲
//!      │        Transaction                     │ Scored
//!      └───────────────▶ sanctions ─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use stagegraph_core::{from_fn, GraphBuilder, MessageKind, StageSpec};
//!
//! #[derive(Debug, Clone)]
//! struct Tx { id: String }
//!
//! let mut builder = GraphBuilder::new();
//! builder
//!     .add_stage(StageSpec::new(
//!         "ingest",
//!         from_fn(|tx: Tx, ctx| async move { ctx.send_to_next(tx) }).emits::<Tx>(),
//!     ))?
//!     .add_stage(StageSpec::new(
//!         "report",
//!         from_fn(|tx: Tx, ctx| async move { ctx.send_output(tx.id) }),
//!     ))?
//!     .add_edge("ingest", "report", MessageKind::of::<Tx>())?;
//!
//! let graph = builder.build()?;
//! assert_eq!(graph.entries(), vec!["ingest"]);
//! assert_eq!(graph.successors("ingest"), vec!["report"]);
//! # Ok::<(), stagegraph_core::GraphError>(())
//! ```

use crate::error::{GraphError, Result, ValidationIssue};
use crate::message::MessageKind;
use crate::stage::{StageId, StageSpec};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// A directed, typed route between two stages
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: StageId,
    pub to: StageId,
    pub kind: MessageKind,
}

/// Mutable assembly area for a [`Graph`]
#[derive(Default)]
pub struct GraphBuilder {
    stages: Vec<StageSpec>,
    index: HashMap<StageId, usize>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage under its unique id
    ///
    /// # Errors
    ///
    /// [`GraphError::DuplicateStage`] if the id is already registered.
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<&mut Self> {
        if self.index.contains_key(&spec.id) {
            return Err(GraphError::DuplicateStage(spec.id));
        }
        self.index.insert(spec.id.clone(), self.stages.len());
        self.stages.push(spec);
        Ok(self)
    }

    /// Declare that messages of `kind` emitted by `from` are routed to `to`
    ///
    /// Adding the same edge twice has no further effect.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownStage`] if either id is unregistered
    /// - [`GraphError::TypeMismatch`] if `kind` is not `to`'s input kind
    pub fn add_edge(
        &mut self,
        from: impl Into<StageId>,
        to: impl Into<StageId>,
        kind: MessageKind,
    ) -> Result<&mut Self> {
        let from = from.into();
        let to = to.into();

        if !self.index.contains_key(&from) {
            return Err(GraphError::UnknownStage(from));
        }
        let target = match self.index.get(&to) {
            Some(&i) => &self.stages[i],
            None => return Err(GraphError::UnknownStage(to)),
        };
        if target.input_kind != kind {
            return Err(GraphError::TypeMismatch {
                edge_kind: kind.short_name(),
                input_kind: target.input_kind.short_name(),
                from,
                to,
            });
        }

        let edge = Edge { from, to, kind };
        if self.edges.contains(&edge) {
            tracing::debug!(from = %edge.from, to = %edge.to, "Ignoring duplicate edge");
        } else {
            self.edges.push(edge);
        }
        Ok(self)
    }

    /// [`add_edge`](Self::add_edge) with the kind taken from `T`
    pub fn add_edge_for<T: 'static>(
        &mut self,
        from: impl Into<StageId>,
        to: impl Into<StageId>,
    ) -> Result<&mut Self> {
        self.add_edge(from, to, MessageKind::of::<T>())
    }

    /// Mark an already registered stage as an entry
    pub fn mark_entry(&mut self, id: &str) -> Result<&mut Self> {
        match self.index.get(id) {
            Some(&i) => {
                self.stages[i].entry = true;
                Ok(self)
            }
            None => Err(GraphError::UnknownStage(id.to_string())),
        }
    }

    /// Validate and freeze the graph
    ///
    /// # Errors
    ///
    /// [`GraphError::Validation`] with the first violation found, checked in
    /// this order: empty graph, no entry stage, edge kind never emitted by its
    /// source, stages unreachable from every entry.
    pub fn build(self) -> Result<Graph> {
        let GraphBuilder {
            stages,
            index,
            edges,
        } = self;

        if stages.is_empty() {
            return Err(GraphError::Validation(ValidationIssue::EmptyGraph));
        }

        let mut incoming = vec![0usize; stages.len()];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
        let mut targets = Vec::with_capacity(edges.len());
        for (edge_idx, edge) in edges.iter().enumerate() {
            let from = index[&edge.from];
            let to = index[&edge.to];
            incoming[to] += 1;
            outgoing[from].push(edge_idx);
            targets.push(to);
        }

        let entries: Vec<usize> = (0..stages.len())
            .filter(|&i| stages[i].entry || incoming[i] == 0)
            .collect();
        if entries.is_empty() {
            return Err(GraphError::Validation(ValidationIssue::NoEntryStage));
        }

        for edge in &edges {
            let source = &stages[index[&edge.from]];
            if !source.output_kinds.contains(&edge.kind) {
                return Err(GraphError::Validation(ValidationIssue::NeverEmitted {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    kind: edge.kind.short_name(),
                }));
            }
        }

        let mut reached: HashSet<usize> = entries.iter().copied().collect();
        let mut frontier: VecDeque<usize> = entries.iter().copied().collect();
        while let Some(stage) = frontier.pop_front() {
            for &edge_idx in &outgoing[stage] {
                let next = targets[edge_idx];
                if reached.insert(next) {
                    frontier.push_back(next);
                }
            }
        }
        let unreachable: Vec<String> = (0..stages.len())
            .filter(|i| !reached.contains(i))
            .map(|i| stages[i].id.clone())
            .collect();
        if !unreachable.is_empty() {
            return Err(GraphError::Validation(ValidationIssue::Unreachable {
                stages: unreachable,
            }));
        }

        tracing::debug!(
            stages = stages.len(),
            edges = edges.len(),
            entries = entries.len(),
            "Graph validated"
        );

        Ok(Graph {
            inner: Arc::new(GraphInner {
                stages,
                index,
                edges,
                outgoing,
                targets,
                entries,
            }),
        })
    }
}

/// A validated, immutable stage graph
///
/// Cloning is cheap; one graph can back any number of concurrent runs.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

struct GraphInner {
    stages: Vec<StageSpec>,
    index: HashMap<StageId, usize>,
    edges: Vec<Edge>,
    outgoing: Vec<Vec<usize>>,
    targets: Vec<usize>,
    entries: Vec<usize>,
}

impl Graph {
    /// Number of stages
    pub fn len(&self) -> usize {
        self.inner.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.stages.is_empty()
    }

    /// Stage ids in registration order
    pub fn stage_ids(&self) -> Vec<&str> {
        self.inner.stages.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn stage(&self, id: &str) -> Option<&StageSpec> {
        self.inner.index.get(id).map(|&i| &self.inner.stages[i])
    }

    /// Entry stage ids in registration order
    pub fn entries(&self) -> Vec<&str> {
        self.inner
            .entries
            .iter()
            .map(|&i| self.inner.stages[i].id.as_str())
            .collect()
    }

    pub fn is_entry(&self, id: &str) -> bool {
        self.inner
            .index
            .get(id)
            .map(|i| self.inner.entries.contains(i))
            .unwrap_or(false)
    }

    /// All edges in declaration order
    pub fn edges(&self) -> &[Edge] {
        &self.inner.edges
    }

    /// Outgoing edges of `id` in declaration order
    pub fn edges_from(&self, id: &str) -> Vec<&Edge> {
        match self.inner.index.get(id) {
            Some(&i) => self.inner.outgoing[i]
                .iter()
                .map(|&e| &self.inner.edges[e])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Distinct downstream stage ids of `id`
    pub fn successors(&self, id: &str) -> Vec<&str> {
        let mut seen = Vec::new();
        for edge in self.edges_from(id) {
            if !seen.contains(&edge.to.as_str()) {
                seen.push(edge.to.as_str());
            }
        }
        seen
    }

    pub(crate) fn spec_at(&self, stage: usize) -> &StageSpec {
        &self.inner.stages[stage]
    }

    pub(crate) fn entry_indices(&self) -> &[usize] {
        &self.inner.entries
    }

    /// Destination stage indices for a `kind` message sent by `stage`
    pub(crate) fn routes(&self, stage: usize, kind: &MessageKind) -> Vec<usize> {
        self.inner.outgoing[stage]
            .iter()
            .filter(|&&e| self.inner.edges[e].kind == *kind)
            .map(|&e| self.inner.targets[e])
            .collect()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("stages", &self.stage_ids())
            .field("entries", &self.entries())
            .field("edges", &self.inner.edges)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::from_fn;

    #[derive(Debug, Clone)]
    struct Tx;

    #[derive(Debug, Clone)]
    struct Scored;

    fn relay(id: &str) -> StageSpec {
        StageSpec::new(id, from_fn(|tx: Tx, ctx| async move { ctx.send_to_next(tx) }).emits::<Tx>())
    }

    fn sink(id: &str) -> StageSpec {
        StageSpec::new(id, from_fn(|_: Tx, ctx| async move { ctx.send_output(1u8) }))
    }

    #[test]
    fn test_duplicate_stage() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a")).unwrap();
        let err = b.add_stage(sink("a")).err().unwrap();
        assert!(matches!(err, GraphError::DuplicateStage(id) if id == "a"));
    }

    #[test]
    fn test_edge_to_unknown_stage() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a")).unwrap();
        let err = b.add_edge_for::<Tx>("a", "ghost").err().unwrap();
        assert!(matches!(err, GraphError::UnknownStage(id) if id == "ghost"));

        let err = b.add_edge_for::<Tx>("ghost", "a").err().unwrap();
        assert!(matches!(err, GraphError::UnknownStage(id) if id == "ghost"));
    }

    #[test]
    fn test_edge_type_mismatch() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(sink("b"))
            .unwrap();
        let err = b.add_edge_for::<Scored>("a", "b").err().unwrap();
        match err {
            GraphError::TypeMismatch { edge_kind, input_kind, .. } => {
                assert_eq!(edge_kind, "Scored");
                assert_eq!(input_kind, "Tx");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_empty_graph() {
        let err = GraphBuilder::new().build().err().unwrap();
        assert!(matches!(err, GraphError::Validation(ValidationIssue::EmptyGraph)));
    }

    #[test]
    fn test_linear_graph_builds() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(relay("b"))
            .unwrap()
            .add_stage(sink("c"))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap()
            .add_edge_for::<Tx>("b", "c")
            .unwrap();
        let g = b.build().unwrap();

        assert_eq!(g.len(), 3);
        assert_eq!(g.stage_ids(), vec!["a", "b", "c"]);
        assert_eq!(g.entries(), vec!["a"]);
        assert!(g.is_entry("a"));
        assert!(!g.is_entry("b"));
        assert_eq!(g.successors("a"), vec!["b"]);
        assert!(g.successors("c").is_empty());
        assert_eq!(g.edges().len(), 2);
    }

    #[test]
    fn test_duplicate_edge_ignored() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(sink("b"))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap();
        assert_eq!(b.build().unwrap().edges().len(), 1);
    }

    #[test]
    fn test_unreachable_cycle_rejected() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(sink("b"))
            .unwrap()
            .add_stage(relay("c"))
            .unwrap()
            .add_stage(relay("d"))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap()
            .add_edge_for::<Tx>("c", "d")
            .unwrap()
            .add_edge_for::<Tx>("d", "c")
            .unwrap();

        let err = b.build().err().unwrap();
        match err {
            GraphError::Validation(ValidationIssue::Unreachable { stages }) => {
                assert_eq!(stages, vec!["c".to_string(), "d".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_no_entry_stage() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(relay("b"))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap()
            .add_edge_for::<Tx>("b", "a")
            .unwrap();
        let err = b.build().err().unwrap();
        assert!(matches!(err, GraphError::Validation(ValidationIssue::NoEntryStage)));
    }

    #[test]
    fn test_marked_entry_allows_cycle() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(relay("b"))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap()
            .add_edge_for::<Tx>("b", "a")
            .unwrap()
            .mark_entry("a")
            .unwrap();
        let g = b.build().unwrap();
        assert_eq!(g.entries(), vec!["a"]);
    }

    #[test]
    fn test_edge_kind_never_emitted() {
        let mut b = GraphBuilder::new();
        b.add_stage(sink("a"))
            .unwrap()
            .add_stage(sink("b"))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap();
        let err = b.build().err().unwrap();
        assert!(matches!(
            err,
            GraphError::Validation(ValidationIssue::NeverEmitted { ref from, ref to, .. })
                if from == "a" && to == "b"
        ));
    }

    #[test]
    fn test_routes_by_kind() {
        let mut b = GraphBuilder::new();
        b.add_stage(relay("a"))
            .unwrap()
            .add_stage(sink("b"))
            .unwrap()
            .add_stage(sink("c"))
            .unwrap()
            .add_edge_for::<Tx>("a", "b")
            .unwrap()
            .add_edge_for::<Tx>("a", "c")
            .unwrap();
        let g = b.build().unwrap();

        assert_eq!(g.routes(0, &MessageKind::of::<Tx>()), vec![1, 2]);
        assert!(g.routes(0, &MessageKind::of::<Scored>()).is_empty());
    }
}
