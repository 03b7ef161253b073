//! A small interpreter over explicit graphs of named states and named edges.
//!
//! Every asynchronous protocol in the gateway is written as such a graph: a
//! state's callback does a bit of synchronous work and then either fires an
//! edge, suspends on a pending operation (whose completion later fires an
//! edge), or halts. Graphs are built once from declarative tables and never
//! change afterwards.
//!
//! Several edges leaving one state may share a name. The edge registered
//! **last** wins, which is what lets an embedding graph plug its own
//! continuation into a reusable sub-graph: it re-registers the sub-graph's
//! exit edge after including it.

use std::fmt;

use hashbrown::HashMap;
use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
    Direction,
};
use tracing::{error, trace};

use crate::error::{Error, Result};

/// What a state's callback asks the machine to do next.
#[derive(Debug)]
pub enum Transition<S> {
    /// Leave through the named edge right away.
    Fire(&'static str),
    /// Wait for an operation; the driver fires an edge once it completes.
    Suspend(S),
    /// The graph is finished.
    Halt,
}

/// Where a run stopped.
#[derive(Debug)]
pub enum Outcome<S> {
    Suspended { state: StateId, pending: S },
    Halted(StateId),
}

pub type Callback<C, S> = fn(&mut C) -> Result<Transition<S>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StateId(NodeIndex);

pub struct StateDef<C, S> {
    pub name: &'static str,
    pub callback: Callback<C, S>,
}

impl<C, S> StateDef<C, S> {
    pub const fn new(name: &'static str, callback: Callback<C, S>) -> Self {
        Self { name, callback }
    }
}

impl<C, S> Clone for StateDef<C, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C, S> Copy for StateDef<C, S> {}

#[derive(Clone, Copy, Debug)]
pub struct EdgeDef {
    pub name: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

impl EdgeDef {
    pub const fn new(name: &'static str, from: &'static str, to: &'static str) -> Self {
        Self { name, from, to }
    }
}

/// State and edge tables gathered from several graphs before building.
pub struct Blueprint<C, S> {
    states: Vec<StateDef<C, S>>,
    edges: Vec<EdgeDef>,
}

impl<C, S> Default for Blueprint<C, S> {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            edges: Vec::new(),
        }
    }
}

impl<C, S> Blueprint<C, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(mut self, states: &[StateDef<C, S>]) -> Self {
        self.states.extend_from_slice(states);
        self
    }

    pub fn edges(mut self, edges: &[EdgeDef]) -> Self {
        self.edges.extend_from_slice(edges);
        self
    }

    /// Appends another graph's tables. Edges registered after this call
    /// override same-named edges of the included graph.
    pub fn include(mut self, other: Blueprint<C, S>) -> Self {
        self.states.extend(other.states);
        self.edges.extend(other.edges);
        self
    }

    pub fn build(self) -> Result<StateMachine<C, S>> {
        StateMachine::build(&self.states, &self.edges)
    }
}

struct State<C, S> {
    name: &'static str,
    callback: Callback<C, S>,
}

struct Edge {
    name: &'static str,
    /// Registration order; the highest wins among same-named edges.
    seq: usize,
}

pub struct StateMachine<C, S> {
    graph: DiGraph<State<C, S>, Edge>,
    entry: StateId,
}

impl<C, S> StateMachine<C, S> {
    /// Builds the graph. The first declared state is the entry state.
    pub fn build(states: &[StateDef<C, S>], edges: &[EdgeDef]) -> Result<Self> {
        let first = states.first().ok_or(Error::EmptyGraph)?;
        let mut graph = DiGraph::with_capacity(states.len(), edges.len());
        // only needed to resolve names while wiring edges
        let mut lookup: HashMap<&'static str, NodeIndex> = HashMap::with_capacity(states.len());

        for def in states {
            if lookup.contains_key(def.name) {
                return Err(Error::DuplicateState(def.name.to_owned()));
            }
            let ix = graph.add_node(State {
                name: def.name,
                callback: def.callback,
            });
            lookup.insert(def.name, ix);
        }

        let resolve = |name: &str| {
            lookup
                .get(name)
                .copied()
                .ok_or_else(|| Error::UndeclaredState(name.to_owned()))
        };
        for (seq, def) in edges.iter().enumerate() {
            let from = resolve(def.from)?;
            let to = resolve(def.to)?;
            graph.add_edge(
                from,
                to,
                Edge {
                    name: def.name,
                    seq,
                },
            );
        }

        let entry = StateId(resolve(first.name)?);
        Ok(Self { graph, entry })
    }

    pub fn entry(&self) -> StateId {
        self.entry
    }

    pub fn name(&self, state: StateId) -> &'static str {
        self.graph[state.0].name
    }

    pub fn find(&self, name: &str) -> Option<StateId> {
        self.graph
            .node_indices()
            .find(|&ix| self.graph[ix].name == name)
            .map(StateId)
    }

    pub fn has_edge(&self, state: StateId, edge: &str) -> bool {
        self.resolve(state, edge).is_some()
    }

    /// The destination of `edge` leaving `state`. Missing edges are fatal to
    /// the caller, so they are logged here where the names are known.
    pub fn next(&self, state: StateId, edge: &str) -> Result<StateId> {
        self.resolve(state, edge).ok_or_else(|| {
            let name = self.name(state);
            error!(state = name, edge, "state has no such edge");
            Error::MissingEdge {
                state: name,
                edge: edge.to_owned(),
            }
        })
    }

    /// Enters `state` and keeps following fired edges until a callback
    /// suspends or halts.
    pub fn run(&self, state: StateId, payload: &mut C) -> Result<Outcome<S>> {
        let mut current = state;
        loop {
            let node = &self.graph[current.0];
            trace!(state = node.name, "entering state");
            match (node.callback)(payload)? {
                Transition::Fire(edge) => current = self.next(current, edge)?,
                Transition::Suspend(pending) => {
                    return Ok(Outcome::Suspended {
                        state: current,
                        pending,
                    })
                }
                Transition::Halt => return Ok(Outcome::Halted(current)),
            }
        }
    }

    /// Leaves `state` through `edge` and runs from its destination.
    pub fn run_next(&self, state: StateId, edge: &str, payload: &mut C) -> Result<Outcome<S>> {
        let next = self.next(state, edge)?;
        self.run(next, payload)
    }

    fn resolve(&self, state: StateId, edge: &str) -> Option<StateId> {
        self.graph
            .edges_directed(state.0, Direction::Outgoing)
            .filter(|e| e.weight().name == edge)
            .max_by_key(|e| e.weight().seq)
            .map(|e| StateId(e.target()))
    }
}

impl<C, S> fmt::Display for StateMachine<C, S> {
    /// One line per state, its edges indented beneath it, winners first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ix in self.graph.node_indices() {
            writeln!(f, "{}", self.graph[ix].name)?;
            let mut edges: Vec<_> = self.graph.edges_directed(ix, Direction::Outgoing).collect();
            edges.sort_by_key(|e| std::cmp::Reverse(e.weight().seq));
            for e in edges {
                writeln!(f, "  {} -> {}", e.weight().name, self.graph[e.target()].name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Trace = Vec<&'static str>;

    fn start(t: &mut Trace) -> Result<Transition<()>> {
        t.push("start");
        Ok(Transition::Fire("go"))
    }

    fn first(t: &mut Trace) -> Result<Transition<()>> {
        t.push("first");
        Ok(Transition::Halt)
    }

    fn second(t: &mut Trace) -> Result<Transition<()>> {
        t.push("second");
        Ok(Transition::Halt)
    }

    fn wait(t: &mut Trace) -> Result<Transition<()>> {
        t.push("wait");
        Ok(Transition::Suspend(()))
    }

    fn lost(t: &mut Trace) -> Result<Transition<()>> {
        t.push("lost");
        Ok(Transition::Fire("nowhere"))
    }

    const STATES: [StateDef<Trace, ()>; 5] = [
        StateDef::new("start", start),
        StateDef::new("first", first),
        StateDef::new("second", second),
        StateDef::new("wait", wait),
        StateDef::new("lost", lost),
    ];

    #[test]
    fn test_last_registered_edge_wins() {
        let machine = StateMachine::build(
            &STATES,
            &[
                EdgeDef::new("go", "start", "first"),
                EdgeDef::new("go", "start", "second"),
            ],
        )
        .unwrap();

        let mut trace = Trace::new();
        let outcome = machine.run(machine.entry(), &mut trace).unwrap();
        assert_eq!(trace, ["start", "second"]);
        assert!(matches!(outcome, Outcome::Halted(s) if machine.name(s) == "second"));
    }

    #[test]
    fn test_included_exit_edge_is_overridden() {
        let sub = Blueprint::new()
            .states(&STATES[1..])
            .edges(&[EdgeDef::new("go", "start", "first")]);
        let machine = Blueprint::new()
            .states(&STATES[..1])
            .include(sub)
            .edges(&[EdgeDef::new("go", "start", "second")])
            .build()
            .unwrap();

        let mut trace = Trace::new();
        machine.run(machine.entry(), &mut trace).unwrap();
        assert_eq!(trace, ["start", "second"]);
    }

    #[test]
    fn test_missing_edge_is_an_error() {
        let machine = StateMachine::build(&STATES, &[]).unwrap();
        let start = machine.entry();
        let mut trace = Trace::new();

        let result = machine.run_next(start, "nonexistent", &mut trace);
        assert!(matches!(
            result,
            Err(Error::MissingEdge { state: "start", ref edge }) if edge == "nonexistent"
        ));
        assert!(trace.is_empty());
        assert!(!machine.has_edge(start, "nonexistent"));
    }

    #[test]
    fn test_fired_missing_edge_stops_the_run() {
        let machine = StateMachine::build(&STATES, &[]).unwrap();
        let lost = machine.find("lost").unwrap();
        let mut trace = Trace::new();
        assert!(matches!(
            machine.run(lost, &mut trace),
            Err(Error::MissingEdge { state: "lost", .. })
        ));
        assert_eq!(trace, ["lost"]);
    }

    #[test]
    fn test_undeclared_state_fails_build() {
        let result = StateMachine::build(&STATES, &[EdgeDef::new("go", "start", "ghost")]);
        assert!(matches!(result, Err(Error::UndeclaredState(name)) if name == "ghost"));
    }

    #[test]
    fn test_duplicate_and_empty_graphs_fail_build() {
        let twice = [STATES[0], STATES[0]];
        assert!(matches!(
            StateMachine::build(&twice, &[]),
            Err(Error::DuplicateState(_))
        ));
        assert!(matches!(
            StateMachine::<Trace, ()>::build(&[], &[]),
            Err(Error::EmptyGraph)
        ));
    }

    #[test]
    fn test_entry_is_first_declared_state() {
        let machine = StateMachine::build(&STATES[3..], &[]).unwrap();
        assert_eq!(machine.name(machine.entry()), "wait");
    }

    #[test]
    fn test_suspend_reports_the_waiting_state() {
        let machine = StateMachine::build(
            &STATES,
            &[
                EdgeDef::new("go", "start", "wait"),
                EdgeDef::new("resume", "wait", "first"),
            ],
        )
        .unwrap();
        let mut trace = Trace::new();

        let state = match machine.run(machine.entry(), &mut trace).unwrap() {
            Outcome::Suspended { state, .. } => state,
            Outcome::Halted(_) => panic!("expected the machine to suspend"),
        };
        assert_eq!(machine.name(state), "wait");

        machine.run_next(state, "resume", &mut trace).unwrap();
        assert_eq!(trace, ["start", "wait", "first"]);
    }

    #[test]
    fn test_display_lists_winning_edge_first() {
        let machine = StateMachine::build(
            &STATES[..3],
            &[
                EdgeDef::new("go", "start", "first"),
                EdgeDef::new("go", "start", "second"),
            ],
        )
        .unwrap();
        let text = machine.to_string();
        assert!(text.starts_with("start\n  go -> second\n  go -> first\n"));
    }
}
