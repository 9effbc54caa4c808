//! Net graph, island partitioning and reachability.
//!
//! Nets are graph nodes and conducting elements are edges. Open circuits
//! (capacitors at DC, open switches) contribute no edge, so a net hanging off
//! one of them ends up in its own island and can never make another island's
//! matrix singular.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::Bfs;

use super::elements::ElementSet;

/// Element an edge stands for, as an index into its [`ElementSet`] list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRef {
    Resistor(usize),
    Diode(usize),
    Source(usize),
}

/// A connected group of nets and the elements between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Island {
    /// Nets in declaration order.
    pub nets: Vec<String>,
    pub resistors: Vec<usize>,
    pub diodes: Vec<usize>,
    pub sources: Vec<usize>,
}

impl Island {
    pub fn has_elements(&self) -> bool {
        !(self.resistors.is_empty() && self.diodes.is_empty() && self.sources.is_empty())
    }
}

/// Undirected graph over nets.
#[derive(Debug, Clone, Default)]
pub struct NetGraph {
    graph: UnGraph<String, ElementRef>,
    nodes: HashMap<String, NodeIndex>,
}

impl NetGraph {
    pub fn build(nets: &[String], elements: &ElementSet) -> Self {
        let mut graph = UnGraph::with_capacity(nets.len(), 0);
        let mut nodes = HashMap::with_capacity(nets.len());
        for net in nets {
            nodes
                .entry(net.clone())
                .or_insert_with(|| graph.add_node(net.clone()));
        }
        let mut this = Self { graph, nodes };

        for (i, r) in elements.resistors.iter().enumerate() {
            if r.conducts() {
                this.connect(&r.net_a, &r.net_b, ElementRef::Resistor(i));
            }
        }
        for (i, d) in elements.diodes.iter().enumerate() {
            this.connect(&d.anode, &d.cathode, ElementRef::Diode(i));
        }
        for (i, s) in elements.sources.iter().enumerate() {
            match &s.net_minus {
                Some(minus) => this.connect(&s.net_plus, minus, ElementRef::Source(i)),
                None => this.connect(&s.net_plus, &s.net_plus, ElementRef::Source(i)),
            }
        }
        this
    }

    fn connect(&mut self, a: &str, b: &str, element: ElementRef) {
        if let (Some(&na), Some(&nb)) = (self.nodes.get(a), self.nodes.get(b)) {
            self.graph.add_edge(na, nb, element);
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Partition nets into connected islands.
    ///
    /// Islands come out ordered by their first net, and every element lands
    /// in the island of its endpoints.
    pub fn islands(&self) -> Vec<Island> {
        let mut sets = UnionFind::<usize>::new(self.graph.node_count());
        for edge in self.graph.edge_indices() {
            if let Some((a, b)) = self.graph.edge_endpoints(edge) {
                sets.union(a.index(), b.index());
            }
        }

        let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
        let mut islands: Vec<Island> = Vec::new();
        for node in self.graph.node_indices() {
            let root = sets.find(node.index());
            let slot = *slot_of_root.entry(root).or_insert_with(|| {
                islands.push(Island::default());
                islands.len() - 1
            });
            islands[slot].nets.push(self.graph[node].clone());
        }

        for edge in self.graph.edge_indices() {
            let Some((a, _)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let Some(&slot) = slot_of_root.get(&sets.find(a.index())) else {
                continue;
            };
            let island = &mut islands[slot];
            match self.graph[edge] {
                ElementRef::Resistor(i) => island.resistors.push(i),
                ElementRef::Diode(i) => island.diodes.push(i),
                ElementRef::Source(i) => island.sources.push(i),
            }
        }
        for island in &mut islands {
            island.resistors.sort_unstable();
            island.diodes.sort_unstable();
            island.sources.sort_unstable();
        }
        islands
    }

    /// Nets reachable from any of `roots` through conducting elements.
    pub fn reachable_from<'a, I>(&self, roots: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut reached: HashSet<NodeIndex> = HashSet::new();
        for root in roots {
            let Some(&start) = self.nodes.get(root) else {
                continue;
            };
            if reached.contains(&start) {
                continue;
            }
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(node) = bfs.next(&self.graph) {
                reached.insert(node);
            }
        }
        reached
            .into_iter()
            .map(|n| self.graph[n].clone())
            .collect()
    }
}
