//! Directed dependency graph over string labels with cycle detection.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    index: HashMap<String, usize>,
    labels: Vec<String>,
    successors: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    pub fn add_vertex(&mut self, label: &str) -> usize {
        if let Some(&v) = self.index.get(label) {
            return v;
        }
        let v = self.labels.len();
        self.labels.push(label.to_string());
        self.successors.push(BTreeSet::new());
        self.index.insert(label.to_string(), v);
        v
    }

    /// Insert `from -> to`, creating missing vertices. Repeated edges are ignored.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let f = self.add_vertex(from);
        let t = self.add_vertex(to);
        self.successors[f].insert(t);
    }

    pub fn contains_edge(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&f), Some(&t)) => self.successors[f].contains(&t),
            _ => false,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.labels.len()
    }

    pub fn edge_count(&self) -> usize {
        self.successors.iter().map(|s| s.len()).sum()
    }

    pub fn is_cyclic(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Labels along one cycle, starting and ending at the same vertex.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let n = self.labels.len();
        let mut visited = vec![false; n];
        let mut on_stack = vec![false; n];
        let mut path = Vec::new();
        for start in 0..n {
            if !visited[start] {
                if let Some(cycle) = self.visit(start, &mut visited, &mut on_stack, &mut path) {
                    return Some(cycle.into_iter().map(|v| self.labels[v].clone()).collect());
                }
            }
        }
        None
    }

    fn visit(
        &self,
        v: usize,
        visited: &mut [bool],
        on_stack: &mut [bool],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        visited[v] = true;
        on_stack[v] = true;
        path.push(v);
        for &next in &self.successors[v] {
            if on_stack[next] {
                let pos = path.iter().position(|&p| p == next).unwrap_or(0);
                let mut cycle = path[pos..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            if !visited[next] {
                if let Some(cycle) = self.visit(next, visited, on_stack, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        on_stack[v] = false;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.add_edge("A", "B");
        g.add_edge("B", "C");
        g.add_edge("C", "A");
        g
    }

    #[test]
    fn test_triangle_is_cyclic() {
        let g = triangle();
        assert!(g.is_cyclic());
        assert_eq!(
            g.find_cycle().unwrap(),
            vec!["A".to_string(), "B".to_string(), "C".to_string(), "A".to_string()]
        );
    }

    #[test]
    fn test_dropping_any_edge_breaks_the_cycle() {
        let edges = [("A", "B"), ("B", "C"), ("C", "A")];
        for skip in 0..edges.len() {
            let mut g = DependencyGraph::new();
            for (k, (from, to)) in edges.iter().enumerate() {
                if k != skip {
                    g.add_edge(from, to);
                }
            }
            assert!(!g.is_cyclic(), "still cyclic without edge {:?}", edges[skip]);
        }
    }

    #[test]
    fn test_edges_are_idempotent() {
        let mut g = DependencyGraph::new();
        g.add_edge("S1", "S2");
        g.add_edge("S1", "S2");
        assert_eq!(g.vertex_count(), 2);
        assert_eq!(g.edge_count(), 1);
        assert!(g.contains_edge("S1", "S2"));
        assert!(!g.contains_edge("S2", "S1"));
    }

    #[test]
    fn test_self_loop_and_diamond() {
        let mut g = DependencyGraph::new();
        g.add_edge("A", "B");
        g.add_edge("A", "C");
        g.add_edge("B", "D");
        g.add_edge("C", "D");
        assert!(!g.is_cyclic());
        g.add_edge("D", "D");
        assert!(g.is_cyclic());
    }
}
