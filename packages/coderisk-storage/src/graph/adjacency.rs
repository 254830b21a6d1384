//! In-memory IMPORTS/CALLS adjacency index backing the Graph Store's
//! coupling query (§4.8: "collect neighbors over IMPORTS/CALLS edges;
//! `coupling_count` is the number of distinct neighbors").
//!
//! Generalized from this codebase's existing Python-file wildcard-import
//! reverse index to a language-agnostic edge between canonical paths —
//! multiple edge kinds (imports a specific symbol, imports everything,
//! calls) all collapse into "is a neighbor of" for the coupling count.

use std::collections::HashSet;

use dashmap::DashMap;

/// A directed structural edge: `from` depends on `to` (an import or a
/// call into `to`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Edge {
    from: String,
    to: String,
}

/// Lock-free concurrent adjacency index, undirected for coupling purposes:
/// a neighbor is anyone on either side of an edge touching this path.
pub struct AdjacencyIndex {
    forward: DashMap<String, HashSet<String>>,
    reverse: DashMap<String, HashSet<String>>,
}

impl AdjacencyIndex {
    pub fn new() -> Self {
        Self {
            forward: DashMap::new(),
            reverse: DashMap::new(),
        }
    }

    pub fn add_edge(&self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        self.forward.entry(from.clone()).or_default().insert(to.clone());
        self.reverse.entry(to).or_default().insert(from);
    }

    /// Distinct neighbors of `path` across all of its historical paths
    /// (§4.8: "every query takes the full historical path set ... so
    /// rename-induced history gaps are invisible to the engine").
    pub fn neighbors(&self, historical_paths: &[String]) -> HashSet<String> {
        let mut neighbors = HashSet::new();
        for path in historical_paths {
            if let Some(outgoing) = self.forward.get(path) {
                neighbors.extend(outgoing.iter().cloned());
            }
            if let Some(incoming) = self.reverse.get(path) {
                neighbors.extend(incoming.iter().cloned());
            }
        }
        for path in historical_paths {
            neighbors.remove(path);
        }
        neighbors
    }

    pub fn coupling_count(&self, historical_paths: &[String]) -> usize {
        self.neighbors(historical_paths).len()
    }

    pub fn clear(&self) {
        self.forward.clear();
        self.reverse.clear();
    }
}

impl Default for AdjacencyIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbors_are_distinct_across_both_directions() {
        let index = AdjacencyIndex::new();
        index.add_edge("a.rs", "b.rs");
        index.add_edge("c.rs", "a.rs");

        let neighbors = index.neighbors(&["a.rs".to_string()]);
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.contains("b.rs"));
        assert!(neighbors.contains("c.rs"));
    }

    #[test]
    fn historical_paths_are_unioned_and_self_excluded() {
        let index = AdjacencyIndex::new();
        index.add_edge("old_name.rs", "b.rs");
        index.add_edge("new_name.rs", "c.rs");
        index.add_edge("new_name.rs", "old_name.rs");

        let neighbors = index.neighbors(&["old_name.rs".to_string(), "new_name.rs".to_string()]);
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.contains("b.rs"));
        assert!(neighbors.contains("c.rs"));
    }

    #[test]
    fn coupling_count_matches_neighbor_set_size() {
        let index = AdjacencyIndex::new();
        index.add_edge("a.rs", "b.rs");
        index.add_edge("a.rs", "c.rs");
        assert_eq!(index.coupling_count(&["a.rs".to_string()]), 2);
    }

    #[test]
    fn file_with_no_edges_has_zero_coupling() {
        let index = AdjacencyIndex::new();
        assert_eq!(index.coupling_count(&["isolated.rs".to_string()]), 0);
    }
}
