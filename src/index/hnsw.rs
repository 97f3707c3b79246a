//! Hierarchical navigable small-world graph over unit vectors.
//!
//! Scores are inner products, higher is closer. Node levels are drawn from
//! an exponential distribution with scale `1/ln(M)`; each node keeps up to
//! `2M` neighbors on layer 0 and `M` on the layers above.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::HnswParams;

/// Caps runaway levels from an unlucky draw.
const MAX_LEVEL: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    score: f32,
    node: usize,
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.node.cmp(&self.node))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hnsw {
    params: HnswParams,
    vectors: Vec<Vec<f32>>,
    /// `links[node][layer]` lists neighbor node ids.
    links: Vec<Vec<Vec<usize>>>,
    entry: Option<usize>,
    max_level: usize,
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl Hnsw {
    pub fn new(params: HnswParams) -> Self {
        Self {
            params,
            vectors: Vec::new(),
            links: Vec::new(),
            entry: None,
            max_level: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.params.ef_search = ef_search;
    }

    /// Internal consistency check for graphs read back from disk.
    pub fn is_consistent(&self) -> bool {
        let n = self.vectors.len();
        self.links.len() == n
            && self.entry.map_or(n == 0, |e| e < n)
            && self
                .links
                .iter()
                .all(|layers| !layers.is_empty() && layers.iter().flatten().all(|&nb| nb < n))
    }

    fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    /// Level for the node about to be inserted. Seeded by node position so
    /// the same insertion sequence always builds the same graph, including
    /// after a reload.
    fn draw_level(&self) -> usize {
        let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(self.len() as u64));
        let uniform: f64 = 1.0 - rng.gen::<f64>();
        let scale = 1.0 / (self.params.m as f64).ln();
        ((-uniform.ln() * scale).floor() as usize).min(MAX_LEVEL)
    }

    fn score(&self, query: &[f32], node: usize) -> f32 {
        dot(query, &self.vectors[node])
    }

    /// Beam search on one layer. Returns up to `ef` nodes, best first.
    fn search_layer(&self, query: &[f32], entry_points: &[usize], ef: usize, layer: usize) -> Vec<Scored> {
        let mut visited: HashSet<usize> = entry_points.iter().copied().collect();
        let mut candidates: BinaryHeap<Scored> = BinaryHeap::new();
        let mut results: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();

        for &node in entry_points {
            let s = Scored {
                score: self.score(query, node),
                node,
            };
            candidates.push(s);
            results.push(Reverse(s));
            if results.len() > ef {
                results.pop();
            }
        }

        while let Some(current) = candidates.pop() {
            if let Some(Reverse(worst)) = results.peek() {
                if results.len() >= ef && current.score < worst.score {
                    break;
                }
            }

            let Some(neighbors) = self.links[current.node].get(layer) else {
                continue;
            };
            for &neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let s = Scored {
                    score: self.score(query, neighbor),
                    node: neighbor,
                };
                let admit = results.len() < ef
                    || results.peek().is_some_and(|Reverse(worst)| s.score > worst.score);
                if admit {
                    candidates.push(s);
                    results.push(Reverse(s));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Scored> = results.into_iter().map(|Reverse(s)| s).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }

    /// Greedy descent from the entry point down to (but not including) `stop_layer`.
    fn descend(&self, query: &[f32], stop_layer: usize) -> Option<usize> {
        let mut current = self.entry?;
        let mut layer = self.max_level;
        while layer > stop_layer {
            if let Some(best) = self.search_layer(query, &[current], 1, layer).first() {
                current = best.node;
            }
            layer -= 1;
        }
        Some(current)
    }

    /// Append a unit vector; its node id is the previous `len()`.
    pub fn insert(&mut self, vector: Vec<f32>) {
        let level = self.draw_level();
        let node = self.vectors.len();
        self.vectors.push(vector);
        self.links.push(vec![Vec::new(); level + 1]);

        let Some(mut entry) = self.descend(&self.vectors[node].clone(), level) else {
            self.entry = Some(node);
            self.max_level = level;
            return;
        };

        let query = self.vectors[node].clone();
        let top = level.min(self.max_level);
        for layer in (0..=top).rev() {
            let found = self.search_layer(&query, &[entry], self.params.ef_construction, layer);
            let neighbors: Vec<usize> = found
                .iter()
                .filter(|s| s.node != node)
                .take(self.params.m)
                .map(|s| s.node)
                .collect();

            for &neighbor in &neighbors {
                self.links[neighbor][layer].push(node);
                self.prune(neighbor, layer);
            }
            self.links[node][layer] = neighbors;

            if let Some(best) = found.first() {
                entry = best.node;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry = Some(node);
        }
    }

    /// Keep only the closest `max_neighbors(layer)` links of `node`.
    fn prune(&mut self, node: usize, layer: usize) {
        let limit = self.max_neighbors(layer);
        if self.links[node][layer].len() <= limit {
            return;
        }
        let base = &self.vectors[node];
        let mut scored: Vec<Scored> = self.links[node][layer]
            .iter()
            .map(|&nb| Scored {
                score: dot(base, &self.vectors[nb]),
                node: nb,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(limit);
        self.links[node][layer] = scored.into_iter().map(|s| s.node).collect();
    }

    /// Up to `k` `(node, score)` pairs, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let Some(entry) = self.descend(query, 0) else {
            return Vec::new();
        };
        let k = k.min(self.len());
        let ef = self.params.ef_search.max(k);
        self.search_layer(query, &[entry], ef, 0)
            .into_iter()
            .take(k)
            .map(|s| (s.node, s.score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HnswParams {
        HnswParams {
            m: 8,
            ef_construction: 64,
            ef_search: 64,
            seed: 7,
        }
    }

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let n = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-10);
        v.into_iter().map(|x| x / n).collect()
    }

    fn random_unit_vectors(count: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| unit((0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect()))
            .collect()
    }

    #[test]
    fn test_empty_graph_search() {
        let g = Hnsw::new(params());
        assert!(g.search(&[1.0, 0.0], 3).is_empty());
        assert!(g.is_consistent());
    }

    #[test]
    fn test_single_node() {
        let mut g = Hnsw::new(params());
        g.insert(vec![1.0, 0.0]);
        let hits = g.search(&[1.0, 0.0], 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 0);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_results_sorted_descending() {
        let mut g = Hnsw::new(params());
        for v in random_unit_vectors(50, 8, 1) {
            g.insert(v);
        }
        let q = random_unit_vectors(1, 8, 99).remove(0);
        let hits = g.search(&q, 10);
        assert_eq!(hits.len(), 10);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_recall_against_brute_force() {
        let data = random_unit_vectors(300, 16, 3);
        let mut g = Hnsw::new(params());
        for v in &data {
            g.insert(v.clone());
        }
        assert!(g.is_consistent());

        let queries = random_unit_vectors(20, 16, 4);
        let k = 10;
        let mut found = 0;
        for q in &queries {
            let mut exact: Vec<(usize, f32)> =
                data.iter().enumerate().map(|(i, v)| (i, dot(q, v))).collect();
            exact.sort_by(|a, b| b.1.total_cmp(&a.1));
            let truth: HashSet<usize> = exact.iter().take(k).map(|(i, _)| *i).collect();
            found += g
                .search(q, k)
                .iter()
                .filter(|(i, _)| truth.contains(i))
                .count();
        }
        let recall = found as f64 / (queries.len() * k) as f64;
        assert!(recall >= 0.9, "recall {recall}");
    }

    #[test]
    fn test_self_query_finds_itself() {
        let data = random_unit_vectors(200, 12, 5);
        let mut g = Hnsw::new(params());
        for v in &data {
            g.insert(v.clone());
        }
        let exact = data
            .iter()
            .enumerate()
            .filter(|(i, v)| g.search(v, 1).first().map(|h| h.0) == Some(*i))
            .count();
        assert!(exact >= 190, "only {exact} of 200 self-queries matched");
    }

    #[test]
    fn test_same_seed_same_graph() {
        let data = random_unit_vectors(60, 8, 6);
        let mut a = Hnsw::new(params());
        let mut b = Hnsw::new(params());
        for v in &data {
            a.insert(v.clone());
            b.insert(v.clone());
        }
        assert_eq!(a.links, b.links);
        assert_eq!(a.entry, b.entry);
    }

    #[test]
    fn test_neighbor_lists_bounded() {
        let mut g = Hnsw::new(params());
        for v in random_unit_vectors(150, 8, 8) {
            g.insert(v);
        }
        for layers in &g.links {
            for (layer, neighbors) in layers.iter().enumerate() {
                assert!(neighbors.len() <= g.max_neighbors(layer));
            }
        }
    }
}
