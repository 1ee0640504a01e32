//! Community detection over the elite population.
//!
//! Elites whose routing keys are strongly correlated are linked in an
//! undirected weighted graph. Asynchronous label propagation splits the graph
//! into communities and each community nominates one promising member for
//! local search.

use crate::config::SearchSettings;
use crate::solution::Solution;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// Pearson correlation of the first `n` keys of two key vectors.
///
/// Returns NaN when either vector is constant over those keys.
pub fn pearson(a: &[f64], b: &[f64], n: usize) -> f64 {
    let n = n.min(a.len()).min(b.len());
    if n == 0 {
        return f64::NAN;
    }
    let count = n as f64;
    let (mut sa, mut sb, mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (&x, &y) in a[..n].iter().zip(&b[..n]) {
        sa += x;
        sb += y;
        sab += x * y;
        saa += x * x;
        sbb += y * y;
    }
    let numerator = count * sab - sa * sb;
    let denominator = ((count * saa - sa * sa) * (count * sbb - sb * sb)).sqrt();
    numerator / denominator
}

/// Undirected weighted graph over a slice of solutions
#[derive(Debug, Clone)]
pub struct CorrelationGraph {
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl CorrelationGraph {
    /// Link every pair of solutions whose correlation exceeds `threshold`.
    pub fn build(solutions: &[Solution], nb_keys: usize, threshold: f64) -> Self {
        let keys: Vec<Vec<f64>> = solutions.iter().map(|s| s.chromosome.keys().collect()).collect();
        let mut adjacency = vec![Vec::new(); solutions.len()];
        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                let rho = pearson(&keys[i], &keys[j], nb_keys);
                // NaN compares false: constant vectors stay unlinked
                if rho > threshold {
                    adjacency[i].push((j, rho));
                    adjacency[j].push((i, rho));
                }
            }
        }
        CorrelationGraph { adjacency }
    }

    pub fn from_edges(nb_nodes: usize, edges: &[(usize, usize, f64)]) -> Self {
        let mut adjacency = vec![Vec::new(); nb_nodes];
        for &(i, j, w) in edges {
            adjacency[i].push((j, w));
            adjacency[j].push((i, w));
        }
        CorrelationGraph { adjacency }
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    pub fn neighbors(&self, node: usize) -> &[(usize, f64)] {
        &self.adjacency[node]
    }

    pub fn nb_edges(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }
}

/// Label a node adopts given its neighbors' labels.
///
/// The label with the largest incident weight wins and ties go to the
/// smallest label, whether or not it is the current one. A node without
/// neighbors keeps its label.
fn dominant_label(graph: &CorrelationGraph, labels: &[usize], node: usize) -> usize {
    let mut weights: BTreeMap<usize, f64> = BTreeMap::new();
    for &(neighbor, weight) in graph.neighbors(node) {
        *weights.entry(labels[neighbor]).or_insert(0.0) += weight;
    }

    let (mut best_label, mut best_weight) = (labels[node], f64::MIN_POSITIVE);
    for (label, weight) in weights {
        if weight > best_weight {
            best_label = label;
            best_weight = weight;
        }
    }
    best_label
}

/// One asynchronous pass in the given visiting order; returns the number of changed labels.
pub fn propagate_once(graph: &CorrelationGraph, labels: &mut [usize], order: &[usize]) -> usize {
    let mut changes = 0;
    for &node in order {
        let label = dominant_label(graph, labels, node);
        if label != labels[node] {
            labels[node] = label;
            changes += 1;
        }
    }
    changes
}

/// Run label propagation until a pass changes nothing.
///
/// Every node starts in its own community and the visiting order is
/// reshuffled before each pass. Stops after `max_passes` passes at the latest.
pub fn label_propagation<R: Rng + ?Sized>(graph: &CorrelationGraph, rng: &mut R, max_passes: usize) -> Vec<usize> {
    let mut labels: Vec<usize> = (0..graph.len()).collect();
    let mut order: Vec<usize> = (0..graph.len()).collect();

    for _ in 0..max_passes {
        order.shuffle(rng);
        if propagate_once(graph, &mut labels, &order) == 0 {
            return labels;
        }
    }
    log::warn!(
        "Label propagation did not converge after {} passes on {} nodes",
        max_passes,
        graph.len()
    );
    labels
}

/// Store `labels` on the solutions and flag one promising member per community.
///
/// Communities are visited in order of first appearance. The representative is
/// the lowest-objective member not yet local-searched, or the first member when
/// all were searched. Returns the indices of the promising solutions.
pub fn mark_promising(solutions: &mut [Solution], labels: &[usize]) -> Vec<usize> {
    let mut communities: Vec<(usize, Vec<usize>)> = Vec::new();
    for (i, solution) in solutions.iter_mut().enumerate() {
        solution.promising = false;
        solution.label = labels[i];
        match communities.iter_mut().find(|(label, _)| *label == labels[i]) {
            Some((_, members)) => members.push(i),
            None => communities.push((labels[i], vec![i])),
        }
    }

    let mut promising = Vec::with_capacity(communities.len());
    for (_, members) in &communities {
        let mut chosen: Option<usize> = None;
        for &i in members {
            if solutions[i].local_searched {
                continue;
            }
            if chosen.map_or(true, |c| solutions[i].objective < solutions[c].objective) {
                chosen = Some(i);
            }
        }
        let chosen = chosen.unwrap_or(members[0]);
        solutions[chosen].promising = true;
        promising.push(chosen);
    }
    promising
}

/// Build the correlation graph of `elites`, propagate labels and mark the promising ones.
pub fn detect_communities<R: Rng + ?Sized>(
    elites: &mut [Solution],
    settings: &SearchSettings,
    nb_keys: usize,
    rng: &mut R,
) -> Vec<usize> {
    let graph = CorrelationGraph::build(elites, nb_keys, settings.correlation_threshold);
    let labels = label_propagation(&graph, rng, settings.max_label_passes);
    let promising = mark_promising(elites, &labels);
    log::trace!(
        "{} elites, {} edges, {} communities",
        elites.len(),
        graph.nb_edges(),
        promising.len()
    );
    promising
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solution::{Chromosome, Gene};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn solution_with(keys: &[f64], objective: f64, local_searched: bool) -> Solution {
        let genes = keys.iter().map(|&key| Gene { user: 0, key }).collect();
        Solution {
            objective,
            local_searched,
            ..Solution::new(Chromosome { genes })
        }
    }

    #[test]
    fn test_pearson() {
        let a = [0.1, 0.2, 0.3, 0.4];
        let b = [0.2, 0.4, 0.6, 0.8];
        let c = [0.8, 0.6, 0.4, 0.2];
        assert!((pearson(&a, &b, 4) - 1.0).abs() < 1e-9);
        assert!((pearson(&a, &c, 4) + 1.0).abs() < 1e-9);
        assert!(pearson(&a, &[0.5; 4], 4).is_nan());
        // trailing strategy keys are ignored
        assert!((pearson(&[0.1, 0.2, 0.3, 0.9], &[0.1, 0.2, 0.3, 0.0], 3) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_graph_links_correlated_solutions() {
        let solutions = vec![
            solution_with(&[0.1, 0.2, 0.3, 0.4], 1.0, false),
            solution_with(&[0.15, 0.25, 0.35, 0.45], 2.0, false),
            solution_with(&[0.4, 0.3, 0.2, 0.1], 3.0, false),
            solution_with(&[0.5, 0.5, 0.5, 0.5], 4.0, false),
        ];
        let graph = CorrelationGraph::build(&solutions, 4, 0.7);

        assert_eq!(graph.nb_edges(), 1);
        assert_eq!(graph.neighbors(0).len(), 1);
        assert_eq!(graph.neighbors(0)[0].0, 1);
        assert!(graph.neighbors(2).is_empty());
        assert!(graph.neighbors(3).is_empty());
    }

    #[test]
    fn test_label_propagation_reaches_fixed_point() {
        // two triangles joined by a weak edge
        let edges = [
            (0, 1, 0.9),
            (1, 2, 0.9),
            (0, 2, 0.9),
            (3, 4, 0.8),
            (4, 5, 0.8),
            (3, 5, 0.8),
            (2, 3, 0.75),
        ];
        let graph = CorrelationGraph::from_edges(7, &edges);
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        for _ in 0..20 {
            let mut labels = label_propagation(&graph, &mut rng, 1000);
            assert_eq!(labels.len(), 7);
            // isolated node keeps its own label
            assert_eq!(labels[6], 6);
            assert_eq!(labels[0], labels[1]);
            assert_eq!(labels[4], labels[5]);

            let mut order: Vec<usize> = (0..7).collect();
            for _ in 0..5 {
                order.shuffle(&mut rng);
                assert_eq!(propagate_once(&graph, &mut labels, &order), 0);
            }
        }
    }

    #[test]
    fn test_dominant_label_ties_go_to_smallest_label() {
        let graph = CorrelationGraph::from_edges(4, &[(0, 1, 0.8), (0, 2, 0.8)]);
        let labels = [5, 2, 5, 3];

        // label 5 (its own) and label 2 weigh the same: the smaller label wins
        assert_eq!(dominant_label(&graph, &labels, 0), 2);
        assert_eq!(dominant_label(&graph, &labels, 3), 3);

        let heavier = CorrelationGraph::from_edges(3, &[(0, 1, 0.8), (0, 2, 0.9)]);
        assert_eq!(dominant_label(&heavier, &labels[..3], 0), 5);
    }

    #[test]
    fn test_promising_selection() {
        let mut solutions = vec![
            solution_with(&[0.1], 5.0, false),
            solution_with(&[0.1], 3.0, true),
            solution_with(&[0.1], 4.0, false),
            solution_with(&[0.1], 1.0, true),
            solution_with(&[0.1], 2.0, true),
        ];
        solutions[4].promising = true;
        let labels = [7, 7, 7, 2, 2];

        let promising = mark_promising(&mut solutions, &labels);

        // community 7: best unsearched is index 2; community 2: all searched, first member
        assert_eq!(promising, vec![2, 3]);
        let flags: Vec<bool> = solutions.iter().map(|s| s.promising).collect();
        assert_eq!(flags, vec![false, false, true, true, false]);
        assert_eq!(solutions[1].label, 7);
        assert_eq!(solutions[4].label, 2);
    }

    #[test]
    fn test_every_elite_gets_one_label() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut elites: Vec<Solution> = (0..30)
            .map(|i| {
                let keys: Vec<f64> = (0..8).map(|_| rng.gen::<f64>()).collect();
                solution_with(&keys, i as f64, false)
            })
            .collect();

        let promising = detect_communities(&mut elites, &SearchSettings::default(), 8, &mut rng);

        let mut labels: Vec<usize> = elites.iter().map(|s| s.label).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(promising.len(), labels.len());
        assert_eq!(elites.iter().filter(|s| s.promising).count(), promising.len());
    }
}
