//! Dijkstra shortest paths over the skeleton adjacency list.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Adjacency list: `edges[i] = [(neighbor_idx, weight), ...]`
pub type Adjacency = [Vec<(usize, f32)>];

/// State for Dijkstra's algorithm priority queue.
#[derive(Clone, Copy, Debug)]
pub struct DijkstraState {
    /// Current path cost.
    pub cost: f32,
    /// Current node index.
    pub node: usize,
}

impl PartialEq for DijkstraState {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.node == other.node
    }
}

impl Eq for DijkstraState {}

impl Ord for DijkstraState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (BinaryHeap is max-heap by default)
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for DijkstraState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-source result: distance and predecessor for every node.
#[derive(Clone, Debug)]
pub struct SingleSource {
    /// Distance from the source (`f32::INFINITY` when unreachable).
    pub dist: Vec<f32>,
    /// Predecessor on the shortest path from the source.
    pub prev: Vec<Option<usize>>,
}

/// Run Dijkstra from `source` over the whole graph.
pub fn dijkstra_from(edges: &Adjacency, source: usize) -> SingleSource {
    let n = edges.len();
    let mut dist = vec![f32::INFINITY; n];
    let mut prev = vec![None; n];

    if source >= n {
        return SingleSource { dist, prev };
    }

    dist[source] = 0.0;
    let mut heap = BinaryHeap::new();
    heap.push(DijkstraState {
        cost: 0.0,
        node: source,
    });

    while let Some(DijkstraState { cost, node }) = heap.pop() {
        // Skip if we've found a better path
        if cost > dist[node] {
            continue;
        }

        for &(neighbor, weight) in &edges[node] {
            let new_dist = dist[node] + weight;
            if new_dist < dist[neighbor] {
                dist[neighbor] = new_dist;
                prev[neighbor] = Some(node);
                heap.push(DijkstraState {
                    cost: new_dist,
                    node: neighbor,
                });
            }
        }
    }

    SingleSource { dist, prev }
}

/// Distances from a source node to all nodes (`f32::INFINITY` for unreachable).
pub fn dijkstra_distances(edges: &Adjacency, source: usize) -> Vec<f32> {
    dijkstra_from(edges, source).dist
}

/// Shortest path between two nodes: total cost and node sequence.
///
/// Returns `None` when `goal` is unreachable from `start`.
pub fn dijkstra(edges: &Adjacency, start: usize, goal: usize) -> Option<(f32, Vec<usize>)> {
    if goal >= edges.len() {
        return None;
    }
    let single = dijkstra_from(edges, start);
    let cost = single.dist[goal];
    if !cost.is_finite() {
        return None;
    }

    let mut path = vec![goal];
    let mut current = goal;
    while current != start {
        current = single.prev[current]?;
        path.push(current);
    }
    path.reverse();
    Some((cost, path))
}

/// Cost matrix `costs[from][to]` over every pair of nodes.
pub fn all_pairs_costs(edges: &Adjacency) -> Vec<Vec<f32>> {
    (0..edges.len())
        .map(|i| dijkstra_distances(edges, i))
        .collect()
}

/// All-pairs shortest path costs and routes.
#[derive(Clone, Debug)]
pub struct ShortestPaths {
    rows: Vec<SingleSource>,
}

impl ShortestPaths {
    /// Run Dijkstra from every node.
    pub fn compute(edges: &Adjacency) -> Self {
        let rows = (0..edges.len()).map(|i| dijkstra_from(edges, i)).collect();
        Self { rows }
    }

    /// Number of nodes covered.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Shortest path cost from `from` to `to` (`f32::INFINITY` if unreachable).
    pub fn cost(&self, from: usize, to: usize) -> f32 {
        self.rows
            .get(from)
            .and_then(|row| row.dist.get(to))
            .copied()
            .unwrap_or(f32::INFINITY)
    }

    /// Node sequence of the shortest path from `from` to `to`, inclusive.
    pub fn path(&self, from: usize, to: usize) -> Option<Vec<usize>> {
        if !self.cost(from, to).is_finite() {
            return None;
        }

        let row = &self.rows[from];
        let mut path = vec![to];
        let mut current = to;
        while current != from {
            current = row.prev[current]?;
            path.push(current);
        }
        path.reverse();
        Some(path)
    }
}
