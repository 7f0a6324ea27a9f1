//! Greedy traversal tour over the skeleton graph.
//!
//! The planner visits every vertex of one connected component, always
//! moving to the unvisited vertex with the smallest shortest-path cost
//! from the current one. This is a nearest-neighbour open-path heuristic,
//! not an optimal tour.

use std::collections::{BTreeSet, VecDeque};
use std::f32::consts::PI;

use rand::Rng;
use rand::seq::IndexedRandom;
use thiserror::Error;

use super::dijkstra::ShortestPaths;
use super::graph::{SkeletonGraph, VertexId};
use crate::core::Pose2D;

/// Components smaller than this are pruned before planning.
pub const MIN_COMPONENT_SIZE: usize = 2;

/// Planning failure. Always fatal to the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error(
        "insufficient number of nodes in skeleton graph ({remaining} after pruning), can not generate traversal path"
    )]
    InsufficientNodes { remaining: usize },

    #[error("start vertex {0} is not part of the pruned skeleton graph")]
    UnknownStart(VertexId),
}

/// A target pose derived from a skeleton vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub vertex: VertexId,
    pub pose: Pose2D,
}

/// Planned waypoint queue, consumed front to back by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct Tour {
    waypoints: VecDeque<Waypoint>,
    planned: usize,
    cost: f32,
}

impl Tour {
    pub fn new(waypoints: Vec<Waypoint>, cost: f32) -> Self {
        Self {
            planned: waypoints.len(),
            waypoints: waypoints.into(),
            cost,
        }
    }

    /// Remove and return the next waypoint.
    pub fn pop_front(&mut self) -> Option<Waypoint> {
        self.waypoints.pop_front()
    }

    /// Waypoints still to be sent.
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Number of waypoints the tour was planned with.
    pub fn planned_len(&self) -> usize {
        self.planned
    }

    /// Sum of the shortest-path costs between consecutive waypoints.
    pub fn cost(&self) -> f32 {
        self.cost
    }

    pub fn waypoints(&self) -> impl Iterator<Item = &Waypoint> {
        self.waypoints.iter()
    }

    pub fn vertex_ids(&self) -> Vec<VertexId> {
        self.waypoints.iter().map(|w| w.vertex).collect()
    }
}

/// Plans the traversal tour of a benchmark run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkeletonPathPlanner;

impl SkeletonPathPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Plan a tour from a start vertex chosen uniformly at random.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        graph: &SkeletonGraph,
        rng: &mut R,
    ) -> Result<Tour, PlanError> {
        let pruned = prune(graph)?;
        let start = pruned
            .vertices()
            .choose(rng)
            .map(|v| v.id)
            .ok_or(PlanError::InsufficientNodes { remaining: 0 })?;
        self.plan_pruned(&pruned, start, rng)
    }

    /// Plan a tour from a given start vertex.
    pub fn plan_from<R: Rng + ?Sized>(
        &self,
        graph: &SkeletonGraph,
        start: VertexId,
        rng: &mut R,
    ) -> Result<Tour, PlanError> {
        let pruned = prune(graph)?;
        self.plan_pruned(&pruned, start, rng)
    }

    fn plan_pruned<R: Rng + ?Sized>(
        &self,
        graph: &SkeletonGraph,
        start: VertexId,
        rng: &mut R,
    ) -> Result<Tour, PlanError> {
        let start_idx = graph.index_of(start).ok_or(PlanError::UnknownStart(start))?;
        let paths = ShortestPaths::compute(graph.adjacency());
        let order = greedy_order(&paths, start_idx, graph.component_indices(start_idx));

        let cost = order
            .windows(2)
            .map(|leg| paths.cost(leg[0], leg[1]))
            .sum::<f32>();

        let waypoints: Vec<Waypoint> = order
            .iter()
            .map(|&idx| {
                let vertex = graph.vertex_at(idx);
                Waypoint {
                    vertex: vertex.id,
                    pose: Pose2D::new(
                        vertex.position.x,
                        vertex.position.y,
                        rng.random_range(-PI..PI),
                    ),
                }
            })
            .collect();

        tracing::info!(
            "Planned tour of {} waypoints from vertex {} (skeleton length {:.2}m)",
            waypoints.len(),
            start,
            cost
        );

        Ok(Tour::new(waypoints, cost))
    }
}

fn prune(graph: &SkeletonGraph) -> Result<SkeletonGraph, PlanError> {
    let pruned = graph.pruned(MIN_COMPONENT_SIZE);
    if pruned.vertex_count() < MIN_COMPONENT_SIZE {
        return Err(PlanError::InsufficientNodes {
            remaining: pruned.vertex_count(),
        });
    }
    Ok(pruned)
}

/// Nearest-unvisited ordering of `component`, starting the search at `start`.
///
/// A vertex is never its own candidate, so `start` is not emitted first; it
/// is appended once it becomes the nearest unvisited vertex. Candidates are
/// scanned in ascending index order and only a strictly smaller cost
/// replaces the current best, so ties go to the lowest vertex id.
fn greedy_order(paths: &ShortestPaths, start: usize, component: BTreeSet<usize>) -> Vec<usize> {
    let mut unvisited = component;
    let mut order = Vec::with_capacity(unvisited.len());
    let mut current = start;

    while !unvisited.is_empty() {
        let mut best: Option<(usize, f32)> = None;
        for &candidate in &unvisited {
            if candidate == current {
                continue;
            }
            let cost = paths.cost(current, candidate);
            if best.is_none_or(|(_, best_cost)| cost < best_cost) {
                best = Some((candidate, cost));
            }
        }

        // Only the current vertex is left
        let next = best.map_or(current, |(idx, _)| idx);
        unvisited.remove(&next);
        order.push(next);
        current = next;
    }

    order
}
