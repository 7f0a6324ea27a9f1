//! Tour planning over the skeleton graph.
//!
//! - [`graph`]: weighted skeleton graph, components and pruning
//! - [`dijkstra`]: shortest-path costs along the skeleton
//! - [`tour`]: greedy nearest-unvisited tour
//! - [`source`]: skeleton providers

pub mod dijkstra;
pub mod graph;
pub mod source;
pub mod tour;

pub use dijkstra::{ShortestPaths, all_pairs_costs, dijkstra, dijkstra_distances};
pub use graph::{Edge, GraphError, SkeletonGraph, Vertex, VertexId};
pub use source::{FileSkeletonSource, SkeletonSource};
pub use tour::{MIN_COMPONENT_SIZE, PlanError, SkeletonPathPlanner, Tour, Waypoint};
