//! Weighted skeleton graph of free space.
//!
//! Vertices sit on the medial axis of the map; edge weights are distances
//! along the skeleton, not straight-line distances. The graph is undirected
//! and may be split into several connected components.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Point2D;

/// Vertex identifier, unique within a run.
pub type VertexId = u32;

/// A skeleton vertex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    pub position: Point2D,
    /// Clearance to the nearest obstacle, when the source provides it.
    #[serde(default)]
    pub radius: Option<f32>,
}

impl Vertex {
    pub fn new(id: VertexId, x: f32, y: f32) -> Self {
        Self {
            id,
            position: Point2D::new(x, y),
            radius: None,
        }
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = Some(radius);
        self
    }
}

/// An undirected, weighted skeleton edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub a: VertexId,
    pub b: VertexId,
    pub weight: f32,
}

impl Edge {
    pub fn new(a: VertexId, b: VertexId, weight: f32) -> Self {
        Self { a, b, weight }
    }
}

/// Errors raised while building or loading a skeleton graph.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("duplicate vertex id {0}")]
    DuplicateVertex(VertexId),

    #[error("edge ({a}, {b}) references an unknown vertex")]
    UnknownVertex { a: VertexId, b: VertexId },

    #[error("self-loop on vertex {0}")]
    SelfLoop(VertexId),

    #[error("edge ({a}, {b}) has invalid weight {weight}")]
    InvalidWeight { a: VertexId, b: VertexId, weight: f32 },

    #[error("failed to read skeleton file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse skeleton file: {0}")]
    Parse(String),
}

/// Undirected weighted graph with a dense index over its vertices.
///
/// Vertices are stored sorted by id, so iterating indices in ascending
/// order visits vertex ids in ascending order.
#[derive(Debug, Clone, Default)]
pub struct SkeletonGraph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    index: HashMap<VertexId, usize>,
    adjacency: Vec<Vec<(usize, f32)>>,
}

impl SkeletonGraph {
    /// Build a graph, validating ids and weights.
    pub fn new(mut vertices: Vec<Vertex>, edges: Vec<Edge>) -> Result<Self, GraphError> {
        vertices.sort_by_key(|v| v.id);

        let mut index = HashMap::with_capacity(vertices.len());
        for (i, v) in vertices.iter().enumerate() {
            if index.insert(v.id, i).is_some() {
                return Err(GraphError::DuplicateVertex(v.id));
            }
        }

        let mut adjacency = vec![Vec::new(); vertices.len()];
        for edge in &edges {
            let (Some(&ia), Some(&ib)) = (index.get(&edge.a), index.get(&edge.b)) else {
                return Err(GraphError::UnknownVertex {
                    a: edge.a,
                    b: edge.b,
                });
            };
            if ia == ib {
                return Err(GraphError::SelfLoop(edge.a));
            }
            if !edge.weight.is_finite() || edge.weight < 0.0 {
                return Err(GraphError::InvalidWeight {
                    a: edge.a,
                    b: edge.b,
                    weight: edge.weight,
                });
            }
            adjacency[ia].push((ib, edge.weight));
            adjacency[ib].push((ia, edge.weight));
        }

        Ok(Self {
            vertices,
            edges,
            index,
            adjacency,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Vertices sorted by id.
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.index.get(&id).map(|&i| &self.vertices[i])
    }

    /// Dense index of a vertex id.
    pub fn index_of(&self, id: VertexId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Vertex stored at a dense index.
    pub fn vertex_at(&self, idx: usize) -> &Vertex {
        &self.vertices[idx]
    }

    /// Adjacency list over dense indices.
    pub fn adjacency(&self) -> &[Vec<(usize, f32)>] {
        &self.adjacency
    }

    /// Dense indices of the component containing `idx`, ascending.
    pub fn component_indices(&self, idx: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        if idx >= self.vertices.len() {
            return seen;
        }

        let mut queue = VecDeque::from([idx]);
        seen.insert(idx);
        while let Some(node) = queue.pop_front() {
            for &(neighbor, _) in &self.adjacency[node] {
                if seen.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        seen
    }

    /// Vertex ids of the component containing `id`, ascending.
    pub fn component_of(&self, id: VertexId) -> Vec<VertexId> {
        match self.index_of(id) {
            Some(idx) => self
                .component_indices(idx)
                .into_iter()
                .map(|i| self.vertices[i].id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// All connected components as ascending vertex id lists, ordered by
    /// their smallest id.
    pub fn connected_components(&self) -> Vec<Vec<VertexId>> {
        let mut assigned = vec![false; self.vertices.len()];
        let mut components = Vec::new();

        for start in 0..self.vertices.len() {
            if assigned[start] {
                continue;
            }
            let component = self.component_indices(start);
            for &i in &component {
                assigned[i] = true;
            }
            components.push(component.into_iter().map(|i| self.vertices[i].id).collect());
        }

        components
    }

    /// Copy of the graph without components smaller than `min_size`.
    pub fn pruned(&self, min_size: usize) -> SkeletonGraph {
        let keep: BTreeSet<VertexId> = self
            .connected_components()
            .into_iter()
            .filter(|c| c.len() >= min_size)
            .flatten()
            .collect();
        self.retain(|v| keep.contains(&v.id))
    }

    /// Copy of the graph without vertices whose clearance is known and
    /// below `minimum_radius`. Edges touching a dropped vertex go with it.
    pub fn with_minimum_clearance(&self, minimum_radius: f32) -> SkeletonGraph {
        self.retain(|v| v.radius.is_none_or(|r| r >= minimum_radius))
    }

    fn retain(&self, keep: impl Fn(&Vertex) -> bool) -> SkeletonGraph {
        let vertices: Vec<Vertex> = self.vertices.iter().filter(|v| keep(v)).copied().collect();
        let kept: BTreeSet<VertexId> = vertices.iter().map(|v| v.id).collect();
        let edges: Vec<Edge> = self
            .edges
            .iter()
            .filter(|e| kept.contains(&e.a) && kept.contains(&e.b))
            .copied()
            .collect();

        // Input was validated when self was built
        SkeletonGraph::new(vertices, edges).unwrap_or_default()
    }
}
