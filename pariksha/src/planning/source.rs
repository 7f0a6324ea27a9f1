//! Skeleton graph providers.
//!
//! The skeleton is computed elsewhere (from the ground-truth map) and handed
//! to the planner already weighted by path distance along the skeleton.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::graph::{Edge, GraphError, SkeletonGraph, Vertex};

/// Supplies the skeleton graph of the benchmark map.
pub trait SkeletonSource {
    /// Skeleton restricted to vertices with at least `minimum_radius`
    /// clearance to the nearest obstacle.
    fn skeleton_graph(&self, minimum_radius: f32) -> Result<SkeletonGraph, GraphError>;
}

impl SkeletonSource for SkeletonGraph {
    fn skeleton_graph(&self, minimum_radius: f32) -> Result<SkeletonGraph, GraphError> {
        Ok(self.with_minimum_clearance(minimum_radius))
    }
}

#[derive(Debug, Deserialize)]
struct SkeletonFile {
    vertices: Vec<VertexRecord>,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
struct VertexRecord {
    id: u32,
    x: f32,
    y: f32,
    #[serde(default)]
    radius: Option<f32>,
}

/// Loads a skeleton from a JSON file:
///
/// ```json
/// {
///   "vertices": [{ "id": 0, "x": 1.0, "y": 2.0, "radius": 0.4 }],
///   "edges": [{ "a": 0, "b": 1, "weight": 1.3 }]
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileSkeletonSource {
    path: PathBuf,
}

impl FileSkeletonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse a skeleton document without clearance filtering.
    pub fn parse(content: &str) -> Result<SkeletonGraph, GraphError> {
        let file: SkeletonFile =
            serde_json::from_str(content).map_err(|e| GraphError::Parse(e.to_string()))?;

        let vertices = file
            .vertices
            .into_iter()
            .map(|v| Vertex {
                radius: v.radius,
                ..Vertex::new(v.id, v.x, v.y)
            })
            .collect();

        SkeletonGraph::new(vertices, file.edges)
    }
}

impl SkeletonSource for FileSkeletonSource {
    fn skeleton_graph(&self, minimum_radius: f32) -> Result<SkeletonGraph, GraphError> {
        let content = std::fs::read_to_string(&self.path)?;
        let graph = Self::parse(&content)?;
        let filtered = graph.with_minimum_clearance(minimum_radius);

        tracing::debug!(
            "Loaded skeleton {:?}: {} vertices ({} kept), {} edges",
            self.path,
            graph.vertex_count(),
            filtered.vertex_count(),
            filtered.edge_count()
        );

        Ok(filtered)
    }
}
