//! Buffered pose tables, written once as CSV when the run ends.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

pub const ESTIMATED_POSE_COLUMNS: &[&str] = &["t", "x", "y", "theta"];

pub const CORRECTION_POSE_COLUMNS: &[&str] = &[
    "t",
    "x",
    "y",
    "theta",
    "cov_x_x",
    "cov_x_y",
    "cov_y_y",
    "cov_theta_theta",
];

pub const GROUND_TRUTH_POSE_COLUMNS: &[&str] = &["t", "x", "y", "theta", "v_x", "v_y", "v_theta"];

/// Column-labelled table of numeric rows, append-only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoseTable {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl PoseTable {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn estimated_poses() -> Self {
        Self::new(ESTIMATED_POSE_COLUMNS)
    }

    pub fn correction_poses() -> Self {
        Self::new(CORRECTION_POSE_COLUMNS)
    }

    pub fn ground_truth_poses() -> Self {
        Self::new(GROUND_TRUTH_POSE_COLUMNS)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Append a row. Rows with the wrong width are dropped with a warning.
    pub fn push(&mut self, row: Vec<f64>) {
        if row.len() != self.columns.len() {
            tracing::warn!(
                "Dropping row with {} values for a {}-column table",
                row.len(),
                self.columns.len()
            );
            return;
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write header and rows, comma separated, replacing any existing file.
    pub fn write_csv(&self, path: &Path) -> io::Result<()> {
        let mut out = self.columns.join(",");
        out.push('\n');
        for row in &self.rows {
            for (i, value) in row.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Writing to a String cannot fail
                let _ = write!(out, "{}", value);
            }
            out.push('\n');
        }
        fs::write(path, out)
    }

    /// Read a table written by [`write_csv`](Self::write_csv).
    pub fn read_csv(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut lines = content.lines();

        let header = lines
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing header"))?;
        let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();

        let mut rows = Vec::new();
        for (line_no, line) in lines.enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            let row = line
                .split(',')
                .map(|v| v.trim().parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("row {}: {}", line_no + 1, e),
                    )
                })?;
            if row.len() != columns.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "row {} has {} values, expected {}",
                        line_no + 1,
                        row.len(),
                        columns.len()
                    ),
                ));
            }
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }
}
