//! Fixed-shape heat-map matrices
//!
//! Cells hold `Option<f64>`: `None` means "no data" and is kept distinct from
//! a real `0.0`. The shape is set at construction and never changes.

use crate::stats::STATS_AVG_WITH_QUANTILES;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Matrix {
    row_labels: Vec<String>,
    column_labels: Vec<String>,
    cells: Vec<Option<f64>>,
}

impl Matrix {
    /// Create a matrix with every cell set to "no data"
    pub fn new(row_labels: Vec<String>, column_labels: Vec<String>) -> Self {
        let cells = vec![None; row_labels.len() * column_labels.len()];
        Self {
            row_labels,
            column_labels,
            cells,
        }
    }

    /// One row per recognized statistic, one column per interval
    pub fn for_stats(intervals: &[String]) -> Self {
        Self::new(
            STATS_AVG_WITH_QUANTILES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            intervals.to_vec(),
        )
    }

    pub fn rows(&self) -> usize {
        self.row_labels.len()
    }

    pub fn columns(&self) -> usize {
        self.column_labels.len()
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn column_labels(&self) -> &[String] {
        &self.column_labels
    }

    fn index(&self, row: usize, column: usize) -> Option<usize> {
        (row < self.rows() && column < self.columns()).then(|| row * self.columns() + column)
    }

    /// Cell value; `None` for "no data" and for out-of-range positions
    pub fn get(&self, row: usize, column: usize) -> Option<f64> {
        self.index(row, column).and_then(|i| self.cells[i])
    }

    /// Write a cell. Non-finite values are stored as "no data".
    pub fn set(&mut self, row: usize, column: usize, value: Option<f64>) {
        match self.index(row, column) {
            Some(i) => self.cells[i] = value.filter(|v| v.is_finite()),
            None => warn!(
                row,
                column,
                rows = self.rows(),
                columns = self.columns(),
                "Matrix write out of range ignored"
            ),
        }
    }

    pub fn row(&self, row: usize) -> Option<&[Option<f64>]> {
        if row >= self.rows() {
            return None;
        }
        let start = row * self.columns();
        Some(&self.cells[start..start + self.columns()])
    }

    /// Whether at least one cell holds a value
    pub fn has_data(&self) -> bool {
        self.cells.iter().any(Option::is_some)
    }

    pub fn to_rows(&self) -> Vec<Vec<Option<f64>>> {
        (0..self.rows())
            .filter_map(|r| self.row(r).map(<[_]>::to_vec))
            .collect()
    }
}
