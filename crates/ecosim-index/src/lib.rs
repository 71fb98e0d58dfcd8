//! Spatial indexing for entity neighborhood queries.
//!
//! The grid keeps entity keys bucketed by uniform cells and is updated
//! incrementally as entities are added, removed, or relocated. Callers are
//! responsible for exact distance filtering; `visit_circle` only narrows the
//! candidate set to the cells covered by the query circle.

use thiserror::Error;

/// Errors emitted by spatial index construction.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Uniform grid over a bounded rectangle, bucketing keys by position.
#[derive(Debug, Clone)]
pub struct SpatialGrid<K> {
    cell_size: f32,
    cols: usize,
    rows: usize,
    cells: Vec<Vec<K>>,
}

impl<K: Copy + PartialEq> SpatialGrid<K> {
    /// Create a grid covering `width x height` with square cells of `cell_size`.
    pub fn new(width: f32, height: f32, cell_size: f32) -> Result<Self, IndexError> {
        if !(cell_size > 0.0) {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        if !(width > 0.0) || !(height > 0.0) {
            return Err(IndexError::InvalidConfig("grid extents must be positive"));
        }
        let cols = (width / cell_size).ceil().max(1.0) as usize;
        let rows = (height / cell_size).ceil().max(1.0) as usize;
        Ok(Self {
            cell_size,
            cols,
            rows,
            cells: vec![Vec::new(); cols * rows],
        })
    }

    /// Edge length of one bucket.
    #[must_use]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    fn cell_coords(&self, x: f32, y: f32) -> (usize, usize) {
        let cx = ((x / self.cell_size).floor().max(0.0) as usize).min(self.cols - 1);
        let cy = ((y / self.cell_size).floor().max(0.0) as usize).min(self.rows - 1);
        (cx, cy)
    }

    fn cell_index(&self, x: f32, y: f32) -> usize {
        let (cx, cy) = self.cell_coords(x, y);
        cy * self.cols + cx
    }

    /// Register a key at the given position.
    pub fn insert(&mut self, key: K, x: f32, y: f32) {
        let idx = self.cell_index(x, y);
        self.cells[idx].push(key);
    }

    /// Remove a key, looking it up in the bucket its position maps to.
    /// Returns whether the key was present.
    pub fn remove(&mut self, key: K, x: f32, y: f32) -> bool {
        let idx = self.cell_index(x, y);
        let bucket = &mut self.cells[idx];
        if let Some(pos) = bucket.iter().position(|k| *k == key) {
            bucket.swap_remove(pos);
            return true;
        }
        false
    }

    /// Move a key from its old position's bucket to the new one.
    pub fn relocate(&mut self, key: K, old_x: f32, old_y: f32, new_x: f32, new_y: f32) {
        let old_idx = self.cell_index(old_x, old_y);
        let new_idx = self.cell_index(new_x, new_y);
        if old_idx == new_idx {
            return;
        }
        let bucket = &mut self.cells[old_idx];
        if let Some(pos) = bucket.iter().position(|k| *k == key) {
            bucket.swap_remove(pos);
        }
        self.cells[new_idx].push(key);
    }

    /// Visit every key bucketed in a cell overlapping the query circle.
    ///
    /// Candidates outside the circle are included when their cell clips it;
    /// callers apply the exact distance check.
    pub fn visit_circle(&self, x: f32, y: f32, radius: f32, visitor: &mut dyn FnMut(K)) {
        let radius = radius.max(0.0);
        let (cx0, cy0) = self.cell_coords(x - radius, y - radius);
        let (cx1, cy1) = self.cell_coords(x + radius, y + radius);
        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                for key in &self.cells[cy * self.cols + cx] {
                    visitor(*key);
                }
            }
        }
    }

    /// Total number of keys currently bucketed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_circle(grid: &SpatialGrid<u32>, x: f32, y: f32, r: f32) -> Vec<u32> {
        let mut found = Vec::new();
        grid.visit_circle(x, y, r, &mut |k| found.push(k));
        found.sort_unstable();
        found
    }

    #[test]
    fn rejects_non_positive_cell_size() {
        assert!(SpatialGrid::<u32>::new(100.0, 100.0, 0.0).is_err());
        assert!(SpatialGrid::<u32>::new(100.0, 100.0, -5.0).is_err());
        assert!(SpatialGrid::<u32>::new(0.0, 100.0, 10.0).is_err());
    }

    #[test]
    fn insert_and_query_candidates() {
        let mut grid = SpatialGrid::new(100.0, 100.0, 10.0).expect("grid");
        grid.insert(1, 5.0, 5.0);
        grid.insert(2, 55.0, 55.0);
        grid.insert(3, 95.0, 95.0);

        let near_origin = collect_circle(&grid, 5.0, 5.0, 8.0);
        assert!(near_origin.contains(&1));
        assert!(!near_origin.contains(&3));

        // A circle covering the whole map sees everything.
        assert_eq!(collect_circle(&grid, 50.0, 50.0, 100.0), vec![1, 2, 3]);
    }

    #[test]
    fn remove_clears_key() {
        let mut grid = SpatialGrid::new(100.0, 100.0, 10.0).expect("grid");
        grid.insert(7, 30.0, 30.0);
        assert!(grid.remove(7, 30.0, 30.0));
        assert!(!grid.remove(7, 30.0, 30.0));
        assert!(grid.is_empty());
    }

    #[test]
    fn relocate_moves_between_buckets() {
        let mut grid = SpatialGrid::new(100.0, 100.0, 10.0).expect("grid");
        grid.insert(9, 5.0, 5.0);
        grid.relocate(9, 5.0, 5.0, 85.0, 85.0);

        assert!(collect_circle(&grid, 5.0, 5.0, 4.0).is_empty());
        assert_eq!(collect_circle(&grid, 85.0, 85.0, 4.0), vec![9]);
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn out_of_bounds_positions_clamp_to_edge_cells() {
        let mut grid = SpatialGrid::new(100.0, 100.0, 10.0).expect("grid");
        grid.insert(4, -20.0, 500.0);
        assert_eq!(grid.len(), 1);
        assert_eq!(collect_circle(&grid, 0.0, 99.0, 15.0), vec![4]);
    }
}
