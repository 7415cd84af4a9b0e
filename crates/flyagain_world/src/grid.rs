//! Uniform spatial grid.
//!
//! 50-unit square cells keyed by (cellX, cellZ). The 3x3 block around a
//! point is the canonical interest set: it decides who receives an
//! entity's updates and which players a monster can aggro.

use std::collections::{HashMap, HashSet};

pub const CELL_SIZE: f32 = 50.0;

/// 64-bit cell coordinates; positions millions of units out stay exact.
pub fn cell_coord(v: f32) -> i64 {
    (v / CELL_SIZE).floor() as i64
}

#[derive(Debug, Default)]
pub struct SpatialGrid {
    cells: HashMap<(i64, i64), HashSet<u64>>,
}

impl SpatialGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity_id: u64, x: f32, z: f32) {
        self.cells
            .entry((cell_coord(x), cell_coord(z)))
            .or_default()
            .insert(entity_id);
    }

    pub fn remove(&mut self, entity_id: u64, x: f32, z: f32) {
        let key = (cell_coord(x), cell_coord(z));
        if let Some(cell) = self.cells.get_mut(&key) {
            cell.remove(&entity_id);
            if cell.is_empty() {
                self.cells.remove(&key);
            }
        }
    }

    /// No-op while the entity stays inside its cell.
    pub fn update(&mut self, entity_id: u64, old_x: f32, old_z: f32, new_x: f32, new_z: f32) {
        let old_key = (cell_coord(old_x), cell_coord(old_z));
        let new_key = (cell_coord(new_x), cell_coord(new_z));
        if old_key == new_key {
            return;
        }
        if let Some(cell) = self.cells.get_mut(&old_key) {
            cell.remove(&entity_id);
            if cell.is_empty() {
                self.cells.remove(&old_key);
            }
        }
        self.cells.entry(new_key).or_default().insert(entity_id);
    }

    /// Union of entity ids in the 3x3 block centered on (x, z).
    pub fn nearby(&self, x: f32, z: f32) -> Vec<u64> {
        let cx = cell_coord(x);
        let cz = cell_coord(z);
        let mut result = Vec::new();
        for dx in -1..=1 {
            for dz in -1..=1 {
                if let Some(cell) = self.cells.get(&(cx + dx, cz + dz)) {
                    result.extend(cell.iter().copied());
                }
            }
        }
        result
    }

    /// Whether (x, z) falls inside the 3x3 block around (cx, cz).
    pub fn in_neighborhood(center_x: f32, center_z: f32, x: f32, z: f32) -> bool {
        (cell_coord(x) - cell_coord(center_x)).abs() <= 1
            && (cell_coord(z) - cell_coord(center_z)).abs() <= 1
    }

    #[cfg(test)]
    fn occupied_cells(&self) -> usize {
        self.cells.len()
    }
}
