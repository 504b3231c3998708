//! Proximity grid for neighbour queries in crowd simulation
//!
//! Agents are binned into a spatial hash over the XZ plane. Each agent inserts
//! its bounding rectangle into every cell it overlaps, so a range query only has
//! to look at the cells covered by the query rectangle instead of every agent.
//! Items come from a fixed pool sized at creation, nothing is allocated per tick.

use nav_common::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct Item {
    id: usize,
    x: i32,
    y: i32,
    next: Option<usize>,
}

/// Spatial hash of agent rectangles
#[derive(Debug, Clone)]
pub struct ProximityGrid {
    cell_size: f32,
    inv_cell_size: f32,
    pool: Vec<Item>,
    pool_size: usize,
    buckets: Vec<Option<usize>>,
    bounds: [i32; 4],
}

impl ProximityGrid {
    /// Creates a grid holding at most `pool_size` cell entries
    pub fn new(pool_size: usize, cell_size: f32) -> Result<Self> {
        if pool_size == 0 {
            return Err(Error::InvalidParam(
                "proximity grid pool size must be positive".into(),
            ));
        }
        if cell_size.is_nan() || cell_size <= 0.0 {
            return Err(Error::InvalidParam(format!(
                "proximity grid cell size must be positive, got {cell_size}"
            )));
        }

        let bucket_count = pool_size.next_power_of_two();
        let mut grid = Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            pool: Vec::with_capacity(pool_size),
            pool_size,
            buckets: vec![None; bucket_count],
            bounds: [0; 4],
        };
        grid.clear();
        Ok(grid)
    }

    /// Removes every item
    pub fn clear(&mut self) {
        self.buckets.fill(None);
        self.pool.clear();
        self.bounds = [i32::MAX, i32::MAX, i32::MIN, i32::MIN];
    }

    /// Inserts `id` into every cell overlapped by the rectangle.
    ///
    /// Cells past the pool capacity are silently dropped.
    pub fn add_item(&mut self, id: usize, min_x: f32, min_z: f32, max_x: f32, max_z: f32) {
        let iminx = (min_x * self.inv_cell_size).floor() as i32;
        let iminy = (min_z * self.inv_cell_size).floor() as i32;
        let imaxx = (max_x * self.inv_cell_size).floor() as i32;
        let imaxy = (max_z * self.inv_cell_size).floor() as i32;

        self.bounds[0] = self.bounds[0].min(iminx);
        self.bounds[1] = self.bounds[1].min(iminy);
        self.bounds[2] = self.bounds[2].max(imaxx);
        self.bounds[3] = self.bounds[3].max(imaxy);

        for y in iminy..=imaxy {
            for x in iminx..=imaxx {
                if self.pool.len() >= self.pool_size {
                    return;
                }
                let h = hash_pos2(x, y, self.buckets.len());
                let idx = self.pool.len();
                self.pool.push(Item {
                    id,
                    x,
                    y,
                    next: self.buckets[h],
                });
                self.buckets[h] = Some(idx);
            }
        }
    }

    /// Collects distinct ids whose rectangles overlap the query rectangle.
    ///
    /// At most `ids.len()` ids are written. Returns the number found.
    pub fn query_items(
        &self,
        min_x: f32,
        min_z: f32,
        max_x: f32,
        max_z: f32,
        ids: &mut [usize],
    ) -> usize {
        let iminx = (min_x * self.inv_cell_size).floor() as i32;
        let iminy = (min_z * self.inv_cell_size).floor() as i32;
        let imaxx = (max_x * self.inv_cell_size).floor() as i32;
        let imaxy = (max_z * self.inv_cell_size).floor() as i32;

        let max_ids = ids.len();
        let mut n = 0;

        for y in iminy..=imaxy {
            for x in iminx..=imaxx {
                let h = hash_pos2(x, y, self.buckets.len());
                let mut cur = self.buckets[h];
                while let Some(idx) = cur {
                    let item = &self.pool[idx];
                    if item.x == x && item.y == y && !ids[..n].contains(&item.id) {
                        if n >= max_ids {
                            return n;
                        }
                        ids[n] = item.id;
                        n += 1;
                    }
                    cur = item.next;
                }
            }
        }

        n
    }

    /// Number of items stored in the cell containing the world position `(x, z)`
    pub fn item_count_at(&self, x: f32, z: f32) -> usize {
        let ix = (x * self.inv_cell_size).floor() as i32;
        let iy = (z * self.inv_cell_size).floor() as i32;
        let h = hash_pos2(ix, iy, self.buckets.len());

        let mut n = 0;
        let mut cur = self.buckets[h];
        while let Some(idx) = cur {
            let item = &self.pool[idx];
            if item.x == ix && item.y == iy {
                n += 1;
            }
            cur = item.next;
        }
        n
    }

    /// Occupied cell range as `[min_x, min_y, max_x, max_y]`, `None` when empty
    pub fn bounds(&self) -> Option<[i32; 4]> {
        (!self.pool.is_empty()).then_some(self.bounds)
    }

    pub fn get_cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of cell entries in use
    pub fn get_item_count(&self) -> usize {
        self.pool.len()
    }
}

fn hash_pos2(x: i32, y: i32, n: usize) -> usize {
    let h = x.wrapping_mul(73856093) ^ y.wrapping_mul(19349663);
    (h as u32 as usize) & (n - 1)
}
