//! Shared cache of boundary queries
//!
//! Agents standing close to each other usually see the same walls. Instead of
//! running a neighbourhood query for each of them, the crowd asks
//! [`DtSharedBoundary`] which reuses a recent result when its center, radius and
//! polygon set still match. Entries are evicted lazily by a periodic sweep driven
//! by [`DtSharedBoundary::tick`].

use detour::{NavMeshQuery, PolyRef, QueryFilter, WallSegment};
use nav_common::{dist_sqr_2d, sqr, Vec3};

/// Maximum number of polygons gathered for one entry
pub const SHARED_BOUNDARY_MAX_POLYS: usize = 64;
/// Maximum number of wall segments gathered for one entry
pub const SHARED_BOUNDARY_MAX_WALLS: usize = 64;

/// Seconds between eviction sweeps
const CLEAR_INTERVAL: f32 = 2.0;
/// Entries not accessed for this long are evicted by the next sweep
const ENTRY_LIFETIME: f32 = 2.0;
/// Maximum radius difference for an entry to be reused
const RADIUS_THRESHOLD: f32 = 0.5;
/// Walls are gathered this much farther than the requested radius
const QUERY_RADIUS_SCALE: f32 = 1.5;

/// Namespace of a cache entry.
///
/// Entries built with a crowd filter and entries built for a single walkable area
/// see different walls and are never shared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedBoundaryKey {
    /// Built with the crowd query filter at this index
    Filter(u8),
    /// Built with a filter restricted to this area id
    SingleArea(u8),
}

/// Cached neighbourhood of one locale
#[derive(Debug, Clone)]
pub struct SharedBoundaryData {
    pub center: Vec3,
    pub radius: f32,
    pub access_time: f32,
    pub key: SharedBoundaryKey,
    pub polys: Vec<PolyRef>,
    pub walls: Vec<WallSegment>,
    stale: bool,
}

impl SharedBoundaryData {
    /// True once a newer entry replaced this one; it waits for the next sweep
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

/// Time evicted cache of wall queries shared by all crowd agents
#[derive(Debug, Clone, Default)]
pub struct DtSharedBoundary {
    entries: Vec<Option<SharedBoundaryData>>,
    current_time: f32,
    next_clear_time: f32,
}

impl DtSharedBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry and resets the clock
    pub fn initialize(&mut self) {
        self.entries.clear();
        self.current_time = 0.0;
        self.next_clear_time = 0.0;
    }

    /// Advances the clock and evicts unused entries once per sweep interval
    pub fn tick(&mut self, dt: f32) {
        self.current_time += dt;
        if self.current_time <= self.next_clear_time {
            return;
        }
        self.next_clear_time = self.current_time + CLEAR_INTERVAL;

        let now = self.current_time;
        let mut evicted = 0;
        for slot in &mut self.entries {
            let expired = slot
                .as_ref()
                .is_some_and(|e| e.stale || now - e.access_time >= ENTRY_LIFETIME);
            if expired {
                *slot = None;
                evicted += 1;
            }
        }
        if evicted > 0 {
            log::trace!("shared boundary evicted {evicted} entries");
        }
    }

    /// Returns the index of an entry describing the walls around `center`.
    ///
    /// A matching entry whose polygons are all still valid is reused, otherwise a
    /// new one is queried from `navquery`. Returns `None` when `poly_ref` is not
    /// valid under `filter` or the query fails.
    #[allow(clippy::too_many_arguments)]
    pub fn cache_data<Q: NavMeshQuery + ?Sized>(
        &mut self,
        center: Vec3,
        radius: f32,
        poly_ref: PolyRef,
        navquery: &Q,
        filter: &QueryFilter,
        key: SharedBoundaryKey,
    ) -> Option<usize> {
        if !navquery.is_valid_poly_ref(poly_ref, filter) {
            return None;
        }

        if let Some(idx) = self.find_data(center, radius, poly_ref, key) {
            let valid = self.entries[idx]
                .as_ref()
                .is_some_and(|e| e.polys.iter().all(|&p| navquery.is_valid_poly_ref(p, filter)));
            if let Some(entry) = self.entries[idx].as_mut() {
                if valid {
                    entry.access_time = self.current_time;
                    return Some(idx);
                }
                entry.stale = true;
            }
        }

        let neighbourhood = match navquery.find_walls_in_neighbourhood(
            poly_ref,
            center,
            radius * QUERY_RADIUS_SCALE,
            filter,
            SHARED_BOUNDARY_MAX_POLYS,
            SHARED_BOUNDARY_MAX_WALLS,
        ) {
            Ok(n) => n,
            Err(err) => {
                log::debug!("shared boundary query around {poly_ref} failed: {err}");
                return None;
            }
        };

        let data = SharedBoundaryData {
            center,
            radius,
            access_time: self.current_time,
            key,
            polys: neighbourhood.polys,
            walls: neighbourhood.walls,
            stale: false,
        };
        match self.entries.iter().position(Option::is_none) {
            Some(idx) => {
                self.entries[idx] = Some(data);
                Some(idx)
            }
            None => {
                self.entries.push(Some(data));
                Some(self.entries.len() - 1)
            }
        }
    }

    fn find_data(
        &self,
        center: Vec3,
        radius: f32,
        poly_ref: PolyRef,
        key: SharedBoundaryKey,
    ) -> Option<usize> {
        let max_dist_sqr = sqr(radius * 0.5);
        self.entries.iter().position(|slot| {
            slot.as_ref().is_some_and(|e| {
                !e.stale
                    && e.key == key
                    && dist_sqr_2d(e.center, center) <= max_dist_sqr
                    && (e.radius - radius).abs() < RADIUS_THRESHOLD
                    && e.polys.contains(&poly_ref)
            })
        })
    }

    pub fn get_data(&self, idx: usize) -> Option<&SharedBoundaryData> {
        self.entries.get(idx).and_then(Option::as_ref)
    }

    /// Number of live entries, stale ones included
    pub fn get_entry_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn get_current_time(&self) -> f32 {
        self.current_time
    }
}
