//! Detour navigation queries
//!
//! This crate holds the navigation-mesh side of the crowd simulation:
//!
//! - [`NavMeshQuery`]: the query interface consumed by path following and crowd code
//! - [`PathQueue`]: an asynchronous, budgeted path request service
//! - [`SimpleNavMesh`]: a compact convex polygon mesh implementing [`NavMeshQuery`]
//!
//! Polygons are addressed through salted [`PolyRef`] handles so that references held
//! by agents become invalid when the underlying polygon is removed or rebuilt.

mod nav_mesh_query;
mod path_queue;
mod simple_nav_mesh;
mod status;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mesh_helpers;

pub use nav_mesh_query::*;
pub use path_queue::*;
pub use simple_nav_mesh::*;
pub use status::*;

use bitflags::bitflags;

/// Maximum number of vertices per navigation polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Maximum number of area types
pub const MAX_AREAS: usize = 64;

/// Area id used by default for walkable ground
pub const DEFAULT_AREA: u8 = 0;

/// Reference to a polygon in a navigation mesh. Zero is the null reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyRef(u32);

impl PolyRef {
    /// The null polygon reference
    pub const NULL: PolyRef = PolyRef(0);

    /// Creates a reference from its raw id
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw id of the reference
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// Returns true unless this is the null reference.
    ///
    /// This does not check the reference against any mesh.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

bitflags! {
    /// Polygon ability flags used by query filters
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(
        feature = "serialization",
        derive(serde::Serialize, serde::Deserialize)
    )]
    pub struct PolyFlags: u16 {
        /// Ground that can be walked on
        const WALK = 0x01;
        /// Water that can be swum through
        const SWIM = 0x02;
        /// Doors that can be passed
        const DOOR = 0x04;
        /// Jumps and other off-mesh traversals
        const JUMP = 0x08;
        /// Disabled polygons
        const DISABLED = 0x10;
    }
}

bitflags! {
    /// Flags attached to the points of a straight path
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(
        feature = "serialization",
        derive(serde::Serialize, serde::Deserialize)
    )]
    pub struct StraightPathFlags: u8 {
        /// The point is the start of the path
        const START = 0x01;
        /// The point is the end of the path
        const END = 0x02;
        /// The point is the start of an off-mesh connection
        const OFFMESH_CONNECTION = 0x04;
    }
}

/// Decides which polygons may be traversed and what they cost.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct QueryFilter {
    /// Polygons must have at least one of these flags
    pub include_flags: PolyFlags,
    /// Polygons must have none of these flags
    pub exclude_flags: PolyFlags,
    /// Traversal cost multiplier per area. Non finite costs exclude the area.
    area_cost: Vec<f32>,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryFilter {
    /// Creates a filter passing every polygon except disabled ones
    pub fn new() -> Self {
        Self {
            include_flags: PolyFlags::all() - PolyFlags::DISABLED,
            exclude_flags: PolyFlags::DISABLED,
            area_cost: vec![1.0; MAX_AREAS],
        }
    }

    /// Returns true if a polygon with the given flags and area passes the filter
    pub fn pass_filter(&self, flags: PolyFlags, area: u8) -> bool {
        flags.intersects(self.include_flags)
            && !flags.intersects(self.exclude_flags)
            && self.area_cost(area).is_finite()
    }

    /// Cost multiplier of an area
    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost
            .get(area as usize)
            .copied()
            .unwrap_or(f32::INFINITY)
    }

    /// Sets the cost multiplier of an area
    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        if let Some(c) = self.area_cost.get_mut(area as usize) {
            *c = cost;
        }
    }

    /// Returns a copy of this filter that only passes polygons of `area`
    pub fn restricted_to_area(&self, area: u8) -> Self {
        let mut filter = self.clone();
        for (i, cost) in filter.area_cost.iter_mut().enumerate() {
            if i != area as usize {
                *cost = f32::INFINITY;
            }
        }
        filter
    }
}
