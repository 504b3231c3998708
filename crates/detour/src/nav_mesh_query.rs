//! Navigation mesh query interface
//!
//! [`NavMeshQuery`] is the seam between path following code and the navigation mesh.
//! Crowd simulation, path corridors and the path queue only talk to the mesh through it,
//! so any mesh representation can be plugged in by implementing the trait.

use crate::{PolyRef, QueryFilter, StraightPathFlags};
use nav_common::{dist_point_segment_sqr_2d, sqr, Result, Vec3};

/// A point of a straight path
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StraightPathPoint {
    /// Position of the point
    pub pos: Vec3,
    /// Point flags
    pub flags: StraightPathFlags,
    /// Polygon entered at this point (off-mesh connection for link starts, null at the end)
    pub poly: PolyRef,
}

/// Result of walking a ray along the navigation mesh surface
#[derive(Debug, Clone, PartialEq)]
pub struct RaycastHit {
    /// Hit parameter along the ray, `f32::MAX` when the end point was reached
    pub t: f32,
    /// Normal of the wall that was hit
    pub hit_normal: Vec3,
    /// Polygons visited by the ray, starting with the start polygon
    pub path: Vec<PolyRef>,
}

impl RaycastHit {
    /// Returns true if the ray reached its end point without hitting a wall
    pub fn reached_end(&self) -> bool {
        self.t == f32::MAX
    }
}

/// Result of a path search
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathResult {
    /// Polygons from the start polygon towards the end polygon
    pub path: Vec<PolyRef>,
    /// True if the path does not end at the requested end polygon
    pub partial: bool,
    /// Number of search iterations consumed
    pub iterations: usize,
}

/// Result of moving along the navigation mesh surface
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMove {
    /// Resulting position, height is not adjusted
    pub pos: Vec3,
    /// Visited polygons from the start polygon to the polygon containing `pos`
    pub visited: Vec<PolyRef>,
}

/// A wall segment found around a location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallSegment {
    /// Segment start
    pub start: Vec3,
    /// Segment end
    pub end: Vec3,
    /// Polygon the wall belongs to
    pub poly: PolyRef,
    /// Polygon on the other side, null for solid walls
    pub neighbour: PolyRef,
}

/// Polygons and walls around a location
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Neighbourhood {
    /// Polygons reachable within the search radius
    pub polys: Vec<PolyRef>,
    /// Walls of those polygons that touch the search radius
    pub walls: Vec<WallSegment>,
}

/// Queries a navigation mesh.
///
/// All positions are in world space with Y up. Filters decide which polygons are
/// traversable. Failures are reported through [`nav_common::Error`].
pub trait NavMeshQuery {
    /// Returns true if `poly_ref` points to a live polygon passing `filter`
    fn is_valid_poly_ref(&self, poly_ref: PolyRef, filter: &QueryFilter) -> bool;

    /// Area id of a polygon
    fn poly_area(&self, poly_ref: PolyRef) -> Option<u8>;

    /// Finds the polygon nearest to `center` within the box `center ± half_extents`.
    ///
    /// Returns the polygon and the closest point on it.
    fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Option<(PolyRef, Vec3)>;

    /// Closest point on a polygon, including its height
    fn closest_point_on_poly(&self, poly_ref: PolyRef, pos: Vec3) -> Result<Vec3>;

    /// Height of a polygon at `pos`, `None` if `pos` is outside the polygon
    fn poly_height(&self, poly_ref: PolyRef, pos: Vec3) -> Option<f32>;

    /// Moves from `start` towards `end` constrained to the mesh surface.
    ///
    /// At most `max_visited` polygons are explored.
    fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start: Vec3,
        end: Vec3,
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<SurfaceMove>;

    /// Finds the straight path from `start` to `end` through the polygon corridor `path`
    fn find_straight_path(
        &self,
        start: Vec3,
        end: Vec3,
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>>;

    /// Casts a ray along the surface from `start` towards `end`
    fn raycast(
        &self,
        start_ref: PolyRef,
        start: Vec3,
        end: Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<RaycastHit>;

    /// Searches a path using at most `max_iters` node expansions.
    ///
    /// When the budget runs out the best partial path found so far is returned.
    #[allow(clippy::too_many_arguments)]
    fn find_path_bounded(
        &self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start: Vec3,
        end: Vec3,
        filter: &QueryFilter,
        max_iters: usize,
        max_path: usize,
    ) -> Result<PathResult>;

    /// Searches a complete path
    fn find_path(
        &self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start: Vec3,
        end: Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<PathResult> {
        self.find_path_bounded(
            start_ref,
            end_ref,
            start,
            end,
            filter,
            usize::MAX,
            max_path,
        )
    }

    /// Finds the polygons connected to `start_ref` within `radius` of `center`
    fn find_local_neighbourhood(
        &self,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &QueryFilter,
        max_result: usize,
    ) -> Result<Vec<PolyRef>>;

    /// Edges of a polygon that cannot be crossed under `filter`
    fn poly_wall_segments(
        &self,
        poly_ref: PolyRef,
        filter: &QueryFilter,
        max_segments: usize,
    ) -> Result<Vec<WallSegment>>;

    /// Finds the polygons around `start_ref` and the walls touching the search circle
    #[allow(clippy::too_many_arguments)]
    fn find_walls_in_neighbourhood(
        &self,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &QueryFilter,
        max_polys: usize,
        max_walls: usize,
    ) -> Result<Neighbourhood> {
        let polys = self.find_local_neighbourhood(start_ref, center, radius, filter, max_polys)?;
        let mut walls = Vec::new();
        'polys: for &poly in &polys {
            for wall in self.poly_wall_segments(poly, filter, max_walls)? {
                let (dist_sqr, _) = dist_point_segment_sqr_2d(center, wall.start, wall.end);
                if dist_sqr > sqr(radius) {
                    continue;
                }
                if walls.len() >= max_walls {
                    break 'polys;
                }
                walls.push(wall);
            }
        }
        Ok(Neighbourhood { polys, walls })
    }

    /// Start and end point of an off-mesh connection when entered from `prev_ref`
    fn off_mesh_connection_end_points(
        &self,
        prev_ref: PolyRef,
        con_ref: PolyRef,
    ) -> Result<(Vec3, Vec3)>;
}

impl<T: NavMeshQuery + ?Sized> NavMeshQuery for &T {
    fn is_valid_poly_ref(&self, poly_ref: PolyRef, filter: &QueryFilter) -> bool {
        (**self).is_valid_poly_ref(poly_ref, filter)
    }

    fn poly_area(&self, poly_ref: PolyRef) -> Option<u8> {
        (**self).poly_area(poly_ref)
    }

    fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Option<(PolyRef, Vec3)> {
        (**self).find_nearest_poly(center, half_extents, filter)
    }

    fn closest_point_on_poly(&self, poly_ref: PolyRef, pos: Vec3) -> Result<Vec3> {
        (**self).closest_point_on_poly(poly_ref, pos)
    }

    fn poly_height(&self, poly_ref: PolyRef, pos: Vec3) -> Option<f32> {
        (**self).poly_height(poly_ref, pos)
    }

    fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start: Vec3,
        end: Vec3,
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<SurfaceMove> {
        (**self).move_along_surface(start_ref, start, end, filter, max_visited)
    }

    fn find_straight_path(
        &self,
        start: Vec3,
        end: Vec3,
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>> {
        (**self).find_straight_path(start, end, path, max_points)
    }

    fn raycast(
        &self,
        start_ref: PolyRef,
        start: Vec3,
        end: Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<RaycastHit> {
        (**self).raycast(start_ref, start, end, filter, max_path)
    }

    fn find_path_bounded(
        &self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start: Vec3,
        end: Vec3,
        filter: &QueryFilter,
        max_iters: usize,
        max_path: usize,
    ) -> Result<PathResult> {
        (**self).find_path_bounded(start_ref, end_ref, start, end, filter, max_iters, max_path)
    }

    fn find_local_neighbourhood(
        &self,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &QueryFilter,
        max_result: usize,
    ) -> Result<Vec<PolyRef>> {
        (**self).find_local_neighbourhood(start_ref, center, radius, filter, max_result)
    }

    fn poly_wall_segments(
        &self,
        poly_ref: PolyRef,
        filter: &QueryFilter,
        max_segments: usize,
    ) -> Result<Vec<WallSegment>> {
        (**self).poly_wall_segments(poly_ref, filter, max_segments)
    }

    fn find_walls_in_neighbourhood(
        &self,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &QueryFilter,
        max_polys: usize,
        max_walls: usize,
    ) -> Result<Neighbourhood> {
        (**self).find_walls_in_neighbourhood(
            start_ref, center, radius, filter, max_polys, max_walls,
        )
    }

    fn off_mesh_connection_end_points(
        &self,
        prev_ref: PolyRef,
        con_ref: PolyRef,
    ) -> Result<(Vec3, Vec3)> {
        (**self).off_mesh_connection_end_points(prev_ref, con_ref)
    }
}
