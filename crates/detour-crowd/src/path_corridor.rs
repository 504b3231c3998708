//! Path corridor used by crowd agents to follow a path
//!
//! The corridor is the list of polygons from the agent's current polygon to the
//! polygon containing the target. It is kept up to date as the agent moves, is
//! shortened by visibility and topology optimisations, and is patched locally
//! when the navigation mesh changes instead of being replanned from scratch.

use detour::{NavMeshQuery, PolyRef, QueryFilter, StraightPathFlags, StraightPathPoint};
use nav_common::{dist_2d, dist_sqr_2d, sqr, Error, Result, Vec3};

use crate::BoundedList;

/// Default maximum number of polygons in a path corridor
pub const DEFAULT_MAX_PATH: usize = 256;

/// Corners closer than this to the current position are skipped
const MIN_TARGET_DIST: f32 = 0.01;
/// Polygons visited when moving the position or target along the surface
const MAX_VISITED: usize = 16;
/// Maximum polygons gathered by the visibility raycast
const MAX_VISIBILITY_RES: usize = 32;
/// Search budget of a topology optimisation
const MAX_TOPOLOGY_ITER: usize = 32;
const MAX_TOPOLOGY_RES: usize = 32;

/// Path corridor for smooth path following
#[derive(Debug, Clone)]
pub struct PathCorridor {
    pos: Vec3,
    target: Vec3,
    path: Vec<PolyRef>,
    max_path: usize,
}

impl Default for PathCorridor {
    fn default() -> Self {
        Self::new()
    }
}

impl PathCorridor {
    pub fn new() -> Self {
        Self {
            pos: Vec3::ZERO,
            target: Vec3::ZERO,
            path: Vec::with_capacity(DEFAULT_MAX_PATH),
            max_path: DEFAULT_MAX_PATH,
        }
    }

    /// Allocates the corridor's path buffer
    pub fn init(&mut self, max_path: usize) -> Result<()> {
        if max_path == 0 {
            return Err(Error::InvalidParam(
                "path corridor needs room for at least one polygon".into(),
            ));
        }
        self.max_path = max_path;
        self.path = Vec::with_capacity(max_path);
        Ok(())
    }

    /// Resets the corridor to a single polygon at `pos`
    pub fn reset(&mut self, poly_ref: PolyRef, pos: Vec3) {
        self.pos = pos;
        self.target = pos;
        self.path.clear();
        if poly_ref.is_valid() {
            self.path.push(poly_ref);
        }
    }

    /// Replaces the path and target. The path is truncated to the corridor capacity.
    pub fn set_corridor(&mut self, target: Vec3, path: &[PolyRef]) {
        self.target = target;
        self.path.clear();
        self.path
            .extend_from_slice(&path[..path.len().min(self.max_path)]);
    }

    /// Finds the next corners along the corridor.
    ///
    /// Corners closer than a small threshold are skipped, or closer than
    /// `cut_radius` when it is given (the end point only uses the small
    /// threshold). Nothing past the first off-mesh connection is returned.
    pub fn find_corners<Q: NavMeshQuery + ?Sized, const N: usize>(
        &self,
        corners: &mut BoundedList<StraightPathPoint, N>,
        navquery: &Q,
        cut_radius: Option<f32>,
    ) -> Result<()> {
        corners.clear();
        if self.path.is_empty() {
            return Ok(());
        }

        let points = navquery.find_straight_path(self.pos, self.target, &self.path, N)?;
        let prune_dist = cut_radius.map_or(MIN_TARGET_DIST, |r| r.max(MIN_TARGET_DIST));

        // Prune points in the beginning of the path which are too close.
        let skip = points
            .iter()
            .take_while(|p| {
                let max_dist = if p.flags.contains(StraightPathFlags::END) {
                    MIN_TARGET_DIST
                } else {
                    prune_dist
                };
                !p.flags.contains(StraightPathFlags::OFFMESH_CONNECTION)
                    && dist_sqr_2d(p.pos, self.pos) <= sqr(max_dist)
            })
            .count();

        for point in &points[skip..] {
            corners.push(*point);
            // Prune points after an off-mesh connection.
            if point.flags.contains(StraightPathFlags::OFFMESH_CONNECTION) {
                break;
            }
        }
        Ok(())
    }

    /// Shortcuts the start of the corridor when `next` is directly visible.
    ///
    /// The ray is extended up to `path_optimization_range` past `next`. Returns true
    /// if the corridor start was replaced by the raycast path.
    pub fn optimize_path_visibility<Q: NavMeshQuery + ?Sized>(
        &mut self,
        next: Vec3,
        path_optimization_range: f32,
        navquery: &Q,
        filter: &QueryFilter,
    ) -> bool {
        let Some(&first) = self.path.first() else {
            return false;
        };

        // Clamp the ray to max distance.
        let dist = dist_2d(self.pos, next);
        // If too close to the goal, do not try to optimize.
        if dist < 0.01 {
            return false;
        }
        // Overshoot a little. This helps to optimize open fields in tiled meshes.
        let dist = (dist + 0.01).min(path_optimization_range);

        let delta = next - self.pos;
        let goal = self.pos + delta * (path_optimization_range / dist);

        match navquery.raycast(first, self.pos, goal, filter, MAX_VISIBILITY_RES) {
            Ok(hit) if hit.path.len() > 1 && hit.t > 0.99 => {
                merge_corridor_start_shortcut(&mut self.path, self.max_path, &hit.path);
                true
            }
            Ok(_) => false,
            Err(err) => {
                log::trace!("visibility optimization from {first} failed: {err}");
                false
            }
        }
    }

    /// Replans the corridor with a small search and shortcuts it when a better route is found.
    ///
    /// Returns true if a search result was merged.
    pub fn optimize_path_topology<Q: NavMeshQuery + ?Sized>(
        &mut self,
        navquery: &Q,
        filter: &QueryFilter,
    ) -> bool {
        if self.path.len() < 3 {
            return false;
        }

        let first = self.path[0];
        let last = self.path[self.path.len() - 1];
        let result = match navquery.find_path_bounded(
            first,
            last,
            self.pos,
            self.target,
            filter,
            MAX_TOPOLOGY_ITER,
            MAX_TOPOLOGY_RES,
        ) {
            Ok(result) => result,
            Err(err) => {
                log::trace!("topology optimization from {first} failed: {err}");
                return false;
            }
        };

        let mut res = result.path;
        if result.partial {
            // Only keep the part of the search that rejoins the current corridor.
            match res.iter().rposition(|p| self.path.contains(p)) {
                Some(idx) => res.truncate(idx + 1),
                None => return false,
            }
        }
        if res.is_empty() {
            return false;
        }

        merge_corridor_start_shortcut(&mut self.path, self.max_path, &res);
        true
    }

    /// Moves the position along the surface towards `npos` and drops passed polygons
    pub fn move_position<Q: NavMeshQuery + ?Sized>(
        &mut self,
        npos: Vec3,
        navquery: &Q,
        filter: &QueryFilter,
    ) -> Result<()> {
        let first = *self
            .path
            .first()
            .ok_or_else(|| Error::Pathfinding("path corridor is empty".into()))?;

        let moved = navquery.move_along_surface(first, self.pos, npos, filter, MAX_VISITED)?;
        merge_corridor_start_moved(&mut self.path, self.max_path, &moved.visited);

        // Adjust the position to stay on top of the navmesh.
        let mut pos = moved.pos;
        if let Some(&first) = self.path.first() {
            pos.y = navquery.poly_height(first, pos).unwrap_or(self.pos.y);
        }
        self.pos = pos;
        Ok(())
    }

    /// Moves the target along the surface towards `npos` and extends the corridor
    pub fn move_target_position<Q: NavMeshQuery + ?Sized>(
        &mut self,
        npos: Vec3,
        navquery: &Q,
        filter: &QueryFilter,
    ) -> Result<()> {
        let last = *self
            .path
            .last()
            .ok_or_else(|| Error::Pathfinding("path corridor is empty".into()))?;

        let moved = navquery.move_along_surface(last, self.target, npos, filter, MAX_VISITED)?;
        merge_corridor_end_moved(&mut self.path, self.max_path, &moved.visited);
        self.target = moved.pos;
        Ok(())
    }

    /// Advances the corridor onto the off-mesh connection `link`.
    ///
    /// Polygons before the connection are dropped, the connection itself stays at
    /// the front until it is pruned or walked off. Returns the start and end point
    /// of the connection; the corridor position becomes the end point.
    pub fn move_over_off_mesh_connection<Q: NavMeshQuery + ?Sized>(
        &mut self,
        link: PolyRef,
        navquery: &Q,
    ) -> Result<(Vec3, Vec3)> {
        let idx = self
            .path
            .iter()
            .position(|&p| p == link)
            .ok_or(Error::InvalidPolyRef(link.id()))?;
        let prev = if idx > 0 {
            self.path[idx - 1]
        } else {
            PolyRef::NULL
        };

        let (start, end) = navquery.off_mesh_connection_end_points(prev, link)?;
        self.path.drain(..idx);
        self.pos = end;
        Ok((start, end))
    }

    /// Removes `link` from the front of the corridor once its traversal has started.
    ///
    /// Returns false if the corridor does not start with `link`.
    pub fn prune_off_mesh_connection(&mut self, link: PolyRef) -> bool {
        if self.path.len() < 2 || self.path[0] != link {
            return false;
        }
        self.path.remove(0);
        true
    }

    /// Moves the start of the corridor to a safe polygon after the agent left the mesh
    pub fn fix_path_start(&mut self, safe_ref: PolyRef, safe_pos: Vec3) {
        self.pos = safe_pos;
        match self.path.len() {
            0 => self.path.push(safe_ref),
            1 | 2 => {
                let last = self.path[self.path.len() - 1];
                self.path.clear();
                self.path.extend_from_slice(&[safe_ref, PolyRef::NULL, last]);
            }
            _ => {
                self.path[0] = safe_ref;
                self.path[1] = PolyRef::NULL;
            }
        }
    }

    /// Cuts the corridor at the first invalid polygon and clamps the target onto what is left
    pub fn trim_invalid_path<Q: NavMeshQuery + ?Sized>(
        &mut self,
        safe_ref: PolyRef,
        safe_pos: Vec3,
        navquery: &Q,
        filter: &QueryFilter,
    ) {
        // Keep valid path as far as possible.
        let n = self
            .path
            .iter()
            .take_while(|&&p| navquery.is_valid_poly_ref(p, filter))
            .count();

        if n == self.path.len() {
            return;
        }
        if n == 0 {
            // The first polyref is bad, use current safe values.
            self.pos = safe_pos;
            self.path.clear();
            self.path.push(safe_ref);
        } else {
            self.path.truncate(n);
        }

        // Clamp target pos to last poly
        let last = self.path[self.path.len() - 1];
        if let Ok(target) = navquery.closest_point_on_poly(last, self.target) {
            self.target = target;
        }
    }

    /// Checks the first `max_look_ahead` polygons against the mesh
    pub fn is_valid<Q: NavMeshQuery + ?Sized>(
        &self,
        max_look_ahead: usize,
        navquery: &Q,
        filter: &QueryFilter,
    ) -> bool {
        self.path
            .iter()
            .take(max_look_ahead)
            .all(|&p| navquery.is_valid_poly_ref(p, filter))
    }

    pub fn get_pos(&self) -> Vec3 {
        self.pos
    }

    pub fn get_target(&self) -> Vec3 {
        self.target
    }

    pub fn get_first_poly(&self) -> PolyRef {
        self.path.first().copied().unwrap_or(PolyRef::NULL)
    }

    pub fn get_last_poly(&self) -> PolyRef {
        self.path.last().copied().unwrap_or(PolyRef::NULL)
    }

    pub fn get_path(&self) -> &[PolyRef] {
        &self.path
    }

    pub fn get_path_count(&self) -> usize {
        self.path.len()
    }

    pub fn get_max_path(&self) -> usize {
        self.max_path
    }
}

/// Furthest polygon of `path` (searching from `path_order`) that also appears in
/// `visited`, returned as `(path index, first visited index)`
fn find_common<I>(path: &[PolyRef], path_order: I, visited: &[PolyRef]) -> Option<(usize, usize)>
where
    I: Iterator<Item = usize>,
{
    path_order
        .into_iter()
        .find_map(|i| visited.iter().position(|&v| v == path[i]).map(|j| (i, j)))
}

/// Replaces the start of `path` after the position moved through `visited`.
///
/// The result is the visited polygons from the furthest common one, reversed,
/// followed by the path after it.
pub fn merge_corridor_start_moved(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let Some((furthest_path, furthest_visited)) =
        find_common(path, (0..path.len()).rev(), visited)
    else {
        return;
    };

    let mut merged: Vec<PolyRef> = visited[furthest_visited..].iter().rev().copied().collect();
    merged.extend_from_slice(&path[(furthest_path + 1).min(path.len())..]);
    merged.truncate(max_path);
    *path = merged;
}

/// Extends the end of `path` after the target moved through `visited`
pub fn merge_corridor_end_moved(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let Some((furthest_path, furthest_visited)) = find_common(path, 0..path.len(), visited)
    else {
        return;
    };

    let ppos = furthest_path + 1;
    let vpos = furthest_visited + 1;
    let count = (visited.len() - vpos).min(max_path.saturating_sub(ppos));
    path.truncate(ppos);
    path.extend_from_slice(&visited[vpos..vpos + count]);
}

/// Replaces the start of `path` with a shortcut that rejoins it.
///
/// `visited` must start at the current polygon. Nothing changes when the
/// shortcut rejoins at its first polygon.
pub fn merge_corridor_start_shortcut(
    path: &mut Vec<PolyRef>,
    max_path: usize,
    visited: &[PolyRef],
) {
    let Some((furthest_path, furthest_visited)) =
        find_common(path, (0..path.len()).rev(), visited)
    else {
        return;
    };

    // Adjust beginning of the buffer to include the visited.
    if furthest_visited == 0 {
        return;
    }

    let mut merged: Vec<PolyRef> = visited[..furthest_visited].to_vec();
    merged.extend_from_slice(&path[furthest_path..]);
    merged.truncate(max_path);
    *path = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use detour::test_mesh_helpers::{
        create_gap_navmesh, create_l_shaped_navmesh, create_strip_navmesh, rect,
    };
    use detour::{PolyFlags, SimpleNavMesh, DEFAULT_AREA};

    fn refs(ids: &[u32]) -> Vec<PolyRef> {
        ids.iter().map(|&i| PolyRef::new(i)).collect()
    }

    /// Four 2x2 squares: 0 at the origin, 1 along +X, 2 along +Z, 3 diagonal
    fn create_grid_navmesh() -> Result<(SimpleNavMesh, Vec<PolyRef>)> {
        let mut mesh = SimpleNavMesh::new();
        let polys = [
            rect(0.0, 0.0, 2.0, 2.0),
            rect(2.0, 0.0, 4.0, 2.0),
            rect(0.0, 2.0, 2.0, 4.0),
            rect(2.0, 2.0, 4.0, 4.0),
        ]
        .iter()
        .map(|r| mesh.add_polygon(r, PolyFlags::WALK, DEFAULT_AREA))
        .collect::<Result<Vec<_>>>()?;
        Ok((mesh, polys))
    }

    #[test]
    fn test_reset_corridor() {
        let mut corridor = PathCorridor::new();
        let pos = Vec3::new(1.0, 2.0, 3.0);
        corridor.reset(PolyRef::new(7), pos);
        assert_eq!(corridor.get_pos(), pos);
        assert_eq!(corridor.get_target(), pos);
        assert_eq!(corridor.get_path(), &[PolyRef::new(7)]);

        corridor.reset(PolyRef::NULL, pos);
        assert_eq!(corridor.get_path_count(), 0);
        assert_eq!(corridor.get_first_poly(), PolyRef::NULL);
    }

    #[test]
    fn test_set_corridor_truncates() -> Result<()> {
        let mut corridor = PathCorridor::new();
        corridor.init(2)?;
        corridor.set_corridor(Vec3::X, &refs(&[1, 2, 3]));
        assert_eq!(corridor.get_path(), refs(&[1, 2]).as_slice());
        assert!(PathCorridor::new().init(0).is_err());
        Ok(())
    }

    #[test]
    fn test_merge_start_moved() {
        let mut path = refs(&[1, 2, 3, 4]);
        merge_corridor_start_moved(&mut path, 256, &refs(&[1, 2, 3]));
        assert_eq!(path, refs(&[3, 4]));

        // Moved backwards out of the corridor.
        let mut path = refs(&[1, 2]);
        merge_corridor_start_moved(&mut path, 256, &refs(&[1, 9]));
        assert_eq!(path, refs(&[9, 1, 2]));

        let mut path = refs(&[1, 2]);
        merge_corridor_start_moved(&mut path, 256, &refs(&[5, 6]));
        assert_eq!(path, refs(&[1, 2]));
    }

    #[test]
    fn test_merge_end_moved() {
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_end_moved(&mut path, 256, &refs(&[3, 5, 6]));
        assert_eq!(path, refs(&[1, 2, 3, 5, 6]));

        let mut path = refs(&[1, 2, 3]);
        merge_corridor_end_moved(&mut path, 4, &refs(&[3, 5, 6]));
        assert_eq!(path, refs(&[1, 2, 3, 5]));
    }

    #[test]
    fn test_merge_start_shortcut() {
        let mut path = refs(&[1, 2, 3, 4, 5]);
        merge_corridor_start_shortcut(&mut path, 256, &refs(&[1, 7, 4]));
        assert_eq!(path, refs(&[1, 7, 4, 5]));

        // Rejoining at the first visited polygon is not a shortcut.
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_start_shortcut(&mut path, 256, &refs(&[3]));
        assert_eq!(path, refs(&[1, 2, 3]));
    }

    #[test]
    fn test_move_position_drops_passed_polygons() -> Result<()> {
        let mesh = create_strip_navmesh(4, 2.0)?;
        let filter = QueryFilter::new();
        let path = (0..4).map(|i| mesh.poly_ref(i)).collect::<Result<Vec<_>>>()?;

        let mut corridor = PathCorridor::new();
        corridor.reset(path[0], Vec3::new(1.0, 0.0, 1.0));
        corridor.set_corridor(Vec3::new(7.0, 0.0, 1.0), &path);

        corridor.move_position(Vec3::new(3.0, 0.0, 1.0), &mesh, &filter)?;
        assert!(corridor.get_pos().distance(Vec3::new(3.0, 0.0, 1.0)) < 1e-5);
        assert_eq!(corridor.get_path(), &path[1..]);
        Ok(())
    }

    #[test]
    fn test_move_target_position_extends_path() -> Result<()> {
        let mesh = create_strip_navmesh(3, 2.0)?;
        let filter = QueryFilter::new();
        let path = (0..3).map(|i| mesh.poly_ref(i)).collect::<Result<Vec<_>>>()?;

        let mut corridor = PathCorridor::new();
        corridor.reset(path[0], Vec3::new(1.0, 0.0, 1.0));
        corridor.move_target_position(Vec3::new(5.0, 0.0, 1.0), &mesh, &filter)?;
        assert_eq!(corridor.get_path(), path.as_slice());
        assert!(corridor.get_target().distance(Vec3::new(5.0, 0.0, 1.0)) < 1e-5);
        Ok(())
    }

    #[test]
    fn test_find_corners() -> Result<()> {
        let mesh = create_l_shaped_navmesh()?;
        let path = (0..3).map(|i| mesh.poly_ref(i)).collect::<Result<Vec<_>>>()?;
        let mut corridor = PathCorridor::new();
        corridor.reset(path[0], Vec3::new(0.5, 0.0, 0.5));
        corridor.set_corridor(Vec3::new(1.5, 0.0, 1.5), &path);

        let mut corners: BoundedList<StraightPathPoint, 4> = BoundedList::new();
        corridor.find_corners(&mut corners, &mesh, None)?;
        assert_eq!(corners.len(), 2);
        assert!(corners[0].pos.distance(Vec3::new(1.0, 0.0, 1.0)) < 1e-4);
        assert!(corners[1].flags.contains(StraightPathFlags::END));

        // The corner is within reach, cutting it leaves only the end point.
        corridor.find_corners(&mut corners, &mesh, Some(0.8))?;
        assert_eq!(corners.len(), 1);
        assert!(corners[0].flags.contains(StraightPathFlags::END));
        Ok(())
    }

    #[test]
    fn test_optimize_path_visibility_shortcuts() -> Result<()> {
        let (mesh, p) = create_grid_navmesh()?;
        let filter = QueryFilter::new();
        let mut corridor = PathCorridor::new();
        corridor.reset(p[0], Vec3::new(1.0, 0.0, 0.5));
        corridor.set_corridor(Vec3::new(3.0, 0.0, 3.0), &[p[0], p[2], p[3]]);

        corridor.optimize_path_visibility(Vec3::new(3.0, 0.0, 3.0), 3.0, &mesh, &filter);
        assert_eq!(corridor.get_path(), &[p[0], p[1], p[3]]);
        Ok(())
    }

    #[test]
    fn test_optimize_path_topology() -> Result<()> {
        let (mesh, p) = create_grid_navmesh()?;
        let filter = QueryFilter::new();
        let mut corridor = PathCorridor::new();
        corridor.reset(p[0], Vec3::new(1.0, 0.0, 0.5));
        corridor.set_corridor(Vec3::new(3.0, 0.0, 3.0), &[p[0], p[2], p[3]]);

        assert!(corridor.optimize_path_topology(&mesh, &filter));
        assert_eq!(corridor.get_path_count(), 3);
        assert_eq!(corridor.get_first_poly(), p[0]);
        assert_eq!(corridor.get_last_poly(), p[3]);

        // Too short to optimize.
        corridor.set_corridor(Vec3::new(3.0, 0.0, 1.0), &[p[0], p[1]]);
        assert!(!corridor.optimize_path_topology(&mesh, &filter));
        Ok(())
    }

    #[test]
    fn test_move_over_off_mesh_connection() -> Result<()> {
        let (mesh, link) = create_gap_navmesh()?;
        let start_poly = mesh.poly_ref(0)?;
        let end_poly = mesh.poly_ref(1)?;
        let mut corridor = PathCorridor::new();
        corridor.reset(start_poly, Vec3::new(3.0, 0.0, 2.0));
        corridor.set_corridor(Vec3::new(10.0, 0.0, 2.0), &[start_poly, link, end_poly]);

        let (start, end) = corridor.move_over_off_mesh_connection(link, &mesh)?;
        assert_eq!(start, Vec3::new(3.0, 0.0, 2.0));
        assert_eq!(end, Vec3::new(9.0, 0.0, 2.0));
        assert_eq!(corridor.get_pos(), end);
        assert_eq!(corridor.get_path(), &[link, end_poly]);

        assert!(corridor.prune_off_mesh_connection(link));
        assert_eq!(corridor.get_path(), &[end_poly]);
        assert!(!corridor.prune_off_mesh_connection(link));
        assert!(corridor.move_over_off_mesh_connection(link, &mesh).is_err());
        Ok(())
    }

    #[test]
    fn test_fix_path_start() {
        let safe = PolyRef::new(9);
        let mut corridor = PathCorridor::new();
        corridor.set_corridor(Vec3::ZERO, &refs(&[1, 2]));
        corridor.fix_path_start(safe, Vec3::X);
        assert_eq!(corridor.get_pos(), Vec3::X);
        assert_eq!(corridor.get_path(), &[safe, PolyRef::NULL, PolyRef::new(2)]);

        corridor.set_corridor(Vec3::ZERO, &refs(&[1, 2, 3, 4]));
        corridor.fix_path_start(safe, Vec3::X);
        assert_eq!(
            corridor.get_path(),
            &[safe, PolyRef::NULL, PolyRef::new(3), PolyRef::new(4)]
        );
    }

    #[test]
    fn test_trim_invalid_path_and_lookahead() -> Result<()> {
        let mut mesh = create_strip_navmesh(3, 2.0)?;
        let filter = QueryFilter::new();
        let path = (0..3).map(|i| mesh.poly_ref(i)).collect::<Result<Vec<_>>>()?;
        let mut corridor = PathCorridor::new();
        corridor.reset(path[0], Vec3::new(1.0, 0.0, 1.0));
        corridor.set_corridor(Vec3::new(5.0, 0.0, 1.0), &path);
        assert!(corridor.is_valid(3, &mesh, &filter));

        mesh.remove_polygon(path[2])?;
        assert!(corridor.is_valid(2, &mesh, &filter));
        assert!(!corridor.is_valid(3, &mesh, &filter));

        corridor.trim_invalid_path(path[0], Vec3::new(1.0, 0.0, 1.0), &mesh, &filter);
        assert_eq!(corridor.get_path(), &path[..2]);
        assert!(corridor.get_target().distance(Vec3::new(4.0, 0.0, 1.0)) < 1e-5);
        Ok(())
    }
}
