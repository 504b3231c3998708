//! Walls near a crowd agent
//!
//! Each agent keeps the few wall segments closest to it, collected either from
//! a direct navmesh query or from a [`DtSharedBoundary`](crate::DtSharedBoundary)
//! entry. Segments are refreshed once the agent moves far enough from the point
//! they were gathered at.

use bitflags::bitflags;
use detour::{NavMeshQuery, PolyRef, QueryFilter};
use nav_common::{dist_point_segment_sqr_2d, dist_sqr_2d, dot_2d, normalize_2d, sqr, Vec3};

use crate::{BoundedList, SharedBoundaryData};

pub const MAX_LOCAL_SEGS: usize = 8;
pub const MAX_LOCAL_POLYS: usize = 16;

/// Walls per polygon requested from the navmesh
const MAX_SEGS_PER_POLY: usize = 16;

/// Walls whose closest point is farther above or below the agent are on another floor
const MAX_SEGMENT_HEIGHT_DIFF: f32 = 2.0;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LocalSegmentFlags: u8 {
        /// Close to the end of the path, the avoidance sampler may overlap it
        const IGNORE_FOR_AVOIDANCE = 0x01;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocalSegment {
    pub start: Vec3,
    pub end: Vec3,
    pub flags: LocalSegmentFlags,
    /// Lower is more relevant
    score: f32,
}

impl LocalSegment {
    pub fn get_score(&self) -> f32 {
        self.score
    }
}

/// Inputs shared by both ways of rebuilding a boundary
#[derive(Debug, Clone, Copy)]
pub struct BoundaryQuery {
    pub pos: Vec3,
    pub collision_query_range: f32,
    /// Movement direction, only the XZ components are used
    pub move_dir: Vec3,
    /// End of the path, walls near it are flagged instead of scored normally
    pub path_end: Option<Vec3>,
}

#[derive(Debug, Clone)]
pub struct DtLocalBoundary {
    center: Vec3,
    segs: BoundedList<LocalSegment, MAX_LOCAL_SEGS>,
    polys: BoundedList<PolyRef, MAX_LOCAL_POLYS>,
}

impl Default for DtLocalBoundary {
    fn default() -> Self {
        Self::new()
    }
}

impl DtLocalBoundary {
    pub fn new() -> Self {
        Self {
            center: Vec3::splat(f32::MAX),
            segs: BoundedList::new(),
            polys: BoundedList::new(),
        }
    }

    pub fn reset(&mut self) {
        self.center = Vec3::splat(f32::MAX);
        self.segs.clear();
        self.polys.clear();
    }

    /// Rebuilds the boundary from a direct navmesh query
    pub fn update<Q: NavMeshQuery + ?Sized>(
        &mut self,
        poly_ref: PolyRef,
        query: &BoundaryQuery,
        navquery: &Q,
        filter: &QueryFilter,
    ) {
        if !poly_ref.is_valid() {
            self.reset();
            return;
        }

        let polys = match navquery.find_local_neighbourhood(
            poly_ref,
            query.pos,
            query.collision_query_range,
            filter,
            MAX_LOCAL_POLYS,
        ) {
            Ok(polys) => polys,
            Err(err) => {
                log::debug!("local boundary query around {poly_ref} failed: {err}");
                self.reset();
                return;
            }
        };

        self.center = query.pos;
        self.segs.clear();
        self.polys.clear();
        for &poly in &polys {
            self.polys.push(poly);
            let Ok(walls) = navquery.poly_wall_segments(poly, filter, MAX_SEGS_PER_POLY) else {
                continue;
            };
            for wall in walls {
                self.add_wall(wall.start, wall.end, query);
            }
        }
    }

    /// Rebuilds the boundary from a shared cache entry
    pub fn update_from_shared(
        &mut self,
        poly_ref: PolyRef,
        query: &BoundaryQuery,
        data: &SharedBoundaryData,
    ) {
        if !poly_ref.is_valid() {
            self.reset();
            return;
        }

        self.center = query.pos;
        self.segs.clear();
        self.polys.clear();
        for &poly in data.polys.iter().take(MAX_LOCAL_POLYS) {
            self.polys.push(poly);
        }
        for wall in &data.walls {
            self.add_wall(wall.start, wall.end, query);
        }
    }

    fn add_wall(&mut self, start: Vec3, end: Vec3, query: &BoundaryQuery) {
        let (dist_sqr, t) = dist_point_segment_sqr_2d(query.pos, start, end);
        if dist_sqr > sqr(query.collision_query_range) {
            return;
        }

        let closest = start.lerp(end, t);
        if (closest.y - query.pos.y).abs() > MAX_SEGMENT_HEIGHT_DIFF {
            return;
        }

        let mut flags = LocalSegmentFlags::empty();
        if let Some(path_end) = query.path_end {
            if dist_sqr_2d(closest, path_end) < sqr(query.collision_query_range * 0.25) {
                flags |= LocalSegmentFlags::IGNORE_FOR_AVOIDANCE;
            }
        }

        let to_wall = normalize_2d(closest - query.pos);
        let score = dist_sqr * (1.0 - dot_2d(to_wall, query.move_dir)) * 0.5;

        self.segs.insert_sorted_by(
            LocalSegment {
                start,
                end,
                flags,
                score,
            },
            |a, b| a.score < b.score,
        );
    }

    /// True if the boundary holds polygons and all of them are still valid
    pub fn is_valid<Q: NavMeshQuery + ?Sized>(&self, navquery: &Q, filter: &QueryFilter) -> bool {
        !self.polys.is_empty()
            && self
                .polys
                .iter()
                .all(|&p| navquery.is_valid_poly_ref(p, filter))
    }

    pub fn get_center(&self) -> Vec3 {
        self.center
    }

    pub fn get_segment_count(&self) -> usize {
        self.segs.len()
    }

    pub fn get_segment(&self, i: usize) -> Option<&LocalSegment> {
        self.segs.get(i)
    }

    pub fn segments(&self) -> &[LocalSegment] {
        self.segs.as_slice()
    }

    pub fn polys(&self) -> &[PolyRef] {
        self.polys.as_slice()
    }
}
