//! A compact navigation mesh made of convex polygons.
//!
//! [`SimpleNavMesh`] keeps every polygon in a single flat list, connects polygons
//! that share an edge and supports point-to-point off-mesh connections. Polygon
//! references carry a salt, so removing or restoring a polygon invalidates every
//! reference handed out before, the same way a tile rebuild does on a tiled mesh.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use crate::{
    NavMeshQuery, PathResult, PolyFlags, PolyRef, QueryFilter, RaycastHit,
    StraightPathFlags, StraightPathPoint, SurfaceMove, WallSegment, MAX_VERTS_PER_POLY,
};
use nav_common::{
    closest_height_point_triangle, dist_point_segment_sqr_2d, intersect_segment_poly_2d,
    point_in_polygon_2d, poly_area_2d, sqr, vequal, Error, Result, Vec3,
};

/// Number of bits used for the polygon index in a reference
const POLY_BITS: u32 = 20;
/// Number of bits used for the salt in a reference
const SALT_BITS: u32 = 12;
const POLY_MASK: u32 = (1 << POLY_BITS) - 1;
const SALT_MASK: u32 = (1 << SALT_BITS) - 1;

/// Heuristic scale used by the A* search
const H_SCALE: f32 = 0.999;
/// Distance under which two vertices are considered shared
const VERTEX_WELD_DIST: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum PolyKind {
    Ground,
    OffMeshConnection {
        radius: f32,
        bidirectional: bool,
        start_poly: Option<usize>,
        end_poly: Option<usize>,
    },
}

#[derive(Debug, Clone)]
struct MeshPoly {
    /// Polygon outline, or `[start, end]` for off-mesh connections
    verts: Vec<Vec3>,
    flags: PolyFlags,
    area: u8,
    kind: PolyKind,
    salt: u32,
    enabled: bool,
    /// Ground neighbour across each edge, edge `j` runs from `verts[j]` to `verts[j + 1]`
    edge_neis: Vec<Option<usize>>,
    /// Off-mesh connections that can be entered from this polygon
    links: Vec<usize>,
}

impl MeshPoly {
    fn is_ground(&self) -> bool {
        self.kind == PolyKind::Ground
    }

    fn edge(&self, j: usize) -> (Vec3, Vec3) {
        (self.verts[j], self.verts[(j + 1) % self.verts.len()])
    }
}

/// In-memory navigation mesh of convex polygons
#[derive(Debug, Clone, Default)]
pub struct SimpleNavMesh {
    polys: Vec<MeshPoly>,
}

impl SimpleNavMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a convex walkable polygon. Winding is normalized automatically.
    pub fn add_polygon(&mut self, verts: &[Vec3], flags: PolyFlags, area: u8) -> Result<PolyRef> {
        if verts.len() < 3 || verts.len() > MAX_VERTS_PER_POLY {
            return Err(Error::InvalidParam(format!(
                "polygon must have 3..={MAX_VERTS_PER_POLY} vertices, got {}",
                verts.len()
            )));
        }
        let area_2d = poly_area_2d(verts);
        if area_2d.abs() < f32::EPSILON {
            return Err(Error::InvalidParam("degenerate polygon".into()));
        }
        let mut verts = verts.to_vec();
        if area_2d < 0.0 {
            verts.reverse();
        }

        let n = verts.len();
        let idx = self.push_poly(MeshPoly {
            verts,
            flags,
            area,
            kind: PolyKind::Ground,
            salt: 1,
            enabled: true,
            edge_neis: vec![None; n],
            links: Vec::new(),
        })?;
        self.rebuild_links();
        self.poly_ref(idx)
    }

    /// Adds an off-mesh connection between the polygons under `start` and `end`.
    ///
    /// Endpoints are attached to the ground polygon found within `radius`.
    pub fn add_off_mesh_connection(
        &mut self,
        start: Vec3,
        end: Vec3,
        radius: f32,
        bidirectional: bool,
        flags: PolyFlags,
        area: u8,
    ) -> Result<PolyRef> {
        let start_poly = self.ground_poly_at(start, radius);
        let end_poly = self.ground_poly_at(end, radius);
        if start_poly.is_none() {
            return Err(Error::no_nearby_polygon(start));
        }
        if end_poly.is_none() {
            return Err(Error::no_nearby_polygon(end));
        }

        let idx = self.push_poly(MeshPoly {
            verts: vec![start, end],
            flags,
            area,
            kind: PolyKind::OffMeshConnection {
                radius,
                bidirectional,
                start_poly: None,
                end_poly: None,
            },
            salt: 1,
            enabled: true,
            edge_neis: Vec::new(),
            links: Vec::new(),
        })?;
        self.rebuild_links();
        self.poly_ref(idx)
    }

    /// Number of polygons, including disabled ones and off-mesh connections
    pub fn poly_count(&self) -> usize {
        self.polys.len()
    }

    /// Current reference of the polygon at `index`
    pub fn poly_ref(&self, index: usize) -> Result<PolyRef> {
        let poly = self
            .polys
            .get(index)
            .filter(|p| p.enabled)
            .ok_or_else(|| Error::InvalidParam(format!("no live polygon at index {index}")))?;
        Ok(Self::encode_ref(index, poly.salt))
    }

    /// Returns true if `poly_ref` is a live off-mesh connection
    pub fn is_off_mesh_connection(&self, poly_ref: PolyRef) -> bool {
        self.decode(poly_ref)
            .map(|(_, p)| !p.is_ground())
            .unwrap_or(false)
    }

    /// Removes a polygon from the mesh. Every reference to it becomes invalid.
    pub fn remove_polygon(&mut self, poly_ref: PolyRef) -> Result<()> {
        let (idx, _) = self
            .decode(poly_ref)
            .ok_or(Error::InvalidPolyRef(poly_ref.id()))?;
        let poly = &mut self.polys[idx];
        poly.enabled = false;
        poly.salt = Self::next_salt(poly.salt);
        log::debug!("removed polygon {poly_ref}");
        self.rebuild_links();
        Ok(())
    }

    /// Restores a removed polygon under a fresh reference
    pub fn restore_polygon(&mut self, index: usize) -> Result<PolyRef> {
        let poly = self
            .polys
            .get_mut(index)
            .ok_or_else(|| Error::InvalidParam(format!("no polygon at index {index}")))?;
        if poly.enabled {
            return Err(Error::InvalidParam(format!(
                "polygon {index} is not removed"
            )));
        }
        poly.enabled = true;
        poly.salt = Self::next_salt(poly.salt);
        self.rebuild_links();
        self.poly_ref(index)
    }

    /// Replaces the flags of a polygon
    pub fn set_poly_flags(&mut self, poly_ref: PolyRef, flags: PolyFlags) -> Result<()> {
        let (idx, _) = self
            .decode(poly_ref)
            .ok_or(Error::InvalidPolyRef(poly_ref.id()))?;
        self.polys[idx].flags = flags;
        Ok(())
    }

    fn push_poly(&mut self, poly: MeshPoly) -> Result<usize> {
        if self.polys.len() >= POLY_MASK as usize {
            return Err(Error::CapacityExhausted("navmesh polygons"));
        }
        self.polys.push(poly);
        Ok(self.polys.len() - 1)
    }

    fn next_salt(salt: u32) -> u32 {
        let next = (salt + 1) & SALT_MASK;
        if next == 0 {
            1
        } else {
            next
        }
    }

    fn encode_ref(index: usize, salt: u32) -> PolyRef {
        PolyRef::new((salt << POLY_BITS) | (index as u32 + 1))
    }

    fn decode(&self, poly_ref: PolyRef) -> Option<(usize, &MeshPoly)> {
        let id = poly_ref.id();
        let low = id & POLY_MASK;
        if low == 0 {
            return None;
        }
        let idx = (low - 1) as usize;
        let poly = self.polys.get(idx)?;
        (poly.enabled && poly.salt == id >> POLY_BITS).then_some((idx, poly))
    }

    fn decode_filtered(&self, poly_ref: PolyRef, filter: &QueryFilter) -> Result<usize> {
        match self.decode(poly_ref) {
            Some((idx, poly)) if filter.pass_filter(poly.flags, poly.area) => Ok(idx),
            _ => Err(Error::InvalidPolyRef(poly_ref.id())),
        }
    }

    fn ref_of(&self, idx: usize) -> PolyRef {
        Self::encode_ref(idx, self.polys[idx].salt)
    }

    fn passes(&self, idx: usize, filter: &QueryFilter) -> bool {
        let poly = &self.polys[idx];
        poly.enabled && filter.pass_filter(poly.flags, poly.area)
    }

    /// Ground polygon containing `pos`, or the closest one within `radius`
    fn ground_poly_at(&self, pos: Vec3, radius: f32) -> Option<usize> {
        let mut best = None;
        let mut best_dist = sqr(radius);
        for (idx, poly) in self.polys.iter().enumerate() {
            if !poly.enabled || !poly.is_ground() {
                continue;
            }
            if point_in_polygon_2d(pos, &poly.verts) {
                return Some(idx);
            }
            let closest = self.closest_point_ground(idx, pos);
            let d = closest.distance_squared(pos);
            if d <= best_dist {
                best_dist = d;
                best = Some(idx);
            }
        }
        best
    }

    fn rebuild_links(&mut self) {
        let count = self.polys.len();
        for poly in &mut self.polys {
            poly.links.clear();
            for nei in poly.edge_neis.iter_mut() {
                *nei = None;
            }
        }

        for a in 0..count {
            if !self.polys[a].enabled || !self.polys[a].is_ground() {
                continue;
            }
            for ea in 0..self.polys[a].verts.len() {
                let (a0, a1) = self.polys[a].edge(ea);
                let found = (0..count).find(|&b| {
                    let pb = &self.polys[b];
                    b != a
                        && pb.enabled
                        && pb.is_ground()
                        && (0..pb.verts.len()).any(|eb| {
                            let (b0, b1) = pb.edge(eb);
                            a0.distance(b1) < VERTEX_WELD_DIST && a1.distance(b0) < VERTEX_WELD_DIST
                        })
                });
                self.polys[a].edge_neis[ea] = found;
            }
        }

        for l in 0..count {
            let (start, end) = (self.polys[l].verts[0], self.polys[l].verts[1 % self.polys[l].verts.len()]);
            let PolyKind::OffMeshConnection {
                radius,
                bidirectional,
                ..
            } = self.polys[l].kind
            else {
                continue;
            };
            let (start_poly, end_poly) = if self.polys[l].enabled {
                (
                    self.ground_poly_at(start, radius),
                    self.ground_poly_at(end, radius),
                )
            } else {
                (None, None)
            };
            self.polys[l].kind = PolyKind::OffMeshConnection {
                radius,
                bidirectional,
                start_poly,
                end_poly,
            };
            if let Some(s) = start_poly {
                self.polys[s].links.push(l);
            }
            if bidirectional {
                if let Some(e) = end_poly {
                    self.polys[e].links.push(l);
                }
            }
        }
    }

    /// Neighbours reachable from `idx` with the portal between them
    fn neighbours(&self, idx: usize, filter: &QueryFilter) -> Vec<(usize, Vec3, Vec3)> {
        let poly = &self.polys[idx];
        let mut out = Vec::new();
        match poly.kind {
            PolyKind::Ground => {
                for (j, nei) in poly.edge_neis.iter().enumerate() {
                    if let Some(n) = *nei {
                        if self.passes(n, filter) {
                            let (left, right) = poly.edge(j);
                            out.push((n, left, right));
                        }
                    }
                }
                for &l in &poly.links {
                    if self.passes(l, filter) {
                        if let Some((left, right)) = self.portal(idx, l) {
                            out.push((l, left, right));
                        }
                    }
                }
            }
            PolyKind::OffMeshConnection {
                bidirectional,
                start_poly,
                end_poly,
                ..
            } => {
                if let Some(e) = end_poly {
                    if self.passes(e, filter) {
                        out.push((e, poly.verts[1], poly.verts[1]));
                    }
                }
                if bidirectional {
                    if let Some(s) = start_poly {
                        if self.passes(s, filter) {
                            out.push((s, poly.verts[0], poly.verts[0]));
                        }
                    }
                }
            }
        }
        out
    }

    /// Portal between two connected polygons as `(left, right)`
    fn portal(&self, from: usize, to: usize) -> Option<(Vec3, Vec3)> {
        let pf = &self.polys[from];
        let pt = &self.polys[to];
        match (pf.kind, pt.kind) {
            (PolyKind::Ground, PolyKind::Ground) => pf
                .edge_neis
                .iter()
                .position(|n| *n == Some(to))
                .map(|j| pf.edge(j)),
            (PolyKind::Ground, PolyKind::OffMeshConnection { start_poly, end_poly, .. }) => {
                if start_poly == Some(from) {
                    Some((pt.verts[0], pt.verts[0]))
                } else if end_poly == Some(from) {
                    Some((pt.verts[1], pt.verts[1]))
                } else {
                    None
                }
            }
            (PolyKind::OffMeshConnection { start_poly, end_poly, .. }, PolyKind::Ground) => {
                if end_poly == Some(to) {
                    Some((pf.verts[1], pf.verts[1]))
                } else if start_poly == Some(to) {
                    Some((pf.verts[0], pf.verts[0]))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn closest_point_ground(&self, idx: usize, pos: Vec3) -> Vec3 {
        let poly = &self.polys[idx];
        if point_in_polygon_2d(pos, &poly.verts) {
            let y = self.ground_height(idx, pos).unwrap_or(pos.y);
            return Vec3::new(pos.x, y, pos.z);
        }
        let mut best = poly.verts[0];
        let mut best_dist = f32::MAX;
        for j in 0..poly.verts.len() {
            let (va, vb) = poly.edge(j);
            let (d, t) = dist_point_segment_sqr_2d(pos, va, vb);
            if d < best_dist {
                best_dist = d;
                best = va.lerp(vb, t);
            }
        }
        best
    }

    fn ground_height(&self, idx: usize, pos: Vec3) -> Option<f32> {
        let verts = &self.polys[idx].verts;
        (2..verts.len())
            .find_map(|i| closest_height_point_triangle(pos, verts[0], verts[i - 1], verts[i]))
    }

    fn is_link(&self, idx: usize) -> bool {
        !self.polys[idx].is_ground()
    }

    /// Funnels through `idxs` from `from` to `to`, appending the corners in between
    fn string_pull(
        &self,
        idxs: &[usize],
        from: Vec3,
        to: Vec3,
        out: &mut Vec<StraightPathPoint>,
    ) -> Result<()> {
        let n = idxs.len();
        let mut apex = from;
        let mut left = from;
        let mut right = from;
        let mut apex_index = 0;
        let mut left_index = 0;
        let mut right_index = 0;
        let mut left_ref = PolyRef::NULL;
        let mut right_ref = PolyRef::NULL;

        let mut i = 0;
        while i < n {
            let (pl, pr, next_ref) = if i + 1 < n {
                let (pl, pr) = self
                    .portal(idxs[i], idxs[i + 1])
                    .ok_or_else(|| Error::Pathfinding("path polygons are not connected".into()))?;
                if i == 0 && dist_point_segment_sqr_2d(apex, pl, pr).0 < sqr(0.001) {
                    i += 1;
                    continue;
                }
                (pl, pr, self.ref_of(idxs[i + 1]))
            } else {
                (to, to, PolyRef::NULL)
            };

            // Right vertex.
            if nav_common::tri_area_2d(apex, right, pr) <= 0.0 {
                if vequal(apex, right) || nav_common::tri_area_2d(apex, left, pr) > 0.0 {
                    right = pr;
                    right_ref = next_ref;
                    right_index = i;
                } else {
                    apex = left;
                    apex_index = left_index;
                    append_point(out, apex, StraightPathFlags::empty(), left_ref);
                    right = apex;
                    right_index = apex_index;
                    i = apex_index + 1;
                    continue;
                }
            }

            // Left vertex.
            if nav_common::tri_area_2d(apex, left, pl) >= 0.0 {
                if vequal(apex, left) || nav_common::tri_area_2d(apex, right, pl) < 0.0 {
                    left = pl;
                    left_ref = next_ref;
                    left_index = i;
                } else {
                    apex = right;
                    apex_index = right_index;
                    append_point(out, apex, StraightPathFlags::empty(), right_ref);
                    left = apex;
                    left_index = apex_index;
                    i = apex_index + 1;
                    continue;
                }
            }

            i += 1;
        }
        Ok(())
    }

    fn path_to(&self, nodes: &HashMap<usize, SearchNode>, mut idx: usize) -> Vec<PolyRef> {
        let mut path = vec![self.ref_of(idx)];
        while let Some(parent) = nodes.get(&idx).and_then(|n| n.parent) {
            path.push(self.ref_of(parent));
            idx = parent;
        }
        path.reverse();
        path
    }
}

fn append_point(out: &mut Vec<StraightPathPoint>, pos: Vec3, flags: StraightPathFlags, poly: PolyRef) {
    if let Some(last) = out.last_mut() {
        if vequal(last.pos, pos) {
            last.flags = flags;
            last.poly = poly;
            return;
        }
    }
    out.push(StraightPathPoint { pos, flags, poly });
}

#[derive(Debug, Clone, Copy)]
struct SearchNode {
    pos: Vec3,
    cost: f32,
    total: f32,
    parent: Option<usize>,
    closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OpenEntry {
    total: f32,
    idx: usize,
}

impl Eq for OpenEntry {}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on total cost, ties resolved by polygon index.
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl NavMeshQuery for SimpleNavMesh {
    fn is_valid_poly_ref(&self, poly_ref: PolyRef, filter: &QueryFilter) -> bool {
        self.decode(poly_ref)
            .map(|(_, p)| filter.pass_filter(p.flags, p.area))
            .unwrap_or(false)
    }

    fn poly_area(&self, poly_ref: PolyRef) -> Option<u8> {
        self.decode(poly_ref).map(|(_, p)| p.area)
    }

    fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Option<(PolyRef, Vec3)> {
        let qmin = center - half_extents;
        let qmax = center + half_extents;
        let mut best: Option<(usize, Vec3)> = None;
        let mut best_dist = f32::MAX;

        for (idx, poly) in self.polys.iter().enumerate() {
            if !poly.is_ground() || !self.passes(idx, filter) {
                continue;
            }
            let bmin = poly.verts.iter().fold(Vec3::splat(f32::MAX), |a, v| a.min(*v));
            let bmax = poly.verts.iter().fold(Vec3::splat(f32::MIN), |a, v| a.max(*v));
            if bmin.cmpgt(qmax).any() || bmax.cmplt(qmin).any() {
                continue;
            }
            let closest = self.closest_point_ground(idx, center);
            let d = closest.distance_squared(center);
            if d < best_dist {
                best_dist = d;
                best = Some((idx, closest));
            }
        }

        best.map(|(idx, pos)| (self.ref_of(idx), pos))
    }

    fn closest_point_on_poly(&self, poly_ref: PolyRef, pos: Vec3) -> Result<Vec3> {
        let (idx, poly) = self
            .decode(poly_ref)
            .ok_or(Error::InvalidPolyRef(poly_ref.id()))?;
        if poly.is_ground() {
            Ok(self.closest_point_ground(idx, pos))
        } else {
            let (_, t) = dist_point_segment_sqr_2d(pos, poly.verts[0], poly.verts[1]);
            Ok(poly.verts[0].lerp(poly.verts[1], t))
        }
    }

    fn poly_height(&self, poly_ref: PolyRef, pos: Vec3) -> Option<f32> {
        let (idx, poly) = self.decode(poly_ref)?;
        if poly.is_ground() {
            self.ground_height(idx, pos)
        } else {
            let (_, t) = dist_point_segment_sqr_2d(pos, poly.verts[0], poly.verts[1]);
            Some(poly.verts[0].y + (poly.verts[1].y - poly.verts[0].y) * t)
        }
    }

    fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start: Vec3,
        end: Vec3,
        filter: &QueryFilter,
        max_visited: usize,
    ) -> Result<SurfaceMove> {
        let start_idx = self.decode_filtered(start_ref, filter)?;
        if max_visited == 0 {
            return Err(Error::InvalidParam("max_visited must be positive".into()));
        }

        // Leaving an off-mesh connection: continue from the polygon it lands on.
        let mut prefix = Vec::new();
        let mut root = start_idx;
        if let PolyKind::OffMeshConnection { start_poly, end_poly, .. } = self.polys[start_idx].kind {
            let verts = &self.polys[start_idx].verts;
            let landing = if start.distance_squared(verts[1]) <= start.distance_squared(verts[0]) {
                end_poly.or(start_poly)
            } else {
                start_poly.or(end_poly)
            };
            root = landing
                .filter(|&l| self.passes(l, filter))
                .ok_or(Error::InvalidPolyRef(start_ref.id()))?;
            prefix.push(start_ref);
        }

        let search_pos = (start + end) * 0.5;
        let search_rad_sqr = sqr(start.distance(end) * 0.5 + 0.001);

        // (polygon, parent node)
        let mut nodes: Vec<(usize, Option<usize>)> = vec![(root, None)];
        let mut queue = VecDeque::from([0usize]);
        let mut best_pos = start;
        let mut best_dist = f32::MAX;
        let mut best_node = 0;

        while let Some(cur) = queue.pop_front() {
            let idx = nodes[cur].0;
            let poly = &self.polys[idx];

            if point_in_polygon_2d(end, &poly.verts) {
                best_node = cur;
                best_pos = end;
                break;
            }

            for j in 0..poly.verts.len() {
                let (vj, vi) = poly.edge(j);
                let nei = poly.edge_neis[j].filter(|&n| self.passes(n, filter));
                match nei {
                    None => {
                        let (d, t) = dist_point_segment_sqr_2d(end, vj, vi);
                        if d < best_dist {
                            best_pos = vj.lerp(vi, t);
                            best_dist = d;
                            best_node = cur;
                        }
                    }
                    Some(n) => {
                        if nodes.iter().any(|(p, _)| *p == n) {
                            continue;
                        }
                        let (d, _) = dist_point_segment_sqr_2d(search_pos, vj, vi);
                        if d > search_rad_sqr {
                            continue;
                        }
                        if nodes.len() < max_visited {
                            nodes.push((n, Some(cur)));
                            queue.push_back(nodes.len() - 1);
                        }
                    }
                }
            }
        }

        let mut visited = Vec::new();
        let mut node = Some(best_node);
        while let Some(n) = node {
            visited.push(self.ref_of(nodes[n].0));
            node = nodes[n].1;
        }
        visited.reverse();
        prefix.extend(visited);
        prefix.truncate(max_visited.max(1));

        Ok(SurfaceMove {
            pos: best_pos,
            visited: prefix,
        })
    }

    fn find_straight_path(
        &self,
        start: Vec3,
        end: Vec3,
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<Vec<StraightPathPoint>> {
        if path.is_empty() || max_points == 0 {
            return Err(Error::InvalidParam("empty path or result buffer".into()));
        }
        let idxs = path
            .iter()
            .map(|r| {
                self.decode(*r)
                    .map(|(i, _)| i)
                    .ok_or(Error::InvalidPolyRef(r.id()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(max_points);
        let mut begin = usize::from(self.is_link(idxs[0]));
        let mut seg_start = if self.is_link(idxs[0]) {
            start
        } else {
            self.closest_point_ground(idxs[0], start)
        };
        append_point(&mut out, seg_start, StraightPathFlags::START, path[0]);

        for k in begin + 1..idxs.len() {
            if !self.is_link(idxs[k]) || k == begin {
                continue;
            }
            let (link_start, _) = self
                .portal(idxs[k - 1], idxs[k])
                .ok_or_else(|| Error::Pathfinding("path polygons are not connected".into()))?;
            let link_end = match idxs.get(k + 1) {
                Some(&next) => self
                    .portal(idxs[k], next)
                    .map(|(p, _)| p)
                    .ok_or_else(|| Error::Pathfinding("path polygons are not connected".into()))?,
                None => {
                    let verts = &self.polys[idxs[k]].verts;
                    if vequal(verts[0], link_start) {
                        verts[1]
                    } else {
                        verts[0]
                    }
                }
            };

            self.string_pull(&idxs[begin..k], seg_start, link_start, &mut out)?;
            append_point(
                &mut out,
                link_start,
                StraightPathFlags::OFFMESH_CONNECTION,
                path[k],
            );
            let landing = path.get(k + 1).copied().unwrap_or(PolyRef::NULL);
            append_point(&mut out, link_end, StraightPathFlags::empty(), landing);
            if out.len() >= max_points {
                out.truncate(max_points);
                return Ok(out);
            }
            seg_start = link_end;
            begin = k + 1;
        }

        if begin < idxs.len() {
            let last = idxs[idxs.len() - 1];
            let end_pos = self.closest_point_ground(last, end);
            self.string_pull(&idxs[begin..], seg_start, end_pos, &mut out)?;
            append_point(&mut out, end_pos, StraightPathFlags::END, PolyRef::NULL);
        } else {
            append_point(&mut out, seg_start, StraightPathFlags::END, PolyRef::NULL);
        }

        out.truncate(max_points);
        Ok(out)
    }

    fn raycast(
        &self,
        start_ref: PolyRef,
        start: Vec3,
        end: Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<RaycastHit> {
        let mut cur = self.decode_filtered(start_ref, filter)?;
        if self.is_link(cur) {
            return Err(Error::InvalidParam(
                "raycast cannot start on an off-mesh connection".into(),
            ));
        }

        let mut hit = RaycastHit {
            t: 0.0,
            hit_normal: Vec3::ZERO,
            path: Vec::new(),
        };

        loop {
            let poly = &self.polys[cur];
            let Some(isect) = intersect_segment_poly_2d(start, end, &poly.verts) else {
                // Could not hit the polygon, keep the old t and report hit.
                return Ok(hit);
            };
            if isect.tmax > hit.t {
                hit.t = isect.tmax;
            }
            if hit.path.len() < max_path {
                hit.path.push(self.ref_of(cur));
            }

            let Some(seg) = isect.seg_max else {
                hit.t = f32::MAX;
                return Ok(hit);
            };

            match poly.edge_neis[seg].filter(|&n| self.passes(n, filter)) {
                Some(next) if hit.path.len() < max_path => cur = next,
                Some(_) => return Ok(hit),
                None => {
                    let (va, vb) = poly.edge(seg);
                    let dx = vb.x - va.x;
                    let dz = vb.z - va.z;
                    hit.hit_normal = Vec3::new(dz, 0.0, -dx).normalize_or_zero();
                    return Ok(hit);
                }
            }
        }
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
        let start_idx = self.decode_filtered(start_ref, filter)?;
        let end_idx = self.decode_filtered(end_ref, filter)?;
        if max_path == 0 {
            return Err(Error::InvalidParam("max_path must be positive".into()));
        }

        if start_idx == end_idx {
            return Ok(PathResult {
                path: vec![start_ref],
                partial: false,
                iterations: 1,
            });
        }

        let mut nodes: HashMap<usize, SearchNode> = HashMap::new();
        let mut open = BinaryHeap::new();
        let h0 = start.distance(end) * H_SCALE;
        nodes.insert(
            start_idx,
            SearchNode {
                pos: start,
                cost: 0.0,
                total: h0,
                parent: None,
                closed: false,
            },
        );
        open.push(OpenEntry {
            total: h0,
            idx: start_idx,
        });

        let mut best_idx = start_idx;
        let mut best_h = h0;
        let mut iterations = 0;
        let mut reached = false;

        while let Some(OpenEntry { idx, total }) = open.pop() {
            let Some(node) = nodes.get(&idx).copied() else {
                continue;
            };
            if node.closed || total > node.total {
                continue;
            }
            if iterations >= max_iters {
                break;
            }
            iterations += 1;
            if let Some(n) = nodes.get_mut(&idx) {
                n.closed = true;
            }

            if idx == end_idx {
                best_idx = idx;
                reached = true;
                break;
            }

            for (nei, left, right) in self.neighbours(idx, filter) {
                if node.parent == Some(nei) {
                    continue;
                }
                let nei_pos = if nei == end_idx { end } else { (left + right) * 0.5 };
                let area_cost = filter.area_cost(self.polys[idx].area);
                let mut cost = node.cost + node.pos.distance(nei_pos) * area_cost;
                if nei == end_idx {
                    cost += nei_pos.distance(end) * filter.area_cost(self.polys[nei].area);
                }
                let heuristic = nei_pos.distance(end) * H_SCALE;
                let total = cost + heuristic;

                if let Some(existing) = nodes.get(&nei) {
                    if existing.closed || existing.total <= total {
                        continue;
                    }
                }
                nodes.insert(
                    nei,
                    SearchNode {
                        pos: nei_pos,
                        cost,
                        total,
                        parent: Some(idx),
                        closed: false,
                    },
                );
                open.push(OpenEntry { total, idx: nei });

                if heuristic < best_h {
                    best_h = heuristic;
                    best_idx = nei;
                }
            }
        }

        let mut path = self.path_to(&nodes, best_idx);
        let truncated = path.len() > max_path;
        path.truncate(max_path);
        Ok(PathResult {
            path,
            partial: !reached || truncated,
            iterations,
        })
    }

    fn find_local_neighbourhood(
        &self,
        start_ref: PolyRef,
        center: Vec3,
        radius: f32,
        filter: &QueryFilter,
        max_result: usize,
    ) -> Result<Vec<PolyRef>> {
        let start_idx = self.decode_filtered(start_ref, filter)?;
        let radius_sqr = sqr(radius);
        let mut found = vec![start_idx];
        let mut queue = VecDeque::from([start_idx]);

        while let Some(idx) = queue.pop_front() {
            let poly = &self.polys[idx];
            if !poly.is_ground() {
                continue;
            }
            for (j, nei) in poly.edge_neis.iter().enumerate() {
                let Some(n) = nei.filter(|&n| self.passes(n, filter)) else {
                    continue;
                };
                if found.contains(&n) {
                    continue;
                }
                let (va, vb) = poly.edge(j);
                if dist_point_segment_sqr_2d(center, va, vb).0 > radius_sqr {
                    continue;
                }
                if found.len() >= max_result {
                    break;
                }
                found.push(n);
                queue.push_back(n);
            }
        }

        found.truncate(max_result.max(1));
        Ok(found.into_iter().map(|i| self.ref_of(i)).collect())
    }

    fn poly_wall_segments(
        &self,
        poly_ref: PolyRef,
        filter: &QueryFilter,
        max_segments: usize,
    ) -> Result<Vec<WallSegment>> {
        let (idx, poly) = self
            .decode(poly_ref)
            .ok_or(Error::InvalidPolyRef(poly_ref.id()))?;
        if !poly.is_ground() {
            return Ok(Vec::new());
        }
        let mut walls = Vec::new();
        for (j, nei) in poly.edge_neis.iter().enumerate() {
            if walls.len() >= max_segments {
                break;
            }
            let neighbour = match *nei {
                Some(n) if self.passes(n, filter) => continue,
                Some(n) => self.ref_of(n),
                None => PolyRef::NULL,
            };
            let (start, end) = poly.edge(j);
            walls.push(WallSegment {
                start,
                end,
                poly: self.ref_of(idx),
                neighbour,
            });
        }
        Ok(walls)
    }

    fn off_mesh_connection_end_points(
        &self,
        prev_ref: PolyRef,
        con_ref: PolyRef,
    ) -> Result<(Vec3, Vec3)> {
        let (_, poly) = self
            .decode(con_ref)
            .ok_or(Error::InvalidPolyRef(con_ref.id()))?;
        let PolyKind::OffMeshConnection {
            bidirectional,
            end_poly,
            ..
        } = poly.kind
        else {
            return Err(Error::InvalidParam(format!(
                "{con_ref} is not an off-mesh connection"
            )));
        };
        let prev_idx = self.decode(prev_ref).map(|(i, _)| i);
        if bidirectional && prev_idx.is_some() && prev_idx == end_poly {
            Ok((poly.verts[1], poly.verts[0]))
        } else {
            Ok((poly.verts[0], poly.verts[1]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{
        create_gap_navmesh, create_l_shaped_navmesh, create_strip_navmesh, rect,
    };

    #[test]
    fn test_refs_invalidate_on_remove() -> Result<()> {
        let mut mesh = create_strip_navmesh(2, 2.0)?;
        let filter = QueryFilter::new();
        let r = mesh.poly_ref(0)?;
        assert!(mesh.is_valid_poly_ref(r, &filter));

        mesh.remove_polygon(r)?;
        assert!(!mesh.is_valid_poly_ref(r, &filter));
        assert!(mesh.poly_ref(0).is_err());

        let restored = mesh.restore_polygon(0)?;
        assert_ne!(restored, r);
        assert!(mesh.is_valid_poly_ref(restored, &filter));
        assert!(!mesh.is_valid_poly_ref(r, &filter));
        Ok(())
    }

    #[test]
    fn test_find_nearest_poly() -> Result<()> {
        let mesh = create_strip_navmesh(3, 2.0)?;
        let filter = QueryFilter::new();
        let (r, pos) = mesh
            .find_nearest_poly(Vec3::new(3.0, 0.5, 1.0), Vec3::new(1.0, 1.0, 1.0), &filter)
            .unwrap();
        assert_eq!(r, mesh.poly_ref(1)?);
        assert_eq!(pos, Vec3::new(3.0, 0.0, 1.0));

        assert!(mesh
            .find_nearest_poly(Vec3::new(30.0, 0.0, 30.0), Vec3::ONE, &filter)
            .is_none());
        Ok(())
    }

    #[test]
    fn test_path_and_straight_path_around_corner() -> Result<()> {
        let mesh = create_l_shaped_navmesh()?;
        let filter = QueryFilter::new();
        let start = Vec3::new(0.5, 0.0, 0.5);
        let end = Vec3::new(1.2, 0.0, 1.8);
        let start_ref = mesh.poly_ref(0)?;
        let end_ref = mesh.poly_ref(2)?;

        let result = mesh.find_path(start_ref, end_ref, start, end, &filter, 32)?;
        assert!(!result.partial);
        assert_eq!(result.path.len(), 3);

        let corners = mesh.find_straight_path(start, end, &result.path, 8)?;
        assert_eq!(corners.len(), 3);
        assert!(corners[0].flags.contains(StraightPathFlags::START));
        assert!(corners[1].pos.distance(Vec3::new(1.0, 0.0, 1.0)) < 1e-4);
        assert_eq!(corners[1].poly, end_ref);
        assert!(corners[2].flags.contains(StraightPathFlags::END));
        assert!(corners[2].pos.distance(end) < 1e-4);
        Ok(())
    }

    #[test]
    fn test_bounded_search_returns_partial_path() -> Result<()> {
        let mesh = create_strip_navmesh(10, 1.0)?;
        let filter = QueryFilter::new();
        let result = mesh.find_path_bounded(
            mesh.poly_ref(0)?,
            mesh.poly_ref(9)?,
            Vec3::new(0.5, 0.0, 0.5),
            Vec3::new(9.5, 0.0, 0.5),
            &filter,
            3,
            32,
        )?;
        assert!(result.partial);
        assert!(result.path.len() > 1 && result.path.len() < 10);
        assert_eq!(result.path[0], mesh.poly_ref(0)?);
        Ok(())
    }

    #[test]
    fn test_raycast_hits_wall() -> Result<()> {
        let mesh = create_strip_navmesh(2, 2.0)?;
        let filter = QueryFilter::new();
        let start = Vec3::new(1.0, 0.0, 1.0);

        let clear = mesh.raycast(mesh.poly_ref(0)?, start, Vec3::new(3.0, 0.0, 1.0), &filter, 8)?;
        assert!(clear.reached_end());
        assert_eq!(clear.path.len(), 2);

        let blocked = mesh.raycast(mesh.poly_ref(0)?, start, Vec3::new(1.0, 0.0, 5.0), &filter, 8)?;
        assert!(!blocked.reached_end());
        assert!((blocked.t - 0.25).abs() < 1e-4);
        assert_eq!(blocked.path.len(), 1);
        Ok(())
    }

    #[test]
    fn test_move_along_surface_slides_on_wall() -> Result<()> {
        let mesh = create_strip_navmesh(2, 2.0)?;
        let filter = QueryFilter::new();
        let moved = mesh.move_along_surface(
            mesh.poly_ref(0)?,
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(3.0, 0.0, 3.0),
            &filter,
            16,
        )?;
        assert!((moved.pos.z - 2.0).abs() < 1e-5);
        assert!((moved.pos.x - 3.0).abs() < 1e-5);
        assert_eq!(moved.visited.last(), Some(&mesh.poly_ref(1)?));
        Ok(())
    }

    #[test]
    fn test_walls_and_neighbourhood() -> Result<()> {
        let mesh = create_strip_navmesh(3, 2.0)?;
        let filter = QueryFilter::new();
        let walls = mesh.poly_wall_segments(mesh.poly_ref(1)?, &filter, 16)?;
        // Middle square only has its two long sides as walls.
        assert_eq!(walls.len(), 2);

        let hood = mesh.find_walls_in_neighbourhood(
            mesh.poly_ref(1)?,
            Vec3::new(3.0, 0.0, 1.0),
            1.5,
            &filter,
            16,
            32,
        )?;
        assert_eq!(hood.polys.len(), 3);
        assert!(hood.walls.iter().all(|w| w.neighbour == PolyRef::NULL));
        assert!(!hood.walls.is_empty());
        Ok(())
    }

    #[test]
    fn test_off_mesh_connection_in_straight_path() -> Result<()> {
        let (mesh, link) = create_gap_navmesh()?;
        let filter = QueryFilter::new();
        let start = Vec3::new(1.0, 0.0, 2.0);
        let end = Vec3::new(11.0, 0.0, 2.0);
        let result = mesh.find_path(mesh.poly_ref(0)?, mesh.poly_ref(1)?, start, end, &filter, 16)?;
        assert_eq!(result.path, vec![mesh.poly_ref(0)?, link, mesh.poly_ref(1)?]);

        let corners = mesh.find_straight_path(start, end, &result.path, 8)?;
        let offmesh = corners
            .iter()
            .find(|c| c.flags.contains(StraightPathFlags::OFFMESH_CONNECTION))
            .unwrap();
        assert_eq!(offmesh.poly, link);
        assert!(offmesh.pos.distance(Vec3::new(3.0, 0.0, 2.0)) < 1e-5);

        let (s, e) = mesh.off_mesh_connection_end_points(mesh.poly_ref(0)?, link)?;
        assert_eq!(s, Vec3::new(3.0, 0.0, 2.0));
        assert_eq!(e, Vec3::new(9.0, 0.0, 2.0));
        assert!(mesh.is_off_mesh_connection(link));
        Ok(())
    }

    #[test]
    fn test_winding_is_normalized() -> Result<()> {
        let mut mesh = SimpleNavMesh::new();
        let mut verts = rect(0.0, 0.0, 1.0, 1.0).to_vec();
        verts.reverse();
        let r = mesh.add_polygon(&verts, PolyFlags::WALK, 0)?;
        let h = mesh.poly_height(r, Vec3::new(0.5, 3.0, 0.5));
        assert_eq!(h, Some(0.0));
        assert!(mesh.add_polygon(&verts[..2], PolyFlags::WALK, 0).is_err());
        Ok(())
    }
}
