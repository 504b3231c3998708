//! 2D geometry operations on the XZ plane (Y-up coordinate system).
//!
//! Polygons follow the detour winding: [`tri_area_2d`] is positive for
//! consecutive vertices of a well formed polygon.

use glam::Vec3;

/// Returns the square of the value
#[inline]
pub fn sqr(x: f32) -> f32 {
    x * x
}

/// Calculate twice the signed area of a triangle on the XZ plane.
///
/// The sign indicates the winding order:
/// - Positive: clockwise (when looking down Y axis)
/// - Negative: counter-clockwise (when looking down Y axis)
/// - Zero: degenerate (collinear points)
#[inline]
pub fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

/// Dot product on the XZ plane
#[inline]
pub fn dot_2d(u: Vec3, v: Vec3) -> f32 {
    u.x * v.x + u.z * v.z
}

/// Perp-dot product on the XZ plane (`u.z * v.x - u.x * v.z`)
#[inline]
pub fn perp_2d(u: Vec3, v: Vec3) -> f32 {
    u.z * v.x - u.x * v.z
}

/// Squared distance between two points on the XZ plane
#[inline]
pub fn dist_sqr_2d(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    dx * dx + dz * dz
}

/// Distance between two points on the XZ plane
#[inline]
pub fn dist_2d(a: Vec3, b: Vec3) -> f32 {
    dist_sqr_2d(a, b).sqrt()
}

/// Length of a vector projected on the XZ plane
#[inline]
pub fn len_2d(v: Vec3) -> f32 {
    (v.x * v.x + v.z * v.z).sqrt()
}

/// Projects `v` on the XZ plane and normalizes it. Zero length vectors stay zero.
#[inline]
pub fn normalize_2d(v: Vec3) -> Vec3 {
    let d = len_2d(v);
    if d < 1e-6 {
        return Vec3::ZERO;
    }
    Vec3::new(v.x / d, 0.0, v.z / d)
}

/// Returns true when two points are equal within a small tolerance
#[inline]
pub fn vequal(a: Vec3, b: Vec3) -> bool {
    const THR: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);
    a.distance_squared(b) < THR
}

/// Squared distance from a point to a segment on the XZ plane, along with the
/// parametric position of the closest point on the segment.
pub fn dist_point_segment_sqr_2d(p: Vec3, a: Vec3, b: Vec3) -> (f32, f32) {
    let pqx = b.x - a.x;
    let pqz = b.z - a.z;
    let dx = p.x - a.x;
    let dz = p.z - a.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = a.x + t * pqx - p.x;
    let dz = a.z + t * pqz - p.z;
    (dx * dx + dz * dz, t)
}

/// Checks if a point is inside a polygon on the XZ plane (crossing test).
pub fn point_in_polygon_2d(p: Vec3, verts: &[Vec3]) -> bool {
    let mut inside = false;
    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > p.z) != (vj.z > p.z))
            && (p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Intersects two segments on the XZ plane.
///
/// Returns the parametric positions `(s, t)` along `ap -> aq` and `bp -> bq`
/// of the intersection of the supporting lines, or `None` when they are parallel.
pub fn intersect_segments_2d(ap: Vec3, aq: Vec3, bp: Vec3, bq: Vec3) -> Option<(f32, f32)> {
    let u = aq - ap;
    let v = bq - bp;
    let w = ap - bp;
    let d = u.x * v.z - u.z * v.x;
    if d.abs() < 1e-6 {
        return None;
    }
    let s = (v.x * w.z - v.z * w.x) / d;
    let t = (u.x * w.z - u.z * w.x) / d;
    Some((s, t))
}

/// Result of clipping a segment against a convex polygon
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPolyIntersection {
    /// Normalized distance along the segment where it enters the polygon
    pub tmin: f32,
    /// Normalized distance along the segment where it exits the polygon
    pub tmax: f32,
    /// Index of the edge where the segment enters, if it starts outside
    pub seg_min: Option<usize>,
    /// Index of the edge where the segment exits, if it ends outside
    pub seg_max: Option<usize>,
}

/// Clips segment `p0 -> p1` against a convex polygon on the XZ plane.
///
/// Edge `j` runs from `verts[j]` to `verts[j + 1]`.
pub fn intersect_segment_poly_2d(
    p0: Vec3,
    p1: Vec3,
    verts: &[Vec3],
) -> Option<SegmentPolyIntersection> {
    const EPS: f32 = 0.000001;

    let mut res = SegmentPolyIntersection {
        tmin: 0.0,
        tmax: 1.0,
        seg_min: None,
        seg_max: None,
    };
    let dir = p1 - p0;
    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let edge = verts[i] - verts[j];
        let diff = p0 - verts[j];
        let num = perp_2d(edge, diff);
        let den = perp_2d(dir, edge);
        if den.abs() < EPS {
            // Parallel to this edge: either fully outside or irrelevant.
            if num < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = num / den;
        if den < 0.0 {
            if t > res.tmin {
                res.tmin = t;
                res.seg_min = Some(j);
                if res.tmin > res.tmax {
                    return None;
                }
            }
        } else if t < res.tmax {
            res.tmax = t;
            res.seg_max = Some(j);
            if res.tmax < res.tmin {
                return None;
            }
        }
        j = i;
    }
    Some(res)
}

/// Height of the triangle `abc` under `p`, if `p` projects inside it.
pub fn closest_height_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let mut denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }
    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }
    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a.y + (v0.y * u + v1.y * v) / denom)
    } else {
        None
    }
}

/// Signed area of a polygon on the XZ plane (positive for detour winding).
pub fn poly_area_2d(verts: &[Vec3]) -> f32 {
    let mut area = 0.0;
    for i in 2..verts.len() {
        area += tri_area_2d(verts[0], verts[i - 1], verts[i]);
    }
    area * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn test_tri_area_winding() {
        let v = square();
        assert!(tri_area_2d(v[0], v[1], v[2]) > 0.0);
        assert!(tri_area_2d(v[0], v[2], v[1]) < 0.0);
        assert!(poly_area_2d(&v) > 0.0);
    }

    #[test]
    fn test_dist_point_segment() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 5.0, 0.0);
        let (d, t) = dist_point_segment_sqr_2d(Vec3::new(1.0, 0.0, 1.0), a, b);
        assert!((d - 1.0).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);

        let (d, t) = dist_point_segment_sqr_2d(Vec3::new(-1.0, 0.0, 0.0), a, b);
        assert!((d - 1.0).abs() < 1e-6);
        assert_eq!(t, 0.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let v = square();
        assert!(point_in_polygon_2d(Vec3::new(0.5, 3.0, 0.5), &v));
        assert!(!point_in_polygon_2d(Vec3::new(1.5, 0.0, 0.5), &v));
    }

    #[test]
    fn test_segment_poly_clip() {
        let v = square();
        let hit =
            intersect_segment_poly_2d(Vec3::new(0.5, 0.0, 0.5), Vec3::new(2.5, 0.0, 0.5), &v)
                .unwrap();
        assert_eq!(hit.tmin, 0.0);
        assert!((hit.tmax - 0.25).abs() < 1e-5);
        assert!(hit.seg_min.is_none());
        // Exit through the x = 1 edge, which runs from vertex 2 to vertex 3.
        assert_eq!(hit.seg_max, Some(2));

        assert!(intersect_segment_poly_2d(
            Vec3::new(2.0, 0.0, 2.0),
            Vec3::new(3.0, 0.0, 3.0),
            &v
        )
        .is_none());
    }

    #[test]
    fn test_height_on_slope() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 0.0, 2.0);
        let c = Vec3::new(2.0, 2.0, 0.0);
        let h = closest_height_point_triangle(Vec3::new(1.0, 10.0, 0.5), a, b, c).unwrap();
        assert!((h - 1.0).abs() < 1e-5);
        assert!(closest_height_point_triangle(Vec3::new(5.0, 0.0, 5.0), a, b, c).is_none());
    }

    #[test]
    fn test_segment_intersection() {
        let (s, t) = intersect_segments_2d(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, 1.0),
        )
        .unwrap();
        assert!((s - 0.5).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
    }
}
