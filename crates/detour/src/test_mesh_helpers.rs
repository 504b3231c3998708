//! Navigation mesh fixtures shared by tests
//!
//! Compiled for this crate's tests and, with the `test-utils` feature, for
//! downstream test suites. Every mesh is flat at `y = 0` and uses
//! [`PolyFlags::WALK`] with the default area.

use crate::{PolyFlags, PolyRef, SimpleNavMesh, DEFAULT_AREA};
use nav_common::{Result, Vec3};

/// Corners of the axis aligned rectangle `[x0, x1] x [z0, z1]` in navmesh winding
pub fn rect(x0: f32, z0: f32, x1: f32, z1: f32) -> [Vec3; 4] {
    [
        Vec3::new(x0, 0.0, z0),
        Vec3::new(x0, 0.0, z1),
        Vec3::new(x1, 0.0, z1),
        Vec3::new(x1, 0.0, z0),
    ]
}

/// Creates a single rectangular polygon covering `[0, width] x [0, depth]`
pub fn create_flat_navmesh(width: f32, depth: f32) -> Result<SimpleNavMesh> {
    let mut mesh = SimpleNavMesh::new();
    mesh.add_polygon(&rect(0.0, 0.0, width, depth), PolyFlags::WALK, DEFAULT_AREA)?;
    Ok(mesh)
}

/// Creates `count` square polygons of side `cell_size` in a row along +X.
///
/// Polygon `i` covers `[i * cell_size, (i + 1) * cell_size] x [0, cell_size]`.
pub fn create_strip_navmesh(count: usize, cell_size: f32) -> Result<SimpleNavMesh> {
    let mut mesh = SimpleNavMesh::new();
    for i in 0..count {
        let x0 = i as f32 * cell_size;
        mesh.add_polygon(
            &rect(x0, 0.0, x0 + cell_size, cell_size),
            PolyFlags::WALK,
            DEFAULT_AREA,
        )?;
    }
    Ok(mesh)
}

/// Creates a corridor `length` long and `width` wide along +X, split into square cells
pub fn create_corridor_navmesh(length: f32, width: f32) -> Result<SimpleNavMesh> {
    let cells = (length / width).ceil().max(1.0) as usize;
    let mut mesh = SimpleNavMesh::new();
    for i in 0..cells {
        let x0 = i as f32 * width;
        let x1 = (x0 + width).min(length);
        mesh.add_polygon(&rect(x0, 0.0, x1, width), PolyFlags::WALK, DEFAULT_AREA)?;
    }
    Ok(mesh)
}

/// Creates three unit squares forming an L: `[0,1]x[0,1]`, `[1,2]x[0,1]` and `[1,2]x[1,2]`
pub fn create_l_shaped_navmesh() -> Result<SimpleNavMesh> {
    let mut mesh = SimpleNavMesh::new();
    mesh.add_polygon(&rect(0.0, 0.0, 1.0, 1.0), PolyFlags::WALK, DEFAULT_AREA)?;
    mesh.add_polygon(&rect(1.0, 0.0, 2.0, 1.0), PolyFlags::WALK, DEFAULT_AREA)?;
    mesh.add_polygon(&rect(1.0, 1.0, 2.0, 2.0), PolyFlags::WALK, DEFAULT_AREA)?;
    Ok(mesh)
}

/// Creates two 4x4 platforms separated by a gap and joined by a one-way off-mesh
/// connection from `(3, 0, 2)` to `(9, 0, 2)`.
///
/// Returns the mesh and the connection reference. Platform polygons are indices 0 and 1.
pub fn create_gap_navmesh() -> Result<(SimpleNavMesh, PolyRef)> {
    let mut mesh = SimpleNavMesh::new();
    mesh.add_polygon(&rect(0.0, 0.0, 4.0, 4.0), PolyFlags::WALK, DEFAULT_AREA)?;
    mesh.add_polygon(&rect(8.0, 0.0, 12.0, 4.0), PolyFlags::WALK, DEFAULT_AREA)?;
    let link = mesh.add_off_mesh_connection(
        Vec3::new(3.0, 0.0, 2.0),
        Vec3::new(9.0, 0.0, 2.0),
        0.5,
        false,
        PolyFlags::JUMP,
        DEFAULT_AREA,
    )?;
    Ok((mesh, link))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NavMeshQuery, QueryFilter};

    #[test]
    fn test_strip_polygons_are_connected() -> Result<()> {
        let mesh = create_strip_navmesh(3, 1.0)?;
        let filter = QueryFilter::new();
        let result = mesh.find_path(
            mesh.poly_ref(0)?,
            mesh.poly_ref(2)?,
            Vec3::new(0.5, 0.0, 0.5),
            Vec3::new(2.5, 0.0, 0.5),
            &filter,
            8,
        )?;
        assert_eq!(result.path.len(), 3);
        assert!(!result.partial);
        Ok(())
    }

    #[test]
    fn test_corridor_covers_length() -> Result<()> {
        let mesh = create_corridor_navmesh(20.0, 4.0)?;
        assert_eq!(mesh.poly_count(), 5);
        let filter = QueryFilter::new();
        let found = mesh.find_nearest_poly(Vec3::new(19.5, 0.0, 2.0), Vec3::ONE, &filter);
        assert_eq!(found.map(|(r, _)| r), Some(mesh.poly_ref(4)?));
        Ok(())
    }
}
