//! Common types shared by the detour crates
//!
//! Holds the error type used across the workspace and the planar (XZ) geometry
//! helpers that both the navigation mesh and the crowd simulation rely on.

mod geometry;

pub use geometry::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid polygon reference: {0:#x}")]
    InvalidPolyRef(u32),

    #[error("no polygon found near ({x}, {y}, {z})")]
    NoNearbyPolygon { x: f32, y: f32, z: f32 },

    #[error("pathfinding failed: {0}")]
    Pathfinding(String),

    #[error("capacity exhausted: {0}")]
    CapacityExhausted(&'static str),

    #[error("invalid agent index {0}")]
    InvalidAgent(usize),

    #[error("detour error: {0}")]
    Detour(String),
}

impl Error {
    /// Builds a [`Error::NoNearbyPolygon`] for the given position
    pub fn no_nearby_polygon(pos: Vec3) -> Self {
        Error::NoNearbyPolygon {
            x: pos.x,
            y: pos.y,
            z: pos.z,
        }
    }
}

/// Result type for navigation operations
pub type Result<T> = std::result::Result<T, Error>;
