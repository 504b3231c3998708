//! Multi-agent crowd simulation on navigation meshes
//!
//! This crate moves groups of agents over any mesh implementing
//! [`detour::NavMeshQuery`]. Each agent follows a path corridor, steers around its
//! neighbours and nearby walls, and can traverse off-mesh connections.
//!
//! # Example
//!
//! ```rust
//! use detour::test_mesh_helpers::create_flat_navmesh;
//! use detour_crowd::{AgentParams, Crowd, CrowdConfig};
//! use nav_common::Vec3;
//!
//! # fn main() -> nav_common::Result<()> {
//! let mesh = create_flat_navmesh(20.0, 20.0)?;
//! let target_poly = mesh.poly_ref(0)?;
//! let mut crowd = Crowd::new(CrowdConfig::new(16, 0.6), mesh)?;
//!
//! let agent = crowd.add_agent(Vec3::new(2.0, 0.0, 2.0), AgentParams::default())?;
//! crowd.request_move_target(agent, target_poly, Vec3::new(12.0, 0.0, 2.0))?;
//!
//! for _ in 0..10 {
//!     crowd.update(0.1, None);
//! }
//! assert!(crowd.get_agent(agent).unwrap().get_pos().x > 2.0);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`Crowd`]: agent pool and the per-frame update
//! - [`PathCorridor`]: the polygon path an agent follows
//! - [`DtLocalBoundary`] and [`DtSharedBoundary`]: nearby walls, optionally
//!   shared between agents
//! - [`DtObstacleAvoidanceQuery`]: sampling based velocity planning
//! - [`ProximityGrid`]: spatial hash for neighbour queries

pub mod bounded_list;
pub mod crowd;
pub mod crowd_agent;
pub mod local_boundary;
pub mod obstacle_avoidance;
pub mod path_corridor;
pub mod proximity_grid;
pub mod shared_boundary;

pub use bounded_list::*;
pub use crowd::*;
pub use crowd_agent::*;
pub use local_boundary::*;
pub use obstacle_avoidance::*;
pub use path_corridor::*;
pub use proximity_grid::*;
pub use shared_boundary::*;

#[cfg(test)]
mod crowd_scenario_tests;
