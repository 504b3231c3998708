//! Per-agent state of the crowd
//!
//! A [`CrowdAgent`] is owned by the [`Crowd`](crate::Crowd) pool and only
//! mutated by it. Everything here is readable through getters so tools and tests
//! can inspect the simulation without reaching into the update phases.

use bitflags::bitflags;
use detour::{PathQueueRef, PolyRef, QueryFilter, StraightPathPoint};
use nav_common::{Error, Result, Vec3};

use crate::{BoundedList, DtLocalBoundary, PathCorridor};

/// The maximum number of neighbors that a crowd agent can take into account
/// for steering decisions.
pub const DT_CROWDAGENT_MAX_NEIGHBOURS: usize = 6;

/// The maximum number of corners a crowd agent will look ahead in the path.
/// This value is used for sizing the crowd agent corner buffers.
/// Due to the behavior of the crowd manager, the actual number of useful
/// corners will be one less than this number.
pub const DT_CROWDAGENT_MAX_CORNERS: usize = 4;

/// The maximum number of crowd avoidance configurations supported by the
/// crowd manager.
pub const DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS: usize = 8;

/// The maximum number of query filter types supported by the crowd manager.
pub const DT_CROWD_MAX_QUERY_FILTER_TYPE: usize = 16;

/// Default radius of an agent
pub const DEFAULT_AGENT_RADIUS: f32 = 0.6;

/// Default height of an agent
pub const DEFAULT_AGENT_HEIGHT: f32 = 2.0;

/// Default max acceleration of an agent
pub const DEFAULT_AGENT_MAX_ACCELERATION: f32 = 8.0;

/// Default max speed of an agent
pub const DEFAULT_AGENT_MAX_SPEED: f32 = 3.5;

/// The type of navigation mesh polygon the agent is currently traversing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum CrowdAgentState {
    /// The agent is not on the navigation mesh.
    #[default]
    Invalid,
    /// The agent is traversing a normal navigation mesh polygon.
    Walking,
    /// The agent is traversing an off-mesh connection.
    OffMesh,
    /// The agent is parked at the start of an off-mesh connection until the
    /// owner confirms the traversal.
    Waiting,
}

/// Move request state for agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum MoveRequestState {
    #[default]
    None,
    Failed,
    Valid,
    Requesting,
    WaitingForQueue,
    WaitingForPath,
    Velocity,
}

bitflags! {
    /// Crowd agent update flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(
        feature = "serialization",
        derive(serde::Serialize, serde::Deserialize)
    )]
    pub struct UpdateFlags: u8 {
        /// Steer towards a blend of the next two corners
        const ANTICIPATE_TURNS = 0x01;
        const OBSTACLE_AVOIDANCE = 0x02;
        const SEPARATION = 0x04;
        /// Use visibility raycasts to shortcut the corridor start
        const OPTIMIZE_VIS = 0x08;
        /// Periodically replan the corridor with a small local search
        const OPTIMIZE_TOPO = 0x10;
        /// Try every visible corner, farthest first, when shortcutting
        const OPTIMIZE_VIS_MULTI = 0x20;
        /// Scale the speed down when the last corner is the goal
        const SLOWDOWN_AT_GOAL = 0x40;
    }
}

impl Default for UpdateFlags {
    fn default() -> Self {
        UpdateFlags::ANTICIPATE_TURNS
            | UpdateFlags::OBSTACLE_AVOIDANCE
            | UpdateFlags::SEPARATION
            | UpdateFlags::SLOWDOWN_AT_GOAL
    }
}

/// Configuration parameters for a crowd agent.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct AgentParams {
    /// Agent radius [Limit: >= 0]
    pub radius: f32,
    /// Agent height [Limit: > 0]
    pub height: f32,
    /// Maximum allowed acceleration [Limit: >= 0]
    pub max_acceleration: f32,
    /// Maximum allowed speed [Limit: >= 0]
    pub max_speed: f32,
    /// Defines how close a collision element must be before it is considered
    /// for steering behaviors.
    pub collision_query_range: f32,
    /// The path visibility optimization range.
    pub path_optimization_range: f32,
    /// How aggressive the agent manager should be at avoiding collisions with
    /// this agent.
    pub separation_weight: f32,
    /// Scale applied to the radius handed to the avoidance sampler
    pub avoidance_query_multiplier: f32,
    /// Group bits of this agent
    pub avoidance_group: u32,
    /// Neighbours are only considered when they share one of these group bits
    pub groups_to_avoid: u32,
    /// Neighbours in any of these groups are never considered
    pub groups_to_ignore: u32,
    pub update_flags: UpdateFlags,
    /// Index of the avoidance configuration to use
    /// [Limit: < DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS]
    pub obstacle_avoidance_type: u8,
    /// Index of the query filter to use [Limit: < DT_CROWD_MAX_QUERY_FILTER_TYPE]
    pub query_filter_type: u8,
    /// Off-mesh connections whose polygon this filter rejects are not entered
    pub link_filter: Option<QueryFilter>,
    /// User defined data attached to the agent.
    pub user_data: Option<usize>,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            radius: DEFAULT_AGENT_RADIUS,
            height: DEFAULT_AGENT_HEIGHT,
            max_acceleration: DEFAULT_AGENT_MAX_ACCELERATION,
            max_speed: DEFAULT_AGENT_MAX_SPEED,
            collision_query_range: DEFAULT_AGENT_RADIUS * 12.0,
            path_optimization_range: DEFAULT_AGENT_RADIUS * 30.0,
            separation_weight: 2.0,
            avoidance_query_multiplier: 1.0,
            avoidance_group: 1,
            groups_to_avoid: u32::MAX,
            groups_to_ignore: 0,
            update_flags: UpdateFlags::default(),
            obstacle_avoidance_type: 3,
            query_filter_type: 0,
            link_filter: None,
            user_data: None,
        }
    }
}

impl AgentParams {
    /// Creates parameters for an agent of the given size, scaling the query
    /// ranges with the radius.
    pub fn new(radius: f32, height: f32) -> Self {
        Self {
            radius,
            height,
            collision_query_range: radius * 12.0,
            path_optimization_range: radius * 30.0,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let finite = [
            self.radius,
            self.height,
            self.max_acceleration,
            self.max_speed,
            self.collision_query_range,
            self.path_optimization_range,
            self.separation_weight,
            self.avoidance_query_multiplier,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(Error::InvalidParam(
                "agent parameters must be finite".to_string(),
            ));
        }
        if self.radius < 0.0 || self.height <= 0.0 {
            return Err(Error::InvalidParam(format!(
                "invalid agent size: radius {} height {}",
                self.radius, self.height
            )));
        }
        if self.max_speed < 0.0 || self.max_acceleration < 0.0 {
            return Err(Error::InvalidParam(
                "agent speed and acceleration must not be negative".to_string(),
            ));
        }
        if self.obstacle_avoidance_type as usize >= DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS {
            return Err(Error::InvalidParam(format!(
                "obstacle avoidance type {} out of range",
                self.obstacle_avoidance_type
            )));
        }
        if self.query_filter_type as usize >= DT_CROWD_MAX_QUERY_FILTER_TYPE {
            return Err(Error::InvalidParam(format!(
                "query filter type {} out of range",
                self.query_filter_type
            )));
        }
        Ok(())
    }
}

/// A neighbour of a crowd agent, sorted by distance
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CrowdNeighbour {
    /// Index of the neighbour in the crowd
    pub idx: usize,
    /// Squared 2D distance between the agents
    pub dist: f32,
}

/// Progress of an agent through an off-mesh connection
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CrowdAgentAnimation {
    pub active: bool,
    /// Position when the traversal started
    pub init_pos: Vec3,
    pub start_pos: Vec3,
    pub end_pos: Vec3,
    /// The off-mesh connection polygon
    pub poly_ref: PolyRef,
    pub t: f32,
    pub tmax: f32,
}

/// Represents an agent managed by a crowd
#[derive(Debug, Clone)]
pub struct CrowdAgent {
    pub(crate) idx: usize,
    pub(crate) active: bool,
    pub(crate) state: CrowdAgentState,
    /// True if the last full path result did not reach the target
    pub(crate) partial: bool,
    pub(crate) corridor: PathCorridor,
    pub(crate) boundary: DtLocalBoundary,
    pub(crate) topology_opt_time: f32,
    pub(crate) neis: BoundedList<CrowdNeighbour, DT_CROWDAGENT_MAX_NEIGHBOURS>,
    pub(crate) desired_speed: f32,
    pub(crate) npos: Vec3,
    /// Collision resolution displacement of the current iteration
    pub(crate) disp: Vec3,
    /// Desired velocity from steering
    pub(crate) dvel: Vec3,
    /// Velocity chosen by obstacle avoidance
    pub(crate) nvel: Vec3,
    pub(crate) vel: Vec3,
    pub(crate) params: AgentParams,
    pub(crate) corners: BoundedList<StraightPathPoint, DT_CROWDAGENT_MAX_CORNERS>,
    pub(crate) target_state: MoveRequestState,
    pub(crate) target_ref: PolyRef,
    /// Target position, or the requested velocity in velocity mode
    pub(crate) target_pos: Vec3,
    pub(crate) target_pathq_ref: Option<PathQueueRef>,
    pub(crate) target_replan: bool,
    pub(crate) target_replan_time: f32,
}

impl CrowdAgent {
    pub(crate) fn new(idx: usize) -> Self {
        Self {
            idx,
            active: false,
            state: CrowdAgentState::Invalid,
            partial: false,
            corridor: PathCorridor::new(),
            boundary: DtLocalBoundary::new(),
            topology_opt_time: 0.0,
            neis: BoundedList::new(),
            desired_speed: 0.0,
            npos: Vec3::ZERO,
            disp: Vec3::ZERO,
            dvel: Vec3::ZERO,
            nvel: Vec3::ZERO,
            vel: Vec3::ZERO,
            params: AgentParams::default(),
            corners: BoundedList::new(),
            target_state: MoveRequestState::None,
            target_ref: PolyRef::NULL,
            target_pos: Vec3::ZERO,
            target_pathq_ref: None,
            target_replan: false,
            target_replan_time: 0.0,
        }
    }

    /// Places the agent on `poly_ref` with all motion and requests cleared
    pub(crate) fn place(&mut self, poly_ref: PolyRef, pos: Vec3, params: AgentParams) {
        self.corridor.reset(poly_ref, pos);
        self.boundary.reset();
        self.partial = false;
        self.topology_opt_time = 0.0;
        self.target_replan_time = 0.0;
        self.neis.clear();
        self.corners.clear();
        self.dvel = Vec3::ZERO;
        self.nvel = Vec3::ZERO;
        self.vel = Vec3::ZERO;
        self.disp = Vec3::ZERO;
        self.npos = pos;
        self.desired_speed = 0.0;
        self.params = params;
        self.state = CrowdAgentState::Walking;
        self.target_state = MoveRequestState::None;
        self.target_ref = PolyRef::NULL;
        self.target_pos = Vec3::ZERO;
        self.target_pathq_ref = None;
        self.target_replan = false;
        self.active = true;
    }

    pub(crate) fn request_move_target(&mut self, poly_ref: PolyRef, pos: Vec3, replan: bool) {
        self.target_ref = poly_ref;
        self.target_pos = pos;
        self.target_pathq_ref = None;
        self.target_replan = replan;
        self.target_state = if poly_ref.is_valid() {
            MoveRequestState::Requesting
        } else {
            MoveRequestState::Failed
        };
    }

    /// True when the agent follows a path target rather than a velocity
    pub(crate) fn has_path_target(&self) -> bool {
        !matches!(
            self.target_state,
            MoveRequestState::None | MoveRequestState::Velocity
        )
    }

    /// Fake dynamic constraint followed by explicit integration
    pub(crate) fn integrate(&mut self, dt: f32) {
        let max_delta = self.params.max_acceleration * dt;
        let mut dv = self.nvel - self.vel;
        let ds = dv.length();
        if ds > max_delta {
            dv *= max_delta / ds;
        }
        self.vel += dv;

        if self.vel.length() > 0.0001 {
            self.npos += self.vel * dt;
        } else {
            self.vel = Vec3::ZERO;
        }
    }

    /// Gets the agent's index in the crowd.
    pub fn get_idx(&self) -> usize {
        self.idx
    }

    /// True if the agent is active, false if the slot is free.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Gets the agent's state.
    pub fn get_state(&self) -> CrowdAgentState {
        self.state
    }

    /// Gets the agent's move request state.
    pub fn get_target_state(&self) -> MoveRequestState {
        self.target_state
    }

    /// Gets the agent's target polygon.
    pub fn get_target_ref(&self) -> PolyRef {
        self.target_ref
    }

    /// Gets the agent's target position, or the requested velocity in velocity mode.
    pub fn get_target_pos(&self) -> Vec3 {
        self.target_pos
    }

    /// True if the path to the target is partial.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Gets the agent's position.
    pub fn get_pos(&self) -> Vec3 {
        self.npos
    }

    /// Gets the agent's actual velocity.
    pub fn get_vel(&self) -> Vec3 {
        self.vel
    }

    /// Gets the agent's desired velocity.
    pub fn get_desired_vel(&self) -> Vec3 {
        self.dvel
    }

    /// Gets the velocity picked by obstacle avoidance.
    pub fn get_new_vel(&self) -> Vec3 {
        self.nvel
    }

    /// Gets the agent's desired speed.
    pub fn get_desired_speed(&self) -> f32 {
        self.desired_speed
    }

    /// Gets the agent's last collision displacement.
    pub fn get_displacement(&self) -> Vec3 {
        self.disp
    }

    /// Gets the agent's parameters.
    pub fn get_params(&self) -> &AgentParams {
        &self.params
    }

    /// Gets the agent's path corridor.
    pub fn get_corridor(&self) -> &PathCorridor {
        &self.corridor
    }

    /// Gets the agent's local boundary.
    pub fn get_boundary(&self) -> &DtLocalBoundary {
        &self.boundary
    }

    /// Gets the agent's neighbours, nearest first.
    pub fn get_neighbours(&self) -> &[CrowdNeighbour] {
        self.neis.as_slice()
    }

    /// Gets the corners the agent is steering towards.
    pub fn get_corners(&self) -> &[StraightPathPoint] {
        self.corners.as_slice()
    }

    /// Gets the time since the last topology optimization.
    pub fn get_topology_opt_time(&self) -> f32 {
        self.topology_opt_time
    }

    /// Gets the time since the last path (re)plan.
    pub fn get_target_replan_time(&self) -> f32 {
        self.target_replan_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        assert!(AgentParams::default().validate().is_ok());
        let params = AgentParams::new(0.5, 1.8);
        assert_eq!(params.collision_query_range, 6.0);
        assert_eq!(params.path_optimization_range, 15.0);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_params_out_of_range() {
        let params = AgentParams {
            query_filter_type: DT_CROWD_MAX_QUERY_FILTER_TYPE as u8,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = AgentParams {
            obstacle_avoidance_type: DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS as u8,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = AgentParams {
            height: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = AgentParams {
            max_speed: f32::NAN,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_integrate_clamps_acceleration() {
        let mut agent = CrowdAgent::new(0);
        agent.params.max_acceleration = 8.0;
        agent.nvel = Vec3::new(10.0, 0.0, 0.0);

        agent.integrate(0.1);
        assert!((agent.vel.length() - 0.8).abs() < 1e-5);
        assert!((agent.npos.x - 0.08).abs() < 1e-5);
    }

    #[test]
    fn test_integrate_snaps_tiny_velocity() {
        let mut agent = CrowdAgent::new(0);
        agent.vel = Vec3::new(0.00005, 0.0, 0.0);

        agent.integrate(0.1);
        assert_eq!(agent.vel, Vec3::ZERO);
        assert_eq!(agent.npos, Vec3::ZERO);
    }

    #[test]
    fn test_move_request_with_null_ref_fails() {
        let mut agent = CrowdAgent::new(0);
        agent.request_move_target(PolyRef::NULL, Vec3::ONE, false);
        assert_eq!(agent.target_state, MoveRequestState::Failed);

        agent.request_move_target(PolyRef::new(1), Vec3::ONE, true);
        assert_eq!(agent.target_state, MoveRequestState::Requesting);
        assert!(agent.target_replan);
        assert!(agent.has_path_target());
    }
}
