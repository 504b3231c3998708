//! Crowd management for Detour
//!
//! The [`Crowd`] owns a fixed pool of agents and advances all of them with
//! [`Crowd::update`]. One update runs these phases in order:
//!
//! 1. path validity checks, asynchronous path requests and topology optimization,
//! 2. proximity grid rebuild, boundary refresh and neighbour queries,
//! 3. corner finding, visibility shortcuts and off-mesh triggers,
//! 4. steering and separation,
//! 5. velocity planning with obstacle avoidance,
//! 6. integration and collision resolution,
//! 7. corridor moves that keep agents on the navmesh,
//! 8. off-mesh connection traversal.
//!
//! Phases only see the agents active when the update started.

use detour::{
    NavMeshQuery, PathQueue, PolyRef, QueryFilter, StraightPathFlags, DEFAULT_AREA,
};
use nav_common::{
    dist_2d, dist_point_segment_sqr_2d, dist_sqr_2d, dot_2d, len_2d, normalize_2d, sqr,
    tri_area_2d, Error, Result, Vec3,
};

use crate::{
    AgentParams, AvoidanceAgent, AvoidanceSampling, BoundaryQuery, BoundedList, CrowdAgent,
    CrowdAgentAnimation, CrowdAgentState, CrowdNeighbour, DtObstacleAvoidanceDebugData,
    DtObstacleAvoidanceParams, DtObstacleAvoidancePattern, DtObstacleAvoidanceQuery,
    DtSharedBoundary, LocalSegmentFlags, MoveRequestState, ProximityGrid, SharedBoundaryKey,
    UpdateFlags, DT_CROWDAGENT_MAX_NEIGHBOURS, DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS,
    DT_CROWD_MAX_QUERY_FILTER_TYPE,
};

/// Number of polygons checked ahead of the agent for path validity
const CHECK_LOOKAHEAD: usize = 10;
/// Seconds a valid path may run short of its target before it is replanned
const TARGET_REPLAN_DELAY: f32 = 1.0;
/// Seconds between topology optimizations of one agent
const OPT_TIME_THR: f32 = 0.5;
/// Agents optimized per update
const OPT_MAX_AGENTS: usize = 1;
/// Path requests submitted to the queue per update
const PATH_MAX_AGENTS: usize = 8;
/// Iterations of the quick search run when a move target is requested
const MAX_QUICK_SEARCH_ITER: usize = 20;
/// Polygons kept from the quick search
const MAX_QUICK_SEARCH_RES: usize = 32;
/// Candidates fetched from the proximity grid per neighbour query
const MAX_NEIS_QUERY: usize = 32;
const COLLISION_ITERATIONS: usize = 4;
const COLLISION_RESOLVE_FACTOR: f32 = 0.7;
/// Cosine above which a neighbour counts as straight ahead for separation
const HEAD_ON_COS: f32 = 0.9;

/// How agents move through off-mesh connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum OffMeshTraversal {
    /// Interpolate the position over a fixed duration
    #[default]
    Animated,
    /// Walk along the connection at maximum speed
    Velocity,
}

/// Configuration of a crowd
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct CrowdConfig {
    /// Size of the agent pool
    pub max_agents: usize,
    /// Largest radius of any agent, sizes the proximity grid
    pub max_agent_radius: f32,
    /// Maximum corridor length
    pub max_path_result: usize,
    /// Search box used to place agents and targets on the navmesh
    pub agent_placement_half_extents: Vec3,
    /// Seconds between attempts to recover agents that left the navmesh
    pub agent_state_check_interval: f32,
    /// Search iterations the path queue may spend per update
    pub path_queue_max_iters: usize,
    /// Share boundary queries between nearby agents
    pub use_shared_boundary: bool,
    /// Restrict boundary and visibility queries to the agent's current area
    pub single_area_visibility_optimization: bool,
    /// Drop the off-mesh connection from the corridor once it was traversed
    pub prune_started_off_mesh_connections: bool,
    pub off_mesh_traversal: OffMeshTraversal,
    /// Obstacle circles per avoidance query
    pub max_neighbors: usize,
    /// Obstacle segments per avoidance query
    pub max_walls: usize,
    /// Number of custom sampling pattern slots
    pub max_custom_patterns: usize,
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self::new(128, 0.6)
    }
}

impl CrowdConfig {
    pub fn new(max_agents: usize, max_agent_radius: f32) -> Self {
        Self {
            max_agents,
            max_agent_radius,
            max_path_result: 256,
            agent_placement_half_extents: Vec3::new(
                max_agent_radius * 2.0,
                max_agent_radius * 1.5,
                max_agent_radius * 2.0,
            ),
            agent_state_check_interval: 1.0,
            path_queue_max_iters: 100,
            use_shared_boundary: true,
            single_area_visibility_optimization: false,
            prune_started_off_mesh_connections: false,
            off_mesh_traversal: OffMeshTraversal::Animated,
            max_neighbors: DT_CROWDAGENT_MAX_NEIGHBOURS,
            max_walls: 8,
            max_custom_patterns: 4,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_agents == 0 {
            return Err(Error::InvalidParam("max_agents must be positive".into()));
        }
        if !(self.max_agent_radius.is_finite() && self.max_agent_radius > 0.0) {
            return Err(Error::InvalidParam(format!(
                "invalid max agent radius {}",
                self.max_agent_radius
            )));
        }
        if self.max_path_result == 0 {
            return Err(Error::InvalidParam("max_path_result must be positive".into()));
        }
        if !self.agent_placement_half_extents.is_finite()
            || self.agent_placement_half_extents.min_element() < 0.0
        {
            return Err(Error::InvalidParam(
                "placement extents must be finite and non-negative".into(),
            ));
        }
        if !(self.agent_state_check_interval >= 0.0) {
            return Err(Error::InvalidParam(
                "agent state check interval must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Debug data captured for one agent during an update
#[derive(Debug, Clone, Default)]
pub struct CrowdAgentDebugInfo {
    /// Agent to capture, `None` captures nothing
    pub idx: Option<usize>,
    /// Start of the last visibility optimization ray
    pub opt_start: Vec3,
    /// Target of the last visibility optimization ray
    pub opt_end: Vec3,
    /// Velocity samples of the last avoidance query, if allocated
    pub vod: Option<DtObstacleAvoidanceDebugData>,
}

impl CrowdAgentDebugInfo {
    /// Captures the given agent, recording up to `max_samples` avoidance samples
    pub fn new(idx: usize, max_samples: usize) -> Self {
        Self {
            idx: Some(idx),
            opt_start: Vec3::ZERO,
            opt_end: Vec3::ZERO,
            vod: Some(DtObstacleAvoidanceDebugData::new(max_samples)),
        }
    }

    fn captures(&self, idx: usize) -> bool {
        self.idx == Some(idx)
    }
}

/// Provides local steering behaviors for a group of agents.
pub struct Crowd<Q: NavMeshQuery> {
    config: CrowdConfig,
    navquery: Q,
    agents: Vec<CrowdAgent>,
    agent_anims: Vec<CrowdAgentAnimation>,
    /// Scratch list of the agents active in the current update
    active_agents: Vec<usize>,
    pathq: PathQueue,
    obstacle_query_params: [DtObstacleAvoidanceParams; DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS],
    obstacle_query: DtObstacleAvoidanceQuery,
    custom_patterns: Vec<Option<DtObstacleAvoidancePattern>>,
    grid: ProximityGrid,
    shared_boundary: DtSharedBoundary,
    filters: Vec<QueryFilter>,
    agent_state_check_time: f32,
    velocity_sample_count: usize,
}

impl<Q: NavMeshQuery> std::fmt::Debug for Crowd<Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crowd")
            .field("config", &self.config)
            .field("active_agents", &self.agents.iter().filter(|a| a.active).count())
            .field("velocity_sample_count", &self.velocity_sample_count)
            .finish_non_exhaustive()
    }
}

impl<Q: NavMeshQuery> Crowd<Q> {
    /// Creates a crowd driving agents over `navquery`.
    pub fn new(config: CrowdConfig, navquery: Q) -> Result<Self> {
        config.validate()?;

        let mut agents = Vec::with_capacity(config.max_agents);
        for idx in 0..config.max_agents {
            let mut agent = CrowdAgent::new(idx);
            agent.corridor.init(config.max_path_result)?;
            agents.push(agent);
        }

        let grid = ProximityGrid::new(config.max_agents * 4, config.max_agent_radius * 3.0)?;

        let mut obstacle_query = DtObstacleAvoidanceQuery::new();
        obstacle_query.init(config.max_neighbors, config.max_walls)?;

        // Low, medium, good and high quality presets; the remaining slots keep
        // the defaults until configured.
        let mut obstacle_query_params =
            [DtObstacleAvoidanceParams::default(); DT_CROWD_MAX_OBSTAVOIDANCE_PARAMS];
        let presets = [(5, 2, 1), (5, 2, 2), (7, 2, 3), (7, 3, 3)];
        for (params, (divs, rings, depth)) in obstacle_query_params.iter_mut().zip(presets) {
            params.vel_bias = 0.5;
            params.sampling = AvoidanceSampling::Adaptive { divs, rings, depth };
        }

        log::debug!(
            "crowd created: {} agents, max radius {}",
            config.max_agents,
            config.max_agent_radius
        );

        Ok(Self {
            agent_anims: vec![CrowdAgentAnimation::default(); config.max_agents],
            active_agents: Vec::with_capacity(config.max_agents),
            pathq: PathQueue::new(config.max_path_result),
            obstacle_query_params,
            obstacle_query,
            custom_patterns: vec![None; config.max_custom_patterns],
            grid,
            shared_boundary: DtSharedBoundary::new(),
            filters: vec![QueryFilter::default(); DT_CROWD_MAX_QUERY_FILTER_TYPE],
            agent_state_check_time: 0.0,
            velocity_sample_count: 0,
            agents,
            navquery,
            config,
        })
    }

    fn agent_mut(&mut self, idx: usize) -> Result<&mut CrowdAgent> {
        self.agents
            .get_mut(idx)
            .filter(|a| a.active)
            .ok_or(Error::InvalidAgent(idx))
    }

    /// Adds a new agent at the navmesh point nearest to `pos`.
    ///
    /// Returns the index of the agent. Fails when the pool is full or no polygon
    /// lies within the placement extents.
    pub fn add_agent(&mut self, pos: Vec3, params: AgentParams) -> Result<usize> {
        params.validate()?;

        let Some(idx) = self.agents.iter().position(|a| !a.active) else {
            log::warn!("cannot add agent: all {} slots in use", self.config.max_agents);
            return Err(Error::CapacityExhausted("crowd agents"));
        };

        let filter = &self.filters[params.query_filter_type as usize];
        let Some((poly_ref, nearest)) = self.navquery.find_nearest_poly(
            pos,
            self.config.agent_placement_half_extents,
            filter,
        ) else {
            return Err(Error::no_nearby_polygon(pos));
        };

        self.agents[idx].place(poly_ref, nearest, params);
        self.agent_anims[idx] = CrowdAgentAnimation::default();

        log::debug!("added agent {idx} on {poly_ref} at {nearest}");
        Ok(idx)
    }

    /// Removes the agent. Its slot may be reused by the next `add_agent`.
    pub fn remove_agent(&mut self, idx: usize) -> Result<()> {
        let agent = self.agent_mut(idx)?;
        agent.active = false;
        agent.state = CrowdAgentState::Invalid;
        agent.target_state = MoveRequestState::None;
        agent.target_pathq_ref = None;
        self.agent_anims[idx].active = false;
        log::debug!("removed agent {idx}");
        Ok(())
    }

    /// Updates the specified agent's configuration.
    pub fn update_agent_parameters(&mut self, idx: usize, params: AgentParams) -> Result<()> {
        params.validate()?;
        self.agent_mut(idx)?.params = params;
        Ok(())
    }

    /// Switches the query filter used by the agent.
    pub fn update_agent_filter(&mut self, idx: usize, filter_type: u8) -> Result<()> {
        if filter_type as usize >= DT_CROWD_MAX_QUERY_FILTER_TYPE {
            return Err(Error::InvalidParam(format!(
                "query filter type {filter_type} out of range"
            )));
        }
        let agent = self.agent_mut(idx)?;
        agent.params.query_filter_type = filter_type;
        // Walls depend on the filter.
        agent.boundary.reset();
        Ok(())
    }

    /// Submits a new move request for the specified agent.
    pub fn request_move_target(&mut self, idx: usize, poly_ref: PolyRef, pos: Vec3) -> Result<()> {
        if !poly_ref.is_valid() {
            return Err(Error::InvalidPolyRef(poly_ref.id()));
        }
        self.agent_mut(idx)?.request_move_target(poly_ref, pos, false);
        log::trace!("agent {idx} requested move to {pos} on {poly_ref}");
        Ok(())
    }

    /// Submits a new move request for the specified agent.
    pub fn request_move_velocity(&mut self, idx: usize, vel: Vec3) -> Result<()> {
        if !vel.is_finite() {
            return Err(Error::InvalidParam(format!("invalid velocity {vel}")));
        }
        let agent = self.agent_mut(idx)?;
        agent.target_ref = PolyRef::NULL;
        agent.target_pos = vel;
        agent.target_pathq_ref = None;
        agent.target_replan = false;
        agent.target_state = MoveRequestState::Velocity;
        Ok(())
    }

    /// Resets any request for the specified agent.
    pub fn reset_move_target(&mut self, idx: usize) -> Result<()> {
        let agent = self.agent_mut(idx)?;
        agent.target_ref = PolyRef::NULL;
        agent.target_pos = Vec3::ZERO;
        agent.dvel = Vec3::ZERO;
        agent.target_pathq_ref = None;
        agent.target_replan = false;
        agent.target_state = MoveRequestState::None;
        Ok(())
    }

    /// Replaces the agent's corridor with an externally computed path.
    ///
    /// The move request becomes valid when the path ends on the requested target
    /// polygon, otherwise the remainder is planned from the end of `path`.
    pub fn set_agent_corridor(&mut self, idx: usize, path: &[PolyRef]) -> Result<()> {
        let agent = self.agents.get_mut(idx).filter(|a| a.active).ok_or(Error::InvalidAgent(idx))?;
        if !agent.has_path_target() {
            return Err(Error::InvalidParam(format!("agent {idx} has no move target")));
        }
        let Some(&last) = path.last() else {
            return Err(Error::InvalidParam("corridor path is empty".into()));
        };

        // A path stopping short of the target ends inside its last polygon.
        let target = if last == agent.target_ref {
            agent.target_pos
        } else {
            self.navquery.closest_point_on_poly(last, agent.target_pos)?
        };
        agent.corridor.set_corridor(target, path);
        agent.boundary.reset();
        agent.partial = false;
        agent.target_pathq_ref = None;
        agent.target_replan_time = 0.0;
        agent.target_state = if last == agent.target_ref {
            MoveRequestState::Valid
        } else {
            MoveRequestState::WaitingForQueue
        };
        Ok(())
    }

    /// Parks a walking agent until [`Crowd::resume_agent`] or
    /// [`Crowd::start_off_mesh_connection`] is called.
    pub fn set_agent_waiting(&mut self, idx: usize) -> Result<()> {
        let agent = self.agent_mut(idx)?;
        if agent.state != CrowdAgentState::Walking {
            return Err(Error::InvalidParam(format!(
                "agent {idx} cannot wait while {:?}",
                agent.state
            )));
        }
        agent.state = CrowdAgentState::Waiting;
        agent.vel = Vec3::ZERO;
        agent.dvel = Vec3::ZERO;
        agent.nvel = Vec3::ZERO;
        agent.corners.clear();
        agent.neis.clear();
        Ok(())
    }

    /// Puts a waiting agent back on the navmesh and resumes its move request.
    pub fn resume_agent(&mut self, idx: usize) -> Result<()> {
        let half_extents = self.config.agent_placement_half_extents;
        let agent = self.agents.get_mut(idx).filter(|a| a.active).ok_or(Error::InvalidAgent(idx))?;
        if agent.state != CrowdAgentState::Waiting {
            return Err(Error::InvalidParam(format!("agent {idx} is not waiting")));
        }
        let filter = &self.filters[agent.params.query_filter_type as usize];
        let Some((poly_ref, nearest)) = self.navquery.find_nearest_poly(agent.npos, half_extents, filter)
        else {
            return Err(Error::no_nearby_polygon(agent.npos));
        };

        agent.corridor.reset(poly_ref, nearest);
        agent.boundary.reset();
        agent.npos = nearest;
        agent.partial = false;
        agent.state = CrowdAgentState::Walking;
        if agent.has_path_target() && agent.target_ref.is_valid() {
            agent.request_move_target(agent.target_ref, agent.target_pos, true);
        }
        log::debug!("agent {idx} resumed on {poly_ref}");
        Ok(())
    }

    /// Starts traversing `link` with a waiting agent.
    pub fn start_off_mesh_connection(&mut self, idx: usize, link: PolyRef) -> Result<()> {
        let agent = self.agents.get_mut(idx).filter(|a| a.active).ok_or(Error::InvalidAgent(idx))?;
        if agent.state != CrowdAgentState::Waiting {
            return Err(Error::InvalidParam(format!("agent {idx} is not waiting")));
        }
        let (start, end) = agent.corridor.move_over_off_mesh_connection(link, &self.navquery)?;
        self.agent_anims[idx] = begin_animation(agent, link, start, end);
        agent.state = CrowdAgentState::OffMesh;
        log::debug!("agent {idx} started off-mesh connection {link}");
        Ok(())
    }

    /// True if the walking agent stands outside the first polygon of its corridor.
    pub fn is_outside_corridor(&self, idx: usize) -> bool {
        let Some(agent) = self.get_agent(idx) else {
            return false;
        };
        if agent.state != CrowdAgentState::Walking {
            return false;
        }
        let first = agent.corridor.get_first_poly();
        !first.is_valid() || self.navquery.poly_height(first, agent.npos).is_none()
    }

    /// Sets the shared avoidance configuration for the specified index.
    pub fn set_obstacle_avoidance_params(
        &mut self,
        idx: usize,
        params: DtObstacleAvoidanceParams,
    ) -> Result<()> {
        if let AvoidanceSampling::Pattern(i) = params.sampling {
            if i as usize >= self.custom_patterns.len() {
                return Err(Error::InvalidParam(format!(
                    "avoidance pattern index {i} out of range"
                )));
            }
        }
        let slot = self
            .obstacle_query_params
            .get_mut(idx)
            .ok_or_else(|| Error::InvalidParam(format!("avoidance params index {idx} out of range")))?;
        *slot = params;
        Ok(())
    }

    /// Gets the shared avoidance configuration for the specified index.
    pub fn get_obstacle_avoidance_params(&self, idx: usize) -> Option<&DtObstacleAvoidanceParams> {
        self.obstacle_query_params.get(idx)
    }

    /// Sets the custom sampling pattern referenced by [`AvoidanceSampling::Pattern`].
    pub fn set_obstacle_avoidance_pattern(
        &mut self,
        idx: usize,
        pattern: DtObstacleAvoidancePattern,
    ) -> Result<()> {
        let slot = self
            .custom_patterns
            .get_mut(idx)
            .ok_or_else(|| Error::InvalidParam(format!("avoidance pattern index {idx} out of range")))?;
        *slot = Some(pattern);
        Ok(())
    }

    pub fn get_obstacle_avoidance_pattern(&self, idx: usize) -> Option<&DtObstacleAvoidancePattern> {
        self.custom_patterns.get(idx).and_then(Option::as_ref)
    }

    /// Gets the active agent at the index, `None` for free slots.
    pub fn get_agent(&self, idx: usize) -> Option<&CrowdAgent> {
        self.agents.get(idx).filter(|a| a.active)
    }

    /// The maximum number of agents that can be managed by the object.
    pub fn get_agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Iterates over the active agents in index order.
    pub fn get_active_agents(&self) -> impl Iterator<Item = &CrowdAgent> + '_ {
        self.agents.iter().filter(|a| a.active)
    }

    /// Gets the off-mesh traversal state of the agent.
    pub fn get_agent_animation(&self, idx: usize) -> Option<&CrowdAgentAnimation> {
        self.get_agent(idx).and(self.agent_anims.get(idx))
    }

    pub fn get_filter(&self, idx: usize) -> Option<&QueryFilter> {
        self.filters.get(idx)
    }

    /// Gets the filter used by the crowd. Changes affect agents on their next path request.
    pub fn get_editable_filter(&mut self, idx: usize) -> Option<&mut QueryFilter> {
        self.filters.get_mut(idx)
    }

    pub fn get_query_half_extents(&self) -> Vec3 {
        self.config.agent_placement_half_extents
    }

    pub fn get_config(&self) -> &CrowdConfig {
        &self.config
    }

    /// Number of avoidance samples taken during the last update.
    pub fn get_velocity_sample_count(&self) -> usize {
        self.velocity_sample_count
    }

    pub fn get_grid(&self) -> &ProximityGrid {
        &self.grid
    }

    pub fn get_shared_boundary(&self) -> &DtSharedBoundary {
        &self.shared_boundary
    }

    pub fn get_path_queue(&self) -> &PathQueue {
        &self.pathq
    }

    pub fn get_nav_mesh_query(&self) -> &Q {
        &self.navquery
    }

    /// Mutable access to the navmesh, for example to disable polygons at runtime.
    pub fn get_nav_mesh_query_mut(&mut self) -> &mut Q {
        &mut self.navquery
    }

    /// Updates the steering and positions of all agents.
    pub fn update(&mut self, dt: f32, mut debug: Option<&mut CrowdAgentDebugInfo>) {
        self.velocity_sample_count = 0;

        let mut active = std::mem::take(&mut self.active_agents);
        active.clear();
        active.extend(self.agents.iter().filter(|a| a.active).map(|a| a.idx));

        self.recover_invalid_agents(&active, dt);
        self.check_path_validity(&active, dt);
        self.update_move_request(&active);
        self.update_topology_optimization(&active, dt);

        self.update_proximity(&active, dt);

        self.update_next_move_point(&active, debug.as_deref_mut());
        self.trigger_off_mesh_connections(&active);

        self.update_steering(&active);

        self.update_avoidance(&active, debug.as_deref_mut());

        self.update_move(&active, dt);

        self.update_corridors(&active);

        match self.config.off_mesh_traversal {
            OffMeshTraversal::Animated => self.update_off_mesh_animation(&active, dt),
            OffMeshTraversal::Velocity => self.update_off_mesh_velocity(&active, dt),
        }

        log::trace!(
            "crowd update: {} agents, {} velocity samples",
            active.len(),
            self.velocity_sample_count
        );
        self.active_agents = active;
    }

    fn recover_invalid_agents(&mut self, active: &[usize], dt: f32) {
        self.agent_state_check_time += dt;
        if self.agent_state_check_time < self.config.agent_state_check_interval {
            return;
        }
        self.agent_state_check_time = 0.0;

        let Self {
            ref mut agents,
            ref navquery,
            ref filters,
            ref config,
            ..
        } = *self;
        for &idx in active {
            let ag = &mut agents[idx];
            if ag.state != CrowdAgentState::Invalid {
                continue;
            }
            let filter = &filters[ag.params.query_filter_type as usize];
            let Some((poly_ref, nearest)) =
                navquery.find_nearest_poly(ag.npos, config.agent_placement_half_extents, filter)
            else {
                continue;
            };

            ag.corridor.reset(poly_ref, nearest);
            ag.boundary.reset();
            ag.npos = nearest;
            ag.partial = false;
            ag.state = CrowdAgentState::Walking;
            if ag.has_path_target() && ag.target_ref.is_valid() {
                ag.request_move_target(ag.target_ref, ag.target_pos, true);
            }
            log::debug!("agent {idx} back on the navmesh at {poly_ref}");
        }
    }

    fn check_path_validity(&mut self, active: &[usize], dt: f32) {
        let Self {
            ref mut agents,
            ref navquery,
            ref filters,
            ref config,
            ..
        } = *self;
        let half_extents = config.agent_placement_half_extents;

        for &idx in active {
            let ag = &mut agents[idx];
            if ag.state != CrowdAgentState::Walking {
                continue;
            }
            let filter = &filters[ag.params.query_filter_type as usize];

            ag.target_replan_time += dt;
            let mut replan = false;

            // First check that the current location is valid.
            let agent_pos = ag.npos;
            let mut agent_ref = ag.corridor.get_first_poly();
            if !navquery.is_valid_poly_ref(agent_ref, filter) {
                // Current location is not valid, try to reposition.
                let Some((nearest_ref, nearest)) =
                    navquery.find_nearest_poly(agent_pos, half_extents, filter)
                else {
                    ag.corridor.reset(PolyRef::NULL, agent_pos);
                    ag.partial = false;
                    ag.boundary.reset();
                    ag.corners.clear();
                    ag.neis.clear();
                    ag.state = CrowdAgentState::Invalid;
                    log::debug!("agent {idx} lost the navmesh at {agent_pos}");
                    continue;
                };
                agent_ref = nearest_ref;
                // Only the first polygon is replaced, the replanner patches the rest.
                ag.corridor.fix_path_start(agent_ref, nearest);
                ag.boundary.reset();
                ag.npos = nearest;
                replan = true;
            }

            if !ag.has_path_target() {
                continue;
            }

            // Try to recover move request position.
            if ag.target_state != MoveRequestState::Failed {
                if !navquery.is_valid_poly_ref(ag.target_ref, filter) {
                    // Current target is not valid, try to reposition.
                    match navquery.find_nearest_poly(ag.target_pos, half_extents, filter) {
                        Some((target_ref, nearest)) => {
                            ag.target_ref = target_ref;
                            ag.target_pos = nearest;
                            replan = true;
                        }
                        None => ag.target_ref = PolyRef::NULL,
                    }
                }
                if !ag.target_ref.is_valid() {
                    // Failed to reposition target, fail moverequest.
                    ag.corridor.reset(agent_ref, agent_pos);
                    ag.partial = false;
                    ag.target_state = MoveRequestState::None;
                    log::debug!("agent {idx} lost its move target");
                }
            }

            // If nearby corridor is not valid, replan.
            if !ag.corridor.is_valid(CHECK_LOOKAHEAD, navquery, filter) {
                ag.corridor.trim_invalid_path(agent_ref, agent_pos, navquery, filter);
                ag.boundary.reset();
                replan = true;
            }

            // If the end of the path is near and it is not the requested location, replan.
            if ag.target_state == MoveRequestState::Valid
                && ag.target_replan_time > TARGET_REPLAN_DELAY
                && ag.corridor.get_path_count() < CHECK_LOOKAHEAD
                && ag.corridor.get_last_poly() != ag.target_ref
            {
                replan = true;
            }

            if replan && ag.target_state != MoveRequestState::None {
                ag.request_move_target(ag.target_ref, ag.target_pos, true);
                log::trace!("agent {idx} replanning");
            }
        }
    }

    fn update_move_request(&mut self, active: &[usize]) {
        let Self {
            ref mut agents,
            ref navquery,
            ref filters,
            ref mut pathq,
            ref config,
            ..
        } = *self;

        let mut queue: BoundedList<(usize, f32), PATH_MAX_AGENTS> = BoundedList::new();

        // Fire off new requests.
        for &idx in active {
            let ag = &mut agents[idx];
            if ag.state == CrowdAgentState::Invalid || !ag.has_path_target() {
                continue;
            }
            let filter = &filters[ag.params.query_filter_type as usize];

            if ag.target_state == MoveRequestState::Requesting {
                let Some(&start_ref) = ag.corridor.get_path().first() else {
                    ag.target_state = MoveRequestState::Failed;
                    continue;
                };

                // Quick search towards the goal.
                let mut req_path = match navquery.find_path_bounded(
                    start_ref,
                    ag.target_ref,
                    ag.npos,
                    ag.target_pos,
                    filter,
                    MAX_QUICK_SEARCH_ITER,
                    MAX_QUICK_SEARCH_RES,
                ) {
                    Ok(res) => {
                        let mut path = res.path;
                        if ag.target_replan && res.partial {
                            // Keep to the existing path while the full replan runs.
                            let existing = ag.corridor.get_path();
                            if let Some(i) = path.iter().rposition(|p| existing.contains(p)) {
                                path.truncate(i + 1);
                            }
                        }
                        path
                    }
                    Err(err) => {
                        log::trace!("agent {idx} quick search failed: {err}");
                        Vec::new()
                    }
                };

                let mut req_pos = ag.target_pos;
                if let Some(&last) = req_path.last() {
                    if last != ag.target_ref {
                        // Partial path, constrain target position inside the last polygon.
                        match navquery.closest_point_on_poly(last, ag.target_pos) {
                            Ok(p) => req_pos = p,
                            Err(_) => req_path.clear(),
                        }
                    }
                }
                if req_path.is_empty() {
                    // Could not find path, start the request from current location.
                    req_pos = ag.npos;
                    req_path.push(start_ref);
                }

                ag.corridor.set_corridor(req_pos, &req_path);
                ag.boundary.reset();
                ag.partial = false;

                if req_path.last() == Some(&ag.target_ref) {
                    ag.target_state = MoveRequestState::Valid;
                    ag.target_replan_time = 0.0;
                } else {
                    // The path is longer or potentially unreachable, full plan.
                    ag.target_state = MoveRequestState::WaitingForQueue;
                }
            }

            if ag.target_state == MoveRequestState::WaitingForQueue {
                queue.insert_sorted_by((idx, ag.target_replan_time), |a, b| a.1 > b.1);
            }
        }

        for &(idx, _) in &queue {
            let ag = &mut agents[idx];
            let filter = &filters[ag.params.query_filter_type as usize];
            if let Some(reference) = pathq.request(
                ag.corridor.get_last_poly(),
                ag.target_ref,
                ag.corridor.get_target(),
                ag.target_pos,
                filter,
            ) {
                ag.target_pathq_ref = Some(reference);
                ag.target_state = MoveRequestState::WaitingForPath;
            }
        }

        pathq.update(navquery, config.path_queue_max_iters);

        // Process path results.
        for &idx in active {
            let ag = &mut agents[idx];
            if ag.target_state != MoveRequestState::WaitingForPath {
                continue;
            }
            let Some(reference) = ag.target_pathq_ref else {
                ag.target_state = MoveRequestState::Requesting;
                continue;
            };

            let status = pathq.request_status(reference);
            if status.is_failure() {
                // Path find failed, retry if the target location is still valid.
                ag.target_pathq_ref = None;
                ag.target_state = if ag.target_ref.is_valid() {
                    MoveRequestState::Requesting
                } else {
                    MoveRequestState::Failed
                };
                ag.target_replan_time = 0.0;
                continue;
            }
            if !status.is_success() {
                continue;
            }

            let (status, mut res) = pathq.path_result(reference, config.max_path_result);
            ag.target_pathq_ref = None;
            ag.partial = status.is_partial();

            let mut target_pos = ag.target_pos;
            let path = ag.corridor.get_path();
            // The request was issued from the end of the old path, which may have
            // moved since. Both must still meet.
            let mut valid = !status.is_failure() && !res.is_empty() && path.last() == res.first();
            if valid {
                if path.len() > 1 {
                    // Put the old path in front of the result.
                    let prefix = &path[..path.len() - 1];
                    res.truncate(config.max_path_result.saturating_sub(prefix.len()));
                    res.splice(0..0, prefix.iter().copied());
                    remove_trackbacks(&mut res);
                }

                // Check for partial path.
                if let Some(&last) = res.last() {
                    if last != ag.target_ref {
                        // Partial path, constrain target position inside the last polygon.
                        match navquery.closest_point_on_poly(last, target_pos) {
                            Ok(p) => target_pos = p,
                            Err(_) => valid = false,
                        }
                    }
                }
            }

            if valid {
                ag.corridor.set_corridor(target_pos, &res);
                // Force to update boundary.
                ag.boundary.reset();
                ag.target_state = MoveRequestState::Valid;
            } else {
                log::debug!("agent {idx} path result could not be applied");
                ag.target_state = MoveRequestState::Failed;
            }
            ag.target_replan_time = 0.0;
        }
    }

    fn update_topology_optimization(&mut self, active: &[usize], dt: f32) {
        let Self {
            ref mut agents,
            ref navquery,
            ref filters,
            ..
        } = *self;

        let mut queue: BoundedList<(usize, f32), OPT_MAX_AGENTS> = BoundedList::new();
        for &idx in active {
            let ag = &mut agents[idx];
            if ag.state != CrowdAgentState::Walking || !ag.has_path_target() {
                continue;
            }
            if !ag.params.update_flags.contains(UpdateFlags::OPTIMIZE_TOPO) {
                continue;
            }
            ag.topology_opt_time += dt;
            if ag.topology_opt_time >= OPT_TIME_THR {
                queue.insert_sorted_by((idx, ag.topology_opt_time), |a, b| a.1 > b.1);
            }
        }

        for &(idx, _) in &queue {
            let ag = &mut agents[idx];
            let filter = &filters[ag.params.query_filter_type as usize];
            ag.corridor.optimize_path_topology(navquery, filter);
            ag.topology_opt_time = 0.0;
        }
    }

    fn update_proximity(&mut self, active: &[usize], dt: f32) {
        let Self {
            ref mut agents,
            ref navquery,
            ref filters,
            ref mut grid,
            ref mut shared_boundary,
            ref config,
            ..
        } = *self;

        grid.clear();
        for &idx in active {
            let ag = &agents[idx];
            let p = ag.npos;
            let r = ag.params.radius;
            grid.add_item(idx, p.x - r, p.z - r, p.x + r, p.z + r);
        }

        if config.use_shared_boundary {
            shared_boundary.tick(dt);
        }

        // Get nearby navmesh segments and agents to collide with.
        for &idx in active {
            if agents[idx].state != CrowdAgentState::Walking {
                continue;
            }

            let ag = &mut agents[idx];
            let filter = &filters[ag.params.query_filter_type as usize];
            // Update the collision boundary after certain distance has been passed or
            // if it has become invalid.
            let update_thr = ag.params.collision_query_range * 0.25;
            if dist_sqr_2d(ag.npos, ag.boundary.get_center()) > sqr(update_thr)
                || !ag.boundary.is_valid(navquery, filter)
            {
                refresh_boundary(ag, navquery, filter, shared_boundary, config);
            }

            let neis = get_neighbours(idx, agents, grid);
            agents[idx].neis = neis;
        }
    }

    fn update_next_move_point(
        &mut self,
        active: &[usize],
        mut debug: Option<&mut CrowdAgentDebugInfo>,
    ) {
        let Self {
            ref mut agents,
            ref navquery,
            ref filters,
            ref config,
            ..
        } = *self;

        for &idx in active {
            let ag = &mut agents[idx];
            if ag.state != CrowdAgentState::Walking || !ag.has_path_target() {
                continue;
            }
            let filter = &filters[ag.params.query_filter_type as usize];

            // Find corners for steering
            let cut_radius = (ag.boundary.get_segment_count() == 0).then_some(ag.params.radius);
            if let Err(err) = ag.corridor.find_corners(&mut ag.corners, navquery, cut_radius) {
                log::trace!("agent {idx} corner search failed: {err}");
                ag.corners.clear();
            }

            let flags = ag.params.update_flags;
            let debug_agent = debug.as_deref_mut().filter(|d| d.captures(idx));
            if !flags.intersects(UpdateFlags::OPTIMIZE_VIS | UpdateFlags::OPTIMIZE_VIS_MULTI)
                || ag.corners.is_empty()
            {
                if let Some(d) = debug_agent {
                    d.opt_start = Vec3::ZERO;
                    d.opt_end = Vec3::ZERO;
                }
                continue;
            }

            let area_filter = config
                .single_area_visibility_optimization
                .then(|| navquery.poly_area(ag.corridor.get_first_poly()))
                .flatten()
                .map(|area| filter.restricted_to_area(area));
            let vis_filter = area_filter.as_ref().unwrap_or(filter);

            // Check to see if the corner after the next corner is directly visible,
            // and short cut to there.
            let range = ag.params.path_optimization_range;
            let n = ag.corners.len();
            let mut target = ag.corners[1.min(n - 1)].pos;
            if flags.contains(UpdateFlags::OPTIMIZE_VIS_MULTI) {
                // Farthest corner first.
                for i in (1.min(n - 1)..n).rev() {
                    let corner = ag.corners[i].pos;
                    if ag.corridor.optimize_path_visibility(corner, range, navquery, vis_filter) {
                        target = corner;
                        break;
                    }
                }
            } else {
                ag.corridor.optimize_path_visibility(target, range, navquery, vis_filter);
            }

            if let Some(d) = debug_agent {
                d.opt_start = ag.corridor.get_pos();
                d.opt_end = target;
            }
        }
    }

    fn trigger_off_mesh_connections(&mut self, active: &[usize]) {
        let Self {
            ref mut agents,
            ref mut agent_anims,
            ref navquery,
            ..
        } = *self;

        for &idx in active {
            let ag = &mut agents[idx];
            if ag.state != CrowdAgentState::Walking || !ag.has_path_target() {
                continue;
            }
            let Some(&last) = ag.corners.last() else {
                continue;
            };
            if !last.flags.contains(StraightPathFlags::OFFMESH_CONNECTION) {
                continue;
            }
            let trigger_radius = ag.params.radius * 2.25;
            if dist_sqr_2d(ag.npos, last.pos) >= sqr(trigger_radius) {
                continue;
            }
            if let Some(link_filter) = &ag.params.link_filter {
                if !navquery.is_valid_poly_ref(last.poly, link_filter) {
                    continue;
                }
            }

            // Adjust the path over the off-mesh connection.
            match ag.corridor.move_over_off_mesh_connection(last.poly, navquery) {
                Ok((start, end)) => {
                    agent_anims[idx] = begin_animation(ag, last.poly, start, end);
                    ag.state = CrowdAgentState::OffMesh;
                    ag.corners.clear();
                    ag.neis.clear();
                    log::debug!("agent {idx} entering off-mesh connection {}", last.poly);
                }
                // Path validity checks replan around the broken connection.
                Err(err) => log::trace!("agent {idx} cannot use {}: {err}", last.poly),
            }
        }
    }

    fn update_steering(&mut self, active: &[usize]) {
        let agents = &mut self.agents;

        for &idx in active {
            let ag = &agents[idx];
            if ag.state != CrowdAgentState::Walking
                || ag.target_state == MoveRequestState::None
            {
                continue;
            }
            let flags = ag.params.update_flags;

            let (mut dvel, desired_speed) = if ag.target_state == MoveRequestState::Velocity {
                (ag.target_pos, ag.target_pos.length().min(ag.params.max_speed))
            } else {
                let dir = if flags.contains(UpdateFlags::ANTICIPATE_TURNS) {
                    calc_smooth_steer_direction(ag)
                } else {
                    calc_straight_steer_direction(ag)
                };
                // Slow down when the last corner is the goal.
                let speed_scale = if flags.contains(UpdateFlags::SLOWDOWN_AT_GOAL) {
                    let slow_down_radius = ag.params.radius * 2.0;
                    if slow_down_radius > 0.0 {
                        get_distance_to_goal(ag, slow_down_radius) / slow_down_radius
                    } else {
                        1.0
                    }
                } else {
                    1.0
                };
                (dir * (ag.params.max_speed * speed_scale), ag.params.max_speed)
            };

            if flags.contains(UpdateFlags::SEPARATION) {
                dvel += separation(ag, agents, dvel);
            }

            // Clamp desired velocity to desired speed.
            let speed_sqr = dvel.length_squared();
            if speed_sqr > sqr(desired_speed) {
                dvel *= desired_speed / speed_sqr.sqrt();
            }

            let ag = &mut agents[idx];
            ag.dvel = dvel;
            ag.desired_speed = desired_speed;
        }
    }

    fn update_avoidance(&mut self, active: &[usize], mut debug: Option<&mut CrowdAgentDebugInfo>) {
        let Self {
            ref mut agents,
            ref mut obstacle_query,
            ref obstacle_query_params,
            ref custom_patterns,
            ref mut velocity_sample_count,
            ..
        } = *self;

        for &idx in active {
            let ag = &agents[idx];
            if ag.state != CrowdAgentState::Walking {
                continue;
            }

            let nvel = if ag.params.update_flags.contains(UpdateFlags::OBSTACLE_AVOIDANCE) {
                obstacle_query.reset();

                // Add neighbours as obstacles.
                for nei in &ag.neis {
                    let other = &agents[nei.idx];
                    obstacle_query.add_circle(other.npos, other.params.radius, other.vel, other.dvel);
                }

                // Append neighbour segments as obstacles.
                for seg in ag.boundary.segments() {
                    if tri_area_2d(ag.npos, seg.start, seg.end) < 0.0 {
                        continue;
                    }
                    obstacle_query.add_segment(
                        seg.start,
                        seg.end,
                        seg.flags.contains(LocalSegmentFlags::IGNORE_FOR_AVOIDANCE),
                    );
                }

                let vod = debug
                    .as_deref_mut()
                    .filter(|d| d.captures(idx))
                    .and_then(|d| d.vod.as_mut());

                let params = &obstacle_query_params[ag.params.obstacle_avoidance_type as usize];
                let agent = AvoidanceAgent {
                    pos: ag.npos,
                    rad: ag.params.radius * ag.params.avoidance_query_multiplier,
                    vmax: ag.desired_speed,
                    vel: ag.vel,
                    dvel: ag.dvel,
                };
                let pattern = match params.sampling {
                    AvoidanceSampling::Pattern(i) => {
                        let pattern = custom_patterns.get(i as usize).and_then(Option::as_ref);
                        if pattern.is_none() {
                            log::warn!(
                                "agent {idx}: avoidance pattern {i} is not set, sampling adaptively"
                            );
                        }
                        pattern
                    }
                    AvoidanceSampling::Adaptive { .. } => None,
                };
                let (nvel, samples) = match pattern {
                    Some(pattern) => obstacle_query.sample_velocity_custom(&agent, params, pattern, vod),
                    None => obstacle_query.sample_velocity_adaptive(&agent, params, vod),
                };
                *velocity_sample_count += samples;
                nvel
            } else {
                // If not using velocity planning, new velocity is directly the desired velocity.
                ag.dvel
            };

            agents[idx].nvel = nvel;
        }
    }

    fn update_move(&mut self, active: &[usize], dt: f32) {
        let agents = &mut self.agents;

        for &idx in active {
            let ag = &mut agents[idx];
            if ag.state == CrowdAgentState::Walking {
                ag.integrate(dt);
            }
        }

        // Handle collisions.
        for _ in 0..COLLISION_ITERATIONS {
            for &idx in active {
                let ag = &agents[idx];
                if ag.state != CrowdAgentState::Walking {
                    continue;
                }
                let disp = collision_displacement(ag, agents);
                agents[idx].disp = disp;
            }

            for &idx in active {
                let ag = &mut agents[idx];
                if ag.state == CrowdAgentState::Walking {
                    ag.npos += ag.disp;
                }
            }
        }
    }

    fn update_corridors(&mut self, active: &[usize]) {
        let Self {
            ref mut agents,
            ref navquery,
            ref filters,
            ..
        } = *self;

        for &idx in active {
            let ag = &mut agents[idx];
            if ag.state != CrowdAgentState::Walking {
                continue;
            }
            let filter = &filters[ag.params.query_filter_type as usize];

            // Move along navmesh.
            if let Err(err) = ag.corridor.move_position(ag.npos, navquery, filter) {
                log::trace!("agent {idx} corridor move failed: {err}");
            }
            // Get valid constrained position back.
            ag.npos = ag.corridor.get_pos();

            // If not using path, truncate the corridor to just one poly.
            if !ag.has_path_target() {
                let first = ag.corridor.get_first_poly();
                ag.corridor.reset(first, ag.npos);
                ag.partial = false;
            }
        }
    }

    fn update_off_mesh_animation(&mut self, active: &[usize], dt: f32) {
        let Self {
            ref mut agents,
            ref mut agent_anims,
            ref config,
            ..
        } = *self;

        for &idx in active {
            let anim = &mut agent_anims[idx];
            let ag = &mut agents[idx];
            if !anim.active || ag.state != CrowdAgentState::OffMesh {
                continue;
            }

            anim.t += dt;
            if anim.t > anim.tmax {
                ag.npos = anim.end_pos;
                finish_off_mesh_connection(idx, ag, anim, config);
                continue;
            }

            // Update position
            let ta = anim.tmax * 0.15;
            let tb = anim.tmax;
            ag.npos = if anim.t < ta {
                anim.init_pos.lerp(anim.start_pos, tween(anim.t, 0.0, ta))
            } else {
                anim.start_pos.lerp(anim.end_pos, tween(anim.t, ta, tb))
            };

            // Update velocity.
            ag.vel = Vec3::ZERO;
            ag.dvel = Vec3::ZERO;
        }
    }

    fn update_off_mesh_velocity(&mut self, active: &[usize], dt: f32) {
        let Self {
            ref mut agents,
            ref mut agent_anims,
            ref config,
            ..
        } = *self;

        for &idx in active {
            let anim = &mut agent_anims[idx];
            let ag = &mut agents[idx];
            if !anim.active || ag.state != CrowdAgentState::OffMesh {
                continue;
            }
            anim.t += dt;

            let link_dir = normalize_2d(anim.end_pos - anim.start_pos);
            let to_end = anim.end_pos - ag.npos;
            let step = ag.params.max_speed * dt;
            let overshot = dot_2d(to_end, link_dir) <= 0.0;
            let arrived = len_2d(to_end) <= step && to_end.y.abs() < ag.params.height * 0.5;
            if arrived || overshot {
                if arrived {
                    ag.npos = anim.end_pos;
                }
                finish_off_mesh_connection(idx, ag, anim, config);
                continue;
            }

            // Follow the link itself when pushed away from it.
            let (drift_sqr, _) = dist_point_segment_sqr_2d(ag.npos, anim.start_pos, anim.end_pos);
            let dir = if drift_sqr > sqr(ag.params.radius) {
                link_dir
            } else {
                normalize_2d(to_end)
            };

            ag.vel = dir * ag.params.max_speed;
            ag.dvel = ag.vel;
            ag.nvel = ag.vel;
            ag.npos += ag.vel * dt;

            let (_, t) = dist_point_segment_sqr_2d(ag.npos, anim.start_pos, anim.end_pos);
            ag.npos.y = anim.start_pos.y + (anim.end_pos.y - anim.start_pos.y) * t;
        }
    }
}

fn begin_animation(ag: &CrowdAgent, link: PolyRef, start: Vec3, end: Vec3) -> CrowdAgentAnimation {
    let tmax = if ag.params.max_speed > 0.0 {
        (dist_2d(start, end) / ag.params.max_speed) * 0.5
    } else {
        0.0
    };
    CrowdAgentAnimation {
        active: true,
        init_pos: ag.npos,
        start_pos: start,
        end_pos: end,
        poly_ref: link,
        t: 0.0,
        tmax,
    }
}

fn finish_off_mesh_connection(
    idx: usize,
    ag: &mut CrowdAgent,
    anim: &mut CrowdAgentAnimation,
    config: &CrowdConfig,
) {
    anim.active = false;
    ag.state = CrowdAgentState::Walking;
    if config.prune_started_off_mesh_connections {
        ag.corridor.prune_off_mesh_connection(anim.poly_ref);
    }
    log::debug!("agent {idx} finished off-mesh connection {}", anim.poly_ref);
}

fn tween(t: f32, t0: f32, t1: f32) -> f32 {
    if t1 - t0 <= 0.0 {
        return 1.0;
    }
    ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
}

/// Removes `A B A` detours left when an old path and a new one are joined
fn remove_trackbacks(path: &mut Vec<PolyRef>) {
    let mut j = 1;
    while j + 1 < path.len() {
        if path[j - 1] == path[j + 1] {
            path.drain(j - 1..j + 1);
            j = j.saturating_sub(1).max(1);
        } else {
            j += 1;
        }
    }
}

fn refresh_boundary<Q: NavMeshQuery + ?Sized>(
    ag: &mut CrowdAgent,
    navquery: &Q,
    filter: &QueryFilter,
    shared_boundary: &mut DtSharedBoundary,
    config: &CrowdConfig,
) {
    let move_dir = if len_2d(ag.dvel) > 0.0001 {
        normalize_2d(ag.dvel)
    } else {
        normalize_2d(ag.vel)
    };
    let path_end = (ag.target_state == MoveRequestState::Valid && !ag.partial)
        .then(|| ag.corridor.get_target());
    let query = BoundaryQuery {
        pos: ag.npos,
        collision_query_range: ag.params.collision_query_range,
        move_dir,
        path_end,
    };
    let poly_ref = ag.corridor.get_first_poly();

    if !config.use_shared_boundary {
        ag.boundary.update(poly_ref, &query, navquery, filter);
        return;
    }

    let range = ag.params.collision_query_range;
    let cached = if config.single_area_visibility_optimization {
        let area = navquery.poly_area(poly_ref).unwrap_or(DEFAULT_AREA);
        shared_boundary.cache_data(
            ag.npos,
            range,
            poly_ref,
            navquery,
            &filter.restricted_to_area(area),
            SharedBoundaryKey::SingleArea(area),
        )
    } else {
        shared_boundary.cache_data(
            ag.npos,
            range,
            poly_ref,
            navquery,
            filter,
            SharedBoundaryKey::Filter(ag.params.query_filter_type),
        )
    };

    match cached.and_then(|i| shared_boundary.get_data(i)) {
        Some(data) => ag.boundary.update_from_shared(poly_ref, &query, data),
        None => ag.boundary.update(poly_ref, &query, navquery, filter),
    }
}

fn get_neighbours(
    idx: usize,
    agents: &[CrowdAgent],
    grid: &ProximityGrid,
) -> BoundedList<CrowdNeighbour, DT_CROWDAGENT_MAX_NEIGHBOURS> {
    let ag = &agents[idx];
    let pos = ag.npos;
    let range = ag.params.collision_query_range;

    let mut ids = [0usize; MAX_NEIS_QUERY];
    let n = grid.query_items(pos.x - range, pos.z - range, pos.x + range, pos.z + range, &mut ids);

    let mut result = BoundedList::new();
    for &id in &ids[..n] {
        if id == idx {
            continue;
        }
        let Some(nei) = agents.get(id).filter(|a| a.active) else {
            continue;
        };

        let group = nei.params.avoidance_group;
        if ag.params.groups_to_avoid & group == 0 || ag.params.groups_to_ignore & group != 0 {
            continue;
        }

        // Check for overlap.
        let diff = pos - nei.npos;
        if diff.y.abs() >= (ag.params.height + nei.params.height) / 2.0 {
            continue;
        }
        let dist_sqr = diff.x * diff.x + diff.z * diff.z;
        if dist_sqr > sqr(range) {
            continue;
        }

        result.insert_sorted_by(CrowdNeighbour { idx: id, dist: dist_sqr }, |a, b| {
            a.dist < b.dist
        });
    }
    result
}

fn calc_smooth_steer_direction(ag: &CrowdAgent) -> Vec3 {
    let corners = ag.corners.as_slice();
    if corners.is_empty() {
        return Vec3::ZERO;
    }

    let ip1 = 1.min(corners.len() - 1);
    let mut dir0 = corners[0].pos - ag.npos;
    let mut dir1 = corners[ip1].pos - ag.npos;
    dir0.y = 0.0;
    dir1.y = 0.0;

    let len0 = dir0.length();
    let len1 = dir1.length();
    if len1 > 0.001 {
        dir1 *= 1.0 / len1;
    }

    normalize_2d(dir0 - dir1 * (len0 * 0.5))
}

fn calc_straight_steer_direction(ag: &CrowdAgent) -> Vec3 {
    match ag.corners.first() {
        Some(corner) => normalize_2d(corner.pos - ag.npos),
        None => Vec3::ZERO,
    }
}

fn get_distance_to_goal(ag: &CrowdAgent, range: f32) -> f32 {
    match ag.corners.last() {
        Some(last) if last.flags.contains(StraightPathFlags::END) => {
            dist_2d(ag.npos, last.pos).min(range)
        }
        _ => range,
    }
}

/// Push away from the neighbours, sideways for those straight ahead
fn separation(ag: &CrowdAgent, agents: &[CrowdAgent], dvel: Vec3) -> Vec3 {
    let separation_dist = ag.params.collision_query_range;
    if separation_dist <= 0.0 {
        return Vec3::ZERO;
    }
    let inv_separation_dist = 1.0 / separation_dist;
    let heading = normalize_2d(dvel);
    let moving = heading != Vec3::ZERO;

    let mut disp = Vec3::ZERO;
    let mut w = 0.0;
    for nei in &ag.neis {
        let other = &agents[nei.idx];
        let mut diff = ag.npos - other.npos;
        diff.y = 0.0;

        let dist_sqr = diff.length_squared();
        if dist_sqr < 0.00001 || dist_sqr > sqr(separation_dist) {
            continue;
        }
        let dist = dist_sqr.sqrt();
        let weight = ag.params.separation_weight * (1.0 - sqr(dist * inv_separation_dist));

        if moving && dot_2d(heading, -diff) / dist > HEAD_ON_COS {
            // Turn away on the side the neighbour is offset to.
            let cross = heading.x * diff.z - heading.z * diff.x;
            let side = if cross > 0.0 { -1.0 } else { 1.0 };
            diff = Vec3::new(-diff.z, 0.0, diff.x) * side;
        }

        disp += diff * (weight / dist);
        w += 1.0;
    }

    if w > 0.0001 {
        disp * (1.0 / w)
    } else {
        Vec3::ZERO
    }
}

fn collision_displacement(ag: &CrowdAgent, agents: &[CrowdAgent]) -> Vec3 {
    let mut disp = Vec3::ZERO;
    let mut w = 0.0;

    for nei in &ag.neis {
        let other = &agents[nei.idx];
        let mut diff = ag.npos - other.npos;
        diff.y = 0.0;

        let radius_sum = ag.params.radius + other.params.radius;
        let dist_sqr = diff.length_squared();
        if dist_sqr > sqr(radius_sum) {
            continue;
        }
        let dist = dist_sqr.sqrt();
        let pen = if dist < 0.0001 {
            // Agents on top of each other, try to choose diverging separation directions.
            diff = if ag.idx > nei.idx {
                Vec3::new(-ag.dvel.z, 0.0, ag.dvel.x)
            } else {
                Vec3::new(ag.dvel.z, 0.0, -ag.dvel.x)
            };
            if diff.length_squared() < 1e-8 {
                diff = if ag.idx > nei.idx { -Vec3::X } else { Vec3::X };
            }
            0.01
        } else {
            (1.0 / dist) * ((radius_sum - dist) * 0.5) * COLLISION_RESOLVE_FACTOR
        };

        disp += diff * pen;
        w += 1.0;
    }

    if w > 0.0001 {
        disp * (1.0 / w)
    } else {
        disp
    }
}
