//! Velocity sampling obstacle avoidance
//!
//! [`DtObstacleAvoidanceQuery`] scores candidate velocities against nearby agents
//! (moving circles) and walls (segments) and picks the cheapest one. Candidates
//! come either from an adaptive polar pattern refined over several passes, or
//! from a fixed custom pattern evaluated once.

use std::f32::consts::PI;

use nav_common::{
    dist_2d, dist_point_segment_sqr_2d, dot_2d, normalize_2d, perp_2d, sqr, tri_area_2d, Error,
    Result, Vec3,
};

use crate::BoundedList;

pub const DT_MAX_PATTERN_DIVS: usize = 32;
pub const DT_MAX_PATTERN_RINGS: usize = 4;
/// Maximum number of samples in a custom pattern
pub const DT_MAX_CUSTOM_SAMPLES: usize = 16;

const MAX_PATTERN_SIZE: usize = DT_MAX_PATTERN_DIVS * DT_MAX_PATTERN_RINGS + 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct DtObstacleCircle {
    /// Position of the obstacle
    pub p: Vec3,
    /// Velocity of the obstacle
    pub vel: Vec3,
    /// Desired velocity of the obstacle
    pub dvel: Vec3,
    /// Radius of the obstacle
    pub rad: f32,
    /// Direction to the obstacle, used for side selection during sampling
    pub dp: Vec3,
    /// Preferred passing side, used for side selection during sampling
    pub np: Vec3,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DtObstacleSegment {
    /// Start point of the obstacle segment
    pub p: Vec3,
    /// End point of the obstacle segment
    pub q: Vec3,
    /// The agent is touching the segment
    pub touch: bool,
    /// Hits against this segment do not count towards the time of impact
    pub can_ignore: bool,
}

/// How candidate velocities are generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum AvoidanceSampling {
    /// Polar pattern around the desired velocity refined `depth` times
    Adaptive { divs: u8, rings: u8, depth: u8 },
    /// Custom pattern registered on the crowd at this index
    Pattern(u8),
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct DtObstacleAvoidanceParams {
    /// How much the sampling is centered on the desired velocity
    pub vel_bias: f32,
    /// Weight for deviating from the desired velocity
    pub weight_des_vel: f32,
    /// Weight for deviating from the current velocity
    pub weight_cur_vel: f32,
    /// Weight for passing obstacles on the preferred side
    pub weight_side: f32,
    /// Weight for the time of impact
    pub weight_toi: f32,
    /// Time horizon of the time of impact
    pub horiz_time: f32,
    pub sampling: AvoidanceSampling,
}

impl Default for DtObstacleAvoidanceParams {
    fn default() -> Self {
        Self {
            vel_bias: 0.4,
            weight_des_vel: 2.0,
            weight_cur_vel: 0.75,
            weight_side: 0.75,
            weight_toi: 2.5,
            horiz_time: 2.5,
            sampling: AvoidanceSampling::Adaptive {
                divs: 7,
                rings: 2,
                depth: 5,
            },
        }
    }
}

/// Fixed sampling pattern, angles are relative to the desired velocity
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct DtObstacleAvoidancePattern {
    angles: [f32; DT_MAX_CUSTOM_SAMPLES],
    radii: [f32; DT_MAX_CUSTOM_SAMPLES],
    n_samples: usize,
}

impl DtObstacleAvoidancePattern {
    /// Creates a pattern from `(angle, radius)` samples. Radii are fractions of the max speed.
    pub fn new(samples: &[(f32, f32)]) -> Result<Self> {
        if samples.len() > DT_MAX_CUSTOM_SAMPLES {
            return Err(Error::InvalidParam(format!(
                "avoidance pattern holds at most {DT_MAX_CUSTOM_SAMPLES} samples, got {}",
                samples.len()
            )));
        }
        let mut pattern = Self::default();
        for (i, &(angle, radius)) in samples.iter().enumerate() {
            pattern.angles[i] = angle;
            pattern.radii[i] = radius;
        }
        pattern.n_samples = samples.len();
        Ok(pattern)
    }

    pub fn get_sample_count(&self) -> usize {
        self.n_samples
    }

    /// Sample `i` as `(angle, radius)`
    pub fn get_sample(&self, i: usize) -> Option<(f32, f32)> {
        (i < self.n_samples).then(|| (self.angles[i], self.radii[i]))
    }
}

/// Candidate velocities and penalties recorded during one sampling call
#[derive(Debug, Clone, Default)]
pub struct DtObstacleAvoidanceDebugData {
    max_samples: usize,
    vel: Vec<Vec3>,
    ssize: Vec<f32>,
    pen: Vec<f32>,
    vpen: Vec<f32>,
    vcpen: Vec<f32>,
    spen: Vec<f32>,
    tpen: Vec<f32>,
}

impl DtObstacleAvoidanceDebugData {
    pub fn new(max_samples: usize) -> Self {
        Self {
            max_samples,
            vel: Vec::with_capacity(max_samples),
            ssize: Vec::with_capacity(max_samples),
            pen: Vec::with_capacity(max_samples),
            vpen: Vec::with_capacity(max_samples),
            vcpen: Vec::with_capacity(max_samples),
            spen: Vec::with_capacity(max_samples),
            tpen: Vec::with_capacity(max_samples),
        }
    }

    pub fn reset(&mut self) {
        self.vel.clear();
        self.ssize.clear();
        self.pen.clear();
        self.vpen.clear();
        self.vcpen.clear();
        self.spen.clear();
        self.tpen.clear();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_sample(
        &mut self,
        vel: Vec3,
        ssize: f32,
        pen: f32,
        vpen: f32,
        vcpen: f32,
        spen: f32,
        tpen: f32,
    ) {
        if self.vel.len() >= self.max_samples {
            return;
        }
        self.vel.push(vel);
        self.ssize.push(ssize);
        self.pen.push(pen);
        self.vpen.push(vpen);
        self.vcpen.push(vcpen);
        self.spen.push(spen);
        self.tpen.push(tpen);
    }

    /// Rescales every penalty series into `[0, 1]` for display
    pub fn normalize_samples(&mut self) {
        normalize_array(&mut self.pen);
        normalize_array(&mut self.vpen);
        normalize_array(&mut self.vcpen);
        normalize_array(&mut self.spen);
        normalize_array(&mut self.tpen);
    }

    pub fn get_sample_count(&self) -> usize {
        self.vel.len()
    }

    pub fn get_sample_velocity(&self, i: usize) -> Option<Vec3> {
        self.vel.get(i).copied()
    }

    pub fn get_sample_size(&self, i: usize) -> Option<f32> {
        self.ssize.get(i).copied()
    }

    pub fn get_sample_penalty(&self, i: usize) -> Option<f32> {
        self.pen.get(i).copied()
    }

    pub fn get_sample_desired_velocity_penalty(&self, i: usize) -> Option<f32> {
        self.vpen.get(i).copied()
    }

    pub fn get_sample_current_velocity_penalty(&self, i: usize) -> Option<f32> {
        self.vcpen.get(i).copied()
    }

    pub fn get_sample_preferred_side_penalty(&self, i: usize) -> Option<f32> {
        self.spen.get(i).copied()
    }

    pub fn get_sample_collision_time_penalty(&self, i: usize) -> Option<f32> {
        self.tpen.get(i).copied()
    }
}

/// Agent state passed to the samplers
#[derive(Debug, Clone, Copy)]
pub struct AvoidanceAgent {
    pub pos: Vec3,
    pub rad: f32,
    pub vmax: f32,
    pub vel: Vec3,
    pub dvel: Vec3,
}

#[derive(Debug, Clone, Default)]
pub struct DtObstacleAvoidanceQuery {
    params: DtObstacleAvoidanceParams,
    inv_horiz_time: f32,
    vmax: f32,
    inv_vmax: f32,

    max_circles: usize,
    circles: Vec<DtObstacleCircle>,

    max_segments: usize,
    segments: Vec<DtObstacleSegment>,
}

impl DtObstacleAvoidanceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves room for the obstacles of one sampling call
    pub fn init(&mut self, max_circles: usize, max_segments: usize) -> Result<()> {
        if max_circles == 0 && max_segments == 0 {
            return Err(Error::InvalidParam(
                "obstacle avoidance needs room for circles or segments".into(),
            ));
        }
        self.max_circles = max_circles;
        self.max_segments = max_segments;
        self.circles = Vec::with_capacity(max_circles);
        self.segments = Vec::with_capacity(max_segments);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.circles.clear();
        self.segments.clear();
    }

    /// Adds a moving circle. Returns false when the circle capacity is used up.
    pub fn add_circle(&mut self, pos: Vec3, rad: f32, vel: Vec3, dvel: Vec3) -> bool {
        if self.circles.len() >= self.max_circles {
            return false;
        }
        self.circles.push(DtObstacleCircle {
            p: pos,
            vel,
            dvel,
            rad,
            ..Default::default()
        });
        true
    }

    /// Adds a wall segment. Returns false when the segment capacity is used up.
    pub fn add_segment(&mut self, p: Vec3, q: Vec3, can_ignore: bool) -> bool {
        if self.segments.len() >= self.max_segments {
            return false;
        }
        self.segments.push(DtObstacleSegment {
            p,
            q,
            touch: false,
            can_ignore,
        });
        true
    }

    pub fn get_obstacle_circle_count(&self) -> usize {
        self.circles.len()
    }

    pub fn get_obstacle_circle(&self, i: usize) -> Option<&DtObstacleCircle> {
        self.circles.get(i)
    }

    pub fn get_obstacle_segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn get_obstacle_segment(&self, i: usize) -> Option<&DtObstacleSegment> {
        self.segments.get(i)
    }

    /// Samples with a polar pattern aligned to the desired velocity, refining
    /// around the best candidate each pass.
    ///
    /// Returns the chosen velocity and the number of evaluated samples.
    pub fn sample_velocity_adaptive(
        &mut self,
        agent: &AvoidanceAgent,
        params: &DtObstacleAvoidanceParams,
        mut debug: Option<&mut DtObstacleAvoidanceDebugData>,
    ) -> (Vec3, usize) {
        self.begin_sampling(agent, params);
        if let Some(d) = debug.as_deref_mut() {
            d.reset();
        }

        let (divs, rings, depth) = match params.sampling {
            AvoidanceSampling::Adaptive { divs, rings, depth } => (divs, rings, depth),
            AvoidanceSampling::Pattern(_) => (7, 2, 5),
        };
        let pattern = adaptive_pattern(agent.dvel, divs, rings);

        let mut cr = agent.vmax * (1.0 - params.vel_bias);
        let mut res = Vec3::new(agent.dvel.x * params.vel_bias, 0.0, agent.dvel.z * params.vel_bias);
        let mut ns = 0;

        for _ in 0..depth {
            let mut min_penalty = f32::MAX;
            let mut bvel = Vec3::ZERO;
            for p in &pattern {
                let vcand = Vec3::new(res.x + p.x * cr, 0.0, res.z + p.z * cr);
                if sqr(vcand.x) + sqr(vcand.z) > sqr(agent.vmax + 0.001) {
                    continue;
                }

                let penalty =
                    self.process_sample(vcand, cr / 10.0, agent, min_penalty, debug.as_deref_mut());
                ns += 1;
                if penalty < min_penalty {
                    min_penalty = penalty;
                    bvel = vcand;
                }
            }

            res = bvel;
            cr *= 0.5;
        }

        (res, ns)
    }

    /// Samples a fixed pattern once.
    ///
    /// Returns the chosen velocity and the number of evaluated samples.
    pub fn sample_velocity_custom(
        &mut self,
        agent: &AvoidanceAgent,
        params: &DtObstacleAvoidanceParams,
        pattern: &DtObstacleAvoidancePattern,
        mut debug: Option<&mut DtObstacleAvoidanceDebugData>,
    ) -> (Vec3, usize) {
        self.begin_sampling(agent, params);
        if let Some(d) = debug.as_deref_mut() {
            d.reset();
        }

        let angle0 = agent.dvel.x.atan2(agent.dvel.z);
        let cs = agent.vmax * 0.1;
        let mut min_penalty = f32::MAX;
        let mut nvel = Vec3::ZERO;
        let mut ns = 0;

        for i in 0..pattern.n_samples {
            let angle = angle0 + pattern.angles[i];
            let speed = agent.vmax * pattern.radii[i];
            let vcand = Vec3::new(angle.sin() * speed, 0.0, angle.cos() * speed);
            if sqr(vcand.x) + sqr(vcand.z) > sqr(agent.vmax + 0.001) {
                continue;
            }

            let penalty = self.process_sample(vcand, cs, agent, min_penalty, debug.as_deref_mut());
            ns += 1;
            if penalty < min_penalty {
                min_penalty = penalty;
                nvel = vcand;
            }
        }

        (nvel, ns)
    }

    fn begin_sampling(&mut self, agent: &AvoidanceAgent, params: &DtObstacleAvoidanceParams) {
        self.prepare(agent.pos, agent.dvel);
        self.params = *params;
        self.inv_horiz_time = 1.0 / params.horiz_time;
        self.vmax = agent.vmax;
        self.inv_vmax = if agent.vmax > 0.0 {
            1.0 / agent.vmax
        } else {
            0.0
        };
    }

    fn prepare(&mut self, pos: Vec3, dvel: Vec3) {
        for cir in &mut self.circles {
            // Side
            cir.dp = (cir.p - pos).normalize_or_zero();
            let dv = cir.dvel - dvel;
            let a = tri_area_2d(Vec3::ZERO, cir.dp, dv);
            cir.np = if a < 0.01 {
                Vec3::new(-cir.dp.z, 0.0, cir.dp.x)
            } else {
                Vec3::new(cir.dp.z, 0.0, -cir.dp.x)
            };
        }

        for seg in &mut self.segments {
            // Precalc if the agent is really close to the segment.
            let r = 0.01;
            let (dist_sqr, _) = dist_point_segment_sqr_2d(pos, seg.p, seg.q);
            seg.touch = dist_sqr < sqr(r);
        }
    }

    fn process_sample(
        &self,
        vcand: Vec3,
        cs: f32,
        agent: &AvoidanceAgent,
        min_penalty: f32,
        debug: Option<&mut DtObstacleAvoidanceDebugData>,
    ) -> f32 {
        let params = &self.params;

        // Penalty for straying away from the desired and current velocities.
        let vpen = params.weight_des_vel * (dist_2d(vcand, agent.dvel) * self.inv_vmax);
        let vcpen = params.weight_cur_vel * (dist_2d(vcand, agent.vel) * self.inv_vmax);

        // Bail out once the impact time alone can no longer beat the best sample.
        let min_pen = min_penalty - vpen - vcpen;
        let t_threshold = (params.weight_toi / min_pen - 0.1) * params.horiz_time;
        if t_threshold - params.horiz_time > -f32::EPSILON {
            // Already too much.
            if let Some(d) = debug {
                d.add_sample(vcand, cs, min_penalty, vpen, vcpen, 0.0, 0.0);
            }
            return min_penalty;
        }

        let mut tmin = params.horiz_time;
        let mut side = 0.0;
        let mut nside = 0;

        for cir in &self.circles {
            // RVO
            let vab = vcand * 2.0 - agent.vel - cir.vel;

            // Side
            side += (dot_2d(cir.dp, vab) * 0.5 + 0.5)
                .min(dot_2d(cir.np, vab) * 2.0)
                .clamp(0.0, 1.0);
            nside += 1;

            let Some((mut htmin, htmax)) = sweep_circle_circle(agent.pos, agent.rad, vab, cir.p, cir.rad)
            else {
                continue;
            };

            // Handle overlapping obstacles.
            if htmin < 0.0 && htmax > 0.0 {
                htmin = -htmin * 0.5;
            }

            if htmin >= 0.0 && htmin < tmin {
                tmin = htmin;
                if tmin < t_threshold {
                    if let Some(d) = debug {
                        d.add_sample(vcand, cs, min_penalty, vpen, vcpen, 0.0, 0.0);
                    }
                    return min_penalty;
                }
            }
        }

        for seg in &self.segments {
            let mut htmin = if seg.touch {
                // Moving away from a touched segment never collides with it.
                let sdir = seg.q - seg.p;
                let snorm = Vec3::new(-sdir.z, 0.0, sdir.x);
                if dot_2d(snorm, vcand) < 0.0 {
                    continue;
                }
                0.0
            } else {
                match isect_ray_seg(agent.pos, vcand, seg.p, seg.q) {
                    Some(t) => t,
                    None => continue,
                }
            };

            // Avoid less when facing walls.
            htmin *= 2.0;

            if seg.can_ignore {
                continue;
            }

            if htmin < tmin {
                tmin = htmin;
                if tmin < t_threshold {
                    if let Some(d) = debug {
                        d.add_sample(vcand, cs, min_penalty, vpen, vcpen, 0.0, 0.0);
                    }
                    return min_penalty;
                }
            }
        }

        // Normalize side bias.
        if nside > 0 {
            side /= nside as f32;
        }

        let spen = params.weight_side * side;
        let tpen = params.weight_toi * (1.0 / (0.1 + tmin * self.inv_horiz_time));

        let penalty = vpen + vcpen + spen + tpen;

        if let Some(d) = debug {
            d.add_sample(vcand, cs, penalty, vpen, vcpen, spen, tpen);
        }

        penalty
    }
}

/// Builds the adaptive pattern: the zero sample followed by `rings` rings of
/// `divs` directions, alternating between on-axis and half-step rotated rings.
fn adaptive_pattern(dvel: Vec3, divs: u8, rings: u8) -> BoundedList<Vec3, MAX_PATTERN_SIZE> {
    let nd = (divs as usize).clamp(1, DT_MAX_PATTERN_DIVS);
    let nr = (rings as usize).clamp(1, DT_MAX_PATTERN_RINGS);
    let da = (1.0 / nd as f32) * PI * 2.0;
    let ca = da.cos();
    let sa = da.sin();

    // Desired direction and the same rotated by half a division.
    let ddir0 = normalize_2d(dvel);
    let ddir1 = rotate_2d(ddir0, da * 0.5);

    let mut pat = BoundedList::new();
    pat.push(Vec3::ZERO);

    for j in 0..nr {
        let r = (nr - j) as f32 / nr as f32;
        let dir = if j % 2 == 0 { ddir0 } else { ddir1 };
        let first = Vec3::new(dir.x * r, 0.0, dir.z * r);
        pat.push(first);
        let mut last1 = first;
        let mut last2 = first;

        for _ in (1..nd.saturating_sub(1)).step_by(2) {
            // Next point on the right (rotate CW) and on the left (rotate CCW).
            let right = Vec3::new(last1.x * ca + last1.z * sa, 0.0, -last1.x * sa + last1.z * ca);
            let left = Vec3::new(last2.x * ca - last2.z * sa, 0.0, last2.x * sa + last2.z * ca);
            pat.push(right);
            pat.push(left);
            last1 = right;
            last2 = left;
        }

        if nd % 2 == 0 {
            pat.push(Vec3::new(
                last2.x * ca - last2.z * sa,
                0.0,
                last2.x * sa + last2.z * ca,
            ));
        }
    }

    pat
}

fn rotate_2d(v: Vec3, ang: f32) -> Vec3 {
    let c = ang.cos();
    let s = ang.sin();
    Vec3::new(v.x * c - v.z * s, v.y, v.x * s + v.z * c)
}

fn sweep_circle_circle(c0: Vec3, r0: f32, v: Vec3, c1: Vec3, r1: f32) -> Option<(f32, f32)> {
    const EPS: f32 = 0.0001;
    let s = c1 - c0;
    let r = r0 + r1;
    let c = dot_2d(s, s) - r * r;
    let a = dot_2d(v, v);
    if a < EPS {
        // Not moving
        return None;
    }

    // Overlap, calc time to exit.
    let b = dot_2d(v, s);
    let d = b * b - a * c;
    if d < 0.0 {
        // No intersection.
        return None;
    }
    let a = 1.0 / a;
    let rd = d.sqrt();
    Some(((b - rd) * a, (b + rd) * a))
}

fn isect_ray_seg(ap: Vec3, u: Vec3, bp: Vec3, bq: Vec3) -> Option<f32> {
    let v = bq - bp;
    let w = ap - bp;
    let d = perp_2d(u, v);
    if d.abs() < 1e-6 {
        return None;
    }
    let d = 1.0 / d;
    let t = perp_2d(v, w) * d;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    let s = perp_2d(u, w) * d;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }
    Some(t)
}

fn normalize_array(arr: &mut [f32]) {
    if arr.is_empty() {
        return;
    }
    let min_pen = arr.iter().copied().fold(f32::MAX, f32::min);
    let max_pen = arr.iter().copied().fold(-f32::MAX, f32::max);
    let pen_range = max_pen - min_pen;
    let s = if pen_range > 0.001 { 1.0 / pen_range } else { 1.0 };
    for v in arr.iter_mut() {
        *v = ((*v - min_pen) * s).clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(dvel: Vec3, vel: Vec3, vmax: f32) -> AvoidanceAgent {
        AvoidanceAgent {
            pos: Vec3::ZERO,
            rad: 0.5,
            vmax,
            vel,
            dvel,
        }
    }

    fn query() -> DtObstacleAvoidanceQuery {
        let mut q = DtObstacleAvoidanceQuery::new();
        q.init(6, 8).unwrap();
        q
    }

    #[test]
    fn test_init_requires_capacity() {
        let mut q = DtObstacleAvoidanceQuery::new();
        assert!(q.init(0, 0).is_err());
        assert!(q.init(1, 0).is_ok());
        assert!(q.add_circle(Vec3::ZERO, 1.0, Vec3::ZERO, Vec3::ZERO));
        assert!(!q.add_circle(Vec3::ZERO, 1.0, Vec3::ZERO, Vec3::ZERO));
        assert!(!q.add_segment(Vec3::ZERO, Vec3::X, false));
    }

    #[test]
    fn test_adaptive_pattern_sizes() {
        // Odd and even division counts both produce `divs` samples per ring.
        assert_eq!(adaptive_pattern(Vec3::X, 7, 2).len(), 1 + 7 * 2);
        assert_eq!(adaptive_pattern(Vec3::X, 8, 3).len(), 1 + 8 * 3);
        assert_eq!(adaptive_pattern(Vec3::X, 0, 0).len(), 2);
        assert_eq!(
            adaptive_pattern(Vec3::X, 255, 255).len(),
            MAX_PATTERN_SIZE
        );

        // Even division counts close the ring, every sample lies on it.
        let pat = adaptive_pattern(Vec3::X, 8, 1);
        for p in pat.iter().skip(1) {
            assert!((p.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_free_space_keeps_desired_velocity() {
        let mut q = query();
        let dvel = Vec3::new(2.0, 0.0, 0.0);
        let (nvel, ns) = q.sample_velocity_adaptive(
            &agent(dvel, dvel, 2.0),
            &DtObstacleAvoidanceParams::default(),
            None,
        );
        assert!(ns > 0);
        assert!(nvel.distance(dvel) < 1e-3, "got {nvel:?}");
    }

    #[test]
    fn test_head_on_circle_is_avoided() {
        let mut q = query();
        let dvel = Vec3::new(1.0, 0.0, 0.0);
        q.add_circle(Vec3::new(2.0, 0.0, 0.0), 0.5, Vec3::new(-1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));

        let (nvel, _) = q.sample_velocity_adaptive(
            &agent(dvel, dvel, 1.0),
            &DtObstacleAvoidanceParams::default(),
            None,
        );
        assert!(nvel.z.abs() > 0.1, "expected a sidestep, got {nvel:?}");
        assert!(nvel.length() <= 1.0 + 1e-3);
    }

    #[test]
    fn test_custom_pattern() -> Result<()> {
        let mut q = query();
        let dvel = Vec3::new(0.0, 0.0, 1.5);
        let pattern = DtObstacleAvoidancePattern::new(&[(0.0, 1.0), (PI, 1.0)])?;
        let params = DtObstacleAvoidanceParams {
            sampling: AvoidanceSampling::Pattern(0),
            ..Default::default()
        };

        let (nvel, ns) = q.sample_velocity_custom(&agent(dvel, dvel, 1.5), &params, &pattern, None);
        assert_eq!(ns, 2);
        assert!(nvel.distance(dvel) < 1e-4);

        let too_many = vec![(0.0, 1.0); DT_MAX_CUSTOM_SAMPLES + 1];
        assert!(DtObstacleAvoidancePattern::new(&too_many).is_err());
        Ok(())
    }

    #[test]
    fn test_touching_segment_is_flagged() {
        let mut q = query();
        q.add_segment(Vec3::new(-1.0, 0.0, 0.005), Vec3::new(1.0, 0.0, 0.005), false);
        q.add_segment(Vec3::new(-1.0, 0.0, 3.0), Vec3::new(1.0, 0.0, 3.0), false);
        let dvel = Vec3::new(1.0, 0.0, 0.0);
        q.sample_velocity_adaptive(&agent(dvel, dvel, 1.0), &DtObstacleAvoidanceParams::default(), None);
        assert!(q.get_obstacle_segment(0).unwrap().touch);
        assert!(!q.get_obstacle_segment(1).unwrap().touch);
    }

    #[test]
    fn test_wall_ahead_slows_agent() {
        let dvel = Vec3::new(1.0, 0.0, 0.0);
        let params = DtObstacleAvoidanceParams::default();

        let mut blocked = query();
        blocked.add_segment(Vec3::new(0.8, 0.0, -5.0), Vec3::new(0.8, 0.0, 5.0), false);
        let (nvel, _) = blocked.sample_velocity_adaptive(&agent(dvel, dvel, 1.0), &params, None);

        // The same wall marked as ignorable does not change the answer.
        let mut ignored = query();
        ignored.add_segment(Vec3::new(0.8, 0.0, -5.0), Vec3::new(0.8, 0.0, 5.0), true);
        let (free, _) = ignored.sample_velocity_adaptive(&agent(dvel, dvel, 1.0), &params, None);

        assert!(free.distance(dvel) < 1e-3);
        assert!(nvel.distance(dvel) > 1e-2);
    }

    #[test]
    fn test_debug_records_samples_that_bail_out() {
        let mut q = query();
        let mut debug = DtObstacleAvoidanceDebugData::new(512);
        let dvel = Vec3::new(1.0, 0.0, 0.0);

        let (nvel, ns) = q.sample_velocity_adaptive(
            &agent(dvel, dvel, 1.0),
            &DtObstacleAvoidanceParams::default(),
            Some(&mut debug),
        );
        assert!(nvel.distance(dvel) < 1e-3);
        assert_eq!(debug.get_sample_count(), ns);

        // Samples that bailed out carry the best penalty known at that point,
        // which is never above the penalty of the first sample.
        let first = debug.get_sample_penalty(0).unwrap();
        for i in 0..ns {
            let pen = debug.get_sample_penalty(i).unwrap();
            assert!(pen.is_finite());
            assert!(debug.get_sample_size(i).unwrap() > 0.0);
            if debug.get_sample_collision_time_penalty(i) == Some(0.0) {
                assert!(pen <= first);
            }
        }
    }

    #[test]
    fn test_debug_samples_are_normalized() {
        let mut q = query();
        let mut debug = DtObstacleAvoidanceDebugData::new(512);
        let dvel = Vec3::new(1.0, 0.0, 0.0);
        q.add_circle(Vec3::new(1.5, 0.0, 0.0), 0.5, Vec3::ZERO, Vec3::ZERO);

        let (_, ns) = q.sample_velocity_adaptive(
            &agent(dvel, Vec3::ZERO, 1.0),
            &DtObstacleAvoidanceParams::default(),
            Some(&mut debug),
        );
        assert!(ns > 0);
        assert_eq!(debug.get_sample_count(), ns);

        debug.normalize_samples();
        for i in 0..debug.get_sample_count() {
            let pen = debug.get_sample_penalty(i).unwrap();
            assert!((0.0..=1.0).contains(&pen));
        }
        assert!(debug.get_sample_velocity(debug.get_sample_count()).is_none());
    }
}
