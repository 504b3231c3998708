//! End to end crowd scenarios on small hand built meshes

use detour::test_mesh_helpers::{
    create_corridor_navmesh, create_flat_navmesh, create_gap_navmesh, create_strip_navmesh,
};
use detour::{NavMeshQuery, PolyRef, SimpleNavMesh};
use nav_common::{dist_2d, Error, Result, Vec3};

use crate::{
    AgentParams, Crowd, CrowdAgentDebugInfo, CrowdAgentState, CrowdConfig, MoveRequestState,
    OffMeshTraversal, UpdateFlags,
};

const DT: f32 = 0.1;

fn agent_params(radius: f32, max_speed: f32, update_flags: UpdateFlags) -> AgentParams {
    AgentParams {
        max_speed,
        max_acceleration: 8.0,
        update_flags,
        ..AgentParams::new(radius, 2.0)
    }
}

fn run(crowd: &mut Crowd<SimpleNavMesh>, ticks: usize) {
    for _ in 0..ticks {
        crowd.update(DT, None);
    }
}

fn pos_of(crowd: &Crowd<SimpleNavMesh>, idx: usize) -> Vec3 {
    crowd.get_agent(idx).map(|a| a.get_pos()).unwrap_or(Vec3::NAN)
}

#[test]
fn test_single_agent_reaches_target() -> Result<()> {
    let mesh = create_flat_navmesh(20.0, 4.0)?;
    let target_ref = mesh.poly_ref(0)?;
    let mut crowd = Crowd::new(CrowdConfig::new(4, 0.5), mesh)?;

    let params = agent_params(0.5, 2.0, UpdateFlags::ANTICIPATE_TURNS);
    let idx = crowd.add_agent(Vec3::new(2.0, 0.0, 2.0), params)?;
    let target = Vec3::new(12.0, 0.0, 2.0);
    crowd.request_move_target(idx, target_ref, target)?;

    for _ in 0..50 {
        crowd.update(DT, None);
        let agent = crowd.get_agent(idx).unwrap();
        assert!(agent.get_vel().length() <= 2.0 + 1e-4);
    }

    let agent = crowd.get_agent(idx).unwrap();
    assert_eq!(agent.get_target_state(), MoveRequestState::Valid);
    assert_eq!(agent.get_state(), CrowdAgentState::Walking);
    // Within one integration step of the goal.
    assert!(dist_2d(agent.get_pos(), target) <= 2.0 * DT + 1e-3);
    Ok(())
}

#[test]
fn test_head_on_agents_pass_without_overlap() -> Result<()> {
    let mesh = create_corridor_navmesh(20.0, 4.0)?;
    let start_ref = mesh.poly_ref(0)?;
    let end_ref = mesh.poly_ref(4)?;
    let mut crowd = Crowd::new(CrowdConfig::new(4, 0.5), mesh)?;

    let flags = UpdateFlags::ANTICIPATE_TURNS
        | UpdateFlags::OBSTACLE_AVOIDANCE
        | UpdateFlags::SEPARATION
        | UpdateFlags::SLOWDOWN_AT_GOAL;
    let a = crowd.add_agent(Vec3::new(2.0, 0.0, 2.0), agent_params(0.5, 2.0, flags))?;
    let b = crowd.add_agent(Vec3::new(18.0, 0.0, 2.0), agent_params(0.5, 2.0, flags))?;
    crowd.request_move_target(a, end_ref, Vec3::new(18.0, 0.0, 2.0))?;
    crowd.request_move_target(b, start_ref, Vec3::new(2.0, 0.0, 2.0))?;

    for _ in 0..200 {
        crowd.update(DT, None);
        let dist = dist_2d(pos_of(&crowd, a), pos_of(&crowd, b));
        assert!(dist >= 1.0 - 0.1, "agents overlap: {dist}");
    }

    assert!(pos_of(&crowd, a).x > 14.0);
    assert!(pos_of(&crowd, b).x < 6.0);
    Ok(())
}

#[test]
fn test_off_mesh_connection_animation() -> Result<()> {
    let (mesh, link) = create_gap_navmesh()?;
    let target_ref = mesh.poly_ref(1)?;
    let mut crowd = Crowd::new(CrowdConfig::new(4, 0.5), mesh)?;

    let flags = UpdateFlags::ANTICIPATE_TURNS | UpdateFlags::SLOWDOWN_AT_GOAL;
    let idx = crowd.add_agent(Vec3::new(3.0, 0.0, 2.0), agent_params(0.5, 2.0, flags))?;
    let target = Vec3::new(10.0, 0.0, 2.0);
    crowd.request_move_target(idx, target_ref, target)?;

    crowd.update(DT, None);
    let agent = crowd.get_agent(idx).unwrap();
    assert_eq!(agent.get_state(), CrowdAgentState::OffMesh);
    let anim = *crowd.get_agent_animation(idx).unwrap();
    assert!(anim.active);
    assert_eq!(anim.poly_ref, link);
    assert!((anim.start_pos - Vec3::new(3.0, 0.0, 2.0)).length() < 1e-5);
    assert!((anim.end_pos - Vec3::new(9.0, 0.0, 2.0)).length() < 1e-5);
    assert!((anim.tmax - 1.5).abs() < 1e-5);

    let mut ticks = 1;
    let mut last_x = pos_of(&crowd, idx).x;
    while crowd.get_agent(idx).unwrap().get_state() == CrowdAgentState::OffMesh && ticks < 30 {
        crowd.update(DT, None);
        ticks += 1;
        let agent = crowd.get_agent(idx).unwrap();
        assert!(agent.get_pos().x >= last_x - 1e-5);
        assert_eq!(agent.get_vel(), Vec3::ZERO);
        last_x = agent.get_pos().x;
    }

    // Traversal lasts tmax seconds.
    assert!((15..=16).contains(&ticks), "traversal took {ticks} ticks");
    let agent = crowd.get_agent(idx).unwrap();
    assert_eq!(agent.get_state(), CrowdAgentState::Walking);
    assert!((agent.get_pos() - anim.end_pos).length() < 1e-5);
    assert!(!crowd.get_agent_animation(idx).unwrap().active);

    run(&mut crowd, 30);
    let agent = crowd.get_agent(idx).unwrap();
    assert_eq!(agent.get_state(), CrowdAgentState::Walking);
    assert_eq!(agent.get_corridor().get_first_poly(), target_ref);
    assert!(dist_2d(agent.get_pos(), target) < 0.3);
    Ok(())
}

#[test]
fn test_off_mesh_connection_velocity_traversal() -> Result<()> {
    let (mesh, _) = create_gap_navmesh()?;
    let target_ref = mesh.poly_ref(1)?;
    let config = CrowdConfig {
        off_mesh_traversal: OffMeshTraversal::Velocity,
        prune_started_off_mesh_connections: true,
        ..CrowdConfig::new(4, 0.5)
    };
    let mut crowd = Crowd::new(config, mesh)?;

    let idx = crowd.add_agent(
        Vec3::new(3.0, 0.0, 2.0),
        agent_params(0.5, 2.0, UpdateFlags::ANTICIPATE_TURNS),
    )?;
    crowd.request_move_target(idx, target_ref, Vec3::new(10.0, 0.0, 2.0))?;

    let mut ticks = 0;
    let mut was_off_mesh = false;
    loop {
        crowd.update(DT, None);
        ticks += 1;
        let agent = crowd.get_agent(idx).unwrap();
        if agent.get_state() == CrowdAgentState::OffMesh {
            was_off_mesh = true;
            assert!((agent.get_vel().length() - 2.0).abs() < 1e-4);
        } else if was_off_mesh || ticks >= 40 {
            break;
        }
    }

    assert!(was_off_mesh);
    assert!((28..=32).contains(&ticks), "traversal took {ticks} ticks");
    let agent = crowd.get_agent(idx).unwrap();
    assert_eq!(agent.get_state(), CrowdAgentState::Walking);
    assert!(dist_2d(agent.get_pos(), Vec3::new(9.0, 0.0, 2.0)) < 1e-4);
    // The traversed link was dropped from the corridor.
    assert_eq!(agent.get_corridor().get_first_poly(), target_ref);
    Ok(())
}

#[test]
fn test_lost_agent_recovers_when_mesh_returns() -> Result<()> {
    let mesh = create_flat_navmesh(10.0, 10.0)?;
    let poly = mesh.poly_ref(0)?;
    let mut crowd = Crowd::new(CrowdConfig::new(2, 0.5), mesh)?;

    let idx = crowd.add_agent(
        Vec3::new(5.0, 0.0, 5.0),
        agent_params(0.5, 2.0, UpdateFlags::default()),
    )?;
    crowd.request_move_target(idx, poly, Vec3::new(8.0, 0.0, 5.0))?;
    crowd.update(DT, None);

    crowd.get_nav_mesh_query_mut().remove_polygon(poly)?;
    crowd.update(DT, None);
    let agent = crowd.get_agent(idx).unwrap();
    assert_eq!(agent.get_state(), CrowdAgentState::Invalid);
    assert!(!agent.get_corridor().get_first_poly().is_valid());

    // Nothing moves while the agent is off the mesh.
    let lost_at = agent.get_pos();
    run(&mut crowd, 3);
    assert_eq!(pos_of(&crowd, idx), lost_at);

    let restored = crowd.get_nav_mesh_query_mut().restore_polygon(0)?;
    let interval_ticks = (crowd.get_config().agent_state_check_interval / DT).ceil() as usize + 1;
    let mut recovered = false;
    for _ in 0..interval_ticks {
        crowd.update(DT, None);
        if crowd.get_agent(idx).unwrap().get_state() == CrowdAgentState::Walking {
            recovered = true;
            break;
        }
    }
    assert!(recovered);

    // The stale target is moved onto the restored polygon and replanned.
    let agent = crowd.get_agent(idx).unwrap();
    assert_eq!(agent.get_corridor().get_first_poly(), restored);
    assert_eq!(agent.get_target_ref(), restored);
    assert_eq!(agent.get_target_state(), MoveRequestState::Valid);
    Ok(())
}

#[test]
fn test_removed_target_polygon_moves_target() -> Result<()> {
    let mut mesh = create_strip_navmesh(5, 2.0)?;
    let refs: Vec<PolyRef> = (0..5).map(|i| mesh.poly_ref(i)).collect::<Result<_>>()?;
    let mut crowd = Crowd::new(CrowdConfig::new(2, 0.6), mesh.clone())?;

    let idx = crowd.add_agent(
        Vec3::new(1.0, 0.0, 1.0),
        agent_params(0.3, 1.0, UpdateFlags::ANTICIPATE_TURNS),
    )?;
    crowd.request_move_target(idx, refs[4], Vec3::new(9.0, 0.0, 1.0))?;
    crowd.update(DT, None);
    assert_eq!(crowd.get_agent(idx).unwrap().get_corridor().get_last_poly(), refs[4]);

    mesh.remove_polygon(refs[4])?;
    *crowd.get_nav_mesh_query_mut() = mesh;
    crowd.update(DT, None);

    let agent = crowd.get_agent(idx).unwrap();
    assert_eq!(agent.get_target_ref(), refs[3]);
    assert!((agent.get_target_pos() - Vec3::new(8.0, 0.0, 1.0)).length() < 1e-5);
    assert_eq!(agent.get_target_state(), MoveRequestState::Valid);
    assert_eq!(agent.get_corridor().get_last_poly(), refs[3]);
    Ok(())
}

#[test]
fn test_long_path_completed_by_path_queue() -> Result<()> {
    let mesh = create_strip_navmesh(40, 1.0)?;
    let first = mesh.poly_ref(0)?;
    let last = mesh.poly_ref(39)?;
    let mut crowd = Crowd::new(CrowdConfig::new(2, 0.3), mesh)?;

    let idx = crowd.add_agent(
        Vec3::new(0.5, 0.0, 0.5),
        agent_params(0.2, 1.0, UpdateFlags::ANTICIPATE_TURNS),
    )?;
    crowd.request_move_target(idx, last, Vec3::new(39.5, 0.0, 0.5))?;
    crowd.update(DT, None);

    let agent = crowd.get_agent(idx).unwrap();
    assert_eq!(agent.get_target_state(), MoveRequestState::Valid);
    let path = agent.get_corridor().get_path();
    assert_eq!(path.len(), 40);
    assert_eq!(path[0], first);
    assert_eq!(path[39], last);
    assert_eq!(crowd.get_path_queue().pending_count(), 0);
    Ok(())
}

#[test]
fn test_pool_capacity() -> Result<()> {
    let mesh = create_flat_navmesh(10.0, 10.0)?;
    let mut crowd = Crowd::new(CrowdConfig::new(3, 0.5), mesh)?;

    for i in 0..3 {
        let idx = crowd.add_agent(Vec3::new(1.0 + 2.0 * i as f32, 0.0, 1.0), AgentParams::default())?;
        assert_eq!(idx, i);
    }
    assert!(matches!(
        crowd.add_agent(Vec3::new(8.0, 0.0, 8.0), AgentParams::default()),
        Err(Error::CapacityExhausted(_))
    ));

    crowd.remove_agent(1)?;
    run(&mut crowd, 2);
    // Removed agents leave the proximity grid.
    let mut ids = [0usize; 8];
    let n = crowd.get_grid().query_items(2.5, 0.5, 3.5, 1.5, &mut ids);
    assert!(n > 0);
    assert!(!ids[..n].contains(&1));
    assert_eq!(crowd.add_agent(Vec3::new(8.0, 0.0, 8.0), AgentParams::default())?, 1);
    assert_eq!(crowd.get_active_agents().count(), 3);
    Ok(())
}

#[test]
fn test_idle_updates_change_nothing() -> Result<()> {
    let mesh = create_flat_navmesh(10.0, 10.0)?;
    let mut crowd = Crowd::new(CrowdConfig::new(4, 0.5), mesh)?;

    run(&mut crowd, 10);
    assert_eq!(crowd.get_velocity_sample_count(), 0);
    assert_eq!(crowd.get_grid().get_item_count(), 0);

    let idx = crowd.add_agent(Vec3::new(5.0, 0.0, 5.0), AgentParams::default())?;
    let start = pos_of(&crowd, idx);
    run(&mut crowd, 20);
    let agent = crowd.get_agent(idx).unwrap();
    assert_eq!(agent.get_pos(), start);
    assert_eq!(agent.get_vel(), Vec3::ZERO);
    assert_eq!(agent.get_target_state(), MoveRequestState::None);
    assert_eq!(agent.get_corridor().get_path_count(), 1);
    Ok(())
}

#[test]
fn test_velocity_request_respects_limits() -> Result<()> {
    let mesh = create_flat_navmesh(20.0, 20.0)?;
    let mut crowd = Crowd::new(CrowdConfig::new(2, 0.5), mesh)?;

    let params = agent_params(0.5, 2.0, UpdateFlags::empty());
    let idx = crowd.add_agent(Vec3::new(2.0, 0.0, 10.0), params)?;
    crowd.request_move_velocity(idx, Vec3::new(10.0, 0.0, 0.0))?;

    let mut prev_vel = Vec3::ZERO;
    for _ in 0..20 {
        crowd.update(DT, None);
        let agent = crowd.get_agent(idx).unwrap();
        let vel = agent.get_vel();
        assert!(vel.length() <= 2.0 + 1e-4);
        assert!((vel - prev_vel).length() <= 8.0 * DT + 1e-4);
        assert!(agent.get_desired_vel().length() <= 2.0 + 1e-4);
        // Velocity agents keep a single polygon corridor.
        assert_eq!(agent.get_corridor().get_path_count(), 1);
        prev_vel = vel;
    }
    assert!((prev_vel - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-4);
    assert!(pos_of(&crowd, idx).x > 5.0);
    Ok(())
}

#[test]
fn test_boundary_refreshes_after_moving_a_quarter_range() -> Result<()> {
    let mesh = create_corridor_navmesh(20.0, 4.0)?;
    let mut crowd = Crowd::new(CrowdConfig::new(2, 0.5), mesh)?;

    let params = agent_params(0.5, 2.0, UpdateFlags::empty());
    let threshold = params.collision_query_range * 0.25;
    let idx = crowd.add_agent(Vec3::new(2.0, 0.0, 2.0), params)?;
    crowd.request_move_velocity(idx, Vec3::new(2.0, 0.0, 0.0))?;

    let mut center = crowd.get_agent(idx).unwrap().get_boundary().get_center();
    let mut refreshes = 0;
    for _ in 0..40 {
        let pos = pos_of(&crowd, idx);
        crowd.update(DT, None);
        let new_center = crowd.get_agent(idx).unwrap().get_boundary().get_center();
        if new_center != center {
            assert!(dist_2d(pos, center) > threshold - 1e-4);
            assert_eq!(new_center, pos);
            refreshes += 1;
            center = new_center;
        }
    }
    assert!(refreshes >= 2);
    assert!(crowd.get_agent(idx).unwrap().get_boundary().get_segment_count() > 0);
    Ok(())
}

#[test]
fn test_set_agent_corridor() -> Result<()> {
    let mesh = create_strip_navmesh(5, 2.0)?;
    let refs: Vec<PolyRef> = (0..5).map(|i| mesh.poly_ref(i)).collect::<Result<_>>()?;
    let mut crowd = Crowd::new(CrowdConfig::new(2, 0.6), mesh)?;

    let params = agent_params(0.3, 1.0, UpdateFlags::ANTICIPATE_TURNS);
    let a = crowd.add_agent(Vec3::new(1.0, 0.0, 1.0), params.clone())?;
    assert!(crowd.set_agent_corridor(a, &refs).is_err());

    crowd.request_move_target(a, refs[4], Vec3::new(9.0, 0.0, 1.0))?;
    crowd.set_agent_corridor(a, &refs)?;
    let agent = crowd.get_agent(a).unwrap();
    assert_eq!(agent.get_target_state(), MoveRequestState::Valid);
    assert_eq!(agent.get_corridor().get_path(), refs.as_slice());

    crowd.update(DT, None);
    let agent = crowd.get_agent(a).unwrap();
    assert_eq!(agent.get_target_state(), MoveRequestState::Valid);
    assert_eq!(agent.get_corridor().get_path(), refs.as_slice());

    // A corridor ending short of the target is completed by the path queue.
    let b = crowd.add_agent(Vec3::new(1.0, 0.0, 1.8), params)?;
    crowd.request_move_target(b, refs[4], Vec3::new(9.0, 0.0, 1.0))?;
    crowd.set_agent_corridor(b, &refs[..2])?;
    let agent = crowd.get_agent(b).unwrap();
    assert_eq!(agent.get_target_state(), MoveRequestState::WaitingForQueue);
    assert!((agent.get_corridor().get_target() - Vec3::new(4.0, 0.0, 1.0)).length() < 1e-5);

    crowd.update(DT, None);
    let agent = crowd.get_agent(b).unwrap();
    assert_eq!(agent.get_target_state(), MoveRequestState::Valid);
    assert_eq!(agent.get_corridor().get_path(), refs.as_slice());
    Ok(())
}

#[test]
fn test_neighbour_groups_and_order() -> Result<()> {
    let mesh = create_flat_navmesh(10.0, 10.0)?;
    let mut crowd = Crowd::new(CrowdConfig::new(4, 0.5), mesh)?;

    let base = agent_params(0.3, 1.0, UpdateFlags::empty());
    let a = crowd.add_agent(
        Vec3::new(5.0, 0.0, 5.0),
        AgentParams {
            avoidance_group: 1,
            groups_to_avoid: 2 | 4,
            groups_to_ignore: 4,
            ..base.clone()
        },
    )?;
    let b = crowd.add_agent(
        Vec3::new(6.0, 0.0, 5.0),
        AgentParams {
            avoidance_group: 2,
            ..base.clone()
        },
    )?;
    let c = crowd.add_agent(
        Vec3::new(7.5, 0.0, 5.0),
        AgentParams {
            avoidance_group: 4,
            ..base
        },
    )?;
    crowd.update(DT, None);

    let neighbours = |idx: usize| -> Vec<usize> {
        crowd
            .get_agent(idx)
            .unwrap()
            .get_neighbours()
            .iter()
            .map(|n| n.idx)
            .collect()
    };
    assert_eq!(neighbours(a), vec![b]);
    assert_eq!(neighbours(b), vec![a, c]);
    assert_eq!(neighbours(c), vec![b, a]);

    let first = crowd.get_agent(b).unwrap().get_neighbours()[0];
    assert!((first.dist - 1.0).abs() < 1e-5);
    Ok(())
}

#[test]
fn test_debug_info_captures_one_agent() -> Result<()> {
    let mesh = create_corridor_navmesh(20.0, 4.0)?;
    let target_ref = mesh.poly_ref(4)?;
    let mut crowd = Crowd::new(CrowdConfig::new(2, 0.5), mesh)?;

    let flags = UpdateFlags::ANTICIPATE_TURNS | UpdateFlags::OBSTACLE_AVOIDANCE | UpdateFlags::OPTIMIZE_VIS;
    let idx = crowd.add_agent(Vec3::new(2.0, 0.0, 2.0), agent_params(0.5, 2.0, flags))?;
    crowd.request_move_target(idx, target_ref, Vec3::new(18.0, 0.0, 2.0))?;

    let mut debug = CrowdAgentDebugInfo::new(idx, 512);
    crowd.update(DT, Some(&mut debug));

    assert!(crowd.get_velocity_sample_count() > 0);
    let vod = debug.vod.as_ref().unwrap();
    assert_eq!(vod.get_sample_count(), crowd.get_velocity_sample_count());
    assert_eq!(debug.opt_start, Vec3::new(2.0, 0.0, 2.0));
    assert_ne!(debug.opt_end, Vec3::ZERO);
    Ok(())
}
