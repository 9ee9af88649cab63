/// Tests for client-movement validation: speed limits, jitter-debt credit,
/// the correction handshake, and portal-chain path justification.
use std::net::SocketAddr;

use glam::{Vec2, Vec3};

use specter_cell::shared::{
    CellAddr, CellMessage, ClientMessage, Direction, EntityId, EntityTypeId, NetworkSender,
    PropagationClass, PropertyDef, PropertySchema, RecyclingIdAllocator,
};
use specter_cell::{
    physically_possible, settle_jitter_debt, CellConfig, CellProcess, Chunk, ChunkGraph, ChunkId,
    EntityTypeDef, EntityTypeRegistry, MoveVerdict, Portal, ScriptDispatcher, ScriptHook,
};

#[derive(Default)]
struct TestNet {
    cell_sent: Vec<(CellAddr, CellMessage)>,
    client_sent: Vec<(SocketAddr, ClientMessage)>,
}

impl NetworkSender for TestNet {
    fn send_to_cell(&mut self, peer: CellAddr, message: CellMessage) {
        self.cell_sent.push((peer, message));
    }
    fn send_to_client(&mut self, client: SocketAddr, message: ClientMessage) {
        self.client_sent.push((client, message));
    }
}

#[derive(Default)]
struct TestScripts;

impl ScriptDispatcher for TestScripts {
    fn invoke(&mut self, _entity: EntityId, _hook: ScriptHook) {}
}

fn addr(port: u16) -> CellAddr {
    CellAddr(SocketAddr::from(([127, 0, 1, 1], port)))
}

fn creature_types() -> EntityTypeRegistry {
    let mut types = EntityTypeRegistry::new();
    types.register(
        EntityTypeDef::new(
            "creature",
            PropertySchema::new(vec![PropertyDef::new("health", PropagationClass::Ghosted)]),
        )
        .with_top_speed(5.0),
    );
    types
}

fn open_space() -> ChunkGraph {
    let mut graph = ChunkGraph::new();
    graph.add_chunk(Chunk::axis_aligned(
        Vec3::new(-1000.0, -1000.0, -1000.0),
        Vec3::new(1000.0, 1000.0, 1000.0),
    ));
    graph
}

fn make_cell(tick_seconds: f64, jitter: f32) -> CellProcess {
    let config = CellConfig {
        tick_seconds,
        jitter_allowance_seconds: jitter,
        ..CellConfig::default()
    };
    CellProcess::new(
        addr(1),
        config,
        creature_types(),
        open_space(),
        Box::new(RecyclingIdAllocator::new(0)),
    )
}

/// Two box chunks sharing the x = 10 face, connected by a portal on that
/// face. `permissive` controls whether entities may pass.
fn two_room_space(permissive: bool) -> ChunkGraph {
    let mut graph = ChunkGraph::new();
    let west = graph.add_chunk(Chunk::axis_aligned(
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(10.0, 10.0, 10.0),
    ));
    let east = graph.add_chunk(Chunk::axis_aligned(
        Vec3::new(10.0, 0.0, 0.0),
        Vec3::new(20.0, 10.0, 10.0),
    ));
    // doorway polygon spans the whole shared face, in (y, z) axes
    let doorway = vec![
        Vec2::new(0.0, 0.0),
        Vec2::new(10.0, 0.0),
        Vec2::new(10.0, 10.0),
        Vec2::new(0.0, 10.0),
    ];
    graph.add_portal(
        west,
        Portal {
            // max_x plane of the west room
            plane_index: 1,
            points: doorway.clone(),
            origin: Vec3::new(10.0, 0.0, 0.0),
            u_axis: Vec3::Y,
            v_axis: Vec3::Z,
            target: Some(east),
            permissive,
        },
    );
    graph.add_portal(
        east,
        Portal {
            // min_x plane of the east room
            plane_index: 0,
            points: doorway,
            origin: Vec3::new(10.0, 0.0, 0.0),
            u_axis: Vec3::Y,
            v_axis: Vec3::Z,
            target: Some(west),
            permissive,
        },
    );
    graph
}

#[test]
fn three_units_in_one_second_is_accepted_at_top_speed_five() {
    let mut cell = make_cell(1.0, 0.0);
    let mut net = TestNet::default();
    let mut scripts = TestScripts;

    let entity = cell
        .spawn_real(EntityTypeId(0), Vec3::ZERO, Direction::default(), true)
        .unwrap();
    cell.tick(&mut net, &mut scripts); // one simulated second elapses

    let verdict = cell
        .request_move(
            entity,
            Vec3::new(3.0, 0.0, 0.0),
            Direction::default(),
            true,
            &mut net,
            &mut scripts,
        )
        .unwrap();
    assert_eq!(verdict, MoveVerdict::Accepted);
    assert_eq!(
        cell.entity(entity).unwrap().global_position,
        Vec3::new(3.0, 0.0, 0.0)
    );
}

#[test]
fn three_units_in_a_tenth_of_a_second_is_rejected_and_corrected() {
    let mut cell = make_cell(0.1, 0.0);
    let mut net = TestNet::default();
    let mut scripts = TestScripts;

    let entity = cell
        .spawn_real(EntityTypeId(0), Vec3::ZERO, Direction::default(), true)
        .unwrap();
    let client: SocketAddr = SocketAddr::from(([127, 0, 0, 1], 9000));
    cell.set_witness(entity, Some(client), &mut scripts).unwrap();
    cell.tick(&mut net, &mut scripts); // 0.1 simulated seconds elapse

    let verdict = cell
        .request_move(
            entity,
            Vec3::new(3.0, 0.0, 0.0),
            Direction::default(),
            true,
            &mut net,
            &mut scripts,
        )
        .unwrap();
    assert!(matches!(verdict, MoveVerdict::RejectedSpeed { .. }));

    // never silently teleported: the entity stays put and the requester got
    // a correction
    assert_eq!(cell.entity(entity).unwrap().global_position, Vec3::ZERO);
    assert_eq!(net.client_sent.len(), 1);
    assert!(matches!(
        net.client_sent[0].1,
        ClientMessage::PositionCorrection { position, .. } if position == Vec3::ZERO
    ));

    // further moves are ignored until the client acknowledges
    let verdict = cell
        .request_move(
            entity,
            Vec3::new(0.1, 0.0, 0.0),
            Direction::default(),
            true,
            &mut net,
            &mut scripts,
        )
        .unwrap();
    assert_eq!(verdict, MoveVerdict::CorrectionPending);

    cell.acknowledge_correction(entity).unwrap();
    cell.tick(&mut net, &mut scripts);
    let verdict = cell
        .request_move(
            entity,
            Vec3::new(0.2, 0.0, 0.0),
            Direction::default(),
            true,
            &mut net,
            &mut scripts,
        )
        .unwrap();
    assert_eq!(verdict, MoveVerdict::Accepted);
}

#[test]
fn jitter_debt_credit_absorbs_a_small_burst() {
    let mut cell = make_cell(1.0, 0.5);
    let mut net = TestNet::default();
    let mut scripts = TestScripts;

    let entity = cell
        .spawn_real(EntityTypeId(0), Vec3::ZERO, Direction::default(), true)
        .unwrap();

    // a slow second accrues the full half-second credit
    cell.tick(&mut net, &mut scripts);
    let verdict = cell
        .request_move(
            entity,
            Vec3::new(1.0, 0.0, 0.0),
            Direction::default(),
            true,
            &mut net,
            &mut scripts,
        )
        .unwrap();
    assert_eq!(verdict, MoveVerdict::Accepted);

    // 7 units in one second exceeds 5 u/s flat, but fits within the credit
    cell.tick(&mut net, &mut scripts);
    let verdict = cell
        .request_move(
            entity,
            Vec3::new(8.0, 0.0, 0.0),
            Direction::default(),
            true,
            &mut net,
            &mut scripts,
        )
        .unwrap();
    assert_eq!(verdict, MoveVerdict::Accepted);

    // but the credit is spent now; an identical burst fails
    cell.tick(&mut net, &mut scripts);
    let verdict = cell
        .request_move(
            entity,
            Vec3::new(15.0, 0.0, 0.0),
            Direction::default(),
            true,
            &mut net,
            &mut scripts,
        )
        .unwrap();
    assert!(matches!(verdict, MoveVerdict::RejectedSpeed { .. }));
}

#[test]
fn settle_jitter_debt_clamps_to_allowance() {
    let debt = settle_jitter_debt(0.0, 10.0, 5.0, 5.0, 0.25);
    assert_eq!(debt, 0.25);
    let debt = settle_jitter_debt(0.25, 1.0, 6.0, 5.0, 0.25);
    assert!(debt < 0.25 && debt >= 0.0);
}

#[test]
fn move_through_permissive_portal_is_accepted() {
    let graph = two_room_space(true);
    let verdict = physically_possible(
        &graph,
        ChunkId(0),
        Vec3::new(8.0, 5.0, 5.0),
        Vec3::new(12.0, 5.0, 5.0),
        1.0,
        5.0,
        0.0,
    );
    assert_eq!(verdict, MoveVerdict::Accepted);
}

#[test]
fn move_through_closed_portal_is_rejected() {
    let graph = two_room_space(false);
    let verdict = physically_possible(
        &graph,
        ChunkId(0),
        Vec3::new(8.0, 5.0, 5.0),
        Vec3::new(12.0, 5.0, 5.0),
        1.0,
        5.0,
        0.0,
    );
    assert_eq!(verdict, MoveVerdict::RejectedPath);
}

#[test]
fn move_whose_midpoint_leaves_every_reachable_chunk_is_rejected() {
    // no portals at all: any move that exits the source chunk is unjustified
    let mut graph = ChunkGraph::new();
    let west = graph.add_chunk(Chunk::axis_aligned(
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(10.0, 10.0, 10.0),
    ));
    graph.add_chunk(Chunk::axis_aligned(
        Vec3::new(10.0, 0.0, 0.0),
        Vec3::new(20.0, 10.0, 10.0),
    ));

    let verdict = physically_possible(
        &graph,
        west,
        Vec3::new(8.0, 5.0, 5.0),
        Vec3::new(12.0, 5.0, 5.0),
        1.0,
        5.0,
        0.0,
    );
    assert_eq!(verdict, MoveVerdict::RejectedPath);

    // moves inside the source chunk remain fine
    let verdict = physically_possible(
        &graph,
        west,
        Vec3::new(8.0, 5.0, 5.0),
        Vec3::new(2.0, 5.0, 5.0),
        2.0,
        5.0,
        0.0,
    );
    assert_eq!(verdict, MoveVerdict::Accepted);
}

#[test]
fn portal_chain_across_three_rooms_is_searched_breadth_first() {
    let mut graph = ChunkGraph::new();
    let rooms: Vec<ChunkId> = (0..3)
        .map(|i| {
            graph.add_chunk(Chunk::axis_aligned(
                Vec3::new(i as f32 * 10.0, 0.0, 0.0),
                Vec3::new((i + 1) as f32 * 10.0, 10.0, 10.0),
            ))
        })
        .collect();
    let doorway = vec![
        Vec2::new(0.0, 0.0),
        Vec2::new(10.0, 0.0),
        Vec2::new(10.0, 10.0),
        Vec2::new(0.0, 10.0),
    ];
    for i in 0..2 {
        graph.add_portal(
            rooms[i],
            Portal {
                plane_index: 1,
                points: doorway.clone(),
                origin: Vec3::new((i + 1) as f32 * 10.0, 0.0, 0.0),
                u_axis: Vec3::Y,
                v_axis: Vec3::Z,
                target: Some(rooms[i + 1]),
                permissive: true,
            },
        );
    }

    assert!(graph.segment_justified(
        rooms[0],
        Vec3::new(5.0, 5.0, 5.0),
        Vec3::new(25.0, 5.0, 5.0)
    ));
    // the reverse direction has no portals back
    assert!(!graph.segment_justified(
        rooms[2],
        Vec3::new(25.0, 5.0, 5.0),
        Vec3::new(5.0, 5.0, 5.0)
    ));
}

#[test]
fn hinted_chunk_lookup_walks_portal_neighbors() {
    let graph = two_room_space(true);
    let west = ChunkId(0);
    let east = ChunkId(1);
    assert_eq!(
        graph
            .find_chunk_containing(Vec3::new(5.0, 5.0, 5.0), Some(west))
            .unwrap(),
        west
    );
    assert_eq!(
        graph
            .find_chunk_containing(Vec3::new(15.0, 5.0, 5.0), Some(west))
            .unwrap(),
        east
    );
    assert!(graph
        .find_chunk_containing(Vec3::new(500.0, 5.0, 5.0), Some(west))
        .is_err());
}
