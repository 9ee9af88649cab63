/// Tests for out-of-generation message buffering: whole-lifespan replay,
/// interleaved set-real/set-next-real races, and the buffer container
/// itself.
use std::net::SocketAddr;

use glam::Vec3;

use specter_cell::shared::{
    CellAddr, CellMessage, ClientMessage, Direction, EntityId, EntityTypeId, NetworkSender,
    PropagationClass, PropertyDef, PropertySchema, RecyclingIdAllocator,
};
use specter_cell::{
    BufferedGhostMessages, CellConfig, CellProcess, Chunk, ChunkGraph, EntityTypeDef,
    EntityTypeRegistry, ReplicationState, ScriptDispatcher, ScriptHook,
};

#[derive(Default)]
struct TestNet {
    cell_sent: Vec<(CellAddr, CellMessage)>,
}

impl NetworkSender for TestNet {
    fn send_to_cell(&mut self, peer: CellAddr, message: CellMessage) {
        self.cell_sent.push((peer, message));
    }
    fn send_to_client(&mut self, _client: SocketAddr, _message: ClientMessage) {}
}

impl TestNet {
    fn take_for(&mut self, dest: CellAddr) -> Vec<CellMessage> {
        let mut taken = Vec::new();
        let mut kept = Vec::new();
        for (d, m) in self.cell_sent.drain(..) {
            if d == dest {
                taken.push(m);
            } else {
                kept.push((d, m));
            }
        }
        self.cell_sent = kept;
        taken
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

fn make_cell(port: u16) -> CellProcess {
    let mut types = EntityTypeRegistry::new();
    types.register(EntityTypeDef::new(
        "creature",
        PropertySchema::new(vec![PropertyDef::new("health", PropagationClass::Ghosted)]),
    ));
    let mut graph = ChunkGraph::new();
    graph.add_chunk(Chunk::axis_aligned(
        Vec3::new(-1000.0, -1000.0, -1000.0),
        Vec3::new(1000.0, 1000.0, 1000.0),
    ));
    CellProcess::new(
        addr(port),
        CellConfig::default(),
        types,
        graph,
        Box::new(RecyclingIdAllocator::new(0)),
    )
}

/// Builds a cell B holding a stable generation-0 ghost owned by cell A.
fn cell_with_ghost() -> (CellProcess, EntityId) {
    let mut cell_a = make_cell(1);
    let mut cell_b = make_cell(2);
    let mut net_a = TestNet::default();
    let mut net_b = TestNet::default();
    let mut scripts = TestScripts;

    let entity = cell_a
        .spawn_real(
            EntityTypeId(0),
            Vec3::new(10.0, 0.0, 10.0),
            Direction::default(),
            false,
        )
        .unwrap();
    cell_a.add_haunt(entity, addr(2), &mut net_a).unwrap();
    for message in net_a.take_for(addr(2)) {
        cell_b
            .handle_cell_message(addr(1), message, &mut net_b, &mut scripts)
            .unwrap();
    }
    assert_eq!(cell_b.replication_state(entity), ReplicationState::GhostStable);
    (cell_b, entity)
}

#[test]
fn set_real_arriving_before_set_next_real_still_applies() {
    let (mut cell_b, entity) = cell_with_ghost();
    let mut net_b = TestNet::default();
    let mut scripts = TestScripts;

    // messages from two different peers may interleave arbitrarily: the new
    // owner's set-real can overtake the old owner's set-next-real
    cell_b
        .handle_cell_message(
            addr(3),
            CellMessage::GhostSetReal {
                entity,
                generation: 1,
                owner: addr(3),
            },
            &mut net_b,
            &mut scripts,
        )
        .unwrap();
    assert_eq!(cell_b.replication_state(entity), ReplicationState::GhostStable);
    assert_eq!(cell_b.entity(entity).unwrap().ghost().unwrap().owner, addr(3));
    assert_eq!(cell_b.entity(entity).unwrap().generation, 1);

    // the late set-next-real for the lifespan that already began is stale
    cell_b
        .handle_cell_message(
            addr(1),
            CellMessage::GhostSetNextReal {
                entity,
                generation: 1,
                next_owner: addr(3),
            },
            &mut net_b,
            &mut scripts,
        )
        .unwrap();
    let ghost = cell_b.entity(entity).unwrap().ghost().unwrap();
    assert_eq!(ghost.owner, addr(3));
    assert_eq!(ghost.pending_owner, None);
}

#[test]
fn future_lifespan_updates_are_buffered_then_replayed_in_order() {
    let (mut cell_b, entity) = cell_with_ghost();
    let mut net_b = TestNet::default();
    let mut scripts = TestScripts;

    // a position update from the next owner arrives before its set-real
    cell_b
        .handle_cell_message(
            addr(3),
            CellMessage::GhostPosition {
                entity,
                generation: 1,
                seq: 1,
                local_position: Vec3::new(55.0, 0.0, 5.0),
                is_on_ground: true,
                direction: Direction::default(),
            },
            &mut net_b,
            &mut scripts,
        )
        .unwrap();
    // not applied yet: generation 1 has not begun on this ghost
    assert_eq!(
        cell_b.entity(entity).unwrap().global_position,
        Vec3::new(10.0, 0.0, 10.0)
    );

    cell_b
        .handle_cell_message(
            addr(3),
            CellMessage::GhostSetReal {
                entity,
                generation: 1,
                owner: addr(3),
            },
            &mut net_b,
            &mut scripts,
        )
        .unwrap();

    // the buffered subsequence replayed once its generation became current
    assert_eq!(cell_b.entity(entity).unwrap().generation, 1);
    assert_eq!(
        cell_b.entity(entity).unwrap().global_position,
        Vec3::new(55.0, 0.0, 5.0)
    );
}

#[test]
fn two_buffered_lifespans_drain_one_after_another() {
    let (mut cell_b, entity) = cell_with_ghost();
    let mut net_b = TestNet::default();
    let mut scripts = TestScripts;

    // generation 2 traffic arrives first of all
    cell_b
        .handle_cell_message(
            addr(4),
            CellMessage::GhostSetReal {
                entity,
                generation: 2,
                owner: addr(4),
            },
            &mut net_b,
            &mut scripts,
        )
        .unwrap();
    cell_b
        .handle_cell_message(
            addr(4),
            CellMessage::GhostPosition {
                entity,
                generation: 2,
                seq: 1,
                local_position: Vec3::new(77.0, 0.0, 7.0),
                is_on_ground: false,
                direction: Direction::default(),
            },
            &mut net_b,
            &mut scripts,
        )
        .unwrap();
    assert_eq!(cell_b.entity(entity).unwrap().generation, 0);

    // once generation 1 begins, both pending lifespans unwind in order
    cell_b
        .handle_cell_message(
            addr(3),
            CellMessage::GhostSetReal {
                entity,
                generation: 1,
                owner: addr(3),
            },
            &mut net_b,
            &mut scripts,
        )
        .unwrap();

    let ghost = cell_b.entity(entity).unwrap().ghost().unwrap();
    assert_eq!(ghost.owner, addr(4));
    assert_eq!(cell_b.entity(entity).unwrap().generation, 2);
    assert_eq!(
        cell_b.entity(entity).unwrap().global_position,
        Vec3::new(77.0, 0.0, 7.0)
    );
}

#[test]
fn buffered_container_keeps_lifespans_separate_and_ordered() {
    let mut buffered = BufferedGhostMessages::new();
    let entity = EntityId(9);

    let position = |seq| CellMessage::GhostPosition {
        entity,
        generation: 2,
        seq,
        local_position: Vec3::ZERO,
        is_on_ground: true,
        direction: Direction::default(),
    };
    buffered.buffer(entity, 2, addr(4), position(1));
    buffered.buffer(entity, 2, addr(4), position(2));
    buffered.buffer(
        entity,
        3,
        addr(5),
        CellMessage::GhostSetReal {
            entity,
            generation: 3,
            owner: addr(5),
        },
    );
    assert_eq!(buffered.pending_count(), 3);
    assert!(!buffered.has_lifecycle(entity, 2));
    assert!(buffered.has_lifecycle(entity, 3));

    let lifespan = buffered.take_lifespan(entity, 2);
    let seqs: Vec<_> = lifespan
        .iter()
        .map(|(_, message)| match message {
            CellMessage::GhostPosition { seq, .. } => *seq,
            _ => panic!("unexpected message kind"),
        })
        .collect();
    assert_eq!(seqs, vec![1, 2]);

    // the later lifespan is untouched
    assert_eq!(buffered.pending_count(), 1);
    assert!(buffered.has_any(entity));

    buffered.discard_entity(entity);
    assert_eq!(buffered.pending_count(), 0);
}

#[test]
fn successor_lookup_skips_dead_candidates() {
    let mut buffered = BufferedGhostMessages::new();
    let entity = EntityId(9);
    buffered.buffer(
        entity,
        2,
        addr(4),
        CellMessage::GhostSetReal {
            entity,
            generation: 2,
            owner: addr(4),
        },
    );
    buffered.buffer(
        entity,
        3,
        addr(5),
        CellMessage::GhostSetNextReal {
            entity,
            generation: 3,
            next_owner: addr(5),
        },
    );

    // the earliest live successor wins
    assert_eq!(
        buffered.successor_after(entity, 0, |_| true),
        Some((2, addr(4)))
    );
    // with generation-2's owner dead, the next announcement is adopted
    assert_eq!(
        buffered.successor_after(entity, 0, |owner| owner != addr(4)),
        Some((3, addr(5)))
    );
    assert_eq!(buffered.successor_after(entity, 3, |_| true), None);
}
