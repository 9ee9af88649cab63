/// Tests for zombie-ghost detection and recovery after a peer cell dies.
use std::net::SocketAddr;

use glam::Vec3;

use specter_cell::shared::{
    CellAddr, CellMessage, ClientMessage, Direction, EntityId, EntityTypeId, NetworkSender,
    PropagationClass, PropertyDef, PropertySchema, RecyclingIdAllocator,
};
use specter_cell::{
    CellConfig, CellProcess, Chunk, ChunkGraph, EntityTypeDef, EntityTypeRegistry,
    ReplicationState, ScriptDispatcher, ScriptHook,
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
struct TestScripts {
    invoked: Vec<(EntityId, ScriptHook)>,
}

impl ScriptDispatcher for TestScripts {
    fn invoke(&mut self, entity: EntityId, hook: ScriptHook) {
        self.invoked.push((entity, hook));
    }
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

fn cell_with_ghost() -> (CellProcess, EntityId) {
    let mut cell_a = make_cell(1);
    let mut cell_b = make_cell(2);
    let mut net_a = TestNet::default();
    let mut net_b = TestNet::default();
    let mut scripts = TestScripts::default();

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
    (cell_b, entity)
}

#[test]
fn ghost_awaiting_a_dead_new_owner_is_destroyed() {
    let (mut cell_b, entity) = cell_with_ghost();
    let mut net_b = TestNet::default();
    let mut scripts = TestScripts::default();

    // the old owner announced C as next owner, then C died before set-real
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
    assert_eq!(
        cell_b.replication_state(entity),
        ReplicationState::GhostAwaitingNewOwner
    );

    cell_b.note_peer_death(addr(3), &mut net_b, &mut scripts);

    // waiting forever would leak the ghost; it is destroyed instead
    assert!(!cell_b.contains(entity));
    assert_eq!(cell_b.replication_state(entity), ReplicationState::Destroyed);
    assert!(scripts
        .invoked
        .contains(&(entity, ScriptHook::GhostDestroyed)));
}

#[test]
fn ghost_with_dead_owner_adopts_buffered_successor() {
    let (mut cell_b, entity) = cell_with_ghost();
    let mut net_b = TestNet::default();
    let mut scripts = TestScripts::default();

    // a newer owner already announced itself; the announcement sits in the
    // buffer because the intermediate lifespan never played out here
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
    assert_eq!(cell_b.entity(entity).unwrap().generation, 0);

    cell_b.note_peer_death(addr(1), &mut net_b, &mut scripts);

    // instead of dying, the ghost jumps to the announced successor
    assert!(cell_b.contains(entity));
    assert_eq!(cell_b.replication_state(entity), ReplicationState::GhostStable);
    let ghost = cell_b.entity(entity).unwrap().ghost().unwrap();
    assert_eq!(ghost.owner, addr(4));
    assert_eq!(cell_b.entity(entity).unwrap().generation, 2);
}

#[test]
fn ghost_with_dead_owner_and_no_successor_is_destroyed() {
    let (mut cell_b, entity) = cell_with_ghost();
    let mut net_b = TestNet::default();
    let mut scripts = TestScripts::default();

    cell_b.note_peer_death(addr(1), &mut net_b, &mut scripts);

    assert!(!cell_b.contains(entity));
    assert!(scripts
        .invoked
        .contains(&(entity, ScriptHook::GhostDestroyed)));
}

#[test]
fn real_entity_drops_haunts_on_dead_cells() {
    let mut cell_a = make_cell(1);
    let mut net_a = TestNet::default();
    let mut scripts = TestScripts::default();

    let entity = cell_a
        .spawn_real(
            EntityTypeId(0),
            Vec3::new(10.0, 0.0, 10.0),
            Direction::default(),
            false,
        )
        .unwrap();
    cell_a.add_haunt(entity, addr(2), &mut net_a).unwrap();
    cell_a.add_haunt(entity, addr(3), &mut net_a).unwrap();
    net_a.cell_sent.clear();

    cell_a.note_peer_death(addr(2), &mut net_a, &mut scripts);
    assert_eq!(
        cell_a.entity(entity).unwrap().real().unwrap().haunt_count(),
        1
    );

    // replication no longer targets the dead cell
    cell_a
        .update_position(
            entity,
            Vec3::new(12.0, 0.0, 10.0),
            Direction::default(),
            true,
            &mut net_a,
            &mut scripts,
        )
        .unwrap();
    assert!(net_a.take_for(addr(2)).is_empty());
    assert_eq!(net_a.take_for(addr(3)).len(), 1);

    assert!(cell_a.is_peer_dead(addr(2)));
}

#[test]
fn death_note_is_idempotent() {
    let (mut cell_b, entity) = cell_with_ghost();
    let mut net_b = TestNet::default();
    let mut scripts = TestScripts::default();

    cell_b.note_peer_death(addr(1), &mut net_b, &mut scripts);
    cell_b.note_peer_death(addr(1), &mut net_b, &mut scripts);

    assert!(!cell_b.contains(entity));
    let destroyed_hooks = scripts
        .invoked
        .iter()
        .filter(|(id, hook)| *id == entity && *hook == ScriptHook::GhostDestroyed)
        .count();
    assert_eq!(destroyed_hooks, 1);
}
