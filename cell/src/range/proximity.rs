use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::error;
use thiserror::Error;

use specter_shared::EntityId;

use crate::range::range_list::{Crossing, NodeIx, NodeKind, RangeList, TriggerId};

/// Errors that can occur during proximity index operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProximityError {
    #[error("entity {entity} is already present in the proximity index")]
    DuplicateEntity { entity: EntityId },
    #[error("entity {entity} is not present in the proximity index")]
    UnknownEntity { entity: EntityId },
}

/// An entity crossing into or out of a trigger's range rectangle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerEvent {
    pub trigger: TriggerId,
    pub owner: EntityId,
    pub other: EntityId,
    pub entered: bool,
}

struct TriggerRec {
    owner: EntityId,
    radius: f32,
    low: NodeIx,
    high: NodeIx,
}

/// The proximity index of one cell: every resident entity held in ascending
/// order on two independent axes, plus the range triggers attached to them.
#[derive(Default)]
pub struct ProximityIndex {
    list: RangeList,
    entity_nodes: HashMap<EntityId, NodeIx>,
    triggers: BTreeMap<TriggerId, TriggerRec>,
    next_trigger_key: u16,
}

impl ProximityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entity_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_nodes.is_empty()
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entity_nodes.contains_key(&entity)
    }

    pub fn position(&self, entity: EntityId) -> Option<(f32, f32)> {
        self.entity_nodes
            .get(&entity)
            .map(|ix| self.list.position(*ix))
    }

    pub fn add_entity(&mut self, entity: EntityId, x: f32, z: f32) -> Result<(), ProximityError> {
        if self.entity_nodes.contains_key(&entity) {
            return Err(ProximityError::DuplicateEntity { entity });
        }
        let ix = self.list.insert(NodeKind::Entity(entity), x, z);
        self.entity_nodes.insert(entity, ix);
        Ok(())
    }

    /// Removes an entity and every trigger it owns. Idempotent; returns
    /// whether anything was removed.
    pub fn remove_entity(&mut self, entity: EntityId) -> bool {
        let Some(ix) = self.entity_nodes.remove(&entity) else {
            return false;
        };
        let owned: Vec<TriggerId> = self
            .triggers
            .iter()
            .filter(|(_, rec)| rec.owner == entity)
            .map(|(id, _)| *id)
            .collect();
        for trigger in owned {
            self.remove_trigger(trigger);
        }
        self.list.remove(ix);
        true
    }

    /// Re-seats a moved entity on both axes, moving its trigger bounds
    /// leading-edge-first in the direction of travel, and resolves every
    /// crossed node pair into trigger enter/leave events.
    pub fn move_entity(
        &mut self,
        entity: EntityId,
        x: f32,
        z: f32,
    ) -> Result<Vec<TriggerEvent>, ProximityError> {
        let ix = *self
            .entity_nodes
            .get(&entity)
            .ok_or(ProximityError::UnknownEntity { entity })?;
        let (old_x, old_z) = self.list.position(ix);

        let owned: Vec<TriggerId> = self
            .triggers
            .iter()
            .filter(|(_, rec)| rec.owner == entity)
            .map(|(id, _)| *id)
            .collect();

        let mut crossings: Vec<Crossing> = Vec::new();
        let moving_up = x >= old_x;

        // leading bounds first (expand), then the entity, then the trailing
        // bounds (contract), so a fast mover cannot step over its own range
        // edge unnoticed
        for trigger in &owned {
            let rec = &self.triggers[trigger];
            let (radius, lead) = (rec.radius, if moving_up { rec.high } else { rec.low });
            let (lx, lz) = if moving_up {
                (x + radius, z + radius)
            } else {
                (x - radius, z - radius)
            };
            self.list.shuffle(lead, lx, lz, &mut crossings);
        }

        self.list.shuffle(ix, x, z, &mut crossings);

        for trigger in &owned {
            let rec = &self.triggers[trigger];
            let (radius, trail) = (rec.radius, if moving_up { rec.low } else { rec.high });
            let (tx, tz) = if moving_up {
                (x - radius, z - radius)
            } else {
                (x + radius, z + radius)
            };
            self.list.shuffle(trail, tx, tz, &mut crossings);
        }

        Ok(self.resolve_crossings(entity, (old_x, old_z), (x, z), &crossings))
    }

    fn resolve_crossings(
        &self,
        moved_entity: EntityId,
        old_pos: (f32, f32),
        new_pos: (f32, f32),
        crossings: &[Crossing],
    ) -> Vec<TriggerEvent> {
        let mut candidates: BTreeSet<(TriggerId, EntityId)> = BTreeSet::new();
        for crossing in crossings {
            match (crossing.moved, crossing.passed) {
                (NodeKind::Entity(entity), NodeKind::TriggerBound { trigger, .. })
                | (NodeKind::TriggerBound { trigger, .. }, NodeKind::Entity(entity)) => {
                    candidates.insert((trigger, entity));
                }
                _ => {}
            }
        }

        let mut events = Vec::new();
        for (trigger, other) in candidates {
            let Some(rec) = self.triggers.get(&trigger) else {
                continue;
            };
            if rec.owner == other {
                continue;
            }
            let (old_center, new_center) = if rec.owner == moved_entity {
                (old_pos, new_pos)
            } else {
                let Some(center) = self.position(rec.owner) else {
                    continue;
                };
                (center, center)
            };
            let (old_other, new_other) = if other == moved_entity {
                (old_pos, new_pos)
            } else {
                let Some(position) = self.position(other) else {
                    continue;
                };
                (position, position)
            };
            let was_inside = rect_contains(old_center, rec.radius, old_other);
            let is_inside = rect_contains(new_center, rec.radius, new_other);
            if was_inside != is_inside {
                events.push(TriggerEvent {
                    trigger,
                    owner: rec.owner,
                    other,
                    entered: is_inside,
                });
            }
        }
        events
    }

    /// Attaches a range trigger to an entity. Entities already inside the
    /// fresh rectangle produce immediate `entered` events.
    pub fn add_trigger(
        &mut self,
        owner: EntityId,
        radius: f32,
    ) -> Result<(TriggerId, Vec<TriggerEvent>), ProximityError> {
        let (x, z) = self
            .position(owner)
            .ok_or(ProximityError::UnknownEntity { entity: owner })?;

        let mut key = self.next_trigger_key;
        while self.triggers.contains_key(&TriggerId(key)) {
            key = key.wrapping_add(1);
        }
        self.next_trigger_key = key.wrapping_add(1);
        let trigger = TriggerId(key);

        let low = self.list.insert(
            NodeKind::TriggerBound {
                trigger,
                high: false,
            },
            x - radius,
            z - radius,
        );
        let high = self.list.insert(
            NodeKind::TriggerBound {
                trigger,
                high: true,
            },
            x + radius,
            z + radius,
        );
        self.triggers.insert(
            trigger,
            TriggerRec {
                owner,
                radius,
                low,
                high,
            },
        );

        let mut events = Vec::new();
        for (entity, ix) in &self.entity_nodes {
            if *entity == owner {
                continue;
            }
            let position = self.list.position(*ix);
            if rect_contains((x, z), radius, position) {
                events.push(TriggerEvent {
                    trigger,
                    owner,
                    other: *entity,
                    entered: true,
                });
            }
        }
        Ok((trigger, events))
    }

    /// Idempotent; returns whether the trigger existed.
    pub fn remove_trigger(&mut self, trigger: TriggerId) -> bool {
        let Some(rec) = self.triggers.remove(&trigger) else {
            return false;
        };
        self.list.remove(rec.low);
        self.list.remove(rec.high);
        true
    }

    pub fn trigger_owner(&self, trigger: TriggerId) -> Option<EntityId> {
        self.triggers.get(&trigger).map(|rec| rec.owner)
    }

    pub fn trigger_radius(&self, trigger: TriggerId) -> Option<f32> {
        self.triggers.get(&trigger).map(|rec| rec.radius)
    }

    /// All entities within straight-line distance `radius` of the center,
    /// excluding none. Walks the x-order window and filters on z and true
    /// distance.
    pub fn query_range(&self, x: f32, z: f32, radius: f32) -> Vec<EntityId> {
        let mut found = Vec::new();
        for ix in self.list.iter_x() {
            let (nx, nz) = self.list.position(ix);
            if nx < x - radius {
                continue;
            }
            if nx > x + radius {
                break;
            }
            if let NodeKind::Entity(entity) = self.list.kind(ix) {
                let (dx, dz) = (nx - x, nz - z);
                if dz.abs() <= radius && dx * dx + dz * dz <= radius * radius {
                    found.push(entity);
                }
            }
        }
        found
    }

    pub fn is_sorted(&self) -> bool {
        self.list.is_sorted()
    }

    /// Self-heal after a failed consistency check: logs loudly and relinks
    /// both axis orders from scratch.
    pub fn heal(&mut self) {
        error!("proximity index lost sort order on at least one axis; rebuilding");
        self.list.rebuild();
    }
}

fn rect_contains(center: (f32, f32), radius: f32, point: (f32, f32)) -> bool {
    (point.0 - center.0).abs() <= radius && (point.1 - center.1).abs() <= radius
}
