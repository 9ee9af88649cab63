use specter_shared::EntityId;

/// Index of a node within the owning [`RangeList`]'s arena. Structural
/// teardown is a remove-by-index, never pointer chasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIx(pub u32);

/// Identifier of a range trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(pub u16);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Entity(EntityId),
    /// One edge of a trigger's range rectangle; `high` marks the upper
    /// corner.
    TriggerBound { trigger: TriggerId, high: bool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Z,
}

/// One node passing another during a shuffle. Trigger-crossing detection is
/// driven entirely by these.
#[derive(Clone, Copy, Debug)]
pub struct Crossing {
    pub axis: Axis,
    pub moved: NodeKind,
    pub passed: NodeKind,
}

struct RangeNode {
    kind: NodeKind,
    x: f32,
    z: f32,
    prev_x: Option<NodeIx>,
    next_x: Option<NodeIx>,
    prev_z: Option<NodeIx>,
    next_z: Option<NodeIx>,
    in_use: bool,
}

/// All resident entities (and trigger bounds) kept in ascending order on two
/// independent axes. Re-seating a moved node costs O(changed-span); both
/// orders stay sorted after every move, which a periodic self-check
/// verifies.
#[derive(Default)]
pub struct RangeList {
    nodes: Vec<RangeNode>,
    free: Vec<NodeIx>,
    head_x: Option<NodeIx>,
    head_z: Option<NodeIx>,
}

impl RangeList {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&self, ix: NodeIx) -> &RangeNode {
        &self.nodes[ix.0 as usize]
    }

    fn node_mut(&mut self, ix: NodeIx) -> &mut RangeNode {
        &mut self.nodes[ix.0 as usize]
    }

    pub fn kind(&self, ix: NodeIx) -> NodeKind {
        self.node(ix).kind
    }

    pub fn position(&self, ix: NodeIx) -> (f32, f32) {
        let node = self.node(ix);
        (node.x, node.z)
    }

    /// Inserts a node at the given coordinates and links it into both axis
    /// orders.
    pub fn insert(&mut self, kind: NodeKind, x: f32, z: f32) -> NodeIx {
        let ix = if let Some(ix) = self.free.pop() {
            let node = self.node_mut(ix);
            node.kind = kind;
            node.x = x;
            node.z = z;
            node.in_use = true;
            ix
        } else {
            let ix = NodeIx(self.nodes.len() as u32);
            self.nodes.push(RangeNode {
                kind,
                x,
                z,
                prev_x: None,
                next_x: None,
                prev_z: None,
                next_z: None,
                in_use: true,
            });
            ix
        };
        self.link_sorted_x(ix);
        self.link_sorted_z(ix);
        ix
    }

    /// Unlinks a node from both axes and returns it to the free pool.
    pub fn remove(&mut self, ix: NodeIx) {
        if !self.node(ix).in_use {
            return;
        }
        self.unlink_x(ix);
        self.unlink_z(ix);
        self.node_mut(ix).in_use = false;
        self.free.push(ix);
    }

    /// Re-seats a node at new coordinates by shuffling it along both axis
    /// orders, recording every node it passes.
    pub fn shuffle(&mut self, ix: NodeIx, x: f32, z: f32, crossings: &mut Vec<Crossing>) {
        self.shuffle_x(ix, x, crossings);
        self.shuffle_z(ix, z, crossings);
    }

    fn shuffle_x(&mut self, ix: NodeIx, new_x: f32, crossings: &mut Vec<Crossing>) {
        loop {
            let Some(next) = self.node(ix).next_x else {
                break;
            };
            if self.node(next).x < new_x {
                crossings.push(Crossing {
                    axis: Axis::X,
                    moved: self.node(ix).kind,
                    passed: self.node(next).kind,
                });
                self.swap_with_next_x(ix, next);
            } else {
                break;
            }
        }
        loop {
            let Some(prev) = self.node(ix).prev_x else {
                break;
            };
            if self.node(prev).x > new_x {
                crossings.push(Crossing {
                    axis: Axis::X,
                    moved: self.node(ix).kind,
                    passed: self.node(prev).kind,
                });
                self.swap_with_next_x(prev, ix);
            } else {
                break;
            }
        }
        self.node_mut(ix).x = new_x;
    }

    fn shuffle_z(&mut self, ix: NodeIx, new_z: f32, crossings: &mut Vec<Crossing>) {
        loop {
            let Some(next) = self.node(ix).next_z else {
                break;
            };
            if self.node(next).z < new_z {
                crossings.push(Crossing {
                    axis: Axis::Z,
                    moved: self.node(ix).kind,
                    passed: self.node(next).kind,
                });
                self.swap_with_next_z(ix, next);
            } else {
                break;
            }
        }
        loop {
            let Some(prev) = self.node(ix).prev_z else {
                break;
            };
            if self.node(prev).z > new_z {
                crossings.push(Crossing {
                    axis: Axis::Z,
                    moved: self.node(ix).kind,
                    passed: self.node(prev).kind,
                });
                self.swap_with_next_z(prev, ix);
            } else {
                break;
            }
        }
        self.node_mut(ix).z = new_z;
    }

    fn link_sorted_x(&mut self, ix: NodeIx) {
        let x = self.node(ix).x;
        let mut prev = None;
        let mut cursor = self.head_x;
        while let Some(cur) = cursor {
            if self.node(cur).x >= x {
                break;
            }
            prev = Some(cur);
            cursor = self.node(cur).next_x;
        }
        self.node_mut(ix).prev_x = prev;
        self.node_mut(ix).next_x = cursor;
        match prev {
            Some(prev) => self.node_mut(prev).next_x = Some(ix),
            None => self.head_x = Some(ix),
        }
        if let Some(next) = cursor {
            self.node_mut(next).prev_x = Some(ix);
        }
    }

    fn link_sorted_z(&mut self, ix: NodeIx) {
        let z = self.node(ix).z;
        let mut prev = None;
        let mut cursor = self.head_z;
        while let Some(cur) = cursor {
            if self.node(cur).z >= z {
                break;
            }
            prev = Some(cur);
            cursor = self.node(cur).next_z;
        }
        self.node_mut(ix).prev_z = prev;
        self.node_mut(ix).next_z = cursor;
        match prev {
            Some(prev) => self.node_mut(prev).next_z = Some(ix),
            None => self.head_z = Some(ix),
        }
        if let Some(next) = cursor {
            self.node_mut(next).prev_z = Some(ix);
        }
    }

    fn unlink_x(&mut self, ix: NodeIx) {
        let (prev, next) = {
            let node = self.node(ix);
            (node.prev_x, node.next_x)
        };
        match prev {
            Some(prev) => self.node_mut(prev).next_x = next,
            None => self.head_x = next,
        }
        if let Some(next) = next {
            self.node_mut(next).prev_x = prev;
        }
        let node = self.node_mut(ix);
        node.prev_x = None;
        node.next_x = None;
    }

    fn unlink_z(&mut self, ix: NodeIx) {
        let (prev, next) = {
            let node = self.node(ix);
            (node.prev_z, node.next_z)
        };
        match prev {
            Some(prev) => self.node_mut(prev).next_z = next,
            None => self.head_z = next,
        }
        if let Some(next) = next {
            self.node_mut(next).prev_z = prev;
        }
        let node = self.node_mut(ix);
        node.prev_z = None;
        node.next_z = None;
    }

    /// Relinks so that `b` (currently `a`'s successor) comes before `a`.
    fn swap_with_next_x(&mut self, a: NodeIx, b: NodeIx) {
        debug_assert_eq!(self.node(a).next_x, Some(b));
        let p = self.node(a).prev_x;
        let n = self.node(b).next_x;
        match p {
            Some(p) => self.node_mut(p).next_x = Some(b),
            None => self.head_x = Some(b),
        }
        self.node_mut(b).prev_x = p;
        self.node_mut(b).next_x = Some(a);
        self.node_mut(a).prev_x = Some(b);
        self.node_mut(a).next_x = n;
        if let Some(n) = n {
            self.node_mut(n).prev_x = Some(a);
        }
    }

    fn swap_with_next_z(&mut self, a: NodeIx, b: NodeIx) {
        debug_assert_eq!(self.node(a).next_z, Some(b));
        let p = self.node(a).prev_z;
        let n = self.node(b).next_z;
        match p {
            Some(p) => self.node_mut(p).next_z = Some(b),
            None => self.head_z = Some(b),
        }
        self.node_mut(b).prev_z = p;
        self.node_mut(b).next_z = Some(a);
        self.node_mut(a).prev_z = Some(b);
        self.node_mut(a).next_z = n;
        if let Some(n) = n {
            self.node_mut(n).prev_z = Some(a);
        }
    }

    pub fn iter_x(&self) -> AxisIter<'_> {
        AxisIter {
            list: self,
            cursor: self.head_x,
            axis: Axis::X,
        }
    }

    pub fn iter_z(&self) -> AxisIter<'_> {
        AxisIter {
            list: self,
            cursor: self.head_z,
            axis: Axis::Z,
        }
    }

    /// Consistency self-check: both axis orders must be non-decreasing.
    pub fn is_sorted(&self) -> bool {
        let mut last = f32::NEG_INFINITY;
        for ix in self.iter_x() {
            let x = self.node(ix).x;
            if x < last {
                return false;
            }
            last = x;
        }
        last = f32::NEG_INFINITY;
        for ix in self.iter_z() {
            let z = self.node(ix).z;
            if z < last {
                return false;
            }
            last = z;
        }
        true
    }

    /// Self-heal: relinks both axis orders from scratch, sorted by
    /// coordinate.
    pub fn rebuild(&mut self) {
        let mut live: Vec<NodeIx> = (0..self.nodes.len() as u32)
            .map(NodeIx)
            .filter(|ix| self.node(*ix).in_use)
            .collect();

        live.sort_by(|a, b| {
            self.node(*a)
                .x
                .partial_cmp(&self.node(*b).x)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.head_x = live.first().copied();
        for i in 0..live.len() {
            let ix = live[i];
            let prev = if i > 0 { Some(live[i - 1]) } else { None };
            let next = live.get(i + 1).copied();
            let node = self.node_mut(ix);
            node.prev_x = prev;
            node.next_x = next;
        }

        live.sort_by(|a, b| {
            self.node(*a)
                .z
                .partial_cmp(&self.node(*b).z)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.head_z = live.first().copied();
        for i in 0..live.len() {
            let ix = live[i];
            let prev = if i > 0 { Some(live[i - 1]) } else { None };
            let next = live.get(i + 1).copied();
            let node = self.node_mut(ix);
            node.prev_z = prev;
            node.next_z = next;
        }
    }
}

pub struct AxisIter<'a> {
    list: &'a RangeList,
    cursor: Option<NodeIx>,
    axis: Axis,
}

impl<'a> Iterator for AxisIter<'a> {
    type Item = NodeIx;

    fn next(&mut self) -> Option<NodeIx> {
        let ix = self.cursor?;
        self.cursor = match self.axis {
            Axis::X => self.list.node(ix).next_x,
            Axis::Z => self.list.node(ix).next_z,
        };
        Some(ix)
    }
}
