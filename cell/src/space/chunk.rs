use std::collections::{HashSet, VecDeque};

use glam::{Vec2, Vec3};
use thiserror::Error;

/// Containment tests tolerate this much slop so that points sitting exactly
/// on a shared boundary plane belong to at least one of the two chunks.
pub const BOUNDARY_EPSILON: f32 = 1e-4;

/// Errors that can occur during spatial queries
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SpatialError {
    #[error("point ({x}, {y}, {z}) is outside every chunk of the space")]
    OutsideSpace { x: f32, y: f32, z: f32 },
    #[error("chunk id {id} is not part of this space")]
    UnknownChunk { id: u32 },
}

/// Index of a chunk within its owning [`ChunkGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u32);

/// A boundary plane in `normal . p + d >= 0` form; points satisfying the
/// inequality are on the inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    /// Signed distance of `point` from the plane; positive is inside.
    pub fn distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// A permeable boundary between two chunks: a 2-D polygon embedded in one of
/// the source chunk's boundary planes.
#[derive(Clone, Debug)]
pub struct Portal {
    /// Index of the boundary plane this portal lies on.
    pub plane_index: usize,
    /// Polygon corners in portal-local (u, v) axes.
    pub points: Vec<Vec2>,
    pub origin: Vec3,
    pub u_axis: Vec3,
    pub v_axis: Vec3,
    /// Chunk on the far side; `None` for an exit that leads nowhere (e.g. a
    /// heaven/earth boundary).
    pub target: Option<ChunkId>,
    /// Whether entities may physically pass through.
    pub permissive: bool,
}

impl Portal {
    /// Projects a world point onto the portal's local axes.
    pub fn project(&self, point: Vec3) -> Vec2 {
        let rel = point - self.origin;
        Vec2::new(rel.dot(self.u_axis), rel.dot(self.v_axis))
    }

    /// Whether the projection of `point` lands inside the portal polygon.
    pub fn contains(&self, point: Vec3) -> bool {
        polygon_contains(&self.points, self.project(point))
    }
}

fn polygon_contains(points: &[Vec2], p: Vec2) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[j];
        if ((a.y > p.y) != (b.y > p.y))
            && (p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// A convex cell of geometry: the intersection of its boundary planes'
/// half-spaces. Chunks tile the space with no gaps and no overlaps.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub bounds: Vec<Plane>,
    pub portals: Vec<Portal>,
}

impl Chunk {
    /// An axis-aligned box chunk. Boundary planes are ordered
    /// `[min_x, max_x, min_y, max_y, min_z, max_z]`.
    pub fn axis_aligned(min: Vec3, max: Vec3) -> Self {
        Self {
            bounds: vec![
                Plane::new(Vec3::X, -min.x),
                Plane::new(-Vec3::X, max.x),
                Plane::new(Vec3::Y, -min.y),
                Plane::new(-Vec3::Y, max.y),
                Plane::new(Vec3::Z, -min.z),
                Plane::new(-Vec3::Z, max.z),
            ],
            portals: Vec::new(),
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        self.bounds
            .iter()
            .all(|plane| plane.distance(point) >= -BOUNDARY_EPSILON)
    }
}

/// The chunk graph of one space: non-overlapping chunks connected by
/// directed portals. Owned exclusively by one cell process.
#[derive(Clone, Debug, Default)]
pub struct ChunkGraph {
    chunks: Vec<Chunk>,
}

impl ChunkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chunk(&mut self, chunk: Chunk) -> ChunkId {
        let id = ChunkId(self.chunks.len() as u32);
        self.chunks.push(chunk);
        id
    }

    /// Adds a portal to an existing chunk.
    ///
    /// # Panics
    ///
    /// Panics if `from` is not part of this space.
    pub fn add_portal(&mut self, from: ChunkId, portal: Portal) {
        self.try_add_portal(from, portal)
            .expect("portal source chunk must be part of this space");
    }

    pub fn try_add_portal(&mut self, from: ChunkId, portal: Portal) -> Result<(), SpatialError> {
        let chunk = self
            .chunks
            .get_mut(from.0 as usize)
            .ok_or(SpatialError::UnknownChunk { id: from.0 })?;
        chunk.portals.push(portal);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn try_chunk(&self, id: ChunkId) -> Result<&Chunk, SpatialError> {
        self.chunks
            .get(id.0 as usize)
            .ok_or(SpatialError::UnknownChunk { id: id.0 })
    }

    /// # Panics
    ///
    /// Panics if `id` is not part of this space. Consider using
    /// [`Self::try_chunk`] for non-panicking access.
    pub fn chunk(&self, id: ChunkId) -> &Chunk {
        self.try_chunk(id).expect("chunk id must be part of this space")
    }

    /// Finds the chunk containing `point`. The hint chunk is tested first,
    /// then its portal-adjacent neighbors; the full scan only runs on
    /// teleport or first placement, keeping normal movement amortized O(1).
    pub fn find_chunk_containing(
        &self,
        point: Vec3,
        hint: Option<ChunkId>,
    ) -> Result<ChunkId, SpatialError> {
        if let Some(hint) = hint {
            if let Ok(chunk) = self.try_chunk(hint) {
                if chunk.contains(point) {
                    return Ok(hint);
                }
                for portal in &chunk.portals {
                    if let Some(target) = portal.target {
                        if let Ok(neighbor) = self.try_chunk(target) {
                            if neighbor.contains(point) {
                                return Ok(target);
                            }
                        }
                    }
                }
            }
        }

        for (index, chunk) in self.chunks.iter().enumerate() {
            if chunk.contains(point) {
                return Ok(ChunkId(index as u32));
            }
        }

        Err(SpatialError::OutsideSpace {
            x: point.x,
            y: point.y,
            z: point.z,
        })
    }

    /// Whether the straight segment `from -> to` can be justified by a chain
    /// of permissive portal crossings starting in `start`. Breadth-first
    /// search over (chunk, segment-entry) states, bounded by a visited-chunk
    /// set so portal cycles terminate.
    pub fn segment_justified(&self, start: ChunkId, from: Vec3, to: Vec3) -> bool {
        let Ok(_) = self.try_chunk(start) else {
            return false;
        };

        let mut visited: HashSet<ChunkId> = HashSet::new();
        visited.insert(start);
        let mut queue: VecDeque<(ChunkId, f32)> = VecDeque::new();
        queue.push_back((start, 0.0));

        while let Some((chunk_id, t_entry)) = queue.pop_front() {
            let chunk = match self.try_chunk(chunk_id) {
                Ok(chunk) => chunk,
                Err(_) => continue,
            };

            // earliest boundary crossing after the entry parameter
            let mut t_exit = f32::INFINITY;
            let mut exit_plane = None;
            for (plane_index, plane) in chunk.bounds.iter().enumerate() {
                let d_from = plane.distance(from);
                let d_to = plane.distance(to);
                if d_to >= -BOUNDARY_EPSILON {
                    continue;
                }
                // d(t) is linear in t and negative at t=1: the segment exits
                // through this plane at t_cross
                let t_cross = d_from / (d_from - d_to);
                if t_cross >= t_entry - BOUNDARY_EPSILON && t_cross < t_exit {
                    t_exit = t_cross;
                    exit_plane = Some(plane_index);
                }
            }

            let Some(exit_plane) = exit_plane else {
                // the segment never leaves this chunk
                if chunk.contains(to) {
                    return true;
                }
                continue;
            };

            if t_exit >= 1.0 {
                if chunk.contains(to) {
                    return true;
                }
                continue;
            }

            let crossing_point = from.lerp(to, t_exit);
            for portal in &chunk.portals {
                if portal.plane_index != exit_plane || !portal.permissive {
                    continue;
                }
                let Some(target) = portal.target else {
                    continue;
                };
                if portal.contains(crossing_point) && visited.insert(target) {
                    queue.push_back((target, t_exit));
                }
            }
        }

        false
    }
}
