pub mod chunk;
pub mod physics;

pub use chunk::{Chunk, ChunkGraph, ChunkId, Plane, Portal, SpatialError, BOUNDARY_EPSILON};
pub use physics::{physically_possible, settle_jitter_debt, MoveVerdict};
