mod cell_process;
mod message_handlers;

pub use cell_process::{CellProcess, PositionEventPayload, PropertyEventPayload};
