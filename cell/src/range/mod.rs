mod proximity;
mod range_list;

pub use proximity::{ProximityError, ProximityIndex, TriggerEvent};
pub use range_list::{Axis, Crossing, NodeIx, NodeKind, RangeList, TriggerId};
