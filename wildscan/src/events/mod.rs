//! Event bus announcing job and batch state changes.
//!
//! Every mutating call on the job registry and the batch coordinator publishes
//! here; observers subscribe by topic instead of polling state.

mod bus;
mod payload;

pub use bus::{EventBus, EventBusConfig, RecvError, Subscription, TryRecvError};
pub use payload::{BusEvent, EventKind, EventPayload, Topic};
