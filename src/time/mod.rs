//! Time primitives: the hierarchical timer wheel and the deadline set.
//!
//! - [`wheel`]: hierarchical ring buffers of scheduled events, advanced by
//!   integer ticks
//! - `deadline`: exact monotonic one-shot deadlines backing the loop's
//!   `run_at`/`run_after`

pub(crate) mod deadline;
pub mod wheel;

pub use wheel::{EventKey, Tick, TimerWheel, WheelEvent};
