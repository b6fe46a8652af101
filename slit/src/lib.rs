//! Kernel process and signal observation.
//!
//! Observation points declare the tracepoints they need, decode the fixed
//! records their programs emit, drop uninteresting ones and push the rest
//! onto a single channel; the [`Observer`] runs the session and writes the
//! combined stream as line-delimited JSON.

pub mod bpf;
pub mod error;
pub mod events;
pub mod observer;
pub mod points;
pub mod probe;

pub use error::*;
pub use events::{Event, EventKind};
pub use observer::{Observer, ObserverConfig, OutputFormat, StartReport};
pub use points::Profile;
