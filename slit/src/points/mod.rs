//! Observation points: per-kind hook declarations, decoding and filtering.

use std::{collections::BTreeMap, sync::Arc};

use crossbeam::channel::{select, Sender};

use crate::{
    bpf::FixedLayout,
    error::{AttachError, DecodeError},
    events::{Event, EventKind},
    probe::{Hook, ProbeHandle, RawRecord, ShutdownSignal},
};

/// Drop-function chains.
pub mod drop;
/// `execve()` observation.
pub mod exec;
/// Signal delivery observation.
pub mod signal;

use drop::DropChain;
use exec::ExecPoint;
use signal::SignalPoint;

/// Shared context handed to every observation point of a session.
#[derive(Clone, Debug)]
pub struct ObservationReference {
    events: Sender<Event>,
    probe: ProbeHandle,
    halt: ShutdownSignal,
}

impl ObservationReference {
    pub fn new(events: Sender<Event>, probe: ProbeHandle, halt: ShutdownSignal) -> Self {
        Self {
            events,
            probe,
            halt,
        }
    }

    pub fn probe(&self) -> &ProbeHandle {
        &self.probe
    }

    /// Sends `event` on the session's output channel, blocking while the
    /// channel is full. Returns false if the event was discarded because the
    /// session is halting or the consumer side is gone.
    pub fn emit(&self, event: Event) -> bool {
        select! {
            send(self.events, event) -> res => res.is_ok(),
            recv(self.halt.receiver()) -> _ => false,
        }
    }
}

/// A source of one event kind.
pub trait ObservationPoint: Send + Sync {
    fn kind(&self) -> EventKind;

    /// Hooks this point needs, keyed by a name unique within the point.
    fn hooks(&self) -> BTreeMap<&'static str, Hook>;

    /// Decodes one raw record, runs the drop chain, and emits the surviving
    /// event. Filtered records are discarded without error.
    fn handle_record(&self, record: &RawRecord) -> Result<(), DecodeError>;
}

/// Profile entry: builds a point once the session's reference exists.
pub trait BuildPoint: Send {
    fn kind(&self) -> EventKind;

    /// Consumes the entry, so a point can only ever receive one reference.
    /// Fails if the probe set lacks a program the point needs.
    fn build(
        self: Box<Self>,
        reference: ObservationReference,
    ) -> Result<Arc<dyn ObservationPoint>, AttachError>;
}

/// Ordered set of observation points to activate for a session.
pub struct Profile {
    points: Vec<Box<dyn BuildPoint>>,
}

impl Profile {
    /// A profile with no points.
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn with<P: BuildPoint + 'static>(mut self, point: P) -> Self {
        self.points.push(Box::new(point));
        self
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.points.iter().map(|p| p.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub(crate) fn into_points(self) -> Vec<Box<dyn BuildPoint>> {
        self.points
    }
}

impl Default for Profile {
    /// Every `execve()`, and signals that carry both a code and flags.
    fn default() -> Self {
        Profile::new()
            .with(ExecPoint::builder(DropChain::new()))
            .with(SignalPoint::builder(
                DropChain::new()
                    .with(signal::code_is_zero)
                    .with(signal::flags_is_zero),
            ))
    }
}

/// Decode, filter and emit path shared by every point.
pub(crate) fn observe<T, F>(
    reference: &ObservationReference,
    drops: &DropChain<T>,
    record: &RawRecord,
    wrap: F,
) -> Result<(), DecodeError>
where
    T: FixedLayout,
    F: FnOnce(u32, T) -> Event,
{
    let data = T::decode(&record.data)?;
    if drops.should_drop(&data) {
        log::trace!("Dropped {} record from cpu {}", T::KIND, record.cpu);
        return Ok(());
    }
    if !reference.emit(wrap(record.cpu, data)) {
        log::trace!("Discarded {} event, session is halting", T::KIND);
    }
    Ok(())
}
