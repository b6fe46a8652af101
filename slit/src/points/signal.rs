use std::{collections::BTreeMap, sync::Arc};

use super::{drop::DropChain, observe, BuildPoint, ObservationPoint, ObservationReference};
use crate::{
    bpf::SignalData,
    error::{AttachError, DecodeError},
    events::{Event, EventKind, SignalEvent},
    probe::{Hook, ProgramHandle, RawRecord},
};

pub const SIGNAL_PROGRAM: &str = "trace_signal_deliver";
pub const SIGNAL_GROUP: &str = "signal";
pub const SIGNAL_TRACEPOINT: &str = "signal_deliver";

/// Observes signal delivery through the `signal/signal_deliver` tracepoint.
pub struct SignalPoint {
    reference: ObservationReference,
    program: ProgramHandle,
    drops: DropChain<SignalData>,
}

impl SignalPoint {
    pub fn new(
        reference: ObservationReference,
        drops: DropChain<SignalData>,
    ) -> Result<Self, AttachError> {
        let program = reference.probe().program(SIGNAL_PROGRAM)?;
        Ok(Self {
            reference,
            program,
            drops,
        })
    }

    pub fn builder(drops: DropChain<SignalData>) -> SignalBuilder {
        SignalBuilder { drops }
    }
}

impl ObservationPoint for SignalPoint {
    fn kind(&self) -> EventKind {
        EventKind::SignalDelivered
    }

    fn hooks(&self) -> BTreeMap<&'static str, Hook> {
        BTreeMap::from([(
            "signal_deliver",
            Hook::new(SIGNAL_GROUP, SIGNAL_TRACEPOINT, self.program.clone()),
        )])
    }

    fn handle_record(&self, record: &RawRecord) -> Result<(), DecodeError> {
        observe(&self.reference, &self.drops, record, |cpu, data| {
            Event::SignalDelivered(SignalEvent::new(cpu, data))
        })
    }
}

pub struct SignalBuilder {
    drops: DropChain<SignalData>,
}

impl BuildPoint for SignalBuilder {
    fn kind(&self) -> EventKind {
        EventKind::SignalDelivered
    }

    fn build(
        self: Box<Self>,
        reference: ObservationReference,
    ) -> Result<Arc<dyn ObservationPoint>, AttachError> {
        Ok(Arc::new(SignalPoint::new(reference, self.drops)?))
    }
}

pub fn code_is_zero(d: &SignalData) -> bool {
    d.code == 0
}

pub fn flags_is_zero(d: &SignalData) -> bool {
    d.flags == 0
}
