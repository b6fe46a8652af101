use std::{collections::BTreeMap, sync::Arc};

use super::{drop::DropChain, observe, BuildPoint, ObservationPoint, ObservationReference};
use crate::{
    bpf::ExecData,
    error::{AttachError, DecodeError},
    events::{Event, EventKind, ExecEvent},
    probe::{Hook, ProgramHandle, RawRecord},
};

/// Program that records `execve()` calls.
pub const EXEC_PROGRAM: &str = "trace_execve";
pub const EXEC_GROUP: &str = "syscalls";
pub const EXEC_TRACEPOINT: &str = "sys_enter_execve";

/// Observes process execution through the `sys_enter_execve` tracepoint.
pub struct ExecPoint {
    reference: ObservationReference,
    program: ProgramHandle,
    drops: DropChain<ExecData>,
}

impl ExecPoint {
    pub fn new(
        reference: ObservationReference,
        drops: DropChain<ExecData>,
    ) -> Result<Self, AttachError> {
        let program = reference.probe().program(EXEC_PROGRAM)?;
        Ok(Self {
            reference,
            program,
            drops,
        })
    }

    /// Profile entry for an exec point with the given drop functions.
    pub fn builder(drops: DropChain<ExecData>) -> ExecBuilder {
        ExecBuilder { drops }
    }
}

impl ObservationPoint for ExecPoint {
    fn kind(&self) -> EventKind {
        EventKind::ProcessExecuted
    }

    fn hooks(&self) -> BTreeMap<&'static str, Hook> {
        BTreeMap::from([(
            "execve",
            Hook::new(EXEC_GROUP, EXEC_TRACEPOINT, self.program.clone()),
        )])
    }

    fn handle_record(&self, record: &RawRecord) -> Result<(), DecodeError> {
        observe(&self.reference, &self.drops, record, |cpu, data| {
            Event::ProcessExecuted(ExecEvent::new(cpu, data))
        })
    }
}

pub struct ExecBuilder {
    drops: DropChain<ExecData>,
}

impl BuildPoint for ExecBuilder {
    fn kind(&self) -> EventKind {
        EventKind::ProcessExecuted
    }

    fn build(
        self: Box<Self>,
        reference: ObservationReference,
    ) -> Result<Arc<dyn ObservationPoint>, AttachError> {
        Ok(Arc::new(ExecPoint::new(reference, self.drops)?))
    }
}

/// Drops records whose filename could not be read.
pub fn empty_filename(d: &ExecData) -> bool {
    d.filename[0] == 0
}

/// Drops records from the idle task.
pub fn kernel_thread(d: &ExecData) -> bool {
    d.pid == 0
}
