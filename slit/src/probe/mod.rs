//! Interface to the kernel tracing subsystem.
//!
//! The pipeline never compiles, loads or verifies programs. It is handed a
//! [`ProbeSet`] wrapping programs that are already loaded, and only attaches
//! hooks and reads records through it.

use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use crate::error::{AttachError, OpenError, ReadError};

/// Exclusive names released on drop.
pub mod claims;
/// libbpf-rs backed probe set.
pub mod libbpf;
/// Close signal shared by a session's readers.
pub mod shutdown;

pub use claims::{Claim, Claims};
pub use shutdown::*;

/// A loaded kernel program together with the perf event array it writes its
/// records into.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramHandle {
    name: Arc<str>,
    output_map: Arc<str>,
}

impl ProgramHandle {
    pub fn new<S: AsRef<str>, M: AsRef<str>>(name: S, output_map: M) -> Self {
        Self {
            name: name.as_ref().into(),
            output_map: output_map.as_ref().into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_map(&self) -> &str {
        &self.output_map
    }
}

/// Catalog of the programs available in a loaded probe set. Cheap to clone;
/// every observation point of a session holds one.
#[derive(Clone, Debug, Default)]
pub struct ProbeHandle {
    programs: Arc<BTreeMap<String, ProgramHandle>>,
}

impl ProbeHandle {
    pub fn new<I: IntoIterator<Item = ProgramHandle>>(programs: I) -> Self {
        let programs = programs
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Self {
            programs: Arc::new(programs),
        }
    }

    /// Resolves a program by name.
    pub fn program(&self, name: &str) -> Result<ProgramHandle, AttachError> {
        self.programs
            .get(name)
            .cloned()
            .ok_or_else(|| AttachError::UnknownProgram {
                program: name.to_string(),
            })
    }
}

/// A kernel hook to attach a program to, e.g. the `signal/signal_deliver`
/// tracepoint.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hook {
    group: String,
    name: String,
    program: ProgramHandle,
}

impl Hook {
    pub fn new<G: Into<String>, N: Into<String>>(group: G, name: N, program: ProgramHandle) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            program,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &ProgramHandle {
        &self.program
    }
}

impl Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// One record read from a hook's buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
    pub cpu: u32,
    pub data: Vec<u8>,
}

impl RawRecord {
    pub fn new(cpu: u32, data: Vec<u8>) -> Self {
        Self { cpu, data }
    }
}

/// A bound hook. Dropping it detaches the hook.
pub trait Attachment: Send {}

/// Blocking reader over one hook's buffer.
pub trait RecordReader: Send {
    /// Blocks until the next record arrives. Returns [`ReadError::Closed`]
    /// once the session's shutdown signal has closed.
    fn read(&mut self) -> Result<RawRecord, ReadError>;
}

/// A set of loaded kernel programs.
pub trait ProbeSet {
    /// Catalog of the programs in this set.
    fn handle(&self) -> ProbeHandle;

    /// Attaches `hook` to its program.
    fn attach(&mut self, hook: &Hook) -> Result<Box<dyn Attachment>, AttachError>;

    /// Opens a reader on the buffer `hook`'s program writes into. The reader
    /// must observe `shutdown` and fail with [`ReadError::Closed`] once it
    /// closes.
    fn open_reader(
        &mut self,
        hook: &Hook,
        shutdown: ShutdownSignal,
    ) -> Result<Box<dyn RecordReader>, OpenError>;
}
