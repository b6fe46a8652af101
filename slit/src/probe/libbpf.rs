//! Probe set over an already loaded libbpf object.

use std::{collections::BTreeMap, path::Path, time::Duration};

use crossbeam::channel::{unbounded, Receiver};
use libbpf_rs::{ErrorKind, Link, Object, PerfBuffer, PerfBufferBuilder};

use super::{
    Attachment, Claim, Claims, Hook, ProbeHandle, ProbeSet, ProgramHandle, RawRecord,
    RecordReader,
};
use crate::{
    error::{AttachError, OpenError, ReadError},
    probe::ShutdownSignal,
};

/// Per-CPU perf buffer size, in pages.
pub const DEFAULT_PERF_PAGES: usize = 64;
/// How often a reader wakes up to check for shutdown while its buffer is idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const TRACEFS_ROOTS: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

/// Handle over a loaded BPF object whose programs each write into their own
/// perf event array.
///
/// A perf event array has a single reader: opening a buffer on it rewires
/// every per-CPU slot, so a second open on a map that is already being read
/// fails with [`OpenError::MapInUse`] instead of silently starving the first
/// reader. Hooks and maps are released when their attachment or reader is
/// dropped, so the same probes can back a fresh session.
pub struct LoadedProbes {
    obj: Object,
    /// Program name -> output map name
    routes: BTreeMap<String, String>,
    /// Hooks attached through this probe set, as `group/name`
    attached: Claims,
    /// Output maps with a live reader
    open_maps: Claims,
    perf_pages: usize,
    poll_interval: Duration,
}

impl LoadedProbes {
    pub fn new(obj: Object) -> Self {
        Self {
            obj,
            routes: BTreeMap::new(),
            attached: Claims::new(),
            open_maps: Claims::new(),
            perf_pages: DEFAULT_PERF_PAGES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Declares that `program` writes its records into the perf event array
    /// `output_map`. Only routed programs are visible to observation points.
    pub fn route<P: Into<String>, M: Into<String>>(mut self, program: P, output_map: M) -> Self {
        self.routes.insert(program.into(), output_map.into());
        self
    }

    pub fn perf_pages(mut self, pages: usize) -> Self {
        self.perf_pages = pages;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl ProbeSet for LoadedProbes {
    fn handle(&self) -> ProbeHandle {
        ProbeHandle::new(self.routes.iter().filter_map(|(prog, map)| {
            if self.obj.prog(prog).is_none() {
                log::warn!("Program {prog} is routed but not present in the object");
                return None;
            }
            Some(ProgramHandle::new(prog, map))
        }))
    }

    fn attach(&mut self, hook: &Hook) -> Result<Box<dyn Attachment>, AttachError> {
        let key = hook.to_string();
        let claim = self
            .attached
            .claim(&key)
            .ok_or_else(|| AttachError::AlreadyAttached { hook: key.clone() })?;
        if tracepoint_missing(hook) {
            return Err(AttachError::UnknownHook { hook: key });
        }

        let name = hook.program().name();
        let prog = self
            .obj
            .prog_mut(name)
            .ok_or_else(|| AttachError::UnknownProgram {
                program: name.to_string(),
            })?;
        let link = prog
            .attach_tracepoint(hook.group(), hook.name())
            .map_err(|err| attach_error(err.kind(), key.clone(), err.to_string()))?;

        log::debug!("Attached {name} to {key}");
        Ok(Box::new(LinkAttachment {
            _link: link,
            _claim: claim,
        }))
    }

    fn open_reader(
        &mut self,
        hook: &Hook,
        shutdown: ShutdownSignal,
    ) -> Result<Box<dyn RecordReader>, OpenError> {
        let prog = hook.program();
        let map = self
            .obj
            .map(prog.output_map())
            .ok_or_else(|| OpenError::MissingOutputMap {
                program: prog.name().to_string(),
                map: prog.output_map().to_string(),
            })?;
        let claim = self
            .open_maps
            .claim(prog.output_map())
            .ok_or_else(|| OpenError::MapInUse {
                map: prog.output_map().to_string(),
                hook: hook.to_string(),
            })?;

        // The sample callback only queues records; the reader hands them out
        // one at a time.
        let (tx, rx) = unbounded();
        let label = hook.to_string();
        let buffer = PerfBufferBuilder::new(map)
            .pages(self.perf_pages)
            .sample_cb(move |cpu: i32, data: &[u8]| {
                let _ = tx.send(RawRecord::new(cpu as u32, data.to_vec()));
            })
            .lost_cb(move |cpu: i32, count: u64| {
                log::warn!("Kernel dropped {count} records from {label} on cpu {cpu}");
            })
            .build()
            .map_err(|err| {
                OpenError::Kernel {
                    hook: hook.to_string(),
                    reason: err.to_string(),
                }
            })?;

        Ok(Box::new(PerfReader {
            buffer,
            pending: rx,
            shutdown,
            poll_interval: self.poll_interval,
            _claim: claim,
        }))
    }
}

/// Maps a libbpf attach failure onto the kinds callers act on.
fn attach_error(kind: ErrorKind, hook: String, reason: String) -> AttachError {
    match kind {
        ErrorKind::PermissionDenied => AttachError::PermissionDenied { hook },
        ErrorKind::NotFound => AttachError::UnknownHook { hook },
        _ => AttachError::Kernel { hook, reason },
    }
}

// Fields drop in order: detach before releasing the hook.
struct LinkAttachment {
    _link: Link,
    _claim: Claim,
}

impl Attachment for LinkAttachment {}

struct PerfReader {
    buffer: PerfBuffer<'static>,
    pending: Receiver<RawRecord>,
    shutdown: ShutdownSignal,
    poll_interval: Duration,
    _claim: Claim,
}

impl RecordReader for PerfReader {
    fn read(&mut self) -> Result<RawRecord, ReadError> {
        loop {
            if self.shutdown.is_closed() {
                return Err(ReadError::Closed);
            }
            if let Ok(record) = self.pending.try_recv() {
                return Ok(record);
            }
            self.buffer
                .poll(self.poll_interval)
                .map_err(|err| ReadError::Transient(err.to_string()))?;
        }
    }
}

/// True when tracefs is visible and does not list the hook. An unreadable or
/// unmounted tracefs is left for the kernel to judge.
fn tracepoint_missing(hook: &Hook) -> bool {
    let mut roots = TRACEFS_ROOTS
        .iter()
        .map(|root| Path::new(root).join("events"))
        .filter(|events| events.is_dir())
        .peekable();
    if roots.peek().is_none() {
        return false;
    }
    !roots.any(|events| events.join(hook.group()).join(hook.name()).is_dir())
}
