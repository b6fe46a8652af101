//! In-memory probe set: hooks are fed from crossbeam channels instead of
//! kernel buffers.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    io::{self, Write},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{select, unbounded, Receiver, Sender};
use slit::{
    error::{AttachError, OpenError, ReadError},
    points::{exec::EXEC_PROGRAM, signal::SIGNAL_PROGRAM},
    probe::{
        Attachment, Claim, Claims, Hook, ProbeHandle, ProbeSet, ProgramHandle, RawRecord,
        RecordReader, ShutdownSignal,
    },
};

pub type Feed = Sender<Result<RawRecord, String>>;

pub struct FakeProbes {
    handle: ProbeHandle,
    feeds: HashMap<String, Receiver<Result<RawRecord, String>>>,
    fail_attach: HashSet<String>,
    fail_open: HashSet<String>,
    attached: Claims,
    /// Set when output maps take a single reader, as perf event arrays do
    open_maps: Option<Claims>,
    /// Attachments not yet dropped
    pub live: Arc<AtomicUsize>,
}

impl FakeProbes {
    /// Probe set carrying both the exec and signal programs.
    pub fn new() -> Self {
        Self::with_programs(&[EXEC_PROGRAM, SIGNAL_PROGRAM])
    }

    pub fn with_programs(programs: &[&str]) -> Self {
        Self {
            handle: ProbeHandle::new(
                programs
                    .iter()
                    .map(|p| ProgramHandle::new(p, format!("{p}_events"))),
            ),
            feeds: HashMap::new(),
            fail_attach: HashSet::new(),
            fail_open: HashSet::new(),
            attached: Claims::new(),
            open_maps: None,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the sender feeding `hook` (`group/name`).
    pub fn feed(&mut self, hook: &str) -> Feed {
        let (tx, rx) = unbounded();
        self.feeds.insert(hook.to_string(), rx);
        tx
    }

    pub fn fail_attach(&mut self, hook: &str) {
        self.fail_attach.insert(hook.to_string());
    }

    pub fn fail_open(&mut self, hook: &str) {
        self.fail_open.insert(hook.to_string());
    }

    /// Clears injected failures for `hook`.
    pub fn heal(&mut self, hook: &str) {
        self.fail_attach.remove(hook);
        self.fail_open.remove(hook);
    }

    /// Lets each output map have one reader at a time.
    pub fn exclusive_maps(mut self) -> Self {
        self.open_maps = Some(Claims::new());
        self
    }

    pub fn is_attached(&self, hook: &str) -> bool {
        self.attached.is_held(hook)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl ProbeSet for FakeProbes {
    fn handle(&self) -> ProbeHandle {
        self.handle.clone()
    }

    fn attach(&mut self, hook: &Hook) -> Result<Box<dyn Attachment>, AttachError> {
        let key = hook.to_string();
        if self.fail_attach.contains(&key) {
            return Err(AttachError::PermissionDenied { hook: key });
        }
        let claim = self
            .attached
            .claim(&key)
            .ok_or_else(|| AttachError::AlreadyAttached { hook: key.clone() })?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeAttachment {
            live: self.live.clone(),
            _claim: claim,
        }))
    }

    fn open_reader(
        &mut self,
        hook: &Hook,
        shutdown: ShutdownSignal,
    ) -> Result<Box<dyn RecordReader>, OpenError> {
        let key = hook.to_string();
        if self.fail_open.contains(&key) {
            return Err(OpenError::Kernel {
                hook: key,
                reason: "Operation not permitted".into(),
            });
        }
        let map = hook.program().output_map();
        let claim = match &self.open_maps {
            Some(maps) => Some(maps.claim(map).ok_or_else(|| OpenError::MapInUse {
                map: map.to_string(),
                hook: key.clone(),
            })?),
            None => None,
        };
        let records = self.feeds.remove(&key).unwrap_or_else(|| unbounded().1);
        Ok(Box::new(FakeReader {
            records,
            shutdown,
            _claim: claim,
        }))
    }
}

struct FakeAttachment {
    live: Arc<AtomicUsize>,
    _claim: Claim,
}

impl Attachment for FakeAttachment {}

impl Drop for FakeAttachment {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeReader {
    records: Receiver<Result<RawRecord, String>>,
    shutdown: ShutdownSignal,
    _claim: Option<Claim>,
}

impl RecordReader for FakeReader {
    fn read(&mut self) -> Result<RawRecord, ReadError> {
        if self.shutdown.is_closed() {
            return Err(ReadError::Closed);
        }
        select! {
            recv(self.records) -> item => match item {
                Ok(Ok(record)) => Ok(record),
                Ok(Err(reason)) => Err(ReadError::Transient(reason)),
                // Feed gone: idle until the session closes.
                Err(_) => {
                    let _ = self.shutdown.receiver().recv();
                    Err(ReadError::Closed)
                }
            },
            recv(self.shutdown.receiver()) -> _ => Err(ReadError::Closed),
        }
    }
}

/// Clonable in-memory sink.
#[derive(Clone, Default)]
pub struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn lines(&self) -> Vec<String> {
        let buf = self.0.lock().unwrap();
        String::from_utf8(buf.clone())
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    pub fn json(&self) -> Vec<serde_json::Value> {
        self.lines()
            .iter()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Polls `cond` until it holds or `timeout` passes.
pub fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
