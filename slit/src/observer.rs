//! Session lifecycle: attach hooks, run one reader per hook, fan every
//! point's events into one channel and drain it.
//!
//! Events from one hook arrive in the order its buffer delivered them.
//! There is no ordering across hooks, or across the per-CPU buffers behind
//! one hook: the consumer sees arrival order.

use std::{
    io::Write,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
};

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::{
    error::{OpenError, ReadError, SessionError, SourceError, SourceFailure},
    events::{Event, EventKind},
    points::{ObservationPoint, ObservationReference, Profile},
    probe::{shutdown, Attachment, ProbeSet, RecordReader, Shutdown},
};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserverConfig {
    /// Events buffered between the readers and the consumer. Readers block
    /// once it is full.
    pub channel_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// How `consume_as` writes each event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// One summary line per event.
    Summary,
}

/// A reader started by `Observer::start`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub kind: EventKind,
    /// Point-local hook key.
    pub key: &'static str,
    /// `group/name` of the hook.
    pub hook: String,
}

/// Outcome of a successful `Observer::start`.
#[derive(Debug)]
pub struct StartReport {
    pub sources: Vec<Source>,
    /// Hooks that could not be attached or opened. The session runs without
    /// them.
    pub failures: Vec<SourceFailure>,
}

struct Session {
    attachments: Vec<Box<dyn Attachment>>,
    readers: Vec<JoinHandle<()>>,
    shutdown: Shutdown,
}

struct State {
    profile: Option<Profile>,
    /// Held until `start` hands clones to the points, so the channel only
    /// disconnects once every point is gone.
    events_tx: Option<Sender<Event>>,
    session: Option<Session>,
}

/// Owns one observation session.
pub struct Observer {
    state: Mutex<State>,
    events_rx: Receiver<Event>,
    /// True while `consume` may write. Held across every write so `stop`
    /// can't return while an event is being emitted.
    gate: Mutex<bool>,
    consuming: AtomicBool,
}

impl Observer {
    pub fn new(profile: Profile) -> Self {
        Self::with_config(profile, ObserverConfig::default())
    }

    pub fn with_config(profile: Profile, config: ObserverConfig) -> Self {
        let (tx, rx) = bounded(config.channel_capacity);
        Self {
            state: Mutex::new(State {
                profile: Some(profile),
                events_tx: Some(tx),
                session: None,
            }),
            events_rx: rx,
            gate: Mutex::new(true),
            consuming: AtomicBool::new(false),
        }
    }

    /// Builds every point of the profile, attaches their hooks and starts one
    /// reader thread per opened buffer. Returns once the readers are
    /// running.
    ///
    /// Sources that fail to attach or open are reported in the returned
    /// [`StartReport`]; only when none start does the session fail.
    pub fn start(&mut self, probes: &mut dyn ProbeSet) -> Result<StartReport, SessionError> {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let (Some(profile), Some(events_tx)) = (state.profile.take(), state.events_tx.take())
        else {
            return Err(SessionError::AlreadyStarted);
        };

        let (shutdown, halt) = shutdown();
        let reference = ObservationReference::new(events_tx, probes.handle(), halt.clone());

        let mut sources = Vec::new();
        let mut failures = Vec::new();
        let mut attachments = Vec::new();
        let mut readers = Vec::new();

        log::debug!("Building {} observation point(s)", profile.len());
        for builder in profile.into_points() {
            let kind = builder.kind();
            let point = match builder.build(reference.clone()) {
                Ok(point) => point,
                Err(err) => {
                    failures.push(SourceFailure {
                        point: kind.name(),
                        hook: String::from("*"),
                        error: err.into(),
                    });
                    continue;
                }
            };

            for (key, hook) in point.hooks() {
                let fail = |error: SourceError| {
                    SourceFailure {
                        point: kind.name(),
                        hook: hook.to_string(),
                        error,
                    }
                };

                let attachment = match probes.attach(&hook) {
                    Ok(attachment) => attachment,
                    Err(err) => {
                        failures.push(fail(err.into()));
                        continue;
                    }
                };
                let reader = match probes.open_reader(&hook, halt.clone()) {
                    Ok(reader) => reader,
                    Err(err) => {
                        failures.push(fail(err.into()));
                        continue;
                    }
                };

                let label = format!("{kind}/{key}");
                let spawned = thread::Builder::new().name(format!("slit-{key}")).spawn({
                    let point = point.clone();
                    move || read_loop(label, point, reader)
                });
                match spawned {
                    Ok(handle) => {
                        attachments.push(attachment);
                        readers.push(handle);
                        sources.push(Source {
                            kind,
                            key,
                            hook: hook.to_string(),
                        });
                    }
                    Err(err) => {
                        let err = OpenError::Kernel {
                            hook: hook.to_string(),
                            reason: format!("failed to spawn reader: {err}"),
                        };
                        failures.push(fail(err.into()));
                    }
                }
            }
        }
        // Points now own the only senders.
        drop(reference);

        for failure in &failures {
            log::error!("Source unavailable: {failure}");
        }
        if readers.is_empty() {
            return Err(SessionError::NoUsableSources { failures });
        }
        log::info!("Observing {} source(s)", readers.len());

        state.session = Some(Session {
            attachments,
            readers,
            shutdown,
        });
        Ok(StartReport { sources, failures })
    }

    /// Writes one JSON object per event to `sink` until the session stops.
    pub fn consume<W: Write>(&self, sink: W) -> Result<u64, SessionError> {
        self.consume_as(sink, OutputFormat::Json)
    }

    /// Drains the output channel into `sink`, one line per event, flushing
    /// after every line. Returns the number of events written. Only one
    /// caller may consume at a time.
    pub fn consume_as<W: Write>(&self, mut sink: W, format: OutputFormat) -> Result<u64, SessionError> {
        if self.consuming.swap(true, Ordering::AcqRel) {
            return Err(SessionError::ConsumerBusy);
        }
        let _consumer = ConsumerGuard(&self.consuming);

        let mut written = 0;
        for event in self.events_rx.iter() {
            let open = lock(&self.gate);
            if !*open {
                break;
            }
            match format {
                OutputFormat::Json => serde_json::to_writer(&mut sink, &event)?,
                OutputFormat::Summary => sink.write_all(event.summary().as_bytes())?,
            }
            sink.write_all(b"\n")?;
            sink.flush()?;
            written += 1;
        }
        Ok(written)
    }

    /// True between a successful `start` and `stop`.
    pub fn is_running(&self) -> bool {
        lock(&self.state).session.is_some()
    }

    /// Detaches every hook, closes every reader and waits for the reader
    /// threads to exit, then closes the output channel. No event is written
    /// by `consume` once this returns. Safe to call more than once.
    pub fn stop(&self) {
        let (session, events_tx) = {
            let mut state = lock(&self.state);
            (state.session.take(), state.events_tx.take())
        };
        drop(events_tx);

        if let Some(Session {
            attachments,
            readers,
            shutdown,
        }) = session
        {
            drop(attachments);
            shutdown.close();
            for reader in readers {
                if reader.join().is_err() {
                    log::error!("Reader thread panicked");
                }
            }
            log::debug!("All readers stopped");
        }

        *lock(&self.gate) = false;
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ConsumerGuard<'a>(&'a AtomicBool);

impl Drop for ConsumerGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_loop(label: String, point: Arc<dyn ObservationPoint>, mut reader: Box<dyn RecordReader>) {
    log::debug!("Reader {label} started");
    loop {
        match reader.read() {
            Ok(record) => {
                if let Err(err) = point.handle_record(&record) {
                    log::warn!("Dropping record from {label}: {err}");
                }
            }
            Err(ReadError::Transient(reason)) => {
                log::warn!("Read from {label} failed: {reason}");
            }
            Err(ReadError::Closed) => break,
        }
    }
    log::debug!("Reader {label} exiting");
}
