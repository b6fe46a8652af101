//! Error kinds raised by the observation pipeline.

use std::{fmt::Display, io};

use thiserror::Error;

/// A hook could not be bound to its program.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("hook {hook} is already attached")]
    AlreadyAttached { hook: String },
    #[error("program {program} is not part of the probe set")]
    UnknownProgram { program: String },
    #[error("kernel has no hook {hook}")]
    UnknownHook { hook: String },
    #[error("permission denied attaching {hook}")]
    PermissionDenied { hook: String },
    #[error("failed to attach {hook}: {reason}")]
    Kernel { hook: String, reason: String },
}

/// A hook's ring buffer could not be opened.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("program {program} has no output map {map}")]
    MissingOutputMap { program: String, map: String },
    #[error("output map {map} already has a reader, cannot open it for {hook}")]
    MapInUse { map: String, hook: String },
    #[error("failed to open ring buffer for {hook}: {reason}")]
    Kernel { hook: String, reason: String },
}

/// A raw record could not be decoded into its kind's layout.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{kind} record is {actual} bytes, expected {expected}")]
    Length {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Outcome of a failed blocking read. Never leaves the reader thread.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The read failed but the buffer can still be read from.
    #[error("transient read failure: {0}")]
    Transient(String),
    /// The handle was closed; the reader must exit.
    #[error("reader closed")]
    Closed,
}

/// Why an individual source never started.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Attach(#[from] AttachError),
    #[error(transparent)]
    Open(#[from] OpenError),
}

/// A failed source, reported once by `Observer::start`.
#[derive(Debug)]
pub struct SourceFailure {
    /// Kind name of the observation point that declared the hook.
    pub point: &'static str,
    /// `group/name` of the hook, or `*` when the point itself could not be
    /// built.
    pub hook: String,
    pub error: SourceError,
}

impl Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.point, self.hook, self.error)
    }
}

/// Session level failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no usable sources ({} failed)", failures.len())]
    NoUsableSources { failures: Vec<SourceFailure> },
    #[error("session was already started or stopped")]
    AlreadyStarted,
    #[error("another consumer is already draining the session")]
    ConsumerBusy,
    #[error("failed to write event: {0}")]
    Output(#[from] io::Error),
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}
