//! Decoded events emitted on the output stream.

use std::fmt::Display;

use serde::{Serialize, Serializer};
use strum::{EnumIter, IntoStaticStr};

use crate::bpf::{ExecData, SignalData};

/// Stable kind names. These double as the `Name` field of every event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, IntoStaticStr, EnumIter)]
pub enum EventKind {
    ProcessExecuted,
    SignalDelivered,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// An event that survived its point's drop chain.
///
/// Serializes as a flat JSON object. Field names are part of the output
/// contract: fields may be added, never renamed or removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Event {
    ProcessExecuted(ExecEvent),
    SignalDelivered(SignalEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ProcessExecuted(_) => EventKind::ProcessExecuted,
            Event::SignalDelivered(_) => EventKind::SignalDelivered,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// CPU whose buffer delivered the record.
    pub fn cpu(&self) -> u32 {
        match self {
            Event::ProcessExecuted(e) => e.cpu,
            Event::SignalDelivered(e) => e.cpu,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Short human readable line. May be empty.
    pub fn summary(&self) -> String {
        match self {
            Event::ProcessExecuted(e) => e.summary(),
            Event::SignalDelivered(e) => e.summary(),
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// A process called `execve()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecEvent {
    #[serde(rename = "CPU")]
    pub cpu: u32,
    #[serde(rename = "Name")]
    pub kind: EventKind,
    #[serde(rename = "Pid")]
    pub pid: u32,
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "Comm")]
    pub comm: String,
    #[serde(skip)]
    pub data: ExecData,
}

impl ExecEvent {
    pub fn new(cpu: u32, data: ExecData) -> Self {
        Self {
            cpu,
            kind: EventKind::ProcessExecuted,
            pid: data.pid,
            filename: data.filename().into_owned(),
            comm: data.comm().into_owned(),
            data,
        }
    }

    pub fn summary(&self) -> String {
        format!("{} ({}) exec {}", self.comm, self.pid, self.filename)
    }
}

/// A signal was delivered to a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SignalEvent {
    #[serde(rename = "CPU")]
    pub cpu: u32,
    #[serde(rename = "Name")]
    pub kind: EventKind,
    #[serde(rename = "Signal")]
    pub signal: i32,
    #[serde(rename = "Errno")]
    pub errno: i32,
    #[serde(rename = "Code")]
    pub code: i32,
    #[serde(rename = "Handler")]
    pub handler: u64,
    #[serde(rename = "Flags")]
    pub flags: u64,
}

impl SignalEvent {
    pub fn new(cpu: u32, data: SignalData) -> Self {
        Self {
            cpu,
            kind: EventKind::SignalDelivered,
            signal: data.signal,
            errno: data.errno,
            code: data.code,
            handler: data.handler,
            flags: data.flags,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "signal {} delivered (code {}, handler {:#x}, flags {:#x})",
            self.signal, self.code, self.handler, self.flags
        )
    }
}
