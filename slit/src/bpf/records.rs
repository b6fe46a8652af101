use std::borrow::Cow;

use bytes::{Buf, BufMut};

use super::layout::{c_str, read_array, FixedLayout};

/// Length of the fixed filename/comm buffers written by `trace_execve`.
pub const EXEC_STR_LEN: usize = 32;

/// Record written by `trace_execve`:
///
/// ```c
/// struct execve_data_t {
///     u32  pid;
///     char filename[32];
///     char comm[32];
/// };
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecData {
    pub pid: u32,
    pub filename: [u8; EXEC_STR_LEN],
    pub comm: [u8; EXEC_STR_LEN],
}

impl ExecData {
    /// Filename trimmed at its first NUL. The fixed buffer is left untouched.
    pub fn filename(&self) -> Cow<'_, str> {
        c_str(&self.filename)
    }

    /// Command name trimmed at its first NUL.
    pub fn comm(&self) -> Cow<'_, str> {
        c_str(&self.comm)
    }
}

impl FixedLayout for ExecData {
    const KIND: &'static str = "execve";
    const SIZE: usize = 4 + EXEC_STR_LEN * 2;

    fn read_fields(buf: &mut &[u8]) -> Self {
        Self {
            pid: buf.get_u32_le(),
            filename: read_array(buf),
            comm: read_array(buf),
        }
    }

    fn write_fields<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.pid);
        buf.put_slice(&self.filename);
        buf.put_slice(&self.comm);
    }
}

/// Record written by `trace_signal_deliver`. Packed, so 28 bytes:
///
/// ```c
/// struct signal_data_t {
///     s32 signal;
///     s32 errno;
///     s32 code;
///     u64 handler;
///     u64 flags;
/// } __attribute__((packed));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalData {
    pub signal: i32,
    pub errno: i32,
    pub code: i32,
    pub handler: u64,
    pub flags: u64,
}

impl FixedLayout for SignalData {
    const KIND: &'static str = "signal_deliver";
    const SIZE: usize = 4 * 3 + 8 * 2;

    fn read_fields(buf: &mut &[u8]) -> Self {
        Self {
            signal: buf.get_i32_le(),
            errno: buf.get_i32_le(),
            code: buf.get_i32_le(),
            handler: buf.get_u64_le(),
            flags: buf.get_u64_le(),
        }
    }

    fn write_fields<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.signal);
        buf.put_i32_le(self.errno);
        buf.put_i32_le(self.code);
        buf.put_u64_le(self.handler);
        buf.put_u64_le(self.flags);
    }
}
