// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lockable byte conduits connecting callers and command handlers.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

/// What a channel is ultimately backed by.
enum Conduit {
    /// An in-memory pipe: writes append, reads drain from the front.
    Buffer(VecDeque<u8>),
    /// A caller-supplied source; the write side is locked from birth.
    Reader(Box<dyn Read + Send>),
    /// A caller-supplied sink; the read side is locked from birth.
    Writer(Box<dyn Write + Send>),
}

struct ChannelState {
    conduit: Conduit,
    read_locked: bool,
    write_locked: bool,
}

/// A cloneable handle to a lockable read/write byte conduit.
///
/// Each side can be independently and irreversibly locked: a write-locked
/// channel silently accepts (and discards) writes, a read-locked channel
/// silently reports end of input. Bytes buffered before a lock stay
/// readable. Locking exists so a cancelled handler's in-flight writes
/// cannot land in output the caller has already decided to treat as
/// cancelled, and so the handler cannot block on abandoned input.
#[derive(Clone)]
pub struct IoChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl IoChannel {
    fn build(conduit: Conduit, read_locked: bool, write_locked: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChannelState {
                conduit,
                read_locked,
                write_locked,
            })),
        }
    }

    /// A fresh in-memory pipe, readable and writable from both ends.
    #[must_use]
    pub fn pipe() -> Self {
        Self::build(Conduit::Buffer(VecDeque::new()), false, false)
    }

    /// Wrap a caller-supplied source. The write side is locked from birth.
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self::build(Conduit::Reader(Box::new(reader)), false, true)
    }

    /// Wrap a caller-supplied sink. The read side is locked from birth.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self::build(Conduit::Writer(Box::new(writer)), true, false)
    }

    /// Irreversibly lock the read side. Subsequent reads report zero bytes.
    pub fn lock_read(&self) {
        self.state.lock().expect("channel state poisoned").read_locked = true;
    }

    /// Irreversibly lock the write side. Subsequent writes report full
    /// success without storing anything.
    pub fn lock_write(&self) {
        self.state.lock().expect("channel state poisoned").write_locked = true;
    }

    /// Returns `true` once [`lock_read`](Self::lock_read) has been called.
    #[must_use]
    pub fn is_read_locked(&self) -> bool {
        self.state.lock().expect("channel state poisoned").read_locked
    }

    /// Returns `true` once [`lock_write`](Self::lock_write) has been called.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.state.lock().expect("channel state poisoned").write_locked
    }

    /// Drain and return all bytes currently buffered in an in-memory pipe.
    ///
    /// Returns an empty vector for wrapped reader/writer channels. Ignores
    /// the read lock: this is the caller's side of the conduit, used to
    /// collect captured output after the command settled.
    #[must_use]
    pub fn take_bytes(&self) -> Vec<u8> {
        let mut state = self.state.lock().expect("channel state poisoned");
        match &mut state.conduit {
            Conduit::Buffer(buf) => buf.drain(..).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns `true` when both handles point at the same channel state.
    #[must_use]
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Read for IoChannel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().expect("channel state poisoned");
        if state.read_locked {
            return Ok(0);
        }
        match &mut state.conduit {
            Conduit::Buffer(inner) => inner.read(buf),
            Conduit::Reader(inner) => inner.read(buf),
            Conduit::Writer(_) => Ok(0),
        }
    }
}

impl Write for IoChannel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().expect("channel state poisoned");
        if state.write_locked {
            return Ok(buf.len());
        }
        match &mut state.conduit {
            Conduit::Buffer(inner) => inner.write(buf),
            Conduit::Writer(inner) => inner.write(buf),
            Conduit::Reader(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut state = self.state.lock().expect("channel state poisoned");
        if state.write_locked {
            return Ok(());
        }
        match &mut state.conduit {
            Conduit::Writer(inner) => inner.flush(),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for IoChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("channel state poisoned");
        let kind = match &state.conduit {
            Conduit::Buffer(buf) => format!("buffer({} bytes)", buf.len()),
            Conduit::Reader(_) => "reader".to_string(),
            Conduit::Writer(_) => "writer".to_string(),
        };
        f.debug_struct("IoChannel")
            .field("conduit", &kind)
            .field("read_locked", &state.read_locked)
            .field("write_locked", &state.write_locked)
            .finish()
    }
}
