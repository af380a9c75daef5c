//! Byte-stream transports for the serial provisioning protocol.
//!
//! The engine only needs "read with a timeout" and "write everything", so
//! the transport is chosen at startup: the console (stdin/stdout, which is
//! the USB/UART console on the device) or an in-memory pipe for tests.

use log::{debug, warn};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Back-off used by the console reader when no byte is available.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Bidirectional byte stream.
pub trait SerialTransport: Send {
    /// Read available bytes, waiting at most `timeout` for the first one.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Write and flush `bytes`.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Console transport over stdin/stdout.
///
/// Stdin is drained by a background thread so reads can honour a timeout.
pub struct StdioSerial {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    closed: bool,
}

impl StdioSerial {
    /// Spawn the stdin reader thread.
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("serial-rx".into())
            .spawn(move || {
                let stdin = io::stdin();
                let mut stdin = stdin.lock();
                let mut buf = [0u8; 256];
                loop {
                    match stdin.read(&mut buf) {
                        // The device console reports "no data" as EOF
                        Ok(0) if cfg!(feature = "esp32") => thread::sleep(IDLE_BACKOFF),
                        Ok(0) => {
                            debug!("Console input closed");
                            break;
                        }
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e)
                            if matches!(
                                e.kind(),
                                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                            ) =>
                        {
                            thread::sleep(IDLE_BACKOFF)
                        }
                        Err(e) => {
                            warn!("Console read failed: {}", e);
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            rx,
            pending: VecDeque::new(),
            closed: false,
        })
    }
}

impl SerialTransport for StdioSerial {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.pending.is_empty() {
            if self.closed {
                // Keep the caller's pacing once input is gone
                thread::sleep(timeout);
                return Ok(0);
            }
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    self.closed = true;
                    return Ok(0);
                }
            }
        }
        while let Ok(chunk) = self.rx.try_recv() {
            self.pending.extend(chunk);
        }
        Ok(drain_into(&mut self.pending, buf))
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        stdout.write_all(bytes)?;
        stdout.flush()
    }
}

fn drain_into(pending: &mut VecDeque<u8>, buf: &mut [u8]) -> usize {
    let n = pending.len().min(buf.len());
    for (slot, byte) in buf.iter_mut().zip(pending.drain(..n)) {
        *slot = byte;
    }
    n
}

#[derive(Debug, Default)]
struct Pipes {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

/// In-memory transport. Clones share the same buffers, so a test keeps one
/// handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySerial {
    pipes: Arc<Mutex<Pipes>>,
}

impl MemorySerial {
    /// Create an empty pipe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the reader.
    pub fn push_input(&self, bytes: &[u8]) {
        self.lock().input.extend(bytes.iter().copied());
    }

    /// Take everything written so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().output)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pipes> {
        self.pipes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SerialTransport for MemorySerial {
    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        Ok(drain_into(&mut self.lock().input, buf))
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.lock().output.extend_from_slice(bytes);
        Ok(())
    }
}
