//! Stream transport over a connected Unix socket.
//!
//! Writers and readers hold separate handles to the socket. Whichever
//! thread is waiting reads the socket in short slices and routes every
//! complete frame: replies go to the call awaiting their serial, and
//! everything else is queued for [`Transport::receive`] in arrival order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use rbus_proto::{Frame, MAX_FRAME, MessageType, read_frame, write_frame};

use crate::bus::Transport;
use crate::creds::Creds;
use crate::error::{Error, Result};

/// Longest single blocking read; bounds how long the read side stays
/// with one waiter.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Version byte plus big-endian length.
const PREFIX_LEN: usize = 5;

/// Frames read off the socket but not yet taken.
#[derive(Debug, Default)]
struct Inbox {
    /// Non-reply frames in arrival order.
    queued: VecDeque<Frame>,
    /// Replies keyed by the serial they answer.
    replies: HashMap<u32, Frame>,
    /// Serials of calls still waiting.
    awaiting: HashSet<u32>,
}

/// Read half of the socket with bytes of a partially received frame.
#[derive(Debug)]
struct Reader {
    /// Read handle.
    stream: UnixStream,
    /// Received bytes not yet forming a whole frame.
    buf: Vec<u8>,
}

impl Reader {
    /// Pops the next complete frame off the buffer.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(prefix) = self.buf.get(..PREFIX_LEN) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);
        if len > MAX_FRAME {
            return Err(Error::Protocol("frame exceeds 16 MiB limit".into()));
        }
        let total = PREFIX_LEN + len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let bytes: Vec<u8> = self.buf.drain(..total).collect();
        read_frame(&mut bytes.as_slice()).map(Some).map_err(read_error)
    }
}

/// A [`Transport`] speaking length-prefixed frames on a Unix stream.
#[derive(Debug)]
pub struct StreamTransport {
    /// Write handle; held only while one frame is written.
    writer: Mutex<UnixStream>,
    /// Read handle; held by the thread currently reading.
    reader: Mutex<Reader>,
    /// Routed frames.
    inbox: Mutex<Inbox>,
    /// Signaled whenever frames are routed.
    arrived: Condvar,
}

impl StreamTransport {
    /// Connects to the bus socket at `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path)?;
        tracing::debug!(path = %path.display(), "connected");
        Self::from_stream(stream)
    }

    /// Wraps an already connected socket.
    pub fn from_stream(stream: UnixStream) -> Result<Self> {
        let reader = stream.try_clone()?;
        Ok(Self {
            writer: Mutex::new(stream),
            reader: Mutex::new(Reader {
                stream: reader,
                buf: Vec::new(),
            }),
            inbox: Mutex::new(Inbox::default()),
            arrived: Condvar::new(),
        })
    }

    /// Locks the write handle.
    fn writer(&self) -> MutexGuard<'_, UnixStream> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the routed frames.
    fn inbox(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until `take` yields a frame, reading the socket whenever no
    /// other thread is.
    fn wait_for(
        &self,
        deadline: Option<Instant>,
        mut take: impl FnMut(&mut Inbox) -> Option<Frame>,
    ) -> Result<Frame> {
        loop {
            if let Some(frame) = take(&mut self.inbox()) {
                return Ok(frame);
            }
            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(Error::Timeout);
                    }
                    remaining.min(READ_SLICE)
                }
                None => READ_SLICE,
            };
            match self.reader.try_lock() {
                Ok(mut reader) => self.pump(&mut reader, slice)?,
                Err(TryLockError::Poisoned(poisoned)) => {
                    self.pump(&mut poisoned.into_inner(), slice)?;
                }
                Err(TryLockError::WouldBlock) => {
                    let mut inbox = self.inbox();
                    if let Some(frame) = take(&mut inbox) {
                        return Ok(frame);
                    }
                    drop(
                        self.arrived
                            .wait_timeout(inbox, slice)
                            .unwrap_or_else(PoisonError::into_inner),
                    );
                }
            }
        }
    }

    /// Reads for at most `slice` and routes every frame completed.
    fn pump(&self, reader: &mut Reader, slice: Duration) -> Result<()> {
        reader.stream.set_read_timeout(Some(slice))?;
        let mut chunk = [0u8; 8192];
        match reader.stream.read(&mut chunk) {
            Ok(0) => return Err(Error::NotConnected),
            Ok(n) => reader.buf.extend_from_slice(&chunk[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        while let Some(frame) = reader.next_frame()? {
            self.route(frame);
        }
        Ok(())
    }

    /// Hands `frame` to its waiting call or queues it.
    fn route(&self, frame: Frame) {
        let mut inbox = self.inbox();
        match frame.header.reply_serial {
            Some(serial) if inbox.awaiting.remove(&serial) => {
                inbox.replies.insert(serial, frame);
            }
            Some(serial)
                if matches!(
                    frame.header.kind,
                    MessageType::MethodReturn | MessageType::MethodError
                ) =>
            {
                tracing::warn!(reply_serial = serial, "discarding reply nobody awaits");
            }
            _ => inbox.queued.push_back(frame),
        }
        drop(inbox);
        self.arrived.notify_all();
    }
}

/// Maps a frame decoding failure onto [`Error`].
fn read_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
        io::ErrorKind::UnexpectedEof => Error::NotConnected,
        io::ErrorKind::InvalidData => Error::Protocol(e.to_string()),
        _ => Error::Io(e),
    }
}

impl Transport for StreamTransport {
    fn send(&self, frame: &Frame) -> Result<()> {
        write_frame(&mut *self.writer(), frame)?;
        Ok(())
    }

    fn call(&self, frame: &Frame, timeout: Duration) -> Result<Frame> {
        let serial = frame.header.serial;
        self.inbox().awaiting.insert(serial);
        let deadline = Instant::now() + timeout;
        let result = self
            .send(frame)
            .and_then(|()| self.wait_for(Some(deadline), |inbox| inbox.replies.remove(&serial)));
        if result.is_err() {
            let mut inbox = self.inbox();
            inbox.awaiting.remove(&serial);
            inbox.replies.remove(&serial);
        }
        result
    }

    fn receive(&self) -> Result<Frame> {
        self.wait_for(None, |inbox| inbox.queued.pop_front())
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn peer_credentials(&self) -> Result<Creds> {
        use nix::sys::socket::{getsockopt, sockopt};

        let cred =
            getsockopt(&*self.writer(), sockopt::PeerCredentials).map_err(io::Error::from)?;
        let mut creds = Creds::new().with_uid(cred.uid()).with_gid(cred.gid());
        if let Ok(pid) = u32::try_from(cred.pid()) {
            if pid != 0 {
                creds = creds.with_pid(pid);
            }
        }
        Ok(creds)
    }
}
