//! Non-blocking TLS framing adapter for reactor-driven byte channels.
//!
//! [`CryptoSocket`] bridges a connected non-blocking byte channel to an
//! event-loop consumer that reads and writes cleartext. The TLS protocol
//! itself lives behind the [`TlsEngine`] trait; this crate owns the
//! intermediate wrap/unwrap staging buffers and the hand-off protocol that
//! tells the reactor what to poll for next.
//!
//! Every externally visible operation is a single non-blocking step: at most
//! one channel read or write plus a bounded amount of engine work, then a
//! status the reactor acts on. Zero-byte reads and writes mean "would block,
//! retry on readiness". There is no internal locking and no internal retry;
//! one reactor drives one instance.
//!
//! # Driving the handshake
//!
//! ```
//! use crypto_socket::{Channel, CryptoSocket, HandshakeResult, TlsEngine};
//!
//! fn drive<C: Channel, G: TlsEngine>(
//!     socket: &mut CryptoSocket<C, G>,
//! ) -> Result<(), crypto_socket::Error<C::Error, G::Error>> {
//!     loop {
//!         match socket.handshake()? {
//!             HandshakeResult::Done => return Ok(()),
//!             HandshakeResult::NeedRead => { /* wait for channel readability */ }
//!             HandshakeResult::NeedWrite => { /* wait for channel writability */ }
//!             HandshakeResult::NeedWork => socket.do_handshake_work()?,
//!         }
//!     }
//! }
//! ```
//!
//! After [`HandshakeResult::Done`] the data path is open:
//! [`read`](CryptoSocket::read), [`write`](CryptoSocket::write) and
//! [`flush`](CryptoSocket::flush), all with the same would-block convention.
//!
//! # Feature Flags
//!
//! All features are disabled by default.
//!
//! * `defmt`: Enable logging with `defmt`.
//! * `log`: Enable logging with `log`.
//! * `std`: Implement [`Channel`] for `std::net::TcpStream`.
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg))]
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod buffer;
mod channel;
mod engine;
mod metrics;

pub use buffer::ByteBuffer;
pub use channel::{Channel, ReadStatus};
pub use engine::{
    AuthorizationVerdict, Certificate, DelegatedTask, EngineResult, EngineStatus, HandshakeStatus,
    SessionInfo, TlsEngine, TlsVersion,
};
pub use metrics::TlsMetrics;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

/// Smallest staging buffer allocated for the wrap and unwrap paths.
const MIN_BUFFER_CAPACITY: usize = 32 * 1024;

/// Source of the per-instance log tag.
static NEXT_SOCKET_ID: AtomicU32 = AtomicU32::new(0);

/// Errors surfaced to the reactor.
///
/// `CE` is the channel error type, `EE` the engine error type. Nothing is
/// retried internally; any error ends the session, and closing the channel
/// is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<CE, EE> {
    /// The peer closed the stream, or the engine reported a TLS-level close
    /// during wrap or unwrap.
    ClosedChannel,
    /// The engine failed the handshake. Carries the engine diagnostic.
    HandshakeFailed(EE),
    /// The engine failed after the handshake completed.
    Engine(EE),
    /// A handshake-phase unwrap produced cleartext application bytes.
    UnexpectedProtocolData,
    /// A data-path operation was invoked before the handshake completed.
    HandshakeIncomplete,
    /// The engine reported a state this adapter cannot reach. A bug.
    InvariantViolation(&'static str),
    /// Removing TLS 1.3 for server mode left no enabled protocol versions.
    NoEnabledProtocols,
    /// Channel I/O failure.
    Channel(CE),
}

/// Handshake automaton states, observable via [`CryptoSocket::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandshakeState {
    /// The engine has not been started.
    NotStarted,
    /// Waiting for ciphertext from the peer.
    NeedRead,
    /// Staged ciphertext is waiting for channel writability.
    NeedWrite,
    /// Delegated engine tasks are pending.
    NeedWork,
    /// The handshake finished; the data path is open.
    Completed,
}

/// What the reactor must wait for before calling
/// [`handshake`](CryptoSocket::handshake) again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandshakeResult {
    /// Wait for channel readability.
    NeedRead,
    /// Wait for channel writability.
    NeedWrite,
    /// Run [`do_handshake_work`](CryptoSocket::do_handshake_work), on any
    /// thread, then call again.
    NeedWork,
    /// The handshake completed.
    Done,
}

/// Outcome of [`CryptoSocket::flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlushResult {
    /// No ciphertext remains staged.
    Done,
    /// Staged ciphertext remains; retry on channel writability.
    NeedWrite,
}

/// Peer identity established by the handshake.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityContext {
    /// Peer certificate chain, leaf first. Empty when the session is valid
    /// but the peer presented no certificate.
    pub peer_certificates: Vec<Certificate>,
}

/// Non-blocking TLS adapter between a byte [`Channel`] and a reactor.
///
/// The instance owns the engine, the channel handle and both staging
/// buffers. It assumes exclusive access for the duration of every call; the
/// only method that may run on another thread is
/// [`do_handshake_work`](Self::do_handshake_work), and never concurrently
/// with anything else on the same instance.
///
/// Data flows `channel -> unwrap buffer -> engine -> caller` on the read
/// side and `caller -> engine -> wrap buffer -> channel` on the write side.
pub struct CryptoSocket<C: Channel, G: TlsEngine> {
    id: u32,
    channel: C,
    engine: G,
    metrics: &'static TlsMetrics,
    state: HandshakeState,
    wrap_buf: ByteBuffer,
    unwrap_buf: ByteBuffer,
    /// Sink for handshake-phase unwrap output; dropped at completion.
    scratch: Option<ByteBuffer>,
    application_buffer_size: usize,
    packet_buffer_size: usize,
    verdict: Option<AuthorizationVerdict>,
}

impl<C: Channel, G: TlsEngine> CryptoSocket<C, G> {
    /// Create an adapter over a connected channel, recording into the
    /// process-wide [`TlsMetrics::global`] sink.
    ///
    /// For a server-mode engine, TLS 1.3 is removed from the enabled
    /// protocol versions before the handshake can begin; the combination of
    /// mid-handshake authorization and TLS 1.3 handshake semantics is
    /// unsupported. Fails with [`Error::NoEnabledProtocols`] when nothing
    /// remains. Client mode is unrestricted.
    pub fn new(channel: C, engine: G) -> Result<Self, Error<C::Error, G::Error>> {
        Self::with_metrics(channel, engine, TlsMetrics::global())
    }

    /// Same as [`new`](Self::new) with an explicit metrics sink.
    pub fn with_metrics(
        channel: C,
        mut engine: G,
        metrics: &'static TlsMetrics,
    ) -> Result<Self, Error<C::Error, G::Error>> {
        let id = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);

        if !engine.is_client() {
            let enabled = engine.enabled_protocols();
            let restricted: Vec<TlsVersion> = enabled
                .iter()
                .copied()
                .filter(|protocol| *protocol != TlsVersion::V1_3)
                .collect();
            if restricted.is_empty() {
                error!("[{}] no enabled protocols remain without TLSv1.3", id);
                return Err(Error::NoEnabledProtocols);
            }
            if restricted.len() != enabled.len() {
                info!("[{}] disabling TLSv1.3 for server mode", id);
                engine.restrict_protocols(&restricted);
            }
        }

        let session = engine.session();
        let capacity = core::cmp::max(MIN_BUFFER_CAPACITY, session.packet_buffer_size);
        Ok(Self {
            id,
            channel,
            engine,
            metrics,
            state: HandshakeState::NotStarted,
            wrap_buf: ByteBuffer::with_capacity(capacity),
            unwrap_buf: ByteBuffer::with_capacity(capacity),
            scratch: Some(ByteBuffer::with_capacity(session.application_buffer_size)),
            application_buffer_size: session.application_buffer_size,
            packet_buffer_size: session.packet_buffer_size,
            verdict: None,
        })
    }

    /// Drive the handshake one non-blocking step.
    ///
    /// Each call performs at most one channel read or write plus a bounded
    /// amount of engine work, then reports what the reactor must wait for.
    /// Once [`HandshakeResult::Done`] has been returned, further calls
    /// return `Done` without side effects.
    pub fn handshake(&mut self) -> Result<HandshakeResult, Error<C::Error, G::Error>> {
        match self.state {
            HandshakeState::Completed => return Ok(HandshakeResult::Done),
            HandshakeState::NotStarted => {
                info!("[{}] begin handshake", self.id);
                if let Err(e) = self.engine.begin_handshake() {
                    return Err(self.handshake_failure(e));
                }
            }
            HandshakeState::NeedWrite => {
                self.channel_write()?;
            }
            HandshakeState::NeedRead => {
                self.channel_read()?;
            }
            HandshakeState::NeedWork => self.capture_verdict(),
        }

        let result = self.advance_handshake()?;
        self.set_state(match result {
            HandshakeResult::NeedRead => HandshakeState::NeedRead,
            HandshakeResult::NeedWrite => HandshakeState::NeedWrite,
            HandshakeResult::NeedWork => HandshakeState::NeedWork,
            HandshakeResult::Done => HandshakeState::Completed,
        });
        Ok(result)
    }

    /// Run every delegated task the engine has queued.
    ///
    /// The reactor calls this after [`HandshakeResult::NeedWork`], on
    /// whichever thread it chooses, then calls
    /// [`handshake`](Self::handshake) again. Must not run concurrently with
    /// any other call on the same instance.
    pub fn do_handshake_work(&mut self) -> Result<(), Error<C::Error, G::Error>> {
        while let Some(task) = self.engine.delegated_task() {
            debug!("[{}] running delegated task", self.id);
            if let Err(e) = task.run() {
                return Err(self.handshake_failure(e));
            }
        }
        Ok(())
    }

    /// Smallest cleartext buffer [`read`](Self::read) can decrypt a full
    /// record into. Reads into smaller buffers may never make progress.
    pub fn min_read_buffer(&self) -> usize {
        self.application_buffer_size
    }

    /// Read decrypted bytes into `dst`.
    ///
    /// Returns 0 when the channel would block or when a complete record has
    /// not arrived yet; the reactor retries on readability.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize, Error<C::Error, G::Error>> {
        self.verify_handshake_completed()?;
        let drained = self.drain(dst)?;
        if drained > 0 {
            return Ok(drained);
        }
        if self.channel_read()? == 0 {
            return Ok(0);
        }
        self.drain(dst)
    }

    /// Decrypt already-buffered ciphertext into `dst` without touching the
    /// channel.
    pub fn drain(&mut self, dst: &mut [u8]) -> Result<usize, Error<C::Error, G::Error>> {
        self.verify_handshake_completed()?;
        let mut produced = 0;
        loop {
            let result = self
                .engine
                .unwrap(self.unwrap_buf.readable(), &mut dst[produced..])
                .map_err(Error::Engine)?;
            self.unwrap_buf.advance_read(result.bytes_consumed);
            produced += result.bytes_produced;
            trace!(
                "[{}] unwrap: {:?} consumed={} produced={}",
                self.id,
                result.status,
                result.bytes_consumed,
                result.bytes_produced
            );
            match result.status {
                EngineStatus::Ok => {
                    if result.bytes_produced == 0 {
                        break;
                    }
                }
                EngineStatus::BufferUnderflow | EngineStatus::BufferOverflow => break,
                EngineStatus::Closed => return Err(Error::ClosedChannel),
            }
        }
        Ok(produced)
    }

    /// Encrypt bytes from `src` into the wrap buffer.
    ///
    /// Returns the number of cleartext bytes consumed. 0 means previously
    /// staged ciphertext is still waiting on channel writability; retry
    /// after [`flush`](Self::flush) reports [`FlushResult::Done`]. At most
    /// about one record's worth of ciphertext is staged per call, so the
    /// reactor gets a chance to drain before more is produced.
    pub fn write(&mut self, src: &[u8]) -> Result<usize, Error<C::Error, G::Error>> {
        self.verify_handshake_completed()?;
        if self.flush()? == FlushResult::NeedWrite {
            return Ok(0);
        }
        let mut consumed = 0;
        loop {
            let min = self.packet_buffer_size;
            let result = self
                .engine
                .wrap(&src[consumed..], self.wrap_buf.writable(min))
                .map_err(Error::Engine)?;
            consumed += result.bytes_consumed;
            self.wrap_buf.advance_write(result.bytes_produced);
            trace!(
                "[{}] wrap: {:?} consumed={} produced={}",
                self.id,
                result.status,
                result.bytes_consumed,
                result.bytes_produced
            );
            match result.status {
                EngineStatus::Ok => {
                    if result.bytes_consumed == 0
                        || self.wrap_buf.bytes() >= self.packet_buffer_size
                    {
                        break;
                    }
                }
                EngineStatus::BufferOverflow => break,
                EngineStatus::Closed => return Err(Error::ClosedChannel),
                EngineStatus::BufferUnderflow => {
                    return Err(Error::InvariantViolation("BUFFER_UNDERFLOW from wrap"))
                }
            }
        }
        Ok(consumed)
    }

    /// Push staged ciphertext to the channel with one non-blocking write.
    ///
    /// [`FlushResult::Done`] is a barrier: no output of an earlier
    /// [`write`](Self::write) is still pending.
    pub fn flush(&mut self) -> Result<FlushResult, Error<C::Error, G::Error>> {
        self.verify_handshake_completed()?;
        self.channel_write()?;
        Ok(if self.wrap_buf.bytes() == 0 {
            FlushResult::Done
        } else {
            FlushResult::NeedWrite
        })
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Borrow the underlying channel, e.g. to register it with a poller.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Mutably borrow the underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Append bytes a protocol detector already consumed from the stream.
    ///
    /// Drains `data`'s readable bytes into the unwrap buffer; the engine
    /// sees them ahead of anything read from the channel. Call before the
    /// first [`handshake`](Self::handshake).
    pub fn inject_read_data(&mut self, data: &mut ByteBuffer) {
        debug!("[{}] injecting {} pre-read bytes", self.id, data.bytes());
        self.unwrap_buf.inject(data);
    }

    /// Peer identity established by the handshake.
    ///
    /// `None` until the handshake completes. The certificate list is empty
    /// when the peer is unverified but the session is otherwise valid, e.g.
    /// declined optional client authentication.
    pub fn security_context(&self) -> Option<SecurityContext> {
        if self.state != HandshakeState::Completed {
            return None;
        }
        Some(SecurityContext {
            peer_certificates: self.engine.session().peer_certificates.unwrap_or_default(),
        })
    }

    /// One automaton pass: keep feeding the engine until it yields control
    /// back to the reactor.
    fn advance_handshake(&mut self) -> Result<HandshakeResult, Error<C::Error, G::Error>> {
        loop {
            match self.engine.handshake_status() {
                HandshakeStatus::NotHandshaking => {
                    if self.wrap_buf.bytes() > 0 {
                        // trailing handshake bytes must reach the peer first
                        return Ok(HandshakeResult::NeedWrite);
                    }
                    self.complete_handshake();
                    return Ok(HandshakeResult::Done);
                }
                HandshakeStatus::NeedTask => {
                    // the verdict must be on record before a task failure
                    // is classified
                    self.capture_verdict();
                    return Ok(HandshakeResult::NeedWork);
                }
                HandshakeStatus::NeedUnwrap => {
                    if self.wrap_buf.bytes() > 0 {
                        // the peer may be waiting on our staged bytes
                        return Ok(HandshakeResult::NeedWrite);
                    }
                    if !self.handshake_unwrap()? {
                        return Ok(HandshakeResult::NeedRead);
                    }
                }
                HandshakeStatus::NeedWrap => {
                    if !self.handshake_wrap()? {
                        return Ok(HandshakeResult::NeedWrite);
                    }
                }
                HandshakeStatus::Finished => {
                    return Err(Error::InvariantViolation(
                        "FINISHED outside a wrap or unwrap result",
                    ));
                }
            }
        }
    }

    /// Wrap a handshake record into the wrap buffer. `Ok(false)` means the
    /// reactor must drain the buffer before the engine can retry.
    fn handshake_wrap(&mut self) -> Result<bool, Error<C::Error, G::Error>> {
        let min = self.packet_buffer_size;
        let result = match self.engine.wrap(&[], self.wrap_buf.writable(min)) {
            Ok(result) => result,
            Err(e) => return Err(self.handshake_failure(e)),
        };
        self.wrap_buf.advance_write(result.bytes_produced);
        info!(
            "[{}] handshake wrap: {:?} produced={}",
            self.id, result.status, result.bytes_produced
        );
        match result.status {
            EngineStatus::Ok => Ok(true),
            EngineStatus::BufferOverflow => {
                // the engine revised its packet estimate mid-handshake
                self.refresh_session_sizes();
                Ok(false)
            }
            EngineStatus::Closed => Err(Error::ClosedChannel),
            EngineStatus::BufferUnderflow => {
                Err(Error::InvariantViolation("BUFFER_UNDERFLOW from wrap"))
            }
        }
    }

    /// Unwrap buffered peer bytes into the scratch buffer. `Ok(false)` means
    /// more ciphertext is needed from the channel.
    fn handshake_unwrap(&mut self) -> Result<bool, Error<C::Error, G::Error>> {
        loop {
            let min = self.application_buffer_size;
            let scratch = match self.scratch.as_mut() {
                Some(scratch) => scratch,
                None => return Err(Error::InvariantViolation("handshake scratch released")),
            };
            let result = match self
                .engine
                .unwrap(self.unwrap_buf.readable(), scratch.writable(min))
            {
                Ok(result) => result,
                Err(e) => return Err(self.handshake_failure(e)),
            };
            self.unwrap_buf.advance_read(result.bytes_consumed);
            info!(
                "[{}] handshake unwrap: {:?} consumed={} produced={}",
                self.id, result.status, result.bytes_consumed, result.bytes_produced
            );
            match result.status {
                EngineStatus::Ok => {
                    if result.bytes_produced > 0 {
                        error!("[{}] application data inside the handshake", self.id);
                        return Err(Error::UnexpectedProtocolData);
                    }
                    return Ok(true);
                }
                EngineStatus::BufferUnderflow => return Ok(false),
                EngineStatus::BufferOverflow => self.refresh_session_sizes(),
                EngineStatus::Closed => return Err(Error::ClosedChannel),
            }
        }
    }

    fn complete_handshake(&mut self) {
        self.engine.disable_session_creation();
        let session = self.engine.session();
        self.application_buffer_size = session.application_buffer_size;
        self.packet_buffer_size = session.packet_buffer_size;
        self.scratch = None;
        if self.engine.is_client() {
            self.metrics.inc_client_established();
        } else {
            self.metrics.inc_server_established();
        }
        info!(
            "[{}] handshake complete: {:?} {}",
            self.id, session.protocol, session.cipher_suite
        );
    }

    /// Capture the peer-authorization verdict, at most once. Attempted when
    /// the engine first requests task work and again on re-entry to the
    /// work state; the trust evaluation may produce the verdict either
    /// before or during task execution. A rejection is counted here; the
    /// engine itself fails the handshake afterwards, through a delegated
    /// task or a wrap.
    fn capture_verdict(&mut self) {
        if self.verdict.is_some() {
            return;
        }
        if let Some(verdict) = self.engine.authorization_verdict() {
            if !verdict.succeeded {
                warn!(
                    "[{}] peer authorization rejected: {}",
                    self.id, verdict.details
                );
                self.metrics.inc_peer_authorization_failures();
            }
            self.verdict = Some(verdict);
        }
    }

    /// Classify an engine failure raised while the handshake is in
    /// progress. Sessions the peer authorizer already rejected carry their
    /// own counter; everything else counts as a certificate verification
    /// failure.
    fn handshake_failure(&mut self, diagnostic: G::Error) -> Error<C::Error, G::Error> {
        let peer_rejected = self
            .verdict
            .as_ref()
            .map_or(false, |verdict| !verdict.succeeded);
        if !peer_rejected {
            self.metrics.inc_certificate_verification_failures();
        }
        error!("[{}] handshake failed: {:?}", self.id, diagnostic);
        Error::HandshakeFailed(diagnostic)
    }

    fn channel_write(&mut self) -> Result<usize, Error<C::Error, G::Error>> {
        let pending = self.wrap_buf.bytes();
        if pending == 0 {
            return Ok(0);
        }
        let written = self
            .channel
            .write(self.wrap_buf.readable())
            .map_err(Error::Channel)?;
        self.wrap_buf.advance_read(written);
        trace!("[{}] channel write: {} of {} bytes", self.id, written, pending);
        Ok(written)
    }

    fn channel_read(&mut self) -> Result<usize, Error<C::Error, G::Error>> {
        let min = self.packet_buffer_size;
        let status = self
            .channel
            .read(self.unwrap_buf.writable(min))
            .map_err(Error::Channel)?;
        match status {
            ReadStatus::Data(read) => {
                self.unwrap_buf.advance_write(read);
                trace!("[{}] channel read: {} bytes", self.id, read);
                Ok(read)
            }
            ReadStatus::WouldBlock => Ok(0),
            ReadStatus::Eof => {
                info!("[{}] peer closed the channel", self.id);
                Err(Error::ClosedChannel)
            }
        }
    }

    fn refresh_session_sizes(&mut self) {
        let session = self.engine.session();
        debug!(
            "[{}] session buffer sizes revised: app={} packet={}",
            self.id, session.application_buffer_size, session.packet_buffer_size
        );
        self.application_buffer_size = session.application_buffer_size;
        self.packet_buffer_size = session.packet_buffer_size;
    }

    fn verify_handshake_completed(&self) -> Result<(), Error<C::Error, G::Error>> {
        if self.state == HandshakeState::Completed {
            Ok(())
        } else {
            Err(Error::HandshakeIncomplete)
        }
    }

    fn set_state(&mut self, state: HandshakeState) {
        if state != self.state {
            info!("[{}] {:?} -> {:?}", self.id, self.state, state);
            self.state = state;
        }
    }
}
