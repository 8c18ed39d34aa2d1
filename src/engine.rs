use alloc::{string::String, vec::Vec};

/// TLS protocol versions an engine may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TlsVersion {
    /// TLS v1.2
    V1_2,
    /// TLS v1.3
    V1_3,
}

/// Handshake progress reported by [`TlsEngine::handshake_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandshakeStatus {
    /// No handshake in progress; either none was started or it finished.
    NotHandshaking,
    /// Delegated tasks must run before the handshake can continue.
    NeedTask,
    /// The engine has handshake bytes to emit via `wrap`.
    NeedWrap,
    /// The engine needs peer bytes via `unwrap`.
    NeedUnwrap,
    /// The call that just returned moved the handshake to completion.
    ///
    /// Only meaningful inside an [`EngineResult`]; never returned by
    /// [`TlsEngine::handshake_status`].
    Finished,
}

/// Completion status of a single `wrap` or `unwrap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineStatus {
    /// The call completed normally.
    Ok,
    /// The destination cannot hold one whole record.
    BufferOverflow,
    /// The source does not contain one whole record. Not produced by `wrap`.
    BufferUnderflow,
    /// The engine received or sent a TLS-level close.
    Closed,
}

/// Outcome of a single [`TlsEngine::wrap`] or [`TlsEngine::unwrap`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineResult {
    /// How the call completed.
    pub status: EngineStatus,
    /// Bytes consumed from the source slice.
    pub bytes_consumed: usize,
    /// Bytes produced into the destination slice.
    pub bytes_produced: usize,
    /// Handshake progress after the call.
    pub handshake_status: HandshakeStatus,
}

/// An X.509 certificate in DER encoding, opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    /// Wrap DER-encoded certificate bytes.
    pub fn new(der: Vec<u8>) -> Self {
        Self { der }
    }

    /// The DER bytes.
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

impl From<Vec<u8>> for Certificate {
    fn from(der: Vec<u8>) -> Self {
        Self::new(der)
    }
}

/// Session metadata reported by [`TlsEngine::session`].
///
/// The buffer sizes are estimates the engine may revise while the handshake
/// is in progress; the adapter re-queries them whenever a handshake-phase
/// call reports [`EngineStatus::BufferOverflow`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionInfo {
    /// Largest cleartext one record may decrypt to; the minimum read buffer.
    pub application_buffer_size: usize,
    /// Largest ciphertext the engine may emit for one record.
    pub packet_buffer_size: usize,
    /// Negotiated (or provisionally selected) protocol version.
    pub protocol: TlsVersion,
    /// Negotiated cipher suite name.
    pub cipher_suite: String,
    /// Peer certificate chain, leaf first. `None` when the peer is
    /// unverified, e.g. a non-certificate cipher or declined optional
    /// client authentication.
    pub peer_certificates: Option<Vec<Certificate>>,
}

/// Outcome of the peer-authorization policy, produced by the engine's trust
/// evaluation during the handshake.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AuthorizationVerdict {
    /// Whether the peer was authorized.
    pub succeeded: bool,
    /// Policy diagnostic for failure reporting.
    pub details: String,
}

/// CPU-bound work the engine wants run off the reactor thread, e.g.
/// certificate chain validation. Consumed on execution.
pub trait DelegatedTask {
    /// Error reported when the task fails; ends the handshake.
    type Error;

    /// Execute the task to completion.
    fn run(self) -> Result<(), Self::Error>;
}

/// A non-blocking TLS protocol engine.
///
/// `wrap` converts cleartext to ciphertext, `unwrap` the reverse. Both are
/// single bounded steps: they consume at most what the source holds, produce
/// at most what the destination holds, and report shortfalls through
/// [`EngineStatus`] rather than blocking. Engine-level protocol failures are
/// `Err`; an orderly TLS close is `Ok` with [`EngineStatus::Closed`].
pub trait TlsEngine {
    /// Engine diagnostic carried by handshake and data-path failures.
    type Error: core::fmt::Debug;
    /// Delegated task type handed out by [`delegated_task`](Self::delegated_task).
    type Task: DelegatedTask<Error = Self::Error>;

    /// Start the handshake. Called once, before any wrap or unwrap.
    fn begin_handshake(&mut self) -> Result<(), Self::Error>;

    /// Encrypt bytes from `src` into `dst`.
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Self::Error>;

    /// Decrypt bytes from `src` into `dst`.
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Self::Error>;

    /// What the handshake needs next.
    fn handshake_status(&self) -> HandshakeStatus;

    /// Next pending delegated task, if any.
    fn delegated_task(&mut self) -> Option<Self::Task>;

    /// Current session metadata.
    fn session(&self) -> SessionInfo;

    /// Forbid session creation and reuse from here on, rejecting
    /// renegotiation.
    fn disable_session_creation(&mut self);

    /// Whether the engine runs the client side of the handshake.
    fn is_client(&self) -> bool;

    /// Protocol versions the engine will currently negotiate.
    fn enabled_protocols(&self) -> Vec<TlsVersion>;

    /// Restrict negotiation to `protocols`.
    fn restrict_protocols(&mut self, protocols: &[TlsVersion]);

    /// The peer-authorization outcome, once the trust evaluation has run.
    ///
    /// Only defined while the handshake is in progress.
    fn authorization_verdict(&self) -> Option<AuthorizationVerdict>;
}
