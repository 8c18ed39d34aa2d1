use core::sync::atomic::{AtomicU64, Ordering};

/// Process-wide TLS connection counters.
///
/// Increments use relaxed ordering; counters are monotonic and safe to bump
/// from any thread. [`CryptoSocket::new`](crate::CryptoSocket::new) records
/// into [`TlsMetrics::global`]; tests hand
/// [`with_metrics`](crate::CryptoSocket::with_metrics) a private instance.
#[derive(Debug, Default)]
pub struct TlsMetrics {
    client_established: AtomicU64,
    server_established: AtomicU64,
    certificate_verification_failures: AtomicU64,
    peer_authorization_failures: AtomicU64,
}

static GLOBAL: TlsMetrics = TlsMetrics::new();

impl TlsMetrics {
    /// A zeroed counter set.
    pub const fn new() -> Self {
        Self {
            client_established: AtomicU64::new(0),
            server_established: AtomicU64::new(0),
            certificate_verification_failures: AtomicU64::new(0),
            peer_authorization_failures: AtomicU64::new(0),
        }
    }

    /// The process-wide counter set.
    pub fn global() -> &'static TlsMetrics {
        &GLOBAL
    }

    /// Client-mode handshakes completed.
    pub fn client_tls_connections_established(&self) -> u64 {
        self.client_established.load(Ordering::Relaxed)
    }

    /// Server-mode handshakes completed.
    pub fn server_tls_connections_established(&self) -> u64 {
        self.server_established.load(Ordering::Relaxed)
    }

    /// Handshake failures other than peer-authorization rejections.
    pub fn tls_certificate_verification_failures(&self) -> u64 {
        self.certificate_verification_failures.load(Ordering::Relaxed)
    }

    /// Handshakes rejected by the peer-authorization policy.
    pub fn peer_authorization_failures(&self) -> u64 {
        self.peer_authorization_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_client_established(&self) {
        self.client_established.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_server_established(&self) {
        self.server_established.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_certificate_verification_failures(&self) {
        self.certificate_verification_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_peer_authorization_failures(&self) {
        self.peer_authorization_failures.fetch_add(1, Ordering::Relaxed);
    }
}
