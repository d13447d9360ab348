//! The connect probe and its outcome classification.
//!
//! A probe is one non-blocking TCP connect attempt against one (address,
//! port) under a deadline, preceded by a small deterministic jitter delay so
//! a large scan does not emit synchronized bursts against a single host.
//!
//! Classification is deliberately conservative: a transient local-resource
//! failure must never read as `Closed` or `Filtered` (both terminal); it
//! classifies as `Timeout` so the retry pass gets another look once pressure
//! has subsided.

use crate::types::Port;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Outcome of a single connect probe.
///
/// `Filtered` and `Timeout` both mean "no handshake, no refusal"; the
/// distinction is that `Timeout` feeds the retry pass while `Filtered` is
/// final for the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    /// Handshake completed; a service is listening.
    Open,
    /// Connection actively refused.
    Closed,
    /// Connect failed for a reason that will not improve on retry.
    Filtered,
    /// No answer within the deadline, or a transient local failure.
    Timeout,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Filtered => write!(f, "filtered"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Connect errors worth retrying as `Timeout`: local resource exhaustion
/// rather than an answer from the network.
///
/// POSIX: EADDRNOTAVAIL, EADDRINUSE, ENOBUFS, EMFILE, ENFILE, ETIMEDOUT.
#[cfg(unix)]
pub const DEFAULT_RETRYABLE_CODES: &[i32] = &[
    libc::EADDRNOTAVAIL,
    libc::EADDRINUSE,
    libc::ENOBUFS,
    libc::EMFILE,
    libc::ENFILE,
    libc::ETIMEDOUT,
];

/// Winsock equivalents: WSAEADDRINUSE, WSAEADDRNOTAVAIL, WSAENOBUFS,
/// WSAETIMEDOUT, WSAEMFILE.
#[cfg(windows)]
pub const DEFAULT_RETRYABLE_CODES: &[i32] = &[10048, 10049, 10055, 10060, 10024];

/// Trait for connect-probe implementations.
///
/// The scan engine only ever talks to this seam, so tests can swap the real
/// socket probe for a scripted one.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Probe one (address, port) under a deadline.
    async fn probe(&self, addr: IpAddr, port: Port, deadline: Duration) -> ProbeOutcome;
}

/// The production TCP connect probe.
pub struct TcpProbe {
    retryable: Vec<i32>,
}

impl TcpProbe {
    /// Create a probe with the default retryable-error policy.
    pub fn new() -> Self {
        Self {
            retryable: DEFAULT_RETRYABLE_CODES.to_vec(),
        }
    }

    /// Override which raw OS error codes classify as `Timeout`.
    ///
    /// The boundary between "retry later" and "filtered" for unusual OS
    /// errors is policy, not fixed semantics.
    pub fn with_retryable_codes(mut self, codes: Vec<i32>) -> Self {
        self.retryable = codes;
        self
    }

    /// Classify a connect error.
    fn classify(&self, err: &io::Error) -> ProbeOutcome {
        if err.kind() == io::ErrorKind::ConnectionRefused {
            return ProbeOutcome::Closed;
        }
        match err.raw_os_error() {
            Some(code) if self.retryable.contains(&code) => ProbeOutcome::Timeout,
            _ => ProbeOutcome::Filtered,
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, addr: IpAddr, port: Port, deadline: Duration) -> ProbeOutcome {
        tokio::time::sleep(jitter_delay(addr, port)).await;

        let target = SocketAddr::new(addr, port.as_u16());
        match timeout(deadline, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                discard(stream);
                ProbeOutcome::Open
            }
            Ok(Err(err)) => self.classify(&err),
            Err(_) => ProbeOutcome::Timeout,
        }
    }
}

/// Deterministic pre-connect jitter in [0, 2.0] milliseconds.
///
/// Folds the address's canonical string through `h = h*31 + byte`, mixes in
/// the port with a Knuth multiplicative constant, and maps the result onto
/// microseconds. The same (address, port) pair always gets the same delay,
/// so reruns are as reproducible as the network allows.
pub fn jitter_delay(addr: IpAddr, port: Port) -> Duration {
    let mut h: u32 = 0;
    for b in addr.to_string().bytes() {
        h = h.wrapping_mul(31).wrapping_add(u32::from(b));
    }
    h ^= u32::from(port.as_u16()).wrapping_mul(2_654_435_761);
    Duration::from_micros(u64::from(h % 2001))
}

/// Drop an open connection without leaving it lingering in TIME_WAIT.
///
/// Errors are swallowed; the socket closes on drop either way.
fn discard(stream: TcpStream) {
    if let Ok(std_stream) = stream.into_std() {
        let socket = socket2::Socket::from(std_stream);
        let _ = socket.set_linger(Some(Duration::ZERO));
    }
}
