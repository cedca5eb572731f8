//! TCP reachability probing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// How candidate addresses are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePolicy {
    /// One dial per address.
    SingleDial { timeout: Duration },
    /// Up to `attempts` dials per address with a fixed sleep between them.
    ///
    /// Some workflows (OS installs in particular) report completion before
    /// the OS accepts connections.
    Retry {
        attempts: u32,
        dial_timeout: Duration,
        backoff: Duration,
    },
}

impl ProbePolicy {
    fn attempts(self) -> u32 {
        match self {
            Self::SingleDial { .. } => 1,
            Self::Retry { attempts, .. } => attempts.max(1),
        }
    }

    pub(crate) fn dial_timeout(self) -> Duration {
        match self {
            Self::SingleDial { timeout } => timeout,
            Self::Retry { dial_timeout, .. } => dial_timeout,
        }
    }

    fn backoff(self) -> Option<Duration> {
        match self {
            Self::SingleDial { .. } => None,
            Self::Retry { backoff, .. } => Some(backoff),
        }
    }
}

/// Checks whether `host:port` accepts TCP connections.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Dial once, giving up after `timeout`.
    async fn dial(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// [`PortProbe`] backed by real TCP connects.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl PortProbe for TcpProbe {
    async fn dial(&self, host: &str, port: u16, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(host, port, error = %e, "Connection failed");
                false
            }
            Err(_) => {
                debug!(host, port, timeout_secs = timeout.as_secs(), "Connection timed out");
                false
            }
        }
    }
}

/// First candidate that accepts a connection under `policy`.
///
/// Candidates are tried in order and later ones are not dialled once one
/// succeeds.
pub async fn first_reachable(
    probe: &dyn PortProbe,
    candidates: &[String],
    port: u16,
    policy: ProbePolicy,
) -> Option<String> {
    for host in candidates {
        debug!(host = %host, port, "Testing connection");
        let attempts = policy.attempts();
        for attempt in 1..=attempts {
            if probe.dial(host, port, policy.dial_timeout()).await {
                return Some(host.clone());
            }
            debug!(host = %host, port, attempt, attempts, "Address not reachable yet");
            if attempt < attempts {
                if let Some(backoff) = policy.backoff() {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    None
}
