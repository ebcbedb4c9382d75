//! Capability-mediating network facade.
//!
//! Without the `network` capability every constructor here fails before
//! any socket work happens; with it there is no interception at all.

use jobbox_shared::{JobboxError, JobboxResult};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use super::Capabilities;

/// Network facade handed to handlers through the job context.
#[derive(Debug, Clone, Copy)]
pub struct SandboxNet {
    allow_network: bool,
}

impl SandboxNet {
    pub fn new(capabilities: Capabilities) -> Self {
        SandboxNet {
            allow_network: capabilities.network,
        }
    }

    fn check(&self) -> JobboxResult<()> {
        if self.allow_network {
            Ok(())
        } else {
            Err(JobboxError::network_capability())
        }
    }

    /// Outbound TCP connection.
    pub async fn tcp_connect(&self, addr: impl ToSocketAddrs) -> JobboxResult<TcpStream> {
        self.check()?;
        Ok(TcpStream::connect(addr).await?)
    }

    /// Server socket creation.
    pub async fn tcp_listen(&self, addr: impl ToSocketAddrs) -> JobboxResult<TcpListener> {
        self.check()?;
        Ok(TcpListener::bind(addr).await?)
    }

    /// HTTP client constructor (covers the URL-opener class of
    /// primitives as well).
    pub fn http_client(&self) -> JobboxResult<reqwest::Client> {
        self.check()?;
        reqwest::Client::builder()
            .build()
            .map_err(|err| JobboxError::Internal(err.to_string()))
    }
}
