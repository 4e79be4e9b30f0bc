//! TCP connect checker.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use super::context::{CheckContext, race};
use super::{Checker, Env, strip_scheme};
use crate::error::{AddressError, CheckError, Stage};

/// Passes when a TCP handshake with `host:port` completes
#[derive(Debug, Clone)]
pub struct TcpChecker {
    name: String,
    address: String,
    timeout: Duration,
}

impl TcpChecker {
    pub fn new(name: &str, address: &str, timeout: Duration) -> Result<Self, CheckError> {
        let address = strip_scheme(address, "tcp").trim();
        if address.is_empty() {
            return Err(AddressError::Invalid(address.to_string()).into());
        }
        Ok(Self {
            name: name.to_string(),
            address: address.to_string(),
            timeout,
        })
    }

    /// Registry constructor; TCP checks read no environment overrides
    pub fn boxed(
        name: &str,
        address: &str,
        timeout: Duration,
        _env: &dyn Env,
    ) -> Result<Box<dyn Checker>, CheckError> {
        Ok(Box::new(Self::new(name, address, timeout)?))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        let connect = TcpStream::connect(self.address.as_str());
        if self.timeout.is_zero() {
            return connect.await;
        }
        tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "i/o timeout"))?
    }
}

#[async_trait]
impl Checker for TcpChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &CheckContext) -> Result<(), CheckError> {
        match race(ctx, self.connect()).await {
            Err(cause) => Err(CheckError::Cancelled {
                stage: Stage::Connecting,
                target: self.address.clone(),
                cause,
            }),
            Ok(Err(source)) => Err(CheckError::Connect {
                target: self.address.clone(),
                source,
            }),
            Ok(Ok(stream)) => {
                debug!(check = %self.name, peer = ?stream.peer_addr().ok(), "TCP connection established");
                Ok(())
            }
        }
    }
}

impl fmt::Display for TcpChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
