//! Client side of the remote filesystem handshake (`--remote-fs`).
//!
//! Wire format, all integers little endian:
//!
//! 1. client: `u32` password length, then the password bytes
//! 2. server: `i32` status, zero when accepted

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::config::DEFAULT_REMOTE_FS_PORT;
use crate::error::BootError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// An accepted remote filesystem connection.
#[derive(Debug)]
pub struct RemoteFsClient {
    endpoint: String,
    stream: TcpStream,
}

impl RemoteFsClient {
    /// Connect to `host[:port]` and authenticate with `password`.
    pub fn connect(address: &str, password: &str) -> Result<Self, BootError> {
        let endpoint = endpoint(address);
        let fail = |reason: String| BootError::RemoteConnect {
            what: "remote filesystem",
            endpoint: endpoint.clone(),
            reason,
        };

        let mut stream = TcpStream::connect(&endpoint).map_err(|e| fail(e.to_string()))?;
        stream
            .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
            .map_err(|e| fail(e.to_string()))?;

        let len = u32::try_from(password.len()).map_err(|_| fail("password too long".to_string()))?;
        let mut hello = Vec::with_capacity(4 + password.len());
        hello.extend_from_slice(&len.to_le_bytes());
        hello.extend_from_slice(password.as_bytes());
        stream.write_all(&hello).map_err(|e| fail(e.to_string()))?;

        let mut status = [0u8; 4];
        stream.read_exact(&mut status).map_err(|e| fail(e.to_string()))?;
        let status = i32::from_le_bytes(status);
        if status != 0 {
            return Err(fail(format!("handshake rejected with status {status}")));
        }

        tracing::info!(endpoint = %endpoint, "remote filesystem connected");
        Ok(Self { endpoint, stream })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

/// Append the default port when `address` has none.
fn endpoint(address: &str) -> String {
    let has_port = address
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if has_port {
        address.to_string()
    } else {
        format!("{address}:{DEFAULT_REMOTE_FS_PORT}")
    }
}
