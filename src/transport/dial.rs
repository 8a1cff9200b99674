//! TCP dialing, proxy traversal, and the TLS handshake.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::ConnectionError;
use crate::tls::ALPN_PROTOCOL;

/// Default bound on opening the TCP connection.
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the proxy's CONNECT response.
const MAX_PROXY_RESPONSE: usize = 4096;

/// HTTP CONNECT proxy endpoint.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

/// Inputs to the transport-open step.
#[derive(Debug, Clone)]
pub(crate) struct DialConfig {
    pub connect_timeout: Duration,
    pub proxy: Option<ProxyConfig>,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            proxy: None,
        }
    }
}

/// Open a TCP connection, traverse the proxy when one is configured, run
/// the TLS handshake, and verify the negotiated application protocol.
pub(crate) async fn open_secure_transport(
    host: &str,
    port: u16,
    dial: &DialConfig,
    tls: Arc<rustls::ClientConfig>,
) -> Result<TlsStream<TcpStream>, ConnectionError> {
    let tcp = open_tcp(host, port, dial).await?;
    tcp.set_nodelay(true)
        .map_err(|e| ConnectionError::TransportUnavailable(e.to_string()))?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ConnectionError::TransportUnavailable(format!("invalid host name: {e}")))?;

    let stream = TlsConnector::from(tls)
        .connect(server_name, tcp)
        .await
        .map_err(|e| ConnectionError::HandshakeFailed(e.to_string()))?;

    // A peer that negotiated anything but the one supported protocol is
    // torn down, never silently downgraded.
    let negotiated = stream.get_ref().1.alpn_protocol();
    if negotiated != Some(ALPN_PROTOCOL) {
        tracing::error!(?negotiated, "unexpected application protocol");
        return Err(ConnectionError::UnsupportedProtocolNegotiated);
    }

    Ok(stream)
}

async fn open_tcp(host: &str, port: u16, dial: &DialConfig) -> Result<TcpStream, ConnectionError> {
    let attempt = async {
        match &dial.proxy {
            None => TcpStream::connect((host, port))
                .await
                .map_err(|e| ConnectionError::TransportUnavailable(e.to_string())),
            Some(proxy) => {
                let stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
                    .await
                    .map_err(|e| {
                        ConnectionError::TransportUnavailable(format!(
                            "proxy {}:{}: {e}",
                            proxy.host, proxy.port
                        ))
                    })?;
                connect_through_proxy(stream, host, port).await
            }
        }
    };

    tokio::time::timeout(dial.connect_timeout, attempt)
        .await
        .map_err(|_| {
            ConnectionError::TransportUnavailable(format!(
                "connect to {host}:{port} timed out after {:?}",
                dial.connect_timeout
            ))
        })?
}

/// Issue an HTTP CONNECT and consume the proxy's response headers.
async fn connect_through_proxy(
    mut stream: TcpStream,
    host: &str,
    port: u16,
) -> Result<TcpStream, ConnectionError> {
    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ConnectionError::TransportUnavailable(format!("proxy write: {e}")))?;

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() >= MAX_PROXY_RESPONSE {
            return Err(ConnectionError::TransportUnavailable(
                "proxy response too large".to_string(),
            ));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| ConnectionError::TransportUnavailable(format!("proxy read: {e}")))?;
        if n == 0 {
            return Err(ConnectionError::TransportUnavailable(
                "proxy closed during CONNECT".to_string(),
            ));
        }
        response.push(byte[0]);
    }

    let status_line = response
        .split(|&b| b == b'\r')
        .next()
        .unwrap_or_default();
    let status_line = String::from_utf8_lossy(status_line);
    if !status_line.contains(" 200") {
        return Err(ConnectionError::TransportUnavailable(format!(
            "proxy refused CONNECT: {status_line}"
        )));
    }

    Ok(stream)
}
