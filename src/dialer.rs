use std::{
    fmt, io,
    net::SocketAddr,
    pin::Pin,
    str::FromStr,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader, ReadBuf},
    net::TcpStream,
};
use tracing::debug;

use crate::error::{ConfigError, DialError, DialStep, HandshakeError};

mod http_connect;
mod socks_connect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    Http,
    Socks5,
}

impl FromStr for ProxyType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("http") {
            Ok(ProxyType::Http)
        } else if s.eq_ignore_ascii_case("socks5") {
            Ok(ProxyType::Socks5)
        } else {
            Err(ConfigError::UnsupportedProxyType(s.to_owned()))
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => f.write_str("http"),
            ProxyType::Socks5 => f.write_str("socks5"),
        }
    }
}

/// A host and port taken verbatim from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddress {
    pub host: String,
    pub port: String,
}

impl EndpointAddress {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        EndpointAddress {
            host: host.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// An established connection to the destination, reached through the proxy.
///
/// Reads go through the buffer used while parsing the proxy's reply, so
/// payload sent right behind the handshake is not lost.
#[derive(Debug)]
pub struct TunnelConnection {
    inner: BufReader<TcpStream>,
}

impl TunnelConnection {
    fn new(stream: BufReader<TcpStream>) -> Self {
        TunnelConnection { inner: stream }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.get_ref().peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.get_ref().local_addr()
    }
}

impl AsyncRead for TunnelConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TunnelConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Opens one connection to `proxy` and asks it for a tunnel to `dest`.
///
/// No retries are made. On failure the proxy connection is dropped before
/// the error is returned.
pub async fn dial(
    proxy_type: ProxyType,
    proxy: &EndpointAddress,
    dest: &EndpointAddress,
) -> Result<TunnelConnection, DialError> {
    let fail = |step: DialStep, cause: HandshakeError| DialError {
        proxy: proxy.to_string(),
        dest: dest.to_string(),
        step,
        cause,
    };

    let stream = TcpStream::connect(proxy.to_string())
        .await
        .map_err(|e| fail(DialStep::ProxyConnect, e.into()))?;
    debug!("connected to {proxy_type} proxy {proxy}");

    let mut stream = BufReader::new(stream);
    match proxy_type {
        ProxyType::Http => http_connect::handshake(&mut stream, proxy, dest)
            .await
            .map_err(|(step, cause)| fail(step, cause))?,
        ProxyType::Socks5 => socks_connect::handshake(&mut stream, dest)
            .await
            .map_err(|(step, cause)| fail(step, cause))?,
    }
    debug!("tunnel to {dest} established via {proxy}");

    Ok(TunnelConnection::new(stream))
}
