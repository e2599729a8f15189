use std::{fmt, io};

use thiserror::Error;

use crate::{proto::ReplyStatus, relay::Direction};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dial(#[from] DialError),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("proxy authorization not supported yet")]
    AuthNotSupported,
    #[error("unsupported proxy type {0:?}, expected \"http\" or \"socks5\"")]
    UnsupportedProxyType(String),
    #[error("{0}")]
    Usage(#[from] clap::Error),
}

/// The handshake step a dial attempt was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialStep {
    ProxyConnect,
    HttpRequest,
    HttpResponse,
    Socks5Negotiation,
    Socks5Connect,
}

impl fmt::Display for DialStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DialStep::ProxyConnect => "connecting to proxy",
            DialStep::HttpRequest => "sending CONNECT request",
            DialStep::HttpResponse => "reading CONNECT response",
            DialStep::Socks5Negotiation => "SOCKS5 method negotiation",
            DialStep::Socks5Connect => "SOCKS5 connect request",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{step} failed for {dest} via proxy {proxy}: {cause}")]
pub struct DialError {
    pub proxy: String,
    pub dest: String,
    pub step: DialStep,
    #[source]
    pub cause: HandshakeError,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("remote closed")]
    RemoteClosed,
    #[error("too large response head, should be less than {0} bytes")]
    HeaderTooLarge(usize),
    #[error("invalid status line: {0}")]
    InvalidStatusLine(String),
    #[error("invalid header line: {0}")]
    InvalidHeaderLine(String),
    #[error("unexpected status code {code} {reason}")]
    UnexpectedStatus { code: u16, reason: String },
    #[error("expected socks version: 5, got: {0}")]
    InvalidVersion(u8),
    #[error("proxy accepts none of the offered authentication methods")]
    NoAcceptableMethod,
    #[error("proxy selected unoffered authentication method {0:#04x}")]
    UnexpectedMethod(u8),
    #[error("proxy rejected connect request: {0}")]
    Rejected(ReplyStatus),
    #[error("expected RSV byte to be zero, got: {0}")]
    InvalidReservedByte(u8),
    #[error("unexpected address type: {0:#04x}")]
    InvalidAddressType(u8),
    #[error("domain name too long: {0} bytes")]
    DomainTooLong(usize),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

#[derive(Debug, Error)]
#[error("{direction} transfer failed: {source}")]
pub struct RelayError {
    pub direction: Direction,
    #[source]
    pub source: io::Error,
}
