use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HandshakeError;

pub const SOCKS_VERSION: u8 = 0x05;
pub const RESERVED: u8 = 0x00;
pub const CMD_CONNECT: u8 = 0x01;

pub(crate) trait Sendable {
    fn as_bytes(&self) -> Result<Vec<u8>, HandshakeError>;
}

pub(crate) trait Receivable: Sized {
    async fn read_from<R>(conn: &mut R) -> Result<Self, HandshakeError>
    where
        R: AsyncRead + Unpin;
}

pub(crate) async fn send_recv<S, Req, Resp>(conn: &mut S, msg_to_send: Req) -> Result<Resp, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    Req: Sendable,
    Resp: Receivable,
{
    let buf = msg_to_send.as_bytes()?;
    conn.write_all(&buf).await?;
    conn.flush().await?;
    Resp::read_from(conn).await
}

async fn read_version<R: AsyncRead + Unpin>(conn: &mut R) -> Result<(), HandshakeError> {
    let version = conn.read_u8().await?;
    if version != SOCKS_VERSION {
        return Err(HandshakeError::InvalidVersion(version));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth,
    GssApi,
    UserPass,
    NoAcceptable,
    Other(u8),
}

impl From<u8> for AuthMethod {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::NoAuth,
            0x01 => Self::GssApi,
            0x02 => Self::UserPass,
            0xff => Self::NoAcceptable,
            other => Self::Other(other),
        }
    }
}

impl From<AuthMethod> for u8 {
    fn from(method: AuthMethod) -> u8 {
        match method {
            AuthMethod::NoAuth => 0x00,
            AuthMethod::GssApi => 0x01,
            AuthMethod::UserPass => 0x02,
            AuthMethod::NoAcceptable => 0xff,
            AuthMethod::Other(v) => v,
        }
    }
}

#[derive(Debug)]
pub struct ClientGreeting(pub Vec<AuthMethod>);

impl Sendable for ClientGreeting {
    fn as_bytes(&self) -> Result<Vec<u8>, HandshakeError> {
        let mut buf = Vec::with_capacity(2 + self.0.len());
        buf.push(SOCKS_VERSION);
        buf.push(self.0.len() as u8);
        buf.extend(self.0.iter().map(|m| u8::from(*m)));
        Ok(buf)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ServerAuthChoice(pub AuthMethod);

impl Receivable for ServerAuthChoice {
    async fn read_from<R>(conn: &mut R) -> Result<Self, HandshakeError>
    where
        R: AsyncRead + Unpin,
    {
        read_version(conn).await?;
        Ok(Self(AuthMethod::from(conn.read_u8().await?)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    DomainName(String),
    Ipv6(Ipv6Addr),
}

impl Address {
    /// Classifies a host (no port). Surrounding brackets are stripped.
    pub fn from_host(host: &str) -> Self {
        let bare = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        match bare.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => Address::Ipv4(v4),
            Ok(IpAddr::V6(v6)) => Address::Ipv6(v6),
            Err(_) => Address::DomainName(bare.to_owned()),
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), HandshakeError> {
        match self {
            Address::Ipv4(addr) => {
                buf.push(0x01);
                buf.extend_from_slice(&addr.octets());
            }
            Address::DomainName(dn) => {
                let len = u8::try_from(dn.len()).map_err(|_| HandshakeError::DomainTooLong(dn.len()))?;
                buf.push(0x03);
                buf.push(len);
                buf.extend_from_slice(dn.as_bytes());
            }
            Address::Ipv6(addr) => {
                buf.push(0x04);
                buf.extend_from_slice(&addr.octets());
            }
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(addr) => write!(f, "{addr}"),
            Address::DomainName(dn) => f.write_str(dn),
            Address::Ipv6(addr) => write!(f, "[{addr}]"),
        }
    }
}

impl Receivable for Address {
    async fn read_from<R>(conn: &mut R) -> Result<Self, HandshakeError>
    where
        R: AsyncRead + Unpin,
    {
        match conn.read_u8().await? {
            0x01 => {
                let mut buf = [0_u8; 4];
                conn.read_exact(&mut buf).await?;
                Ok(Self::Ipv4(Ipv4Addr::from(buf)))
            }
            0x03 => {
                let dn_len = conn.read_u8().await? as usize;
                let mut buf = vec![0_u8; dn_len];
                conn.read_exact(&mut buf).await?;
                // the bound name is informational only
                Ok(Self::DomainName(String::from_utf8_lossy(&buf).into_owned()))
            }
            0x04 => {
                let mut buf = [0_u8; 16];
                conn.read_exact(&mut buf).await?;
                Ok(Self::Ipv6(Ipv6Addr::from(buf)))
            }
            other => Err(HandshakeError::InvalidAddressType(other)),
        }
    }
}

#[derive(Debug)]
pub struct ClientConnectionRequest {
    pub dest_addr: Address,
    pub dest_port: u16,
}

impl Sendable for ClientConnectionRequest {
    fn as_bytes(&self) -> Result<Vec<u8>, HandshakeError> {
        let mut buf = Vec::with_capacity(32);
        buf.push(SOCKS_VERSION);
        buf.push(CMD_CONNECT);
        buf.push(RESERVED);
        self.dest_addr.write_to(&mut buf)?;
        buf.extend_from_slice(&self.dest_port.to_be_bytes());
        Ok(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    RequestGranted,
    GeneralFailure,
    ConnectionNotAllowedByRuleset,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefusedByDestinationHost,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unassigned(u8),
}

impl From<u8> for ReplyStatus {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::RequestGranted,
            0x01 => Self::GeneralFailure,
            0x02 => Self::ConnectionNotAllowedByRuleset,
            0x03 => Self::NetworkUnreachable,
            0x04 => Self::HostUnreachable,
            0x05 => Self::ConnectionRefusedByDestinationHost,
            0x06 => Self::TtlExpired,
            0x07 => Self::CommandNotSupported,
            0x08 => Self::AddressTypeNotSupported,
            other => Self::Unassigned(other),
        }
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestGranted => f.write_str("request granted"),
            Self::GeneralFailure => f.write_str("general failure"),
            Self::ConnectionNotAllowedByRuleset => f.write_str("connection not allowed by ruleset"),
            Self::NetworkUnreachable => f.write_str("network unreachable"),
            Self::HostUnreachable => f.write_str("host unreachable"),
            Self::ConnectionRefusedByDestinationHost => f.write_str("connection refused"),
            Self::TtlExpired => f.write_str("TTL expired"),
            Self::CommandNotSupported => f.write_str("command not supported"),
            Self::AddressTypeNotSupported => f.write_str("address type not supported"),
            Self::Unassigned(code) => write!(f, "unassigned reply code {code:#04x}"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ServerResponse {
    pub status: ReplyStatus,
    pub bound_address: Address,
    pub bound_port: u16,
}

impl Receivable for ServerResponse {
    async fn read_from<R>(conn: &mut R) -> Result<Self, HandshakeError>
    where
        R: AsyncRead + Unpin,
    {
        read_version(conn).await?;
        let status = ReplyStatus::from(conn.read_u8().await?);
        if status != ReplyStatus::RequestGranted {
            // servers may close right after a failure reply
            return Err(HandshakeError::Rejected(status));
        }
        let rsv = conn.read_u8().await?;
        if rsv != RESERVED {
            return Err(HandshakeError::InvalidReservedByte(rsv));
        }

        let bound_address = Address::read_from(conn).await?;
        let bound_port = conn.read_u16().await?;

        Ok(Self {
            status,
            bound_address,
            bound_port,
        })
    }
}
