use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::{
    dialer::EndpointAddress,
    error::{DialStep, HandshakeError},
    proto,
};

pub(super) async fn handshake<S>(
    conn: &mut S,
    dest: &EndpointAddress,
) -> Result<(), (DialStep, HandshakeError)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate_method(conn)
        .await
        .map_err(|e| (DialStep::Socks5Negotiation, e))?;
    connect(conn, dest)
        .await
        .map_err(|e| (DialStep::Socks5Connect, e))
}

async fn negotiate_method<S>(conn: &mut S) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let resp: proto::ServerAuthChoice =
        proto::send_recv(conn, proto::ClientGreeting(vec![proto::AuthMethod::NoAuth])).await?;
    debug!("socks5 method selection: {resp:?}");
    match resp {
        proto::ServerAuthChoice(proto::AuthMethod::NoAuth) => Ok(()),
        proto::ServerAuthChoice(proto::AuthMethod::NoAcceptable) => Err(HandshakeError::NoAcceptableMethod),
        proto::ServerAuthChoice(other) => Err(HandshakeError::UnexpectedMethod(other.into())),
    }
}

async fn connect<S>(conn: &mut S, dest: &EndpointAddress) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let dest_port = dest
        .port
        .parse::<u16>()
        .map_err(|_| HandshakeError::InvalidPort(dest.port.clone()))?;
    let req = proto::ClientConnectionRequest {
        dest_addr: proto::Address::from_host(&dest.host),
        dest_port,
    };
    let resp: proto::ServerResponse = proto::send_recv(conn, req).await?;
    debug!(
        "socks5 proxy bound {}:{} for {dest}",
        resp.bound_address, resp.bound_port
    );
    Ok(())
}
