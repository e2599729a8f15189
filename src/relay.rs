use std::{fmt, io};

use futures::future::{self, Either};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinError,
};
use tracing::debug;

use crate::error::RelayError;

mod copy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    TunnelToLocal,
    LocalToTunnel,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::TunnelToLocal => f.write_str("tunnel -> local"),
            Direction::LocalToTunnel => f.write_str("local -> tunnel"),
        }
    }
}

/// The direction that ended the relay cleanly and how much it moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    pub bytes: u64,
}

pub type TransferOutcome = Result<Transfer, RelayError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOptions {
    /// On end of local input only half-close the tunnel and take the
    /// outcome from the tunnel -> local direction.
    pub half_close: bool,
}

/// Copies `tunnel -> local_out` and `local_in -> tunnel` on two tasks and
/// resolves with whichever finishes first. The other task is aborted, which
/// drops the tunnel.
pub async fn relay<T, I, O>(tunnel: T, local_in: I, local_out: O) -> TransferOutcome
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
{
    relay_with(RelayOptions::default(), tunnel, local_in, local_out).await
}

pub async fn relay_with<T, I, O>(
    options: RelayOptions,
    tunnel: T,
    local_in: I,
    local_out: O,
) -> TransferOutcome
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
{
    let (tunnel_rd, tunnel_wr) = tokio::io::split(tunnel);

    let tunnel_to_local = tokio::spawn(copy::transfer(Direction::TunnelToLocal, tunnel_rd, local_out));
    let local_to_tunnel = tokio::spawn(copy::transfer(Direction::LocalToTunnel, local_in, tunnel_wr));

    // the loser is aborted so its half of the tunnel is dropped too
    match future::select(tunnel_to_local, local_to_tunnel).await {
        Either::Left((res, local_to_tunnel)) => {
            local_to_tunnel.abort();
            joined(Direction::TunnelToLocal, res)
        }
        Either::Right((res, tunnel_to_local)) => {
            let outcome = joined(Direction::LocalToTunnel, res);
            if options.half_close && outcome.is_ok() {
                debug!("local input closed, waiting for the tunnel to finish");
                joined(Direction::TunnelToLocal, tunnel_to_local.await)
            } else {
                tunnel_to_local.abort();
                outcome
            }
        }
    }
}

fn joined(direction: Direction, res: Result<io::Result<u64>, JoinError>) -> TransferOutcome {
    match res {
        Ok(Ok(bytes)) => Ok(Transfer { direction, bytes }),
        Ok(Err(source)) => Err(RelayError { direction, source }),
        Err(e) => Err(RelayError {
            direction,
            source: io::Error::new(io::ErrorKind::Other, e),
        }),
    }
}
