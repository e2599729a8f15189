//! Proxy-aware stdin/stdout pipe: dial a destination through an HTTP CONNECT
//! or SOCKS5 proxy, then relay raw bytes between the tunnel and local I/O.

pub mod config;
pub mod dialer;
pub mod error;
pub mod proto;
pub mod relay;

pub use config::Config;
pub use dialer::{dial, EndpointAddress, ProxyType, TunnelConnection};
pub use error::{ConfigError, DialError, DialStep, Error, HandshakeError, RelayError};
pub use relay::{relay, relay_with, Direction, RelayOptions, Transfer, TransferOutcome};

/// Dials per `config` and relays until the first direction finishes.
pub async fn run<I, O>(config: &Config, local_in: I, local_out: O) -> Result<Transfer, Error>
where
    I: tokio::io::AsyncRead + Unpin + Send + 'static,
    O: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let tunnel = dial(config.proxy_type, &config.proxy, &config.dest).await?;
    let transfer = relay_with(config.relay, tunnel, local_in, local_out).await?;
    Ok(transfer)
}
