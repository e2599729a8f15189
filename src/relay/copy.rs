use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::Direction;

/// Copies `src` into `dst` until end of stream or error, then closes both.
/// A failing close is not reported: the other direction may already have
/// torn the stream down.
pub(super) async fn transfer<R, W>(direction: Direction, mut src: R, mut dst: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let res = io::copy(&mut src, &mut dst).await;
    if let Err(err) = dst.shutdown().await {
        debug!("{direction}: close: {err}");
    }
    drop(src);

    match &res {
        Ok(n) => debug!("{direction}: proxied total {n} bytes"),
        Err(err) => debug!("{direction}: {err}"),
    }
    res
}
