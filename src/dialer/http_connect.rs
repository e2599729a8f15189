use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{
    dialer::EndpointAddress,
    error::{DialStep, HandshakeError},
};

pub(super) const MAX_HEADER_SIZE: usize = 4096;

struct ConnectRequest<'a> {
    proxy: &'a EndpointAddress,
    dest: &'a EndpointAddress,
}

impl ConnectRequest<'_> {
    fn as_bytes(&self) -> Vec<u8> {
        format!(
            "CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n",
            self.dest, self.proxy
        )
        .into_bytes()
    }
}

#[derive(Debug)]
pub(super) struct ConnectResponse {
    pub code: u16,
    pub reason: String,
}

impl ConnectResponse {
    fn build_from_status_line(line: &[u8]) -> Result<Self, HandshakeError> {
        let invalid = || HandshakeError::InvalidStatusLine(String::from_utf8_lossy(line).trim().to_string());

        let line = std::str::from_utf8(line).map_err(|_| invalid())?;
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let (version, rest) = line.split_once(' ').ok_or_else(invalid)?;
        if version != "HTTP/1.0" && version != "HTTP/1.1" {
            return Err(invalid());
        }
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let code = code.parse::<u16>().map_err(|_| invalid())?;

        Ok(ConnectResponse {
            code,
            reason: reason.trim().to_string(),
        })
    }

    fn check_header_line(line: &[u8]) -> Result<(), HandshakeError> {
        let invalid = || HandshakeError::InvalidHeaderLine(String::from_utf8_lossy(line).trim().to_string());

        let line = std::str::from_utf8(line).map_err(|_| invalid())?;
        match line.split_once(':') {
            Some((name, _)) if !name.trim().is_empty() => Ok(()),
            _ => Err(invalid()),
        }
    }

    /// Reads a response head of at most `max_header_size` bytes. Nothing
    /// past the terminating blank line is consumed.
    pub(super) async fn recv<R>(reader: &mut R, max_header_size: usize) -> Result<Self, HandshakeError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line_buf = Vec::<u8>::with_capacity(256);

        let mut header_size = read_head_line(reader, &mut line_buf, max_header_size).await?;
        let rsp = Self::build_from_status_line(&line_buf)?;

        loop {
            if header_size >= max_header_size {
                return Err(HandshakeError::HeaderTooLarge(max_header_size));
            }
            line_buf.clear();
            let max_len = max_header_size - header_size;
            header_size += read_head_line(reader, &mut line_buf, max_len)
                .await
                .map_err(|e| match e {
                    HandshakeError::HeaderTooLarge(_) => HandshakeError::HeaderTooLarge(max_header_size),
                    e => e,
                })?;
            if line_buf == b"\r\n" || line_buf == b"\n" {
                // header end line
                return Ok(rsp);
            }
            Self::check_header_line(&line_buf)?;
        }
    }

    fn detect_error(self) -> Result<(), HandshakeError> {
        if self.code == 200 {
            Ok(())
        } else {
            Err(HandshakeError::UnexpectedStatus {
                code: self.code,
                reason: self.reason,
            })
        }
    }
}

async fn read_head_line<R>(reader: &mut R, line_buf: &mut Vec<u8>, max_len: usize) -> Result<usize, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let nr = (&mut *reader)
        .take(max_len as u64)
        .read_until(b'\n', line_buf)
        .await?;
    if nr == 0 {
        return Err(HandshakeError::RemoteClosed);
    }
    if line_buf.last() != Some(&b'\n') {
        return if nr < max_len {
            Err(HandshakeError::RemoteClosed)
        } else {
            Err(HandshakeError::HeaderTooLarge(max_len))
        };
    }
    Ok(nr)
}

pub(super) async fn handshake<S>(
    stream: &mut S,
    proxy: &EndpointAddress,
    dest: &EndpointAddress,
) -> Result<(), (DialStep, HandshakeError)>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let req = ConnectRequest { proxy, dest };
    stream
        .write_all(&req.as_bytes())
        .await
        .map_err(|e| (DialStep::HttpRequest, e.into()))?;
    stream
        .flush()
        .await
        .map_err(|e| (DialStep::HttpRequest, e.into()))?;

    let rsp = ConnectResponse::recv(stream, MAX_HEADER_SIZE)
        .await
        .map_err(|e| (DialStep::HttpResponse, e))?;
    debug!("proxy answered CONNECT with {} {}", rsp.code, rsp.reason);
    rsp.detect_error()
        .map_err(|e| (DialStep::HttpResponse, e))
}
