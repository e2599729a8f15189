use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::{duplex, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

use proxypipe::{
    dial, proto, relay, Config, Direction, DialStep, EndpointAddress, Error, HandshakeError, ProxyType,
};

async fn listen() -> (TcpListener, EndpointAddress) {
    let lis = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = lis.local_addr().unwrap();
    (lis, EndpointAddress::new("127.0.0.1", addr.port().to_string()))
}

/// Reads a request head and answers with `reply`, then echoes the tunnel
/// back with an `echo:` prefix.
async fn http_proxy(lis: TcpListener, reply: &'static [u8]) -> Vec<u8> {
    let (stream, _) = lis.accept().await.unwrap();
    let mut stream = BufReader::new(stream);
    let mut head = Vec::new();
    loop {
        let n = stream.read_until(b'\n', &mut head).await.unwrap();
        if n == 0 || head.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    stream.write_all(reply).await.unwrap();
    echo(stream).await;
    head
}

async fn echo<S>(mut stream: S)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut payload = Vec::new();
    if stream.read_to_end(&mut payload).await.is_ok() && !payload.is_empty() {
        let _ = stream.write_all(b"echo:").await;
        let _ = stream.write_all(&payload).await;
    }
    let _ = stream.shutdown().await;
}

struct Socks5Greeted {
    stream: TcpStream,
}

struct Socks5Requested {
    stream: TcpStream,
    request: Vec<u8>,
}

impl Socks5Greeted {
    async fn accept(lis: &TcpListener, method: u8) -> Self {
        let (mut stream, _) = lis.accept().await.unwrap();
        let mut greeting = [0_u8; 3];
        stream.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [proto::SOCKS_VERSION, 0x01, 0x00]);
        stream.write_all(&[proto::SOCKS_VERSION, method]).await.unwrap();
        Socks5Greeted { stream }
    }

    async fn read_request(mut self) -> Socks5Requested {
        let mut request = vec![0_u8; 5];
        self.stream.read_exact(&mut request).await.unwrap();
        let rest = match request[3] {
            0x01 => 4 + 2 - 1,
            0x03 => request[4] as usize + 2,
            0x04 => 16 + 2 - 1,
            other => panic!("bad atyp {other}"),
        };
        let mut tail = vec![0_u8; rest];
        self.stream.read_exact(&mut tail).await.unwrap();
        request.extend_from_slice(&tail);
        Socks5Requested {
            stream: self.stream,
            request,
        }
    }
}

impl Socks5Requested {
    async fn reply(mut self, rep: u8) -> Vec<u8> {
        self.stream
            .write_all(&[proto::SOCKS_VERSION, rep, 0x00, 0x01, 127, 0, 0, 1, 0x1f, 0x90])
            .await
            .unwrap();
        if rep == 0x00 {
            echo(self.stream).await;
        }
        self.request
    }
}

async fn round_trip(tunnel: proxypipe::TunnelConnection, payload: &'static [u8]) -> Vec<u8> {
    let (local_out, mut local_peer) = duplex(1024);
    let options = proxypipe::RelayOptions { half_close: true };
    let outcome = proxypipe::relay_with(options, tunnel, payload, local_out)
        .await
        .unwrap();
    assert_eq!(outcome.direction, Direction::TunnelToLocal);

    let mut seen = Vec::new();
    local_peer.read_to_end(&mut seen).await.unwrap();
    seen
}

#[tokio::test]
async fn http_connect_round_trip() {
    let (lis, proxy) = listen().await;
    let server = tokio::spawn(http_proxy(lis, b"HTTP/1.1 200 Connection established\r\n\r\n"));

    let dest = EndpointAddress::new("example.com", "22");
    let tunnel = dial(ProxyType::Http, &proxy, &dest).await.unwrap();
    assert_eq!(tunnel.peer_addr().unwrap().port().to_string(), proxy.port);

    let seen = round_trip(tunnel, b"hello").await;
    assert_eq!(seen, b"echo:hello");

    let head = server.await.unwrap();
    let expected = format!("CONNECT example.com:22 HTTP/1.1\r\nHost: {proxy}\r\n\r\n");
    assert_eq!(head, expected.as_bytes());
}

#[tokio::test]
async fn http_connect_payload_right_after_head() {
    let (lis, proxy) = listen().await;
    tokio::spawn(http_proxy(lis, b"HTTP/1.1 200 OK\r\n\r\nSSH-2.0-test\r\n"));

    let dest = EndpointAddress::new("example.com", "22");
    let tunnel = dial(ProxyType::Http, &proxy, &dest).await.unwrap();
    let seen = round_trip(tunnel, b"x").await;
    assert_eq!(seen, b"SSH-2.0-test\r\necho:x");
}

#[tokio::test]
async fn http_connect_denied() {
    let (lis, proxy) = listen().await;
    tokio::spawn(http_proxy(
        lis,
        b"HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic\r\n\r\n",
    ));

    let dest = EndpointAddress::new("example.com", "443");
    let err = dial(ProxyType::Http, &proxy, &dest).await.unwrap_err();
    assert_eq!(err.step, DialStep::HttpResponse);
    assert!(matches!(
        err.cause,
        HandshakeError::UnexpectedStatus { code: 407, .. }
    ));
    let msg = err.to_string();
    assert!(msg.contains(&proxy.to_string()), "{msg}");
    assert!(msg.contains("example.com:443"), "{msg}");
    assert!(msg.contains("407 Proxy Authentication Required"), "{msg}");
}

#[tokio::test]
async fn http_connect_not_http() {
    let (lis, proxy) = listen().await;
    tokio::spawn(http_proxy(lis, b"SSH-2.0-OpenSSH_9.6\r\n"));

    let dest = EndpointAddress::new("example.com", "22");
    let err = dial(ProxyType::Http, &proxy, &dest).await.unwrap_err();
    assert_eq!(err.step, DialStep::HttpResponse);
    assert!(matches!(err.cause, HandshakeError::InvalidStatusLine(_)));
}

#[tokio::test]
async fn socks5_round_trip() {
    let (lis, proxy) = listen().await;
    let server = tokio::spawn(async move {
        Socks5Greeted::accept(&lis, 0x00)
            .await
            .read_request()
            .await
            .reply(0x00)
            .await
    });

    let dest = EndpointAddress::new("example.com", "22");
    let tunnel = dial(ProxyType::Socks5, &proxy, &dest).await.unwrap();
    let seen = round_trip(tunnel, b"over socks").await;
    assert_eq!(seen, b"echo:over socks");

    let request = server.await.unwrap();
    let mut expected = vec![0x05, 0x01, 0x00, 0x03, 11];
    expected.extend_from_slice(b"example.com");
    expected.extend_from_slice(&[0x00, 22]);
    assert_eq!(request, expected);
}

#[tokio::test]
async fn socks5_method_rejected() {
    let (lis, proxy) = listen().await;
    tokio::spawn(async move {
        let greeted = Socks5Greeted::accept(&lis, 0xff).await;
        // hold the connection until the client hangs up
        let mut stream = greeted.stream;
        let _ = stream.read_to_end(&mut Vec::new()).await;
    });

    let dest = EndpointAddress::new("example.com", "22");
    let err = dial(ProxyType::Socks5, &proxy, &dest).await.unwrap_err();
    assert_eq!(err.step, DialStep::Socks5Negotiation);
    assert!(matches!(err.cause, HandshakeError::NoAcceptableMethod));
}

#[tokio::test]
async fn socks5_connect_rejected() {
    let (lis, proxy) = listen().await;
    let server = tokio::spawn(async move {
        Socks5Greeted::accept(&lis, 0x00)
            .await
            .read_request()
            .await
            .reply(0x02)
            .await
    });

    let dest = EndpointAddress::new("192.0.2.7", "25");
    let err = dial(ProxyType::Socks5, &proxy, &dest).await.unwrap_err();
    assert_eq!(err.step, DialStep::Socks5Connect);
    assert!(err
        .to_string()
        .ends_with("proxy rejected connect request: connection not allowed by ruleset"));

    let request = server.await.unwrap();
    assert_eq!(request, vec![0x05, 0x01, 0x00, 0x01, 192, 0, 2, 7, 0x00, 25]);
}

#[tokio::test]
async fn tunnel_closed_from_both_sides() {
    let (lis, proxy) = listen().await;
    tokio::spawn(http_proxy(lis, b"HTTP/1.1 200 OK\r\n\r\n"));

    let dest = EndpointAddress::new("example.com", "22");
    let mut tunnel = dial(ProxyType::Http, &proxy, &dest).await.unwrap();
    tunnel.shutdown().await.unwrap();
    // second close may report an error, but must not panic
    let _ = tunnel.shutdown().await;

    let (local_out, _local_peer) = duplex(64);
    let outcome = relay(tunnel, &b""[..], local_out).await;
    assert!(outcome.is_ok(), "{outcome:?}");
}

#[tokio::test]
async fn run_reports_dial_errors() {
    let (lis, proxy) = listen().await;
    tokio::spawn(http_proxy(lis, b"HTTP/1.1 502 Bad Gateway\r\n\r\n"));

    let config = Config::from_args(["proxypipe", "127.0.0.1", proxy.port.as_str(), "example.com", "22"]).unwrap();
    let (local_in, _in_peer) = duplex(64);
    let (local_out, _out_peer) = duplex(64);
    let err = proxypipe::run(&config, local_in, local_out).await.unwrap_err();
    assert!(matches!(err, Error::Dial(_)));
    assert!(err.to_string().contains("unexpected status code 502 Bad Gateway"));
}

#[tokio::test]
async fn proxy_sees_close_once_relay_resolves() {
    let (lis, proxy) = listen().await;
    let server = tokio::spawn(async move {
        let (stream, _) = lis.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let mut line = Vec::new();
        while stream.read_until(b'\n', &mut line).await.unwrap() > 2 {
            line.clear();
        }
        stream.write_all(b"HTTP/1.1 200 OK\r\n\r\nbye").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
            .await
            .map(|res| res.is_ok())
            .unwrap_or(false)
    });

    let dest = EndpointAddress::new("example.com", "22");
    let tunnel = dial(ProxyType::Http, &proxy, &dest).await.unwrap();
    assert!(tunnel.local_addr().unwrap().ip().is_loopback());

    // local input stays open: only the tunnel side can end the relay
    let (local_in, _in_peer) = duplex(64);
    let (local_out, mut out_peer) = duplex(64);
    let outcome = relay(tunnel, local_in, local_out).await.unwrap();
    assert_eq!(outcome.direction, Direction::TunnelToLocal);
    assert_eq!(outcome.bytes, 3);

    assert!(server.await.unwrap(), "tunnel still open after relay resolved");

    let mut seen = Vec::new();
    out_peer.read_to_end(&mut seen).await.unwrap();
    assert_eq!(seen, b"bye");
}
