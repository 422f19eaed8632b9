//! A single framed TCP connection to a node

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use aerie_core::{Error, Result, ResultCode};
use aerie_wire::proto::{Frame, FrameDecoder, ProtoType};
use aerie_wire::{admin, info};

/// Login credentials sent on every new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub user: String,
    /// Clear-text password; only its SHA-256 digest is sent
    pub password: String,
}

impl Credentials {
    /// Credentials for `user`.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            user: user.into(),
            password: password.into(),
        }
    }
}

/// One open socket speaking the framed protocol.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    addr: SocketAddr,
    buf: BytesMut,
    decoder: FrameDecoder,
    last_used: Instant,
}

impl Connection {
    /// Open a connection, giving up after `timeout`.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::timeout(format!("connect to {} timed out", addr)))?
            .map_err(|e| Error::connection(format!("connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        debug!(target: "aerie::pool", %addr, "Connection opened");
        Ok(Connection {
            stream,
            addr,
            buf: BytesMut::with_capacity(8 * 1024),
            decoder: FrameDecoder::new(),
            last_used: Instant::now(),
        })
    }

    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Time since the connection last carried a request.
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Write a complete encoded frame.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.last_used = Instant::now();
        self.stream.write_all(frame).await?;
        Ok(())
    }

    /// Read the next frame.
    ///
    /// A peer closing the socket mid-frame is a `Connection` error.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                self.last_used = Instant::now();
                return Ok(frame);
            }
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::connection(format!("{} closed the connection", self.addr)));
            }
        }
    }

    /// Send a frame and read one frame back.
    pub async fn request(&mut self, frame: &[u8]) -> Result<Frame> {
        self.send(frame).await?;
        self.read_frame().await
    }

    /// Run info commands on this connection.
    pub async fn info(&mut self, commands: &[&str]) -> Result<BTreeMap<String, String>> {
        let req = info::encode_info_request(commands)?;
        let frame = self.request(&req).await?;
        if frame.kind != ProtoType::Info {
            return Err(Error::protocol(format!(
                "expected info frame, got {:?}",
                frame.kind
            )));
        }
        info::parse_info_response(&frame.payload)
    }

    /// Authenticate. A rejected login is a security error with the server's code.
    pub async fn login(&mut self, creds: &Credentials) -> Result<()> {
        let frame = self
            .request(&admin::encode_login(&creds.user, &creds.password))
            .await?;
        if frame.kind != ProtoType::Admin {
            return Err(Error::protocol(format!(
                "expected admin frame, got {:?}",
                frame.kind
            )));
        }
        match admin::decode_admin_response(&frame.payload)? {
            ResultCode::Ok => Ok(()),
            code => Err(Error::server(code, format!("login as {} rejected", creds.user))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_info_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            let mut dec = FrameDecoder::new();
            loop {
                if let Some(frame) = dec.decode(&mut buf).unwrap() {
                    let cmds = info::parse_info_request(&frame.payload).unwrap();
                    let resp =
                        info::encode_info_response(cmds.iter().map(|c| (c.as_str(), "v")));
                    // split the reply to exercise partial reads
                    sock.write_all(&resp[..5]).await.unwrap();
                    sock.flush().await.unwrap();
                    sock.write_all(&resp[5..]).await.unwrap();
                    continue;
                }
                if sock.read_buf(&mut buf).await.unwrap() == 0 {
                    return;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_info_over_partial_reads() {
        let addr = echo_info_server().await;
        let mut conn = Connection::connect(addr, Duration::from_secs(1)).await.unwrap();
        let map = conn.info(&["node", "services"]).await.unwrap();
        assert_eq!(map.get("node").map(String::as_str), Some("v"));
        assert_eq!(map.len(), 2);
        let again = conn.info(&["node"]).await.unwrap();
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = Connection::connect(addr, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });
        let mut conn = Connection::connect(addr, Duration::from_secs(1)).await.unwrap();
        let err = conn.info(&["node"]).await.unwrap_err();
        assert!(err.poisons_connection());
    }
}
