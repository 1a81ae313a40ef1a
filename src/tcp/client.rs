// ABOUTME: Handles one accepted connection: optional authorisation handshake,
// ABOUTME: a per-client packet loop, and per-client own-echo suppression

use crate::cache::{FrameId, PacketCache};
use crate::error::ClientError;
use crate::events::{BridgeSenders, ClientClose, TcpReceive};
use crate::packet::Parser;
use crate::settings::ConnectionSettings;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

/// Longest accepted authorisation-key write.
const AUTH_READ_LIMIT: usize = 1024;
const READ_CHUNK: usize = 1024;
/// Bound on the own-echo suppression list, so a client that never gets
/// echoed doesn't grow this unboundedly.
const OWN_FRAMES_CAPACITY: usize = 64;

/// A plain or TLS-wrapped TCP stream, unified so `Client` doesn't need to be
/// generic over the transport.
pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// One accepted TCP connection.
pub struct Client {
    addr: SocketAddr,
    writer: AsyncMutex<WriteHalf<Stream>>,
    own_frames: StdMutex<VecDeque<FrameId>>,
    closed: AtomicBool,
    cache: PacketCache,
    senders: BridgeSenders,
}

impl Client {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Runs the authorisation handshake (if required) and, on success,
    /// spawns the packet-receive loop and returns the running `Client`.
    pub(crate) async fn accept(
        mut stream: Stream,
        addr: SocketAddr,
        settings: &ConnectionSettings,
        cache: PacketCache,
        senders: BridgeSenders,
    ) -> Result<Arc<Client>, ClientError> {
        if settings.auth {
            let mut buf = vec![0u8; AUTH_READ_LIMIT];
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ClientError::AuthFailed);
            }
            let received = String::from_utf8_lossy(&buf[..n]);
            let trimmed = received.trim_end_matches(|c: char| c.is_ascii_whitespace());
            if trimmed != settings.auth_key {
                return Err(ClientError::AuthFailed);
            }
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let client = Arc::new(Client {
            addr,
            writer: AsyncMutex::new(write_half),
            own_frames: StdMutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            cache,
            senders,
        });

        let reader_client = Arc::clone(&client);
        tokio::spawn(async move { reader_client.receive_loop(read_half).await });

        Ok(client)
    }

    async fn receive_loop(self: Arc<Self>, mut read_half: ReadHalf<Stream>) {
        let mut parser = Parser::new();
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    debug!(addr = %self.addr, %err, "client read error");
                    break;
                }
            };

            for frame in parser.feed(&buf[..n]) {
                debug!(addr = %self.addr, frame = %frame, "[TCP IN]");
                let id = self.cache.insert(frame);
                self.remember_own(id);
                let _ = self.senders.tcp_receive.send(TcpReceive(id));
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        let _ = self.senders.client_close.send(ClientClose(self.addr));
        info!(addr = %self.addr, "client disconnected");
    }

    fn remember_own(&self, id: FrameId) {
        let mut own = self.own_frames.lock().expect("client own-frames mutex poisoned");
        own.push_back(id);
        if own.len() > OWN_FRAMES_CAPACITY {
            own.pop_front();
        }
    }

    /// Sends a cached frame to this client, unless `id` is one the client
    /// itself recently sent upstream, suppressing the echo.
    pub async fn send(&self, id: FrameId) {
        {
            let mut own = self.own_frames.lock().expect("client own-frames mutex poisoned");
            if let Some(pos) = own.iter().position(|&x| x == id) {
                own.remove(pos);
                return;
            }
        }

        let frame = match self.cache.get(id) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(addr = %self.addr, %err, "dropping send for unknown cached frame");
                return;
            }
        };

        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write_all(frame.as_bytes()).await {
            debug!(addr = %self.addr, %err, "client write error");
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}
