// ABOUTME: A single bound TCP listening endpoint: accept loop with optional
// ABOUTME: TLS wrapping, and parallel, error-isolated fan-out to clients

use super::client::{Client, Stream};
use crate::cache::{FrameId, PacketCache};
use crate::error::{ClientError, ListenerBindError};
use crate::events::BridgeSenders;
use crate::settings::ConnectionSettings;
use socket2::{Domain, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// On platforms without `IP_FREEBIND`, how long to wait between bind
/// retries until the address becomes assignable.
const RETRY_BIND_DELAY: Duration = Duration::from_secs(5);

/// One configured TCP endpoint: its listener and the clients it has
/// accepted.
pub struct Network {
    settings: ConnectionSettings,
    cache: PacketCache,
    senders: BridgeSenders,
    clients: Mutex<Vec<Arc<Client>>>,
    tls_acceptor: Option<TlsAcceptor>,
    stop_requested: Arc<AtomicBool>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl Network {
    pub fn new(
        settings: ConnectionSettings,
        cache: PacketCache,
        senders: BridgeSenders,
    ) -> Result<Self, ClientError> {
        let tls_acceptor = if settings.ssl {
            Some(build_tls_acceptor(&settings)?)
        } else {
            None
        };

        Ok(Network {
            settings,
            cache,
            senders,
            clients: Mutex::new(Vec::new()),
            tls_acceptor,
            stop_requested: Arc::new(AtomicBool::new(false)),
            listener_task: Mutex::new(None),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.settings.bind_host(), self.settings.port)
    }

    pub async fn start(self: &Arc<Self>) {
        self.stop_requested.store(false, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.accept_loop().await });
        *self.listener_task.lock().expect("listener task mutex poisoned") = Some(handle);
    }

    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let handle = self
            .listener_task
            .lock()
            .expect("listener task mutex poisoned")
            .take();
        if let Some(handle) = handle {
            // The accept loop has no way to interrupt a blocked `accept()`
            // other than dropping the listener; aborting the task does that
            // for us since the listener lives in its local stack frame.
            handle.abort();
            let _ = handle.await;
        }
        self.clients.lock().expect("clients mutex poisoned").clear();
    }

    /// Fans a cached frame out to every connected client in parallel,
    /// isolating per-client failures. A no-op if relaying is disabled.
    pub async fn send(&self, id: FrameId) {
        if !self.settings.relay {
            return;
        }

        let clients = self.live_clients();
        let handles: Vec<_> = clients
            .into_iter()
            .map(|client| tokio::spawn(async move { client.send(id).await }))
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Snapshots the client list, pruning any that have already closed.
    fn live_clients(&self) -> Vec<Arc<Client>> {
        let mut clients = self.clients.lock().expect("clients mutex poisoned");
        clients.retain(|client| !client.is_closed());
        clients.clone()
    }

    async fn accept_loop(self: Arc<Self>) {
        let listener = loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                return;
            }
            match self.bind().await {
                Ok(listener) => break listener,
                Err(err) => {
                    warn!(%err, "retrying listener bind");
                    tokio::time::sleep(RETRY_BIND_DELAY).await;
                }
            }
        };

        info!(addr = %self.bind_addr(), "listening");

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    if self.stop_requested.load(Ordering::SeqCst) {
                        return;
                    }
                    warn!(%err, "accept error");
                    continue;
                }
            };

            let this = Arc::clone(&self);
            tokio::spawn(async move { this.handle_accepted(stream, addr).await });
        }
    }

    async fn handle_accepted(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let stream = match &self.tls_acceptor {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls) => Stream::Tls(Box::new(tls)),
                Err(err) => {
                    warn!(%addr, %err, "TLS handshake failed");
                    return;
                }
            },
            None => Stream::Plain(stream),
        };

        match Client::accept(stream, addr, &self.settings, self.cache.clone(), self.senders.clone()).await {
            Ok(client) => {
                info!(%addr, "client connected");
                self.clients.lock().expect("clients mutex poisoned").push(client);
            }
            Err(err) => {
                debug!(%addr, %err, "client rejected");
            }
        }
    }

    async fn bind(&self) -> Result<TcpListener, ListenerBindError> {
        let addr_str = self.bind_addr();
        let bind = || -> io::Result<TcpListener> {
            let addr: SocketAddr = addr_str
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid bind address"))?;

            let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
            let socket = Socket::new(domain, Type::STREAM, None)?;
            socket.set_reuse_address(true)?;
            apply_freebind(&socket)?;
            socket.bind(&addr.into())?;
            socket.listen(128)?;
            socket.set_nonblocking(true)?;

            let std_listener: std::net::TcpListener = socket.into();
            TcpListener::from_std(std_listener)
        };

        bind().map_err(|source| ListenerBindError {
            addr: addr_str.clone(),
            source,
        })
    }
}

#[cfg(target_os = "linux")]
fn apply_freebind(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = socket.as_raw_fd();
    let value: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_FREEBIND,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn apply_freebind(_socket: &Socket) -> io::Result<()> {
    Ok(())
}

fn build_tls_acceptor(settings: &ConnectionSettings) -> Result<TlsAcceptor, ClientError> {
    let cert_file = std::fs::File::open(&settings.cert)?;
    let mut cert_reader = io::BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()?;

    let key_file = std::fs::File::open(&settings.pk)?;
    let mut key_reader = io::BufReader::new(key_file);
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found in pk file"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
