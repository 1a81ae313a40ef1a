// ABOUTME: Owns the serial port: a blocking reader thread feeding the packet
// ABOUTME: parser, a rate-limited blocking writer thread, and an async
// ABOUTME: reconnection supervisor that restarts both after any I/O fault

use crate::cache::{FrameId, PacketCache};
use crate::error::SerialError;
use crate::events::{BridgeSenders, BusFault, BusReceive, BusSent};
use crate::packet::Parser;
use crate::settings::SerialSettings;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle as TokioJoinHandle;
use tracing::{debug, info, warn};

pub const BAUD_RATE: u32 = 38_400;
/// Minimum spacing between the start of consecutive outbound frames.
pub const SEND_DELAY: Duration = Duration::from_millis(50);
/// Writer queue capacity.
pub const MAX_BUFFER_LENGTH: usize = 292;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
/// How long a blocking read waits before returning, so the reader thread can
/// notice a stop request without an uninterruptible syscall.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct WriterQueueState {
    queue: VecDeque<FrameId>,
    locked: bool,
    alive: bool,
}

/// Shared state between the async supervisor and the blocking reader/writer
/// threads.
struct Shared {
    queue_state: Mutex<WriterQueueState>,
    queue_cv: Condvar,
    state: Mutex<ConnectionState>,
    supervisor_running: AtomicBool,
    stop_requested: AtomicBool,
    cancel_backoff: Notify,
    fault: Notify,
}

impl Shared {
    fn new() -> Self {
        Shared {
            queue_state: Mutex::new(WriterQueueState {
                queue: VecDeque::new(),
                locked: false,
                alive: true,
            }),
            queue_cv: Condvar::new(),
            state: Mutex::new(ConnectionState::Disconnected),
            supervisor_running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            cancel_backoff: Notify::new(),
            fault: Notify::new(),
        }
    }
}

/// A running reader/writer thread pair for one opened port.
struct ConnectionHandles {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    port_path: String,
}

/// Owns the serial port for the lifetime of the bridge.
pub struct SerialTransport {
    settings: SerialSettings,
    cache: PacketCache,
    senders: BridgeSenders,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<TokioJoinHandle<()>>>,
}

impl SerialTransport {
    pub fn new(settings: SerialSettings, cache: PacketCache, senders: BridgeSenders) -> Self {
        SerialTransport {
            settings,
            cache,
            senders,
            shared: Arc::new(Shared::new()),
            supervisor: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.shared.state.lock().expect("state mutex poisoned") == ConnectionState::Connected
    }

    /// Ensures a connection attempt is (or already is) in flight. Idempotent:
    /// calling `ensure` while already connected, or while a reconnection
    /// attempt is already running, is a no-op. At most one reconnection
    /// task is ever in flight.
    pub async fn ensure(self: &Arc<Self>) {
        if self.shared.supervisor_running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        {
            let mut state = self.shared.queue_state.lock().expect("queue mutex poisoned");
            state.alive = true;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_supervisor().await;
        });
        *self.supervisor.lock().expect("supervisor mutex poisoned") = Some(handle);
    }

    /// Stops the supervisor, and any active reader/writer threads, without
    /// blocking the caller. Requests are cooperative; the supervisor task
    /// joins in the background. A second call is a no-op.
    pub async fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.cancel_backoff.notify_waiters();
        self.shared.fault.notify_waiters();
        {
            let mut state = self.shared.queue_state.lock().expect("queue mutex poisoned");
            state.alive = false;
            self.shared.queue_cv.notify_all();
        }

        let handle = self.supervisor.lock().expect("supervisor mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        *self.shared.state.lock().expect("state mutex poisoned") = ConnectionState::Disconnected;
    }

    /// Enqueues a cached frame to be written to the bus. Rejects the newest
    /// enqueue once the queue is saturated.
    pub fn send(&self, id: FrameId) -> Result<(), crate::error::QueueFull> {
        let mut state = self.shared.queue_state.lock().expect("queue mutex poisoned");
        if state.queue.len() >= MAX_BUFFER_LENGTH {
            return Err(crate::error::QueueFull);
        }
        state.queue.push_back(id);
        self.shared.queue_cv.notify_one();
        Ok(())
    }

    /// Locks the writer: queued and future enqueues are accepted, but
    /// nothing is written until `unlock` is called.
    pub fn lock(&self) {
        let mut state = self.shared.queue_state.lock().expect("queue mutex poisoned");
        state.locked = true;
    }

    pub fn unlock(&self) {
        let mut state = self.shared.queue_state.lock().expect("queue mutex poisoned");
        state.locked = false;
        self.shared.queue_cv.notify_all();
    }

    async fn run_supervisor(self: Arc<Self>) {
        loop {
            if self.shared.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            *self.shared.state.lock().expect("state mutex poisoned") = ConnectionState::Connecting;

            // Registered before the reader/writer threads exist, so a fault
            // notified during or right after spawn can't be missed: `Notify`
            // wakes only futures that already exist when `notify_waiters` is
            // called, it stores no permit for later.
            let notified = self.shared.fault.notified();
            tokio::pin!(notified);

            let attempt = {
                let settings = self.settings.clone();
                let cache = self.cache.clone();
                let senders = self.senders.clone();
                let shared = Arc::clone(&self.shared);
                tokio::task::spawn_blocking(move || start_connection(&settings, cache, senders, shared))
                    .await
                    .unwrap_or_else(|join_err| Err(SerialError::Io(io::Error::other(join_err))))
            };

            match attempt {
                Ok(handles) => {
                    info!(port = %handles.port_path, "serial connection active");
                    *self.shared.state.lock().expect("state mutex poisoned") = ConnectionState::Connected;

                    // Block here (off the executor is fine, we just await a
                    // Notify) until a fault is reported or stop is requested.
                    if !self.shared.stop_requested.load(Ordering::SeqCst) {
                        notified.await;
                    }

                    self.teardown(handles);
                }
                Err(err) => {
                    warn!(%err, "couldn't open serial connection, retrying");
                }
            }

            *self.shared.state.lock().expect("state mutex poisoned") = ConnectionState::Disconnected;

            if self.shared.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                _ = self.shared.cancel_backoff.notified() => {}
            }
        }

        self.shared.supervisor_running.store(false, Ordering::SeqCst);
    }

    fn teardown(&self, handles: ConnectionHandles) {
        {
            let mut state = self.shared.queue_state.lock().expect("queue mutex poisoned");
            state.alive = false;
            self.shared.queue_cv.notify_all();
        }
        let _ = handles.reader.join();
        let _ = handles.writer.join();
        {
            let mut state = self.shared.queue_state.lock().expect("queue mutex poisoned");
            state.alive = true;
        }
    }
}

fn open_port(path: &str) -> Result<Box<dyn SerialPort>, SerialError> {
    let mut port = serialport::new(path, BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_POLL_TIMEOUT)
        .open()?;

    // DSR/DTR asserted, no software flow control.
    port.write_data_terminal_ready(true).ok();
    port.write_request_to_send(true).ok();

    Ok(port)
}

fn start_connection(
    settings: &SerialSettings,
    cache: PacketCache,
    senders: BridgeSenders,
    shared: Arc<Shared>,
) -> Result<ConnectionHandles, SerialError> {
    let path = super::discovery::find_port(settings).ok_or(SerialError::NoPort)?;
    let port = open_port(&path)?;
    let reader_port = port.try_clone()?;

    {
        let mut state = shared.queue_state.lock().expect("queue mutex poisoned");
        state.alive = true;
    }

    let reader_shared = Arc::clone(&shared);
    let reader_senders = senders.clone();
    let reader_cache = cache.clone();
    let reader = std::thread::Builder::new()
        .name("velbus-serial-reader".into())
        .spawn(move || reader_loop(reader_port, reader_cache, reader_senders, reader_shared))
        .expect("failed to spawn serial reader thread");

    let writer_shared = Arc::clone(&shared);
    let writer_senders = senders;
    let writer_cache = cache;
    let writer = std::thread::Builder::new()
        .name("velbus-serial-writer".into())
        .spawn(move || writer_loop(port, writer_cache, writer_senders, writer_shared))
        .expect("failed to spawn serial writer thread");

    Ok(ConnectionHandles {
        reader,
        writer,
        port_path: path,
    })
}

fn reader_loop(
    mut port: Box<dyn SerialPort>,
    cache: PacketCache,
    senders: BridgeSenders,
    shared: Arc<Shared>,
) {
    let mut parser = Parser::new();
    let mut buf = [0u8; 1024];

    loop {
        if shared.stop_requested.load(Ordering::SeqCst) {
            return;
        }

        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                for frame in parser.feed(&buf[..n]) {
                    debug!(frame = %frame, "[BUS IN]");
                    let id = cache.insert(frame);
                    let _ = senders.bus_receive.send(BusReceive(id));
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                continue;
            }
            Err(e) => {
                warn!(error = %e, "serial read error");
                let _ = senders.bus_fault.send(BusFault);
                shared.fault.notify_waiters();
                return;
            }
        }
    }
}

fn writer_loop(
    mut port: Box<dyn SerialPort>,
    cache: PacketCache,
    senders: BridgeSenders,
    shared: Arc<Shared>,
) {
    let mut last_send: Option<Instant> = None;

    loop {
        let id = {
            let mut state = shared.queue_state.lock().expect("queue mutex poisoned");
            loop {
                if !state.alive || shared.stop_requested.load(Ordering::SeqCst) {
                    return;
                }
                if !state.queue.is_empty() && !state.locked {
                    break;
                }
                state = shared.queue_cv.wait(state).expect("queue condvar poisoned");
            }
            state.queue.pop_front().expect("queue checked non-empty above")
        };

        if let Some(last) = last_send {
            let elapsed = last.elapsed();
            if elapsed < SEND_DELAY {
                std::thread::sleep(SEND_DELAY - elapsed);
            }
        }

        let frame = match cache.get(id) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "dropping write for unknown cached frame");
                continue;
            }
        };

        debug!(frame = %frame, "[BUS OUT]");
        if let Err(e) = port.write_all(frame.as_bytes()) {
            warn!(error = %e, "serial write error");
            let _ = senders.bus_fault.send(BusFault);
            shared.fault.notify_waiters();
            return;
        }

        last_send = Some(Instant::now());
        let _ = senders.bus_sent.send(BusSent(id));
    }
}
