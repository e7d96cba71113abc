// src/server/request_handler.rs

//! The request handler: one thread multiplexing reads for a share of the
//! server's client connections over a single `mio` selector.
//!
//! Each cycle the handler
//! 1. dispatches at most one buffered message per ready connection,
//! 2. applies queued deregistrations, registrations and reschedules,
//! 3. publishes a snapshot of its connections for monitoring,
//! 4. waits on the selector with a bounded timeout,
//! 5. reads from every connection reported readable.
//!
//! Dispatching one message per connection per cycle keeps a client with a
//! long backlog from starving the others.

use crate::connection::{ClientConnection, ConnectionScheduler, DataRead};
use crate::core::LdapError;
use crate::core::disconnect::DisconnectReason;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const WAKER_TOKEN: Token = Token(0);
const SELECT_TIMEOUT: Duration = Duration::from_secs(1);
const EVENTS_CAPACITY: usize = 1024;

/// Something the ready queue can service.
pub trait ReadySource {
    fn source_id(&self) -> u64;
    fn is_valid(&self) -> bool;
    /// True when a complete message is buffered.
    fn element_available(&self) -> bool;
    /// Decodes and dispatches one message. Returns whether the source is
    /// still valid.
    fn process_next_message(&self) -> bool;
}

impl ReadySource for Arc<ClientConnection> {
    fn source_id(&self) -> u64 {
        self.connection_id()
    }

    fn is_valid(&self) -> bool {
        ClientConnection::is_valid(self)
    }

    fn element_available(&self) -> bool {
        ClientConnection::element_available(self)
    }

    fn process_next_message(&self) -> bool {
        ClientConnection::process_next_message(self)
    }
}

/// Connections known to have at least one complete message buffered,
/// serviced round-robin.
pub struct ReadyQueue<T> {
    queue: VecDeque<T>,
    queued: HashSet<u64>,
}

impl<T: ReadySource> Default for ReadyQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ReadySource> ReadyQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
        }
    }

    /// Adds a source at the tail unless it is already queued.
    pub fn push(&mut self, source: T) -> bool {
        if !self.queued.insert(source.source_id()) {
            return false;
        }
        self.queue.push_back(source);
        true
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Runs one cycle: every source queued when the cycle starts gets at most
    /// one message dispatched, then goes back to the tail if it has more.
    /// Returns the number of messages dispatched.
    pub fn service_cycle(&mut self) -> usize {
        let mut dispatched = 0;
        for _ in 0..self.queue.len() {
            let Some(source) = self.queue.pop_front() else {
                break;
            };
            self.queued.remove(&source.source_id());
            if !source.is_valid() {
                continue;
            }
            if source.element_available() {
                dispatched += 1;
                if !source.process_next_message() {
                    continue;
                }
            }
            if source.element_available() {
                self.push(source);
            }
        }
        dispatched
    }
}

/// State shared between a handler's thread and the threads calling into it.
struct HandlerShared {
    handler_id: usize,
    waker: Waker,
    pending_registrations: Mutex<Vec<Arc<ClientConnection>>>,
    rescheduled: Mutex<Vec<u64>>,
    deregistered: Mutex<Vec<u64>>,
    snapshot: RwLock<Vec<Arc<ClientConnection>>>,
    shutdown_requested: AtomicBool,
}

impl HandlerShared {
    fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake request handler {}: {}", self.handler_id, e);
        }
    }
}

impl ConnectionScheduler for HandlerShared {
    fn reschedule(&self, connection_id: u64) {
        self.rescheduled.lock().push(connection_id);
        self.wake();
    }

    fn deregister(&self, connection_id: u64) {
        self.deregistered.lock().push(connection_id);
        self.wake();
    }
}

/// A running request-handler thread.
pub struct RequestHandler {
    shared: Arc<HandlerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RequestHandler {
    /// Creates the selector and starts the handler thread.
    pub fn start(handler_id: usize) -> Result<Self, LdapError> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let shared = Arc::new(HandlerShared {
            handler_id,
            waker,
            pending_registrations: Mutex::new(Vec::new()),
            rescheduled: Mutex::new(Vec::new()),
            deregistered: Mutex::new(Vec::new()),
            snapshot: RwLock::new(Vec::new()),
            shutdown_requested: AtomicBool::new(false),
        });

        let event_loop = EventLoop {
            poll,
            shared: shared.clone(),
            connections: HashMap::new(),
            ready: ReadyQueue::new(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("ldap-request-handler-{handler_id}"))
            .spawn(move || event_loop.run())?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn handler_id(&self) -> usize {
        self.shared.handler_id
    }

    /// Hands a connection to this handler. The selector registration happens
    /// on the handler thread. Returns false, after disconnecting the client,
    /// if the handler is shutting down.
    pub fn register_client(&self, connection: Arc<ClientConnection>) -> bool {
        if self.shared.shutdown_requested.load(Ordering::Acquire) {
            connection.disconnect(
                DisconnectReason::ServerShutdown,
                true,
                Some("The request handler is shutting down"),
            );
            return false;
        }
        connection.set_scheduler(self.shared.clone());
        self.shared.pending_registrations.lock().push(connection);
        self.shared.wake();
        true
    }

    /// The connections registered as of the handler's last cycle.
    pub fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.shared.snapshot.read().clone()
    }

    /// Stops the handler, disconnecting every connection it owns, and waits
    /// for its thread to exit.
    pub fn shutdown(&self) {
        self.shared.shutdown_requested.store(true, Ordering::Release);
        self.shared.wake();
        if let Some(thread) = self.thread.lock().take()
            && thread.join().is_err()
        {
            error!("Request handler {} panicked.", self.shared.handler_id);
        }
    }
}

struct EventLoop {
    poll: Poll,
    shared: Arc<HandlerShared>,
    connections: HashMap<u64, Arc<ClientConnection>>,
    ready: ReadyQueue<Arc<ClientConnection>>,
}

impl EventLoop {
    fn run(mut self) {
        let handler_id = self.shared.handler_id;
        info!("LDAP request handler {} started.", handler_id);
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !self.shared.shutdown_requested.load(Ordering::Acquire) {
            self.ready.service_cycle();
            self.process_deregistrations();
            self.process_registrations();
            self.process_rescheduled();
            *self.shared.snapshot.write() = self.connections.values().cloned().collect();

            let timeout = if self.ready.is_empty() {
                SELECT_TIMEOUT
            } else {
                Duration::ZERO
            };
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!("Request handler {} selector failed: {}", handler_id, e);
                break;
            }

            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                let Token(id) = event.token();
                let Some(connection) = self.connections.get(&(id as u64)).cloned() else {
                    continue;
                };
                if event.is_readable() || event.is_read_closed() || event.is_error() {
                    self.read_from(connection);
                }
            }
        }

        self.close_all();
        info!("LDAP request handler {} stopped.", handler_id);
    }

    fn read_from(&mut self, connection: Arc<ClientConnection>) {
        match connection.process_data_read() {
            DataRead::Closed => self.remove(connection.connection_id()),
            DataRead::Nothing => {}
            DataRead::Read(n) => {
                debug!("Read {} bytes from connection {}", n, connection.connection_id());
                if connection.element_available() {
                    self.ready.push(connection);
                }
            }
        }
    }

    fn remove(&mut self, connection_id: u64) {
        if let Some(connection) = self.connections.remove(&connection_id) {
            let fd = connection.raw_fd();
            if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
                debug!("Deregistering connection {} failed: {}", connection_id, e);
            }
        }
    }

    fn process_deregistrations(&mut self) {
        let ids = std::mem::take(&mut *self.shared.deregistered.lock());
        for id in ids {
            self.remove(id);
        }
    }

    fn process_registrations(&mut self) {
        let pending = std::mem::take(&mut *self.shared.pending_registrations.lock());
        for connection in pending {
            if !connection.is_valid() {
                continue;
            }
            let id = connection.connection_id();
            let fd = connection.raw_fd();
            match self
                .poll
                .registry()
                .register(&mut SourceFd(&fd), Token(id as usize), Interest::READABLE)
            {
                Ok(()) => {
                    debug!(
                        "Connection {} registered with request handler {}",
                        id, self.shared.handler_id
                    );
                    self.connections.insert(id, connection);
                }
                Err(e) => {
                    let detail = format!("Unable to register the connection with a request handler: {e}");
                    connection.disconnect(DisconnectReason::ServerError, true, Some(&detail));
                }
            }
        }
    }

    /// Services connections whose reading was re-enabled, e.g. after a bind.
    fn process_rescheduled(&mut self) {
        let ids = std::mem::take(&mut *self.shared.rescheduled.lock());
        for id in ids {
            let Some(connection) = self.connections.get(&id).cloned() else {
                continue;
            };
            self.read_from(connection.clone());
            if connection.is_valid() && connection.element_available() {
                self.ready.push(connection);
            }
        }
    }

    fn close_all(&mut self) {
        let pending = std::mem::take(&mut *self.shared.pending_registrations.lock());
        let registered: Vec<_> = self.connections.drain().map(|(_, c)| c).collect();
        for connection in registered.iter().chain(pending.iter()) {
            connection.disconnect(DisconnectReason::ServerShutdown, true, None);
            let fd = connection.raw_fd();
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
        self.shared.snapshot.write().clear();
    }
}
