// src/connection/client.rs

//! Defines `ClientConnection`, the per-client state machine.
//!
//! A connection owns its channel stack and the set of operations in flight.
//! The request handler thread reads from it; worker threads admit, complete
//! and cancel operations and write responses. All changes to the operation
//! map and the disconnect flag happen under one lock.

use super::session::{AuthMethod, SessionState};
use crate::channel::{
    ByteChannel, RedirectingChannel, ReadStatus, SaslChannel, SaslSecurityProvider,
    SecurityStage, TimeoutWriteChannel, TlsChannel,
};
use crate::config::ListenerSettings;
use crate::core::disconnect::DisconnectReason;
use crate::core::metrics;
use crate::core::operation::{CancelOutcome, CancelRequest, Operation, PersistentSearch};
use crate::core::protocol::{
    LDAP_VERSION_2, LDAP_VERSION_3, LdapMessage, LdapMessageCodec, LdapResult,
    OID_NOTICE_OF_DISCONNECTION, ProtocolOp,
};
use crate::core::state::ServerContext;
use crate::core::{AdmissionError, LdapError, SecurityNegotiationError};
use bytes::BytesMut;
use chrono::{DateTime, Local, Utc};
use mio::net::TcpStream;
use parking_lot::Mutex;
use rustls::pki_types::CertificateDer;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

/// Hooks the request handler that owns a connection provides to it.
pub trait ConnectionScheduler: Send + Sync {
    /// Asks the handler to read from and service the connection again, e.g.
    /// once reading has been re-enabled after a bind.
    fn reschedule(&self, connection_id: u64);

    /// Asks the handler to stop watching the connection.
    fn deregister(&self, connection_id: u64);
}

/// The outcome of `process_data_read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRead {
    /// The connection was closed; the caller must stop watching it.
    Closed,
    /// No data was read. Reading may be paused while a bind is in progress.
    Nothing,
    /// This many bytes were appended to the decode buffer.
    Read(usize),
}

/// The security layer a caller wants to start.
pub enum NegotiationKind {
    Tls,
    Sasl(Box<dyn SaslSecurityProvider>),
}

/// Operation bookkeeping guarded by the connection's lock.
#[derive(Default)]
pub(super) struct OperationTracker {
    pub(super) in_progress: HashMap<i32, Arc<Operation>>,
    pub(super) persistent_searches: Vec<PersistentSearch>,
    pub(super) disconnect_requested: bool,
}

pub(super) struct DecodeState {
    pub(super) buffer: BytesMut,
    pub(super) codec: LdapMessageCodec,
}

/// One accepted client connection.
pub struct ClientConnection {
    pub(super) self_ref: Weak<ClientConnection>,
    pub(super) connection_id: u64,
    pub(super) context: Arc<ServerContext>,
    pub(super) socket: Arc<TimeoutWriteChannel>,
    /// The inner stage, carrying TLS once negotiated.
    pub(super) tls_stage: Arc<RedirectingChannel>,
    /// The outer stage, carrying a SASL layer once negotiated. All traffic
    /// enters and leaves the connection here.
    pub(super) sasl_stage: Arc<RedirectingChannel>,
    pub(super) pending_tls: Mutex<Option<Arc<TlsChannel>>>,
    pub(super) pending_sasl: Mutex<Option<SecurityStage>>,
    pub(super) ops: Mutex<OperationTracker>,
    pub(super) valid: AtomicBool,
    pub(super) ldap_version: AtomicI32,
    pub(super) bind_or_start_tls_in_progress: AtomicBool,
    pub(super) sasl_bind_in_progress: AtomicBool,
    pub(super) operations_count: AtomicU64,
    pub(super) last_completion: Mutex<Instant>,
    pub(super) decode: Mutex<DecodeState>,
    pub(super) scheduler: Mutex<Option<Arc<dyn ConnectionScheduler>>>,
    pub(super) session: Mutex<SessionState>,
    pub(super) connect_time: DateTime<Local>,
    pub(super) peer_addr: Option<SocketAddr>,
    pub(super) local_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("connection_id", &self.connection_id)
            .field("peer_addr", &self.peer_addr)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

impl ClientConnection {
    /// Wraps an accepted socket. On an LDAPS listener the TLS stage is active
    /// from the start.
    pub fn new(context: Arc<ServerContext>, stream: TcpStream) -> Result<Arc<Self>, LdapError> {
        let settings = context.settings();
        let socket = Arc::new(TimeoutWriteChannel::new(
            stream,
            settings.max_blocked_write_time,
            Some(context.stats.clone()),
        ));
        let peer_addr = socket.peer_addr();
        let local_addr = socket.local_addr();

        let tls_stage = Arc::new(RedirectingChannel::new(socket.clone()));
        if settings.use_ssl {
            let factory = context.tls().ok_or_else(|| {
                LdapError::Tls("the LDAPS listener has no TLS key material".into())
            })?;
            let provider = factory.create(socket.clone())?;
            tls_stage.redirect(SecurityStage::Tls(provider));
        }
        let sasl_stage = Arc::new(RedirectingChannel::new(tls_stage.clone()));
        let connection_id = context.next_connection_id();

        Ok(Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            connection_id,
            socket,
            tls_stage,
            sasl_stage,
            pending_tls: Mutex::new(None),
            pending_sasl: Mutex::new(None),
            ops: Mutex::new(OperationTracker::default()),
            valid: AtomicBool::new(true),
            ldap_version: AtomicI32::new(LDAP_VERSION_3),
            bind_or_start_tls_in_progress: AtomicBool::new(false),
            sasl_bind_in_progress: AtomicBool::new(false),
            operations_count: AtomicU64::new(0),
            last_completion: Mutex::new(Instant::now()),
            decode: Mutex::new(DecodeState {
                buffer: BytesMut::with_capacity(settings.buffer_size),
                codec: LdapMessageCodec::new(settings.max_request_size),
            }),
            scheduler: Mutex::new(None),
            session: Mutex::new(SessionState::new()),
            connect_time: Local::now(),
            peer_addr,
            local_addr,
            context,
        }))
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub(super) fn settings(&self) -> Arc<ListenerSettings> {
        self.context.settings()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn connect_time(&self) -> DateTime<Local> {
        self.connect_time
    }

    /// The raw descriptor the request handler registers for readiness.
    #[cfg(unix)]
    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        self.socket.raw_fd()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn ldap_version(&self) -> i32 {
        self.ldap_version.load(Ordering::Acquire)
    }

    pub(super) fn set_ldap_version(&self, version: i32) {
        self.ldap_version.store(version, Ordering::Release);
    }

    pub fn is_legacy_client(&self) -> bool {
        self.ldap_version() == LDAP_VERSION_2
    }

    pub fn is_bind_or_start_tls_in_progress(&self) -> bool {
        self.bind_or_start_tls_in_progress.load(Ordering::Acquire)
    }

    pub fn is_sasl_bind_in_progress(&self) -> bool {
        self.sasl_bind_in_progress.load(Ordering::Acquire)
    }

    pub(super) fn set_bind_or_start_tls_in_progress(&self, in_progress: bool) {
        self.bind_or_start_tls_in_progress
            .store(in_progress, Ordering::Release);
    }

    pub(super) fn set_sasl_bind_in_progress(&self, in_progress: bool) {
        self.sasl_bind_in_progress
            .store(in_progress, Ordering::Release);
    }

    /// Attaches the request handler that watches this connection.
    pub fn set_scheduler(&self, scheduler: Arc<dyn ConnectionScheduler>) {
        *self.scheduler.lock() = Some(scheduler);
    }

    fn scheduler(&self) -> Option<Arc<dyn ConnectionScheduler>> {
        self.scheduler.lock().clone()
    }

    // --- Authentication state ---

    pub fn session(&self) -> SessionState {
        self.session.lock().clone()
    }

    pub fn set_anonymous(&self) {
        self.session.lock().reset();
    }

    pub fn set_authenticated(&self, bind_dn: impl Into<String>, method: AuthMethod, sasl_mechanism: Option<String>) {
        let mut session = self.session.lock();
        session.bind_dn = Some(bind_dn.into());
        session.auth_method = method;
        session.sasl_mechanism = sasl_mechanism;
    }

    // --- Operation tracking ---

    /// Hands out the per-connection operation ID for the next request.
    pub(super) fn next_operation_id(&self) -> u64 {
        self.operations_count.fetch_add(1, Ordering::Relaxed)
    }

    /// Tracks `operation` and hands it to the work queue.
    ///
    /// The duplicate check and the disconnect check happen under the same
    /// lock as the insertion, so a request can never be admitted once a
    /// disconnect has started. If the work queue rejects the operation it is
    /// untracked again before the error is returned.
    pub fn admit(&self, operation: Arc<Operation>) -> Result<(), AdmissionError> {
        let message_id = operation.message_id();
        {
            let mut ops = self.ops.lock();
            if ops.disconnect_requested || !self.is_valid() {
                return Err(AdmissionError::AlreadyDisconnecting);
            }
            if ops.in_progress.contains_key(&message_id) {
                return Err(AdmissionError::DuplicateCorrelationId(message_id));
            }
            ops.in_progress.insert(message_id, operation.clone());
        }
        metrics::OPERATIONS_IN_PROGRESS.inc();

        let Some(this) = self.self_ref.upgrade() else {
            self.complete(message_id);
            return Err(AdmissionError::AlreadyDisconnecting);
        };
        if let Err(e) = self.context.work_queue().submit(operation, this) {
            self.complete(message_id);
            return Err(AdmissionError::QueueRejected(e.to_string()));
        }
        Ok(())
    }

    /// Removes an operation from tracking. Returns false if it was not
    /// tracked, in which case its response must not be sent.
    pub fn complete(&self, message_id: i32) -> bool {
        let removed = self.ops.lock().in_progress.remove(&message_id);
        match removed {
            Some(operation) => {
                metrics::OPERATIONS_IN_PROGRESS.dec();
                metrics::OPERATION_LATENCY_SECONDS
                    .observe(operation.start_time().elapsed().as_secs_f64());
                *self.last_completion.lock() = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Requests cancellation of the operation or persistent search with the
    /// given message ID.
    pub fn cancel(&self, message_id: i32, request: &CancelRequest) -> CancelOutcome {
        let operation = self.ops.lock().in_progress.get(&message_id).cloned();
        if let Some(operation) = operation {
            return self.request_abort(&operation, request);
        }

        let search = {
            let mut ops = self.ops.lock();
            ops.persistent_searches
                .iter()
                .position(|ps| ps.message_id() == message_id)
                .map(|i| ops.persistent_searches.remove(i))
        };
        match search {
            Some(search) => self.request_abort(search.operation(), request),
            None => CancelOutcome::NoSuchOperation,
        }
    }

    /// Cancels every tracked operation and persistent search and clears the
    /// tracking map.
    pub fn cancel_all(&self, request: &CancelRequest) {
        self.cancel_all_matching(request, None);
    }

    /// Like `cancel_all`, but leaves the operation with `message_id` alone.
    pub fn cancel_all_except(&self, message_id: i32, request: &CancelRequest) {
        self.cancel_all_matching(request, Some(message_id));
    }

    fn cancel_all_matching(&self, request: &CancelRequest, keep: Option<i32>) {
        // Abort hooks may call back into this connection, so they run after
        // the lock is released.
        let (operations, searches) = {
            let mut ops = self.ops.lock();
            let operations: Vec<Arc<Operation>> = match keep {
                Some(id) => {
                    let drained: Vec<i32> = ops
                        .in_progress
                        .keys()
                        .copied()
                        .filter(|k| *k != id)
                        .collect();
                    drained
                        .into_iter()
                        .filter_map(|k| ops.in_progress.remove(&k))
                        .collect()
                }
                None => ops.in_progress.drain().map(|(_, op)| op).collect(),
            };
            let (kept, searches): (Vec<_>, Vec<_>) = std::mem::take(&mut ops.persistent_searches)
                .into_iter()
                .partition(|ps| Some(ps.message_id()) == keep);
            ops.persistent_searches = kept;
            (operations, searches)
        };

        metrics::OPERATIONS_IN_PROGRESS.sub(operations.len() as f64);
        for operation in &operations {
            self.request_abort(operation, request);
        }
        for search in &searches {
            self.request_abort(search.operation(), request);
        }
    }

    fn request_abort(&self, operation: &Operation, request: &CancelRequest) -> CancelOutcome {
        match operation.cancel(request) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Abort callback for {:?} on connection {} failed: {}",
                    operation, self.connection_id, e
                );
                CancelOutcome::Requested
            }
        }
    }

    pub fn register_persistent_search(&self, search: PersistentSearch) {
        self.ops.lock().persistent_searches.push(search);
    }

    pub fn deregister_persistent_search(&self, message_id: i32) -> bool {
        let mut ops = self.ops.lock();
        let before = ops.persistent_searches.len();
        ops.persistent_searches
            .retain(|ps| ps.message_id() != message_id);
        ops.persistent_searches.len() != before
    }

    pub fn operations_in_progress(&self) -> Vec<Arc<Operation>> {
        self.ops.lock().in_progress.values().cloned().collect()
    }

    pub fn operation_in_progress(&self, message_id: i32) -> Option<Arc<Operation>> {
        self.ops.lock().in_progress.get(&message_id).cloned()
    }

    pub fn persistent_search_count(&self) -> usize {
        self.ops.lock().persistent_searches.len()
    }

    /// The total number of requests read from this client.
    pub fn number_of_operations(&self) -> u64 {
        self.operations_count.load(Ordering::Relaxed)
    }

    /// How long the connection has been idle. A connection with anything in
    /// flight is never idle.
    pub fn idle_time(&self) -> Duration {
        {
            let ops = self.ops.lock();
            if !ops.in_progress.is_empty() || !ops.persistent_searches.is_empty() {
                return Duration::ZERO;
            }
        }
        self.last_completion.lock().elapsed()
    }

    // --- Disconnect ---

    /// Terminates the connection. Only the first call has any effect.
    ///
    /// In-flight operations are cancelled, the client is optionally sent a
    /// notice of disconnection, and the channels are closed later by the
    /// finalizer rather than on the calling thread.
    pub fn disconnect(&self, reason: DisconnectReason, notify_client: bool, message: Option<&str>) {
        {
            let mut ops = self.ops.lock();
            if ops.disconnect_requested {
                return;
            }
            ops.disconnect_requested = true;
        }
        self.valid.store(false, Ordering::Release);
        metrics::DISCONNECTS_TOTAL
            .with_label_values(&[reason.as_ref()])
            .inc();

        if let Some(scheduler) = self.scheduler() {
            scheduler.deregister(self.connection_id);
        }

        let closure_message = reason.message_with_detail(message);
        self.cancel_all(&CancelRequest::new(true, closure_message.clone()));

        if notify_client && !self.is_legacy_client() {
            self.send_notice_of_disconnection(reason, message);
        }

        match self.self_ref.upgrade() {
            Some(this) => self.context.schedule_finalizer(this),
            None => self.finalize(),
        }

        info!(
            "Disconnected client {} ({}) reason={} msg=\"{}\"",
            self.connection_id,
            self.peer_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unknown".into()),
            reason,
            closure_message
        );
        self.context.connection_closed(self, reason, message);
    }

    fn send_notice_of_disconnection(&self, reason: DisconnectReason, message: Option<&str>) {
        let code = reason.notification_result_code(self.settings().server_error_result_code);
        let text = match message {
            Some(detail) if !detail.is_empty() => detail.to_string(),
            _ => reason.closure_message().to_string(),
        };
        let notice = LdapMessage::new(
            0,
            ProtocolOp::ExtendedResponse {
                result: LdapResult::new(code, text),
                oid: Some(OID_NOTICE_OF_DISCONNECTION.to_string()),
                value: None,
            },
        );
        let mut encoder = self.context.encoder_pool.checkout();
        if let Err(e) = self.sasl_stage.write(encoder.encode(&notice)) {
            debug!(
                "Unable to send the notice of disconnection to connection {}: {}",
                self.connection_id, e
            );
        }
        self.context.encoder_pool.checkin(encoder);
    }

    /// Closes the channel stack. Called by the finalizer once the quiesce
    /// delay has passed.
    pub fn finalize(&self) {
        self.pending_tls.lock().take();
        self.pending_sasl.lock().take();
        self.sasl_stage.close();
        debug!("Closed the channels of connection {}", self.connection_id);
    }

    // --- Security layering ---

    /// Prepares a new security layer as pending. It becomes active through
    /// `promote_pending_security`, after the response confirming it has been
    /// written in the clear.
    pub fn begin_security_negotiation(&self, kind: NegotiationKind) -> Result<(), SecurityNegotiationError> {
        match kind {
            NegotiationKind::Tls => {
                if self.tls_stage.stage().is_tls() {
                    return Err(SecurityNegotiationError::TlsAlreadyActive);
                }
                let mut pending = self.pending_tls.lock();
                if pending.is_some() {
                    return Err(SecurityNegotiationError::NegotiationPending);
                }
                if !self.settings().allow_start_tls {
                    return Err(SecurityNegotiationError::StartTlsNotAllowed);
                }
                let factory = self
                    .context
                    .tls()
                    .ok_or(SecurityNegotiationError::TlsUnavailable)?;
                let provider = factory
                    .create(self.socket.clone())
                    .map_err(|e| SecurityNegotiationError::ProviderCreation(e.to_string()))?;
                *pending = Some(provider);
            }
            NegotiationKind::Sasl(provider) => {
                let mut pending = self.pending_sasl.lock();
                if pending.is_some() {
                    return Err(SecurityNegotiationError::NegotiationPending);
                }
                let confidential = provider.is_confidential();
                let channel = Arc::new(SaslChannel::new(self.tls_stage.clone(), provider));
                *pending = Some(if confidential {
                    SecurityStage::SaslConfidentiality(channel)
                } else {
                    SecurityStage::SaslIntegrity(channel)
                });
            }
        }
        Ok(())
    }

    /// Activates whatever security layer is pending. Returns false if none was.
    pub fn promote_pending_security(&self) -> bool {
        let mut promoted = false;
        if let Some(provider) = self.pending_tls.lock().take() {
            self.tls_stage.redirect(SecurityStage::Tls(provider));
            info!("TLS is now active on connection {}", self.connection_id);
            promoted = true;
        }
        if let Some(stage) = self.pending_sasl.lock().take() {
            info!(
                "SASL security layer {:?} is now active on connection {}",
                stage, self.connection_id
            );
            self.sasl_stage.redirect(stage);
            promoted = true;
        }
        promoted
    }

    /// Drops a pending security layer whose negotiation did not succeed.
    pub(super) fn discard_pending_security(&self) {
        if self.pending_tls.lock().take().is_some() {
            debug!("Discarded pending TLS on connection {}", self.connection_id);
        }
        self.pending_sasl.lock().take();
    }

    /// Ends a bind or StartTLS: activates any pending security layer,
    /// re-enables reading and asks the request handler to service the
    /// connection again.
    pub fn finish_bind_or_start_tls(&self) {
        self.promote_pending_security();
        self.set_bind_or_start_tls_in_progress(false);
        if let Some(scheduler) = self.scheduler() {
            scheduler.reschedule(self.connection_id);
        }
    }

    pub fn finish_sasl_bind(&self) {
        self.set_sasl_bind_in_progress(false);
    }

    /// The security layer currently carrying traffic, SASL taking precedence.
    pub fn security_stage(&self) -> Arc<SecurityStage> {
        let sasl = self.sasl_stage.stage();
        if sasl.is_plaintext() {
            self.tls_stage.stage()
        } else {
            sasl
        }
    }

    pub fn is_secure(&self) -> bool {
        self.tls_stage.stage().is_secure() || self.sasl_stage.stage().is_secure()
    }

    pub fn tls(&self) -> TlsCapability<'_> {
        TlsCapability { connection: self }
    }

    // --- Reading ---

    /// Reads everything currently available into the decode buffer.
    ///
    /// Reading is paused while a bind or StartTLS is in progress; the
    /// connection is rescheduled once it completes.
    pub fn process_data_read(&self) -> DataRead {
        if self.is_bind_or_start_tls_in_progress() {
            return DataRead::Nothing;
        }
        if !self.is_valid() {
            return DataRead::Closed;
        }

        let mut decode = self.decode.lock();
        match self.sasl_stage.read(&mut decode.buffer) {
            Ok(ReadStatus::Data(n)) => DataRead::Read(n),
            Ok(ReadStatus::WouldBlock) => DataRead::Nothing,
            Ok(ReadStatus::Eof) => {
                drop(decode);
                self.disconnect(DisconnectReason::ClientDisconnect, false, None);
                DataRead::Closed
            }
            Err(e) => {
                let partial = !decode.buffer.is_empty();
                drop(decode);
                if partial || e.is_encryption_error() {
                    self.disconnect(DisconnectReason::IoError, true, Some(&e.to_string()));
                } else {
                    self.disconnect(DisconnectReason::ClientDisconnect, true, None);
                }
                DataRead::Closed
            }
        }
    }

    /// True when at least one complete message is buffered. A malformed
    /// header also counts, so that the error is surfaced by the next
    /// `process_next_message`.
    pub fn element_available(&self) -> bool {
        let decode = self.decode.lock();
        decode
            .codec
            .has_complete_message(&decode.buffer)
            .unwrap_or(true)
    }

    /// Decodes and dispatches at most one buffered message. Returns whether
    /// the connection is still valid afterwards.
    pub fn process_next_message(&self) -> bool {
        if !self.is_valid() {
            return false;
        }
        let decoded = {
            let mut decode = self.decode.lock();
            let DecodeState { buffer, codec } = &mut *decode;
            let result = codec.decode(buffer);
            if result.is_err() {
                buffer.clear();
            }
            result
        };

        match decoded {
            Ok(Some(message)) => self.process_ldap_message(message),
            Ok(None) => true,
            Err(LdapError::MaxRequestSizeExceeded { size, max }) => {
                let detail = format!(
                    "The client sent a request of {size} bytes, exceeding the maximum of {max} bytes"
                );
                self.disconnect(DisconnectReason::MaxRequestSizeExceeded, true, Some(&detail));
                false
            }
            Err(e) => {
                let detail = format!("Unable to decode the request: {e}");
                self.disconnect(DisconnectReason::ProtocolError, true, Some(&detail));
                false
            }
        }
    }

    // --- Monitoring ---

    /// A one-line description of the connection for monitoring output.
    pub fn monitor_summary(&self) -> String {
        let addr = |a: Option<SocketAddr>| a.map(|a| a.to_string()).unwrap_or_default();
        let stage = self.security_stage();
        let security = if stage.is_plaintext() { "none" } else { stage.name() };
        let mut summary = format!(
            "connID=\"{}\" connectTime=\"{}\" source=\"{}\" destination=\"{}\" ldapVersion=\"{}\" authDN=\"{}\" security=\"{}\" opsInProgress=\"{}\"",
            self.connection_id,
            self.connect_time.with_timezone(&Utc).format("%Y%m%d%H%M%SZ"),
            addr(self.peer_addr),
            addr(self.local_addr),
            self.ldap_version(),
            self.session.lock().display_dn(),
            security,
            self.ops.lock().in_progress.len(),
        );
        let searches = self.persistent_search_count();
        if searches > 0 {
            summary.push_str(&format!(" persistentSearches=\"{searches}\""));
        }
        summary
    }
}

/// TLS-specific operations of a connection.
pub struct TlsCapability<'a> {
    connection: &'a ClientConnection,
}

impl TlsCapability<'_> {
    /// Prepares TLS to start after the StartTLS response has been sent.
    pub fn prepare_tls(&self) -> Result<(), SecurityNegotiationError> {
        self.connection
            .begin_security_negotiation(NegotiationKind::Tls)
    }

    /// The client's certificate chain, if it presented one.
    pub fn certificate_chain(&self) -> Option<Vec<CertificateDer<'static>>> {
        self.connection
            .tls_stage
            .stage()
            .provider()
            .and_then(|p| p.peer_certificates())
    }

    pub fn security_strength_factor(&self) -> u32 {
        self.connection.tls_stage.stage().ssf()
    }

    pub fn is_active(&self) -> bool {
        self.connection.tls_stage.stage().is_tls()
    }
}
