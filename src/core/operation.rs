// src/core/operation.rs

//! The in-flight operation model: an admitted request, its result slot, and
//! cooperative cancellation.

use crate::core::LdapError;
use crate::core::protocol::{
    BindRequest, Control, LdapResult, OID_START_TLS, ProtocolOp, ResultCode,
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use strum_macros::{AsRefStr, Display, EnumIter};
use tracing::debug;

/// The request kinds a client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Bind,
    Search,
    Add,
    Delete,
    Modify,
    ModifyDn,
    Compare,
    Extended,
    Abandon,
    Unbind,
}

impl OperationKind {
    /// Classifies a decoded request op. Response ops return `None`.
    pub fn of(op: &ProtocolOp) -> Option<Self> {
        let kind = match op {
            ProtocolOp::BindRequest(_) => OperationKind::Bind,
            ProtocolOp::SearchRequest(_) => OperationKind::Search,
            ProtocolOp::AddRequest(_) => OperationKind::Add,
            ProtocolOp::DeleteRequest(_) => OperationKind::Delete,
            ProtocolOp::ModifyRequest(_) => OperationKind::Modify,
            ProtocolOp::ModifyDnRequest(_) => OperationKind::ModifyDn,
            ProtocolOp::CompareRequest(_) => OperationKind::Compare,
            ProtocolOp::ExtendedRequest { .. } => OperationKind::Extended,
            ProtocolOp::AbandonRequest(_) => OperationKind::Abandon,
            ProtocolOp::UnbindRequest => OperationKind::Unbind,
            _ => return None,
        };
        Some(kind)
    }
}

/// Asks an operation to stop. `notify_original_requester` controls whether
/// the client still receives a response for the cancelled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub notify_original_requester: bool,
    pub reason: String,
}

impl CancelRequest {
    pub fn new(notify_original_requester: bool, reason: impl Into<String>) -> Self {
        Self {
            notify_original_requester,
            reason: reason.into(),
        }
    }
}

/// What happened to a cancellation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Requested,
    NoSuchOperation,
    TooLate,
    CannotCancel,
}

impl CancelOutcome {
    pub fn result_code(self) -> ResultCode {
        match self {
            CancelOutcome::Requested => ResultCode::CANCELED,
            CancelOutcome::NoSuchOperation => ResultCode::NO_SUCH_OPERATION,
            CancelOutcome::TooLate => ResultCode::TOO_LATE,
            CancelOutcome::CannotCancel => ResultCode::CANNOT_CANCEL,
        }
    }
}

/// Invoked when an operation is asked to abort. The hook may fail; the
/// cancellation itself still stands.
pub type AbortHook = Box<dyn Fn(&CancelRequest) -> Result<(), LdapError> + Send + Sync>;

/// The mutable result slot filled in by the execution layer.
#[derive(Debug, Clone, Default)]
pub struct OperationResult {
    pub result: LdapResult,
    pub response_controls: Vec<Control>,
    pub server_sasl_credentials: Option<Bytes>,
    pub response_oid: Option<String>,
    pub response_value: Option<Bytes>,
}

const STATE_PENDING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_COMPLETED: u8 = 2;

/// A request admitted on a connection.
///
/// Shared between the connection (for cancellation) and the work queue (for
/// execution) until its response has been delivered.
pub struct Operation {
    message_id: i32,
    operation_id: u64,
    connection_id: u64,
    kind: OperationKind,
    request: ProtocolOp,
    controls: Vec<Control>,
    start_time: Instant,
    state: AtomicU8,
    result: Mutex<OperationResult>,
    cancel_request: Mutex<Option<CancelRequest>>,
    abort_hooks: Mutex<Vec<AbortHook>>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("message_id", &self.message_id)
            .field("operation_id", &self.operation_id)
            .field("connection_id", &self.connection_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Operation {
    /// Builds an operation for a decoded request. Fails for response ops,
    /// which a client must never send.
    pub fn new(
        connection_id: u64,
        operation_id: u64,
        message_id: i32,
        request: ProtocolOp,
        controls: Vec<Control>,
    ) -> Result<Self, LdapError> {
        let kind = OperationKind::of(&request).ok_or_else(|| {
            LdapError::Decode(format!(
                "{} is not a valid request protocol op",
                request.name()
            ))
        })?;
        Ok(Self {
            message_id,
            operation_id,
            connection_id,
            kind,
            request,
            controls,
            start_time: Instant::now(),
            state: AtomicU8::new(STATE_PENDING),
            result: Mutex::new(OperationResult {
                result: LdapResult::new(ResultCode::UNDEFINED, ""),
                ..OperationResult::default()
            }),
            cancel_request: Mutex::new(None),
            abort_hooks: Mutex::new(Vec::new()),
        })
    }

    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    pub fn operation_id(&self) -> u64 {
        self.operation_id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn request(&self) -> &ProtocolOp {
        &self.request
    }

    pub fn request_controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn bind_request(&self) -> Option<&BindRequest> {
        match &self.request {
            ProtocolOp::BindRequest(bind) => Some(bind),
            _ => None,
        }
    }

    /// The OID of an extended request.
    pub fn extended_oid(&self) -> Option<&str> {
        match &self.request {
            ProtocolOp::ExtendedRequest { oid, .. } => Some(oid),
            _ => None,
        }
    }

    pub fn is_start_tls(&self) -> bool {
        self.extended_oid() == Some(OID_START_TLS)
    }

    /// Gives the execution layer access to the result slot.
    pub fn result(&self) -> parking_lot::MutexGuard<'_, OperationResult> {
        self.result.lock()
    }

    pub fn result_code(&self) -> ResultCode {
        self.result.lock().result.code
    }

    pub fn set_result(&self, code: ResultCode, diagnostic: impl Into<String>) {
        let mut slot = self.result.lock();
        slot.result.code = code;
        slot.result.diagnostic = diagnostic.into();
    }

    pub fn mark_running(&self) {
        let _ = self.state.compare_exchange(
            STATE_PENDING,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn mark_completed(&self) {
        self.state.store(STATE_COMPLETED, Ordering::Release);
    }

    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_COMPLETED
    }

    /// Registers a callback run when cancellation is requested.
    pub fn add_abort_hook(&self, hook: AbortHook) {
        self.abort_hooks.lock().push(hook);
    }

    pub fn cancel_request(&self) -> Option<CancelRequest> {
        self.cancel_request.lock().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_request.lock().is_some()
    }

    /// Lets workers bail out at a safe point once cancellation was requested.
    pub fn check_if_cancelled(&self) -> Result<(), LdapError> {
        match self.cancel_request.lock().as_ref() {
            Some(request) => Err(LdapError::directory(
                ResultCode::CANCELED,
                request.reason.clone(),
            )),
            None => Ok(()),
        }
    }

    /// Requests cooperative cancellation.
    ///
    /// The request is recorded before any abort hook runs, so a failing hook
    /// never leaves the operation uncancelled. The first hook failure is
    /// returned after all hooks have run.
    pub fn cancel(&self, request: &CancelRequest) -> Result<CancelOutcome, LdapError> {
        if matches!(self.kind, OperationKind::Abandon | OperationKind::Unbind) {
            return Ok(CancelOutcome::CannotCancel);
        }
        if self.is_completed() {
            return Ok(CancelOutcome::TooLate);
        }
        {
            let mut slot = self.cancel_request.lock();
            if slot.is_some() {
                return Ok(CancelOutcome::Requested);
            }
            *slot = Some(request.clone());
        }

        debug!(
            "Cancel requested for operation {} (msgID {}) on connection {}: {}",
            self.operation_id, self.message_id, self.connection_id, request.reason
        );

        let mut first_error = None;
        for hook in self.abort_hooks.lock().iter() {
            if let Err(e) = hook(request)
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(CancelOutcome::Requested),
        }
    }
}

/// A registered persistent search. It outlives the search operation's
/// tracking entry and is cancelled through the same paths.
#[derive(Debug)]
pub struct PersistentSearch {
    operation: Arc<Operation>,
}

impl PersistentSearch {
    pub fn new(operation: Arc<Operation>) -> Self {
        Self { operation }
    }

    pub fn message_id(&self) -> i32 {
        self.operation.message_id()
    }

    pub fn operation(&self) -> &Arc<Operation> {
        &self.operation
    }

    pub fn cancel(&self, request: &CancelRequest) -> Result<CancelOutcome, LdapError> {
        self.operation.cancel(request)
    }
}
