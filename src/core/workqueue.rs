// src/core/workqueue.rs

//! Execution of admitted operations.
//!
//! The connection layer only admits operations and delivers their results.
//! Running them is delegated to an `OperationExecutor` through a `WorkQueue`,
//! which either hands the work to the tokio blocking pool or, for
//! administrative listeners, runs it on the calling thread.

use crate::config::ListenerSettings;
use crate::connection::ClientConnection;
use crate::core::LdapError;
use crate::core::encoder::ResponseEncoder;
use crate::core::operation::Operation;
use crate::core::protocol::{Control, ResultCode};
use bytes::Bytes;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// What an executor can reach while running one operation.
pub struct ExecutionContext {
    pub connection: Arc<ClientConnection>,
    /// Scratch buffer for everything this worker writes to the client.
    pub encoder: ResponseEncoder,
}

impl ExecutionContext {
    pub fn send_search_entry(
        &mut self,
        operation: &Operation,
        entry: Bytes,
        controls: Vec<Control>,
    ) -> bool {
        self.connection
            .send_search_entry_with(operation, entry, controls, &mut self.encoder)
    }

    pub fn send_search_reference(
        &mut self,
        operation: &Operation,
        urls: Vec<String>,
        controls: Vec<Control>,
    ) -> bool {
        self.connection
            .send_search_reference_with(operation, urls, controls, &mut self.encoder)
    }

    pub fn send_intermediate_response(
        &mut self,
        operation: &Operation,
        oid: Option<String>,
        value: Option<Bytes>,
    ) -> bool {
        self.connection
            .send_intermediate_response_with(operation, oid, value, &mut self.encoder)
    }
}

/// The external execution layer. Implementations fill in the operation's
/// result slot; the response itself is sent by the work queue afterwards.
pub trait OperationExecutor: Send + Sync {
    fn execute(&self, ctx: &mut ExecutionContext, operation: &Operation);
}

/// Accepts admitted operations for execution.
pub trait WorkQueue: Send + Sync {
    /// Fails if the operation cannot be accepted; the connection then
    /// answers the request with `busy`.
    fn submit(
        &self,
        operation: Arc<Operation>,
        connection: Arc<ClientConnection>,
    ) -> Result<(), LdapError>;
}

/// Runs one operation to completion and sends its response.
///
/// A panicking executor is converted into a server error result, so a bad
/// operation can never take a worker down with it.
pub fn run_operation(
    executor: &dyn OperationExecutor,
    operation: Arc<Operation>,
    connection: Arc<ClientConnection>,
) {
    let context = connection.context().clone();
    let mut ctx = ExecutionContext {
        connection,
        encoder: context.encoder_pool.checkout(),
    };

    operation.mark_running();
    if let Some(request) = operation.cancel_request() {
        operation.set_result(ResultCode::CANCELED, request.reason);
    } else if let Err(panic) = catch_unwind(AssertUnwindSafe(|| executor.execute(&mut ctx, &operation))) {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(
            "Operation {:?} on connection {} panicked: {}",
            operation,
            ctx.connection.connection_id(),
            detail
        );
        operation.set_result(
            context.settings().server_error_result_code,
            format!("An internal error occurred while processing the request: {detail}"),
        );
    }

    ctx.connection.send_response_with(&operation, &mut ctx.encoder);
    context.encoder_pool.checkin(ctx.encoder);
}

/// A bounded queue that runs operations on the tokio blocking pool.
pub struct TokioWorkQueue {
    executor: Arc<dyn OperationExecutor>,
    permits: Arc<Semaphore>,
    runtime: Handle,
}

impl TokioWorkQueue {
    pub fn new(executor: Arc<dyn OperationExecutor>, max_capacity: usize, runtime: Handle) -> Self {
        Self {
            executor,
            permits: Arc::new(Semaphore::new(max_capacity)),
            runtime,
        }
    }

    /// The number of operations that may still be accepted.
    pub fn available_capacity(&self) -> usize {
        self.permits.available_permits()
    }
}

impl WorkQueue for TokioWorkQueue {
    fn submit(
        &self,
        operation: Arc<Operation>,
        connection: Arc<ClientConnection>,
    ) -> Result<(), LdapError> {
        let permit = self.permits.clone().try_acquire_owned().map_err(|_| {
            LdapError::directory(
                ResultCode::BUSY,
                "The server is too busy to accept the request",
            )
        })?;
        let executor = self.executor.clone();
        self.runtime.spawn_blocking(move || {
            let _permit = permit;
            run_operation(executor.as_ref(), operation, connection);
        });
        Ok(())
    }
}

/// Runs every operation on the submitting thread.
pub struct SynchronousWorkQueue {
    executor: Arc<dyn OperationExecutor>,
}

impl SynchronousWorkQueue {
    pub fn new(executor: Arc<dyn OperationExecutor>) -> Self {
        Self { executor }
    }
}

impl WorkQueue for SynchronousWorkQueue {
    fn submit(
        &self,
        operation: Arc<Operation>,
        connection: Arc<ClientConnection>,
    ) -> Result<(), LdapError> {
        debug!(
            "Executing {:?} synchronously on connection {}",
            operation,
            connection.connection_id()
        );
        run_operation(self.executor.as_ref(), operation, connection);
        Ok(())
    }
}

/// Picks the queue for a listener: administrative listeners execute
/// synchronously, everything else goes through the tokio blocking pool.
pub fn for_listener(
    settings: &ListenerSettings,
    max_capacity: usize,
    executor: Arc<dyn OperationExecutor>,
) -> Result<Arc<dyn WorkQueue>, LdapError> {
    if settings.admin_connector {
        return Ok(Arc::new(SynchronousWorkQueue::new(executor)));
    }
    let runtime = Handle::try_current()
        .map_err(|e| LdapError::Internal(format!("no tokio runtime for the work queue: {e}")))?;
    Ok(Arc::new(TokioWorkQueue::new(executor, max_capacity, runtime)))
}
