// src/core/executor.rs

//! A minimal `OperationExecutor` for a server with no directory backend.
//! It answers binds and StartTLS itself and declines everything else.

use crate::core::operation::{Operation, OperationKind};
use crate::core::protocol::{BindAuthentication, ResultCode};
use crate::core::workqueue::{ExecutionContext, OperationExecutor};
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct BasicExecutor;

impl BasicExecutor {
    fn bind(&self, ctx: &mut ExecutionContext, operation: &Operation) {
        let Some(bind) = operation.bind_request() else {
            operation.set_result(ResultCode::PROTOCOL_ERROR, "Malformed bind request");
            return;
        };
        match &bind.authentication {
            BindAuthentication::Simple(password) if bind.name.is_empty() && password.is_empty() => {
                ctx.connection.set_anonymous();
                operation.set_result(ResultCode::SUCCESS, "");
            }
            BindAuthentication::Simple(password) if password.is_empty() => {
                // RFC 4513 section 5.1.2: unauthenticated binds.
                operation.set_result(
                    ResultCode::UNWILLING_TO_PERFORM,
                    "Unauthenticated binds are not allowed",
                );
            }
            BindAuthentication::Simple(_) => {
                operation.set_result(ResultCode::INVALID_CREDENTIALS, "Invalid credentials");
            }
            BindAuthentication::Sasl { mechanism, .. } => {
                operation.set_result(
                    ResultCode::AUTH_METHOD_NOT_SUPPORTED,
                    format!("SASL mechanism {mechanism} is not supported"),
                );
            }
            BindAuthentication::Unknown(tag) => {
                operation.set_result(
                    ResultCode::PROTOCOL_ERROR,
                    format!("Unknown authentication type 0x{tag:02x}"),
                );
            }
        }
    }

    fn extended(&self, ctx: &mut ExecutionContext, operation: &Operation) {
        if !operation.is_start_tls() {
            let oid = operation.extended_oid().unwrap_or_default().to_string();
            operation.set_result(
                ResultCode::PROTOCOL_ERROR,
                format!("Unsupported extended operation {oid}"),
            );
            return;
        }
        match ctx.connection.tls().prepare_tls() {
            Ok(()) => {
                operation.set_result(ResultCode::SUCCESS, "");
                operation.result().response_oid =
                    operation.extended_oid().map(str::to_string);
            }
            Err(e) => operation.set_result(e.result_code(), e.to_string()),
        }
    }
}

impl OperationExecutor for BasicExecutor {
    fn execute(&self, ctx: &mut ExecutionContext, operation: &Operation) {
        debug!("Executing {:?}", operation);
        match operation.kind() {
            OperationKind::Bind => self.bind(ctx, operation),
            OperationKind::Extended => self.extended(ctx, operation),
            _ => operation.set_result(
                ResultCode::UNWILLING_TO_PERFORM,
                "No backend is configured to handle this request",
            ),
        }
    }
}
