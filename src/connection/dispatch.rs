// src/connection/dispatch.rs

//! Routes each decoded request: bind and version gating, inline handling of
//! abandon and unbind, and admission of everything else.

use super::client::ClientConnection;
use crate::core::disconnect::DisconnectReason;
use crate::core::operation::{CancelOutcome, CancelRequest, Operation, OperationKind};
use crate::core::protocol::{
    BindAuthentication, LDAP_VERSION_2, LDAP_VERSION_3, LdapMessage, LdapResult, ProtocolOp,
    ResultCode,
};
use crate::core::LdapError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error};

impl ClientConnection {
    /// Handles one decoded message. Returns whether the connection is still
    /// valid afterwards.
    ///
    /// Any error or panic raised while handling the message disconnects the
    /// client with a server error; nothing escapes to the request handler.
    pub fn process_ldap_message(&self, message: LdapMessage) -> bool {
        let message_id = message.message_id;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch(message)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(
                panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string()),
            ),
        };
        if let Some(detail) = failure {
            error!(
                "Unexpected failure processing message {} on connection {}: {}",
                message_id, self.connection_id, detail
            );
            self.disconnect(DisconnectReason::ServerError, true, Some(&detail));
        }
        self.is_valid()
    }

    fn dispatch(&self, message: LdapMessage) -> Result<(), LdapError> {
        let LdapMessage {
            message_id,
            op,
            controls,
        } = message;

        let Some(kind) = OperationKind::of(&op) else {
            let detail = format!("The client sent a {} message, which is not a request", op.name());
            self.disconnect(DisconnectReason::ProtocolError, true, Some(&detail));
            return Ok(());
        };
        self.context.stats.update_message_read(kind);
        let operation_id = self.next_operation_id();
        debug!(
            "Received {} (msgID {}) on connection {}",
            op.name(),
            message_id,
            self.connection_id
        );

        // While a bind or StartTLS is being processed nothing else may run.
        // During a multi-step SASL bind only further bind requests may.
        let gated = self.is_bind_or_start_tls_in_progress()
            || (self.is_sasl_bind_in_progress() && kind != OperationKind::Bind);
        if gated {
            match kind {
                OperationKind::Unbind => {}
                OperationKind::Abandon => {
                    debug!(
                        "Ignoring abandon (msgID {}) received during a bind on connection {}",
                        message_id, self.connection_id
                    );
                    return Ok(());
                }
                _ => {
                    let text = if self.is_sasl_bind_in_progress() {
                        "A SASL bind is in progress on this connection; only bind requests may be sent until it completes"
                    } else {
                        "A bind or StartTLS operation is in progress on this connection; no other request may be sent until it completes"
                    };
                    self.send_unadmitted_result(
                        message_id,
                        kind,
                        LdapResult::new(ResultCode::CONSTRAINT_VIOLATION, text),
                    );
                    return Ok(());
                }
            }
        }

        let operation = Operation::new(self.connection_id, operation_id, message_id, op, controls)?;
        match kind {
            OperationKind::Abandon => self.process_abandon(operation),
            OperationKind::Unbind => {
                self.disconnect(DisconnectReason::Unbind, false, None);
                Ok(())
            }
            OperationKind::Bind => self.process_bind(operation),
            OperationKind::Extended => self.process_extended(operation),
            _ => self.process_other(operation),
        }
    }

    /// Abandons the target operation. Abandon itself never gets a response.
    fn process_abandon(&self, operation: Operation) -> Result<(), LdapError> {
        if self.is_legacy_client() && !operation.request_controls().is_empty() {
            self.disconnect(
                DisconnectReason::ProtocolError,
                false,
                Some("LDAPv2 clients may not include controls in requests"),
            );
            return Ok(());
        }
        let ProtocolOp::AbandonRequest(target) = operation.request() else {
            return Err(LdapError::Internal("abandon operation without an abandon request".into()));
        };
        let request = CancelRequest::new(
            false,
            format!("The operation was abandoned by abandon request {}", operation.message_id()),
        );
        match self.cancel(*target, &request) {
            CancelOutcome::Requested => self.context.stats.update_abandoned_operation(),
            outcome => debug!(
                "Abandon of msgID {} on connection {} had no effect: {:?}",
                target, self.connection_id, outcome
            ),
        }
        Ok(())
    }

    fn process_bind(&self, operation: Operation) -> Result<(), LdapError> {
        let Some(bind) = operation.bind_request() else {
            return Err(LdapError::Internal("bind operation without a bind request".into()));
        };
        let message_id = operation.message_id();
        let version = bind.version;
        let is_sasl = bind.is_sasl();
        let unknown_auth = matches!(bind.authentication, BindAuthentication::Unknown(_));

        if version == i64::from(LDAP_VERSION_2) || version == i64::from(LDAP_VERSION_3) {
            self.set_ldap_version(version as i32);
        }

        let violation = if version == i64::from(LDAP_VERSION_2) {
            if !self.settings().allow_ldap_v2 {
                Some("LDAPv2 binds are not allowed on this server".to_string())
            } else if !operation.request_controls().is_empty() {
                Some("LDAPv2 clients may not include controls in requests".to_string())
            } else {
                None
            }
        } else if version != i64::from(LDAP_VERSION_3) {
            Some(format!("Protocol version {version} is not supported"))
        } else {
            None
        };
        if let Some(text) = violation {
            self.send_unadmitted_result(
                message_id,
                OperationKind::Bind,
                LdapResult::new(ResultCode::PROTOCOL_ERROR, text.clone()),
            );
            self.disconnect(DisconnectReason::ProtocolError, false, Some(&text));
            return Ok(());
        }

        if unknown_auth {
            self.disconnect(
                DisconnectReason::ProtocolError,
                true,
                Some("The bind request used an invalid authentication type"),
            );
            return Ok(());
        }

        self.set_bind_or_start_tls_in_progress(true);
        if is_sasl {
            self.set_sasl_bind_in_progress(true);
        }
        self.set_anonymous();

        if let Err(e) = self.admit(Arc::new(operation)) {
            self.set_bind_or_start_tls_in_progress(false);
            self.set_sasl_bind_in_progress(false);
            let code = e.result_code();
            self.send_unadmitted_result(message_id, OperationKind::Bind, LdapResult::new(code, e.to_string()));
            if code == ResultCode::PROTOCOL_ERROR {
                self.disconnect(DisconnectReason::ProtocolError, true, Some(&e.to_string()));
            }
        }
        Ok(())
    }

    fn process_extended(&self, operation: Operation) -> Result<(), LdapError> {
        if self.is_legacy_client() {
            self.disconnect(
                DisconnectReason::ProtocolError,
                false,
                Some("Extended operations are not allowed for LDAPv2 clients"),
            );
            return Ok(());
        }
        let message_id = operation.message_id();
        let start_tls = operation.is_start_tls();
        if start_tls {
            self.set_bind_or_start_tls_in_progress(true);
        }
        if let Err(e) = self.admit(Arc::new(operation)) {
            if start_tls {
                self.set_bind_or_start_tls_in_progress(false);
            }
            self.send_unadmitted_result(
                message_id,
                OperationKind::Extended,
                LdapResult::new(e.result_code(), e.to_string()),
            );
        }
        Ok(())
    }

    /// Search, add, delete, modify, modify DN and compare.
    fn process_other(&self, operation: Operation) -> Result<(), LdapError> {
        let message_id = operation.message_id();
        let kind = operation.kind();
        if self.is_legacy_client() && !operation.request_controls().is_empty() {
            let text = "LDAPv2 clients may not include controls in requests";
            self.send_unadmitted_result(
                message_id,
                kind,
                LdapResult::new(ResultCode::PROTOCOL_ERROR, text),
            );
            self.disconnect(DisconnectReason::ProtocolError, false, Some(text));
            return Ok(());
        }
        if let Err(e) = self.admit(Arc::new(operation)) {
            self.send_unadmitted_result(message_id, kind, LdapResult::new(e.result_code(), e.to_string()));
        }
        Ok(())
    }
}
