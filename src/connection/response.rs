// src/connection/response.rs

//! Response delivery: turning an operation's result slot into a response
//! message, adapting it for LDAPv2 clients, and writing it to the channel.

use super::client::ClientConnection;
use crate::core::disconnect::DisconnectReason;
use crate::core::encoder::ResponseEncoder;
use crate::core::operation::{Operation, OperationKind, OperationResult};
use crate::core::protocol::{Control, LdapMessage, LdapResult, ProtocolOp, ResultCode};
use crate::core::LdapError;
use crate::channel::ByteChannel;
use bytes::Bytes;
use tracing::debug;

/// Rewrites a result for an LDAPv2 client, which understands neither the
/// referral result code nor referral URLs.
pub(crate) fn downgrade_for_legacy(result: &mut LdapResult) {
    if result.code == ResultCode::REFERRAL {
        result.code = ResultCode::CONSTRAINT_VIOLATION;
        append_diagnostic(
            &mut result.diagnostic,
            "The referral result code was changed to constraintViolation for an LDAPv2 client",
        );
    }
    if !result.referrals.is_empty() {
        let urls = std::mem::take(&mut result.referrals).join(" ");
        append_diagnostic(&mut result.diagnostic, &format!("Referrals omitted: {urls}"));
    }
}

fn append_diagnostic(diagnostic: &mut String, text: &str) {
    if !diagnostic.is_empty() {
        diagnostic.push_str("  ");
    }
    diagnostic.push_str(text);
}

/// The response op for a request kind. Abandon and unbind have none.
pub(crate) fn response_op(kind: OperationKind, result: LdapResult, slot: &OperationResult) -> Option<ProtocolOp> {
    let op = match kind {
        OperationKind::Bind => ProtocolOp::BindResponse {
            result,
            server_sasl_credentials: slot.server_sasl_credentials.clone(),
        },
        OperationKind::Search => ProtocolOp::SearchResultDone(result),
        OperationKind::Add => ProtocolOp::AddResponse(result),
        OperationKind::Delete => ProtocolOp::DeleteResponse(result),
        OperationKind::Modify => ProtocolOp::ModifyResponse(result),
        OperationKind::ModifyDn => ProtocolOp::ModifyDnResponse(result),
        OperationKind::Compare => ProtocolOp::CompareResponse(result),
        OperationKind::Extended => ProtocolOp::ExtendedResponse {
            result,
            oid: slot.response_oid.clone(),
            value: slot.response_value.clone(),
        },
        OperationKind::Abandon | OperationKind::Unbind => return None,
    };
    Some(op)
}

/// Builds the response message for a finished operation.
///
/// An unset result code becomes `server_error`. LDAPv2 clients never get
/// controls, referrals, or extended responses.
pub(crate) fn build_response(
    operation: &Operation,
    legacy: bool,
    server_error: ResultCode,
) -> Option<LdapMessage> {
    if legacy && operation.kind() == OperationKind::Extended {
        return None;
    }
    let slot = operation.result().clone();
    let mut result = slot.result.clone();
    if result.code == ResultCode::UNDEFINED {
        result.code = server_error;
    }
    let controls = if legacy {
        downgrade_for_legacy(&mut result);
        Vec::new()
    } else {
        slot.response_controls.clone()
    };
    let op = response_op(operation.kind(), result, &slot)?;
    Some(LdapMessage::new(operation.message_id(), op).with_controls(controls))
}

impl ClientConnection {
    /// Sends the response for a finished operation using a pooled encoder.
    pub fn send_response(&self, operation: &Operation) {
        let mut encoder = self.context.encoder_pool.checkout();
        self.send_response_with(operation, &mut encoder);
        self.context.encoder_pool.checkin(encoder);
    }

    /// Sends the response for a finished operation.
    ///
    /// Nothing is sent unless the operation was still tracked: a request is
    /// answered at most once. Responses to operations abandoned without
    /// notification are suppressed.
    pub fn send_response_with(&self, operation: &Operation, encoder: &mut ResponseEncoder) {
        if !self.complete(operation.message_id()) {
            debug!(
                "Not sending a response for {:?} on connection {}: it is no longer in progress",
                operation, self.connection_id
            );
            return;
        }
        operation.mark_completed();

        let suppressed = operation
            .cancel_request()
            .is_some_and(|r| !r.notify_original_requester);
        let server_error = self.settings().server_error_result_code;
        let message = if suppressed {
            debug!("Suppressing the response to abandoned {:?}", operation);
            None
        } else {
            build_response(operation, self.is_legacy_client(), server_error)
        };

        if let Some(message) = &message {
            self.send_ldap_message(message, encoder);
        }

        let code = match operation.result_code() {
            ResultCode::UNDEFINED => server_error,
            code => code,
        };
        self.after_response(operation, code);
    }

    /// Bind and StartTLS bookkeeping once their response is on the wire.
    fn after_response(&self, operation: &Operation, code: ResultCode) {
        match operation.kind() {
            OperationKind::Bind => {
                if code != ResultCode::SUCCESS {
                    self.discard_pending_security();
                }
                self.finish_bind_or_start_tls();
                if code != ResultCode::SASL_BIND_IN_PROGRESS {
                    self.finish_sasl_bind();
                }
                if code == ResultCode::PROTOCOL_ERROR {
                    let diagnostic = operation.result().result.diagnostic.clone();
                    self.disconnect(DisconnectReason::ProtocolError, true, Some(&diagnostic));
                }
            }
            OperationKind::Extended if operation.is_start_tls() => {
                if code != ResultCode::SUCCESS {
                    self.discard_pending_security();
                }
                self.finish_bind_or_start_tls();
            }
            _ => {}
        }
    }

    /// Answers a request that was never admitted.
    pub(super) fn send_unadmitted_result(&self, message_id: i32, kind: OperationKind, mut result: LdapResult) {
        if self.is_legacy_client() {
            if kind == OperationKind::Extended {
                return;
            }
            downgrade_for_legacy(&mut result);
        }
        let Some(op) = response_op(kind, result, &OperationResult::default()) else {
            return;
        };
        let mut encoder = self.context.encoder_pool.checkout();
        self.send_ldap_message(&LdapMessage::new(message_id, op), &mut encoder);
        self.context.encoder_pool.checkin(encoder);
    }

    pub fn send_search_entry(&self, operation: &Operation, entry: Bytes, controls: Vec<Control>) -> bool {
        let mut encoder = self.context.encoder_pool.checkout();
        let sent = self.send_search_entry_with(operation, entry, controls, &mut encoder);
        self.context.encoder_pool.checkin(encoder);
        sent
    }

    pub(crate) fn send_search_entry_with(
        &self,
        operation: &Operation,
        entry: Bytes,
        controls: Vec<Control>,
        encoder: &mut ResponseEncoder,
    ) -> bool {
        let controls = if self.is_legacy_client() { Vec::new() } else { controls };
        let message = LdapMessage::new(operation.message_id(), ProtocolOp::SearchResultEntry(entry))
            .with_controls(controls);
        self.send_ldap_message(&message, encoder)
    }

    /// Returns false without sending anything to an LDAPv2 client, which
    /// cannot receive search references.
    pub fn send_search_reference(&self, operation: &Operation, urls: Vec<String>, controls: Vec<Control>) -> bool {
        let mut encoder = self.context.encoder_pool.checkout();
        let sent = self.send_search_reference_with(operation, urls, controls, &mut encoder);
        self.context.encoder_pool.checkin(encoder);
        sent
    }

    pub(crate) fn send_search_reference_with(
        &self,
        operation: &Operation,
        urls: Vec<String>,
        controls: Vec<Control>,
        encoder: &mut ResponseEncoder,
    ) -> bool {
        if self.is_legacy_client() {
            return false;
        }
        let message = LdapMessage::new(operation.message_id(), ProtocolOp::SearchResultReference(urls))
            .with_controls(controls);
        self.send_ldap_message(&message, encoder)
    }

    /// Returns whether the connection is still valid after the attempt.
    pub fn send_intermediate_response(&self, operation: &Operation, oid: Option<String>, value: Option<Bytes>) -> bool {
        let mut encoder = self.context.encoder_pool.checkout();
        let valid = self.send_intermediate_response_with(operation, oid, value, &mut encoder);
        self.context.encoder_pool.checkin(encoder);
        valid
    }

    pub(crate) fn send_intermediate_response_with(
        &self,
        operation: &Operation,
        oid: Option<String>,
        value: Option<Bytes>,
        encoder: &mut ResponseEncoder,
    ) -> bool {
        let message = LdapMessage::new(
            operation.message_id(),
            ProtocolOp::IntermediateResponse { oid, value },
        );
        self.send_ldap_message(&message, encoder);
        self.is_valid()
    }

    /// Encodes and writes one message. A failed write disconnects the client
    /// without a notice, since the channel is no longer usable.
    pub(super) fn send_ldap_message(&self, message: &LdapMessage, encoder: &mut ResponseEncoder) -> bool {
        let bytes = encoder.encode(message);
        match self.sasl_stage.write(bytes) {
            Ok(_) => {
                self.context.stats.update_message_written();
                debug!(
                    "Sent {} (msgID {}) to connection {}",
                    message.op.name(),
                    message.message_id,
                    self.connection_id
                );
                true
            }
            Err(e) => {
                let reason = match e {
                    LdapError::WriteTimedOut { .. } => DisconnectReason::IoTimeout,
                    _ => DisconnectReason::IoError,
                };
                self.disconnect(reason, false, Some(&e.to_string()));
                false
            }
        }
    }
}
