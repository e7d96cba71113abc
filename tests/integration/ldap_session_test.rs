// tests/integration/ldap_session_test.rs

//! End-to-end tests of client sessions over real loopback sockets.

use super::test_helpers::*;
use bytes::Bytes;
use ldapgate::config::{Config, ListenerSettings};
use ldapgate::core::disconnect::DisconnectReason;
use ldapgate::core::executor::BasicExecutor;
use ldapgate::core::operation::OperationKind;
use ldapgate::core::protocol::{LdapMessage, OID_START_TLS, ProtocolOp, ResultCode};
use ldapgate::core::state::DisconnectListener;
use ldapgate::core::SecurityNegotiationError;
use ldapgate::core::tasks::idle_reaper::IdleConnectionReaper;
use ldapgate::connection::ClientConnection;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_anonymous_bind_succeeds() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    let response = client.bind_anonymous();
    assert_eq!(response.message_id, 1);
    assert!(matches!(response.op, ProtocolOp::BindResponse { .. }));
    assert_eq!(result_code(&response), ResultCode::SUCCESS);
    assert!(!client.connection().session().is_authenticated());
    assert!(client.connection().is_valid());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_bind_keeps_connection_usable() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    client.request(bind_request(3, "cn=admin", "secret"));
    assert_eq!(result_code(&client.recv()), ResultCode::INVALID_CREDENTIALS);

    client.request(bind_request(3, "cn=admin", ""));
    assert_eq!(result_code(&client.recv()), ResultCode::UNWILLING_TO_PERFORM);

    let id = client.request(search_request());
    let response = client.recv();
    assert_eq!(response.message_id, id);
    assert_eq!(result_code(&response), ResultCode::UNWILLING_TO_PERFORM);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sasl_bind_failure_clears_sasl_state() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    client.request(sasl_bind_request("EXTERNAL"));
    assert_eq!(result_code(&client.recv()), ResultCode::AUTH_METHOD_NOT_SUPPORTED);
    assert!(!client.connection().is_sasl_bind_in_progress());

    client.request(search_request());
    assert_eq!(result_code(&client.recv()), ResultCode::UNWILLING_TO_PERFORM);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_extended_operation_is_rejected() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    client.request(extended_request("1.2.3.4.5"));
    let response = client.recv();
    assert!(matches!(response.op, ProtocolOp::ExtendedResponse { .. }));
    assert_eq!(result_code(&response), ResultCode::PROTOCOL_ERROR);
    assert!(client.connection().is_valid());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_tls_refused_when_not_allowed() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    client.request(extended_request(OID_START_TLS));
    assert_eq!(result_code(&client.recv()), ResultCode::UNAVAILABLE);
    assert!(!client.connection().is_secure());

    // Reading resumes once the StartTLS response has been sent.
    client.request(search_request());
    assert_eq!(result_code(&client.recv()), ResultCode::UNWILLING_TO_PERFORM);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_tls_without_key_material() {
    let settings = ListenerSettings {
        allow_start_tls: true,
        ..ListenerSettings::default()
    };
    let server = TestServer::with_settings(settings).await;
    let mut client = server.connect();

    client.request(extended_request(OID_START_TLS));
    assert_eq!(result_code(&client.recv()), ResultCode::UNAVAILABLE);
    assert!(client.connection().security_stage().is_plaintext());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_tls_secures_later_traffic() {
    let tls = tls_fixture();
    let settings = ListenerSettings {
        allow_start_tls: true,
        ..ListenerSettings::default()
    };
    let server = TestServer::with_tls(settings, tls.server).await;
    let mut client = server.connect();

    // The StartTLS response itself travels in the clear.
    let id = client.request(extended_request(OID_START_TLS));
    let response = client.recv();
    assert_eq!(response.message_id, id);
    assert_eq!(result_code(&response), ResultCode::SUCCESS);
    match &response.op {
        ProtocolOp::ExtendedResponse { oid, .. } => assert_eq!(oid.as_deref(), Some(OID_START_TLS)),
        other => panic!("unexpected {other:?}"),
    }
    let connection = client.connection().clone();
    assert!(wait_for(Duration::from_secs(2), || connection.tls().is_active()));

    client.start_tls(tls.client.clone());
    let bind = client.bind_anonymous();
    assert_eq!(bind.message_id, id + 1);
    assert_eq!(result_code(&bind), ResultCode::SUCCESS);

    let search = client.request(search_request());
    let response = client.recv();
    assert_eq!(response.message_id, search);
    assert_eq!(result_code(&response), ResultCode::UNWILLING_TO_PERFORM);

    assert!(connection.is_secure());
    assert!(connection.tls().security_strength_factor() >= 128);
    assert!(connection.tls().certificate_chain().is_none());
    assert!(connection.monitor_summary().contains("security=\"TLS\""));
    assert_eq!(
        connection.tls().prepare_tls(),
        Err(SecurityNegotiationError::TlsAlreadyActive)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ldaps_connection_is_secure_from_the_start() {
    let tls = tls_fixture();
    let settings = ListenerSettings {
        use_ssl: true,
        ..ListenerSettings::default()
    };
    let server = TestServer::with_tls(settings, tls.server).await;
    let mut client = server.connect();
    let connection = client.connection().clone();
    assert!(connection.tls().is_active());
    assert!(connection.is_secure());

    client.start_tls(tls.client.clone());
    assert!(client.is_tls());
    assert_eq!(result_code(&client.bind_anonymous()), ResultCode::SUCCESS);

    client.request(extended_request(OID_START_TLS));
    assert_eq!(result_code(&client.recv()), ResultCode::OPERATIONS_ERROR);
    assert!(connection.is_valid());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unbind_closes_connection_without_notice() {
    let server = TestServer::new().await;
    let mut client = server.connect();
    client.bind_anonymous();

    client.request(ProtocolOp::UnbindRequest);
    assert!(client.recv_until_closed().is_empty());
    assert!(wait_for(Duration::from_secs(2), || server.context.connection_count() == 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_request_gets_notice_of_disconnection() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    // An OCTET STRING where an LDAPMessage SEQUENCE is expected.
    client.send_raw(&[0x04, 0x01, 0x00]);
    let messages = client.recv_until_closed();
    assert_eq!(messages.len(), 1);
    assert_eq!(notice_code(&messages[0]), Some(ResultCode::PROTOCOL_ERROR));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_response_op_from_client_is_a_protocol_error() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    client.request(ProtocolOp::DeleteResponse(Default::default()));
    let messages = client.recv_until_closed();
    assert_eq!(messages.len(), 1);
    assert_eq!(notice_code(&messages[0]), Some(ResultCode::PROTOCOL_ERROR));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_request_is_rejected() {
    let settings = ListenerSettings {
        max_request_size: 64,
        ..ListenerSettings::default()
    };
    let server = TestServer::with_settings(settings).await;
    let mut client = server.connect();

    client.request(ProtocolOp::SearchRequest(Bytes::from(vec![0u8; 200])));
    let messages = client.recv_until_closed();
    assert_eq!(messages.len(), 1);
    assert_eq!(notice_code(&messages[0]), Some(ResultCode::ADMIN_LIMIT_EXCEEDED));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipelined_requests_are_all_answered() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    let batch: Vec<LdapMessage> = (1..=20)
        .map(|id| LdapMessage::new(id, search_request()))
        .collect();
    client.send_batch(&batch);

    let mut answered = HashSet::new();
    for _ in 0..20 {
        let response = client.recv();
        assert_eq!(result_code(&response), ResultCode::UNWILLING_TO_PERFORM);
        assert!(answered.insert(response.message_id), "duplicate response");
    }
    assert_eq!(answered, (1..=20).collect::<HashSet<i32>>());
    assert_eq!(client.connection().number_of_operations(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_requests_are_refused_while_bind_in_progress() {
    let executor = DelayingExecutor::for_kind(OperationKind::Bind, Duration::from_millis(300));
    let server = TestServer::with_executor(ListenerSettings::default(), executor).await;
    let mut client = server.connect();

    client.send_batch(&[
        LdapMessage::new(1, bind_request(3, "", "")),
        LdapMessage::new(2, search_request()),
    ]);

    let first = client.recv();
    assert_eq!(first.message_id, 2);
    assert_eq!(result_code(&first), ResultCode::CONSTRAINT_VIOLATION);

    let second = client.recv();
    assert_eq!(second.message_id, 1);
    assert_eq!(result_code(&second), ResultCode::SUCCESS);

    client.send(&LdapMessage::new(3, search_request()));
    assert_eq!(result_code(&client.recv()), ResultCode::UNWILLING_TO_PERFORM);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_operation_gets_no_response() {
    let executor = DelayingExecutor::for_message(1, Duration::from_millis(300));
    let server = TestServer::with_executor(ListenerSettings::default(), executor).await;
    let mut client = server.connect();

    client.send(&LdapMessage::new(1, search_request()));
    client.send(&LdapMessage::new(2, ProtocolOp::AbandonRequest(1)));
    client.send(&LdapMessage::new(3, search_request()));

    let response = client.recv();
    assert_eq!(response.message_id, 3);

    assert!(wait_for(Duration::from_secs(2), || {
        client.connection().operations_in_progress().is_empty()
    }));
    assert_eq!(server.context.stats.snapshot().abandoned_operations, 1);

    // The next response on the wire belongs to a new request, not to msgID 1.
    client.send(&LdapMessage::new(4, search_request()));
    assert_eq!(client.recv().message_id, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandon_of_unknown_message_is_ignored() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    client.request(ProtocolOp::AbandonRequest(42));
    let id = client.request(search_request());
    assert_eq!(client.recv().message_id, id);
    assert_eq!(server.context.stats.snapshot().abandoned_operations, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ldap_v2_bind_refused_by_default() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    client.request(bind_request(2, "", ""));
    let response = client.recv();
    assert_eq!(result_code(&response), ResultCode::PROTOCOL_ERROR);
    assert!(client.recv_until_closed().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unsupported_protocol_version_is_refused() {
    let server = TestServer::new().await;
    let mut client = server.connect();

    client.request(bind_request(4, "", ""));
    assert_eq!(result_code(&client.recv()), ResultCode::PROTOCOL_ERROR);
    assert!(client.recv_until_closed().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ldap_v2_client_extended_request_closes_silently() {
    let settings = ListenerSettings {
        allow_ldap_v2: true,
        ..ListenerSettings::default()
    };
    let server = TestServer::with_settings(settings).await;
    let mut client = server.connect();

    client.request(bind_request(2, "", ""));
    assert_eq!(result_code(&client.recv()), ResultCode::SUCCESS);
    assert!(client.connection().is_legacy_client());

    client.request(extended_request("1.2.3.4"));
    assert!(client.recv_until_closed().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_connections_are_reaped() {
    let server = TestServer::new().await;
    let mut client = server.connect();
    client.bind_anonymous();

    std::thread::sleep(Duration::from_millis(50));
    let reaper = IdleConnectionReaper::new(server.context.clone());
    assert_eq!(reaper.reap(Duration::from_millis(10)), 1);

    let messages = client.recv_until_closed();
    assert_eq!(messages.len(), 1);
    assert_eq!(notice_code(&messages[0]), Some(ResultCode::ADMIN_LIMIT_EXCEEDED));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handler_shutdown_notifies_clients() {
    let server = TestServer::new().await;
    let mut client = server.connect();
    client.bind_anonymous();

    server.handler.shutdown();

    let messages = client.recv_until_closed();
    assert_eq!(messages.len(), 1);
    assert_eq!(notice_code(&messages[0]), Some(ResultCode::UNAVAILABLE));
    assert!(!server.handler.register_client(client.connection().clone()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_limit_rejects_extra_connections() {
    let config = Config {
        max_clients: 1,
        ..Config::default()
    };
    let server = TestServer::with_config(config, Arc::new(BasicExecutor)).await;
    let _first = server.connect();

    let (stream, connection) = server.try_connect();
    assert!(connection.is_none());
    let mut rejected = TestClient::new(stream, None);
    let messages = rejected.recv_until_closed();
    assert_eq!(messages.len(), 1);
    assert_eq!(notice_code(&messages[0]), Some(ResultCode::CONSTRAINT_VIOLATION));
    assert_eq!(server.context.connection_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_work_queue_answers_busy() {
    let mut config = Config::default();
    config.work_queue.max_capacity = 1;
    let executor = DelayingExecutor::for_message(1, Duration::from_millis(300));
    let server = TestServer::with_config(config, executor).await;
    let mut client = server.connect();

    client.send_batch(&[
        LdapMessage::new(1, search_request()),
        LdapMessage::new(2, search_request()),
    ]);

    let first = client.recv();
    assert_eq!(first.message_id, 2);
    assert_eq!(result_code(&first), ResultCode::BUSY);
    let second = client.recv();
    assert_eq!(second.message_id, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_admin_connector_executes_inline() {
    let settings = ListenerSettings {
        admin_connector: true,
        ..ListenerSettings::default()
    };
    let server = TestServer::with_settings(settings).await;
    let mut client = server.connect();

    assert_eq!(result_code(&client.bind_anonymous()), ResultCode::SUCCESS);
    client.request(search_request());
    assert_eq!(result_code(&client.recv()), ResultCode::UNWILLING_TO_PERFORM);
}

struct RecordingListener {
    reasons: Mutex<Vec<DisconnectReason>>,
}

impl DisconnectListener for RecordingListener {
    fn connection_closed(&self, _: &ClientConnection, reason: DisconnectReason, _: Option<&str>) {
        self.reasons.lock().push(reason);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_listeners_see_the_reason() {
    let server = TestServer::new().await;
    let listener = Arc::new(RecordingListener {
        reasons: Mutex::new(Vec::new()),
    });
    server.context.add_disconnect_listener(listener.clone());

    let mut client = server.connect();
    client.request(ProtocolOp::UnbindRequest);
    client.recv_until_closed();

    assert!(wait_for(Duration::from_secs(2), || !listener.reasons.lock().is_empty()));
    assert_eq!(*listener.reasons.lock(), vec![DisconnectReason::Unbind]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_close_is_detected() {
    let server = TestServer::new().await;
    let client = server.connect();
    let connection = client.connection().clone();
    assert_eq!(server.context.connection_count(), 1);

    drop(client);
    assert!(wait_for(Duration::from_secs(2), || server.context.connection_count() == 0));
    assert!(!connection.is_valid());
    assert_eq!(server.context.stats.snapshot().connections_closed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_summary_describes_the_connection() {
    let server = TestServer::new().await;
    let mut client = server.connect();
    client.bind_anonymous();

    assert!(wait_for(Duration::from_secs(2), || server.handler.connections().len() == 1));
    let summary = client.connection().monitor_summary();
    assert!(summary.contains(&format!("connID=\"{}\"", client.connection().connection_id())));
    assert!(summary.contains("ldapVersion=\"3\""));
    assert!(summary.contains("security=\"none\""));
    assert!(summary.contains("opsInProgress=\"0\""));
}
