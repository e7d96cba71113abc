// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use bytes::{Bytes, BytesMut};
use ldapgate::channel::TlsProviderFactory;
use ldapgate::config::{Config, ListenerSettings};
use ldapgate::connection::ClientConnection;
use ldapgate::core::executor::BasicExecutor;
use ldapgate::core::operation::{Operation, OperationKind};
use ldapgate::core::protocol::{
    BindAuthentication, BindRequest, LdapMessage, LdapMessageCodec, OID_NOTICE_OF_DISCONNECTION,
    ProtocolOp, ResultCode, encode_message,
};
use ldapgate::core::state::ServerContext;
use ldapgate::core::tasks::finalizer::ConnectionFinalizer;
use ldapgate::core::workqueue::{self, ExecutionContext, OperationExecutor};
use ldapgate::server::{RequestHandler, accept_client};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection as TlsClientSession, RootCertStore, ServerConfig};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::codec::Decoder;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, reload};

const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// TestServer runs a complete connection layer in-process: a server context,
/// one request handler thread, the finalizer task, and a loopback listener.
pub struct TestServer {
    pub context: Arc<ServerContext>,
    pub handler: RequestHandler,
    listener: TcpListener,
    shutdown_tx: broadcast::Sender<()>,
}

impl TestServer {
    /// Creates a test server with default listener settings.
    pub async fn new() -> Self {
        Self::with_settings(ListenerSettings::default()).await
    }

    pub async fn with_settings(settings: ListenerSettings) -> Self {
        Self::with_executor(settings, Arc::new(BasicExecutor)).await
    }

    pub async fn with_executor(settings: ListenerSettings, executor: Arc<dyn OperationExecutor>) -> Self {
        let config = Config {
            listener: settings,
            ..Config::default()
        };
        Self::with_config(config, executor).await
    }

    /// Creates a test server whose listener has TLS key material.
    pub async fn with_tls(settings: ListenerSettings, tls: TlsProviderFactory) -> Self {
        let config = Config {
            listener: settings,
            ..Config::default()
        };
        Self::build(config, Arc::new(BasicExecutor), Some(tls)).await
    }

    pub async fn with_config(config: Config, executor: Arc<dyn OperationExecutor>) -> Self {
        Self::build(config, executor, None).await
    }

    async fn build(
        config: Config,
        executor: Arc<dyn OperationExecutor>,
        tls: Option<TlsProviderFactory>,
    ) -> Self {
        // Set up minimal tracing for tests
        let env_filter = EnvFilter::new("warn");
        let (filter, reload_handle) = reload::Layer::new(env_filter);

        // Initialize tracing (ignore error if already initialized)
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();

        let work_queue =
            workqueue::for_listener(&config.listener, config.work_queue.max_capacity, executor)
                .expect("Failed to create the work queue");
        let init = ServerContext::initialize(&config, work_queue, tls, Some(Arc::new(reload_handle)));

        let (shutdown_tx, _) = broadcast::channel(1);
        let finalizer = ConnectionFinalizer::new(init.finalizer_rx);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { finalizer.run(shutdown_rx).await });

        let handler = RequestHandler::start(0).expect("Failed to start the request handler");
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind the test listener");

        Self {
            context: init.context,
            handler,
            listener,
            shutdown_tx,
        }
    }

    /// Opens a client socket and accepts it on the server side without
    /// handing it to the request handler.
    pub fn try_connect(&self) -> (TcpStream, Option<Arc<ClientConnection>>) {
        let addr = self.listener.local_addr().expect("listener address");
        let client = TcpStream::connect(addr).expect("Failed to connect");
        let (socket, _) = self.listener.accept().expect("Failed to accept");
        let connection = accept_client(&self.context, socket).expect("Failed to set up the connection");
        (client, connection)
    }

    /// Connects a client and registers it with the request handler.
    pub fn connect(&self) -> TestClient {
        let (stream, connection) = self.try_connect();
        let connection = connection.expect("The connection was rejected");
        assert!(self.handler.register_client(connection.clone()));
        TestClient::new(stream, Some(connection))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handler.shutdown();
        let _ = self.shutdown_tx.send(());
    }
}

/// A blocking LDAP client that speaks raw BER over a loopback socket.
pub struct TestClient {
    stream: TcpStream,
    tls: Option<TlsClientSession>,
    buffer: BytesMut,
    codec: LdapMessageCodec,
    next_message_id: i32,
    pub connection: Option<Arc<ClientConnection>>,
}

impl TestClient {
    pub fn new(stream: TcpStream, connection: Option<Arc<ClientConnection>>) -> Self {
        stream
            .set_read_timeout(Some(CLIENT_READ_TIMEOUT))
            .expect("Failed to set the read timeout");
        Self {
            stream,
            tls: None,
            buffer: BytesMut::new(),
            codec: LdapMessageCodec::new(0),
            next_message_id: 1,
            connection,
        }
    }

    pub fn connection(&self) -> &Arc<ClientConnection> {
        self.connection.as_ref().expect("no server-side connection")
    }

    /// Sends a request with the next message ID and returns that ID.
    pub fn request(&mut self, op: ProtocolOp) -> i32 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        self.send(&LdapMessage::new(id, op));
        id
    }

    pub fn send(&mut self, message: &LdapMessage) {
        self.send_batch(std::slice::from_ref(message));
    }

    /// Writes several messages with a single write.
    pub fn send_batch(&mut self, messages: &[LdapMessage]) {
        let mut buf = BytesMut::new();
        for message in messages {
            encode_message(message, &mut buf);
        }
        self.send_raw(&buf);
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        let written = match &mut self.tls {
            Some(tls) => rustls::Stream::new(tls, &mut self.stream).write_all(bytes),
            None => self.stream.write_all(bytes),
        };
        written.expect("Failed to write");
    }

    fn read_chunk(&mut self, chunk: &mut [u8]) -> io::Result<usize> {
        match &mut self.tls {
            Some(tls) => rustls::Stream::new(tls, &mut self.stream).read(chunk),
            None => self.stream.read(chunk),
        }
    }

    /// Speaks TLS from here on. The handshake runs with the next write.
    pub fn start_tls(&mut self, config: Arc<ClientConfig>) {
        assert!(self.buffer.is_empty(), "plaintext left unread before TLS");
        let name = ServerName::try_from("localhost").expect("valid server name");
        self.tls = Some(TlsClientSession::new(config, name).expect("Failed to start TLS"));
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Reads the next message, panicking if the server closes the connection.
    pub fn recv(&mut self) -> LdapMessage {
        match self.try_recv() {
            Some(message) => message,
            None => panic!("The server closed the connection"),
        }
    }

    /// Reads the next message, or `None` once the server has closed the
    /// connection.
    pub fn try_recv(&mut self) -> Option<LdapMessage> {
        loop {
            if let Some(message) = self.codec.decode(&mut self.buffer).expect("Failed to decode") {
                return Some(message);
            }
            let mut chunk = [0u8; 4096];
            match self.read_chunk(&mut chunk) {
                Ok(0) => return None,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::ConnectionReset => return None,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return None,
                Err(e) => panic!("Read failed: {e}"),
            }
        }
    }

    /// Reads every remaining message until the server closes the connection.
    pub fn recv_until_closed(&mut self) -> Vec<LdapMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn bind_anonymous(&mut self) -> LdapMessage {
        self.request(bind_request(3, "", ""));
        self.recv()
    }
}

/// Server and client TLS configurations around a fresh self-signed
/// certificate for `localhost`.
pub struct TlsFixture {
    pub server: TlsProviderFactory,
    pub client: Arc<ClientConfig>,
}

pub fn tls_fixture() -> TlsFixture {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".into()])
        .expect("Failed to generate a certificate");
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.clone()], key)
        .expect("Failed to build the server TLS config");
    let mut roots = RootCertStore::empty();
    roots.add(cert).expect("Failed to trust the certificate");
    let client = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    TlsFixture {
        server: TlsProviderFactory::new(Arc::new(server)),
        client: Arc::new(client),
    }
}

pub fn bind_request(version: i64, name: &str, password: &str) -> ProtocolOp {
    ProtocolOp::BindRequest(BindRequest {
        version,
        name: name.to_string(),
        authentication: BindAuthentication::Simple(Bytes::copy_from_slice(password.as_bytes())),
    })
}

pub fn sasl_bind_request(mechanism: &str) -> ProtocolOp {
    ProtocolOp::BindRequest(BindRequest {
        version: 3,
        name: String::new(),
        authentication: BindAuthentication::Sasl {
            mechanism: mechanism.to_string(),
            credentials: None,
        },
    })
}

pub fn search_request() -> ProtocolOp {
    ProtocolOp::SearchRequest(Bytes::from_static(b"\x04\x00\x0a\x01\x00"))
}

pub fn extended_request(oid: &str) -> ProtocolOp {
    ProtocolOp::ExtendedRequest {
        oid: oid.to_string(),
        value: None,
    }
}

/// The result code of an unsolicited notice of disconnection, if `message`
/// is one.
pub fn notice_code(message: &LdapMessage) -> Option<ResultCode> {
    match &message.op {
        ProtocolOp::ExtendedResponse { result, oid, .. }
            if message.message_id == 0 && oid.as_deref() == Some(OID_NOTICE_OF_DISCONNECTION) =>
        {
            Some(result.code)
        }
        _ => None,
    }
}

pub fn result_code(message: &LdapMessage) -> ResultCode {
    match &message.op {
        ProtocolOp::BindResponse { result, .. } | ProtocolOp::ExtendedResponse { result, .. } => result.code,
        op => op.result().map(|r| r.code).expect("message carries no result"),
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Delegates to `BasicExecutor` after sleeping for the configured requests.
pub struct DelayingExecutor {
    pub delay: Duration,
    pub delayed_kind: Option<OperationKind>,
    pub delayed_message_id: Option<i32>,
}

impl DelayingExecutor {
    pub fn for_kind(kind: OperationKind, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            delayed_kind: Some(kind),
            delayed_message_id: None,
        })
    }

    pub fn for_message(message_id: i32, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            delayed_kind: None,
            delayed_message_id: Some(message_id),
        })
    }
}

impl OperationExecutor for DelayingExecutor {
    fn execute(&self, ctx: &mut ExecutionContext, operation: &Operation) {
        let delayed = self.delayed_kind == Some(operation.kind())
            || self.delayed_message_id == Some(operation.message_id());
        if delayed {
            std::thread::sleep(self.delay);
        }
        BasicExecutor.execute(ctx, operation);
    }
}
