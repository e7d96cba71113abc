// src/channel/tls.rs

//! A TLS security provider built on a `rustls::ServerConnection` driven by
//! hand over a non-blocking inner channel.

use super::{ByteChannel, ReadStatus, SecurityProvider, closed_error};
use crate::core::LdapError;
use bytes::BytesMut;
use parking_lot::Mutex;
use rustls::ServerConnection;
use rustls::pki_types::CertificateDer;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use tracing::debug;

const PLAINTEXT_CHUNK: usize = 16 * 1024;

/// Creates TLS providers for new connections from one server configuration.
#[derive(Clone)]
pub struct TlsProviderFactory {
    config: Arc<rustls::ServerConfig>,
}

impl TlsProviderFactory {
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self { config }
    }

    /// Builds a provider that speaks TLS over `inner`.
    pub fn create(&self, inner: Arc<dyn ByteChannel>) -> Result<Arc<TlsChannel>, LdapError> {
        let session = ServerConnection::new(self.config.clone())?;
        Ok(Arc::new(TlsChannel {
            inner,
            session: Mutex::new(session),
            write_order: Mutex::new(()),
        }))
    }
}

impl std::fmt::Debug for TlsProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsProviderFactory").finish_non_exhaustive()
    }
}

/// A TLS session over an inner byte channel.
///
/// The session lock only covers rustls state and is never held across a
/// socket write. Sealed records reach the inner channel under `write_order`,
/// so they go out in sequence. The request handler's read only ever
/// `try_lock`s `write_order`; whoever holds it drains any records left
/// pending before letting go.
pub struct TlsChannel {
    inner: Arc<dyn ByteChannel>,
    session: Mutex<ServerConnection>,
    write_order: Mutex<()>,
}

impl TlsChannel {
    /// Takes every sealed record out of the session.
    fn take_records(session: &mut ServerConnection) -> Result<Vec<u8>, LdapError> {
        let mut out = Vec::new();
        while session.wants_write() {
            session.write_tls(&mut out)?;
        }
        Ok(out)
    }

    /// Sends pending records unless another thread holds the write order,
    /// in which case that thread sends them before releasing it.
    fn flush_pending(&self) -> Result<(), LdapError> {
        while let Some(order) = self.write_order.try_lock() {
            let records = Self::take_records(&mut self.session.lock())?;
            if !records.is_empty() {
                self.inner.write(&records)?;
            }
            drop(order);
            if !self.session.lock().wants_write() {
                break;
            }
        }
        Ok(())
    }

    /// Moves decrypted application data into `buf`. Returns the number of
    /// bytes moved and whether the peer sent `close_notify`.
    fn drain_plaintext(
        session: &mut ServerConnection,
        buf: &mut BytesMut,
    ) -> Result<(usize, bool), LdapError> {
        let mut chunk = [0u8; PLAINTEXT_CHUNK];
        let mut total = 0;
        loop {
            match session.reader().read(&mut chunk) {
                Ok(0) => return Ok((total, true)),
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok((total, false)),
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok((total, true)),
                Err(e) => return Err(LdapError::Tls(e.to_string())),
            }
        }
    }

    pub fn is_handshaking(&self) -> bool {
        self.session.lock().is_handshaking()
    }

    pub fn cipher_suite_name(&self) -> Option<String> {
        self.session
            .lock()
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
    }
}

impl ByteChannel for TlsChannel {
    fn read(&self, buf: &mut BytesMut) -> Result<ReadStatus, LdapError> {
        let mut raw = BytesMut::new();
        let status = self.inner.read(&mut raw)?;

        let mut total = 0;
        let mut closed = false;
        {
            let mut session = self.session.lock();
            let mut pending = &raw[..];
            while !pending.is_empty() {
                session
                    .read_tls(&mut pending)
                    .map_err(|e| LdapError::Tls(e.to_string()))?;
                if let Err(e) = session.process_new_packets() {
                    drop(session);
                    // Best effort to deliver the alert before failing.
                    let _ = self.flush_pending();
                    return Err(e.into());
                }
                let (n, eof) = Self::drain_plaintext(&mut session, buf)?;
                total += n;
                closed |= eof;
            }
        }
        self.flush_pending()?;

        Ok(match (total, closed || status == ReadStatus::Eof) {
            (0, true) => ReadStatus::Eof,
            (0, false) => ReadStatus::WouldBlock,
            (n, _) => ReadStatus::Data(n),
        })
    }

    fn write(&self, data: &[u8]) -> Result<usize, LdapError> {
        if !self.inner.is_open() {
            return Err(closed_error("TLS channel"));
        }
        let order = self.write_order.lock();
        let mut offset = 0;
        while offset < data.len() {
            let (accepted, records) = {
                let mut session = self.session.lock();
                let accepted = session.writer().write(&data[offset..])?;
                (accepted, Self::take_records(&mut session)?)
            };
            if accepted == 0 && records.is_empty() {
                return Err(LdapError::Tls("the TLS session accepted no data".into()));
            }
            if !records.is_empty() {
                self.inner.write(&records)?;
            }
            offset += accepted;
        }
        drop(order);
        self.flush_pending()?;
        Ok(data.len())
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&self) {
        let order = self.write_order.lock();
        let records = {
            let mut session = self.session.lock();
            session.send_close_notify();
            Self::take_records(&mut session)
        };
        let sent = records.and_then(|records| {
            if records.is_empty() {
                Ok(0)
            } else {
                self.inner.write(&records)
            }
        });
        if let Err(e) = sent {
            debug!("Failed to send TLS close_notify: {}", e);
        }
        drop(order);
        self.inner.close();
    }
}

impl SecurityProvider for TlsChannel {
    fn name(&self) -> &str {
        "TLS"
    }

    fn ssf(&self) -> u32 {
        match self.cipher_suite_name() {
            Some(name) => cipher_strength(&name),
            None => 0,
        }
    }

    fn is_secure(&self) -> bool {
        true
    }

    fn peer_certificates(&self) -> Option<Vec<CertificateDer<'static>>> {
        self.session
            .lock()
            .peer_certificates()
            .map(|chain| chain.to_vec())
    }
}

/// Derives a security strength factor from a cipher suite name.
pub(crate) fn cipher_strength(suite: &str) -> u32 {
    if suite.contains("AES_256") || suite.contains("CHACHA20") {
        256
    } else if suite.contains("AES_128") {
        128
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
    use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig};
    use std::time::{Duration, Instant};

    /// An inner channel backed by memory whose writes can be made slow.
    #[derive(Default)]
    struct MemoryChannel {
        incoming: Mutex<BytesMut>,
        outgoing: Mutex<Vec<u8>>,
        write_delay: Mutex<Duration>,
    }

    impl ByteChannel for MemoryChannel {
        fn read(&self, buf: &mut BytesMut) -> Result<ReadStatus, LdapError> {
            let mut incoming = self.incoming.lock();
            if incoming.is_empty() {
                return Ok(ReadStatus::WouldBlock);
            }
            let n = incoming.len();
            buf.extend_from_slice(&incoming.split());
            Ok(ReadStatus::Data(n))
        }

        fn write(&self, data: &[u8]) -> Result<usize, LdapError> {
            let delay = *self.write_delay.lock();
            std::thread::sleep(delay);
            self.outgoing.lock().extend_from_slice(data);
            Ok(data.len())
        }

        fn is_open(&self) -> bool {
            true
        }

        fn close(&self) {}
    }

    fn configs() -> (Arc<ServerConfig>, Arc<ClientConfig>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let cert = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

        let server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.clone()], key)
            .unwrap();
        let mut roots = RootCertStore::empty();
        roots.add(cert).unwrap();
        let client = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        (Arc::new(server), Arc::new(client))
    }

    /// Completes a handshake between a client session and a `TlsChannel`
    /// over `pipe`.
    fn handshake() -> (Arc<TlsChannel>, ClientConnection, Arc<MemoryChannel>) {
        let (server_config, client_config) = configs();
        let pipe = Arc::new(MemoryChannel::default());
        let server = TlsProviderFactory::new(server_config)
            .create(pipe.clone())
            .unwrap();
        let mut client =
            ClientConnection::new(client_config, ServerName::try_from("localhost").unwrap())
                .unwrap();

        for _ in 0..10 {
            let mut hello = Vec::new();
            while client.wants_write() {
                client.write_tls(&mut hello).unwrap();
            }
            pipe.incoming.lock().extend_from_slice(&hello);
            server.read(&mut BytesMut::new()).unwrap();

            let reply = std::mem::take(&mut *pipe.outgoing.lock());
            client.read_tls(&mut &reply[..]).unwrap();
            client.process_new_packets().unwrap();
            if !client.is_handshaking() && !server.is_handshaking() {
                break;
            }
        }
        assert!(!server.is_handshaking());
        (server, client, pipe)
    }

    #[test]
    fn strength_from_suite_name() {
        assert_eq!(cipher_strength("TLS13_AES_256_GCM_SHA384"), 256);
        assert_eq!(cipher_strength("TLS13_CHACHA20_POLY1305_SHA256"), 256);
        assert_eq!(cipher_strength("TLS13_AES_128_GCM_SHA256"), 128);
        assert_eq!(cipher_strength("TLS_NULL_WITH_NULL_NULL"), 0);
    }

    #[test]
    fn application_data_round_trips() {
        let (server, mut client, pipe) = handshake();
        assert!(server.ssf() >= 128);

        client.writer().write_all(b"request").unwrap();
        let mut records = Vec::new();
        while client.wants_write() {
            client.write_tls(&mut records).unwrap();
        }
        pipe.incoming.lock().extend_from_slice(&records);
        let mut plain = BytesMut::new();
        assert_eq!(server.read(&mut plain).unwrap(), ReadStatus::Data(7));
        assert_eq!(&plain[..], b"request");

        assert_eq!(server.write(b"response").unwrap(), 8);
        let sealed = std::mem::take(&mut *pipe.outgoing.lock());
        client.read_tls(&mut &sealed[..]).unwrap();
        client.process_new_packets().unwrap();
        let mut out = [0u8; 16];
        let n = client.reader().read(&mut out).unwrap();
        assert_eq!(&out[..n], b"response");
    }

    #[test]
    fn large_writes_are_split_into_records() {
        let (server, mut client, pipe) = handshake();
        let payload = vec![0xA5u8; 200 * 1024];
        assert_eq!(server.write(&payload).unwrap(), payload.len());

        let sealed = std::mem::take(&mut *pipe.outgoing.lock());
        let mut received = Vec::new();
        let mut pending = &sealed[..];
        while !pending.is_empty() {
            client.read_tls(&mut pending).unwrap();
            client.process_new_packets().unwrap();
            let mut chunk = [0u8; 16 * 1024];
            while let Ok(n) = client.reader().read(&mut chunk) {
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&chunk[..n]);
            }
        }
        assert_eq!(received, payload);
    }

    #[test]
    fn read_is_not_blocked_by_a_slow_writer() {
        let (server, _client, pipe) = handshake();
        *pipe.write_delay.lock() = Duration::from_secs(2);

        let writer = {
            let server = server.clone();
            std::thread::spawn(move || server.write(b"a large search result"))
        };
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        let status = server.read(&mut BytesMut::new()).unwrap();
        let elapsed = started.elapsed();
        assert_eq!(status, ReadStatus::WouldBlock);
        assert!(
            elapsed < Duration::from_millis(500),
            "read waited {elapsed:?} behind a blocked write"
        );

        assert!(writer.join().unwrap().is_ok());
    }
}
