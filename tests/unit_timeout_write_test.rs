// tests/unit_timeout_write_test.rs

use bytes::BytesMut;
use ldapgate::channel::{
    ByteChannel, DEFAULT_MAX_BLOCKED_WRITE_TIME, ReadStatus, RedirectingChannel,
    TimeoutWriteChannel,
};
use ldapgate::core::LdapError;
use ldapgate::core::state::LdapStatistics;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Returns the client end and a server-side channel over a loopback socket.
fn socket_pair(
    max_blocked_write_time: Duration,
    stats: Option<Arc<LdapStatistics>>,
) -> (TcpStream, TimeoutWriteChannel) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    server.set_nonblocking(true).unwrap();
    let stream = mio::net::TcpStream::from_std(server);
    (
        client,
        TimeoutWriteChannel::new(stream, max_blocked_write_time, stats),
    )
}

fn read_until(channel: &dyn ByteChannel, buf: &mut BytesMut, want: usize) -> ReadStatus {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = channel.read(buf).unwrap();
        if buf.len() >= want || status == ReadStatus::Eof || Instant::now() > deadline {
            return status;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_zero_write_time_selects_default() {
    let (_client, channel) = socket_pair(Duration::ZERO, None);
    assert_eq!(channel.max_blocked_write_time(), DEFAULT_MAX_BLOCKED_WRITE_TIME);
}

#[test]
fn test_read_is_non_blocking() {
    let (mut client, channel) = socket_pair(Duration::from_secs(1), None);
    let mut buf = BytesMut::new();
    assert_eq!(channel.read(&mut buf).unwrap(), ReadStatus::WouldBlock);

    client.write_all(b"hello").unwrap();
    read_until(&channel, &mut buf, 5);
    assert_eq!(&buf[..], b"hello");

    drop(client);
    assert_eq!(read_until(&channel, &mut buf, usize::MAX), ReadStatus::Eof);
}

#[test]
fn test_write_reaches_peer_and_counts_bytes() {
    let stats = Arc::new(LdapStatistics::new(true));
    let (mut client, channel) = socket_pair(Duration::from_secs(1), Some(stats.clone()));

    assert_eq!(channel.write(b"response").unwrap(), 8);
    let mut received = [0u8; 8];
    client.read_exact(&mut received).unwrap();
    assert_eq!(&received, b"response");
    assert_eq!(stats.snapshot().bytes_written, 8);
}

#[test]
fn test_blocked_write_times_out_and_closes() {
    let timeout = Duration::from_millis(200);
    let (_client, channel) = socket_pair(timeout, None);

    // The peer never reads, so the socket buffers eventually fill.
    let chunk = vec![0u8; 1024 * 1024];
    let started = Instant::now();
    let err = loop {
        match channel.write(&chunk) {
            Ok(_) => assert!(started.elapsed() < Duration::from_secs(30)),
            Err(e) => break e,
        }
    };

    assert_eq!(err, LdapError::WriteTimedOut { timeout_ms: 200 });
    assert!(err.is_channel_closed());
    assert!(!channel.is_open());
    assert!(channel.write(b"more").is_err());
    assert!(channel.read(&mut BytesMut::new()).is_err());
}

#[test]
fn test_close_is_idempotent() {
    let (mut client, channel) = socket_pair(Duration::from_secs(1), None);
    channel.close();
    channel.close();
    assert!(!channel.is_open());

    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_redirecting_channel_passes_through_until_promoted() {
    let (mut client, channel) = socket_pair(Duration::from_secs(1), None);
    let redirect = RedirectingChannel::new(Arc::new(channel));
    assert!(redirect.stage().is_plaintext());
    assert!(!redirect.stage().is_secure());

    redirect.write(b"abc").unwrap();
    let mut received = [0u8; 3];
    client.read_exact(&mut received).unwrap();
    assert_eq!(&received, b"abc");

    client.write_all(b"xyz").unwrap();
    let mut buf = BytesMut::new();
    read_until(&redirect, &mut buf, 3);
    assert_eq!(&buf[..], b"xyz");

    redirect.close();
    assert!(!redirect.inner().is_open());
}
