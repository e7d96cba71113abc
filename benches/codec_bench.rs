// benches/codec_bench.rs

//! Request framing and response encoding benchmarks
//!
//! Measures the per-message cost of the paths every request and response
//! takes through the connection layer.

use bytes::{Bytes, BytesMut};
use criterion::{Criterion, criterion_group, criterion_main};
use ldapgate::core::encoder::EncoderPool;
use ldapgate::core::protocol::{
    BindAuthentication, BindRequest, LdapMessage, LdapMessageCodec, LdapResult, ProtocolOp,
    ResultCode, encode_message,
};
use ldapgate::server::{ReadyQueue, ReadySource};
use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;
use tokio_util::codec::Decoder;

fn bind_message(id: i32) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::BindRequest(BindRequest {
            version: 3,
            name: "cn=Directory Manager".to_string(),
            authentication: BindAuthentication::Simple(Bytes::from_static(b"password")),
        }),
    )
}

fn search_done(id: i32) -> LdapMessage {
    LdapMessage::new(
        id,
        ProtocolOp::SearchResultDone(LdapResult::new(ResultCode::SUCCESS, "")),
    )
}

pub fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    group.bench_function("single_bind", |b| {
        let mut wire = BytesMut::new();
        encode_message(&bind_message(1), &mut wire);
        let wire = wire.freeze();
        let mut codec = LdapMessageCodec::new(5 * 1024 * 1024);
        b.iter(|| {
            let mut buf = BytesMut::from(&wire[..]);
            black_box(codec.decode(&mut buf).unwrap());
        });
    });

    group.bench_function("pipelined_100", |b| {
        let mut wire = BytesMut::new();
        for id in 1..=100 {
            encode_message(&bind_message(id), &mut wire);
        }
        let wire = wire.freeze();
        let mut codec = LdapMessageCodec::new(0);
        b.iter(|| {
            let mut buf = BytesMut::from(&wire[..]);
            while let Some(message) = codec.decode(&mut buf).unwrap() {
                black_box(message);
            }
        });
    });

    group.finish();
}

pub fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    group.bench_function("fresh_buffer", |b| {
        let message = search_done(42);
        b.iter(|| {
            let mut buf = BytesMut::new();
            encode_message(black_box(&message), &mut buf);
            black_box(buf);
        });
    });

    group.bench_function("pooled_encoder", |b| {
        let pool = EncoderPool::new(4096);
        let message = search_done(42);
        b.iter(|| {
            let mut encoder = pool.checkout();
            black_box(encoder.encode(black_box(&message)).len());
            pool.checkin(encoder);
        });
    });

    group.finish();
}

#[derive(Clone)]
struct CountingSource {
    id: u64,
    pending: Rc<Cell<usize>>,
}

impl ReadySource for CountingSource {
    fn source_id(&self) -> u64 {
        self.id
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn element_available(&self) -> bool {
        self.pending.get() > 0
    }

    fn process_next_message(&self) -> bool {
        self.pending.set(self.pending.get() - 1);
        true
    }
}

pub fn bench_ready_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("ready_queue");

    group.bench_function("drain_1000_sources", |b| {
        b.iter(|| {
            let mut queue = ReadyQueue::new();
            for id in 0..1000 {
                queue.push(CountingSource {
                    id,
                    pending: Rc::new(Cell::new((id % 4) as usize + 1)),
                });
            }
            while !queue.is_empty() {
                black_box(queue.service_cycle());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode, bench_ready_queue);
criterion_main!(benches);
