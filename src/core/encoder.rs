// src/core/encoder.rs

//! Reusable response-encoding scratch buffers.
//!
//! Each worker checks an encoder out of the pool for the duration of one
//! operation, so buffers are reused across operations without being shared
//! between threads or kept across a connection boundary.

use crate::core::protocol::{LdapMessage, encode_message};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Upper bound on the number of idle encoders kept by a pool.
const MAX_POOLED_ENCODERS: usize = 64;

/// An encoder whose buffer grew past this multiple of the configured size
/// is dropped on checkin instead of pooled.
const OVERSIZED_FACTOR: usize = 4;

/// A scratch buffer for encoding responses.
#[derive(Debug)]
pub struct ResponseEncoder {
    buf: BytesMut,
    buffer_size: usize,
}

impl ResponseEncoder {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(buffer_size),
            buffer_size,
        }
    }

    /// The buffer size this encoder was created for.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Encodes `message` and returns the encoded bytes. The slice is valid
    /// until the next call.
    pub fn encode(&mut self, message: &LdapMessage) -> &[u8] {
        self.buf.clear();
        encode_message(message, &mut self.buf);
        &self.buf
    }
}

/// A pool of `ResponseEncoder`s tied to the configured buffer size.
#[derive(Debug)]
pub struct EncoderPool {
    buffer_size: AtomicUsize,
    idle: Mutex<Vec<ResponseEncoder>>,
}

impl EncoderPool {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: AtomicUsize::new(buffer_size),
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.load(Ordering::Acquire)
    }

    /// Changes the configured buffer size. Encoders created for the old size
    /// are replaced on their next checkout.
    pub fn set_buffer_size(&self, buffer_size: usize) {
        self.buffer_size.store(buffer_size, Ordering::Release);
    }

    pub fn checkout(&self) -> ResponseEncoder {
        let current = self.buffer_size();
        match self.idle.lock().pop() {
            Some(encoder) if encoder.buffer_size == current => encoder,
            _ => ResponseEncoder::new(current),
        }
    }

    pub fn checkin(&self, encoder: ResponseEncoder) {
        let current = self.buffer_size();
        if encoder.buffer_size != current
            || encoder.buf.capacity() > current.saturating_mul(OVERSIZED_FACTOR)
        {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < MAX_POOLED_ENCODERS {
            idle.push(encoder);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}
