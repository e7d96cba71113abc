// tests/property/framing_test.rs

//! Property-based tests for request framing
//! Tests that the codec recovers the same messages however the byte stream is split

use bytes::{Bytes, BytesMut};
use ldapgate::core::protocol::{
    BindAuthentication, BindRequest, LdapMessage, LdapMessageCodec, ProtocolOp, encode_message,
};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

fn protocol_op() -> impl Strategy<Value = ProtocolOp> {
    prop_oneof![
        Just(ProtocolOp::UnbindRequest),
        (0..i32::MAX).prop_map(ProtocolOp::AbandonRequest),
        prop::collection::vec(any::<u8>(), 0..300)
            .prop_map(|body| ProtocolOp::SearchRequest(Bytes::from(body))),
        (
            "[0-9]{1,4}(\\.[0-9]{1,6}){1,8}",
            prop::option::of(prop::collection::vec(any::<u8>(), 0..64))
        )
            .prop_map(|(oid, value)| ProtocolOp::ExtendedRequest {
                oid,
                value: value.map(Bytes::from),
            }),
        (2i64..=3, "[a-z=,]{0,40}", prop::collection::vec(any::<u8>(), 0..32)).prop_map(
            |(version, name, password)| ProtocolOp::BindRequest(BindRequest {
                version,
                name,
                authentication: BindAuthentication::Simple(Bytes::from(password)),
            })
        ),
    ]
}

fn message() -> impl Strategy<Value = LdapMessage> {
    (0..i32::MAX, protocol_op()).prop_map(|(id, op)| LdapMessage::new(id, op))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_arbitrary_chunking_yields_same_messages(
        messages in prop::collection::vec(message(), 1..8),
        chunk_sizes in prop::collection::vec(1usize..64, 1..32),
    ) {
        let mut wire = BytesMut::new();
        for message in &messages {
            encode_message(message, &mut wire);
        }

        let mut codec = LdapMessageCodec::new(0);
        let mut buffer = BytesMut::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        let mut sizes = chunk_sizes.iter().cycle();
        while offset < wire.len() {
            let end = (offset + sizes.next().copied().unwrap_or(1)).min(wire.len());
            buffer.extend_from_slice(&wire[offset..end]);
            offset = end;
            while let Some(message) = codec.decode(&mut buffer).unwrap() {
                decoded.push(message);
            }
        }

        prop_assert_eq!(decoded, messages);
        prop_assert!(buffer.is_empty());
    }

    #[test]
    fn test_size_limit_rejects_exactly_the_oversized(
        message in message(),
        limit in 1usize..512,
    ) {
        let mut wire = BytesMut::new();
        encode_message(&message, &mut wire);
        let total = wire.len();

        let mut codec = LdapMessageCodec::new(limit);
        let result = codec.decode(&mut wire);
        if total > limit {
            prop_assert!(result.is_err());
        } else {
            prop_assert_eq!(result.unwrap(), Some(message));
        }
    }

    #[test]
    fn test_arbitrary_input_never_panics(
        input in prop::collection::vec(any::<u8>(), 0..512),
        limit in 0usize..256,
    ) {
        let mut codec = LdapMessageCodec::new(limit);
        let mut buffer = BytesMut::from(&input[..]);
        while let Ok(Some(_)) = codec.decode(&mut buffer) {}

        if let Ok(Some(total)) = codec.frame_length(&input) {
            prop_assert!(limit == 0 || total <= limit);
        }
    }
}
