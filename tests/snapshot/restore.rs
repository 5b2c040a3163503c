//! Integration tests for the persist/restore path through the public API.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use exchange_snapshot::{
    decode_holder, encode_holder, BuildOptions, CodecError, Exchange, ExchangeCodec, Holder,
    Opaque, RuntimeContext, SerdeType, SerdeValue, TypeRegistry, Value,
    AGGREGATED_COMPLETED_BY, AGGREGATED_CORRELATION_KEY, AGGREGATED_SIZE, AGGREGATED_TIMEOUT,
    RESERVED_PROPERTY_KEYS,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Money {
    currency: String,
    cents: i64,
}

const MONEY: &str = "billing.money";

fn money_type() -> SerdeType<Money> {
    SerdeType::new(MONEY)
}

/// A context whose type space includes the billing extension.
fn billing_context() -> RuntimeContext {
    let types = Arc::new(TypeRegistry::new());
    types.register(Arc::new(money_type())).unwrap();
    RuntimeContext::with_types("billing", types)
}

fn order_exchange(ctx: &RuntimeContext) -> Exchange {
    let mut exchange = Exchange::new();
    exchange.set_body("order #17");
    exchange.set_header("orderId", 17);
    exchange.set_header("customer", "acme");
    let price = money_type().value(Money {
        currency: "EUR".into(),
        cents: 1999,
    });
    exchange.set_header("price", price);
    exchange.set_property(AGGREGATED_SIZE, 3);
    exchange.set_property(AGGREGATED_TIMEOUT, 30_000i64);
    exchange.set_property(AGGREGATED_COMPLETED_BY, "timeout");
    exchange.from_endpoint = Some(ctx.add_endpoint("http://0.0.0.0:8080/orders"));
    exchange
}

// ============================================================================
// Round trip
// ============================================================================

#[test]
fn primitive_holder_round_trips_field_for_field() {
    let mut exchange = Exchange::new();
    exchange.set_body(42i64);
    exchange.set_header("a", "x");
    exchange.set_header("b", false);
    exchange.set_property("attempt", 1);

    let holder = Holder::build(&exchange, false);
    let bytes = encode_holder(&holder).expect("encode");
    let decoded = decode_holder(&RuntimeContext::new("empty"), &bytes).expect("decode");

    assert_eq!(decoded, holder);
    for key in RESERVED_PROPERTY_KEYS {
        assert!(decoded.is_unset(key), "{key} should stay unset");
    }
}

#[test]
fn complex_header_round_trips_when_type_is_resolvable() {
    let ctx = billing_context();
    let exchange = order_exchange(&ctx);

    let codec = ExchangeCodec::new(BuildOptions {
        allow_complex_headers: true,
        ..BuildOptions::default()
    });
    let bytes = codec.marshal_exchange(&exchange).expect("marshal");
    let restored = codec.unmarshal_exchange(&ctx, &bytes).expect("unmarshal");

    let price = restored
        .header("price")
        .and_then(|v| v.extension_ref::<SerdeValue<Money>>())
        .expect("price header restored as Money");
    assert_eq!(price.get().cents, 1999);
    assert_eq!(restored.property(AGGREGATED_SIZE), Some(&Value::Int(3)));
    assert_eq!(
        restored.property(AGGREGATED_TIMEOUT),
        Some(&Value::Long(30_000))
    );
    assert_eq!(
        restored.property(AGGREGATED_CORRELATION_KEY),
        Some(&Value::Null)
    );
}

#[test]
fn complex_header_absent_without_permission() {
    let ctx = billing_context();
    let holder = Holder::build(&order_exchange(&ctx), false);
    assert!(!holder.headers.contains_key("price"));
    assert_eq!(holder.dropped.len(), 1);
    assert_eq!(holder.dropped[0].type_name, MONEY);

    // Without the extension on the wire, an empty context decodes fine.
    let bytes = encode_holder(&holder).unwrap();
    assert!(decode_holder(&RuntimeContext::new("empty"), &bytes).is_ok());
}

// ============================================================================
// Fail-closed decoding
// ============================================================================

#[test]
fn missing_extension_in_restoring_process_is_unresolved_type() {
    let ctx = billing_context();
    let codec = ExchangeCodec::new(BuildOptions {
        allow_complex_headers: true,
        ..BuildOptions::default()
    });
    let bytes = codec.marshal_exchange(&order_exchange(&ctx)).unwrap();

    let other = RuntimeContext::new("no-billing");
    match codec.unmarshal_exchange(&other, &bytes) {
        Err(CodecError::UnresolvedType { type_name, path }) => {
            assert_eq!(type_name, MONEY);
            assert_eq!(path, "headers.price");
        }
        other => panic!("expected UnresolvedType, got {other:?}"),
    }
}

#[test]
fn unloading_an_extension_changes_what_decodes() {
    let ctx = billing_context();
    let codec = ExchangeCodec::new(BuildOptions {
        allow_complex_headers: true,
        ..BuildOptions::default()
    });
    let bytes = codec.marshal_exchange(&order_exchange(&ctx)).unwrap();
    assert!(codec.unmarshal_exchange(&ctx, &bytes).is_ok());

    ctx.types().unregister(MONEY);
    assert!(matches!(
        codec.unmarshal_exchange(&ctx, &bytes),
        Err(CodecError::UnresolvedType { .. })
    ));
}

#[test]
fn every_truncation_fails_cleanly() {
    let ctx = billing_context();
    let holder = Holder::build(&order_exchange(&ctx), true);
    let bytes = encode_holder(&holder).unwrap();

    for len in 0..bytes.len() {
        assert!(
            decode_holder(&ctx, &bytes[..len]).is_err(),
            "prefix of length {len} decoded"
        );
    }
    assert!(matches!(
        decode_holder(&ctx, &bytes[..bytes.len() - 1]),
        Err(CodecError::Decoding(_))
    ));
}

#[test]
fn unserializable_value_in_hand_built_holder_fails_encode() {
    let mut holder = Holder::build(&Exchange::new(), false);
    let mut nested = BTreeMap::new();
    nested.insert("conn".to_string(), Value::Opaque(Opaque::new(7u16)));
    holder.body = Some(Value::Map(nested));

    match encode_holder(&holder) {
        Err(CodecError::Encoding { path, .. }) => assert_eq!(path, "body.conn"),
        other => panic!("expected Encoding, got {other:?}"),
    }
}

// ============================================================================
// Origin re-linking
// ============================================================================

#[test]
fn origin_relinks_only_where_endpoint_runs() {
    let ctx = billing_context();
    let exchange = order_exchange(&ctx);
    let codec = ExchangeCodec::new(BuildOptions {
        allow_complex_headers: true,
        ..BuildOptions::default()
    });
    let bytes = codec.marshal_exchange(&exchange).unwrap();

    let restored = codec.unmarshal_exchange(&ctx, &bytes).unwrap();
    assert_eq!(
        restored.from_endpoint.as_ref().map(|e| e.uri()),
        Some("http://0.0.0.0:8080/orders")
    );

    ctx.remove_endpoint("http://0.0.0.0:8080/orders");
    let restored = codec.unmarshal_exchange(&ctx, &bytes).unwrap();
    assert!(restored.from_endpoint.is_none());
    assert_eq!(restored.id, exchange.id);
}

// ============================================================================
// Determinism and concurrency
// ============================================================================

#[test]
fn encode_is_byte_identical_across_calls() {
    let ctx = billing_context();
    let holder = Holder::build(&order_exchange(&ctx), true);
    let first = encode_holder(&holder).unwrap();
    for _ in 0..5 {
        assert_eq!(encode_holder(&holder).unwrap(), first);
    }
}

#[test]
fn concurrent_encode_and_decode_need_no_locking() {
    let ctx = Arc::new(billing_context());
    let codec = ExchangeCodec::new(BuildOptions {
        allow_complex_headers: true,
        ..BuildOptions::default()
    });

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let mut exchange = order_exchange(&ctx);
                exchange.set_header("worker", i);
                let bytes = codec.marshal_exchange(&exchange).unwrap();
                let restored = codec.unmarshal_exchange(&ctx, &bytes).unwrap();
                assert_eq!(restored.header("worker"), Some(&Value::Int(i)));
                assert_eq!(restored.id, exchange.id);
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }
}
