use streamgate::{StreamRecord, TraceContext};

#[test]
fn repeated_header_keys_resolve_to_the_last_value() {
    let record = StreamRecord::new("orders", 0, 0, "payload")
        .with_header("retry-count", "1")
        .with_header("source", "billing")
        .with_header("retry-count", "2");
    assert_eq!(record.headers.last_str("retry-count"), Some("2"));
    assert_eq!(record.headers.last_str("source"), Some("billing"));
    assert_eq!(record.headers.last("missing"), None);
    assert_eq!(record.headers.len(), 3, "earlier values are preserved");

    let keys: Vec<&str> = record.headers.iter().map(|(key, _)| key).collect();
    assert_eq!(keys, vec!["retry-count", "source", "retry-count"]);
}

#[test]
fn trace_context_rides_the_record_envelope() {
    let record = StreamRecord::new("orders", 0, 0, "payload").with_header(
        "traceparent",
        "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
    );
    let context = record.trace_context();
    assert_eq!(
        context.trace_id.as_deref(),
        Some("0af7651916cd43dd8448eb211c80319c")
    );
    assert_eq!(context.parent_span_id.as_deref(), Some("b7ad6b7169203331"));
}

#[test]
fn malformed_traceparent_yields_an_empty_context() {
    let record =
        StreamRecord::new("orders", 0, 0, "payload").with_header("traceparent", "garbage");
    assert!(record.trace_context().is_empty());

    let absent = StreamRecord::new("orders", 0, 0, "payload");
    assert_eq!(absent.trace_context(), TraceContext::default());
}

#[test]
fn last_traceparent_wins_after_rebroadcast() {
    let record = StreamRecord::new("orders", 0, 0, "payload")
        .with_header(
            "traceparent",
            "00-11111111111111111111111111111111-1111111111111111-01",
        )
        .with_header(
            "traceparent",
            "00-22222222222222222222222222222222-2222222222222222-01",
        );
    assert_eq!(
        record.trace_context().trace_id.as_deref(),
        Some("22222222222222222222222222222222")
    );
}

#[test]
fn record_displays_its_coordinates() {
    let record = StreamRecord::new("orders", 3, 42, "payload").with_key("k");
    assert_eq!(record.to_string(), "orders/3@42");
    assert_eq!(record.key.as_deref(), Some(b"k".as_slice()));
}
