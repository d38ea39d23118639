use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use ledger_observe::{
    CompareOp, ContractId, EventPattern, HarnessConfig, LedgerEvent, Matcher, NegativeAssertionPolicy,
    ObservationError, ObserveError, ObserveSession, Party, Record, SchemaCache, TemplateId,
    TemplateSchema, TransportBatch, ValidationError, ValueKind,
};

fn iou() -> TemplateId {
    TemplateId::new("Main", "Iou")
}

fn schemas() -> SchemaCache {
    let cache = SchemaCache::new();
    cache.register(
        TemplateSchema::new(iou())
            .field("owner", ValueKind::Party)
            .field("amount", ValueKind::Decimal)
            .field("currency", ValueKind::Text)
            .field("observers", ValueKind::List),
    );
    cache
}

#[test]
fn schema_rejects_unknown_field() {
    let err = EventPattern::created(iou())
        .field_eq("curency", "USD")
        .build_with(&schemas())
        .unwrap_err();
    assert!(matches!(err, ValidationError::UnknownField { .. }));
}

#[test]
fn schema_rejects_kind_mismatch() {
    let err = EventPattern::created(iou())
        .field_eq("amount", "ten")
        .build_with(&schemas())
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::KindMismatch {
            path: "amount".to_string(),
            declared: ValueKind::Decimal,
            expected: ValueKind::Text,
        }
    );
}

#[test]
fn schema_accepts_paths_below_declared_lists() {
    EventPattern::created(iou())
        .field_eq("observers.0", Party::new("bob"))
        .build_with(&schemas())
        .unwrap();
}

#[test]
fn unknown_template_skips_schema_checks() {
    EventPattern::created(TemplateId::new("Main", "Unregistered"))
        .field_eq("anything", 1i64)
        .build_with(&schemas())
        .unwrap();
}

#[test]
fn shape_errors_without_schema() {
    let bad_regex = EventPattern::created(iou()).field_matches("currency", "(").build();
    assert!(matches!(bad_regex, Err(ValidationError::InvalidRegex { .. })));

    let unorderable = EventPattern::created(iou())
        .field_cmp("owner", CompareOp::Gt, true)
        .build();
    assert!(matches!(unorderable, Err(ValidationError::NotOrderable { .. })));

    let bad_template = EventPattern::builder().template_named("NoColon").build();
    assert!(matches!(bad_template, Err(ValidationError::InvalidTemplateId { .. })));

    let bad_path = EventPattern::created(iou()).field_eq("a..b", 1i64).build();
    assert!(matches!(bad_path, Err(ValidationError::InvalidFieldPath { .. })));
}

#[test]
fn describe_names_the_clauses() {
    let p = EventPattern::created(iou())
        .field_eq("currency", "USD")
        .capture_contract_id("cid")
        .build()
        .unwrap();
    let text = p.describe();
    assert!(text.contains("Main:Iou"));
    assert!(text.contains("currency"));
    assert!(text.contains("cid"));
}

#[test]
fn session_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "default_timeout_ms": 1000,
            "preregistered_keys": ["alice"],
            "auto_register": false,
            "negative_assertion": {{ "mode": "grace_window", "window_ms": 50 }}
        }}"#
    )
    .unwrap();

    let cfg = HarnessConfig::from_file(file.path()).unwrap();
    let session = ObserveSession::for_ledger(cfg).unwrap();
    assert_eq!(
        session.config().negative_assertion,
        NegativeAssertionPolicy::GraceWindow { window_ms: 50 }
    );

    // Events for keys nobody registered are dropped.
    session
        .sink()
        .deliver(TransportBatch::new(vec![LedgerEvent::created(
            iou(),
            ContractId::new("#1"),
            Record::new(),
        )
        .witnessed_by(["carol"])]))
        .unwrap();

    let dispatcher = session.observer().dispatcher();
    let deadline = Instant::now() + Duration::from_secs(2);
    while dispatcher.dropped_events() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(dispatcher.dropped_events(), 1);
    assert_eq!(dispatcher.keys().len(), 1);
}

#[test]
fn grace_window_sees_event_arriving_late() {
    let cfg = HarnessConfig::default()
        .with_key("alice")
        .with_negative_assertion(NegativeAssertionPolicy::GraceWindow { window_ms: 1_000 });
    let session = ObserveSession::for_ledger(cfg).unwrap();

    let sink = session.sink();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        sink.deliver(TransportBatch::new(vec![LedgerEvent::archived(iou(), ContractId::new("#1"))
            .witnessed_by(["alice"])]))
            .unwrap();
    });

    let archived = EventPattern::archived(iou()).build().unwrap();
    let err = session.observer().assert_absent("alice", &archived).unwrap_err();
    assert!(matches!(
        err,
        ObserveError::Observation(ObservationError::UnexpectedMatch { .. })
    ));
    handle.join().unwrap();
}

#[test]
fn malformed_config_is_a_validation_error() {
    let err = HarnessConfig::from_json_str(r#"{"default_timeout_ms": "soon"}"#).unwrap_err();
    assert!(err.is_validation());
}
