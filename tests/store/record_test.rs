//! Mapping record and handle shape.

use std::time::Duration;

use netveil::redaction::{AddressKind, MappingEntry};
use netveil::store::{MappingHandle, MappingRecord};

#[test]
fn expiry_is_creation_plus_ttl() {
    let record = MappingRecord::new(Vec::new(), Duration::from_secs(3600));
    let lifetime = record.expires_at - record.created_at;
    assert_eq!(lifetime.num_seconds(), 3600);
    assert!(!record.is_expired_at(record.created_at));
    assert!(record.is_expired_at(record.expires_at));
}

#[test]
fn handles_are_unique_and_round_trip_as_text() {
    let a = MappingHandle::new();
    let b = MappingHandle::new();
    assert_ne!(a, b);
    let parsed: MappingHandle = a.to_string().parse().expect("handle should parse");
    assert_eq!(parsed, a);
}

#[test]
fn record_serializes_handle_as_plain_string() {
    let record = MappingRecord::new(
        vec![MappingEntry {
            original: "00:11:22:33:44:55".to_owned(),
            surrogate: "0a:1b:2c:3d:4e:5f".to_owned(),
            kind: AddressKind::Mac,
        }],
        Duration::from_secs(60),
    );
    let json = serde_json::to_value(&record).expect("serialize");
    assert_eq!(json["handle"], record.handle.to_string());
    assert_eq!(json["entries"][0]["kind"], "mac");
    let back: MappingRecord = serde_json::from_value(json).expect("deserialize");
    assert_eq!(back, record);
}

#[test]
fn ttl_is_recovered_from_the_stamps() {
    let record = MappingRecord::new(Vec::new(), Duration::from_millis(90_250));
    assert_eq!(record.ttl(), Duration::from_millis(90_250));
}
