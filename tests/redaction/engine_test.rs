//! End-to-end behaviour of the redaction engine.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use netveil::redaction::{
    AddressKind, DeterministicKey, PatternSet, RedactMode, RedactionEngine, Salt, SecretValue,
};

const SECRET: &str = "an-example-secret-that-is-long-enough";

fn patterns() -> Arc<PatternSet> {
    Arc::new(PatternSet::new().expect("patterns should compile"))
}

fn key() -> Arc<DeterministicKey> {
    Arc::new(DeterministicKey::new(&SecretValue::new(SECRET)).expect("key should build"))
}

#[test]
fn random_mode_replaces_ipv4_and_mac() {
    let engine = RedactionEngine::random(patterns());
    let redaction = engine
        .redact("Server 192.168.1.10 MAC 00:11:22:33:44:55")
        .expect("redact");

    assert_eq!(redaction.entries.len(), 2);
    assert_eq!(redaction.entries[0].kind, AddressKind::Ipv4);
    assert_eq!(redaction.entries[0].original, "192.168.1.10");
    assert_eq!(redaction.entries[1].kind, AddressKind::Mac);
    assert_eq!(redaction.entries[1].original, "00:11:22:33:44:55");

    let words: Vec<&str> = redaction.text.split(' ').collect();
    assert_eq!(words.len(), 4);
    assert_eq!(words[0], "Server");
    assert_eq!(words[2], "MAC");
    assert_eq!(words[1], redaction.entries[0].surrogate);
    assert_eq!(words[3], redaction.entries[1].surrogate);
    assert!(words[1].parse::<Ipv4Addr>().is_ok());
    assert_eq!(words[3].split(':').count(), 6);
}

#[test]
fn random_mode_differs_between_calls() {
    let engine = RedactionEngine::random(patterns());
    let text = "peer 2001:db8::42 via 10.1.2.3";
    let first = engine.redact(text).expect("redact");
    let second = engine.redact(text).expect("redact");
    assert_ne!(first.text, second.text);
}

#[test]
fn random_mode_draws_each_occurrence_independently() {
    let engine = RedactionEngine::random(patterns());
    let redaction = engine
        .redact("2001:db8::1 and again 2001:db8::1")
        .expect("redact");
    assert_eq!(redaction.entries.len(), 2);
    assert_ne!(redaction.entries[0].surrogate, redaction.entries[1].surrogate);
}

#[test]
fn deterministic_mode_is_idempotent_within_a_salt() {
    let engine = RedactionEngine::deterministic(patterns(), key(), Salt::from_bytes(*b"fixed"));
    let first = engine.redact("Router at 10.0.0.1").expect("redact");
    let second = engine.redact("Router at 10.0.0.1").expect("redact");
    assert_eq!(first.text, second.text);
    assert_eq!(first.entries, second.entries);

    let repeated = engine
        .redact("10.0.0.1 talks to 10.0.0.1")
        .expect("redact");
    assert_eq!(repeated.entries[0].surrogate, repeated.entries[1].surrogate);
    assert_eq!(repeated.entries[0].surrogate, first.entries[0].surrogate);
}

#[test]
fn output_is_spliced_against_original_offsets() {
    let engine = RedactionEngine::deterministic(patterns(), key(), Salt::stable());
    let text = "a ::1 b 10.0.0.1 c aa-bb-cc-dd-ee-ff d";
    let redaction = engine.redact(text).expect("redact");

    let expected = format!(
        "a {} b {} c {} d",
        redaction.entries[0].surrogate, redaction.entries[1].surrogate, redaction.entries[2].surrogate
    );
    assert_eq!(redaction.text, expected);
    // A compressed IPv6 original grows into its expanded surrogate.
    assert!(redaction.entries[0].surrogate.parse::<Ipv6Addr>().is_ok());
    assert_eq!(redaction.entries[0].surrogate.len(), 39);
}

#[test]
fn entries_follow_original_order() {
    let engine = RedactionEngine::random(patterns());
    let redaction = engine
        .redact("x fe80::1 y 172.16.0.1 z 0011.2233.4455")
        .expect("redact");
    let originals: Vec<&str> = redaction.entries.iter().map(|e| e.original.as_str()).collect();
    assert_eq!(originals, vec!["fe80::1", "172.16.0.1", "0011.2233.4455"]);
}

#[test]
fn engine_reports_its_mode() {
    assert_eq!(RedactionEngine::random(patterns()).mode(), RedactMode::Random);
    let keyed = RedactionEngine::for_mode(
        patterns(),
        RedactMode::Deterministic,
        Some(key()),
        Salt::fresh(),
    )
    .expect("engine");
    assert_eq!(keyed.mode(), RedactMode::Deterministic);
}
