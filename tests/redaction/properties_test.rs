//! Property tests: detection and substitution hold for arbitrary input.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use netveil::redaction::{Cancellation, MatchCandidate, PatternSet, RedactionEngine};
use proptest::prelude::*;

fn patterns() -> Arc<PatternSet> {
    Arc::new(PatternSet::new().expect("patterns should compile"))
}

fn candidates(patterns: &PatternSet, text: &str) -> Vec<MatchCandidate> {
    patterns
        .find_candidates(text, &Cancellation::new())
        .expect("scan should not be cancelled")
}

fn assert_disjoint_ascending(text: &str, found: &[MatchCandidate]) {
    for candidate in found {
        assert!(candidate.span.start < candidate.span.end);
        assert!(text.get(candidate.span.clone()).is_some());
    }
    for pair in found.windows(2) {
        assert!(
            pair[0].span.end <= pair[1].span.start,
            "{:?} overlaps {:?} in {text:?}",
            pair[0].span,
            pair[1].span
        );
    }
}

/// Text outside the detected spans survives verbatim and each span carries
/// its entry's surrogate, so no detected original is left in place.
fn assert_spliced(text: &str, found: &[MatchCandidate], engine: &RedactionEngine) {
    let redaction = engine.redact(text).expect("redact");
    assert_eq!(redaction.entries.len(), found.len());

    let mut expected = String::new();
    let mut cursor = 0;
    for (candidate, entry) in found.iter().zip(&redaction.entries) {
        assert_eq!(entry.original, candidate.literal(text));
        assert_ne!(entry.surrogate, entry.original);
        expected.push_str(&text[cursor..candidate.span.start]);
        expected.push_str(&entry.surrogate);
        cursor = candidate.span.end;
    }
    expected.push_str(&text[cursor..]);
    assert_eq!(redaction.text, expected);
}

fn address_literal() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<[u8; 4]>().prop_map(|o| Ipv4Addr::from(o).to_string()),
        any::<[u16; 8]>().prop_map(|g| Ipv6Addr::from(g).to_string()),
        any::<u32>().prop_map(|v| Ipv4Addr::from(v).to_ipv6_mapped().to_string()),
        (any::<[u16; 2]>(), 0usize..6).prop_map(|(g, zeros)| {
            let mut groups = [g[0] | 1, 2, 3, 4, 5, 6, 7, g[1] | 1];
            groups[1..=zeros].fill(0);
            Ipv6Addr::from(groups).to_string()
        }),
        any::<[u8; 6]>().prop_map(|o| {
            o.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
        }),
        any::<[u8; 6]>().prop_map(|o| {
            o.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join("-")
        }),
        Just("::2:3:4:5:6:7:8".to_owned()),
        Just("1:2:3:4:5:6:7::".to_owned()),
        Just("::".to_owned()),
    ]
}

proptest! {
    #[test]
    fn arbitrary_text_yields_disjoint_ascending_spans(text in ".{0,256}") {
        let patterns = patterns();
        let found = candidates(&patterns, &text);
        assert_disjoint_ascending(&text, &found);
        assert_spliced(&text, &found, &RedactionEngine::random(patterns));
    }

    #[test]
    fn address_shaped_noise_never_breaks_the_scan(text in "[0-9a-fA-F:.\\- ]{0,96}") {
        let patterns = patterns();
        let found = candidates(&patterns, &text);
        assert_disjoint_ascending(&text, &found);
        assert_spliced(&text, &found, &RedactionEngine::random(patterns));
    }

    #[test]
    fn every_listed_address_is_replaced(literals in prop::collection::vec(address_literal(), 1..8)) {
        let text = literals.join(" , ");
        let patterns = patterns();
        let found = candidates(&patterns, &text);
        let detected: Vec<&str> = found.iter().map(|c| c.literal(&text)).collect();
        let expected: Vec<&str> = literals.iter().map(String::as_str).collect();
        prop_assert_eq!(detected, expected);

        let redaction = RedactionEngine::random(patterns).redact(&text).expect("redact");
        for (token, literal) in redaction.text.split(" , ").zip(&literals) {
            prop_assert_ne!(token, literal.as_str());
        }
    }
}
