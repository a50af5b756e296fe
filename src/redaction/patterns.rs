//! Bounded detectors for IPv6, IPv4 and MAC literals.
//!
//! Each detector is a flat character-class scan compiled by `regex`, which
//! matches in time linear in the input. `regex` has no lookaround, so the
//! identifier boundary on both sides of a hit is checked by hand, and the
//! literal is then confirmed by parsing it into an address value.
//!
//! Detectors run in priority order (IPv6, IPv4, MAC). A lower-priority hit
//! that shares any byte with an already retained span is discarded, so an
//! IPv4 tail inside `::ffff:192.0.2.1` is never reported on its own.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::ops::Range;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Cancellation, RedactError};

/// Colon groups with an optional trailing hex group or embedded dotted quad.
/// Eight groups are needed when `::` stands for a single zero group at either
/// end (`::2:3:4:5:6:7:8`, `1:2:3:4:5:6:7::`). Validation is delegated to
/// [`Ipv6Addr`], which rejects a second `::` and over-long literals.
const IPV6_SCAN: &str =
    r"(?:[0-9A-Fa-f]{0,4}:){2,8}(?:[0-9]{1,3}(?:\.[0-9]{1,3}){3}|[0-9A-Fa-f]{1,4})?";

const IPV4_SCAN: &str = r"[0-9]{1,3}(?:\.[0-9]{1,3}){3}";

const MAC_SCAN: &str = concat!(
    r"(?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}",
    r"|(?:[0-9A-Fa-f]{2}-){5}[0-9A-Fa-f]{2}",
    r"|[0-9A-Fa-f]{4}\.[0-9A-Fa-f]{4}\.[0-9A-Fa-f]{4}",
);

// ---------------------------------------------------------------------------
// Address kinds and values
// ---------------------------------------------------------------------------

/// Kind of network identifier a detector recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    /// Dotted-quad IPv4 address.
    Ipv4,
    /// Colon-grouped IPv6 address, including compressed and IPv4-mapped forms.
    Ipv6,
    /// 48-bit hardware address.
    Mac,
}

impl AddressKind {
    /// Stable lowercase label, also used as the keyed-hash domain tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::Mac => "mac",
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Separator layout of a MAC literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacStyle {
    /// `00:11:22:33:44:55`
    Colon,
    /// `00-11-22-33-44-55`
    Hyphen,
    /// `0011.2233.4455`
    Dotted,
}

impl MacStyle {
    /// Render six octets in this layout using lowercase hex.
    pub fn render(self, octets: &[u8; 6]) -> String {
        match self {
            Self::Colon => join_hex(octets, ":"),
            Self::Hyphen => join_hex(octets, "-"),
            Self::Dotted => octets
                .chunks(2)
                .map(|pair| pair.iter().map(|b| format!("{b:02x}")).collect::<String>())
                .collect::<Vec<_>>()
                .join("."),
        }
    }
}

fn join_hex(octets: &[u8], sep: &str) -> String {
    octets
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(sep)
}

/// Parsed value of a detected literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address.
    V4(Ipv4Addr),
    /// IPv6 address.
    V6(Ipv6Addr),
    /// MAC address with the separator layout it was written in.
    Mac {
        /// The six address octets.
        octets: [u8; 6],
        /// Layout of the original literal.
        style: MacStyle,
    },
}

impl Address {
    /// Kind of this address.
    pub fn kind(&self) -> AddressKind {
        match self {
            Self::V4(_) => AddressKind::Ipv4,
            Self::V6(_) => AddressKind::Ipv6,
            Self::Mac { .. } => AddressKind::Mac,
        }
    }

    /// Address bytes independent of how the literal was spelled.
    ///
    /// `2001:DB8::1` and `2001:db8:0::1` yield the same bytes, as do the
    /// colon, hyphen and dotted spellings of one MAC.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Self::V4(addr) => addr.octets().to_vec(),
            Self::V6(addr) => addr.octets().to_vec(),
            Self::Mac { octets, .. } => octets.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Match candidates
// ---------------------------------------------------------------------------

/// A detected span in the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate {
    /// Byte range of the literal in the original text.
    pub span: Range<usize>,
    /// Parsed address value.
    pub address: Address,
}

impl MatchCandidate {
    /// Kind of the detected literal.
    pub fn kind(&self) -> AddressKind {
        self.address.kind()
    }

    /// The matched literal, borrowed from the text it was found in.
    pub fn literal<'t>(&self, text: &'t str) -> &'t str {
        text.get(self.span.clone()).unwrap_or_default()
    }

    /// Whether the two spans share at least one byte. Touching spans do not.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.span.start < other.span.end && other.span.start < self.span.end
    }
}

// ---------------------------------------------------------------------------
// Pattern set
// ---------------------------------------------------------------------------

/// Compiled detectors, shared read-only by every request.
#[derive(Debug, Clone)]
pub struct PatternSet {
    ipv6: Regex,
    ipv4: Regex,
    mac: Regex,
}

impl PatternSet {
    /// Compile the three detectors.
    ///
    /// # Errors
    ///
    /// Returns [`RedactError::Pattern`] if a detector fails to compile.
    pub fn new() -> Result<Self, RedactError> {
        Ok(Self {
            ipv6: Regex::new(IPV6_SCAN)?,
            ipv4: Regex::new(IPV4_SCAN)?,
            mac: Regex::new(MAC_SCAN)?,
        })
    }

    /// Priority-resolved, non-overlapping candidates in ascending offset order.
    ///
    /// # Errors
    ///
    /// Returns [`RedactError::Cancelled`] once `cancel` has been triggered.
    pub fn find_candidates(
        &self,
        text: &str,
        cancel: &Cancellation,
    ) -> Result<Vec<MatchCandidate>, RedactError> {
        let mut retained = scan(&self.ipv6, text, &[':'], cancel, parse_ipv6)?;

        let ipv4 = scan(&self.ipv4, text, &[], cancel, parse_ipv4)?;
        merge_disjoint(&mut retained, ipv4);

        let mac = scan(&self.mac, text, &[':', '-'], cancel, parse_mac)?;
        merge_disjoint(&mut retained, mac);

        Ok(retained)
    }
}

/// Run one detector, keeping hits that sit on identifier boundaries and parse.
///
/// `find_iter` resumes after a rejected hit. Any start inside a rejected hit
/// would be preceded by a hex digit, digit or separator, which the boundary
/// check refuses anyway.
fn scan(
    regex: &Regex,
    text: &str,
    blocked: &[char],
    cancel: &Cancellation,
    parse: fn(&str) -> Option<Address>,
) -> Result<Vec<MatchCandidate>, RedactError> {
    let mut found = Vec::new();
    for hit in regex.find_iter(text) {
        cancel.check()?;
        if !clear_before(text, hit.start(), blocked) || !clear_after(text, hit.end(), blocked) {
            continue;
        }
        if let Some(address) = parse(hit.as_str()) {
            found.push(MatchCandidate {
                span: hit.range(),
                address,
            });
        }
    }
    Ok(found)
}

/// Add `incoming` to `retained`, dropping every incoming span that overlaps a
/// retained one. Both inputs are sorted and internally disjoint.
fn merge_disjoint(retained: &mut Vec<MatchCandidate>, incoming: Vec<MatchCandidate>) {
    let kept: Vec<MatchCandidate> = incoming
        .into_iter()
        .filter(|candidate| !overlaps_any(retained, candidate))
        .collect();
    if kept.is_empty() {
        return;
    }
    retained.extend(kept);
    retained.sort_by_key(|candidate| candidate.span.start);
}

fn overlaps_any(sorted: &[MatchCandidate], candidate: &MatchCandidate) -> bool {
    let idx = sorted.partition_point(|kept| kept.span.end <= candidate.span.start);
    sorted.get(idx).is_some_and(|kept| kept.overlaps(candidate))
}

// ---------------------------------------------------------------------------
// Boundaries
// ---------------------------------------------------------------------------

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A `.` neighbour is fine as sentence punctuation but not as part of a
/// dotted token like a hostname or version string.
fn clear_before(text: &str, start: usize, blocked: &[char]) -> bool {
    let head = text.get(..start).unwrap_or_default();
    if let Some(rest) = head.strip_suffix('.') {
        return !rest.chars().next_back().is_some_and(is_word);
    }
    !head
        .chars()
        .next_back()
        .is_some_and(|c| is_word(c) || blocked.contains(&c))
}

fn clear_after(text: &str, end: usize, blocked: &[char]) -> bool {
    let tail = text.get(end..).unwrap_or_default();
    if let Some(rest) = tail.strip_prefix('.') {
        return !rest.chars().next().is_some_and(is_word);
    }
    !tail
        .chars()
        .next()
        .is_some_and(|c| is_word(c) || blocked.contains(&c))
}

// ---------------------------------------------------------------------------
// Literal parsers
// ---------------------------------------------------------------------------

fn parse_ipv6(literal: &str) -> Option<Address> {
    literal.parse::<Ipv6Addr>().ok().map(Address::V6)
}

fn parse_ipv4(literal: &str) -> Option<Address> {
    literal.parse::<Ipv4Addr>().ok().map(Address::V4)
}

fn parse_mac(literal: &str) -> Option<Address> {
    let style = if literal.contains(':') {
        MacStyle::Colon
    } else if literal.contains('-') {
        MacStyle::Hyphen
    } else {
        MacStyle::Dotted
    };
    let digits: String = literal.chars().filter(char::is_ascii_hexdigit).collect();
    if digits.len() != 12 {
        return None;
    }
    let mut octets = [0u8; 6];
    for (slot, pair) in octets.iter_mut().zip(digits.as_bytes().chunks(2)) {
        let pair = std::str::from_utf8(pair).ok()?;
        *slot = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(Address::Mac { octets, style })
}
