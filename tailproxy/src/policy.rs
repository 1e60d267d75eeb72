//! Port-matcher policy for the export-listeners subsystem (spec.md §4.G).
//!
//! A `PortMatcher` is a comma-separated list of single ports or `low-high`
//! inclusive ranges. Deny is evaluated before allow, and an empty allow
//! list defaults to accepting everything not denied.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Default)]
struct Range {
    low: u16,
    high: u16,
}

/// A parsed port-matcher spec. `Default` is the empty matcher, which
/// matches nothing on its own — callers combine it with a separate deny
/// matcher via [`PortMatcher::evaluate`] semantics implemented by the
/// caller, or check [`PortMatcher::is_empty`] to special-case "allow all".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMatcher(Vec<(u16, u16)>);

impl PortMatcher {
    /// Parses a spec like `"22,80,8000-9000"`. An empty or all-whitespace
    /// string parses to the empty matcher.
    pub fn parse(spec: &str) -> Result<Self, ParseError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(PortMatcher(Vec::new()));
        }

        let mut ranges = Vec::new();
        for term in spec.split(',') {
            let term = term.trim();
            if term.is_empty() {
                return Err(ParseError(format!("empty term in {spec:?}")));
            }
            let (low, high) = match term.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u16 = lo
                        .trim()
                        .parse()
                        .map_err(|_| ParseError(format!("invalid range start in {term:?}")))?;
                    let hi: u16 = hi
                        .trim()
                        .parse()
                        .map_err(|_| ParseError(format!("invalid range end in {term:?}")))?;
                    if lo > hi {
                        return Err(ParseError(format!("range {term:?} has start after end")));
                    }
                    (lo, hi)
                }
                None => {
                    let port: u16 = term
                        .parse()
                        .map_err(|_| ParseError(format!("invalid port {term:?}")))?;
                    (port, port)
                }
            };
            ranges.push((low, high));
        }
        Ok(PortMatcher(ranges))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, port: u16) -> bool {
        self.0.iter().any(|&(lo, hi)| port >= lo && port <= hi)
    }

    /// Applies deny-before-allow: a port is exportable if it isn't denied,
    /// and either the allow list is empty (accept-all default) or the
    /// port appears in it.
    pub fn evaluate(allow: &PortMatcher, deny: &PortMatcher, port: u16) -> bool {
        if deny.matches(port) {
            return false;
        }
        allow.is_empty() || allow.matches(port)
    }
}
