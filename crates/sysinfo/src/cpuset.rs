//! Parsing and validation of cpuset range lists.
//!
//! A cpuset list enumerates CPU indices with commas and hyphen ranges,
//! e.g. `"1,41-42"`. Requests are validated against the set the host
//! actually offers: a malformed list on either side is a parse error,
//! while a well-formed request the host cannot satisfy is simply `false`.

use std::collections::HashSet;

/// A cpuset list that does not follow the comma/hyphen syntax.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cpuset list {spec:?}")]
pub struct ParseError {
    /// The offending list.
    pub spec: String,
}

/// Parse a cpuset list into the set of CPU indices it names.
///
/// The empty string is the empty set. Leading zeros are accepted
/// (`"01,3"`), empty chunks (`"8,,9"`) and degenerate ranges (`"1--42"`,
/// `"4-2"`) are not.
pub fn parse_list(spec: &str) -> Result<HashSet<u32>, ParseError> {
    let mut cpus = HashSet::new();
    if spec.is_empty() {
        return Ok(cpus);
    }
    let invalid = || ParseError {
        spec: spec.to_string(),
    };
    for chunk in spec.split(',') {
        if chunk.is_empty() {
            return Err(invalid());
        }
        match chunk.split_once('-') {
            Some((low, high)) => {
                let low: u32 = low.parse().map_err(|_| invalid())?;
                let high: u32 = high.parse().map_err(|_| invalid())?;
                if low > high {
                    return Err(invalid());
                }
                for cpu in low..=high {
                    cpus.insert(cpu);
                }
            }
            None => {
                cpus.insert(chunk.parse().map_err(|_| invalid())?);
            }
        }
    }
    Ok(cpus)
}

/// Check whether every CPU in `requested` is present in `available`.
///
/// An empty request is always satisfiable, including against an empty
/// available set.
pub fn is_cpuset_list_available(requested: &str, available: &str) -> Result<bool, ParseError> {
    let requested = parse_list(requested)?;
    let available = parse_list(available)?;
    Ok(requested.is_subset(&available))
}
