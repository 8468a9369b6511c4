//! Parsing of `WWW-Authenticate` response headers.
//!
//! A 401 response may carry several challenges, spread over one or more
//! header values, each value itself holding a comma-separated list of
//! schemes and parameters. The parser is a pure function of the header
//! values: unknown or malformed schemes are dropped silently, and the
//! surviving challenges are ordered by preference (Bearer ahead of Basic,
//! since a bearer token grants narrower, time-limited access). An empty
//! result means the response offers nothing this client can answer.

use std::collections::HashMap;

use reqwest::header::HeaderValue;

/// A single parsed authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Token-based challenge naming the realm to obtain a token from.
    Bearer(BearerChallenge),
    /// HTTP Basic challenge.
    Basic(BasicChallenge),
}

/// Parameters of a `Bearer` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    /// URL of the token-issuing endpoint.
    pub realm: Option<String>,
    /// Service identifier forwarded to the realm.
    pub service: Option<String>,
    /// Scope the server suggests requesting.
    pub scope: Option<String>,
}

/// Parameters of a `Basic` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicChallenge {
    /// Informational realm name.
    pub realm: Option<String>,
}

/// Parse every challenge found in the given `WWW-Authenticate` values,
/// ordered by preference.
pub fn parse_challenges<'a>(values: impl IntoIterator<Item = &'a HeaderValue>) -> Vec<Challenge> {
    let mut challenges: Vec<Challenge> = values
        .into_iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(parse_header_value)
        .filter_map(|raw| raw.into_challenge())
        .collect();
    // Stable sort keeps the server's ordering within a scheme.
    challenges.sort_by_key(|challenge| match challenge {
        Challenge::Bearer(_) => 0,
        Challenge::Basic(_) => 1,
    });
    challenges
}

struct RawChallenge {
    scheme: String,
    params: HashMap<String, String>,
}

impl RawChallenge {
    fn into_challenge(mut self) -> Option<Challenge> {
        if self.scheme.eq_ignore_ascii_case("bearer") {
            Some(Challenge::Bearer(BearerChallenge {
                realm: self.params.remove("realm"),
                service: self.params.remove("service"),
                scope: self.params.remove("scope"),
            }))
        } else if self.scheme.eq_ignore_ascii_case("basic") {
            Some(Challenge::Basic(BasicChallenge {
                realm: self.params.remove("realm"),
            }))
        } else {
            None
        }
    }
}

/// Split one header value into raw challenges.
///
/// The grammar is ambiguous around commas: `Basic realm="a", Bearer
/// realm="b"` is two challenges while `Bearer realm="a",service="b"` is
/// one. A bare token starts a new challenge; a token followed by `=` is a
/// parameter of the current one.
fn parse_header_value(value: &str) -> Vec<RawChallenge> {
    let mut challenges = Vec::new();
    let mut current: Option<RawChallenge> = None;
    let mut rest = value;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }
        let end = rest
            .find(|c: char| c.is_whitespace() || c == ',' || c == '=')
            .unwrap_or(rest.len());
        let word = &rest[..end];
        let after = rest[end..].trim_start();
        // "==" is base64 padding in token68 data, not a parameter.
        if after.starts_with('=') && !after.starts_with("==") {
            let (param_value, remaining) = parse_param_value(after[1..].trim_start());
            if let Some(challenge) = current.as_mut() {
                challenge
                    .params
                    .insert(word.to_ascii_lowercase(), param_value);
            }
            rest = remaining;
        } else {
            if word.is_empty() {
                // Stray delimiter with no token ahead of it: skip one char
                // so the scan always advances.
                rest = &rest[1..];
                continue;
            }
            if let Some(challenge) = current.take() {
                challenges.push(challenge);
            }
            current = Some(RawChallenge {
                scheme: word.to_string(),
                params: HashMap::new(),
            });
            rest = &rest[end..];
        }
    }
    if let Some(challenge) = current.take() {
        challenges.push(challenge);
    }
    challenges
}

fn parse_param_value(input: &str) -> (String, &str) {
    if let Some(quoted) = input.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = quoted.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        value.push(escaped);
                    }
                }
                '"' => return (value, &quoted[i + 1..]),
                _ => value.push(c),
            }
        }
        // Unterminated quote: take what we saw.
        (value, "")
    } else {
        let end = input
            .find(|c: char| c.is_whitespace() || c == ',')
            .unwrap_or(input.len());
        (input[..end].to_string(), &input[end..])
    }
}
