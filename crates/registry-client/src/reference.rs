use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

/// NAME_TOTAL_LENGTH_MAX is the maximum total number of characters in a repository name.
const NAME_TOTAL_LENGTH_MAX: usize = 255;

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(
        r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*)*$"
    )
    .expect("repository name expression");
    static ref TAG_RE: Regex =
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").expect("tag expression");
    static ref DIGEST_RE: Regex =
        Regex::new(r"^[a-z0-9]+(?:[+._-][a-z0-9]+)*:[A-Fa-f0-9]{32,}$").expect("digest expression");
}

/// Reasons a repository reference fails validation.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The digest is not `algorithm:hex`.
    #[error("invalid digest format")]
    DigestInvalidFormat,
    /// Repository names are lowercase by construction.
    #[error("repository name must be lowercase")]
    NameContainsUppercase,
    /// The name has no components.
    #[error("repository name must have at least one component")]
    NameEmpty,
    /// The name exceeds the registry's length cap.
    #[error("repository name must not be more than 255 characters")]
    NameTooLong,
    /// The name does not match the repository grammar.
    #[error("invalid reference format")]
    ReferenceInvalidFormat,
    /// The tag does not match the tag grammar.
    #[error("invalid tag format")]
    TagInvalidFormat,
}

/// Check a normalized repository name against the registry naming grammar.
pub(crate) fn validate_name(name: &str) -> Result<(), ParseError> {
    if name.is_empty() {
        return Err(ParseError::NameEmpty);
    }
    if name.len() > NAME_TOTAL_LENGTH_MAX {
        return Err(ParseError::NameTooLong);
    }
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ParseError::NameContainsUppercase);
    }
    if !NAME_RE.is_match(name) {
        return Err(ParseError::ReferenceInvalidFormat);
    }
    Ok(())
}

/// A normalized repository name with an optional tag and/or digest.
///
/// The registry host is carried separately (see
/// [`Endpoint`](crate::Endpoint)); a reference only names the repository
/// within whatever registry it is resolved against.
///
/// # Examples
///
/// ```
/// use registry_client::RepositoryReference;
///
/// let reference: RepositoryReference = "library/hello-world:latest".parse().unwrap();
///
/// assert_eq!("library/hello-world", reference.repository());
/// assert_eq!(Some("latest"), reference.tag());
/// assert_eq!(None, reference.digest());
/// ```
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct RepositoryReference {
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl RepositoryReference {
    /// repository returns the name of the repository.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// tag returns the reference's tag, if present.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// digest returns the reference's digest, if present.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The string a manifest request resolves: the digest when present,
    /// otherwise the tag, otherwise `latest`.
    pub(crate) fn manifest_reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or("latest")
    }

    /// whole returns the whole reference.
    pub fn whole(&self) -> String {
        let mut s = self.repository.clone();
        if let Some(t) = self.tag() {
            s.push(':');
            s.push_str(t);
        }
        if let Some(d) = self.digest() {
            s.push('@');
            s.push_str(d);
        }
        s
    }
}

impl fmt::Debug for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.whole())
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.whole())
    }
}

impl FromStr for RepositoryReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RepositoryReference::try_from(s)
    }
}

impl TryFrom<&str> for RepositoryReference {
    type Error = ParseError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => {
                if !DIGEST_RE.is_match(digest) {
                    return Err(ParseError::DigestInvalidFormat);
                }
                (rest, Some(digest.to_string()))
            }
            None => (s, None),
        };
        let (repository, tag) = match rest.split_once(':') {
            Some((repository, tag)) => {
                if !TAG_RE.is_match(tag) {
                    return Err(ParseError::TagInvalidFormat);
                }
                (repository, Some(tag.to_string()))
            }
            None => (rest, None),
        };
        validate_name(repository)?;
        Ok(RepositoryReference {
            repository: repository.to_string(),
            tag,
            digest,
        })
    }
}

impl TryFrom<String> for RepositoryReference {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        RepositoryReference::try_from(s.as_str())
    }
}
