//! Types for working with registry access credentials

/// A method for authenticating to a registry.
///
/// At most one form is carried per pull attempt; [`RegistryAuth::Anonymous`]
/// means anonymous access is attempted.
#[derive(Clone)]
pub enum RegistryAuth {
    /// Access the registry anonymously
    Anonymous,
    /// Access the registry with a username and password
    Basic(String, String),
    /// Access the registry with an identity token, exchanged at the token
    /// endpoint through the OAuth refresh-token grant
    Identity(String),
    /// Access the registry with a pre-issued, registry-scoped token that is
    /// forwarded verbatim instead of being exchanged
    RegistryToken(String),
}

impl Default for RegistryAuth {
    fn default() -> Self {
        RegistryAuth::Anonymous
    }
}

// Credentials never end up in logs through the Debug impl.
impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryAuth::Anonymous => f.write_str("Anonymous"),
            RegistryAuth::Basic(username, _) => write!(f, "Basic({}, ***)", username),
            RegistryAuth::Identity(_) => f.write_str("Identity(***)"),
            RegistryAuth::RegistryToken(_) => f.write_str("RegistryToken(***)"),
        }
    }
}

pub(crate) trait Authenticable {
    fn apply_authentication(self, auth: &RegistryAuth) -> Self;
}

impl Authenticable for reqwest::RequestBuilder {
    fn apply_authentication(self, auth: &RegistryAuth) -> Self {
        match auth {
            RegistryAuth::Basic(username, password) => self.basic_auth(username, Some(password)),
            _ => self,
        }
    }
}
