//! Access token checks for inbound connections.
//!
//! A peer may present its token either as `Authorization: Bearer <token>`
//! or as a `token` (or `access_token`) query parameter. The header wins when
//! both are present.

use subtle::ConstantTimeEq;

/// Validates tokens presented by connecting peers.
#[derive(Clone, Default)]
pub struct TokenGuard {
    expected: Option<String>,
}

impl TokenGuard {
    /// Creates a guard. `None` or an empty token accepts every peer.
    pub fn new(expected: Option<String>) -> Self {
        Self {
            expected: expected.filter(|t| !t.is_empty()),
        }
    }

    /// Whether a token is configured at all.
    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Checks a presented token.
    pub fn validate(&self, presented: Option<&str>) -> bool {
        let Some(expected) = self.expected.as_deref() else {
            return true;
        };
        presented.is_some_and(|p| bool::from(p.as_bytes().ct_eq(expected.as_bytes())))
    }

    /// Extracts the presented token from a request and checks it.
    pub fn validate_request(&self, authorization: Option<&str>, query: Option<&str>) -> bool {
        self.validate(presented_token(authorization, query).as_deref())
    }
}

impl std::fmt::Debug for TokenGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGuard")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Picks the token a peer presented.
///
/// `authorization` is the raw header value; `query` is the raw query string
/// without the leading `?`.
pub fn presented_token(authorization: Option<&str>, query: Option<&str>) -> Option<String> {
    if let Some(token) = authorization.and_then(bearer_token) {
        return Some(token.to_string());
    }

    let query = query?;
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    ["token", "access_token"].iter().find_map(|key| {
        pairs
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.clone())
    })
}

fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
