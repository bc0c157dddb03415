//! CSRF credential sources.
//!
//! The backend runs Django's CSRF middleware, which expects the value of the
//! `csrftoken` cookie echoed back in the `X-CSRFToken` header. The client
//! forwards whatever token its [`CredentialProvider`] yields and never
//! validates it.

use std::collections::BTreeMap;

/// Cookie the backend stores its CSRF token in.
pub const CSRF_COOKIE: &str = "csrftoken";

/// Header the token is forwarded in.
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Supplies the CSRF token attached to outgoing requests.
///
/// Queried once per request, so implementations may return a token that
/// changes over time.
pub trait CredentialProvider: Send + Sync {
    fn csrf_token(&self) -> Option<String>;
}

/// Sends no token at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn csrf_token(&self) -> Option<String> {
        None
    }
}

/// Always sends the same token.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn csrf_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Cookies parsed from a `Cookie` header style string (`a=1; csrftoken=xyz`).
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn parse(raw: &str) -> Self {
        let cookies = raw
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                let value = value.trim().trim_matches('"');
                Some((name.to_string(), value.to_string()))
            })
            .collect();
        Self { cookies }
    }

    /// Value of the named cookie; empty values count as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

impl CredentialProvider for CookieJar {
    fn csrf_token(&self) -> Option<String> {
        self.get(CSRF_COOKIE).map(str::to_string)
    }
}
