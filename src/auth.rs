//! HTTP Basic authentication challenge/response.
//!
//! A gate is created per-request from the `Authorization` header (if any)
//! and handed to the application's auth hook, which can inspect
//! `username()`/`password()` and call [`AuthGate::deny`] or
//! [`AuthGate::cancel`]. [`AuthGate::dispatch`] then decides what the
//! connection layer should actually send.

use crate::error::{Error, Result};
use base64::Engine;

const DEFAULT_REALM: &str = "kiss realm";

pub struct AuthGate {
    usr: Option<String>,
    pwd: Option<String>,
    realm: Option<String>,
    canceled: bool,
    deny_body: Option<(Vec<u8>, String)>,
}

/// What the connection layer should do once the auth hook has run.
pub enum AuthOutcome {
    /// A response was already set by the request handler (or `deny` was
    /// called while canceled) — send it as-is, no auth challenge.
    PassThrough,
    /// `cancel()` was called and no response body was ever set — the
    /// connection is reset with no body.
    Canceled,
    /// Neither `deny` nor `cancel` was called, and no response is set —
    /// the gate has nothing to add; the caller's own routing decides
    /// what happens next.
    NoOp,
    /// Send a `401` with the body and content type given to `deny`, and a
    /// `WWW-Authenticate: Basic realm="..."` header.
    Challenge {
        realm: String,
        body: Vec<u8>,
        content_type: String,
    },
}

impl AuthGate {
    /// Builds a gate from a raw `Authorization` header value: only the
    /// `Basic` scheme is recognized, and a malformed value yields no
    /// credentials rather than an error.
    pub fn from_authorization_header(header: Option<&str>) -> Self {
        let (usr, pwd) = header
            .and_then(parse_basic_auth)
            .map(|(u, p)| (Some(u), Some(p)))
            .unwrap_or((None, None));
        Self {
            usr,
            pwd,
            realm: None,
            canceled: false,
            deny_body: None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.usr.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.pwd.as_deref()
    }

    /// Sets the realm announced in the `WWW-Authenticate` challenge.
    /// Can only be set once.
    pub fn set_realm(&mut self, realm: &str) -> Result<()> {
        if self.realm.is_some() {
            return Err(Error::Already);
        }
        self.realm = Some(realm.to_owned());
        Ok(())
    }

    pub fn realm(&self) -> &str {
        self.realm.as_deref().unwrap_or(DEFAULT_REALM)
    }

    /// Registers the body sent back with the `401` challenge. Can only be
    /// called once per request.
    pub fn deny(&mut self, reason: &str, content_type: &str) -> Result<()> {
        if self.deny_body.is_some() {
            return Err(Error::Already);
        }
        self.deny_body = Some((reason.as_bytes().to_vec(), content_type.to_owned()));
        Ok(())
    }

    /// Cancels the challenge outright.
    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    /// Decides the outcome of this request's auth gate. `response_already_set`
    /// reflects whether the request handler already queued its own response
    /// before the auth hook returned.
    pub fn dispatch(&self, response_already_set: bool) -> AuthOutcome {
        if response_already_set {
            return AuthOutcome::PassThrough;
        }
        if self.canceled {
            return if self.deny_body.is_some() {
                AuthOutcome::PassThrough
            } else {
                AuthOutcome::Canceled
            };
        }
        match &self.deny_body {
            Some((body, content_type)) => AuthOutcome::Challenge {
                realm: self.realm().to_owned(),
                body: body.clone(),
                content_type: content_type.clone(),
            },
            None => AuthOutcome::NoOp,
        }
    }
}

fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (usr, pwd) = decoded.split_once(':')?;
    Some((usr.to_owned(), pwd.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_header(usr: &str, pwd: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{usr}:{pwd}"));
        format!("Basic {encoded}")
    }

    #[test]
    fn parses_valid_basic_auth_header() {
        let header = basic_header("alice", "secret");
        let gate = AuthGate::from_authorization_header(Some(&header));
        assert_eq!(gate.username(), Some("alice"));
        assert_eq!(gate.password(), Some("secret"));
    }

    #[test]
    fn missing_header_yields_no_credentials() {
        let gate = AuthGate::from_authorization_header(None);
        assert_eq!(gate.username(), None);
        assert_eq!(gate.password(), None);
    }

    #[test]
    fn malformed_header_yields_no_credentials() {
        let gate = AuthGate::from_authorization_header(Some("Bearer xyz"));
        assert_eq!(gate.username(), None);
    }

    #[test]
    fn set_realm_twice_fails() {
        let mut gate = AuthGate::from_authorization_header(None);
        gate.set_realm("api").unwrap();
        assert!(matches!(gate.set_realm("other"), Err(Error::Already)));
    }

    #[test]
    fn default_realm_used_when_unset() {
        let gate = AuthGate::from_authorization_header(None);
        assert_eq!(gate.realm(), DEFAULT_REALM);
    }

    #[test]
    fn dispatch_passes_through_when_response_already_set() {
        let gate = AuthGate::from_authorization_header(None);
        assert!(matches!(gate.dispatch(true), AuthOutcome::PassThrough));
    }

    #[test]
    fn dispatch_challenges_after_deny() {
        let mut gate = AuthGate::from_authorization_header(None);
        gate.deny("Unauthorized", "text/plain").unwrap();
        match gate.dispatch(false) {
            AuthOutcome::Challenge { body, content_type, .. } => {
                assert_eq!(body, b"Unauthorized");
                assert_eq!(content_type, "text/plain");
            }
            _ => panic!("expected challenge"),
        }
    }

    #[test]
    fn dispatch_is_noop_without_deny_or_cancel() {
        let gate = AuthGate::from_authorization_header(None);
        assert!(matches!(gate.dispatch(false), AuthOutcome::NoOp));
    }

    #[test]
    fn dispatch_cancels_without_deny_body() {
        let mut gate = AuthGate::from_authorization_header(None);
        gate.cancel();
        assert!(matches!(gate.dispatch(false), AuthOutcome::Canceled));
    }

    #[test]
    fn cancel_after_deny_passes_through() {
        let mut gate = AuthGate::from_authorization_header(None);
        gate.deny("nope", "text/plain").unwrap();
        gate.cancel();
        assert!(matches!(gate.dispatch(false), AuthOutcome::PassThrough));
    }
}
