//! Branded ID newtypes.
//!
//! Sessions, invocations, and facts each get a distinct ID type wrapping a
//! `String`, so an invocation ID can never be passed where a session ID is
//! expected. Generated IDs are a short prefix plus a UUID v7, which keeps
//! them time-ordered and recognizable in logs.
//!
//! Confirmation tokens are different: they authorize a resume, so they are
//! drawn from the OS-seeded RNG rather than a time-ordered UUID.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix used for generated IDs of this kind.
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new time-ordered ID.
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}_{}", Self::PREFIX, Uuid::now_v7()))
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a session within an (app, user) scope.
    SessionId, "sess"
}

branded_id! {
    /// Identifier of one caller-initiated turn.
    InvocationId, "inv"
}

branded_id! {
    /// Identifier of a stored memory fact.
    FactId, "fact"
}

/// Number of random bytes in a confirmation token.
const TOKEN_BYTES: usize = 32;

/// Single-use credential authorizing the resume of one pending confirmation.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    /// Draw a fresh token from the thread-local RNG.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; TOKEN_BYTES] = rand::random();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap a token string presented by a caller.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a presented token without short-circuiting on the
    /// first differing byte.
    #[must_use]
    pub fn matches(&self, presented: &ConfirmationToken) -> bool {
        let a = self.0.as_bytes();
        let b = presented.0.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Debug for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConfirmationToken(..)")
    }
}

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfirmationToken {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_carries_prefix_and_v7() {
        let id = SessionId::new();
        let raw = id.as_str().strip_prefix("sess_").expect("prefix");
        let parsed = Uuid::parse_str(raw).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn invocation_ids_are_unique_and_ordered() {
        let a = InvocationId::new();
        let b = InvocationId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("inv_"));
    }

    #[test]
    fn from_str_ref() {
        let id = FactId::from("fact-1");
        assert_eq!(id.as_str(), "fact-1");
        let s: String = id.into();
        assert_eq!(s, "fact-1");
    }

    #[test]
    fn serde_is_transparent() {
        let id = InvocationId::from("inv-test");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"inv-test\"");
        let back: InvocationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn tokens_are_random_and_url_safe() {
        let a = ConfirmationToken::generate();
        let b = ConfirmationToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 43);
        assert!(
            a.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn token_matches_only_itself() {
        let token = ConfirmationToken::generate();
        let copy = ConfirmationToken::from_string(token.as_str().to_owned());
        assert!(token.matches(&copy));
        assert!(!token.matches(&ConfirmationToken::generate()));
        assert!(!token.matches(&ConfirmationToken::from("short")));
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = ConfirmationToken::generate();
        let debug = format!("{token:?}");
        assert!(!debug.contains(token.as_str()));
    }
}
