//! Branded ID newtypes for type safety.
//!
//! Every identifier that crosses the broker has a distinct newtype around
//! `String`, so a callback UUID cannot be passed where a correlation token
//! is expected. Only [`CorrelationId`] is minted locally (one per outbound
//! call); the remaining IDs are issued by the orchestrator and arrive as
//! strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
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
    /// Opaque token matching a broker reply to its outbound call.
    CorrelationId
}

branded_id! {
    /// Agent-facing UUID of a registered callback.
    CallbackUuid
}

branded_id! {
    /// UUID of the payload a callback was built from.
    PayloadUuid
}

branded_id! {
    /// Identifier of a single issued task.
    TaskId
}

impl CorrelationId {
    /// Mint a fresh token (UUID v4, random 128-bit).
    ///
    /// Tokens are deliberately unordered: nothing downstream may read
    /// structure out of them beyond equality.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
