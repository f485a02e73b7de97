//! Branded ID newtypes.
//!
//! Every persisted entity has its own ID type wrapping a `String`. Generated
//! IDs are `<prefix>-<uuid v7>`, so IDs of one kind sort in creation order.
//! Rule evaluation relies on that: ties on priority break by ascending ID,
//! which is the order the rules were created in.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix used for generated IDs of this kind.
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new time-ordered ID.
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}-{}", $prefix, Uuid::now_v7()))
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
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
    /// Identifier of a contact (lead).
    ContactId, "contact"
}

branded_id! {
    /// Identifier of a user who can own contacts or act on them.
    UserId, "user"
}

branded_id! {
    /// Identifier of an assignment, scoring or transition rule.
    RuleId, "rule"
}

branded_id! {
    /// Identifier of a `contact_assignments` row.
    AssignmentId, "asg"
}

branded_id! {
    /// Identifier of an `assignment_history` row.
    HistoryId, "ahist"
}

branded_id! {
    /// Identifier of a `lifecycle_events` row.
    EventId, "lcevt"
}
