use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// UUID-backed identifiers. Fresh ids are time-ordered (v7) so catalog rows
/// sort by creation.
macro_rules! uuid_ids {
    ($($(#[$meta:meta])* $name:ident;)+) => {$(
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    )+};
}

uuid_ids! {
    /// Identity of an attribute, stable across renames.
    AttributeId;
    /// One top-level transaction; nested runs share it.
    TransactionId;
    /// One committed change-log record.
    ChangeLogId;
}

/// Namespace for identifiers derived from compiled-in attribute names.
const SYSTEM_ATTRIBUTE_NAMESPACE: Uuid = Uuid::from_u128(0x5f1c_7d2e_8a44_4b8e_9c3a_1e2f_6d7b_0a19);

impl AttributeId {
    /// Derives a stable identifier for a compiled-in attribute.
    ///
    /// The same `entity_type`/`attribute` pair yields the same identifier on every
    /// start, which is how stored catalog rows are matched back to code.
    #[must_use]
    pub fn derived(entity_type: &str, attribute: &str) -> Self {
        let name = format!("{entity_type}/{attribute}");
        Self(Uuid::new_v5(&SYSTEM_ATTRIBUTE_NAMESPACE, name.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_are_stable() {
        let a = AttributeId::derived("sys_md_Package", "id");
        let b = AttributeId::derived("sys_md_Package", "id");
        let c = AttributeId::derived("sys_md_Package", "label");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn round_trips_through_strings() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }
}
