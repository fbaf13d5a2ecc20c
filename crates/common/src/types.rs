use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External checkout session identifier assigned by the payment provider.
///
/// Every fulfillment record and every license issued for a purchase is keyed
/// by this value, so it is kept as an opaque string exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a provider session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of a catalog product.
    ProductId
);

uuid_id!(
    /// Identifier of an issued license.
    LicenseId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_displays_raw_value() {
        let id = SessionId::new("cs_test_123");
        assert_eq!(id.to_string(), "cs_test_123");
        assert_eq!(id.as_str(), "cs_test_123");
    }

    #[test]
    fn session_id_serializes_transparently() {
        let id = SessionId::from("sess_A");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sess_A\"");
    }

    #[test]
    fn product_id_new_creates_unique_ids() {
        assert_ne!(ProductId::new(), ProductId::new());
    }

    #[test]
    fn license_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = LicenseId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
        assert_eq!(Uuid::from(id), uuid);
    }
}
