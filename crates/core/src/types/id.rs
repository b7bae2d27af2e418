//! Newtype IDs for type-safe entity references.
//!
//! All Copperleaf identifiers share one wire shape: a fixed-length
//! 24-character lowercase hexadecimal string. The shape is validated before
//! any identifier reaches a query layer, so malformed input is rejected
//! cheaply and never hits storage.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types.

use serde::{Deserialize, Serialize};

/// Length of every identifier: 12 random bytes, hex-encoded.
pub const ID_LENGTH: usize = 24;

/// Errors that can occur when parsing an identifier.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input has the wrong length.
    #[error("identifier must be exactly {ID_LENGTH} characters")]
    BadLength,
    /// The input contains a non-hexadecimal character.
    #[error("identifier must be lowercase hexadecimal")]
    BadCharacter,
}

/// Check whether a string has the canonical identifier shape.
///
/// This is the cheap pre-lookup gate: fixed length, lowercase hex only.
#[must_use]
pub fn is_well_formed_id(value: &str) -> bool {
    value.len() == ID_LENGTH
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Macro to define a type-safe ID wrapper.
///
/// Creates a newtype wrapper around a validated hex string with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`
/// - `parse()` (shape-validating), `generate()`, and `as_str()`
/// - `sqlx` `Type`, `Encode`, and `Decode` implementations (with `postgres` feature)
///
/// # Example
///
/// ```rust
/// # use copperleaf_core::define_id;
/// define_id!(UserId);
/// define_id!(OrderId);
///
/// let user_id = UserId::parse("64f1aa0c9d3e5b7a1c2d3e4f").unwrap();
///
/// // These are different types, so this won't compile:
/// // let _: OrderId = user_id;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Parse an identifier, validating the canonical hex shape.
            ///
            /// # Errors
            ///
            /// Returns [`IdError`](crate::types::id::IdError) if the input is
            /// not exactly 24 lowercase hex characters.
            pub fn parse(s: &str) -> ::core::result::Result<Self, $crate::types::id::IdError> {
                if s.len() != $crate::types::id::ID_LENGTH {
                    return Err($crate::types::id::IdError::BadLength);
                }
                if !$crate::types::id::is_well_formed_id(s) {
                    return Err($crate::types::id::IdError::BadCharacter);
                }
                Ok(Self(s.to_owned()))
            }

            /// Generate a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                let bytes: [u8; $crate::types::id::ID_LENGTH / 2] = ::rand::random();
                let mut s = String::with_capacity($crate::types::id::ID_LENGTH);
                for b in bytes {
                    use ::core::fmt::Write as _;
                    let _ = write!(s, "{b:02x}");
                }
                Self(s)
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = $crate::types::id::IdError;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <String as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <String as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        #[cfg(feature = "postgres")]
        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(
                value: ::sqlx::postgres::PgValueRef<'r>,
            ) -> ::core::result::Result<Self, ::sqlx::error::BoxDynError> {
                let s = <String as ::sqlx::Decode<::sqlx::Postgres>>::decode(value)?;
                // Database values are assumed valid
                Ok(Self(s))
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Encode<'_, ::sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut ::sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
                <String as ::sqlx::Encode<::sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

// Define standard entity IDs
define_id!(UserId);
define_id!(ItemId);
define_id!(OrderId);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_accepts_canonical() {
        assert!(is_well_formed_id("64f1aa0c9d3e5b7a1c2d3e4f"));
        assert!(is_well_formed_id("000000000000000000000000"));
    }

    #[test]
    fn test_well_formed_rejects_bad_length() {
        assert!(!is_well_formed_id(""));
        assert!(!is_well_formed_id("64f1aa0c"));
        assert!(!is_well_formed_id("64f1aa0c9d3e5b7a1c2d3e4f0"));
    }

    #[test]
    fn test_well_formed_rejects_bad_characters() {
        // uppercase hex is not canonical
        assert!(!is_well_formed_id("64F1AA0C9D3E5B7A1C2D3E4F"));
        assert!(!is_well_formed_id("zzzzzzzzzzzzzzzzzzzzzzzz"));
        // injection-looking input must never pass the shape gate
        assert!(!is_well_formed_id("'; DROP TABLE orders; --"));
    }

    #[test]
    fn test_parse_valid() {
        let id = UserId::parse("64f1aa0c9d3e5b7a1c2d3e4f").unwrap();
        assert_eq!(id.as_str(), "64f1aa0c9d3e5b7a1c2d3e4f");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(UserId::parse("short"), Err(IdError::BadLength));
        assert_eq!(
            UserId::parse("XYZ1aa0c9d3e5b7a1c2d3e4f"),
            Err(IdError::BadCharacter)
        );
    }

    #[test]
    fn test_generate_is_well_formed() {
        for _ in 0..32 {
            let id = OrderId::generate();
            assert!(is_well_formed_id(id.as_str()));
        }
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = ItemId::generate();
        let b = ItemId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_serde_transparent() {
        let id = OrderId::parse("64f1aa0c9d3e5b7a1c2d3e4f").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"64f1aa0c9d3e5b7a1c2d3e4f\"");
        let back: OrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
