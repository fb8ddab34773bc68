//! Validated names for the `namespace / bucket / key` hierarchy.
//!
//! Valid names:
//! - Must be non-empty
//! - Must only contain ASCII letters, digits, `.`, `_` and `-`
//! - Must not start with `.` (keeps them safe as path components)
//! - Namespaces and buckets are at most 64 bytes, ref keys at most 128

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TypeError;

fn validate(kind: &'static str, name: &str, max_len: usize) -> Result<(), TypeError> {
    let invalid = |reason: String| TypeError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("must not be empty".into()));
    }
    if name.len() > max_len {
        return Err(invalid(format!("longer than {max_len} bytes")));
    }
    if name.starts_with('.') {
        return Err(invalid("must not start with '.'".into()));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(invalid(format!("contains forbidden character: {ch:?}")));
    }
    Ok(())
}

macro_rules! scoped_name {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $max:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Maximum length in bytes.
            pub const MAX_LEN: usize = $max;

            /// Validate and wrap a name.
            pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
                let name = name.into();
                validate($kind, &name, Self::MAX_LEN)?;
                Ok(Self(name))
            }

            /// The name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::new(s).map_err(serde::de::Error::custom)
            }
        }
    };
}

scoped_name!(
    /// Top-level tenant / isolation scope. Everything else lives under one.
    NamespaceId,
    "namespace",
    64
);

scoped_name!(
    /// A named grouping of refs within a namespace.
    BucketId,
    "bucket",
    64
);

scoped_name!(
    /// The unique name of a ref within a bucket.
    RefId,
    "ref",
    128
);
