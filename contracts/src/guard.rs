//! Transition guards
//!
//! Every status enum is closed: unknown strings are rejected when parsed, never
//! stored. Each lifecycle declares, per operation, the statuses it may start
//! from; [`check`] turns a refusal into [`Error::InvalidTransition`].

use crate::{Error, Result};
use std::fmt;

/// A string enum with a fixed set of values
pub trait ClosedEnum: Copy + Eq + fmt::Debug + 'static {
    /// Name used in error messages
    const KIND: &'static str;
    /// Every value, in declaration order
    const ALL: &'static [Self];

    /// Wire representation
    fn as_str(self) -> &'static str;
}

/// Parse a wire string into a closed enum
pub fn parse<E: ClosedEnum>(value: &str) -> Result<E> {
    E::ALL
        .iter()
        .copied()
        .find(|v| v.as_str() == value)
        .ok_or_else(|| Error::Validation(format!("unknown {} {:?}", E::KIND, value)))
}

/// A status enum with guarded operations
pub trait Lifecycle: ClosedEnum {
    /// Operations that change the status or the record
    type Op: Copy + fmt::Display;

    /// Entity kind in error messages
    const ENTITY: &'static str;

    /// Whether `op` may run while the record is in this status
    fn allows(self, op: Self::Op) -> bool;
}

/// Reject `op` unless the current status allows it
pub fn check<S: Lifecycle>(id: &str, status: S, op: S::Op) -> Result<()> {
    if status.allows(op) {
        return Ok(());
    }

    tracing::debug!(
        entity = S::ENTITY,
        id,
        operation = %op,
        status = status.as_str(),
        "Transition rejected"
    );

    Err(Error::InvalidTransition {
        entity: S::ENTITY,
        id: id.to_string(),
        operation: op.to_string(),
        status: status.as_str().to_string(),
    })
}

/// Declare a closed string enum with serde, `Display` and `FromStr`
macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $crate::guard::ClosedEnum for $name {
            const KIND: &'static str = stringify!($name);
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::guard::ClosedEnum::as_str(*self))
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::Error;

            fn from_str(s: &str) -> $crate::Result<Self> {
                $crate::guard::parse(s)
            }
        }
    };
}
