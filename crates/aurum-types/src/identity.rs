//! Identity types for Aurum
//!
//! All identity types are strongly typed wrappers around UUIDs to prevent
//! accidental mixing of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Convert to prefixed string
            pub fn to_prefixed_string(&self) -> String {
                format!("{}_{}", $prefix, self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }
    };
}

// Tenancy & party identity types
define_id_type!(TenantId, "tenant", "Unique identifier for a refinery tenant (organization)");
define_id_type!(ClientId, "client", "Unique identifier for a refinery client");
define_id_type!(AnalysisId, "analysis", "Unique identifier for a chemical analysis");

// Fiat accounting identity types
define_id_type!(AccountId, "acct", "Unique identifier for a chart-of-accounts ledger account");
define_id_type!(CashAccountId, "cash", "Unique identifier for a bank/cash book account");
define_id_type!(TransactionId, "tx", "Unique identifier for a ledger transaction");

// Metal custody identity types
define_id_type!(CreditId, "credit", "Unique identifier for a metal credit");
define_id_type!(MetalAccountId, "macct", "Unique identifier for a client metal account");
define_id_type!(EntryId, "entry", "Unique identifier for a metal account entry");
define_id_type!(LotId, "lot", "Unique identifier for a pure-metal lot");
define_id_type!(MovementId, "mov", "Unique identifier for a lot movement");
define_id_type!(QuoteId, "quote", "Unique identifier for a metal quotation");
