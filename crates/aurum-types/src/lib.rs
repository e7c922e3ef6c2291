//! Aurum Types - Canonical domain types for the metal settlement core
//!
//! This crate contains the foundational types for Aurum with zero dependencies
//! on other aurum crates:
//!
//! - Identity types (TenantId, ClientId, CreditId, TransactionId, ...)
//! - The `Metal` element enum
//! - Dual-unit quantities: `Grams` and `Money` decimal newtypes
//! - The central error enum and `Result` alias
//!
//! # Invariants
//!
//! 1. Monetary and mass values are fixed-point decimals, never binary floats
//! 2. Unit conversions go through an explicit per-gram price
//! 3. Mass comparisons against zero use [`GRAM_TOLERANCE`]
//! 4. Failure is explicit: every fallible operation returns [`Result`]

pub mod error;
pub mod identity;
pub mod metal;
pub mod units;

pub use error::*;
pub use identity::*;
pub use metal::*;
pub use units::*;
