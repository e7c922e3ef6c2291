//! Aurum Settlement - the metal-credit settlement engine
//!
//! Composes the quotation board, dual-unit ledger, credit book, metal
//! accounts, and vault into one desk and executes settlements against them
//! atomically:
//!
//! - Currency settlements funded by cash books or client receivables
//! - Physical-metal payments allocated FIFO across open credits
//! - Origination and revert of credits from analysis approvals
//! - Pair reversal and the derived query surface
//!
//! # Invariants
//!
//! 1. Every settlement posts a balanced ledger pair, updates the credit, and
//!    mirrors the grams into the client's metal account in one atomic commit
//! 2. Directory lookups run outside the state guard; optimistic versions are
//!    re-checked before anything is mutated
//! 3. A failed operation leaves the desk exactly as it found it

pub mod config;
pub mod directory;
pub mod engine;
pub mod state;

pub use config::SettlementConfig;
pub use directory::{AccountCode, AccountDirectory, InMemoryDirectory};
pub use engine::{
    ApprovalRecord, ClientStatement, CreditAllocation, CurrencySettlement, FundingSource,
    LotHistory, MetalPayment, MetalPaymentReceipt, SettlementEngine, SettlementReceipt,
    StatementLine,
};
pub use state::{DeskState, DeskSummary};
