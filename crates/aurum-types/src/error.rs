//! Error types for Aurum
//!
//! One central error enum for the whole engine. Business-rule violations are
//! explicit variants so callers can branch on them; every fallible operation
//! returns [`Result`].

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for Aurum operations
pub type Result<T> = std::result::Result<T, AurumError>;

/// Aurum error types
#[derive(Debug, Clone, Error)]
pub enum AurumError {
    // ========================================================================
    // Amount Errors
    // ========================================================================

    /// Amount overflow during arithmetic
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Non-positive or otherwise unusable quantity
    #[error("Invalid amount for {field}: {reason}")]
    InvalidAmount { field: String, reason: String },

    // ========================================================================
    // Quotation Errors
    // ========================================================================

    /// No quotation at or before the requested date
    #[error("No {metal} quotation found at or before {date}")]
    QuotationNotFound { metal: String, date: String },

    /// Resolved or override price is unusable
    #[error("Invalid quotation: {reason}")]
    InvalidQuote { reason: String },

    // ========================================================================
    // Ledger Errors
    // ========================================================================

    /// Transaction not found
    #[error("Transaction {transaction_id} not found")]
    TransactionNotFound { transaction_id: String },

    /// Transaction is already adjusted (logically void)
    #[error("Transaction {transaction_id} is already adjusted")]
    TransactionAdjusted { transaction_id: String },

    // ========================================================================
    // Metal Credit Errors
    // ========================================================================

    /// Credit not found
    #[error("Metal credit {credit_id} not found")]
    CreditNotFound { credit_id: String },

    /// Settlement larger than the open balance
    #[error("Settlement exceeds balance: requested {requested} g, available {available} g")]
    ExceedsBalance {
        requested: Decimal,
        available: Decimal,
    },

    // ========================================================================
    // Metal Account Errors
    // ========================================================================

    /// No matching entry in a metal account
    #[error("No matching entry found in metal account {account_id}")]
    EntryNotFound { account_id: String },

    // ========================================================================
    // Vault Errors
    // ========================================================================

    /// Lot not found
    #[error("Pure-metal lot {lot_id} not found")]
    LotNotFound { lot_id: String },

    /// Lot stock smaller than the requested exit
    #[error("Insufficient stock in lot {lot_id}: requested {requested} g, available {available} g")]
    InsufficientStock {
        lot_id: String,
        requested: Decimal,
        available: Decimal,
    },

    // ========================================================================
    // Directory Errors
    // ========================================================================

    /// Required chart-of-accounts mapping is missing
    #[error("Required account mapping is not configured: {setting}")]
    NotConfigured { setting: String },

    /// Cash account missing or not backed by a ledger account
    #[error("Cash account {cash_account_id} not found or not backed by a ledger account")]
    CashAccountNotFound { cash_account_id: String },

    // ========================================================================
    // Storage Errors
    // ========================================================================

    /// Concurrent modification detected at commit
    #[error("Concurrent modification detected on {resource}, try again")]
    Conflict { resource: String },

    // ========================================================================
    // General Errors
    // ========================================================================

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Invalid input
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },
}

impl AurumError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid amount error
    pub fn invalid_amount(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid quotation error
    pub fn invalid_quote(reason: impl Into<String>) -> Self {
        Self::InvalidQuote {
            reason: reason.into(),
        }
    }

    /// Create a not-configured error
    pub fn not_configured(setting: impl Into<String>) -> Self {
        Self::NotConfigured {
            setting: setting.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(resource: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
        }
    }

    /// Check if this is a retriable error
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Internal { .. })
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::DivisionByZero => "DIVISION_BY_ZERO",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::QuotationNotFound { .. } => "QUOTATION_NOT_FOUND",
            Self::InvalidQuote { .. } => "INVALID_QUOTE",
            Self::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            Self::TransactionAdjusted { .. } => "TRANSACTION_ADJUSTED",
            Self::CreditNotFound { .. } => "CREDIT_NOT_FOUND",
            Self::ExceedsBalance { .. } => "EXCEEDS_BALANCE",
            Self::EntryNotFound { .. } => "ENTRY_NOT_FOUND",
            Self::LotNotFound { .. } => "LOT_NOT_FOUND",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::NotConfigured { .. } => "NOT_CONFIGURED",
            Self::CashAccountNotFound { .. } => "CASH_ACCOUNT_NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Internal { .. } => "INTERNAL_ERROR",
            Self::InvalidInput { .. } => "INVALID_INPUT",
        }
    }
}
