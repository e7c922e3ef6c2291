//! Aurum Ledger - dual-unit double-entry ledger
//!
//! Fiat-denominated transactions that optionally carry a signed metal mass
//! delta alongside the currency amount. The ledger is:
//!
//! - Pair-only: transactions exist as cross-linked debit/credit pairs
//! - Append-only: adjustments void transactions, nothing is deleted
//! - Dual-unit: each leg can move currency and grams together
//!
//! # Invariants
//!
//! 1. Both legs of a pair carry the same strictly positive amount
//! 2. `linked` resolves to the partner leg, by id lookup only
//! 3. Adjusted transactions are excluded from every derived balance
//! 4. A reversal pair is born adjusted, so the full-history signed sum nets
//!    to zero exactly like the active-only sum

use std::collections::HashMap;

use aurum_types::{
    AccountId, AurumError, CashAccountId, Grams, Money, Result, TenantId, TransactionId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Side of a ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Credit: increases the cash book it references
    Credit,
    /// Debit: decreases the cash book it references
    Debit,
}

impl TransactionKind {
    /// The opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Self::Credit => Self::Debit,
            Self::Debit => Self::Credit,
        }
    }
}

/// Lifecycle status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Counts toward derived balances
    Active,
    /// Logically void; kept for history, excluded from balances
    Adjusted,
}

/// One leg of a posted pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub tenant: TenantId,
    pub kind: TransactionKind,
    /// Always positive; direction comes from `kind`
    pub amount: Money,
    /// Signed mass movement carried alongside the fiat amount
    pub metal_delta: Option<Grams>,
    /// Posting account in the chart of accounts
    pub account: AccountId,
    /// Bank/cash book reference, set on cash legs only
    pub cash_account: Option<CashAccountId>,
    pub date: NaiveDate,
    pub description: String,
    pub status: TransactionStatus,
    /// Partner leg of the pair
    pub linked: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Signed fiat value: credits count positive, debits negative
    pub fn signed_amount(&self) -> Money {
        match self.kind {
            TransactionKind::Credit => self.amount,
            TransactionKind::Debit => self.amount.negate(),
        }
    }

    /// Check if the transaction counts toward balances
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }
}

/// One side of a pair to be posted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegSpec {
    pub account: AccountId,
    pub cash_account: Option<CashAccountId>,
    pub metal_delta: Option<Grams>,
}

impl LegSpec {
    /// A leg posting only currency to an account
    pub fn account(account: AccountId) -> Self {
        Self {
            account,
            cash_account: None,
            metal_delta: None,
        }
    }

    /// A leg carrying a signed metal delta
    pub fn with_metal(account: AccountId, metal_delta: Grams) -> Self {
        Self {
            account,
            cash_account: None,
            metal_delta: Some(metal_delta),
        }
    }

    /// A leg referencing a bank/cash book
    pub fn with_cash(account: AccountId, cash_account: CashAccountId) -> Self {
        Self {
            account,
            cash_account: Some(cash_account),
            metal_delta: None,
        }
    }
}

/// A validated, balanced pair ready to post
///
/// Construction is the only place pair invariants are checked; posting a
/// `PairSpec` cannot fail.
#[derive(Debug, Clone)]
pub struct PairSpec {
    tenant: TenantId,
    date: NaiveDate,
    description: String,
    amount: Money,
    debit: LegSpec,
    credit: LegSpec,
}

impl PairSpec {
    /// Build a balanced pair: one debit leg and one credit leg sharing a
    /// strictly positive amount
    pub fn balanced(
        tenant: TenantId,
        date: NaiveDate,
        description: impl Into<String>,
        amount: Money,
        debit: LegSpec,
        credit: LegSpec,
    ) -> Result<Self> {
        if !amount.is_positive() {
            return Err(AurumError::invalid_amount(
                "amount",
                "pair amount must be greater than zero",
            ));
        }
        Ok(Self {
            tenant,
            date,
            description: description.into(),
            amount,
            debit,
            credit,
        })
    }

    /// The shared fiat amount
    pub fn amount(&self) -> Money {
        self.amount
    }
}

/// The Aurum ledger
///
/// Plain state, no interior locking; shared access is arbitrated by the
/// settlement engine's state guard.
#[derive(Debug, Clone, Default)]
pub struct LedgerBook {
    /// All transactions (append-only)
    transactions: Vec<LedgerTransaction>,
    /// Id lookup into `transactions`
    index: HashMap<TransactionId, usize>,
}

impl LedgerBook {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            transactions: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Post a validated pair
    ///
    /// Materializes both legs active and cross-linked; returns
    /// `(debit_id, credit_id)`.
    pub fn post_pair(&mut self, spec: PairSpec) -> (TransactionId, TransactionId) {
        let debit_id = TransactionId::new();
        let credit_id = TransactionId::new();
        let created_at = Utc::now();

        // Debit leg
        self.insert(LedgerTransaction {
            id: debit_id,
            tenant: spec.tenant,
            kind: TransactionKind::Debit,
            amount: spec.amount,
            metal_delta: spec.debit.metal_delta,
            account: spec.debit.account,
            cash_account: spec.debit.cash_account,
            date: spec.date,
            description: spec.description.clone(),
            status: TransactionStatus::Active,
            linked: Some(credit_id),
            created_at,
        });

        // Credit leg
        self.insert(LedgerTransaction {
            id: credit_id,
            tenant: spec.tenant,
            kind: TransactionKind::Credit,
            amount: spec.amount,
            metal_delta: spec.credit.metal_delta,
            account: spec.credit.account,
            cash_account: spec.credit.cash_account,
            date: spec.date,
            description: spec.description,
            status: TransactionStatus::Active,
            linked: Some(debit_id),
            created_at,
        });

        (debit_id, credit_id)
    }

    /// Reverse an active pair
    ///
    /// Voids both original legs and posts the opposite pair: swapped kinds,
    /// same positive amounts, negated metal deltas, same accounts. The
    /// reversal pair is itself born adjusted. Returns the reversal pair ids.
    pub fn reverse(&mut self, transaction_id: TransactionId) -> Result<(TransactionId, TransactionId)> {
        // Load the pair
        let tx = self.require(transaction_id)?.clone();
        let partner_id = tx.linked.ok_or_else(|| {
            AurumError::internal(format!("transaction {transaction_id} has no linked pair"))
        })?;
        let partner = self.require(partner_id)?.clone();

        if !tx.is_active() {
            return Err(AurumError::TransactionAdjusted {
                transaction_id: tx.id.to_string(),
            });
        }
        if !partner.is_active() {
            return Err(AurumError::TransactionAdjusted {
                transaction_id: partner.id.to_string(),
            });
        }

        // Post the opposite legs, cross-linked and born adjusted
        let first_id = TransactionId::new();
        let second_id = TransactionId::new();
        let date = Utc::now().date_naive();
        let created_at = Utc::now();

        self.insert(Self::reversal_leg(&tx, first_id, second_id, date, created_at));
        self.insert(Self::reversal_leg(&partner, second_id, first_id, date, created_at));

        // Void the originals
        self.set_status(tx.id, TransactionStatus::Adjusted);
        self.set_status(partner.id, TransactionStatus::Adjusted);

        Ok((first_id, second_id))
    }

    fn reversal_leg(
        original: &LedgerTransaction,
        id: TransactionId,
        linked: TransactionId,
        date: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> LedgerTransaction {
        LedgerTransaction {
            id,
            tenant: original.tenant,
            kind: original.kind.opposite(),
            amount: original.amount,
            metal_delta: original.metal_delta.map(|g| g.negate()),
            account: original.account,
            cash_account: original.cash_account,
            date,
            description: format!("[REVERSAL] Adjustment of transaction {}", original.id),
            status: TransactionStatus::Adjusted,
            linked: Some(linked),
            created_at,
        }
    }

    fn insert(&mut self, tx: LedgerTransaction) {
        self.index.insert(tx.id, self.transactions.len());
        self.transactions.push(tx);
    }

    fn set_status(&mut self, id: TransactionId, status: TransactionStatus) {
        if let Some(&pos) = self.index.get(&id) {
            self.transactions[pos].status = status;
        }
    }

    fn require(&self, id: TransactionId) -> Result<&LedgerTransaction> {
        self.get(id).ok_or_else(|| AurumError::TransactionNotFound {
            transaction_id: id.to_string(),
        })
    }

    /// Get a transaction by id
    pub fn get(&self, id: TransactionId) -> Option<&LedgerTransaction> {
        self.index.get(&id).map(|&pos| &self.transactions[pos])
    }

    /// Derived balance of a bank/cash book
    ///
    /// Sums the signed amounts of active transactions referencing the cash
    /// account.
    pub fn cash_balance(&self, cash_account: CashAccountId) -> Result<Money> {
        self.transactions
            .iter()
            .filter(|tx| tx.is_active() && tx.cash_account == Some(cash_account))
            .try_fold(Money::ZERO, |acc, tx| acc.checked_add(tx.signed_amount()))
    }

    /// Derived metal position of a ledger account
    ///
    /// Sums the metal deltas of active transactions posted to the account.
    pub fn metal_position(&self, account: AccountId) -> Result<Grams> {
        self.transactions
            .iter()
            .filter(|tx| tx.is_active() && tx.account == account)
            .filter_map(|tx| tx.metal_delta)
            .try_fold(Grams::ZERO, |acc, delta| acc.checked_add(delta))
    }

    /// All transactions posted to an account
    pub fn account_transactions(&self, account: AccountId) -> Vec<LedgerTransaction> {
        self.transactions
            .iter()
            .filter(|tx| tx.account == account)
            .cloned()
            .collect()
    }

    /// Full transaction history, oldest first
    pub fn transactions(&self) -> &[LedgerTransaction] {
        &self.transactions
    }

    /// Total number of transactions
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Check if the ledger is empty
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
