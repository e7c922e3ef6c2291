//! Aurum Accounts - client metal accounts
//!
//! One account per (tenant, client, metal), denominated purely in grams.
//! Entries are append-only signed movements; the balance is always derived by
//! summation, never stored.

use std::collections::HashMap;

use aurum_types::{
    AurumError, ClientId, CreditId, EntryId, Grams, Metal, MetalAccountId, MovementId, Result,
    TenantId, TransactionId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Kind of metal account entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// Origination from an approved analysis
    Credit,
    /// Settlement paid out in cash
    CashPayment,
    /// Settlement offset against the client's receivable
    ClientCreditPayment,
    /// Settlement paid out in physical metal
    MetalPayment,
    /// Entry produced by the sale subsystem
    SalePayment,
}

/// What produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntrySource {
    /// The originating metal credit
    Credit(CreditId),
    /// The debit leg of a settlement's ledger pair
    Transaction(TransactionId),
    /// A lot exit movement
    Movement(MovementId),
}

/// A client's gram-denominated account in one metal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalAccount {
    pub id: MetalAccountId,
    pub tenant: TenantId,
    pub client: ClientId,
    pub metal: Metal,
    pub created_at: DateTime<Utc>,
}

/// A signed gram movement on a metal account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalAccountEntry {
    pub id: EntryId,
    pub account: MetalAccountId,
    pub date: NaiveDate,
    /// Signed: originations positive, payments negative
    pub grams: Grams,
    pub kind: EntryKind,
    pub description: String,
    pub source: EntrySource,
    pub created_at: DateTime<Utc>,
}

/// The metal account book
///
/// Plain state, no interior locking; shared access is arbitrated by the
/// settlement engine's state guard.
#[derive(Debug, Clone, Default)]
pub struct MetalAccountBook {
    accounts: Vec<MetalAccount>,
    /// Unique-key lookup into `accounts`
    key_index: HashMap<(TenantId, ClientId, Metal), usize>,
    /// All entries (append-only)
    entries: Vec<MetalAccountEntry>,
}

impl MetalAccountBook {
    /// Create an empty book
    pub fn new() -> Self {
        Self {
            accounts: Vec::new(),
            key_index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Get the account for (tenant, client, metal), creating it on first use
    pub fn get_or_create(
        &mut self,
        tenant: TenantId,
        client: ClientId,
        metal: Metal,
    ) -> MetalAccount {
        let key = (tenant, client, metal);
        if let Some(&pos) = self.key_index.get(&key) {
            return self.accounts[pos].clone();
        }

        let account = MetalAccount {
            id: MetalAccountId::new(),
            tenant,
            client,
            metal,
            created_at: Utc::now(),
        };
        self.key_index.insert(key, self.accounts.len());
        self.accounts.push(account.clone());
        account
    }

    /// Find an existing account by its unique key
    pub fn find(&self, tenant: TenantId, client: ClientId, metal: Metal) -> Option<&MetalAccount> {
        self.key_index
            .get(&(tenant, client, metal))
            .map(|&pos| &self.accounts[pos])
    }

    /// Append an entry
    pub fn append(&mut self, entry: MetalAccountEntry) {
        self.entries.push(entry);
    }

    /// Entries of one account, oldest first
    pub fn entries_for(&self, account: MetalAccountId) -> Vec<MetalAccountEntry> {
        let mut entries: Vec<MetalAccountEntry> = self
            .entries
            .iter()
            .filter(|e| e.account == account)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.date, e.created_at));
        entries
    }

    /// Derived balance of one account
    pub fn balance(&self, account: MetalAccountId) -> Result<Grams> {
        self.entries
            .iter()
            .filter(|e| e.account == account)
            .try_fold(Grams::ZERO, |acc, e| acc.checked_add(e.grams))
    }

    /// Remove the entry matching (source, kind) on an account
    ///
    /// Used by origination revert to delete the credit's entry; fails if no
    /// entry matches.
    pub fn remove_by_source(
        &mut self,
        account: MetalAccountId,
        source: EntrySource,
        kind: EntryKind,
    ) -> Result<MetalAccountEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.account == account && e.source == source && e.kind == kind)
            .ok_or_else(|| AurumError::EntryNotFound {
                account_id: account.to_string(),
            })?;
        Ok(self.entries.remove(pos))
    }

    /// All accounts
    pub fn accounts(&self) -> &[MetalAccount] {
        &self.accounts
    }

    /// All entries, insertion order
    pub fn entries(&self) -> &[MetalAccountEntry] {
        &self.entries
    }

    /// Total number of entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn entry(
        account: MetalAccountId,
        date: NaiveDate,
        grams: Grams,
        kind: EntryKind,
        source: EntrySource,
    ) -> MetalAccountEntry {
        MetalAccountEntry {
            id: EntryId::new(),
            account,
            date,
            grams,
            kind,
            description: "test entry".to_string(),
            source,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut book = MetalAccountBook::new();
        let tenant = TenantId::new();
        let client = ClientId::new();

        let first = book.get_or_create(tenant, client, Metal::Gold);
        let second = book.get_or_create(tenant, client, Metal::Gold);
        assert_eq!(first.id, second.id);

        let silver = book.get_or_create(tenant, client, Metal::Silver);
        assert_ne!(first.id, silver.id);
        assert_eq!(book.accounts().len(), 2);
    }

    #[test]
    fn test_balance_is_derived_from_entries() {
        let mut book = MetalAccountBook::new();
        let account = book.get_or_create(TenantId::new(), ClientId::new(), Metal::Gold);

        book.append(entry(
            account.id,
            day(1),
            Grams::new(dec!(10)),
            EntryKind::Credit,
            EntrySource::Credit(CreditId::new()),
        ));
        book.append(entry(
            account.id,
            day(5),
            Grams::new(dec!(-4)),
            EntryKind::CashPayment,
            EntrySource::Transaction(TransactionId::new()),
        ));

        assert_eq!(book.balance(account.id).unwrap(), Grams::new(dec!(6)));
        assert!(book.balance(MetalAccountId::new()).unwrap().is_zero());
    }

    #[test]
    fn test_entries_come_back_oldest_first() {
        let mut book = MetalAccountBook::new();
        let account = book.get_or_create(TenantId::new(), ClientId::new(), Metal::Gold);

        book.append(entry(
            account.id,
            day(9),
            Grams::new(dec!(-1)),
            EntryKind::MetalPayment,
            EntrySource::Movement(MovementId::new()),
        ));
        book.append(entry(
            account.id,
            day(2),
            Grams::new(dec!(10)),
            EntryKind::Credit,
            EntrySource::Credit(CreditId::new()),
        ));

        let entries = book.entries_for(account.id);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].date, day(2));
        assert_eq!(entries[1].date, day(9));
    }

    #[test]
    fn test_remove_by_source() {
        let mut book = MetalAccountBook::new();
        let account = book.get_or_create(TenantId::new(), ClientId::new(), Metal::Gold);
        let credit_id = CreditId::new();

        book.append(entry(
            account.id,
            day(1),
            Grams::new(dec!(10)),
            EntryKind::Credit,
            EntrySource::Credit(credit_id),
        ));

        // Same source but different kind must not match
        let result = book.remove_by_source(
            account.id,
            EntrySource::Credit(credit_id),
            EntryKind::CashPayment,
        );
        assert!(matches!(result, Err(AurumError::EntryNotFound { .. })));

        let removed = book
            .remove_by_source(account.id, EntrySource::Credit(credit_id), EntryKind::Credit)
            .unwrap();
        assert_eq!(removed.grams, Grams::new(dec!(10)));
        assert_eq!(book.entry_count(), 0);
    }

    #[test]
    fn test_entry_kind_serde_codes() {
        let json = serde_json::to_string(&EntryKind::CashPayment).unwrap();
        assert_eq!(json, "\"CASH_PAYMENT\"");
        let json = serde_json::to_string(&EntryKind::ClientCreditPayment).unwrap();
        assert_eq!(json, "\"CLIENT_CREDIT_PAYMENT\"");
    }
}
