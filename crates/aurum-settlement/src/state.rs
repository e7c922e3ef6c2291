//! Composed desk state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use aurum_accounts::MetalAccountBook;
use aurum_credits::CreditBook;
use aurum_ledger::LedgerBook;
use aurum_quotes::QuoteBoard;
use aurum_types::{Grams, Result};
use aurum_vault::VaultBook;

/// Everything the settlement desk owns.
///
/// One struct holds the five books so a single guard covers them all;
/// multi-aggregate operations (post a pair, update a credit, append an
/// account entry) commit or fail as a unit.
#[derive(Debug, Clone, Default)]
pub struct DeskState {
    pub quotes: QuoteBoard,
    pub ledger: LedgerBook,
    pub credits: CreditBook,
    pub accounts: MetalAccountBook,
    pub vault: VaultBook,
}

impl DeskState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summary counters for dashboards and the demo desk.
    pub fn summary(&self) -> Result<DeskSummary> {
        let mut pending = 0;
        let mut partially_paid = 0;
        let mut paid = 0;
        let mut open_grams: BTreeMap<String, Grams> = BTreeMap::new();

        for credit in self.credits.credits() {
            match credit.status {
                aurum_credits::CreditStatus::Pending => pending += 1,
                aurum_credits::CreditStatus::PartiallyPaid => partially_paid += 1,
                aurum_credits::CreditStatus::Paid => paid += 1,
            }
            if credit.is_open() {
                let slot = open_grams
                    .entry(credit.metal.code().to_string())
                    .or_insert(Grams::ZERO);
                *slot = slot.checked_add(credit.remaining)?;
            }
        }

        let mut vault_stock: BTreeMap<String, Grams> = BTreeMap::new();
        for lot in self.vault.lots() {
            let slot = vault_stock
                .entry(lot.metal.code().to_string())
                .or_insert(Grams::ZERO);
            *slot = slot.checked_add(lot.remaining_grams)?;
        }

        Ok(DeskSummary {
            pending_credits: pending,
            partially_paid_credits: partially_paid,
            paid_credits: paid,
            open_grams,
            vault_stock,
            transaction_count: self.ledger.len(),
            quotation_count: self.quotes.len(),
            entry_count: self.accounts.entry_count(),
        })
    }
}

/// Point-in-time snapshot of desk counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeskSummary {
    pub pending_credits: usize,
    pub partially_paid_credits: usize,
    pub paid_credits: usize,
    /// Grams still owed to clients, keyed by metal code.
    pub open_grams: BTreeMap<String, Grams>,
    /// Grams physically in the vault, keyed by metal code.
    pub vault_stock: BTreeMap<String, Grams>,
    pub transaction_count: usize,
    pub quotation_count: usize,
    pub entry_count: usize,
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use aurum_types::{AnalysisId, ClientId, Metal, TenantId};

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn summary_counts_credits_and_stock() {
        let mut state = DeskState::new();
        let tenant = TenantId::new();
        let client = ClientId::new();

        state
            .credits
            .create(
                tenant,
                client,
                AnalysisId::new(),
                Metal::Gold,
                Grams::new(dec!(5)),
                day(1),
            )
            .unwrap();
        state
            .credits
            .create(
                tenant,
                client,
                AnalysisId::new(),
                Metal::Silver,
                Grams::new(dec!(120)),
                day(2),
            )
            .unwrap();
        state
            .vault
            .register_lot(
                tenant,
                Metal::Gold,
                dec!(0.999),
                Grams::new(dec!(50)),
                "recovery batch 7",
                day(1),
            )
            .unwrap();

        let summary = state.summary().unwrap();
        assert_eq!(summary.pending_credits, 2);
        assert_eq!(summary.partially_paid_credits, 0);
        assert_eq!(summary.paid_credits, 0);
        assert_eq!(summary.open_grams.get("AU"), Some(&Grams::new(dec!(5))));
        assert_eq!(summary.open_grams.get("AG"), Some(&Grams::new(dec!(120))));
        assert_eq!(summary.vault_stock.get("AU"), Some(&Grams::new(dec!(50))));
        assert_eq!(summary.transaction_count, 0);
        assert_eq!(summary.entry_count, 0);
    }
}
