//! The settlement engine.
//!
//! Every operation runs as one atomic unit of work over the desk state:
//!
//! 1. **Read phase** - snapshot the aggregates under a read guard, run all
//!    business validations, remember optimistic versions.
//! 2. **Collaborator phase** - resolve posting accounts through the
//!    [`AccountDirectory`] with no guard held.
//! 3. **Commit phase** - re-check the snapshot versions under the write
//!    guard, build the full plan (validated pair, updated credits, account
//!    entries), then apply it. A version mismatch aborts with a retriable
//!    conflict before anything is mutated.
//!
//! The engine retries a conflicted commit up to
//! [`SettlementConfig::commit_retries`] times before surfacing the conflict.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use aurum_accounts::{EntryKind, EntrySource, MetalAccountEntry};
use aurum_credits::{CreditStatus, MetalCredit};
use aurum_ledger::{LedgerTransaction, LegSpec, PairSpec};
use aurum_quotes::Quotation;
use aurum_types::{
    AccountId, AnalysisId, AurumError, CashAccountId, ClientId, CreditId, EntryId, Grams, LotId,
    Metal, Money, MovementId, Result, TenantId, TransactionId, GRAM_TOLERANCE,
};
use aurum_vault::{LotMovement, LotStatus, MetalLot};

use crate::config::SettlementConfig;
use crate::directory::{AccountCode, AccountDirectory};
use crate::state::{DeskState, DeskSummary};

/// Where the currency for a settlement comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingSource {
    /// Paid out of a cash book; its backing ledger account takes the credit
    /// leg and the leg keeps the cash-account reference.
    Cash(CashAccountId),
    /// Offset against a receivable ledger account supplied by the caller.
    ClientCredit(AccountId),
}

impl FundingSource {
    fn entry_kind(&self) -> EntryKind {
        match self {
            Self::Cash(_) => EntryKind::CashPayment,
            Self::ClientCredit(_) => EntryKind::ClientCreditPayment,
        }
    }

    fn entry_description(&self) -> &'static str {
        match self {
            Self::Cash(_) => "Cash payment of metal credit",
            Self::ClientCredit(_) => "Client-credit payment of metal credit",
        }
    }
}

/// A currency settlement request against one metal credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencySettlement {
    pub credit_id: CreditId,
    /// Business date of the payment; also the quotation lookup date.
    pub date: NaiveDate,
    /// Explicit fiat amount for a partial payment. `None` settles the whole
    /// remaining balance, deriving the amount from the grams.
    pub amount: Option<Money>,
    /// Per-gram price taking precedence over the quotation board.
    pub price_override: Option<Money>,
}

/// A physical-metal payment request: grams drawn from a vault lot and
/// allocated FIFO across the client's open credits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalPayment {
    pub tenant: TenantId,
    pub client: ClientId,
    pub metal: Metal,
    pub lot_id: LotId,
    pub grams: Grams,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

/// An approved chemical analysis originating a metal credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub tenant: TenantId,
    pub client: ClientId,
    pub analysis: AnalysisId,
    pub metal: Metal,
    pub grams: Grams,
    pub date: NaiveDate,
}

/// Outcome of a currency settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// The credit after the settlement was applied.
    pub credit: MetalCredit,
    pub debit_transaction: TransactionId,
    pub credit_transaction: TransactionId,
    pub grams_settled: Grams,
    pub amount: Money,
    pub price_per_gram: Money,
}

/// Grams applied to one credit during a metal payment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreditAllocation {
    pub credit_id: CreditId,
    pub grams: Grams,
}

/// Outcome of a physical-metal payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalPaymentReceipt {
    pub movement: MovementId,
    pub debit_transaction: TransactionId,
    pub credit_transaction: TransactionId,
    pub grams: Grams,
    pub amount: Money,
    pub price_per_gram: Money,
    /// FIFO allocation, oldest credit first.
    pub allocations: Vec<CreditAllocation>,
}

/// One statement line: a metal account entry joined with the ledger
/// transaction that produced it, when there is one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementLine {
    pub entry: MetalAccountEntry,
    pub transaction: Option<LedgerTransaction>,
}

/// A client's position in one metal: credits, derived balance, history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStatement {
    pub credits: Vec<MetalCredit>,
    pub balance: Grams,
    pub lines: Vec<StatementLine>,
}

/// A vault lot with its movement history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotHistory {
    pub lot: MetalLot,
    pub movements: Vec<LotMovement>,
}

/// The settlement engine.
#[derive(Clone)]
pub struct SettlementEngine {
    state: Arc<RwLock<DeskState>>,
    directory: Arc<dyn AccountDirectory>,
    config: SettlementConfig,
}

impl SettlementEngine {
    /// Create an engine over empty desk state.
    pub fn new(directory: Arc<dyn AccountDirectory>) -> Self {
        Self::with_config(directory, SettlementConfig::default())
    }

    pub fn with_config(directory: Arc<dyn AccountDirectory>, config: SettlementConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(DeskState::new())),
            directory,
            config,
        }
    }

    // ========================================================================
    // Market Data & Vault Registration
    // ========================================================================

    /// Register (or update) the buy/sell quotation for one metal and date.
    pub async fn register_quotation(
        &self,
        tenant: TenantId,
        metal: Metal,
        date: NaiveDate,
        buy_price: Money,
        sell_price: Money,
    ) -> Result<Quotation> {
        let mut state = self.state.write().await;
        let quote = state.quotes.register(tenant, metal, date, buy_price, sell_price)?;
        info!(
            "Registered {} quotation for {}: buy {} / sell {}",
            metal, quote.date, quote.buy_price, quote.sell_price
        );
        Ok(quote)
    }

    /// Register a pure-metal lot in the vault.
    pub async fn register_lot(
        &self,
        tenant: TenantId,
        metal: Metal,
        purity: Decimal,
        grams: Grams,
        source: impl Into<String>,
        date: NaiveDate,
    ) -> Result<MetalLot> {
        let mut state = self.state.write().await;
        let lot = state.vault.register_lot(tenant, metal, purity, grams, source, date)?;
        info!("Registered lot {} with {} of {}", lot.id, lot.initial_grams, metal);
        Ok(lot)
    }

    /// Add stock back to a lot.
    pub async fn record_lot_entry(
        &self,
        lot_id: LotId,
        grams: Grams,
        date: NaiveDate,
        notes: impl Into<String>,
    ) -> Result<LotMovement> {
        let mut state = self.state.write().await;
        let movement = state.vault.entry(lot_id, grams, date, notes)?;
        info!("Recorded stock entry of {} on lot {}", movement.grams, lot_id);
        Ok(movement)
    }

    // ========================================================================
    // Credit Origination
    // ========================================================================

    /// Originate a metal credit from an approved analysis.
    ///
    /// Creates the credit and mirrors its face value into the client's metal
    /// account as a positive entry. No ledger pair is posted; currency only
    /// moves when the credit is settled.
    pub async fn record_approval(&self, approval: ApprovalRecord) -> Result<MetalCredit> {
        let mut state = self.state.write().await;
        let credit = state.credits.create(
            approval.tenant,
            approval.client,
            approval.analysis,
            approval.metal,
            approval.grams,
            approval.date,
        )?;
        let account = state
            .accounts
            .get_or_create(approval.tenant, approval.client, approval.metal);
        state.accounts.append(MetalAccountEntry {
            id: EntryId::new(),
            account: account.id,
            date: approval.date,
            grams: approval.grams,
            kind: EntryKind::Credit,
            description: format!("Metal credit from analysis {}", approval.analysis),
            source: EntrySource::Credit(credit.id),
            created_at: Utc::now(),
        });
        info!(
            "Recorded approval of {} for client {} as credit {}",
            approval.grams, approval.client, credit.id
        );
        Ok(credit)
    }

    /// Undo an origination after the analysis approval is withdrawn.
    ///
    /// Only an untouched credit can be reverted; any settlement history
    /// turns the revert into a conflict the caller must resolve upstream.
    pub async fn revert_approval(&self, credit_id: CreditId) -> Result<MetalCredit> {
        let mut state = self.state.write().await;
        let credit = state.credits.require(credit_id)?.clone();
        if credit.status != CreditStatus::Pending || !credit.settled.is_within_tolerance() {
            return Err(AurumError::conflict(format!(
                "metal credit {credit_id} already has settlement history"
            )));
        }
        let account_id = state
            .accounts
            .find(credit.tenant, credit.client, credit.metal)
            .map(|account| account.id)
            .ok_or_else(|| {
                AurumError::internal(format!(
                    "no metal account holds the origination entry of credit {credit_id}"
                ))
            })?;
        state
            .accounts
            .remove_by_source(account_id, EntrySource::Credit(credit_id), EntryKind::Credit)?;
        let removed = state.credits.remove(credit_id)?;
        info!("Reverted approval of credit {credit_id}");
        Ok(removed)
    }

    // ========================================================================
    // Currency Settlement
    // ========================================================================

    /// Settle a metal credit with money from a cash book.
    pub async fn settle_with_cash(
        &self,
        settlement: CurrencySettlement,
        cash_account: CashAccountId,
    ) -> Result<SettlementReceipt> {
        self.settle_currency(settlement, FundingSource::Cash(cash_account))
            .await
    }

    /// Settle a metal credit against a receivable the client owes.
    pub async fn settle_with_client_credit(
        &self,
        settlement: CurrencySettlement,
        receivable_account: AccountId,
    ) -> Result<SettlementReceipt> {
        self.settle_currency(settlement, FundingSource::ClientCredit(receivable_account))
            .await
    }

    async fn settle_currency(
        &self,
        settlement: CurrencySettlement,
        funding: FundingSource,
    ) -> Result<SettlementReceipt> {
        let mut attempt = 0;
        loop {
            match self.try_settle_currency(&settlement, funding).await {
                Err(err) if err.is_retriable() && attempt < self.config.commit_retries => {
                    attempt += 1;
                    warn!(
                        "Settlement of credit {} hit `{}`; retry {}/{}",
                        settlement.credit_id, err, attempt, self.config.commit_retries
                    );
                }
                outcome => return outcome,
            }
        }
    }

    async fn try_settle_currency(
        &self,
        settlement: &CurrencySettlement,
        funding: FundingSource,
    ) -> Result<SettlementReceipt> {
        // Read phase: snapshot the credit, derive both units, pre-validate
        // the balance.
        let (snapshot, price, grams_to_settle, amount) = {
            let state = self.state.read().await;
            let credit = state.credits.require(settlement.credit_id)?.clone();
            let price = state.quotes.buy_price_for(
                credit.tenant,
                credit.metal,
                settlement.date,
                settlement.price_override,
            )?;
            let (grams_to_settle, amount) =
                derive_quantities(&credit, settlement.amount, price)?;
            credit.apply_settlement(grams_to_settle)?;
            (credit, price, grams_to_settle, amount)
        };

        // Collaborator phase: resolve posting accounts with no guard held.
        let payable = self
            .directory
            .account_by_code(snapshot.tenant, AccountCode::MetalCreditPayable)
            .await?;
        let funding_leg = match funding {
            FundingSource::Cash(cash_account) => {
                let backing = self
                    .directory
                    .cash_account_backing(snapshot.tenant, cash_account)
                    .await?;
                LegSpec::with_cash(backing, cash_account)
            }
            FundingSource::ClientCredit(receivable) => LegSpec::account(receivable),
        };

        // Commit phase: re-check the version, plan, then apply.
        let mut state = self.state.write().await;
        let live_version = state.credits.require(settlement.credit_id)?.version;
        if live_version != snapshot.version {
            return Err(AurumError::conflict(format!(
                "metal credit {}",
                settlement.credit_id
            )));
        }

        let updated = state
            .credits
            .require(settlement.credit_id)?
            .apply_settlement(grams_to_settle)?;
        let description = match funding {
            FundingSource::Cash(_) => {
                format!("Payment of metal credit to client {}", snapshot.client)
            }
            FundingSource::ClientCredit(_) => format!(
                "Payment of metal credit to client {} with client credit",
                snapshot.client
            ),
        };
        let pair = PairSpec::balanced(
            snapshot.tenant,
            settlement.date,
            description,
            amount,
            LegSpec::with_metal(payable, grams_to_settle.negate()),
            funding_leg,
        )?;

        let (debit_tx, credit_tx) = state.ledger.post_pair(pair);
        let stored = state.credits.store(updated);
        let account = state
            .accounts
            .get_or_create(snapshot.tenant, snapshot.client, snapshot.metal);
        state.accounts.append(MetalAccountEntry {
            id: EntryId::new(),
            account: account.id,
            date: settlement.date,
            grams: grams_to_settle.negate(),
            kind: funding.entry_kind(),
            description: funding.entry_description().to_string(),
            source: EntrySource::Transaction(debit_tx),
            created_at: Utc::now(),
        });

        info!(
            "Settled {} of credit {} for {} ({})",
            grams_to_settle,
            stored.id,
            amount,
            funding.entry_description()
        );

        Ok(SettlementReceipt {
            credit: stored,
            debit_transaction: debit_tx,
            credit_transaction: credit_tx,
            grams_settled: grams_to_settle,
            amount,
            price_per_gram: price,
        })
    }

    // ========================================================================
    // Physical-Metal Payment
    // ========================================================================

    /// Pay a client in physical metal drawn from a vault lot.
    ///
    /// The grams are allocated FIFO (oldest credit first) across the
    /// client's open credits. A request beyond the total open balance fails
    /// with `ExceedsBalance` before anything moves.
    pub async fn pay_client_with_metal(
        &self,
        payment: MetalPayment,
    ) -> Result<MetalPaymentReceipt> {
        let mut attempt = 0;
        loop {
            match self.try_pay_with_metal(&payment).await {
                Err(err) if err.is_retriable() && attempt < self.config.commit_retries => {
                    attempt += 1;
                    warn!(
                        "Metal payment from lot {} hit `{}`; retry {}/{}",
                        payment.lot_id, err, attempt, self.config.commit_retries
                    );
                }
                outcome => return outcome,
            }
        }
    }

    async fn try_pay_with_metal(&self, payment: &MetalPayment) -> Result<MetalPaymentReceipt> {
        if !payment.grams.is_positive() {
            return Err(AurumError::invalid_amount(
                "grams",
                "metal payment must be greater than zero",
            ));
        }

        // Read phase: check stock and owed balance, snapshot versions.
        let (lot_version, credit_versions, price) = {
            let state = self.state.read().await;
            let lot = state.vault.require(payment.lot_id)?;
            if lot.tenant != payment.tenant {
                return Err(AurumError::LotNotFound {
                    lot_id: payment.lot_id.to_string(),
                });
            }
            if lot.metal != payment.metal {
                return Err(AurumError::invalid_input(
                    "lot_id",
                    "lot metal does not match the payment metal",
                ));
            }
            if lot.status == LotStatus::Used || payment.grams > lot.remaining_grams {
                return Err(AurumError::InsufficientStock {
                    lot_id: payment.lot_id.to_string(),
                    requested: payment.grams.value(),
                    available: lot.remaining_grams.value(),
                });
            }

            let open =
                state
                    .credits
                    .open_for_client(payment.tenant, payment.client, payment.metal);
            let total_open = open
                .iter()
                .try_fold(Grams::ZERO, |acc, c| acc.checked_add(c.remaining))?;
            let headroom = total_open.checked_add(GRAM_TOLERANCE)?;
            if payment.grams > headroom {
                return Err(AurumError::ExceedsBalance {
                    requested: payment.grams.value(),
                    available: total_open.value(),
                });
            }

            let price =
                state
                    .quotes
                    .buy_price_for(payment.tenant, payment.metal, payment.date, None)?;
            let versions: Vec<(CreditId, u64)> = open.iter().map(|c| (c.id, c.version)).collect();
            (lot.version, versions, price)
        };

        // Collaborator phase: resolve posting accounts with no guard held.
        let production = self
            .directory
            .account_by_code(payment.tenant, AccountCode::ProductionCost)
            .await?;
        let stock = self
            .directory
            .account_by_code(payment.tenant, AccountCode::MetalStock)
            .await?;

        // Commit phase: re-check both snapshots, plan, then apply.
        let mut state = self.state.write().await;
        if state.vault.require(payment.lot_id)?.version != lot_version {
            return Err(AurumError::conflict(format!("lot {}", payment.lot_id)));
        }
        let open = state
            .credits
            .open_for_client(payment.tenant, payment.client, payment.metal);
        let live_versions: Vec<(CreditId, u64)> =
            open.iter().map(|c| (c.id, c.version)).collect();
        if live_versions != credit_versions {
            return Err(AurumError::conflict(format!(
                "metal credits of client {}",
                payment.client
            )));
        }

        // Plan: currency value, FIFO allocation, ledger pair.
        let amount = payment.grams.to_money(price)?;
        let mut updated_credits = Vec::new();
        let mut allocations = Vec::new();
        let mut left = payment.grams;
        for credit in &open {
            if !left.is_positive() {
                break;
            }
            let slice = left.min(credit.remaining);
            updated_credits.push(credit.apply_settlement(slice)?);
            allocations.push(CreditAllocation {
                credit_id: credit.id,
                grams: slice,
            });
            left = left.checked_sub(slice)?;
        }

        let suffix = payment
            .notes
            .as_deref()
            .map(|notes| format!(" - {notes}"))
            .unwrap_or_default();
        let pair = PairSpec::balanced(
            payment.tenant,
            payment.date,
            format!("Metal payment to client {}{}", payment.client, suffix),
            amount,
            LegSpec::with_metal(production, payment.grams),
            LegSpec::with_metal(stock, payment.grams.negate()),
        )?;
        let exit_notes = format!("Payment to client {}{}", payment.client, suffix);

        // Apply: the lot exit runs first; with the version check passed it
        // cannot fail against the validated stock.
        let movement = state
            .vault
            .exit(payment.lot_id, payment.grams, payment.date, exit_notes)?;
        let (debit_tx, credit_tx) = state.ledger.post_pair(pair);
        for updated in updated_credits {
            state.credits.store(updated);
        }
        let account = state
            .accounts
            .get_or_create(payment.tenant, payment.client, payment.metal);
        state.accounts.append(MetalAccountEntry {
            id: EntryId::new(),
            account: account.id,
            date: payment.date,
            grams: payment.grams.negate(),
            kind: EntryKind::MetalPayment,
            description: format!("Metal payment from lot {}", payment.lot_id),
            source: EntrySource::Movement(movement.id),
            created_at: Utc::now(),
        });

        info!(
            "Paid {} of {} to client {} from lot {} across {} credits",
            payment.grams,
            payment.metal,
            payment.client,
            payment.lot_id,
            allocations.len()
        );

        Ok(MetalPaymentReceipt {
            movement: movement.id,
            debit_transaction: debit_tx,
            credit_transaction: credit_tx,
            grams: payment.grams,
            amount,
            price_per_gram: price,
            allocations,
        })
    }

    // ========================================================================
    // Reversal
    // ========================================================================

    /// Reverse a posted pair: void both legs and post the opposite pair.
    ///
    /// The ledger alone is touched; credits and metal accounts keep their
    /// history and need their own compensating operations.
    pub async fn reverse_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<(TransactionId, TransactionId)> {
        let mut state = self.state.write().await;
        let pair = state.ledger.reverse(transaction_id)?;
        info!(
            "Reversed transaction {} into pair {} / {}",
            transaction_id, pair.0, pair.1
        );
        Ok(pair)
    }

    // ========================================================================
    // Query Surface
    // ========================================================================

    /// One credit by id.
    pub async fn credit(&self, credit_id: CreditId) -> Result<MetalCredit> {
        let state = self.state.read().await;
        Ok(state.credits.require(credit_id)?.clone())
    }

    /// All credits of a client, oldest first.
    pub async fn credits_for_client(
        &self,
        tenant: TenantId,
        client: ClientId,
    ) -> Vec<MetalCredit> {
        let state = self.state.read().await;
        state.credits.credits_for_client(tenant, client)
    }

    /// A client's position in one metal: credits, balance, and account
    /// entries joined with their ledger transactions.
    pub async fn client_statement(
        &self,
        tenant: TenantId,
        client: ClientId,
        metal: Metal,
    ) -> Result<ClientStatement> {
        let state = self.state.read().await;
        let credits = state
            .credits
            .credits_for_client(tenant, client)
            .into_iter()
            .filter(|c| c.metal == metal)
            .collect();
        let (balance, lines) = match state.accounts.find(tenant, client, metal) {
            Some(account) => {
                let balance = state.accounts.balance(account.id)?;
                let lines = state
                    .accounts
                    .entries_for(account.id)
                    .into_iter()
                    .map(|entry| {
                        let transaction = match entry.source {
                            EntrySource::Transaction(id) => state.ledger.get(id).cloned(),
                            _ => None,
                        };
                        StatementLine { entry, transaction }
                    })
                    .collect();
                (balance, lines)
            }
            None => (Grams::ZERO, Vec::new()),
        };
        Ok(ClientStatement {
            credits,
            balance,
            lines,
        })
    }

    /// Derived gram balance of a client's metal account.
    pub async fn metal_balance(
        &self,
        tenant: TenantId,
        client: ClientId,
        metal: Metal,
    ) -> Result<Grams> {
        let state = self.state.read().await;
        match state.accounts.find(tenant, client, metal) {
            Some(account) => state.accounts.balance(account.id),
            None => Ok(Grams::ZERO),
        }
    }

    /// Derived fiat balance of a cash book.
    pub async fn cash_balance(&self, cash_account: CashAccountId) -> Result<Money> {
        let state = self.state.read().await;
        state.ledger.cash_balance(cash_account)
    }

    /// Derived metal position of a ledger account.
    pub async fn metal_position(&self, account: AccountId) -> Result<Grams> {
        let state = self.state.read().await;
        state.ledger.metal_position(account)
    }

    /// One ledger transaction by id.
    pub async fn transaction(&self, transaction_id: TransactionId) -> Result<LedgerTransaction> {
        let state = self.state.read().await;
        state
            .ledger
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| AurumError::TransactionNotFound {
                transaction_id: transaction_id.to_string(),
            })
    }

    /// A lot with its movement history.
    pub async fn lot_history(&self, lot_id: LotId) -> Result<LotHistory> {
        let state = self.state.read().await;
        let lot = state.vault.require(lot_id)?.clone();
        let movements = state.vault.movements_for(lot_id);
        Ok(LotHistory { lot, movements })
    }

    /// Desk-wide counters.
    pub async fn summary(&self) -> Result<DeskSummary> {
        let state = self.state.read().await;
        state.summary()
    }
}

/// Derive the (grams, amount) of a currency settlement.
///
/// Full payment starts from the remaining grams so the credit closes
/// exactly; a partial payment starts from the explicit amount and derives
/// grams through the price.
fn derive_quantities(
    credit: &MetalCredit,
    amount: Option<Money>,
    price: Money,
) -> Result<(Grams, Money)> {
    match amount {
        Some(amount) => {
            if !amount.is_positive() {
                return Err(AurumError::invalid_amount(
                    "amount",
                    "payment must be greater than zero",
                ));
            }
            Ok((amount.to_grams(price)?, amount))
        }
        None => {
            let grams = credit.remaining;
            Ok((grams, grams.to_money(price)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use rust_decimal_macros::dec;

    use aurum_ledger::{TransactionKind, TransactionStatus};
    use aurum_vault::MovementKind;

    use crate::directory::InMemoryDirectory;

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn grams(v: Decimal) -> Grams {
        Grams::new(v)
    }

    fn money(v: Decimal) -> Money {
        Money::new(v)
    }

    struct Desk {
        engine: SettlementEngine,
        tenant: TenantId,
        client: ClientId,
        cash_book: CashAccountId,
        payable: AccountId,
        bank: AccountId,
        receivable: AccountId,
        production: AccountId,
        stock: AccountId,
    }

    async fn desk() -> Desk {
        let tenant = TenantId::new();
        let client = ClientId::new();
        let cash_book = CashAccountId::new();
        let payable = AccountId::new();
        let bank = AccountId::new();
        let receivable = AccountId::new();
        let production = AccountId::new();
        let stock = AccountId::new();

        let directory = InMemoryDirectory::new();
        directory
            .set_account_code(tenant, AccountCode::MetalCreditPayable, payable)
            .await;
        directory
            .set_account_code(tenant, AccountCode::ProductionCost, production)
            .await;
        directory
            .set_account_code(tenant, AccountCode::MetalStock, stock)
            .await;
        directory.set_cash_backing(tenant, cash_book, bank).await;

        Desk {
            engine: SettlementEngine::new(Arc::new(directory)),
            tenant,
            client,
            cash_book,
            payable,
            bank,
            receivable,
            production,
            stock,
        }
    }

    async fn approve(desk: &Desk, face: Grams, date: NaiveDate) -> MetalCredit {
        desk.engine
            .record_approval(ApprovalRecord {
                tenant: desk.tenant,
                client: desk.client,
                analysis: AnalysisId::new(),
                metal: Metal::Gold,
                grams: face,
                date,
            })
            .await
            .unwrap()
    }

    async fn quote_gold(desk: &Desk, date: NaiveDate, buy: Decimal) {
        desk.engine
            .register_quotation(
                desk.tenant,
                Metal::Gold,
                date,
                money(buy),
                money(buy + dec!(20)),
            )
            .await
            .unwrap();
    }

    fn full_payment(credit_id: CreditId, date: NaiveDate) -> CurrencySettlement {
        CurrencySettlement {
            credit_id,
            date,
            amount: None,
            price_override: None,
        }
    }

    fn partial_payment(credit_id: CreditId, date: NaiveDate, amount: Money) -> CurrencySettlement {
        CurrencySettlement {
            credit_id,
            date,
            amount: Some(amount),
            price_override: None,
        }
    }

    #[tokio::test]
    async fn full_cash_settlement_closes_credit_exactly() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let credit = approve(&desk, grams(dec!(12.3456)), day(1)).await;

        let receipt = desk
            .engine
            .settle_with_cash(full_payment(credit.id, day(10)), desk.cash_book)
            .await
            .unwrap();

        assert_eq!(receipt.amount, money(dec!(4320.96)));
        assert_eq!(receipt.grams_settled, grams(dec!(12.3456)));
        assert_eq!(receipt.price_per_gram, money(dec!(350.00)));
        assert_eq!(receipt.credit.status, CreditStatus::Paid);
        assert!(receipt.credit.remaining.is_zero());
        assert_eq!(receipt.credit.settled, grams(dec!(12.3456)));
        assert_eq!(receipt.credit.version, 1);

        let debit = desk
            .engine
            .transaction(receipt.debit_transaction)
            .await
            .unwrap();
        assert_eq!(debit.kind, TransactionKind::Debit);
        assert_eq!(debit.account, desk.payable);
        assert_eq!(debit.metal_delta, Some(grams(dec!(-12.3456))));
        assert_eq!(debit.linked, Some(receipt.credit_transaction));

        let funding = desk
            .engine
            .transaction(receipt.credit_transaction)
            .await
            .unwrap();
        assert_eq!(funding.kind, TransactionKind::Credit);
        assert_eq!(funding.account, desk.bank);
        assert_eq!(funding.cash_account, Some(desk.cash_book));
        assert_eq!(funding.metal_delta, None);

        let cash = desk.engine.cash_balance(desk.cash_book).await.unwrap();
        assert_eq!(cash, money(dec!(4320.96)));
        let balance = desk
            .engine
            .metal_balance(desk.tenant, desk.client, Metal::Gold)
            .await
            .unwrap();
        assert!(balance.is_zero());
        let payable_position = desk.engine.metal_position(desk.payable).await.unwrap();
        assert_eq!(payable_position, grams(dec!(-12.3456)));
    }

    #[tokio::test]
    async fn partial_cash_settlement_derives_grams_from_amount() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let credit = approve(&desk, grams(dec!(10)), day(1)).await;

        let receipt = desk
            .engine
            .settle_with_cash(
                partial_payment(credit.id, day(10), money(dec!(700.00))),
                desk.cash_book,
            )
            .await
            .unwrap();

        assert_eq!(receipt.grams_settled, grams(dec!(2)));
        assert_eq!(receipt.amount, money(dec!(700.00)));
        assert_eq!(receipt.credit.remaining, grams(dec!(8)));
        assert_eq!(receipt.credit.settled, grams(dec!(2)));
        assert_eq!(receipt.credit.status, CreditStatus::PartiallyPaid);
        assert_eq!(receipt.credit.face_value().unwrap(), grams(dec!(10)));

        let second = desk
            .engine
            .settle_with_cash(
                partial_payment(credit.id, day(12), money(dec!(2450.00))),
                desk.cash_book,
            )
            .await
            .unwrap();
        assert_eq!(second.grams_settled, grams(dec!(7)));
        assert_eq!(second.credit.remaining, grams(dec!(1)));
        assert_eq!(second.credit.version, 2);
        assert_eq!(second.credit.status, CreditStatus::PartiallyPaid);
    }

    #[tokio::test]
    async fn partial_then_full_payment_conserves_face_value() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let credit = approve(&desk, grams(dec!(10)), day(1)).await;

        // An awkward amount whose gram equivalent has a long expansion.
        desk.engine
            .settle_with_cash(
                partial_payment(credit.id, day(5), money(dec!(333.33))),
                desk.cash_book,
            )
            .await
            .unwrap();

        let receipt = desk
            .engine
            .settle_with_cash(full_payment(credit.id, day(6)), desk.cash_book)
            .await
            .unwrap();

        assert_eq!(receipt.credit.status, CreditStatus::Paid);
        assert!(receipt.credit.remaining.is_zero());
        assert_eq!(receipt.credit.face_value().unwrap(), grams(dec!(10)));
    }

    #[tokio::test]
    async fn client_credit_settlement_posts_to_receivable() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let credit = approve(&desk, grams(dec!(5)), day(1)).await;

        let receipt = desk
            .engine
            .settle_with_client_credit(full_payment(credit.id, day(10)), desk.receivable)
            .await
            .unwrap();

        assert_eq!(receipt.credit.status, CreditStatus::Paid);
        let funding = desk
            .engine
            .transaction(receipt.credit_transaction)
            .await
            .unwrap();
        assert_eq!(funding.account, desk.receivable);
        assert_eq!(funding.cash_account, None);
        assert_eq!(funding.metal_delta, None);

        let statement = desk
            .engine
            .client_statement(desk.tenant, desk.client, Metal::Gold)
            .await
            .unwrap();
        assert!(statement.balance.is_zero());
        assert_eq!(statement.lines.len(), 2);
        let line = &statement.lines[1];
        assert_eq!(line.entry.kind, EntryKind::ClientCreditPayment);
        assert_eq!(line.entry.grams, grams(dec!(-5)));
        assert_eq!(
            line.entry.source,
            EntrySource::Transaction(receipt.debit_transaction)
        );
        let joined = line.transaction.as_ref().unwrap();
        assert_eq!(joined.id, receipt.debit_transaction);
    }

    #[tokio::test]
    async fn oversized_settlement_fails_without_mutation() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let credit = approve(&desk, grams(dec!(1)), day(1)).await;

        // 700.00 at 350.00/g asks for 2 g against a 1 g credit.
        let err = desk
            .engine
            .settle_with_cash(
                partial_payment(credit.id, day(10), money(dec!(700.00))),
                desk.cash_book,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AurumError::ExceedsBalance { .. }));

        let untouched = desk.engine.credit(credit.id).await.unwrap();
        assert_eq!(untouched.status, CreditStatus::Pending);
        assert_eq!(untouched.remaining, grams(dec!(1)));
        assert_eq!(untouched.version, 0);

        let summary = desk.engine.summary().await.unwrap();
        assert_eq!(summary.transaction_count, 0);
        assert_eq!(summary.entry_count, 1);
        let cash = desk.engine.cash_balance(desk.cash_book).await.unwrap();
        assert!(cash.is_zero());
    }

    #[tokio::test]
    async fn settlement_without_quotation_fails() {
        let desk = desk().await;
        let credit = approve(&desk, grams(dec!(5)), day(1)).await;

        let err = desk
            .engine
            .settle_with_cash(full_payment(credit.id, day(10)), desk.cash_book)
            .await
            .unwrap_err();
        assert!(matches!(err, AurumError::QuotationNotFound { .. }));
    }

    #[tokio::test]
    async fn override_price_bypasses_the_board() {
        let desk = desk().await;
        let credit = approve(&desk, grams(dec!(5)), day(1)).await;

        let receipt = desk
            .engine
            .settle_with_cash(
                CurrencySettlement {
                    credit_id: credit.id,
                    date: day(10),
                    amount: None,
                    price_override: Some(money(dec!(360.00))),
                },
                desk.cash_book,
            )
            .await
            .unwrap();

        assert_eq!(receipt.amount, money(dec!(1800.00)));
        assert_eq!(receipt.price_per_gram, money(dec!(360.00)));
        assert_eq!(receipt.credit.status, CreditStatus::Paid);

        let summary = desk.engine.summary().await.unwrap();
        assert_eq!(summary.quotation_count, 0);
    }

    #[tokio::test]
    async fn unmapped_payable_account_fails_not_configured() {
        let tenant = TenantId::new();
        let client = ClientId::new();
        let directory = InMemoryDirectory::new();
        let engine = SettlementEngine::new(Arc::new(directory));

        let credit = engine
            .record_approval(ApprovalRecord {
                tenant,
                client,
                analysis: AnalysisId::new(),
                metal: Metal::Gold,
                grams: grams(dec!(5)),
                date: day(1),
            })
            .await
            .unwrap();

        let err = engine
            .settle_with_cash(
                CurrencySettlement {
                    credit_id: credit.id,
                    date: day(10),
                    amount: None,
                    price_override: Some(money(dec!(350.00))),
                },
                CashAccountId::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AurumError::NotConfigured { ref setting } if setting == "metal_credit_payable_account"
        ));

        let summary = engine.summary().await.unwrap();
        assert_eq!(summary.transaction_count, 0);
        assert_eq!(engine.credit(credit.id).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn unknown_cash_book_fails() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let credit = approve(&desk, grams(dec!(5)), day(1)).await;

        let err = desk
            .engine
            .settle_with_cash(full_payment(credit.id, day(10)), CashAccountId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AurumError::CashAccountNotFound { .. }));
    }

    #[tokio::test]
    async fn metal_payment_allocates_fifo_oldest_first() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let first = approve(&desk, grams(dec!(5)), day(1)).await;
        let second = approve(&desk, grams(dec!(3)), day(2)).await;
        let third = approve(&desk, grams(dec!(10)), day(3)).await;
        let lot = desk
            .engine
            .register_lot(
                desk.tenant,
                Metal::Gold,
                dec!(0.999),
                grams(dec!(100)),
                "recovery batch 12",
                day(1),
            )
            .await
            .unwrap();

        let receipt = desk
            .engine
            .pay_client_with_metal(MetalPayment {
                tenant: desk.tenant,
                client: desk.client,
                metal: Metal::Gold,
                lot_id: lot.id,
                grams: grams(dec!(9)),
                date: day(10),
                notes: Some("monthly payout".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(receipt.amount, money(dec!(3150.00)));
        assert_eq!(
            receipt.allocations,
            vec![
                CreditAllocation {
                    credit_id: first.id,
                    grams: grams(dec!(5))
                },
                CreditAllocation {
                    credit_id: second.id,
                    grams: grams(dec!(3))
                },
                CreditAllocation {
                    credit_id: third.id,
                    grams: grams(dec!(1))
                },
            ]
        );

        let credits = desk
            .engine
            .credits_for_client(desk.tenant, desk.client)
            .await;
        assert_eq!(credits[0].status, CreditStatus::Paid);
        assert!(credits[0].remaining.is_zero());
        assert_eq!(credits[1].status, CreditStatus::Paid);
        assert!(credits[1].remaining.is_zero());
        assert_eq!(credits[2].status, CreditStatus::PartiallyPaid);
        assert_eq!(credits[2].remaining, grams(dec!(9)));

        let history = desk.engine.lot_history(lot.id).await.unwrap();
        assert_eq!(history.lot.remaining_grams, grams(dec!(91)));
        assert_eq!(history.lot.status, LotStatus::Active);
        assert_eq!(history.movements.len(), 2);
        assert_eq!(history.movements[1].kind, MovementKind::Exit);
        assert_eq!(history.movements[1].grams, grams(dec!(9)));

        let production = desk.engine.metal_position(desk.production).await.unwrap();
        assert_eq!(production, grams(dec!(9)));
        let stock = desk.engine.metal_position(desk.stock).await.unwrap();
        assert_eq!(stock, grams(dec!(-9)));

        let balance = desk
            .engine
            .metal_balance(desk.tenant, desk.client, Metal::Gold)
            .await
            .unwrap();
        assert_eq!(balance, grams(dec!(9)));
        // Three originations plus one payment entry for the whole batch.
        let summary = desk.engine.summary().await.unwrap();
        assert_eq!(summary.entry_count, 4);
    }

    #[tokio::test]
    async fn metal_payment_stops_when_grams_run_out() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let first = approve(&desk, grams(dec!(5)), day(1)).await;
        let second = approve(&desk, grams(dec!(3)), day(2)).await;
        let third = approve(&desk, grams(dec!(10)), day(3)).await;
        let lot = desk
            .engine
            .register_lot(desk.tenant, Metal::Gold, dec!(0.999), grams(dec!(100)), "batch", day(1))
            .await
            .unwrap();

        let receipt = desk
            .engine
            .pay_client_with_metal(MetalPayment {
                tenant: desk.tenant,
                client: desk.client,
                metal: Metal::Gold,
                lot_id: lot.id,
                grams: grams(dec!(6)),
                date: day(10),
                notes: None,
            })
            .await
            .unwrap();

        assert_eq!(
            receipt.allocations,
            vec![
                CreditAllocation {
                    credit_id: first.id,
                    grams: grams(dec!(5))
                },
                CreditAllocation {
                    credit_id: second.id,
                    grams: grams(dec!(1))
                },
            ]
        );

        let credits = desk
            .engine
            .credits_for_client(desk.tenant, desk.client)
            .await;
        assert!(credits[0].remaining.is_zero());
        assert_eq!(credits[1].remaining, grams(dec!(2)));
        assert_eq!(credits[2].remaining, grams(dec!(10)));
        assert_eq!(credits[2].id, third.id);
        assert_eq!(credits[2].version, 0);
    }

    #[tokio::test]
    async fn metal_payment_beyond_owed_fails_loudly() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        approve(&desk, grams(dec!(5)), day(1)).await;
        approve(&desk, grams(dec!(3)), day(2)).await;
        let lot = desk
            .engine
            .register_lot(desk.tenant, Metal::Gold, dec!(0.999), grams(dec!(50)), "batch", day(1))
            .await
            .unwrap();

        let err = desk
            .engine
            .pay_client_with_metal(MetalPayment {
                tenant: desk.tenant,
                client: desk.client,
                metal: Metal::Gold,
                lot_id: lot.id,
                grams: grams(dec!(9)),
                date: day(10),
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AurumError::ExceedsBalance { requested, available }
                if requested == dec!(9) && available == dec!(8)
        ));

        // Nothing moved: stock, movements, ledger, credits.
        let history = desk.engine.lot_history(lot.id).await.unwrap();
        assert_eq!(history.lot.remaining_grams, grams(dec!(50)));
        assert_eq!(history.lot.version, 0);
        assert_eq!(history.movements.len(), 1);
        let summary = desk.engine.summary().await.unwrap();
        assert_eq!(summary.transaction_count, 0);
        let credits = desk
            .engine
            .credits_for_client(desk.tenant, desk.client)
            .await;
        assert_eq!(credits[0].remaining, grams(dec!(5)));
        assert_eq!(credits[1].remaining, grams(dec!(3)));
    }

    #[tokio::test]
    async fn metal_payment_with_insufficient_stock_fails() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        approve(&desk, grams(dec!(20)), day(1)).await;
        let lot = desk
            .engine
            .register_lot(desk.tenant, Metal::Gold, dec!(0.999), grams(dec!(5)), "batch", day(1))
            .await
            .unwrap();

        let err = desk
            .engine
            .pay_client_with_metal(MetalPayment {
                tenant: desk.tenant,
                client: desk.client,
                metal: Metal::Gold,
                lot_id: lot.id,
                grams: grams(dec!(6)),
                date: day(10),
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AurumError::InsufficientStock { .. }));

        let history = desk.engine.lot_history(lot.id).await.unwrap();
        assert_eq!(history.lot.remaining_grams, grams(dec!(5)));
        assert_eq!(history.lot.version, 0);
    }

    #[tokio::test]
    async fn draining_lot_flips_used_and_blocks_further_payments() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        approve(&desk, grams(dec!(20)), day(1)).await;
        let lot = desk
            .engine
            .register_lot(desk.tenant, Metal::Gold, dec!(0.999), grams(dec!(9)), "batch", day(1))
            .await
            .unwrap();

        desk.engine
            .pay_client_with_metal(MetalPayment {
                tenant: desk.tenant,
                client: desk.client,
                metal: Metal::Gold,
                lot_id: lot.id,
                grams: grams(dec!(9)),
                date: day(10),
                notes: None,
            })
            .await
            .unwrap();

        let history = desk.engine.lot_history(lot.id).await.unwrap();
        assert_eq!(history.lot.status, LotStatus::Used);
        assert!(history.lot.remaining_grams.is_zero());

        let err = desk
            .engine
            .pay_client_with_metal(MetalPayment {
                tenant: desk.tenant,
                client: desk.client,
                metal: Metal::Gold,
                lot_id: lot.id,
                grams: grams(dec!(1)),
                date: day(11),
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AurumError::InsufficientStock { .. }));
    }

    #[tokio::test]
    async fn reversal_voids_the_pair_and_restores_balances() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let credit = approve(&desk, grams(dec!(12.3456)), day(1)).await;
        let receipt = desk
            .engine
            .settle_with_cash(full_payment(credit.id, day(10)), desk.cash_book)
            .await
            .unwrap();

        let (first, second) = desk
            .engine
            .reverse_transaction(receipt.debit_transaction)
            .await
            .unwrap();

        let cash = desk.engine.cash_balance(desk.cash_book).await.unwrap();
        assert!(cash.is_zero());
        let payable_position = desk.engine.metal_position(desk.payable).await.unwrap();
        assert!(payable_position.is_zero());

        let original = desk
            .engine
            .transaction(receipt.debit_transaction)
            .await
            .unwrap();
        assert_eq!(original.status, TransactionStatus::Adjusted);
        let reversal = desk.engine.transaction(first).await.unwrap();
        assert_eq!(reversal.status, TransactionStatus::Adjusted);
        assert!(reversal
            .description
            .starts_with("[REVERSAL] Adjustment of transaction"));
        assert_eq!(reversal.linked, Some(second));

        // The ledger reversal leaves the credit's own history alone.
        let after = desk.engine.credit(credit.id).await.unwrap();
        assert_eq!(after.status, CreditStatus::Paid);
    }

    #[tokio::test]
    async fn reversing_an_adjusted_transaction_fails() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let credit = approve(&desk, grams(dec!(5)), day(1)).await;
        let receipt = desk
            .engine
            .settle_with_cash(full_payment(credit.id, day(10)), desk.cash_book)
            .await
            .unwrap();

        desk.engine
            .reverse_transaction(receipt.debit_transaction)
            .await
            .unwrap();
        let err = desk
            .engine
            .reverse_transaction(receipt.debit_transaction)
            .await
            .unwrap_err();
        assert!(matches!(err, AurumError::TransactionAdjusted { .. }));
    }

    #[tokio::test]
    async fn approval_credits_the_metal_account() {
        let desk = desk().await;
        let credit = approve(&desk, grams(dec!(7)), day(2)).await;

        let balance = desk
            .engine
            .metal_balance(desk.tenant, desk.client, Metal::Gold)
            .await
            .unwrap();
        assert_eq!(balance, grams(dec!(7)));

        let statement = desk
            .engine
            .client_statement(desk.tenant, desk.client, Metal::Gold)
            .await
            .unwrap();
        assert_eq!(statement.credits.len(), 1);
        assert_eq!(statement.lines.len(), 1);
        let line = &statement.lines[0];
        assert_eq!(line.entry.kind, EntryKind::Credit);
        assert_eq!(line.entry.grams, grams(dec!(7)));
        assert_eq!(line.entry.source, EntrySource::Credit(credit.id));
        assert!(line.transaction.is_none());
    }

    #[tokio::test]
    async fn revert_approval_removes_credit_and_entry() {
        let desk = desk().await;
        let credit = approve(&desk, grams(dec!(7)), day(2)).await;

        let removed = desk.engine.revert_approval(credit.id).await.unwrap();
        assert_eq!(removed.id, credit.id);

        assert!(desk
            .engine
            .credits_for_client(desk.tenant, desk.client)
            .await
            .is_empty());
        let balance = desk
            .engine
            .metal_balance(desk.tenant, desk.client, Metal::Gold)
            .await
            .unwrap();
        assert!(balance.is_zero());
        let summary = desk.engine.summary().await.unwrap();
        assert_eq!(summary.entry_count, 0);
    }

    #[tokio::test]
    async fn revert_after_settlement_is_rejected() {
        let desk = desk().await;
        quote_gold(&desk, day(1), dec!(350.00)).await;
        let credit = approve(&desk, grams(dec!(10)), day(1)).await;
        desk.engine
            .settle_with_cash(
                partial_payment(credit.id, day(10), money(dec!(700.00))),
                desk.cash_book,
            )
            .await
            .unwrap();

        let err = desk.engine.revert_approval(credit.id).await.unwrap_err();
        assert!(matches!(err, AurumError::Conflict { .. }));

        let still_there = desk.engine.credit(credit.id).await.unwrap();
        assert_eq!(still_there.status, CreditStatus::PartiallyPaid);
    }

    /// Directory that settles the target credit itself while the engine is
    /// between its read and commit phases, forcing a version conflict.
    struct SabotagingDirectory {
        inner: InMemoryDirectory,
        engine: StdMutex<Option<SettlementEngine>>,
        target: StdMutex<Option<(CreditId, AccountId)>>,
        once: bool,
        fired: AtomicBool,
        in_flight: AtomicBool,
    }

    impl SabotagingDirectory {
        fn new(inner: InMemoryDirectory, once: bool) -> Self {
            Self {
                inner,
                engine: StdMutex::new(None),
                target: StdMutex::new(None),
                once,
                fired: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
            }
        }

        fn arm(&self, engine: SettlementEngine, credit_id: CreditId, receivable: AccountId) {
            *self.engine.lock().unwrap() = Some(engine);
            *self.target.lock().unwrap() = Some((credit_id, receivable));
        }
    }

    #[async_trait::async_trait]
    impl AccountDirectory for SabotagingDirectory {
        async fn account_by_code(&self, tenant: TenantId, code: AccountCode) -> Result<AccountId> {
            // The nested settlement calls back in here; the in-flight flag
            // keeps it from sabotaging itself.
            if !self.in_flight.swap(true, Ordering::SeqCst) {
                let fire = !self.once || !self.fired.swap(true, Ordering::SeqCst);
                if fire {
                    let engine = self.engine.lock().unwrap().clone();
                    let target = *self.target.lock().unwrap();
                    if let (Some(engine), Some((credit_id, receivable))) = (engine, target) {
                        engine
                            .settle_with_client_credit(
                                CurrencySettlement {
                                    credit_id,
                                    date: day(10),
                                    amount: Some(money(dec!(350.00))),
                                    price_override: Some(money(dec!(350.00))),
                                },
                                receivable,
                            )
                            .await
                            .unwrap();
                    }
                }
                self.in_flight.store(false, Ordering::SeqCst);
            }
            self.inner.account_by_code(tenant, code).await
        }

        async fn cash_account_backing(
            &self,
            tenant: TenantId,
            cash_account: CashAccountId,
        ) -> Result<AccountId> {
            self.inner.cash_account_backing(tenant, cash_account).await
        }
    }

    #[tokio::test]
    async fn commit_retry_recovers_from_one_conflict() {
        let tenant = TenantId::new();
        let client = ClientId::new();
        let payable = AccountId::new();
        let receivable = AccountId::new();

        let inner = InMemoryDirectory::new();
        inner
            .set_account_code(tenant, AccountCode::MetalCreditPayable, payable)
            .await;
        let directory = Arc::new(SabotagingDirectory::new(inner, true));
        let engine = SettlementEngine::new(directory.clone());

        let credit = engine
            .record_approval(ApprovalRecord {
                tenant,
                client,
                analysis: AnalysisId::new(),
                metal: Metal::Gold,
                grams: grams(dec!(10)),
                date: day(1),
            })
            .await
            .unwrap();
        directory.arm(engine.clone(), credit.id, receivable);

        // The sabotage settles 1 g mid-flight; the retry re-reads and pays
        // out the remaining 9 g.
        let receipt = engine
            .settle_with_client_credit(
                CurrencySettlement {
                    credit_id: credit.id,
                    date: day(10),
                    amount: None,
                    price_override: Some(money(dec!(350.00))),
                },
                receivable,
            )
            .await
            .unwrap();

        assert_eq!(receipt.grams_settled, grams(dec!(9)));
        assert_eq!(receipt.credit.status, CreditStatus::Paid);
        assert!(receipt.credit.remaining.is_zero());
        assert_eq!(receipt.credit.version, 2);
        assert_eq!(receipt.credit.face_value().unwrap(), grams(dec!(10)));
    }

    #[tokio::test]
    async fn persistent_conflict_surfaces_after_retries() {
        let tenant = TenantId::new();
        let client = ClientId::new();
        let payable = AccountId::new();
        let receivable = AccountId::new();

        let inner = InMemoryDirectory::new();
        inner
            .set_account_code(tenant, AccountCode::MetalCreditPayable, payable)
            .await;
        let directory = Arc::new(SabotagingDirectory::new(inner, false));
        let engine = SettlementEngine::new(directory.clone());

        let credit = engine
            .record_approval(ApprovalRecord {
                tenant,
                client,
                analysis: AnalysisId::new(),
                metal: Metal::Gold,
                grams: grams(dec!(10)),
                date: day(1),
            })
            .await
            .unwrap();
        directory.arm(engine.clone(), credit.id, receivable);

        let err = engine
            .settle_with_client_credit(
                CurrencySettlement {
                    credit_id: credit.id,
                    date: day(10),
                    amount: None,
                    price_override: Some(money(dec!(350.00))),
                },
                receivable,
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFLICT");

        // Both attempts lost the race to the sabotage's two 1 g settlements.
        let after = engine.credit(credit.id).await.unwrap();
        assert_eq!(after.remaining, grams(dec!(8)));
        assert_eq!(after.version, 2);
        assert_eq!(after.status, CreditStatus::PartiallyPaid);
    }
}
