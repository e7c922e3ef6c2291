//! Aurum Desk - deterministic settlement scenario
//!
//! Runs one trading month of the metal desk end to end: quotations, vault
//! intake, credit originations, all three settlement flows, a reversal, and
//! an origination revert, then prints the client statement and desk summary
//! as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Default settings
//! aurum-desk
//!
//! # Environment overrides
//! AURUM_COMMIT_RETRIES=3 AURUM_LOG_LEVEL=debug aurum-desk
//! ```

use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use rust_decimal_macros::dec;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aurum_settlement::{
    AccountCode, ApprovalRecord, CurrencySettlement, InMemoryDirectory, MetalPayment,
    SettlementConfig, SettlementEngine,
};
use aurum_types::{
    AccountId, AnalysisId, CashAccountId, ClientId, Grams, Metal, Money, TenantId,
};

/// Aurum Desk - metal-credit settlement scenario
#[derive(Parser, Debug)]
#[command(name = "aurum-desk")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Commit retries after an optimistic conflict
    #[arg(long, env = "AURUM_COMMIT_RETRIES", default_value_t = 1)]
    commit_retries: u32,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "AURUM_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn day(d: u32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(2026, 3, d).context("day outside March 2026")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting the Aurum settlement desk"
    );

    // ========================================================================
    // Phase 0: Chart of accounts
    // ========================================================================

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

    let engine = SettlementEngine::with_config(
        Arc::new(directory),
        SettlementConfig {
            commit_retries: args.commit_retries,
        },
    );

    // ========================================================================
    // Phase 1: Market data
    // ========================================================================

    engine
        .register_quotation(
            tenant,
            Metal::Gold,
            day(1)?,
            Money::new(dec!(350.00)),
            Money::new(dec!(370.00)),
        )
        .await?;
    engine
        .register_quotation(
            tenant,
            Metal::Silver,
            day(1)?,
            Money::new(dec!(4.20)),
            Money::new(dec!(4.55)),
        )
        .await?;
    engine
        .register_quotation(
            tenant,
            Metal::Gold,
            day(8)?,
            Money::new(dec!(352.50)),
            Money::new(dec!(372.00)),
        )
        .await?;

    // ========================================================================
    // Phase 2: Vault intake
    // ========================================================================

    let lot = engine
        .register_lot(
            tenant,
            Metal::Gold,
            dec!(0.999),
            Grams::new(dec!(100)),
            "Recovery batch 2026-11",
            day(1)?,
        )
        .await?;

    // ========================================================================
    // Phase 3: Credit originations from approved analyses
    // ========================================================================

    let first = engine
        .record_approval(ApprovalRecord {
            tenant,
            client,
            analysis: AnalysisId::new(),
            metal: Metal::Gold,
            grams: Grams::new(dec!(5)),
            date: day(1)?,
        })
        .await?;
    let second = engine
        .record_approval(ApprovalRecord {
            tenant,
            client,
            analysis: AnalysisId::new(),
            metal: Metal::Gold,
            grams: Grams::new(dec!(3)),
            date: day(2)?,
        })
        .await?;
    engine
        .record_approval(ApprovalRecord {
            tenant,
            client,
            analysis: AnalysisId::new(),
            metal: Metal::Gold,
            grams: Grams::new(dec!(10)),
            date: day(3)?,
        })
        .await?;
    engine
        .record_approval(ApprovalRecord {
            tenant,
            client,
            analysis: AnalysisId::new(),
            metal: Metal::Silver,
            grams: Grams::new(dec!(120)),
            date: day(2)?,
        })
        .await?;

    // ========================================================================
    // Phase 4: Partial cash settlement (705.00 at 352.50/g settles 2 g)
    // ========================================================================

    let cash_receipt = engine
        .settle_with_cash(
            CurrencySettlement {
                credit_id: first.id,
                date: day(10)?,
                amount: Some(Money::new(dec!(705.00))),
                price_override: None,
            },
            cash_book,
        )
        .await?;
    info!(
        "Cash settlement applied {} for {}; credit now {:?}",
        cash_receipt.grams_settled, cash_receipt.amount, cash_receipt.credit.status
    );

    // ========================================================================
    // Phase 5: Full client-credit settlement of the second credit
    // ========================================================================

    let offset_receipt = engine
        .settle_with_client_credit(
            CurrencySettlement {
                credit_id: second.id,
                date: day(11)?,
                amount: None,
                price_override: None,
            },
            receivable,
        )
        .await?;
    info!(
        "Client-credit settlement applied {} for {}; credit now {:?}",
        offset_receipt.grams_settled, offset_receipt.amount, offset_receipt.credit.status
    );

    // ========================================================================
    // Phase 6: Physical-metal payment, allocated FIFO
    // ========================================================================

    let payout = engine
        .pay_client_with_metal(MetalPayment {
            tenant,
            client,
            metal: Metal::Gold,
            lot_id: lot.id,
            grams: Grams::new(dec!(9)),
            date: day(12)?,
            notes: Some("Monthly metal payout".to_string()),
        })
        .await?;
    info!(
        "Metal payment of {} valued at {} drew movement {}",
        payout.grams, payout.amount, payout.movement
    );
    for allocation in &payout.allocations {
        info!("  credit {} received {}", allocation.credit_id, allocation.grams);
    }

    // ========================================================================
    // Phase 7: Reversal of the cash settlement pair
    // ========================================================================

    let cash_before = engine.cash_balance(cash_book).await?;
    let (reversal_debit, reversal_credit) = engine
        .reverse_transaction(cash_receipt.debit_transaction)
        .await?;
    let cash_after = engine.cash_balance(cash_book).await?;
    info!(
        "Cash book went {} -> {} after reversal pair {} / {}",
        cash_before, cash_after, reversal_debit, reversal_credit
    );

    // ========================================================================
    // Phase 8: Origination withdrawn before any settlement
    // ========================================================================

    let withdrawn = engine
        .record_approval(ApprovalRecord {
            tenant,
            client,
            analysis: AnalysisId::new(),
            metal: Metal::Gold,
            grams: Grams::new(dec!(2.5)),
            date: day(14)?,
        })
        .await?;
    engine.revert_approval(withdrawn.id).await?;

    // ========================================================================
    // Phase 9: Statement and desk summary
    // ========================================================================

    let balance = engine.metal_balance(tenant, client, Metal::Gold).await?;
    let payable_position = engine.metal_position(payable).await?;
    let production_position = engine.metal_position(production).await?;
    let stock_position = engine.metal_position(stock).await?;
    info!(
        "Positions: client {}, payable {}, production {}, stock {}",
        balance, payable_position, production_position, stock_position
    );

    let statement = engine.client_statement(tenant, client, Metal::Gold).await?;
    println!("{}", serde_json::to_string_pretty(&statement)?);

    let summary = engine.summary().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("Scenario complete");
    Ok(())
}
