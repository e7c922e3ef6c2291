//! Chart-of-accounts resolution.
//!
//! Settlement postings land on ledger accounts that live outside the desk
//! state: the payable account for metal credits, the bank account behind a
//! cash book, the client's receivable. The engine resolves them through the
//! [`AccountDirectory`] trait while holding no state guard, so a slow or
//! remote directory never blocks the desk.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use aurum_types::{AccountId, AurumError, CashAccountId, Result, TenantId};

/// Chart-of-accounts roles the engine posts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountCode {
    /// Liability account carrying metal owed to clients.
    MetalCreditPayable,
    /// Expense account charged when physical metal leaves the refinery.
    ProductionCost,
    /// Asset account tracking refinery metal stock.
    MetalStock,
}

impl AccountCode {
    /// Name of the tenant setting that maps this role to an account.
    pub fn setting_name(&self) -> &'static str {
        match self {
            Self::MetalCreditPayable => "metal_credit_payable_account",
            Self::ProductionCost => "production_cost_account",
            Self::MetalStock => "metal_stock_account",
        }
    }
}

/// Resolves ledger accounts for settlement postings.
///
/// Implementations must not touch desk state; the engine calls these methods
/// between its read and commit phases with no guard held.
#[async_trait::async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Ledger account configured for a chart role.
    async fn account_by_code(&self, tenant: TenantId, code: AccountCode) -> Result<AccountId>;

    /// Ledger account backing a cash book.
    async fn cash_account_backing(
        &self,
        tenant: TenantId,
        cash_account: CashAccountId,
    ) -> Result<AccountId>;
}

/// In-memory directory with explicit wiring, used by tests and the demo desk.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    codes: RwLock<HashMap<(TenantId, AccountCode), AccountId>>,
    cash_backings: RwLock<HashMap<(TenantId, CashAccountId), AccountId>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a chart role to a ledger account.
    pub async fn set_account_code(&self, tenant: TenantId, code: AccountCode, account: AccountId) {
        self.codes.write().await.insert((tenant, code), account);
    }

    /// Map a cash book to its backing ledger account.
    pub async fn set_cash_backing(
        &self,
        tenant: TenantId,
        cash_account: CashAccountId,
        account: AccountId,
    ) {
        self.cash_backings
            .write()
            .await
            .insert((tenant, cash_account), account);
    }

}

#[async_trait::async_trait]
impl AccountDirectory for InMemoryDirectory {
    async fn account_by_code(&self, tenant: TenantId, code: AccountCode) -> Result<AccountId> {
        self.codes
            .read()
            .await
            .get(&(tenant, code))
            .copied()
            .ok_or_else(|| AurumError::not_configured(code.setting_name()))
    }

    async fn cash_account_backing(
        &self,
        tenant: TenantId,
        cash_account: CashAccountId,
    ) -> Result<AccountId> {
        self.cash_backings
            .read()
            .await
            .get(&(tenant, cash_account))
            .copied()
            .ok_or_else(|| AurumError::CashAccountNotFound {
                cash_account_id: cash_account.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_wired_accounts() {
        let directory = InMemoryDirectory::new();
        let tenant = TenantId::new();
        let payable = AccountId::new();
        let bank = AccountId::new();
        let cash = CashAccountId::new();

        directory
            .set_account_code(tenant, AccountCode::MetalCreditPayable, payable)
            .await;
        directory.set_cash_backing(tenant, cash, bank).await;

        let resolved = directory
            .account_by_code(tenant, AccountCode::MetalCreditPayable)
            .await
            .unwrap();
        assert_eq!(resolved, payable);

        let backing = directory.cash_account_backing(tenant, cash).await.unwrap();
        assert_eq!(backing, bank);
    }

    #[tokio::test]
    async fn missing_mappings_fail_with_setting_names() {
        let directory = InMemoryDirectory::new();
        let tenant = TenantId::new();

        let err = directory
            .account_by_code(tenant, AccountCode::MetalStock)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AurumError::NotConfigured { ref setting } if setting == "metal_stock_account"
        ));

        let cash = CashAccountId::new();
        let err = directory
            .cash_account_backing(tenant, cash)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CASH_ACCOUNT_NOT_FOUND");
    }
}
