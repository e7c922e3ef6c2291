//! Aurum Quotes - time-indexed metal quotation board
//!
//! Quotations bridge the two units of the system: a per-gram buy/sell price
//! registered per (tenant, metal, calendar date). Settlements convert grams
//! to currency (and back) through the buy price applicable on the settlement
//! date.
//!
//! # Invariants
//!
//! 1. At most one quotation per (tenant, metal, date); registration upserts
//! 2. Resolution picks the greatest date at or before the requested one
//! 3. A resolved or override buy price is always strictly positive

use aurum_types::{AurumError, Metal, Money, QuoteId, Result, TenantId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A registered buy/sell price for one metal on one calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: QuoteId,
    pub tenant: TenantId,
    pub metal: Metal,
    pub date: NaiveDate,
    /// Price the refinery pays per gram; the settlement conversion rate
    pub buy_price: Money,
    /// Price the refinery charges per gram
    pub sell_price: Money,
    pub created_at: DateTime<Utc>,
}

/// The quotation board
///
/// Plain state, no interior locking; shared access is arbitrated by the
/// settlement engine's state guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteBoard {
    quotes: Vec<Quotation>,
}

impl QuoteBoard {
    /// Create an empty board
    pub fn new() -> Self {
        Self { quotes: Vec::new() }
    }

    /// Register a quotation for a calendar date
    ///
    /// Prices must be strictly positive. Registering again for the same
    /// (tenant, metal, date) updates the existing quotation in place.
    pub fn register(
        &mut self,
        tenant: TenantId,
        metal: Metal,
        date: NaiveDate,
        buy_price: Money,
        sell_price: Money,
    ) -> Result<Quotation> {
        if !buy_price.is_positive() {
            return Err(AurumError::invalid_amount(
                "buy_price",
                "price must be greater than zero",
            ));
        }
        if !sell_price.is_positive() {
            return Err(AurumError::invalid_amount(
                "sell_price",
                "price must be greater than zero",
            ));
        }

        // Upsert on the (tenant, metal, date) key
        if let Some(existing) = self
            .quotes
            .iter_mut()
            .find(|q| q.tenant == tenant && q.metal == metal && q.date == date)
        {
            existing.buy_price = buy_price;
            existing.sell_price = sell_price;
            return Ok(existing.clone());
        }

        let quote = Quotation {
            id: QuoteId::new(),
            tenant,
            metal,
            date,
            buy_price,
            sell_price,
            created_at: Utc::now(),
        };
        self.quotes.push(quote.clone());
        Ok(quote)
    }

    /// Resolve the quotation applicable on a date
    ///
    /// Picks the greatest registered date at or before the requested one;
    /// ties break by newest registration.
    pub fn resolve(&self, tenant: TenantId, metal: Metal, date: NaiveDate) -> Result<Quotation> {
        let quote = self
            .quotes
            .iter()
            .filter(|q| q.tenant == tenant && q.metal == metal && q.date <= date)
            .max_by_key(|q| (q.date, q.created_at))
            .ok_or_else(|| AurumError::QuotationNotFound {
                metal: metal.code().to_string(),
                date: date.to_string(),
            })?;

        if !quote.buy_price.is_positive() {
            return Err(AurumError::invalid_quote(format!(
                "quotation {} has a non-positive buy price",
                quote.id
            )));
        }

        Ok(quote.clone())
    }

    /// The per-gram buy price for a settlement
    ///
    /// An explicit override takes precedence over the board and must be
    /// strictly positive.
    pub fn buy_price_for(
        &self,
        tenant: TenantId,
        metal: Metal,
        date: NaiveDate,
        price_override: Option<Money>,
    ) -> Result<Money> {
        match price_override {
            Some(price) if price.is_positive() => Ok(price),
            Some(price) => Err(AurumError::invalid_quote(format!(
                "override price must be greater than zero, got {price}"
            ))),
            None => Ok(self.resolve(tenant, metal, date)?.buy_price),
        }
    }

    /// Number of registered quotations
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Check if the board is empty
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}
