//! Aurum Credits - metal credit lifecycle
//!
//! A metal credit is the refinery's debt of grams to a client, originated by
//! an approved chemical-analysis recovery and extinguished by settlements.
//! The settlement transition itself is pure: it consumes no storage and
//! returns the updated credit, so the engine can validate a whole plan before
//! mutating anything.
//!
//! # Invariants
//!
//! 1. `remaining + settled` equals the face value at origination, always
//! 2. `remaining` and `settled` are never negative
//! 3. Status is derived: paid iff `remaining` is within tolerance of zero
//! 4. A remaining balance within tolerance is clamped to exactly zero, and
//!    the leftover is what gets settled (conservation stays exact)

use std::collections::HashMap;

use aurum_types::{
    AnalysisId, AurumError, ClientId, CreditId, Grams, Metal, Result, TenantId, GRAM_TOLERANCE,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a metal credit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreditStatus {
    /// No settlement applied yet
    Pending,
    /// Some grams settled, some remaining
    PartiallyPaid,
    /// Remaining balance within tolerance of zero
    Paid,
}

/// The refinery's gram-denominated debt to one client from one analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalCredit {
    pub id: CreditId,
    pub tenant: TenantId,
    pub client: ClientId,
    /// Chemical analysis whose approval originated this credit
    pub analysis: AnalysisId,
    pub metal: Metal,
    pub remaining: Grams,
    pub settled: Grams,
    pub status: CreditStatus,
    /// Business date of the credit, FIFO allocation order
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped on every store
    pub version: u64,
}

impl MetalCredit {
    /// The grams owed at origination
    pub fn face_value(&self) -> Result<Grams> {
        self.remaining.checked_add(self.settled)
    }

    /// Check if the credit can still receive settlements
    pub fn is_open(&self) -> bool {
        self.status != CreditStatus::Paid
    }

    /// Apply a settlement of `grams`, returning the updated credit
    ///
    /// Pure: `self` is untouched. Validates `0 < grams <= remaining +
    /// tolerance`. When the new remaining balance lands within tolerance of
    /// zero it is clamped to exactly zero and the entire leftover counts as
    /// settled, keeping `remaining + settled` exact.
    pub fn apply_settlement(&self, grams: Grams) -> Result<MetalCredit> {
        if !grams.is_positive() {
            return Err(AurumError::invalid_amount(
                "grams",
                "settlement must be greater than zero",
            ));
        }

        let headroom = self.remaining.checked_add(GRAM_TOLERANCE)?;
        if grams > headroom {
            return Err(AurumError::ExceedsBalance {
                requested: grams.value(),
                available: self.remaining.value(),
            });
        }

        let raw_remaining = self.remaining.checked_sub(grams)?;
        let (new_remaining, applied) = if raw_remaining.is_within_tolerance() {
            (Grams::ZERO, self.remaining)
        } else {
            (raw_remaining, grams)
        };
        let new_settled = self.settled.checked_add(applied)?;

        let status = if new_remaining.is_within_tolerance() {
            CreditStatus::Paid
        } else {
            CreditStatus::PartiallyPaid
        };

        Ok(MetalCredit {
            remaining: new_remaining,
            settled: new_settled,
            status,
            ..self.clone()
        })
    }
}

/// The metal credit book
///
/// Plain state, no interior locking; shared access is arbitrated by the
/// settlement engine's state guard.
#[derive(Debug, Clone, Default)]
pub struct CreditBook {
    credits: Vec<MetalCredit>,
    index: HashMap<CreditId, usize>,
}

impl CreditBook {
    /// Create an empty book
    pub fn new() -> Self {
        Self {
            credits: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Originate a credit from an approved analysis
    ///
    /// Face value must be strictly positive; the credit starts pending with
    /// nothing settled.
    pub fn create(
        &mut self,
        tenant: TenantId,
        client: ClientId,
        analysis: AnalysisId,
        metal: Metal,
        grams: Grams,
        date: NaiveDate,
    ) -> Result<MetalCredit> {
        if !grams.is_positive() {
            return Err(AurumError::invalid_amount(
                "grams",
                "credit face value must be greater than zero",
            ));
        }

        let credit = MetalCredit {
            id: CreditId::new(),
            tenant,
            client,
            analysis,
            metal,
            remaining: grams,
            settled: Grams::ZERO,
            status: CreditStatus::Pending,
            date,
            created_at: Utc::now(),
            version: 0,
        };
        self.index.insert(credit.id, self.credits.len());
        self.credits.push(credit.clone());
        Ok(credit)
    }

    /// Get a credit by id
    pub fn get(&self, id: CreditId) -> Option<&MetalCredit> {
        self.index.get(&id).map(|&pos| &self.credits[pos])
    }

    /// Get a credit by id or fail
    pub fn require(&self, id: CreditId) -> Result<&MetalCredit> {
        self.get(id).ok_or_else(|| AurumError::CreditNotFound {
            credit_id: id.to_string(),
        })
    }

    /// Open credits of one client in one metal, oldest first
    ///
    /// The allocation order for physical-metal payments.
    pub fn open_for_client(
        &self,
        tenant: TenantId,
        client: ClientId,
        metal: Metal,
    ) -> Vec<MetalCredit> {
        let mut open: Vec<MetalCredit> = self
            .credits
            .iter()
            .filter(|c| {
                c.tenant == tenant && c.client == client && c.metal == metal && c.is_open()
            })
            .cloned()
            .collect();
        open.sort_by_key(|c| (c.date, c.created_at));
        open
    }

    /// All credits of one client, oldest first
    pub fn credits_for_client(&self, tenant: TenantId, client: ClientId) -> Vec<MetalCredit> {
        let mut all: Vec<MetalCredit> = self
            .credits
            .iter()
            .filter(|c| c.tenant == tenant && c.client == client)
            .cloned()
            .collect();
        all.sort_by_key(|c| (c.date, c.created_at));
        all
    }

    /// Store an updated credit, bumping its version
    pub fn store(&mut self, mut credit: MetalCredit) -> MetalCredit {
        match self.index.get(&credit.id) {
            Some(&pos) => {
                credit.version = self.credits[pos].version + 1;
                self.credits[pos] = credit.clone();
            }
            None => {
                self.index.insert(credit.id, self.credits.len());
                self.credits.push(credit.clone());
            }
        }
        credit
    }

    /// Remove a credit (origination revert only)
    pub fn remove(&mut self, id: CreditId) -> Result<MetalCredit> {
        let pos = *self.index.get(&id).ok_or_else(|| AurumError::CreditNotFound {
            credit_id: id.to_string(),
        })?;
        let credit = self.credits.remove(pos);
        self.index.remove(&id);
        for (i, c) in self.credits.iter().enumerate().skip(pos) {
            self.index.insert(c.id, i);
        }
        Ok(credit)
    }

    /// Full credit list, insertion order
    pub fn credits(&self) -> &[MetalCredit] {
        &self.credits
    }

    /// Total number of credits
    pub fn len(&self) -> usize {
        self.credits.len()
    }

    /// Check if the book is empty
    pub fn is_empty(&self) -> bool {
        self.credits.is_empty()
    }
}
