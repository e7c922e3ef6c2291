//! Aurum Vault - pure-metal lot custody
//!
//! Physical refined metal on hand, tracked per lot. Every stock change is a
//! recorded movement; a lot whose remaining stock falls within tolerance of
//! zero is marked used and rejects further exits until stock returns.

use std::collections::HashMap;

use aurum_types::{AurumError, Grams, LotId, Metal, MovementId, Result, TenantId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Custody status of a lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotStatus {
    /// Has stock available for exits
    Active,
    /// Drained to within tolerance of zero
    Used,
}

/// A batch of refined metal in the vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalLot {
    pub id: LotId,
    pub tenant: TenantId,
    pub metal: Metal,
    /// Fineness as a fraction, e.g. 0.999
    pub purity: Decimal,
    pub initial_grams: Grams,
    pub remaining_grams: Grams,
    /// Where the metal came from (recovery batch, supplier, ...)
    pub source: String,
    pub entered_at: NaiveDate,
    pub status: LotStatus,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped on every stock change
    pub version: u64,
}

/// Direction of a stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementKind {
    /// Stock added to the lot
    Entry,
    /// Stock drawn out of the lot
    Exit,
}

/// A recorded stock change on a lot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotMovement {
    pub id: MovementId,
    pub lot: LotId,
    pub kind: MovementKind,
    /// Always positive; direction comes from `kind`
    pub grams: Grams,
    pub date: NaiveDate,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// The vault book
///
/// Plain state, no interior locking; shared access is arbitrated by the
/// settlement engine's state guard.
#[derive(Debug, Clone, Default)]
pub struct VaultBook {
    lots: Vec<MetalLot>,
    index: HashMap<LotId, usize>,
    /// All movements (append-only)
    movements: Vec<LotMovement>,
}

impl VaultBook {
    /// Create an empty vault
    pub fn new() -> Self {
        Self {
            lots: Vec::new(),
            index: HashMap::new(),
            movements: Vec::new(),
        }
    }

    /// Register a new lot with its opening entry movement
    pub fn register_lot(
        &mut self,
        tenant: TenantId,
        metal: Metal,
        purity: Decimal,
        grams: Grams,
        source: impl Into<String>,
        date: NaiveDate,
    ) -> Result<MetalLot> {
        if !grams.is_positive() {
            return Err(AurumError::invalid_amount(
                "grams",
                "lot stock must be greater than zero",
            ));
        }
        if purity <= Decimal::ZERO || purity > Decimal::ONE {
            return Err(AurumError::invalid_amount(
                "purity",
                "fineness must be a fraction in (0, 1]",
            ));
        }

        let lot = MetalLot {
            id: LotId::new(),
            tenant,
            metal,
            purity,
            initial_grams: grams,
            remaining_grams: grams,
            source: source.into(),
            entered_at: date,
            status: LotStatus::Active,
            created_at: Utc::now(),
            version: 0,
        };
        self.index.insert(lot.id, self.lots.len());
        self.lots.push(lot.clone());

        self.record(lot.id, MovementKind::Entry, grams, date, "Initial stock");
        Ok(lot)
    }

    /// Get a lot by id
    pub fn get(&self, id: LotId) -> Option<&MetalLot> {
        self.index.get(&id).map(|&pos| &self.lots[pos])
    }

    /// Get a lot by id or fail
    pub fn require(&self, id: LotId) -> Result<&MetalLot> {
        self.get(id).ok_or_else(|| AurumError::LotNotFound {
            lot_id: id.to_string(),
        })
    }

    /// Draw stock out of a lot
    ///
    /// Fails if the lot is used or the requested grams exceed the remaining
    /// stock. Drops the lot to used when the remainder lands within
    /// tolerance of zero.
    pub fn exit(
        &mut self,
        lot_id: LotId,
        grams: Grams,
        date: NaiveDate,
        notes: impl Into<String>,
    ) -> Result<LotMovement> {
        if !grams.is_positive() {
            return Err(AurumError::invalid_amount(
                "grams",
                "exit must be greater than zero",
            ));
        }

        let pos = *self.index.get(&lot_id).ok_or_else(|| AurumError::LotNotFound {
            lot_id: lot_id.to_string(),
        })?;
        let lot = &mut self.lots[pos];

        if lot.status == LotStatus::Used || grams > lot.remaining_grams {
            return Err(AurumError::InsufficientStock {
                lot_id: lot_id.to_string(),
                requested: grams.value(),
                available: lot.remaining_grams.value(),
            });
        }

        lot.remaining_grams = lot.remaining_grams.checked_sub(grams)?;
        if lot.remaining_grams.is_within_tolerance() {
            lot.status = LotStatus::Used;
        }
        lot.version += 1;

        Ok(self.record(lot_id, MovementKind::Exit, grams, date, notes))
    }

    /// Add stock to a lot
    ///
    /// Re-activates a used lot once stock is back above tolerance.
    pub fn entry(
        &mut self,
        lot_id: LotId,
        grams: Grams,
        date: NaiveDate,
        notes: impl Into<String>,
    ) -> Result<LotMovement> {
        if !grams.is_positive() {
            return Err(AurumError::invalid_amount(
                "grams",
                "entry must be greater than zero",
            ));
        }

        let pos = *self.index.get(&lot_id).ok_or_else(|| AurumError::LotNotFound {
            lot_id: lot_id.to_string(),
        })?;
        let lot = &mut self.lots[pos];

        lot.remaining_grams = lot.remaining_grams.checked_add(grams)?;
        if !lot.remaining_grams.is_within_tolerance() {
            lot.status = LotStatus::Active;
        }
        lot.version += 1;

        Ok(self.record(lot_id, MovementKind::Entry, grams, date, notes))
    }

    fn record(
        &mut self,
        lot: LotId,
        kind: MovementKind,
        grams: Grams,
        date: NaiveDate,
        notes: impl Into<String>,
    ) -> LotMovement {
        let movement = LotMovement {
            id: MovementId::new(),
            lot,
            kind,
            grams,
            date,
            notes: notes.into(),
            created_at: Utc::now(),
        };
        self.movements.push(movement.clone());
        movement
    }

    /// Movements of one lot, oldest first
    pub fn movements_for(&self, lot_id: LotId) -> Vec<LotMovement> {
        let mut movements: Vec<LotMovement> = self
            .movements
            .iter()
            .filter(|m| m.lot == lot_id)
            .cloned()
            .collect();
        movements.sort_by_key(|m| (m.date, m.created_at));
        movements
    }

    /// Lots of one tenant, registration order
    pub fn lots_for(&self, tenant: TenantId) -> Vec<MetalLot> {
        self.lots
            .iter()
            .filter(|l| l.tenant == tenant)
            .cloned()
            .collect()
    }

    /// All lots, registration order
    pub fn lots(&self) -> &[MetalLot] {
        &self.lots
    }

    /// Total number of lots
    pub fn len(&self) -> usize {
        self.lots.len()
    }

    /// Check if the vault is empty
    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }
}
