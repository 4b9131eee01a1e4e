//! Product aggregate implementation.

use std::collections::HashMap;

use chrono::Utc;
use common::{AggregateId, ProductId, ReservationId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, SnapshotCapable};
use crate::value_objects::Money;

use super::{ProductError, ProductEvent, ProductStatus};

/// Stock record of a single catalog product.
///
/// `available` never goes negative: a reservation is only decided against
/// the loaded count and only persisted if nobody else wrote in between.
/// Outstanding reservations are tracked by id so each one is released or
/// committed at most once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Product {
    id: Option<ProductId>,

    #[serde(default)]
    version: Version,

    name: String,

    unit_price: Money,

    available: u32,

    active: bool,

    #[serde(default)]
    reservations: HashMap<ReservationId, u32>,
}

impl Aggregate for Product {
    type Event = ProductEvent;
    type Error = ProductError;

    fn aggregate_type() -> &'static str {
        "Product"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id.map(AggregateId::from)
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ProductEvent::ProductRegistered {
                product_id,
                name,
                unit_price,
                initial_stock,
                ..
            } => {
                self.id = Some(product_id);
                self.name = name;
                self.unit_price = unit_price;
                self.available = initial_stock;
                self.active = true;
            }
            ProductEvent::StockReserved {
                reservation_id,
                quantity,
                remaining,
            } => {
                self.reservations.insert(reservation_id, quantity);
                self.available = remaining;
            }
            ProductEvent::StockReleased {
                reservation_id,
                available,
                ..
            } => {
                self.reservations.remove(&reservation_id);
                self.available = available;
            }
            ProductEvent::ReservationCommitted { reservation_id, .. } => {
                self.reservations.remove(&reservation_id);
            }
            ProductEvent::StockRestocked { available, .. } => self.available = available,
            ProductEvent::PriceChanged { new_price, .. } => self.unit_price = new_price,
            ProductEvent::ProductActivated => self.active = true,
            ProductEvent::ProductDeactivated => self.active = false,
        }
    }
}

impl SnapshotCapable for Product {
    fn snapshot_interval() -> usize {
        50
    }
}

// Query methods
impl Product {
    pub fn product_id(&self) -> Option<ProductId> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    /// Units that can still be reserved.
    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn status(&self) -> ProductStatus {
        ProductStatus::derive(self.active, self.available)
    }

    /// Units held by reservations that were neither released nor committed.
    pub fn reserved(&self) -> u32 {
        self.reservations.values().sum()
    }

    pub fn has_reservation(&self, reservation_id: ReservationId) -> bool {
        self.reservations.contains_key(&reservation_id)
    }
}

// Command methods (return events)
impl Product {
    /// Registers the product with its opening stock.
    pub fn register(
        &self,
        product_id: ProductId,
        name: impl Into<String>,
        unit_price: Money,
        initial_stock: u32,
    ) -> Result<Vec<ProductEvent>, ProductError> {
        if self.id.is_some() {
            return Err(ProductError::AlreadyRegistered);
        }
        if unit_price.is_negative() {
            return Err(ProductError::InvalidPrice { price: unit_price });
        }

        Ok(vec![ProductEvent::ProductRegistered {
            product_id,
            name: name.into(),
            unit_price,
            initial_stock,
            registered_at: Utc::now(),
        }])
    }

    /// Sets `quantity` units aside under `reservation_id`.
    pub fn reserve(
        &self,
        reservation_id: ReservationId,
        quantity: u32,
    ) -> Result<Vec<ProductEvent>, ProductError> {
        self.ensure_registered()?;
        if quantity == 0 {
            return Err(ProductError::InvalidQuantity { quantity });
        }
        if !self.active {
            return Err(ProductError::Inactive);
        }
        if self.reservations.contains_key(&reservation_id) {
            return Err(ProductError::DuplicateReservation(reservation_id));
        }
        let Some(remaining) = self.available.checked_sub(quantity) else {
            return Err(ProductError::InsufficientStock {
                requested: quantity,
                available: self.available,
            });
        };

        Ok(vec![ProductEvent::StockReserved {
            reservation_id,
            quantity,
            remaining,
        }])
    }

    /// Returns a reservation's units to stock.
    ///
    /// Unknown or already settled reservations produce no events.
    pub fn release(&self, reservation_id: ReservationId) -> Result<Vec<ProductEvent>, ProductError> {
        self.ensure_registered()?;
        let Some(&quantity) = self.reservations.get(&reservation_id) else {
            return Ok(vec![]);
        };

        Ok(vec![ProductEvent::StockReleased {
            reservation_id,
            quantity,
            available: self.available.saturating_add(quantity),
        }])
    }

    /// Settles a reservation as sold without crediting stock.
    pub fn commit(&self, reservation_id: ReservationId) -> Result<Vec<ProductEvent>, ProductError> {
        self.ensure_registered()?;
        let Some(&quantity) = self.reservations.get(&reservation_id) else {
            return Ok(vec![]);
        };

        Ok(vec![ProductEvent::ReservationCommitted {
            reservation_id,
            quantity,
        }])
    }

    pub fn restock(&self, quantity: u32) -> Result<Vec<ProductEvent>, ProductError> {
        self.ensure_registered()?;
        if quantity == 0 {
            return Err(ProductError::InvalidQuantity { quantity });
        }

        Ok(vec![ProductEvent::StockRestocked {
            quantity,
            available: self.available.saturating_add(quantity),
        }])
    }

    pub fn reprice(&self, new_price: Money) -> Result<Vec<ProductEvent>, ProductError> {
        self.ensure_registered()?;
        if new_price.is_negative() {
            return Err(ProductError::InvalidPrice { price: new_price });
        }
        if new_price == self.unit_price {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::PriceChanged {
            old_price: self.unit_price,
            new_price,
        }])
    }

    pub fn activate(&self) -> Result<Vec<ProductEvent>, ProductError> {
        self.ensure_registered()?;
        Ok(if self.active {
            vec![]
        } else {
            vec![ProductEvent::ProductActivated]
        })
    }

    pub fn deactivate(&self) -> Result<Vec<ProductEvent>, ProductError> {
        self.ensure_registered()?;
        Ok(if self.active {
            vec![ProductEvent::ProductDeactivated]
        } else {
            vec![]
        })
    }

    fn ensure_registered(&self) -> Result<(), ProductError> {
        if self.id.is_none() {
            return Err(ProductError::NotRegistered);
        }
        Ok(())
    }
}
