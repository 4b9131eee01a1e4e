use common::{ProductId, ReservationId};
use serde::{Deserialize, Serialize};

/// Proof of a successful stock reservation.
///
/// Handed back by the ledger and persisted on the order so the exact
/// reservation can be released or committed later. Releasing the same
/// token twice credits stock once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationToken {
    pub reservation_id: ReservationId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl ReservationToken {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            reservation_id: ReservationId::new(),
            product_id,
            quantity,
        }
    }
}
