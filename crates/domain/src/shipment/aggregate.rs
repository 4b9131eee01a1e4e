//! Shipment aggregate implementation.

use std::fmt;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::value_objects::{Address, ShippingMethod};

use super::{ShipmentError, ShipmentEvent};

/// Shipment progress: `Preparing → Shipped → Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShipmentStatus {
    #[default]
    Preparing,
    Shipped,
    Delivered,
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShipmentStatus::Preparing => "preparing",
            ShipmentStatus::Shipped => "shipped",
            ShipmentStatus::Delivered => "delivered",
        })
    }
}

/// Input for recording a shipment next to its order.
#[derive(Debug, Clone)]
pub struct NewShipment {
    pub order_id: AggregateId,
    pub address: Address,
    pub method: ShippingMethod,
}

/// Shipment aggregate root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Shipment {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    order_id: Option<AggregateId>,

    recipient_name: String,

    address: String,

    method: ShippingMethod,

    tracking_number: Option<String>,

    status: ShipmentStatus,

    shipped_at: Option<DateTime<Utc>>,

    delivered_at: Option<DateTime<Utc>>,

    discarded: bool,
}

impl Aggregate for Shipment {
    type Event = ShipmentEvent;
    type Error = ShipmentError;

    fn aggregate_type() -> &'static str {
        "Shipment"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn is_visible(&self) -> bool {
        self.id.is_some() && !self.discarded
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ShipmentEvent::ShipmentRecorded {
                shipment_id,
                order_id,
                recipient_name,
                address,
                method,
                ..
            } => {
                self.id = Some(shipment_id);
                self.order_id = Some(order_id);
                self.recipient_name = recipient_name;
                self.address = address;
                self.method = method;
                self.status = ShipmentStatus::Preparing;
            }
            ShipmentEvent::TrackingNumberAssigned { tracking_number } => {
                self.tracking_number = Some(tracking_number);
            }
            ShipmentEvent::ShipmentDispatched { shipped_at } => {
                self.status = ShipmentStatus::Shipped;
                self.shipped_at = Some(shipped_at);
            }
            ShipmentEvent::ShipmentDelivered { delivered_at } => {
                self.status = ShipmentStatus::Delivered;
                self.delivered_at = Some(delivered_at);
            }
            ShipmentEvent::ShipmentDiscarded { .. } => self.discarded = true,
        }
    }
}

// Query methods
impl Shipment {
    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn recipient_name(&self) -> &str {
        &self.recipient_name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn method(&self) -> ShippingMethod {
        self.method
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn status(&self) -> ShipmentStatus {
        self.status
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }
}

// Command methods (return events)
impl Shipment {
    pub fn record(
        &self,
        shipment_id: AggregateId,
        shipment: NewShipment,
    ) -> Result<Vec<ShipmentEvent>, ShipmentError> {
        if self.id.is_some() {
            return Err(ShipmentError::AlreadyRecorded);
        }
        let recipient_name = shipment.address.recipient_name.trim().to_string();
        if recipient_name.is_empty() {
            return Err(ShipmentError::RecipientRequired);
        }

        Ok(vec![ShipmentEvent::ShipmentRecorded {
            shipment_id,
            order_id: shipment.order_id,
            recipient_name,
            address: shipment.address.compose(),
            method: shipment.method,
            recorded_at: Utc::now(),
        }])
    }

    /// Sets or replaces the carrier tracking number until delivery.
    pub fn assign_tracking_number(
        &self,
        tracking_number: impl Into<String>,
    ) -> Result<Vec<ShipmentEvent>, ShipmentError> {
        self.ensure_recorded()?;
        let tracking_number = tracking_number.into().trim().to_string();
        if tracking_number.is_empty() {
            return Err(ShipmentError::EmptyTrackingNumber);
        }
        if self.status == ShipmentStatus::Delivered {
            return Err(ShipmentError::InvalidStatus {
                status: self.status,
                action: "assign a tracking number to",
            });
        }
        if self.tracking_number.as_deref() == Some(tracking_number.as_str()) {
            return Ok(vec![]);
        }

        Ok(vec![ShipmentEvent::TrackingNumberAssigned { tracking_number }])
    }

    /// Hands the parcel to the carrier. Repeats are no-ops.
    pub fn dispatch(&self) -> Result<Vec<ShipmentEvent>, ShipmentError> {
        self.ensure_recorded()?;
        Ok(match self.status {
            ShipmentStatus::Preparing => vec![ShipmentEvent::ShipmentDispatched {
                shipped_at: Utc::now(),
            }],
            ShipmentStatus::Shipped | ShipmentStatus::Delivered => vec![],
        })
    }

    /// Marks the parcel delivered, dispatching it first if that was missed.
    pub fn deliver(&self) -> Result<Vec<ShipmentEvent>, ShipmentError> {
        self.ensure_recorded()?;
        let now = Utc::now();
        Ok(match self.status {
            ShipmentStatus::Preparing => vec![
                ShipmentEvent::ShipmentDispatched { shipped_at: now },
                ShipmentEvent::ShipmentDelivered { delivered_at: now },
            ],
            ShipmentStatus::Shipped => vec![ShipmentEvent::ShipmentDelivered { delivered_at: now }],
            ShipmentStatus::Delivered => vec![],
        })
    }

    pub fn discard(&self, reason: impl Into<String>) -> Result<Vec<ShipmentEvent>, ShipmentError> {
        self.ensure_recorded()?;
        if self.discarded {
            return Ok(vec![]);
        }
        Ok(vec![ShipmentEvent::ShipmentDiscarded {
            reason: reason.into(),
        }])
    }

    fn ensure_recorded(&self) -> Result<(), ShipmentError> {
        if self.id.is_none() {
            return Err(ShipmentError::NotRecorded);
        }
        Ok(())
    }
}
