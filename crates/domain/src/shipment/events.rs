//! Shipment domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::value_objects::ShippingMethod;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ShipmentEvent {
    ShipmentRecorded {
        shipment_id: AggregateId,
        order_id: AggregateId,
        recipient_name: String,
        /// Single-line address as composed at checkout.
        address: String,
        method: ShippingMethod,
        recorded_at: DateTime<Utc>,
    },

    TrackingNumberAssigned { tracking_number: String },

    ShipmentDispatched { shipped_at: DateTime<Utc> },

    ShipmentDelivered { delivered_at: DateTime<Utc> },

    /// The owning order was rolled back during checkout.
    ShipmentDiscarded { reason: String },
}

impl DomainEvent for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::ShipmentRecorded { .. } => "ShipmentRecorded",
            ShipmentEvent::TrackingNumberAssigned { .. } => "TrackingNumberAssigned",
            ShipmentEvent::ShipmentDispatched { .. } => "ShipmentDispatched",
            ShipmentEvent::ShipmentDelivered { .. } => "ShipmentDelivered",
            ShipmentEvent::ShipmentDiscarded { .. } => "ShipmentDiscarded",
        }
    }
}
