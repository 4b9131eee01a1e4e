//! Domain layer of the fulfillment system.
//!
//! This crate provides the core domain abstractions including:
//! - Aggregate trait for event-sourced records
//! - CommandHandler for loading, deciding and persisting commands
//! - Product stock records with reservation tracking
//! - Orders with their status state machine, plus the payment and shipment
//!   records each order owns

pub mod aggregate;
pub mod command;
pub mod error;
pub mod order;
pub mod payment;
pub mod product;
pub mod shipment;
pub mod value_objects;

pub use aggregate::{Aggregate, DomainEvent, SnapshotCapable};
pub use command::{CommandHandler, CommandResult, PreparedCommand};
pub use error::DomainError;
pub use order::{
    LEGAL_TRANSITIONS, LineItem, NewOrder, Order, OrderError, OrderEvent, OrderPhase,
    OrderService, OrderStatus, ReservationSettlement,
};
pub use payment::{
    NewPayment, Payment, PaymentAuthorization, PaymentError, PaymentEvent, PaymentService,
    PaymentStatus,
};
pub use product::{
    CatalogService, Product, ProductError, ProductEvent, ProductStatus, ReservationToken,
};
pub use shipment::{
    NewShipment, Shipment, ShipmentError, ShipmentEvent, ShipmentService, ShipmentStatus,
};
pub use value_objects::{Address, ContactInfo, Money, PaymentMethod, ShippingMethod};
