//! Order fulfillment.
//!
//! This crate ties the domain records together into the three operations a
//! storefront needs:
//! - [`StockLedger`]: atomic per-product stock reservation and release
//! - [`OrderOrchestrator`]: checkout, which reserves stock and then writes
//!   the order with its payment and shipment or leaves nothing behind
//! - [`OrderLifecycle`]: legal status changes and the stock, payment and
//!   shipment side effects they trigger

pub mod checkout;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod orchestrator;
pub mod retry;
pub mod telemetry;

pub use checkout::{CheckoutSaga, CheckoutState};
pub use config::{CommitMode, FulfillmentConfig, LogFormat};
pub use error::{FulfillmentError, Result};
pub use ledger::{InventoryLedger, ReleaseOutcome, Reservation, ReservationRequest, StockLedger};
pub use lifecycle::OrderLifecycle;
pub use orchestrator::{OrderLine, OrderOrchestrator, PlaceOrder, PlacedOrder};
pub use retry::RetryPolicy;
