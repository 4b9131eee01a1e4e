use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_newtype!(
    /// Unique identifier for an event-sourced record (order, payment, shipment, product).
    ///
    /// Every stream in the event store is keyed by one of these.
    AggregateId
);

uuid_newtype!(
    /// Identifier of a catalog product.
    ///
    /// Ordering is total so batch reservations can lock products in a
    /// stable sequence.
    ProductId
);

uuid_newtype!(
    /// Identifier of a user as resolved by the identity provider.
    UserId
);

uuid_newtype!(
    /// Identifier of a single stock reservation.
    ReservationId
);

impl ProductId {
    /// Returns the event stream that holds this product's stock record.
    pub fn aggregate_id(&self) -> AggregateId {
        AggregateId::from_uuid(self.0)
    }
}

impl From<ProductId> for AggregateId {
    fn from(id: ProductId) -> Self {
        id.aggregate_id()
    }
}
