pub mod event;
pub mod holder;
pub mod order;
pub mod seat;
pub mod venue;

pub use event::{Event, EventWithVenue};
pub use holder::HolderToken;
pub use order::{NewOrder, Order, OrderDetails, OrderItem, OrderStatus};
pub use seat::{Seat, SeatStatus};
pub use venue::Venue;

/// Stored status string that does not match any known variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown status value: {0}")]
pub struct UnknownStatus(pub String);
