mod quantity;
mod ticket;

pub use quantity::Quantity;
pub use ticket::{FlightSummary, MarketListing, TicketStatus, TicketView};
