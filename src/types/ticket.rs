use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Active,
    Used,
}

impl TicketStatus {
    pub fn from_used_flag(used: bool) -> Self {
        if used {
            Self::Used
        } else {
            Self::Active
        }
    }
}

/// Ticket metadata merged with its flight record, ready for API responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketView {
    pub id: u64,
    pub flight_number: String,
    pub departure: String,
    pub destination: String,
    #[serde(with = "time::serde::rfc3339")]
    pub departure_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub arrival_time: OffsetDateTime,
    pub seat_number: u64,
    pub status: TicketStatus,
    /// Decimal ether string.
    pub price: String,
    pub owner_info_hash: H256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightSummary {
    pub number: String,
    pub departure: String,
    pub destination: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketListing {
    pub listing_id: u64,
    pub seller: Address,
    pub price: String,
    pub flight_summary: FlightSummary,
    pub seat_number: u64,
    pub original_owner_hash: H256,
}
