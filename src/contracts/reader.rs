//! Read path: merges ticket metadata with flight records straight from chain state.
//!
//! Nothing here is cached. Every call re-reads the contracts, so results always
//! reflect the latest state the node reports.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ethers::abi::{RawLog, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Filter, TransactionRequest, H256, U256};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::client::{ChainClient, ChainClientError};
use super::normalizer::normalize;
use super::resolver::{resolve_call, CallArg};
use super::{ContractKind, ContractRegistry};
use crate::crypto::wei_to_ether_string;
use crate::errors::{ServiceError, ServiceResult};
use crate::types::{FlightSummary, MarketListing, TicketStatus, TicketView};

const LISTED_EVENT: &str = "TicketListed";

/// Decoded return values of a view call, addressable by name or position.
#[derive(Debug)]
struct Outputs {
    function: String,
    by_name: HashMap<String, Token>,
    by_index: Vec<Token>,
}

impl Outputs {
    fn field(&self, name: &str, index: usize) -> ServiceResult<&Token> {
        self.by_name
            .get(name)
            .or_else(|| self.by_index.get(index))
            .ok_or_else(|| {
                ServiceError::Decode(format!("{} returned no field {name}", self.function))
            })
    }

    fn mismatch(&self, name: &str, expected: &str) -> ServiceError {
        ServiceError::Decode(format!("{}.{name} is not {expected}", self.function))
    }

    fn uint(&self, name: &str, index: usize) -> ServiceResult<U256> {
        self.field(name, index)?
            .clone()
            .into_uint()
            .ok_or_else(|| self.mismatch(name, "an integer"))
    }

    fn small_uint(&self, name: &str, index: usize) -> ServiceResult<u64> {
        let value = self.uint(name, index)?;
        u64::try_from(value).map_err(|_| self.mismatch(name, "a 64-bit integer"))
    }

    fn address(&self, name: &str, index: usize) -> ServiceResult<Address> {
        self.field(name, index)?
            .clone()
            .into_address()
            .ok_or_else(|| self.mismatch(name, "an address"))
    }

    fn string(&self, name: &str, index: usize) -> ServiceResult<String> {
        self.field(name, index)?
            .clone()
            .into_string()
            .ok_or_else(|| self.mismatch(name, "a string"))
    }

    fn boolean(&self, name: &str, index: usize) -> ServiceResult<bool> {
        self.field(name, index)?
            .clone()
            .into_bool()
            .ok_or_else(|| self.mismatch(name, "a boolean"))
    }

    fn word(&self, name: &str, index: usize) -> ServiceResult<H256> {
        match self.field(name, index)? {
            Token::FixedBytes(bytes) if bytes.len() == 32 => Ok(H256::from_slice(bytes)),
            _ => Err(self.mismatch(name, "bytes32")),
        }
    }

    fn timestamp(&self, name: &str, index: usize) -> ServiceResult<OffsetDateTime> {
        let seconds = self.small_uint(name, index)?;
        i64::try_from(seconds)
            .ok()
            .and_then(|seconds| OffsetDateTime::from_unix_timestamp(seconds).ok())
            .ok_or_else(|| self.mismatch(name, "a representable timestamp"))
    }
}

struct TicketRecord {
    seat_number: u64,
    price: U256,
    used: bool,
    info_hash: H256,
    flight: FlightRecord,
}

struct FlightRecord {
    number: String,
    departure: String,
    destination: String,
    departure_time: OffsetDateTime,
    arrival_time: OffsetDateTime,
}

pub struct TicketReader {
    chain: Arc<dyn ChainClient>,
    contracts: Arc<ContractRegistry>,
    listing_from_block: u64,
}

impl TicketReader {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        contracts: Arc<ContractRegistry>,
        listing_from_block: u64,
    ) -> Self {
        Self {
            chain,
            contracts,
            listing_from_block,
        }
    }

    pub async fn ticket(&self, ticket_id: U256) -> ServiceResult<TicketView> {
        let id = u64::try_from(ticket_id)
            .map_err(|_| ServiceError::InvalidArgument(format!("ticket id {ticket_id} out of range")))?;
        let record = self.ticket_record(ticket_id).await?;
        Ok(TicketView {
            id,
            flight_number: record.flight.number,
            departure: record.flight.departure,
            destination: record.flight.destination,
            departure_time: record.flight.departure_time,
            arrival_time: record.flight.arrival_time,
            seat_number: record.seat_number,
            status: TicketStatus::from_used_flag(record.used),
            price: wei_to_ether_string(record.price),
            owner_info_hash: record.info_hash,
        })
    }

    pub async fn tickets_owned_by(&self, owner: Address) -> ServiceResult<Vec<TicketView>> {
        let balance = self
            .view(ContractKind::Ticket, "balanceOf", vec![owner.into()])
            .await?
            .small_uint("", 0)?;
        let mut tickets = Vec::new();
        for index in 0..balance {
            let token_id = self
                .view(
                    ContractKind::Ticket,
                    "tokenOfOwnerByIndex",
                    vec![owner.into(), index.into()],
                )
                .await?
                .uint("", 0)?;
            tickets.push(self.ticket(token_id).await?);
        }
        Ok(tickets)
    }

    /// Current price of a listing; zero means not listed.
    pub async fn listing_price(&self, ticket_id: U256) -> ServiceResult<U256> {
        self.view(ContractKind::Marketplace, "getListing", vec![ticket_id.into()])
            .await?
            .uint("price", 1)
    }

    /// The listing for `ticket_id`, or `None` when it is sold, delisted, or never listed.
    pub async fn listing(&self, ticket_id: U256) -> ServiceResult<Option<MarketListing>> {
        let listing = self
            .view(ContractKind::Marketplace, "getListing", vec![ticket_id.into()])
            .await?;
        let price = listing.uint("price", 1)?;
        if price.is_zero() {
            return Ok(None);
        }
        let seller = listing.address("seller", 0)?;
        let listing_id = u64::try_from(ticket_id)
            .map_err(|_| ServiceError::InvalidArgument(format!("ticket id {ticket_id} out of range")))?;
        let record = self.ticket_record(ticket_id).await?;
        Ok(Some(MarketListing {
            listing_id,
            seller,
            price: wei_to_ether_string(price),
            flight_summary: FlightSummary {
                number: record.flight.number,
                departure: record.flight.departure,
                destination: record.flight.destination,
            },
            seat_number: record.seat_number,
            original_owner_hash: record.info_hash,
        }))
    }

    /// Replay every `TicketListed` event and keep the listings still priced above zero.
    pub async fn active_listings(&self) -> ServiceResult<Vec<MarketListing>> {
        let marketplace = self.contracts.get(ContractKind::Marketplace);
        let event = marketplace.abi.event(LISTED_EVENT).map_err(|err| {
            ServiceError::Config(format!("marketplace ABI lacks {LISTED_EVENT}: {err}"))
        })?;
        let filter = Filter::new()
            .address(marketplace.address)
            .topic0(event.signature())
            .from_block(self.listing_from_block);
        let logs = self
            .chain
            .logs(&filter)
            .await
            .map_err(|err| read_failure(LISTED_EVENT, err))?;

        let mut seen = HashSet::new();
        let mut listings = Vec::new();
        for log in logs {
            let parsed = event
                .parse_log(RawLog {
                    topics: log.topics,
                    data: log.data.to_vec(),
                })
                .map_err(|err| ServiceError::Decode(format!("{LISTED_EVENT} log: {err}")))?;
            let Some(token_id) = parsed
                .params
                .into_iter()
                .find(|param| param.name == "tokenId")
                .and_then(|param| param.value.into_uint())
            else {
                warn!("skipping {LISTED_EVENT} log without a tokenId");
                continue;
            };
            if !seen.insert(token_id) {
                continue;
            }
            if let Some(listing) = self.listing(token_id).await? {
                listings.push(listing);
            }
        }
        debug!(
            replayed = seen.len(),
            active = listings.len(),
            "rebuilt marketplace listings"
        );
        Ok(listings)
    }

    async fn ticket_record(&self, ticket_id: U256) -> ServiceResult<TicketRecord> {
        let metadata = self
            .view(ContractKind::Ticket, "ticketMetadata", vec![ticket_id.into()])
            .await?;
        let flight_id = metadata.uint("flightId", 2)?;
        let flight = self
            .view(ContractKind::Ticket, "flights", vec![flight_id.into()])
            .await?;

        Ok(TicketRecord {
            seat_number: metadata.small_uint("seatNumber", 1)?,
            price: metadata.uint("price", 3)?,
            used: metadata.boolean("isUsed", 4)?,
            info_hash: metadata.word("hashedUserInfo", 5)?,
            flight: FlightRecord {
                number: flight.string("flightNumber", 0)?,
                departure: flight.string("departure", 1)?,
                destination: flight.string("destination", 2)?,
                departure_time: flight.timestamp("departureTime", 3)?,
                arrival_time: flight.timestamp("arrivalTime", 4)?,
            },
        })
    }

    async fn view(
        &self,
        kind: ContractKind,
        function: &str,
        args: Vec<CallArg>,
    ) -> ServiceResult<Outputs> {
        let contract = self.contracts.get(kind);
        let resolved = resolve_call(&contract.abi, function, &args)?;
        let tx: TypedTransaction = TransactionRequest::new()
            .to(contract.address)
            .data(resolved.calldata.clone())
            .into();
        let raw = self
            .chain
            .call(&tx)
            .await
            .map_err(|err| read_failure(function, err))?;
        let tokens = resolved
            .function
            .decode_output(&raw)
            .map_err(|err| ServiceError::Decode(format!("{function}: {err}")))?;

        let by_name = resolved
            .function
            .outputs
            .iter()
            .zip(tokens.iter())
            .filter(|(param, _)| !param.name.is_empty())
            .map(|(param, token)| (param.name.clone(), token.clone()))
            .collect();
        Ok(Outputs {
            function: function.to_string(),
            by_name,
            by_index: tokens,
        })
    }
}

fn read_failure(function: &str, err: ChainClientError) -> ServiceError {
    let normalized = normalize(&err.message);
    warn!(function, category = %normalized.category, error = %err, "contract read failed");
    ServiceError::Chain(normalized)
}
