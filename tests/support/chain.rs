use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use ethers::abi::{encode, Abi, Function, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, Log, H256, U256};
use ethers::utils::keccak256;
use parking_lot::Mutex;

use ticket_relay::contracts::client::{ChainClient, ChainClientError};
use ticket_relay::contracts::resolver::function_signature;

pub const GAS_ESTIMATE: u64 = 100_000;

#[derive(Clone, Debug)]
pub struct FlightRow {
    pub number: String,
    pub departure: String,
    pub destination: String,
    pub departure_time: U256,
    pub arrival_time: U256,
    pub total_tickets: U256,
    pub price: U256,
}

#[derive(Clone, Debug)]
pub struct TicketRow {
    pub owner: Address,
    pub seat_number: U256,
    pub flight_id: U256,
    pub price: U256,
    pub used: bool,
    pub info_hash: H256,
}

/// A transaction the fake accepted, as the node would have seen it.
#[derive(Clone, Debug)]
pub struct Submission {
    pub from: Address,
    pub signature: String,
    pub gas: Option<U256>,
    pub value: U256,
    pub hash: H256,
}

#[derive(Clone, Default)]
struct ChainState {
    flights: BTreeMap<U256, FlightRow>,
    tickets: BTreeMap<U256, TicketRow>,
    next_flight: u64,
    next_ticket: u64,
    approvals: HashSet<U256>,
    listings: HashMap<U256, (Address, U256)>,
    logs: Vec<Log>,
}

#[derive(Default)]
struct Faults {
    estimate: Option<String>,
    send: Option<String>,
}

/// In-memory stand-in for the ticket and marketplace contracts.
pub struct FakeChain {
    ticket: (Address, Abi),
    marketplace: (Address, Abi),
    state: Mutex<ChainState>,
    submissions: Mutex<Vec<Submission>>,
    faults: Mutex<Faults>,
}

impl FakeChain {
    pub fn new(ticket: (Address, Abi), marketplace: (Address, Abi)) -> Self {
        Self {
            ticket,
            marketplace,
            state: Mutex::new(ChainState {
                next_flight: 1,
                next_ticket: 1,
                ..ChainState::default()
            }),
            submissions: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn add_flight(&self, number: &str, departure: &str, destination: &str, price: U256) -> U256 {
        let mut state = self.state.lock();
        let id = U256::from(state.next_flight);
        state.next_flight += 1;
        state.flights.insert(
            id,
            FlightRow {
                number: number.to_string(),
                departure: departure.to_string(),
                destination: destination.to_string(),
                departure_time: U256::from(1_735_725_600u64),
                arrival_time: U256::from(1_735_740_000u64),
                total_tickets: U256::from(180u64),
                price,
            },
        );
        id
    }

    pub fn ticket(&self, id: U256) -> Option<TicketRow> {
        self.state.lock().tickets.get(&id).cloned()
    }

    pub fn flight(&self, id: U256) -> Option<FlightRow> {
        self.state.lock().flights.get(&id).cloned()
    }

    /// Seller recorded by the marketplace for an active listing.
    pub fn listing_seller(&self, id: U256) -> Option<Address> {
        self.state.lock().listings.get(&id).map(|(seller, _)| *seller)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// Fail the next gas estimate with `message`.
    pub fn fail_next_estimate(&self, message: &str) {
        self.faults.lock().estimate = Some(message.to_string());
    }

    /// Fail the next broadcast with `message`.
    pub fn fail_next_send(&self, message: &str) {
        self.faults.lock().send = Some(message.to_string());
    }

    fn lookup(&self, tx: &TypedTransaction) -> Result<(bool, Function, Vec<Token>), ChainClientError> {
        let to = tx
            .to_addr()
            .copied()
            .ok_or_else(|| ChainClientError::new("transaction has no recipient"))?;
        let (is_ticket, abi) = if to == self.ticket.0 {
            (true, &self.ticket.1)
        } else if to == self.marketplace.0 {
            (false, &self.marketplace.1)
        } else {
            return Err(ChainClientError::new(format!("no contract at {to:?}")));
        };
        let data = tx.data().map(|data| data.to_vec()).unwrap_or_default();
        if data.len() < 4 {
            return Err(ChainClientError::new("execution reverted"));
        }
        let function = abi
            .functions()
            .find(|function| function.short_signature() == data[..4])
            .cloned()
            .ok_or_else(|| ChainClientError::new("execution reverted: unknown selector"))?;
        let tokens = function
            .decode_input(&data[4..])
            .map_err(|err| ChainClientError::new(format!("invalid calldata: {err}")))?;
        Ok((is_ticket, function, tokens))
    }

    fn execute(
        &self,
        state: &mut ChainState,
        from: Address,
        tx: &TypedTransaction,
    ) -> Result<String, ChainClientError> {
        let (is_ticket, function, args) = self.lookup(tx)?;
        let value = tx.value().copied().unwrap_or_default();
        let signature = function_signature(&function);
        let name = function.name.as_str();
        match (is_ticket, name, args.len()) {
            (true, "purchaseTicket", arity @ (3 | 4)) => {
                let flight_id = uint(&args[0]);
                let flight = state
                    .flights
                    .get(&flight_id)
                    .cloned()
                    .ok_or_else(|| revert("Flight does not exist"))?;
                let owner = if arity == 4 { address(&args[3]) } else { from };
                mint(state, owner, uint(&args[1]), flight_id, flight.price, word(&args[2]));
            }
            (true, "purchaseExternalTicket", 8) => {
                let flight_id = create_flight(state, &args[..6]);
                mint(state, address(&args[7]), U256::one(), flight_id, U256::zero(), word(&args[6]));
            }
            (true, "modifyTicket", 2) => {
                let new_flight = uint(&args[1]);
                if !state.flights.contains_key(&new_flight) {
                    return Err(revert("Flight does not exist"));
                }
                ticket_mut(state, uint(&args[0]))?.flight_id = new_flight;
            }
            (true, "modifyTicket", 7) => {
                let new_flight = create_flight(state, &args[1..]);
                ticket_mut(state, uint(&args[0]))?.flight_id = new_flight;
            }
            (true, "transferTicket", 4) => {
                let ticket = ticket_mut(state, uint(&args[1]))?;
                if ticket.owner != address(&args[0]) {
                    return Err(revert("Not ticket owner"));
                }
                ticket.owner = address(&args[2]);
                ticket.info_hash = word(&args[3]);
            }
            (true, "myInsecureApprove", 2) => {
                let id = uint(&args[1]);
                ticket_mut(state, id)?;
                state.approvals.insert(id);
            }
            (false, "listTicketForResale", 2) => {
                let id = uint(&args[0]);
                let price = uint(&args[1]);
                if !state.approvals.contains(&id) {
                    return Err(revert("Marketplace not approved"));
                }
                ticket_mut(state, id)?;
                let seller = from;
                state.listings.insert(id, (seller, price));
                let event = self
                    .marketplace
                    .1
                    .event("TicketListed")
                    .map_err(|err| ChainClientError::new(err.to_string()))?;
                state.logs.push(Log {
                    address: self.marketplace.0,
                    topics: vec![event.signature(), uint_topic(id), H256::from(seller)],
                    data: encode(&[Token::Uint(price)]).into(),
                    ..Log::default()
                });
            }
            (false, "buyTicket", arity @ (1 | 2)) => {
                let id = uint(&args[0]);
                let (_, price) = state
                    .listings
                    .get(&id)
                    .copied()
                    .filter(|(_, price)| !price.is_zero())
                    .ok_or_else(|| revert("Ticket not listed"))?;
                if value != price {
                    return Err(revert("Incorrect payment amount"));
                }
                let buyer = if arity == 2 { address(&args[1]) } else { from };
                ticket_mut(state, id)?.owner = buyer;
                state.listings.remove(&id);
                state.approvals.remove(&id);
            }
            (false, "delistTicket", 1) => {
                let id = uint(&args[0]);
                if state.listings.remove(&id).is_none() {
                    return Err(revert("Ticket not listed"));
                }
            }
            _ => return Err(revert("unsupported call")),
        }
        Ok(signature)
    }

    fn view(&self, tx: &TypedTransaction) -> Result<Vec<Token>, ChainClientError> {
        let (is_ticket, function, args) = self.lookup(tx)?;
        let state = self.state.lock();
        let tokens = match (is_ticket, function.name.as_str()) {
            (true, "ticketMetadata") => {
                let ticket = state
                    .tickets
                    .get(&uint(&args[0]))
                    .ok_or_else(|| revert("ERC721: invalid token ID"))?;
                vec![
                    Token::Address(ticket.owner),
                    Token::Uint(ticket.seat_number),
                    Token::Uint(ticket.flight_id),
                    Token::Uint(ticket.price),
                    Token::Bool(ticket.used),
                    Token::FixedBytes(ticket.info_hash.as_bytes().to_vec()),
                ]
            }
            (true, "flights") => {
                let flight = state
                    .flights
                    .get(&uint(&args[0]))
                    .ok_or_else(|| revert("Flight does not exist"))?;
                vec![
                    Token::String(flight.number.clone()),
                    Token::String(flight.departure.clone()),
                    Token::String(flight.destination.clone()),
                    Token::Uint(flight.departure_time),
                    Token::Uint(flight.arrival_time),
                    Token::Uint(flight.total_tickets),
                    Token::Uint(flight.price),
                ]
            }
            (true, "balanceOf") => {
                let owner = address(&args[0]);
                let count = state.tickets.values().filter(|t| t.owner == owner).count();
                vec![Token::Uint(U256::from(count))]
            }
            (true, "tokenOfOwnerByIndex") => {
                let owner = address(&args[0]);
                let index = uint(&args[1]).as_usize();
                let id = state
                    .tickets
                    .iter()
                    .filter(|(_, ticket)| ticket.owner == owner)
                    .nth(index)
                    .map(|(id, _)| *id)
                    .ok_or_else(|| revert("ERC721Enumerable: owner index out of bounds"))?;
                vec![Token::Uint(id)]
            }
            (false, "getListing") => {
                let (seller, price) = state
                    .listings
                    .get(&uint(&args[0]))
                    .copied()
                    .unwrap_or_default();
                vec![Token::Address(seller), Token::Uint(price)]
            }
            (_, other) => return Err(revert(&format!("{other} is not a view"))),
        };
        Ok(tokens)
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, ChainClientError> {
        if let Some(message) = self.faults.lock().estimate.take() {
            return Err(ChainClientError::new(message));
        }
        let from = tx.from().copied().unwrap_or_default();
        let mut dry_run = self.state.lock().clone();
        self.execute(&mut dry_run, from, tx)?;
        Ok(U256::from(GAS_ESTIMATE))
    }

    async fn send_transaction(
        &self,
        signer: &LocalWallet,
        tx: TypedTransaction,
    ) -> Result<H256, ChainClientError> {
        if let Some(message) = self.faults.lock().send.take() {
            return Err(ChainClientError::new(message));
        }
        let from = signer.address();
        let signature = {
            let mut state = self.state.lock();
            self.execute(&mut state, from, &tx)?
        };
        let mut submissions = self.submissions.lock();
        let hash = H256::from(keccak256((submissions.len() as u64 + 1).to_be_bytes()));
        submissions.push(Submission {
            from,
            signature,
            gas: tx.gas().copied(),
            value: tx.value().copied().unwrap_or_default(),
            hash,
        });
        Ok(hash)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainClientError> {
        Ok(encode(&self.view(tx)?).into())
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainClientError> {
        let logs = self.state.lock().logs.clone();
        Ok(logs
            .into_iter()
            .filter(|log| match filter.address.as_ref() {
                Some(ethers::types::ValueOrArray::Value(address)) => log.address == *address,
                _ => true,
            })
            .collect())
    }
}

fn revert(reason: &str) -> ChainClientError {
    ChainClientError::new(format!(
        "(code: 3, message: execution reverted: {reason}, data: None)"
    ))
}

fn uint(token: &Token) -> U256 {
    token.clone().into_uint().unwrap_or_default()
}

fn address(token: &Token) -> Address {
    token.clone().into_address().unwrap_or_default()
}

fn word(token: &Token) -> H256 {
    match token {
        Token::FixedBytes(bytes) if bytes.len() == 32 => H256::from_slice(bytes),
        _ => H256::zero(),
    }
}

fn uint_topic(value: U256) -> H256 {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    H256::from(buf)
}

fn create_flight(state: &mut ChainState, args: &[Token]) -> U256 {
    let id = U256::from(state.next_flight);
    state.next_flight += 1;
    state.flights.insert(
        id,
        FlightRow {
            number: args[0].clone().into_string().unwrap_or_default(),
            departure: args[1].clone().into_string().unwrap_or_default(),
            destination: args[2].clone().into_string().unwrap_or_default(),
            departure_time: uint(&args[3]),
            arrival_time: uint(&args[4]),
            total_tickets: uint(&args[5]),
            price: U256::zero(),
        },
    );
    id
}

fn mint(state: &mut ChainState, owner: Address, seat: U256, flight_id: U256, price: U256, info: H256) {
    let id = U256::from(state.next_ticket);
    state.next_ticket += 1;
    state.tickets.insert(
        id,
        TicketRow {
            owner,
            seat_number: seat,
            flight_id,
            price,
            used: false,
            info_hash: info,
        },
    );
}

fn ticket_mut(state: &mut ChainState, id: U256) -> Result<&mut TicketRow, ChainClientError> {
    state
        .tickets
        .get_mut(&id)
        .ok_or_else(|| revert("ERC721: invalid token ID"))
}
