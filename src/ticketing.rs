//! Ticket and marketplace operations performed on behalf of authenticated users.
//!
//! Each operation formats its arguments into the chain's native shapes (integer
//! ids as `uint256`, free-text user information as a keccak `bytes32`, ether
//! prices as wei) and hands them to the dispatcher or the read path.

use std::sync::Arc;

use ethers::abi::ParamType;
use ethers::types::{Address, U256};

use crate::contracts::dispatcher::{
    DispatchReceipt, DispatchRequest, SigningMode, TransactionDispatcher,
};
use crate::contracts::reader::TicketReader;
use crate::contracts::resolver::CallArg;
use crate::contracts::{ContractKind, ContractRegistry};
use crate::crypto::hash_user_info;
use crate::errors::{ServiceError, ServiceResult};
use crate::identity::IdentityProvider;
use crate::types::{MarketListing, TicketView};
use crate::wallet::{CustodialWallet, WalletDirectory};

/// Flight details for tickets on flights the contract does not know yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalFlight {
    pub flight_number: String,
    pub departure: String,
    pub destination: String,
    pub departure_time: U256,
    pub arrival_time: U256,
    pub total_tickets: U256,
}

impl ExternalFlight {
    fn into_args(self) -> Vec<CallArg> {
        vec![
            self.flight_number.into(),
            self.departure.into(),
            self.destination.into(),
            self.departure_time.into(),
            self.arrival_time.into(),
            self.total_tickets.into(),
        ]
    }
}

/// Where a modified ticket should move to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlightChange {
    Existing(U256),
    External(ExternalFlight),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    Address(Address),
    Email(String),
}

pub struct TicketingService {
    dispatcher: TransactionDispatcher,
    reader: TicketReader,
    wallets: Arc<dyn WalletDirectory>,
    identity: Arc<dyn IdentityProvider>,
    contracts: Arc<ContractRegistry>,
}

impl TicketingService {
    pub fn new(
        dispatcher: TransactionDispatcher,
        reader: TicketReader,
        wallets: Arc<dyn WalletDirectory>,
        identity: Arc<dyn IdentityProvider>,
        contracts: Arc<ContractRegistry>,
    ) -> Self {
        Self {
            dispatcher,
            reader,
            wallets,
            identity,
            contracts,
        }
    }

    pub fn dispatcher(&self) -> &TransactionDispatcher {
        &self.dispatcher
    }

    pub fn reader(&self) -> &TicketReader {
        &self.reader
    }

    async fn wallet_for(&self, user_id: &str) -> ServiceResult<CustodialWallet> {
        self.wallets
            .lookup(user_id)
            .await?
            .ok_or_else(|| ServiceError::WalletNotFound(user_id.to_string()))
    }

    /// Arguments for a call whose result should land in `beneficiary`'s wallet.
    ///
    /// An overload taking a trailing `address` gets the beneficiary appended.
    /// Without one the contract credits `msg.sender`, which is only the user
    /// when the user's own key signs.
    fn credit_to(
        &self,
        contract: ContractKind,
        function: &str,
        mut args: Vec<CallArg>,
        beneficiary: Address,
    ) -> ServiceResult<Vec<CallArg>> {
        let arity = args.len() + 1;
        let takes_beneficiary = self
            .contracts
            .get(contract)
            .abi
            .functions_by_name(function)
            .map(|overloads| {
                overloads.iter().any(|overload| {
                    overload.inputs.len() == arity
                        && matches!(overload.inputs.last(), Some(param) if param.kind == ParamType::Address)
                })
            })
            .unwrap_or(false);
        if takes_beneficiary {
            args.push(beneficiary.into());
            return Ok(args);
        }
        match self.dispatcher.mode() {
            SigningMode::Custodial => Ok(args),
            SigningMode::Admin => Err(ServiceError::BeneficiaryUnsupported(function.to_string())),
        }
    }

    pub async fn purchase_ticket(
        &self,
        user_id: &str,
        flight_id: U256,
        seat_number: U256,
        user_info: &str,
    ) -> ServiceResult<DispatchReceipt> {
        let wallet = self.wallet_for(user_id).await?;
        let args = self.credit_to(
            ContractKind::Ticket,
            "purchaseTicket",
            vec![
                flight_id.into(),
                seat_number.into(),
                hash_user_info(user_info).into(),
            ],
            wallet.address,
        )?;
        let request = DispatchRequest::new(ContractKind::Ticket, user_id, "purchaseTicket").args(args);
        self.dispatcher.dispatch(request).await
    }

    pub async fn purchase_external_ticket(
        &self,
        user_id: &str,
        flight: ExternalFlight,
        user_info: &str,
    ) -> ServiceResult<DispatchReceipt> {
        let wallet = self.wallet_for(user_id).await?;
        let mut args = flight.into_args();
        args.push(hash_user_info(user_info).into());
        args.push(wallet.address.into());
        let request =
            DispatchRequest::new(ContractKind::Ticket, user_id, "purchaseExternalTicket").args(args);
        self.dispatcher.dispatch(request).await
    }

    pub async fn modify_ticket(
        &self,
        user_id: &str,
        ticket_id: U256,
        change: FlightChange,
        value: U256,
    ) -> ServiceResult<DispatchReceipt> {
        let mut args = vec![CallArg::from(ticket_id)];
        match change {
            FlightChange::Existing(flight_id) => args.push(flight_id.into()),
            FlightChange::External(flight) => args.extend(flight.into_args()),
        }
        let request = DispatchRequest::new(ContractKind::Ticket, user_id, "modifyTicket")
            .args(args)
            .value(value);
        self.dispatcher.dispatch(request).await
    }

    pub async fn transfer_ticket(
        &self,
        user_id: &str,
        ticket_id: U256,
        recipient: Recipient,
        new_user_info: &str,
    ) -> ServiceResult<DispatchReceipt> {
        let wallet = self.wallet_for(user_id).await?;
        let to = match recipient {
            Recipient::Address(address) => address,
            Recipient::Email(email) => {
                let recipient_id = self.identity.user_id_by_email(&email).await?;
                self.wallet_for(&recipient_id).await?.address
            }
        };
        let request = DispatchRequest::new(ContractKind::Ticket, user_id, "transferTicket").args(vec![
            wallet.address.into(),
            ticket_id.into(),
            to.into(),
            hash_user_info(new_user_info).into(),
        ]);
        self.dispatcher.dispatch(request).await
    }

    /// Approve the marketplace for `ticket_id`, then list it at `price` wei.
    pub async fn list_ticket(
        &self,
        user_id: &str,
        ticket_id: U256,
        price: U256,
    ) -> ServiceResult<DispatchReceipt> {
        if price.is_zero() {
            return Err(ServiceError::InvalidArgument(
                "listing price must be greater than zero".into(),
            ));
        }
        let marketplace = self.contracts.get(ContractKind::Marketplace).address;
        let approval = DispatchRequest::new(ContractKind::Ticket, user_id, "myInsecureApprove")
            .args(vec![marketplace.into(), ticket_id.into()]);
        self.dispatcher.dispatch(approval).await?;

        let listing =
            DispatchRequest::new(ContractKind::Marketplace, user_id, "listTicketForResale")
                .args(vec![ticket_id.into(), price.into()]);
        self.dispatcher.dispatch(listing).await
    }

    /// Buy a listed ticket for the caller, attaching the listing's current on-chain price.
    pub async fn buy_ticket(&self, user_id: &str, ticket_id: U256) -> ServiceResult<DispatchReceipt> {
        let wallet = self.wallet_for(user_id).await?;
        let args = self.credit_to(
            ContractKind::Marketplace,
            "buyTicket",
            vec![ticket_id.into()],
            wallet.address,
        )?;
        let price = self.reader.listing_price(ticket_id).await?;
        if price.is_zero() {
            return Err(ServiceError::NotListed(ticket_id.to_string()));
        }
        let request = DispatchRequest::new(ContractKind::Marketplace, user_id, "buyTicket")
            .args(args)
            .value(price);
        self.dispatcher.dispatch(request).await
    }

    pub async fn delist_ticket(&self, user_id: &str, ticket_id: U256) -> ServiceResult<DispatchReceipt> {
        let request = DispatchRequest::new(ContractKind::Marketplace, user_id, "delistTicket")
            .args(vec![ticket_id.into()]);
        self.dispatcher.dispatch(request).await
    }

    pub async fn ticket_details(&self, ticket_id: U256) -> ServiceResult<TicketView> {
        self.reader.ticket(ticket_id).await
    }

    pub async fn user_tickets(&self, user_id: &str) -> ServiceResult<Vec<TicketView>> {
        let wallet = self.wallet_for(user_id).await?;
        self.reader.tickets_owned_by(wallet.address).await
    }

    pub async fn market_listings(&self) -> ServiceResult<Vec<MarketListing>> {
        self.reader.active_listings().await
    }

    pub async fn listing_details(&self, ticket_id: U256) -> ServiceResult<MarketListing> {
        self.reader
            .listing(ticket_id)
            .await?
            .ok_or_else(|| ServiceError::NotListed(ticket_id.to_string()))
    }
}
