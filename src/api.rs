//! HTTP surface: auth, wallet provisioning, ticket and marketplace routes.
//!
//! Every response body is an [`Envelope`]. Handler failures go through
//! [`to_http_error`], so only normalized messages reach clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::contracts::dispatcher::DispatchReceipt;
use crate::contracts::parse_address;
use crate::errors::{ServiceError, ServiceResult};
use crate::identity::IdentityProvider;
use crate::ticketing::{ExternalFlight, FlightChange, Recipient, TicketingService};
use crate::types::{MarketListing, Quantity, TicketView};
use crate::wallet::WalletDirectory;

#[derive(Clone)]
pub struct ApiContext {
    identity: Arc<dyn IdentityProvider>,
    wallets: Arc<dyn WalletDirectory>,
    tickets: Arc<TicketingService>,
}

impl ApiContext {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        wallets: Arc<dyn WalletDirectory>,
        tickets: Arc<TicketingService>,
    ) -> Self {
        Self {
            identity,
            wallets,
            tickets,
        }
    }
}

/// User id resolved by [`auth_middleware`] for the current request.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser(pub String);

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    fn data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    fn with_message(data: T, message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            ..Self::data(data)
        }
    }
}

impl Envelope<Value> {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            message: None,
        }
    }
}

type HttpError = (StatusCode, Json<Envelope>);
type ApiResult<T> = Result<Json<Envelope<T>>, HttpError>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
struct Credentials {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    user_id: String,
    wallet_address: Address,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    user: Value,
    token: String,
    wallet_address: Address,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WalletResponse {
    wallet_address: Address,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    ticket_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flight_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seat_number: Option<String>,
    transaction_hash: H256,
    wallet_address: Address,
}

impl From<DispatchReceipt> for TransactionResponse {
    fn from(receipt: DispatchReceipt) -> Self {
        Self {
            ticket_id: None,
            flight_id: None,
            seat_number: None,
            transaction_hash: receipt.transaction_hash,
            wallet_address: receipt.signer_address,
        }
    }
}

impl TransactionResponse {
    fn ticket(mut self, ticket_id: &Quantity) -> Self {
        self.ticket_id = Some(ticket_id.to_string());
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseRequest {
    flight_id: Option<Quantity>,
    seat_number: Option<Quantity>,
    user_info: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightDetails {
    flight_number: Option<String>,
    departure: Option<String>,
    destination: Option<String>,
    departure_time: Option<Quantity>,
    arrival_time: Option<Quantity>,
    #[serde(alias = "totalTicket")]
    total_tickets: Option<Quantity>,
}

impl FlightDetails {
    /// `None` when any detail is missing.
    fn complete(self) -> ServiceResult<Option<ExternalFlight>> {
        let (
            Some(flight_number),
            Some(departure),
            Some(destination),
            Some(departure_time),
            Some(arrival_time),
            Some(total_tickets),
        ) = (
            text(self.flight_number),
            text(self.departure),
            text(self.destination),
            present(self.departure_time),
            present(self.arrival_time),
            present(self.total_tickets),
        )
        else {
            return Ok(None);
        };
        Ok(Some(ExternalFlight {
            flight_number,
            departure,
            destination,
            departure_time: departure_time.to_unix_seconds()?,
            arrival_time: arrival_time.to_unix_seconds()?,
            total_tickets: total_tickets.to_u256()?,
        }))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalPurchaseRequest {
    #[serde(flatten)]
    flight: FlightDetails,
    user_info: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest {
    old_ticket_id: Option<Quantity>,
    new_flight_id: Option<Quantity>,
    #[serde(flatten)]
    flight: FlightDetails,
    /// Wei attached to the call.
    value: Option<Quantity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest {
    ticket_id: Option<Quantity>,
    to_address: Option<String>,
    to_email: Option<String>,
    new_user_info: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest {
    ticket_id: Option<Quantity>,
    /// Ether.
    price: Option<Quantity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuyRequest {
    ticket_id: Option<Quantity>,
    new_user_info: Option<String>,
}

pub fn router(context: ApiContext, allowed_origin: Option<String>) -> ServiceResult<Router> {
    let protected = Router::new()
        .route("/wallet/create-wallet", post(create_wallet))
        .route("/ticket/purchase", post(purchase_ticket))
        .route("/ticket/purchase-external", post(purchase_external_ticket))
        .route("/ticket/modify", put(modify_ticket))
        .route("/ticket/transfer", post(transfer_ticket))
        .route("/ticket/me", get(user_tickets))
        .route("/ticket/:ticketId", get(ticket_details))
        .route("/marketplace/list", post(list_ticket))
        .route("/marketplace/buy", post(buy_ticket))
        .route("/marketplace/delist/:ticketId", delete(delist_ticket))
        .route("/marketplace/:ticketId", get(listing_details))
        .route_layer(middleware::from_fn_with_state(
            context.clone(),
            auth_middleware,
        ));

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/auth/signup", post(sign_up))
        .route("/auth/signin", post(sign_in))
        .route("/marketplace/listings", get(market_listings))
        .merge(protected)
        .layer(middleware::from_fn(response_time));

    if let Some(origin) = allowed_origin {
        let origin = HeaderValue::from_str(&origin)
            .map_err(|err| ServiceError::Config(format!("invalid allowed_origin: {err}")))?;
        router = router.layer(middleware::from_fn_with_state(origin, cors_middleware));
    }

    Ok(router.with_state(context))
}

pub async fn serve(
    context: ApiContext,
    addr: SocketAddr,
    allowed_origin: Option<String>,
) -> ServiceResult<()> {
    let router = router(context, allowed_origin)?;
    let listener = TcpListener::bind(addr).await?;
    info!(?addr, "ticket API listening");
    axum::serve(listener, router)
        .await
        .map_err(|err| ServiceError::Io(std::io::Error::other(err)))
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: &HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("authorization,content-type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,PUT,DELETE,OPTIONS"),
    );
}

async fn cors_middleware(State(origin): State<HeaderValue>, request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut(), &origin);
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut(), &origin);
    response
}

async fn auth_middleware(
    State(context): State<ApiContext>,
    mut request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| to_http_error(ServiceError::Unauthenticated))?
        .to_string();

    let user_id = match context.identity.verify_token(&token).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => return Err(to_http_error(ServiceError::InvalidToken)),
        Err(err) => {
            warn!(error = %err, "token verification failed");
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(Envelope::failure(ServiceError::InvalidToken.to_string())),
            ));
        }
    };
    request.extensions_mut().insert(AuthenticatedUser(user_id));
    Ok(next.run(request).await)
}

async fn response_time(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "request served"
    );
    response
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn sign_up(
    State(state): State<ApiContext>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> ApiResult<SignUpResponse> {
    let credentials = body(payload)?;
    let (Some(email), Some(password)) = (text(credentials.email), text(credentials.password))
    else {
        return Err(missing("email, password"));
    };
    let user_id = state
        .identity
        .sign_up(&email, &password)
        .await
        .map_err(to_http_error)?;
    let wallet_address = state.wallets.create(&user_id).await.map_err(to_http_error)?;
    info!(user_id, %wallet_address, "registered user");
    Ok(Json(Envelope::data(SignUpResponse {
        user_id,
        wallet_address,
    })))
}

async fn sign_in(
    State(state): State<ApiContext>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> ApiResult<SignInResponse> {
    let credentials = body(payload)?;
    let (Some(email), Some(password)) = (text(credentials.email), text(credentials.password))
    else {
        return Err(missing("email, password"));
    };
    let session = state
        .identity
        .sign_in(&email, &password)
        .await
        .map_err(to_http_error)?;
    let user_id = session
        .user_id()
        .map(str::to_string)
        .ok_or_else(|| to_http_error(ServiceError::Identity("session without a user id".into())))?;
    let wallet_address = state.wallets.ensure(&user_id).await.map_err(to_http_error)?;
    Ok(Json(Envelope::data(SignInResponse {
        user: session.user,
        token: session.token,
        wallet_address,
    })))
}

async fn create_wallet(
    State(state): State<ApiContext>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> ApiResult<WalletResponse> {
    let wallet_address = state.wallets.create(&user_id).await.map_err(to_http_error)?;
    Ok(Json(Envelope::data(WalletResponse { wallet_address })))
}

async fn purchase_ticket(
    State(state): State<ApiContext>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    payload: Result<Json<PurchaseRequest>, JsonRejection>,
) -> ApiResult<TransactionResponse> {
    let request = body(payload)?;
    let (Some(flight_id), Some(seat_number), Some(user_info)) = (
        present(request.flight_id),
        present(request.seat_number),
        text(request.user_info),
    ) else {
        return Err(missing("flightId, seatNumber, userInfo"));
    };
    let receipt = state
        .tickets
        .purchase_ticket(
            &user_id,
            flight_id.to_u256().map_err(to_http_error)?,
            seat_number.to_u256().map_err(to_http_error)?,
            &user_info,
        )
        .await
        .map_err(to_http_error)?;
    let response = TransactionResponse {
        flight_id: Some(flight_id.to_string()),
        seat_number: Some(seat_number.to_string()),
        ..TransactionResponse::from(receipt)
    };
    Ok(Json(Envelope::with_message(
        response,
        "Ticket purchased successfully",
    )))
}

async fn purchase_external_ticket(
    State(state): State<ApiContext>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    payload: Result<Json<ExternalPurchaseRequest>, JsonRejection>,
) -> ApiResult<TransactionResponse> {
    let request = body(payload)?;
    let flight = request.flight.complete().map_err(to_http_error)?;
    let (Some(flight), Some(user_info)) = (flight, text(request.user_info)) else {
        return Err(missing(
            "flightNumber, departure, destination, departureTime, arrivalTime, totalTicket, userInfo",
        ));
    };
    let receipt = state
        .tickets
        .purchase_external_ticket(&user_id, flight, &user_info)
        .await
        .map_err(to_http_error)?;
    Ok(Json(Envelope::with_message(
        TransactionResponse::from(receipt),
        "External ticket purchased successfully",
    )))
}

async fn modify_ticket(
    State(state): State<ApiContext>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    payload: Result<Json<ModifyRequest>, JsonRejection>,
) -> ApiResult<TransactionResponse> {
    let request = body(payload)?;
    let Some(old_ticket_id) = present(request.old_ticket_id) else {
        return Err(missing("oldTicketId"));
    };
    let change = match (
        request.flight.complete().map_err(to_http_error)?,
        present(request.new_flight_id),
    ) {
        (Some(flight), _) => FlightChange::External(flight),
        (None, Some(flight_id)) => FlightChange::Existing(flight_id.to_u256().map_err(to_http_error)?),
        (None, None) => {
            return Err(missing(
                "newFlightId or flightNumber, departure, destination, departureTime, arrivalTime, totalTickets",
            ))
        }
    };
    let value = match present(request.value) {
        Some(value) => value.to_u256().map_err(to_http_error)?,
        None => U256::zero(),
    };
    let receipt = state
        .tickets
        .modify_ticket(
            &user_id,
            old_ticket_id.to_u256().map_err(to_http_error)?,
            change,
            value,
        )
        .await
        .map_err(to_http_error)?;
    Ok(Json(Envelope::with_message(
        TransactionResponse::from(receipt).ticket(&old_ticket_id),
        "Ticket modified successfully",
    )))
}

async fn transfer_ticket(
    State(state): State<ApiContext>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> ApiResult<TransactionResponse> {
    let request = body(payload)?;
    let recipient = match (text(request.to_address), text(request.to_email)) {
        (Some(address), _) => Some(Recipient::Address(
            parse_address(&address)
                .map_err(|err| to_http_error(ServiceError::InvalidArgument(err)))?,
        )),
        (None, Some(email)) => Some(Recipient::Email(email)),
        (None, None) => None,
    };
    let (Some(ticket_id), Some(recipient), Some(new_user_info)) = (
        present(request.ticket_id),
        recipient,
        text(request.new_user_info),
    ) else {
        return Err(missing("ticketId, toAddress or toEmail, newUserInfo"));
    };
    let receipt = state
        .tickets
        .transfer_ticket(
            &user_id,
            ticket_id.to_u256().map_err(to_http_error)?,
            recipient,
            &new_user_info,
        )
        .await
        .map_err(to_http_error)?;
    Ok(Json(Envelope::with_message(
        TransactionResponse::from(receipt).ticket(&ticket_id),
        "Ticket transferred successfully",
    )))
}

async fn user_tickets(
    State(state): State<ApiContext>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> ApiResult<Vec<TicketView>> {
    state
        .tickets
        .user_tickets(&user_id)
        .await
        .map(|tickets| Json(Envelope::data(tickets)))
        .map_err(to_http_error)
}

async fn ticket_details(
    State(state): State<ApiContext>,
    Path(ticket_id): Path<String>,
) -> ApiResult<TicketView> {
    let ticket_id = path_id(ticket_id)?;
    state
        .tickets
        .ticket_details(ticket_id.to_u256().map_err(to_http_error)?)
        .await
        .map(|ticket| Json(Envelope::data(ticket)))
        .map_err(to_http_error)
}

async fn list_ticket(
    State(state): State<ApiContext>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    payload: Result<Json<ListRequest>, JsonRejection>,
) -> ApiResult<TransactionResponse> {
    let request = body(payload)?;
    let (Some(ticket_id), Some(price)) = (present(request.ticket_id), present(request.price))
    else {
        return Err(missing("ticketId, price"));
    };
    let receipt = state
        .tickets
        .list_ticket(
            &user_id,
            ticket_id.to_u256().map_err(to_http_error)?,
            price.to_wei().map_err(to_http_error)?,
        )
        .await
        .map_err(to_http_error)?;
    Ok(Json(Envelope::with_message(
        TransactionResponse::from(receipt).ticket(&ticket_id),
        "Ticket listed successfully",
    )))
}

async fn buy_ticket(
    State(state): State<ApiContext>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    payload: Result<Json<BuyRequest>, JsonRejection>,
) -> ApiResult<TransactionResponse> {
    let request = body(payload)?;
    // newUserInfo is still required from clients; the marketplace call has no slot for it.
    let (Some(ticket_id), Some(_)) = (present(request.ticket_id), text(request.new_user_info)) else {
        return Err(missing("ticketId, newUserInfo"));
    };
    let receipt = state
        .tickets
        .buy_ticket(&user_id, ticket_id.to_u256().map_err(to_http_error)?)
        .await
        .map_err(to_http_error)?;
    Ok(Json(Envelope::with_message(
        TransactionResponse::from(receipt).ticket(&ticket_id),
        "Ticket purchased successfully",
    )))
}

async fn delist_ticket(
    State(state): State<ApiContext>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(ticket_id): Path<String>,
) -> ApiResult<TransactionResponse> {
    let ticket_id = path_id(ticket_id)?;
    let receipt = state
        .tickets
        .delist_ticket(&user_id, ticket_id.to_u256().map_err(to_http_error)?)
        .await
        .map_err(to_http_error)?;
    Ok(Json(Envelope::with_message(
        TransactionResponse::from(receipt).ticket(&ticket_id),
        "Ticket delisted successfully",
    )))
}

async fn market_listings(State(state): State<ApiContext>) -> ApiResult<Vec<MarketListing>> {
    state
        .tickets
        .market_listings()
        .await
        .map(|listings| Json(Envelope::data(listings)))
        .map_err(to_http_error)
}

async fn listing_details(
    State(state): State<ApiContext>,
    Path(ticket_id): Path<String>,
) -> ApiResult<MarketListing> {
    let ticket_id = path_id(ticket_id)?;
    state
        .tickets
        .listing_details(ticket_id.to_u256().map_err(to_http_error)?)
        .await
        .map(|listing| Json(Envelope::data(listing)))
        .map_err(to_http_error)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| to_http_error(ServiceError::InvalidArgument(rejection.body_text())))
}

fn present(value: Option<Quantity>) -> Option<Quantity> {
    value.filter(|quantity| !quantity.is_blank())
}

fn text(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

/// Path segments are text, so `"0"` is a real token id; only an empty segment is missing.
fn path_id(raw: String) -> Result<Quantity, HttpError> {
    if raw.trim().is_empty() {
        return Err(missing("ticketId"));
    }
    Ok(Quantity::Text(raw))
}

fn missing(fields: &str) -> HttpError {
    to_http_error(ServiceError::MissingParameters(fields.to_string()))
}

pub fn to_http_error(err: ServiceError) -> HttpError {
    let status = match err {
        ServiceError::MissingParameters(_) | ServiceError::InvalidArgument(_) => {
            StatusCode::BAD_REQUEST
        }
        ServiceError::Unauthenticated => StatusCode::UNAUTHORIZED,
        ServiceError::InvalidToken => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    (status, Json(Envelope::failure(err.to_string())))
}
