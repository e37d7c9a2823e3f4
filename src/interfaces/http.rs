use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::application::wallet::{NewAccount, NewPaymentUri, NewTransaction, Wallet};
use crate::domain::account::{Account, PaymentUri};
use crate::domain::kyc::KycSamples;
use crate::domain::negotiation::NegotiationRecord;
use crate::domain::transaction::Transaction;
use crate::error::WalletError;

/// Header naming the wallet a negotiation turn claims to come from.
pub const SENDER_ADDRESS_HEADER: &str = "x-request-sender-address";

#[derive(Clone)]
struct ApiState {
    wallet: Arc<Wallet>,
}

/// Builds the wallet's HTTP API.
///
/// The handlers are thin: validation and state changes live in the wallet,
/// this layer only maps payloads and errors onto HTTP.
pub fn router(wallet: Arc<Wallet>) -> Router {
    Router::new()
        .route("/accounts", get(list_accounts).post(create_account))
        .route("/accounts/:account_id/balances", get(account_balances))
        .route(
            "/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route(
            "/payment_uris",
            get(list_payment_uris).post(create_payment_uri),
        )
        .route("/negotiation_records", get(list_negotiation_records))
        .route("/kyc_sample", get(kyc_sample))
        .route("/sync", post(run_sync))
        .route("/offchain", post(receive_offchain))
        .layer(TraceLayer::new_for_http())
        .with_state(ApiState { wallet })
}

struct ApiError(WalletError);

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WalletError::Validation(_) | WalletError::Protocol(_) => StatusCode::BAD_REQUEST,
            WalletError::NotFound(_) => StatusCode::NOT_FOUND,
            WalletError::Ledger(_) | WalletError::Transport(_) | WalletError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn create_account(
    State(state): State<ApiState>,
    Json(input): Json<NewAccount>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let account = state.wallet.create_account(input).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn list_accounts(State(state): State<ApiState>) -> Json<Vec<Account>> {
    Json(state.wallet.list::<Account>().await)
}

async fn account_balances(
    State(state): State<ApiState>,
    Path(account_id): Path<String>,
) -> Result<Json<HashMap<String, i64>>, ApiError> {
    Ok(Json(state.wallet.balances(&account_id).await?))
}

async fn create_transaction(
    State(state): State<ApiState>,
    Json(input): Json<NewTransaction>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let transaction = state.wallet.create_transaction(input).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

async fn list_transactions(State(state): State<ApiState>) -> Json<Vec<Transaction>> {
    Json(state.wallet.list::<Transaction>().await)
}

async fn create_payment_uri(
    State(state): State<ApiState>,
    Json(input): Json<NewPaymentUri>,
) -> Result<(StatusCode, Json<PaymentUri>), ApiError> {
    let uri = state.wallet.create_payment_uri(input).await?;
    Ok((StatusCode::CREATED, Json(uri)))
}

async fn list_payment_uris(State(state): State<ApiState>) -> Json<Vec<PaymentUri>> {
    Json(state.wallet.list::<PaymentUri>().await)
}

async fn list_negotiation_records(State(state): State<ApiState>) -> Json<Vec<NegotiationRecord>> {
    Json(state.wallet.list::<NegotiationRecord>().await)
}

async fn kyc_sample(State(state): State<ApiState>) -> Json<KycSamples> {
    Json(state.wallet.kyc_samples().clone())
}

async fn run_sync(State(state): State<ApiState>) -> Result<StatusCode, ApiError> {
    state.wallet.sync().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Inbound negotiation turns from counterparty wallets. The turn is queued
/// and acknowledged; it takes effect in the next sync pass.
async fn receive_offchain(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let sender = headers
        .get(SENDER_ADDRESS_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ApiError(WalletError::validation(format!(
                "'{SENDER_ADDRESS_HEADER}' header is required"
            )))
        })?;
    state.wallet.receive_turn(sender, &body).await?;
    Ok(StatusCode::ACCEPTED)
}
