//! Axum router and all HTTP handlers for loyal-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers, and the scenario tests in `tests/` drive the bare
//! router it returns.
//!
//! Authentication is out of scope: the caller's identity is taken from the
//! `X-User-Id` header set by the fronting gateway.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use loyal_ledger::{list_orders, list_withdrawals, submit_order, LedgerError, SubmitOutcome};
use loyal_runtime::PendingOrder;
use loyal_schemas::{OrderStatus, OwnerId};
use tracing::{debug, error};

use crate::{
    api_types::{
        BalanceResponse, ErrorResponse, HealthResponse, OrderResponse, WithdrawRequest,
        WithdrawalResponse, WorkerStatsView,
    },
    state::{uptime_secs, AppState},
};

pub const OWNER_HEADER: &str = "x-user-id";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/user/orders", post(post_order).get(get_orders))
        .route("/api/user/balance", get(get_balance))
        .route("/api/user/balance/withdraw", post(post_withdraw))
        .route("/api/user/withdrawals", get(get_withdrawals))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Owner extractor / error mapping
// ---------------------------------------------------------------------------

/// Caller identity from `X-User-Id`. Missing or blank → 401.
pub(crate) struct Owner(pub OwnerId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match id {
            Some(id) => Ok(Owner(OwnerId::new(id))),
            None => Err(error_response(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "missing X-User-Id header".to_string(),
            )),
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message,
        }),
    )
        .into_response()
}

pub(crate) struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::Malformed | LedgerError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            LedgerError::ChecksumFailed => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Conflict => StatusCode::CONFLICT,
            LedgerError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            LedgerError::Storage(e) => {
                error!(error = %format!("{e:#}"), "storage failure");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    self.0.code(),
                    "internal storage error".to_string(),
                );
            }
        };
        error_response(status, self.0.code(), self.0.to_string())
    }
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let worker = st
        .worker_stats
        .as_ref()
        .map(|r| WorkerStatsView::new(r.snapshot(), st.queue.tracked_len()));

    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            uptime_secs: uptime_secs(),
            worker,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /api/user/orders  (text/plain order number)
// ---------------------------------------------------------------------------

/// 202 on first submission (queued for reconciliation), 200 when the caller
/// already submitted this number.
pub(crate) async fn post_order(
    State(st): State<Arc<AppState>>,
    Owner(owner): Owner,
    body: String,
) -> Result<StatusCode, ApiError> {
    match submit_order(st.store.as_ref(), &owner, &body).await? {
        SubmitOutcome::Accepted(number) => {
            if !st
                .queue
                .enqueue(PendingOrder::new(number.clone(), OrderStatus::New))
            {
                // Already tracked or worker stopped; the resync covers it.
                debug!(order = %number, "order not queued on submit");
            }
            Ok(StatusCode::ACCEPTED)
        }
        SubmitOutcome::AlreadySubmitted(_) => Ok(StatusCode::OK),
    }
}

// ---------------------------------------------------------------------------
// GET /api/user/orders
// ---------------------------------------------------------------------------

pub(crate) async fn get_orders(
    State(st): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> Result<Response, ApiError> {
    let orders = list_orders(st.store.as_ref(), &owner).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok((StatusCode::OK, Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/user/balance
// ---------------------------------------------------------------------------

pub(crate) async fn get_balance(
    State(st): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = st.ledger.get_balance(&owner).await?;
    Ok(Json(balance.into()))
}

// ---------------------------------------------------------------------------
// POST /api/user/balance/withdraw
// ---------------------------------------------------------------------------

pub(crate) async fn post_withdraw(
    State(st): State<Arc<AppState>>,
    Owner(owner): Owner,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            return Ok(error_response(
                StatusCode::BAD_REQUEST,
                "MALFORMED_BODY",
                rejection.body_text(),
            ))
        }
    };

    let w = st.ledger.request_withdrawal(&owner, &req.order, req.sum).await?;
    Ok((StatusCode::OK, Json(WithdrawalResponse::from(w))).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/user/withdrawals
// ---------------------------------------------------------------------------

pub(crate) async fn get_withdrawals(
    State(st): State<Arc<AppState>>,
    Owner(owner): Owner,
) -> Result<Response, ApiError> {
    let list = list_withdrawals(st.store.as_ref(), &owner).await?;
    if list.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<WithdrawalResponse> = list.into_iter().map(WithdrawalResponse::from).collect();
    Ok((StatusCode::OK, Json(body)).into_response())
}
