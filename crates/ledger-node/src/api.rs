use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{balance_of, chain::summarize, Block, Transaction};
use ledger_p2p::{BroadcastReport, Node, NodeError};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub node: Node,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Head {
    height: u64,
    hash: String,
}

#[derive(Deserialize)]
struct TxIn {
    from: String,
    to: String,
    amount: f64,
}

#[derive(Serialize)]
struct Delivery {
    delivered: Vec<String>,
    failed: Vec<String>,
}

impl From<BroadcastReport> for Delivery {
    fn from(report: BroadcastReport) -> Self {
        Self {
            delivered: report.delivered,
            failed: report.failed.into_iter().map(|(peer, _)| peer).collect(),
        }
    }
}

#[derive(Serialize)]
struct TxOut {
    accepted: bool,
    tx: Transaction,
    broadcast: Delivery,
}

#[derive(Serialize)]
struct MineOut {
    block: Block,
    adopted_from: Option<String>,
    broadcast: Option<Delivery>,
}

#[derive(Serialize)]
struct Balance {
    id: String,
    balance: f64,
}

struct ApiError(NodeError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "request failed");
        let body = serde_json::json!({ "error": self.0.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        Self(e)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/chain", get(chain))
        .route("/chain/head", get(head))
        .route("/chain/summary", get(summary))
        .route("/pool", get(pool))
        .route("/peers", get(peers))
        .route("/balance/{id}", get(balance))
        .route("/tx", post(submit_tx))
        .route("/mine", post(mine))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn chain(State(state): State<AppState>) -> Json<Vec<Block>> {
    Json(state.node.ledger().chain())
}

async fn head(State(state): State<AppState>) -> Json<Head> {
    let tip = state.node.ledger().tip();
    Json(Head {
        height: tip.index,
        hash: tip.hash,
    })
}

async fn summary(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(summarize(&state.node.ledger().chain()))
}

async fn pool(State(state): State<AppState>) -> Json<Vec<Transaction>> {
    Json(state.node.ledger().pending())
}

async fn peers(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.node.peers()?))
}

async fn balance(State(state): State<AppState>, Path(id): Path<String>) -> Json<Balance> {
    let balance = balance_of(&state.node.ledger().chain(), &id);
    Json(Balance { id, balance })
}

async fn submit_tx(
    State(state): State<AppState>,
    Json(tx): Json<TxIn>,
) -> Result<Json<TxOut>, ApiError> {
    let tx = Transaction::new(tx.from, tx.to, tx.amount);
    let submission = state.node.add_transaction(tx.clone()).await?;
    Ok(Json(TxOut {
        accepted: submission.admitted,
        tx,
        broadcast: submission.broadcast.into(),
    }))
}

async fn mine(State(state): State<AppState>) -> Result<Json<MineOut>, ApiError> {
    let mined = state.node.mine().await?;
    Ok(Json(MineOut {
        block: mined.block,
        adopted_from: mined.adopted_from,
        broadcast: mined.broadcast.map(Delivery::from),
    }))
}
