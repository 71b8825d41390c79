//! HTTP/JSON control surface.
//!
//! Every handler runs its engine work on the blocking pool while holding the
//! one mutex around [`Testpmd`], so commands reach the engine one at a time
//! in arrival order.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use testpmd_ctl::parse::PortInfo;
use testpmd_ctl::pci::PciBus;
use testpmd_ctl::{Error, ForwardMode, ForwardingState, PciAddress, PeerAddress, Testpmd};
use tracing::{debug, warn};

pub type SharedTestpmd<B> = Arc<Mutex<Testpmd<B>>>;

/// Error reply: `{"error": "<message>"}` with a status derived from the
/// error kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::CommandTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Parse { .. } => StatusCode::BAD_GATEWAY,
            Error::NoSession => StatusCode::SERVICE_UNAVAILABLE,
            Error::Configuration { .. } | Error::InvalidPciAddress { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct MacAddressReply {
    pub pci: String,
    pub mac: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeerBody {
    pub port: u16,
    pub mac: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MacModeRequest {
    pub peers: Vec<PeerBody>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeerMacRequest {
    pub mac: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub command: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryReply {
    pub output: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsReply {
    pub stats: String,
}

pub fn router<B>(testpmd: SharedTestpmd<B>) -> Router
where
    B: PciBus + Send + 'static,
{
    Router::new()
        .route("/ports", get(list_ports::<B>))
        .route("/ports/{pci}", get(port_info::<B>))
        .route("/ports/{pci}/mac", get(mac_address::<B>))
        .route("/mode/io", post(mode_io::<B>))
        .route("/mode/icmp", post(mode_icmp::<B>))
        .route("/mode/mac", post(mode_mac::<B>))
        .route("/peers/{port}", put(set_peer::<B>))
        .route("/state", get(state::<B>))
        .route("/stats", get(stats::<B>).delete(clear_stats::<B>))
        .route("/query", post(query::<B>))
        .with_state(testpmd)
}

/// Run `f` on the blocking pool with the controller locked.
async fn with_testpmd<B, T, F>(testpmd: SharedTestpmd<B>, f: F) -> ApiResult<T>
where
    B: PciBus + Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut Testpmd<B>) -> testpmd_ctl::Result<T> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = testpmd.lock().map_err(|_| Error::Poisoned)?;
        f(&mut *guard)
    })
    .await;

    match joined {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("worker failed: {}", e),
        }),
    }
}

fn parse_pci(raw: &str) -> ApiResult<PciAddress> {
    PciAddress::parse(raw).map_err(ApiError::from)
}

async fn list_ports<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
) -> ApiResult<Json<Vec<PortInfo>>> {
    with_testpmd(t, |t| t.list_ports()).await.map(Json)
}

async fn port_info<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
    Path(pci): Path<String>,
) -> ApiResult<Json<PortInfo>> {
    let pci = parse_pci(&pci)?;
    with_testpmd(t, move |t| t.port_info(&pci)).await.map(Json)
}

async fn mac_address<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
    Path(pci): Path<String>,
) -> ApiResult<Json<MacAddressReply>> {
    let pci = parse_pci(&pci)?;
    let reply_pci = pci.to_string();
    let mac = with_testpmd(t, move |t| t.mac_address(&pci)).await?;
    Ok(Json(MacAddressReply {
        pci: reply_pci,
        mac,
    }))
}

async fn set_mode<B: PciBus + Send + 'static>(
    t: SharedTestpmd<B>,
    mode: ForwardMode,
) -> ApiResult<Json<ForwardingState>> {
    debug!(%mode, "Mode change requested");
    with_testpmd(t, move |t| {
        t.set_forwarding_mode(mode)?;
        t.forwarding_state()
    })
    .await
    .map(Json)
}

async fn mode_io<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
) -> ApiResult<Json<ForwardingState>> {
    set_mode(t, ForwardMode::Io).await
}

async fn mode_icmp<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
) -> ApiResult<Json<ForwardingState>> {
    set_mode(t, ForwardMode::IcmpEcho).await
}

async fn mode_mac<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
    Json(req): Json<MacModeRequest>,
) -> ApiResult<Json<ForwardingState>> {
    let peers: Vec<PeerAddress> = req
        .peers
        .into_iter()
        .map(|p| PeerAddress {
            port: p.port,
            mac: p.mac,
        })
        .collect();
    with_testpmd(t, move |t| {
        t.mac_mode(&peers)?;
        t.forwarding_state()
    })
    .await
    .map(Json)
}

async fn set_peer<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
    Path(port): Path<u16>,
    Json(req): Json<PeerMacRequest>,
) -> ApiResult<Json<ForwardingState>> {
    with_testpmd(t, move |t| {
        t.set_peer_address(port, &req.mac)?;
        t.forwarding_state()
    })
    .await
    .map(Json)
}

async fn state<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
) -> ApiResult<Json<ForwardingState>> {
    with_testpmd(t, |t| t.forwarding_state()).await.map(Json)
}

async fn stats<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
) -> ApiResult<Json<StatsReply>> {
    let stats = with_testpmd(t, |t| t.fwd_stats()).await?;
    Ok(Json(StatsReply { stats }))
}

async fn clear_stats<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
) -> ApiResult<StatusCode> {
    with_testpmd(t, |t| t.clear_fwd_stats()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn query<B: PciBus + Send + 'static>(
    State(t): State<SharedTestpmd<B>>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<QueryReply>> {
    let output = with_testpmd(t, move |t| t.query(&req.command)).await?;
    Ok(Json(QueryReply { output }))
}
