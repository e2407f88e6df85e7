//! HTTP API for the mapper engine
//!
//! Every operation takes a JSON body and answers with JSON. Errors come back
//! as `{"error": message}` with 400 for rejected input or a protected
//! invariant, 404 for a missing record and 500 for anything else.
//!
//! ## Aggregation
//! - `POST /maps/aggregates` - Recompute one map (optionally cascading)
//! - `POST /territories/aggregates` - Recompute one territory
//!
//! ## Assignment
//! - `POST /territories/quicklink` - Pick a map for a worker and assign it
//!
//! ## Structure
//! - `POST /maps/floor/add`, `POST /maps/floor/remove`
//! - `POST /maps/codes/add`, `POST /maps/codes/delete`, `POST /maps/codes/sequence`
//! - `POST /maps/codes` - List a map's codes in sequence order
//! - `POST /maps/territory` - Move a map to another territory
//! - `POST /maps/new` - Create a map and its address grid
//! - `POST /maps/reset`, `POST /territories/reset`
//! - `POST /addresses/call` - Record a call outcome
//! - `POST /options/update` - Batch update a congregation's address types
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:8090/territories/quicklink \
//!      -d '{"territory": "t-1", "coordinates": {"lat": 1.35, "lng": 103.82}, "publisher": "Ann"}'
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::db::models::Coordinates;
use crate::error::MapperError;
use crate::services::response::{
    error_response, from_create_result, from_result, method_not_allowed, not_found, ok,
};
use crate::services::{CodeSequence, Engine, NewMapInput, OptionInput};

// ============================================================================
// Request bodies
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct MapAggregatesRequest {
    #[serde(alias = "map")]
    map_id: String,
    #[serde(default = "default_true")]
    cascade: bool,
}

#[derive(Debug, Deserialize)]
struct TerritoryRequest {
    #[serde(alias = "territory")]
    territory_id: String,
}

#[derive(Debug, Deserialize)]
struct QuicklinkRequest {
    #[serde(alias = "territory")]
    territory_id: String,
    #[serde(default)]
    coordinates: Option<Coordinates>,
    #[serde(default)]
    publisher: Option<String>,
    #[serde(default, alias = "user")]
    worker_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddFloorRequest {
    #[serde(alias = "map")]
    map_id: String,
    #[serde(default)]
    add_higher: bool,
}

#[derive(Debug, Deserialize)]
struct RemoveFloorRequest {
    #[serde(alias = "map")]
    map_id: String,
    floor: i32,
}

#[derive(Debug, Deserialize)]
struct AddCodesRequest {
    #[serde(alias = "map")]
    map_id: String,
    #[serde(default)]
    codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteCodeRequest {
    #[serde(alias = "map")]
    map_id: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct SequenceRequest {
    #[serde(alias = "map")]
    map_id: String,
    #[serde(default)]
    codes: Vec<CodeSequence>,
}

#[derive(Debug, Deserialize)]
struct MapRequest {
    #[serde(alias = "map")]
    map_id: String,
}

#[derive(Debug, Deserialize)]
struct ReassignRequest {
    #[serde(alias = "map")]
    map_id: String,
    #[serde(alias = "old_territory")]
    old_territory_id: String,
    #[serde(alias = "new_territory")]
    new_territory_id: String,
}

#[derive(Debug, Deserialize)]
struct ResetMapRequest {
    #[serde(alias = "map")]
    map_id: String,
    acting_user: String,
}

#[derive(Debug, Deserialize)]
struct ResetTerritoryRequest {
    #[serde(alias = "territory")]
    territory_id: String,
    acting_user: String,
}

#[derive(Debug, Deserialize)]
struct RecordCallRequest {
    #[serde(alias = "address")]
    address_id: String,
    status: String,
    acting_user: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateOptionsRequest {
    #[serde(alias = "congregation")]
    congregation_id: String,
    #[serde(default)]
    options: Vec<OptionInput>,
}

// ============================================================================
// Server
// ============================================================================

/// HTTP server state
pub struct HttpServer {
    engine: Arc<Engine>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(engine: Arc<Engine>, bind_addr: SocketAddr) -> Self {
        Self { engine, bind_addr }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), MapperError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        let response = match (method, path.as_str()) {
            (Method::GET, "/health") => self.handle_health(),

            // Aggregation
            (Method::POST, "/maps/aggregates") => {
                self.call(req, |engine, body: MapAggregatesRequest| {
                    engine.aggregation.recompute_map(&body.map_id, body.cascade)
                })
                .await
            }
            (Method::POST, "/territories/aggregates") => {
                self.call(req, |engine, body: TerritoryRequest| {
                    engine.aggregation.recompute_territory(&body.territory_id)
                })
                .await
            }

            // Assignment
            (Method::POST, "/territories/quicklink") => {
                self.call(req, |engine, body: QuicklinkRequest| {
                    let location = body
                        .coordinates
                        .ok_or_else(|| MapperError::InvalidInput("Coordinates are required".into()))?;
                    engine.assignment.select_and_assign(
                        &body.territory_id,
                        location,
                        body.publisher.as_deref(),
                        body.worker_id.as_deref(),
                    )
                })
                .await
            }

            // Structure
            (Method::POST, "/maps/floor/add") => {
                self.call(req, |engine, body: AddFloorRequest| {
                    engine.structure.add_floor(&body.map_id, body.add_higher)
                })
                .await
            }
            (Method::POST, "/maps/floor/remove") => {
                self.call(req, |engine, body: RemoveFloorRequest| {
                    engine.structure.remove_floor(&body.map_id, body.floor)
                })
                .await
            }
            (Method::POST, "/maps/codes/add") => {
                self.call(req, |engine, body: AddCodesRequest| {
                    engine.structure.add_address_codes(&body.map_id, &body.codes)
                })
                .await
            }
            (Method::POST, "/maps/codes/delete") => {
                self.call(req, |engine, body: DeleteCodeRequest| {
                    engine.structure.delete_address_code(&body.map_id, &body.code)
                })
                .await
            }
            (Method::POST, "/maps/codes/sequence") => {
                self.call(req, |engine, body: SequenceRequest| {
                    engine.structure.update_sequence(&body.map_id, &body.codes)
                })
                .await
            }
            (Method::POST, "/maps/codes") => {
                self.call(req, |engine, body: MapRequest| {
                    engine.structure.map_codes(&body.map_id)
                })
                .await
            }
            (Method::POST, "/maps/territory") => {
                self.call(req, |engine, body: ReassignRequest| {
                    engine.structure.reassign_territory(
                        &body.map_id,
                        &body.old_territory_id,
                        &body.new_territory_id,
                    )
                })
                .await
            }
            (Method::POST, "/maps/new") => self.handle_new_map(req).await,
            (Method::POST, "/maps/reset") => {
                self.call(req, |engine, body: ResetMapRequest| {
                    engine.structure.reset_map(&body.map_id, &body.acting_user)
                })
                .await
            }
            (Method::POST, "/territories/reset") => {
                self.call(req, |engine, body: ResetTerritoryRequest| {
                    engine
                        .structure
                        .reset_territory(&body.territory_id, &body.acting_user)
                })
                .await
            }
            (Method::POST, "/addresses/call") => {
                self.call(req, |engine, body: RecordCallRequest| {
                    engine.structure.record_call(
                        &body.address_id,
                        &body.status,
                        &body.acting_user,
                        body.notes.as_deref(),
                    )
                })
                .await
            }
            (Method::POST, "/options/update") => {
                self.call(req, |engine, body: UpdateOptionsRequest| {
                    engine
                        .options
                        .update_options(&body.congregation_id, &body.options)
                })
                .await
            }

            (_, p) if is_known_route(p) => method_not_allowed(),
            _ => not_found("Not Found"),
        };

        Ok(response)
    }

    /// Health check endpoint
    fn handle_health(&self) -> Response<Full<Bytes>> {
        ok(&serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "stale_views": self.engine.aggregation.stale().len(),
        }))
    }

    /// POST /maps/new - answers 201 with the created map
    async fn handle_new_map(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let input: NewMapInput = match read_json(req).await {
            Ok(input) => input,
            Err(e) => return error_response(e),
        };
        let engine = self.engine.clone();
        let result = run_blocking(move || engine.structure.create_map(&input)).await;
        log_server_error(&result);
        from_create_result(result)
    }

    /// Decode the body, run the operation off the async runtime and encode
    /// its result
    async fn call<B, T, F>(&self, req: Request<Incoming>, op: F) -> Response<Full<Bytes>>
    where
        B: DeserializeOwned + Send + 'static,
        T: Serialize + Send + 'static,
        F: FnOnce(&Engine, B) -> Result<T, MapperError> + Send + 'static,
    {
        let body: B = match read_json(req).await {
            Ok(body) => body,
            Err(e) => return error_response(e),
        };
        let engine = self.engine.clone();
        let result = run_blocking(move || op(engine.as_ref(), body)).await;
        log_server_error(&result);
        from_result(result)
    }
}

/// Log failures the caller did not cause; returns whether it logged
fn log_server_error<T>(result: &Result<T, MapperError>) -> bool {
    match result {
        Err(e) if !e.is_client_error() => {
            error!(error = %e, "Request failed");
            true
        }
        _ => false,
    }
}

const ROUTES: &[&str] = &[
    "/health",
    "/maps/aggregates",
    "/territories/aggregates",
    "/territories/quicklink",
    "/maps/floor/add",
    "/maps/floor/remove",
    "/maps/codes/add",
    "/maps/codes/delete",
    "/maps/codes/sequence",
    "/maps/codes",
    "/maps/territory",
    "/maps/new",
    "/maps/reset",
    "/territories/reset",
    "/addresses/call",
    "/options/update",
];

fn is_known_route(path: &str) -> bool {
    ROUTES.contains(&path)
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, MapperError> {
    let body = req
        .collect()
        .await
        .map_err(|e| MapperError::InvalidInput(format!("Failed to read body: {}", e)))?
        .to_bytes();
    parse_body(&body)
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, MapperError> {
    serde_json::from_slice(body)
        .map_err(|e| MapperError::InvalidInput(format!("Invalid request body: {}", e)))
}

/// Run a synchronous engine operation on the blocking pool; a panic becomes
/// a server error
async fn run_blocking<T, F>(op: F) -> Result<T, MapperError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, MapperError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| MapperError::Internal(format!("Operation aborted: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_accepts_short_field_names() {
        let body: AddFloorRequest = parse_body(br#"{"map": "m-1", "add_higher": true}"#).unwrap();
        assert_eq!(body.map_id, "m-1");
        assert!(body.add_higher);

        let body: MapAggregatesRequest = parse_body(br#"{"map_id": "m-1"}"#).unwrap();
        assert!(body.cascade);
    }

    #[test]
    fn test_parse_body_rejects_malformed_json() {
        let err = parse_body::<RemoveFloorRequest>(b"{not json").unwrap_err();
        assert!(err.is_client_error());

        let err = parse_body::<QuicklinkRequest>(br#"{"territory": "t", "coordinates": {"lat": 1.0}}"#)
            .unwrap_err();
        assert!(matches!(err, MapperError::InvalidInput(_)));
    }

    #[test]
    fn test_known_routes() {
        assert!(is_known_route("/maps/codes"));
        assert!(!is_known_route("/maps/unknown"));
    }

    #[test]
    fn test_only_server_errors_are_logged() {
        assert!(log_server_error::<()>(&Err(MapperError::Internal("pool gone".into()))));
        assert!(!log_server_error::<()>(&Err(MapperError::Invariant("last floor".into()))));
        assert!(!log_server_error::<()>(&Err(MapperError::NotFound("map".into()))));
        assert!(!log_server_error(&Ok(1)));
    }

    #[tokio::test]
    async fn test_run_blocking_converts_panics() {
        let result: Result<(), MapperError> = run_blocking(|| panic!("boom")).await;
        assert!(matches!(result, Err(MapperError::Internal(_))));

        let value = run_blocking(|| Ok(7)).await.unwrap();
        assert_eq!(value, 7);
    }
}
