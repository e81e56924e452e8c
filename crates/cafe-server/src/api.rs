use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use bytes::Bytes;
use cafe_shared::constants::{CAFE_API_VERSION, PEER_HEADER};
use cafe_shared::protocol::Envelope;
use cafe_shared::types::ContentId;
use cafe_store::{CafeClient, StoreError};
use chrono::Utc;
use futures::stream;
use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::mailbox::ClientRegistry;
use crate::notify::{ConnectedClients, MailNotice};
use crate::search::{self, QueryHandler, SearchResponse};
use crate::service::{CafeService, Delivery};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CafeService>,
    pub search: Arc<dyn QueryHandler>,
    pub clients: Arc<dyn ClientRegistry>,
    pub connected: ConnectedClients,
    pub config: Arc<ServerConfig>,
    pub started: Instant,
}

/// Identity of the authenticated caller, taken from [`PEER_HEADER`].
#[derive(Debug, Clone)]
pub struct Peer(pub String);

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/cafe/v1/pin", post(store))
        .route("/cafe/v1/pin/:cid", delete(unstore))
        .route(
            "/cafe/v1/threads/:id",
            put(store_thread).delete(unstore_thread),
        )
        .route("/cafe/v1/inbox/:from/:to", post(deliver_message))
        .route("/cafe/v1/inbox/watch", get(watch_inbox))
        .route("/cafe/v1/search", post(search_query))
        .route_layer(middleware::from_fn(require_peer))
        .route("/health", get(health_check))
        .route("/", get(cafe_info))
        .route("/admin/status", get(admin_status))
        .route("/admin/clients", post(admin_register_client))
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_peer(mut req: Request, next: Next) -> Result<Response, ServerError> {
    let peer = req
        .headers()
        .get(PEER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| Peer(v.to_string()))
        .ok_or_else(|| ServerError::Unauthorized(format!("Missing {PEER_HEADER} header")))?;

    req.extensions_mut().insert(peer);
    Ok(next.run(req).await)
}

#[derive(Serialize)]
struct CafeInfoResponse {
    name: String,
    cafe_version: &'static str,
    node_version: &'static str,
}

#[derive(Serialize)]
struct AdminStatusResponse {
    name: String,
    clients: u64,
    watching: usize,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct RegisterClientRequest {
    id: String,
    address: String,
}

async fn health_check() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn cafe_info(State(state): State<AppState>) -> Json<CafeInfoResponse> {
    Json(CafeInfoResponse {
        name: state.config.instance_name.clone(),
        cafe_version: CAFE_API_VERSION,
        node_version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Relay endpoints ───

async fn store(
    State(state): State<AppState>,
    Extension(peer): Extension<Peer>,
    mut multipart: Multipart,
) -> Result<StatusCode, ServerError> {
    let mut stored = 0usize;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::MalformedInput(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::MalformedInput(format!("Failed to read field: {e}")))?;

        state.service.store_object(&data).await?;
        stored += 1;
    }

    debug!(peer = %peer.0, files = stored, "Store request complete");
    Ok(StatusCode::NO_CONTENT)
}

async fn unstore(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> Result<StatusCode, ServerError> {
    let id = ContentId::from_str(&cid).map_err(|e| ServerError::MalformedInput(e.to_string()))?;
    state.service.unstore(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn store_thread(
    State(state): State<AppState>,
    Extension(peer): Extension<Peer>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    state.service.store_thread(&peer.0, &id, body.to_vec())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unstore_thread(
    State(state): State<AppState>,
    Extension(peer): Extension<Peer>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    state.service.unstore_thread(&peer.0, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deliver_message(
    State(state): State<AppState>,
    Path((from, to)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    // an unknown recipient looks the same to the sender as a queued message
    if let Delivery::Queued(id) = state.service.deliver_message(&from, &to, &body).await? {
        debug!(cid = %id, to = %to, "Message queued");
    }
    Ok(StatusCode::OK)
}

/// Stream results of the query envelope in the body as length-prefixed
/// frames.
async fn search_query(
    State(state): State<AppState>,
    Extension(peer): Extension<Peer>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let peer_id = PeerId::from_str(&peer.0)
        .map_err(|e| ServerError::MalformedInput(format!("Invalid peer id: {e}")))?;
    let query = Envelope::from_bytes(&body).map_err(|e| ServerError::MalformedInput(e.to_string()))?;

    let results = state.search.handle(query, peer_id);
    match search::open(results).await? {
        SearchResponse::Empty => Ok(StatusCode::OK.into_response()),
        SearchResponse::Frames(frames) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Body::from_stream(frames),
        )
            .into_response()),
    }
}

/// Hold the connection open and write one JSON line per new-mail notice.
async fn watch_inbox(
    State(state): State<AppState>,
    Extension(peer): Extension<Peer>,
) -> Result<Response, ServerError> {
    let client = state.service.registered_client(&peer.0)?;
    let subscription = state.connected.subscribe(&client.id);

    if !state.service.pending_messages(&client.id)?.is_empty() {
        subscription.push(MailNotice {
            client: client.id.clone(),
            date: Utc::now(),
        });
    }
    debug!(client = %client.id, "Client watching inbox");

    let lines = stream::unfold(subscription, |mut sub| async move {
        let notice = sub.recv().await?;
        let line = serde_json::to_vec(&notice).map(|mut line| {
            line.push(b'\n');
            Bytes::from(line)
        });
        Some((line, sub))
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

// ─── Admin endpoints ───

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    Ok(Json(AdminStatusResponse {
        name: state.config.instance_name.clone(),
        clients: state.clients.count()?,
        watching: state.connected.len(),
        uptime_secs: state.started.elapsed().as_secs(),
    }))
}

async fn admin_register_client(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<RegisterClientRequest>,
) -> Result<(StatusCode, Json<CafeClient>), ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let id = PeerId::from_str(req.id.trim())
        .map_err(|e| ServerError::MalformedInput(format!("Invalid peer id: {e}")))?;

    let client = CafeClient {
        id: id.to_string(),
        address: req.address,
        created: Utc::now(),
    };
    state.clients.register(&client).map_err(|e| match e {
        StoreError::Exists => ServerError::Conflict(format!("Client {id} already registered")),
        other => other.into(),
    })?;

    info!(client = %client.id, "Admin registered cafe client");
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::to_bytes;
    use axum::http::Request as HttpRequest;
    use cafe_shared::dag::DagNode;
    use cafe_shared::framing::decode_frames;
    use cafe_shared::protocol::{MessageType, Query, QueryKind, ThreadEnvelope};
    use cafe_store::Database;
    use futures::StreamExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::content_store::FsContentStore;
    use crate::index::MailboxIndex;
    use crate::mailbox::SqliteMailbox;
    use crate::notify::{Notifier, NotifierWorker};

    const ADMIN_TOKEN: &str = "let-me-in";
    const BOUNDARY: &str = "cafe-test-boundary";

    struct TestApp {
        router: Router,
        client: String,
        _worker: NotifierWorker,
        _dir: TempDir,
    }

    async fn test_app() -> TestApp {
        let dir = TempDir::new().unwrap();
        let content = Arc::new(
            FsContentStore::new(dir.path().join("content"), 1024 * 1024)
                .await
                .unwrap(),
        );
        let mailbox = Arc::new(SqliteMailbox::new(Database::open_in_memory().unwrap()));
        let client = PeerId::random().to_string();
        mailbox
            .register(&CafeClient {
                id: client.clone(),
                address: "127.0.0.1".into(),
                created: Utc::now(),
            })
            .unwrap();

        let connected = ConnectedClients::new();
        let (notifier, worker) =
            Notifier::spawn(Arc::new(connected.clone()), 16, Duration::from_secs(1));
        let service = Arc::new(CafeService::new(
            content,
            mailbox.clone(),
            mailbox.clone(),
            notifier,
        ));

        let config = ServerConfig {
            admin_token: Some(ADMIN_TOKEN.into()),
            ..ServerConfig::default()
        };
        let state = AppState {
            service,
            search: Arc::new(MailboxIndex::new(mailbox.clone(), 1)),
            clients: mailbox,
            connected,
            config: Arc::new(config),
            started: Instant::now(),
        };

        TestApp {
            router: build_router(state),
            client,
            _worker: worker,
            _dir: dir,
        }
    }

    fn as_peer(method: &str, uri: &str, peer: &str, body: impl Into<Body>) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method(method)
            .uri(uri)
            .header(PEER_HEADER, peer)
            .body(body.into())
            .unwrap()
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    fn multipart_body(files: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::new();
        for (i, data) in files.iter().enumerate() {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"f{i}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn delivery_body(block: &[u8]) -> Vec<u8> {
        let node = DagNode::new(b"update".to_vec()).with_link(
            "block",
            ContentId::raw(block),
            block.len() as u64,
        );
        Envelope::wrap(
            MessageType::ThreadEnvelope,
            &ThreadEnvelope {
                thread: "thread-1".into(),
                node: node.to_bytes().unwrap(),
                block: Some(block.to_vec()),
            },
        )
        .unwrap()
        .to_bytes()
        .unwrap()
    }

    fn snapshot_query() -> Vec<u8> {
        Envelope::wrap(
            MessageType::Query,
            &Query {
                id: "q".into(),
                kind: QueryKind::ThreadSnapshots,
                limit: 0,
            },
        )
        .unwrap()
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn health_is_no_content() {
        let app = test_app().await;
        let req = HttpRequest::get("/health").body(Body::empty()).unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn missing_peer_header_is_unauthorized() {
        let app = test_app().await;
        let req = HttpRequest::put("/cafe/v1/threads/t1")
            .body(Body::from("x"))
            .unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_client_thread_is_forbidden() {
        let app = test_app().await;
        let stranger = PeerId::random().to_string();
        let resp = app
            .router
            .oneshot(as_peer("PUT", "/cafe/v1/threads/t1", &stranger, "x"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(body_bytes(resp).await.is_empty());
    }

    #[tokio::test]
    async fn stored_thread_comes_back_through_search() {
        let app = test_app().await;
        let resp = app
            .router
            .clone()
            .oneshot(as_peer("PUT", "/cafe/v1/threads/t1", &app.client, "sealed"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .router
            .oneshot(as_peer("POST", "/cafe/v1/search", &app.client, snapshot_query()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_bytes(resp).await;
        let frames = decode_frames(&body).unwrap();
        assert_eq!(frames.len(), 1);
        let result = Envelope::from_bytes(&frames[0])
            .unwrap()
            .query_result()
            .unwrap();
        assert_eq!(result.id, "t1");
        assert_eq!(result.value, b"sealed");
    }

    #[tokio::test]
    async fn search_without_results_is_empty_ok() {
        let app = test_app().await;
        let resp = app
            .router
            .oneshot(as_peer("POST", "/cafe/v1/search", &app.client, snapshot_query()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_bytes(resp).await.is_empty());
    }

    #[tokio::test]
    async fn search_rejects_bad_peer_and_bad_body() {
        let app = test_app().await;
        let resp = app
            .router
            .clone()
            .oneshot(as_peer("POST", "/cafe/v1/search", "not-a-peer", snapshot_query()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .router
            .oneshot(as_peer("POST", "/cafe/v1/search", &app.client, vec![0xffu8; 3]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deliver_status_codes() {
        let app = test_app().await;
        let sender = PeerId::random().to_string();

        let ok = as_peer(
            "POST",
            &format!("/cafe/v1/inbox/{sender}/{}", app.client),
            &sender,
            delivery_body(b"block"),
        );
        assert_eq!(app.router.clone().oneshot(ok).await.unwrap().status(), StatusCode::OK);

        let unknown = as_peer(
            "POST",
            &format!("/cafe/v1/inbox/{sender}/nobody"),
            &sender,
            delivery_body(b"block"),
        );
        assert_eq!(
            app.router.clone().oneshot(unknown).await.unwrap().status(),
            StatusCode::OK
        );

        let garbage = as_peer(
            "POST",
            &format!("/cafe/v1/inbox/{sender}/{}", app.client),
            &sender,
            vec![0xffu8; 3],
        );
        assert_eq!(
            app.router.oneshot(garbage).await.unwrap().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn multipart_store_then_unstore() {
        let app = test_app().await;
        let node = DagNode::new(b"structured".to_vec()).to_bytes().unwrap();

        let req = HttpRequest::post("/cafe/v1/pin")
            .header(PEER_HEADER, &app.client)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(&[b"plain bytes", &node])))
            .unwrap();
        let resp = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let raw = ContentId::raw(b"plain bytes");
        let resp = app
            .router
            .clone()
            .oneshot(as_peer("DELETE", &format!("/cafe/v1/pin/{raw}"), &app.client, Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        // unknown content is fine too
        let never = ContentId::raw(b"never stored");
        let resp = app
            .router
            .clone()
            .oneshot(as_peer("DELETE", &format!("/cafe/v1/pin/{never}"), &app.client, Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .router
            .oneshot(as_peer("DELETE", "/cafe/v1/pin/not-a-cid", &app.client, Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn watch_reports_pending_mail() {
        let app = test_app().await;
        let sender = PeerId::random().to_string();
        let deliver = as_peer(
            "POST",
            &format!("/cafe/v1/inbox/{sender}/{}", app.client),
            &sender,
            delivery_body(b"waiting"),
        );
        app.router.clone().oneshot(deliver).await.unwrap();

        let resp = app
            .router
            .oneshot(as_peer("GET", "/cafe/v1/inbox/watch", &app.client, Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let mut lines = resp.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_secs(1), lines.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let notice: serde_json::Value = serde_json::from_slice(&first).unwrap();
        assert_eq!(notice["client"], app.client.as_str());
    }

    #[tokio::test]
    async fn admin_requires_token() {
        let app = test_app().await;
        let req = HttpRequest::get("/admin/status")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let resp = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = HttpRequest::get("/admin/status")
            .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let status: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(status["clients"], 1);
    }

    #[tokio::test]
    async fn admin_registers_clients_once() {
        let app = test_app().await;
        let id = PeerId::random().to_string();
        let register = || {
            HttpRequest::post("/admin/clients")
                .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "id": id, "address": "10.0.0.1" }).to_string(),
                ))
                .unwrap()
        };

        let resp = app.router.clone().oneshot(register()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = app.router.clone().oneshot(register()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // the new client may now store threads
        let resp = app
            .router
            .oneshot(as_peer("PUT", "/cafe/v1/threads/t9", &id, "x"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
}
