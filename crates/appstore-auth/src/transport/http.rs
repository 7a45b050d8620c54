//! HTTP transport: the login and account endpoints as JSON over axum

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::TransportConfig;
use crate::constants::{MSG_INVALID_SESSION, MSG_MISSING_FIELDS, MSG_UNPARSEABLE, SERVICE_NAME, STATUS_OK};
use crate::error::{AuthError, ErrorClass};
use crate::service::{AuthService, IssuedSession, SessionInfo};
use crate::sso::ProviderListing;
use crate::{Error, Result};

type AppState = Arc<AuthService>;

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// SSO or password login; which one is decided by the fields present
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    code: Option<String>,
    auth_provider: Option<String>,
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    captcha_response: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    username: String,
    password: String,
    #[serde(default)]
    real_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    session_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateNameRequest {
    session_key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePasswordRequest {
    session_key: String,
    password: String,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    success: bool,
    error_message: String,
    session_key: String,
    rate_limited: bool,
}

impl LoginResponse {
    fn issued(session: IssuedSession) -> Self {
        Self {
            success: true,
            session_key: session.key.into_string(),
            ..Self::default()
        }
    }

    fn failed(message: &str) -> Self {
        Self {
            error_message: message.to_string(),
            ..Self::default()
        }
    }
}

/// Local accounts report `username` and `realName`, SSO accounts `name`
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfoResponse {
    logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    real_name: Option<String>,
    error_message: String,
}

impl From<SessionInfo> for SessionInfoResponse {
    fn from(info: SessionInfo) -> Self {
        if info.sso {
            Self {
                logged_in: true,
                name: Some(info.display_name),
                ..Self::default()
            }
        } else {
            Self {
                logged_in: true,
                username: info.username,
                real_name: Some(info.display_name),
                ..Self::default()
            }
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    success: bool,
    error_message: String,
}

#[derive(Debug, Serialize)]
struct ProviderListResponse {
    ssos: Vec<ProviderListing>,
}

const fn status_for(err: &AuthError) -> StatusCode {
    match err.class() {
        ErrorClass::Input => StatusCode::BAD_REQUEST,
        ErrorClass::Credential => StatusCode::UNAUTHORIZED,
        ErrorClass::Upstream => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorClass::RateLimited => StatusCode::OK,
    }
}

fn unparseable(rejection: &JsonRejection) -> Response {
    tracing::debug!(error = %rejection, "Rejected malformed request body");
    (
        StatusCode::BAD_REQUEST,
        Json(LoginResponse::failed(MSG_UNPARSEABLE)),
    )
        .into_response()
}

fn login_outcome(result: std::result::Result<IssuedSession, AuthError>) -> Response {
    match result {
        Ok(session) => (StatusCode::OK, Json(LoginResponse::issued(session))).into_response(),
        Err(err) => {
            let body = LoginResponse {
                rate_limited: err.is_rate_limited(),
                ..LoginResponse::failed(err.user_message())
            };
            (status_for(&err), Json(body)).into_response()
        }
    }
}

fn status_outcome(result: std::result::Result<(), AuthError>) -> Response {
    match result {
        Ok(()) => Json(StatusResponse {
            success: true,
            error_message: String::new(),
        })
        .into_response(),
        Err(err) => (
            status_for(&err),
            Json(StatusResponse {
                success: false,
                error_message: err.user_message().to_string(),
            }),
        )
            .into_response(),
    }
}

/// Routes and middleware, without binding a socket
pub fn router(service: Arc<AuthService>, config: &TransportConfig) -> Router {
    #[allow(unused_mut)]
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/user/client_ids", get(client_ids_handler))
        .route("/user/login", post(login_handler))
        .route("/user/register", post(register_handler))
        .route("/user/info", post(info_handler))
        .route("/user/update/name", post(update_name_handler))
        .route("/user/update/password", post(update_password_handler))
        .route("/user/logout", post(logout_handler));

    #[cfg(feature = "metrics")]
    {
        app = app.route("/metrics", get(metrics_handler));
    }

    let mut app = app
        .with_state(service)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ));

    if let Some(cors) = build_cors_layer(config) {
        app = app.layer(cors);
    }
    app
}

/// Serve until `shutdown` resolves
pub async fn run_http(
    service: Arc<AuthService>,
    config: &TransportConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = SocketAddr::new(config.http_host, config.http_port);
    emit_security_warnings(config);

    let app = router(service, config);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("HTTP server listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| Error::Transport(format!("HTTP server error: {e}")))?;

    tracing::info!("HTTP server shutdown complete");
    Ok(())
}

fn build_cors_layer(config: &TransportConfig) -> Option<CorsLayer> {
    let origin = config.cors_origin.as_deref()?;
    match origin.parse::<HeaderValue>() {
        Ok(value) => Some(
            CorsLayer::new()
                .allow_origin(value)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        ),
        Err(e) => {
            tracing::warn!(origin, error = %e, "Ignoring unparseable CORS origin");
            None
        }
    }
}

fn emit_security_warnings(config: &TransportConfig) {
    let host = config.http_host;
    let is_all_interfaces = host == IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        || host == IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED);

    if is_all_interfaces {
        tracing::warn!(
            "HTTP server binding to all interfaces. \
             Session keys travel in request bodies; terminate TLS in front of this service."
        );
    } else if !host.is_loopback() {
        tracing::warn!(
            "HTTP server binding to non-loopback address ({host}). \
             Ensure network security policies are in place."
        );
    }

    if config.cors_origin.is_none() {
        tracing::info!("CORS origin not configured; browsers on other origins are refused");
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: STATUS_OK,
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        crate::observability::render_metrics(),
    )
}

async fn client_ids_handler(State(service): State<AppState>) -> impl IntoResponse {
    Json(ProviderListResponse {
        ssos: service.providers(),
    })
}

async fn login_handler(
    State(service): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return unparseable(&rejection),
    };
    let origin = peer.ip().to_string();

    let result = match request {
        LoginRequest {
            code: Some(code),
            auth_provider,
            ..
        } => {
            service
                .login_or_register(&auth_provider.unwrap_or_default(), &code, &origin)
                .await
        }
        LoginRequest {
            username: Some(username),
            password: Some(password),
            captcha_response,
            ..
        } => {
            service
                .login(&username, &password, &captcha_response, &origin)
                .await
        }
        _ => Err(AuthError::InvalidRequest(MSG_MISSING_FIELDS)),
    };
    login_outcome(result)
}

async fn register_handler(
    State(service): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return unparseable(&rejection),
    };
    let origin = peer.ip().to_string();
    login_outcome(
        service
            .register(
                &request.username,
                &request.password,
                &request.real_name,
                &origin,
            )
            .await,
    )
}

async fn info_handler(
    State(service): State<AppState>,
    payload: std::result::Result<Json<SessionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return unparseable(&rejection),
    };
    match service.session_info(&request.session_key).await {
        Ok(Some(info)) => Json(SessionInfoResponse::from(info)).into_response(),
        Ok(None) => Json(SessionInfoResponse {
            error_message: MSG_INVALID_SESSION.to_string(),
            ..SessionInfoResponse::default()
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Session lookup failed");
            (
                status_for(&err),
                Json(SessionInfoResponse {
                    error_message: err.user_message().to_string(),
                    ..SessionInfoResponse::default()
                }),
            )
                .into_response()
        }
    }
}

async fn update_name_handler(
    State(service): State<AppState>,
    payload: std::result::Result<Json<UpdateNameRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return unparseable(&rejection),
    };
    let result = service
        .update_profile(&request.session_key, &request.name)
        .await;
    if let Err(err) = &result {
        tracing::info!(error = %err, "Display name update refused");
    }
    status_outcome(result)
}

async fn update_password_handler(
    State(service): State<AppState>,
    payload: std::result::Result<Json<UpdatePasswordRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return unparseable(&rejection),
    };
    let result = service
        .update_password(&request.session_key, &request.password)
        .await;
    if let Err(err) = &result {
        tracing::info!(error = %err, "Password update refused");
    }
    status_outcome(result)
}

async fn logout_handler(
    State(service): State<AppState>,
    payload: std::result::Result<Json<SessionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return unparseable(&rejection),
    };
    let result = service.logout(&request.session_key).await.map(|_| ());
    status_outcome(result)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::*;
    use crate::captcha::DisabledCaptcha;
    use crate::config::AccountMode;
    use crate::service::ServiceSettings;
    use crate::sso::ProviderRegistry;
    use crate::store::Database;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok",
            service: "appstore-auth",
            version: "1.0.0",
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], "1.0.0");
    }

    #[test]
    fn test_login_response_field_names() {
        let json = serde_json::to_value(LoginResponse::failed("Invalid password")).unwrap();
        assert_eq!(
            json,
            json!({
                "success": false,
                "errorMessage": "Invalid password",
                "sessionKey": "",
                "rateLimited": false,
            })
        );
    }

    #[test]
    fn test_session_info_shapes() {
        let local = SessionInfoResponse::from(SessionInfo {
            account_id: crate::store::accounts::AccountId(1),
            username: Some("alice".into()),
            display_name: "Alice".into(),
            sso: false,
        });
        let json = serde_json::to_value(local).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["realName"], "Alice");
        assert!(json.get("name").is_none());

        let sso = SessionInfoResponse::from(SessionInfo {
            account_id: crate::store::accounts::AccountId(2),
            username: None,
            display_name: "Bob".into(),
            sso: true,
        });
        let json = serde_json::to_value(sso).unwrap();
        assert_eq!(json["name"], "Bob");
        assert!(json.get("username").is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&AuthError::InvalidRequest(MSG_MISSING_FIELDS)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&AuthError::UnknownUsername), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&AuthError::RateLimited), StatusCode::OK);
        assert_eq!(
            status_for(&AuthError::UpstreamTimeout("token exchange")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_cors_layer_only_when_configured() {
        let mut config = TransportConfig::default();
        assert!(build_cors_layer(&config).is_none());
        config.cors_origin = Some("https://store.example.com".into());
        assert!(build_cors_layer(&config).is_some());
        config.cors_origin = Some("bad\norigin".into());
        assert!(build_cors_layer(&config).is_none());
    }

    async fn spawn_local_server() -> String {
        let service = AuthService::new(
            Database::open_in_memory(Duration::from_secs(5)).unwrap(),
            ProviderRegistry::default(),
            Arc::new(DisabledCaptcha),
            ServiceSettings {
                mode: AccountMode::Local,
                ..ServiceSettings::default()
            },
        );
        let app = router(Arc::new(service), &TransportConfig::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        format!("http://{addr}")
    }

    async fn post(base: &str, path: &str, body: &Value) -> (u16, Value) {
        let response = reqwest::Client::new()
            .post(format!("{base}{path}"))
            .json(body)
            .send()
            .await
            .unwrap();
        (response.status().as_u16(), response.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_register_login_info_logout_over_http() {
        let base = spawn_local_server().await;

        let (status, body) = post(
            &base,
            "/user/register",
            &json!({"username": "alice", "password": "pw", "realName": "Alice"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);

        let (status, body) = post(
            &base,
            "/user/login",
            &json!({"username": "alice", "password": "pw", "captchaResponse": ""}),
        )
        .await;
        assert_eq!(status, 200);
        let key = body["sessionKey"].as_str().unwrap().to_string();
        assert_eq!(key.len(), 50);

        let (_, info) = post(&base, "/user/info", &json!({"sessionKey": key})).await;
        assert_eq!(info["loggedIn"], true);
        assert_eq!(info["username"], "alice");
        assert_eq!(info["realName"], "Alice");

        let (status, body) = post(&base, "/user/logout", &json!({"sessionKey": key})).await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);

        let (status, info) = post(&base, "/user/info", &json!({"sessionKey": key})).await;
        assert_eq!(status, 200);
        assert_eq!(info["loggedIn"], false);
    }

    #[tokio::test]
    async fn test_error_statuses_over_http() {
        let base = spawn_local_server().await;

        let (status, body) = post(
            &base,
            "/user/login",
            &json!({"username": "ghost", "password": "pw"}),
        )
        .await;
        assert_eq!(status, 401);
        assert_eq!(body["errorMessage"], "Invalid username");

        let (status, body) = post(&base, "/user/login", &json!({})).await;
        assert_eq!(status, 400);
        assert_eq!(body["errorMessage"], "Missing required fields");

        let (status, body) = post(
            &base,
            "/user/login",
            &json!({"code": "abc", "authProvider": "google"}),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["errorMessage"], "This login method is not available");

        let (status, body) = post(
            &base,
            "/user/update/name",
            &json!({"sessionKey": "nope", "name": "x"}),
        )
        .await;
        assert_eq!(status, 401);
        assert_eq!(body["errorMessage"], "Invalid session key");
    }

    #[tokio::test]
    async fn test_rate_limited_login_over_http() {
        let base = spawn_local_server().await;
        post(
            &base,
            "/user/register",
            &json!({"username": "bob", "password": "pw", "realName": ""}),
        )
        .await;

        let wrong = json!({"username": "bob", "password": "nope"});
        for _ in 0..10 {
            let (status, body) = post(&base, "/user/login", &wrong).await;
            assert_eq!(status, 401);
            assert_eq!(body["rateLimited"], false);
        }

        let (status, body) = post(
            &base,
            "/user/login",
            &json!({"username": "bob", "password": "pw"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], false);
        assert_eq!(body["rateLimited"], true);
        assert_eq!(body["sessionKey"], "");
    }

    #[tokio::test]
    async fn test_malformed_body_is_unparseable() {
        let base = spawn_local_server().await;
        let response = reqwest::Client::new()
            .post(format!("{base}/user/login"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["errorMessage"], "Server could not parse message");
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_health_and_client_ids() {
        let base = spawn_local_server().await;
        let health: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let listing: Value = reqwest::get(format!("{base}/user/client_ids"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listing, json!({"ssos": []}));
    }
}
