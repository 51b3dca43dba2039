use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        FromRequestParts, Path, Request, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::Instrument;

use dietweek_core::error::DietError;
use dietweek_core::models::{ShoppingListItem, WeekView};
use dietweek_core::reader::WeekRead;
use dietweek_core::service::{GenerateRequest, GenerationSummary, WeeklyDietService};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB
const USER_ID_HEADER: &str = "x-user-id";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
struct AppState {
    service: Arc<WeeklyDietService>,
    api_key: Option<String>,
    /// Adds `details` to error bodies; off in production.
    expose_details: bool,
}

impl AppState {
    fn error(&self, err: DietError) -> ApiError {
        ApiError::from_diet(err, self.expose_details)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPurchasedRequest {
    is_purchased: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FoundWeekResponse {
    exists: bool,
    #[serde(flatten)]
    view: WeekView,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MissingWeekResponse {
    exists: bool,
    message: String,
    week_start_date: NaiveDate,
    week_year: i32,
    week_number: u32,
}

#[derive(Serialize)]
struct GenerateResponse {
    success: bool,
    #[serde(flatten)]
    summary: GenerationSummary,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

// --- Error handling ---

struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    fn from_diet(err: DietError, expose_details: bool) -> Self {
        let status = match &err {
            DietError::InvalidWeekToken(_) | DietError::ProfileMissing => StatusCode::BAD_REQUEST,
            DietError::Unauthorized => StatusCode::UNAUTHORIZED,
            DietError::NotFound(_) => StatusCode::NOT_FOUND,
            DietError::UserLookupFailed(_)
            | DietError::UserCreateFailed(_)
            | DietError::ComposerFailure(_)
            | DietError::PrimaryPersistenceFailure(_)
            | DietError::SecondaryPersistenceFailure { .. }
            | DietError::RecipeLookupFailure(_)
            | DietError::ReadFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if !status.is_server_error() {
            return Self {
                status,
                message: err.to_string(),
                details: None,
            };
        }

        tracing::error!(error = %err, "Request failed");
        let message = match &err {
            DietError::ComposerFailure(_) => err.to_string(),
            _ => "Internal server error".to_string(),
        };
        Self {
            status,
            message,
            details: expose_details.then(|| err.to_string()),
        }
    }
}

// Extractor failures keep axum's status and message but use the JSON error body.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
            details: None,
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

/// The authenticated subject, set by the fronting auth layer.
struct AuthUser(String);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .ok_or_else(|| ApiError::from_diet(DietError::Unauthorized, false))
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                    details: None,
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

/// Tags the request with a correlation id (the caller's `x-request-id`, or a fresh one)
/// and runs it inside a span carrying that id.
async fn request_context(request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);

    let span = tracing::info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span.clone()).await;
    span.in_scope(|| tracing::info!(status = response.status().as_u16(), "Request finished"));

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_week(
    State(state): State<AppState>,
    AuthUser(auth_id): AuthUser,
    Path(week): Path<String>,
) -> Result<Response, ApiError> {
    let read = state
        .service
        .read_week(&auth_id, &week)
        .await
        .map_err(|e| state.error(e))?;

    let response = match read {
        WeekRead::Found(view) => Json(FoundWeekResponse {
            exists: true,
            view: *view,
        })
        .into_response(),
        WeekRead::Missing(info) => (
            StatusCode::NOT_FOUND,
            Json(MissingWeekResponse {
                exists: false,
                message: format!("No weekly plan found for {}", info.iso_token()),
                week_start_date: info.week_start_date,
                week_year: info.week_year,
                week_number: info.week_number,
            }),
        )
            .into_response(),
    };
    Ok(response)
}

async fn generate_week(
    State(state): State<AppState>,
    AuthUser(auth_id): AuthUser,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(request) = payload?;
    let summary = state
        .service
        .generate_week(&auth_id, &request)
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(GenerateResponse {
        success: true,
        summary,
    }))
}

async fn set_item_purchased(
    State(state): State<AppState>,
    AuthUser(auth_id): AuthUser,
    item_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<SetPurchasedRequest>, JsonRejection>,
) -> Result<Json<ShoppingListItem>, ApiError> {
    let Path(item_id) = item_id?;
    let Json(request) = payload?;
    let item = state
        .service
        .set_item_purchased(&auth_id, item_id, request.is_purchased)
        .map_err(|e| state.error(e))?;
    Ok(Json(item))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/diet/weekly/generate", post(generate_week))
        .route("/diet/weekly/shopping/{item_id}", patch(set_item_purchased))
        .route("/diet/weekly/{week}", get(get_week))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_context))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    service: WeeklyDietService,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    production: bool,
) -> anyhow::Result<()> {
    let state = AppState {
        service: Arc::new(service),
        api_key: api_key.clone(),
        expose_details: !production,
    };

    let app = build_router(state);

    match api_key.as_deref() {
        Some(key) if key.len() > 8 => {
            tracing::info!(
                "API key: {}...{} (see api_key file in data directory)",
                &key[..4],
                &key[key.len() - 4..],
            );
        }
        Some(_) => tracing::info!("API key authentication enabled"),
        None => tracing::warn!("Authentication disabled (--no-auth). API is open to anyone."),
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        tracing::warn!(
            "Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!(production, "Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
