//! HTTP API endpoints

mod error;
mod extract;
mod tenants;

pub use error::ApiError;
pub use extract::RESULT_TYPE_HEADER;

use extract::{ApiJson, ApiPath, ApiQuery, ResultType};

use crate::protocol::{
    format_elapsed, CreateDatabaseParams, Deleted, Envelope, FilterParams, HealthResponse,
    ListParams, PredicateParams, Projection, SeedParams, SetBody, TagParams,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderValue},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use modb_core::validate::validate_key;
use modb_core::{
    CleanReport, Collection, CreateOptions, DatabaseInfo, PagedList, SetRequest, TenantRegistry,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Header carrying the caller's access key
pub const API_KEY_HEADER: &str = "apikey";

/// Header reporting handler time as `m:ss.fff`
pub const PROCESSING_TIME_HEADER: &str = "processing-time";

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TenantRegistry>,
    pub admin_key: Arc<str>,
}

impl AppState {
    pub fn new(registry: TenantRegistry, admin_key: impl Into<Arc<str>>) -> Self {
        Self {
            registry: Arc::new(registry),
            admin_key: admin_key.into(),
        }
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// Responses carrying stored values also echo the `result-type` header
type ValueResult<T> = Result<(ResultType, Json<Envelope<T>>), ApiError>;

fn ok<T>(result: T) -> ApiResult<T> {
    Ok(Json(Envelope::ok(result)))
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health))

        // Database management
        .route("/api/v1/databases", get(list_databases).post(create_database))
        .route(
            "/api/v1/databases/:db",
            get(describe_database).delete(delete_database),
        )
        .route("/api/v1/databases/:db/clean", post(clean_database))
        .route("/api/v1/databases/:db/seed", post(seed))

        // Records
        .route("/api/v1/databases/:db/keys", get(get_keys).post(set_record))
        .route("/api/v1/databases/:db/values", get(get_values))
        .route(
            "/api/v1/databases/:db/keys/:key",
            get(get_record).delete(delete_record),
        )
        .route("/api/v1/databases/:db/keys/:key/exists", get(record_exists))
        .route("/api/v1/databases/:db/tags", get(get_tags))

        // Index queries
        .route("/api/v1/databases/:db/filter", get(filter))
        .route("/api/v1/databases/:db/count", get(count))
        .route("/api/v1/databases/:db/any", get(any))

        // Tenant administration
        .route(
            "/api/v1/tenants",
            get(tenants::list_tenants).post(tenants::register_tenant),
        )
        .route("/api/v1/tenants/tags", get(tenants::tenant_tags))
        .route(
            "/api/v1/tenants/:key",
            get(tenants::describe_tenant).delete(tenants::unregister_tenant),
        )

        .layer(middleware::from_fn(processing_time))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn processing_time(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&format_elapsed(started.elapsed())) {
        response.headers_mut().insert(PROCESSING_TIME_HEADER, value);
    }
    response
}

// ============================================================================
// Access keys
// ============================================================================

fn api_key(parts: &Parts) -> Result<&str, ApiError> {
    parts
        .headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|key| !key.is_empty())
        .ok_or(ApiError::Unauthorized)
}

/// Collection of the tenant named by the `ApiKey` header
pub struct TenantAccess(pub Arc<Collection>);

#[async_trait]
impl FromRequestParts<AppState> for TenantAccess {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let key = api_key(parts)?;
        state
            .registry
            .resolve(key)
            .map(TenantAccess)
            .map_err(|_| ApiError::Unauthorized)
    }
}

/// Caller presented the admin key
pub struct AdminAccess;

#[async_trait]
impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        if api_key(parts)? == &*state.admin_key {
            Ok(AdminAccess)
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: modb_core::VERSION.to_string(),
    })
}

async fn list_databases(TenantAccess(collection): TenantAccess) -> ApiResult<Vec<String>> {
    ok(collection.list())
}

async fn create_database(
    TenantAccess(collection): TenantAccess,
    ApiQuery(params): ApiQuery<CreateDatabaseParams>,
) -> ApiResult<DatabaseInfo> {
    let options = CreateOptions {
        manifests: params.manifests,
    };
    let db = collection.create(&params.name, options)?;
    ok(db.describe()?)
}

async fn describe_database(
    TenantAccess(collection): TenantAccess,
    ApiPath(db): ApiPath<String>,
) -> ApiResult<DatabaseInfo> {
    ok(collection.describe(&db)?)
}

async fn delete_database(
    TenantAccess(collection): TenantAccess,
    ApiPath(db): ApiPath<String>,
) -> ApiResult<Deleted> {
    collection.delete(&db)?;
    ok(Deleted { deleted: db })
}

async fn clean_database(
    TenantAccess(collection): TenantAccess,
    ApiPath(db): ApiPath<String>,
) -> ApiResult<CleanReport> {
    let report = tokio::task::spawn_blocking(move || collection.clean(&db))
        .await
        .map_err(|e| ApiError::Task(e.to_string()))??;
    info!(
        database = %report.name,
        records = report.records,
        elapsed_ms = report.elapsed_ms,
        "Cleaned database"
    );
    ok(report)
}

async fn set_record(
    TenantAccess(collection): TenantAccess,
    ApiPath(db): ApiPath<String>,
    ApiJson(body): ApiJson<SetBody>,
) -> ApiResult<String> {
    // Reject a bad request before it can create a database
    validate_key(&body.key)?;
    let timestamp = body.timestamp()?;
    let database = collection.get_or_create(&db, body.create_db)?;

    database.set(SetRequest {
        key: body.key.clone(),
        value: body.value,
        tags: body.tags,
        indexes: body.indices,
        timestamp,
    })?;
    ok(body.key)
}

async fn get_keys(
    TenantAccess(collection): TenantAccess,
    ApiPath(db): ApiPath<String>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<PagedList<String>> {
    let database = collection.get(&db)?;
    ok(database.get_keys(&params.to_query()?, params.page()?)?)
}

async fn get_values(
    TenantAccess(collection): TenantAccess,
    result_type: ResultType,
    ApiPath(db): ApiPath<String>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ValueResult<PagedList<Value>> {
    let database = collection.get(&db)?;
    let values = database.get_values(&params.to_query()?, params.page()?)?;
    render_page(result_type, values)
}

async fn get_record(
    TenantAccess(collection): TenantAccess,
    result_type: ResultType,
    ApiPath((db, key)): ApiPath<(String, String)>,
) -> ValueResult<Value> {
    let value = collection.get(&db)?.get(&key)?;
    Ok((result_type, Json(Envelope::ok(result_type.render(value)?))))
}

async fn record_exists(
    TenantAccess(collection): TenantAccess,
    ApiPath((db, key)): ApiPath<(String, String)>,
) -> ApiResult<bool> {
    // A missing database is a plain "no"
    if !collection.exists(&db) {
        return ok(false);
    }
    ok(collection.get(&db)?.exists(&key)?)
}

async fn delete_record(
    TenantAccess(collection): TenantAccess,
    ApiPath((db, key)): ApiPath<(String, String)>,
) -> ApiResult<Deleted> {
    collection.get(&db)?.delete(&key)?;
    ok(Deleted { deleted: key })
}

async fn get_tags(
    TenantAccess(collection): TenantAccess,
    ApiPath(db): ApiPath<String>,
    ApiQuery(params): ApiQuery<TagParams>,
) -> ApiResult<PagedList<String>> {
    let page = crate::protocol::to_page(params.page, params.page_size)?;
    let text = params.text.as_deref().filter(|text| !text.is_empty());
    ok(collection.get(&db)?.get_tags(text, page)?)
}

async fn filter(
    TenantAccess(collection): TenantAccess,
    result_type: ResultType,
    ApiPath(db): ApiPath<String>,
    ApiQuery(params): ApiQuery<FilterParams>,
) -> ValueResult<PagedList<Value>> {
    let database = collection.get(&db)?;
    let comparator = params.comparator()?;
    let page = params.page()?;

    match params.projection {
        // Keys are never parsed as documents
        Projection::Keys => {
            let keys = database.filter_keys(&params.index, comparator, &params.value, page)?;
            render_page(ResultType::Text, keys)
        }
        Projection::Values => {
            let values = database.filter_values(&params.index, comparator, &params.value, page)?;
            render_page(result_type, values)
        }
    }
}

fn render_page(result_type: ResultType, page: PagedList<String>) -> ValueResult<PagedList<Value>> {
    let PagedList {
        items,
        page,
        page_size,
        total_items,
        total_pages,
    } = page;
    let items = items
        .into_iter()
        .map(|value| result_type.render(value))
        .collect::<Result<Vec<_>, _>>()?;

    let page = PagedList {
        items,
        page,
        page_size,
        total_items,
        total_pages,
    };
    Ok((result_type, Json(Envelope::ok(page))))
}

/// Fill a database with generated records for testing clients
async fn seed(
    TenantAccess(collection): TenantAccess,
    ApiPath(db): ApiPath<String>,
    ApiQuery(params): ApiQuery<SeedParams>,
) -> ApiResult<usize> {
    let count = params.count()?;
    let tags = crate::protocol::split_tags(params.tags.as_deref());
    let create_db = params.create_db;

    let written = tokio::task::spawn_blocking(move || {
        let database = collection.get_or_create(&db, create_db)?;
        for i in 1..=count {
            let mut request = SetRequest::new(i.to_string(), format!("{} seed", i));
            request.tags = tags.clone();
            database.set(request)?;
        }
        Ok::<_, modb_core::ModbError>(count)
    })
    .await
    .map_err(|e| ApiError::Task(e.to_string()))??;
    ok(written)
}

async fn count(
    TenantAccess(collection): TenantAccess,
    ApiPath(db): ApiPath<String>,
    ApiQuery(params): ApiQuery<PredicateParams>,
) -> ApiResult<usize> {
    let comparator = params.comparator()?;
    ok(collection
        .get(&db)?
        .count(&params.index, comparator, &params.value)?)
}

async fn any(
    TenantAccess(collection): TenantAccess,
    ApiPath(db): ApiPath<String>,
    ApiQuery(params): ApiQuery<PredicateParams>,
) -> ApiResult<bool> {
    let comparator = params.comparator()?;
    ok(collection
        .get(&db)?
        .any(&params.index, comparator, &params.value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, StatusCode};
    use modb_core::StorageConfig;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const ADMIN: &str = "admin-secret";

    fn app(dir: &std::path::Path) -> Router {
        let registry = TenantRegistry::open(StorageConfig::new(dir)).unwrap();
        registry.register("acme", Some("acme-key")).unwrap();
        create_router(AppState::new(registry, ADMIN))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        key: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = axum::http::Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            request = request.header("ApiKey", key);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        assert!(response.headers().contains_key(PROCESSING_TIME_HEADER));
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_orders_over_http() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(temp_dir.path());
        let key = Some("acme-key");

        let (status, _) = call(&app, Method::POST, "/api/v1/databases?name=orders", key, None).await;
        assert_eq!(status, StatusCode::OK);

        for (id, amount, tag) in [("o1", "100", "paid"), ("o2", "250", "pending")] {
            let body = json!({
                "key": id,
                "value": amount,
                "tags": [tag],
                "indices": [{"name": "amount", "value": amount, "type": "Int32"}]
            });
            let (status, _) =
                call(&app, Method::POST, "/api/v1/databases/orders/keys", key, Some(body)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/v1/databases/orders/filter?index=amount&op=gt&value=100",
            key,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["items"], json!(["o2"]));

        let (status, body) =
            call(&app, Method::POST, "/api/v1/databases/orders/clean", key, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["records"], json!(2));

        let (_, body) = call(
            &app,
            Method::GET,
            "/api/v1/databases/orders/filter?index=amount&op=GreaterThan&value=100&projection=values",
            key,
            None,
        )
        .await;
        assert_eq!(body["result"]["items"], json!(["250"]));

        let (_, body) = call(
            &app,
            Method::GET,
            "/api/v1/databases/orders/keys?tags=paid&page=1&page_size=5",
            key,
            None,
        )
        .await;
        assert_eq!(body["result"]["items"], json!(["o1"]));
        assert_eq!(body["result"]["page_size"], json!(5));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(temp_dir.path());
        let key = Some("acme-key");

        let (status, _) = call(&app, Method::GET, "/api/v1/databases", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, Method::GET, "/api/v1/databases", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            call(&app, Method::GET, "/api/v1/databases/missing/keys/k1", key, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status_code"], json!(404));

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/v1/databases/missing/keys/k1/exists",
            key,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], json!(false));

        call(&app, Method::POST, "/api/v1/databases?name=orders", key, None).await;
        let (status, _) = call(&app, Method::POST, "/api/v1/databases?name=orders", key, None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let bad_key = json!({"key": "has space", "value": "v", "create_db": true});
        let (status, _) =
            call(&app, Method::POST, "/api/v1/databases/fresh/keys", key, Some(bad_key)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, body) = call(&app, Method::GET, "/api/v1/databases", key, None).await;
        assert_eq!(body["result"], json!(["orders"]));

        let (status, _) = call(
            &app,
            Method::GET,
            "/api/v1/databases/orders/count?index=amount&op=between&value=1",
            key,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_db_on_first_write() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(temp_dir.path());
        let key = Some("acme-key");

        let body = json!({"key": "k1", "value": "v1"});
        let (status, _) =
            call(&app, Method::POST, "/api/v1/databases/lazy/keys", key, Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let body = json!({"key": "k1", "value": "v1", "create_db": true});
        let (status, _) =
            call(&app, Method::POST, "/api/v1/databases/lazy/keys", key, Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/api/v1/databases/lazy/keys/k1", key, None).await;
        assert_eq!(body["result"], json!("v1"));
    }

    #[tokio::test]
    async fn test_rejections_use_error_envelope() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(temp_dir.path());
        let key = Some("acme-key");
        call(&app, Method::POST, "/api/v1/databases?name=orders", key, None).await;

        let missing_value = json!({"key": "o1"});
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/databases/orders/keys",
            key,
            Some(missing_value),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status_code"], json!(400));
        assert_eq!(body["status_message"], json!("Bad Request"));
        assert!(body["error"].as_str().unwrap().contains("value"));

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/v1/databases/orders/keys?page=abc",
            key,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status_code"], json!(400));
        assert!(body["error"].is_string());

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/v1/databases/orders/count?index=amount",
            key,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status_code"], json!(400));
    }

    #[tokio::test]
    async fn test_result_type_json() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(temp_dir.path());
        let body = json!({
            "key": "c1",
            "value": "{\"city\":\"Oslo\"}",
            "create_db": true,
            "indices": [{"name": "rank", "value": "1", "type": "int"}]
        });
        call(&app, Method::POST, "/api/v1/databases/clients/keys", Some("acme-key"), Some(body)).await;

        let request = |uri: &str, result_type: &str| {
            axum::http::Request::builder()
                .uri(uri)
                .header("ApiKey", "acme-key")
                .header(RESULT_TYPE_HEADER, result_type)
                .body(Body::empty())
                .unwrap()
        };

        let response = app
            .clone()
            .oneshot(request("/api/v1/databases/clients/keys/c1", "json"))
            .await
            .unwrap();
        assert_eq!(response.headers()[RESULT_TYPE_HEADER], "json");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["result"], json!({"city": "Oslo"}));

        let response = app
            .clone()
            .oneshot(request(
                "/api/v1/databases/clients/filter?index=rank&op=eq&value=1&projection=values",
                "text",
            ))
            .await
            .unwrap();
        assert_eq!(response.headers()[RESULT_TYPE_HEADER], "text");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["result"]["items"], json!(["{\"city\":\"Oslo\"}"]));

        let response = app
            .clone()
            .oneshot(request("/api/v1/databases/clients/keys/c1", "xml"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_seed() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(temp_dir.path());
        let key = Some("acme-key");

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/databases/demo/seed?count=25&tags=demo&create_db=true",
            key,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], json!(25));

        let (_, body) = call(&app, Method::GET, "/api/v1/databases/demo/keys?tags=demo", key, None).await;
        assert_eq!(body["result"]["total_items"], json!(25));

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/databases/demo/seed?count=0",
            key,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
