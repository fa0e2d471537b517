//! Tenant administration, admin key only

use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::{ok, AdminAccess, ApiResult, AppState};
use crate::protocol::{tenant_predicate, to_page, RegisterBody, TagParams, TenantListParams};
use axum::extract::State;
use modb_core::{PagedList, Tenant};

pub(super) async fn list_tenants(
    _: AdminAccess,
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<TenantListParams>,
) -> ApiResult<PagedList<Tenant>> {
    let page = to_page(params.page, params.page_size)?;
    let tenants = match tenant_predicate(&params)? {
        Some(predicate) => state.registry.filter(
            &predicate.index,
            predicate.comparator()?,
            &predicate.value,
            page,
        )?,
        None => state.registry.list(page)?,
    };
    ok(tenants)
}

pub(super) async fn tenant_tags(
    _: AdminAccess,
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<TagParams>,
) -> ApiResult<PagedList<String>> {
    let page = to_page(params.page, params.page_size)?;
    let text = params.text.as_deref().filter(|text| !text.is_empty());
    ok(state.registry.tags(text, page)?)
}

pub(super) async fn register_tenant(
    _: AdminAccess,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterBody>,
) -> ApiResult<Tenant> {
    ok(state
        .registry
        .register_tagged(&body.name, body.access_key.as_deref(), &body.tags)?)
}

pub(super) async fn describe_tenant(
    _: AdminAccess,
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
) -> ApiResult<Tenant> {
    ok(state.registry.describe(&key)?)
}

pub(super) async fn unregister_tenant(
    _: AdminAccess,
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
) -> ApiResult<Tenant> {
    ok(state.registry.unregister(&key)?)
}

#[cfg(test)]
mod tests {
    use super::super::{create_router, AppState};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use modb_core::{StorageConfig, TenantRegistry};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn call(app: &Router, method: Method, uri: &str, key: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("apikey", key)
            .header("content-type", "application/json");
        let request = builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_tenant_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let registry = TenantRegistry::open(StorageConfig::new(temp_dir.path())).unwrap();
        let app = create_router(AppState::new(registry, "root"));

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/tenants",
            "root",
            Some(json!({"name": "acme", "access_key": "acme-key", "tags": ["gold"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["name"], json!("acme"));

        // The new key works on the data plane
        let (status, _) = call(&app, Method::POST, "/api/v1/databases?name=orders", "acme-key", None).await;
        assert_eq!(status, StatusCode::OK);

        // Tenant keys cannot administer tenants
        let (status, _) = call(&app, Method::GET, "/api/v1/tenants", "acme-key", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, body) = call(&app, Method::GET, "/api/v1/tenants?index=name&op=eq&value=acme", "root", None).await;
        assert_eq!(body["result"]["total_items"], json!(1));

        let (status, _) = call(&app, Method::GET, "/api/v1/tenants?index=name", "root", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(&app, Method::GET, "/api/v1/tenants/tags?text=go", "root", None).await;
        assert_eq!(body["result"]["items"], json!(["gold"]));

        let (status, body) = call(&app, Method::POST, "/api/v1/tenants", "root", Some(json!({"access_key": "k2"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status_code"], json!(400));

        let (status, _) = call(&app, Method::DELETE, "/api/v1/tenants/acme-key", "root", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, "/api/v1/databases", "acme-key", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, Method::GET, "/api/v1/tenants/acme-key", "root", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
