//! Extractors whose rejections use the error envelope

use super::ApiError;
use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Json, Path, Query, Request,
    },
    http::{request::Parts, HeaderValue},
    response::{IntoResponseParts, ResponseParts},
};
use std::convert::Infallible;
use modb_core::ModbError;
use serde_json::Value;

/// Request and response header selecting how stored values are returned
pub const RESULT_TYPE_HEADER: &str = "result-type";

/// JSON body
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, ApiError> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Query string
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, ApiError> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// Path parameters
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, ApiError> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// How stored values are rendered: as strings, or parsed as JSON documents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultType {
    #[default]
    Text,
    Json,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Text => "text",
            ResultType::Json => "json",
        }
    }

    pub fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }

    /// Render one stored value
    pub fn render(&self, value: String) -> Result<Value, ApiError> {
        match self {
            ResultType::Text => Ok(Value::String(value)),
            ResultType::Json => serde_json::from_str(&value).map_err(|e| {
                ApiError::Engine(ModbError::validation(
                    "result-type",
                    format!("stored value is not a JSON document: {}", e),
                ))
            }),
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ResultType {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, ApiError> {
        let Some(value) = parts.headers.get(RESULT_TYPE_HEADER) else {
            return Ok(ResultType::Text);
        };
        match value.to_str().map(str::to_ascii_lowercase).as_deref() {
            Ok("json") => Ok(ResultType::Json),
            Ok("text") | Ok("") => Ok(ResultType::Text),
            _ => Err(ApiError::BadRequest(
                "result-type must be 'json' or 'text'".to_string(),
            )),
        }
    }
}

/// Echo the chosen result type on the response
impl IntoResponseParts for ResultType {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Infallible> {
        res.headers_mut().insert(RESULT_TYPE_HEADER, self.header_value());
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render() {
        assert_eq!(
            ResultType::Text.render("{\"a\":1}".into()).unwrap(),
            json!("{\"a\":1}")
        );
        assert_eq!(
            ResultType::Json.render("{\"a\":1}".into()).unwrap(),
            json!({"a": 1})
        );
        assert!(ResultType::Json.render("plain".into()).is_err());
    }
}
