//! Request and response wire types
//!
//! Everything here is plain data plus the small parsing steps that turn
//! query-string text into engine arguments.

use modb_core::convert::parse_time;
use modb_core::{Comparator, IndexEntry, ModbError, Page, RecordQuery, Result, Timestamp};
use serde::{Deserialize, Serialize};

/// Success envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status_code: u16,
    pub status_message: String,
    pub result: T,
}

impl<T> Envelope<T> {
    pub fn ok(result: T) -> Self {
        Self {
            status_code: 200,
            status_message: "OK".to_string(),
            result,
        }
    }
}

/// Error envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub status_message: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Page from optional query parameters, defaulting to page 1 of 10
pub fn to_page(page: Option<usize>, page_size: Option<usize>) -> Result<Page> {
    let page = page.unwrap_or(1);
    let page_size = page_size.unwrap_or(modb_core::config::DEFAULT_PAGE_SIZE);
    Page::new(page, page_size)
}

// Kept flat: `#[serde(flatten)]` breaks numeric query string fields

/// `GET .../keys` and `GET .../values`
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Comma separated; every tag must match
    pub tags: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl ListParams {
    pub fn page(&self) -> Result<Page> {
        to_page(self.page, self.page_size)
    }

    pub fn to_query(&self) -> Result<RecordQuery> {
        let mut query = RecordQuery::new().with_tags(split_tags(self.tags.as_deref()));
        if let Some(from) = parse_bound(self.from.as_deref())? {
            query = query.from(from);
        }
        if let Some(to) = parse_bound(self.to.as_deref())? {
            query = query.to(to);
        }
        query.validate()?;
        Ok(query)
    }
}

/// `GET .../tags`
#[derive(Debug, Default, Deserialize)]
pub struct TagParams {
    pub text: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// What a filter returns for each match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    #[default]
    Keys,
    Values,
}

/// Index predicate: `index`, `op`, `value`
#[derive(Debug, Deserialize)]
pub struct PredicateParams {
    pub index: String,
    pub op: String,
    pub value: String,
}

impl PredicateParams {
    pub fn comparator(&self) -> Result<Comparator> {
        self.op.parse()
    }
}

/// `GET .../filter`
#[derive(Debug, Deserialize)]
pub struct FilterParams {
    pub index: String,
    pub op: String,
    pub value: String,
    #[serde(default)]
    pub projection: Projection,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl FilterParams {
    pub fn comparator(&self) -> Result<Comparator> {
        self.op.parse()
    }

    pub fn page(&self) -> Result<Page> {
        to_page(self.page, self.page_size)
    }
}

/// `POST /api/v1/databases`
#[derive(Debug, Deserialize)]
pub struct CreateDatabaseParams {
    pub name: String,
    pub manifests: Option<usize>,
}

/// `POST .../keys`
#[derive(Debug, Deserialize)]
pub struct SetBody {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub indices: Vec<IndexEntry>,
    /// Create the database if it does not exist yet
    #[serde(default)]
    pub create_db: bool,
}

impl SetBody {
    pub fn timestamp(&self) -> Result<Option<Timestamp>> {
        parse_bound(self.timestamp.as_deref())
    }
}

/// Records written by a seed request when no count is given
pub const DEFAULT_SEED_COUNT: usize = 1_000;

/// Upper bound on records written by one seed request
pub const MAX_SEED_COUNT: usize = 100_000;

/// `POST .../seed`
#[derive(Debug, Default, Deserialize)]
pub struct SeedParams {
    pub count: Option<usize>,
    /// Comma separated tags for every generated record
    pub tags: Option<String>,
    #[serde(default)]
    pub create_db: bool,
}

impl SeedParams {
    pub fn count(&self) -> Result<usize> {
        match self.count.unwrap_or(DEFAULT_SEED_COUNT) {
            count @ 1..=MAX_SEED_COUNT => Ok(count),
            _ => Err(ModbError::validation(
                "count",
                format!("count must be between 1 and {}", MAX_SEED_COUNT),
            )),
        }
    }
}

/// `GET /api/v1/tenants`
#[derive(Debug, Default, Deserialize)]
pub struct TenantListParams {
    pub index: Option<String>,
    pub op: Option<String>,
    pub value: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// `POST /api/v1/tenants`
#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub name: String,
    pub access_key: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub deleted: String,
}

/// Split a comma separated tag list, dropping empty items
pub fn split_tags(tags: Option<&str>) -> Vec<String> {
    tags.map(|tags| {
        tags.split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_bound(text: Option<&str>) -> Result<Option<Timestamp>> {
    match text.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_time(text).map(Some),
    }
}

/// Render elapsed time as `m:ss.fff`
pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    let millis = elapsed.as_millis();
    format!(
        "{}:{:02}.{:03}",
        millis / 60_000,
        (millis / 1_000) % 60,
        millis % 1_000
    )
}

/// Reject a filter that names only some of index, op and value
pub fn tenant_predicate(params: &TenantListParams) -> Result<Option<PredicateParams>> {
    match (&params.index, &params.op, &params.value) {
        (None, None, None) => Ok(None),
        (Some(index), Some(op), Some(value)) => Ok(Some(PredicateParams {
            index: index.clone(),
            op: op.clone(),
            value: value.clone(),
        })),
        _ => Err(ModbError::validation(
            "filter",
            "index, op and value must be given together",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_split_tags() {
        assert_eq!(split_tags(Some("paid, eu,,")), vec!["paid", "eu"]);
        assert!(split_tags(None).is_empty());
    }

    #[test]
    fn test_list_params() {
        let params = ListParams {
            tags: Some("paid".into()),
            from: Some("1970-01-01".into()),
            to: Some("5000".into()),
            ..ListParams::default()
        };
        let query = params.to_query().unwrap();
        assert_eq!(query.tags, vec!["paid"]);
        assert_eq!(query.range.from, Some(0));
        assert_eq!(query.range.to, Some(5_000));

        let bad = ListParams {
            from: Some("soon".into()),
            ..ListParams::default()
        };
        assert!(bad.to_query().is_err());
    }

    #[test]
    fn test_page_defaults() {
        assert_eq!(to_page(None, None).unwrap(), Page::new(1, 10).unwrap());
        assert_eq!(to_page(Some(3), Some(5)).unwrap(), Page::new(3, 5).unwrap());
        assert!(to_page(Some(0), None).is_err());
        assert!(to_page(None, Some(0)).is_err());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(7)), "0:00.007");
        assert_eq!(format_elapsed(Duration::from_millis(61_250)), "1:01.250");
    }

    #[test]
    fn test_seed_count() {
        assert_eq!(SeedParams::default().count().unwrap(), DEFAULT_SEED_COUNT);
        let zero = SeedParams {
            count: Some(0),
            ..SeedParams::default()
        };
        assert!(zero.count().is_err());
        let huge = SeedParams {
            count: Some(MAX_SEED_COUNT + 1),
            ..SeedParams::default()
        };
        assert!(huge.count().is_err());
    }

    #[test]
    fn test_tenant_predicate() {
        let none = TenantListParams::default();
        assert!(tenant_predicate(&none).unwrap().is_none());

        let partial = TenantListParams {
            index: Some("name".into()),
            ..TenantListParams::default()
        };
        assert!(tenant_predicate(&partial).is_err());
    }
}
