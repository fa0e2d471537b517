//! Tenant registry - maps access keys to collections
//!
//! Tenants are themselves stored in a MODB database: the `tenants` database
//! of the system collection under `<data_dir>/sys`. Each record is keyed by
//! the tenant's access key and holds the tenant document as JSON, with the
//! tenant name and collection id as string indexes.

use super::{Collection, StorageConfig};
use crate::query::{Page, RecordQuery};
use crate::storage::Database;
use crate::validate::validate_key;
use crate::{now_millis, Comparator, ModbError, PagedList, Result, SetRequest, Timestamp};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const SYSTEM_DIR: &str = "sys";
const TENANTS_DIR: &str = "tenants";
const TENANTS_DB: &str = "tenants";
const MAX_TENANT_NAME_LEN: usize = 128;

/// A registered tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub access_key: String,
    pub name: String,
    /// Directory name of the tenant's collection
    pub collection: String,
    pub created_at: Timestamp,
}

/// Registry of tenants and their collections
pub struct TenantRegistry {
    config: StorageConfig,
    tenants: Arc<Database>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    lifecycle: Mutex<()>,
    // Keeps the system collection registered for the life of the registry
    _system: Collection,
}

impl TenantRegistry {
    /// Open the registry, loading every tenant's collection
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let system = Collection::open(SYSTEM_DIR, config.data_dir.join(SYSTEM_DIR), config.clone())?;
        let tenants = system.get_or_create(TENANTS_DB, true)?;

        let registry = Self {
            config,
            tenants,
            collections: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            _system: system,
        };
        registry.load_tenants()?;
        Ok(registry)
    }

    fn load_tenants(&self) -> Result<()> {
        let documents = self.tenants.get_values(&RecordQuery::new(), Page::all())?;
        let mut collections = self.collections.write();

        for document in documents.items {
            let tenant = match parse_tenant(&document) {
                Ok(tenant) => tenant,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable tenant record");
                    continue;
                }
            };
            let collection = Collection::open(
                &tenant.collection,
                self.collection_dir(&tenant.collection),
                self.config.clone(),
            )?;
            info!(
                tenant = %tenant.name,
                databases = collection.len(),
                "Loaded tenant"
            );
            collections.insert(tenant.access_key, Arc::new(collection));
        }
        Ok(())
    }

    fn collection_dir(&self, id: &str) -> PathBuf {
        self.config.data_dir.join(TENANTS_DIR).join(id)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Collection of the tenant owning `access_key`
    pub fn resolve(&self, access_key: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(access_key)
            .cloned()
            .ok_or(ModbError::TenantNotFound)
    }

    /// Register a tenant, generating an access key when none is given
    ///
    /// Fails with [`ModbError::AlreadyExists`] if the access key or the
    /// tenant name is already registered.
    pub fn register(&self, name: &str, access_key: Option<&str>) -> Result<Tenant> {
        self.register_tagged(name, access_key, &[])
    }

    /// Register a tenant whose record carries `tags`, see [`Self::tags`]
    pub fn register_tagged(
        &self,
        name: &str,
        access_key: Option<&str>,
        tags: &[String],
    ) -> Result<Tenant> {
        validate_tenant_name(name)?;
        let _lifecycle = self.lifecycle.lock();

        if self.tenants.any("name", Comparator::Equal, name)? {
            return Err(ModbError::AlreadyExists(format!("Tenant {}", name)));
        }

        let access_key = match access_key {
            Some(key) => {
                validate_key(key)?;
                if self.tenants.exists(key)? {
                    return Err(ModbError::AlreadyExists(format!("Tenant {}", name)));
                }
                key.to_string()
            }
            None => loop {
                let key = Uuid::new_v4().to_string();
                if !self.tenants.exists(&key)? {
                    break key;
                }
            },
        };

        let collection_id = loop {
            let id = Uuid::new_v4().simple().to_string();
            if !self.collection_dir(&id).exists() {
                break id;
            }
        };

        let tenant = Tenant {
            access_key,
            name: name.to_string(),
            collection: collection_id,
            created_at: now_millis(),
        };
        let collection = Collection::open(
            &tenant.collection,
            self.collection_dir(&tenant.collection),
            self.config.clone(),
        )?;

        if let Err(e) = self.store(&tenant, tags) {
            if let Err(cleanup) = fs::remove_dir_all(self.collection_dir(&tenant.collection)) {
                warn!(tenant = %tenant.name, error = %cleanup, "Failed to remove unused collection");
            }
            return Err(e);
        }

        self.collections
            .write()
            .insert(tenant.access_key.clone(), Arc::new(collection));
        info!(tenant = %tenant.name, collection = %tenant.collection, "Registered tenant");
        Ok(tenant)
    }

    fn store(&self, tenant: &Tenant, tags: &[String]) -> Result<()> {
        let document = serde_json::to_string(tenant)
            .map_err(|e| ModbError::Internal(format!("encode tenant: {}", e)))?;
        let mut request = SetRequest::new(tenant.access_key.clone(), document)
            .with_index("name", tenant.name.clone(), "string")
            .with_index("collection", tenant.collection.clone(), "string")
            .at(tenant.created_at);
        request.tags = tags.to_vec();
        self.tenants.set(request)
    }

    /// Remove a tenant together with all of its databases
    pub fn unregister(&self, access_key: &str) -> Result<Tenant> {
        let _lifecycle = self.lifecycle.lock();
        let tenant = self.describe(access_key)?;
        let collection = self.resolve(access_key)?;

        collection.destroy()?;
        self.tenants.delete(access_key)?;
        self.collections.write().remove(access_key);

        info!(tenant = %tenant.name, "Unregistered tenant");
        Ok(tenant)
    }

    /// Tenant document for `access_key`
    pub fn describe(&self, access_key: &str) -> Result<Tenant> {
        if !self.tenants.exists(access_key)? {
            return Err(ModbError::TenantNotFound);
        }
        parse_tenant(&self.tenants.get(access_key)?)
    }

    /// Registered tenants ordered by access key
    pub fn list(&self, page: Page) -> Result<PagedList<Tenant>> {
        let documents = self.tenants.get_values(&RecordQuery::new(), page)?;
        parse_page(documents)
    }

    /// Tenants whose `name` or `collection` index satisfies the comparator
    pub fn filter(
        &self,
        index: &str,
        comparator: Comparator,
        value: &str,
        page: Page,
    ) -> Result<PagedList<Tenant>> {
        let documents = self.tenants.filter_values(index, comparator, value, page)?;
        parse_page(documents)
    }

    /// Distinct tenant tags, optionally those containing `text`
    pub fn tags(&self, text: Option<&str>, page: Page) -> Result<PagedList<String>> {
        self.tenants.get_tags(text, page)
    }

    pub fn len(&self) -> usize {
        self.collections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.read().is_empty()
    }
}

fn validate_tenant_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.len() > MAX_TENANT_NAME_LEN {
        return Err(ModbError::validation(
            "name",
            format!("tenant name must be 1-{} characters", MAX_TENANT_NAME_LEN),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(ModbError::validation(
            "name",
            "tenant name must not contain control characters",
        ));
    }
    Ok(())
}

fn parse_tenant(document: &str) -> Result<Tenant> {
    serde_json::from_str(document)
        .map_err(|e| ModbError::Corruption(format!("tenant record: {}", e)))
}

fn parse_page(documents: PagedList<String>) -> Result<PagedList<Tenant>> {
    let tenants = documents
        .items
        .iter()
        .map(|document| parse_tenant(document))
        .collect::<Result<Vec<_>>>()?;
    Ok(PagedList {
        items: tenants,
        page: documents.page,
        page_size: documents.page_size,
        total_items: documents.total_items,
        total_pages: documents.total_pages,
    })
}
