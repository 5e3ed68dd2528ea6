//! Domain and domain-version façades
//!
//! A domain is a partitioned dataset with a fixed partition count and a
//! storage-engine binding. Its versions are immutable snapshots, open until
//! their closing timestamp is written.

use crate::common::{timestamp_now_millis, Error, Result};
use crate::namespace::{path, CreateOp, NamespaceClient};
use crate::watch::{Detachable, ListenerHandle, WatchedCell, WatchedDir};
use std::sync::Arc;

pub(crate) const NUM_PARTS: &str = "num_parts";
pub(crate) const STORAGE_ENGINE_FACTORY_CLASS: &str = "storage_engine_factory_class";
pub(crate) const STORAGE_ENGINE_OPTIONS: &str = "storage_engine_options";
pub(crate) const VERSIONS: &str = "versions";
pub(crate) const CLOSED_AT: &str = "closed_at";
pub(crate) const TOTAL_NUM_BYTES: &str = "total_num_bytes";
pub(crate) const TOTAL_NUM_RECORDS: &str = "total_num_records";
pub(crate) const PROPERTIES: &str = "properties";

struct DomainInner {
    client: NamespaceClient,
    path: String,
    name: String,
    num_partitions: i32,
    storage_engine_factory_class: String,
    storage_engine_options: String,
    versions: WatchedDir<DomainVersion>,
}

/// A partitioned dataset.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    /// Materialize a domain subtree and attach.
    pub(crate) fn create(
        client: &NamespaceClient,
        domains_root: &str,
        name: &str,
        num_partitions: i32,
        storage_engine_factory_class: &str,
        storage_engine_options: &str,
    ) -> Result<Domain> {
        let domain_path = path::join(domains_root, name);
        client.create_many(&[
            CreateOp::persistent(domain_path.clone(), Vec::new()),
            CreateOp::persistent(
                path::join(&domain_path, NUM_PARTS),
                num_partitions.to_string().into_bytes(),
            ),
            CreateOp::persistent(
                path::join(&domain_path, STORAGE_ENGINE_FACTORY_CLASS),
                storage_engine_factory_class.as_bytes().to_vec(),
            ),
            CreateOp::persistent(
                path::join(&domain_path, STORAGE_ENGINE_OPTIONS),
                storage_engine_options.as_bytes().to_vec(),
            ),
            CreateOp::persistent(path::join(&domain_path, VERSIONS), Vec::new()),
        ])?;
        Self::attach(client.clone(), domain_path)
    }

    /// Attach to an existing domain subtree.
    pub(crate) fn attach(client: NamespaceClient, domain_path: String) -> Result<Domain> {
        let name = path::name(&domain_path).to_string();
        let num_partitions = client.get_int(&path::join(&domain_path, NUM_PARTS))?;
        let storage_engine_factory_class = client
            .get_string(&path::join(&domain_path, STORAGE_ENGINE_FACTORY_CLASS))?
            .unwrap_or_default();
        let storage_engine_options = client
            .get_string(&path::join(&domain_path, STORAGE_ENGINE_OPTIONS))?
            .unwrap_or_default();

        let versions_path = path::join(&domain_path, VERSIONS);
        let factory_client = client.clone();
        let factory_path = versions_path.clone();
        let versions = WatchedDir::attach(client.clone(), versions_path, move |child| {
            DomainVersion::attach(factory_client.clone(), path::join(&factory_path, child))
        })?;

        Ok(Domain {
            inner: Arc::new(DomainInner {
                client,
                path: domain_path,
                name,
                num_partitions,
                storage_engine_factory_class,
                storage_engine_options,
                versions,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn num_partitions(&self) -> i32 {
        self.inner.num_partitions
    }

    pub fn storage_engine_factory_class(&self) -> &str {
        &self.inner.storage_engine_factory_class
    }

    pub fn storage_engine_options(&self) -> &str {
        &self.inner.storage_engine_options
    }

    /// Versions in ascending number order.
    pub fn versions(&self) -> Vec<DomainVersion> {
        let mut versions = self.inner.versions.values();
        versions.sort_by_key(DomainVersion::version_number);
        versions
    }

    pub fn get_version_by_number(&self, version_number: i32) -> Option<DomainVersion> {
        if let Some(version) = self.inner.versions.get(&version_number.to_string()) {
            return Some(version);
        }
        // The watched dir lags writes; fall back to the store for a version
        // created moments ago.
        let version_path = path::join(
            &path::join(&self.inner.path, VERSIONS),
            &version_number.to_string(),
        );
        match self.inner.client.exists(&version_path) {
            Ok(true) => DomainVersion::attach(self.inner.client.clone(), version_path).ok(),
            _ => None,
        }
    }

    /// Open the next version: 1 + the highest existing number, or 0.
    pub fn open_version(&self) -> Result<DomainVersion> {
        let versions_path = path::join(&self.inner.path, VERSIONS);
        loop {
            let next = self
                .inner
                .client
                .children(&versions_path)?
                .iter()
                .filter_map(|name| name.parse::<i32>().ok())
                .max()
                .map_or(0, |max| max + 1);
            let version_path = path::join(&versions_path, &next.to_string());
            match self
                .inner
                .client
                .create(&version_path, b"", crate::namespace::CreateMode::Persistent)
            {
                Ok(()) => return DomainVersion::attach(self.inner.client.clone(), version_path),
                // Lost the allocation race; recompute against the new max.
                Err(Error::AlreadyExists(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Observe version membership changes.
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&Domain) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let domain = self.clone();
        self.inner.versions.subscribe(move || listener(&domain))
    }

    pub fn remove_change_listener(&self, handle: ListenerHandle) {
        self.inner.versions.unsubscribe(handle);
    }

    /// Remove the whole domain subtree.
    pub fn delete(&self) -> Result<()> {
        self.inner.client.delete_recursive(&self.inner.path)
    }
}

impl Detachable for Domain {
    fn detach(&self) {
        self.inner.versions.detach();
    }
}

struct DomainVersionInner {
    client: NamespaceClient,
    path: String,
    version_number: i32,
    closed_at: WatchedCell<i64>,
    total_num_bytes: WatchedCell<i64>,
    total_num_records: WatchedCell<i64>,
    properties: WatchedCell<String>,
}

/// One immutable snapshot of a domain.
#[derive(Clone)]
pub struct DomainVersion {
    inner: Arc<DomainVersionInner>,
}

impl DomainVersion {
    pub(crate) fn attach(client: NamespaceClient, version_path: String) -> Result<DomainVersion> {
        let version_number: i32 = path::name(&version_path)
            .parse()
            .map_err(|_| Error::malformed("version number").at_path(&version_path))?;
        let closed_at = WatchedCell::attach(client.clone(), path::join(&version_path, CLOSED_AT))?;
        let total_num_bytes =
            WatchedCell::attach(client.clone(), path::join(&version_path, TOTAL_NUM_BYTES))?;
        let total_num_records =
            WatchedCell::attach(client.clone(), path::join(&version_path, TOTAL_NUM_RECORDS))?;
        let properties =
            WatchedCell::attach(client.clone(), path::join(&version_path, PROPERTIES))?;
        Ok(DomainVersion {
            inner: Arc::new(DomainVersionInner {
                client,
                path: version_path,
                version_number,
                closed_at,
                total_num_bytes,
                total_num_records,
                properties,
            }),
        })
    }

    pub fn version_number(&self) -> i32 {
        self.inner.version_number
    }

    /// Closing timestamp in epoch milliseconds; absent or zero means open.
    pub fn closed_at(&self) -> Option<i64> {
        self.inner.closed_at.get()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.closed_at(), Some(at) if at != 0)
    }

    /// Stamp the closing timestamp. Closing is terminal.
    pub fn close(&self) -> Result<()> {
        let closed_at_path = path::join(&self.inner.path, CLOSED_AT);
        if matches!(self.inner.client.get_long_or_null(&closed_at_path)?, Some(at) if at != 0) {
            return Err(Error::AlreadyExists(closed_at_path));
        }
        self.inner.client.set_or_create(
            &closed_at_path,
            (timestamp_now_millis() as i64).to_string().as_bytes(),
            crate::namespace::CreateMode::Persistent,
        )
    }

    pub fn total_num_bytes(&self) -> Option<i64> {
        self.inner.total_num_bytes.get()
    }

    pub fn set_total_num_bytes(&self, bytes: i64) -> Result<()> {
        self.inner.total_num_bytes.set(&bytes)
    }

    pub fn total_num_records(&self) -> Option<i64> {
        self.inner.total_num_records.get()
    }

    pub fn set_total_num_records(&self, records: i64) -> Result<()> {
        self.inner.total_num_records.set(&records)
    }

    pub fn properties(&self) -> Option<String> {
        self.inner.properties.get()
    }

    pub fn set_properties(&self, properties: &str) -> Result<()> {
        self.inner.properties.set(&properties.to_string())
    }
}

impl Detachable for DomainVersion {
    fn detach(&self) {
        self.inner.closed_at.cancel();
        self.inner.total_num_bytes.cancel();
        self.inner.total_num_records.cancel();
        self.inner.properties.cancel();
    }
}
