//! Domain group and domain-group-version façades
//!
//! A domain group bundles domains and assigns each a small numeric id. Every
//! domain-group version pins one domain version per member domain; its node
//! payload enumerates the (domain-id, version) pairs, one per line.

use crate::common::{Error, Result};
use crate::namespace::{path, CreateMode, CreateOp, NamespaceClient};
use crate::watch::{Detachable, ListenerHandle, WatchedCell, WatchedDir};
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) const DOMAINS: &str = "domains";
pub(crate) const VERSIONS: &str = "versions";

/// Encode a (domain-id → version) map as the version-node payload.
pub(crate) fn encode_domain_versions(versions: &BTreeMap<i32, i32>) -> String {
    let mut out = String::new();
    for (domain_id, version) in versions {
        out.push_str(&format!("{domain_id} {version}\n"));
    }
    out
}

/// Parse a version-node payload back into a (domain-id → version) map.
pub(crate) fn parse_domain_versions(payload: &str) -> Result<BTreeMap<i32, i32>> {
    let mut versions = BTreeMap::new();
    for line in payload.lines().filter(|line| !line.trim().is_empty()) {
        let (id, version) = line
            .trim()
            .split_once(' ')
            .ok_or_else(|| Error::malformed(format!("bad domain-version entry: {line:?}")))?;
        let id: i32 = id
            .parse()
            .map_err(|_| Error::malformed(format!("bad domain id: {id:?}")))?;
        let version: i32 = version
            .parse()
            .map_err(|_| Error::malformed(format!("bad version number: {version:?}")))?;
        versions.insert(id, version);
    }
    Ok(versions)
}

struct DomainGroupInner {
    client: NamespaceClient,
    path: String,
    name: String,
    domains: WatchedDir<WatchedCell<i32>>,
    versions: WatchedDir<DomainGroupVersion>,
}

/// A named bundle of domains with pinned versions.
#[derive(Clone)]
pub struct DomainGroup {
    inner: Arc<DomainGroupInner>,
}

impl DomainGroup {
    /// Materialize an empty domain group and attach.
    pub(crate) fn create(
        client: &NamespaceClient,
        domain_groups_root: &str,
        name: &str,
    ) -> Result<DomainGroup> {
        let group_path = path::join(domain_groups_root, name);
        client.create_many(&[
            CreateOp::persistent(group_path.clone(), Vec::new()),
            CreateOp::persistent(path::join(&group_path, DOMAINS), Vec::new()),
            CreateOp::persistent(path::join(&group_path, VERSIONS), Vec::new()),
        ])?;
        Self::attach(client.clone(), group_path)
    }

    /// Attach to an existing domain group subtree.
    pub(crate) fn attach(client: NamespaceClient, group_path: String) -> Result<DomainGroup> {
        let name = path::name(&group_path).to_string();

        let domains_path = path::join(&group_path, DOMAINS);
        let domains_factory_client = client.clone();
        let domains_factory_path = domains_path.clone();
        let domains = WatchedDir::attach(client.clone(), domains_path, move |child| {
            WatchedCell::attach(
                domains_factory_client.clone(),
                path::join(&domains_factory_path, child),
            )
        })?;

        let versions_path = path::join(&group_path, VERSIONS);
        let versions_factory_client = client.clone();
        let versions_factory_path = versions_path.clone();
        let versions = WatchedDir::attach(client.clone(), versions_path, move |child| {
            DomainGroupVersion::attach(
                versions_factory_client.clone(),
                path::join(&versions_factory_path, child),
            )
        })?;

        Ok(DomainGroup {
            inner: Arc::new(DomainGroupInner {
                client,
                path: group_path,
                name,
                domains,
                versions,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Member domains: name → assigned id.
    pub fn domains(&self) -> BTreeMap<String, i32> {
        self.inner
            .domains
            .names()
            .into_iter()
            .filter_map(|name| {
                let id = self.inner.domains.get(&name).and_then(|cell| cell.get())?;
                Some((name, id))
            })
            .collect()
    }

    pub fn domain_id(&self, domain_name: &str) -> Option<i32> {
        self.inner.domains.get(domain_name).and_then(|cell| cell.get())
    }

    pub fn domain_name_by_id(&self, domain_id: i32) -> Option<String> {
        self.domains()
            .into_iter()
            .find(|(_, id)| *id == domain_id)
            .map(|(name, _)| name)
    }

    /// Versions in ascending number order.
    pub fn versions(&self) -> Vec<DomainGroupVersion> {
        let mut versions = self.inner.versions.values();
        versions.sort_by_key(DomainGroupVersion::version_number);
        versions
    }

    pub fn get_version_by_number(&self, version_number: i32) -> Option<DomainGroupVersion> {
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
            Ok(true) => DomainGroupVersion::attach(self.inner.client.clone(), version_path).ok(),
            _ => None,
        }
    }

    pub fn latest_version(&self) -> Option<DomainGroupVersion> {
        self.versions().into_iter().last()
    }

    /// Pin a version per domain in a new domain-group version numbered
    /// 1 + the highest existing, or 0. Domains not yet in the group are
    /// assigned fresh ids.
    pub fn set_domain_versions(
        &self,
        domain_versions: &BTreeMap<String, i32>,
    ) -> Result<DomainGroupVersion> {
        let domains_path = path::join(&self.inner.path, DOMAINS);
        let mut ids: BTreeMap<String, i32> = BTreeMap::new();
        for member in self.inner.client.children(&domains_path)? {
            let id = self
                .inner
                .client
                .get_int(&path::join(&domains_path, &member))?;
            ids.insert(member, id);
        }
        let mut next_id = ids.values().max().map_or(0, |max| max + 1);
        for domain_name in domain_versions.keys() {
            if !ids.contains_key(domain_name) {
                self.inner
                    .client
                    .create_int(&path::join(&domains_path, domain_name), next_id)?;
                ids.insert(domain_name.clone(), next_id);
                next_id += 1;
            }
        }

        let by_id: BTreeMap<i32, i32> = domain_versions
            .iter()
            .map(|(name, version)| (ids[name], *version))
            .collect();
        let payload = encode_domain_versions(&by_id);

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
            match self.inner.client.create(
                &version_path,
                payload.as_bytes(),
                CreateMode::Persistent,
            ) {
                Ok(()) => {
                    tracing::info!(
                        domain_group = %self.inner.name,
                        version = next,
                        domains = by_id.len(),
                        "created domain group version"
                    );
                    return DomainGroupVersion::attach(self.inner.client.clone(), version_path);
                }
                // Lost the allocation race; recompute against the new max.
                Err(Error::AlreadyExists(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Observe version membership changes.
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&DomainGroup) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let group = self.clone();
        self.inner.versions.subscribe(move || listener(&group))
    }

    pub fn remove_change_listener(&self, handle: ListenerHandle) {
        self.inner.versions.unsubscribe(handle);
    }

    /// Remove the whole subtree. Returns whether it existed.
    pub fn delete(&self) -> Result<bool> {
        if !self.inner.client.exists(&self.inner.path)? {
            return Ok(false);
        }
        self.inner.client.delete_recursive(&self.inner.path)?;
        Ok(true)
    }
}

impl Detachable for DomainGroup {
    fn detach(&self) {
        self.inner.domains.detach();
        self.inner.versions.detach();
    }
}

struct DomainGroupVersionInner {
    path: String,
    version_number: i32,
    payload: WatchedCell<String>,
}

/// One numbered pinning of domain versions within a group.
#[derive(Clone)]
pub struct DomainGroupVersion {
    inner: Arc<DomainGroupVersionInner>,
}

impl DomainGroupVersion {
    pub(crate) fn attach(
        client: NamespaceClient,
        version_path: String,
    ) -> Result<DomainGroupVersion> {
        let version_number: i32 = path::name(&version_path)
            .parse()
            .map_err(|_| Error::malformed("version number").at_path(&version_path))?;
        let payload = WatchedCell::attach(client, version_path.clone())?;
        Ok(DomainGroupVersion {
            inner: Arc::new(DomainGroupVersionInner {
                path: version_path,
                version_number,
                payload,
            }),
        })
    }

    pub fn version_number(&self) -> i32 {
        self.inner.version_number
    }

    /// The pinned (domain-id → version) map.
    pub fn domain_versions(&self) -> BTreeMap<i32, i32> {
        match self.inner.payload.get() {
            None => BTreeMap::new(),
            Some(payload) => parse_domain_versions(&payload).unwrap_or_else(|e| {
                tracing::warn!(path = %self.inner.path, error = %e, "bad domain group version payload");
                BTreeMap::new()
            }),
        }
    }
}

impl Detachable for DomainGroupVersion {
    fn detach(&self) {
        self.inner.payload.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::MemoryNamespace;

    #[test]
    fn test_payload_codec() {
        let mut versions = BTreeMap::new();
        versions.insert(0, 3);
        versions.insert(7, 1);
        let payload = encode_domain_versions(&versions);
        assert_eq!(payload, "0 3\n7 1\n");
        assert_eq!(parse_domain_versions(&payload).unwrap(), versions);

        assert!(parse_domain_versions("").unwrap().is_empty());
        assert!(parse_domain_versions("junk").is_err());
        assert!(parse_domain_versions("0 x").is_err());
    }

    fn group_fixture() -> (NamespaceClient, DomainGroup) {
        let ns = MemoryNamespace::new();
        let client = ns.connect();
        client.ensure_path("/hank/domain_groups").unwrap();
        let group = DomainGroup::create(&client, "/hank/domain_groups", "frontend").unwrap();
        (client, group)
    }

    #[test]
    fn test_set_domain_versions_assigns_ids() {
        let (_client, group) = group_fixture();

        let mut pinned = BTreeMap::new();
        pinned.insert("users".to_string(), 3);
        pinned.insert("items".to_string(), 1);
        let version = group.set_domain_versions(&pinned).unwrap();
        assert_eq!(version.version_number(), 0);

        // Ids are assigned in name order starting from 0.
        let ids = {
            let versions = version.domain_versions();
            assert_eq!(versions.len(), 2);
            versions
        };
        assert_eq!(ids.get(&0), Some(&1)); // items
        assert_eq!(ids.get(&1), Some(&3)); // users

        // A second pinning reuses the existing ids.
        let mut repinned = BTreeMap::new();
        repinned.insert("users".to_string(), 4);
        let second = group.set_domain_versions(&repinned).unwrap();
        assert_eq!(second.version_number(), 1);
        assert_eq!(second.domain_versions().get(&1), Some(&4));
    }

    #[test]
    fn test_empty_pinning() {
        let (_client, group) = group_fixture();
        let version = group
            .set_domain_versions(&BTreeMap::new())
            .unwrap();
        assert_eq!(version.version_number(), 0);
        assert!(version.domain_versions().is_empty());
    }

    #[test]
    fn test_get_version_by_number_sees_fresh_writes() {
        let (_client, group) = group_fixture();
        group.set_domain_versions(&BTreeMap::new()).unwrap();
        assert!(group.get_version_by_number(0).is_some());
        assert!(group.get_version_by_number(5).is_none());
    }

    #[test]
    fn test_delete() {
        let (client, group) = group_fixture();
        assert!(group.delete().unwrap());
        assert!(!client.exists("/hank/domain_groups/frontend").unwrap());
        // Second delete reports the group was already gone.
        assert!(!group.delete().unwrap());
    }
}
