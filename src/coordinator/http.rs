//! HTTP/JSON status API
//!
//! A read-only projection of the metadata graph. One endpoint, parameterized
//! by exactly one of: {domain}, {domain, domain_version}, {domain_group},
//! {domain_group, domain_group_version}, {ring_group}. Every other
//! combination is a 400. Successful responses are a single JSON object keyed
//! by entity name; unknown entities yield an empty object.

use crate::common::{Error, Result};
use crate::coordinator::{Coordinator, Domain, DomainGroup, DomainVersion, Ring, RingGroup};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub const ERROR_INTERNAL_SERVER_ERROR: &str = "Internal Server Error";
pub const ERROR_INVALID_PARAMETERS: &str =
    "The combination of parameters submitted is not valid.";

const JSON_FORMAT: &str = "application/json;charset=utf-8";
const TEXT_FORMAT: &str = "text/plain;charset=utf-8";

const DOMAIN: &str = "domain";
const DOMAIN_VERSION: &str = "domain_version";
const DOMAIN_GROUP: &str = "domain_group";
const DOMAIN_GROUP_VERSION: &str = "domain_group_version";
const RING_GROUP: &str = "ring_group";

const PARAM_KEYS: [&str; 5] = [
    DOMAIN,
    DOMAIN_VERSION,
    DOMAIN_GROUP,
    DOMAIN_GROUP_VERSION,
    RING_GROUP,
];

/// Build the status API router.
pub fn create_router(coordinator: Coordinator) -> Router {
    Router::new()
        .route("/api", get(api))
        .with_state(coordinator)
}

async fn api(
    State(coordinator): State<Coordinator>,
    Query(raw_params): Query<HashMap<String, String>>,
) -> Response {
    // Unknown parameters are dropped before validation, as if never sent.
    let params: HashMap<&str, &str> = PARAM_KEYS
        .iter()
        .filter_map(|key| raw_params.get(*key).map(|value| (*key, value.as_str())))
        .collect();

    match response_data(&coordinator, &params) {
        Ok(data) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, JSON_FORMAT)],
            Value::Object(data).to_string(),
        )
            .into_response(),
        Err(Error::InvalidParameters(_)) => (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, TEXT_FORMAT)],
            ERROR_INVALID_PARAMETERS,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "status API failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, TEXT_FORMAT)],
                ERROR_INTERNAL_SERVER_ERROR,
            )
                .into_response()
        }
    }
}

fn params_are_valid(params: &HashMap<&str, &str>) -> bool {
    params_match(params, &[DOMAIN])
        || params_match(params, &[DOMAIN, DOMAIN_VERSION])
        || params_match(params, &[DOMAIN_GROUP])
        || params_match(params, &[DOMAIN_GROUP, DOMAIN_GROUP_VERSION])
        || params_match(params, &[RING_GROUP])
}

fn params_match(params: &HashMap<&str, &str>, expected: &[&str]) -> bool {
    params.len() == expected.len() && expected.iter().all(|key| params.contains_key(key))
}

fn response_data(
    coordinator: &Coordinator,
    params: &HashMap<&str, &str>,
) -> Result<Map<String, Value>> {
    if !params_are_valid(params) {
        return Err(Error::InvalidParameters(format!(
            "{:?}",
            params.keys().collect::<Vec<_>>()
        )));
    }
    let mut data = Map::new();
    if let Some(domain_name) = params.get(DOMAIN) {
        if let Some(version) = params.get(DOMAIN_VERSION) {
            add_domain_version_data(coordinator, domain_name, version, &mut data);
        } else {
            add_domain_data(coordinator, domain_name, &mut data);
        }
    } else if let Some(ring_group_name) = params.get(RING_GROUP) {
        add_ring_group_data(coordinator, ring_group_name, &mut data);
    } else if let Some(group_name) = params.get(DOMAIN_GROUP) {
        if let Some(version) = params.get(DOMAIN_GROUP_VERSION) {
            add_domain_group_version_data(coordinator, group_name, version, &mut data);
        } else {
            add_domain_group_data(coordinator, group_name, &mut data);
        }
    }
    Ok(data)
}

fn add_domain_data(coordinator: &Coordinator, name: &str, data: &mut Map<String, Value>) {
    if let Some(domain) = coordinator.get_domain(name) {
        data.insert(domain.name().to_string(), domain_data(&domain));
    }
}

fn add_domain_version_data(
    coordinator: &Coordinator,
    name: &str,
    version: &str,
    data: &mut Map<String, Value>,
) {
    // Unknown domain or unparsable version adds nothing, but no harm done.
    let Some(domain) = coordinator.get_domain(name) else {
        return;
    };
    let Ok(version_number) = version.parse::<i32>() else {
        return;
    };
    if let Some(version) = domain.get_version_by_number(version_number) {
        data.insert(
            version.version_number().to_string(),
            domain_version_data(&version),
        );
    }
}

fn add_domain_group_data(coordinator: &Coordinator, name: &str, data: &mut Map<String, Value>) {
    if let Some(group) = coordinator.get_domain_group(name) {
        data.insert(
            group.name().to_string(),
            domain_group_data(coordinator, &group),
        );
    }
}

fn add_domain_group_version_data(
    coordinator: &Coordinator,
    name: &str,
    version: &str,
    data: &mut Map<String, Value>,
) {
    let Some(group) = coordinator.get_domain_group(name) else {
        return;
    };
    let Ok(version_number) = version.parse::<i32>() else {
        return;
    };
    if let Some(version) = group.get_version_by_number(version_number) {
        data.insert(
            version.version_number().to_string(),
            domain_group_version_data(coordinator, &group, &version),
        );
    }
}

fn add_ring_group_data(coordinator: &Coordinator, name: &str, data: &mut Map<String, Value>) {
    if let Some(ring_group) = coordinator.get_ring_group(name) {
        data.insert(ring_group.name().to_string(), ring_group_data(&ring_group));
    }
}

fn domain_data(domain: &Domain) -> Value {
    let mut versions = Map::new();
    for version in domain.versions() {
        versions.insert(
            version.version_number().to_string(),
            domain_version_data(&version),
        );
    }
    json!({
        "name": domain.name(),
        "num_partitions": domain.num_partitions(),
        "storage_engine_factory_class": domain.storage_engine_factory_class(),
        "versions": versions,
    })
}

fn domain_version_data(version: &DomainVersion) -> Value {
    json!({
        "version_number": version.version_number(),
        "total_num_bytes": version.total_num_bytes(),
        "total_num_records": version.total_num_records(),
        "is_closed": version.is_closed(),
        "closed_at": version.closed_at(),
    })
}

fn domain_group_data(coordinator: &Coordinator, group: &DomainGroup) -> Value {
    let mut domains = Map::new();
    for domain_name in group.domains().keys() {
        if let Some(domain) = coordinator.get_domain(domain_name) {
            domains.insert(domain_name.clone(), domain_data(&domain));
        }
    }
    let mut versions = Map::new();
    for version in group.versions() {
        versions.insert(
            version.version_number().to_string(),
            domain_group_version_data(coordinator, group, &version),
        );
    }
    json!({
        "name": group.name(),
        "domains": domains,
        "versions": versions,
    })
}

fn domain_group_version_data(
    coordinator: &Coordinator,
    group: &DomainGroup,
    version: &crate::coordinator::DomainGroupVersion,
) -> Value {
    let mut domain_versions = Map::new();
    for (domain_id, pinned) in version.domain_versions() {
        let Some(domain_name) = group.domain_name_by_id(domain_id) else {
            continue;
        };
        let Some(domain) = coordinator.get_domain(&domain_name) else {
            continue;
        };
        if let Some(domain_version) = domain.get_version_by_number(pinned) {
            domain_versions.insert(domain_name, domain_version_data(&domain_version));
        }
    }
    json!({
        "version_number": version.version_number(),
        "domain_versions": domain_versions,
    })
}

fn ring_group_data(ring_group: &RingGroup) -> Value {
    let mut rings = Map::new();
    for ring in ring_group.rings() {
        rings.insert(ring.ring_number().to_string(), ring_data(&ring));
    }
    json!({
        "name": ring_group.name(),
        "domain_group": ring_group.domain_group_name(),
        "is_ring_group_conductor_online": ring_group.is_ring_group_conductor_online(),
        "ring_group_conductor_mode": ring_group
            .get_ring_group_conductor_mode()
            .map(|mode| mode.name()),
        "rings": rings,
    })
}

fn ring_data(ring: &Ring) -> Value {
    json!({
        "ring_number": ring.ring_number(),
        "version_number": ring.version_number(),
        "updating_to_version": ring.updating_to_version_number(),
        "is_update_pending": ring.is_update_pending(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_param_validation() {
        assert!(params_are_valid(&params(&[("domain", "d")])));
        assert!(params_are_valid(&params(&[
            ("domain", "d"),
            ("domain_version", "1")
        ])));
        assert!(params_are_valid(&params(&[("domain_group", "g")])));
        assert!(params_are_valid(&params(&[
            ("domain_group", "g"),
            ("domain_group_version", "0")
        ])));
        assert!(params_are_valid(&params(&[("ring_group", "rg")])));

        assert!(!params_are_valid(&params(&[])));
        assert!(!params_are_valid(&params(&[
            ("ring_group", "rg"),
            ("domain", "d")
        ])));
        assert!(!params_are_valid(&params(&[("domain_version", "1")])));
        assert!(!params_are_valid(&params(&[
            ("domain_group", "g"),
            ("domain_version", "1")
        ])));
    }
}
