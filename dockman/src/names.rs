//! Bidirectional codec between logical container identity and the opaque
//! name string stored in the daemon.
//!
//! The encoded shape is
//! `k8s_<container>.<hash>_<pod>_<namespace>_<uid>_<attempt>`. The stable
//! name omits the trailing attempt counter so that restart backoff keys stay
//! constant across restarts of the same container. Decoding is lenient at
//! the listing layer: names the codec does not recognize belong to foreign
//! containers and are skipped.

use crate::hash::hash_container_spec;
use anyhow::{Result, anyhow, bail};
use common::ContainerSpec;

pub const CONTAINER_NAME_PREFIX: &str = "k8s";

/// Reserved name of the infrastructure (sandbox) container.
pub const POD_INFRA_CONTAINER_NAME: &str = "POD";

/// Logical identity of one managed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerName {
    /// `<pod name>_<pod namespace>`.
    pub pod_full_name: String,
    pub pod_uid: String,
    pub container_name: String,
    /// Per-restart counter; excluded from the stable name.
    pub attempt: u32,
}

pub fn build_pod_full_name(name: &str, namespace: &str) -> String {
    format!("{name}_{namespace}")
}

pub fn parse_pod_full_name(full_name: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = full_name.split('_').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        bail!("failed to parse pod full name {full_name:?}");
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Encodes an identity plus the spec fingerprint into `(stable, full)` names.
/// The full name is what gets handed to the daemon.
pub fn build_docker_name(name: &DockerName, container: &ContainerSpec) -> (String, String) {
    let hash = hash_container_spec(container);
    let stable = format!(
        "{CONTAINER_NAME_PREFIX}_{container_name}.{hash:x}_{pod_full_name}_{uid}",
        container_name = name.container_name,
        pod_full_name = name.pod_full_name,
        uid = name.pod_uid,
    );
    let full = format!("{stable}_{attempt}", attempt = name.attempt);
    (stable, full)
}

/// Decodes a daemon name back into the identity and the stamped hash.
///
/// The daemon prepends `/` to names it reports; that prefix is stripped. An
/// unparseable hash segment degrades to hash 0 (treated as "unknown") rather
/// than failing the whole decode.
pub fn parse_docker_name(name: &str) -> Result<(DockerName, u64)> {
    let name = name.strip_prefix('/').unwrap_or(name);
    let parts: Vec<&str> = name.split('_').collect();
    if parts.first() != Some(&CONTAINER_NAME_PREFIX) {
        bail!("container name {name:?} does not start with {CONTAINER_NAME_PREFIX:?}");
    }
    if parts.len() != 6 {
        bail!("failed to parse container name {name:?} into parts");
    }

    let name_and_hash: Vec<&str> = parts[1].splitn(2, '.').collect();
    let container_name = name_and_hash[0].to_string();
    if container_name.is_empty() {
        bail!("container name component missing in {name:?}");
    }
    let hash = match name_and_hash.get(1) {
        Some(h) => u64::from_str_radix(h, 16).unwrap_or_else(|_| {
            tracing::debug!(name, "invalid container hash in container name");
            0
        }),
        None => 0,
    };

    let pod_full_name = build_pod_full_name(parts[2], parts[3]);
    let pod_uid = parts[4].to_string();
    if pod_uid.is_empty() {
        bail!("pod uid component missing in {name:?}");
    }
    let attempt = parts[5]
        .parse::<u32>()
        .map_err(|e| anyhow!("invalid attempt counter in {name:?}: {e}"))?;

    Ok((
        DockerName {
            pod_full_name,
            pod_uid,
            container_name,
            attempt,
        },
        hash,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_container(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "busybox".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let container = make_container("app");
        let identity = DockerName {
            pod_full_name: build_pod_full_name("web", "prod"),
            pod_uid: "f1a2".to_string(),
            container_name: "app".to_string(),
            attempt: 3,
        };
        let (stable, full) = build_docker_name(&identity, &container);
        assert!(full.starts_with(&stable));

        let (decoded, hash) = parse_docker_name(&full).unwrap();
        assert_eq!(decoded, identity);
        assert_eq!(hash, hash_container_spec(&container));
    }

    #[test]
    fn stable_name_ignores_attempt() {
        let container = make_container("app");
        let mut identity = DockerName {
            pod_full_name: build_pod_full_name("web", "prod"),
            pod_uid: "f1a2".to_string(),
            container_name: "app".to_string(),
            attempt: 0,
        };
        let (stable_first, _) = build_docker_name(&identity, &container);
        identity.attempt = 7;
        let (stable_later, _) = build_docker_name(&identity, &container);
        assert_eq!(stable_first, stable_later);
    }

    #[test]
    fn decode_strips_daemon_slash_prefix() {
        let container = make_container("app");
        let identity = DockerName {
            pod_full_name: build_pod_full_name("web", "prod"),
            pod_uid: "f1a2".to_string(),
            container_name: "app".to_string(),
            attempt: 0,
        };
        let (_, full) = build_docker_name(&identity, &container);
        let (decoded, _) = parse_docker_name(&format!("/{full}")).unwrap();
        assert_eq!(decoded.container_name, "app");
    }

    #[test]
    fn decode_rejects_foreign_names() {
        assert!(parse_docker_name("/nginx").is_err());
        assert!(parse_docker_name("k8s_app.1f_web_prod").is_err());
        assert!(parse_docker_name("docker_app.1f_web_prod_uid_0").is_err());
    }

    #[test]
    fn unparseable_hash_degrades_to_zero() {
        let (_, hash) = parse_docker_name("k8s_app.zzz_web_prod_uid1_0").unwrap();
        assert_eq!(hash, 0);
        let (name, hash) = parse_docker_name("k8s_app_web_prod_uid1_0").unwrap();
        assert_eq!(hash, 0);
        assert_eq!(name.container_name, "app");
    }

    #[test]
    fn pod_full_name_round_trips() {
        let full = build_pod_full_name("web", "prod");
        assert_eq!(
            parse_pod_full_name(&full).unwrap(),
            ("web".to_string(), "prod".to_string())
        );
        assert!(parse_pod_full_name("justaname").is_err());
    }
}
