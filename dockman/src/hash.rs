//! Stable 64-bit fingerprint of a container spec.
//!
//! The fingerprint is stamped into the daemon-side container name at create
//! time; equality later decides whether an observed container still matches
//! its spec. Hash 0 is reserved for "unknown" (containers created before
//! stamping) and is treated as unchanged.

use common::ContainerSpec;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Fingerprints a container spec.
///
/// The spec is serialized to YAML and hashed line-by-line after sorting, so
/// the value is independent of map iteration order.
pub fn hash_container_spec(container: &ContainerSpec) -> u64 {
    let text = serde_yaml::to_string(container).unwrap_or_default();
    let mut lines: Vec<&str> = text.split('\n').collect();
    lines.sort_unstable();
    let mut hasher = DefaultHasher::new();
    lines.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ContainerPort, EnvVar};

    fn make_container() -> ContainerSpec {
        ContainerSpec {
            name: "app".to_string(),
            image: "example.com/app:1.0".to_string(),
            env: vec![EnvVar {
                name: "MODE".to_string(),
                value: "prod".to_string(),
            }],
            ports: vec![ContainerPort {
                container_port: 8080,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let container = make_container();
        assert_eq!(hash_container_spec(&container), hash_container_spec(&container));
    }

    #[test]
    fn hash_changes_with_spec() {
        let container = make_container();
        let mut changed = container.clone();
        changed.image = "example.com/app:2.0".to_string();
        assert_ne!(hash_container_spec(&container), hash_container_spec(&changed));

        let mut with_port = container.clone();
        with_port.ports.push(ContainerPort {
            container_port: 9090,
            ..Default::default()
        });
        assert_ne!(
            hash_container_spec(&container),
            hash_container_spec(&with_port)
        );
    }
}
