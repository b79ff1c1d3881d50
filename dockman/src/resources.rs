//! Resource quantity parsing and the cpu share/quota arithmetic the daemon
//! expects.
//!
//! Quantities use the manifest notation: cpu as `1`, `0.5` or `500m`;
//! memory as plain bytes or `Ki`/`Mi`/`Gi` suffixed values.

use anyhow::{Result, anyhow};
use common::ContainerSpec;

const SHARES_PER_CPU: i64 = 1024;
const MILLI_CPU_TO_CPU: i64 = 1000;
/// The smallest share value the kernel accepts.
const MIN_SHARES: i64 = 2;

const QUOTA_PERIOD: i64 = 100_000;
const MIN_QUOTA: i64 = 1000;

/// Parses a cpu quantity into millicores.
pub fn parse_milli_cpu(quantity: &str) -> Result<i64> {
    if let Some(stripped) = quantity.strip_suffix('m') {
        stripped
            .parse::<i64>()
            .map_err(|e| anyhow!("failed to parse cpu quantity {quantity:?}: {e}"))
    } else {
        let cores = quantity
            .parse::<f64>()
            .map_err(|e| anyhow!("failed to parse cpu quantity {quantity:?}: {e}"))?;
        Ok((cores * MILLI_CPU_TO_CPU as f64) as i64)
    }
}

/// Parses a memory quantity into bytes.
pub fn parse_memory_bytes(quantity: &str) -> Result<i64> {
    let parse = |s: &str, unit: i64| {
        s.parse::<i64>()
            .map(|v| v * unit)
            .map_err(|e| anyhow!("failed to parse memory quantity {quantity:?}: {e}"))
    };
    if let Some(s) = quantity.strip_suffix("Gi") {
        parse(s, 1024 * 1024 * 1024)
    } else if let Some(s) = quantity.strip_suffix("Mi") {
        parse(s, 1024 * 1024)
    } else if let Some(s) = quantity.strip_suffix("Ki") {
        parse(s, 1024)
    } else {
        parse(quantity, 1)
    }
}

/// Millicores the container requests, if set.
pub fn cpu_request_millis(container: &ContainerSpec) -> Result<Option<i64>> {
    match container
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.cpu.as_deref())
    {
        Some(q) => Ok(Some(parse_milli_cpu(q)?)),
        None => Ok(None),
    }
}

/// Millicores the container is limited to, if set.
pub fn cpu_limit_millis(container: &ContainerSpec) -> Result<Option<i64>> {
    match container
        .resources
        .as_ref()
        .and_then(|r| r.limits.as_ref())
        .and_then(|r| r.cpu.as_deref())
    {
        Some(q) => Ok(Some(parse_milli_cpu(q)?)),
        None => Ok(None),
    }
}

/// Memory limit in bytes; zero when unset (no limit).
pub fn memory_limit_bytes(container: &ContainerSpec) -> Result<i64> {
    match container
        .resources
        .as_ref()
        .and_then(|r| r.limits.as_ref())
        .and_then(|r| r.memory.as_deref())
    {
        Some(q) => parse_memory_bytes(q),
        None => Ok(0),
    }
}

/// Memory request in bytes; zero when unset.
pub fn memory_request_bytes(container: &ContainerSpec) -> Result<i64> {
    match container
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.memory.as_deref())
    {
        Some(q) => parse_memory_bytes(q),
        None => Ok(0),
    }
}

/// Converts millicores to cgroup cpu shares, clamped to the kernel minimum.
pub fn milli_cpu_to_shares(milli_cpu: i64) -> i64 {
    if milli_cpu == 0 {
        return MIN_SHARES;
    }
    let shares = milli_cpu * SHARES_PER_CPU / MILLI_CPU_TO_CPU;
    shares.max(MIN_SHARES)
}

/// Converts millicores to a CFS (quota, period) pair. Zero millicores means
/// no enforcement and yields (0, 0).
pub fn milli_cpu_to_quota(milli_cpu: i64) -> (i64, i64) {
    if milli_cpu == 0 {
        return (0, 0);
    }
    let quota = (milli_cpu * QUOTA_PERIOD / MILLI_CPU_TO_CPU).max(MIN_QUOTA);
    (quota, QUOTA_PERIOD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ResourceList, ResourceRequirements};

    #[test]
    fn parses_cpu_quantities() {
        assert_eq!(parse_milli_cpu("100m").unwrap(), 100);
        assert_eq!(parse_milli_cpu("1").unwrap(), 1000);
        assert_eq!(parse_milli_cpu("0.2").unwrap(), 200);
        assert!(parse_milli_cpu("lots").is_err());
    }

    #[test]
    fn parses_memory_quantities() {
        assert_eq!(parse_memory_bytes("1Gi").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory_bytes("30Mi").unwrap(), 30 * 1024 * 1024);
        assert_eq!(parse_memory_bytes("200Ki").unwrap(), 200 * 1024);
        assert_eq!(parse_memory_bytes("4096").unwrap(), 4096);
        assert!(parse_memory_bytes("1Ti").is_err());
    }

    #[test]
    fn shares_clamp_to_minimum() {
        assert_eq!(milli_cpu_to_shares(0), 2);
        assert_eq!(milli_cpu_to_shares(1), 2);
        assert_eq!(milli_cpu_to_shares(1000), 1024);
        assert_eq!(milli_cpu_to_shares(500), 512);
    }

    #[test]
    fn quota_clamps_to_minimum_and_period() {
        assert_eq!(milli_cpu_to_quota(0), (0, 0));
        assert_eq!(milli_cpu_to_quota(5), (1000, 100_000));
        assert_eq!(milli_cpu_to_quota(500), (50_000, 100_000));
        assert_eq!(milli_cpu_to_quota(2000), (200_000, 100_000));
    }

    #[test]
    fn container_helpers_read_both_sides() {
        let container = ContainerSpec {
            name: "app".to_string(),
            image: "busybox".to_string(),
            resources: Some(ResourceRequirements {
                limits: Some(ResourceList {
                    cpu: Some("500m".to_string()),
                    memory: Some("128Mi".to_string()),
                }),
                requests: Some(ResourceList {
                    cpu: None,
                    memory: Some("64Mi".to_string()),
                }),
            }),
            ..Default::default()
        };
        assert_eq!(cpu_request_millis(&container).unwrap(), None);
        assert_eq!(cpu_limit_millis(&container).unwrap(), Some(500));
        assert_eq!(memory_limit_bytes(&container).unwrap(), 128 * 1024 * 1024);
        assert_eq!(memory_request_bytes(&container).unwrap(), 64 * 1024 * 1024);
    }
}
