//! Concurrent probing and health assessment.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use warden_core::config::HealthConfig;
use warden_core::{HealthLevel, HealthStatus, ProbeState, ServiceHealth};

use crate::checker::http_probe;

/// One endpoint to probe this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTarget {
    pub name: String,
    pub address: String,
    pub path: String,
    pub core: bool,
    pub timeout: Duration,
}

/// Fleet-side facts the assessment needs besides probe results.
#[derive(Debug, Clone, Copy, Default)]
pub struct FleetFacts {
    pub live_instances: u32,
    pub min_instances: u32,
    /// A restore started but has not completed.
    pub restore_pending: bool,
}

/// Probes the configured dependency set.
#[derive(Debug, Clone)]
pub struct HealthProber {
    services: Vec<ProbeTarget>,
    default_timeout: Duration,
    critical_floor: f64,
}

impl HealthProber {
    pub fn new(config: &HealthConfig) -> Self {
        let services = config
            .services
            .iter()
            .map(|s| ProbeTarget {
                name: s.name.clone(),
                address: s.address.clone(),
                path: s.path.clone(),
                core: s.core,
                timeout: s.timeout.unwrap_or(config.probe_timeout),
            })
            .collect();
        Self {
            services,
            default_timeout: config.probe_timeout,
            critical_floor: config.critical_floor,
        }
    }

    pub fn services(&self) -> &[ProbeTarget] {
        &self.services
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Probe configured services plus `extra` targets and assess the result.
    pub async fn probe(&self, extra: &[ProbeTarget], facts: FleetFacts) -> HealthStatus {
        let mut targets = self.services.clone();
        targets.extend_from_slice(extra);
        let services = probe_all(&targets).await;
        assess(services, self.critical_floor, facts)
    }
}

/// Probe every target concurrently. Returns once all probes have finished
/// or hit their own timeout.
pub async fn probe_all(targets: &[ProbeTarget]) -> BTreeMap<String, ServiceHealth> {
    let mut set = JoinSet::new();
    for target in targets.iter().cloned() {
        set.spawn(async move {
            let (state, latency) = http_probe(&target.address, &target.path, target.timeout).await;
            (
                target.name,
                ServiceHealth {
                    state,
                    latency_ms: latency.as_millis() as u64,
                    core: target.core,
                },
            )
        });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((name, health)) => {
                results.insert(name, health);
            }
            Err(e) => warn!(error = %e, "health probe task failed"),
        }
    }

    // A probe task that panicked still counts, as unhealthy.
    for target in targets {
        results
            .entry(target.name.clone())
            .or_insert_with(|| ServiceHealth {
                state: ProbeState::Unhealthy,
                latency_ms: target.timeout.as_millis() as u64,
                core: target.core,
            });
    }
    results
}

/// Fold per-service results and fleet facts into an overall level.
pub fn assess(
    services: BTreeMap<String, ServiceHealth>,
    critical_floor: f64,
    facts: FleetFacts,
) -> HealthStatus {
    let mut status = HealthStatus {
        services,
        level: HealthLevel::Healthy,
        reasons: Vec::new(),
    };

    let down_core: Vec<&String> = status
        .services
        .iter()
        .filter(|(_, h)| h.core && h.state == ProbeState::Unhealthy)
        .map(|(name, _)| name)
        .collect();
    let mut reasons = Vec::new();
    for name in down_core {
        reasons.push(format!("core service {name} unhealthy"));
    }

    let ratio = status.healthy_ratio();
    if ratio < critical_floor {
        reasons.push(format!(
            "healthy ratio {:.2} below critical floor {:.2}",
            ratio, critical_floor
        ));
    }
    if facts.live_instances == 0 && facts.min_instances > 0 {
        reasons.push("no live worker instances".to_string());
    }
    if facts.restore_pending {
        reasons.push("restore incomplete".to_string());
    }

    if !reasons.is_empty() {
        status.level = HealthLevel::Critical;
    } else if status.healthy_count() < status.total_count() {
        status.level = HealthLevel::Degraded;
        reasons.push(format!(
            "{}/{} services healthy",
            status.healthy_count(),
            status.total_count()
        ));
    }
    status.reasons = reasons;

    debug!(
        level = ?status.level,
        healthy = status.healthy_count(),
        total = status.total_count(),
        "health assessed"
    );
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::config::ServiceEndpoint;

    fn svc(state: ProbeState, core: bool) -> ServiceHealth {
        ServiceHealth {
            state,
            latency_ms: 1,
            core,
        }
    }

    fn facts(live: u32) -> FleetFacts {
        FleetFacts {
            live_instances: live,
            min_instances: 1,
            restore_pending: false,
        }
    }

    #[test]
    fn all_healthy() {
        let mut services = BTreeMap::new();
        services.insert("db".to_string(), svc(ProbeState::Healthy, true));
        services.insert("cache".to_string(), svc(ProbeState::Healthy, false));
        let status = assess(services, 0.5, facts(3));
        assert_eq!(status.level, HealthLevel::Healthy);
        assert!(status.reasons.is_empty());
    }

    #[test]
    fn non_core_failure_is_degraded() {
        let mut services = BTreeMap::new();
        services.insert("db".to_string(), svc(ProbeState::Healthy, true));
        services.insert("cache".to_string(), svc(ProbeState::Unhealthy, false));
        services.insert("bus".to_string(), svc(ProbeState::Healthy, false));
        let status = assess(services, 0.5, facts(3));
        assert_eq!(status.level, HealthLevel::Degraded);
    }

    #[test]
    fn core_failure_is_critical() {
        let mut services = BTreeMap::new();
        services.insert("db".to_string(), svc(ProbeState::Unhealthy, true));
        services.insert("cache".to_string(), svc(ProbeState::Healthy, false));
        services.insert("bus".to_string(), svc(ProbeState::Healthy, false));
        let status = assess(services, 0.1, facts(3));
        assert_eq!(status.level, HealthLevel::Critical);
        assert!(status.reasons[0].contains("db"));
    }

    #[test]
    fn below_floor_is_critical() {
        let mut services = BTreeMap::new();
        services.insert("a".to_string(), svc(ProbeState::Unhealthy, false));
        services.insert("b".to_string(), svc(ProbeState::Unhealthy, false));
        services.insert("c".to_string(), svc(ProbeState::Healthy, false));
        let status = assess(services, 0.5, facts(3));
        assert_eq!(status.level, HealthLevel::Critical);
    }

    #[test]
    fn empty_fleet_is_critical() {
        let status = assess(BTreeMap::new(), 0.5, facts(0));
        assert_eq!(status.level, HealthLevel::Critical);

        let allowed_empty = FleetFacts {
            live_instances: 0,
            min_instances: 0,
            restore_pending: false,
        };
        let status = assess(BTreeMap::new(), 0.5, allowed_empty);
        assert_eq!(status.level, HealthLevel::Healthy);
    }

    #[test]
    fn pending_restore_is_critical_even_when_everything_answers() {
        let mut services = BTreeMap::new();
        services.insert("db".to_string(), svc(ProbeState::Healthy, true));
        let status = assess(
            services,
            0.5,
            FleetFacts {
                live_instances: 2,
                min_instances: 1,
                restore_pending: true,
            },
        );
        assert!(status.is_critical());
        assert_eq!(status.reasons, vec!["restore incomplete".to_string()]);
    }

    #[tokio::test]
    async fn probe_all_marks_unreachable_targets() {
        let targets = vec![
            ProbeTarget {
                name: "gone-1".to_string(),
                address: "127.0.0.1:1".to_string(),
                path: "/health".to_string(),
                core: false,
                timeout: Duration::from_millis(200),
            },
            ProbeTarget {
                name: "gone-2".to_string(),
                address: "127.0.0.1:1".to_string(),
                path: "/health".to_string(),
                core: true,
                timeout: Duration::from_millis(200),
            },
        ];
        let results = probe_all(&targets).await;
        assert_eq!(results.len(), 2);
        assert!(results.values().all(|h| h.state == ProbeState::Unhealthy));
        assert!(results["gone-2"].core);
    }

    #[tokio::test]
    async fn prober_uses_per_service_timeout() {
        let config = HealthConfig {
            services: vec![ServiceEndpoint {
                name: "db".to_string(),
                address: "127.0.0.1:1".to_string(),
                path: "/health".to_string(),
                core: true,
                timeout: Some(Duration::from_millis(300)),
            }],
            ..HealthConfig::default()
        };
        let prober = HealthProber::new(&config);
        assert_eq!(prober.services()[0].timeout, Duration::from_millis(300));

        let status = prober.probe(&[], facts(2)).await;
        assert_eq!(status.level, HealthLevel::Critical);
        assert_eq!(status.total_count(), 1);
    }
}
