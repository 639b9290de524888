//! Probe compaction
//!
//! Probes whose check definitions are identical are merged into one probe
//! that is executed once per cycle. The merged probe carries the deduplicated
//! union of the alerts of its sources and remembers their ids.
//!
//! Only probes with exactly one check take part: one non-chained request, or
//! one socket check. Chains and mixed check types are left alone.

use tracing::debug;

use crate::alerts::default_alerts;
use crate::config::{AlertConfig, ProbeConfig};

/// Separator of the ids in a joint probe id.
pub const JOINT_ID_SEPARATOR: &str = "|";

#[derive(Debug, Clone, PartialEq)]
pub struct CompactedProbe {
    pub config: ProbeConfig,

    /// Ids of the configured probes folded into this one, in order
    pub source_ids: Vec<String>,
}

pub fn is_candidate(probe: &ProbeConfig) -> bool {
    matches!(
        (probe.requests.len(), &probe.socket),
        (1, None) | (0, Some(_))
    )
}

/// The parts of a probe that decide what goes on the wire and how often.
///
/// Optional fields are compared after defaults were applied by
/// deserialisation, so an omitted field equals its explicit default.
fn check_definition(probe: &ProbeConfig) -> ProbeConfig {
    let mut definition = probe.clone();
    definition.id.clear();
    definition.name = None;
    definition.description = None;
    definition.alerts.clear();
    definition.last_event = None;
    for request in &mut definition.requests {
        request.alerts.clear();
    }
    definition
}

/// Whether two probes can be executed as one.
pub fn is_identical(a: &ProbeConfig, b: &ProbeConfig) -> bool {
    is_candidate(a) && is_candidate(b) && check_definition(a) == check_definition(b)
}

/// Every alert a probe observes, with the defaults for probes that have none.
fn effective_alerts(probe: &ProbeConfig) -> Vec<AlertConfig> {
    let alerts: Vec<AlertConfig> = probe
        .alerts
        .iter()
        .chain(probe.requests.iter().flat_map(|request| request.alerts.iter()))
        .cloned()
        .collect();

    if alerts.is_empty() {
        default_alerts()
    } else {
        alerts
    }
}

fn merge(group: &[&ProbeConfig]) -> Option<CompactedProbe> {
    let first = group.first()?;

    if group.len() == 1 {
        return Some(CompactedProbe {
            config: (*first).clone(),
            source_ids: vec![first.id.clone()],
        });
    }

    let mut source_ids: Vec<String> = Vec::new();
    for probe in group {
        if !source_ids.contains(&probe.id) {
            source_ids.push(probe.id.clone());
        }
    }

    let mut alerts: Vec<AlertConfig> = Vec::new();
    for alert in group.iter().flat_map(|probe| effective_alerts(probe)) {
        let stripped = alert.without_id();
        if !alerts.iter().any(|known| known.without_id() == stripped) {
            alerts.push(alert);
        }
    }

    let mut config = (*first).clone();
    config.id = source_ids.join(JOINT_ID_SEPARATOR);
    config.alerts = alerts;
    config.last_event = group.iter().find_map(|probe| probe.last_event.clone());
    for request in &mut config.requests {
        request.alerts.clear();
    }

    debug!("compacted {} probes into {}", group.len(), config.id);

    Some(CompactedProbe { config, source_ids })
}

/// Merge identical probes, keeping the order of first appearance.
pub fn compact(probes: &[ProbeConfig]) -> Vec<CompactedProbe> {
    let mut groups: Vec<Vec<&ProbeConfig>> = Vec::new();

    for probe in probes {
        let existing = groups
            .iter_mut()
            .find(|group| is_identical(group[0], probe));

        match existing {
            Some(group) => group.push(probe),
            None => groups.push(vec![probe]),
        }
    }

    groups.iter().filter_map(|group| merge(group)).collect()
}
