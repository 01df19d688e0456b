//! Capability discovery for devices without a schema query.
//!
//! Discovery runs in two explicit phases:
//!
//! 1. **Candidate generation**: a minimal default list merged with an extended list
//!    of plausible parameter names ([`merge_candidates`]).
//! 2. **Probe**: every candidate is read once through the [`Session`] contract.
//!
//! Probe outcomes are classified as follows:
//!
//! | Outcome                        | Effect                                          |
//! |--------------------------------|-------------------------------------------------|
//! | value returned                 | recorded as supported                           |
//! | `DeviceError::UnknownParameter`| recorded as unsupported                         |
//! | `DeviceError::Transport`       | discovery fails with `DiscoveryAborted`         |
//! | `DeviceError::Rejected`        | recorded as unsupported, reason kept in         |
//! |                                | [`CapabilitySnapshot::refused`]                 |
//!
//! A dead link therefore never looks like a small capability set, and one
//! access-restricted parameter does not hide the ones after it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{DriverError, Result};
use crate::session::{DeviceError, Session};

/// How a capability list was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    /// Probed on the device.
    Dynamic,
    /// Taken from a static list without probing.
    Predefined,
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryMethod::Dynamic => f.write_str("dynamic"),
            DiscoveryMethod::Predefined => f.write_str("predefined"),
        }
    }
}

/// Parameter name to "supported" flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    entries: BTreeMap<String, bool>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: impl Into<String>, supported: bool) {
        self.entries.insert(name.into(), supported);
    }

    /// `None` if the name was never probed.
    pub fn is_supported(&self, name: &str) -> Option<bool> {
        self.entries.get(name).copied()
    }

    /// Supported names, sorted lexicographically.
    pub fn supported(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, ok)| **ok)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn unsupported(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of names probed.
    pub fn probed(&self) -> usize {
        self.entries.len()
    }
}

/// A parameter the device refused to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Refusal {
    pub parameter: String,
    pub reason: String,
}

/// Result of a discovery run.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySnapshot {
    pub capabilities: CapabilitySet,
    pub method: DiscoveryMethod,
    /// Number of supported parameters.
    pub count: usize,
    pub timestamp: DateTime<Utc>,
    /// Refused parameters in probe order. They also count as unsupported.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub refused: Vec<Refusal>,
}

impl CapabilitySnapshot {
    fn new(
        capabilities: CapabilitySet,
        method: DiscoveryMethod,
        refused: Vec<Refusal>,
    ) -> Self {
        let count = capabilities.supported().len();
        Self {
            capabilities,
            method,
            count,
            timestamp: Utc::now(),
            refused,
        }
    }

    /// Supported names, sorted.
    pub fn supported(&self) -> Vec<String> {
        self.capabilities.supported()
    }

    /// True if no parameter was refused.
    pub fn is_complete(&self) -> bool {
        self.refused.is_empty()
    }
}

/// Merge two candidate lists, dropping duplicates, sorted.
pub fn merge_candidates<S: AsRef<str>>(default: &[S], extended: &[S]) -> Vec<String> {
    default
        .iter()
        .chain(extended.iter())
        .map(|s| s.as_ref().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Probes a candidate list against a session.
#[derive(Debug, Clone)]
pub struct CapabilityDiscovery {
    candidates: Vec<String>,
}

impl CapabilityDiscovery {
    /// Probe `candidates` in the given order.
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    /// Probe the merge of a default and an extended list.
    pub fn from_lists<S: AsRef<str>>(default: &[S], extended: &[S]) -> Self {
        Self {
            candidates: merge_candidates(default, extended),
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Probe every candidate once.
    ///
    /// Fails with [`DriverError::DiscoveryAborted`] on the first transport failure.
    pub fn discover<S: Session + ?Sized>(&self, session: &mut S) -> Result<CapabilitySnapshot> {
        let mut capabilities = CapabilitySet::new();
        let mut refused = Vec::new();

        for name in &self.candidates {
            match session.get(name) {
                Ok(_) => capabilities.record(name.as_str(), true),
                Err(DeviceError::UnknownParameter { .. }) => {
                    capabilities.record(name.as_str(), false)
                }
                Err(DeviceError::Transport(source)) => {
                    return Err(DriverError::DiscoveryAborted {
                        parameter: name.clone(),
                        source,
                    });
                }
                Err(DeviceError::Rejected { reason, .. }) => {
                    warn!(
                        parameter = %name,
                        reason = %reason,
                        "Parameter refused during discovery, skipping"
                    );
                    capabilities.record(name.as_str(), false);
                    refused.push(Refusal {
                        parameter: name.clone(),
                        reason,
                    });
                }
            }
        }

        let snapshot = CapabilitySnapshot::new(capabilities, DiscoveryMethod::Dynamic, refused);
        info!(
            available = snapshot.count,
            tested = snapshot.capabilities.probed(),
            candidates = self.candidates.len(),
            "Parameter discovery finished"
        );
        Ok(snapshot)
    }

    /// Snapshot of a static list, every entry assumed supported. No I/O.
    pub fn predefined<I, S>(names: I) -> CapabilitySnapshot
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut capabilities = CapabilitySet::new();
        for name in names {
            capabilities.record(name, true);
        }
        CapabilitySnapshot::new(capabilities, DiscoveryMethod::Predefined, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MockSession;
    use tracing_test::traced_test;

    #[test]
    fn test_merge_candidates() {
        let merged = merge_candidates(&["emission", "laser1:type"], &["fw:version", "emission"]);
        assert_eq!(merged, vec!["emission", "fw:version", "laser1:type"]);
    }

    #[test]
    #[traced_test]
    fn test_refused_parameter_is_skipped() {
        let mut session = MockSession::new()
            .with_param("a", 1)
            .with_rejected("b", "access denied")
            .with_param("c", 3)
            .with_param("d", 4);
        let snapshot = CapabilityDiscovery::new(["a", "b", "c", "d"])
            .discover(&mut session)
            .unwrap();
        assert_eq!(snapshot.supported(), vec!["a", "c", "d"]);
        assert_eq!(snapshot.capabilities.probed(), 4);
        assert_eq!(session.get_count(), 4);
        assert_eq!(snapshot.capabilities.is_supported("b"), Some(false));
        assert_eq!(snapshot.method, DiscoveryMethod::Dynamic);
        assert_eq!(
            snapshot.refused,
            vec![Refusal {
                parameter: "b".into(),
                reason: "access denied".into()
            }]
        );
        assert!(!snapshot.is_complete());
        assert!(logs_contain("Parameter refused during discovery"));
    }

    #[test]
    fn test_predefined_snapshot() {
        let snapshot = CapabilityDiscovery::predefined(["laser1:type", "emission"]);
        assert_eq!(snapshot.method, DiscoveryMethod::Predefined);
        assert_eq!(snapshot.count, 2);
        assert!(snapshot.is_complete());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["method"], "predefined");
        assert_eq!(json["capabilities"]["emission"], true);
    }
}
