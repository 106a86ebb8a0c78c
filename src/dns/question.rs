use serde::{Deserialize, Serialize};

use super::enums::{DNSResourceClass, DNSResourceType};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DNSQuestion {
    pub labels: Vec<String>,
    pub qtype: DNSResourceType,
    pub qclass: DNSResourceClass,
}

impl DNSQuestion {
    pub fn new(name: &str, qtype: DNSResourceType) -> Self {
        Self {
            labels: split_labels(name),
            qtype,
            qclass: DNSResourceClass::IN,
        }
    }

    /// Lower-case owner name without the trailing root label
    pub fn name(&self) -> String {
        join_labels(&self.labels)
    }
}

/// Split a presentation-format name into labels, dropping the root label
pub fn split_labels(name: &str) -> Vec<String> {
    name.trim_end_matches('.')
        .split('.')
        .filter(|label| !label.is_empty())
        .map(|label| label.to_string())
        .collect()
}

/// Join labels into a lower-case name; the root label (empty) is skipped
pub fn join_labels(labels: &[String]) -> String {
    labels
        .iter()
        .filter(|label| !label.is_empty())
        .map(|label| label.to_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}
