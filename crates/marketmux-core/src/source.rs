use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Opaque provider identifier declared in configuration.
///
/// Ids are stable, internal routing keys. They must never surface in
/// user-visible payloads; the news pipeline attributes sources by publisher
/// label instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Display metadata for a registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: ProviderId,
    pub name: String,
    pub version: String,
}

impl ProviderInfo {
    pub fn new(
        id: impl Into<ProviderId>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_round_trips_through_serde() {
        let id = ProviderId::new("yahoo-primary");
        let json = serde_json::to_string(&id).expect("id serializes");
        assert_eq!(json, "\"yahoo-primary\"");

        let back: ProviderId = serde_json::from_str(&json).expect("id deserializes");
        assert_eq!(back, id);
    }

    #[test]
    fn blank_ids_are_flagged_empty() {
        assert!(ProviderId::new("   ").is_empty());
        assert!(!ProviderId::new("p1").is_empty());
    }
}
