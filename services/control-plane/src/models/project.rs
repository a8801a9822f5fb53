//! Projects, their backend configurations and offer filters.

use serde::{Deserialize, Serialize};
use stratus_id::ProjectId;
use stratus_resources::{BackendType, InstanceOffer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    pub ssh_public_key: String,
    pub ssh_private_key: String,
}

impl ProjectRecord {
    pub fn ssh_keys(&self) -> SshKeys {
        SshKeys {
            public: self.ssh_public_key.clone(),
            private: self.ssh_private_key.clone(),
        }
    }
}

/// Key pair injected into provisioned instances.
#[derive(Clone, PartialEq)]
pub struct SshKeys {
    pub public: String,
    pub private: String,
}

impl std::fmt::Debug for SshKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshKeys")
            .field("public", &self.public)
            .field("private", &"<redacted>")
            .finish()
    }
}

/// Stored configuration of one backend enabled in a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub project_id: ProjectId,
    pub backend_type: BackendType,
    /// Provider-specific settings and credentials.
    pub config: serde_json::Value,
}

/// Profile-level restrictions on which offers may be used.
///
/// `None` means "no restriction"; an empty list allows nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferFilter {
    #[serde(default)]
    pub backends: Option<Vec<BackendType>>,
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    #[serde(default)]
    pub instance_types: Option<Vec<String>>,
}

impl OfferFilter {
    pub fn allows_backend(&self, backend: BackendType) -> bool {
        self.backends
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&backend))
    }

    pub fn allows(&self, offer: &InstanceOffer) -> bool {
        self.allows_backend(offer.backend)
            && self
                .regions
                .as_ref()
                .is_none_or(|regions| regions.iter().any(|r| r == &offer.region))
            && self.instance_types.as_ref().is_none_or(|types| {
                types
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&offer.instance.name))
            })
    }

    /// Filter allowing only what both `self` and `other` allow.
    pub fn intersect(&self, other: &OfferFilter) -> OfferFilter {
        OfferFilter {
            backends: both(&self.backends, &other.backends),
            regions: both(&self.regions, &other.regions),
            instance_types: both(&self.instance_types, &other.instance_types),
        }
    }
}

fn both<T: Clone + PartialEq>(a: &Option<Vec<T>>, b: &Option<Vec<T>>) -> Option<Vec<T>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.iter().filter(|x| b.contains(x)).cloned().collect()),
        (a, b) => a.clone().or_else(|| b.clone()),
    }
}
