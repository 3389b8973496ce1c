//! Chassis catalog and workload manifest files
//!
//! Both are YAML documents with camelCase keys.
//!
//! ```yaml
//! policy: priority
//! chassis:
//!   - name: small
//!     resources: { slots: 2, energy: 100, memory: 1024 }
//!     overheadFraction: 0.0
//! ```

use std::error::Error;
use std::path::Path;

use api_types::{ChassisRegistration, CreateVmRequest};
use derive_more::Display;
use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};

use crate::domain::chassis::ChassisProfile;
use crate::domain::scheduler::SchedulingPolicy;

#[derive(Debug, Display)]
pub enum ConfigError {
    #[display("Failed to read config file: {path}")]
    Read { path: String },
    #[display("Failed to parse config file: {path}")]
    Parse { path: String },
    #[display("Invalid chassis catalog: {message}")]
    InvalidCatalog { message: String },
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChassisCatalog {
    /// Default policy, overridable on the command line
    #[serde(default)]
    pub policy: Option<SchedulingPolicy>,
    pub chassis: Vec<ChassisRegistration>,
}

impl ChassisCatalog {
    /// Checks every entry and returns the resulting profiles.
    pub fn profiles(&self) -> Result<Vec<ChassisProfile>, Report<ConfigError>> {
        if self.chassis.is_empty() {
            return Err(Report::new(ConfigError::InvalidCatalog {
                message: "no chassis defined".to_string(),
            }));
        }

        let mut profiles: Vec<ChassisProfile> = Vec::with_capacity(self.chassis.len());
        for registration in &self.chassis {
            if profiles.iter().any(|p| p.name() == registration.name) {
                return Err(Report::new(ConfigError::InvalidCatalog {
                    message: format!("chassis {} defined twice", registration.name),
                }));
            }
            let profile = ChassisProfile::from_registration(registration).change_context(
                ConfigError::InvalidCatalog {
                    message: format!("chassis {}", registration.name),
                },
            )?;
            profiles.push(profile);
        }
        Ok(profiles)
    }
}

/// One VM to admit at boot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEntry {
    #[serde(flatten)]
    pub request: CreateVmRequest,
    /// Start the VM right after admission
    #[serde(default = "default_start")]
    pub start: bool,
}

fn default_start() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadManifest {
    #[serde(default)]
    pub vms: Vec<WorkloadEntry>,
}

async fn load_yaml<T>(path: &Path) -> Result<T, Report<ConfigError>>
where
    T: for<'de> Deserialize<'de>,
{
    let content = tokio::fs::read_to_string(path)
        .await
        .change_context_lazy(|| ConfigError::Read {
            path: path.display().to_string(),
        })?;
    serde_yaml::from_str(&content).change_context_lazy(|| ConfigError::Parse {
        path: path.display().to_string(),
    })
}

pub async fn load_catalog(path: &Path) -> Result<ChassisCatalog, Report<ConfigError>> {
    tracing::info!("Loading chassis catalog from {:?}", path);
    let catalog: ChassisCatalog = load_yaml(path).await?;
    catalog
        .profiles()
        .attach_printable_lazy(|| format!("catalog file: {}", path.display()))?;
    tracing::info!("Loaded {} chassis definitions", catalog.chassis.len());
    Ok(catalog)
}

pub async fn load_workload(path: &Path) -> Result<WorkloadManifest, Report<ConfigError>> {
    tracing::info!("Loading workload manifest from {:?}", path);
    let manifest: WorkloadManifest = load_yaml(path).await?;
    tracing::info!("Loaded {} workload entries", manifest.vms.len());
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const CATALOG: &str = r#"
policy: priority
chassis:
  - name: small
    resources: { slots: 2, energy: 100, memory: 1024 }
  - name: large
    resources: { ribosomes: 10, atp: 100 }
    overheadFraction: 0.2
    healthy: false
"#;

    const WORKLOAD: &str = r#"
vms:
  - vmId: a
    chassis: small
    resources: { slots: 1, energy: 50, memory: 512 }
    priority: 5
  - vmId: b
    chassis: large
    resources: { slots: 2 }
    start: false
"#;

    #[tokio::test]
    async fn test_load_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chassis.yaml");
        std::fs::write(&path, CATALOG).unwrap();

        let catalog = load_catalog(&path).await.unwrap();
        assert_eq!(catalog.policy, Some(SchedulingPolicy::Priority));
        assert_eq!(catalog.chassis.len(), 2);
        assert_eq!(catalog.chassis[0].overhead_fraction, 0.0);
        assert!(catalog.chassis[0].healthy);
        assert!(!catalog.chassis[1].healthy);

        let profiles = catalog.profiles().unwrap();
        assert_eq!(profiles[1].dispatch_width(), 8);
    }

    #[tokio::test]
    async fn test_load_workload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workload.yaml");
        std::fs::write(&path, WORKLOAD).unwrap();

        let manifest = load_workload(&path).await.unwrap();
        assert_eq!(manifest.vms.len(), 2);
        assert_eq!(
            manifest.vms[0].request,
            CreateVmRequest::new("a", "small")
                .with_resource("slots", 1.0)
                .with_resource("energy", 50.0)
                .with_resource("memory", 512.0)
                .with_priority(5)
        );
        assert!(manifest.vms[0].start);
        assert!(!manifest.vms[1].start);
        assert_eq!(manifest.vms[1].request.priority, 0);
    }

    #[tokio::test]
    async fn test_invalid_catalogs() {
        let dir = tempfile::tempdir().unwrap();

        let missing = load_catalog(&dir.path().join("missing.yaml")).await.unwrap_err();
        assert!(matches!(missing.current_context(), ConfigError::Read { .. }));

        let malformed = dir.path().join("malformed.yaml");
        std::fs::write(&malformed, "chassis: [").unwrap();
        let err = load_catalog(&malformed).await.unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Parse { .. }));

        let overhead = dir.path().join("overhead.yaml");
        std::fs::write(
            &overhead,
            "chassis:\n  - name: x\n    resources: { slots: 1 }\n    overheadFraction: 1.0\n",
        )
        .unwrap();
        let err = load_catalog(&overhead).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::InvalidCatalog { .. }
        ));

        let twice = ChassisCatalog {
            policy: None,
            chassis: vec![
                ChassisRegistration::new("x", 0.0).with_resource("slots", 1.0),
                ChassisRegistration::new("x", 0.0).with_resource("slots", 2.0),
            ],
        };
        assert!(twice.profiles().is_err());
    }
}
