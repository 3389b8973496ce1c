use std::sync::Arc;

use anyhow::Result;

use crate::app::core::Application;
use crate::config::{load_catalog, load_workload, RunArgs, WorkloadManifest};
use crate::domain::snapshot;
use crate::domain::Hypervisor;

/// Application builder
pub struct ApplicationBuilder {
    run_args: RunArgs,
}

impl ApplicationBuilder {
    pub fn new(run_args: RunArgs) -> Self {
        Self { run_args }
    }

    /// Builds the orchestrator from a snapshot or from the chassis catalog, then
    /// admits the workload manifest if one is given.
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let hypervisor = match (&self.run_args.snapshot_path, self.run_args.restore) {
            (Some(path), true) => {
                let state = snapshot::read_from(path)
                    .await
                    .map_err(|report| anyhow::anyhow!("{report:?}"))?;
                let hypervisor = Hypervisor::restore(&state).await?;
                tracing::info!(
                    path = %path.display(),
                    policy = %hypervisor.policy(),
                    "Restored hypervisor from snapshot"
                );
                hypervisor
            }
            _ => self.create_from_catalog().await?,
        };

        if let Some(path) = &self.run_args.workload {
            let manifest = load_workload(path)
                .await
                .map_err(|report| anyhow::anyhow!("{report:?}"))?;
            admit_workload(&hypervisor, &manifest).await;
        }

        Ok(Application::new(Arc::new(hypervisor), self.run_args))
    }

    async fn create_from_catalog(&self) -> Result<Hypervisor> {
        let catalog = load_catalog(&self.run_args.chassis_config)
            .await
            .map_err(|report| anyhow::anyhow!("{report:?}"))?;
        let policy = self
            .run_args
            .policy
            .or(catalog.policy)
            .unwrap_or_default();

        let hypervisor = Hypervisor::new(policy);
        for registration in &catalog.chassis {
            hypervisor.register_chassis(registration)?;
        }
        tracing::info!(
            policy = %policy,
            chassis = catalog.chassis.len(),
            "Hypervisor created"
        );
        Ok(hypervisor)
    }
}

/// Admits and optionally starts every manifest entry.
///
/// A refused entry is logged and skipped; admission never retries.
pub async fn admit_workload(hypervisor: &Hypervisor, manifest: &WorkloadManifest) -> usize {
    let mut admitted = 0;
    for entry in &manifest.vms {
        let vm_id = &entry.request.vm_id;
        if let Err(e) = hypervisor.create_vm(&entry.request).await {
            tracing::warn!(vm_id = %vm_id, error = %e, "Workload entry refused");
            continue;
        }
        admitted += 1;
        if entry.start {
            if let Err(e) = hypervisor.start_vm(vm_id).await {
                tracing::warn!(vm_id = %vm_id, error = %e, "Failed to start workload entry");
            }
        }
    }
    tracing::info!(
        admitted = admitted,
        total = manifest.vms.len(),
        "Workload admitted"
    );
    admitted
}

#[cfg(test)]
mod tests {
    use api_types::{ChassisRegistration, CreateVmRequest, VmState};

    use super::*;
    use crate::config::WorkloadEntry;
    use crate::domain::scheduler::SchedulingPolicy;

    #[test_log::test(tokio::test)]
    async fn test_admit_workload_skips_refused_entries() {
        let hypervisor = Hypervisor::new(SchedulingPolicy::RoundRobin);
        hypervisor
            .register_chassis(&ChassisRegistration::new("small", 0.0).with_resource("slots", 2.0))
            .unwrap();

        let manifest = WorkloadManifest {
            vms: vec![
                WorkloadEntry {
                    request: CreateVmRequest::new("a", "small").with_resource("slots", 1.0),
                    start: true,
                },
                WorkloadEntry {
                    request: CreateVmRequest::new("b", "small").with_resource("slots", 2.0),
                    start: true,
                },
                WorkloadEntry {
                    request: CreateVmRequest::new("c", "small").with_resource("slots", 1.0),
                    start: false,
                },
            ],
        };

        assert_eq!(admit_workload(&hypervisor, &manifest).await, 2);
        assert_eq!(hypervisor.status("a").unwrap().state, VmState::Running);
        assert!(hypervisor.status("b").is_err());
        assert_eq!(hypervisor.status("c").unwrap().state, VmState::Created);
    }

    #[tokio::test]
    async fn test_build_from_catalog_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("chassis.yaml");
        std::fs::write(
            &catalog,
            "policy: priority\nchassis:\n  - name: small\n    resources: { slots: 2 }\n",
        )
        .unwrap();
        let workload = dir.path().join("workload.yaml");
        std::fs::write(
            &workload,
            "vms:\n  - vmId: a\n    chassis: small\n    resources: { slots: 1 }\n",
        )
        .unwrap();
        let snapshot_path = dir.path().join("state.json");

        let args = RunArgs {
            chassis_config: catalog,
            workload: Some(workload),
            policy: None,
            tick_interval_ms: 10,
            max_ticks: Some(1),
            enable_metrics: false,
            metrics_interval_ms: 1000,
            metrics_file: dir.path().join("metrics.log"),
            metrics_format: Default::default(),
            metrics_extra_labels: None,
            node_name: "bench-1".to_string(),
            snapshot_path: Some(snapshot_path.clone()),
            restore: false,
        };

        let app = ApplicationBuilder::new(args.clone()).build().await.unwrap();
        assert_eq!(app.hypervisor().policy(), SchedulingPolicy::Priority);
        assert_eq!(app.hypervisor().status("a").unwrap().state, VmState::Running);
        app.shutdown().await.unwrap();
        assert!(snapshot_path.exists());

        let restored = ApplicationBuilder::new(RunArgs {
            workload: None,
            restore: true,
            ..args
        })
        .build()
        .await
        .unwrap();
        assert_eq!(
            restored.hypervisor().status("a").unwrap(),
            app.hypervisor().status("a").unwrap()
        );
    }
}
