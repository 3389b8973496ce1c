use std::sync::Arc;

use anyhow::Result;

use crate::app::tasks::Tasks;
use crate::config::RunArgs;
use crate::domain::snapshot;
use crate::domain::Hypervisor;

/// Application core structure with explicit dependencies
pub struct Application {
    hypervisor: Arc<Hypervisor>,
    run_args: RunArgs,
}

impl Application {
    pub fn new(hypervisor: Arc<Hypervisor>, run_args: RunArgs) -> Self {
        Self {
            hypervisor,
            run_args,
        }
    }

    pub fn hypervisor(&self) -> &Arc<Hypervisor> {
        &self.hypervisor
    }

    pub fn run_args(&self) -> &RunArgs {
        &self.run_args
    }

    /// Starts all tasks and waits until they finish or a shutdown signal arrives.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }

    /// Writes the final snapshot when a snapshot path is configured.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down application...");

        if let Some(path) = &self.run_args.snapshot_path {
            let state = self.hypervisor.snapshot().await;
            snapshot::write_to(path, &state)
                .await
                .map_err(|report| anyhow::anyhow!("{report:?}"))?;
            tracing::info!(
                path = %path.display(),
                vms = state.vms.len(),
                "Snapshot written"
            );
        }

        tracing::info!("Application shutdown completed");
        Ok(())
    }
}
