use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;
use crate::infrastructure::metrics;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Starts the dispatch loop and, if enabled, the metrics loop.
    pub fn spawn_all_tasks(&mut self, app: &Application) {
        let dispatch_task = self.spawn_dispatch_task(app);
        self.tasks.push(dispatch_task);

        if app.run_args().enable_metrics {
            let metrics_task = self.spawn_metrics_task(app);
            self.tasks.push(metrics_task);
        }
    }

    /// Waits for a shutdown signal or for any task to finish, then stops the rest.
    ///
    /// The dispatch loop finishing on its tick limit counts as a normal shutdown.
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                        return;
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        if self.tasks.is_empty() {
            return Ok(());
        }

        let finished = tokio::select! {
            _ = signal_handler => None,
            (result, index, _remaining) = futures::future::select_all(self.tasks.iter_mut()) => {
                Some((result, index))
            }
        };

        match finished {
            None => tracing::info!("Shutdown signal received, cancelling all tasks"),
            Some((result, index)) => {
                self.tasks.remove(index);
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    self.cancellation_token.cancel();
                    self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
                    return Err(e.into());
                }
                tracing::info!("Task completed, stopping remaining tasks");
            }
        }

        self.cancellation_token.cancel();
        self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_dispatch_task(&self, app: &Application) -> JoinHandle<()> {
        let hypervisor = app.hypervisor().clone();
        let interval = app.run_args().tick_interval();
        let max_ticks = app.run_args().max_ticks;
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting dispatch task");
            let ticks = hypervisor.run_ticks(interval, max_ticks, token).await;
            tracing::info!(ticks = ticks, "Dispatch task completed");
        })
    }

    fn spawn_metrics_task(&self, app: &Application) -> JoinHandle<()> {
        let args = app.run_args();
        let hypervisor = app.hypervisor().clone();
        let interval = args.metrics_interval();
        let node_name = args.node_name.clone();
        let metrics_format = args.metrics_format;
        let metrics_extra_labels = args.metrics_extra_labels.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting metrics collection task");
            metrics::run_metrics(
                hypervisor,
                interval,
                &node_name,
                metrics_format,
                metrics_extra_labels.as_deref(),
                token,
            )
            .await;
            tracing::info!("Metrics collection task completed");
        })
    }
}
