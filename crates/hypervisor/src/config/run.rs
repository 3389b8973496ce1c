use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::domain::scheduler::SchedulingPolicy;
use crate::infrastructure::metrics::encoders::MetricsFormat;

#[derive(Parser, Clone, Debug)]
pub struct RunArgs {
    #[arg(
        long,
        env = "HYPERVISOR_CHASSIS_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to the chassis catalog, e.g. config/chassis.yaml"
    )]
    pub chassis_config: PathBuf,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Optional workload manifest of VMs to admit at boot"
    )]
    pub workload: Option<PathBuf>,

    #[arg(
        long,
        value_enum,
        help = "Scheduling policy; overrides the catalog, defaults to round-robin"
    )]
    pub policy: Option<SchedulingPolicy>,

    #[arg(long, default_value = "100", help = "Dispatch tick interval in milliseconds")]
    pub tick_interval_ms: u64,

    #[arg(long, help = "Stop after this many dispatch ticks")]
    pub max_ticks: Option<u64>,

    #[arg(long, help = "Enable metrics collection", default_value_t = false)]
    pub enable_metrics: bool,

    #[arg(
        long,
        default_value = "1000",
        help = "Metrics collection interval in milliseconds"
    )]
    pub metrics_interval_ms: u64,

    #[arg(
        long,
        env = "HYPERVISOR_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "logs/vm-metrics.log",
        help = "Path for printing chassis and VM metrics"
    )]
    pub metrics_file: PathBuf,

    #[arg(
        long,
        value_enum,
        env = "HYPERVISOR_METRICS_FORMAT",
        default_value_t = MetricsFormat::Influx,
        help = "Metrics format"
    )]
    pub metrics_format: MetricsFormat,

    #[arg(
        long,
        env = "HYPERVISOR_METRICS_EXTRA_LABELS",
        help = "Extra static tags added to every metric, as a JSON object"
    )]
    pub metrics_extra_labels: Option<String>,

    #[arg(
        long,
        env = "HYPERVISOR_NODE_NAME",
        default_value = "local",
        help = "Node name reported in metrics"
    )]
    pub node_name: String,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Snapshot file written on shutdown"
    )]
    pub snapshot_path: Option<PathBuf>,

    #[arg(
        long,
        requires = "snapshot_path",
        help = "Start from the snapshot at --snapshot-path instead of the catalog"
    )]
    pub restore: bool,
}

impl RunArgs {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1))
    }
}

#[derive(Parser, Clone, Debug)]
pub struct CheckArgs {
    #[arg(
        long,
        env = "HYPERVISOR_CHASSIS_CONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to the chassis catalog to validate"
    )]
    pub chassis_config: PathBuf,
}
