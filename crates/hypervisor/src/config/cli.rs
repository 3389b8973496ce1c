use clap::{Parser, Subcommand};
use utils::version;

use crate::config::run::{CheckArgs, RunArgs};

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the hypervisor: admit a workload and dispatch it until shutdown
    Run(Box<RunArgs>),
    /// Validate a chassis catalog and print effective capacities
    Check(CheckArgs),
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::domain::scheduler::SchedulingPolicy;
    use crate::infrastructure::metrics::encoders::MetricsFormat;

    #[test]
    fn parse_run_with_defaults() {
        let cli = Cli::try_parse_from([
            "hypervisor",
            "run",
            "--chassis-config",
            "chassis.yaml",
            "--node-name",
            "bench-1",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.chassis_config, PathBuf::from("chassis.yaml"));
        assert_eq!(args.tick_interval_ms, 100);
        assert_eq!(args.policy, None);
        assert_eq!(args.max_ticks, None);
        assert!(!args.enable_metrics);
        assert_eq!(args.metrics_format, MetricsFormat::Influx);
        assert!(args.snapshot_path.is_none());
        assert!(!args.restore);
        assert_eq!(args.policy.unwrap_or_default(), SchedulingPolicy::RoundRobin);
    }

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "hypervisor",
            "run",
            "--chassis-config",
            "chassis.yaml",
            "--node-name",
            "bench-1",
            "--policy",
            "priority",
            "--max-ticks",
            "5",
            "--enable-metrics",
            "--metrics-format",
            "json",
            "--snapshot-path",
            "state.json",
            "--restore",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.policy, Some(SchedulingPolicy::Priority));
        assert_eq!(args.max_ticks, Some(5));
        assert!(args.enable_metrics);
        assert_eq!(args.metrics_format, MetricsFormat::Json);
        assert_eq!(args.snapshot_path, Some(PathBuf::from("state.json")));
        assert!(args.restore);
    }

    #[test]
    fn parse_check() {
        let cli = Cli::try_parse_from(["hypervisor", "check", "--chassis-config", "c.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Check(_)));
    }

    #[test]
    fn reject_unknown_policy() {
        assert!(Cli::try_parse_from([
            "hypervisor",
            "run",
            "--chassis-config",
            "c.yaml",
            "--node-name",
            "n",
            "--policy",
            "lottery",
        ])
        .is_err());
    }
}
