use anyhow::bail;
use clap::{ArgAction, Parser, ValueEnum};
use core::time::Duration;
use lull::{AutoCloseConfig, CoordinatorConfig, IdStrategy, PoolPolicy};

/// Where task ids come from.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSourceArg {
    /// A counter starting at 1.
    Sequential,
    /// Milliseconds since the Unix epoch, bumped to stay unique.
    Clock,
}

impl From<IdSourceArg> for IdStrategy {
    fn from(value: IdSourceArg) -> Self {
        match value {
            IdSourceArg::Sequential => Self::Sequential,
            IdSourceArg::Clock => Self::Clock,
        }
    }
}

/// Runtime configuration for the `lull-host` binary.
///
/// All values are parsed from CLI arguments or environment variables. The
/// defaults match a worker that closes itself after five idle minutes.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "lull-host",
    version,
    about = "Runs newline-delimited jobs from stdin on a self-closing worker"
)]
pub struct CliArgs {
    /// Idle period, in milliseconds, after which the worker closes itself.
    ///
    /// Environment variable: `LULL_IDLE_MS`
    #[arg(long, env = "LULL_IDLE_MS", default_value_t = 300_000)]
    pub idle_ms: u64,

    /// Whether the worker closes itself once idle.
    ///
    /// Environment variable: `LULL_AUTO_CLOSE`
    #[arg(long, env = "LULL_AUTO_CLOSE", default_value_t = true, action = ArgAction::Set)]
    pub auto_close: bool,

    /// Maximum number of jobs executing at once. `0` means unbounded.
    ///
    /// Environment variable: `LULL_MAX_CONCURRENCY`
    #[arg(long, env = "LULL_MAX_CONCURRENCY", default_value_t = 0)]
    pub max_concurrency: usize,

    /// How long shutdown waits, in milliseconds, for interrupted jobs to
    /// exit.
    ///
    /// Environment variable: `LULL_DRAIN_TIMEOUT_MS`
    #[arg(long, env = "LULL_DRAIN_TIMEOUT_MS", default_value_t = 3_000)]
    pub drain_timeout_ms: u64,

    /// Task id source.
    ///
    /// Environment variable: `LULL_ID_SOURCE`
    #[arg(long, env = "LULL_ID_SOURCE", value_enum, default_value_t = IdSourceArg::Sequential)]
    pub id_source: IdSourceArg,
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub coordinator: CoordinatorConfig,
}

impl TryFrom<CliArgs> for HostConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.auto_close && args.idle_ms == 0 {
            bail!("LULL_IDLE_MS must be greater than 0 while auto-close is enabled");
        }

        let pool = match args.max_concurrency {
            0 => PoolPolicy::Unbounded,
            n => PoolPolicy::Bounded(n),
        };

        let coordinator = CoordinatorConfig::default()
            .with_auto_close(AutoCloseConfig::new(
                args.auto_close,
                Duration::from_millis(args.idle_ms),
            ))
            .with_pool(pool)
            .with_drain_timeout(Duration::from_millis(args.drain_timeout_ms))
            .with_ids(args.id_source.into());
        coordinator.validate()?;

        Ok(Self { coordinator })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<HostConfig> {
        let args = CliArgs::try_parse_from(core::iter::once("lull-host").chain(args.iter().copied()))?;
        HostConfig::try_from(args)
    }

    #[test]
    fn flags_map_onto_the_coordinator_config() {
        let config = parse(&[
            "--idle-ms",
            "1500",
            "--max-concurrency",
            "4",
            "--drain-timeout-ms",
            "250",
            "--id-source",
            "clock",
        ])
        .unwrap()
        .coordinator;

        assert_eq!(
            config.auto_close,
            AutoCloseConfig::new(true, Duration::from_millis(1500))
        );
        assert_eq!(config.pool, PoolPolicy::Bounded(4));
        assert_eq!(config.drain_timeout, Duration::from_millis(250));
        assert_eq!(config.ids, IdStrategy::Clock);
    }

    #[test]
    fn zero_concurrency_means_unbounded() {
        let config = parse(&["--max-concurrency", "0"]).unwrap().coordinator;
        assert_eq!(config.pool, PoolPolicy::Unbounded);
    }

    #[test]
    fn zero_idle_is_rejected_only_while_auto_closing() {
        assert!(parse(&["--idle-ms", "0"]).is_err());
        let config = parse(&["--idle-ms", "0", "--auto-close", "false"])
            .unwrap()
            .coordinator;
        assert!(!config.auto_close.enabled);
    }
}
