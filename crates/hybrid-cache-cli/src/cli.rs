use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "hcache")]
#[command(about = "Hybrid cache CLI: inspect and exercise a two-tier cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./hybrid-cache.toml when present)
    #[arg(short, long, global = true, env = "HYBRID_CACHE_CONFIG")]
    pub config: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read a cached value
    Get(KeyArgs),
    /// Write a JSON value to both tiers
    Set(SetArgs),
    /// Delete a key from both tiers
    Remove(KeyArgs),
    /// Check whether a key is cached
    Exists(KeyArgs),
    /// Distributed lock operations
    Lock(LockArgs),
    /// Fire concurrent get-or-set calls at one key and report how many computed
    Stampede(StampedeArgs),
    /// Print the effective configuration
    Config,
}

#[derive(clap::Args, Debug)]
pub struct KeyArgs {
    /// Cache key (e.g. basket:u1)
    pub key: String,
}

#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Cache key (e.g. basket:u1)
    pub key: String,
    /// JSON value
    pub value: String,
    /// Time to live in seconds (defaults to the configured expiration)
    #[arg(long)]
    pub ttl_secs: Option<u64>,
    /// Serialize with other writers through the key's distributed lock
    #[arg(long)]
    pub lock: bool,
    /// Lock wait timeout in milliseconds
    #[arg(long, requires = "lock")]
    pub lock_timeout_ms: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct LockArgs {
    #[command(subcommand)]
    pub command: LockCommands,
}

#[derive(Subcommand, Debug)]
pub enum LockCommands {
    /// Acquire the lock guarding a cache key and hold it
    Hold(HoldArgs),
}

#[derive(clap::Args, Debug)]
pub struct HoldArgs {
    /// Cache key whose population lock to take
    pub key: String,
    /// How long to hold the lock, in seconds
    #[arg(long, default_value_t = 10)]
    pub secs: u64,
    /// Wait timeout (and lease) in milliseconds; defaults to the configured lock timeout
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct StampedeArgs {
    /// Cache key to populate
    pub key: String,
    /// Number of concurrent callers
    #[arg(long, default_value_t = 32)]
    pub callers: usize,
    /// Simulated computation time in milliseconds
    #[arg(long, default_value_t = 200)]
    pub compute_ms: u64,
    /// Disable the distributed lock to observe duplicate computation
    #[arg(long)]
    pub no_lock: bool,
    /// Remove the key before starting
    #[arg(long)]
    pub fresh: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_with_lock() {
        let cli = Cli::try_parse_from([
            "hcache",
            "set",
            "basket:u1",
            r#"{"items":["apple"]}"#,
            "--ttl-secs",
            "60",
            "--lock",
            "--lock-timeout-ms",
            "250",
        ])
        .unwrap();
        match cli.command {
            Commands::Set(args) => {
                assert_eq!(args.key, "basket:u1");
                assert_eq!(args.ttl_secs, Some(60));
                assert!(args.lock);
                assert_eq!(args.lock_timeout_ms, Some(250));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_lock_timeout_requires_lock_flag() {
        let result = Cli::try_parse_from([
            "hcache",
            "set",
            "basket:u1",
            "1",
            "--lock-timeout-ms",
            "250",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_lock_hold_defaults() {
        let cli = Cli::try_parse_from(["hcache", "lock", "hold", "basket:u1"]).unwrap();
        match cli.command {
            Commands::Lock(LockArgs {
                command: LockCommands::Hold(args),
            }) => {
                assert_eq!(args.key, "basket:u1");
                assert_eq!(args.secs, 10);
                assert_eq!(args.timeout_ms, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_stampede_with_global_config() {
        let cli = Cli::try_parse_from([
            "hcache",
            "stampede",
            "product:42",
            "--callers",
            "8",
            "--config",
            "cache.toml",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("cache.toml"));
        assert_eq!(cli.log_level, "warn");
        match cli.command {
            Commands::Stampede(args) => {
                assert_eq!(args.callers, 8);
                assert_eq!(args.compute_ms, 200);
                assert!(!args.no_lock);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
