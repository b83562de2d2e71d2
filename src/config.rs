//! Configuration.
//!
//! This module contains the type [`Config`] that holds all configuration
//! consumed by the HTTP server. The node’s argument parser hands its
//! matches to [`Config::from_arg_matches`]; everything not given on the
//! command line falls back to the defaults below.

use std::path::PathBuf;
use std::time::Duration;
use clap::{ArgAction, ArgMatches, Args, Command, FromArgMatches};
use log::LevelFilter;
#[cfg(unix)] use syslog::Facility;
use crate::error::Failed;


//------------ Defaults for Some Values --------------------------------------

/// The default port the HTTP server listens on.
///
/// Deployments normally take this from the active chain’s parameters; the
/// constant here is the main network port.
pub const DEFAULT_RPC_PORT: u16 = 8332;

/// The default number of worker threads serving requests.
pub const DEFAULT_RPC_THREADS: usize = 4;

/// The default depth of the request work queue.
pub const DEFAULT_RPC_WORK_QUEUE: usize = 16;

/// The default idle timeout for HTTP connections.
pub const DEFAULT_RPC_SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// The default for the excessive block size in bytes.
///
/// The maximum accepted request body scales with this value so RPC keeps
/// working for blocks of any configured size.
pub const DEFAULT_EXCESSIVE_BLOCK_SIZE: u64 = 32_000_000;

/// The default syslog facility.
#[cfg(unix)]
const DEFAULT_SYSLOG_FACILITY: Facility = Facility::LOG_DAEMON;


//------------ Config --------------------------------------------------------

/// The configuration of the HTTP server.
///
/// All values are public and can be accessed directly. The two functions
/// [`config_args`][Self::config_args] and
/// [`from_arg_matches`][Self::from_arg_matches] wire the type into a clap
/// command.
#[derive(Clone, Debug)]
pub struct Config {
    /// The port to listen on when no explicit endpoints are given.
    pub rpc_port: u16,

    /// Endpoints to listen on as `host[:port]` strings.
    ///
    /// An empty list means the option was not given and the server binds
    /// the loopback addresses only. The list is honored only together with
    /// a non-empty [`rpc_allow_ip`][Self::rpc_allow_ip].
    pub rpc_bind: Vec<String>,

    /// Source addresses allowed to use the server.
    ///
    /// Each entry is a single IP address or a subnet in CIDR or netmask
    /// notation. The loopback networks are always allowed in addition.
    pub rpc_allow_ip: Vec<String>,

    /// The number of worker threads serving requests.
    pub rpc_threads: usize,

    /// The maximum number of requests waiting for a worker thread.
    pub rpc_work_queue: usize,

    /// How long an idle HTTP connection is kept open.
    pub rpc_server_timeout: Duration,

    /// The excessive block size in bytes.
    pub excessive_block_size: u64,

    /// The log levels to be logged.
    pub log_level: LevelFilter,

    /// The target to log to.
    pub log_target: LogTarget,
}

impl Config {
    /// Adds the configuration arguments to a clap command.
    ///
    /// Returns the command with the arguments added.
    pub fn config_args(app: Command) -> Command {
        GlobalArgs::augment_args(app)
    }

    /// Creates a configuration from command line matches.
    pub fn from_arg_matches(
        matches: &ArgMatches,
    ) -> Result<Self, Failed> {
        let mut res = Self::default();
        res.apply_arg_matches(matches)?;
        Ok(res)
    }

    /// Applies the command line arguments to the configuration.
    fn apply_arg_matches(
        &mut self,
        matches: &ArgMatches,
    ) -> Result<(), Failed> {
        let args = GlobalArgs::from_arg_matches(
            matches
        ).expect("bug in command line arguments parser");

        // log_target
        self.apply_log_matches(&args)?;

        // rpc_port
        if let Some(port) = args.rpcport {
            self.rpc_port = port
        }

        // rpc_bind
        if let Some(list) = args.rpcbind {
            self.rpc_bind = list
        }

        // rpc_allow_ip
        if let Some(list) = args.rpcallowip {
            self.rpc_allow_ip = list
        }

        // rpc_threads
        if let Some(value) = args.rpcthreads {
            self.rpc_threads = value
        }

        // rpc_work_queue
        if let Some(value) = args.rpcworkqueue {
            self.rpc_work_queue = value
        }

        // rpc_server_timeout
        if let Some(value) = args.rpcservertimeout {
            self.rpc_server_timeout = Duration::from_secs(value)
        }

        // excessive_block_size
        if let Some(value) = args.excessiveblocksize {
            self.excessive_block_size = value
        }

        // log_level
        if args.verbose > 2 {
            self.log_level = LevelFilter::Trace
        }
        else if args.verbose == 2 {
            self.log_level = LevelFilter::Debug
        }
        else if args.verbose == 1 {
            self.log_level = LevelFilter::Info
        }
        else if args.quiet > 1 {
            self.log_level = LevelFilter::Off
        }
        else if args.quiet == 1 {
            self.log_level = LevelFilter::Error
        }

        Ok(())
    }

    /// Applies the logging-specific command line arguments to the config.
    ///
    /// This is the Unix version that also considers syslog as a valid
    /// target.
    #[cfg(unix)]
    fn apply_log_matches(
        &mut self,
        args: &GlobalArgs,
    ) -> Result<(), Failed> {
        use std::str::FromStr;
        use log::error;

        if args.syslog {
            let facility = match args.syslog_facility.as_ref() {
                Some(facility) => {
                    match Facility::from_str(facility) {
                        Ok(value) => value,
                        Err(_) => {
                            error!("Invalid value for syslog-facility.");
                            return Err(Failed);
                        }
                    }
                }
                None => DEFAULT_SYSLOG_FACILITY
            };
            self.log_target = LogTarget::Syslog(facility)
        }
        else if let Some(file) = args.logfile.as_ref() {
            if file.as_os_str() == "-" {
                self.log_target = LogTarget::Stderr
            }
            else {
                self.log_target = LogTarget::File(file.clone())
            }
        }
        Ok(())
    }

    /// Applies the logging-specific command line arguments to the config.
    ///
    /// This is the non-Unix version that does not use syslog.
    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn apply_log_matches(
        &mut self,
        args: &GlobalArgs,
    ) -> Result<(), Failed> {
        if let Some(file) = args.logfile.as_ref() {
            if file.as_os_str() == "-" {
                self.log_target = LogTarget::Stderr
            }
            else {
                self.log_target = LogTarget::File(file.clone())
            }
        }
        Ok(())
    }
}


//--- Default

impl Default for Config {
    fn default() -> Self {
        Config {
            rpc_port: DEFAULT_RPC_PORT,
            rpc_bind: Vec::new(),
            rpc_allow_ip: Vec::new(),
            rpc_threads: DEFAULT_RPC_THREADS,
            rpc_work_queue: DEFAULT_RPC_WORK_QUEUE,
            rpc_server_timeout: DEFAULT_RPC_SERVER_TIMEOUT,
            excessive_block_size: DEFAULT_EXCESSIVE_BLOCK_SIZE,
            log_level: LevelFilter::Warn,
            log_target: LogTarget::default(),
        }
    }
}


//------------ LogTarget -----------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Default)]
pub enum LogTarget {
    /// Syslog.
    #[cfg(unix)]
    Syslog(Facility),

    /// Stderr.
    #[default]
    Stderr,

    /// A file.
    File(PathBuf),
}


//------------ GlobalArgs ----------------------------------------------------

/// The command line arguments for the HTTP server configuration.
#[derive(Args)]
struct GlobalArgs {
    /// Listen for HTTP connections on this port
    #[arg(long, value_name = "PORT")]
    rpcport: Option<u16>,

    /// Bind to the given address (ignored without --rpcallowip)
    #[arg(long, value_name = "ADDR[:PORT]")]
    rpcbind: Option<Vec<String>>,

    /// Allow HTTP connections from the given source
    #[arg(long, value_name = "IP[/NETMASK]")]
    rpcallowip: Option<Vec<String>>,

    /// Number of threads serving HTTP requests
    #[arg(long, value_name = "COUNT")]
    rpcthreads: Option<usize>,

    /// Maximum depth of the HTTP work queue
    #[arg(long, value_name = "COUNT")]
    rpcworkqueue: Option<usize>,

    /// Idle timeout for HTTP connections in seconds
    #[arg(long, value_name = "SECONDS")]
    rpcservertimeout: Option<u64>,

    /// The excessive block size in bytes
    #[arg(long, value_name = "BYTES")]
    excessiveblocksize: Option<u64>,

    /// Log more information, twice or thrice for even more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Log less information, twice for no information
    #[arg(short, long, action = ArgAction::Count)]
    quiet: u8,

    /// Log to this file
    #[arg(long, value_name = "PATH")]
    logfile: Option<PathBuf>,

    /// Log to syslog
    #[cfg(unix)]
    #[arg(long)]
    syslog: bool,

    /// Facility to use for syslog logging
    #[cfg(unix)]
    #[arg(long, value_name = "FACILITY")]
    syslog_facility: Option<String>,
}


//============ Tests =========================================================
