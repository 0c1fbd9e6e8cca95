//! pingmux - ping many hosts at once over a single raw ICMP socket.
//!
//! This is the command-line interface for the pingmux library.

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::needless_pass_by_value)]

use anyhow::{bail, Result};
use clap::Parser;
use pingmux::config::{DEFAULT_INTERVAL_MS, DEFAULT_NOREPLY_TIMEOUT_MS};
use pingmux::packet::ICMP_HEADER_LEN;
use pingmux::{
    HostReport, PingError, PingReply, PingStatus, Session, SessionConfig, SessionCounters,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Get the version string for pingmux
fn get_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(env!("CARGO_PKG_VERSION"), "-UNRELEASED")
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Command-line arguments for the ping tool.
#[derive(Parser, Debug)]
#[clap(author, version, about = "Ping many hosts at once over a single raw ICMP socket", long_about = None)]
struct Args {
    /// Hosts to ping (names or IPv4 addresses)
    #[clap(required = true)]
    hosts: Vec<String>,

    /// Interval between probes to the same host in milliseconds
    #[clap(short = 'i', long = "interval-ms", default_value_t = DEFAULT_INTERVAL_MS)]
    interval_ms: u64,

    /// Time to wait for each reply in milliseconds
    #[clap(short = 'W', long = "timeout-ms", default_value_t = DEFAULT_NOREPLY_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Number of data bytes to send after the ICMP header
    #[clap(short = 's', long = "size", default_value_t = 56)]
    size: usize,

    /// Stop after this many seconds instead of waiting for a signal
    #[clap(short = 'w', long)]
    deadline: Option<u64>,

    /// Only print the statistics at exit
    #[clap(short, long)]
    quiet: bool,

    /// Disable reverse DNS lookups
    #[clap(long)]
    no_rdns: bool,

    /// Output statistics in JSON format
    #[clap(long)]
    json: bool,

    /// Enable verbose logging (repeat for more)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// JSON output structure for a single host
#[derive(Debug, serde::Serialize)]
struct JsonHost {
    index: u32,
    name: String,
    address: String,
    #[serde(flatten)]
    report: HostReport,
}

/// JSON output structure for the whole session
#[derive(Debug, serde::Serialize)]
struct JsonOutput {
    version: String,
    identifier: u16,
    hosts: Vec<JsonHost>,
    counters: SessionCounters,
}

fn main() {
    // Quick check for version before starting async runtime
    let args: Vec<String> = std::env::args().collect();
    if args.len() == 2 && (args[1] == "--version" || args[1] == "-V") {
        println!("pingmux {}", get_version());
        return;
    }

    let args = Args::parse();
    init_logging(args.verbose);

    // Single-threaded runtime: the engine runs on one reactor task anyway
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    let result = runtime.block_on(async_main(args));

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Install the tracing subscriber; `RUST_LOG` overrides the verbosity flags
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &Args) -> Result<SessionConfig> {
    let Some(packet_size) = args.size.checked_add(ICMP_HEADER_LEN) else {
        bail!("packet size {} is too large", args.size);
    };
    SessionConfig::builder()
        .packet_size(packet_size)
        .interval(Duration::from_millis(args.interval_ms))
        .noreply_timeout(Duration::from_millis(args.timeout_ms))
        .quiet(args.quiet || args.json)
        .enable_rdns(!args.no_rdns)
        .build()
        .map_err(anyhow::Error::msg)
}

async fn async_main(args: Args) -> Result<()> {
    let config = build_config(&args)?;

    let session = match Session::new(&tokio::runtime::Handle::current(), config) {
        Ok(session) => session,
        Err(PingError::InsufficientPermissions {
            required,
            suggestion,
        }) => {
            eprintln!("Error: pingmux requires {}", required);
            eprintln!("{}", suggestion);
            if !pingmux::socket::utils::is_root() {
                eprintln!(
                    "For example: sudo {}",
                    std::env::args().collect::<Vec<_>>().join(" ")
                );
            }
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let mut registered = 0;
    for host in &args.hosts {
        match session.add_host(host).await {
            Ok(_) => registered += 1,
            Err(e) => eprintln!("pingmux: {}", e),
        }
    }
    if registered == 0 {
        bail!("no host could be resolved");
    }

    let silent = args.quiet || args.json;
    if !silent {
        println!("{}", hosts_banner(registered));
    }

    session.start_pinging(move |reply| {
        if !silent {
            println!("{}", format_reply(reply));
        }
    })?;

    wait_for_exit(args.deadline.map(Duration::from_secs)).await?;

    if args.json {
        let output = JsonOutput {
            version: get_version().to_string(),
            identifier: session.identifier(),
            hosts: session
                .hosts()
                .into_iter()
                .zip(session.statistics())
                .map(|(host, report)| JsonHost {
                    index: host.index,
                    name: host.name,
                    address: host.address.to_string(),
                    report,
                })
                .collect(),
            counters: session.counters(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
        session.print_statistics();
    }

    session.close(false).await;
    Ok(())
}

/// Wait for SIGINT, SIGTERM, SIGQUIT or the optional deadline
async fn wait_for_exit(deadline: Option<Duration>) -> Result<()> {
    let deadline = async {
        match deadline {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        let mut quit = signal(SignalKind::quit())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
            _ = quit.recv() => {}
            () = deadline => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            () = deadline => {}
        }
    }
    Ok(())
}

fn hosts_banner(count: usize) -> String {
    format!(
        "#{} host{} being pinged",
        count,
        if count == 1 { "" } else { "s" }
    )
}

/// One line per completed probe, in the classic ping layout
fn format_reply(reply: &PingReply) -> String {
    let ms = reply.elapsed.as_secs_f64() * 1000.0;
    match reply.status {
        PingStatus::Success => format!(
            "{} bytes from {} ({}): icmp_seq={} ttl={} time={:.3} ms",
            reply.bytes.unwrap_or(0),
            reply.fqdn,
            reply.address,
            reply.sequence,
            reply.ttl.unwrap_or(0),
            ms
        ),
        PingStatus::Timeout => format!(
            "time out with {} ({}): icmp_seq={} time={:.3} ms",
            reply.fqdn, reply.address, reply.sequence, ms
        ),
        other => format!(
            "{} ({}): icmp_seq={} {}",
            reply.fqdn, reply.address, reply.sequence, other
        ),
    }
}
