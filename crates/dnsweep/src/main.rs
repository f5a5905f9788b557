//! dnsweep — high-speed bulk DNS lookups.
//!
//! Reads names from arguments, a file, or stdin; resolves them with a pool
//! of workers (recursively, or iteratively from the roots); and writes one
//! JSON result object per name.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser};
use hickory_proto::rr::DNSClass;
use ipnet::IpNet;
use tracing::info;

use dnsweep_resolver::{
    pool, Blacklist, IpFamily, Resolver, ResolverConfig, TransportPolicy,
};

mod logging;
mod modules;
mod output;
mod runner;

use modules::ModuleArg;
use output::{OutputFilter, Verbosity};
use runner::{parse_name_server, RunnerOptions};

/// High-speed, low-drag bulk DNS lookups.
#[derive(Debug, Parser)]
#[command(name = "dnsweep", version, about, long_about = None)]
struct Cli {
    /// Lookup module to run
    #[arg(value_enum, ignore_case = true)]
    module: ModuleArg,

    /// Names to resolve, dig-style; stdin or --input-file when omitted
    domains: Vec<String>,

    #[command(flatten)]
    general: GeneralOptions,

    #[command(flatten)]
    query: QueryOptions,

    #[command(flatten)]
    network: NetworkOptions,

    #[command(flatten)]
    io: InputOutputOptions,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "General Options")]
struct GeneralOptions {
    /// Perform the lookup via all the name servers for the domain
    #[arg(long = "all-nameservers")]
    all_nameservers: bool,

    /// How many entries the response cache may hold
    #[arg(long = "cache-size", default_value_t = 10_000)]
    cache_size: usize,

    /// Timeout for a single step of an iterative query, in seconds
    #[arg(long = "iteration-timeout", default_value_t = 4)]
    iteration_timeout: u64,

    /// Perform own iteration from the roots instead of using a recursive
    /// resolver
    #[arg(long)]
    iterative: bool,

    /// How deep to follow referrals during iterative lookups
    #[arg(long = "max-depth", default_value_t = 10)]
    max_depth: usize,

    /// Treat input as name servers to query with a static question
    #[arg(long = "name-server-mode")]
    name_server_mode: bool,

    /// Comma-delimited list of servers, or @/path/to/file; port 53 assumed
    #[arg(long = "name-servers")]
    name_servers: Option<String>,

    /// Use nanosecond-resolution timestamps in output
    #[arg(long)]
    nanoseconds: bool,

    /// Do not follow CNAMEs/DNAMEs during the lookup
    #[arg(long = "no-follow-cnames")]
    no_follow_cnames: bool,

    /// Extra attempts after a timeout or temporary failure
    #[arg(long, default_value_t = 1)]
    retries: i32,

    /// Number of lookup workers
    #[arg(short = 't', long, default_value_t = 1000)]
    threads: usize,

    /// Timeout for resolving an individual name, in seconds
    #[arg(long, default_value_t = 15)]
    timeout: u64,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Query Options")]
struct QueryOptions {
    /// Send queries with the CD bit set
    #[arg(long = "checking-disabled")]
    checking_disabled: bool,

    /// DNS class to query (INET, CHAOS, HESIOD, NONE, ANY)
    #[arg(long, default_value = "INET")]
    class: String,

    /// Client subnet in CIDR form for EDNS0
    #[arg(long = "client-subnet")]
    client_subnet: Option<String>,

    /// Request DNSSEC records (sets the DO bit) and validate the chain
    #[arg(long)]
    dnssec: bool,

    /// Request NSID
    #[arg(long)]
    nsid: bool,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Network Options")]
struct NetworkOptions {
    /// IPv4 query transport only
    #[arg(long = "4", conflicts_with = "ipv6_transport")]
    ipv4_transport: bool,

    /// IPv6 query transport only
    #[arg(long = "6")]
    ipv6_transport: bool,

    /// Source IP for outbound queries
    #[arg(long = "local-addr")]
    local_addr: Option<IpAddr>,

    /// Local interface to use
    #[arg(long = "local-interface", conflicts_with = "local_addr")]
    local_interface: Option<String>,

    /// Do not keep a long-lived UDP socket per worker
    #[arg(long = "no-recycle-sockets")]
    no_recycle_sockets: bool,

    /// Prefer IPv4/A lookups when choosing iteration next-hops
    #[arg(long = "prefer-ipv4-iteration", conflicts_with = "prefer_ipv6_iteration")]
    prefer_ipv4_iteration: bool,

    /// Prefer IPv6/AAAA lookups when choosing iteration next-hops
    #[arg(long = "prefer-ipv6-iteration")]
    prefer_ipv6_iteration: bool,

    /// Only perform lookups over TCP
    #[arg(long = "tcp-only", conflicts_with = "udp_only")]
    tcp_only: bool,

    /// Only perform lookups over UDP
    #[arg(long = "udp-only")]
    udp_only: bool,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Input/Output Options")]
struct InputOutputOptions {
    /// File of IPs/CIDRs that must never be queried
    #[arg(long = "blacklist-file")]
    blacklist_file: Option<String>,

    /// Resolver configuration file for default name servers
    #[arg(long = "conf-file", default_value = "/etc/resolv.conf")]
    conf_file: String,

    /// Comma-separated fields to output beyond the verbosity level
    /// (class, protocol, ttl, resolver, flags)
    #[arg(long = "include-fields")]
    include_fields: Option<String>,

    /// Names to read; `-` means stdin
    #[arg(short = 'f', long = "input-file", default_value = "-")]
    input_file: String,

    /// Where logs go; `-` means stderr
    #[arg(long = "log-file", default_value = "-")]
    log_file: String,

    /// Where the JSON run summary goes; `-` means stderr
    #[arg(long = "metadata-file")]
    metadata_file: Option<String>,

    /// Query this name for every input line
    #[arg(long = "override-name")]
    override_name: Option<String>,

    /// Where JSON results go; `-` means stdout
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    output_file: String,

    /// Name prepended to every input line (e.g. www.)
    #[arg(long)]
    prefix: Option<String>,

    /// Verbosity of each output record (short, normal, long, trace)
    #[arg(long = "result-verbosity", default_value = "normal")]
    result_verbosity: String,

    /// Log verbosity: 1 (lowest) to 5 (highest)
    #[arg(long, default_value_t = 3)]
    verbosity: u8,
}

fn parse_class(value: &str) -> Result<DNSClass> {
    match value.to_uppercase().as_str() {
        "INET" | "IN" => Ok(DNSClass::IN),
        "CHAOS" | "CH" => Ok(DNSClass::CH),
        "HESIOD" | "HS" => Ok(DNSClass::HS),
        "NONE" => Ok(DNSClass::NONE),
        "ANY" => Ok(DNSClass::ANY),
        other => bail!("unsupported DNS class {other:?}"),
    }
}

/// `--name-servers` accepts a comma list or `@file` with one entry per line.
fn parse_name_servers(spec: &str) -> Result<Vec<SocketAddr>> {
    let entries: Vec<String> = if let Some(path) = spec.strip_prefix('@') {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading name servers from {path}"))?
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect()
    } else {
        spec.split(',')
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect()
    };

    entries.iter().map(|entry| parse_name_server(entry)).collect()
}

fn build_resolver_config(cli: &Cli) -> Result<ResolverConfig> {
    if cli.network.local_interface.is_some() {
        bail!("interface-based source selection is not supported; use --local-addr");
    }
    if cli.general.name_server_mode && cli.io.override_name.is_none() {
        bail!("--name-server-mode requires --override-name");
    }
    if cli.general.threads == 0 {
        bail!("--threads must be at least 1");
    }

    // Recursive servers, or the servers iteration starts from; the empty
    // iterative default means the compiled-in roots.
    let name_servers = match &cli.general.name_servers {
        Some(spec) => parse_name_servers(spec)?,
        None => {
            if cli.general.iterative {
                Vec::new()
            } else {
                pool::name_servers_from_file(&cli.io.conf_file)
            }
        }
    };

    let transport = if cli.network.tcp_only {
        TransportPolicy::TcpOnly
    } else if cli.network.udp_only {
        TransportPolicy::UdpOnly
    } else {
        TransportPolicy::Auto
    };

    let ip_family = if cli.network.ipv6_transport {
        IpFamily::V6
    } else if cli.network.ipv4_transport {
        IpFamily::V4
    } else {
        IpFamily::Any
    };

    let client_subnet = cli
        .query
        .client_subnet
        .as_deref()
        .map(|spec| {
            spec.parse::<IpNet>()
                .with_context(|| format!("invalid client subnet {spec:?}"))
        })
        .transpose()?;

    Ok(ResolverConfig {
        timeout: Duration::from_secs(cli.general.timeout),
        iteration_step_timeout: Duration::from_secs(cli.general.iteration_timeout),
        retries: cli.general.retries,
        max_depth: cli.general.max_depth,
        cache_size: cli.general.cache_size,
        iterative: cli.general.iterative,
        name_servers,
        local_addr: cli.network.local_addr,
        recycle_sockets: !cli.network.no_recycle_sockets,
        workers: cli.general.threads,
        follow_cnames: !cli.general.no_follow_cnames,
        dnssec: cli.query.dnssec,
        checking_disabled: cli.query.checking_disabled,
        nsid: cli.query.nsid,
        client_subnet,
        transport,
        ip_family,
        prefer_ipv6_iteration: cli.network.prefer_ipv6_iteration,
        destination_port: 53,
        trust_anchors: None,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_logging(cli.io.verbosity, &cli.io.log_file)?;

    let module = cli.module.kind()?;
    let qclass = parse_class(&cli.query.class)?;
    let verbosity = Verbosity::parse(&cli.io.result_verbosity)?;
    let filter = OutputFilter::new(verbosity, cli.io.include_fields.as_deref())?;

    let config = build_resolver_config(&cli)?;

    let blacklist = match &cli.io.blacklist_file {
        Some(path) => Blacklist::from_file(Path::new(path))
            .with_context(|| format!("loading blacklist from {path}"))?,
        None => Blacklist::new(),
    };

    let resolver = Arc::new(
        Resolver::new(config, blacklist)
            .await
            .context("initializing resolver")?,
    );
    info!(
        module = ?cli.module,
        threads = cli.general.threads,
        iterative = cli.general.iterative,
        "dnsweep starting"
    );

    let opts = RunnerOptions {
        threads: cli.general.threads,
        module,
        qclass,
        all_name_servers: cli.general.all_nameservers,
        name_server_mode: cli.general.name_server_mode,
        override_name: cli.io.override_name.clone(),
        prefix: cli.io.prefix.clone(),
        nanoseconds: cli.general.nanoseconds,
        input_file: cli.io.input_file.clone(),
        output_file: cli.io.output_file.clone(),
        metadata_file: cli.io.metadata_file.clone(),
        filter,
    };

    runner::run(resolver, opts, cli.domains.clone()).await
}
