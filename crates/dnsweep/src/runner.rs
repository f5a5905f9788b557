//! The worker pool: names in, JSON lines out.
//!
//! A feeder task pushes input names onto a channel, `threads` workers pull
//! from it (each worker keyed to its own pooled socket), and a single
//! writer task serializes results to the output stream in completion
//! order. The only process-wide mutable state is inside the resolver.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dnsweep_resolver::{answer::rtype_string, LiveLookup, Resolver};
use hickory_proto::rr::DNSClass;

use crate::modules::ModuleKind;
use crate::output::{build_record, OutputFilter};

/// Everything the pool needs beyond the resolver itself.
pub struct RunnerOptions {
    pub threads: usize,
    pub module: ModuleKind,
    pub qclass: DNSClass,
    pub all_name_servers: bool,
    pub name_server_mode: bool,
    pub override_name: Option<String>,
    pub prefix: Option<String>,
    pub nanoseconds: bool,
    pub input_file: String,
    pub output_file: String,
    pub metadata_file: Option<String>,
    pub filter: OutputFilter,
}

/// Per-run summary written to the metadata file.
#[derive(Debug, Serialize)]
struct Metadata {
    names: u64,
    statuses: BTreeMap<String, u64>,
    start_time: String,
    end_time: String,
}

/// A name server spec, with `:53` assumed when no port is given.
pub fn parse_name_server(spec: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = spec.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = spec.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, 53));
    }
    bail!("invalid name server {spec:?}")
}

/// Runs the pool to completion over `domains` (or the input stream when
/// empty).
pub async fn run(
    resolver: Arc<Resolver>,
    opts: RunnerOptions,
    domains: Vec<String>,
) -> anyhow::Result<()> {
    let start_time = Utc::now();
    let opts = Arc::new(opts);

    let (input_tx, input_rx) = mpsc::channel::<String>(1024);
    let (output_tx, mut output_rx) = mpsc::channel::<String>(1024);
    let input_rx = Arc::new(tokio::sync::Mutex::new(input_rx));

    // Feeder: dig-style arguments win; otherwise stream the input file.
    let input_file = opts.input_file.clone();
    let feeder = tokio::spawn(async move {
        if !domains.is_empty() {
            for domain in domains {
                if input_tx.send(domain).await.is_err() {
                    return;
                }
            }
            return;
        }

        if input_file == "-" {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if input_tx.send(line).await.is_err() {
                    return;
                }
            }
        } else {
            let file = match tokio::fs::File::open(&input_file).await {
                Ok(file) => file,
                Err(err) => {
                    warn!(path = %input_file, error = %err, "cannot open input file");
                    return;
                }
            };
            let mut lines = BufReader::new(file).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if input_tx.send(line).await.is_err() {
                    return;
                }
            }
        }
    });

    let statuses: Arc<Mutex<BTreeMap<String, u64>>> = Arc::new(Mutex::new(BTreeMap::new()));
    let processed = Arc::new(std::sync::atomic::AtomicU64::new(0));

    let mut workers = Vec::with_capacity(opts.threads);
    for worker_id in 0..opts.threads {
        let resolver = resolver.clone();
        let opts = opts.clone();
        let input_rx = input_rx.clone();
        let output_tx = output_tx.clone();
        let statuses = statuses.clone();
        let processed = processed.clone();

        workers.push(tokio::spawn(async move {
            loop {
                let line = {
                    let mut rx = input_rx.lock().await;
                    rx.recv().await
                };
                let Some(line) = line else { break };

                let (query_name, name_server) = match shape_input(&opts, &line) {
                    Ok(shaped) => shaped,
                    Err(err) => {
                        warn!(line = %line, error = %err, "skipping malformed input line");
                        continue;
                    }
                };

                let started = Instant::now();
                let output = opts
                    .module
                    .run(
                        &LiveLookup,
                        &resolver,
                        worker_id,
                        &query_name,
                        opts.qclass,
                        name_server,
                        opts.all_name_servers,
                    )
                    .await;
                let duration = started.elapsed().as_secs_f64();

                statuses
                    .lock()
                    .entry(output.status.to_string())
                    .and_modify(|count| *count += 1)
                    .or_insert(1);
                processed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

                let record = build_record(
                    &query_name,
                    &opts.module.query_class(opts.qclass).to_string(),
                    &rtype_string(opts.module.query_type()),
                    &output,
                    duration,
                    &opts.filter,
                    opts.nanoseconds,
                );

                let line = record.to_string();
                if output_tx.send(line).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(output_tx);

    // Writer: stdout or the output file, one JSON object per line.
    let output_file = opts.output_file.clone();
    let writer = tokio::spawn(async move {
        let mut sink: Box<dyn tokio::io::AsyncWrite + Send + Unpin> = if output_file == "-" {
            Box::new(tokio::io::stdout())
        } else {
            match tokio::fs::File::create(&output_file).await {
                Ok(file) => Box::new(file),
                Err(err) => {
                    warn!(path = %output_file, error = %err, "cannot open output file");
                    return;
                }
            }
        };

        while let Some(line) = output_rx.recv().await {
            if sink.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if sink.write_all(b"\n").await.is_err() {
                break;
            }
        }
        let _ = sink.flush().await;
    });

    feeder.await.context("input feeder task failed")?;
    for worker in workers {
        worker.await.context("worker task failed")?;
    }
    writer.await.context("output writer task failed")?;

    if let Some(path) = &opts.metadata_file {
        let metadata = Metadata {
            names: processed.load(std::sync::atomic::Ordering::Relaxed),
            statuses: statuses.lock().clone(),
            start_time: start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            end_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let serialized = serde_json::to_string(&metadata)?;
        if path == "-" {
            eprintln!("{serialized}");
        } else {
            std::fs::write(path, serialized + "\n")
                .with_context(|| format!("writing metadata to {path}"))?;
        }
        debug!("metadata written");
    }

    Ok(())
}

/// Splits one input line into the query name and the destination server.
///
/// In name-server mode the line names the server and the query name is
/// pinned by `--override-name`; otherwise the line is the name, with the
/// optional prefix and override applied.
fn shape_input(opts: &RunnerOptions, line: &str) -> anyhow::Result<(String, Option<SocketAddr>)> {
    if opts.name_server_mode {
        let server = parse_name_server(line)?;
        let name = opts
            .override_name
            .clone()
            .context("--name-server-mode requires --override-name")?;
        return Ok((name, Some(server)));
    }

    if let Some(name) = &opts.override_name {
        return Ok((name.clone(), None));
    }

    let name = match &opts.prefix {
        Some(prefix) => format!("{prefix}{line}"),
        None => line.to_string(),
    };
    Ok((name, None))
}
