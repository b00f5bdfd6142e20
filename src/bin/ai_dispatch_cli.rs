//! ai-dispatch CLI: send one prompt through a candidate list.
//!
//! Usage:
//!   ai-dispatch-cli <candidates.yaml> <prompt...> [--agent NAME] [--kernel URL]
//!                   [--no-cache] [--cache-dir DIR]

use ai_dispatch::cache::{CacheStore, DiskCache};
use ai_dispatch::telemetry::TracingTelemetrySink;
use ai_dispatch::{CandidateSource, Dispatcher, KernelBackend, LogicalRequest, Message};
use anyhow::{bail, Context};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Args {
    candidates: String,
    prompt: String,
    agent: Option<String>,
    kernel: Option<String>,
    no_cache: bool,
    cache_dir: Option<String>,
}

fn print_usage() {
    println!(
        r#"ai-dispatch-cli: dispatch a prompt across fallback candidates

USAGE:
    ai-dispatch-cli <candidates.yaml> <prompt...> [OPTIONS]

OPTIONS:
    --agent <name>          Agent name sent to the kernel
    --kernel <url>          Kernel base URL
    --no-cache              Disable the response cache
    --cache-dir <dir>       Disk cache root
    -h, --help              Show this help message
    -V, --version           Show version information

ENVIRONMENT:
    AI_DISPATCH_KERNEL_URL          Default kernel base URL
    AI_DISPATCH_CACHE_DIR           Default disk cache root (.cache)
    RUST_LOG                        Log filter (default: warn)"#
    );
}

fn parse_args(raw: &[String]) -> anyhow::Result<Option<Args>> {
    let mut positional = Vec::new();
    let mut agent = None;
    let mut kernel = None;
    let mut no_cache = false;
    let mut cache_dir = None;

    let mut it = raw.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-V" | "--version" => {
                println!("ai-dispatch-cli {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "--agent" => agent = Some(it.next().context("--agent needs a value")?.clone()),
            "--kernel" => kernel = Some(it.next().context("--kernel needs a value")?.clone()),
            "--cache-dir" => {
                cache_dir = Some(it.next().context("--cache-dir needs a value")?.clone())
            }
            "--no-cache" => no_cache = true,
            flag if flag.starts_with("--") => bail!("unknown option: {}", flag),
            _ => positional.push(arg.clone()),
        }
    }

    if positional.len() < 2 {
        bail!("expected <candidates.yaml> and a prompt");
    }
    let candidates = positional.remove(0);
    Ok(Some(Args {
        candidates,
        prompt: positional.join(" "),
        agent,
        kernel,
        no_cache,
        cache_dir,
    }))
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let source = CandidateSource::from_path(&args.candidates)
        .await
        .with_context(|| format!("loading {}", args.candidates))?;

    let mut kernel = KernelBackend::builder();
    if let Some(url) = args.kernel {
        kernel = kernel.base_url(url);
    }
    if let Some(agent) = args.agent {
        kernel = kernel.agent_name(agent);
    }

    let mut builder = Dispatcher::builder()
        .backend(Arc::new(kernel.build()?))
        .candidates(Arc::new(source))
        .telemetry(Arc::new(TracingTelemetrySink::new()));
    if !args.no_cache {
        let disk = match args.cache_dir {
            Some(dir) => DiskCache::new(dir),
            None => DiskCache::from_env(),
        };
        builder = builder.cache(CacheStore::new(Arc::new(disk)));
    }
    let dispatcher = builder.build()?;

    let request = LogicalRequest::new(vec![Message::user(args.prompt)]);
    let outcome = dispatcher.dispatch(&request).await;
    dispatcher.flush_telemetry().await;
    match outcome {
        Ok(accepted) => {
            println!("{}", accepted.content());
            for call in &accepted.response.tool_calls {
                println!("tool_call {} {}", call.name, call.parameters);
            }
            Ok(true)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(Some(args)) => args,
        Ok(None) => {
            if !raw.iter().any(|a| a == "-V" || a == "--version") {
                print_usage();
            }
            return;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
