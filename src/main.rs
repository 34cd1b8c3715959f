//! ht-jsonrpc: JSON-RPC 2.0 over HTTP(S)
//!
//! A small front end for the transport crates: `serve` runs a demo server
//! whose dispatch echoes params back, `call` issues a single request.
//!
//! Usage:
//!   ht-jsonrpc serve                                   # http://127.0.0.1:7070/ht-jsonrpc
//!   ht-jsonrpc serve --port 8443 --self-signed         # HTTPS with a generated cert
//!   ht-jsonrpc call echo '{"a":1}'                     # one request against the default server
//!   ht-jsonrpc call --tls-cert cert.pem --port 8443 sleep '{"ms":500}'

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use ht_jsonrpc_transport::{
    Dispatch, DispatchError, DispatchResult, HttpTransport, TlsConfig, TransportOptions,
};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ht-jsonrpc", about = "JSON-RPC 2.0 over HTTP(S)")]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Write logs to a file (defaults to ht-jsonrpc.log in the temp dir if no path given)
    #[arg(long, global = true, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a demo server that echoes params back
    Serve(ServeArgs),
    /// Issue one JSON-RPC call and print the result
    Call(CallArgs),
}

#[derive(Args, Debug)]
struct EndpointArgs {
    /// Hostname to bind to / connect to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on / connect to (0 for OS-assigned when serving)
    #[arg(long, default_value = "7070")]
    port: u16,

    /// Route path
    #[arg(long)]
    path: Option<String>,

    /// Path to TLS certificate (PEM)
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key (PEM)
    #[arg(long)]
    tls_key: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    endpoint: EndpointArgs,

    /// Add permissive CORS headers
    #[arg(long)]
    cors: bool,

    /// Generate (or reuse) a self-signed certificate and serve HTTPS
    #[arg(long, conflicts_with_all = ["tls_cert", "tls_key"])]
    self_signed: bool,

    /// Directory for generated TLS material
    #[arg(long)]
    tls_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CallArgs {
    #[command(flatten)]
    endpoint: EndpointArgs,

    /// Method name
    method: String,

    /// Params as JSON (defaults to null)
    params: Option<String>,
}

/// Demo business logic: echo, sleep-then-echo, and deliberate failure.
struct EchoDispatch;

impl Dispatch for EchoDispatch {
    async fn dispatch(&self, method: &str, params: Value) -> DispatchResult {
        match method {
            "echo" => Ok(params),
            "sleep" => {
                let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(100);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(params)
            }
            "fail" => Err(DispatchError::Object(json!({
                "message": params.get("message").and_then(Value::as_str).unwrap_or("failed"),
                "params": params,
            }))),
            other => Err(DispatchError::message(format!("unknown method: {other}"))),
        }
    }
}

/// Ensure a self-signed certificate and key exist in `dir`, generating if needed.
fn ensure_self_signed(dir: &Path, host: &str) -> anyhow::Result<TlsConfig> {
    let tls = TlsConfig::new(dir.join("cert.pem"), dir.join("key.pem"));
    if tls.cert_path.exists() && tls.key_path.exists() {
        return Ok(tls);
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut sans = vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ];
    if !sans.iter().any(|s| s == host) {
        sans.push(host.to_string());
    }
    if let Ok(name) = hostname::get() {
        let name = name.to_string_lossy().to_string();
        if !sans.contains(&name) {
            sans.push(name);
        }
    }

    let certified = rcgen::generate_simple_self_signed(sans)?;
    std::fs::write(&tls.cert_path, certified.cert.pem())?;
    std::fs::write(&tls.key_path, certified.key_pair.serialize_pem())?;
    info!("Generated self-signed certificate at {}", tls.cert_path.display());

    Ok(tls)
}

fn endpoint_options(endpoint: &EndpointArgs) -> anyhow::Result<TransportOptions> {
    let mut options = TransportOptions::new()
        .host(endpoint.host.clone())
        .port(endpoint.port);
    if let Some(path) = &endpoint.path {
        options = options.path(path.clone());
    }
    match (&endpoint.tls_cert, &endpoint.tls_key) {
        (Some(cert), Some(key)) => options = options.tls(TlsConfig::new(cert, key)),
        // The client only needs the certificate to trust
        (Some(cert), None) => options = options.tls(TlsConfig::new(cert, PathBuf::new())),
        (None, Some(_)) => anyhow::bail!("--tls-key requires --tls-cert"),
        (None, None) => {}
    }
    Ok(options)
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_file_arg) = cli.log_file {
        let log_path = if log_file_arg == "DEFAULT" {
            std::env::temp_dir().join("ht-jsonrpc.log")
        } else {
            PathBuf::from(log_file_arg)
        };
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    if args.endpoint.tls_cert.is_some() != args.endpoint.tls_key.is_some() {
        anyhow::bail!("serving HTTPS needs both --tls-cert and --tls-key");
    }

    let mut options = endpoint_options(&args.endpoint)?.cors(args.cors);
    if args.self_signed {
        let dir = args
            .tls_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("ht-jsonrpc-tls"));
        options = options.tls(ensure_self_signed(&dir, &args.endpoint.host)?);
    }

    let transport = HttpTransport::new(options)?;
    let mut server = transport.server(EchoDispatch)?;
    server.listen().await?;

    let config = transport.config();
    if let Some(addr) = server.local_addr() {
        println!();
        println!("  Endpoint:  {}://{addr}{}", config.ssl.scheme(), config.path);
        if let Some(tls) = config.ssl.tls() {
            println!("  TLS cert:  {}", tls.cert_path.display());
        }
        println!("  CORS:      {}", if config.cors { "enabled" } else { "disabled" });
        println!();
        println!("  Press Ctrl+C to stop.");
        println!();
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {e}");
    }

    server.stop().await;
    Ok(())
}

async fn call(args: CallArgs) -> anyhow::Result<()> {
    let params: Value = match &args.params {
        Some(raw) => serde_json::from_str(raw).context("params must be valid JSON")?,
        None => Value::Null,
    };

    let transport = HttpTransport::new(endpoint_options(&args.endpoint)?)?;
    let client = transport.client()?;

    match client.call(&args.method, params).await {
        Ok(Some(result)) => println!("{}", serde_json::to_string_pretty(&result)?),
        Ok(None) => println!("(no result)"),
        Err(e) => anyhow::bail!("{e}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Call(args) => call(args).await,
    }
}
