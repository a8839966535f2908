use clap::{Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use retrograde_core::governor::{Action, Governor, SystemIntegrityMetrics};
use retrograde_core::registry::GovernorRegistry;
use retrograde_core::tail::TailDivergenceTracker;
use retrograde_core::usl::{fit_usl, UslCoefficients, UslSample};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod status;

#[derive(Parser)]
#[command(name = "retrograde", version, about = "Adaptive admission control and USL scalability analysis")]
struct Cli {
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Bind address for a `/metrics` Prometheus text endpoint, if set.
    #[arg(long)]
    metrics_addr: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit USL coefficients from a CSV or JSON file of (N, throughput) samples.
    Fit {
        #[arg(long)]
        samples: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Host the `/status` HTTP monitoring surface while replaying a demo
    /// metrics stream through a Governor.
    Serve {
        #[arg(long, default_value = "127.0.0.1:3030")]
        addr: String,
        #[arg(long, default_value = "retrograde")]
        prefix: String,
        #[arg(long, default_value_t = 1.5)]
        initial_r: f64,
        #[arg(long, default_value_t = 4096)]
        tail_capacity: usize,
        #[arg(long, default_value_t = 500)]
        tick_ms: u64,
    },
    /// Spawn worker threads hammering a simulated backend at increasing
    /// concurrency, time completions, and fit a USL model to the result.
    Loadtest {
        #[arg(long, default_value_t = 16)]
        max_concurrency: u32,
        #[arg(long, default_value_t = 200)]
        requests_per_level: u32,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

struct Metrics {
    registry: Registry,
    evaluations: IntCounterVec,
    fits_run: IntCounter,
    status_requests: IntCounter,
    current_r: IntGauge,
}

impl Metrics {
    fn init(addr: Option<&str>) -> Result<Arc<Self>> {
        let registry = Registry::new();
        let evaluations = IntCounterVec::new(
            Opts::new("retrograde_evaluations_total", "Governor evaluations by action type"),
            &["action"],
        )
        .into_diagnostic()?;
        let fits_run =
            IntCounter::new("retrograde_fits_run_total", "USL fits performed").into_diagnostic()?;
        let status_requests = IntCounter::new(
            "retrograde_status_requests_total",
            "Requests served by the status endpoint",
        )
        .into_diagnostic()?;
        let current_r =
            IntGauge::new("retrograde_current_r_millis", "Current r, scaled by 1000").into_diagnostic()?;

        registry.register(Box::new(evaluations.clone())).into_diagnostic()?;
        registry.register(Box::new(fits_run.clone())).into_diagnostic()?;
        registry.register(Box::new(status_requests.clone())).into_diagnostic()?;
        registry.register(Box::new(current_r.clone())).into_diagnostic()?;

        let metrics = Arc::new(Self {
            registry,
            evaluations,
            fits_run,
            status_requests,
            current_r,
        });

        if let Some(addr) = addr {
            let registry = metrics.registry.clone();
            let addr = addr.to_string();
            thread::spawn(move || start_metrics_server(&addr, &registry));
        }

        Ok(metrics)
    }

    fn record_evaluation(&self, action: &Action) {
        self.evaluations
            .with_label_values(&[&format!("{:?}", action.action_type)])
            .inc();
        if let Some(r) = action.snapshot_metrics.estimated_coupling {
            self.current_r.set((r * 1000.0) as i64);
        }
    }

    fn record_fit(&self) {
        self.fits_run.inc();
    }

    fn record_status_request(&self) {
        self.status_requests.inc();
    }
}

fn start_metrics_server(addr: &str, registry: &Registry) {
    let server = match tiny_http::Server::http(addr) {
        Ok(server) => server,
        Err(_) => return,
    };
    for request in server.incoming_requests() {
        let encoder = TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_ok() {
            let _ = request.respond(tiny_http::Response::from_data(buffer));
        }
    }
}

fn init_tracing(log_format: LogFormat, log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .into_diagnostic()?;
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    match log_format {
        LogFormat::Json => fmt.json().init(),
        LogFormat::Pretty => fmt.init(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, &cli.log_level)?;
    let metrics = Metrics::init(cli.metrics_addr.as_deref())?;

    match cli.command {
        Commands::Fit { samples, output } => fit_command(&samples, output.as_ref(), &metrics),
        Commands::Serve {
            addr,
            prefix,
            initial_r,
            tail_capacity,
            tick_ms,
        } => serve_command(&addr, &prefix, initial_r, tail_capacity, tick_ms, metrics.clone()),
        Commands::Loadtest {
            max_concurrency,
            requests_per_level,
            output,
        } => loadtest_command(max_concurrency, requests_per_level, output.as_ref(), &metrics),
    }
}

fn read_samples(path: &Path) -> Result<Vec<UslSample>> {
    let contents = fs::read_to_string(path)
        .into_diagnostic()
        .with_context(|| format!("failed to read samples file {}", path.display()))?;

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        return serde_json::from_str(&contents)
            .into_diagnostic()
            .with_context(|| "samples file is not a valid JSON array of {n, throughput}");
    }

    let mut samples = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split(',');
        let n: u32 = parts
            .next()
            .ok_or_else(|| miette::miette!("line {}: missing N column", lineno + 1))?
            .trim()
            .parse()
            .into_diagnostic()
            .with_context(|| format!("line {}: bad N value", lineno + 1))?;
        let throughput: f64 = parts
            .next()
            .ok_or_else(|| miette::miette!("line {}: missing throughput column", lineno + 1))?
            .trim()
            .parse()
            .into_diagnostic()
            .with_context(|| format!("line {}: bad throughput value", lineno + 1))?;
        samples.push(UslSample::new(n, throughput));
    }
    Ok(samples)
}

fn fit_command(samples_path: &Path, output: Option<&PathBuf>, metrics: &Metrics) -> Result<()> {
    tracing::info!(command = "fit", samples = %samples_path.display());
    let samples = read_samples(samples_path)?;
    let coeffs: UslCoefficients = fit_usl(&samples)
        .into_diagnostic()
        .with_context(|| "USL fit failed")?;
    metrics.record_fit();

    let peak = coeffs.peak_capacity();
    let body = serde_json::json!({
        "lambda": coeffs.lambda,
        "alpha": coeffs.alpha,
        "beta": coeffs.beta,
        "r_squared": coeffs.r_squared,
        "peak_capacity": if peak.is_finite() { Some(peak) } else { None },
    });
    write_output(output, &body)
}

fn write_output(output: Option<&PathBuf>, value: &serde_json::Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).into_diagnostic()?;
    match output {
        Some(path) => fs::write(path, rendered)
            .into_diagnostic()
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            println!("{rendered}");
            Ok(())
        }
    }
}

/// Simulate a stream of system-integrity readings drifting between stable
/// and saturating conditions, evaluated against a named Governor on a tick.
fn serve_command(
    addr: &str,
    prefix: &str,
    initial_r: f64,
    tail_capacity: usize,
    tick_ms: u64,
    metrics: Arc<Metrics>,
) -> Result<()> {
    tracing::info!(command = "serve", %addr, %prefix, initial_r);
    let registry = GovernorRegistry::new();
    let governor = registry.get_or_create("demo", initial_r);
    let tail = Arc::new(TailDivergenceTracker::new(tail_capacity.max(1)));
    let last_action: Arc<parking_lot::Mutex<Option<Action>>> = Arc::new(parking_lot::Mutex::new(None));

    {
        let governor = governor.clone();
        let tail = tail.clone();
        let last_action = last_action.clone();
        let metrics = metrics.clone();
        thread::spawn(move || replay_demo_stream(governor, tail, last_action, tick_ms, metrics));
    }

    status::serve(addr, prefix, governor, last_action, &metrics)
}

/// Walks scaling_ratio through a triangular wave so the status endpoint
/// visibly cycles through Stable, Warning, Pacing, and Throttle.
fn replay_demo_stream(
    governor: Arc<Governor>,
    tail: Arc<TailDivergenceTracker>,
    last_action: Arc<parking_lot::Mutex<Option<Action>>>,
    tick_ms: u64,
    metrics: Arc<Metrics>,
) {
    let tick = Duration::from_millis(tick_ms.max(1));
    let step = AtomicU32::new(0);
    loop {
        let i = step.fetch_add(1, Ordering::Relaxed) % 40;
        let phase = (i as f64 / 40.0 * std::f64::consts::TAU).sin().abs();
        let reading = SystemIntegrityMetrics {
            immutable_ops_verified: 1000,
            mutable_shared_state: 5,
            supervised_processes: 100,
            unsupervised_processes: 1,
            scaling_ratio: phase * 0.5,
            delta_critical_core: 0.0,
            delta_complexity: 0.0,
            estimated_coupling: None,
        };
        let action = governor.evaluate(reading);
        let simulated_latency = Duration::from_micros(200 + (phase * 2000.0) as u64);
        tail.record(simulated_latency);
        metrics.record_evaluation(&action);
        *last_action.lock() = Some(action);
        thread::sleep(tick);
    }
}

/// A thin worker pool: each simulated worker issues `requests_per_level`
/// fixed-cost "requests" against a shared counter at a given concurrency,
/// and we time the wall-clock throughput of the batch. Not a real backend —
/// the interesting part downstream is the fitter it feeds.
fn loadtest_command(
    max_concurrency: u32,
    requests_per_level: u32,
    output: Option<&PathBuf>,
    metrics: &Metrics,
) -> Result<()> {
    tracing::info!(command = "loadtest", max_concurrency, requests_per_level);
    let mut samples = Vec::new();
    for n in 1..=max_concurrency.max(1) {
        let throughput = run_load_level(n, requests_per_level);
        tracing::debug!(n, throughput, "loadtest level complete");
        samples.push(UslSample::new(n, throughput));
    }

    let coeffs = fit_usl(&samples).into_diagnostic()?;
    metrics.record_fit();

    let body = serde_json::json!({
        "samples": samples,
        "fit": {
            "lambda": coeffs.lambda,
            "alpha": coeffs.alpha,
            "beta": coeffs.beta,
            "r_squared": coeffs.r_squared,
        },
    });
    write_output(output, &body)
}

/// Spawn `n` worker threads, each issuing `requests_per_level` simulated
/// requests against a shared contended resource, and return the measured
/// throughput in requests/sec for this concurrency level.
fn run_load_level(n: u32, requests_per_level: u32) -> f64 {
    let shared = Arc::new(parking_lot::Mutex::new(0u64));
    let start = Instant::now();
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(move || {
                for _ in 0..requests_per_level {
                    // A deliberately contended critical section: the lock
                    // acquisition cost is how crosstalk (beta) shows up as N
                    // grows, matching the USL model this feeds.
                    let mut guard = shared.lock();
                    *guard += 1;
                    drop(guard);
                    thread::yield_now();
                }
            })
        })
        .collect();
    for h in handles {
        let _ = h.join();
    }
    let elapsed = start.elapsed().as_secs_f64().max(1e-6);
    (n as f64 * requests_per_level as f64) / elapsed
}
