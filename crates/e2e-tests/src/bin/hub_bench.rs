use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use e2e_tests::{BackendKind, TestHarness};
use hub_types::{MetricEvent, MetricKind, SessionEvent, SessionStatus, TimeRange};

const DEFAULT_ITERATIONS: usize = 3;
const TOOLS: [&str; 4] = ["research_topic", "write_post", "save_post", "publish"];

#[derive(Parser, Debug)]
#[command(name = "hub_bench", about = "Agent hub storage benchmark harness")]
struct Args {
    #[arg(long, value_enum, default_value = "local")]
    backend: BenchBackend,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
    /// Concurrent writers per contended step
    #[arg(long, default_value_t = 8)]
    writers: usize,
    /// Events appended per session
    #[arg(long, default_value_t = 50)]
    events: usize,
    #[arg(long, default_value_t = 1337)]
    seed: u64,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Serialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
enum BenchBackend {
    Local,
    Memory,
    ObjectNative,
    ObjectLease,
}

impl From<BenchBackend> for BackendKind {
    fn from(backend: BenchBackend) -> Self {
        match backend {
            BenchBackend::Local => BackendKind::Local,
            BenchBackend::Memory => BackendKind::Memory,
            BenchBackend::ObjectNative => BackendKind::ObjectNative,
            BenchBackend::ObjectLease => BackendKind::ObjectLease,
        }
    }
}

#[derive(Debug, Serialize)]
struct StepMetrics {
    p50_ms: f64,
    p90_ms: f64,
    p99_ms: f64,
    samples: usize,
}

#[derive(Debug, Serialize)]
struct BenchmarkOutput {
    backend: BenchBackend,
    iterations: usize,
    writers: usize,
    generated_at: String,
    steps: BTreeMap<String, StepMetrics>,
    metrics_dropped: u64,
}

#[derive(Default)]
struct SampleCollector {
    durations: BTreeMap<String, Vec<f64>>,
}

impl SampleCollector {
    fn push(&mut self, step: &str, started: Instant) {
        self.durations
            .entry(step.to_string())
            .or_default()
            .push(started.elapsed().as_secs_f64() * 1000.0);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut collector = SampleCollector::default();
    let mut metrics_dropped = 0;

    for iteration in 0..args.iterations {
        let harness = Arc::new(TestHarness::new(args.backend.into()).await);
        run_iteration(&harness, &args, iteration, &mut rng, &mut collector).await?;
        metrics_dropped += harness.hub.metrics().stats().dropped;
    }

    let output = BenchmarkOutput {
        backend: args.backend,
        iterations: args.iterations,
        writers: args.writers,
        generated_at: Utc::now().to_rfc3339(),
        steps: build_metrics(&collector),
        metrics_dropped,
    };

    let json = serde_json::to_string_pretty(&output)?;
    println!("{}", render_table(&output));
    println!("\n{}", json);
    if let Some(path) = &args.out {
        fs::write(path, &json).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

async fn run_iteration(
    harness: &Arc<TestHarness>,
    args: &Args,
    iteration: usize,
    rng: &mut StdRng,
    collector: &mut SampleCollector,
) -> anyhow::Result<()> {
    let hub = &harness.hub;

    let id = hub.sessions().open().await?;
    for _ in 0..args.events {
        let tool = TOOLS[rng.random_range(0..TOOLS.len())];
        let duration_ms = rng.random_range(1..500);
        let started = Instant::now();
        hub.record_tool_call(&id, tool, &serde_json::json!({ "iteration": iteration }), "ok", duration_ms, true)
            .await?;
        collector.push("record_tool_call", started);
    }
    let started = Instant::now();
    hub.sessions().close(&id, SessionStatus::Completed).await?;
    collector.push("session_close", started);

    let started = Instant::now();
    let events = hub.sessions().read(&id).await?;
    collector.push("session_read", started);
    anyhow::ensure!(events.len() == args.events, "session lost events");

    // contended prompt versions
    let started = Instant::now();
    let mut handles = Vec::new();
    for writer in 0..args.writers {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            harness
                .hub
                .prompts()
                .put("bench", &format!("variant {writer}"), "")
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }
    collector.push("prompt_put_contended", started);

    // contended session appends
    let shared = hub.sessions().open().await?;
    let started = Instant::now();
    let mut handles = Vec::new();
    for writer in 0..args.writers {
        let harness = harness.clone();
        let shared = shared.clone();
        handles.push(tokio::spawn(async move {
            harness
                .hub
                .sessions()
                .append(&shared, SessionEvent::new(format!("writer-{writer}"), "{}", "ok", 1, true))
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }
    collector.push("session_append_contended", started);

    for _ in 0..args.events {
        let event = MetricEvent::new(&id, MetricKind::Generation)
            .with_duration(rng.random_range(10..2000))
            .with_tokens(rng.random_range(100..4000), rng.random_range(10..800));
        let started = Instant::now();
        hub.metrics().record(event).await;
        collector.push("metrics_record", started);
    }

    let now = Utc::now();
    let started = Instant::now();
    hub.metrics()
        .export(TimeRange::new(now - chrono::Duration::hours(1), now + chrono::Duration::seconds(1)))
        .await?;
    collector.push("metrics_export", started);
    Ok(())
}

fn build_metrics(collector: &SampleCollector) -> BTreeMap<String, StepMetrics> {
    collector
        .durations
        .iter()
        .map(|(step, durations)| {
            let mut sorted = durations.clone();
            sorted.sort_by(f64::total_cmp);
            let metrics = StepMetrics {
                p50_ms: percentile(&sorted, 50.0),
                p90_ms: percentile(&sorted, 90.0),
                p99_ms: percentile(&sorted, 99.0),
                samples: sorted.len(),
            };
            (step.clone(), metrics)
        })
        .collect()
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let rank = (percentile / 100.0) * (values.len() as f64 - 1.0);
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        values[low]
    } else {
        let weight = rank - low as f64;
        values[low] + (values[high] - values[low]) * weight
    }
}

fn render_table(output: &BenchmarkOutput) -> String {
    let mut lines = vec![
        format!(
            "Hub benchmark (backend={}, iterations={}, writers={})",
            BackendKind::from(output.backend).label(),
            output.iterations,
            output.writers
        ),
        "step\tp50_ms\tp90_ms\tp99_ms\tsamples".to_string(),
    ];
    for (step, metrics) in &output.steps {
        lines.push(format!(
            "{}\t{:.2}\t{:.2}\t{:.2}\t{}",
            step, metrics.p50_ms, metrics.p90_ms, metrics.p99_ms, metrics.samples
        ));
    }
    lines.push(format!("metrics dropped: {}", output.metrics_dropped));
    lines.join("\n")
}
