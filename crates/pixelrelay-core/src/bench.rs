//! Server-local benchmark of the transform engine.
//!
//! Runs blur and downscale over a reference image for each configured worker
//! count and reports the mean wall-clock time per run. The rendered report is
//! plain text and travels back to the client in place of an image payload.

use crate::codec::{load_image, ImageCodec};
use crate::config::BenchmarkConfig;
use crate::pixel::PixelBuffer;
use crate::pool::WorkerPool;
use crate::transform::Transform;
use crate::Result;
use std::fmt::Write as _;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Timing for one task at one worker count.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkRow {
    pub task: &'static str,
    pub workers: usize,
    pub average: Duration,
}

impl BenchmarkRow {
    pub fn average_ms(&self) -> f64 {
        self.average.as_secs_f64() * 1e3
    }
}

/// Collected benchmark results.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkReport {
    pub reference: String,
    pub dimensions: (u32, u32),
    pub rows: Vec<BenchmarkRow>,
}

impl BenchmarkReport {
    /// Text form sent to clients. One `Task:` line per task and worker count.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "[SERVER TEST] Loaded {} ({}x{}).",
            self.reference, self.dimensions.0, self.dimensions.1
        );

        let mut current_task = None;
        for row in &self.rows {
            if current_task != Some(row.task) {
                let _ = writeln!(out, "\n--- Testing {} (in-memory) ---", row.task);
                current_task = Some(row.task);
            }
            let _ = writeln!(
                out,
                "Task: {}, Workers: {:4}, Avg Time: {:.3} ms",
                row.task,
                row.workers,
                row.average_ms()
            );
        }
        out
    }
}

/// Time `transform` over `image` for every worker count.
pub fn measure(
    image: &PixelBuffer,
    transform: Transform,
    worker_counts: &[usize],
    repetitions: u32,
) -> Result<Vec<BenchmarkRow>> {
    let repetitions = repetitions.max(1);
    let mut rows = Vec::with_capacity(worker_counts.len());

    for &workers in worker_counts {
        let pool = WorkerPool::new(workers);
        let mut total = Duration::ZERO;
        for _ in 0..repetitions {
            let start = Instant::now();
            transform.apply(image, &pool)?;
            total += start.elapsed();
        }
        rows.push(BenchmarkRow {
            task: transform.name(),
            workers,
            average: total / repetitions,
        });
    }

    Ok(rows)
}

/// Run the full benchmark matrix on an already-loaded image.
pub fn run_on(config: &BenchmarkConfig, reference: &str, image: &PixelBuffer) -> Result<BenchmarkReport> {
    let tasks = [
        Transform::Blur {
            radius: config.blur_radius,
        },
        Transform::Downscale {
            width: config.downscale_width,
            height: config.downscale_height,
        },
    ];

    let mut rows = Vec::new();
    for task in tasks {
        rows.extend(measure(image, task, &config.worker_counts, config.repetitions)?);
    }

    Ok(BenchmarkReport {
        reference: reference.to_string(),
        dimensions: image.dimensions(),
        rows,
    })
}

/// Load the reference image and run the benchmark, always producing text.
///
/// Failures end only this benchmark invocation; their message becomes the
/// report.
pub fn run_benchmark(config: &BenchmarkConfig, codec: &dyn ImageCodec) -> String {
    let reference = config.reference_image.display().to_string();
    let started = Instant::now();

    let result = load_image(codec, &config.reference_image)
        .and_then(|image| run_on(config, &reference, &image));

    match result {
        Ok(report) => {
            info!(
                "Benchmark over {} finished in {:.1?}",
                reference,
                started.elapsed()
            );
            report.render()
        }
        Err(e) => {
            warn!("Benchmark failed: {}", e);
            format!("[SERVER TEST] Failed to run benchmark on {}: {}\n", reference, e)
        }
    }
}
