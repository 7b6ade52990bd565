//! Chunked timing of the index scan.

use std::time::Duration;

use tracing::info;

/// Logs average `add` latency every `chunk_size` filings.
#[derive(Debug)]
pub struct ScanTimer {
    chunk_size: usize,
    count: usize,
    chunk_elapsed: Duration,
    total_elapsed: Duration,
}

impl ScanTimer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            count: 0,
            chunk_elapsed: Duration::ZERO,
            total_elapsed: Duration::ZERO,
        }
    }

    /// Record one measured add. Returns true when a chunk boundary was crossed.
    pub fn record(&mut self, elapsed: Duration) -> bool {
        self.count += 1;
        self.chunk_elapsed += elapsed;
        if self.count % self.chunk_size == 0 {
            self.log(self.chunk_size);
            return true;
        }
        false
    }

    /// Log the final partial chunk.
    pub fn finish(&mut self) {
        let remainder = self.count % self.chunk_size;
        if remainder > 0 {
            self.log(remainder);
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn log(&mut self, chunk_count: usize) {
        self.total_elapsed += self.chunk_elapsed;
        let chunk_avg = self.chunk_elapsed.as_nanos() as f64 / chunk_count as f64;
        let overall_avg = self.total_elapsed.as_nanos() as f64 / self.count as f64;
        info!(
            "Scanned {} filings (chunk avg: {:.2}ns | overall avg {:.2}ns)",
            self.count, chunk_avg, overall_avg
        );
        self.chunk_elapsed = Duration::ZERO;
    }
}
