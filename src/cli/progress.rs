//! Terminal progress display for update runs.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use composer::pipeline::Phase;
use composer::update::UpdateEvent;

/// Renders `UpdateEvent`s as a spinner for the scan and a bar per phase.
pub struct UpdateProgress {
    multi: MultiProgress,
    scan: ProgressBar,
    phase: Option<ProgressBar>,
}

impl UpdateProgress {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let scan = multi.add(ProgressBar::new_spinner());
        scan.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        scan.enable_steady_tick(std::time::Duration::from_millis(120));
        scan.set_message("Reading e-file indices...");

        Self {
            multi,
            scan,
            phase: None,
        }
    }

    pub fn handle(&mut self, event: &UpdateEvent) {
        match event {
            UpdateEvent::ShardLoaded { year, filings } => {
                self.println(&format!(
                    "  {} index {} ({} filings)",
                    console::style("→").dim(),
                    year,
                    filings
                ));
            }
            UpdateEvent::Scanned { count } => {
                self.scan.set_message(format!("Scanned {} filings", count));
            }
            UpdateEvent::ScanFinished {
                scanned,
                changed,
                duplicates,
            } => {
                self.scan.finish_with_message(format!(
                    "Scanned {} filings: {} new, {} superseded",
                    scanned, changed, duplicates
                ));
            }
            UpdateEvent::PhaseStarted { phase, total } => {
                self.finish_phase();
                let bar = self.multi.add(ProgressBar::new(*total as u64));
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
                );
                bar.set_message(phase_label(*phase));
                self.phase = Some(bar);
            }
            UpdateEvent::Fetched { .. }
            | UpdateEvent::Translated { .. }
            | UpdateEvent::CompositeWritten { .. } => {
                if let Some(ref bar) = self.phase {
                    bar.inc(1);
                }
            }
            UpdateEvent::Committed { .. } => self.finish_phase(),
        }
    }

    pub fn println(&self, msg: &str) {
        let _ = self.multi.println(msg);
    }

    pub fn finish(mut self) {
        self.finish_phase();
        if !self.scan.is_finished() {
            self.scan.finish_and_clear();
        }
    }

    fn finish_phase(&mut self) {
        if let Some(bar) = self.phase.take() {
            bar.finish();
        }
    }
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Fetch => "fetching",
        Phase::Translate => "translating",
        Phase::Write => "writing composites",
    }
}
