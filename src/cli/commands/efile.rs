//! Incremental e-file update command.

use console::style;
use tokio::sync::mpsc;

use composer::config::Settings;
use composer::update::{UpdateError, UpdateEvent, UpdateRun};

use crate::cli::progress::UpdateProgress;

/// Scan the indices, refresh changed composites, then commit the index.
pub async fn cmd_efile(settings: &Settings, show_progress: bool) -> anyhow::Result<()> {
    println!(
        "{} Updating {} from {}",
        style("→").cyan(),
        settings.data_dir.display(),
        settings.bucket
    );

    let (event_tx, mut event_rx) = mpsc::channel::<UpdateEvent>(256);
    let run = UpdateRun::from_settings(settings)?.with_events(event_tx);

    let event_handler = tokio::spawn(async move {
        let mut progress = show_progress.then(UpdateProgress::new);
        while let Some(event) = event_rx.recv().await {
            if let Some(ref mut progress) = progress {
                progress.handle(&event);
            }
        }
        if let Some(progress) = progress {
            progress.finish();
        }
    });

    let result = run.run().await;

    if let Err(e) = event_handler.await {
        tracing::warn!("Event handler task failed: {}", e);
    }

    let report = match result {
        Ok(report) => report,
        Err(UpdateError::Batch(batch)) => {
            eprintln!(
                "{} {} phase failed; index not committed",
                style("✗").red(),
                batch.phase
            );
            if batch.timed_out {
                eprintln!("  {} deadline expired", style("!").yellow());
            }
            for failure in batch.failures.iter().take(10) {
                eprintln!(
                    "  {} {} [{}]: {}",
                    style("→").dim(),
                    failure.item,
                    failure.kind,
                    failure.message
                );
            }
            if batch.failures.len() > 10 {
                eprintln!("  ... and {} more", batch.failures.len() - 10);
            }
            return Err(UpdateError::Batch(batch).into());
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "{} Scanned {} index entries",
        style("✓").green(),
        report.scanned
    );
    if report.changed_filings == 0 {
        println!("  {} No new filings", style("→").dim());
    } else {
        println!(
            "  {} {} new filings for {} organizations",
            style("→").dim(),
            report.changed_filings,
            report.changed_entities
        );
        println!(
            "  {} {} composites written to {}",
            style("→").dim(),
            report.composites_written,
            settings.composites_dir.display()
        );
    }
    if report.staged_duplicates > 0 {
        println!(
            "  {} {} superseded filings recorded",
            style("!").yellow(),
            report.staged_duplicates
        );
    }

    Ok(())
}
