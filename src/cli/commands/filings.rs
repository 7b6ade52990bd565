//! List the committed filings for an organization.

use console::style;

use composer::config::Settings;
use composer::index::FilingIndex;

pub async fn cmd_filings(settings: &Settings, ein: &str, json: bool) -> anyhow::Result<()> {
    if !settings.database_exists() {
        println!(
            "{} Index not initialized. Run 'compose init {}' first.",
            style("!").yellow(),
            settings.data_dir.display()
        );
        return Ok(());
    }

    let index = FilingIndex::open(&settings.create_db_context());
    let mut filings = index.filings(ein).await?;
    filings.sort_by(|a, b| a.period.cmp(&b.period));

    if json {
        println!("{}", serde_json::to_string_pretty(&filings)?);
        return Ok(());
    }

    if filings.is_empty() {
        println!("{} No filings recorded for {}", style("!").yellow(), ein);
        return Ok(());
    }

    println!(
        "{} ({})",
        style(&filings[0].organization_name).bold(),
        ein
    );
    println!(
        "  {:<8} {:<20} {:<6} {:<12} {}",
        "Period", "Filing", "Form", "Submitted", "Uploaded"
    );
    for filing in &filings {
        println!(
            "  {:<8} {:<20} {:<6} {:<12} {}",
            filing.period,
            filing.filing_id,
            filing.form_type,
            filing.submitted_date,
            filing.uploaded_timestamp
        );
    }

    Ok(())
}
