//! Status command for showing index state.

use console::style;

use composer::config::Settings;

/// Show index counts.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    if !settings.database_exists() {
        println!(
            "{} Index not initialized. Run 'compose init {}' first.",
            style("!").yellow(),
            settings.data_dir.display()
        );
        return Ok(());
    }

    let ctx = settings.create_db_context();
    ctx.test_connection().await?;
    let latest = ctx.latest();
    let duplicates = ctx.duplicates();

    let organizations = latest.distinct_entity_ids().await?.len();
    let latest_count = latest.count().await?;
    let duplicate_count = duplicates.count().await?;

    let separator = "─".repeat(50);
    println!();
    println!("{}", style("composer status").bold());
    println!("{}", separator);
    println!("Database:   {}", settings.database_path().display());
    println!("Composites: {}", settings.composites_dir.display());
    println!("Bucket:     {}", settings.bucket);
    println!();
    println!("{}", style("INDEX").cyan().bold());
    println!("  {:<20} {:>10}", "Organizations:", organizations);
    println!("  {:<20} {:>10}", "Latest filings:", latest_count);
    println!("  {:<20} {:>10}", "Superseded:", duplicate_count);
    println!();

    Ok(())
}
