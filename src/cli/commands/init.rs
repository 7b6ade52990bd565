//! Initialize command.

use console::style;

use composer::config::Settings;

/// Initialize the working directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    println!(
        "{} Initialized e-file index in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    if settings.composites_dir != settings.data_dir {
        println!(
            "  {} Composites: {}",
            style("→").dim(),
            settings.composites_dir.display()
        );
    }

    Ok(())
}
