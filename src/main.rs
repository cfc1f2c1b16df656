use color_eyre::Result;

use taskgate::{config::Config, drill::Drill};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .try_init()?;

    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("loading config from {path}");
            Config::from_file(path)?
        }
        None => Config::default(),
    };

    let drill = Drill::new(config.drill.clone());
    let report = drill.run().await?;
    report.check(&config.drill)?;
    log::info!(
        "{} proceeded, {} cancelled, gate is clean",
        report.proceeded,
        report.cancelled
    );

    Ok(())
}
