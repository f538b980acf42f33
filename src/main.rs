use anyhow::Result;
use dispenser_form_automation::utils::logging;
use dispenser_form_automation::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    logging::init(config.verbose_logging);

    let result = App::initialize(config).await?.run().await?;

    if result.aborted_early {
        std::process::exit(2);
    }
    Ok(())
}
