//! Asks the weather assistant one question from the terminal.

#[macro_use]
extern crate tracing;

use std::io;
use std::process::ExitCode;

use owo_colors::OwoColorize;
use tokio::io::BufReader;
use toolwire::config::{self, ModelConfig, Settings};
use toolwire::{Error, Workflow, telemetry};
use toolwire_mcp::{SessionHandle, SseConnector, SseConnectorConfig};
use toolwire_openai_model::OpenAIProvider;
use toolwire_watsonx_model::WatsonxProvider;
use tracing::Instrument;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // `.env` may set `RUST_LOG`, so it is loaded before the subscriber.
    let dotenv = config::load_dotenv();
    telemetry::init();
    match dotenv {
        Ok(Some(path)) => debug!("loaded {}", path.display()),
        Ok(None) => {}
        Err(err) => warn!("failed to load .env: {err}"),
    }

    let result = match Settings::from_env() {
        Ok(settings) => {
            let span = telemetry::workflow_span(&settings.app_name);
            run(settings).instrument(span).await
        }
        Err(err) => Err(err.into()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<(), Error> {
    let connector = SseConnector::new(SseConnectorConfig {
        name: settings.app_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
    });
    let mut handle = SessionHandle::with_connector(connector);
    let input = BufReader::new(tokio::io::stdin());
    let mut output = io::stdout();

    match settings.provider.model_config() {
        ModelConfig::OpenAI(config) => {
            Workflow::new(OpenAIProvider::new(config), settings.mcp_server_url)
                .run(&mut handle, input, &mut output)
                .await?;
        }
        ModelConfig::Watsonx(config) => {
            Workflow::new(WatsonxProvider::new(config), settings.mcp_server_url)
                .run(&mut handle, input, &mut output)
                .await?;
        }
    }
    Ok(())
}
