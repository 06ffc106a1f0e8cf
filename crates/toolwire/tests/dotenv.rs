use std::env;
use std::fs;

use toolwire::config::{self, Settings};
use toolwire::telemetry;

#[test]
fn test_dotenv_reaches_logging_and_settings() {
    let dir = env::temp_dir().join(format!("toolwire-dotenv-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(".env");
    fs::write(
        &path,
        "RUST_LOG=toolwire=trace\n\
         GROQ_API_KEY=gsk_from_file\n\
         TOOLWIRE_APP_NAME=Dotenv-Agent\n",
    )
    .unwrap();

    // Variables already set in the process win over the file.
    let expected_filter =
        env::var("RUST_LOG").unwrap_or_else(|_| "toolwire=trace".to_owned());
    let expected_name = env::var("TOOLWIRE_APP_NAME")
        .unwrap_or_else(|_| "Dotenv-Agent".to_owned());

    config::load_dotenv_from(&path).unwrap();
    assert_eq!(telemetry::env_filter().to_string(), expected_filter);
    let settings = Settings::from_env().unwrap();
    assert_eq!(settings.app_name, expected_name);

    fs::remove_dir_all(&dir).unwrap();
}
