use clap::Parser;
use heart_risk::utils::{logger, validation::Validate};
use heart_risk::{server, Predictor, Result, ServeArgs, TomlConfig};
use std::path::Path;

#[tokio::main]
async fn main() {
    let args = ServeArgs::parse();

    let mut config = match TomlConfig::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(e.exit_code());
        }
    };
    config.apply_env_overrides();
    args.apply_overrides(&mut config);

    // guard 必須存活到服務結束
    let _log_guard = logger::init_api_logger(
        args.verbose,
        config.server.json_logs,
        Path::new(&config.server.log_file),
    );

    if let Err(e) = run(&config).await {
        tracing::error!(
            "❌ API failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(e.exit_code().max(1));
    }
}

async fn run(config: &TomlConfig) -> Result<()> {
    config.validate()?;
    let predictor = Predictor::load(config)?;
    server::serve(config, predictor).await
}
