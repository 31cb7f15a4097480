use clap::Parser;
use heart_risk::config::Command;
use heart_risk::core::dataset::{load_dataset, DatasetDownloader};
use heart_risk::core::eda::{self, EDA_FILE};
use heart_risk::domain::model::PatientRecord;
use heart_risk::server::handlers::validate_record;
use heart_risk::utils::{logger, validation::Validate};
use heart_risk::{
    CliConfig, LocalStorage, Predictor, Result, RiskError, TomlConfig, TrainingEngine,
    TrainingPipeline,
};
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting heart-risk CLI");
    if cli.verbose {
        tracing::debug!("CLI args: {:?}", cli);
    }

    if let Err(e) = run(&cli).await {
        // 記錄詳細錯誤信息
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = e.exit_code();
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

fn load_config(cli: &CliConfig) -> Result<TomlConfig> {
    let mut config = TomlConfig::load_or_default(&cli.config)?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        return Err(e);
    }
    Ok(config)
}

async fn run(cli: &CliConfig) -> Result<()> {
    let config = load_config(cli)?;

    match &cli.command {
        Command::Download { .. } => {
            let path = DatasetDownloader::new(config.data.clone())?.download().await?;
            println!("✅ Dataset saved to: {}", path.display());
        }

        Command::Eda { data } => {
            let path = data
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| config.dataset_path());
            let dataset = load_dataset(&path)?;
            let report = eda::summarize(&dataset)?;
            report.log();

            let output = config.artifacts_dir().join(EDA_FILE);
            report.save(&output)?;
            println!("✅ EDA summary saved to: {}", output.display());
        }

        Command::Train { data, download, .. } => {
            let monitor_enabled = config.monitoring_enabled();
            if monitor_enabled {
                tracing::info!("🔍 System monitoring enabled");
            }

            // 創建存儲和管道
            let storage = LocalStorage::new(config.artifacts_dir());
            let mut pipeline = TrainingPipeline::new(storage, config.clone())?.with_download(*download);
            if let Some(path) = data {
                pipeline = pipeline.with_data_path(path);
            }

            let engine = TrainingEngine::new_with_monitoring(pipeline, monitor_enabled);
            let summary = engine.run().await?;

            println!("✅ Training completed successfully!");
            for report in &summary.reports {
                println!(
                    "   {:<20} test_roc_auc={:.4} test_accuracy={:.4} (run {})",
                    report.run_name,
                    report.metrics["test_roc_auc"],
                    report.metrics["test_accuracy"],
                    report.run_id
                );
            }
            println!("🏆 Best model: {} (run {})", summary.best_model, summary.best_run_id);
            println!("📦 Model bundle: {}", summary.bundle_path.display());
            println!("📁 Preprocessor: {}", summary.preprocessor_path.display());
        }

        Command::Predict { input, .. } => {
            let record = match input {
                Some(path) => serde_json::from_slice::<PatientRecord>(&std::fs::read(path)?)?,
                None => PatientRecord::sample(),
            };
            let problems = validate_record(&record);
            if !problems.is_empty() {
                let fields: Vec<String> = problems
                    .iter()
                    .map(|d| format!("{}: {}", d.loc.join("."), d.msg))
                    .collect();
                return Err(RiskError::ValidationError {
                    message: fields.join("; "),
                });
            }

            let predictor = Predictor::load(&config)?;
            let result = predictor.predict(&record)?;

            println!("Input: {}", serde_json::to_string(&record)?);
            println!(
                "Prediction: {}",
                if result.prediction == 1 {
                    "Heart Disease"
                } else {
                    "No Heart Disease"
                }
            );
            println!("Probability: {:.4}", result.probability);
            println!("Confidence: {}", result.confidence);
        }
    }

    Ok(())
}
