use crate::config::toml_config::TomlConfig;
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "heart-risk")]
#[command(about = "Heart disease risk pipeline: download, explore, train and predict")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "heart-risk.toml", global = true)]
    pub config: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Download and clean the UCI heart disease dataset
    Download {
        /// Override data.data_dir
        #[arg(long)]
        data_dir: Option<String>,

        /// Override data.url
        #[arg(long)]
        url: Option<String>,
    },

    /// Summarise the dataset (missing values, distributions, correlations)
    Eda {
        /// Dataset CSV (defaults to data.data_dir/data.file_name)
        #[arg(long)]
        data: Option<String>,
    },

    /// Train both classifiers and record runs in the tracking store
    Train {
        /// Dataset CSV (defaults to data.data_dir/data.file_name)
        #[arg(long)]
        data: Option<String>,

        /// Download the dataset first when the file is missing
        #[arg(long)]
        download: bool,

        /// Override monitoring setting from config
        #[arg(long)]
        monitor: Option<bool>,
    },

    /// Predict a single patient without starting the API
    Predict {
        /// JSON file with the 13 input fields (defaults to a built-in sample)
        #[arg(long)]
        input: Option<String>,

        /// Load model and preprocessor from a bundle zip
        #[arg(long)]
        bundle: Option<String>,
    },
}

impl CliConfig {
    /// 命令列參數覆蓋 TOML 設定
    pub fn apply_overrides(&self, config: &mut TomlConfig) {
        match &self.command {
            Command::Download { data_dir, url } => {
                if let Some(dir) = data_dir {
                    config.data.data_dir = dir.clone();
                }
                if let Some(url) = url {
                    config.data.url = url.clone();
                }
            }
            Command::Train { monitor, .. } => {
                if let Some(enabled) = monitor {
                    config.monitoring.enabled = *enabled;
                }
            }
            Command::Predict { bundle, .. } => {
                if bundle.is_some() {
                    config.server.model_bundle = bundle.clone();
                }
            }
            Command::Eda { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "heart-api")]
#[command(about = "Heart Disease Prediction API")]
pub struct ServeArgs {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "heart-risk.toml")]
    pub config: String,

    /// Override server.host
    #[arg(long)]
    pub host: Option<String>,

    /// Override server.port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Load model and preprocessor from a bundle zip
    #[arg(long)]
    pub bundle: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl ServeArgs {
    pub fn apply_overrides(&self, config: &mut TomlConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.bundle.is_some() {
            config.server.model_bundle = self.bundle.clone();
        }
        if self.json_logs {
            config.server.json_logs = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_overrides_monitoring() {
        let cli = CliConfig::parse_from(["heart-risk", "train", "--monitor", "true"]);
        let mut config = TomlConfig::default();
        cli.apply_overrides(&mut config);
        assert!(config.monitoring_enabled());
    }

    #[test]
    fn test_serve_overrides_port() {
        let args = ServeArgs::parse_from(["heart-api", "--port", "9100", "--bundle", "b.zip"]);
        let mut config = TomlConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.model_bundle.as_deref(), Some("b.zip"));
    }
}
