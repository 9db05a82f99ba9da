//! Configuration commands.
//!
//! Shows the effective configuration after file and `JOBWATCH__*`
//! environment overrides, or the built-in defaults.

use anyhow::Result;
use clap::Subcommand;

use jobwatch_core::config::{Config, JobProfile};

use crate::output::{self, OutputFormat};
use crate::App;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Show the built-in defaults
    Defaults,
}

pub fn execute(cmd: ConfigCommands, app: &App, format: OutputFormat) -> Result<()> {
    let config = match cmd {
        ConfigCommands::Show => app.config.clone(),
        ConfigCommands::Defaults => Config::default(),
    };

    match format {
        OutputFormat::Table => {
            output::print_header("Store");
            output::print_detail("Base URL", &config.store.base_url);
            output::print_detail("Request timeout", &format!("{:?}", config.store.request_timeout));
            output::print_detail("Min request gap", &format!("{:?}", config.store.min_request_gap));
            print_profile("Create", &config.create);
            print_profile("Import", &config.import);
            output::print_header("Logging");
            output::print_detail("Level", &config.logging.level);
            output::print_detail("Format", &format!("{:?}", config.logging.format));
            Ok(())
        }
        _ => output::print_item(&config, format),
    }
}

fn print_profile(title: &str, profile: &JobProfile) {
    output::print_header(title);
    let poll = &profile.poll;
    output::print_detail("Polling", if poll.enabled { "enabled" } else { "disabled" });
    output::print_detail("Interval", &format!("{:?}", poll.interval));
    output::print_detail("Max interval", &format!("{:?}", poll.max_interval));
    output::print_detail("Backoff factor", &poll.backoff_factor.to_string());
    output::print_detail("Jitter", &format!("{:?}", poll.jitter));
    output::print_detail("Timeout", &format!("{:?}", poll.timeout));
    let estimator = &profile.estimator;
    output::print_detail(
        "Estimator",
        &format!(
            "start {} +{} every {:?} up to {}",
            estimator.initial, estimator.step, estimator.cadence, estimator.ceiling
        ),
    );
    output::print_detail("Auto-reset", &format!("{:?}", profile.auto_reset_delay));
}
