use std::process::ExitCode;

use clap::Parser;
use shield::{
  args::{Args, Command},
  install_panic_hook, run_services,
  validate::validate_persisted_operations,
};
use shield_config::{load_config, LoggerConfig};
use shield_logger::logger_layer::build_logger;
use tracing::{error, info, subscriber::set_global_default};
use tracing_subscriber::layer::SubscriberExt;

#[actix_web::main]
async fn main() -> ExitCode {
  let args = Args::parse();
  let command = args.command.unwrap_or_default();

  // the default logger covers config loading, the configured one takes over after
  let default_logger_config = LoggerConfig::default();
  let default_logger = match build_logger(
    &default_logger_config.format,
    &default_logger_config.filter,
    default_logger_config.print_performance_info,
  ) {
    Ok(logger) => logger,
    Err(e) => {
      eprintln!("failed to build logger: {}", e);
      return ExitCode::FAILURE;
    }
  };

  let loaded = tracing::subscriber::with_default(
    tracing_subscriber::registry().with(default_logger),
    || load_config(command.config_path(), |key| std::env::var(key).ok()),
  );

  let config = match loaded {
    Ok(config) => config,
    Err(e) => {
      eprintln!(
        "failed to load configuration from {:?}: {}",
        command.config_path(),
        e
      );
      return ExitCode::FAILURE;
    }
  };

  let logger = match build_logger(
    &config.logger.format,
    &config.logger.filter,
    config.logger.print_performance_info,
  ) {
    Ok(logger) => logger,
    Err(e) => {
      eprintln!("invalid logger filter {:?}: {}", config.logger.filter, e);
      return ExitCode::FAILURE;
    }
  };

  if let Err(e) = set_global_default(tracing_subscriber::registry().with(logger)) {
    eprintln!("failed to set global default logger: {}", e);
    return ExitCode::FAILURE;
  }

  install_panic_hook();
  info!("configuration loaded from {:?}", command.config_path());

  match command {
    Command::Serve { .. } => match run_services(config).await {
      Ok(()) => ExitCode::SUCCESS,
      Err(e) => {
        error!("shield failed: {:?}", e);
        ExitCode::FAILURE
      }
    },
    Command::Validate { .. } => match validate_persisted_operations(&config).await {
      Ok(report) if report.is_clean() => ExitCode::SUCCESS,
      Ok(_) => ExitCode::from(1),
      Err(e) => {
        error!("validation failed to run: {:?}", e);
        ExitCode::FAILURE
      }
    },
  }
}
