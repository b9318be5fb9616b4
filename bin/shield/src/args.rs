use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "shield", version)]
/// A protective reverse proxy for GraphQL servers
pub struct Args {
  #[command(subcommand)]
  pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Serve the protected GraphQL endpoint. The default when no command is given.
  Serve {
    /// Path to the YAML or JSON configuration file
    #[arg(env = "SHIELD_CONFIG_PATH", default_value = "./config.yaml")]
    config: PathBuf,
  },
  /// Validate every persisted operation against the configured rules and exit.
  Validate {
    /// Path to the YAML or JSON configuration file
    #[arg(env = "SHIELD_CONFIG_PATH", default_value = "./config.yaml")]
    config: PathBuf,
  },
}

impl Default for Command {
  fn default() -> Self {
    Command::Serve {
      config: PathBuf::from("./config.yaml"),
    }
  }
}

impl Command {
  pub fn config_path(&self) -> &Path {
    match self {
      Command::Serve { config } | Command::Validate { config } => config,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn serve_is_the_default() {
    let args = Args::try_parse_from(["shield"]).unwrap();
    let command = args.command.unwrap_or_default();

    assert!(matches!(command, Command::Serve { .. }));
    assert_eq!(command.config_path(), Path::new("./config.yaml"));
  }

  #[test]
  fn validate_takes_a_config_path() {
    let args = Args::try_parse_from(["shield", "validate", "prod.yaml"]).unwrap();

    assert!(matches!(
      args.command,
      Some(Command::Validate { ref config }) if config == Path::new("prod.yaml")
    ));
  }
}
