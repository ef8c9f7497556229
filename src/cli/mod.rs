//! Command-line interface for querying the device directory.
//!
//! One-shot commands (`list`, `defaults`, `capabilities`) print a snapshot
//! and exit; `watch` streams hotplug events until interrupted.

mod commands;
pub mod formatting;
mod types;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{CapabilitiesCommand, DefaultsCommand, ListCommand, ListKind, watch};
pub use types::{CliError, Command, CommandResult};

/// Audio and video device directory
#[derive(Debug, Parser)]
#[command(name = "avdev", version, about)]
pub struct Cli {
    /// Configuration file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// What to do
    #[command(subcommand)]
    pub command: CliCommand,
}

/// Subcommands of `avdev`
#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// List devices with their default markers
    List {
        /// Device kinds to show
        #[arg(value_enum, default_value_t = ListKind::All)]
        kind: ListKind,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the default device of every slot
    Defaults {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List capture formats of a camera
    Capabilities {
        /// Descriptor as printed by `avdev list video`
        descriptor: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print device events until Ctrl-C
    Watch {
        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },
}

impl CliCommand {
    /// The one-shot command for this invocation, `None` for `watch`.
    pub fn one_shot(&self) -> Option<Box<dyn Command>> {
        match self {
            CliCommand::List { kind, json } => Some(Box::new(ListCommand::new(*kind, *json))),
            CliCommand::Defaults { json } => Some(Box::new(DefaultsCommand::new(*json))),
            CliCommand::Capabilities { descriptor, json } => Some(Box::new(
                CapabilitiesCommand::new(descriptor.clone(), *json),
            )),
            CliCommand::Watch { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_with_kind() {
        let cli = Cli::try_parse_from(["avdev", "list", "video", "--json"]);

        assert!(matches!(
            cli.map(|cli| cli.command),
            Ok(CliCommand::List {
                kind: ListKind::Video,
                json: true
            })
        ));
    }

    #[test]
    fn list_defaults_to_all() {
        let cli = Cli::try_parse_from(["avdev", "list"]);

        assert!(matches!(
            cli.map(|cli| cli.command),
            Ok(CliCommand::List {
                kind: ListKind::All,
                json: false
            })
        ));
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["avdev", "defaults", "--config", "/tmp/avdev.toml"]);

        assert_eq!(
            cli.ok().and_then(|cli| cli.config),
            Some(PathBuf::from("/tmp/avdev.toml"))
        );
    }

    #[test]
    fn capabilities_requires_descriptor() {
        assert!(Cli::try_parse_from(["avdev", "capabilities"]).is_err());
    }

    #[test]
    fn watch_is_not_one_shot() {
        assert!(CliCommand::Watch { json: false }.one_shot().is_none());
        assert!(CliCommand::Defaults { json: true }.one_shot().is_some());
    }
}
