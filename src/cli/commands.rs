//! Command handlers for CLI
//!
//! `dbvault <config.toml> <command> [arg]`. Every handler returns a JSON
//! value that the binary prints.

use crate::backup::{catalog, BackupProvider};
use crate::config::DatabaseConfig;
use crate::database::provider::DatabaseProvider;
use crate::error::{DatabaseError, Result};
use crate::plugin::{BackupOrchestrator, DataPlugin, ExportRequest, ImportRequest};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Usage text
pub const USAGE: &str = "\
Usage: dbvault <config.toml> <command> [arg]

Pass `-` as the configuration to read DBVAULT_* environment variables.

Commands:
  health             Run a health check
  stats              Show connection and query statistics
  backup [dir]       Create a backup (default: configured backup directory)
  validate <path>    Check a backup file without touching the database
  restore <path>     Replace the database with a backup
  list               List backups in the backup directory
  delete <id>        Delete a backup and its manifest
";

/// Command types
#[derive(Debug, Clone, PartialEq)]
pub enum CommandType {
    /// Health check
    Health,
    /// Statistics snapshot
    Stats,
    /// Create a backup
    Backup { dir: Option<PathBuf> },
    /// Validate an artifact
    Validate { path: PathBuf },
    /// Restore from an artifact
    Restore { path: PathBuf },
    /// List backups
    List,
    /// Delete a backup
    Delete { id: String },
}

/// Parsed command line
#[derive(Debug, Clone)]
pub struct Command {
    /// Configuration file
    pub config_path: PathBuf,
    /// The type of command
    pub command_type: CommandType,
}

fn required<'a>(arg: Option<&'a str>, command: &str, what: &str) -> Result<&'a str> {
    arg.filter(|a| !a.trim().is_empty())
        .ok_or_else(|| DatabaseError::config(format!("{} requires <{}>", command, what)))
}

impl Command {
    /// Parse the arguments after the program name
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut args = args.iter().map(AsRef::<str>::as_ref);
        let config_path = args
            .next()
            .ok_or_else(|| DatabaseError::config("missing configuration file"))?;
        let name = args
            .next()
            .ok_or_else(|| DatabaseError::config("missing command"))?;
        let arg = args.next();

        let command_type = match name {
            "health" => CommandType::Health,
            "stats" => CommandType::Stats,
            "backup" => CommandType::Backup {
                dir: arg.map(PathBuf::from),
            },
            "validate" => CommandType::Validate {
                path: PathBuf::from(required(arg, name, "path")?),
            },
            "restore" => CommandType::Restore {
                path: PathBuf::from(required(arg, name, "path")?),
            },
            "list" => CommandType::List,
            "delete" => CommandType::Delete {
                id: required(arg, name, "id")?.to_string(),
            },
            other => return Err(DatabaseError::config(format!("unknown command: {}", other))),
        };

        Ok(Command {
            config_path: PathBuf::from(config_path),
            command_type,
        })
    }
}

fn backup_capability(provider: &dyn DatabaseProvider) -> Result<&dyn BackupProvider> {
    provider
        .as_backup()
        .ok_or_else(|| DatabaseError::BackupUnsupported(provider.name().to_string()))
}

/// Run a command against a connected provider
pub async fn handle_command(
    command: &Command,
    provider: Arc<dyn DatabaseProvider>,
    config: &DatabaseConfig,
) -> Result<Value> {
    match &command.command_type {
        CommandType::Health => Ok(serde_json::to_value(provider.health_check().await)?),
        CommandType::Stats => Ok(serde_json::to_value(provider.stats().await)?),
        CommandType::Backup { dir } => {
            let dir = dir
                .clone()
                .unwrap_or_else(|| catalog::backup_dir(Some(config)));
            let orchestrator = BackupOrchestrator::new(provider).with_output_dir(dir);
            let result = orchestrator.export(&ExportRequest::default()).await?;
            Ok(serde_json::to_value(result)?)
        }
        CommandType::Validate { path } => {
            let result = backup_capability(provider.as_ref())?
                .validate_backup(path)
                .await?;
            Ok(serde_json::to_value(result)?)
        }
        CommandType::Restore { path } => {
            let orchestrator = BackupOrchestrator::new(provider);
            let result = orchestrator.import(&ImportRequest::new(path)).await?;
            Ok(serde_json::to_value(result)?)
        }
        CommandType::List => {
            let backups = backup_capability(provider.as_ref())?.list_backups().await?;
            Ok(serde_json::to_value(backups)?)
        }
        CommandType::Delete { id } => {
            backup_capability(provider.as_ref())?.delete_backup(id).await?;
            Ok(json!({ "deleted": id }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        let cmd = Command::parse(&["db.toml", "health"]).unwrap();
        assert_eq!(cmd.config_path, PathBuf::from("db.toml"));
        assert_eq!(cmd.command_type, CommandType::Health);

        let cmd = Command::parse(&["db.toml", "list"]).unwrap();
        assert_eq!(cmd.command_type, CommandType::List);
    }

    #[test]
    fn test_parse_backup_dir_is_optional() {
        let cmd = Command::parse(&["db.toml", "backup"]).unwrap();
        assert_eq!(cmd.command_type, CommandType::Backup { dir: None });

        let cmd = Command::parse(&["db.toml", "backup", "/srv/b"]).unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Backup {
                dir: Some(PathBuf::from("/srv/b"))
            }
        );
    }

    #[test]
    fn test_parse_missing_args() {
        assert!(Command::parse(&["db.toml", "restore"]).is_err());
        assert!(Command::parse(&["db.toml", "delete", " "]).is_err());
        assert!(Command::parse(&["db.toml"]).is_err());
        assert!(Command::parse::<&str>(&[]).is_err());
    }

    #[test]
    fn test_parse_invalid_command() {
        let err = Command::parse(&["db.toml", "vacuum"]).unwrap_err();
        assert!(err.to_string().contains("unknown command"));
    }
}
