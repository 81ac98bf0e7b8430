//! Command-line surface. Each subcommand stands in for one screen of the web
//! client; `home` plays the part of the navigation bar.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Upload, tag and search bird media.
#[derive(Parser, Debug)]
#[command(name = "birdtag")]
#[command(about = "Upload, tag and search bird media")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Welcome text and the commands available right now
    Home,

    /// Create an account (a confirmation code is e-mailed)
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long, env = "BIRDTAG_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, env = "BIRDTAG_PASSWORD_CONFIRM", hide_env_values = true)]
        confirm_password: String,
    },

    /// Confirm a new account with the e-mailed code
    Confirm {
        #[arg(long)]
        email: String,
        #[arg(long)]
        code: String,
    },

    /// Sign in and store the session
    Signin {
        #[arg(long)]
        email: String,
        #[arg(long, env = "BIRDTAG_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Sign out and forget the stored session
    Signout,

    /// Show the signed-in user
    Whoami,

    /// Upload one or more media files for tagging
    Upload { files: Vec<PathBuf> },

    /// List or delete stored media
    Media {
        #[command(subcommand)]
        command: MediaCommand,
    },

    /// Edit the tags of a stored file
    Tags {
        #[command(subcommand)]
        command: TagsCommand,
    },

    /// Search stored media
    Search {
        #[command(subcommand)]
        command: SearchCommand,
    },

    /// Resolve a thumbnail URL to its full-size media
    OriginalUrl { thumbnail_url: String },

    /// Upload a file and find stored media with the same species
    QueryUpload { file: PathBuf },

    /// Manage e-mail notifications for new media with given tags
    Subscriptions {
        #[command(subcommand)]
        command: SubscriptionsCommand,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum MediaCommand {
    /// List every stored file with its tags
    List,
    /// Delete a stored file
    Delete {
        file_id: String,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum TagsCommand {
    /// Add COUNT occurrences of TAG
    Add {
        file_id: String,
        tag: String,
        #[arg(allow_negative_numbers = true)]
        count: i64,
    },
    /// Remove TAG entirely
    Remove { file_id: String, tag: String },
    /// Set TAG to exactly COUNT
    Set {
        file_id: String,
        tag: String,
        #[arg(allow_negative_numbers = true)]
        count: i64,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum SearchCommand {
    /// Files with every tag at a minimum count: `crow=2 myna`
    Tags { filters: Vec<String> },
    /// Files with any of the species
    Species { names: Vec<String> },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum SubscriptionsCommand {
    /// Show current subscriptions
    Show,
    /// Replace subscriptions with the given tags
    Set { tags: Vec<String> },
    /// Subscribe to or unsubscribe from one tag
    Toggle { tag: String },
}

impl Command {
    /// Stable name used in log spans.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Home => "home",
            Command::Signup { .. } => "signup",
            Command::Confirm { .. } => "confirm",
            Command::Signin { .. } => "signin",
            Command::Signout => "signout",
            Command::Whoami => "whoami",
            Command::Upload { .. } => "upload",
            Command::Media { command: MediaCommand::List } => "media.list",
            Command::Media { command: MediaCommand::Delete { .. } } => "media.delete",
            Command::Tags { command: TagsCommand::Add { .. } } => "tags.add",
            Command::Tags { command: TagsCommand::Remove { .. } } => "tags.remove",
            Command::Tags { command: TagsCommand::Set { .. } } => "tags.set",
            Command::Search { command: SearchCommand::Tags { .. } } => "search.tags",
            Command::Search { command: SearchCommand::Species { .. } } => "search.species",
            Command::OriginalUrl { .. } => "original-url",
            Command::QueryUpload { .. } => "query-upload",
            Command::Subscriptions { command: SubscriptionsCommand::Show } => "subscriptions.show",
            Command::Subscriptions { command: SubscriptionsCommand::Set { .. } } => "subscriptions.set",
            Command::Subscriptions { command: SubscriptionsCommand::Toggle { .. } } => "subscriptions.toggle",
        }
    }

    /// Whether the command goes through the auth guard.
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            Command::Home
                | Command::Signup { .. }
                | Command::Confirm { .. }
                | Command::Signin { .. }
                | Command::Signout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_tag_search_and_global_verbose() {
        let cli = Cli::parse_from(["birdtag", "search", "tags", "crow=2", "myna", "-v"]);
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Command::Search {
                command: SearchCommand::Tags {
                    filters: vec!["crow=2".into(), "myna".into()]
                }
            }
        );
        assert_eq!(cli.command.name(), "search.tags");
        assert!(cli.command.requires_auth());
    }

    #[test]
    fn test_negative_counts_reach_validation() {
        let cli = Cli::parse_from(["birdtag", "tags", "add", "f1", "crow", "-3"]);
        assert!(matches!(
            cli.command,
            Command::Tags { command: TagsCommand::Add { count: -3, .. } }
        ));
    }

    #[test]
    fn test_public_commands_skip_the_guard() {
        let cli = Cli::parse_from(["birdtag", "signin", "--email", "a@b.c", "--password", "pw"]);
        assert!(!cli.command.requires_auth());
        assert!(!Command::Home.requires_auth());
        assert!(Command::Whoami.requires_auth());
    }
}
