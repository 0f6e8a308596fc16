use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "envsync")]
#[command(about = "Encrypted, versioned env var sync for small teams")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a new vault on this device and print the recovery phrase
    Init,
    /// Validate a cloud access token and store the session
    Login,
    /// Remove the stored cloud session
    Logout,
    /// Show the identity behind the stored cloud session
    Whoami,
    /// Run read-only diagnostics
    Doctor {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Rebuild local state from the remote using the recovery phrase
    Restore,
    /// Project commands
    Project {
        #[command(subcommand)]
        project_cmd: ProjectCommand,
    },
    /// Team commands
    Team {
        #[command(subcommand)]
        team_cmd: TeamCommand,
    },
    /// Environment commands
    Env {
        #[command(subcommand)]
        env_cmd: EnvCommand,
    },
    /// Set a secret value
    Set {
        key: String,
        value: String,
        /// RFC3339 timestamp or duration (30m, 12h); empty means never
        #[arg(long)]
        expires_at: Option<String>,
    },
    /// Rotate an existing secret to a new value
    Rotate { key: String, value: String },
    /// Print a secret's current value
    Get { key: String },
    /// Append a deletion tombstone for a key
    Delete { key: String },
    /// List keys in the active environment
    List {
        /// Show decrypted values instead of masks
        #[arg(long)]
        show: bool,
    },
    /// Print shell export lines for the active environment
    Load,
    /// Import KEY=VALUE lines from a .env file
    Import { file: PathBuf },
    /// Export the active environment to a .env file
    Export { file: PathBuf },
    /// Show a key's version history
    History { key: String },
    /// Roll a key back to an earlier version
    Rollback {
        key: String,
        #[arg(long)]
        version: i64,
    },
    /// Compare the local environment against the remote
    Diff,
    /// Upload local changes to the remote
    Push {
        /// Let local records win conflicts
        #[arg(long)]
        force: bool,
    },
    /// Download remote changes
    Pull {
        /// Let remote records win conflicts
        #[arg(long)]
        force_remote: bool,
    },
    /// Recovery phrase keychain commands
    Phrase {
        #[command(subcommand)]
        phrase_cmd: PhraseCommand,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommand {
    /// Create a new project (with a default dev environment)
    Create { name: String },
    /// List projects
    List,
    /// Select a project and bind it to the current directory
    Use { name: String },
    /// Delete a project
    Delete { name: String },
}

#[derive(Subcommand)]
pub enum TeamCommand {
    /// Create a team; the creator becomes admin
    Create { name: String },
    /// List teams
    List,
    /// Select the current team
    Use { name: String },
    /// Add or update a member (roles: admin, maintainer, reader)
    AddMember {
        team: String,
        actor: String,
        role: String,
    },
    /// Remove a member
    RemoveMember { team: String, actor: String },
    /// List members of a team (defaults to the current team)
    ListMembers { team: Option<String> },
}

#[derive(Subcommand)]
pub enum EnvCommand {
    /// Create a new environment in the active project
    Create { name: String },
    /// Select the active environment
    Use { name: String },
    /// List environments in the active project
    List,
}

#[derive(Subcommand)]
pub enum PhraseCommand {
    /// Verify the phrase and store it in the OS keychain
    Save,
    /// Remove the phrase from the OS keychain
    Clear,
}
