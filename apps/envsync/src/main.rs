mod app;
mod cli;
mod commands;
mod doctor;
mod permissions;

use clap::Parser;

use app::App;
use cli::{Cli, Command, EnvCommand, PhraseCommand, ProjectCommand, TeamCommand};

fn main() {
    let cli = Cli::parse();
    let app = match App::new() {
        Ok(app) => app,
        Err(err) => fatal(err.as_ref()),
    };
    if let Err(err) = run(&app, cli.command) {
        fatal(err.as_ref());
    }
}

fn fatal(err: &dyn std::error::Error) -> ! {
    eprintln!("error: {err}");
    std::process::exit(1);
}

fn run(app: &App, command: Command) -> app::CliResult {
    match command {
        Command::Init => commands::init::run(app),
        Command::Login => commands::session::login(app),
        Command::Logout => commands::session::logout(app),
        Command::Whoami => commands::session::whoami(app),
        Command::Doctor { json } => doctor::run(app, json),
        Command::Restore => commands::sync::restore(app),
        Command::Project { project_cmd } => match project_cmd {
            ProjectCommand::Create { name } => commands::project::create(app, &name),
            ProjectCommand::List => commands::project::list(app),
            ProjectCommand::Use { name } => commands::project::use_project(app, &name),
            ProjectCommand::Delete { name } => commands::project::delete(app, &name),
        },
        Command::Team { team_cmd } => match team_cmd {
            TeamCommand::Create { name } => commands::team::create(app, &name),
            TeamCommand::List => commands::team::list(app),
            TeamCommand::Use { name } => commands::team::use_team(app, &name),
            TeamCommand::AddMember { team, actor, role } => {
                commands::team::add_member(app, &team, &actor, &role)
            }
            TeamCommand::RemoveMember { team, actor } => {
                commands::team::remove_member(app, &team, &actor)
            }
            TeamCommand::ListMembers { team } => {
                commands::team::list_members(app, team.as_deref())
            }
        },
        Command::Env { env_cmd } => match env_cmd {
            EnvCommand::Create { name } => commands::env::create(app, &name),
            EnvCommand::Use { name } => commands::env::use_env(app, &name),
            EnvCommand::List => commands::env::list(app),
        },
        Command::Set {
            key,
            value,
            expires_at,
        } => commands::secret::set(app, &key, &value, expires_at.as_deref()),
        Command::Rotate { key, value } => commands::secret::rotate(app, &key, &value),
        Command::Get { key } => commands::secret::get(app, &key),
        Command::Delete { key } => commands::secret::delete(app, &key),
        Command::List { show } => commands::secret::list(app, show),
        Command::Load => commands::secret::load(app),
        Command::Import { file } => commands::secret::import(app, &file),
        Command::Export { file } => commands::secret::export(app, &file),
        Command::History { key } => commands::secret::history(app, &key),
        Command::Rollback { key, version } => commands::secret::rollback(app, &key, version),
        Command::Diff => commands::sync::diff(app),
        Command::Push { force } => commands::sync::push(app, force),
        Command::Pull { force_remote } => commands::sync::pull(app, force_remote),
        Command::Phrase { phrase_cmd } => match phrase_cmd {
            PhraseCommand::Save => commands::phrase::save(app),
            PhraseCommand::Clear => commands::phrase::clear(app),
        },
    }
}
