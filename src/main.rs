//! Binary entry point for the labship CLI.

use std::env;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use labship::{
    AwsCli, AwsCliConfig, AwsError, ConfigError, CredentialStore, EnvironmentError,
    EnvironmentLoader, Instance, LabshipConfig, LabshipPaths, LaunchError, LaunchOptions,
    LaunchOrchestrator, LaunchSettings, ProcessCommandRunner, StateError, StateStore,
    is_tool_owned,
};

mod cli;

use cli::{Cli, Command, ImageCommand, KeysCommand, LaunchCommand, ScriptCommand};

type Aws = AwsCli<ProcessCommandRunner>;
type Orchestrator = LaunchOrchestrator<Aws, Aws>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("aws cli error: {0}")]
    Aws(#[from] AwsError),
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let exit_code = match dispatch(cli.command) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();
}

fn dispatch(command: Command) -> Result<(), CliError> {
    let config = LabshipConfig::load_without_cli_args()?;
    let home = env::var("HOME").ok();
    let paths = config.paths(home.as_deref())?;

    match command {
        Command::Script(args) => script_command(&paths, &args),
        Command::Environments => environments_command(&paths),
        Command::List => list_command(&paths),
        Command::Launch(args) => launch_command(&orchestrator(&config, &paths)?, &args),
        Command::Terminate(args) => {
            let instance = orchestrator(&config, &paths)?.terminate(&args.instance_id)?;
            emit(&format!("terminated {} ({})", instance.id, instance.environment))
        }
        Command::Keys(KeysCommand::List { owned }) => {
            let launcher = orchestrator(&config, &paths)?;
            let prefix = launcher.resolver().prefix().to_owned();
            for record in launcher.key_pairs(owned)? {
                let owner = if is_tool_owned(&record.name, &prefix) {
                    "labship"
                } else {
                    "external"
                };
                emit(&format!("{}\t{}\t{owner}", record.name, record.fingerprint))?;
            }
            Ok(())
        }
        Command::Keys(KeysCommand::Delete { name }) => {
            let removal = orchestrator(&config, &paths)?.delete_key_pair(&name)?;
            let remote = if removal.remote { "deleted" } else { "already absent" };
            let local = if removal.local { "removed" } else { "none" };
            emit(&format!("{name}: remote key {remote}, local key file {local}"))
        }
        Command::Image(ImageCommand::Delete { image_id }) => {
            let pruned = orchestrator(&config, &paths)?.delete_image(&image_id)?;
            emit(&format!("deleted {image_id}; forgot {pruned} instance record(s)"))
        }
    }
}

fn orchestrator(config: &LabshipConfig, paths: &LabshipPaths) -> Result<Orchestrator, CliError> {
    let aws = AwsCli::with_process_runner(AwsCliConfig::new(&config.aws_bin, &config.region)?);
    Ok(LaunchOrchestrator::new(
        aws.clone(),
        aws,
        loader(paths),
        CredentialStore::new(paths.keys_dir.clone()),
        StateStore::new(paths.state_file.clone()),
        LaunchSettings::from(config),
    ))
}

fn loader(paths: &LabshipPaths) -> EnvironmentLoader {
    EnvironmentLoader::new(
        paths.environments_dir.clone(),
        paths.builtin_environments_dir.clone(),
    )
}

fn launch_command(orchestrator: &Orchestrator, args: &LaunchCommand) -> Result<(), CliError> {
    let options = LaunchOptions {
        key_name: args.key_name.clone(),
        force_new_key: args.new_key,
        instance_type: args.instance_type.clone(),
    };
    let outcome = orchestrator.launch(&args.environment, &options)?;
    emit(&render_instance(&outcome.instance))?;
    if let Some(path) = outcome.private_key_path {
        emit(&format!("ssh key: {path} ({} key pair)", outcome.key_created_by))?;
    }
    Ok(())
}

fn script_command(paths: &LabshipPaths, args: &ScriptCommand) -> Result<(), CliError> {
    let environment = loader(paths).load(&args.environment)?;
    let script = labship::bootstrap::compile(&environment);
    if args.encoded {
        script
            .ensure_within_limit(&environment.name)
            .map_err(LaunchError::from)?;
        return emit(&script.encoded());
    }
    let mut stdout = io::stdout().lock();
    stdout.write_all(script.as_str().as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn environments_command(paths: &LabshipPaths) -> Result<(), CliError> {
    for name in loader(paths).available()? {
        emit(&name)?;
    }
    Ok(())
}

fn list_command(paths: &LabshipPaths) -> Result<(), CliError> {
    let state = StateStore::new(paths.state_file.clone()).load()?;
    if state.instances.is_empty() {
        return emit("no tracked instances");
    }
    for instance in state.instances.values() {
        emit(&render_instance(instance))?;
    }
    Ok(())
}

fn render_instance(instance: &Instance) -> String {
    let address = instance
        .public_ip
        .map_or_else(|| String::from("-"), |ip| ip.to_string());
    format!(
        "{}\t{}\t{}\t{address}\t{}\t{}",
        instance.id,
        instance.environment,
        instance.instance_type,
        instance.key_name,
        instance.launch_time.to_rfc3339(),
    )
}

fn emit(line: &str) -> Result<(), CliError> {
    writeln!(io::stdout(), "{line}")?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
