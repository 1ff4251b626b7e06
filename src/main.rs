use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing::error;

use lbmon::cli::{Cli, Commands};
use lbmon::commands::{supervise, worker};
use lbmon::error::{MonitorError, EXIT_FATAL, EXIT_OK, EXIT_USAGE};
use lbmon::logging;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version also arrive here
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let command = cli.resolved_command();
    // Detaching commands end up writing to the log file
    let ansi = !matches!(command, Commands::Start | Commands::Restart)
        && std::io::stderr().is_terminal();
    logging::init(cli.debug, ansi);

    let result = match command {
        Commands::Start => supervise::start(&cli.config, cli.debug).map(|()| EXIT_OK),
        Commands::Stop => supervise::stop(&cli.config).map(|()| EXIT_OK),
        Commands::Restart => supervise::restart(&cli.config, cli.debug).map(|()| EXIT_OK),
        Commands::Foreground => supervise::foreground(&cli.config, cli.debug).map(|()| EXIT_OK),
        Commands::Worker {
            cluster_id,
            parent_pid,
            parent_token,
        } => worker::execute(&cli.config, cluster_id, parent_pid, parent_token),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            let code = e
                .downcast_ref::<MonitorError>()
                .map_or(EXIT_FATAL, MonitorError::exit_code);
            ExitCode::from(code)
        }
    }
}
