mod cli;
mod commands;
mod formatting;
mod settings;

use std::process::ExitCode;

use cli::Commands;
use commands::SyncArgs;

#[tokio::main]
async fn main() -> ExitCode {
    run().await
}

async fn run() -> ExitCode {
    let args = cli::parse();
    settings::init_logging(args.verbose);

    match args.command {
        Commands::Sync {
            file_key,
            node_id,
            output_dir,
            force,
            dry_run,
            combine,
            publish,
            format,
            output,
        } => {
            let sync_args = SyncArgs {
                file_key,
                node_id,
                output_dir,
                force,
                dry_run,
                combine,
                publish,
            };
            commands::run_sync(args.config, sync_args, format, output).await
        }
        Commands::Resolve {
            node_id,
            file_key,
            offline,
            format,
            output,
        } => commands::run_resolve(args.config, node_id, file_key, offline, format, output).await,
        Commands::Assess {
            name,
            width,
            height,
            node_type,
            format,
            output,
        } => commands::run_assess(args.config, name, width, height, node_type, format, output),
    }
}
