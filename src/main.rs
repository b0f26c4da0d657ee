use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swarmplan::cli::{
    apply_cluster, format_plan, format_reconcile_report, format_render_summary,
    format_validation_result, plan_from_file, render_cluster, ssh_executor, validate_cluster,
    ApplyOptions, Cli, CommandError, Commands, OutputFormat,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(cli).await {
        error!("{}", e);
        process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CommandError> {
    match cli.command {
        Commands::Plan(ref args) => {
            let plan = plan_from_file(&cli.file, cli.environment)?;
            let output = match args.output {
                OutputFormat::Table => format_plan(&plan),
                OutputFormat::Json => serde_json::to_string_pretty(&plan)
                    .map_err(swarmplan::render::RenderError::from)?,
                OutputFormat::Yaml => {
                    serde_yaml::to_string(&plan).map_err(swarmplan::render::RenderError::from)?
                }
            };
            println!("{}", output);
        }

        Commands::Validate => {
            let result = validate_cluster(&cli.file, cli.environment);
            print!("{}", format_validation_result(&result, &cli.file));
            if !result.valid {
                process::exit(2);
            }
        }

        Commands::Render(ref args) => {
            let plan = plan_from_file(&cli.file, cli.environment)?;
            let summary = render_cluster(
                &plan,
                args.public_ips.as_deref(),
                &args.ssh_user,
                &args.out,
                args.dry_run,
            )?;
            print!("{}", format_render_summary(&summary));
        }

        Commands::Apply(ref args) => {
            let plan = plan_from_file(&cli.file, cli.environment)?;
            let options = ApplyOptions::from(args);
            info!(
                "Applying {} steps via bastion {}",
                plan.join_order.len(),
                options.bastion
            );
            let executor = Arc::new(ssh_executor(&plan, &options));
            let report = apply_cluster(&plan, executor, &options).await?;
            print!("{}", format_reconcile_report(&report));
        }
    }

    Ok(())
}
