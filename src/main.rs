use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "tagsmith")]
#[command(about = "LLM-assisted injection of analytics tracking calls into web codebases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Enable verbose debug output")]
    verbose: bool,

    #[arg(long, global = true, help = "Perform a dry run without writing any files")]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Match specification items to code locations without editing")]
    Suggest {
        #[arg(long, help = "Path to the target repository")]
        repo: PathBuf,

        #[arg(long, help = "Path to the specification items JSON file")]
        items: PathBuf,

        #[arg(long, help = "Write the ranked suggestions to this JSON file")]
        out: Option<PathBuf>,

        #[arg(long, help = "Disable semantic scoring, heuristics only")]
        no_embeddings: bool,
    },

    #[command(about = "Run the full match-plan-apply pipeline")]
    Run {
        #[arg(long, help = "Path to the target repository")]
        repo: PathBuf,

        #[arg(long, help = "Path to the specification items JSON file")]
        items: PathBuf,

        #[arg(long, help = "Write the run report to this JSON file")]
        out: Option<PathBuf>,

        #[arg(long, help = "Disable semantic scoring, heuristics only")]
        no_embeddings: bool,

        #[arg(long, help = "Disable the already-tagged check")]
        no_skip: bool,
    },

    #[command(about = "Apply an externally authored tagging plan")]
    Apply {
        #[arg(long, help = "Path to the target repository")]
        repo: PathBuf,

        #[arg(long, help = "Path to the plan JSON file")]
        plan: PathBuf,

        #[arg(long, help = "Write the run report to this JSON file")]
        out: Option<PathBuf>,

        #[arg(long, help = "Disable the already-tagged check")]
        no_skip: bool,
    },

    #[command(about = "Restore all backed-up files from a previous run")]
    Rollback {
        #[arg(long, help = "Path to the target repository")]
        repo: PathBuf,

        #[arg(long, help = "Keep backup files after restoring them")]
        keep_backups: bool,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = cli::Config {
        verbose: cli.verbose,
        dry_run: cli.dry_run,
    };

    match cli.command {
        Commands::Suggest {
            repo,
            items,
            out,
            no_embeddings,
        } => {
            cli::suggest(&repo, &items, out.as_deref(), no_embeddings, &config)?;
        }
        Commands::Run {
            repo,
            items,
            out,
            no_embeddings,
            no_skip,
        } => {
            cli::run(&repo, &items, out.as_deref(), no_embeddings, no_skip, &config)?;
        }
        Commands::Apply {
            repo,
            plan,
            out,
            no_skip,
        } => {
            cli::apply(&repo, &plan, out.as_deref(), no_skip, &config)?;
        }
        Commands::Rollback { repo, keep_backups } => {
            cli::rollback(&repo, keep_backups, &config)?;
        }
    }

    Ok(())
}
