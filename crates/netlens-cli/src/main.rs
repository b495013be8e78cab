use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use netlens_engine::{ContextQuery, DesignServer};

#[derive(Parser)]
#[command(name = "netlens", version, about = "Query KiCad project connectivity")]
struct Cli {
    /// Project directory holding the .kicad_sch pages and board file
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize every page: component and net counts, cross-page nets
    Index,
    /// Print the compact text form of one page
    Page {
        /// Page name (the file name without extension)
        name: String,
        /// Emit a JSON object instead of the raw page text
        #[arg(long)]
        json: bool,
    },
    /// Show everything connected to one component or one net
    Context {
        /// Component reference designator, e.g. U3
        #[arg(short, long)]
        component: Option<String>,
        /// Net name, e.g. VBUS
        #[arg(short, long)]
        net: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let server = DesignServer::new();

    match cli.command {
        Command::Index => {
            let result = server.index(&cli.project)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Page { name, json } => {
            let result = server.page(&cli.project, &name)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", result.text);
            }
        }
        Command::Context { component, net } => {
            let request = ContextQuery { component, net };
            let result = server.context(&cli.project, &request)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}
