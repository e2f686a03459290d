//! lspx entry point.
//!
//! Usage: `lspx [--provider KEY=SEL[,SEL...]]... -- CMD1 [ARG...] [-- CMD2 ...]`
//!
//! Logging goes to stderr (stdout carries the protocol); set `RUST_LOG`
//! to adjust verbosity.

use clap::Parser;

use lspx::{cli, supervisor};

#[derive(Parser, Debug)]
#[command(name = "lspx", version, about = "Multiplexing proxy for the Language Server Protocol")]
struct Args {
    /// Route a capability to specific backends: KEY is one of hover,
    /// completion, definition, rename, references, diagnostic; SEL is a
    /// backend index or executable name.
    #[arg(short, long = "provider", value_name = "KEY=SEL[,SEL...]")]
    provider: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let argv: Vec<String> = std::env::args().collect();
    let Some(split) = argv.iter().position(|arg| arg == "--") else {
        anyhow::bail!("not command found");
    };

    let args = Args::parse_from(&argv[..split]);
    let commands = cli::split_command_groups(&argv[split + 1..]);
    let providers = cli::parse_providers(&args.provider)?;

    supervisor::run(supervisor::Config {
        commands,
        providers,
    })
    .await
}
