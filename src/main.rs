use clap::Parser;

use fire_planner::api::{Cli, Command, render_command, run_http_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port } => run_http_server(port).await?,
        command => println!("{}", render_command(&command)?),
    }
    Ok(())
}
