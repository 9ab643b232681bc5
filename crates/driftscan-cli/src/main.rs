mod app;
mod cli;
mod reporters;

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    if let Err(e) = app::run(cli).await {
        tracing::error!(error = %e.log_message(), "run failed");
        eprintln!("ERROR: {}", e.user_message());
        if let Some(suggestion) = &e.suggested_action {
            eprintln!("Suggestion: {suggestion}");
        }
        std::process::exit(1);
    }
}
