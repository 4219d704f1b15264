/// Tempo CLI
///
/// Runs programs delivered as JSON syntax trees on the cooperative scheduler.

use tempo_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
