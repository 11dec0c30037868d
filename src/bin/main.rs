/// Ostinato Admin CLI
///
/// Administrative access to execution history storage: inspect and remove
/// workflow histories across both on-disk schema generations.

use ostinato_admin::cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
