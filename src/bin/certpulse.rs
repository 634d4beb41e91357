use certpulse::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::start().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
