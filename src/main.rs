use clap::Parser;
use xuanming::client::ApiClient;
use xuanming::config::Cli;
use xuanming::ui;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api_base);

    ui::run_tui(client)
}

// Logging goes to stderr and only when asked for; an unconditional
// subscriber would scribble over the inline viewport.
fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }
}
