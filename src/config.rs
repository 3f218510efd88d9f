use clap::Parser;

/// Local development backend; deployments point `--api-base` or
/// `XUANMING_API_BASE` at the hosted endpoint.
pub const DEFAULT_API_BASE: &str = "http://localhost:5000/api";

#[derive(Debug, Parser)]
#[command(name = "xuanming", about = "Terminal chat client for the Xuanming assistant")]
pub struct Cli {
    /// Base URL of the backend API.
    #[arg(long, env = "XUANMING_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,
}
