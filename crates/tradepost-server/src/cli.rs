use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "tradepost-server", about = "Tradepost marketplace messaging server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/tradepost.toml")]
    pub config: String,
}
