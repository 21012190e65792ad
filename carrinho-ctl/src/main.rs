use carrinho_ctl::console;
use carrinho_ctl::controller::{Config, DEFAULT_HOST};
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(
    name = "carrinho-ctl",
    version,
    about = "Drive an Arduino Wi-Fi car from the terminal"
)]
struct Cli {
    /// Address of the car, e.g. 192.168.4.1 or carrinho.local
    #[clap(default_value = DEFAULT_HOST)]
    host: String,
}

#[tokio::main]
async fn main() -> carrinho_ctl::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Cli::parse();

    let config = Config {
        host: args.host,
        ..Config::default()
    };

    console::run(config, tokio::signal::ctrl_c()).await?;

    Ok(())
}
