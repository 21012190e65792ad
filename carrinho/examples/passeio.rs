use std::time::Duration;

use carrinho::*;
use tokio::time::sleep;

// Drives a short scripted loop and prints the indicator snapshot after each
// step. Handy for bench-testing a freshly flashed car without firing up the
// interactive remote.
#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let host = std::env::args()
        .nth(1)
        .expect("must pass host/IP of the car as first argument");

    let client = Client::new(host)?;
    client.ping().await?;

    for command in [
        Command::Forward,
        Command::Left,
        Command::Forward,
        Command::Right,
        Command::Backward,
    ] {
        client.send(command).await?;
        let status = client.status().await?;
        println!("{:?} -> {:?}", command, status);
        sleep(Duration::from_millis(750)).await;
    }

    client.send(Command::Stop).await?;

    Ok(())
}
