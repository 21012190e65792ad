use std::time::Duration;

use carrinho::*;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let host = std::env::args()
        .nth(1)
        .expect("must pass host/IP of the car as first argument");

    let client = Client::new(host)?;

    let mut tick = tokio::time::interval(Duration::from_secs(2));
    loop {
        tick.tick().await;
        let status = client.status().await;
        println!("{:?}", &status);
    }
}
