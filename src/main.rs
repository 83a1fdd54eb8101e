use solax_bridge::prelude::*;

#[tokio::main]
async fn main() {
    let options = Options::new();

    if let Err(e) = solax_bridge::app(options).await {
        // logging may not be up yet if the config failed to load
        eprintln!("solax-bridge: {:#}", e);
        error!("{:#}", e);
        std::process::exit(255);
    }
}
