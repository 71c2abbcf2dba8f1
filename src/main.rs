#[tokio::main]
async fn main() {
    if let Err(error) = playwatch_lib::run().await {
        eprintln!("playwatch failed: {error}");
        std::process::exit(1);
    }
}
