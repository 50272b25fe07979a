#[tokio::main]
async fn main() -> eyre::Result<()> {
    vigil_api::run().await
}
