//! Pipeline Worker - Entry Point
//!
//! Detects new death records, triages them and delivers notifications.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    vigil_pipeline_worker::run().await
}
