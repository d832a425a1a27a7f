use gateway_analytics::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    gateway_analytics::run().await
}
