//! Drive the pipeline by posting orders to the aggregator.
//!
//! ```bash
//! simulate --provider P1 --product X --orders 25
//! ```

use anyhow::Context;
use bulk_purchase_core::order::OrderRequest;
use bulk_purchase_pipeline::telemetry::init_tracing;
use clap::Parser;
use std::time::Duration;
use tracing::info;

/// Post a run of orders to `/aggregate_order`.
#[derive(Debug, Parser)]
#[command(name = "simulate", version, about)]
struct Args {
    /// Aggregator base URL
    #[arg(long, env = "AGGREGATOR_URL", default_value = "http://localhost:5006")]
    url: String,

    /// Provider to order from
    #[arg(long, default_value = "P1")]
    provider: String,

    /// Product to order
    #[arg(long, default_value = "X")]
    product: String,

    /// Units per order
    #[arg(long, default_value_t = 1)]
    quantity: i64,

    /// Number of orders to post
    #[arg(long, default_value_t = 10)]
    orders: usize,

    /// Pause between orders, in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;
    let endpoint = format!("{}/aggregate_order", args.url.trim_end_matches('/'));
    let order = OrderRequest::new(&args.provider, &args.product, args.quantity);

    info!(endpoint = %endpoint, orders = args.orders, "Posting orders");

    for n in 1..=args.orders {
        let response = client
            .post(&endpoint)
            .json(&order)
            .send()
            .await
            .with_context(|| format!("Order {n} could not be sent"))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        println!("order {n}: {status} {body}");

        if args.interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }

    Ok(())
}
