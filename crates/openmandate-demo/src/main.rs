//! OpenMandate demo binary - run one scripted purchase and print the trail
//!
//! ```bash
//! cargo run -p openmandate-demo
//! cargo run -p openmandate-demo -- --sku laptop_001 --ceiling 2000.00
//! ```

use anyhow::{bail, Result};
use clap::Parser;
use openmandate_demo::{PurchaseFlow, PurchaseRequest};
use openmandate_store::AuditOutcome;
use openmandate_types::{Amount, Sku, UserId};
use tracing_subscriber::EnvFilter;

/// Drive a three-party mandate purchase end to end
#[derive(Parser)]
#[command(name = "openmandate-demo")]
#[command(author = "OpenMandate Contributors")]
#[command(version)]
#[command(about = "Scripted shopper/merchant/provider purchase over the mandate protocol")]
struct Cli {
    /// User on file with the credentials provider
    #[arg(long, default_value = "user_bugs_bunny")]
    user: String,

    /// What the shopper is looking for
    #[arg(long, default_value = "a laptop for school")]
    item: String,

    /// Price ceiling in dollars, e.g. 1000.00
    #[arg(long, default_value = "1000.00")]
    ceiling: String,

    /// Catalog SKU to buy
    #[arg(long, default_value = "laptop_003")]
    sku: String,

    /// Quantity to buy
    #[arg(long, default_value_t = 1)]
    quantity: u32,

    /// Payment method on file
    #[arg(long, default_value = "pm_amex_8888")]
    payment_method: String,

    /// OTP code to answer the challenge with
    #[arg(long, default_value = "123")]
    otp: String,
}

fn parse_dollars(value: &str) -> Result<Amount> {
    let normalized = value.trim().trim_start_matches('$');
    let cents = match normalized.split_once('.') {
        None => normalized.parse::<u64>()? * 100,
        Some((dollars, fraction)) => {
            if fraction.len() != 2 {
                bail!("amount must have exactly two decimal places: {value}");
            }
            dollars.parse::<u64>()? * 100 + fraction.parse::<u64>()?
        }
    };
    Ok(Amount::from_cents(cents))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let request = PurchaseRequest {
        user_id: UserId::new(&cli.user),
        item_description: cli.item,
        price_ceiling: parse_dollars(&cli.ceiling)?,
        sku: Sku::new(&cli.sku),
        quantity: cli.quantity,
        payment_method_id: cli.payment_method,
        otp_code: cli.otp,
    };

    let flow = PurchaseFlow::new().await;
    let report = flow.run(request).await;

    println!();
    println!("session   {}", report.session_id);
    println!("state     {}", report.final_state);
    if let Some(failure) = &report.failure {
        println!("failure   {failure}");
    }
    println!();
    println!("audit trail ({} records, chain {}):", report.audit_records.len(),
        if report.chain_verified { "verified" } else { "BROKEN" });
    for record in &report.audit_records {
        match &record.outcome {
            AuditOutcome::Accepted { from, to } => {
                println!("  [{}] accepted  {from} -> {to}", record.step_index)
            }
            AuditOutcome::Rejected { reason } => {
                println!("  [{}] rejected  {reason}", record.step_index)
            }
        }
    }
    if let Some(receipt) = &report.captured {
        println!();
        println!(
            "captured  {} {} (txn {}, settles {})",
            receipt.amount,
            receipt.currency.code(),
            receipt.transaction_id,
            receipt.settlement_date
        );
    }
    if let Some(order) = &report.fulfillment {
        println!(
            "shipping  {} via {} (est. {})",
            order.tracking_number,
            order.shipping_method,
            order.estimated_shipping.date_naive()
        );
    }
    Ok(())
}
