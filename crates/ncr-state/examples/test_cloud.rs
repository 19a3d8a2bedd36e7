//! Quick cloud connection check
//! Run with: cargo run --package ncr-state --example test_cloud

use futures::TryStreamExt;
use ncr_state::{CloudConfig, Context, Repository, SurrealHandle};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match CloudConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Missing environment variables: {}", e);
            std::process::exit(1);
        }
    };

    println!("Connecting to {} ({}/{})", config.endpoint, config.namespace, config.database);

    let handle = match SurrealHandle::setup_cloud(config).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Connection failed: {}", e);
            std::process::exit(1);
        }
    };
    println!("Connected, schema initialized");

    let tenant = std::env::var("NCR_TENANT_ID").unwrap_or_default();
    let ctx = Context::new().with_tenant(tenant);
    let kind = match std::env::args().nth(1).map(|k| k.parse()) {
        Some(Ok(kind)) => kind,
        Some(Err(e)) => {
            eprintln!("Bad kind: {}", e);
            std::process::exit(2);
        }
        None => return,
    };

    match handle.repository().stream(&kind, &ctx).await {
        Ok(stream) => match stream.try_collect::<Vec<_>>().await {
            Ok(records) => println!("{} record(s) of {}", records.len(), kind),
            Err(e) => eprintln!("Stream failed: {}", e),
        },
        Err(e) => eprintln!("Stream unavailable: {}", e),
    }
}
