use std::env;

use anyhow::Context;
use log::{info, warn};
use shroud_config::ShroudConfig;
use shroud_privacy::{ShieldedKeyBundle, SpendingKey};
use shroud_resilience::CallContext;
use shroud_wallet::ShieldedClient;

const USAGE: &str = "usage: shroud [status | sample-config]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    match env::args().nth(1).as_deref() {
        None | Some("status") => status().await,
        Some("sample-config") => {
            print!("{}", ShroudConfig::generate_sample());
            Ok(())
        }
        Some(other) => anyhow::bail!("unknown command '{other}'\n{USAGE}"),
    }
}

async fn status() -> anyhow::Result<()> {
    let config = ShroudConfig::load()?;
    info!("Relay {} ({})", config.relay.url, config.relay.chain_type);

    println!("relay:    {}", config.relay.url);
    println!("chain:    {}", config.relay.chain_type);
    println!("prover:   {:?}", config.prover.mode);
    println!("notes:    {}", config.notes.store_path);

    let Some(key_hex) = env::var("SHROUD_SPENDING_KEY").ok() else {
        println!("set SHROUD_SPENDING_KEY to show the shielded balance");
        return Ok(());
    };
    let key: [u8; 32] = hex::decode(key_hex.trim())
        .context("SHROUD_SPENDING_KEY is not hex")?
        .try_into()
        .map_err(|_| anyhow::anyhow!("SHROUD_SPENDING_KEY must be 32 bytes"))?;
    let keys = ShieldedKeyBundle::from_spending_key(SpendingKey::from_bytes(key));
    let password = env::var("SHROUD_STORE_PASSWORD").ok();

    let client = ShieldedClient::from_config(&config, keys, password.as_deref())?;
    let ctx = CallContext::for_caller(client.address());

    match client.relay().health(&ctx).await {
        Ok(health) if health.is_healthy() => println!("health:   ok"),
        Ok(health) => println!("health:   {}", health.status),
        Err(e) => {
            warn!("Relay health check failed: {e}");
            println!("health:   unreachable ({:?})", e.kind());
        }
    }

    println!("address:  {}", client.address());
    println!("notes:    {} tracked", client.store().len());
    println!("balance:  {}", client.balance());
    Ok(())
}
