//! `xbull connect`: request the wallet's public key.
//!
//! Opens a popup (or calls the simulated extension), lets the simulated
//! wallet approve or decline, and prints the returned address.

use anyhow::{Context, Result};
use tracing::info;

use xbull_connect::{ConnectConfig, Decision};
use xbull_core::ConnectParams;

use super::{SimulatedExtension, Simulation};

pub async fn run(config: ConnectConfig, address: &str, reject: bool) -> Result<()> {
    let target = config.preferred_target;
    let mut sim = Simulation::start(config, SimulatedExtension::new(address, reject))?;

    let decision = if reject {
        Decision::Reject(None)
    } else {
        Decision::Approve(address.to_string())
    };
    let wallet = sim.serve_next_popup(move |_| decision);

    info!(%target, "requesting public key");
    let result = sim.connector.connect(ConnectParams::default()).await;
    sim.finish(wallet).await?;

    let public_key = result.context("connect failed")?;
    println!("{public_key}");
    Ok(())
}
