//! `xbull url`: print the popup URL for a fresh session.

use anyhow::Result;
use tracing::info;

use xbull_connect::ConnectConfig;

use super::{SimulatedExtension, Simulation, SIMULATED_ADDRESS};

pub async fn run(config: ConnectConfig) -> Result<()> {
    let sim = Simulation::start(config, SimulatedExtension::new(SIMULATED_ADDRESS, false))?;
    info!(session = %sim.connector.session_id(), "generated session");
    println!("{}", sim.connector.popup_url());
    sim.connector.close_connections().await;
    Ok(())
}
