//! `xbull sign`: request a transaction signature.
//!
//! `--reject` makes the simulated wallet decline; `--abandon` makes the
//! simulated user close the popup instead, which the connector notices on
//! its next liveness check.

use anyhow::{Context, Result};
use tracing::info;

use xbull_connect::{ConnectConfig, Decision, WalletRequest};
use xbull_core::{RequestBody, SignParams};

use super::{simulated_signature, SimulatedExtension, Simulation, SIMULATED_ADDRESS};

/// How the simulated wallet answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Approve,
    Reject,
    Abandon,
}

impl Behaviour {
    pub fn from_flags(reject: bool, abandon: bool) -> Self {
        match (reject, abandon) {
            (true, _) => Self::Reject,
            (false, true) => Self::Abandon,
            (false, false) => Self::Approve,
        }
    }

    fn decide(self, request: &WalletRequest) -> Decision {
        match (self, &request.body) {
            (Self::Approve, RequestBody::Sign(params)) => {
                let signer = params.public_key.as_deref().unwrap_or(SIMULATED_ADDRESS);
                Decision::Approve(simulated_signature(&params.xdr, signer))
            }
            (Self::Approve, RequestBody::Connect(_)) => Decision::Approve(SIMULATED_ADDRESS.to_string()),
            (Self::Reject, _) => Decision::Reject(None),
            (Self::Abandon, _) => Decision::Abandon,
        }
    }
}

pub async fn run(
    config: ConnectConfig,
    xdr: String,
    network: Option<String>,
    public_key: Option<String>,
    behaviour: Behaviour,
) -> Result<()> {
    let extension = SimulatedExtension::new(SIMULATED_ADDRESS, behaviour != Behaviour::Approve);
    let mut sim = Simulation::start(config, extension)?;
    let wallet = sim.serve_next_popup(move |request| behaviour.decide(request));

    let params = SignParams {
        xdr,
        public_key,
        network,
    };
    info!(?behaviour, "requesting signature");
    let result = sim.connector.sign(params).await;
    sim.finish(wallet).await?;

    let signed = result.context("sign failed")?;
    println!("{signed}");
    Ok(())
}
