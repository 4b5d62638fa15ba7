//! `ciphernet server` — the model-owner side.
//!
//! Serves the demonstration pipeline: receive the encrypted input vector,
//! apply ReLU (bounded when `--bound` is given) through the non-linear
//! engine, and return the encrypted result.

use clap::Args;
use tracing::{error, info};

use ciphernet_ledger::require_depth;
use ciphernet_session::{HeServer, ServerConfig, ServerSession, SessionResult};

use crate::config::{preset_parameters, CipherNetConfig};

#[derive(Args)]
pub struct ServerCommand {
    /// Session listen address
    #[arg(long)]
    addr: Option<String>,

    /// Dedicated 2PC listen address
    #[arg(long)]
    mpc_addr: Option<String>,

    /// Parameter preset: reference, medium, toy
    #[arg(long)]
    preset: Option<String>,

    /// Multiplicative depth the compiled function needs
    #[arg(long, default_value_t = 0)]
    depth: usize,

    /// Input vector length the pipeline expects
    #[arg(long, default_value_t = 4)]
    batch: usize,

    /// Clip bound; plain ReLU when omitted
    #[arg(long)]
    bound: Option<f64>,

    /// Disable garbled circuits (degraded-privacy fallback)
    #[arg(long)]
    no_gc: bool,

    /// Serve a single session, then exit
    #[arg(long)]
    once: bool,
}

impl ServerCommand {
    pub async fn execute(self, file: CipherNetConfig) -> anyhow::Result<()> {
        let params = match &self.preset {
            Some(name) => preset_parameters(name)?,
            None => file.parameters()?,
        };
        // Fail at startup when the chain cannot cover the pipeline.
        require_depth(&params, self.depth)
            .map_err(|e| anyhow::anyhow!("encryption parameters too shallow: {e}"))?;

        let mut gc = file.gc_options()?;
        if self.no_gc {
            gc.enabled = false;
        }
        let cfg = ServerConfig {
            addr: self.addr.unwrap_or(file.network.addr.clone()),
            mpc_addr: self.mpc_addr.unwrap_or(file.network.mpc_addr.clone()),
            params,
            gc,
            peer_timeout: file.peer_timeout(),
        };

        let server = HeServer::bind(cfg).await?;
        info!(addr = %server.local_addr()?, "serving inference sessions");

        loop {
            let session = server.accept().await?;
            let batch = self.batch;
            let bound = self.bound;
            let outcome =
                tokio::task::spawn_blocking(move || drive_session(session, batch, bound))
                    .await?;
            match outcome {
                Ok(()) => info!("session complete"),
                Err(e) => error!(error = %e, "session failed"),
            }
            if self.once {
                return Ok(());
            }
        }
    }
}

/// The demonstration evaluation loop, standing in for the tensor-compiler
/// driver: strictly sequential, one operator at a time.
fn drive_session(mut session: ServerSession, batch: usize, bound: Option<f64>) -> SessionResult<()> {
    let inputs = session.wait_for_inputs(vec![batch], true)?;
    let activated = match bound {
        Some(b) => session.bounded_relu(inputs, b)?,
        None => session.relu(inputs)?,
    };
    session.send_result(activated)
}
