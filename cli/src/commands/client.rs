//! `ciphernet client` — the data-owner side.

use clap::Args;
use tracing::info;

use ciphernet_session::{ClientConfig, HeClient};

use crate::config::{default_retry, input_mode, CipherNetConfig};

#[derive(Args)]
pub struct ClientCommand {
    /// Server session address
    #[arg(long)]
    addr: Option<String>,

    /// Server 2PC address
    #[arg(long)]
    mpc_addr: Option<String>,

    /// Comma-separated input values
    #[arg(long, value_delimiter = ',', required = true)]
    inputs: Vec<f64>,

    /// Send inputs in plaintext instead of encrypting them
    #[arg(long)]
    plain: bool,
}

impl ClientCommand {
    pub async fn execute(self, file: CipherNetConfig) -> anyhow::Result<()> {
        let cfg = ClientConfig {
            addr: self.addr.unwrap_or(file.network.addr.clone()),
            mpc_addr: self.mpc_addr.unwrap_or(file.network.mpc_addr.clone()),
            gc: file.gc_options()?,
            input_mode: input_mode(self.plain),
            peer_timeout: file.peer_timeout(),
            retry: default_retry(),
        };

        info!(values = self.inputs.len(), "submitting inference request");
        let client = HeClient::connect(cfg, self.inputs).await?;
        let results = tokio::task::spawn_blocking(move || client.wait_results()).await??;

        println!(
            "{}",
            results
                .iter()
                .map(|v| format!("{v:.6}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }
}
