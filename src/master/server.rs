//! Master server: owns the cluster state and accepts client sessions.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::cluster::{
    probe, ClusterConfig, ClusterState, ManifestTable, DEFAULT_TRANSFER_BUF_SIZE,
};
use crate::master::session::{ClientId, ClientSession};
use crate::utils::{tcp_bind_with_retry, ShardError};

/// Configuration parameters struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterConfig {
    /// Size of the buffer used when relaying file bytes to slaves.
    pub transfer_buf_size: usize,

    /// Contact slaves concurrently on download and removal.
    pub parallel_fanout: bool,

    /// Path to the manifest backing file; empty means in-memory only.
    pub manifest_path: String,

    /// Refuse to start if no configured slave answers the startup probe.
    pub require_slaves_at_start: bool,

    /// Number of retries when binding the listening port.
    pub bind_retries: u8,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            transfer_buf_size: DEFAULT_TRANSFER_BUF_SIZE,
            parallel_fanout: false,
            manifest_path: "".into(),
            require_slaves_at_start: true,
            bind_retries: 0,
        }
    }
}

/// The master: accepts clients, one session task each.
pub struct MasterServer {
    /// Listener for client connections.
    listener: TcpListener,

    /// Shared cluster state handed to every session.
    state: ClusterState,

    /// Master's local directory, shown by LISTING.
    storage_dir: Option<PathBuf>,

    /// Next client ID to assign.
    next_client: ClientId,
}

impl MasterServer {
    /// Creates the master from a parsed cluster configuration: loads
    /// manifests, probes slaves once, and binds the client port.
    /// `config_str` is an optional TOML string of `MasterConfig` fields.
    pub async fn new_and_setup(
        cluster: &ClusterConfig,
        config_str: Option<&str>,
    ) -> Result<Self, ShardError> {
        let config = parsed_config!(config_str => MasterConfig;
                                    transfer_buf_size, parallel_fanout,
                                    manifest_path, require_slaves_at_start,
                                    bind_retries)?;
        if config.transfer_buf_size == 0 {
            return logged_err!("m"; "invalid config.transfer_buf_size '{}'",
                                    config.transfer_buf_size);
        }

        if cluster.slaves.is_empty() {
            pf_warn!("m"; "no slaves configured");
        }
        let active = probe(&cluster.slaves).await;
        pf_info!("m"; "{} of {} slave(s) active at startup: {:?}",
                      active.len(), cluster.slaves.len(), active.ids());
        if active.is_empty() && config.require_slaves_at_start {
            return logged_err!("m"; "no active slaves at startup");
        }

        let manifests = if config.manifest_path.is_empty() {
            ManifestTable::new()
        } else {
            ManifestTable::new_and_load(Path::new(&config.manifest_path))
                .await?
        };

        let state = ClusterState::new(cluster.slaves.clone(), manifests)
            .with_transfer_buf_size(config.transfer_buf_size)
            .with_parallel_fanout(config.parallel_fanout);

        let listener = tcp_bind_with_retry(
            &cluster.master_host,
            cluster.master_port,
            config.bind_retries,
        )
        .await?;
        pf_info!("m"; "master listening on '{}'", listener.local_addr()?);

        Ok(MasterServer {
            listener,
            state,
            storage_dir: cluster.storage_dir.clone(),
            next_client: 0,
        })
    }

    /// Address actually bound, useful when configured with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ShardError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared cluster state.
    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    /// Accept loop. Breaks out only upon the termination signal; sessions
    /// in flight are left to finish on their own.
    pub async fn run(
        &mut self,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), ShardError> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            pf_warn!("m"; "error accepting client: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        pf_warn!("m"; "error setting nodelay: {}", e);
                    }

                    let id = self.next_client;
                    self.next_client += 1;
                    let session = ClientSession::new(
                        id,
                        addr,
                        stream,
                        self.state.clone(),
                        self.storage_dir.clone(),
                    );
                    tokio::spawn(session.run());
                },

                // receiving termination signal
                _ = rx_term.changed() => {
                    pf_warn!("m"; "master caught termination signal");
                    break;
                }
            }
        }

        Ok(())
    }
}
