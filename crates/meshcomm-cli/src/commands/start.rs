use std::sync::Arc;

use meshcomm_config::MeshCommConfig;
use meshcomm_core::{MeshCommError, Result};
use meshcomm_mesh::{Libp2pTransport, MeshNetwork, NetworkOptions, SwarmOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Layer `start` flags over the loaded config.
pub(super) fn apply_overrides(
    mut config: MeshCommConfig,
    port: Option<u16>,
    nickname: Option<String>,
) -> Result<MeshCommConfig> {
    if let Some(port) = port {
        config.node.port = port;
    }
    if let Some(nickname) = nickname {
        config.node.nickname = nickname;
    }
    if config.node.nickname.trim().is_empty() {
        return Err(MeshCommError::Config("nickname must not be empty".into()));
    }
    Ok(config)
}

pub(super) async fn cmd_start(
    config: MeshCommConfig,
    peers: Vec<String>,
    no_server: bool,
) -> Result<()> {
    println!("MeshComm v{}", env!("CARGO_PKG_VERSION"));
    println!("   Nickname: {}", config.node.nickname);
    println!("   Listen: {}", config.node.listen_multiaddr());

    let transport = Libp2pTransport::start(SwarmOptions {
        listen_addr: config.node.listen_multiaddr(),
        bootstrap_peers: config.node.bootstrap_peers.clone(),
        mdns: config.node.mdns,
    })
    .await?;

    for peer in &peers {
        if let Err(e) = transport.dial(peer).await {
            warn!(peer = %peer, error = %e, "failed to dial peer");
        }
    }

    let shutdown = CancellationToken::new();
    let options = NetworkOptions {
        local_echo: config.network.local_echo,
        unjoined: config.network.unjoined_policy,
    };
    let network = Arc::new(
        MeshNetwork::join(&transport, &config.node.nickname, options, shutdown.clone()).await?,
    );
    println!("   Node ID: {}", network.node_id());

    network.on_message(|m| {
        info!(
            category = %m.category,
            from = %m.sender.nickname,
            node = %m.sender.node_id,
            "{}",
            m.content
        );
    });

    let server = if !no_server && config.server.enabled {
        println!("   Web UI: http://{}", config.server.listen);
        let server_config = config.server.clone();
        let network = Arc::clone(&network);
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = meshcomm_server::start_server(server_config, network, shutdown).await {
                error!(error = %e, "HTTP server failed");
            }
        }))
    } else {
        None
    };
    println!();

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    shutdown.cancel();
    network.shutdown().await;
    if let Some(server) = server {
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server task panicked");
        }
    }
    transport.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let config = apply_overrides(MeshCommConfig::default(), Some(4200), Some("medic".into()))
            .unwrap();
        assert_eq!(config.node.port, 4200);
        assert_eq!(config.node.nickname, "medic");
        assert_eq!(config.node.listen_multiaddr(), "/ip4/0.0.0.0/tcp/4200");
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let config = apply_overrides(MeshCommConfig::default(), None, None).unwrap();
        assert_eq!(config.node.port, 4001);
        assert_eq!(config.node.nickname, "anonymous");
    }

    #[test]
    fn test_blank_nickname_rejected() {
        let err = apply_overrides(MeshCommConfig::default(), None, Some("  ".into())).unwrap_err();
        assert!(matches!(err, MeshCommError::Config(_)));
    }
}
