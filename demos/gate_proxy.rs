use async_trait::async_trait;
use jwt_gate::pingora::filter_request;
use jwt_gate::prelude::*;
use pingora_core::server::Server;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::{Error, ErrorType, Result};
use pingora_proxy::{ProxyHttp, Session};
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct ProxyAppConfig {
    listen_addr: String,
    upstream_addr: String,
    discovery_timeout_seconds: Option<u64>,
    gate: GateSettings,
}

#[derive(Clone)]
struct UpstreamConfig {
    addr: String,
    tls: bool,
    sni: String,
}

struct GatedService {
    gate: Arc<Gate>,
    upstream: UpstreamConfig,
}

#[async_trait]
impl ProxyHttp for GatedService {
    type CTX = ();
    fn new_ctx(&self) -> Self::CTX {}

    async fn request_filter(&self, session: &mut Session, _ctx: &mut Self::CTX) -> Result<bool> {
        filter_request(&self.gate, session).await
    }

    async fn upstream_peer(&self, _session: &mut Session, _ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        Ok(Box::new(HttpPeer::new(
            &self.upstream.addr,
            self.upstream.tls,
            self.upstream.sni.clone(),
        )))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,jwt_gate=debug")))
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "demos/gate_config.yaml".to_string());
    let config_str = fs::read_to_string(&config_path).map_err(|e| {
        Error::explain(ErrorType::ReadError, format!("Failed to read config file {}: {:?}", config_path, e))
    })?;
    let app_config: ProxyAppConfig = serde_yaml::from_str(&config_str).map_err(|e| {
        Error::explain(
            ErrorType::InternalError,
            format!("Failed to parse YAML config from {}: {:?}", config_path, e),
        )
    })?;
    info!(settings = ?app_config.gate, "Loaded gate settings");

    let mut gate_builder = Gate::builder().settings(app_config.gate);
    if let Some(seconds) = app_config.discovery_timeout_seconds {
        gate_builder = gate_builder.discovery_timeout(Duration::from_secs(seconds));
    }
    let gate = gate_builder
        .build()
        .map_err(|e| Error::explain(ErrorType::InternalError, format!("Gate setup failed: {}", e)))?;

    let upstream_sni = app_config
        .upstream_addr
        .split(':')
        .next()
        .unwrap_or(&app_config.upstream_addr)
        .to_string();
    let service = GatedService {
        gate: Arc::new(gate),
        upstream: UpstreamConfig { addr: app_config.upstream_addr.clone(), tls: false, sni: upstream_sni },
    };

    let mut server = Server::new(None)?;
    server.bootstrap();

    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, service);
    proxy_service.add_tcp(&app_config.listen_addr);

    info!("Gated proxy listening on {}", app_config.listen_addr);
    server.add_service(proxy_service);
    server.run_forever();
}
