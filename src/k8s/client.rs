use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::error::{AppError, Result};

/// Builds a client for the cluster described by `kubeconfig`.
///
/// # Arguments
///
/// * `kubeconfig` - Kubeconfig text, YAML or JSON.
/// * `proxy` - Optional SOCKS5 proxy, `host:port` or a full `socks5://` URL.
/// * `insecure` - Skip verification of the API server certificate.
///
/// # Returns
///
/// A `Result` containing the `Client`.
pub async fn build_client(kubeconfig: &str, proxy: Option<&str>, insecure: bool) -> Result<Client> {
    let kubeconfig = Kubeconfig::from_yaml(kubeconfig)?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;

    if insecure {
        config.accept_invalid_certs = true;
        config.root_cert = None;
    }

    if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
        let url = proxy_url(proxy);
        config.proxy_url = Some(
            url.parse()
                .map_err(|e| AppError::Validation(format!("invalid proxy '{}': {}", proxy, e)))?,
        );
        tracing::debug!("Kubernetes client using proxy {}", url);
    }

    Ok(Client::try_from(config)?)
}

/// Bare `host:port` proxies are SOCKS5.
pub fn proxy_url(proxy: &str) -> String {
    let proxy = proxy.trim();
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("socks5://{}", proxy)
    }
}
