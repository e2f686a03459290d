//! Backend wiring and proxy lifetime.
//!
//! Backends are spawned in launch order, then the client endpoint is
//! built over the host's stdio and handed to each backend as a weak
//! reference so reverse traffic can flow. Teardown runs in reverse:
//! client endpoint first, then every backend.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::Backend;
use crate::diagnostics::DiagnosticCache;
use crate::endpoint::Endpoint;
use crate::proxy::Proxy;

pub struct Config {
    pub commands: Vec<Vec<String>>,
    pub providers: HashMap<String, Vec<String>>,
}

/// Run the proxy until the client disconnects.
pub async fn run(config: Config) -> anyhow::Result<()> {
    if config.commands.is_empty() {
        anyhow::bail!("not command found");
    }

    let diagnostics = Arc::new(DiagnosticCache::default());

    let mut backends = Vec::new();
    for (index, command) in config.commands.iter().enumerate() {
        match Backend::spawn(index, command, diagnostics.clone()) {
            Ok(backend) => backends.push(backend),
            Err(e) => {
                for backend in backends.iter().rev() {
                    backend.close().await;
                }
                return Err(e);
            }
        }
    }

    let client = Endpoint::new("client", tokio::io::stdin(), tokio::io::stdout());
    let proxy = Arc::new(Proxy::new(backends.clone(), config.providers));
    client.clone().serve(proxy);
    for backend in &backends {
        backend.connect_proxy(Arc::downgrade(&client));
    }

    log::info!("proxying {} backend(s)", backends.len());
    client.closed().await;

    client.close().await;
    for backend in backends.iter().rev() {
        backend.close().await;
    }
    Ok(())
}
