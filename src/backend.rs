//! Backend server handle.
//!
//! One `Backend` owns one child language-server process and the framed
//! endpoint speaking to it. Outbound requests pass through per-backend
//! rewrites before reaching the child; everything the child sends back is
//! forwarded to the client through the proxy endpoint, with
//! `textDocument/publishDiagnostics` folded through the shared cache so
//! the client always sees the union of every backend's diagnostics.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, OnceLock, Weak};

use anyhow::Context;
use async_trait::async_trait;
use lsp_types::{
    DidChangeWatchedFilesRegistrationOptions, FileSystemWatcher, GlobPattern,
    PublishDiagnosticsParams, RegistrationParams,
};
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::diagnostics::DiagnosticCache;
use crate::endpoint::{Endpoint, Handler};
use crate::protocol::RpcError;

const TAILWIND_SERVER: &str = "tailwindcss-language-server";

/// The tailwind server registers a watcher for `**/*`; these are the only
/// files it actually reacts to.
const TAILWIND_WATCHED_FILES: [&str; 3] = [
    "**/{tailwind,tailwind.config}.{js,cjs,ts,mjs}",
    "**/{package-lock.json,yarn.lock,pnpm-lock.yaml}",
    "**/*.{html,css,scss,sass,less,pcss}",
];

pub struct Backend {
    name: String,
    index: usize,
    child: Mutex<Child>,
    endpoint: Arc<Endpoint>,
    /// Non-owning handle to the client-side endpoint, installed by the
    /// supervisor once it exists.
    proxy: OnceLock<Weak<Endpoint>>,
    diagnostics: Arc<DiagnosticCache>,
}

impl Backend {
    /// Spawn `command` and wire its stdio to a served endpoint. The child's
    /// stderr is inherited so its own logging stays visible.
    pub fn spawn(
        index: usize,
        command: &[String],
        diagnostics: Arc<DiagnosticCache>,
    ) -> anyhow::Result<Arc<Self>> {
        let program = &command[0];
        let mut child = Command::new(program)
            .args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start {}", program))?;

        let stdin = child.stdin.take().context("child stdin unavailable")?;
        let stdout = child.stdout.take().context("child stdout unavailable")?;

        let name = Path::new(program)
            .file_name()
            .map(|base| base.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.clone());

        let endpoint = Endpoint::new(name.clone(), stdout, stdin);
        let backend = Arc::new(Self {
            name,
            index,
            child: Mutex::new(child),
            endpoint,
            proxy: OnceLock::new(),
            diagnostics,
        });
        backend.endpoint.clone().serve(backend.clone());

        log::info!("started backend {} ({})", backend.index, backend.name);
        Ok(backend)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Install the back-reference used to reach the client.
    pub fn connect_proxy(&self, proxy: Weak<Endpoint>) {
        let _ = self.proxy.set(proxy);
    }

    /// Forward a client request to the child, rewritten for this backend.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let params = self.rewrite_request(method, params)?;
        self.endpoint.call(method, params).await
    }

    /// Forward a client notification to the child.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        self.endpoint.notify(method, params).await
    }

    /// Close the connection and kill the child.
    pub async fn close(&self) {
        self.endpoint.close().await;
        if let Err(e) = self.child.lock().await.kill().await {
            log::debug!("{}: kill: {}", self.name, e);
        }
        log::info!("stopped backend {} ({})", self.index, self.name);
    }

    fn proxy(&self) -> Result<Arc<Endpoint>, RpcError> {
        self.proxy
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(RpcError::disconnected)
    }

    fn rewrite_request(&self, method: &str, params: Option<Value>) -> Result<Option<Value>, RpcError> {
        match method {
            "initialize" => Ok(scope_initialization_options(&self.name, params)),
            "client/registerCapability" if self.name == TAILWIND_SERVER => {
                narrow_watcher_registrations(params)
            }
            _ => Ok(params),
        }
    }

    /// Attribute, cache, and merge one `textDocument/publishDiagnostics`
    /// payload from this backend. The returned params carry the union of
    /// every backend's current diagnostics for the document.
    async fn merge_published_diagnostics(&self, params: Value) -> Result<Value, RpcError> {
        publish_merged(&self.name, &self.diagnostics, params).await
    }
}

#[async_trait]
impl Handler for Backend {
    async fn handle_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        let params = self.rewrite_request(method, params)?;
        self.proxy()?.call(method, params).await
    }

    async fn handle_notification(&self, method: &str, params: Option<Value>) {
        let params = match (method, params) {
            ("textDocument/publishDiagnostics", Some(params)) => {
                match self.merge_published_diagnostics(params).await {
                    Ok(params) => Some(params),
                    Err(e) => {
                        log::error!("{}: {}", self.name, e);
                        return;
                    }
                }
            }
            (_, params) => params,
        };

        match self.proxy() {
            Ok(proxy) => {
                if let Err(e) = proxy.notify(method, params).await {
                    log::error!("{}: forwarding {} failed: {}", self.name, method, e);
                }
            }
            Err(_) => log::warn!("{}: dropping {}, no client connection", self.name, method),
        }
    }
}

/// Replace a merged `initializationOptions` object with the entry keyed by
/// this backend's name, if one exists. Anything else passes through
/// unchanged.
fn scope_initialization_options(name: &str, params: Option<Value>) -> Option<Value> {
    let mut params = params?;
    let scoped = params
        .get("initializationOptions")
        .and_then(Value::as_object)
        .and_then(|options| options.get(name))
        .cloned();
    if let Some(scoped) = scoped {
        if let Some(object) = params.as_object_mut() {
            object.insert("initializationOptions".to_string(), scoped);
        }
    }
    Some(params)
}

/// Replace over-broad `workspace/didChangeWatchedFiles` registrations with
/// the fixed tailwind watcher set.
fn narrow_watcher_registrations(params: Option<Value>) -> Result<Option<Value>, RpcError> {
    let Some(params) = params else {
        return Ok(None);
    };
    let mut registrations: RegistrationParams = serde_json::from_value(params)
        .map_err(|e| RpcError::internal(format!("decode registerCapability: {}", e)))?;
    for registration in &mut registrations.registrations {
        if registration.method == "workspace/didChangeWatchedFiles" {
            let options = DidChangeWatchedFilesRegistrationOptions {
                watchers: TAILWIND_WATCHED_FILES
                    .iter()
                    .map(|pattern| FileSystemWatcher {
                        glob_pattern: GlobPattern::String(pattern.to_string()),
                        kind: None,
                    })
                    .collect(),
            };
            registration.register_options = Some(
                serde_json::to_value(options)
                    .map_err(|e| RpcError::internal(format!("encode watchers: {}", e)))?,
            );
        }
    }
    serde_json::to_value(registrations)
        .map(Some)
        .map_err(|e| RpcError::internal(format!("encode registerCapability: {}", e)))
}

async fn publish_merged(
    name: &str,
    cache: &DiagnosticCache,
    params: Value,
) -> Result<Value, RpcError> {
    let mut published: PublishDiagnosticsParams = serde_json::from_value(params)
        .map_err(|e| RpcError::internal(format!("decode publishDiagnostics: {}", e)))?;

    for diagnostic in &mut published.diagnostics {
        if diagnostic.source.as_deref().map_or(true, str::is_empty) {
            diagnostic.source = Some(name.to_string());
        }
    }

    cache
        .set(
            published.uri.clone(),
            name.to_string(),
            published.diagnostics,
        )
        .await;
    let merged = cache.get(&published.uri).await;

    serde_json::to_value(PublishDiagnosticsParams {
        uri: published.uri,
        diagnostics: merged,
        version: None,
    })
    .map_err(|e| RpcError::internal(format!("encode publishDiagnostics: {}", e)))
}
