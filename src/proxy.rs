//! Proxy-side request handling.
//!
//! The `Proxy` is the handler of the client endpoint. Every client message
//! is routed to a subset of backends through the provider table, fanned
//! out in parallel, and the responses merged per method before one reply
//! goes back to the client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use lsp_types::{CompletionList, CompletionResponse, ServerCapabilities};
use serde_json::{json, Value};

use crate::backend::Backend;
use crate::endpoint::Handler;
use crate::merge::merge;
use crate::protocol::RpcError;

pub struct Proxy {
    backends: Vec<Arc<Backend>>,
    providers: HashMap<String, Vec<String>>,
}

impl Proxy {
    pub fn new(backends: Vec<Arc<Backend>>, providers: HashMap<String, Vec<String>>) -> Self {
        Self {
            backends,
            providers,
        }
    }

    fn select_backends(&self, method: &str) -> Vec<Arc<Backend>> {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        select_indices(&self.providers, method, &names)
            .into_iter()
            .map(|index| self.backends[index].clone())
            .collect()
    }
}

#[async_trait]
impl Handler for Proxy {
    async fn handle_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        match method {
            // The advertised capability union must cover every live
            // backend, so initialize ignores the provider table.
            "initialize" => {
                let results = fan_out_call(&self.backends, method, params).await?;
                merge_initialize_results(results)
            }
            "textDocument/completion" => {
                let selected = self.select_backends(method);
                let results = fan_out_call(&selected, method, params).await?;
                merge_completion_results(results)
            }
            _ => {
                let selected = self.select_backends(method);
                let results = fan_out_call(&selected, method, params).await?;
                results
                    .into_iter()
                    .next()
                    .ok_or_else(|| RpcError::internal("no backend results"))
            }
        }
    }

    async fn handle_notification(&self, method: &str, params: Option<Value>) {
        let selected = self.select_backends(method);
        let outcomes = join_all(
            selected
                .iter()
                .map(|backend| backend.notify(method, params.clone())),
        )
        .await;
        if let Some(e) = outcomes.into_iter().find_map(Result::err) {
            log::error!("delivering {} failed: {}", method, e);
        }
    }
}

async fn fan_out_call(
    backends: &[Arc<Backend>],
    method: &str,
    params: Option<Value>,
) -> Result<Vec<Value>, RpcError> {
    try_join_all(
        backends
            .iter()
            .map(|backend| backend.call(method, params.clone())),
    )
    .await
}

/// Abstract capability key for methods subject to provider routing.
fn capability_key(method: &str) -> Option<&'static str> {
    match method {
        "textDocument/hover" => Some("hover"),
        "textDocument/completion" => Some("completion"),
        "textDocument/definition" => Some("definition"),
        "textDocument/rename" => Some("rename"),
        "textDocument/references" => Some("references"),
        "textDocument/publishDiagnostics" => Some("diagnostic"),
        _ => None,
    }
}

/// Indices of the backends a method routes to. A selector matches a
/// backend by decimal index or by display name; a method without a
/// capability key, an unconfigured key, or selectors matching nothing all
/// fall back to every backend.
fn select_indices(
    providers: &HashMap<String, Vec<String>>,
    method: &str,
    names: &[&str],
) -> Vec<usize> {
    let all = || (0..names.len()).collect();

    let Some(key) = capability_key(method) else {
        return all();
    };
    let Some(selectors) = providers.get(key).filter(|s| !s.is_empty()) else {
        return all();
    };

    let mut selected = Vec::new();
    for (index, name) in names.iter().enumerate() {
        let index_token = index.to_string();
        if selectors
            .iter()
            .any(|selector| selector == name || *selector == index_token)
        {
            selected.push(index);
        }
    }

    if selected.is_empty() {
        all()
    } else {
        selected
    }
}

/// Union the capability sets of all backends; `serverInfo` comes from the
/// first. The fold runs on raw JSON and the result is re-decoded to check
/// it is still a valid capability record.
fn merge_initialize_results(results: Vec<Value>) -> Result<Value, RpcError> {
    let mut results = results.into_iter();
    let first = results
        .next()
        .ok_or_else(|| RpcError::internal("no backend results"))?;

    let server_info = first.get("serverInfo").cloned();
    let mut capabilities = first.get("capabilities").cloned().unwrap_or_else(|| json!({}));
    for result in results {
        let other = result.get("capabilities").cloned().unwrap_or(Value::Null);
        capabilities = merge(capabilities, other);
    }

    let capabilities: ServerCapabilities = serde_json::from_value(capabilities)
        .map_err(|e| RpcError::internal(format!("merged capabilities: {}", e)))?;

    let mut merged = json!({ "capabilities": capabilities });
    if let Some(server_info) = server_info {
        merged["serverInfo"] = server_info;
    }
    Ok(merged)
}

/// Concatenate the items of every complete result. Incomplete lists mark
/// the merged list incomplete and contribute no items; they are still
/// being produced and would be misleading when unioned.
fn merge_completion_results(results: Vec<Value>) -> Result<Value, RpcError> {
    let mut merged = CompletionList {
        is_incomplete: false,
        items: Vec::new(),
    };
    for result in results {
        let list = decode_completion_list(result)?;
        if list.is_incomplete {
            merged.is_incomplete = true;
            continue;
        }
        merged.items.extend(list.items);
    }
    serde_json::to_value(merged)
        .map_err(|e| RpcError::internal(format!("encode completion: {}", e)))
}

/// Servers answer completion with a list, a bare item array, or null.
fn decode_completion_list(result: Value) -> Result<CompletionList, RpcError> {
    if result.is_null() {
        return Ok(CompletionList {
            is_incomplete: false,
            items: Vec::new(),
        });
    }
    match serde_json::from_value::<CompletionResponse>(result) {
        Ok(CompletionResponse::Array(items)) => Ok(CompletionList {
            is_incomplete: false,
            items,
        }),
        Ok(CompletionResponse::List(list)) => Ok(list),
        Err(e) => Err(RpcError::internal(format!("decode completion: {}", e))),
    }
}
