use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, HeaderMap, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::helpers::decode_submission;

/// Scriptable EVM node state shared with the mock HTTP server.
#[derive(Clone)]
pub struct MockNode {
    inner: Arc<Mutex<MockNodeInner>>,
}

struct MockNodeInner {
    chain_id: u64,
    pending: u64,
    floor: u64,
    used: HashSet<u64>,
    mined: HashSet<String>,
    reverted: HashSet<u64>,
    failed: HashSet<String>,
    rejections: HashMap<u64, String>,
    receipt_delay: usize,
    receipt_polls: HashMap<String, usize>,
    calls: HashMap<String, usize>,
    authorization: Option<String>,
}

impl MockNode {
    pub fn new(chain_id: u64, pending: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockNodeInner {
                chain_id,
                pending,
                floor: pending,
                used: HashSet::new(),
                mined: HashSet::new(),
                reverted: HashSet::new(),
                failed: HashSet::new(),
                rejections: HashMap::new(),
                receipt_delay: 0,
                receipt_polls: HashMap::new(),
                calls: HashMap::new(),
                authorization: None,
            })),
        }
    }

    /// Rejects the next submission carrying `nonce`.
    pub fn reject_once(&self, nonce: u64, message: impl Into<String>) {
        self.lock().rejections.insert(nonce, message.into());
    }

    /// Mines the transaction carrying `nonce` with a failed status.
    pub fn revert(&self, nonce: u64) {
        self.lock().reverted.insert(nonce);
    }

    /// Answers `null` to the first `polls` receipt lookups of every transaction.
    pub fn delay_receipts(&self, polls: usize) {
        self.lock().receipt_delay = polls;
    }

    pub fn pending(&self) -> u64 {
        self.lock().pending
    }

    pub fn calls(&self, method: &str) -> usize {
        self.lock().calls.get(method).copied().unwrap_or(0)
    }

    pub fn authorization(&self) -> Option<String> {
        self.lock().authorization.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockNodeInner> {
        self.inner.lock().expect("mock node poisoned")
    }

    fn observe(&self, method: &str, headers: &HeaderMap) {
        let mut inner = self.lock();
        *inner.calls.entry(method.to_owned()).or_default() += 1;
        if let Some(value) = headers
            .get(hyper::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        {
            inner.authorization = Some(value.to_owned());
        }
    }

    fn send_raw(&self, payload: &str) -> std::result::Result<Value, (i64, String)> {
        let bytes = hex::decode(payload.trim_start_matches("0x"))
            .map_err(|err| (-32602, format!("invalid hex payload: {err}")))?;
        let tx = decode_submission(&bytes).map_err(|err| (-32602, err.to_string()))?;

        let mut inner = self.lock();
        let hash = tx.hash.to_string();
        if let Some(message) = inner.rejections.remove(&tx.nonce) {
            return Err((-32000, message));
        }
        if inner.mined.contains(&hash) {
            return Err((-32000, "already known".to_owned()));
        }
        if tx.nonce < inner.floor || !inner.used.insert(tx.nonce) {
            return Err((-32000, "nonce too low".to_owned()));
        }

        inner.pending = inner.pending.max(tx.nonce + 1);
        if inner.reverted.remove(&tx.nonce) {
            inner.failed.insert(hash.clone());
        }
        inner.mined.insert(hash.clone());
        Ok(Value::String(hash))
    }

    fn receipt(&self, hash: &str) -> Value {
        let mut inner = self.lock();
        if !inner.mined.contains(hash) {
            return Value::Null;
        }

        let delay = inner.receipt_delay;
        let polls = inner.receipt_polls.entry(hash.to_owned()).or_default();
        *polls += 1;
        if *polls <= delay {
            return Value::Null;
        }

        let status = if inner.failed.contains(hash) {
            "0x0"
        } else {
            "0x1"
        };
        json!({ "transactionHash": hash, "status": status })
    }
}

pub struct MockRpcServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRpcServer {
    pub async fn start(node: MockNode) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock RPC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let node = node.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(node.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(node: MockNode, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let headers = req.headers().clone();
    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = match payload {
        Value::Array(calls) => Value::Array(
            calls
                .into_iter()
                .map(|call| handle_call(&node, &headers, call))
                .collect(),
        ),
        call => handle_call(&node, &headers, call),
    };

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(node: &MockNode, headers: &HeaderMap, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let first_param = call
        .get("params")
        .and_then(Value::as_array)
        .and_then(|params| params.first())
        .and_then(Value::as_str)
        .map(str::to_owned);

    node.observe(&method, headers);

    match method.as_str() {
        "eth_chainId" => success(id, json!(format!("{:#x}", node.lock().chain_id))),
        "eth_getTransactionCount" => success(id, json!(format!("{:#x}", node.pending()))),
        "eth_sendRawTransaction" => match first_param {
            Some(payload) => match node.send_raw(&payload) {
                Ok(hash) => success(id, hash),
                Err((code, message)) => error(id, code, message),
            },
            None => error(id, -32602, "missing transaction payload"),
        },
        "eth_getTransactionReceipt" => match first_param {
            Some(hash) => success(id, node.receipt(&hash)),
            None => error(id, -32602, "missing transaction hash"),
        },
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
