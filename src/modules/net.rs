//! `net.fetch` (§6): a Promise-returning HTTP client built on `reqwest`, the same TLS
//! stack choice (`rustls-tls`, no native OpenSSL dependency) as the rest of this crate.
//!
//! `reqwest`'s async client needs a Tokio runtime; since the reactor's loop thread is
//! plain `mio` with no Tokio executor underneath, each request spins up a dedicated
//! worker thread that drives one lazily-initialized multi-thread Tokio runtime via
//! `block_on`, then settles the returned [`Promise`] from that thread — safe per the
//! same worker-thread-settlement pattern every other cross-thread producer here uses.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::evaluator::Value;
use crate::promise::Promise;

/// `net.fetch` request options. Maps loosely onto the WHATWG `fetch()` options bag;
/// only the subset this runtime's scripts plausibly need.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

fn runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("swazi-fetch-worker")
            .build()
            .expect("build fetch tokio runtime")
    })
}

/// `net.fetch(url, opts?)`: returns immediately with a pending Promise, settled once
/// the response body is fully read (or the request fails).
#[must_use]
pub fn fetch(url: String, opts: FetchOptions) -> Arc<Promise> {
    let promise = Promise::new();
    let settle = Arc::clone(&promise);
    std::thread::Builder::new()
        .name("swazi-fetch-request".into())
        .spawn(move || {
            let result = runtime().block_on(run_request(url, opts));
            match result {
                Ok(body) => settle.fulfill(Value::Buffer(body)),
                Err(message) => settle.reject(Value::Error(message)),
            }
        })
        .expect("spawn fetch request thread");
    promise
}

async fn run_request(url: String, opts: FetchOptions) -> Result<Vec<u8>, String> {
    let client = reqwest::Client::new();
    let method = opts
        .method
        .as_deref()
        .map(|m| reqwest::Method::from_bytes(m.as_bytes()).map_err(|e| e.to_string()))
        .transpose()?
        .unwrap_or(reqwest::Method::GET);

    let mut request = client.request(method, &url);
    for (name, value) in &opts.headers {
        request = request.header(name, value);
    }
    if let Some(body) = opts.body {
        request = request.body(body);
    }

    let response = request.send().await.map_err(|e| format!("fetch request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("fetch received status {}", response.status()));
    }
    response.bytes().await.map(|b| b.to_vec()).map_err(|e| format!("fetch body read failed: {e}"))
}
