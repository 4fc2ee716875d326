#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use cardex::config::{AppConfig, EngineConfig, RetryPolicy, UpstreamConfig};
use cardex::data::{Universe, UniverseEntry};
use cardex::error::UpstreamError;
use cardex::upstream::{CardQuery, CardSource, UpstreamPage};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};

type Responder = dyn Fn(&CardQuery) -> Result<Vec<Value>, UpstreamError> + Send + Sync;

/// In-memory upstream: a responder decides the full result set per query and
/// the source pages through it like the real endpoint.
pub struct ScriptedSource {
    responder: Box<Responder>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(
        responder: impl Fn(&CardQuery) -> Result<Vec<Value>, UpstreamError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(UpstreamError::permanent(Some(400), "scripted failure")))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CardSource for ScriptedSource {
    fn query<'a>(
        &'a self,
        query: &'a CardQuery,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'a, Result<UpstreamPage, UpstreamError>> {
        async move {
            self.calls.lock().unwrap().push(query.expression());
            let all = (self.responder)(query)?;
            let start = ((page.max(1) - 1) * page_size) as usize;
            let records = all
                .iter()
                .skip(start)
                .take(page_size as usize)
                .cloned()
                .collect();
            Ok(UpstreamPage {
                records,
                total_count: Some(all.len() as u64),
            })
        }
        .boxed()
    }
}

pub fn card(id: &str, dex: &[u32], date: &str, number: &str) -> Value {
    json!({
        "id": id,
        "name": format!("card {id}"),
        "number": number,
        "nationalPokedexNumbers": dex,
        "set": { "name": "Test Set", "series": "Test", "releaseDate": date }
    })
}

pub fn universe(entries: &[(&str, u32)]) -> Universe {
    Universe::from_entries(
        entries
            .iter()
            .map(|(name, dex)| UniverseEntry::new(*name, *dex)),
    )
}

pub fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("cardex-{label}-{}-{nanos}", std::process::id()))
}

/// No pauses, no backoff sleeps.
pub fn fast_config(out_dir: PathBuf, ranges: Vec<(u32, u32)>) -> AppConfig {
    let mut config = AppConfig {
        out_dir,
        upstream: UpstreamConfig {
            page_pause_ms: 0,
            retry: RetryPolicy::immediate(1),
            ..UpstreamConfig::default()
        },
        engine: EngineConfig {
            ranges,
            range_pause_ms: 0,
            query_pause_ms: 0,
            ..EngineConfig::default()
        },
        ..AppConfig::default()
    };
    config.verify.retry = RetryPolicy::immediate(1);
    config.verify.query_pause_ms = 0;
    config
}
