//! Transfer client that plays back an in-memory body with scripted behaviour:
//! per-chunk delay, hang or fail after N bytes, or hold the end of stream
//! until a permit is released.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use teleflux_core::transfer::{TargetSpec, TransferClient, TransferError, TransferStream};

#[derive(Clone, Default)]
pub struct Script {
    pub body: Vec<u8>,
    pub chunk: usize,
    pub delay: Duration,
    pub hang_after: Option<usize>,
    pub fail_after: Option<usize>,
    pub hold_end: Option<Arc<Semaphore>>,
}

impl Script {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            chunk: 4,
            ..Default::default()
        }
    }

    pub fn chunk(mut self, n: usize) -> Self {
        self.chunk = n.max(1);
        self
    }

    pub fn delay(mut self, d: Duration) -> Self {
        self.delay = d;
        self
    }

    pub fn hang_after(mut self, n: usize) -> Self {
        self.hang_after = Some(n);
        self
    }

    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn hold_end(mut self, gate: Arc<Semaphore>) -> Self {
        self.hold_end = Some(gate);
        self
    }
}

#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, Script>>,
    opens: Mutex<Vec<(String, u64)>>,
}

impl ScriptedClient {
    pub fn add(&self, source: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(source.to_string(), script);
    }

    /// `(source, offset)` of every open, in order.
    pub fn opens(&self) -> Vec<(String, u64)> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferClient for ScriptedClient {
    async fn open(
        &self,
        target: &TargetSpec,
        offset: u64,
    ) -> Result<Box<dyn TransferStream>, TransferError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&target.source)
            .cloned()
            .ok_or_else(|| TransferError::Source(format!("no script for {}", target.source)))?;
        self.opens
            .lock()
            .unwrap()
            .push((target.source.clone(), offset));
        Ok(Box::new(ScriptedStream {
            script,
            pos: offset as usize,
        }))
    }
}

struct ScriptedStream {
    script: Script,
    pos: usize,
}

#[async_trait]
impl TransferStream for ScriptedStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        let s = &self.script;
        if !s.delay.is_zero() {
            tokio::time::sleep(s.delay).await;
        }
        if s.fail_after.is_some_and(|n| self.pos >= n) {
            return Err(TransferError::Source("connection reset by peer".into()));
        }
        if s.hang_after.is_some_and(|n| self.pos >= n) {
            std::future::pending::<()>().await;
        }
        if self.pos >= s.body.len() {
            if let Some(gate) = &s.hold_end {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            return Ok(None);
        }

        let mut end = (self.pos + s.chunk).min(s.body.len());
        for limit in [s.fail_after, s.hang_after].into_iter().flatten() {
            if self.pos < limit {
                end = end.min(limit);
            }
        }
        let out = s.body[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(out))
    }
}
