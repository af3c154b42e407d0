//! In-process stand-in for the remote API, used by unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{Mutation, RemoteApi};
use crate::error::RemoteError;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub mutation: Mutation,
    pub input: Value,
    pub idempotency_key: String,
}

type Rule = Box<dyn Fn(Mutation, &Value) -> Option<Result<Value, RemoteError>> + Send + Sync>;

/// Succeeds by default. Scripted results are consumed first, then `rule`.
pub struct FakeRemote {
    calls: Mutex<Vec<RecordedCall>>,
    scripted: Mutex<VecDeque<Result<Value, RemoteError>>>,
    rule: Mutex<Option<Rule>>,
    delay: Mutex<Duration>,
    healthy: AtomicBool,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            rule: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn push_result(&self, result: Result<Value, RemoteError>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    pub fn set_rule<F>(&self, rule: F)
    where
        F: Fn(Mutation, &Value) -> Option<Result<Value, RemoteError>> + Send + Sync + 'static,
    {
        *self.rule.lock().unwrap() = Some(Box::new(rule));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn execute(
        &self,
        mutation: Mutation,
        input: &Value,
        idempotency_key: &str,
    ) -> Result<Value, RemoteError> {
        let call_no = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedCall {
                mutation,
                input: input.clone(),
                idempotency_key: idempotency_key.to_string(),
            });
            calls.len()
        };

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(result) = self.scripted.lock().unwrap().pop_front() {
            return result;
        }
        if let Some(rule) = self.rule.lock().unwrap().as_ref() {
            if let Some(result) = rule(mutation, input) {
                return result;
            }
        }
        Ok(json!({ "_id": format!("srv-{call_no}") }))
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
