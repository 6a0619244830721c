//! `MockOperator`, a test double for `Operator`.
//!
//! Useful in unit and integration tests where a real operator is either
//! unavailable or irrelevant. Clones share their call log, so a test can
//! register one clone and inspect the other.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::{InputSchema, Operator, OperatorContext, OperatorError, Payload};

/// Behaviour injected into `MockOperator` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return the given object.
    Return(Payload),
    /// Fail every call with the given error.
    Fail(OperatorError),
    /// Sleep, then return. Ignores cancellation.
    Delay(Duration, Payload),
    /// Fail the first `failures` calls, then return `then`.
    FailTimes {
        failures: usize,
        error: OperatorError,
        then: Payload,
    },
    /// Block until the run is cancelled, then report it.
    UntilCancelled,
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub input: Payload,
    pub params: Payload,
    pub attempt: u32,
    pub started: Instant,
    pub finished: Option<Instant>,
}

/// A mock operator that records every call it receives and returns a
/// programmer-specified result.
#[derive(Debug, Clone)]
pub struct MockOperator {
    behaviour: MockBehaviour,
    schema: InputSchema,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => {
            let mut map = Payload::new();
            map.insert("value".into(), other);
            map
        }
    }
}

impl MockOperator {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            schema: InputSchema::any(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always succeeds with `value` (an object; `null` means empty).
    pub fn returning(value: Value) -> Self {
        Self::new(MockBehaviour::Return(object(value)))
    }

    /// Always fails with an operator-reported error.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self::new(MockBehaviour::Fail(OperatorError::Operator(msg.into())))
    }

    /// Always fails with a transport error.
    pub fn failing_transport(msg: impl Into<String>) -> Self {
        Self::new(MockBehaviour::Fail(OperatorError::Transport(msg.into())))
    }

    /// Sleeps for `delay` before returning `value`.
    pub fn delayed(delay: Duration, value: Value) -> Self {
        Self::new(MockBehaviour::Delay(delay, object(value)))
    }

    /// Fails `failures` times with a transport error, then returns `value`.
    pub fn flaky(failures: usize, value: Value) -> Self {
        Self::new(MockBehaviour::FailTimes {
            failures,
            error: OperatorError::Transport("connection reset".into()),
            then: object(value),
        })
    }

    /// Never returns on its own; honours cancellation.
    pub fn until_cancelled() -> Self {
        Self::new(MockBehaviour::UntilCancelled)
    }

    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Number of times this operator has been called.
    pub fn call_count(&self) -> usize {
        self.lock().len()
    }

    /// All calls seen so far, in call order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().clone()
    }

    /// When the first call started.
    pub fn first_started(&self) -> Option<Instant> {
        self.lock().first().map(|c| c.started)
    }

    /// When the most recent call finished.
    pub fn last_finished(&self) -> Option<Instant> {
        self.lock().last().and_then(|c| c.finished)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MockCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Operator for MockOperator {
    async fn call(
        &self,
        input: Payload,
        params: &Payload,
        ctx: &OperatorContext,
    ) -> Result<Payload, OperatorError> {
        let index = {
            let mut calls = self.lock();
            calls.push(MockCall {
                input,
                params: params.clone(),
                attempt: ctx.attempt,
                started: Instant::now(),
                finished: None,
            });
            calls.len() - 1
        };

        let result = match &self.behaviour {
            MockBehaviour::Return(out) => Ok(out.clone()),
            MockBehaviour::Fail(err) => Err(err.clone()),
            MockBehaviour::Delay(delay, out) => {
                tokio::time::sleep(*delay).await;
                Ok(out.clone())
            }
            MockBehaviour::FailTimes {
                failures,
                error,
                then,
            } => {
                if index < *failures {
                    Err(error.clone())
                } else {
                    Ok(then.clone())
                }
            }
            MockBehaviour::UntilCancelled => {
                ctx.cancel.cancelled().await;
                Err(OperatorError::Operator("cancelled".into()))
            }
        };

        if let Some(call) = self.lock().get_mut(index) {
            call.finished = Some(Instant::now());
        }
        result
    }

    fn schema(&self) -> InputSchema {
        self.schema.clone()
    }
}
