//! Scripted backend for tests.

use async_trait::async_trait;
use parley_proto::{Backend, BackendError, InvokeOptions};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted backend reaction.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(BackendError),
    /// Sleeps before answering, to exercise caller-side timeouts.
    Delayed(Duration, String),
}

/// A recorded call.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub prompt: String,
    pub model: Option<String>,
}

/// Replays scripted replies in order and records every call.
#[derive(Debug)]
pub struct MockBackend {
    replies: Mutex<VecDeque<MockReply>>,
    executions: Mutex<Vec<ExecutionRecord>>,
    interrupt: Option<(usize, Arc<AtomicBool>)>,
}

impl MockBackend {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            executions: Mutex::new(Vec::new()),
            interrupt: None,
        }
    }

    pub fn from_texts(texts: Vec<String>) -> Self {
        Self::new(texts.into_iter().map(MockReply::Text).collect())
    }

    /// Sets `flag` while serving the `call`-th invocation (1-based), before
    /// that call returns.
    pub fn interrupt_during(mut self, call: usize, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some((call, flag));
        self
    }

    pub fn execution_count(&self) -> usize {
        self.executions.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.executions.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> Result<String, BackendError> {
        let call = {
            let mut executions = self
                .executions
                .lock()
                .map_err(|_| BackendError::Transient("mock state poisoned".to_string()))?;
            executions.push(ExecutionRecord {
                prompt: prompt.to_string(),
                model: options.model.clone(),
            });
            executions.len()
        };

        if let Some((at, flag)) = &self.interrupt {
            if *at == call {
                flag.store(true, Ordering::SeqCst);
            }
        }

        let reply = self
            .replies
            .lock()
            .map_err(|_| BackendError::Transient("mock state poisoned".to_string()))?
            .pop_front();

        match reply {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fail(error)) => Err(error),
            Some(MockReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(BackendError::Transient(
                "mock backend has no scripted replies left".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> InvokeOptions {
        InvokeOptions {
            model: Some("test-model".to_string()),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_replays_in_order_and_records_calls() {
        let backend = MockBackend::new(vec![
            MockReply::Text("first".to_string()),
            MockReply::Fail(BackendError::Timeout(Duration::from_secs(1))),
        ]);

        assert_eq!(backend.invoke("p1", &options()).await.unwrap(), "first");
        assert!(matches!(
            backend.invoke("p2", &options()).await,
            Err(BackendError::Timeout(_))
        ));
        assert!(backend.invoke("p3", &options()).await.is_err());

        assert_eq!(backend.execution_count(), 3);
        let calls = backend.executions();
        assert_eq!(calls[1].prompt, "p2");
        assert_eq!(calls[0].model.as_deref(), Some("test-model"));
    }

    #[tokio::test]
    async fn test_interrupt_is_raised_during_the_chosen_call() {
        let flag = Arc::new(AtomicBool::new(false));
        let backend = MockBackend::from_texts(vec!["a".into(), "b".into()])
            .interrupt_during(2, flag.clone());

        backend.invoke("p1", &options()).await.unwrap();
        assert!(!flag.load(Ordering::SeqCst));
        backend.invoke("p2", &options()).await.unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
