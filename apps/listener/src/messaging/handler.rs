use std::future::Future;

use async_trait::async_trait;

use crate::contracts::Event;

#[async_trait]
pub trait EventHandler<P>: Send + Sync {
    async fn handle(&self, event: Event<P>) -> Result<(), HandlerError>;
}

/// Failure reported by application logic.
///
/// `Transient` and `Permanent` state the retry decision outright. `Failed`
/// carries free text that the classifier inspects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("Transient error (will retry): {0}")]
    Transient(String),

    #[error("Permanent error (will not retry): {0}")]
    Permanent(String),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }

    pub fn unhandled(event_name: &str) -> Self {
        Self::Failed(format!("unhandled event type: {}", event_name))
    }
}

impl From<String> for HandlerError {
    fn from(reason: String) -> Self {
        Self::Failed(reason)
    }
}

impl From<&str> for HandlerError {
    fn from(reason: &str) -> Self {
        Self::Failed(reason.to_string())
    }
}

pub struct FnHandler<F>(F);

/// Wraps an async closure as an [`EventHandler`].
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

#[async_trait]
impl<P, F, Fut> EventHandler<P> for FnHandler<F>
where
    P: Send + 'static,
    F: Fn(Event<P>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: Event<P>) -> Result<(), HandlerError> {
        (self.0)(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_constructors_and_display() {
        let err = HandlerError::transient("Network timeout");
        assert_eq!(err, HandlerError::Transient("Network timeout".to_string()));
        assert!(err.to_string().contains("will retry"));

        let err = HandlerError::permanent("Invalid schema");
        assert_eq!(err.to_string(), "Permanent error (will not retry): Invalid schema");

        let err = HandlerError::from("boom");
        assert_eq!(err, HandlerError::Failed("boom".to_string()));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_unhandled_event_type() {
        let err = HandlerError::unhandled("invoice.voided");
        assert_eq!(err.to_string(), "unhandled event type: invoice.voided");
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let handler = handler_fn(|event: Event<Value>| async move {
            match event.name.as_str() {
                "ok" => Ok(()),
                other => Err(HandlerError::unhandled(other)),
            }
        });

        assert!(handler.handle(Event::new("ok", json!({}))).await.is_ok());
        assert!(handler.handle(Event::new("nope", json!({}))).await.is_err());
    }
}
