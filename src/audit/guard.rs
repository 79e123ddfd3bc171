//! Guaranteed-execution wrapper for scenario step bodies.
//!
//! A step that crashes must still be audited. [`guarded`] runs the step body
//! on its own task and converts an abnormal termination into a typed
//! [`StepError`], so the caller always has an error value to hand to the
//! audit trail. Relying on callers to remember a recovery convention is how
//! steps silently vanish from ledgers.

use std::future::Future;

/// Failure of a single scenario step.
///
/// Produced either by the step body itself or by [`guarded`] when the body
/// panicked.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StepError {
    message: String,
}

impl StepError {
    /// Create a step error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message, as recorded in the audit trail.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Run a step body with panic conversion.
///
/// The body is executed on a spawned task; if it panics, the panic payload
/// is captured and returned as a [`StepError`] instead of unwinding through
/// the scenario. The audit call that follows therefore always runs.
pub async fn guarded<F, Fut, T>(body: F) -> Result<T, StepError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, StepError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(body()).await {
        Ok(result) => result,
        Err(join_error) => {
            let message = if join_error.is_panic() {
                describe_panic(join_error.into_panic())
            } else {
                "step task was cancelled".to_owned()
            };
            Err(StepError::new(format!("step panicked: {message}")))
        }
    }
}

fn describe_panic(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_success() {
        let result = guarded(|| async { Ok::<_, StepError>(41_u32) }).await;
        assert_eq!(result.expect("should succeed"), 41);
    }

    #[tokio::test]
    async fn passes_through_step_error() {
        let result: Result<(), _> = guarded(|| async { Err(StepError::new("policy denied")) }).await;
        assert_eq!(result.expect_err("should fail").message(), "policy denied");
    }

    #[tokio::test]
    async fn converts_panic_into_step_error() {
        let result: Result<(), _> = guarded(|| async { panic!("boom") }).await;
        let err = result.expect_err("panic should become an error");
        assert!(err.message().contains("boom"), "got: {}", err.message());
    }
}
