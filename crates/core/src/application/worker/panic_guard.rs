// Panic isolation for worker safety
use std::future::Future;
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed (the value may itself be an error)
    Success(T),
    /// Execution panicked
    Panicked(String),
}

/// Run a future on its own task so that a panic inside it cannot kill the worker loop.
///
/// # Example
/// ```text
/// let runner = Arc::clone(&runner);
/// match execute_guarded_async(async move { runner.execute("r1").await }).await {
///     PanicGuardResult::Success(outcome) => { /* ... */ }
///     PanicGuardResult::Panicked(msg) => { /* ... */ }
/// }
/// ```
pub async fn execute_guarded_async<F>(future: F) -> PanicGuardResult<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match tokio::task::spawn(future).await {
        Ok(value) => PanicGuardResult::Success(value),
        Err(join_err) => {
            let panic_msg = if join_err.is_panic() {
                let panic_info = join_err.into_panic();
                if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                }
            } else {
                "Task cancelled".to_string()
            };

            error!(panic_msg = %panic_msg, "Rollup execution task panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_passes_value_through() {
        match execute_guarded_async(async { 7 }).await {
            PanicGuardResult::Success(v) => assert_eq!(v, 7),
            PanicGuardResult::Panicked(msg) => panic!("unexpected panic: {}", msg),
        }
    }

    #[tokio::test]
    async fn test_panic_is_captured_with_message() {
        let result = execute_guarded_async(async {
            if true {
                panic!("boom");
            }
        })
        .await;

        match result {
            PanicGuardResult::Panicked(msg) => assert_eq!(msg, "boom"),
            PanicGuardResult::Success(_) => panic!("panic was not captured"),
        }
    }
}
