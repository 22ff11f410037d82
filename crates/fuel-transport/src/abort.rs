//! Cancellation handle for one logical in-flight operation.

use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::message::{HttpClient, HttpRequest, HttpResponse};
use crate::retry::{send_once, RetryingTransport};

/// Wraps one cancellation token; every request issued through it is bound
/// to that token and `abort()` cancels all of them.
///
/// Once aborted the handle stays aborted: further `fetch` calls fail with
/// `FetchError::Aborted` without reaching the client. Create a new handle
/// for a new operation.
#[derive(Debug, Clone, Default)]
pub struct AbortableRequest {
    token: CancellationToken,
}

impl AbortableRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a handle that is aborted together with `parent`.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    /// Issue a single request bound to this handle.
    ///
    /// The response is returned whatever its status.
    pub async fn fetch<C>(&self, client: &C, request: HttpRequest) -> Result<HttpResponse, FetchError>
    where
        C: HttpClient + ?Sized,
    {
        let request = self.bind(request)?;
        send_once(client, &request).await
    }

    /// Issue a request through a retrying transport, bound to this handle.
    ///
    /// Aborting also interrupts a pending backoff sleep.
    pub async fn fetch_with_retry(
        &self,
        transport: &RetryingTransport,
        request: HttpRequest,
    ) -> Result<HttpResponse, FetchError> {
        let request = self.bind(request)?;
        transport.send(request).await
    }

    /// Cancel every request issued through this handle.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The underlying token, for binding non-HTTP work to the same operation.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn bind(&self, request: HttpRequest) -> Result<HttpRequest, FetchError> {
        if self.is_aborted() {
            return Err(FetchError::Aborted);
        }
        Ok(request.with_cancel(self.token.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    /// Answers 200 after a delay.
    #[derive(Default)]
    struct SlowClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for SlowClient {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(HttpResponse::new(200, HashMap::new(), Vec::new()))
        }
    }

    fn req() -> HttpRequest {
        HttpRequest::get("https://api.example.com/prices")
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_completes_without_abort() {
        let client = SlowClient::default();
        let handle = AbortableRequest::new();

        let resp = handle.fetch(&client, req()).await.unwrap();
        assert_eq!(resp.status, 200);
        assert!(!handle.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_cancels_in_flight_request() {
        let client = Arc::new(SlowClient::default());
        let handle = AbortableRequest::new();

        let task = {
            let client = Arc::clone(&client);
            let handle = handle.clone();
            tokio::spawn(async move { handle.fetch(client.as_ref(), req()).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.abort();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reuse_after_abort_fails_fast() {
        let client = SlowClient::default();
        let handle = AbortableRequest::new();
        handle.abort();

        let err = handle.fetch(&client, req()).await.unwrap_err();
        assert_eq!(err, FetchError::Aborted);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_interrupts_retrying_transport() {
        let client = Arc::new(SlowClient::default());
        let transport = RetryingTransport::new(client.clone());
        let handle = AbortableRequest::new();

        let task = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.fetch_with_retry(&transport, req()).await })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.abort();

        assert!(task.await.unwrap().unwrap_err().is_aborted());
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = CancellationToken::new();
        let handle = AbortableRequest::child_of(&parent);
        assert!(!handle.is_aborted());
        parent.cancel();
        assert!(handle.is_aborted());
    }
}
