use crate::rate_limit::{Decision, RateLimiter};
use crate::GateError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that enforces per-key admission using a [`RateLimiter`].
///
/// `key_fn` derives the bucket key from each request, e.g. `"<user>:<ip>"`.
#[derive(Debug)]
pub struct AdmissionLayer<L, K> {
    limiter: Arc<L>,
    key_fn: Arc<K>,
}

impl<L, K> Clone for AdmissionLayer<L, K> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), key_fn: self.key_fn.clone() }
    }
}

impl<L, K> AdmissionLayer<L, K> {
    /// Create a new admission layer.
    pub fn new(limiter: L, key_fn: K) -> Self {
        Self { limiter: Arc::new(limiter), key_fn: Arc::new(key_fn) }
    }

    /// Create a layer sharing an existing limiter.
    pub fn from_shared(limiter: Arc<L>, key_fn: K) -> Self {
        Self { limiter, key_fn: Arc::new(key_fn) }
    }
}

impl<S, L, K> Layer<S> for AdmissionLayer<L, K>
where
    L: RateLimiter + 'static,
{
    type Service = AdmissionService<S, L, K>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            limiter: self.limiter.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

/// Middleware service that enforces admission.
#[derive(Debug)]
pub struct AdmissionService<S, L, K> {
    inner: S,
    limiter: Arc<L>,
    key_fn: Arc<K>,
}

impl<S: Clone, L, K> Clone for AdmissionService<S, L, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<S, L, K, Req> Service<Req> for AdmissionService<S, L, K>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    L: RateLimiter + 'static,
    K: Fn(&Req) -> String + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = GateError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GateError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Decide synchronously so the token is spent even if the returned
        // future is never polled.
        let key = (self.key_fn)(&req);
        let decision = self.limiter.check(&key);

        // Swap in a fresh clone; `self.inner` was the one driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match decision {
                Decision::Admitted { .. } => inner.call(req).await.map_err(GateError::Inner),
                Decision::Denied { retry_after_secs, wait } => {
                    tracing::warn!(key = %key, retry_after_secs, "rate limit exceeded");
                    Err(GateError::RateLimited { retry_after_secs, wait })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LimiterConfig;
    use crate::rate_limit::strategies::TokenBucket;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::{service_fn, ServiceExt};

    #[tokio::test]
    async fn denied_requests_skip_inner_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner = service_fn(move |req: &'static str| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Infallible>(req.len()) }
        });

        let limiter = TokenBucket::in_memory(LimiterConfig::new(1, 1.0).unwrap())
            .with_clock(ManualClock::new());
        let svc = AdmissionLayer::new(limiter, |req: &&'static str| req.to_string()).layer(inner);

        assert_eq!(svc.clone().oneshot("abc").await.unwrap(), 3);
        let err = svc.clone().oneshot("abc").await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after_secs(), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Different key, separate bucket.
        assert_eq!(svc.oneshot("xy").await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
