use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::header::AUTHORIZATION;
use http::{HeaderValue, Request, Response};
use secrecy::ExposeSecret;
use tower::{Layer, Service};

use crate::auth::TokenAccessor;
use crate::error::HttpError;

/// Tower layer that injects `Authorization: Bearer <token>` into every request.
///
/// The accessor is invoked on each call. Placed inside the retry layer, every
/// retry attempt picks up a freshly issued token.
#[derive(Clone)]
pub struct BearerAuthLayer {
    accessor: Arc<dyn TokenAccessor>,
}

impl BearerAuthLayer {
    #[must_use]
    pub fn new(accessor: Arc<dyn TokenAccessor>) -> Self {
        Self { accessor }
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            accessor: Arc::clone(&self.accessor),
        }
    }
}

/// Created by [`BearerAuthLayer`].
#[derive(Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    accessor: Arc<dyn TokenAccessor>,
}

impl<S, B, ResBody> Service<Request<B>> for BearerAuthService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResBody>, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let token = match self.accessor.bearer_token() {
            Ok(token) => token,
            Err(e) => return Box::pin(async { Err(HttpError::Auth(e)) }),
        };

        if token.expose_secret().is_empty() {
            req.headers_mut().remove(AUTHORIZATION);
        } else {
            let raw = zeroize::Zeroizing::new(format!("Bearer {}", token.expose_secret()));
            let mut value = match HeaderValue::from_str(&raw) {
                Ok(v) => v,
                Err(e) => return Box::pin(async { Err(HttpError::InvalidHeaderValue(e)) }),
            };
            value.set_sensitive(true);
            req.headers_mut().insert(AUTHORIZATION, value);
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move { inner.call(req).await })
    }
}
