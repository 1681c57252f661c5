use crate::error::HttpError;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that fills in configured headers the request does not carry
#[derive(Clone, Debug)]
pub struct DefaultHeadersLayer {
    defaults: HeaderMap,
}

impl DefaultHeadersLayer {
    /// Build the layer from name/value pairs. Later pairs replace earlier ones
    /// with the same name.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` or `HttpError::InvalidHeaderValue`
    /// for a pair that is not a valid header.
    pub fn try_new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self, HttpError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut defaults = HeaderMap::new();
        for (name, value) in pairs {
            let name = HeaderName::try_from(name.as_ref())?;
            let value = HeaderValue::try_from(value.as_ref())?;
            defaults.insert(name, value);
        }
        Ok(Self { defaults })
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeadersService {
            inner,
            defaults: self.defaults.clone(),
        }
    }
}

/// Service that merges default headers under the request's own headers
#[derive(Clone, Debug)]
pub struct DefaultHeadersService<S> {
    inner: S,
    defaults: HeaderMap,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DefaultHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let headers = req.headers_mut();
        for (name, value) in &self.defaults {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        self.inner.call(req)
    }
}
