//! Logs each and every request out in a format similar to that of
//! Apache's logs, tagged with a per-request UUID that is also reflected
//! back to the client as `X-Request-ID`.

use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Request, Response};
use futures_util::future::BoxFuture;
use tower_service::Service;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct LoggingMiddleware<S>(pub S);

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for LoggingMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let request_id = Uuid::new_v4();
        let span = info_span!("web", request_id = %request_id);

        let peer = request
            .extensions()
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map_or_else(|| "-".to_string(), |info| info.0.to_string());
        let method = request.method().clone();
        let uri = request.uri().path().to_string();
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let start = Instant::now();

        let clone = self.0.clone();
        // the original service is the one poll_ready was called on
        let mut inner = std::mem::replace(&mut self.0, clone);

        Box::pin(
            async move {
                let mut response = inner.call(request).await?;

                let status = response.status().as_u16();
                let duration = start.elapsed();
                if response.status().is_server_error() {
                    error!("{peer} - \"{method} {uri}\" {status} {duration:?} \"{user_agent}\"");
                } else {
                    info!("{peer} - \"{method} {uri}\" {status} {duration:?} \"{user_agent}\"");
                }

                if let Ok(value) = HeaderValue::try_from(request_id.to_string()) {
                    response.headers_mut().insert("X-Request-ID", value);
                }

                Ok(response)
            }
            .instrument(span),
        )
    }
}
