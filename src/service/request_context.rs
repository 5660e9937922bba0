//! Per-request context for handling request-related information

use actix_web::body::MessageBody;
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

const MDC_KEY: &str = "request_id";

/// Request context; its id is pushed into the logging MDC so every log line
/// of the request can be correlated
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    /// Take the caller's request id if present, otherwise mint one
    pub fn from_http_request(req: &HttpRequest) -> Self {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        log_mdc::insert(MDC_KEY, &request_id);
        Self { request_id }
    }
}

impl FromRequest for RequestContext {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let scoped = req.extensions().get::<RequestContext>().cloned();
        let context = match scoped {
            Some(context) => {
                log_mdc::insert(MDC_KEY, &context.request_id);
                context
            }
            None => Self::from_http_request(req),
        };
        ready(Ok(context))
    }
}

/// Middleware binding the request id to the logging MDC for the lifetime of
/// one request; the id is removed again once the response is produced
pub async fn request_id_scope(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let context = RequestContext::from_http_request(req.request());
    req.extensions_mut().insert(context);
    let response = next.call(req).await;
    log_mdc::remove(MDC_KEY);
    response
}
