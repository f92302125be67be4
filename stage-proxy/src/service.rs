use crate::Proxy;
use crate::errors::ProxyError;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{ALLOW, CONTENT_TYPE};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::make_boxed_error_response;
use std::future::Future;
use std::pin::Pin;

const ALLOWED_METHODS: &str = "OPTIONS, GET, PUT";

/// Path of the explicit staging control surface.
const STAGE_PATH: &str = "/stage";

/// Client-facing front end.
///
/// `PUT` buffers the body and schedules asynchronous replication; the 201
/// acknowledgment means "accepted for replication", not "replicated".
/// `GET` serves the last local write without ever touching the network.
/// `GET /stage` and `POST /stage` expose the staging control surface.
pub struct ProxyService {
    proxy: Proxy,
}

impl ProxyService {
    pub fn new(proxy: Proxy) -> Self {
        Self { proxy }
    }
}

impl<B> Service<Request<B>> for ProxyService
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response<BoxBody<Bytes, ProxyError>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let proxy = self.proxy.clone();
        Box::pin(handle(proxy, req))
    }
}

async fn handle<B>(
    proxy: Proxy,
    req: Request<B>,
) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    tracing::debug!(%method, path, "handling request");

    if path == STAGE_PATH {
        return handle_stage(&proxy, &method);
    }

    match method {
        Method::OPTIONS => Response::builder()
            .status(StatusCode::OK)
            .header(ALLOW, ALLOWED_METHODS)
            .body(empty_body())
            .map_err(response_error),
        Method::PUT => {
            let content = req
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .map_err(|e| ProxyError::RequestBodyError(e.to_string()))?;
            proxy.write(&path, content);
            Ok(status_only(StatusCode::CREATED))
        }
        Method::GET => match proxy.read(&path) {
            Some(content) => Ok(Response::new(full_body(content))),
            None => Ok(make_boxed_error_response(StatusCode::NOT_FOUND)),
        },
        _ => method_not_allowed(),
    }
}

fn handle_stage(
    proxy: &Proxy,
    method: &Method,
) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError> {
    match *method {
        Method::GET => {
            let status = proxy.status();
            json_response(StatusCode::OK, &status)
        }
        Method::POST => {
            if proxy.is_staging_active() {
                return Ok(status_only(StatusCode::CONFLICT));
            }
            let triggered = proxy.stage_all();
            tracing::info!(triggered, "explicit staging run started");
            json_response(StatusCode::OK, &serde_json::json!({ "triggered": triggered }))
        }
        _ => method_not_allowed(),
    }
}

fn json_response<T: serde::Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError> {
    let payload =
        serde_json::to_vec(value).map_err(|e| ProxyError::ResponseError(e.to_string()))?;
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(Bytes::from(payload)))
        .map_err(response_error)
}

fn method_not_allowed() -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError> {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header(ALLOW, ALLOWED_METHODS)
        .body(empty_body())
        .map_err(response_error)
}

fn status_only(status: StatusCode) -> Response<BoxBody<Bytes, ProxyError>> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}

fn full_body(content: Bytes) -> BoxBody<Bytes, ProxyError> {
    Full::new(content).map_err(|never| match never {}).boxed()
}

fn empty_body() -> BoxBody<Bytes, ProxyError> {
    full_body(Bytes::new())
}

fn response_error(e: http::Error) -> ProxyError {
    ProxyError::ResponseError(e.to_string())
}
