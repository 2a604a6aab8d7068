use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, header::HeaderMap};
use serde_json::Value;
use std::sync::Arc;

/// One HTTP exchange: method, URL, headers and a JSON or raw-byte body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Bytes(Vec<u8>),
}

/// Status code plus the response body parsed as JSON. Bodies that are empty
/// or not JSON (the upload edge answers 202 with nothing) come back as
/// `Value::Null`.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Value,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse> {
        (**self).exchange(request).await
    }
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Bytes(bytes) => builder.body(bytes),
        };

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&HttpRequest, usize) -> HttpResponse + Send + Sync>;

    /// Transport double that answers from a closure and records every
    /// request it saw, in order.
    pub struct StubTransport {
        responder: Responder,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl StubTransport {
        pub fn new(
            responder: impl Fn(&HttpRequest, usize) -> HttpResponse + Send + Sync + 'static,
        ) -> Self {
            Self {
                responder: Box::new(responder),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn recorded(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse> {
            let mut requests = self.requests.lock().unwrap();
            let response = (self.responder)(&request, requests.len());
            requests.push(request);
            Ok(response)
        }
    }

    pub fn response(status: u16, body: Value) -> HttpResponse {
        HttpResponse {
            status: StatusCode::from_u16(status).unwrap(),
            body,
        }
    }

    pub fn envelope(code: i64, data: Value) -> Value {
        serde_json::json!({ "code": code, "msg": "", "data": data })
    }
}
