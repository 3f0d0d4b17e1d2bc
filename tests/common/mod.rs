//! Mock Kubernetes API server for exercising the apply engine without a
//! cluster: canned responses per (method, path), with every request recorded
//! so tests can assert on the write sequence and payloads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use tower::Service;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// A mock HTTP service that returns predefined responses based on request
/// method and path, recording everything it sees.
#[derive(Clone, Default)]
pub struct MockApiServer {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned API discovery for a cluster that serves core/v1 with just
    /// configmaps. Enough for the apply engine to resolve a ConfigMap and to
    /// fail resolution for everything else.
    pub fn with_core_discovery() -> Self {
        Self::new()
            .on(
                "GET",
                "/apis",
                200,
                r#"{"kind":"APIGroupList","apiVersion":"v1","groups":[]}"#,
            )
            .on(
                "GET",
                "/api",
                200,
                r#"{"kind":"APIVersions","versions":["v1"],"serverAddressByClientCIDRs":[]}"#,
            )
            .on(
                "GET",
                "/api/v1",
                200,
                r#"{"kind":"APIResourceList","groupVersion":"v1","resources":[{"name":"configmaps","singularName":"configmap","namespaced":true,"kind":"ConfigMap","verbs":["create","get","list","update","delete"]}]}"#,
            )
    }

    /// Add a response for requests matching the exact method and path.
    pub fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses.lock().unwrap().insert(
            (method.to_string(), path.to_string()),
            (status, body.to_string()),
        );
        self
    }

    /// Everything the server has seen so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client backed by this mock.
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        self.responses
            .lock()
            .unwrap()
            .get(&(method.to_string(), path.to_string()))
            .cloned()
    }
}

const NOT_FOUND: &str = r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"not found","reason":"NotFound","code":404}"#;

impl Service<Request<Body>> for MockApiServer {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let response = self.find_response(&method, &path);
        let requests = Arc::clone(&self.requests);

        Box::pin(async move {
            let body = req
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes().to_vec())
                .unwrap_or_default();
            requests.lock().unwrap().push(RecordedRequest {
                method,
                path,
                body,
            });

            let (status, body) = response.unwrap_or((404, NOT_FOUND.to_string()));
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}
