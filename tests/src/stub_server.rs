use hyper::{
    body,
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};
use tokio::{runtime::Runtime, sync::oneshot};
use tracing::{debug, error};

/// How the stub answers every request.
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// 200 with the request body and content type.
    Echo,
    /// Like `Echo`, after sleeping.
    Stall(Duration),
}

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub body: String,
}

/// Local HTTP server on an ephemeral port, running on its own thread and
/// runtime. Shut down on drop.
#[derive(Debug)]
pub struct StubServer {
    address: SocketAddr,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StubServer {
    pub fn start(behaviour: Behaviour) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let (address_tx, address_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_received = received.clone();

        thread::spawn(move || {
            Runtime::new().unwrap().block_on(async move {
                let addr = SocketAddr::from(([127, 0, 0, 1], 0));

                let server = Server::bind(&addr).serve(make_service_fn(move |_| {
                    let received = server_received.clone();
                    async move {
                        Ok::<_, Infallible>(service_fn(move |req| {
                            handle_request(req, behaviour, received.clone())
                        }))
                    }
                }));
                address_tx.send(server.local_addr()).unwrap();

                let server = server.with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                });
                if let Err(e) = server.await {
                    error!("stub server error: {}", e);
                }
            });
        });

        let address = address_rx.recv().unwrap();
        debug!(%address, ?behaviour, "stub server listening");

        Self {
            address,
            received,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn handle_request(
    request: Request<Body>,
    behaviour: Behaviour,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
) -> Result<Response<Body>, Infallible> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(String::from);
    let body = body::to_bytes(request.into_body())
        .await
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();

    received.lock().unwrap().push(ReceivedRequest {
        method,
        path,
        content_type: content_type.clone(),
        body: body.clone(),
    });

    if let Behaviour::Stall(delay) = behaviour {
        tokio::time::sleep(delay).await;
    }

    let mut response = Response::builder().status(200);
    if let Some(content_type) = content_type {
        response = response.header(CONTENT_TYPE, content_type);
    }

    Ok(response
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty())))
}

/// A URL nothing listens on.
pub fn refused_url(path: &str) -> String {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    format!("http://127.0.0.1:{}{}", port, path)
}
