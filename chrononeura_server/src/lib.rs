//! The ChronoNeura HTTP service.
//!
//! [`http::HttpDelegate`] owns the routing table and the handlers; [`serve`]
//! runs it on a hyper server until the shutdown token fires.

pub mod http;

use std::{convert::Infallible, sync::Arc};

use chrononeura_influx::TimeSeriesStore;
use chrononeura_notion::DocumentStore;
use hyper::{
    Body, Request, Response,
    header::AUTHORIZATION,
    server::conn::{AddrIncoming, AddrStream},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::http::HttpDelegate;

/// Serve `delegate` on `addr` until `shutdown` is cancelled, then stop
/// accepting connections and drain the in-flight requests.
pub async fn serve<T, D>(
    addr: AddrIncoming,
    delegate: Arc<HttpDelegate<T, D>>,
    shutdown: CancellationToken,
) -> Result<(), hyper::Error>
where
    T: TimeSeriesStore,
    D: DocumentStore,
{
    hyper::Server::builder(addr)
        .serve(hyper::service::make_service_fn(|_conn: &AddrStream| {
            let delegate = Arc::clone(&delegate);
            let service = hyper::service::service_fn(move |request: Request<_>| {
                route_request(Arc::clone(&delegate), request)
            });
            futures::future::ready(Ok::<_, Infallible>(service))
        }))
        .with_graceful_shutdown(shutdown.cancelled())
        .await
}

async fn route_request<T, D>(
    delegate: Arc<HttpDelegate<T, D>>,
    mut req: Request<Body>,
) -> Result<Response<Body>, Infallible>
where
    T: TimeSeriesStore,
    D: DocumentStore,
{
    // nothing downstream needs the credential and it must never be logged
    req.headers_mut().remove(AUTHORIZATION);
    debug!(request = ?req, "processing request");

    let method = req.method().clone();
    let uri = req.uri().clone();
    let content_length = req.headers().get("content-length").cloned();

    match delegate.route(req).await {
        Ok(response) => {
            debug!(status = %response.status(), %method, %uri, "successfully processed request");
            Ok(response)
        }
        Err(error) => {
            if error.is_internal() {
                error!(%error, %method, %uri, ?content_length, "error while handling request");
            } else {
                debug!(%error, %method, %uri, ?content_length, "error while handling request");
            }
            Ok(error.response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrononeura_influx::mock::{MockStoreCall, MockTimeSeriesStore};
    use chrononeura_notion::{MemDocumentStore, UpsertPolicy};
    use chrononeura_types::{
        BucketSelector, PayloadAssembler, SystemProvider, TimeProvider, TimestampPolicy,
    };
    use hyper::StatusCode;
    use serde_json::{Value, json};

    #[test_log::test(tokio::test)]
    async fn serves_until_shutdown() {
        let store = Arc::new(MockTimeSeriesStore::default());
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());
        let delegate = Arc::new(HttpDelegate::new(
            1024,
            Arc::clone(&store),
            BucketSelector::new("chrono_trace", "chrono_test").unwrap(),
            PayloadAssembler::new(TimestampPolicy::PassThrough, Arc::clone(&clock)),
            Arc::new(UpsertPolicy::new(Arc::new(MemDocumentStore::new()), clock)),
            "devlog-db",
        ));

        let addr = AddrIncoming::bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let base = format!("http://{}", addr.local_addr());
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(addr, delegate, shutdown.clone()));

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base}/ingest/sandbox"))
            .bearer_auth("not-for-logs")
            .json(&json!({"measurement": "cpu", "fields": {"load": 0.5}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["bucket"], "chrono_test");

        let resp = client.get(format!("{base}/missing")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], "not found");

        assert!(matches!(
            store.calls().as_slice(),
            [MockStoreCall::Write { bucket, .. }] if bucket == "chrono_test"
        ));

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
