mod common;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use common::FixtureBuilder;
use futures::stream;
use ssrd::http::Body;
use ssrd::{Request, Response, Server, StatusCode};

/// Starts a fake API host on an ephemeral port.
///
/// `/v1/get_entry_by_rank` streams a JSON array in three chunks, answering
/// with the code in `?status=` when given; any other path answers 503.
async fn fake_upstream() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();

    let counter = Arc::clone(&hits);
    tokio::spawn(server.run(move |req: Request| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if req.path() != "/v1/get_entry_by_rank" {
                return Response::text(StatusCode::ServiceUnavailable, "down");
            }
            let status = req
                .query_string()
                .and_then(|query| query.strip_prefix("status="))
                .and_then(|code| code.parse().ok())
                .and_then(StatusCode::from_u16)
                .unwrap_or(StatusCode::Ok);
            let chunks: Vec<io::Result<Bytes>> = vec![
                Ok(Bytes::from_static(b"[{\"rank\":1},")),
                Ok(Bytes::from_static(b"{\"rank\":2},")),
                Ok(Bytes::from_static(b"{\"rank\":3}]")),
            ];
            Response::new(status)
                .header("Content-Type", "application/json")
                .body(Body::from_stream(stream::iter(chunks)))
        }
    }));

    (addr, hits)
}

#[tokio::test]
async fn upstream_stream_is_relayed_and_cached() {
    let (addr, hits) = fake_upstream().await;
    let fx = FixtureBuilder::new().upstream(format!("http://{addr}")).ready();

    let res = fx
        .dispatcher
        .dispatch(Request::get("/v1/get_entry_by_rank?limit=3"))
        .await;
    assert_eq!(res.status(), StatusCode::Ok);
    assert!(res.is_streaming());
    assert_eq!(res.headers().get("content-type"), Some("application/json"));
    let first = res.into_body().collect().await.unwrap();
    assert_eq!(first, r#"[{"rank":1},{"rank":2},{"rank":3}]"#);

    let res = fx
        .dispatcher
        .dispatch(Request::get("/v1/get_entry_by_rank?limit=3"))
        .await;
    assert_eq!(res.headers().get("content-type"), Some("application/json"));
    assert_eq!(res.into_body().collect().await.unwrap(), first);

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(fx.engine.calls(), 0);
}

#[tokio::test]
async fn upstream_success_status_is_relayed_but_not_cached() {
    let (addr, hits) = fake_upstream().await;
    let fx = FixtureBuilder::new().upstream(format!("http://{addr}")).ready();

    for _ in 0..2 {
        let res = fx
            .dispatcher
            .dispatch(Request::get("/v1/get_entry_by_rank?status=203"))
            .await;
        assert_eq!(res.status(), StatusCode::NonAuthoritativeInformation);
        assert_eq!(res.headers().get("content-type"), Some("application/json"));
        assert_eq!(
            res.into_body().collect().await.unwrap(),
            r#"[{"rank":1},{"rank":2},{"rank":3}]"#
        );
    }

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(fx.cache.is_empty());
}

#[tokio::test]
async fn upstream_no_content_stays_no_content() {
    let (addr, _) = fake_upstream().await;
    let fx = FixtureBuilder::new().upstream(format!("http://{addr}")).ready();

    let res = fx
        .dispatcher
        .dispatch(Request::get("/v1/get_entry_by_rank?status=204"))
        .await;
    assert_eq!(res.status(), StatusCode::NoContent);
}

#[tokio::test]
async fn upstream_error_status_is_500() {
    let (addr, _) = fake_upstream().await;
    let fx = FixtureBuilder::new().upstream(format!("http://{addr}/down")).ready();

    let res = fx
        .dispatcher
        .dispatch(Request::get("/v1/get_entry_by_rank"))
        .await;
    assert_eq!(res.status(), StatusCode::InternalServerError);
    assert_eq!(
        res.into_body().collect().await.unwrap(),
        "500 | Internal Server Error"
    );
    assert!(fx.cache.is_empty());
}

#[tokio::test]
async fn unreachable_upstream_is_500() {
    let fx = FixtureBuilder::new().ready();

    let res = fx
        .dispatcher
        .dispatch(Request::get("/v1/get_entry_by_rank"))
        .await;
    assert_eq!(res.status(), StatusCode::InternalServerError);
}
