//! End-to-end integration tests against real listeners, covering the full
//! JSON-RPC request/response cycle between `Client` and `Server`.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{Router, routing::post};
use ht_jsonrpc_transport::{
    Client, ClientError, Dispatch, DispatchError, DispatchResult, HttpTransport, Server,
    SharedApp, TlsConfig, TransportOptions,
};
use serde_json::{Value, json};
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Dispatch used by most tests: echoes params unless the method asks for
/// something else.
struct TestDispatch;

impl Dispatch for TestDispatch {
    async fn dispatch(&self, method: &str, params: Value) -> DispatchResult {
        match method {
            "fail" => Err("boom".into()),
            "fail_object" => Err(DispatchError::Object(json!({
                "message": "denied",
                "reason": "policy",
            }))),
            "slow" => {
                let ms = params["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(params)
            }
            "whoami" => Ok(json!(method)),
            "panic" => panic!("dispatch exploded"),
            _ => Ok(params),
        }
    }
}

/// Dispatch that tags every reply, to tell servers on one app apart.
struct Tagged(&'static str);

impl Dispatch for Tagged {
    async fn dispatch(&self, method: &str, params: Value) -> DispatchResult {
        Ok(json!({"server": self.0, "method": method, "params": params}))
    }
}

/// Start an exclusive-app server on an OS-assigned port.
async fn start_server<D: Dispatch>(dispatch: D, options: TransportOptions) -> (Server, SocketAddr) {
    let transport = HttpTransport::new(options.host("127.0.0.1").port(0)).unwrap();
    let mut server = transport.server(dispatch).unwrap();
    server.listen().await.unwrap();
    let addr = server.local_addr().expect("listening server has an address");
    (server, addr)
}

fn client_for(addr: SocketAddr, path: &str) -> Client {
    HttpTransport::new(
        TransportOptions::new()
            .host(addr.ip().to_string())
            .port(addr.port())
            .path(path),
    )
    .unwrap()
    .client()
    .unwrap()
}

/// Serve a plain axum router on an OS-assigned port.
async fn serve_router(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// POST a raw body and return (status, body text).
async fn post_raw(url: &str, body: &str) -> (u16, String) {
    let response = timeout(
        TEST_TIMEOUT,
        reqwest::Client::new()
            .post(url)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send(),
    )
    .await
    .expect("Timeout waiting for response")
    .expect("request failed");
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// Round trips
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn echo_round_trip() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let client = client_for(addr, "/ht-jsonrpc");

    let result = timeout(TEST_TIMEOUT, client.call("m", json!({"a": 1})))
        .await
        .expect("Timeout")
        .unwrap();
    assert_eq!(result, Some(json!({"a": 1})));
}

#[tokio::test]
async fn method_name_reaches_dispatch() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let client = client_for(addr, "/ht-jsonrpc");
    assert_eq!(client.call("whoami", Value::Null).await.unwrap(), Some(json!("whoami")));
}

#[tokio::test]
async fn wire_envelope_echoes_id() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let url = format!("http://{addr}/ht-jsonrpc");

    let (status, body) =
        post_raw(&url, r#"{"jsonrpc":"2.0","method":"m","params":[1,2],"id":77}"#).await;
    assert_eq!(status, 200);
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed, json!({"jsonrpc": "2.0", "result": [1, 2], "id": 77}));

    let (_, body) = post_raw(&url, r#"{"jsonrpc":"2.0","method":"m","id":"abc"}"#).await;
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["id"], "abc");
    // Missing params reach dispatch as null
    assert!(parsed["result"].is_null());
}

#[tokio::test]
async fn ids_outside_i64_are_echoed_verbatim() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let url = format!("http://{addr}/ht-jsonrpc");

    let (status, body) = post_raw(
        &url,
        r#"{"jsonrpc":"2.0","method":"m","params":1,"id":18446744073709551615}"#,
    )
    .await;
    assert_eq!(status, 200);
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["id"], json!(18446744073709551615u64));

    let (status, body) =
        post_raw(&url, r#"{"jsonrpc":"1.0","method":"m","id":18446744073709551615}"#).await;
    assert_eq!(status, 400);
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["id"], json!(18446744073709551615u64));

    let (_, body) = post_raw(&url, r#"{"jsonrpc":"2.0","method":"m","id":2.5}"#).await;
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["id"], json!(2.5));
}

#[tokio::test]
async fn custom_path_is_used() {
    let (_server, addr) =
        start_server(TestDispatch, TransportOptions::new().path("/rpc")).await;

    let client = client_for(addr, "/rpc");
    assert_eq!(client.call("m", json!(5)).await.unwrap(), Some(json!(5)));

    let (status, _) = post_raw(&format!("http://{addr}/ht-jsonrpc"), "{}").await;
    assert_eq!(status, 404);
}

// ─────────────────────────────────────────────────────────────────────────────
// Error paths
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn version_mismatch_is_rejected() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let url = format!("http://{addr}/ht-jsonrpc");

    let (status, body) = post_raw(&url, r#"{"jsonrpc":"1.0","method":"m","id":5}"#).await;
    assert_eq!(status, 400);
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["error"]["code"], -32600);
    assert_eq!(parsed["error"]["message"], "require version 2.0");
    assert_eq!(parsed["id"], 5);

    let (status, body) = post_raw(&url, r#"{"method":"m"}"#).await;
    assert_eq!(status, 400);
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["error"]["code"], -32600);
    // No id in, no id out
    assert!(parsed.get("id").is_none());
}

#[tokio::test]
async fn undecodable_body_gets_parse_error() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let (status, body) = post_raw(&format!("http://{addr}/ht-jsonrpc"), "{not json").await;
    assert_eq!(status, 400);
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["error"]["code"], -32700);
}

#[tokio::test]
async fn missing_content_type_gets_parse_error() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/ht-jsonrpc"))
        .body(r#"{"jsonrpc":"2.0","method":"m","id":1}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let parsed: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert_eq!(parsed["error"]["code"], -32700);
    assert!(parsed["id"].is_null());
}

#[tokio::test]
async fn dispatch_error_is_reported() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;

    let client = client_for(addr, "/ht-jsonrpc");
    let err = client.call("fail", Value::Null).await.unwrap_err();
    assert_eq!(err.message(), Some("boom"));
    assert_eq!(err.code(), Some(-32000));

    let (status, body) = post_raw(
        &format!("http://{addr}/ht-jsonrpc"),
        r#"{"jsonrpc":"2.0","method":"fail","id":3}"#,
    )
    .await;
    assert_eq!(status, 500);
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["error"], json!({"code": -32000, "message": "boom"}));
    assert_eq!(parsed["id"], 3);
}

#[tokio::test]
async fn structured_dispatch_error_keeps_payload() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let client = client_for(addr, "/ht-jsonrpc");

    let err = client.call("fail_object", Value::Null).await.unwrap_err();
    assert_eq!(err.message(), Some("denied"));
    let rpc = err.rpc_error().unwrap();
    assert_eq!(rpc.data.unwrap()["reason"], "policy");
}

#[tokio::test]
async fn dispatch_panic_still_gets_an_answer() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let client = client_for(addr, "/ht-jsonrpc");

    let err = client.call("panic", Value::Null).await.unwrap_err();
    assert_eq!(err.code(), Some(-32000));

    // The server keeps serving afterwards
    assert_eq!(client.call("m", json!(1)).await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn connection_refused_is_transport_error() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = client_for(addr, "/ht-jsonrpc");

    let err = client.call("m", Value::Null).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)), "unexpected: {err:?}");
    assert!(!err.message().unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissive reply handling against foreign servers
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn non_json_reply_is_raw_error() {
    let addr = serve_router(Router::new().route("/ht-jsonrpc", post(|| async { "hello" }))).await;
    let client = client_for(addr, "/ht-jsonrpc");

    let err = client.call("m", Value::Null).await.unwrap_err();
    assert!(matches!(&err, ClientError::Malformed(raw) if raw == "hello"));
    assert_eq!(err.message(), None);
}

#[tokio::test]
async fn empty_and_undefined_replies_are_no_result() {
    let router = Router::new()
        .route("/empty", post(|| async { "" }))
        .route("/undefined", post(|| async { "undefined" }));
    let addr = serve_router(router).await;

    assert_eq!(client_for(addr, "/empty").call("m", Value::Null).await.unwrap(), None);
    assert_eq!(client_for(addr, "/undefined").call("m", Value::Null).await.unwrap(), None);
}

#[tokio::test]
async fn server_without_dispatch_replies_empty() {
    let transport =
        HttpTransport::new(TransportOptions::new().host("127.0.0.1").port(0)).unwrap();
    let mut server = transport.server_without_dispatch().unwrap();
    server.listen().await.unwrap();
    let addr = server.local_addr().unwrap();

    let (status, body) = post_raw(
        &format!("http://{addr}/ht-jsonrpc"),
        r#"{"jsonrpc":"2.0","method":"m","id":1}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert!(body.is_empty());

    let client = client_for(addr, "/ht-jsonrpc");
    assert_eq!(client.call("m", json!({"x": 1})).await.unwrap(), None);

    server.stop().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn listen_twice_keeps_one_listener() {
    let (mut server, addr) = start_server(TestDispatch, TransportOptions::new()).await;

    server.listen().await.unwrap();
    assert!(server.is_listening());
    assert_eq!(server.local_addr(), Some(addr));

    let client = client_for(addr, "/ht-jsonrpc");
    assert_eq!(client.call("m", json!(true)).await.unwrap(), Some(json!(true)));
}

#[tokio::test]
async fn stop_closes_listener_and_is_idempotent() {
    let (mut server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let client = client_for(addr, "/ht-jsonrpc");
    assert!(client.call("m", json!(1)).await.is_ok());

    timeout(TEST_TIMEOUT, server.stop()).await.expect("stop hung");
    assert!(!server.is_listening());
    assert!(server.local_addr().is_none());
    server.stop().await;

    let err = client.call("m", json!(1)).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
}

#[tokio::test]
async fn server_can_listen_again_after_stop() {
    let (mut server, _) = start_server(TestDispatch, TransportOptions::new()).await;
    server.stop().await;

    server.listen().await.unwrap();
    let addr = server.local_addr().unwrap();
    let client = client_for(addr, "/ht-jsonrpc");
    assert_eq!(client.call("m", json!("again")).await.unwrap(), Some(json!("again")));
    server.stop().await;
}

#[tokio::test]
async fn bind_conflict_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let transport =
        HttpTransport::new(TransportOptions::new().host("127.0.0.1").port(port)).unwrap();
    let mut server = transport.server(TestDispatch).unwrap();
    assert!(server.listen().await.is_err());
    assert!(!server.is_listening());
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared app mode
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn servers_share_one_router_by_path() {
    let app = SharedApp::new();
    let one = HttpTransport::new(TransportOptions::new().app(app.clone()).path("/one")).unwrap();
    let two = HttpTransport::new(TransportOptions::new().app(app.clone()).path("/two")).unwrap();
    let mut server_one = one.server(Tagged("one")).unwrap();
    let mut server_two = two.server(Tagged("two")).unwrap();

    // Listener belongs to the app owner
    server_one.listen().await.unwrap();
    server_two.listen().await.unwrap();
    assert!(!server_one.is_listening());

    let addr = serve_router(app.router()).await;

    let r1 = client_for(addr, "/one").call("a", json!(1)).await.unwrap().unwrap();
    let r2 = client_for(addr, "/two").call("b", json!(2)).await.unwrap().unwrap();
    assert_eq!(r1, json!({"server": "one", "method": "a", "params": 1}));
    assert_eq!(r2, json!({"server": "two", "method": "b", "params": 2}));

    server_one.stop().await;
    // Stopping a shared-app server leaves the owner's listener alone
    let r1 = client_for(addr, "/one").call("c", json!(3)).await.unwrap().unwrap();
    assert_eq!(r1["server"], "one");
}

#[tokio::test]
async fn shared_app_keeps_owner_routes() {
    let app = SharedApp::from_router(Router::new().route("/health", post(|| async { "ok" })));
    let transport = HttpTransport::new(TransportOptions::new().app(app.clone())).unwrap();
    let _server = transport.server(TestDispatch).unwrap();

    let addr = serve_router(app.router()).await;
    let (status, body) = post_raw(&format!("http://{addr}/health"), "").await;
    assert_eq!(status, 200);
    assert_eq!(body, "ok");

    let client = client_for(addr, "/ht-jsonrpc");
    assert_eq!(client.call("m", json!([])).await.unwrap(), Some(json!([])));
}

#[tokio::test]
async fn server_mounted_after_serving_is_reachable() {
    let app = SharedApp::new();
    let early = HttpTransport::new(TransportOptions::new().app(app.clone()).path("/early")).unwrap();
    let _early = early.server(Tagged("early")).unwrap();

    let addr = serve_router(app.router()).await;

    let (status, _) = post_raw(
        &format!("http://{addr}/late"),
        r#"{"jsonrpc":"2.0","method":"m","id":1}"#,
    )
    .await;
    assert_eq!(status, 404);

    let late = HttpTransport::new(TransportOptions::new().app(app.clone()).path("/late")).unwrap();
    let _late = late.server(Tagged("late")).unwrap();

    let result = client_for(addr, "/late").call("m", json!(1)).await.unwrap().unwrap();
    assert_eq!(result["server"], "late");
    let result = client_for(addr, "/early").call("m", json!(2)).await.unwrap().unwrap();
    assert_eq!(result["server"], "early");
}

// ─────────────────────────────────────────────────────────────────────────────
// CORS
// ─────────────────────────────────────────────────────────────────────────────

async fn allow_origin_header(addr: SocketAddr) -> Option<String> {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/ht-jsonrpc"))
        .header("content-type", "application/json")
        .header("origin", "http://example.test")
        .body(r#"{"jsonrpc":"2.0","method":"m","id":1}"#)
        .send()
        .await
        .unwrap();
    response
        .headers()
        .get("access-control-allow-origin")
        .map(|v| v.to_str().unwrap().to_string())
}

#[tokio::test]
async fn cors_headers_on_owned_router() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new().cors(true)).await;
    assert_eq!(allow_origin_header(addr).await.as_deref(), Some("*"));
}

#[tokio::test]
async fn cors_preflight_is_answered() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new().cors(true)).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/ht-jsonrpc"))
        .header("origin", "http://example.test")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success(), "preflight got {}", response.status());
    let headers = response.headers();
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    assert!(headers.contains_key("access-control-allow-methods"));
    assert!(headers.contains_key("access-control-allow-headers"));
    // Preflight never reaches dispatch
    assert!(response.text().await.unwrap().is_empty());
}

#[tokio::test]
async fn no_cors_headers_by_default() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    assert_eq!(allow_origin_header(addr).await, None);
}

#[tokio::test]
async fn no_cors_headers_on_shared_app() {
    let app = SharedApp::new();
    let transport = HttpTransport::new(TransportOptions::new().app(app.clone()).cors(true)).unwrap();
    let _server = transport.server(TestDispatch).unwrap();

    let addr = serve_router(app.router()).await;
    assert_eq!(allow_origin_header(addr).await, None);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_calls_complete_independently() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let client = client_for(addr, "/ht-jsonrpc");

    let started = Instant::now();
    let calls = (0..8u64).map(|i| {
        let client = client.clone();
        async move {
            // Later calls sleep less, so completion order differs from issue order
            let params = json!({"ms": 400 - i * 40, "n": i});
            let result = client.call("slow", params.clone()).await;
            (params, result)
        }
    });
    let results = timeout(TEST_TIMEOUT, futures_util::future::join_all(calls))
        .await
        .expect("Timeout");

    for (params, result) in results {
        assert_eq!(result.unwrap(), Some(params));
    }
    // Sequential handling would take well over 2s
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn slow_dispatch_does_not_block_fast_calls() {
    let (_server, addr) = start_server(TestDispatch, TransportOptions::new()).await;
    let client = client_for(addr, "/ht-jsonrpc");

    let slow_client = client.clone();
    let slow = tokio::spawn(async move { slow_client.call("slow", json!({"ms": 1500})).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let fast = timeout(Duration::from_millis(1000), client.call("m", json!("fast")))
        .await
        .expect("fast call was blocked by the slow one");
    assert_eq!(fast.unwrap(), Some(json!("fast")));

    assert!(slow.await.unwrap().is_ok());
}

// ─────────────────────────────────────────────────────────────────────────────
// TLS
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn https_round_trip_with_self_signed_cert() {
    let dir = tempfile::TempDir::new().unwrap();
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
    let tls = TlsConfig::new(&cert_path, &key_path);

    let (mut server, addr) =
        start_server(TestDispatch, TransportOptions::new().tls(tls.clone())).await;

    let client = HttpTransport::new(
        TransportOptions::new()
            .host("127.0.0.1")
            .port(addr.port())
            .tls(tls),
    )
    .unwrap()
    .client()
    .unwrap();
    assert!(client.config().endpoint_url().unwrap().starts_with("https://"));

    let result = timeout(TEST_TIMEOUT, client.call("m", json!({"secure": true})))
        .await
        .expect("Timeout")
        .unwrap();
    assert_eq!(result, Some(json!({"secure": true})));

    // Plain HTTP against the TLS listener does not produce a result
    let plain = client_for(addr, "/ht-jsonrpc");
    assert!(plain.call("m", Value::Null).await.is_err());

    timeout(TEST_TIMEOUT, server.stop()).await.expect("stop hung");
}

#[tokio::test]
async fn missing_tls_material_fails_listen() {
    let transport = HttpTransport::new(
        TransportOptions::new()
            .host("127.0.0.1")
            .port(0)
            .tls(TlsConfig::new("/nonexistent/cert.pem", "/nonexistent/key.pem")),
    )
    .unwrap();
    let mut server = transport.server(TestDispatch).unwrap();
    let err = server.listen().await.unwrap_err();
    assert!(err.to_string().contains("TLS"));
    assert!(!server.is_listening());
}
