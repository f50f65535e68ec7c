use gemini_relay::config::{Config, CredentialPool};
use gemini_relay::forwarder::ChatForwarder;
use gemini_relay::server;
use gemini_relay::types::ChatRequest;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const GENERATE_PATH: &str = "/v1beta/models/gemini-2.0-flash:generateContent";

/// 在随机端口启动中继服务，上游指向 mock 服务器
async fn spawn_relay(upstream: &ServerGuard, keys: &str) -> SocketAddr {
    let mut config = Config::new(CredentialPool::parse(keys).unwrap());
    config.upstream.api_base = upstream.url();
    config.upstream.timeout_secs = 5;
    let forwarder = Arc::new(ChatForwarder::from_config(&config).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(
        listener,
        forwarder,
        std::future::pending::<()>(),
    ));
    addr
}

async fn post_chat(addr: SocketAddr, body: Value) -> (u16, Value) {
    let client = reqwest::Client::new();
    let response = timeout(
        Duration::from_secs(10),
        client
            .post(format!("http://{}/chat", addr))
            .json(&body)
            .send(),
    )
    .await
    .expect("请求超时")
    .expect("请求失败");

    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap();
    (status, body)
}

/// 单个可用密钥：{message: "hi"} -> {reply: "hello"}
#[tokio::test]
async fn test_single_working_key() {
    let mut upstream = Server::new_async().await;
    let mock = upstream
        .mock("POST", GENERATE_PATH)
        .match_query(Matcher::UrlEncoded("key".into(), "key-ok".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"candidates": [{"content": {"role": "model", "parts": [{"text": "hello"}]}}]}"#)
        .expect(1)
        .create_async()
        .await;

    let addr = spawn_relay(&upstream, "key-ok").await;
    let (status, body) = post_chat(addr, json!({"message": "hi"})).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"reply": "hello"}));
    mock.assert_async().await;
}

/// 前两个密钥失败，第三个成功，之后不再有调用
#[tokio::test]
async fn test_fallback_to_third_key() {
    let mut upstream = Server::new_async().await;
    let first = upstream
        .mock("POST", GENERATE_PATH)
        .match_query(Matcher::UrlEncoded("key".into(), "key-1".into()))
        .with_status(403)
        .with_body(r#"{"error": {"message": "API key not valid"}}"#)
        .expect(1)
        .create_async()
        .await;
    let second = upstream
        .mock("POST", GENERATE_PATH)
        .match_query(Matcher::UrlEncoded("key".into(), "key-2".into()))
        .with_status(429)
        .with_body(r#"{"error": {"message": "Resource has been exhausted"}}"#)
        .expect(1)
        .create_async()
        .await;
    let third = upstream
        .mock("POST", GENERATE_PATH)
        .match_query(Matcher::UrlEncoded("key".into(), "key-3".into()))
        .with_status(200)
        .with_body(r#"{"candidates": [{"content": {"parts": [{"text": "third key reply"}]}}]}"#)
        .expect(1)
        .create_async()
        .await;
    let fourth = upstream
        .mock("POST", GENERATE_PATH)
        .match_query(Matcher::UrlEncoded("key".into(), "key-4".into()))
        .with_status(200)
        .with_body(r#"{"candidates": [{"content": {"parts": [{"text": "unused"}]}}]}"#)
        .expect(0)
        .create_async()
        .await;

    let addr = spawn_relay(&upstream, "key-1,key-2,key-3,key-4").await;
    let (status, body) = post_chat(addr, json!({"message": "hi"})).await;

    assert_eq!(status, 200);
    assert_eq!(body["reply"], "third key reply");
    first.assert_async().await;
    second.assert_async().await;
    third.assert_async().await;
    fourth.assert_async().await;
}

/// 所有密钥失败：恰好 N 次调用，返回 500 和最后一个错误
#[tokio::test]
async fn test_all_keys_exhausted() {
    let mut upstream = Server::new_async().await;
    let mock = upstream
        .mock("POST", GENERATE_PATH)
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body(r#"{"error": {"message": "Internal error encountered."}}"#)
        .expect(3)
        .create_async()
        .await;

    let addr = spawn_relay(&upstream, "a-key,b-key,c-key").await;
    let (status, body) = post_chat(addr, json!({"message": "hi"})).await;

    assert_eq!(status, 500);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("Internal error encountered."));
    assert!(!error.contains("c-key"));
    mock.assert_async().await;
}

/// 历史截断与角色映射在上游请求体中可见
#[tokio::test]
async fn test_history_forwarded_truncated_with_model_role() {
    let mut upstream = Server::new_async().await;

    let history: Vec<Value> = (0..12)
        .map(|i| {
            let role = if i % 2 == 0 { "user" } else { "bot" };
            json!({"role": role, "content": format!("m{}", i)})
        })
        .collect();

    // 期望：m2..m11 共 10 条，bot -> model
    let expected: Vec<Value> = (2..12)
        .map(|i| {
            let role = if i % 2 == 0 { "user" } else { "model" };
            json!({"role": role, "parts": [{"text": format!("m{}", i)}]})
        })
        .collect();

    let mock = upstream
        .mock("POST", GENERATE_PATH)
        .match_query(Matcher::Any)
        .match_body(Matcher::Json(json!({ "contents": expected })))
        .with_status(200)
        .with_body(r#"{"candidates": [{"content": {"parts": [{"text": "ok"}]}}]}"#)
        .expect(1)
        .create_async()
        .await;

    let addr = spawn_relay(&upstream, "k1").await;
    let (status, body) = post_chat(addr, json!({"messages": history})).await;

    assert_eq!(status, 200);
    assert_eq!(body["reply"], "ok");
    mock.assert_async().await;
}

/// 空对象请求返回 400，且不调用上游
#[tokio::test]
async fn test_empty_request_rejected() {
    let mut upstream = Server::new_async().await;
    let mock = upstream
        .mock("POST", GENERATE_PATH)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let addr = spawn_relay(&upstream, "k1").await;
    let (status, body) = post_chat(addr, json!({})).await;

    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    let (status, _) = post_chat(addr, json!({"messages": []})).await;
    assert_eq!(status, 400);

    mock.assert_async().await;
}

/// 生成参数以 generationConfig 转发
#[tokio::test]
async fn test_generation_params_forwarded() {
    let mut upstream = Server::new_async().await;
    let mock = upstream
        .mock("POST", GENERATE_PATH)
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "generationConfig": {"topK": 32}
        })))
        .with_status(200)
        .with_body(r#"{"candidates": [{"content": {"parts": [{"text": "tuned"}]}}]}"#)
        .expect(1)
        .create_async()
        .await;

    let addr = spawn_relay(&upstream, "k1").await;
    let (status, body) = post_chat(addr, json!({"message": "hi", "topK": 32})).await;

    assert_eq!(status, 200);
    assert_eq!(body["reply"], "tuned");
    mock.assert_async().await;
}

/// GET / 返回在线提示
#[tokio::test]
async fn test_root_is_online() {
    let upstream = Server::new_async().await;
    let addr = spawn_relay(&upstream, "k1").await;

    let response = reqwest::get(format!("http://{}/", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
    let text = response.text().await.unwrap();
    assert!(text.contains("/chat"));
}

/// 读取一个完整的 HTTP 请求，返回请求行
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "连接在请求头结束前关闭");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    head.lines().next().unwrap_or_default().to_string()
}

/// 上游桩：slow-key 的请求一直挂起，其余密钥立即回复 "fast"
async fn spawn_stalling_upstream(hits: Arc<AtomicUsize>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let hits = hits.clone();
            tokio::spawn(async move {
                let request_line = read_request(&mut stream).await;
                hits.fetch_add(1, Ordering::SeqCst);

                if request_line.contains("key=slow-key") {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    return;
                }

                let body = r#"{"candidates": [{"content": {"parts": [{"text": "fast"}]}}]}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

/// 单次尝试超时后回退到下一个密钥
#[tokio::test]
async fn test_attempt_timeout_falls_through_to_next_key() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_stalling_upstream(hits.clone()).await;

    let mut config = Config::new(CredentialPool::parse("slow-key,fast-key").unwrap());
    config.upstream.api_base = format!("http://{}", addr);
    config.upstream.timeout_secs = 1;
    let forwarder = ChatForwarder::from_config(&config).unwrap();

    let started = Instant::now();
    let reply = timeout(
        Duration::from_secs(10),
        forwarder.handle(&ChatRequest::with_message("hi")),
    )
    .await
    .expect("中继未在超时后回退")
    .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(reply.reply, "fast");
    assert!(elapsed >= Duration::from_millis(900), "回退过早: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "等待了挂起的上游: {:?}", elapsed);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
