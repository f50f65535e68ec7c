use crate::error::RelayError;
use crate::forwarder::ChatForwarder;
use crate::metrics;
use crate::types::ChatRequest;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE,
};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type BoxBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// GET / 返回的在线提示
pub const ONLINE_MESSAGE: &str = "Gemini 中继服务已上线，请 POST /chat 发起对话。";

/// 处理 HTTP 请求的主路由
pub async fn handle_request<B>(
    req: Request<B>,
    forwarder: Arc<ChatForwarder>,
) -> Result<Response<BoxBody>, BoxError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => online(),
        (&Method::GET, "/health") => health_check(&forwarder),
        (&Method::GET, "/metrics") => metrics_endpoint(),
        (&Method::POST, "/chat") => chat(req, forwarder).await?,
        (&Method::OPTIONS, _) => preflight(),
        _ => not_found(),
    };

    Ok(with_cors(response))
}

fn full_body(body: impl Into<Bytes>) -> BoxBody {
    Full::new(body.into())
        .map_err(|e| Box::new(e) as BoxError)
        .boxed()
}

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<BoxBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<BoxBody>, BoxError> {
    let body = serde_json::to_vec(value)?;
    Ok(response(status, "application/json", body))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response<BoxBody> {
    let body = json!({ "error": message.into() });
    response(status, "application/json", body.to_string())
}

/// 所有响应都允许跨域访问
fn with_cors(mut response: Response<BoxBody>) -> Response<BoxBody> {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

fn online() -> Response<BoxBody> {
    response(StatusCode::OK, "text/plain; charset=utf-8", ONLINE_MESSAGE)
}

/// 健康检查端点
fn health_check(forwarder: &ChatForwarder) -> Response<BoxBody> {
    let body = json!({
        "status": "ok",
        "service": "gemini-relay",
        "credentials": forwarder.credentials().len()
    });
    response(StatusCode::OK, "application/json", body.to_string())
}

/// 指标端点
fn metrics_endpoint() -> Response<BoxBody> {
    let body = metrics::global_metrics().export_prometheus();
    response(StatusCode::OK, "text/plain; version=0.0.4", body)
}

fn preflight() -> Response<BoxBody> {
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

/// 404 响应
fn not_found() -> Response<BoxBody> {
    response(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "Not Found")
}

/// 聊天端点
async fn chat<B>(
    req: Request<B>,
    forwarder: Arc<ChatForwarder>,
) -> Result<Response<BoxBody>, BoxError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let metrics = metrics::global_metrics();

    let is_form = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    // 读取请求体（带大小限制）
    let limit = forwarder.policy().max_body_bytes;
    let whole_body = match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            metrics.record_failure();
            return Ok(error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("请求体超过 {} 字节上限", limit),
            ));
        }
        Err(e) => return Err(e),
    };

    let chat_req = match parse_chat_request(&whole_body, is_form) {
        Ok(chat_req) => chat_req,
        Err(e) => {
            metrics.record_failure();
            return Ok(error_for(&e));
        }
    };

    let request_id = uuid::Uuid::new_v4();
    let span = info_span!("chat", %request_id);
    let result = async {
        info!(history = chat_req.history_turns().len(), "收到聊天请求");
        forwarder.handle(&chat_req).await
    }
    .instrument(span)
    .await;

    let mut response = match result {
        Ok(reply) => {
            metrics.record_success();
            json_response(StatusCode::OK, &reply)?
        }
        Err(e) => {
            metrics.record_failure();
            error_for(&e)
        }
    };

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    Ok(response)
}

/// 解析 JSON 或表单请求体，空请求体按空对象处理
fn parse_chat_request(body: &[u8], is_form: bool) -> crate::Result<ChatRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ChatRequest::default());
    }
    if is_form {
        return ChatRequest::from_form(body);
    }
    Ok(serde_json::from_slice(body)?)
}

/// 错误到 HTTP 响应的映射
fn error_for(e: &RelayError) -> Response<BoxBody> {
    match e {
        RelayError::InvalidInput(message) => error_response(StatusCode::BAD_REQUEST, message.clone()),
        RelayError::JsonError(err) => error_response(
            StatusCode::BAD_REQUEST,
            format!("无效的 JSON 请求体: {}", err),
        ),
        RelayError::AllCredentialsExhausted { .. } => {
            error!(error = %e, "所有 API 密钥均失败");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        _ => {
            error!(error = %e, "处理聊天请求时出错");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "服务器内部错误")
        }
    }
}
