#![forbid(unsafe_code)]

use async_trait::async_trait;
use log::{error, trace};
use serde::{Deserialize, Serialize};

use crate::completion::forwarder::{CompletionClient, ForwardError};
use crate::utils::config::Config;

// ***************************************************************************
//                              Wire Types
// ***************************************************************************
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// ***************************************************************************
//                              OpenAI Client
// ***************************************************************************
/** Chat completions client.  One instance is built at startup and shared by
 * all requests; the underlying reqwest client pools connections internally.
 */
pub struct OpenAiClient {
    http_client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_base: String, api_key: Option<String>, model: String) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    pub fn from_config(config: &Config, api_key: Option<String>) -> Self {
        Self::new(config.api_base.clone(), api_key, config.model.clone())
    }

    /// A single user message, no system role and no history.
    pub fn chat_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage { role: "user".to_string(), content: Some(prompt.to_string()) }],
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, ForwardError> {
        let request = self.chat_request(prompt);
        trace!("Completion request: {:?}", request);

        let mut builder = self.http_client
            .post(format!("{}/chat/completions", self.api_base))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            error!("Completion transport error: {}", e);
            ForwardError::ProviderFailure(e.to_string())
        })?;

        let status = response.status();
        trace!("Completion response status: {}", status);
        let body = response.text().await.map_err(|e| {
            error!("Unable to read completion response: {}", e);
            ForwardError::ProviderFailure(e.to_string())
        })?;

        if !status.is_success() {
            return Err(provider_error(status.as_u16(), &body));
        }
        parse_completion(&body)
    }
}

// ***************************************************************************
//                            Response Parsing
// ***************************************************************************
// ---------------------------------------------------------------------------
// provider_error:
// ---------------------------------------------------------------------------
/** Non-2xx responses carry the provider's explanation in error.message when
 * they come from the API itself; proxies and gateways may send anything.
 */
fn provider_error(status: u16, body: &str) -> ForwardError {
    let detail = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => env.error.message,
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().to_string(),
    };
    let msg = format!("status {}: {}", status, detail);
    error!("Completion API rejected the request, {}", msg);
    ForwardError::ProviderFailure(msg)
}

// ---------------------------------------------------------------------------
// parse_completion:
// ---------------------------------------------------------------------------
fn parse_completion(body: &str) -> Result<String, ForwardError> {
    let resp: ChatResponse = serde_json::from_str(body).map_err(|e| {
        error!("Malformed completion response: {}", e);
        ForwardError::UnexpectedFailure("malformed completion response".to_string())
    })?;

    let choice = resp.choices.into_iter().next().ok_or_else(|| {
        error!("Completion response contained no choices");
        ForwardError::UnexpectedFailure("completion response contained no choices".to_string())
    })?;

    choice.message.content.ok_or_else(|| {
        error!("Completion response choice has no content");
        ForwardError::UnexpectedFailure("completion response choice has no content".to_string())
    })
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use poem::http::StatusCode;
    use poem::listener::{Acceptor, Listener, TcpListener};
    use poem::web::Json;
    use poem::{handler, post, IntoResponse, Request, Route, Server};
    use serde_json::{json, Value};

    #[test]
    fn request_has_single_user_message() {
        let client = OpenAiClient::new("https://api.example.com/v1/".to_string(), None, "gpt-3.5-turbo".to_string());
        let req = serde_json::to_value(client.chat_request("hi there")).unwrap();
        assert_eq!(req, json!({
            "model": "gpt-3.5-turbo",
            "messages": [{"role": "user", "content": "hi there"}]
        }));
        assert_eq!(client.api_base, "https://api.example.com/v1");
    }

    #[test]
    fn first_choice_is_returned() {
        let body = r#"{"id":"x","choices":[
            {"index":0,"message":{"role":"assistant","content":" hola "},"finish_reason":"stop"},
            {"index":1,"message":{"role":"assistant","content":"buenos"},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_completion(body), Ok(" hola ".to_string()));
    }

    #[test]
    fn odd_shapes_are_unexpected() {
        for body in ["not json", r#"{"choices":[]}"#, r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#] {
            assert!(matches!(parse_completion(body), Err(ForwardError::UnexpectedFailure(_))), "{}", body);
        }
    }

    #[test]
    fn provider_message_is_extracted() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(provider_error(401, body),
                   ForwardError::ProviderFailure("status 401: Incorrect API key provided".to_string()));
        assert_eq!(provider_error(502, "Bad Gateway"),
                   ForwardError::ProviderFailure("status 502: Bad Gateway".to_string()));
        assert_eq!(provider_error(500, ""),
                   ForwardError::ProviderFailure("status 500: no response body".to_string()));
    }

    // A local stand-in for the chat completions endpoint.  It echoes the
    // prompt back, or fails when no bearer token is presented.
    #[handler]
    fn fake_completions(req: &Request, Json(body): Json<Value>) -> poem::Response {
        let authorized = req.headers().get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer sk-test");
        if !authorized {
            let err = json!({"error": {"message": "You didn't provide an API key."}});
            return (StatusCode::UNAUTHORIZED, Json(err)).into_response();
        }
        let prompt = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
        let resp = json!({
            "choices": [{"message": {"role": "assistant", "content": format!("echo: {}\n", prompt)}}]
        });
        Json(resp).into_response()
    }

    async fn start_fake_provider() -> String {
        let acceptor = TcpListener::bind("127.0.0.1:0").into_acceptor().await.unwrap();
        let port = acceptor.local_addr()[0].as_socket_addr().unwrap().port();
        let app = Route::new().at("/v1/chat/completions", post(fake_completions));
        tokio::spawn(Server::new_with_acceptor(acceptor).run(app));
        format!("http://127.0.0.1:{}/v1", port)
    }

    #[tokio::test]
    async fn round_trip_against_local_provider() {
        let base = start_fake_provider().await;
        let client = OpenAiClient::new(base, Some("sk-test".to_string()), "gpt-3.5-turbo".to_string());
        assert_eq!(client.complete("bonjour").await, Ok("echo: bonjour\n".to_string()));
    }

    #[tokio::test]
    async fn missing_key_surfaces_as_provider_failure() {
        let base = start_fake_provider().await;
        let client = OpenAiClient::new(base, None, "gpt-3.5-turbo".to_string());
        match client.complete("bonjour").await {
            Err(ForwardError::ProviderFailure(msg)) => assert!(msg.contains("didn't provide an API key")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_provider_is_provider_failure() {
        // Port 9 (discard) is not expected to be listening locally.
        let client = OpenAiClient::new("http://127.0.0.1:9/v1".to_string(), None, "m".to_string());
        assert!(matches!(client.complete("x").await, Err(ForwardError::ProviderFailure(_))));
    }
}
