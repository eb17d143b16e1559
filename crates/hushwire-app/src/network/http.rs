//! REST driver.

use std::future::Future;

use hushwire_core::{ChatId, DeliveryError, InboundMessage, MessageType, SendReceipt, UserId};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use crate::{
    driver::ChatApi,
    error::{ApiError, RuntimeError},
    state::{ChatRequest, ChatSummary, UserSummary},
};

const USER_AGENT: &str = concat!("hushwire/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct ChatList {
    chats: Vec<ChatSummary>,
}

#[derive(Deserialize)]
struct RequestList {
    requests: Vec<ChatRequest>,
}

#[derive(Deserialize)]
struct MessageList {
    messages: Vec<InboundMessage>,
}

#[derive(Deserialize)]
struct UserList {
    users: Vec<UserSummary>,
}

#[derive(Deserialize)]
struct RequestCreated {
    request_id: u64,
}

#[derive(Deserialize)]
struct RequestAccepted {
    chat_id: ChatId,
}

#[derive(Deserialize)]
struct Outcome {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

/// [`ChatApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
}

impl HttpApi {
    /// Client for the API at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, RuntimeError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RuntimeError::Driver(e.to_string()))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<B: DeserializeOwned>(&self, token: &str, path: &str) -> Result<B, ApiError> {
        fetch(self.client.get(self.url(path)).bearer_auth(token)).await
    }

    async fn post<B: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<B, ApiError> {
        let mut request = self.client.post(self.url(path)).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        fetch(request).await
    }
}

async fn fetch<B: DeserializeOwned>(request: RequestBuilder) -> Result<B, ApiError> {
    let res = request.send().await.map_err(|e| ApiError::Transport(e.to_string()))?;
    let res = check(res).await?;
    res.json().await.map_err(|e| ApiError::Decode(e.to_string()))
}

async fn check(res: Response) -> Result<Response, ApiError> {
    let status = res.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if status.is_success() {
        return Ok(res);
    }

    let status = status.as_u16();
    match res.json::<ErrorBody>().await {
        Ok(body) => Err(ApiError::Refused { status, detail: body.detail }),
        Err(_) => Err(ApiError::Status { status }),
    }
}

impl ChatApi for HttpApi {
    fn send_message(
        &self,
        token: &str,
        chat_id: ChatId,
        ciphertext: &str,
        message_type: &MessageType,
    ) -> impl Future<Output = Result<SendReceipt, DeliveryError>> + Send {
        let request = self
            .client
            .post(self.url(&format!("/chat/messages/{chat_id}")))
            .bearer_auth(token)
            .json(&json!({
                "encrypted_content": ciphertext,
                "message_type": message_type.as_str(),
            }));

        async move {
            let res = request.send().await.map_err(|e| DeliveryError::Transport(e.to_string()))?;
            match res.status() {
                StatusCode::UNAUTHORIZED => return Err(DeliveryError::Unauthorized),
                status if !status.is_success() => {
                    return Err(DeliveryError::Rejected { status: status.as_u16() });
                },
                _ => {},
            }
            res.json().await.map_err(|e| DeliveryError::Transport(e.to_string()))
        }
    }

    fn active_chats(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Vec<ChatSummary>, ApiError>> + Send {
        async move { Ok(self.get::<ChatList>(token, "/chat/active").await?.chats) }
    }

    fn pending_requests(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Vec<ChatRequest>, ApiError>> + Send {
        async move { Ok(self.get::<RequestList>(token, "/chat/requests").await?.requests) }
    }

    fn messages(
        &self,
        token: &str,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<Vec<InboundMessage>, ApiError>> + Send {
        async move {
            let path = format!("/chat/messages/{chat_id}");
            Ok(self.get::<MessageList>(token, &path).await?.messages)
        }
    }

    fn search_users(
        &self,
        token: &str,
        query: &str,
    ) -> impl Future<Output = Result<Vec<UserSummary>, ApiError>> + Send {
        let body = json!({ "query": query });
        async move {
            Ok(self.post::<UserList>(token, "/chat/search-users", Some(body)).await?.users)
        }
    }

    fn send_chat_request(
        &self,
        token: &str,
        to_user: UserId,
        code: &str,
    ) -> impl Future<Output = Result<u64, ApiError>> + Send {
        let body = json!({ "to_user_id": to_user, "verification_code": code });
        async move {
            Ok(self.post::<RequestCreated>(token, "/chat/request", Some(body)).await?.request_id)
        }
    }

    fn accept_chat_request(
        &self,
        token: &str,
        request_id: u64,
        code: &str,
    ) -> impl Future<Output = Result<ChatId, ApiError>> + Send {
        let body = json!({ "request_id": request_id, "verification_code": code });
        async move {
            Ok(self.post::<RequestAccepted>(token, "/chat/accept", Some(body)).await?.chat_id)
        }
    }

    fn verify_chat(
        &self,
        token: &str,
        chat_id: ChatId,
        code: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        let body = json!({ "chat_id": chat_id, "verification_code": code });
        async move {
            self.post::<Outcome>(token, "/chat/verify", Some(body)).await?;
            Ok(())
        }
    }

    fn clear_chat(
        &self,
        token: &str,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        async move {
            self.post::<Outcome>(token, &format!("/chat/clear/{chat_id}"), None).await?;
            Ok(())
        }
    }

    fn request_delete_chat(
        &self,
        token: &str,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<String, ApiError>> + Send {
        async move {
            let outcome =
                self.post::<Outcome>(token, &format!("/chat/delete/{chat_id}"), None).await?;
            Ok(outcome.message.unwrap_or(outcome.status))
        }
    }
}
