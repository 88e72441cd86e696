use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Messenger, MessagingType, SendError, SendRequest};
use crate::config::AppConfig;

/// Graph error subcode for "message sent outside of allowed window".
const WINDOW_SUBCODE: i64 = 2018278;

#[derive(Debug, Serialize)]
struct Recipient<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SendBody<'a> {
    recipient: Recipient<'a>,
    message: TextMessage<'a>,
    messaging_type: MessagingType,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct GraphErrorEnvelope {
    error: Option<GraphError>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    code: Option<i64>,
    error_subcode: Option<i64>,
}

/// Client for the Messenger Send API.
pub struct GraphClient {
    client: Client,
    base_url: String,
    version: String,
}

impl GraphClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.graph_api_base.trim_end_matches('/').to_string(),
            version: config.graph_api_version.clone(),
        })
    }

    fn messages_url(&self, page_id: &str) -> String {
        format!("{}/{}/{}/messages", self.base_url, self.version, page_id)
    }
}

/// Map a Graph error response onto `SendError`, picking out window violations.
fn classify_error(status: u16, body: &str) -> SendError {
    let envelope: GraphErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let Some(error) = envelope.error else {
        return SendError::Api {
            status,
            code: None,
            message: body.chars().take(200).collect(),
        };
    };

    let lowered = error.message.to_lowercase();
    let window_violation = error.error_subcode == Some(WINDOW_SUBCODE)
        || (error.code == Some(10) && lowered.contains("window"))
        || lowered.contains("outside of allowed window");

    if window_violation {
        SendError::OutsideWindow(error.message)
    } else {
        SendError::Api {
            status,
            code: error.code,
            message: error.message,
        }
    }
}

#[async_trait]
impl Messenger for GraphClient {
    async fn send_text(&self, request: &SendRequest) -> Result<String, SendError> {
        let body = SendBody {
            recipient: Recipient {
                id: &request.recipient_id,
            },
            message: TextMessage {
                text: &request.text,
            },
            messaging_type: request.messaging_type,
            tag: request.tag.as_deref(),
        };

        let resp = self
            .client
            .post(self.messages_url(&request.page_id))
            .query(&[("access_token", request.access_token.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            let err = classify_error(status.as_u16(), &text);
            tracing::warn!("Send to {} failed: {}", request.recipient_id, err);
            return Err(err);
        }

        let parsed: SendResponse = serde_json::from_str(&text).map_err(|e| SendError::Api {
            status: status.as_u16(),
            code: None,
            message: format!("unexpected send response: {}", e),
        })?;
        Ok(parsed.message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> GraphClient {
        let mut config = AppConfig::for_tests();
        config.graph_api_base = server.url();
        GraphClient::new(&config).unwrap()
    }

    #[test]
    fn test_classify_window_error() {
        let body = r#"{"error":{"message":"(#10) This message is sent outside of allowed window.",
            "type":"OAuthException","code":10,"error_subcode":2018278}}"#;
        assert!(matches!(classify_error(400, body), SendError::OutsideWindow(_)));
    }

    #[test]
    fn test_classify_other_errors() {
        let body = r#"{"error":{"message":"Invalid OAuth access token.","code":190}}"#;
        match classify_error(401, body) {
            SendError::Api { status, code, message } => {
                assert_eq!(status, 401);
                assert_eq!(code, Some(190));
                assert!(message.contains("OAuth"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            classify_error(502, "<html>bad gateway</html>"),
            SendError::Api { code: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_send_tagged_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v19.0/PAGE1/messages")
            .match_query(Matcher::UrlEncoded("access_token".into(), "tok".into()))
            .match_body(Matcher::PartialJson(serde_json::json!({
                "recipient": {"id": "PSID"},
                "message": {"text": "hello"},
                "messaging_type": "MESSAGE_TAG",
                "tag": "ACCOUNT_UPDATE"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"recipient_id":"PSID","message_id":"m_abc"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let request = SendRequest::new("PAGE1", "tok", "PSID", "hello").tagged();
        let id = client.send_text(&request).await.unwrap();

        assert_eq!(id, "m_abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_window_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v19.0/PAGE1/messages")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"message":"outside of allowed window","code":10,"error_subcode":2018278}}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let request = SendRequest::new("PAGE1", "tok", "PSID", "hello");
        let err = client.send_text(&request).await.unwrap_err();
        assert!(matches!(err, SendError::OutsideWindow(_)));
    }
}
