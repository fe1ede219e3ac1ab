//! The backend friend-request API, the only consumer of a successful read.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error occurred while calling the friend API: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid friend API URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Friend API rejected the request ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Friend API refused a request to yourself")]
    SelfRequest,

    #[error("Friend API answered without `ok`")]
    NotOk,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum FriendOutcome {
    /// The relationship was recorded. `friend` is the record the API returned.
    Added { friend: Option<serde_json::Value> },

    /// The API reported an existing relationship (`409`).
    AlreadyFriends,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventTap {
    pub status: String,
    pub message: String,
}

#[async_trait]
pub trait FriendApi: Send + Sync {
    /// Records a friendship between `me` and the user read off the tag.
    async fn add_friend(&self, me: &str, other: &str) -> Result<FriendOutcome>;

    /// Marks both users as having tapped each other at an event.
    async fn record_event_tap(&self, event_id: &str, tapper: &str, tapped: &str)
        -> Result<EventTap>;
}

#[derive(Serialize)]
struct TapRequest<'a> {
    me_user_id: &'a str,
    other_user_uuid: &'a str,
}

#[derive(Deserialize)]
struct TapResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    friend: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct EventTapRequest<'a> {
    tapper_id: &'a str,
    tapped_id: &'a str,
}

/// Error body of the API: `{"detail": "..."}`.
#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

pub struct HttpFriendApi {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpFriendApi {
    pub fn new(base_url: Url) -> Self {
        Self::new_with_client(base_url, reqwest::Client::new())
    }

    pub fn new_with_client(mut base_url: Url, client: reqwest::Client) -> Self {
        // `join` replaces the last segment unless the path ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self { base_url, client }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = self.base_url.join(path)?;
        debug!("POST {}", url);

        Ok(self.client.post(url).json(body).send().await?)
    }
}

#[async_trait]
impl FriendApi for HttpFriendApi {
    async fn add_friend(&self, me: &str, other: &str) -> Result<FriendOutcome> {
        let request = TapRequest {
            me_user_id: me,
            other_user_uuid: other,
        };
        let response = self.post("friends/tap", &request).await?;

        match response.status() {
            StatusCode::CONFLICT => {
                info!("Already friends with {}", other);
                Ok(FriendOutcome::AlreadyFriends)
            }
            StatusCode::BAD_REQUEST => Err(Error::SelfRequest),
            status if status.is_success() => {
                let body: TapResponse = response.json().await?;
                match body.ok {
                    true => Ok(FriendOutcome::Added {
                        friend: body.friend,
                    }),
                    _ => Err(Error::NotOk),
                }
            }
            _ => Err(rejected(response).await),
        }
    }

    async fn record_event_tap(
        &self,
        event_id: &str,
        tapper: &str,
        tapped: &str,
    ) -> Result<EventTap> {
        let request = EventTapRequest {
            tapper_id: tapper,
            tapped_id: tapped,
        };
        let response = self
            .post(&format!("events/{event_id}/tap"), &request)
            .await?;

        match response.status().is_success() {
            true => Ok(response.json().await?),
            _ => Err(rejected(response).await),
        }
    }
}

async fn rejected(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let detail = match response.text().await {
        Ok(text) => match serde_json::from_str::<ErrorBody>(&text) {
            Ok(ErrorBody {
                detail: serde_json::Value::String(detail),
            }) => detail,
            Ok(ErrorBody { detail }) => detail.to_string(),
            Err(_) => text,
        },
        Err(e) => e.to_string(),
    };

    Error::Rejected { status, detail }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// Answers one request with `status` and `body`, returning what it received.
    async fn respond_once(status: &'static str, body: &'static str) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/api", listener.local_addr().unwrap())).unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];

            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&request).to_string();
                if let Some((head, received)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);

                    if received.len() >= length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();

            String::from_utf8_lossy(&request).to_string()
        });

        (url, handle)
    }

    fn api(url: Url) -> HttpFriendApi {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpFriendApi::new_with_client(url, client)
    }

    #[tokio::test]
    async fn posts_the_tap_and_reads_the_friend() {
        let (url, server) = respond_once(
            "200 OK",
            r#"{"ok":true,"friend":{"uuid":"abc-123","name":"Alice"}}"#,
        )
        .await;

        let outcome = api(url)
            .add_friend("me-1", "abc-123")
            .await
            .unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("POST /api/friends/tap "));
        assert!(request.contains(r#"{"me_user_id":"me-1","other_user_uuid":"abc-123"}"#));
        assert_eq!(
            FriendOutcome::Added {
                friend: Some(serde_json::json!({"uuid": "abc-123", "name": "Alice"})),
            },
            outcome,
        );
    }

    #[tokio::test]
    async fn treats_conflict_as_already_friends() {
        let (url, server) = respond_once(
            "409 Conflict",
            r#"{"detail":"A friendship or request already exists between these users."}"#,
        )
        .await;

        let outcome = api(url).add_friend("me-1", "abc-123").await;
        server.await.unwrap();

        assert_eq!(FriendOutcome::AlreadyFriends, outcome.unwrap());
    }

    #[tokio::test]
    async fn surfaces_the_error_detail() {
        let (url, server) =
            respond_once("404 Not Found", r#"{"detail":"One or both users not found."}"#).await;

        let outcome = api(url).add_friend("me-1", "abc-123").await;
        server.await.unwrap();

        match outcome {
            Err(Error::Rejected { status, detail }) => {
                assert_eq!(404, status);
                assert_eq!("One or both users not found.", detail);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reports_self_requests() {
        let (url, server) = respond_once(
            "400 Bad Request",
            r#"{"detail":"Cannot send a friend request to yourself."}"#,
        )
        .await;

        let outcome = api(url).add_friend("abc-123", "abc-123").await;
        server.await.unwrap();

        assert!(matches!(outcome, Err(Error::SelfRequest)));
    }

    #[tokio::test]
    async fn records_an_event_tap() {
        let (url, server) = respond_once(
            "200 OK",
            r#"{"status":"tapped","message":"Tap interaction recorded."}"#,
        )
        .await;

        let tap = api(url)
            .record_event_tap("event-9", "me-1", "abc-123")
            .await
            .unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("POST /api/events/event-9/tap "));
        assert!(request.contains(r#"{"tapper_id":"me-1","tapped_id":"abc-123"}"#));
        assert_eq!("tapped", tap.status);
    }
}
