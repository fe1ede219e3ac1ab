use async_trait::async_trait;
use tapp_nfc::friends::{EventTap, FriendApi, FriendOutcome, HttpFriendApi, Result};
use tracing::info;
use url::Url;

/// The friend API, or a stand-in that only logs when no base URL is configured.
pub enum CliApi {
    Http(HttpFriendApi),
    DryRun,
}

impl CliApi {
    pub fn new(base_url: Option<Url>) -> Self {
        match base_url {
            Some(url) => Self::Http(HttpFriendApi::new(url)),
            None => Self::DryRun,
        }
    }
}

#[async_trait]
impl FriendApi for CliApi {
    async fn add_friend(&self, me: &str, other: &str) -> Result<FriendOutcome> {
        match self {
            Self::Http(api) => api.add_friend(me, other).await,
            Self::DryRun => {
                info!("Dry run: would add {} as a friend of {}", other, me);
                Ok(FriendOutcome::Added { friend: None })
            }
        }
    }

    async fn record_event_tap(&self, event_id: &str, tapper: &str, tapped: &str) -> Result<EventTap> {
        match self {
            Self::Http(api) => api.record_event_tap(event_id, tapper, tapped).await,
            Self::DryRun => Ok(EventTap {
                status: "dry-run".to_string(),
                message: format!("{tapper} tapped {tapped} at {event_id}"),
            }),
        }
    }
}
