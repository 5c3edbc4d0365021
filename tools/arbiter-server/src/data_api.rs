//! External data API client — membership lookup and character snapshots.
//!
//! Both operations are best-effort with a short timeout: a failure is a
//! warning, never a combat blocker. When no `DATA_API_URL` is configured the
//! client is inert (lookups miss, syncs no-op).

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use arbiter_engine::CharacterSync;
use arbiter_types::ids::{CampaignId, CharacterId, PlayerId};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct DataApi {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembershipResponse {
    player_user_id: Option<String>,
}

impl DataApi {
    pub fn new(config: &ServerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url: config.data_api_url.clone(),
            api_key: config.data_api_key.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Option<reqwest::RequestBuilder> {
        let base = self.base_url.as_deref()?;
        let mut builder = self.client.request(method, format!("{base}{path}"));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        Some(builder)
    }

    /// Which player owns `character_id` in this campaign, if any.
    pub async fn lookup_member(
        &self,
        campaign_id: &CampaignId,
        character_id: &CharacterId,
    ) -> Option<PlayerId> {
        let builder = self.request(
            reqwest::Method::GET,
            &format!("/campaigns/{campaign_id}/characters/{character_id}/membership"),
        )?;
        match builder.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<MembershipResponse>().await {
                    Ok(body) => body.player_user_id.map(PlayerId::from),
                    Err(e) => {
                        warn!(%character_id, error = %e, "membership response unreadable");
                        None
                    }
                }
            }
            Ok(response) => {
                debug!(%character_id, status = %response.status(), "membership lookup miss");
                None
            }
            Err(e) => {
                warn!(%character_id, error = %e, "membership lookup failed");
                None
            }
        }
    }

    /// Upsert one character snapshot. At-most-once; failures only warn.
    pub async fn sync_character(&self, sync: &CharacterSync) {
        let mut body = serde_json::json!({
            "id": sync.character_id,
            "wounds": sync.wounds,
            "energy_current": sync.energy_current,
        });
        if let Some(is_alive) = sync.is_alive {
            body["is_alive"] = serde_json::json!(is_alive);
        }
        if let Some(ts) = &sync.death_timestamp {
            body["death_timestamp"] = serde_json::json!(ts);
        }

        let Some(builder) = self.request(
            reqwest::Method::PATCH,
            &format!("/characters/{}", sync.character_id),
        ) else {
            return;
        };
        match builder.json(&body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(character_id = %sync.character_id, status = %response.status(),
                      "character sync rejected");
            }
            Err(e) => {
                warn!(character_id = %sync.character_id, error = %e, "character sync failed");
            }
        }
    }
}
