//! Per-connection metadata, derived from the connect query parameters.
//!
//! The metadata is the connection's persistable attachment: it is everything
//! needed to rebuild the `connections → identity` map after a restart.

use serde::Deserialize;

use arbiter_types::ids::{EntityId, PlayerId};

/// Raw connect query: `?playerId=u1&isGM=false&entities=e1,e2`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default, rename = "isGM")]
    pub is_gm: Option<String>,
    /// Comma-separated declared entity ids.
    #[serde(default)]
    pub entities: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnMeta {
    pub connection_id: String,
    pub player_id: Option<PlayerId>,
    pub is_gm: bool,
    pub declared_entities: Vec<EntityId>,
    pub connected_at: String,
}

impl ConnMeta {
    pub fn from_params(params: &ConnectParams, connected_at: String) -> Self {
        let is_gm = params
            .is_gm
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");
        let declared_entities = params
            .entities
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(EntityId::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            player_id: params
                .player_id
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(PlayerId::from),
            is_gm,
            declared_entities,
            connected_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gm_flag_and_entity_list() {
        let params = ConnectParams {
            player_id: Some("u1".into()),
            is_gm: Some("true".into()),
            entities: Some("e1, e2,,e3".into()),
        };
        let meta = ConnMeta::from_params(&params, "t0".into());
        assert!(meta.is_gm);
        assert_eq!(meta.player_id, Some(PlayerId::from("u1")));
        assert_eq!(
            meta.declared_entities,
            vec![EntityId::from("e1"), EntityId::from("e2"), EntityId::from("e3")]
        );
    }

    #[test]
    fn defaults_to_anonymous_observer() {
        let meta = ConnMeta::from_params(&ConnectParams::default(), "t0".into());
        assert!(!meta.is_gm);
        assert_eq!(meta.player_id, None);
        assert!(meta.declared_entities.is_empty());
    }

    #[test]
    fn gm_flag_rejects_other_values() {
        for v in ["false", "no", "yes", ""] {
            let params = ConnectParams { is_gm: Some(v.into()), ..Default::default() };
            assert!(!ConnMeta::from_params(&params, "t0".into()).is_gm, "{v:?}");
        }
    }
}
