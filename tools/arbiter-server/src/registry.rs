//! Process-wide session registry.
//!
//! Routes a connection to the singleton session for its
//! `(campaignId, combatId)` key, constructing and hydrating it on first use.
//! Sessions remove themselves on idle TTL and on END_COMBAT teardown. The
//! map lock is never held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, RwLock};

use arbiter_store::SessionStore;
use arbiter_types::ids::{CampaignId, CombatId};

use crate::config::ServerConfig;
use crate::data_api::DataApi;
use crate::session::{Session, SessionMsg};

pub type SessionKey = (CampaignId, CombatId);

#[derive(Clone)]
pub struct SessionHandle {
    pub tx: mpsc::UnboundedSender<SessionMsg>,
}

#[derive(Clone)]
pub struct Registry {
    sessions: Arc<RwLock<HashMap<SessionKey, SessionHandle>>>,
    config: Arc<ServerConfig>,
    data_api: DataApi,
}

impl Registry {
    pub fn new(config: Arc<ServerConfig>, data_api: DataApi) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
            data_api,
        }
    }

    /// The live session for `key`, spawning and hydrating it if needed.
    pub async fn get_or_spawn(&self, key: &SessionKey) -> Result<SessionHandle> {
        if let Some(handle) = self.sessions.read().await.get(key) {
            if !handle.tx.is_closed() {
                return Ok(handle.clone());
            }
        }

        let mut sessions = self.sessions.write().await;
        // Double-checked: another connection may have won the race.
        if let Some(handle) = sessions.get(key) {
            if !handle.tx.is_closed() {
                return Ok(handle.clone());
            }
        }

        let db_path = self.config.session_db_path(key.0.as_str(), key.1.as_str());
        let store = SessionStore::open(&db_path)
            .with_context(|| format!("opening session store for {}/{}", key.0, key.1))?;
        let handle = Session::spawn(key.clone(), self.clone(), self.data_api.clone(), store);
        sessions.insert(key.clone(), handle.clone());
        Ok(handle)
    }

    pub async fn remove(&self, key: &SessionKey) {
        self.sessions.write().await.remove(key);
    }
}
