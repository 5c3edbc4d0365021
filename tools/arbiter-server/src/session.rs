//! The per-encounter session actor.
//!
//! One task per `(campaignId, combatId)`: all inbound messages, attaches,
//! detaches and ticks drain through a single mpsc receiver, so no two
//! handlers for the same session ever interleave. External HTTP calls
//! (membership lookup, character sync) are awaited inside the handler —
//! the mailbox simply queues behind them.
//!
//! Broadcast policy: every mutating handler emits its targeted events, then
//! a full per-connection STATE_SYNC. Timestamps are clamped monotonic per
//! session.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use arbiter_engine::{dispatch, state_sync, Outcome, SessionCtx};
use arbiter_store::SessionStore;
use arbiter_types::event::{Audience, Envelope, EventBody, Outbound};
use arbiter_types::ids::CharacterId;
use arbiter_types::message::{InboundMessage, ParseError, RawInbound};
use arbiter_types::rng::RngState;
use arbiter_types::state::EncounterState;

use crate::connection::ConnMeta;
use crate::data_api::DataApi;
use crate::registry::{Registry, SessionHandle, SessionKey};

/// Evict a session after this long with zero connections.
const IDLE_TTL: Duration = Duration::from_secs(15 * 60);
const IDLE_SWEEP: Duration = Duration::from_secs(60);

// =============================================================================
// Mailbox
// =============================================================================

pub enum SessionMsg {
    Attach {
        meta: ConnMeta,
        out: mpsc::UnboundedSender<String>,
    },
    Detach {
        connection_id: String,
    },
    Inbound {
        connection_id: String,
        text: String,
    },
    /// Alarm/timer slot; dispatched through the same serial queue.
    #[allow(dead_code)]
    Tick,
}

struct Conn {
    meta: ConnMeta,
    out: mpsc::UnboundedSender<String>,
}

enum Flow {
    Continue,
    /// Session is done (END_COMBAT teardown or fatal storage failure).
    Stop,
}

// =============================================================================
// Session
// =============================================================================

pub struct Session {
    key: SessionKey,
    state: EncounterState,
    rng: RngState,
    store: SessionStore,
    connections: HashMap<String, Conn>,
    last_timestamp: String,
    last_activity: Instant,
    data_api: DataApi,
    registry: Registry,
    rx: mpsc::UnboundedReceiver<SessionMsg>,
}

impl Session {
    /// Hydrate from storage (or start fresh) and spawn the actor task.
    pub fn spawn(
        key: SessionKey,
        registry: Registry,
        data_api: DataApi,
        store: SessionStore,
    ) -> SessionHandle {
        let (campaign_id, combat_id) = key.clone();
        let (state, rng) = match store.load() {
            Ok(Some(loaded)) => loaded,
            Ok(None) => (EncounterState::new(combat_id, campaign_id), fresh_rng()),
            Err(e) => {
                // Unreadable rows: start clean rather than refuse the session.
                error!(error = %e, "session store unreadable, starting fresh");
                (EncounterState::new(combat_id, campaign_id), fresh_rng())
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            key,
            state,
            rng,
            store,
            connections: HashMap::new(),
            last_timestamp: String::new(),
            last_activity: Instant::now(),
            data_api,
            registry,
            rx,
        };
        tokio::spawn(session.run());
        SessionHandle { tx }
    }

    async fn run(mut self) {
        info!(campaign = %self.key.0, combat = %self.key.1, version = self.state.version,
              "session started");
        loop {
            let msg = tokio::select! {
                msg = self.rx.recv() => msg,
                _ = tokio::time::sleep(IDLE_SWEEP) => {
                    if self.connections.is_empty() && self.last_activity.elapsed() >= IDLE_TTL {
                        info!(campaign = %self.key.0, combat = %self.key.1, "session idle, evicting");
                        self.registry.remove(&self.key).await;
                        return;
                    }
                    continue;
                }
            };
            let Some(msg) = msg else { return };
            self.last_activity = Instant::now();

            let flow = match msg {
                SessionMsg::Attach { meta, out } => {
                    self.attach(meta, out);
                    Flow::Continue
                }
                SessionMsg::Detach { connection_id } => {
                    self.detach(&connection_id);
                    Flow::Continue
                }
                SessionMsg::Inbound { connection_id, text } => {
                    self.handle_inbound(&connection_id, &text).await
                }
                SessionMsg::Tick => Flow::Continue,
            };

            if let Flow::Stop = flow {
                self.registry.remove(&self.key).await;
                return;
            }
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    fn attach(&mut self, meta: ConnMeta, out: mpsc::UnboundedSender<String>) {
        info!(connection = %meta.connection_id, player = ?meta.player_id, gm = meta.is_gm,
              "connection attached");
        let connection_id = meta.connection_id.clone();
        self.connections.insert(connection_id.clone(), Conn { meta, out });
        self.send_state_sync_to(&connection_id, None);
    }

    fn detach(&mut self, connection_id: &str) {
        let Some(conn) = self.connections.remove(connection_id) else {
            return;
        };
        info!(connection = %connection_id, "connection detached");
        let notice = Outbound::all(EventBody::EntityUpdated(serde_json::json!({
            "playerId": conn.meta.player_id,
            "connected": false,
        })));
        self.emit(std::slice::from_ref(&notice), None, connection_id);
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    async fn handle_inbound(&mut self, connection_id: &str, text: &str) -> Flow {
        let raw: RawInbound = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                self.send_event_to(
                    connection_id,
                    EventBody::Error { message: format!("Invalid JSON: {e}") },
                    None,
                );
                return Flow::Continue;
            }
        };
        let request_id = raw.request_id.clone();

        let msg = match InboundMessage::parse(&raw.kind, raw.payload) {
            Ok(msg) => msg,
            Err(err @ ParseError::UnknownType(_)) => {
                self.send_event_to(
                    connection_id,
                    EventBody::ActionRejected { reason: err.to_string() },
                    request_id.as_deref(),
                );
                return Flow::Continue;
            }
            Err(err @ ParseError::Payload(_)) => {
                self.send_event_to(
                    connection_id,
                    EventBody::Error { message: err.to_string() },
                    request_id.as_deref(),
                );
                return Flow::Continue;
            }
        };
        counter!("arbiter_messages_total").increment(1);

        let Some(ctx) = self.ctx_for(connection_id) else {
            return Flow::Continue;
        };

        // Connection-scoped read: answered directly, no dispatch.
        if matches!(msg, InboundMessage::RequestState) {
            self.send_state_sync_to(connection_id, request_id.as_deref());
            return Flow::Continue;
        }

        // Controller resolution needs the membership API; do it before the
        // synchronous dispatch. The mailbox queues behind this await.
        let msg = Self::resolve_controller(&self.data_api, &self.key.0, msg, ctx.is_gm).await;

        let now = self.next_timestamp();
        match dispatch(&mut self.state, &ctx, &mut self.rng, &now, &msg) {
            Ok(outcome) => self.complete(connection_id, request_id.as_deref(), outcome).await,
            Err(reject) => {
                counter!("arbiter_rejections_total").increment(1);
                debug!(kind = msg.kind(), reason = reject.reason(), "action rejected");
                self.send_event_to(
                    connection_id,
                    EventBody::ActionRejected { reason: reject.reason().to_string() },
                    request_id.as_deref(),
                );
                Flow::Continue
            }
        }
    }

    async fn complete(
        &mut self,
        connection_id: &str,
        request_id: Option<&str>,
        outcome: Outcome,
    ) -> Flow {
        // Storage is the durability boundary; a failed persist means the
        // session can no longer guarantee a consistent resume, so it closes.
        if outcome.mutated {
            if let Err(e) = self.store.persist(&self.state, &self.rng) {
                error!(error = %e, "session store persist failed, closing session");
                let body = EventBody::Error { message: "Session storage failure".to_string() };
                let envelope = self.envelope(body, None);
                let json = serde_json::to_string(&envelope).unwrap_or_default();
                for conn in self.connections.values() {
                    let _ = conn.out.send(json.clone());
                }
                self.connections.clear();
                return Flow::Stop;
            }
        }

        self.emit(&outcome.events, request_id, connection_id);
        if outcome.mutated {
            self.broadcast_state_sync(request_id);
        }
        for sync in &outcome.character_syncs {
            self.data_api.sync_character(sync).await;
        }

        if outcome.combat_ended {
            info!(campaign = %self.key.0, combat = %self.key.1, "combat ended, tearing down");
            return Flow::Stop;
        }
        Flow::Continue
    }

    /// GM_ADD_ENTITY without an explicit controller: resolve the owning
    /// player through the membership API, falling back to GM control.
    async fn resolve_controller(
        data_api: &DataApi,
        campaign_id: &arbiter_types::ids::CampaignId,
        msg: InboundMessage,
        is_gm: bool,
    ) -> InboundMessage {
        let mut p = match msg {
            InboundMessage::GmAddEntity(p) => p,
            other => return other,
        };
        if is_gm && p.entity.get("controller").is_none() {
            let controller = match p.entity.get("characterId").and_then(|v| v.as_str()) {
                Some(character_id) => {
                    match data_api
                        .lookup_member(campaign_id, &CharacterId::from(character_id))
                        .await
                    {
                        Some(player_id) => format!("player:{player_id}"),
                        None => "gm".to_string(),
                    }
                }
                None => "gm".to_string(),
            };
            if let Some(object) = p.entity.as_object_mut() {
                object.insert("controller".to_string(), serde_json::Value::String(controller));
            }
        }
        InboundMessage::GmAddEntity(p)
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    fn ctx_for(&self, connection_id: &str) -> Option<SessionCtx> {
        let meta = &self.connections.get(connection_id)?.meta;
        let controlled = state_sync::controlled_entities(
            &self.state,
            meta.player_id.as_ref(),
            &meta.declared_entities,
        );
        Some(SessionCtx {
            player_id: meta.player_id.clone(),
            is_gm: meta.is_gm,
            controlled: controlled.into_iter().collect(),
        })
    }

    /// Wall-clock ISO timestamp, clamped monotonically non-decreasing
    /// within this session's emission order.
    fn next_timestamp(&mut self) -> String {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        if now > self.last_timestamp {
            self.last_timestamp = now;
        }
        self.last_timestamp.clone()
    }

    fn envelope(&mut self, body: EventBody, request_id: Option<&str>) -> Envelope {
        Envelope {
            body,
            timestamp: self.next_timestamp(),
            request_id: request_id.map(str::to_string),
        }
    }

    /// Deliver targeted events in order, appending each to the combat log.
    fn emit(&mut self, events: &[Outbound], request_id: Option<&str>, origin: &str) {
        for outbound in events {
            let envelope = self.envelope(outbound.body.clone(), request_id);
            self.append_log(&envelope);
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "unserializable event dropped");
                    continue;
                }
            };
            counter!("arbiter_broadcasts_total").increment(1);

            match &outbound.audience {
                Audience::All => {
                    for conn in self.connections.values() {
                        let _ = conn.out.send(json.clone());
                    }
                }
                Audience::Origin => {
                    if let Some(conn) = self.connections.get(origin) {
                        let _ = conn.out.send(json.clone());
                    }
                }
                Audience::Player(player_id) => {
                    for conn in self.connections.values() {
                        if conn.meta.player_id.as_ref() == Some(player_id) {
                            let _ = conn.out.send(json.clone());
                        }
                    }
                }
                Audience::Gms => {
                    for conn in self.connections.values() {
                        if conn.meta.is_gm {
                            let _ = conn.out.send(json.clone());
                        }
                    }
                }
            }
        }
    }

    fn send_event_to(&mut self, connection_id: &str, body: EventBody, request_id: Option<&str>) {
        let envelope = self.envelope(body, request_id);
        if let Ok(json) = serde_json::to_string(&envelope) {
            if let Some(conn) = self.connections.get(connection_id) {
                let _ = conn.out.send(json);
            }
        }
    }

    fn send_state_sync_to(&mut self, connection_id: &str, request_id: Option<&str>) {
        let Some(conn) = self.connections.get(connection_id) else {
            return;
        };
        let controlled = state_sync::controlled_entities(
            &self.state,
            conn.meta.player_id.as_ref(),
            &conn.meta.declared_entities,
        );
        let body = EventBody::StateSync {
            state: state_sync::project(&self.state),
            your_controlled_entities: controlled,
        };
        self.send_event_to(connection_id, body, request_id);
    }

    /// Policy (a): a full per-connection STATE_SYNC after every mutation.
    fn broadcast_state_sync(&mut self, request_id: Option<&str>) {
        let snapshot = state_sync::project(&self.state);
        let timestamp = self.next_timestamp();
        for conn in self.connections.values() {
            let controlled = state_sync::controlled_entities(
                &self.state,
                conn.meta.player_id.as_ref(),
                &conn.meta.declared_entities,
            );
            let envelope = Envelope {
                body: EventBody::StateSync {
                    state: snapshot.clone(),
                    your_controlled_entities: controlled,
                },
                timestamp: timestamp.clone(),
                request_id: request_id.map(str::to_string),
            };
            if let Ok(json) = serde_json::to_string(&envelope) {
                let _ = conn.out.send(json);
            }
        }
    }

    /// Combat-log row per event. STATE_SYNC envelopes are routine deltas and
    /// stay out of the log.
    fn append_log(&self, envelope: &Envelope) {
        if matches!(envelope.body, EventBody::StateSync { .. }) {
            return;
        }
        let Ok(value) = serde_json::to_value(&envelope.body) else {
            return;
        };
        let entry_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("UNKNOWN")
            .to_string();
        let payload = value.get("payload").cloned();
        if let Err(e) = self.store.append_log(&entry_type, payload.as_ref(), &envelope.timestamp)
        {
            warn!(error = %e, "combat log append failed");
        }
    }
}

fn fresh_rng() -> RngState {
    let id = uuid::Uuid::new_v4();
    let bytes = id.as_bytes();
    RngState::new(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
