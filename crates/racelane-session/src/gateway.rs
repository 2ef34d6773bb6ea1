//! The session gateway: routes client requests to rooms and owns the
//! disconnect / grace-period policy.
//!
//! A player who loses their connection is marked disconnected in the room
//! right away and keeps their seat for [`SessionConfig::reconnect_grace`].
//! If they have not come back by then, the gateway makes them leave, which
//! forfeits a running round. Reconnecting in time cancels the timer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use racelane_broadcast::{Channel, DeliverySink, SubscriptionId};
use racelane_protocol::{ClientRequest, PlayerId, Response, RoomId, RoomSummary};
use racelane_room::{RoomHandle, RoomInfo, RoomRegistry, RoomStore};
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::{Session, SessionConfig, SessionError, SessionManager};

/// Per-connection state the gateway needs while serving one client.
///
/// The front-end creates one per socket and hands it back to
/// [`SessionGateway::close_connection`] when the socket goes away.
pub struct ClientConnection {
    sink: DeliverySink,
    subscriptions: HashMap<RoomId, SubscriptionId>,
    /// Players seated (or resumed) through this connection.
    players: HashSet<PlayerId>,
}

impl ClientConnection {
    /// `sink` receives every delivery for rooms this connection subscribes to.
    pub fn new(sink: DeliverySink) -> Self {
        Self {
            sink,
            subscriptions: HashMap::new(),
            players: HashSet::new(),
        }
    }

    pub fn is_subscribed(&self, room_id: RoomId) -> bool {
        self.subscriptions.contains_key(&room_id)
    }

    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players.iter().copied()
    }
}

struct Shared<C: Channel, S: RoomStore> {
    registry: Arc<RoomRegistry<C, S>>,
    sessions: Mutex<SessionManager>,
    grace_timers: Mutex<HashMap<PlayerId, AbortHandle>>,
    started: Instant,
}

/// Translates client requests into room operations.
///
/// Cheap to clone; all clones share the same sessions and timers.
pub struct SessionGateway<C: Channel, S: RoomStore> {
    shared: Arc<Shared<C, S>>,
}

impl<C: Channel, S: RoomStore> Clone for SessionGateway<C, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Channel, S: RoomStore> SessionGateway<C, S> {
    pub fn new(registry: Arc<RoomRegistry<C, S>>, config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                sessions: Mutex::new(SessionManager::new(config)),
                grace_timers: Mutex::new(HashMap::new()),
                started: Instant::now(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry<C, S>> {
        &self.shared.registry
    }

    fn sessions(&self) -> MutexGuard<'_, SessionManager> {
        self.shared
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<PlayerId, AbortHandle>> {
        self.shared
            .grace_timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn room(&self, room_id: RoomId) -> Result<RoomHandle, SessionError> {
        Ok(self.shared.registry.get(room_id)?)
    }

    /// A copy of a player's session.
    pub fn session(&self, player_id: PlayerId) -> Option<Session> {
        self.sessions().get(player_id).cloned()
    }

    /// Milliseconds since the gateway started.
    pub fn server_time(&self) -> u64 {
        self.shared.started.elapsed().as_millis() as u64
    }

    // -----------------------------------------------------------------------
    // Room operations
    // -----------------------------------------------------------------------

    pub fn create_room(&self) -> RoomId {
        self.shared.registry.create_room().room_id()
    }

    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        self.shared
            .registry
            .list()
            .await
            .iter()
            .map(RoomInfo::summary)
            .collect()
    }

    /// Seats a player and opens their session. Returns the player's id and
    /// reconnection token.
    pub async fn join_room(
        &self,
        room_id: RoomId,
        display_name: &str,
    ) -> Result<(PlayerId, String), SessionError> {
        let player_id = self.room(room_id)?.join(display_name).await?;
        let token = self
            .sessions()
            .create(player_id, room_id)?
            .reconnect_token
            .clone();
        Ok((player_id, token))
    }

    pub async fn set_ready(
        &self,
        room_id: RoomId,
        player_id: PlayerId,
        ready: bool,
    ) -> Result<(), SessionError> {
        self.room(room_id)?.set_ready(player_id, ready).await?;
        Ok(())
    }

    /// Removes a player from their room and ends their session.
    pub async fn leave_room(
        &self,
        room_id: RoomId,
        player_id: PlayerId,
    ) -> Result<(), SessionError> {
        self.room(room_id)?.leave(player_id).await?;
        self.forget(player_id);
        Ok(())
    }

    pub async fn start_race(&self, room_id: RoomId) -> Result<(), SessionError> {
        self.room(room_id)?.start_race().await?;
        Ok(())
    }

    pub async fn reset_room(&self, room_id: RoomId) -> Result<(), SessionError> {
        self.room(room_id)?.reset().await?;
        Ok(())
    }

    pub async fn subscribe(
        &self,
        room_id: RoomId,
        sink: DeliverySink,
        last_seen: Option<u64>,
    ) -> Result<SubscriptionId, SessionError> {
        Ok(self.room(room_id)?.subscribe(sink, last_seen).await?)
    }

    /// Ends a subscription. A room that has closed took its subscriptions
    /// with it, so this reports `false` instead of failing.
    pub async fn unsubscribe(&self, room_id: RoomId, subscription: SubscriptionId) -> bool {
        match self.shared.registry.get(room_id) {
            Ok(handle) => handle.unsubscribe(subscription).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// The player's connection dropped: mark them disconnected in their room
    /// and start the grace timer.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the player has no session.
    pub async fn disconnect(&self, player_id: PlayerId) -> Result<(), SessionError> {
        let (room_id, grace) = {
            let mut sessions = self.sessions();
            let grace = sessions.config().reconnect_grace;
            let was_connected = sessions.get(player_id).is_some_and(Session::is_connected);
            let room_id = sessions.disconnect(player_id, Instant::now())?.room_id;
            if !was_connected {
                return Ok(());
            }
            (room_id, grace)
        };

        if let Ok(handle) = self.shared.registry.get(room_id) {
            if let Err(err) = handle.set_connected(player_id, false).await {
                debug!(%player_id, %room_id, error = %err, "could not mark player disconnected");
            }
        }
        self.start_grace_timer(player_id, grace);
        Ok(())
    }

    /// Resumes a session with the token handed out on join.
    ///
    /// # Errors
    /// - [`SessionError::InvalidToken`]: unknown token
    /// - [`SessionError::SessionExpired`]: the grace period ran out
    /// - [`SessionError::Room`]: the room closed in the meantime
    pub async fn reconnect(&self, token: &str) -> Result<(RoomId, PlayerId), SessionError> {
        let reconnected = self
            .sessions()
            .reconnect(token, Instant::now())
            .map(|s| (s.player_id, s.room_id));
        let (player_id, room_id) = match reconnected {
            Ok(ids) => ids,
            Err(SessionError::SessionExpired(player_id)) => {
                // The grace timer may not have run yet. Whichever of the two
                // claims the session first removes the player.
                self.cancel_grace_timer(player_id);
                self.expire(player_id).await;
                return Err(SessionError::SessionExpired(player_id));
            }
            Err(err) => return Err(err),
        };
        self.cancel_grace_timer(player_id);

        let resumed = match self.room(room_id) {
            Ok(handle) => handle
                .set_connected(player_id, true)
                .await
                .map_err(SessionError::from),
            Err(err) => Err(err),
        };
        if let Err(err) = resumed {
            self.forget(player_id);
            return Err(err);
        }
        Ok((room_id, player_id))
    }

    /// Drops sessions whose grace period has run out. Returns how many.
    pub fn purge_expired(&self) -> usize {
        self.sessions().purge_expired()
    }

    /// Cleans up after a closed socket: ends its subscriptions and starts
    /// the grace period for every player it carried.
    pub async fn close_connection(&self, conn: ClientConnection) {
        for (room_id, subscription) in conn.subscriptions {
            self.unsubscribe(room_id, subscription).await;
        }
        for player_id in conn.players {
            if let Err(err) = self.disconnect(player_id).await {
                debug!(%player_id, error = %err, "nothing to disconnect");
            }
        }
    }

    fn start_grace_timer(&self, player_id: PlayerId, grace: Duration) {
        let shared: Weak<Shared<C, S>> = Arc::downgrade(&self.shared);
        let task = tokio::spawn(async move {
            time::sleep(grace).await;
            if let Some(shared) = shared.upgrade() {
                SessionGateway { shared }.expire(player_id).await;
            }
        });
        if let Some(previous) = self.timers().insert(player_id, task.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel_grace_timer(&self, player_id: PlayerId) {
        if let Some(timer) = self.timers().remove(&player_id) {
            timer.abort();
        }
    }

    /// Grace period over. Makes the player leave unless they came back or
    /// someone else already removed them. The timer entry is dropped and the
    /// session claimed with no `.await` in between, so an abort from
    /// `cancel_grace_timer` can never land after the claim.
    async fn expire(&self, player_id: PlayerId) {
        self.timers().remove(&player_id);
        let expired = self
            .sessions()
            .expire(player_id, Instant::now())
            .map(|s| s.room_id);
        let Some(room_id) = expired else {
            return;
        };

        info!(%player_id, %room_id, "grace period elapsed, removing player");
        if let Ok(handle) = self.shared.registry.get(room_id) {
            if let Err(err) = handle.leave(player_id).await {
                debug!(%player_id, %room_id, error = %err, "leave after grace period failed");
            }
        }
    }

    fn forget(&self, player_id: PlayerId) {
        self.cancel_grace_timer(player_id);
        self.sessions().remove(player_id);
    }

    // -----------------------------------------------------------------------
    // Request dispatch
    // -----------------------------------------------------------------------

    /// Answers one client request. Failures become [`Response::Error`].
    pub async fn handle(&self, conn: &mut ClientConnection, request: ClientRequest) -> Response {
        match self.dispatch(conn, request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(code = %err.code(), error = %err, "request failed");
                Response::Error {
                    code: err.code(),
                    message: err.to_string(),
                }
            }
        }
    }

    async fn dispatch(
        &self,
        conn: &mut ClientConnection,
        request: ClientRequest,
    ) -> Result<Response, SessionError> {
        let response = match request {
            ClientRequest::CreateRoom => Response::RoomCreated {
                room_id: self.create_room(),
            },
            ClientRequest::ListRooms => Response::RoomList {
                rooms: self.list_rooms().await,
            },
            ClientRequest::JoinRoom {
                room_id,
                display_name,
            } => {
                let (player_id, reconnect_token) = self.join_room(room_id, &display_name).await?;
                conn.players.insert(player_id);
                Response::Joined {
                    room_id,
                    player_id,
                    reconnect_token,
                }
            }
            ClientRequest::SetReady {
                room_id,
                player_id,
                ready,
            } => {
                self.set_ready(room_id, player_id, ready).await?;
                Response::Ok
            }
            ClientRequest::LeaveRoom { room_id, player_id } => {
                self.leave_room(room_id, player_id).await?;
                conn.players.remove(&player_id);
                Response::Ok
            }
            ClientRequest::StartRace { room_id } => {
                self.start_race(room_id).await?;
                Response::Ok
            }
            ClientRequest::ResetRoom { room_id } => {
                self.reset_room(room_id).await?;
                Response::Ok
            }
            ClientRequest::Subscribe { room_id, last_seen } => {
                if let Some(previous) = conn.subscriptions.remove(&room_id) {
                    self.unsubscribe(room_id, previous).await;
                }
                let subscription = self
                    .subscribe(room_id, conn.sink.clone(), last_seen)
                    .await?;
                conn.subscriptions.insert(room_id, subscription);
                Response::Subscribed { room_id }
            }
            ClientRequest::Unsubscribe { room_id } => {
                if let Some(subscription) = conn.subscriptions.remove(&room_id) {
                    self.unsubscribe(room_id, subscription).await;
                }
                Response::Ok
            }
            ClientRequest::Reconnect { token } => {
                let (room_id, player_id) = self.reconnect(&token).await?;
                conn.players.insert(player_id);
                Response::Reconnected { room_id, player_id }
            }
            ClientRequest::Chat { room_id, .. } => {
                debug!(%room_id, "chat message ignored");
                Response::Ignored {
                    reason: "chat is not relayed".into(),
                }
            }
            ClientRequest::Heartbeat { client_time } => Response::HeartbeatAck {
                client_time,
                server_time: self.server_time(),
            },
        };
        Ok(response)
    }
}
