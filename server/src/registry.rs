//! Users, sessions, and games for the whole server process
//!
//! The [`Registry`] is the single root of ownership: users, live sessions,
//! and games are only reachable through it. It is created once by the server
//! and handed to request handlers by `Arc`, never stored in a global.
//!
//! ## Locking
//!
//! Unrelated concerns have separate locks so matches never contend with
//! each other:
//! - `accounts` guards users, live sessions, and the seating index
//! - `lobby` guards the games map and the next-game-id counter
//! - every game sits behind its own mutex
//!
//! Locks are always taken in the order lobby → game → accounts. Holding a
//! later lock while waiting for an earlier one is never allowed.

use crate::auth::{AuthError, Identity};
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::{RequestError, Result};
use crate::game::Game;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub type UserId = Uuid;
pub type GameId = u64;
pub type SharedGame = Arc<Mutex<Game>>;

/// Durable identity. Created on registration and never changed afterwards.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    password: String,
}

impl User {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn password_matches(&self, candidate: &str) -> bool {
        self.password == candidate
    }
}

/// A user bound to a live connection pair
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub username: String,
    pub connection: ConnectionHandle,
    /// Game the user is seated in, if any.
    pub game_id: Option<GameId>,
}

/// Users, live sessions, and where each user is seated.
///
/// The seating index outlives sessions: when a client drops and comes back
/// with its token, the replacement session is put back in the same game.
#[derive(Debug, Default)]
pub struct Accounts {
    users: HashMap<UserId, User>,
    usernames: HashMap<String, UserId>,
    sessions: HashMap<UserId, Session>,
    seating: HashMap<UserId, GameId>,
}

impl Accounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a user and a fresh, unseated session on `connection`.
    pub fn register(
        &mut self,
        username: &str,
        password: &str,
        connection: &ConnectionHandle,
    ) -> Result<Session> {
        if self.usernames.contains_key(username) {
            return Err(RequestError::Conflict(username.to_string()));
        }

        let user = User::new(username, password);
        info!("Registered user {} ({})", user.username, user.id);
        self.usernames.insert(user.username.clone(), user.id);
        let session = self.open_session(&user, connection);
        self.users.insert(user.id, user);

        Ok(session)
    }

    pub fn login(
        &mut self,
        username: &str,
        password: &str,
        connection: &ConnectionHandle,
    ) -> Result<Session> {
        let user = self
            .usernames
            .get(username)
            .and_then(|id| self.users.get(id))
            .filter(|user| user.password_matches(password))
            .cloned()
            .ok_or(RequestError::InvalidCredentials)?;

        if self.sessions.contains_key(&user.id) {
            return Err(RequestError::AlreadyLoggedIn(user.username));
        }

        info!("User {} logged in from {}", user.username, connection.peer);
        Ok(self.open_session(&user, connection))
    }

    /// Returns the live session for a verified token, creating one on
    /// `connection` if the user has none (the reconnect path).
    pub fn resume(&mut self, identity: &Identity, connection: &ConnectionHandle) -> Result<Session> {
        if let Some(session) = self.sessions.get(&identity.user_id) {
            return Ok(session.clone());
        }

        let user = self
            .users
            .get(&identity.user_id)
            .cloned()
            .ok_or(RequestError::Auth(AuthError::UnknownUser))?;

        info!(
            "Resumed session for {} from {} (game {:?})",
            user.username,
            connection.peer,
            self.seating.get(&user.id)
        );
        Ok(self.open_session(&user, connection))
    }

    fn open_session(&mut self, user: &User, connection: &ConnectionHandle) -> Session {
        let session = Session {
            user_id: user.id,
            username: user.username.clone(),
            connection: connection.clone(),
            game_id: self.seating.get(&user.id).copied(),
        };
        self.sessions.insert(user.id, session.clone());
        session
    }

    /// Points an existing session at a new connection pair, replacing the old
    /// handles rather than adding a second set.
    pub fn rebind(&mut self, user_id: &UserId, connection: &ConnectionHandle) -> Option<Session> {
        let session = self.sessions.get_mut(user_id)?;
        if session.connection.id != connection.id {
            info!(
                "Rebinding session of {} to connection {}",
                session.username, connection.id
            );
            session.connection = connection.clone();
        }
        Some(session.clone())
    }

    pub fn seat(&mut self, user_id: &UserId, game_id: GameId) {
        self.seating.insert(*user_id, game_id);
        if let Some(session) = self.sessions.get_mut(user_id) {
            session.game_id = Some(game_id);
        }
    }

    /// Clears every seat in `game_id`. Returns how many users were unseated.
    pub fn unseat_game(&mut self, game_id: GameId) -> usize {
        let before = self.seating.len();
        self.seating.retain(|_, seated| *seated != game_id);
        for session in self.sessions.values_mut() {
            if session.game_id == Some(game_id) {
                session.game_id = None;
            }
        }
        before - self.seating.len()
    }

    pub fn seat_of(&self, user_id: &UserId) -> Option<GameId> {
        self.seating.get(user_id).copied()
    }

    /// Removes every session bound to a closed connection. Seats are kept.
    pub fn drop_connection(&mut self, connection_id: ConnectionId) -> Vec<UserId> {
        let gone: Vec<UserId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.connection.id == connection_id)
            .map(|(id, _)| *id)
            .collect();

        for user_id in &gone {
            if let Some(session) = self.sessions.remove(user_id) {
                info!("Session of {} closed", session.username);
            }
        }
        gone
    }

    /// Live connection handles for the given users; users without a live
    /// session are skipped.
    pub fn connections_of(&self, user_ids: &[UserId]) -> Vec<ConnectionHandle> {
        user_ids
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .map(|session| session.connection.clone())
            .collect()
    }

    pub fn session(&self, user_id: &UserId) -> Option<&Session> {
        self.sessions.get(user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// All games plus the slot the next open game is created in.
#[derive(Debug, Default)]
pub struct Lobby {
    games: HashMap<GameId, SharedGame>,
    next_game_id: GameId,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    /// The game currently accepting players, created on first use.
    pub fn open_game<F>(&mut self, create: F) -> (GameId, SharedGame)
    where
        F: FnOnce(GameId) -> Game,
    {
        let id = self.next_game_id;
        let game = self
            .games
            .entry(id)
            .or_insert_with(|| {
                info!("Created game {}", id);
                Arc::new(Mutex::new(create(id)))
            })
            .clone();
        (id, game)
    }

    /// Moves the open slot on, so the next entrant starts a new game.
    pub fn close_open_game(&mut self) {
        self.next_game_id += 1;
    }

    pub fn next_game_id(&self) -> GameId {
        self.next_game_id
    }

    pub fn get(&self, id: GameId) -> Option<SharedGame> {
        self.games.get(&id).cloned()
    }

    pub fn remove(&mut self, id: GameId) -> Option<SharedGame> {
        self.games.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    accounts: RwLock<Accounts>,
    lobby: RwLock<Lobby>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accounts(&self) -> &RwLock<Accounts> {
        &self.accounts
    }

    pub fn lobby(&self) -> &RwLock<Lobby> {
        &self.lobby
    }

    pub async fn game(&self, id: GameId) -> Option<SharedGame> {
        self.lobby.read().await.get(id)
    }

    /// Removes a game, clears its seats, and cancels its pending timers.
    pub async fn evict_game(&self, id: GameId) -> bool {
        let Some(game) = self.lobby.write().await.remove(id) else {
            return false;
        };
        game.lock().await.cancel_timers();
        let unseated = self.accounts.write().await.unseat_game(id);
        info!("Evicted game {} ({} seats cleared)", id, unseated);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameRules;
    use crate::prompts::default_prompts;
    use std::net::SocketAddr;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn connection() -> ConnectionHandle {
        ConnectionHandle::new(test_addr()).0
    }

    fn identity_of(session: &Session) -> Identity {
        Identity {
            user_id: session.user_id,
            username: session.username.clone(),
        }
    }

    #[test]
    fn test_register_creates_unseated_session() {
        let mut accounts = Accounts::new();
        let conn = connection();

        let session = accounts.register("ann", "pw", &conn).unwrap();

        assert_eq!(session.username, "ann");
        assert_eq!(session.game_id, None);
        assert_eq!(session.connection.id, conn.id);
        assert_eq!(accounts.user_count(), 1);
        assert_eq!(accounts.session_count(), 1);
    }

    #[test]
    fn test_register_duplicate_username_conflicts() {
        let mut accounts = Accounts::new();
        accounts.register("ann", "pw", &connection()).unwrap();

        let err = accounts.register("ann", "other", &connection()).unwrap_err();
        assert!(matches!(err, RequestError::Conflict(name) if name == "ann"));
        assert_eq!(accounts.user_count(), 1);
    }

    #[test]
    fn test_login_rules() {
        let mut accounts = Accounts::new();
        let conn = connection();
        let session = accounts.register("ann", "pw", &conn).unwrap();

        assert!(matches!(
            accounts.login("ann", "wrong", &conn),
            Err(RequestError::InvalidCredentials)
        ));
        assert!(matches!(
            accounts.login("nobody", "pw", &conn),
            Err(RequestError::InvalidCredentials)
        ));
        assert!(matches!(
            accounts.login("ann", "pw", &conn),
            Err(RequestError::AlreadyLoggedIn(_))
        ));

        accounts.drop_connection(conn.id);
        let relogged = accounts.login("ann", "pw", &connection()).unwrap();
        assert_eq!(relogged.user_id, session.user_id);
    }

    #[test]
    fn test_resume_recreates_session_in_same_seat() {
        let mut accounts = Accounts::new();
        let old = connection();
        let session = accounts.register("ann", "pw", &old).unwrap();
        accounts.seat(&session.user_id, 7);

        assert_eq!(accounts.drop_connection(old.id), vec![session.user_id]);
        assert_eq!(accounts.session_count(), 0);
        assert_eq!(accounts.seat_of(&session.user_id), Some(7));

        let fresh = connection();
        let resumed = accounts.resume(&identity_of(&session), &fresh).unwrap();
        assert_eq!(resumed.game_id, Some(7));
        assert_eq!(resumed.connection.id, fresh.id);
        assert_eq!(accounts.session_count(), 1);
    }

    #[test]
    fn test_resume_keeps_existing_session() {
        let mut accounts = Accounts::new();
        let original = connection();
        let session = accounts.register("ann", "pw", &original).unwrap();

        let resumed = accounts.resume(&identity_of(&session), &connection()).unwrap();
        assert_eq!(resumed.connection.id, original.id);
        assert_eq!(accounts.session_count(), 1);
    }

    #[test]
    fn test_resume_unknown_user_is_auth_error() {
        let mut accounts = Accounts::new();
        let identity = Identity {
            user_id: Uuid::new_v4(),
            username: "ghost".to_string(),
        };
        assert!(matches!(
            accounts.resume(&identity, &connection()),
            Err(RequestError::Auth(AuthError::UnknownUser))
        ));
    }

    #[test]
    fn test_rebind_replaces_handles() {
        let mut accounts = Accounts::new();
        let session = accounts.register("ann", "pw", &connection()).unwrap();
        let replacement = connection();

        let rebound = accounts.rebind(&session.user_id, &replacement).unwrap();
        assert_eq!(rebound.connection.id, replacement.id);
        assert_eq!(accounts.connections_of(&[session.user_id]).len(), 1);
        assert_eq!(
            accounts.connections_of(&[session.user_id])[0].id,
            replacement.id
        );
    }

    #[test]
    fn test_drop_connection_only_removes_bound_sessions() {
        let mut accounts = Accounts::new();
        let first = connection();
        let second = connection();
        accounts.register("ann", "pw", &first).unwrap();
        let bob = accounts.register("bob", "pw", &second).unwrap();

        assert_eq!(accounts.drop_connection(first.id).len(), 1);
        assert!(accounts.session(&bob.user_id).is_some());
        assert!(accounts.drop_connection(first.id).is_empty());
    }

    #[test]
    fn test_unseat_game() {
        let mut accounts = Accounts::new();
        let ann = accounts.register("ann", "pw", &connection()).unwrap();
        let bob = accounts.register("bob", "pw", &connection()).unwrap();
        accounts.seat(&ann.user_id, 1);
        accounts.seat(&bob.user_id, 2);

        assert_eq!(accounts.unseat_game(1), 1);
        assert_eq!(accounts.seat_of(&ann.user_id), None);
        assert_eq!(accounts.session(&ann.user_id).unwrap().game_id, None);
        assert_eq!(accounts.seat_of(&bob.user_id), Some(2));
    }

    #[test]
    fn test_lobby_reuses_open_game_until_closed() {
        let mut lobby = Lobby::new();
        let make = |id| Game::new(id, GameRules::default(), default_prompts().into());

        let (first_id, first) = lobby.open_game(make);
        let (again_id, again) = lobby.open_game(make);
        assert_eq!(first_id, again_id);
        assert!(Arc::ptr_eq(&first, &again));

        lobby.close_open_game();
        let (next_id, _) = lobby.open_game(make);
        assert_eq!(next_id, first_id + 1);
        assert_eq!(lobby.len(), 2);
    }

    #[tokio::test]
    async fn test_evict_game_clears_seats() {
        let registry = Registry::new();
        let session = registry
            .accounts()
            .write()
            .await
            .register("ann", "pw", &connection())
            .unwrap();
        let (id, _) = registry
            .lobby()
            .write()
            .await
            .open_game(|id| Game::new(id, GameRules::default(), default_prompts().into()));
        registry.accounts().write().await.seat(&session.user_id, id);

        assert!(registry.evict_game(id).await);
        assert!(registry.game(id).await.is_none());
        assert_eq!(registry.accounts().read().await.seat_of(&session.user_id), None);
        assert!(!registry.evict_game(id).await);
    }
}
