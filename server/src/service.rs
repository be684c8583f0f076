//! Request handlers and deferred transitions
//!
//! [`GameService`] owns everything a request needs: the registry, the token
//! authority, the broadcaster, and the scheduler. Each public handler maps
//! one request method onto registry and game operations and returns the
//! reply body; the dispatcher turns errors into status replies.
//!
//! Handlers that change a game hold its lock for the whole
//! read-modify-write, including the notifications the change triggers, so
//! transitions are observed in the order they happen.

use crate::auth::TokenAuthority;
use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::connection::ConnectionHandle;
use crate::error::{RequestError, Result};
use crate::game::{DuelAdvance, Game, Rollover};
use crate::registry::{Registry, Session, SharedGame};
use crate::scheduler::{Deferred, Fired, Scheduler};
use duel_shared::{Notification, Response, ResponseBody};
use log::{debug, info};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct GameService {
    config: ServerConfig,
    registry: Arc<Registry>,
    authority: TokenAuthority,
    broadcaster: Broadcaster,
    scheduler: Scheduler,
}

impl GameService {
    /// Builds the service and spawns the loop that applies deferred
    /// transitions. Must be called inside a tokio runtime.
    pub fn start(config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let mut authority = TokenAuthority::new(config.token_secret.as_bytes());
        if let Some(ttl) = config.token_ttl {
            authority = authority.with_ttl(ttl);
        }
        let (scheduler, fired) = Scheduler::new();

        let service = Arc::new(Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            config,
            registry,
            authority,
            scheduler,
        });

        tokio::spawn(Self::run_scheduler(Arc::downgrade(&service), fired));
        service
    }

    async fn run_scheduler(service: Weak<Self>, mut fired: mpsc::UnboundedReceiver<Fired>) {
        while let Some(next) = fired.recv().await {
            let Some(service) = service.upgrade() else {
                break;
            };
            // One task per action so a busy game never holds up another.
            tokio::spawn(async move { service.run_deferred(next).await });
        }
        debug!("Scheduler loop stopped");
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn authority(&self) -> &TokenAuthority {
        &self.authority
    }

    // ---- accounts ----

    pub async fn register(
        &self,
        conn: &ConnectionHandle,
        username: &str,
        password: &str,
    ) -> Result<Response> {
        let session = self
            .registry
            .accounts()
            .write()
            .await
            .register(username, password, conn)?;
        let token = self.authority.issue(session.user_id, &session.username)?;
        Ok(Response::ok(ResponseBody::Token { token }))
    }

    pub async fn login(
        &self,
        conn: &ConnectionHandle,
        username: &str,
        password: &str,
    ) -> Result<Response> {
        let session = self
            .registry
            .accounts()
            .write()
            .await
            .login(username, password, conn)?;
        let token = self.authority.issue(session.user_id, &session.username)?;
        Ok(Response::ok(ResponseBody::Token { token }))
    }

    /// Verifies `token` and returns the caller's live session, opening one on
    /// `conn` if the user reconnected.
    async fn authenticate(&self, conn: &ConnectionHandle, token: &str) -> Result<Session> {
        let identity = self.authority.verify(token)?;
        self.registry.accounts().write().await.resume(&identity, conn)
    }

    pub async fn get_username(&self, conn: &ConnectionHandle, token: &str) -> Result<Response> {
        let session = self.authenticate(conn, token).await?;
        Ok(Response::ok(ResponseBody::Username {
            username: session.username,
        }))
    }

    // ---- lobby ----

    pub async fn enter_game(&self, conn: &ConnectionHandle, token: &str) -> Result<Response> {
        let session = self.authenticate(conn, token).await?;
        self.registry
            .accounts()
            .write()
            .await
            .rebind(&session.user_id, conn);

        // Seats only change under the lobby lock, so the check below holds
        // until this entrant is seated.
        let mut lobby = self.registry.lobby().write().await;
        let current = self.registry.accounts().read().await.seat_of(&session.user_id);
        if let Some(current) = current.and_then(|id| lobby.get(id)) {
            if !current.lock().await.is_finished() {
                return Err(RequestError::Precondition("already playing in a game"));
            }
        }

        let (game_id, shared) = lobby.open_game(|id| {
            Game::new(id, self.config.rules, Arc::clone(&self.config.prompts))
        });
        let mut game = shared.lock().await;

        let outcome = game.seat(session.user_id, &session.username)?;
        self.registry
            .accounts()
            .write()
            .await
            .seat(&session.user_id, game_id);
        if outcome.started {
            lobby.close_open_game();
        }
        drop(lobby);

        self.broadcaster
            .send(
                &outcome.previous_seats,
                &Notification::NewPlayer {
                    username: session.username.clone(),
                },
            )
            .await;
        if outcome.started {
            self.defer(&mut game, self.config.start_delay, Deferred::AnnounceStart);
        }

        Ok(Response::ok(ResponseBody::Usernames {
            usernames: outcome.already_seated,
        }))
    }

    /// The game the caller is seated in.
    async fn seated_game(&self, session: &Session) -> Result<SharedGame> {
        let game_id = session
            .game_id
            .ok_or(RequestError::Precondition("not seated in a game"))?;
        self.registry
            .game(game_id)
            .await
            .ok_or(RequestError::Precondition("game no longer exists"))
    }

    // ---- answer phase ----

    pub async fn get_question(&self, conn: &ConnectionHandle, token: &str) -> Result<Response> {
        let session = self.authenticate(conn, token).await?;
        let shared = self.seated_game(&session).await?;
        let game = shared.lock().await;

        let question = game
            .question_for(&session.user_id, &session.username)?
            .to_string();
        Ok(Response::ok(ResponseBody::Question { question }))
    }

    pub async fn save_answer(
        &self,
        conn: &ConnectionHandle,
        token: &str,
        answer: &str,
    ) -> Result<Response> {
        let session = self.authenticate(conn, token).await?;
        let shared = self.seated_game(&session).await?;
        let mut game = shared.lock().await;

        let outcome = game.save_answer(&session.user_id, &session.username, answer)?;
        if outcome.everyone_answered {
            self.open_voting(&mut game).await;
        }

        Ok(Response::ok(ResponseBody::LastAnswer {
            lastanswer: outcome.last_answer,
        }))
    }

    // ---- voting phase ----

    pub async fn get_duel(&self, conn: &ConnectionHandle, token: &str) -> Result<Response> {
        let session = self.authenticate(conn, token).await?;
        let shared = self.seated_game(&session).await?;
        let game = shared.lock().await;

        let (duelnum, duel) = game.current_duel(&session.user_id)?;
        Ok(Response::ok(ResponseBody::Duel {
            question: duel.question.clone(),
            answers: duel.answers.clone(),
            duelnum,
        }))
    }

    pub async fn save_vote(&self, conn: &ConnectionHandle, token: &str, vote: i64) -> Result<Response> {
        let session = self.authenticate(conn, token).await?;
        let shared = self.seated_game(&session).await?;
        let mut game = shared.lock().await;

        let outcome = game.save_vote(&session.user_id, &session.username, vote)?;
        if outcome.duel_closed {
            self.close_duel(&mut game).await;
        }

        Ok(Response::ok(ResponseBody::Empty {}))
    }

    // ---- results ----

    pub async fn get_duel_result(&self, conn: &ConnectionHandle, token: &str) -> Result<Response> {
        let session = self.authenticate(conn, token).await?;
        let shared = self.seated_game(&session).await?;
        let game = shared.lock().await;

        let duel = game.duel_result(&session.user_id)?;
        Ok(Response::ok(ResponseBody::DuelResult {
            question: duel.question.clone(),
            usernames: duel.usernames.clone(),
            answers: duel.answers.clone(),
            votesfor0: duel.votes[0].clone(),
            votesfor1: duel.votes[1].clone(),
        }))
    }

    pub async fn get_round_result(&self, conn: &ConnectionHandle, token: &str) -> Result<Response> {
        let session = self.authenticate(conn, token).await?;
        let shared = self.seated_game(&session).await?;
        let points = shared.lock().await.round_result();
        Ok(Response::ok(ResponseBody::Points { points }))
    }

    pub async fn get_game_result(&self, conn: &ConnectionHandle, token: &str) -> Result<Response> {
        let session = self.authenticate(conn, token).await?;
        let shared = self.seated_game(&session).await?;
        let points = shared.lock().await.game_result();
        Ok(Response::ok(ResponseBody::Points { points }))
    }

    // ---- transitions ----

    async fn open_voting(&self, game: &mut Game) {
        self.broadcaster
            .send(&game.recipients(), &Notification::EveryoneAnswered)
            .await;
        let epoch = game.epoch();
        self.arm_deadline(game, Deferred::VoteDeadline { epoch });
    }

    async fn close_duel(&self, game: &mut Game) {
        self.broadcaster
            .send(&game.recipients(), &Notification::DuelVotingEnded)
            .await;
        let epoch = game.epoch();
        self.defer(game, self.config.pacing_delay, Deferred::AdvanceDuel { epoch });
    }

    fn defer(&self, game: &mut Game, delay: Duration, action: Deferred) {
        let handle = self.scheduler.schedule(game.id, delay, action);
        game.track_timer(handle);
    }

    fn arm_deadline(&self, game: &mut Game, action: Deferred) {
        if let Some(deadline) = self.config.phase_deadline {
            self.defer(game, deadline, action);
        }
    }

    /// Applies one deferred action. Actions scheduled in an epoch the game
    /// has since left are dropped.
    pub async fn run_deferred(&self, fired: Fired) {
        let Fired { game_id, action } = fired;

        if action == Deferred::Evict {
            self.registry.evict_game(game_id).await;
            return;
        }

        let Some(shared) = self.registry.game(game_id).await else {
            debug!("Game {}: {:?} fired after eviction", game_id, action);
            return;
        };
        let mut game = shared.lock().await;
        let recipients = game.recipients();

        match action {
            Deferred::AnnounceStart => {
                self.broadcaster
                    .send(&recipients, &Notification::GameStarted)
                    .await;
                let epoch = game.epoch();
                self.arm_deadline(&mut game, Deferred::AnswerDeadline { epoch });
            }
            Deferred::AdvanceDuel { epoch } => match game.advance_duel(epoch) {
                Some(DuelAdvance::NextDuel) => {
                    self.broadcaster
                        .send(&recipients, &Notification::NewDuelVotingStarted)
                        .await;
                    let epoch = game.epoch();
                    self.arm_deadline(&mut game, Deferred::VoteDeadline { epoch });
                }
                Some(DuelAdvance::RoundOver) => {
                    self.broadcaster
                        .send(&recipients, &Notification::RoundVotingEnded)
                        .await;
                    let epoch = game.epoch();
                    self.defer(&mut game, self.config.pacing_delay, Deferred::Rollover { epoch });
                }
                None => debug!("Game {}: stale duel advance ignored", game_id),
            },
            Deferred::Rollover { epoch } => match game.rollover(epoch) {
                Some(Rollover::NewRound) => {
                    self.broadcaster
                        .send(&recipients, &Notification::NewRoundStarted)
                        .await;
                    let epoch = game.epoch();
                    self.arm_deadline(&mut game, Deferred::AnswerDeadline { epoch });
                }
                Some(Rollover::GameEnded) => {
                    self.broadcaster
                        .send(&recipients, &Notification::GameEnded)
                        .await;
                    if let Some(retention) = self.config.game_retention {
                        info!("Game {} will be evicted in {:?}", game_id, retention);
                        self.defer(&mut game, retention, Deferred::Evict);
                    }
                }
                None => debug!("Game {}: stale rollover ignored", game_id),
            },
            Deferred::AnswerDeadline { epoch } => {
                if game.force_answers(epoch) {
                    self.open_voting(&mut game).await;
                }
            }
            Deferred::VoteDeadline { epoch } => {
                if game.force_close_duel(epoch) {
                    self.close_duel(&mut game).await;
                }
            }
            Deferred::Evict => {}
        }
    }
}
