//! One match and its phase state machine
//!
//! A [`Game`] is plain data plus synchronous transitions. It knows nothing
//! about sockets, locks, or timers beyond holding the handles of timers
//! scheduled on its behalf; the service layer locks it, calls one transition,
//! and acts on the returned outcome (replies, broadcasts, deferred work).
//!
//! ## Phases
//!
//! ```text
//! Lobby ──seat fills──▶ Answering ──everyone answered──▶ Voting(duel 0)
//!   Voting(k) ──all eligible voted──▶ DuelClosed(k) ──pacing──▶ Voting(k+1)
//!   DuelClosed(last) ──pacing──▶ RoundOver ──pacing──▶ Answering | Ended
//! ```
//!
//! Every transition bumps an epoch counter. Deferred work carries the epoch
//! it was scheduled in and is ignored if the game has moved on since, which
//! keeps each transition firing exactly once.

use crate::config::GameRules;
use crate::error::{RequestError, Result};
use crate::registry::{GameId, UserId};
use duel_shared::points_per_vote;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Answers each player gives per round: one per duel they take part in.
pub const ANSWERS_PER_ROUND: usize = 2;

/// Username → points.
pub type Tally = BTreeMap<String, u64>;

/// Two players' answers to the same prompt, and who voted for which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duel {
    pub question: String,
    pub usernames: [String; 2],
    pub answers: [String; 2],
    pub votes: [Vec<String>; 2],
}

impl Duel {
    pub fn new(question: String, first: &str, second: &str) -> Self {
        Self {
            question,
            usernames: [first.to_string(), second.to_string()],
            answers: [String::new(), String::new()],
            votes: [Vec::new(), Vec::new()],
        }
    }

    pub fn slot_of(&self, username: &str) -> Option<usize> {
        self.usernames.iter().position(|u| u == username)
    }

    pub fn is_participant(&self, username: &str) -> bool {
        self.slot_of(username).is_some()
    }

    pub fn vote_count(&self) -> usize {
        self.votes[0].len() + self.votes[1].len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    Answering,
    Voting,
    DuelClosed,
    RoundOver,
    Ended,
}

#[derive(Debug, Clone)]
struct Seat {
    user_id: UserId,
    username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatOutcome {
    /// Usernames seated before the joiner, in join order.
    pub already_seated: Vec<String>,
    /// Users to tell about the new player.
    pub previous_seats: Vec<UserId>,
    /// The joiner filled the last seat and the game started.
    pub started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub last_answer: bool,
    /// This answer was the last one outstanding; voting is now open.
    pub everyone_answered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub duel_closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuelAdvance {
    NextDuel,
    RoundOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollover {
    NewRound,
    GameEnded,
}

#[derive(Debug)]
pub struct Game {
    pub id: GameId,
    rules: GameRules,
    prompts: Arc<[String]>,
    seats: Vec<Seat>,
    started: bool,
    duels: Vec<Duel>,
    answered: HashMap<UserId, usize>,
    voted: HashSet<UserId>,
    duel_index: usize,
    round_index: usize,
    everyone_answered: bool,
    duel_closed: bool,
    round_results: BTreeMap<usize, Tally>,
    game_results: Tally,
    epoch: u64,
    rng: StdRng,
    timers: Vec<JoinHandle<()>>,
}

impl Game {
    pub fn new(id: GameId, rules: GameRules, prompts: Arc<[String]>) -> Self {
        Self::with_rng(id, rules, prompts, StdRng::from_entropy())
    }

    pub fn with_rng(id: GameId, rules: GameRules, prompts: Arc<[String]>, rng: StdRng) -> Self {
        Self {
            id,
            rules,
            prompts,
            seats: Vec::with_capacity(rules.seats),
            started: false,
            duels: Vec::new(),
            answered: HashMap::new(),
            voted: HashSet::new(),
            duel_index: 0,
            round_index: 0,
            everyone_answered: false,
            duel_closed: false,
            round_results: BTreeMap::new(),
            game_results: Tally::new(),
            epoch: 0,
            rng,
            timers: Vec::new(),
        }
    }

    // ---- lobby ----

    /// Seats a player. Filling the last seat starts the game and deals
    /// round zero.
    pub fn seat(&mut self, user_id: UserId, username: &str) -> Result<SeatOutcome> {
        if self.started {
            return Err(RequestError::Precondition("game already started"));
        }
        if self.is_seated(&user_id) {
            return Err(RequestError::Precondition("already seated in this game"));
        }

        let already_seated = self.seats.iter().map(|s| s.username.clone()).collect();
        let previous_seats = self.recipients();

        self.seats.push(Seat {
            user_id,
            username: username.to_string(),
        });
        self.answered.insert(user_id, 0);
        info!(
            "Game {}: {} took seat {}/{}",
            self.id,
            username,
            self.seats.len(),
            self.rules.seats
        );

        let started = self.seats.len() == self.rules.seats;
        if started {
            self.started = true;
            self.start_round();
            info!("Game {} started", self.id);
        }

        Ok(SeatOutcome {
            already_seated,
            previous_seats,
            started,
        })
    }

    fn start_round(&mut self) {
        self.generate_duels();
        self.init_results();
        self.epoch += 1;
    }

    /// Deals one duel per seat: a shuffled rotation where the player at
    /// position i faces the player at position i + 1.
    fn generate_duels(&mut self) {
        let mut order: Vec<usize> = (0..self.seats.len()).collect();
        order.shuffle(&mut self.rng);

        let n = order.len();
        self.duels = (0..n)
            .map(|i| {
                let first = &self.seats[order[i]].username;
                let second = &self.seats[order[(i + 1) % n]].username;
                Duel::new(self.prompt_for(i), first, second)
            })
            .collect();
    }

    fn prompt_for(&self, duel: usize) -> String {
        let index = self.round_index * self.rules.max_rounds + duel;
        self.prompts[index % self.prompts.len()].clone()
    }

    fn init_results(&mut self) {
        let round = self.round_results.entry(self.round_index).or_default();
        for seat in &self.seats {
            round.entry(seat.username.clone()).or_insert(0);
            self.game_results.entry(seat.username.clone()).or_insert(0);
        }
    }

    // ---- answer phase ----

    pub fn question_for(&self, user_id: &UserId, username: &str) -> Result<&str> {
        self.ensure_seated(user_id)?;
        self.ensure_in_play()?;

        let answered = self.answered_by(user_id);
        if answered >= ANSWERS_PER_ROUND {
            return Err(RequestError::Sequencing("both questions already answered"));
        }

        self.duels_of(username)
            .nth(answered)
            .map(|index| self.duels[index].question.as_str())
            .ok_or(RequestError::Precondition("no duel for this player"))
    }

    pub fn save_answer(
        &mut self,
        user_id: &UserId,
        username: &str,
        answer: &str,
    ) -> Result<AnswerOutcome> {
        self.ensure_seated(user_id)?;
        self.ensure_in_play()?;

        if self.everyone_answered {
            return Err(RequestError::RuleViolation(
                "answers for this round are closed",
            ));
        }
        let answered = self.answered_by(user_id);
        if answered >= ANSWERS_PER_ROUND {
            return Err(RequestError::Sequencing("both answers already saved"));
        }

        let index = self
            .duels_of(username)
            .nth(answered)
            .ok_or(RequestError::Precondition("no duel for this player"))?;
        let duel = &mut self.duels[index];
        let slot = duel
            .slot_of(username)
            .ok_or(RequestError::Precondition("no duel for this player"))?;
        duel.answers[slot] = answer.to_string();
        debug!(
            "Game {}: {} answered {:?} to {:?}",
            self.id, username, answer, duel.question
        );

        let answered = answered + 1;
        self.answered.insert(*user_id, answered);

        let everyone_answered = self
            .answered
            .values()
            .all(|count| *count >= ANSWERS_PER_ROUND);
        if everyone_answered {
            self.open_voting();
        }

        Ok(AnswerOutcome {
            last_answer: answered == ANSWERS_PER_ROUND,
            everyone_answered,
        })
    }

    fn open_voting(&mut self) {
        self.everyone_answered = true;
        self.duel_index = 0;
        self.duel_closed = false;
        self.voted.clear();
        self.epoch += 1;
        info!(
            "Game {}: everyone answered in round {}",
            self.id, self.round_index
        );
    }

    /// Indices of the duels `username` takes part in, in duel order.
    fn duels_of<'a>(&'a self, username: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.duels
            .iter()
            .enumerate()
            .filter(move |(_, duel)| duel.is_participant(username))
            .map(|(index, _)| index)
    }

    // ---- voting phase ----

    /// The duel currently up for voting, with its index.
    pub fn current_duel(&self, user_id: &UserId) -> Result<(usize, &Duel)> {
        self.ensure_seated(user_id)?;
        self.ensure_voting_window()?;
        Ok((self.duel_index, &self.duels[self.duel_index]))
    }

    pub fn save_vote(&mut self, user_id: &UserId, username: &str, vote: i64) -> Result<VoteOutcome> {
        self.ensure_seated(user_id)?;
        self.ensure_voting_window()?;
        if self.duel_closed {
            return Err(RequestError::Precondition("voting on this duel has ended"));
        }

        let slot = match vote {
            0 => 0,
            1 => 1,
            _ => return Err(RequestError::RuleViolation("vote must be 0 or 1")),
        };
        let duel = &mut self.duels[self.duel_index];
        if duel.is_participant(username) {
            return Err(RequestError::RuleViolation("cannot vote in your own duel"));
        }
        if self.voted.contains(user_id) {
            return Err(RequestError::RuleViolation("already voted in this duel"));
        }

        duel.votes[slot].push(username.to_string());
        self.voted.insert(*user_id);

        let target = duel.usernames[slot].clone();
        let points = points_per_vote(self.round_index);
        *self
            .round_results
            .entry(self.round_index)
            .or_default()
            .entry(target.clone())
            .or_insert(0) += points;
        *self.game_results.entry(target.clone()).or_insert(0) += points;
        debug!(
            "Game {}: {} voted for {} in duel {}",
            self.id, username, target, self.duel_index
        );

        let duel = &self.duels[self.duel_index];
        let duel_closed = self
            .seats
            .iter()
            .filter(|seat| !duel.is_participant(&seat.username))
            .all(|seat| self.voted.contains(&seat.user_id));
        if duel_closed {
            self.close_duel();
        }

        Ok(VoteOutcome { duel_closed })
    }

    fn close_duel(&mut self) {
        self.duel_closed = true;
        self.voted.clear();
        self.epoch += 1;
        info!(
            "Game {}: voting ended for duel {} of round {}",
            self.id, self.duel_index, self.round_index
        );
    }

    /// Moves past a closed duel, either to the next one or to the end of the
    /// round's voting. Stale calls return `None`.
    pub fn advance_duel(&mut self, epoch: u64) -> Option<DuelAdvance> {
        if epoch != self.epoch || !self.duel_closed || self.voting_ended() {
            return None;
        }

        self.duel_closed = false;
        self.epoch += 1;
        if self.duel_index + 1 < self.duels.len() {
            self.duel_index += 1;
            Some(DuelAdvance::NextDuel)
        } else {
            self.duel_index = self.duels.len();
            info!("Game {}: round {} voting ended", self.id, self.round_index);
            Some(DuelAdvance::RoundOver)
        }
    }

    /// Closes out a round whose voting has ended and deals the next one.
    pub fn rollover(&mut self, epoch: u64) -> Option<Rollover> {
        if epoch != self.epoch || !self.voting_ended() || self.is_finished() {
            return None;
        }

        self.round_index += 1;
        let outcome = if self.round_index >= self.rules.max_rounds {
            info!("Game {} ended", self.id);
            Rollover::GameEnded
        } else {
            info!("Game {}: round {} started", self.id, self.round_index);
            Rollover::NewRound
        };

        self.duel_index = 0;
        self.everyone_answered = false;
        self.duel_closed = false;
        self.voted.clear();
        for answered in self.answered.values_mut() {
            *answered = 0;
        }
        self.start_round();

        Some(outcome)
    }

    // ---- deadlines ----

    /// Ends a stalled answer phase. Missing answers stay empty.
    pub fn force_answers(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || !self.started || self.is_finished() || self.everyone_answered {
            return false;
        }
        for answered in self.answered.values_mut() {
            *answered = ANSWERS_PER_ROUND;
        }
        info!("Game {}: answer deadline passed", self.id);
        self.open_voting();
        true
    }

    /// Closes a stalled duel with the votes cast so far.
    pub fn force_close_duel(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch
            || !self.everyone_answered
            || self.voting_ended()
            || self.duel_closed
        {
            return false;
        }
        info!("Game {}: vote deadline passed", self.id);
        self.close_duel();
        true
    }

    // ---- results ----

    pub fn duel_result(&self, user_id: &UserId) -> Result<&Duel> {
        self.current_duel(user_id).map(|(_, duel)| duel)
    }

    pub fn round_result(&self) -> Tally {
        self.round_results
            .get(&self.round_index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn game_result(&self) -> Tally {
        self.game_results.clone()
    }

    pub fn round_result_for(&self, round: usize) -> Option<&Tally> {
        self.round_results.get(&round)
    }

    // ---- guards ----

    fn ensure_seated(&self, user_id: &UserId) -> Result<()> {
        if self.is_seated(user_id) {
            Ok(())
        } else {
            Err(RequestError::Precondition("not seated in this game"))
        }
    }

    fn ensure_in_play(&self) -> Result<()> {
        if !self.started {
            Err(RequestError::Precondition("game has not started"))
        } else if self.is_finished() {
            Err(RequestError::Precondition("game has ended"))
        } else {
            Ok(())
        }
    }

    fn ensure_voting_window(&self) -> Result<()> {
        if !self.everyone_answered {
            Err(RequestError::Precondition("voting has not opened"))
        } else if self.voting_ended() {
            Err(RequestError::Precondition("voting for this round has ended"))
        } else {
            Ok(())
        }
    }

    // ---- state ----

    pub fn is_seated(&self, user_id: &UserId) -> bool {
        self.seats.iter().any(|seat| &seat.user_id == user_id)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.round_index >= self.rules.max_rounds
    }

    fn voting_ended(&self) -> bool {
        self.duel_index >= self.duels.len()
    }

    pub fn phase(&self) -> Phase {
        if !self.started {
            Phase::Lobby
        } else if self.is_finished() {
            Phase::Ended
        } else if !self.everyone_answered {
            Phase::Answering
        } else if self.voting_ended() {
            Phase::RoundOver
        } else if self.duel_closed {
            Phase::DuelClosed
        } else {
            Phase::Voting
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn round_index(&self) -> usize {
        self.round_index
    }

    pub fn duel_index(&self) -> usize {
        self.duel_index
    }

    pub fn duels(&self) -> &[Duel] {
        &self.duels
    }

    pub fn answered_by(&self, user_id: &UserId) -> usize {
        self.answered.get(user_id).copied().unwrap_or(0)
    }

    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }

    /// Everyone seated, in join order.
    pub fn recipients(&self) -> Vec<UserId> {
        self.seats.iter().map(|seat| seat.user_id).collect()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.seats.iter().map(|seat| seat.username.clone()).collect()
    }

    // ---- timers ----

    pub fn track_timer(&mut self, handle: JoinHandle<()>) {
        self.timers.retain(|timer| !timer.is_finished());
        self.timers.push(handle);
    }

    pub fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.iter().filter(|timer| !timer.is_finished()).count()
    }
}
