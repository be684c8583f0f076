//! Delayed game transitions
//!
//! Every timed step (the start announcement, pacing between duels and
//! rounds, phase deadlines, eviction of ended games) is a [`Deferred`]
//! action. [`Scheduler::schedule`] spawns a sleeper that posts a [`Fired`]
//! message when its delay elapses; a single loop owned by the game service
//! receives those messages and applies them. The sleeper's handle is kept on
//! the game so eviction can abort whatever is still pending.

use crate::registry::GameId;
use log::debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    /// Push `gamestarted` once the start delay has passed.
    AnnounceStart,
    /// Open the next duel, or end the round's voting after the last one.
    AdvanceDuel { epoch: u64 },
    /// Start the next round, or end the game.
    Rollover { epoch: u64 },
    AnswerDeadline { epoch: u64 },
    VoteDeadline { epoch: u64 },
    /// Drop an ended game from the registry.
    Evict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub game_id: GameId,
    pub action: Deferred,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Fired>,
}

impl Scheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Fired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn schedule(&self, game_id: GameId, delay: Duration, action: Deferred) -> JoinHandle<()> {
        let tx = self.tx.clone();
        debug!("Game {}: {:?} scheduled in {:?}", game_id, action, delay);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(Fired { game_id, action }).is_err() {
                debug!("Game {}: {:?} fired after shutdown", game_id, action);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_actions_fire_in_delay_order() {
        let (scheduler, mut fired) = Scheduler::new();

        scheduler.schedule(1, Duration::from_millis(60), Deferred::Evict);
        scheduler.schedule(2, Duration::from_millis(5), Deferred::AnnounceStart);

        let first = fired.recv().await.unwrap();
        let second = fired.recv().await.unwrap();
        assert_eq!(
            first,
            Fired {
                game_id: 2,
                action: Deferred::AnnounceStart
            }
        );
        assert_eq!(
            second,
            Fired {
                game_id: 1,
                action: Deferred::Evict
            }
        );
    }

    #[tokio::test]
    async fn test_aborted_action_never_fires() {
        let (scheduler, mut fired) = Scheduler::new();

        let handle = scheduler.schedule(1, Duration::from_millis(20), Deferred::Rollover { epoch: 3 });
        handle.abort();
        scheduler.schedule(1, Duration::from_millis(60), Deferred::Evict);

        let next = fired.recv().await.unwrap();
        assert_eq!(next.action, Deferred::Evict);
    }
}
