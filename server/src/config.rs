//! Runtime configuration for the game server
//!
//! `main` builds a [`ServerConfig`] from command-line arguments; tests build
//! one directly, usually with short delays and ephemeral ports.

use crate::prompts::default_prompts;
use duel_shared::{DEFAULT_COMMAND_PORT, DEFAULT_NOTIFICATION_PORT, DEFAULT_ROUNDS, DEFAULT_SEATS};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shape of every match: how many seats fill a game and how many rounds it lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRules {
    pub seats: usize,
    pub max_rounds: usize,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            seats: DEFAULT_SEATS,
            max_rounds: DEFAULT_ROUNDS,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a game needs at least 3 seats so every duel has a voter, got {0}")]
    TooFewSeats(usize),
    #[error("a game needs at least one round")]
    NoRounds,
    #[error("the prompt pool is empty")]
    EmptyPromptPool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub command_addr: String,
    pub notification_addr: String,
    pub rules: GameRules,
    /// Delay between the last seat filling and the `gamestarted` push.
    pub start_delay: Duration,
    /// Delay between a duel closing and the next phase transition.
    pub pacing_delay: Duration,
    /// Force-advance a stalled answer phase or duel vote after this long.
    pub phase_deadline: Option<Duration>,
    /// How long an ended game stays queryable before it is evicted.
    pub game_retention: Option<Duration>,
    pub token_secret: String,
    pub token_ttl: Option<Duration>,
    pub prompts: Arc<[String]>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command_addr: format!("127.0.0.1:{}", DEFAULT_COMMAND_PORT),
            notification_addr: format!("127.0.0.1:{}", DEFAULT_NOTIFICATION_PORT),
            rules: GameRules::default(),
            start_delay: Duration::from_secs(3),
            pacing_delay: Duration::from_secs(2),
            phase_deadline: None,
            game_retention: Some(Duration::from_secs(600)),
            token_secret: "super secret".to_string(),
            token_ttl: None,
            prompts: default_prompts().into(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rules.seats < 3 {
            return Err(ConfigError::TooFewSeats(self.rules.seats));
        }
        if self.rules.max_rounds == 0 {
            return Err(ConfigError::NoRounds);
        }
        if self.prompts.is_empty() {
            return Err(ConfigError::EmptyPromptPool);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.rules.seats, 5);
        assert_eq!(config.rules.max_rounds, 3);
        assert!(config.command_addr.ends_with(":8081"));
        assert!(config.notification_addr.ends_with(":8082"));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ServerConfig::default();
        config.rules.seats = 2;
        assert_eq!(config.validate(), Err(ConfigError::TooFewSeats(2)));

        let mut config = ServerConfig::default();
        config.rules.max_rounds = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoRounds));

        let mut config = ServerConfig::default();
        config.prompts = Vec::<String>::new().into();
        assert_eq!(config.validate(), Err(ConfigError::EmptyPromptPool));
    }
}
