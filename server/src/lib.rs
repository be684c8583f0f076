//! # Duel Trivia Server Library
//!
//! This library provides the authoritative server for a multiplayer party
//! game: players fill a fixed number of seats, answer prompts, and vote on
//! each other's answers in head-to-head duels over several rounds. The
//! server owns all game state, enforces every ordering and voting rule, and
//! pushes phase changes to each player as they happen.
//!
//! ## Core Responsibilities
//!
//! ### Identity
//! Users register or log in with a username and password and receive a
//! signed token. Every later request carries that token; a client that
//! drops and reconnects presents the same token and is put back in its seat.
//!
//! ### Matchmaking
//! Entrants are seated in the single open game until it is full. A full
//! game starts and closes to newcomers, and the next entrant opens a fresh
//! game.
//!
//! ### Game Flow
//! Each round deals one duel per seat, so every player answers exactly two
//! prompts. Once everyone has answered, the duels are voted on one at a
//! time by the players not in them. Votes score points for the chosen
//! player, worth more in later rounds.
//!
//! ## Architecture Design
//!
//! ### Two Connections per Client
//! A client holds a command connection (request and reply) and a
//! notification connection (server push only). Messages on both are bare
//! JSON objects with no delimiter; the reader finds boundaries by matching
//! braces.
//!
//! ### Task Layout
//! Everything runs on the multi-threaded tokio runtime:
//! - one reader task per command connection
//! - one task per request, so replies may be out of request order
//! - one writer task per socket, fed by an unbounded channel
//! - one scheduler loop applying delayed transitions
//!
//! ### Locking
//! Accounts and the lobby each sit behind a `RwLock`; every game has its
//! own `Mutex`, held for the full read-modify-write of a request including
//! the notifications it triggers. Locks are taken in the order
//! lobby → game → accounts. Delivery only queues onto writer channels, so
//! no lock is ever held across a socket write.
//!
//! ## Module Organization
//!
//! ### Auth Module (`auth`)
//! HS256 token issuance and verification, with optional expiry and a
//! revocation hook.
//!
//! ### Registry Module (`registry`)
//! Users, live sessions, the seating index, and the games map.
//!
//! ### Game Module (`game`)
//! The per-match phase state machine: seating, duel generation, answers,
//! votes, tallies, and round rollover.
//!
//! ### Service Module (`service`)
//! One handler per request method, plus the deferred transitions driven by
//! the `scheduler` module and delivered through the `broadcast` module.
//!
//! ### Network Modules (`network`, `dispatcher`, `connection`)
//! Listener pairing, the per-connection read loop, and the writer tasks.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use duel_server::config::ServerConfig;
//! use duel_server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     // Five seats, three rounds, ports 8081 and 8082
//!     let server = Server::bind(ServerConfig::default()).await?;
//!
//!     // Accepts clients until the process exits
//!     server.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Status Codes
//!
//! Every reply carries a `status`. Failures carry nothing else:
//! - `401` bad credentials or an unverifiable token
//! - `403` login while already logged in
//! - `405` request out of order or outside the current phase
//! - `406` request that breaks a game rule
//! - `409` username already taken

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod game;
pub mod network;
pub mod prompts;
pub mod registry;
pub mod scheduler;
pub mod service;
