use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod framing;

pub use framing::{FrameDecoder, FrameError, MAX_FRAME_LEN};

pub const DEFAULT_COMMAND_PORT: u16 = 8081;
pub const DEFAULT_NOTIFICATION_PORT: u16 = 8082;
pub const DEFAULT_SEATS: usize = 5;
pub const DEFAULT_ROUNDS: usize = 3;
pub const POINTS_PER_VOTE: u64 = 10;

/// Points a single vote is worth in the given (zero-based) round.
pub fn points_per_vote(round: usize) -> u64 {
    POINTS_PER_VOTE * (round as u64 + 1)
}

/// Inbound request envelope, discriminated by its `method` field.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Request {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    GetUsername {
        #[serde(default)]
        token: String,
    },
    EnterGame {
        #[serde(default)]
        token: String,
    },
    GetQuestion {
        #[serde(default)]
        token: String,
    },
    SaveAnswer {
        answer: String,
        #[serde(default)]
        token: String,
    },
    GetDuel {
        #[serde(default)]
        token: String,
    },
    SaveVote {
        vote: i64,
        #[serde(default)]
        token: String,
    },
    GetDuelResult {
        #[serde(default)]
        token: String,
    },
    GetRoundResult {
        #[serde(default)]
        token: String,
    },
    GetGameResult {
        #[serde(default)]
        token: String,
    },
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Register { .. } => "register",
            Request::Login { .. } => "login",
            Request::GetUsername { .. } => "getusername",
            Request::EnterGame { .. } => "entergame",
            Request::GetQuestion { .. } => "getquestion",
            Request::SaveAnswer { .. } => "saveanswer",
            Request::GetDuel { .. } => "getduel",
            Request::SaveVote { .. } => "savevote",
            Request::GetDuelResult { .. } => "getduelresult",
            Request::GetRoundResult { .. } => "getroundresult",
            Request::GetGameResult { .. } => "getgameresult",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    InvalidData,
    AlreadyLoggedIn,
    MethodNotAllowed,
    NotAcceptable,
    Conflict,
}

impl Status {
    pub const fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::InvalidData => 401,
            Status::AlreadyLoggedIn => 403,
            Status::MethodNotAllowed => 405,
            Status::NotAcceptable => 406,
            Status::Conflict => 409,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(Status::Ok),
            401 => Some(Status::InvalidData),
            403 => Some(Status::AlreadyLoggedIn),
            405 => Some(Status::MethodNotAllowed),
            406 => Some(Status::NotAcceptable),
            409 => Some(Status::Conflict),
            _ => None,
        }
    }
}

/// Reply written on the command connection. Every reply carries `status`;
/// the method-specific fields are flattened next to it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    #[serde(flatten)]
    pub body: ResponseBody,
}

// Variant order matters for deserialization: the most specific shapes first.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ResponseBody {
    DuelResult {
        question: String,
        usernames: [String; 2],
        answers: [String; 2],
        votesfor0: Vec<String>,
        votesfor1: Vec<String>,
    },
    Duel {
        question: String,
        answers: [String; 2],
        duelnum: usize,
    },
    Token {
        token: String,
    },
    Username {
        username: String,
    },
    Usernames {
        usernames: Vec<String>,
    },
    Question {
        question: String,
    },
    LastAnswer {
        lastanswer: bool,
    },
    Points {
        points: BTreeMap<String, u64>,
    },
    Empty {},
}

impl Response {
    pub fn ok(body: ResponseBody) -> Self {
        Self {
            status: Status::Ok.code(),
            body,
        }
    }

    /// A bare `{"status": N}` reply.
    pub fn status(status: Status) -> Self {
        Self {
            status: status.code(),
            body: ResponseBody::Empty {},
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok.code()
    }
}

/// Server-initiated push on the notification connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "message", rename_all = "lowercase")]
pub enum Notification {
    NewPlayer { username: String },
    GameStarted,
    EveryoneAnswered,
    NewDuelVotingStarted,
    DuelVotingEnded,
    RoundVotingEnded,
    NewRoundStarted,
    GameEnded,
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::NewPlayer { .. } => "newplayer",
            Notification::GameStarted => "gamestarted",
            Notification::EveryoneAnswered => "everyoneanswered",
            Notification::NewDuelVotingStarted => "newduelvotingstarted",
            Notification::DuelVotingEnded => "duelvotingended",
            Notification::RoundVotingEnded => "roundvotingended",
            Notification::NewRoundStarted => "newroundstarted",
            Notification::GameEnded => "gameended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_method_discriminator() {
        let request: Request =
            serde_json::from_str(r#"{"method": "register", "username": "ann", "password": "pw"}"#)
                .unwrap();
        assert_eq!(
            request,
            Request::Register {
                username: "ann".to_string(),
                password: "pw".to_string(),
            }
        );
        assert_eq!(request.method(), "register");
    }

    #[test]
    fn test_request_with_token_and_fields() {
        let request: Request =
            serde_json::from_str(r#"{"method": "savevote", "vote": 1, "token": "abc"}"#).unwrap();
        assert_eq!(
            request,
            Request::SaveVote {
                vote: 1,
                token: "abc".to_string(),
            }
        );
    }

    #[test]
    fn test_request_missing_token_defaults_to_empty() {
        let request: Request = serde_json::from_str(r#"{"method": "getduel"}"#).unwrap();
        assert_eq!(
            request,
            Request::GetDuel {
                token: String::new()
            }
        );
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let parsed = serde_json::from_str::<Request>(r#"{"method": "cheat", "token": "x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_status_codes() {
        for status in [
            Status::Ok,
            Status::InvalidData,
            Status::AlreadyLoggedIn,
            Status::MethodNotAllowed,
            Status::NotAcceptable,
            Status::Conflict,
        ] {
            assert_eq!(Status::from_code(status.code()), Some(status));
        }
        assert_eq!(Status::from_code(500), None);
    }

    #[test]
    fn test_bare_status_response_shape() {
        let value = serde_json::to_value(Response::status(Status::Conflict)).unwrap();
        assert_eq!(value, json!({"status": 409}));
    }

    #[test]
    fn test_duel_response_hides_usernames() {
        let response = Response::ok(ResponseBody::Duel {
            question: "Why?".to_string(),
            answers: ["a".to_string(), "b".to_string()],
            duelnum: 2,
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"status": 200, "question": "Why?", "answers": ["a", "b"], "duelnum": 2})
        );
    }

    #[test]
    fn test_response_body_shapes_parse_back() {
        let raw = r#"{"status":200,"question":"q","usernames":["a","b"],"answers":["x","y"],"votesfor0":["c"],"votesfor1":[]}"#;
        let response: Response = serde_json::from_str(raw).unwrap();
        assert!(matches!(response.body, ResponseBody::DuelResult { .. }));

        let response: Response = serde_json::from_str(r#"{"status":200,"lastanswer":true}"#).unwrap();
        assert_eq!(response.body, ResponseBody::LastAnswer { lastanswer: true });

        let response: Response = serde_json::from_str(r#"{"status":405}"#).unwrap();
        assert_eq!(response.body, ResponseBody::Empty {});
        assert!(!response.is_ok());
    }

    #[test]
    fn test_notification_wire_format() {
        assert_eq!(
            serde_json::to_value(Notification::EveryoneAnswered).unwrap(),
            json!({"message": "everyoneanswered"})
        );
        assert_eq!(
            serde_json::to_value(Notification::NewPlayer {
                username: "bob".to_string()
            })
            .unwrap(),
            json!({"message": "newplayer", "username": "bob"})
        );
        assert_eq!(Notification::NewDuelVotingStarted.name(), "newduelvotingstarted");
    }

    #[test]
    fn test_points_scale_with_round() {
        assert_eq!(points_per_vote(0), 10);
        assert_eq!(points_per_vote(2), 30);
    }
}
