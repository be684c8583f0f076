//! Command connection read loop and request routing

use crate::connection::ConnectionHandle;
use crate::error::Result;
use crate::service::GameService;
use duel_shared::{FrameDecoder, Request, Response};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::{JoinError, JoinSet};

const READ_CHUNK: usize = 4096;

/// Routes one decoded request to its handler.
pub async fn dispatch(service: &GameService, conn: &ConnectionHandle, request: Request) -> Result<Response> {
    match request {
        Request::Register { username, password } => service.register(conn, &username, &password).await,
        Request::Login { username, password } => service.login(conn, &username, &password).await,
        Request::GetUsername { token } => service.get_username(conn, &token).await,
        Request::EnterGame { token } => service.enter_game(conn, &token).await,
        Request::GetQuestion { token } => service.get_question(conn, &token).await,
        Request::SaveAnswer { answer, token } => service.save_answer(conn, &token, &answer).await,
        Request::GetDuel { token } => service.get_duel(conn, &token).await,
        Request::SaveVote { vote, token } => service.save_vote(conn, &token, vote).await,
        Request::GetDuelResult { token } => service.get_duel_result(conn, &token).await,
        Request::GetRoundResult { token } => service.get_round_result(conn, &token).await,
        Request::GetGameResult { token } => service.get_game_result(conn, &token).await,
    }
}

/// Reads requests from a command connection until it closes.
///
/// Every decoded request runs in its own task, so a slow handler never
/// stalls the reader and replies may go out in a different order than the
/// requests came in. Undecodable frames are logged and dropped. When the
/// stream ends, in-flight requests are awaited and then the sessions bound
/// to this connection are closed; seats and games are left alone.
pub async fn serve<R>(service: Arc<GameService>, conn: ConnectionHandle, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buffer = [0u8; READ_CHUNK];
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                log_handler_exit(&conn, finished);
            }
            read = reader.read(&mut buffer) => {
                let read = match read {
                    Ok(0) => break,
                    Ok(read) => read,
                    Err(e) => {
                        warn!("Read from {} failed: {}", conn.peer, e);
                        break;
                    }
                };
                decoder.extend(&buffer[..read]);

                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => spawn_request(&mut handlers, &service, &conn, &frame),
                        Ok(None) => break,
                        Err(e) => warn!("Dropping frame from {}: {}", conn.peer, e),
                    }
                }
            }
        }
    }

    // A request still running could open a session on this connection.
    while let Some(finished) = handlers.join_next().await {
        log_handler_exit(&conn, finished);
    }

    let closed = service
        .registry()
        .accounts()
        .write()
        .await
        .drop_connection(conn.id);
    info!(
        "Connection {} from {} closed ({} sessions ended)",
        conn.id,
        conn.peer,
        closed.len()
    );
}

fn log_handler_exit(conn: &ConnectionHandle, finished: std::result::Result<(), JoinError>) {
    if let Err(e) = finished {
        error!("Request handler for {} failed: {}", conn.peer, e);
    }
}

fn spawn_request(
    handlers: &mut JoinSet<()>,
    service: &Arc<GameService>,
    conn: &ConnectionHandle,
    frame: &str,
) {
    let request: Request = match serde_json::from_str(frame) {
        Ok(request) => request,
        Err(e) => {
            warn!("Ignoring malformed request from {}: {}", conn.peer, e);
            return;
        }
    };

    let service = Arc::clone(service);
    let conn = conn.clone();
    handlers.spawn(async move {
        let method = request.method();
        let response = match dispatch(&service, &conn, request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("{} from {} failed: {}", method, conn.peer, e);
                Response::status(e.status())
            }
        };
        if !conn.reply(&response) {
            debug!("Dropped {} reply, {} is gone", method, conn.peer);
        }
    });
}
