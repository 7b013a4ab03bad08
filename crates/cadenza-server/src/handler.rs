//! Command processing: authentication and per-command semantics.
//!
//! Called from each session's reader task. Precondition failures are
//! answered with `ok = false` acknowledgements carrying a short slug; only
//! genuine protocol violations return an error, which kills the session.
//!
//! Ordering rule: a command's acknowledgement is enqueued onto the sender's
//! session *before* any broadcast the command triggers, so the sender
//! always observes its ack first.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use cadenza_protocol::{ClientCommand, Message, ServerCommand};

use crate::error::ServerError;
use crate::lookup::Lookup;
use crate::registry::{self, ServerState};
use crate::room::{Room, RoomError};
use crate::session::Session;
use crate::user::User;

/// Processes one decoded command from a session.
pub async fn process<L: Lookup>(
    state: &Arc<ServerState<L>>,
    session: &Arc<Session>,
    command: ClientCommand,
) -> Result<(), ServerError> {
    match session.user() {
        None => match command {
            ClientCommand::Authenticate { token } => authenticate(state, session, &token).await,
            _ => Err(ServerError::Unauthenticated),
        },
        Some(user) => {
            // The filter hook may rewrite the command; a veto becomes a
            // plain Ping so the client still gets a reply.
            let command = state
                .filter
                .filter(&user, command)
                .unwrap_or(ClientCommand::Ping);
            dispatch(state, session, &user, command).await
        }
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

async fn authenticate<L: Lookup>(
    state: &Arc<ServerState<L>>,
    session: &Arc<Session>,
    token: &str,
) -> Result<(), ServerError> {
    let info = match state.lookup.authenticate(token).await {
        Ok(info) => info,
        Err(e) => {
            tracing::info!(session_id = %session.id, error = %e, "authentication rejected");
            session.try_send(ServerCommand::Authenticate(Err(e.to_string())));
            session.mark_lost();
            return Ok(());
        }
    };

    // Reuse the identity if this user is known, otherwise register it.
    let user = {
        let mut users = state.users.write().await;
        match users.get(&info.id) {
            Some(user) => user.clone(),
            None => {
                let user = User::new(info.clone());
                users.insert(info.id, user.clone());
                user
            }
        }
    };

    // Swap the session binding. A still-live previous session is told to
    // stop: its writer drains, then it exits, and the reaper sees the
    // binding no longer points at it.
    let previous = user.session();
    user.bind_session(session);
    session.set_user(&user);
    if let Some(previous) = previous {
        if !Arc::ptr_eq(&previous, session) {
            tracing::info!(
                user_id = user.id,
                old_session = %previous.id,
                new_session = %session.id,
                "user reconnected, stopping previous session"
            );
            previous.stop();
        }
    }

    if state.bans.is_banned(user.id) {
        tracing::info!(user_id = user.id, "banned user rejected");
        session.try_send(ServerCommand::Authenticate(Err(
            RoomError::Banned.to_string()
        )));
        session.mark_lost();
        return Ok(());
    }

    let room_snapshot = match user.room().await {
        Some(room) => Some(room.client_state(&user).await),
        None => None,
    };
    session.try_send(ServerCommand::Authenticate(Ok((
        user.to_info(),
        room_snapshot,
    ))));
    tracing::info!(user_id = user.id, name = %user.name, session_id = %session.id, "authenticated");
    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

async fn room_of(user: &User) -> Result<Arc<Room>, RoomError> {
    user.room().await.ok_or(RoomError::NotInRoom)
}

async fn hosted_room_of(user: &User) -> Result<Arc<Room>, RoomError> {
    let room = room_of(user).await?;
    if !room.check_host(user).await {
        return Err(RoomError::NotHost);
    }
    Ok(room)
}

async fn dispatch<L: Lookup>(
    state: &Arc<ServerState<L>>,
    session: &Arc<Session>,
    user: &Arc<User>,
    command: ClientCommand,
) -> Result<(), ServerError> {
    match command {
        ClientCommand::Ping => session.try_send(ServerCommand::Pong),

        ClientCommand::Authenticate { .. } => return Err(ServerError::AlreadyAuthenticated),

        ClientCommand::Chat { message } => match room_of(user).await {
            Err(e) => session.try_send(ServerCommand::Chat(Err(e.to_string()))),
            Ok(room) => {
                session.try_send(ServerCommand::Chat(Ok(())));
                room.send(Message::Chat {
                    user: user.id,
                    content: message,
                })
                .await;
            }
        },

        // Telemetry relays only while a game is running, and only to
        // monitors. Out-of-phase frames are dropped without a reply.
        ClientCommand::Touches { frames } => {
            if let Ok(room) = room_of(user).await {
                if room.is_playing().await {
                    for frame in &frames {
                        if frame.time > user.game_time() {
                            user.set_game_time(frame.time);
                        }
                    }
                    room.broadcast_monitors(ServerCommand::Touches {
                        player: user.id,
                        frames,
                    })
                    .await;
                }
            }
        }

        ClientCommand::Judges { judges } => {
            if let Ok(room) = room_of(user).await {
                if room.is_playing().await {
                    room.broadcast_monitors(ServerCommand::Judges {
                        player: user.id,
                        judges,
                    })
                    .await;
                }
            }
        }

        ClientCommand::CreateRoom { id } => {
            let created = async {
                if !state.config.room_creation_enabled {
                    return Err(RoomError::CreationDisabled);
                }
                if user.room().await.is_some() {
                    return Err(RoomError::AlreadyInRoom);
                }
                let mut rooms = state.rooms.write().await;
                if rooms.contains_key(&id) {
                    return Err(RoomError::RoomExists);
                }
                let room = Room::new(id.clone(), user);
                rooms.insert(id.clone(), room.clone());
                Ok(room)
            }
            .await;
            match created {
                Err(e) => session.try_send(ServerCommand::CreateRoom(Err(e.to_string()))),
                Ok(room) => {
                    user.monitor.store(false, Ordering::Relaxed);
                    user.set_room(room.clone()).await;
                    tracing::info!(room_id = %room.id, host = user.id, "room created");
                    session.try_send(ServerCommand::CreateRoom(Ok(())));
                    room.send(Message::CreateRoom { user: user.id }).await;
                    state.events.room_created(&room.id, user.id);
                }
            }
        }

        ClientCommand::JoinRoom { id, monitor } => {
            let joined = async {
                let room = state
                    .rooms
                    .read()
                    .await
                    .get(&id)
                    .cloned()
                    .ok_or(RoomError::NoSuchRoom)?;
                if monitor && !state.config.can_monitor(user.id) {
                    return Err(RoomError::CannotMonitor);
                }
                if user.room().await.is_some() {
                    return Err(RoomError::AlreadyInRoom);
                }
                // Rejection precedence: global ban, room ban, locked, full.
                if state.bans.is_banned(user.id) || state.bans.is_room_banned(user.id, &room.id) {
                    return Err(RoomError::Banned);
                }
                if !monitor && room.is_locked() {
                    return Err(RoomError::Locked);
                }
                room.add_user(user, monitor).await?;
                Ok(room)
            }
            .await;
            match joined {
                Err(e) => session.try_send(ServerCommand::JoinRoom(Err(e.to_string()))),
                Ok(room) => {
                    user.monitor.store(monitor, Ordering::Relaxed);
                    user.set_room(room.clone()).await;
                    tracing::info!(room_id = %room.id, user_id = user.id, monitor, "user joined room");
                    let response = room.join_response().await;
                    session.try_send(ServerCommand::JoinRoom(Ok(response)));
                    room.broadcast(ServerCommand::OnJoinRoom(user.to_info())).await;
                    room.send(Message::JoinRoom {
                        user: user.id,
                        name: user.name.clone(),
                    })
                    .await;
                    state.events.user_joined_room(user.id, &room.id);
                }
            }
        }

        ClientCommand::LeaveRoom => match room_of(user).await {
            Err(e) => session.try_send(ServerCommand::LeaveRoom(Err(e.to_string()))),
            Ok(room) => {
                session.try_send(ServerCommand::LeaveRoom(Ok(())));
                registry::leave_room(state, user, &room).await;
            }
        },

        ClientCommand::LockRoom { lock } => match hosted_room_of(user).await {
            Err(e) => session.try_send(ServerCommand::LockRoom(Err(e.to_string()))),
            Ok(room) => {
                room.set_locked(lock);
                session.try_send(ServerCommand::LockRoom(Ok(())));
                room.send(Message::LockRoom { lock }).await;
            }
        },

        ClientCommand::CycleRoom { cycle } => match hosted_room_of(user).await {
            Err(e) => session.try_send(ServerCommand::CycleRoom(Err(e.to_string()))),
            Ok(room) => {
                room.set_cycle(cycle);
                session.try_send(ServerCommand::CycleRoom(Ok(())));
                room.send(Message::CycleRoom { cycle }).await;
            }
        },

        ClientCommand::SelectChart { id } => {
            let room = async {
                let room = hosted_room_of(user).await?;
                if !room.is_select_chart().await {
                    return Err(RoomError::BadState);
                }
                Ok(room)
            }
            .await;
            match room {
                Err(e) => session.try_send(ServerCommand::SelectChart(Err(e.to_string()))),
                // No room mutation until the lookup has answered.
                Ok(room) => match state.lookup.chart(id).await {
                    Err(e) => session.try_send(ServerCommand::SelectChart(Err(e.to_string()))),
                    Ok(chart) => match room.set_chart(chart.clone()).await {
                        Err(e) => {
                            session.try_send(ServerCommand::SelectChart(Err(e.to_string())))
                        }
                        Ok(()) => {
                            session.try_send(ServerCommand::SelectChart(Ok(())));
                            room.send(Message::SelectChart {
                                user: user.id,
                                name: chart.name,
                                id,
                            })
                            .await;
                            room.announce_state().await;
                        }
                    },
                },
            }
        }

        ClientCommand::RequestStart => match hosted_room_of(user).await {
            Err(e) => session.try_send(ServerCommand::RequestStart(Err(e.to_string()))),
            Ok(room) => match room.request_start().await {
                Err(e) => session.try_send(ServerCommand::RequestStart(Err(e.to_string()))),
                Ok(()) => {
                    tracing::info!(room_id = %room.id, "game start requested");
                    session.try_send(ServerCommand::RequestStart(Ok(())));
                    room.send(Message::GameStart { user: user.id }).await;
                    room.announce_state().await;
                }
            },
        },

        ClientCommand::Ready => match room_of(user).await {
            Err(e) => session.try_send(ServerCommand::Ready(Err(e.to_string()))),
            Ok(room) => match room.mark_ready(user.id).await {
                Err(e) => session.try_send(ServerCommand::Ready(Err(e.to_string()))),
                Ok(()) => {
                    session.try_send(ServerCommand::Ready(Ok(())));
                    room.send(Message::Ready { user: user.id }).await;
                    room.check_all_ready().await;
                }
            },
        },

        ClientCommand::CancelReady => match room_of(user).await {
            Err(e) => session.try_send(ServerCommand::CancelReady(Err(e.to_string()))),
            Ok(room) => match room.cancel_ready(user.id).await {
                Err(e) => session.try_send(ServerCommand::CancelReady(Err(e.to_string()))),
                Ok(()) => {
                    session.try_send(ServerCommand::CancelReady(Ok(())));
                    room.send(Message::CancelReady { user: user.id }).await;
                }
            },
        },

        ClientCommand::Played { id } => {
            let room = async {
                let room = room_of(user).await?;
                if !room.is_playing().await {
                    return Err(RoomError::BadState);
                }
                let chart = room.chart().await.ok_or(RoomError::BadChart)?;
                if chart.id != id {
                    return Err(RoomError::BadChart);
                }
                Ok(room)
            }
            .await;
            match room {
                Err(e) => session.try_send(ServerCommand::Played(Err(e.to_string()))),
                // The record comes from the lookup; nothing is stored on
                // the room until it answers.
                Ok(room) => match state.lookup.record(id, user.id).await {
                    Err(e) => session.try_send(ServerCommand::Played(Err(e.to_string()))),
                    Ok(record) => match room.record_played(user.id, record.clone()).await {
                        Err(e) => session.try_send(ServerCommand::Played(Err(e.to_string()))),
                        Ok(()) => {
                            session.try_send(ServerCommand::Played(Ok(())));
                            room.send(Message::Played {
                                user: user.id,
                                score: record.score,
                                accuracy: record.accuracy,
                                full_combo: record.full_combo,
                            })
                            .await;
                            room.check_all_done().await;
                        }
                    },
                },
            }
        }

        ClientCommand::Abort => match room_of(user).await {
            Err(e) => session.try_send(ServerCommand::Abort(Err(e.to_string()))),
            Ok(room) => match room.mark_aborted(user.id).await {
                Err(e) => session.try_send(ServerCommand::Abort(Err(e.to_string()))),
                Ok(()) => {
                    session.try_send(ServerCommand::Abort(Ok(())));
                    room.send(Message::Abort { user: user.id }).await;
                    room.check_all_done().await;
                }
            },
        },
    }
    Ok(())
}

// =========================================================================
// Tests
// =========================================================================
