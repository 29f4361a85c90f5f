// SPDX-FileCopyrightText: 2026 PVRd Contributors
//
// SPDX-License-Identifier: BSD-2-Clause

//! JSON-over-TCP listener exposing the scheduler API surface.
//!
//! One newline-delimited JSON request per line, one newline-delimited
//! JSON [`ApiResponse`] per reply. The [`Scheduler`] already
//! synchronizes itself internally (an `Arc<Mutex<..>>`), so each
//! connection calls straight into it rather than routing through an
//! actor/mailbox indirection — there is no separate worker task to
//! bottleneck on.

use std::collections::HashSet;
use std::net::SocketAddr;

use chrono::{DateTime, Local};
use pvr_core::job::{JobTemplate, Mangling, RecurrenceType};
use pvr_core::scheduler::{DeleteScope, Scheduler};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use crate::transcode::TranscodePool;

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum ApiCommand {
    Add {
        title: String,
        filename: String,
        channel: String,
        ts_start: DateTime<Local>,
        ts_end: DateTime<Local>,
        #[serde(default)]
        device: Option<usize>,
        #[serde(default)]
        recurrence_type: RecurrenceType,
        #[serde(default)]
        recurrence_count: u32,
        #[serde(default = "default_start_number")]
        recurrence_start_number: u32,
        #[serde(default)]
        recurrence_mangling: Mangling,
        #[serde(default)]
        recurrence_mangling_prefix: String,
        #[serde(default)]
        transcoding_profiles: Vec<String>,
    },
    Delete {
        seq_nbr: u64,
        #[serde(default)]
        whole_series: bool,
    },
    UpdateProfile {
        seq_nbr: u64,
        profiles: Vec<String>,
    },
    List,
    Head {
        device: usize,
    },
    InFlight {
        device: usize,
    },
    NextScheduled,
    Abort {
        device: usize,
    },
    RefreshProfiles,
    KillAllTranscodes,
    History,
}

fn default_start_number() -> u32 {
    1
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ApiResponse {
    Ok,
    SeqNbrs { seq_nbrs: Vec<u64> },
    Jobs { jobs: Vec<pvr_core::job::Job> },
    Job { job: Option<pvr_core::job::Job> },
    History { entries: Vec<pvr_core::history::HistoryRecord> },
    Error { error: String },
}

pub struct ListenerContext {
    pub scheduler: Scheduler,
    pub transcode_pool: TranscodePool,
    pub profile_dir: std::path::PathBuf,
    pub auth_tokens: HashSet<String>,
}

pub async fn run_listener(addr: SocketAddr, ctx: std::sync::Arc<ListenerContext>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Scheduler API listening on {}", addr);

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Client connected: {}", peer);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, peer, ctx).await {
                error!("Client {} error: {:?}", peer, e);
            }
        });
    }
}

async fn handle_client(
    socket: TcpStream,
    addr: SocketAddr,
    ctx: std::sync::Arc<ListenerContext>,
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut authenticated = ctx.auth_tokens.is_empty();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            info!("Client {} disconnected", addr);
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if !authenticated {
            match authenticate(trimmed, &ctx.auth_tokens) {
                Ok(()) => {
                    authenticated = true;
                    send(&mut writer, &ApiResponse::Ok).await?;
                    continue;
                }
                Err(e) => {
                    send(&mut writer, &ApiResponse::Error { error: e }).await?;
                    continue;
                }
            }
        }

        let response = match serde_json::from_str::<ApiCommand>(trimmed) {
            Ok(cmd) => dispatch(cmd, &ctx).await,
            Err(e) => ApiResponse::Error {
                error: format!("invalid request: {e}"),
            },
        };
        send(&mut writer, &response).await?;
    }

    Ok(())
}

async fn send(
    writer: &mut (impl AsyncWriteExt + Unpin),
    response: &ApiResponse,
) -> std::io::Result<()> {
    let line = serde_json::to_string(response)? + "\n";
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

fn authenticate(line: &str, tokens: &HashSet<String>) -> Result<(), String> {
    #[derive(Deserialize)]
    struct Auth {
        token: String,
    }
    let auth: Auth =
        serde_json::from_str(line).map_err(|_| "expected {\"token\": \"...\"} as the first line".to_string())?;
    if tokens.contains(&auth.token) {
        Ok(())
    } else {
        Err("invalid authorization token".into())
    }
}

async fn dispatch(cmd: ApiCommand, ctx: &ListenerContext) -> ApiResponse {
    match cmd {
        ApiCommand::Add {
            title,
            filename,
            channel,
            ts_start,
            ts_end,
            device,
            recurrence_type,
            recurrence_count,
            recurrence_start_number,
            recurrence_mangling,
            recurrence_mangling_prefix,
            transcoding_profiles,
        } => {
            let template = JobTemplate {
                title,
                filename,
                channel,
                ts_start,
                ts_end,
                recurrence_type,
                recurrence_count,
                recurrence_start_number,
                recurrence_mangling,
                recurrence_mangling_prefix,
                transcoding_profiles,
            };
            match ctx
                .scheduler
                .insert(template, device, pvr_core::time::now())
                .await
            {
                Ok(seq_nbrs) => ApiResponse::SeqNbrs { seq_nbrs },
                Err(e) => ApiResponse::Error { error: e.to_string() },
            }
        }
        ApiCommand::Delete { seq_nbr, whole_series } => {
            let scope = if whole_series {
                DeleteScope::WholeSeries
            } else {
                DeleteScope::ThisOnly
            };
            match ctx.scheduler.delete(seq_nbr, scope).await {
                Ok(()) => ApiResponse::Ok,
                Err(e) => ApiResponse::Error { error: e.to_string() },
            }
        }
        ApiCommand::UpdateProfile { seq_nbr, profiles } => {
            match ctx.scheduler.update_profile(seq_nbr, profiles).await {
                Ok(()) => ApiResponse::Ok,
                Err(e) => ApiResponse::Error { error: e.to_string() },
            }
        }
        ApiCommand::List => ApiResponse::Jobs { jobs: ctx.scheduler.list().await },
        ApiCommand::Head { device } => ApiResponse::Job { job: ctx.scheduler.head(device).await },
        ApiCommand::InFlight { device } => ApiResponse::Job { job: ctx.scheduler.in_flight(device).await },
        ApiCommand::NextScheduled => ApiResponse::Job { job: ctx.scheduler.next_scheduled().await },
        ApiCommand::Abort { device } => {
            ctx.scheduler.request_abort(device);
            ApiResponse::Ok
        }
        ApiCommand::RefreshProfiles => match ctx.scheduler.refresh_profiles(&ctx.profile_dir).await {
            Ok(()) => ApiResponse::Ok,
            Err(e) => ApiResponse::Error { error: e.to_string() },
        },
        ApiCommand::KillAllTranscodes => {
            ctx.transcode_pool.kill_all(false).await;
            ApiResponse::Ok
        }
        ApiCommand::History => ApiResponse::History { entries: ctx.scheduler.history().await },
    }
}
