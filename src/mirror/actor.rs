//! The Mirror's connection lifecycle and host-facing handle (spec §4.4,
//! §5, §6).
//!
//! One task owns `MirrorState` and `PubSub` outright and drives a single
//! `tokio::select!` loop, matching `uplink::UplinkSession`'s
//! connect/stream-loop shape but generalized to the phase machine and
//! reconnect-with-backoff this stream requires. Host-facing operations
//! (`subscribe`, `poll`, `is_leader`) cross into the actor over an mpsc
//! command channel rather than a shared mutex, since the spec treats them
//! as just another message source on the one inbox.

use crate::config::MirrorConfig;
use crate::error::{MirrorError, PubSubError};
use crate::events::apply_event;
use crate::framing::FrameDecoder;
use crate::mirror::state::{MirrorState, Phase};
use crate::metrics::Metrics;
use crate::pubsub::{PubSub, Subscription};
use dns_mirror_proto::MirrorMessage;
use futures_util::StreamExt;
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

enum Command {
    Subscribe {
        id: String,
        reply: oneshot::Sender<Result<Subscription, PubSubError>>,
    },
    Unsubscribe {
        id: String,
    },
    Poll {
        reply: oneshot::Sender<MirrorMessage>,
    },
}

/// Handle given to the host process; cheap to clone, every call is a
/// message send across the actor's inbox.
#[derive(Clone)]
pub struct MirrorHandle {
    tx: mpsc::Sender<Command>,
    metrics: Arc<Metrics>,
}

impl MirrorHandle {
    pub async fn subscribe(&self, id: impl Into<String>) -> Result<Subscription, MirrorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Subscribe { id: id.into(), reply })
            .await
            .map_err(|_| MirrorError::ActorGone)?;
        match tokio::time::timeout(Duration::from_millis(5000), rx).await {
            Ok(Ok(result)) => result.map_err(MirrorError::PubSub),
            _ => Err(MirrorError::ActorGone),
        }
    }

    pub async fn unsubscribe(&self, id: impl Into<String>) {
        let _ = self.tx.send(Command::Unsubscribe { id: id.into() }).await;
    }

    /// True iff a stream is currently established (any phase past `init`).
    pub fn is_leader(&self) -> bool {
        self.metrics.is_leader.load(Ordering::Relaxed)
    }

    /// One-shot pull of the current full snapshot, for callers that don't
    /// want to consume the subscription stream.
    pub async fn poll(&self) -> Result<MirrorMessage, MirrorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Poll { reply })
            .await
            .map_err(|_| MirrorError::ActorGone)?;
        rx.await.map_err(|_| MirrorError::ActorGone)
    }
}

/// Spawns the Mirror actor and returns a handle to it.
pub fn spawn(config: MirrorConfig, metrics: Arc<Metrics>) -> MirrorHandle {
    let (tx, rx) = mpsc::channel(64);
    let handle = MirrorHandle { tx, metrics: metrics.clone() };
    tokio::spawn(run(config, rx, metrics));
    handle
}

async fn run(config: MirrorConfig, mut commands: mpsc::Receiver<Command>, metrics: Arc<Metrics>) {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("building http client");

    let mut state = MirrorState::new();
    let mut pubsub = PubSub::new();
    let mut backoff = config.reconnect_timeout;

    loop {
        metrics.set_leader(false);
        state.reset();

        let subscribe_result = subscribe_once(&client, &config.master_url).await;
        let mut body = match subscribe_result {
            Ok(body) => {
                backoff = config.reconnect_timeout;
                metrics.set_leader(true);
                body
            }
            Err(ConnectOutcome::NotLeader) => {
                debug!("not leader (307), retrying after backoff");
                sleep_with_jitter(backoff, config.reconnect_max_timeout, &mut commands).await;
                backoff = next_backoff(backoff, config.reconnect_max_timeout);
                continue;
            }
            Err(ConnectOutcome::Error(e)) => {
                metrics.record_failure();
                warn!(error = %e, "subscribe failed, retrying after backoff");
                sleep_with_jitter(backoff, config.reconnect_max_timeout, &mut commands).await;
                backoff = next_backoff(backoff, config.reconnect_max_timeout);
                continue;
            }
        };

        let mut decoder = FrameDecoder::new();
        let mut phase = Phase::Init;
        let mut heartbeat_interval = Duration::from_secs(15);
        let mut watchdog = Box::pin(tokio::time::sleep(heartbeat_interval * 3));
        let mut agents_timer: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;
        let mut tasks_timer: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;

        'stream: loop {
            let agents_fire = optional_timer(&mut agents_timer);
            let tasks_fire = optional_timer(&mut tasks_timer);

            tokio::select! {
                chunk = body.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            metrics.record_bytes(bytes.len() as u64);
                            decoder.feed(&bytes);
                            match decoder.drain() {
                                Ok(events) => {
                                    for raw in events {
                                        metrics.record_message();
                                        let outcome = apply_event(&mut state, &raw).await;
                                        if let Some(interval) = outcome.heartbeat_interval {
                                            heartbeat_interval = interval;
                                        }
                                        watchdog.as_mut().reset(
                                            tokio::time::Instant::now() + heartbeat_interval * 3,
                                        );
                                        if outcome.is_subscribed {
                                            phase = advance_from_init(&state, &mut agents_timer, &config);
                                        }
                                        for msg in outcome.messages {
                                            if phase == Phase::Serve {
                                                let started = tokio::time::Instant::now();
                                                pubsub.publish(msg, heartbeat_interval / 3).await;
                                                metrics.record_pubsub_duration(started.elapsed());
                                            }
                                        }
                                    }
                                }
                                Err(e) => {
                                    error!(error = %e, "frame decode failed, tearing down connection");
                                    metrics.record_failure();
                                    break 'stream;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "stream transport error");
                            metrics.record_failure();
                            break 'stream;
                        }
                        None => {
                            info!("operator stream closed");
                            break 'stream;
                        }
                    }
                }
                () = &mut watchdog => {
                    warn!("heartbeat watchdog expired, resetting connection");
                    metrics.record_failure();
                    break 'stream;
                }
                () = agents_fire => {
                    agents_timer = None;
                    phase = Phase::AwaitTasks;
                    tasks_timer = Some(Box::pin(tokio::time::sleep(config.tasks_readiness_timeout)));
                }
                () = tasks_fire => {
                    tasks_timer = None;
                    phase = Phase::Serve;
                    let started = tokio::time::Instant::now();
                    pubsub.publish(state.full_snapshot(), heartbeat_interval / 3).await;
                    metrics.record_pubsub_duration(started.elapsed());
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Subscribe { id, reply }) => {
                            let _ = reply.send(pubsub.subscribe(id));
                        }
                        Some(Command::Unsubscribe { id }) => pubsub.unsubscribe(&id),
                        Some(Command::Poll { reply }) => {
                            let _ = reply.send(state.full_snapshot());
                        }
                        None => return,
                    }
                }
            }

            metrics.set_gauges(
                state.agents_total() as u64,
                state.frameworks_total() as u64,
                state.tasks_total() as u64,
                state.waiting_tasks_total() as u64,
            );

            if matches!(phase, Phase::AwaitAgents) && state.recovered_agents.is_empty() {
                phase = Phase::AwaitTasks;
                agents_timer = None;
                tasks_timer = Some(Box::pin(tokio::time::sleep(config.tasks_readiness_timeout)));
            }
        }

        metrics.set_leader(false);
        let started = tokio::time::Instant::now();
        pubsub.publish(MirrorMessage::Eos, heartbeat_interval / 3).await;
        metrics.record_pubsub_duration(started.elapsed());
        sleep_with_jitter(backoff, config.reconnect_max_timeout, &mut commands).await;
        backoff = next_backoff(backoff, config.reconnect_max_timeout);
    }
}

/// Entry into `await_agents` on the first update after SUBSCRIBED. The
/// timer is only armed when there is actually something to wait for; an
/// already-empty `recovered_agents` falls straight through on the very
/// next check at the bottom of the stream loop.
fn advance_from_init(
    state: &MirrorState,
    agents_timer: &mut Option<std::pin::Pin<Box<tokio::time::Sleep>>>,
    config: &MirrorConfig,
) -> Phase {
    if !state.recovered_agents.is_empty() {
        *agents_timer = Some(Box::pin(tokio::time::sleep(config.agents_readiness_timeout)));
    }
    Phase::AwaitAgents
}

fn optional_timer(
    timer: &mut Option<std::pin::Pin<Box<tokio::time::Sleep>>>,
) -> impl std::future::Future<Output = ()> + '_ {
    async move {
        match timer.as_mut() {
            Some(t) => t.await,
            None => std::future::pending().await,
        }
    }
}

enum ConnectOutcome {
    NotLeader,
    Error(String),
}

type ByteStream = std::pin::Pin<Box<dyn futures_util::Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

async fn subscribe_once(client: &reqwest::Client, master_url: &str) -> Result<ByteStream, ConnectOutcome> {
    use futures_util::TryStreamExt;

    let response = client
        .post(format!("{master_url}/api/v1"))
        .json(&serde_json::json!({"type": "SUBSCRIBE"}))
        .send()
        .await
        .map_err(|e| ConnectOutcome::Error(e.to_string()))?;

    if response.status().as_u16() == 307 {
        return Err(ConnectOutcome::NotLeader);
    }
    if !response.status().is_success() {
        return Err(ConnectOutcome::Error(format!("unexpected status {}", response.status())));
    }

    Ok(Box::pin(response.bytes_stream().map_ok(|b| b.to_vec())))
}

async fn sleep_with_jitter(base: Duration, max: Duration, commands: &mut mpsc::Receiver<Command>) {
    let jittered = jittered_delay(base, max);
    let sleep = tokio::time::sleep(jittered);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return,
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Subscribe { reply, .. }) => {
                        let _ = reply.send(Err(PubSubError::NotFound("mirror reconnecting".to_owned())));
                    }
                    Some(Command::Unsubscribe { .. }) => {}
                    Some(Command::Poll { reply }) => {
                        let _ = reply.send(MirrorMessage::Tasks(Vec::new()));
                    }
                    None => return,
                }
            }
        }
    }
}

fn jittered_delay(base: Duration, max: Duration) -> Duration {
    let capped = base.min(max);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4 + 1);
    capped + Duration::from_millis(jitter_ms)
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}
