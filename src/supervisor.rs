//! Drives the engine: signal ingest, maintenance, amendment, and heartbeat
//! ticks plus the push-stream pump. The engine lives in this single task, so
//! every ledger mutation is serialized here; the pump only sends events in.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::{
    select,
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{Instant, interval, sleep},
};
use tracing::{error, info, warn};

use crate::{
    bybit::PrivateStream,
    discord::{ChatError, DiscordClient, MessageSource},
    engine::{Admission, TradeEngine},
    parser,
    venue::{StreamEvent, Venue},
};

const HEARTBEAT_SECS: u64 = 60;
const INGEST_PAGE_LIMIT: usize = 50;

const RECONNECT_MIN_DELAY: Duration = Duration::from_millis(250);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
/// A connection that held this long was healthy; the next drop starts the
/// delay ladder over instead of escalating it.
const STABLE_CONNECTION: Duration = Duration::from_secs(120);

/// Reconnects the private stream forever, doubling the delay on repeated
/// failures. The engine sees each reconnect as a `Resubscribed` event and
/// re-reconciles; the pump stops once the engine side of the channel is gone.
pub fn spawn_stream_pump(
    api_key: String,
    secret: String,
    url: String,
    ev_tx: UnboundedSender<StreamEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay = RECONNECT_MIN_DELAY;
        loop {
            let connected_at = Instant::now();
            let stream = PrivateStream::new(api_key.clone(), secret.clone(), ev_tx.clone());
            match stream.connect(&url).await {
                Ok(()) => return,
                Err(error) => error!(?error, "private stream disconnected; reconnecting"),
            }
            if ev_tx.is_closed() {
                return;
            }
            if connected_at.elapsed() > STABLE_CONNECTION {
                delay = RECONNECT_MIN_DELAY;
            }
            sleep(delay).await;
            delay = (delay * 2).min(RECONNECT_MAX_DELAY);
        }
    })
}

pub async fn run<V: Venue, M: MessageSource>(
    mut engine: TradeEngine<V, M>,
    chat: DiscordClient,
    mut stream_rx: UnboundedReceiver<StreamEvent>,
) -> anyhow::Result<()> {
    let poll_seconds = engine.config().poll_seconds.max(1);
    let poll_jitter_max = engine.config().poll_jitter_max;
    let mut maintenance = interval(Duration::from_secs(poll_seconds));
    let mut amendments = interval(Duration::from_secs(
        engine.config().signal_update_interval_sec.max(1),
    ));
    let mut heartbeat = interval(Duration::from_secs(HEARTBEAT_SECS));
    let mut ingest = Box::pin(sleep(Duration::ZERO));
    let mut stream_open = true;

    info!("supervisor started");
    loop {
        select! {
            () = &mut ingest => {
                if let Err(error) = ingest_signals(&mut engine, &chat).await {
                    warn!(?error, "signal ingest failed");
                }
                engine.persist();
                let jitter = rand::rng().random_range(0..=poll_jitter_max);
                ingest
                    .as_mut()
                    .reset(Instant::now() + Duration::from_secs(poll_seconds + jitter));
            }
            _ = maintenance.tick() => {
                engine.run_maintenance(Utc::now().timestamp()).await;
                engine.persist();
            }
            _ = amendments.tick() => {
                engine.check_signal_updates(Utc::now().timestamp()).await;
                engine.persist();
            }
            _ = heartbeat.tick() => {
                engine.heartbeat(Utc::now().timestamp());
            }
            event = stream_rx.recv(), if stream_open => {
                match event {
                    Some(event) => {
                        engine.on_stream_event(event, Utc::now().timestamp()).await;
                        engine.persist();
                    }
                    None => {
                        warn!("stream pump channel closed; continuing on polling alone");
                        stream_open = false;
                    }
                }
            }
        }
    }
}

/// Pages new channel messages past the cursor and feeds parseable ones to
/// the engine. The cursor advances over every message, parseable or not.
async fn ingest_signals<V: Venue, M: MessageSource>(
    engine: &mut TradeEngine<V, M>,
    chat: &DiscordClient,
) -> Result<(), ChatError> {
    let last_seen = engine.last_seen_msg_id().map(str::to_string);
    let messages = chat
        .fetch_after(last_seen.as_deref(), INGEST_PAGE_LIMIT)
        .await?;
    if messages.is_empty() {
        return Ok(());
    }

    let quote = engine.config().quote.clone();
    let now = Utc::now().timestamp();
    for message in messages {
        let text = message.extract_text();
        if let Some(intent) = parser::parse(&text, &quote, &message.id) {
            let status = parser::classify_status(&text);
            match engine
                .handle_signal(&intent, status, message.timestamp_unix(), now)
                .await
            {
                Ok(Admission::Placed { trade_id }) => {
                    info!(symbol = %intent.symbol(), %trade_id, "signal accepted");
                }
                Ok(Admission::Rejected(reason)) => {
                    info!(symbol = %intent.symbol(), %reason, "signal rejected");
                }
                Err(error) => {
                    warn!(symbol = %intent.symbol(), ?error, "signal admission failed");
                }
            }
        }
        engine.set_last_seen_msg_id(&message.id);
    }
    Ok(())
}
