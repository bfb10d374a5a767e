use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{
    DASHBOARD_INTERVAL, MAX_LOG_HISTORY, SHUTDOWN_DEADLINE, SYSTEM_STATS_INTERVAL,
};
use crate::protocol::connection::DriverStation;
use crate::protocol::types::JoystickInput;
use crate::system_info::{SystemSampler, SystemStats};

/// Capacity of each subscriber's message queue. A subscriber that falls this
/// far behind is dropped.
const SUBSCRIBER_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Ansi,
    Html,
}

/// Messages delivered to fan-out subscribers, serialized as tagged JSON
/// envelopes with stable keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    StatusInit { data: Map<String, Value> },
    LogInit { data: Vec<String> },
    Log { line: String, format: LogFormat },
    Dashboard { data: Map<String, Value> },
    Status { table: String, key: String, value: Value },
    SystemStats { data: SystemStats },
}

/// Inbound messages from subscribers. Anything unrecognized is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    JoystickUpdate {
        #[serde(default)]
        joysticks: Vec<JoystickInput>,
    },
    #[serde(other)]
    Other,
}

struct FanoutShared {
    status: Mutex<Map<String, Value>>,
    log_lines: Mutex<VecDeque<String>>,
    subscribers: Mutex<Vec<mpsc::Sender<WsMessage>>>,
    stats: Mutex<SystemStats>,
    driver_station: Mutex<Option<Arc<DriverStation>>>,
}

/// Mirrors the remote key-value table into an in-memory status map and a
/// bounded log ring, and fans both out to subscribers.
///
/// The external key-value client pushes updates through the two listener
/// entry points; a periodic task rebroadcasts the dashboard snapshot every
/// 50ms and host statistics every 5s.
pub struct StatusFanout {
    shared: Arc<FanoutShared>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StatusFanout {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(FanoutShared {
                status: Mutex::new(Map::new()),
                log_lines: Mutex::new(VecDeque::with_capacity(MAX_LOG_HISTORY)),
                subscribers: Mutex::new(Vec::new()),
                stats: Mutex::new(SystemStats::default()),
                driver_station: Mutex::new(None),
            }),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Launches the periodic dashboard and system-stats broadcasters.
    pub fn start(&self) {
        self.shutdown.send_replace(false);
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(dashboard_loop(
            self.shared.clone(),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(system_stats_loop(
            self.shared.clone(),
            self.shutdown.subscribe(),
        )));
    }

    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_DEADLINE, task).await.is_err() {
                abort.abort();
            }
        }
    }

    /// Attaches the engine that `joystick_update` messages forward to.
    pub fn set_driver_station(&self, ds: Arc<DriverStation>) {
        *self.shared.driver_station.lock() = Some(ds);
    }

    /// Registers a subscriber. The receiver first gets the init bundle —
    /// current status map (if non-empty), log history (if non-empty), one
    /// system-stats snapshot — and then the live update stream.
    pub fn subscribe(&self) -> mpsc::Receiver<WsMessage> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);

        {
            let status = self.shared.status.lock();
            if !status.is_empty() {
                let _ = tx.try_send(WsMessage::StatusInit {
                    data: status.clone(),
                });
            }
        }
        {
            let log = self.shared.log_lines.lock();
            if !log.is_empty() {
                let _ = tx.try_send(WsMessage::LogInit {
                    data: log.iter().cloned().collect(),
                });
            }
        }

        let mut stats = self.shared.stats.lock().clone();
        let total = {
            let mut subs = self.shared.subscribers.lock();
            stats.connected_clients = subs.len() + 1;
            let _ = tx.try_send(WsMessage::SystemStats { data: stats });
            subs.push(tx);
            subs.len()
        };
        tracing::info!("fan-out client connected ({total} total)");
        rx
    }

    pub fn client_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    /// Entry listener for the remote log table. `latest` appends one line;
    /// `history` replaces the ring with the trailing lines of the blob.
    pub fn handle_log_entry(&self, key: &str, value: &str) {
        match key {
            "latest" => {
                {
                    let mut log = self.shared.log_lines.lock();
                    if log.len() == MAX_LOG_HISTORY {
                        log.pop_front();
                    }
                    log.push_back(value.to_string());
                }
                let format = if value.contains('<') {
                    LogFormat::Html
                } else {
                    LogFormat::Ansi
                };
                broadcast(
                    &self.shared,
                    &WsMessage::Log {
                        line: value.to_string(),
                        format,
                    },
                );
            }
            "history" => {
                let lines: Vec<String> = value
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                let tail: Vec<String> =
                    lines[lines.len().saturating_sub(MAX_LOG_HISTORY)..].to_vec();
                {
                    let mut log = self.shared.log_lines.lock();
                    log.clear();
                    log.extend(tail.iter().cloned());
                }
                broadcast(&self.shared, &WsMessage::LogInit { data: tail });
            }
            other => {
                tracing::debug!("ignoring log table key {other:?}");
            }
        }
    }

    /// Entry listener for the remote dashboard table. Emits the single-field
    /// delta followed by the full map; the periodic broadcaster coalesces
    /// further churn.
    pub fn handle_status_entry(&self, key: &str, value: Value) {
        let data = {
            let mut status = self.shared.status.lock();
            status.insert(key.to_string(), value.clone());
            status.clone()
        };
        broadcast(
            &self.shared,
            &WsMessage::Status {
                table: "Dashboard".to_string(),
                key: key.to_string(),
                value,
            },
        );
        broadcast(&self.shared, &WsMessage::Dashboard { data });
    }

    /// Handles a raw inbound message from a subscriber. Malformed JSON and
    /// unrecognized tags are ignored.
    pub fn handle_client_message(&self, text: &str) {
        let Ok(msg) = serde_json::from_str::<ClientMessage>(text) else {
            return;
        };
        match msg {
            ClientMessage::JoystickUpdate { joysticks } => {
                let ds = self.shared.driver_station.lock().clone();
                if let Some(ds) = ds {
                    tracing::debug!("forwarding {} joysticks to driver station", joysticks.len());
                    ds.update_joysticks(joysticks);
                }
            }
            ClientMessage::Other => {}
        }
    }

    /// Current contents of the log ring, oldest first.
    pub fn log_lines(&self) -> Vec<String> {
        self.shared.log_lines.lock().iter().cloned().collect()
    }

    /// Copy of the mirrored status map.
    pub fn status_map(&self) -> Map<String, Value> {
        self.shared.status.lock().clone()
    }
}

impl Default for StatusFanout {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends to every subscriber, dropping the ones that refuse the message.
fn broadcast(shared: &FanoutShared, msg: &WsMessage) {
    let senders: Vec<mpsc::Sender<WsMessage>> = shared.subscribers.lock().clone();
    let mut dead = Vec::new();
    for tx in &senders {
        if tx.try_send(msg.clone()).is_err() {
            dead.push(tx.clone());
        }
    }
    if !dead.is_empty() {
        let mut subs = shared.subscribers.lock();
        subs.retain(|tx| !dead.iter().any(|d| d.same_channel(tx)));
        tracing::debug!(
            "removed {} dead fan-out clients ({} remain)",
            dead.len(),
            subs.len()
        );
    }
}

/// Rebroadcasts the dashboard snapshot at a fixed period while non-empty,
/// coalescing any point updates that landed in between.
async fn dashboard_loop(shared: Arc<FanoutShared>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(DASHBOARD_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        let data = {
            let status = shared.status.lock();
            if status.is_empty() {
                continue;
            }
            status.clone()
        };
        broadcast(&shared, &WsMessage::Dashboard { data });
    }
}

async fn system_stats_loop(shared: Arc<FanoutShared>, mut shutdown: watch::Receiver<bool>) {
    let mut sampler = SystemSampler::new();
    // Delay the first sample a full period: sysinfo needs real elapsed time
    // between CPU refreshes, and an interval's first tick fires immediately.
    let mut interval = tokio::time::interval_at(
        Instant::now() + SYSTEM_STATS_INTERVAL,
        SYSTEM_STATS_INTERVAL,
    );
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        let mut stats = sampler.sample();
        stats.connected_clients = shared.subscribers.lock().len();
        *shared.stats.lock() = stats.clone();
        broadcast(&shared, &WsMessage::SystemStats { data: stats });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DsConfig;
    use serde_json::json;

    #[tokio::test]
    async fn init_bundle_arrives_in_order() {
        let fanout = StatusFanout::new();
        fanout.handle_status_entry("voltage", json!(12.3));
        fanout.handle_log_entry("latest", "robot code started");

        let mut rx = fanout.subscribe();
        match rx.recv().await.unwrap() {
            WsMessage::StatusInit { data } => assert_eq!(data["voltage"], json!(12.3)),
            other => panic!("expected status_init, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            WsMessage::LogInit { data } => assert_eq!(data, vec!["robot code started"]),
            other => panic!("expected log_init, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            WsMessage::SystemStats { data } => assert_eq!(data.connected_clients, 1),
            other => panic!("expected system_stats, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_tables_skip_their_init_messages() {
        let fanout = StatusFanout::new();
        let mut rx = fanout.subscribe();
        assert!(matches!(
            rx.recv().await.unwrap(),
            WsMessage::SystemStats { .. }
        ));
    }

    #[tokio::test]
    async fn status_update_emits_delta_then_dashboard() {
        let fanout = StatusFanout::new();
        let mut rx = fanout.subscribe();
        let _ = rx.recv().await.unwrap(); // system_stats init

        fanout.handle_status_entry("match_time", json!(135));
        match rx.recv().await.unwrap() {
            WsMessage::Status { table, key, value } => {
                assert_eq!(table, "Dashboard");
                assert_eq!(key, "match_time");
                assert_eq!(value, json!(135));
            }
            other => panic!("expected status delta, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            WsMessage::Dashboard { data } => assert_eq!(data["match_time"], json!(135)),
            other => panic!("expected dashboard, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn log_ring_is_bounded() {
        let fanout = StatusFanout::new();
        for i in 0..(MAX_LOG_HISTORY + 100) {
            fanout.handle_log_entry("latest", &format!("line {i}"));
        }
        let lines = fanout.log_lines();
        assert_eq!(lines.len(), MAX_LOG_HISTORY);
        assert_eq!(lines[0], "line 100");
        assert_eq!(lines[MAX_LOG_HISTORY - 1], format!("line {}", MAX_LOG_HISTORY + 99));
    }

    #[tokio::test]
    async fn history_replaces_the_ring() {
        let fanout = StatusFanout::new();
        fanout.handle_log_entry("latest", "old line");
        fanout.handle_log_entry("history", "one\ntwo\n\n  three  \n");
        assert_eq!(fanout.log_lines(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn html_lines_are_flagged() {
        let fanout = StatusFanout::new();
        let mut rx = fanout.subscribe();
        let _ = rx.recv().await.unwrap(); // system_stats init

        fanout.handle_log_entry("latest", "<b>fault</b>");
        match rx.recv().await.unwrap() {
            WsMessage::Log { format, .. } => assert_eq!(format, LogFormat::Html),
            other => panic!("expected log, got {other:?}"),
        }

        fanout.handle_log_entry("latest", "\x1b[31mfault\x1b[0m");
        match rx.recv().await.unwrap() {
            WsMessage::Log { format, .. } => assert_eq!(format, LogFormat::Ansi),
            other => panic!("expected log, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dead_subscribers_are_removed() {
        let fanout = StatusFanout::new();
        let rx = fanout.subscribe();
        assert_eq!(fanout.client_count(), 1);

        drop(rx);
        fanout.handle_status_entry("x", json!(1));
        assert_eq!(fanout.client_count(), 0);
    }

    #[tokio::test]
    async fn joystick_update_forwards_to_the_engine() {
        let fanout = StatusFanout::new();
        let ds = Arc::new(DriverStation::new(DsConfig::default()));
        fanout.set_driver_station(ds.clone());

        fanout.handle_client_message(
            r#"{"type":"joystick_update","joysticks":[{"axes":[0.5],"buttons":[true,false],"povs":[-1]}]}"#,
        );
        let sticks = ds.joysticks();
        assert_eq!(sticks.len(), 1);
        assert_eq!(sticks[0].axes, vec![0.5]);
        assert_eq!(sticks[0].buttons, vec![true, false]);
    }

    #[tokio::test]
    async fn unknown_client_messages_are_ignored() {
        let fanout = StatusFanout::new();
        fanout.handle_client_message(r#"{"type":"switch_log","source":"userprogram"}"#);
        fanout.handle_client_message("not json at all");
        fanout.handle_client_message(r#"{"no_type_key":true}"#);
    }

    #[test]
    fn messages_serialize_to_stable_envelopes() {
        let msg = WsMessage::Log {
            line: "hello".to_string(),
            format: LogFormat::Ansi,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "log", "line": "hello", "format": "ansi"})
        );

        let msg = WsMessage::Status {
            table: "Dashboard".to_string(),
            key: "mode".to_string(),
            value: json!("teleop"),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "status", "table": "Dashboard", "key": "mode", "value": "teleop"})
        );

        let msg = WsMessage::SystemStats {
            data: SystemStats::default(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "system_stats");
        assert_eq!(value["data"]["connected_clients"], 0);
    }
}
