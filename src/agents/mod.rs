//! One independently scheduled polling loop per metric.
//!
//! Each [`Agent`] computes, publishes, sleeps and repeats forever. A failed
//! cycle is logged and swallowed, so the last good status stays on display
//! until the next success.

use crate::config::Settings;
use crate::error::{Error, MAX_TEXT_LEN, Result, truncate};
use crate::feeds::FeedClient;
use crate::metrics::{self, MetricSource};
use crate::rpc::ContractCaller;
use crate::types::{ActivityKind, AgentConfig, Metric};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The display client an agent writes to.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn add_status(&self, kind: ActivityKind, text: &str) -> Result<()>;
    async fn update_status(&self, kind: ActivityKind, text: &str) -> Result<()>;
    async fn set_nickname(&self, group_id: &str, nickname: &str) -> Result<()>;
}

/// Most recent distinct statuses kept in a publisher's rotation.
pub const ROTATION_CAP: usize = 8;

/// In-process display: keeps a bounded status rotation and logs every change.
pub struct TracingPublisher {
    agent: String,
    rotation: Mutex<VecDeque<(ActivityKind, String)>>,
    current: Mutex<Option<(ActivityKind, String)>>,
}

impl TracingPublisher {
    pub fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            rotation: Mutex::new(VecDeque::with_capacity(ROTATION_CAP)),
            current: Mutex::new(None),
        }
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Publish("status state lock poisoned".to_string())
}

#[async_trait]
impl StatusPublisher for TracingPublisher {
    async fn add_status(&self, kind: ActivityKind, text: &str) -> Result<()> {
        let mut rotation = self.rotation.lock().map_err(poisoned)?;
        let entry = (kind, text.to_string());
        if rotation.contains(&entry) {
            return Ok(());
        }
        if rotation.len() == ROTATION_CAP {
            rotation.pop_front();
        }
        rotation.push_back(entry);
        debug!(agent = %self.agent, statuses = rotation.len(), "status added to rotation");
        Ok(())
    }

    async fn update_status(&self, kind: ActivityKind, text: &str) -> Result<()> {
        *self.current.lock().map_err(poisoned)? = Some((kind, text.to_string()));
        info!(agent = %self.agent, ?kind, status = %text, "status updated");
        Ok(())
    }

    async fn set_nickname(&self, group_id: &str, nickname: &str) -> Result<()> {
        info!(agent = %self.agent, group = %group_id, %nickname, "nickname set");
        Ok(())
    }
}

pub struct Agent {
    name: String,
    interval: Duration,
    activity: ActivityKind,
    group_ids: Vec<String>,
    source: Box<dyn MetricSource>,
    publisher: Arc<dyn StatusPublisher>,
}

impl Agent {
    pub fn new(
        name: &str,
        interval: Duration,
        activity: ActivityKind,
        group_ids: Vec<String>,
        source: Box<dyn MetricSource>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            name: name.to_string(),
            interval,
            activity,
            group_ids,
            source,
            publisher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nickname on every group (when labelled), then status add + update.
    async fn publish(&self, metric: &Metric) -> Result<()> {
        let status = truncate(&metric.value, MAX_TEXT_LEN);
        if let Some(label) = &metric.label {
            for group in &self.group_ids {
                self.publisher.set_nickname(group, label).await?;
            }
        }
        self.publisher.add_status(self.activity, &status).await?;
        self.publisher.update_status(self.activity, &status).await
    }

    /// Compute then publish once. Nothing is published if computing fails.
    pub async fn run_cycle(&self) -> Result<Metric> {
        let metric = self.source.compute().await?;
        self.publish(&metric).await?;
        Ok(metric)
    }

    /// Poll forever at the fixed interval. Neither errors nor panics inside a
    /// cycle end the loop.
    pub async fn run(self) {
        info!(agent = %self.name, interval_secs = self.interval.as_secs(), "agent started");
        loop {
            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(Ok(metric)) => debug!(
                    agent = %self.name,
                    value = %metric.value,
                    computed_at = %metric.computed_at.to_rfc3339(),
                    "cycle published"
                ),
                Ok(Err(e)) => warn!(agent = %self.name, error = %truncate(&e.to_string(), MAX_TEXT_LEN), "cycle failed"),
                Err(panic) => error!(agent = %self.name, reason = %truncate(&panic_message(&*panic), MAX_TEXT_LEN), "cycle panicked"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Per-agent display credentials, read from the env var named in its config.
fn credentials(config: &AgentConfig, lookup: &dyn Fn(&str) -> Option<String>) -> Result<String> {
    lookup(&config.key_env)
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            Error::Configuration(format!("agent {}: `{}` is not set", config.name, config.key_env))
        })
}

/// Construct every agent that can start. A configuration error skips only
/// the agent it belongs to.
pub fn build_agents(
    configs: Vec<(String, Result<AgentConfig>)>,
    settings: Arc<Settings>,
    caller: Arc<dyn ContractCaller>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Vec<Agent> {
    let feeds = FeedClient::new();
    let mut agents = Vec::new();

    for (name, config) in configs {
        let config = match config.and_then(|c| credentials(&c, lookup).map(|_| c)) {
            Ok(config) => config,
            Err(e) => {
                error!(agent = %name, error = %truncate(&e.to_string(), MAX_TEXT_LEN), "agent not started");
                continue;
            }
        };

        let source = metrics::source_for(&config, Arc::clone(&settings), Arc::clone(&caller), feeds.clone());
        let publisher: Arc<dyn StatusPublisher> = Arc::new(TracingPublisher::new(&config.name));
        agents.push(Agent::new(
            &config.name,
            config.interval,
            config.activity,
            settings.group_ids.clone(),
            source,
            publisher,
        ));
    }

    agents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quoters::tests::MockChain;
    use crate::types::MetricConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails on the cycles listed in `fail_on`, succeeds otherwise.
    struct ScriptedSource {
        calls: Arc<AtomicUsize>,
        fail_on: Vec<usize>,
        panic_on: Vec<usize>,
        value: String,
    }

    #[async_trait]
    impl MetricSource for ScriptedSource {
        async fn compute(&self) -> Result<Metric> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on.contains(&n) {
                panic!("attempt to divide by zero");
            }
            if self.fail_on.contains(&n) {
                return Err(Error::quote("network read failed for polygon"));
            }
            Ok(Metric::new(Some("TVL".to_string()), format!("{}{n}", self.value)))
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        statuses: Mutex<Vec<String>>,
        nicknames: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl StatusPublisher for RecordingPublisher {
        async fn add_status(&self, _kind: ActivityKind, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn update_status(&self, _kind: ActivityKind, text: &str) -> Result<()> {
            if self.fail {
                return Err(Error::Publish("gateway closed".to_string()));
            }
            self.statuses.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn set_nickname(&self, group_id: &str, nickname: &str) -> Result<()> {
            self.nicknames
                .lock()
                .unwrap()
                .push((group_id.to_string(), nickname.to_string()));
            Ok(())
        }
    }

    fn agent(source: ScriptedSource, publisher: Arc<RecordingPublisher>, groups: &[&str]) -> Agent {
        Agent::new(
            "tvl",
            Duration::from_secs(60),
            ActivityKind::Watching,
            groups.iter().map(|g| g.to_string()).collect(),
            Box::new(source),
            publisher,
        )
    }

    #[tokio::test]
    async fn test_long_status_published_truncated() {
        let publisher = Arc::new(RecordingPublisher::default());
        let source = ScriptedSource {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_on: vec![],
            panic_on: vec![],
            value: "x".repeat(200),
        };
        agent(source, publisher.clone(), &["g1", "g2"]).run_cycle().await.unwrap();

        let statuses = publisher.statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0], "x".repeat(128));
        let nicknames = publisher.nicknames.lock().unwrap();
        assert_eq!(nicknames.len(), 2);
        assert_eq!(nicknames[1], ("g2".to_string(), "TVL".to_string()));
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let source = ScriptedSource {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_on: vec![],
            panic_on: vec![],
            value: "$1".to_string(),
        };
        let err = agent(source, publisher, &[]).run_cycle().await.unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_keeps_agent_alive_and_status_stale() {
        let calls = Arc::new(AtomicUsize::new(0));
        let publisher = Arc::new(RecordingPublisher::default());
        let source = ScriptedSource {
            calls: calls.clone(),
            fail_on: vec![1],
            panic_on: vec![],
            value: "$".to_string(),
        };
        let handle = agent(source, publisher.clone(), &[]).spawn();

        // cycles start at t = 0, 60, 120, 180
        tokio::time::sleep(Duration::from_secs(190)).await;
        handle.abort();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let statuses = publisher.statuses.lock().unwrap();
        assert_eq!(*statuses, vec!["$0", "$2", "$3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_cycle_keeps_agent_alive() {
        let calls = Arc::new(AtomicUsize::new(0));
        let publisher = Arc::new(RecordingPublisher::default());
        let source = ScriptedSource {
            calls: calls.clone(),
            fail_on: vec![],
            panic_on: vec![0],
            value: "$".to_string(),
        };
        let handle = agent(source, publisher.clone(), &[]).spawn();

        // cycles start at t = 0, 60, 120, 180, 240
        tokio::time::sleep(Duration::from_secs(290)).await;
        assert!(!handle.is_finished());
        handle.abort();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let statuses = publisher.statuses.lock().unwrap();
        assert_eq!(*statuses, vec!["$1", "$2", "$3", "$4"]);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }

    #[tokio::test]
    async fn test_tracing_publisher_rotation() {
        let publisher = TracingPublisher::new("price");
        publisher.add_status(ActivityKind::Watching, "a").await.unwrap();
        publisher.add_status(ActivityKind::Watching, "a").await.unwrap();
        publisher.add_status(ActivityKind::Watching, "b").await.unwrap();
        publisher.update_status(ActivityKind::Watching, "b").await.unwrap();
        assert_eq!(publisher.rotation.lock().unwrap().len(), 2);
        assert_eq!(
            *publisher.current.lock().unwrap(),
            Some((ActivityKind::Watching, "b".to_string()))
        );
    }

    #[tokio::test]
    async fn test_rotation_stays_bounded() {
        let publisher = TracingPublisher::new("tvl");
        for i in 0..1000 {
            publisher.add_status(ActivityKind::Watching, &format!("${i}")).await.unwrap();
        }
        let rotation = publisher.rotation.lock().unwrap();
        assert_eq!(rotation.len(), ROTATION_CAP);
        assert_eq!(rotation.back().map(|(_, text)| text.as_str()), Some("$999"));
        assert_eq!(rotation.front().map(|(_, text)| text.as_str()), Some("$992"));
    }

    #[test]
    fn test_build_agents_skips_only_misconfigured() {
        let ok = |name: &str, key_env: &str| AgentConfig {
            name: name.to_string(),
            interval: Duration::from_secs(60),
            key_env: key_env.to_string(),
            label: None,
            activity: ActivityKind::Watching,
            metric: MetricConfig::CirculatingSupply {
                feed_url: "https://feed.example/supply".to_string(),
                pointer: String::new(),
            },
        };
        let configs = vec![
            ("supply".to_string(), Ok(ok("supply", "SUPPLY_KEY"))),
            ("no-key".to_string(), Ok(ok("no-key", "MISSING_KEY"))),
            ("broken".to_string(), Err(Error::Configuration("bad address".to_string()))),
        ];
        let lookup = |key: &str| (key == "SUPPLY_KEY").then(|| "token".to_string());

        let agents = build_agents(
            configs,
            Arc::new(Settings::default()),
            Arc::new(MockChain::new()),
            &lookup,
        );
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name(), "supply");
    }
}
