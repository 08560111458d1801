//! Observer driver — runs the state machine on a tokio task.
//!
//! Inputs are mutation batches from a `MutationSource`, the debounce deadline,
//! the periodic safety timer and control commands from `ObserverHandle`.
//! Captures run inline, so batches that arrive meanwhile queue up and are
//! debounced after the capture returns.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::capture::DocumentSource;
use crate::config::CaptureConfig;
use crate::extract;
use crate::observer::state::{Effect, ObserverEvent, ObserverState};

/// Element the observer listens under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchRoot {
    /// First element matching this selector.
    Selector(String),
    /// The whole document.
    Document,
}

/// First candidate selector present in the document, else the whole document.
pub fn locate_watch_root(html: &str, candidates: &[String]) -> WatchRoot {
    let document = Html::parse_document(html);
    candidates
        .iter()
        .find(|css| match extract::selector(css) {
            Ok(sel) => document.select(&sel).next().is_some(),
            Err(e) => {
                warn!(error = %e, "Skipping invalid watch-root selector");
                false
            }
        })
        .map(|css| WatchRoot::Selector(css.clone()))
        .unwrap_or(WatchRoot::Document)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    CharacterData,
    Attributes,
}

/// One observed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    /// Selector-ish description of the changed node, for logging.
    pub target: String,
}

impl MutationRecord {
    pub fn new(kind: MutationKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }
}

pub type MutationBatch = Vec<MutationRecord>;

/// What the subscription should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationFilter {
    pub child_list: bool,
    pub subtree: bool,
    pub character_data: bool,
    pub attributes: bool,
}

impl MutationFilter {
    /// Structure, text and attribute changes anywhere under the root.
    pub fn all() -> Self {
        Self {
            child_list: true,
            subtree: true,
            character_data: true,
            attributes: true,
        }
    }

    pub fn matches(&self, record: &MutationRecord) -> bool {
        match record.kind {
            MutationKind::ChildList => self.child_list,
            MutationKind::CharacterData => self.character_data,
            MutationKind::Attributes => self.attributes,
        }
    }
}

/// Delivers mutation batches for a watch root. Dropping the receiver ends the
/// subscription.
pub trait MutationSource: Send + Sync {
    fn subscribe(
        &self,
        root: &WatchRoot,
        filter: MutationFilter,
    ) -> mpsc::UnboundedReceiver<MutationBatch>;
}

/// Runs one extract-and-save attempt.
#[async_trait]
pub trait CaptureTrigger: Send + Sync {
    async fn capture(&self);
}

#[derive(Debug)]
enum Command {
    SetEnabled(bool),
    Rearm,
    Shutdown,
}

/// Cloneable sender of observer commands.
#[derive(Clone)]
pub struct ObserverControl {
    commands: mpsc::UnboundedSender<Command>,
}

impl ObserverControl {
    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetEnabled(enabled));
    }

    /// Resubscribe and cancel any pending debounce.
    pub fn rearm(&self) {
        let _ = self.commands.send(Command::Rearm);
    }
}

/// Owner of a running observer task.
pub struct ObserverHandle {
    control: ObserverControl,
    state: watch::Receiver<ObserverState>,
    task: JoinHandle<()>,
}

impl ObserverHandle {
    pub fn control(&self) -> ObserverControl {
        self.control.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.control.set_enabled(enabled);
    }

    pub fn rearm(&self) {
        self.control.rearm();
    }

    pub fn state(&self) -> ObserverState {
        *self.state.borrow()
    }

    /// Stop the driver and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.control.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Observer task ended abnormally");
        }
    }
}

/// Everything the driver needs besides its channels.
pub struct ObserverParts {
    pub document: Arc<dyn DocumentSource>,
    pub mutations: Arc<dyn MutationSource>,
    pub trigger: Arc<dyn CaptureTrigger>,
    /// Ordered watch-root candidates.
    pub watch_roots: Vec<String>,
}

/// Spawn the observer task. It arms immediately when `enabled`.
pub fn spawn_observer(parts: ObserverParts, config: &CaptureConfig, enabled: bool) -> ObserverHandle {
    let (commands, rx) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(ObserverState::Idle);

    let driver = Driver {
        parts,
        debounce: config.debounce,
        safety_interval: config.safety_interval,
        initial_capture_delay: config.initial_capture_delay,
        commands: rx,
        state_tx,
        state: ObserverState::Idle,
        subscription: None,
        safety: None,
        initial_capture: None,
    };
    let task = tokio::spawn(driver.run(enabled));

    ObserverHandle {
        control: ObserverControl { commands },
        state,
        task,
    }
}

enum Step {
    Event(ObserverEvent),
    InitialCapture,
    Batch(MutationBatch),
    SubscriptionClosed,
    Shutdown,
}

struct Driver {
    parts: ObserverParts,
    debounce: Duration,
    safety_interval: Duration,
    initial_capture_delay: Option<Duration>,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ObserverState>,
    state: ObserverState,
    subscription: Option<mpsc::UnboundedReceiver<MutationBatch>>,
    safety: Option<Interval>,
    initial_capture: Option<Instant>,
}

impl Driver {
    async fn run(mut self, enabled: bool) {
        debug!("Observer started");
        if enabled {
            self.apply(ObserverEvent::Enable).await;
        }

        loop {
            let step = tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::SetEnabled(true)) => Step::Event(ObserverEvent::Enable),
                    Some(Command::SetEnabled(false)) => Step::Event(ObserverEvent::Disable),
                    Some(Command::Rearm) => Step::Event(ObserverEvent::Rearm),
                    Some(Command::Shutdown) | None => Step::Shutdown,
                },
                batch = next_batch(&mut self.subscription) => match batch {
                    Some(batch) => Step::Batch(batch),
                    None => Step::SubscriptionClosed,
                },
                _ = sleep_until(self.state.deadline()) => Step::Event(ObserverEvent::DebounceElapsed),
                _ = tick(&mut self.safety) => Step::Event(ObserverEvent::SafetyTick),
                _ = sleep_until(self.initial_capture) => Step::InitialCapture,
            };

            match step {
                Step::Event(event) => self.apply(event).await,
                Step::InitialCapture => {
                    self.initial_capture = None;
                    debug!("Initial capture after arming");
                    self.apply(ObserverEvent::SafetyTick).await;
                }
                Step::Batch(batch) => {
                    let filter = MutationFilter::all();
                    if batch.iter().any(|r| filter.matches(r)) {
                        self.apply(ObserverEvent::Mutation).await;
                    }
                }
                Step::SubscriptionClosed => {
                    warn!("Mutation source closed; relying on the safety timer");
                    self.subscription = None;
                }
                Step::Shutdown => break,
            }
        }

        self.unsubscribe();
        self.set_state(ObserverState::Idle);
        debug!("Observer stopped");
    }

    async fn apply(&mut self, event: ObserverEvent) {
        let (next, effect) = self.state.next(event, Instant::now(), self.debounce);
        self.set_state(next);

        match effect {
            Some(Effect::Subscribe) => self.subscribe(),
            Some(Effect::Unsubscribe) => {
                self.unsubscribe();
                info!("Observer disabled");
            }
            Some(Effect::Capture) => {
                debug!(?event, "Capture triggered");
                self.parts.trigger.capture().await;
                let (next, _) =
                    self.state
                        .next(ObserverEvent::CaptureFinished, Instant::now(), self.debounce);
                self.set_state(next);
            }
            None => {}
        }
    }

    fn subscribe(&mut self) {
        let root = locate_watch_root(&self.parts.document.html(), &self.parts.watch_roots);
        self.subscription = Some(self.parts.mutations.subscribe(&root, MutationFilter::all()));

        // A zero period disables the safety timer.
        self.safety = (!self.safety_interval.is_zero()).then(|| {
            let mut safety = tokio::time::interval_at(
                Instant::now() + self.safety_interval,
                self.safety_interval,
            );
            safety.set_missed_tick_behavior(MissedTickBehavior::Delay);
            safety
        });

        self.initial_capture = self.initial_capture_delay.map(|d| Instant::now() + d);
        info!(root = ?root, "Observer armed");
    }

    fn unsubscribe(&mut self) {
        self.subscription = None;
        self.safety = None;
        self.initial_capture = None;
    }

    fn set_state(&mut self, state: ObserverState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

async fn next_batch(rx: &mut Option<mpsc::UnboundedReceiver<MutationBatch>>) -> Option<MutationBatch> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
