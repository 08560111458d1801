//! Page capture session — extract, send to the background, stash on context loss.
//!
//! One `CaptureSession` per visited page. It replaces module-level state with
//! an explicit struct: platform, extractor, background client, recovery
//! manager and the last capture timestamp.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::background::BackgroundClient;
use crate::config::CaptureConfig;
use crate::error::{Error, ExtractionError, StoreError};
use crate::extract::Extractor;
use crate::identity::{self, Identity};
use crate::model::{Conversation, Platform};
use crate::observer::{
    CaptureTrigger, MutationSource, ObserverControl, ObserverHandle, ObserverParts, spawn_observer,
};
use crate::protocol::{Request, SettingUpdate};
use crate::recovery::RecoveryManager;

/// Current state of the page: its address and rendered markup.
pub trait DocumentSource: Send + Sync {
    fn url(&self) -> String;
    fn html(&self) -> String;
}

/// Result of one capture attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The background context stored it.
    Saved { id: String },
    /// The background context answered with an error; nothing was stashed.
    Rejected { id: String, error: String },
    /// The background context was unreachable; a fallback record was written.
    Stashed { id: String },
    /// Unreachable background and the stash failed too.
    Lost { id: String, error: StoreError },
    /// Nothing extractable yet; the next trigger retries.
    NoContent(ExtractionError),
}

pub struct CaptureSession {
    platform: Platform,
    document: Arc<dyn DocumentSource>,
    extractor: Extractor,
    client: BackgroundClient,
    recovery: RecoveryManager,
    last_timestamp: AtomicI64,
}

impl CaptureSession {
    /// Build a session for the page, picking the platform from its host.
    pub fn new(
        document: Arc<dyn DocumentSource>,
        client: BackgroundClient,
        recovery: RecoveryManager,
    ) -> Result<Self, ExtractionError> {
        let platform = identity::resolve(&document.url()).platform;
        let extractor = Extractor::for_platform(platform)?;
        Ok(Self {
            platform,
            document,
            extractor,
            client,
            recovery,
            last_timestamp: AtomicI64::new(0),
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Identity of whatever the page currently shows.
    pub fn identity(&self) -> Identity {
        identity::resolve_with_platform(&self.document.url(), self.platform)
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Extract the current page into a conversation.
    pub fn snapshot(&self) -> Result<Conversation, ExtractionError> {
        let url = self.document.url();
        let identity = identity::resolve_with_platform(&url, self.platform);
        let timestamp = self.next_timestamp();
        self.extractor
            .extract(&self.document.html(), &identity, &url, timestamp)
    }

    /// Extract and save once.
    pub async fn capture_once(&self) -> CaptureOutcome {
        let conversation = match self.snapshot() {
            Ok(conversation) => conversation,
            Err(e) => {
                debug!(platform = %self.platform, error = %e, "Nothing to capture yet");
                return CaptureOutcome::NoContent(e);
            }
        };
        let id = conversation.id.clone();

        match self
            .client
            .send(Request::SaveConversation {
                data: conversation.clone(),
            })
            .await
        {
            Ok(response) if response.success => {
                debug!(
                    conversation_id = %id,
                    messages = conversation.messages.len(),
                    "Conversation captured"
                );
                CaptureOutcome::Saved { id }
            }
            Ok(response) => {
                let error = response.error.unwrap_or_else(|| "unknown error".to_string());
                warn!(conversation_id = %id, error = %error, "Background rejected capture");
                CaptureOutcome::Rejected { id, error }
            }
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "Background unreachable, stashing");
                match self.recovery.stash(&conversation).await {
                    Ok(()) => CaptureOutcome::Stashed { id },
                    Err(error) => {
                        error!(conversation_id = %id, error = %error, "Stash failed; capture lost");
                        CaptureOutcome::Lost { id, error }
                    }
                }
            }
        }
    }

    /// Now in milliseconds, bumped so it always exceeds the previous capture.
    fn next_timestamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }
}

#[async_trait]
impl CaptureTrigger for CaptureSession {
    async fn capture(&self) {
        self.capture_once().await;
    }
}

/// Forward auto-capture changes to an observer until the channel closes.
pub fn spawn_setting_listener(
    mut updates: broadcast::Receiver<SettingUpdate>,
    control: ObserverControl,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(SettingUpdate::AutoCaptureChanged { enabled }) => {
                    debug!(enabled, "Auto-capture toggled");
                    control.set_enabled(enabled);
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(missed = n, "Setting listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// A running page: capture session, observer and setting listener.
pub struct PageSession {
    session: Arc<CaptureSession>,
    observer: ObserverHandle,
    listener: JoinHandle<()>,
}

impl PageSession {
    /// Wire a page up. The initial enabled state comes from the background;
    /// if it cannot be read, capture starts enabled.
    pub async fn start(
        document: Arc<dyn DocumentSource>,
        mutations: Arc<dyn MutationSource>,
        client: BackgroundClient,
        recovery: RecoveryManager,
        updates: broadcast::Receiver<SettingUpdate>,
        config: &CaptureConfig,
    ) -> Result<Self, Error> {
        let enabled = match client.send(Request::GetAutoCaptureSetting).await {
            Ok(response) => response.enabled.unwrap_or(true),
            Err(e) => {
                warn!(error = %e, "Could not read auto-capture setting, assuming enabled");
                true
            }
        };

        let session = Arc::new(CaptureSession::new(document.clone(), client, recovery)?);
        let observer = spawn_observer(
            ObserverParts {
                document,
                mutations,
                trigger: session.clone(),
                watch_roots: session.extractor().watch_roots().to_vec(),
            },
            config,
            enabled,
        );
        let listener = spawn_setting_listener(updates, observer.control());

        info!(platform = %session.platform(), enabled, "Page session started");
        Ok(Self {
            session,
            observer,
            listener,
        })
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn observer(&self) -> &ObserverHandle {
        &self.observer
    }

    /// Capture right away, outside the observer's schedule.
    pub async fn capture_now(&self) -> CaptureOutcome {
        self.session.capture_once().await
    }

    /// The page navigated in place; resubscribe under the new content.
    pub fn navigated(&self) {
        info!(conversation_id = %self.session.identity().conversation_id, "Page navigated");
        self.observer.rearm();
    }

    pub async fn shutdown(self) {
        self.listener.abort();
        self.observer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{BackgroundService, spawn_background};
    use crate::config::StorageConfig;
    use crate::store::LibSqlBackend;
    use std::sync::Mutex;
    use std::time::Duration;

    const URL: &str = "https://chat.deepseek.com/a/chat/s/0a8a933f-b48d-448e-9584-4dc01c0f416b";
    const PAGE: &str = r#"<body>
        <div class="chat-title">Lifetimes</div>
        <div class="message-container user"><div class="message-content">hi</div></div>
        <div class="message-container"><div class="message-content">hello</div></div>
    </body>"#;

    struct Page {
        url: Mutex<String>,
        html: Mutex<String>,
    }

    impl Page {
        fn new(url: &str, html: &str) -> Arc<Self> {
            Arc::new(Self {
                url: Mutex::new(url.to_string()),
                html: Mutex::new(html.to_string()),
            })
        }
    }

    impl DocumentSource for Page {
        fn url(&self) -> String {
            self.url.lock().unwrap().clone()
        }
        fn html(&self) -> String {
            self.html.lock().unwrap().clone()
        }
    }

    async fn background() -> (Arc<BackgroundService>, BackgroundClient, JoinHandle<()>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let svc = Arc::new(BackgroundService::from_backend(db, &StorageConfig::default()));
        let (client, handle) = spawn_background(svc.clone(), Duration::from_secs(5));
        (svc, client, handle)
    }

    #[tokio::test]
    async fn capture_saves_through_background() {
        let (svc, client, _handle) = background().await;
        let session =
            CaptureSession::new(Page::new(URL, PAGE), client, svc.recovery().clone()).unwrap();

        let outcome = session.capture_once().await;
        let id = "deepseek_0a8a933f-b48d-448e-9584-4dc01c0f416b";
        assert_eq!(outcome, CaptureOutcome::Saved { id: id.to_string() });

        let stored = svc.gateway().get(id).await.unwrap();
        assert_eq!(stored.title, "Lifetimes");
        assert_eq!(stored.messages.len(), 2);
    }

    #[tokio::test]
    async fn timestamps_strictly_increase() {
        let (svc, client, _handle) = background().await;
        let session =
            CaptureSession::new(Page::new(URL, PAGE), client, svc.recovery().clone()).unwrap();

        let a = session.snapshot().unwrap().timestamp;
        let b = session.snapshot().unwrap().timestamp;
        let c = session.snapshot().unwrap().timestamp;
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn empty_page_is_not_sent() {
        let (svc, client, _handle) = background().await;
        let session = CaptureSession::new(
            Page::new(URL, "<body><p>loading</p></body>"),
            client,
            svc.recovery().clone(),
        )
        .unwrap();

        let outcome = session.capture_once().await;
        assert_eq!(outcome, CaptureOutcome::NoContent(ExtractionError::NoContent));
        assert!(svc.gateway().get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lost_context_stashes() {
        let (svc, client, handle) = background().await;
        handle.abort();
        let _ = handle.await;

        let session =
            CaptureSession::new(Page::new(URL, PAGE), client, svc.recovery().clone()).unwrap();
        let outcome = session.capture_once().await;
        assert!(matches!(outcome, CaptureOutcome::Stashed { .. }));

        let pending = svc.recovery().pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(svc.gateway().get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn identity_follows_navigation() {
        let (svc, client, _handle) = background().await;
        let page = Page::new(URL, PAGE);
        let session = CaptureSession::new(page.clone(), client, svc.recovery().clone()).unwrap();

        *page.url.lock().unwrap() = "https://chat.deepseek.com/a/chat/s/other".to_string();
        assert_eq!(session.identity().conversation_id, "deepseek_other");
    }
}
