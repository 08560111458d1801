//! Background context — owns the stores and answers page requests.
//!
//! Pages talk to it through a `BackgroundClient`: each request travels over an
//! mpsc channel with a oneshot reply. Every request is handled in its own task,
//! so two saves may interleave their index read-modify-write.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{ChannelError, StoreError};
use crate::protocol::{Request, Response, SettingUpdate};
use crate::recovery::{ReconcileReport, RecoveryManager};
use crate::store::{KeyValueStore, LibSqlBackend, PersistenceGateway};
use crate::transcript::{self, ExportedTranscript};

/// Sync-store key of the auto-capture flag.
pub const AUTO_CAPTURE_KEY: &str = "autoExtractEnabled";

/// Namespace of the capacity-limited store (index + settings).
pub const SYNC_NAMESPACE: &str = "sync";

/// Namespace of fallback records.
pub const LOCAL_NAMESPACE: &str = "local";

const REQUEST_BUFFER: usize = 64;
const SETTING_BUFFER: usize = 16;

/// Request handler behind the message channel.
pub struct BackgroundService {
    gateway: PersistenceGateway,
    recovery: RecoveryManager,
    settings: Arc<dyn KeyValueStore>,
    updates: broadcast::Sender<SettingUpdate>,
}

impl BackgroundService {
    pub fn new(
        gateway: PersistenceGateway,
        recovery: RecoveryManager,
        settings: Arc<dyn KeyValueStore>,
    ) -> Self {
        let (updates, _) = broadcast::channel(SETTING_BUFFER);
        Self {
            gateway,
            recovery,
            settings,
            updates,
        }
    }

    /// Wire the gateway, recovery manager and settings onto one database.
    pub fn from_backend(db: Arc<LibSqlBackend>, config: &StorageConfig) -> Self {
        let sync: Arc<dyn KeyValueStore> = Arc::new(
            db.namespace(SYNC_NAMESPACE)
                .with_quota(config.index_item_quota, config.index_total_quota),
        );
        let local: Arc<dyn KeyValueStore> = Arc::new(db.namespace(LOCAL_NAMESPACE));

        let gateway = PersistenceGateway::new(db, sync.clone(), config.max_index_entries)
            .with_item_quota(config.index_item_quota);
        let recovery = RecoveryManager::new(local, config.fallback_prefix.clone());
        Self::new(gateway, recovery, sync)
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    /// Receiver of setting changes for a page session.
    pub fn subscribe(&self) -> broadcast::Receiver<SettingUpdate> {
        self.updates.subscribe()
    }

    /// Reconcile fallback records when the background context starts.
    pub async fn on_startup(&self) -> Result<ReconcileReport, StoreError> {
        info!("Background startup: reconciling fallback records");
        self.recovery.reconcile(&self.gateway).await
    }

    /// Reconcile fallback records after install or update.
    pub async fn on_installed(&self) -> Result<ReconcileReport, StoreError> {
        info!("Install/update: reconciling fallback records");
        self.recovery.reconcile(&self.gateway).await
    }

    /// Stored auto-capture flag; true when never set.
    pub async fn auto_capture_enabled(&self) -> Result<bool, StoreError> {
        Ok(self
            .settings
            .get(AUTO_CAPTURE_KEY)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(true))
    }

    /// Persist the flag and notify every page session.
    pub async fn set_auto_capture(&self, enabled: bool) -> Result<(), StoreError> {
        self.settings
            .set(AUTO_CAPTURE_KEY, &Value::Bool(enabled))
            .await?;
        // No subscribers is fine.
        let receivers = self
            .updates
            .send(SettingUpdate::AutoCaptureChanged { enabled })
            .unwrap_or(0);
        info!(enabled, receivers, "Auto-capture setting updated");
        Ok(())
    }

    /// Render the requested conversations; ids that fail to load are skipped.
    pub async fn export(&self, ids: &[String]) -> Vec<ExportedTranscript> {
        let mut exports = Vec::with_capacity(ids.len());
        for id in ids {
            match self.gateway.get(id).await {
                Ok(conversation) => exports.push(ExportedTranscript::from_conversation(&conversation)),
                Err(e) => warn!(conversation_id = %id, error = %e, "Export skipped"),
            }
        }
        exports
    }

    /// Answer one request. Failures become `{success:false, error}`.
    pub async fn handle(&self, request: Request) -> Response {
        let kind = request.kind();
        debug!(kind, "Handling request");

        let result = match request {
            Request::SaveConversation { data } => {
                self.gateway.save(&data).await.map(|_| Response::ok())
            }
            Request::GetConversationIndex => {
                self.gateway.get_index().await.map(|i| Response::ok().with_index(i))
            }
            Request::GetConversation { id } => match non_empty(id) {
                Some(id) => self
                    .gateway
                    .get(&id)
                    .await
                    .map(|c| Response::ok().with_conversation(c)),
                None => return Response::error("missing conversation id"),
            },
            Request::GetAllConversations => self
                .gateway
                .get_all()
                .await
                .map(|c| Response::ok().with_conversations(c)),
            Request::GetConversationsByPlatform { platform } => self
                .gateway
                .get_by_platform(platform)
                .await
                .map(|c| Response::ok().with_conversations(c)),
            Request::DeleteConversation { id } => match non_empty(id) {
                // A partial delete is logged by the gateway and still succeeds.
                Some(id) => self.gateway.delete(&id).await.map(|_| Response::ok()),
                None => return Response::error("missing conversation id"),
            },
            Request::ConversationToTranscript { conversation } => {
                Ok(Response::ok().with_transcript(transcript::render(&conversation)))
            }
            Request::UpdateAutoCaptureSetting { enabled } => {
                self.set_auto_capture(enabled).await.map(|_| Response::ok())
            }
            Request::GetAutoCaptureSetting => self
                .auto_capture_enabled()
                .await
                .map(|e| Response::ok().with_enabled(e)),
            Request::ExportConversations { ids } => {
                Ok(Response::ok().with_exports(self.export(&ids).await))
            }
            Request::GetPendingRecovery => self
                .recovery
                .pending()
                .await
                .map(|p| Response::ok().with_pending(p)),
            Request::RecoverPending => self
                .recovery
                .reconcile(&self.gateway)
                .await
                .map(|r| Response::ok().with_report(r)),
            Request::RebuildIndex => self
                .gateway
                .rebuild_index()
                .await
                .map(|i| Response::ok().with_index(i)),
        };

        result.unwrap_or_else(|e| {
            warn!(kind, error = %e, "Request failed");
            Response::error(e.to_string())
        })
    }
}

fn non_empty(id: Option<String>) -> Option<String> {
    id.filter(|id| !id.trim().is_empty())
}

/// A request paired with its reply slot.
pub struct Envelope {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// Page-side handle to the background context.
#[derive(Clone)]
pub struct BackgroundClient {
    tx: mpsc::Sender<Envelope>,
    timeout: Duration,
}

impl BackgroundClient {
    pub fn new(tx: mpsc::Sender<Envelope>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    /// Send a request and wait for its reply.
    ///
    /// A closed channel or dropped reply is `ContextInvalidated`; no reply
    /// within the timeout is `NoResponse`.
    pub async fn send(&self, request: Request) -> Result<Response, ChannelError> {
        let exchange = async {
            let (reply, rx) = oneshot::channel();
            self.tx
                .send(Envelope { request, reply })
                .await
                .map_err(|_| ChannelError::ContextInvalidated)?;
            rx.await.map_err(|_| ChannelError::ContextInvalidated)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::NoResponse {
                waited: self.timeout,
            }),
        }
    }

    /// Whether the background context has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the background dispatch loop.
///
/// The loop ends once every client is dropped; aborting the returned handle
/// simulates the context being torn down.
pub fn spawn_background(
    service: Arc<BackgroundService>,
    response_timeout: Duration,
) -> (BackgroundClient, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(REQUEST_BUFFER);

    let handle = tokio::spawn(async move {
        info!("Background context started");
        while let Some(Envelope { request, reply }) = rx.recv().await {
            let service = service.clone();
            tokio::spawn(async move {
                let kind = request.kind();
                let response = service.handle(request).await;
                if reply.send(response).is_err() {
                    debug!(kind, "Requester went away before the reply");
                }
            });
        }
        info!("Background context stopped");
    });

    (BackgroundClient::new(tx, response_timeout), handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Conversation, Message, Platform};
    use serde_json::json;

    fn conv(id: &str, timestamp: i64) -> Conversation {
        Conversation {
            id: id.to_string(),
            platform: Platform::Deepseek,
            title: format!("Chat {id}"),
            url: String::new(),
            timestamp,
            messages: vec![Message::user("hi"), Message::assistant("hello")],
        }
    }

    async fn service() -> BackgroundService {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        BackgroundService::from_backend(db, &StorageConfig::default())
    }

    #[tokio::test]
    async fn save_then_list_and_get() {
        let svc = service().await;
        let resp = svc
            .handle(Request::SaveConversation { data: conv("p_1", 5) })
            .await;
        assert!(resp.success, "{:?}", resp.error);

        let index = svc.handle(Request::GetConversationIndex).await.data.unwrap();
        assert_eq!(index[0].id, "p_1");

        let got = svc
            .handle(Request::GetConversation { id: Some("p_1".into()) })
            .await;
        assert_eq!(got.conversation.unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn missing_id_is_rejected() {
        let svc = service().await;
        let resp = svc.handle(Request::GetConversation { id: None }).await;
        assert!(!resp.success);
        let resp = svc
            .handle(Request::DeleteConversation { id: Some("  ".into()) })
            .await;
        assert!(!resp.success);
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn unknown_id_reports_error() {
        let svc = service().await;
        let resp = svc
            .handle(Request::GetConversation { id: Some("nope".into()) })
            .await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn setting_defaults_on_and_broadcasts_changes() {
        let svc = service().await;
        let mut rx = svc.subscribe();

        assert_eq!(
            svc.handle(Request::GetAutoCaptureSetting).await.enabled,
            Some(true)
        );
        assert!(svc
            .handle(Request::UpdateAutoCaptureSetting { enabled: false })
            .await
            .success);
        assert_eq!(
            rx.recv().await.unwrap(),
            SettingUpdate::AutoCaptureChanged { enabled: false }
        );
        assert!(!svc.auto_capture_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn transcript_request_renders_markdown() {
        let svc = service().await;
        let resp = svc
            .handle(Request::ConversationToTranscript {
                conversation: conv("p_1", 5),
            })
            .await;
        let md = resp.transcript.unwrap();
        assert!(md.contains("# Chat p_1"));
        assert!(md.contains("## **User**\n\nhi"));
        assert!(md.contains("## **Assistant**\n\nhello"));
    }

    #[tokio::test]
    async fn export_skips_unknown_ids() {
        let svc = service().await;
        svc.handle(Request::SaveConversation { data: conv("p_1", 5) }).await;

        let resp = svc
            .handle(Request::ExportConversations {
                ids: vec!["p_1".into(), "missing".into()],
            })
            .await;
        let exports = resp.exports.unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].file_name, "Chat p_1_1.md");
    }

    #[tokio::test]
    async fn startup_reconciles_fallback_records() {
        let svc = service().await;
        svc.recovery().stash(&conv("p_9", 1)).await.unwrap();

        let report = svc.on_startup().await.unwrap();
        assert_eq!(report.recovered, 1);
        assert!(svc.gateway().get("p_9").await.is_ok());

        let pending = svc.handle(Request::GetPendingRecovery).await.pending.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn client_round_trip() {
        let svc = Arc::new(service().await);
        let (client, _handle) = spawn_background(svc, Duration::from_secs(5));

        let resp = client
            .send(Request::SaveConversation { data: conv("p_1", 1) })
            .await
            .unwrap();
        assert!(resp.success);
        let resp = client.send(Request::GetAllConversations).await.unwrap();
        assert_eq!(resp.conversations.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn aborted_background_is_context_invalidated() {
        let svc = Arc::new(service().await);
        let (client, handle) = spawn_background(svc, Duration::from_secs(5));
        handle.abort();
        let _ = handle.await;

        assert!(client.is_closed());
        let err = client.send(Request::GetConversationIndex).await.unwrap_err();
        assert_eq!(err, ChannelError::ContextInvalidated);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_background_is_no_response() {
        // Receiver kept alive but never answered.
        let (tx, _rx) = mpsc::channel(4);
        let client = BackgroundClient::new(tx, Duration::from_secs(5));

        let err = client.send(Request::GetConversationIndex).await.unwrap_err();
        assert_eq!(
            err,
            ChannelError::NoResponse {
                waited: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn request_json_reaches_handler_shape() {
        let req: Request = serde_json::from_value(json!({
            "type": "SAVE_CONVERSATION",
            "data": {
                "id": "p_123",
                "platform": "deepseek",
                "title": "t",
                "url": "",
                "timestamp": 1,
                "messages": [{"role": "user", "content": "hi"}]
            }
        }))
        .unwrap();
        assert_eq!(req.kind(), "SAVE_CONVERSATION");
    }
}
