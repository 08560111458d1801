//! Request/response messages between page sessions and the background context.

use serde::{Deserialize, Serialize};

use crate::model::{Conversation, IndexEntry, Platform};
use crate::recovery::ReconcileReport;
use crate::transcript::ExportedTranscript;

/// Page → background request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    SaveConversation {
        data: Conversation,
    },
    GetConversationIndex,
    GetConversation {
        #[serde(default)]
        id: Option<String>,
    },
    GetAllConversations,
    GetConversationsByPlatform {
        platform: Platform,
    },
    DeleteConversation {
        #[serde(default)]
        id: Option<String>,
    },
    ConversationToTranscript {
        conversation: Conversation,
    },
    UpdateAutoCaptureSetting {
        enabled: bool,
    },
    GetAutoCaptureSetting,
    ExportConversations {
        #[serde(default)]
        ids: Vec<String>,
    },
    GetPendingRecovery,
    RecoverPending,
    RebuildIndex,
}

impl Request {
    /// Wire name of the request kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SaveConversation { .. } => "SAVE_CONVERSATION",
            Self::GetConversationIndex => "GET_CONVERSATION_INDEX",
            Self::GetConversation { .. } => "GET_CONVERSATION",
            Self::GetAllConversations => "GET_ALL_CONVERSATIONS",
            Self::GetConversationsByPlatform { .. } => "GET_CONVERSATIONS_BY_PLATFORM",
            Self::DeleteConversation { .. } => "DELETE_CONVERSATION",
            Self::ConversationToTranscript { .. } => "CONVERSATION_TO_TRANSCRIPT",
            Self::UpdateAutoCaptureSetting { .. } => "UPDATE_AUTO_CAPTURE_SETTING",
            Self::GetAutoCaptureSetting => "GET_AUTO_CAPTURE_SETTING",
            Self::ExportConversations { .. } => "EXPORT_CONVERSATIONS",
            Self::GetPendingRecovery => "GET_PENDING_RECOVERY",
            Self::RecoverPending => "RECOVER_PENDING",
            Self::RebuildIndex => "REBUILD_INDEX",
        }
    }
}

/// Background → page response. Only the field matching the request is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<IndexEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Conversation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversations: Option<Vec<Conversation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Vec<ExportedTranscript>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<Vec<Conversation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReconcileReport>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_index(mut self, entries: Vec<IndexEntry>) -> Self {
        self.data = Some(entries);
        self
    }

    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = Some(conversation);
        self
    }

    pub fn with_conversations(mut self, conversations: Vec<Conversation>) -> Self {
        self.conversations = Some(conversations);
        self
    }

    pub fn with_transcript(mut self, transcript: String) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_exports(mut self, exports: Vec<ExportedTranscript>) -> Self {
        self.exports = Some(exports);
        self
    }

    pub fn with_pending(mut self, pending: Vec<Conversation>) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn with_report(mut self, report: ReconcileReport) -> Self {
        self.report = Some(report);
        self
    }
}

/// Broadcast from the background context to every page session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettingUpdate {
    AutoCaptureChanged { enabled: bool },
}
