//! Messaging collaborator boundary.
//!
//! The chat transport itself lives outside this crate. The dispatcher only
//! needs the [`Messenger`] trait: download an attachment, upload converted
//! bytes, send a reply. [`LocalMessenger`] implements it on the local
//! filesystem for the CLI.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::MessagingError;
use crate::media::sniff_format;

/// Chat identifier (a JID on WhatsApp-style transports).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque handle the transport uses to fetch an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(String);

impl MediaRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What kind of attachment a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Sticker,
    Document,
}

/// Attachment on an inbound message, or on the message it quotes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedMedia {
    pub reference: MediaRef,
    pub kind: MediaKind,
    /// Transport-declared mimetype; only a hint for sniffing.
    #[serde(default)]
    pub mimetype: Option<String>,
}

/// One inbound chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    pub chat: ChatId,
    pub sender: String,
    #[serde(default)]
    pub is_from_me: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<AttachedMedia>,
    #[serde(default)]
    pub quoted_media: Option<AttachedMedia>,
}

impl InboundEvent {
    /// The attachment a command applies to: the message's own, else the quoted one.
    pub fn target_media(&self) -> Option<&AttachedMedia> {
        self.find_media(|_| true)
    }

    /// First attachment whose kind `accepts`, checking the message's own
    /// before the quoted one.
    pub fn find_media(&self, accepts: impl Fn(MediaKind) -> bool) -> Option<&AttachedMedia> {
        [self.media.as_ref(), self.quoted_media.as_ref()]
            .into_iter()
            .flatten()
            .find(|media| accepts(media.kind))
    }

    /// Reply context quoting this message, mentioning the sender in groups.
    pub fn reply_context(&self) -> ReplyContext {
        ReplyContext {
            quoted_id: self.id.clone(),
            mentions: if self.is_group {
                vec![self.sender.clone()]
            } else {
                Vec::new()
            },
        }
    }
}

/// Upload category, selecting the transport's media class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Sticker,
}

/// Where uploaded bytes ended up, as the transport reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadHandle {
    pub url: String,
    pub direct_path: String,
    #[serde(serialize_with = "as_hex")]
    pub media_key: Vec<u8>,
    #[serde(serialize_with = "as_hex")]
    pub file_sha256: Vec<u8>,
    #[serde(serialize_with = "as_hex")]
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

fn as_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

/// Quote and mention information for a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyContext {
    pub quoted_id: String,
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Sticker {
        upload: UploadHandle,
        mime_type: String,
        is_animated: bool,
        width: u32,
        height: u32,
    },
    Image {
        upload: UploadHandle,
        mime_type: String,
        caption: Option<String>,
        width: u32,
        height: u32,
    },
}

/// A message to send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyContext>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            body: MessageBody::Text { text: text.into() },
            reply: None,
        }
    }

    pub fn new(body: MessageBody) -> Self {
        Self { body, reply: None }
    }

    pub fn in_reply_to(mut self, reply: ReplyContext) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn is_text(&self) -> bool {
        matches!(self.body, MessageBody::Text { .. })
    }
}

/// Chat transport operations the dispatcher relies on.
///
/// Implementations are shared across tasks behind an `Arc`.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, MessagingError>;

    async fn upload(
        &self,
        data: Vec<u8>,
        category: MediaCategory,
    ) -> Result<UploadHandle, MessagingError>;

    async fn send(&self, chat: &ChatId, message: OutgoingMessage) -> Result<(), MessagingError>;

    /// Member addresses of a group chat.
    async fn group_participants(&self, chat: &ChatId) -> Result<Vec<String>, MessagingError> {
        Err(MessagingError::GroupInfo {
            chat: chat.to_string(),
            reason: "not supported by this transport".to_string(),
        })
    }

    /// Close the transport. Called once after the dispatcher has drained.
    async fn disconnect(&self) {}
}

/// Filesystem-backed messenger.
///
/// Downloads read the reference as a local path. Uploads are stored in the
/// outbox under their SHA-256. Sent messages are written as JSON lines.
pub struct LocalMessenger {
    outbox: PathBuf,
    sink: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

#[derive(Serialize)]
struct SentRecord<'a> {
    chat: &'a ChatId,
    #[serde(flatten)]
    message: &'a OutgoingMessage,
}

impl LocalMessenger {
    /// Messenger writing sent messages to stdout.
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self::with_sink(outbox, Box::new(tokio::io::stdout()))
    }

    pub fn with_sink(outbox: impl Into<PathBuf>, sink: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            outbox: outbox.into(),
            sink: Mutex::new(sink),
        }
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }
}

#[async_trait]
impl Messenger for LocalMessenger {
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, MessagingError> {
        tokio::fs::read(media.as_str())
            .await
            .map_err(|e| MessagingError::Download {
                reason: format!("{}: {}", media.as_str(), e),
            })
    }

    async fn upload(
        &self,
        data: Vec<u8>,
        category: MediaCategory,
    ) -> Result<UploadHandle, MessagingError> {
        let digest = Sha256::digest(&data).to_vec();
        let name = format!(
            "{}.{}",
            hex::encode(&digest),
            sniff_format(&data, None).extension()
        );
        let path = self.outbox.join(&name);

        let upload_err = |e: std::io::Error| MessagingError::Upload {
            reason: format!("{}: {}", path.display(), e),
        };
        tokio::fs::create_dir_all(&self.outbox)
            .await
            .map_err(upload_err)?;
        tokio::fs::write(&path, &data).await.map_err(upload_err)?;

        tracing::debug!(?category, path = %path.display(), bytes = data.len(), "Stored upload");
        // Nothing is encrypted locally, so the encrypted digest equals the plain one
        Ok(UploadHandle {
            url: format!("file://{}", path.display()),
            direct_path: path.display().to_string(),
            media_key: Vec::new(),
            file_enc_sha256: digest.clone(),
            file_sha256: digest,
            file_length: data.len() as u64,
        })
    }

    async fn send(&self, chat: &ChatId, message: OutgoingMessage) -> Result<(), MessagingError> {
        let send_err = |reason: String| MessagingError::Send {
            chat: chat.to_string(),
            reason,
        };
        let mut line = serde_json::to_vec(&SentRecord {
            chat,
            message: &message,
        })
        .map_err(|e| send_err(e.to_string()))?;
        line.push(b'\n');

        let mut sink = self.sink.lock().await;
        sink.write_all(&line)
            .await
            .map_err(|e| send_err(e.to_string()))?;
        sink.flush().await.map_err(|e| send_err(e.to_string()))
    }

    async fn disconnect(&self) {
        if let Err(e) = self.sink.lock().await.flush().await {
            tracing::warn!(error = %e, "Failed to flush message sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncBufReadExt;

    use super::*;

    #[test]
    fn test_inbound_event_from_json() {
        let json = r#"{
            "id": "3EB0",
            "chat": "123@g.us",
            "sender": "555@s.whatsapp.net",
            "is_group": true,
            "text": "/s",
            "quoted_media": {"reference": "/tmp/a.gif", "kind": "video", "mimetype": "image/gif"}
        }"#;
        let event: InboundEvent = serde_json::from_str(json).unwrap();
        assert!(!event.is_from_me);
        assert_eq!(event.chat.as_str(), "123@g.us");
        let media = event.target_media().unwrap();
        assert_eq!(media.kind, MediaKind::Video);
        assert_eq!(media.reference.as_str(), "/tmp/a.gif");
        assert_eq!(
            event.reply_context(),
            ReplyContext {
                quoted_id: "3EB0".to_string(),
                mentions: vec!["555@s.whatsapp.net".to_string()],
            }
        );
    }

    #[test]
    fn test_own_media_wins_over_quoted() {
        let own = AttachedMedia {
            reference: MediaRef::new("own"),
            kind: MediaKind::Image,
            mimetype: None,
        };
        let quoted = AttachedMedia {
            reference: MediaRef::new("quoted"),
            kind: MediaKind::Sticker,
            mimetype: None,
        };
        let event = InboundEvent {
            id: "1".to_string(),
            chat: ChatId::from("c"),
            sender: "s".to_string(),
            is_from_me: false,
            is_group: false,
            text: None,
            media: Some(own.clone()),
            quoted_media: Some(quoted),
        };
        assert_eq!(event.target_media(), Some(&own));
        assert!(event.reply_context().mentions.is_empty());
    }

    #[test]
    fn test_find_media_skips_unwanted_own_attachment() {
        let event = InboundEvent {
            id: "1".to_string(),
            chat: ChatId::from("c"),
            sender: "s".to_string(),
            is_from_me: false,
            is_group: false,
            text: Some("/s".to_string()),
            media: Some(AttachedMedia {
                reference: MediaRef::new("report.pdf"),
                kind: MediaKind::Document,
                mimetype: Some("application/pdf".to_string()),
            }),
            quoted_media: Some(AttachedMedia {
                reference: MediaRef::new("cat.png"),
                kind: MediaKind::Image,
                mimetype: None,
            }),
        };
        let found = event.find_media(|kind| kind != MediaKind::Document).unwrap();
        assert_eq!(found.reference.as_str(), "cat.png");
        assert!(event.find_media(|kind| kind == MediaKind::Video).is_none());
    }

    #[tokio::test]
    async fn test_local_messenger_has_no_groups() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = LocalMessenger::with_sink(dir.path(), Box::new(tokio::io::sink()));
        let err = messenger
            .group_participants(&ChatId::from("family@g.us"))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::GroupInfo { .. }));
        assert_eq!(err.user_message(), "Couldn't load the group members.");
    }

    #[test]
    fn test_text_message_serialization() {
        let message = OutgoingMessage::text("hi").in_reply_to(ReplyContext {
            quoted_id: "q".to_string(),
            mentions: vec![],
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["text"], "hi");
        assert_eq!(value["reply"]["quoted_id"], "q");
    }

    #[tokio::test]
    async fn test_local_upload_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let messenger = LocalMessenger::with_sink(dir.path(), Box::new(tokio::io::sink()));
        let data = b"RIFF\x04\x00\x00\x00WEBP".to_vec();

        let handle = messenger
            .upload(data.clone(), MediaCategory::Sticker)
            .await
            .unwrap();
        let expected = hex::encode(Sha256::digest(&data));
        assert!(handle.direct_path.ends_with(&format!("{expected}.webp")));
        assert_eq!(handle.file_length, data.len() as u64);
        assert_eq!(hex::encode(&handle.file_sha256), expected);
        assert_eq!(std::fs::read(&handle.direct_path).unwrap(), data);

        // Same content maps to the same file
        let again = messenger.upload(data, MediaCategory::Sticker).await.unwrap();
        assert_eq!(again.direct_path, handle.direct_path);
    }

    #[tokio::test]
    async fn test_local_download_reads_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.bin");
        std::fs::write(&path, b"payload").unwrap();
        let messenger = LocalMessenger::with_sink(dir.path(), Box::new(tokio::io::sink()));

        let data = messenger
            .download(&MediaRef::new(path.to_string_lossy()))
            .await
            .unwrap();
        assert_eq!(data, b"payload");

        let err = messenger
            .download(&MediaRef::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Download { .. }));
    }

    #[tokio::test]
    async fn test_local_send_writes_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, reader) = tokio::io::duplex(4096);
        let messenger = LocalMessenger::with_sink(dir.path(), Box::new(writer));

        messenger
            .send(&ChatId::from("42@s.whatsapp.net"), OutgoingMessage::text("done"))
            .await
            .unwrap();

        let mut lines = tokio::io::BufReader::new(reader).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["chat"], "42@s.whatsapp.net");
        assert_eq!(value["type"], "text");
        assert_eq!(value["text"], "done");
        assert!(value.get("reply").is_none());
    }
}
