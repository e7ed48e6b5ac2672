//! Conversion of raw Telegram messages into [`IncomingMessage`]s.

use grammers_tl_types as tl;

use super::file_ref::FileRef;
use crate::commands::IncomingMessage;

/// Builds an [`IncomingMessage`] from a raw message.
///
/// Returns `None` for service messages, outgoing messages and messages
/// without a user sender.
#[must_use]
pub fn incoming_from_raw(raw: &tl::enums::Message) -> Option<IncomingMessage> {
    let tl::enums::Message::Message(message) = raw else {
        return None;
    };
    let sender_id = user_sender(message.out, message.from_id.as_ref(), &message.peer_id)?;

    Some(IncomingMessage {
        sender_id,
        text: message.message.clone(),
        video: video_ref_from_raw(raw).map(|r| r.to_string()),
    })
}

/// Resolves the user who sent a message, if it was an incoming user message.
fn user_sender(out: bool, from_id: Option<&tl::enums::Peer>, peer_id: &tl::enums::Peer) -> Option<i64> {
    if out {
        return None;
    }

    // In private chats the sender is only given as the peer.
    match from_id.unwrap_or(peer_id) {
        tl::enums::Peer::User(user) => Some(user.user_id),
        _ => None,
    }
}

/// Extracts a downloadable reference if the message carries a video.
#[must_use]
pub fn video_ref_from_raw(raw: &tl::enums::Message) -> Option<FileRef> {
    let tl::enums::Message::Message(message) = raw else {
        return None;
    };
    let Some(tl::enums::MessageMedia::Document(media)) = &message.media else {
        return None;
    };
    let Some(tl::enums::Document::Document(document)) = &media.document else {
        return None;
    };

    video_ref_from_document(message.id, document)
}

fn video_ref_from_document(message_id: i32, document: &tl::types::Document) -> Option<FileRef> {
    is_video(&document.attributes).then(|| FileRef {
        message_id,
        document_id: document.id,
        access_hash: document.access_hash,
        file_reference: document.file_reference.clone(),
    })
}

/// Whether a document is a native video.
///
/// GIFs, round video notes and files merely named or typed as video are not.
fn is_video(attributes: &[tl::enums::DocumentAttribute]) -> bool {
    let animated = attributes
        .iter()
        .any(|a| matches!(a, tl::enums::DocumentAttribute::Animated));
    let video = attributes.iter().any(
        |a| matches!(a, tl::enums::DocumentAttribute::Video(video) if !video.round_message),
    );

    video && !animated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filename(name: &str) -> tl::enums::DocumentAttribute {
        tl::enums::DocumentAttribute::Filename(tl::types::DocumentAttributeFilename {
            file_name: name.to_owned(),
        })
    }

    fn video_attribute(round_message: bool) -> tl::enums::DocumentAttribute {
        tl::enums::DocumentAttribute::Video(tl::types::DocumentAttributeVideo {
            round_message,
            supports_streaming: true,
            nosound: false,
            duration: 3.0,
            w: 720,
            h: 1280,
            preload_prefix_size: None,
            video_start_ts: None,
            video_codec: None,
        })
    }

    fn document(mime_type: &str, attributes: Vec<tl::enums::DocumentAttribute>) -> tl::types::Document {
        tl::types::Document {
            id: 5_123_456_789,
            access_hash: -7_001_002_003,
            file_reference: vec![0, 1, 2],
            date: 0,
            mime_type: mime_type.to_owned(),
            size: 1024,
            thumbs: None,
            video_thumbs: None,
            dc_id: 2,
            attributes,
        }
    }

    fn user(user_id: i64) -> tl::enums::Peer {
        tl::enums::Peer::User(tl::types::PeerUser { user_id })
    }

    #[test]
    fn test_video_attribute_is_video() {
        assert!(is_video(&[video_attribute(false), filename("clip.mp4")]));
    }

    #[test]
    fn test_video_mime_alone_is_not_video() {
        assert!(!is_video(&[filename("clip.mp4")]));
        assert!(!is_video(&[]));
    }

    #[test]
    fn test_gifs_and_round_videos_are_not_video() {
        assert!(!is_video(&[video_attribute(false), tl::enums::DocumentAttribute::Animated]));
        assert!(!is_video(&[video_attribute(true)]));
    }

    #[test]
    fn test_video_document_yields_reference() {
        let file_ref = video_ref_from_document(42, &document("video/mp4", vec![video_attribute(false)]))
            .unwrap();
        assert_eq!(
            file_ref,
            FileRef {
                message_id: 42,
                document_id: 5_123_456_789,
                access_hash: -7_001_002_003,
                file_reference: vec![0, 1, 2],
            }
        );
    }

    #[test]
    fn test_plain_document_yields_nothing() {
        let doc = document("video/mp4", vec![filename("clip.mp4")]);
        assert!(video_ref_from_document(42, &doc).is_none());
    }

    #[test]
    fn test_private_chat_sender_falls_back_to_peer() {
        assert_eq!(user_sender(false, None, &user(77)), Some(77));
    }

    #[test]
    fn test_from_id_wins_over_peer() {
        let chat = tl::enums::Peer::Chat(tl::types::PeerChat { chat_id: 9 });
        assert_eq!(user_sender(false, Some(&user(77)), &chat), Some(77));
    }

    #[test]
    fn test_outgoing_messages_are_ignored() {
        assert_eq!(user_sender(true, None, &user(77)), None);
        assert_eq!(user_sender(true, Some(&user(77)), &user(77)), None);
    }

    #[test]
    fn test_channel_senders_are_ignored() {
        let channel = tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id: 5 });
        assert_eq!(user_sender(false, Some(&channel), &user(77)), None);
        assert_eq!(user_sender(false, None, &channel), None);
    }

    #[test]
    fn test_empty_message_is_ignored() {
        let raw = tl::enums::Message::Empty(tl::types::MessageEmpty {
            id: 1,
            peer_id: None,
        });
        assert!(incoming_from_raw(&raw).is_none());
        assert!(video_ref_from_raw(&raw).is_none());
    }
}
