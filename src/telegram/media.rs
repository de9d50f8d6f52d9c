use grammers_tl_types as tl;

use crate::model::MediaType;

/// Videos above this size are reported as `large_video`.
pub const LARGE_VIDEO_BYTES: i64 = 10 * 1024 * 1024;

/// The document attributes that decide a media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentTrait {
    Sticker,
    Animated,
    Video,
    Voice,
    Audio,
    Other,
}

impl From<&tl::enums::DocumentAttribute> for DocumentTrait {
    fn from(attr: &tl::enums::DocumentAttribute) -> Self {
        match attr {
            tl::enums::DocumentAttribute::Sticker(_) => DocumentTrait::Sticker,
            tl::enums::DocumentAttribute::Animated => DocumentTrait::Animated,
            tl::enums::DocumentAttribute::Video(_) => DocumentTrait::Video,
            tl::enums::DocumentAttribute::Audio(a) if a.voice => DocumentTrait::Voice,
            tl::enums::DocumentAttribute::Audio(_) => DocumentTrait::Audio,
            _ => DocumentTrait::Other,
        }
    }
}

/// Stickers win over animation, animation over video (GIFs carry a video
/// attribute too).
pub fn classify_document(size: i64, traits: &[DocumentTrait]) -> MediaType {
    let has = |t: DocumentTrait| traits.contains(&t);
    if has(DocumentTrait::Sticker) {
        MediaType::Sticker
    } else if has(DocumentTrait::Animated) {
        MediaType::Gif
    } else if has(DocumentTrait::Video) {
        if size > LARGE_VIDEO_BYTES {
            MediaType::LargeVideo
        } else {
            MediaType::Video
        }
    } else if has(DocumentTrait::Voice) {
        MediaType::Voice
    } else if has(DocumentTrait::Audio) {
        MediaType::Audio
    } else {
        MediaType::Document
    }
}

/// `(has_media, media_type)` for a message's media. Link previews are not
/// counted as media.
pub fn classify_media(media: Option<&tl::enums::MessageMedia>) -> (bool, Option<MediaType>) {
    match media {
        None | Some(tl::enums::MessageMedia::WebPage(_)) => (false, None),
        Some(tl::enums::MessageMedia::Photo(_)) => (true, Some(MediaType::Photo)),
        Some(tl::enums::MessageMedia::Document(d)) => match &d.document {
            Some(tl::enums::Document::Document(doc)) => {
                let traits: Vec<DocumentTrait> = doc.attributes.iter().map(DocumentTrait::from).collect();
                (true, Some(classify_document(doc.size as i64, &traits)))
            }
            _ => (true, Some(MediaType::Document)),
        },
        Some(_) => (true, None),
    }
}
