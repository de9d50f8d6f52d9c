use chrono::{DateTime, FixedOffset, Offset, Utc};

use crate::model::{CanonicalComment, Classification};

const SEPARATOR: &str = "━━━━━━━━━━━━━━━━━━";
/// Leaves room for the header and links under the 4096 character Bot API limit
const MAX_TEXT_CHARS: usize = 3500;

/// Renders a stored comment as the HTML body of an alert. Each platform
/// monitor hands one out so alerts keep its layout after the monitor has moved
/// into its polling task.
pub trait CommentFormatter: Send + Sync {
    fn format_comment(&self, comment: &CanonicalComment) -> String;
}

/// Escapes the characters Bot API HTML parse mode treats as markup.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Cuts `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// `HH:MM dd.mm.YYYY` at a fixed UTC offset.
pub fn display_time(at: DateTime<Utc>, utc_offset_hours: i32) -> String {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
    at.with_timezone(&offset).format("%H:%M %d.%m.%Y").to_string()
}

/// Layout shared by both platforms' alerts.
pub fn comment_card(
    badge: &str,
    comment: &CanonicalComment,
    author_html: &str,
    comment_link_label: &str,
    utc_offset_hours: i32,
) -> String {
    let mut out = format!(
        "{badge} | {}\n👤 {author_html}\n🆔 <code>{}</code>\n🕐 {}\n{SEPARATOR}\n",
        escape_html(&comment.group_channel_name),
        escape_html(&comment.author_id),
        display_time(comment.comment_published_at, utc_offset_hours),
    );

    if comment.is_text_blank() {
        out.push_str(
            "<b>Пользователь прислал медиафайл, пожалуйста откройте комментарий чтобы увидеть содержание</b>\n",
        );
    } else {
        out.push_str(&format!(
            "<blockquote>{}</blockquote>\n",
            escape_html(&truncate_text(comment.comment_text.trim(), MAX_TEXT_CHARS))
        ));
    }
    if let Some(media) = comment.media_type {
        out.push_str(&format!("📎 {media}\n"));
    }

    out.push_str(&format!(
        "\n<a href=\"{}\">🔗 Открыть пост</a>\n<a href=\"{}\">💬 {}</a>",
        comment.post_url, comment.comment_url, comment_link_label
    ));
    out
}

pub fn sentiment_line(classification: Option<Classification>) -> String {
    match classification {
        Some(c) => format!(
            "{} Тональность: <b>{}</b> ({:.0}%)",
            c.sentiment.emoji(),
            c.sentiment.label(),
            c.score * 100.0
        ),
        None => "❔ Тональность: <b>не определена</b>".to_string(),
    }
}
