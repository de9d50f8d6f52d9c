use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::auth::BasicAuth;
use super::routes::CommentRow;
use super::state::AppState;

/// Live feed of classified comments as ready-to-insert table rows.
pub async fn sse_handler(
    _auth: BasicAuth,
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.tx.subscribe();
    let utc_offset_hours = state.utc_offset_hours;
    let stream = BroadcastStream::new(rx);

    // Lagged receivers skip what they missed
    let stream = stream.filter_map(move |result| match result {
        Ok(classified) => {
            let row_html = CommentRow::new(&classified.comment, utc_offset_hours).render();
            Some(Ok(Event::default().event("comment").data(row_html)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
