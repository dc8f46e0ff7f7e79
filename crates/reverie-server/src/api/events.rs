//! Live job updates over Server-Sent Events

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::state::AppState;

/// Subscribe to the job update feed. Each event is one `job_update`
/// with the JSON-serialized update as payload. Slow consumers that lag
/// behind the broadcast buffer miss events and resynchronize by
/// polling the job status endpoint.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(
        subscribers = state.events.subscriber_count(),
        "event stream opened"
    );
    let rx = state.events.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|update| async move {
        match update {
            Ok(update) => match serde_json::to_string(&update) {
                Ok(data) => Some(Ok(Event::default().event("job_update").data(data))),
                Err(e) => {
                    warn!(error = %e, "failed to serialize job update");
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged, dropping events");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
