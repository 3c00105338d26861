//! Admission middleware: sheds load with `429` once every slot is taken.
//!
//! A buffered response releases its slot when this function returns.  A
//! streamed response (tagged [`Streaming`]) moves the slot into its body,
//! so the slot lives until the last chunk is written or the client goes
//! away.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use log::{debug, warn};

use super::{AppState, Rejection, Streaming, is_exempt};
use crate::rpc::stream::GuardedStream;

pub async fn admit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(slot) = state.admission.try_admit() else {
        warn!(
            "admission: rejecting {} ({} of {} slots busy)",
            request.uri().path(),
            state.admission.in_flight(),
            state.admission.concurrency()
        );
        return Rejection::TooManyRequests.into_response();
    };

    let response = next.run(request).await;
    if response.extensions().get::<Streaming>().is_none() {
        return response;
    }

    debug!("admission: holding slot for streamed response");
    response.map(|body| Body::from_stream(GuardedStream::new(body.into_data_stream(), slot)))
}
