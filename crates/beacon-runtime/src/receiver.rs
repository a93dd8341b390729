//! Inbound receive loop: raw frame → decode → merge.
//!
//! Nothing that happens to a single frame stops the loop. Malformed frames
//! are logged and dropped; stray, late, and duplicate results fall out of
//! the merge as `UnknownCorrelation` and are ignored.

use std::sync::Arc;

use beacon_channel::{FrameReceiver, decode};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::merge::MergeEngine;

/// Drain `frames` into the merge engine until cancelled or the sender side
/// is dropped.
#[instrument(skip_all)]
pub async fn run_receiver(
    mut frames: FrameReceiver,
    merge: Arc<MergeEngine>,
    cancel: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            () = cancel.cancelled() => break,
            raw = frames.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };

        let envelope = match decode(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(reason = %e, frame = %raw.preview(), "dropping malformed frame");
                continue;
            }
        };

        match merge.merge(envelope) {
            Ok(outcome) => {
                debug!(correlation_id = %outcome.correlation_id(), "frame merged");
            }
            Err(e) => debug!(error = %e, "frame ignored"),
        }
    }
    debug!("receive loop stopped");
}

/// Spawn [`run_receiver`] on the current runtime.
pub fn spawn_receiver(
    frames: FrameReceiver,
    merge: Arc<MergeEngine>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_receiver(frames, merge, cancel))
}
