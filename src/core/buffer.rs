//! Replay of buffered events that were previously rejected by the guard.
//!
//! Buffered signatures are walked in arrival-time order; an equal-timestamp
//! group is scanned left-to-right (ascending signature order) so simultaneous
//! arrivals drain deterministically. The walk is an explicit loop so large
//! buffers cannot exhaust the stack.

use chrono::{DateTime, Utc};

use crate::domain::{EventError, EventSignature, ExecutionEvent, PendingMessages, Progress};

use super::guard::admit;

/// Result of draining a buffer: the events that became admissible, in the
/// order they were admitted.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    pub admitted: Vec<(EventSignature, ExecutionEvent)>,
}

impl DrainOutcome {
    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }
}

/// Drain `pending` against `progress`, applying every admissible transition.
///
/// Admitted signatures are removed from the buffer and `progress` is advanced
/// in place; everything still blocked stays buffered. Draining an
/// already-drained buffer changes nothing.
pub fn drain(
    pending: &mut PendingMessages,
    progress: &mut Progress,
) -> Result<DrainOutcome, EventError> {
    let mut outcome = DrainOutcome::default();

    loop {
        match next_admissible(pending, progress)? {
            Some((signature, event, next)) => {
                *progress = next;
                pending.remove(&signature);
                outcome.admitted.push((signature, event));
            }
            None => break,
        }
    }

    Ok(outcome)
}

/// Find the next buffered event the guard accepts, if any.
///
/// The head of the timestamp-sorted buffer is tried first; on rejection the
/// rest of its equal-timestamp group is tried left-to-right. A rejection of
/// the whole group stops the drain; later timestamps are never considered
/// past a blocked head.
fn next_admissible(
    pending: &PendingMessages,
    progress: &Progress,
) -> Result<Option<(EventSignature, ExecutionEvent, Progress)>, EventError> {
    let mut ordered: Vec<(&EventSignature, DateTime<Utc>)> =
        pending.iter().map(|(sig, ts)| (sig, *ts)).collect();
    // BTreeMap iteration is signature-ordered; a stable sort on timestamp
    // keeps that as the tie order.
    ordered.sort_by_key(|(_, ts)| *ts);

    let head_ts = match ordered.first() {
        Some((_, ts)) => *ts,
        None => return Ok(None),
    };

    for (signature, ts) in ordered {
        if ts != head_ts {
            break;
        }
        let event = signature.to_event()?;
        let (admitted, next) = admit(&event, progress);
        if admitted {
            return Ok(Some((signature.clone(), event, next)));
        }
    }

    Ok(None)
}
