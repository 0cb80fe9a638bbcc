//! Track-progress fitness.

use crate::track::TrackGeometry;
use crate::{Vec2, wrapped_index};

/// Distance driven along the track, counting completed laps.
///
/// The agent position is projected onto the line from the last passed gate to the next expected
/// one. The projection is not clamped, so the score keeps rising smoothly when the car runs past
/// a gate before its contact event arrives.
///
/// `checkpoint_index` must name one of the track's checkpoints.
#[must_use]
pub fn fitness(laps: u32, checkpoint_index: usize, position: Vec2, track: &TrackGeometry) -> f32 {
    let checkpoints = track.checkpoints();
    debug_assert!(
        checkpoint_index < checkpoints.len(),
        "checkpoint {checkpoint_index} out of range for {} checkpoints",
        checkpoints.len()
    );
    let index = checkpoint_index;
    let previous = &checkpoints[wrapped_index(index as isize - 1, checkpoints.len())];
    let next = &checkpoints[index];

    let direction = next.position - previous.position;
    let denominator = direction.length_squared();
    let t = if denominator > f32::EPSILON {
        (position - previous.position).dot(direction) / denominator
    } else {
        0.0
    };
    let since_last_checkpoint = t * next.segment_length;

    let completed = if index == 0 {
        0.0
    } else {
        previous.cumulative_distance
    };
    laps as f32 * track.total_track_length() + completed + since_last_checkpoint
}
