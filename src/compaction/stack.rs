//! Stack frame truncation.

/// Keep the first `k` and last `k` frames, replacing the middle with a marker.
///
/// With `k >= 1` both ends survive, so the raising frame is kept whichever
/// end the runner puts it at.
pub fn truncate_frames(frames: &[String], k: usize) -> Vec<String> {
    let k = k.max(1);
    if frames.len() <= 2 * k + 1 {
        return frames.to_vec();
    }

    let omitted = frames.len() - 2 * k;
    let mut kept = Vec::with_capacity(2 * k + 1);
    kept.extend_from_slice(&frames[..k]);
    kept.push(omission_marker(omitted));
    kept.extend_from_slice(&frames[frames.len() - k..]);
    kept
}

pub fn omission_marker(omitted: usize) -> String {
    format!("… {} frames omitted …", omitted)
}
