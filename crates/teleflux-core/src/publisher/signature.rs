//! Content signature used to skip no-op edits.

use sha2::{Digest, Sha256};

use super::surface::Rendered;

/// SHA-256 (hex) over the text and the control layout. Row and button
/// boundaries are part of the digest, so moving a button changes it.
pub fn signature(view: &Rendered) -> String {
    let mut hasher = Sha256::new();
    hasher.update(view.text.as_bytes());
    hasher.update([0x1e]);
    for row in &view.controls {
        for control in row {
            hasher.update(control.label.as_bytes());
            hasher.update([0x1f]);
            hasher.update(control.action.as_bytes());
            hasher.update([0x1d]);
        }
        hasher.update([0x1c]);
    }
    hex::encode(hasher.finalize())
}
