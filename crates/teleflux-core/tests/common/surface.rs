//! Messaging surface that records every edit.

use async_trait::async_trait;
use std::sync::Mutex;

use teleflux_core::publisher::{EditError, MessagingSurface, Rendered};
use teleflux_core::OwnerId;

#[derive(Default)]
pub struct RecordingSurface {
    edits: Mutex<Vec<(OwnerId, Rendered)>>,
}

impl RecordingSurface {
    pub fn edits_for(&self, owner: OwnerId) -> Vec<Rendered> {
        self.edits
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| *o == owner)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn last_text(&self, owner: OwnerId) -> Option<String> {
        self.edits_for(owner).pop().map(|r| r.text)
    }
}

#[async_trait]
impl MessagingSurface for RecordingSurface {
    async fn edit(&self, owner: OwnerId, view: &Rendered) -> Result<(), EditError> {
        self.edits.lock().unwrap().push((owner, view.clone()));
        Ok(())
    }
}
