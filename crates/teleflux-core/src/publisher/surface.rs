//! What the publisher renders and where it sends it.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::ids::OwnerId;

/// One button: a label and the action string sent back when it is pressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub label: String,
    pub action: String,
}

impl Control {
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}

/// Rendered view: text plus rows of controls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub controls: Vec<Vec<Control>>,
}

/// Produces the current view for an owner.
pub trait Renderer: Send + Sync {
    fn render(&self, owner: OwnerId) -> Rendered;
}

/// Failure of one edit on the messaging surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The surface already shows this content.
    #[error("message not modified")]
    NotModified,

    #[error("transient error: {0}")]
    Transient(String),

    #[error("permanent error: {0}")]
    Permanent(String),
}

/// The external surface (chat message, terminal, ...) that shows an owner's view.
#[async_trait]
pub trait MessagingSurface: Send + Sync {
    async fn edit(&self, owner: OwnerId, view: &Rendered) -> Result<(), EditError>;
}
