//! Messaging surface that prints the dashboard to stdout.

use async_trait::async_trait;
use teleflux_core::publisher::{EditError, MessagingSurface, Rendered};
use teleflux_core::OwnerId;

#[derive(Debug, Default)]
pub struct TerminalSurface;

#[async_trait]
impl MessagingSurface for TerminalSurface {
    async fn edit(&self, _owner: OwnerId, view: &Rendered) -> Result<(), EditError> {
        let actions: Vec<&str> = view
            .controls
            .iter()
            .flatten()
            .map(|c| c.action.as_str())
            .collect();
        println!("\n{}", view.text);
        if !actions.is_empty() {
            println!("[{}]", actions.join(" | "));
        }
        Ok(())
    }
}
