//! CLI command handlers, one per file.

mod cancel;
mod concurrency;
mod fetch;
mod pause;
mod status;

pub use cancel::run_cancel;
pub use concurrency::run_concurrency;
pub use fetch::{run_fetch, FetchArgs};
pub use pause::run_pause;
pub use status::run_status;
