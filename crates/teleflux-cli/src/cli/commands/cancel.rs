//! `teleflux cancel <id>` – cancel a job in a running `fetch`.

use anyhow::Result;

use crate::cli::control_socket;

pub async fn run_cancel(id: u64) -> Result<()> {
    match control_socket::send_default(&format!("cancel {id}")).await? {
        Some(reply) => println!("{reply}"),
        None => println!("No running fetch (control socket not found)."),
    }
    Ok(())
}
