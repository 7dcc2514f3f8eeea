//! `teleflux pause <id>` – toggle pause of a job in a running `fetch`.

use anyhow::Result;

use crate::cli::control_socket;

pub async fn run_pause(id: u64) -> Result<()> {
    match control_socket::send_default(&format!("pause {id}")).await? {
        Some(reply) => println!("{reply}"),
        None => println!("No running fetch (control socket not found)."),
    }
    Ok(())
}
