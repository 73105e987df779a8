//! Telegram account status as reported by the backend.

use anyhow::Result;
use client::api::TaskApi;
use shared::{config::Config, models::TelegramAuthStatus};

use super::{BackendContext, connect};

pub async fn status(config: &Config) -> Result<()> {
    let status = connect(config)?
        .telegram_auth_status()
        .await
        .backend_context("failed to fetch Telegram account status")?;
    println!("{}", render(status));
    Ok(())
}

fn render(status: TelegramAuthStatus) -> &'static str {
    if status.logged_in {
        "Telegram account: connected"
    } else {
        "Telegram account: not connected; complete the Telegram login on the backend first"
    }
}
