//! API client module for Raindrop.io

pub mod client;
pub mod user;

use anyhow::Result;

use crate::auth::{self, AuthEnv, SecretStore, TokenExchange};
use crate::config::Config;

pub use client::{ApiError, RaindropClient};
pub use user::User;

/// Build a client whose token source matches the environment and the
/// contents of the secret store.
pub async fn connect(env: &AuthEnv) -> Result<RaindropClient> {
    let keyring_dir = Config::keyring_dir()?;
    let source = auth::source::resolve(
        env,
        SecretStore::open_async(env, &keyring_dir),
        TokenExchange::new()?,
    )
    .await?;
    Ok(RaindropClient::new(source)?)
}

/// Show current user info
pub async fn whoami(env: &AuthEnv) -> Result<()> {
    let user = connect(env).await?.get_user().await?;

    println!("Name:  {}", user.full_name);
    if !user.email.is_empty() {
        println!("Email: {}", user.email);
    }
    println!("Plan:  {}", user.plan());
    println!("ID:    {}", user.id);

    Ok(())
}
