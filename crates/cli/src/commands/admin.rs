//! Admin sign-in shared by the privileged commands.

use clap::Args;
use secrecy::SecretString;
use soltan_core::Email;
use soltan_storefront::{AdminStatus, Store};
use tracing::info;

use super::CommandError;

const PASSWORD_ENV: &str = "SOLTAN_ADMIN_PASSWORD";

/// Admin credentials.
#[derive(Args)]
pub struct Credentials {
    /// Admin email address
    #[arg(short, long)]
    pub email: String,

    /// Admin password (defaults to `SOLTAN_ADMIN_PASSWORD`)
    #[arg(long)]
    pub password: Option<String>,
}

impl Credentials {
    fn password(&self) -> Result<SecretString, CommandError> {
        self.password
            .clone()
            .or_else(|| std::env::var(PASSWORD_ENV).ok())
            .filter(|password| !password.is_empty())
            .map(SecretString::from)
            .ok_or(CommandError::MissingPassword(PASSWORD_ENV))
    }
}

/// Sign in and confirm the account is an admin.
///
/// Resolves right away instead of waiting for the debounced re-check that
/// the sign-in event schedules.
///
/// # Errors
///
/// Returns an error if the email is malformed, no password is available, the
/// credentials are refused, or the account is not on the allowlist.
pub async fn sign_in(
    store: &Store,
    credentials: &Credentials,
) -> Result<(), Box<dyn std::error::Error>> {
    let email = Email::parse(&credentials.email)?;
    let password = credentials.password()?;

    store.admin().sign_in(&email, &password).await?;
    match store.admin().resolve().await {
        AdminStatus::Granted => {
            info!(email = %email, "Admin access granted");
            Ok(())
        }
        status => {
            info!(email = %email, ?status, "Admin access refused");
            Err(CommandError::NotAdmin(email.into_inner()).into())
        }
    }
}
