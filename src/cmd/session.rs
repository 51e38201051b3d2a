//! Session commands: `cards register`, `cards login`, `cards logout`,
//! `cards whoami`.

use anyhow::{Context, Result};

use hardcore_cards::client::{CardsClient, Outcome};
use hardcore_cards::config::CardsConfig;
use hardcore_cards::session::{LoginCredentials, SessionStatus};

pub async fn cmd_login(
    config: &CardsConfig,
    username: Option<&str>,
    captcha: Option<&str>,
) -> Result<()> {
    use dialoguer::{Input, Password};

    let client = CardsClient::from_config(config)?;

    let username = match username {
        Some(name) => name.to_string(),
        None => Input::<String>::new()
            .with_prompt("Username")
            .interact_text()
            .context("Failed to read username")?,
    };
    let password = Password::new()
        .with_prompt("Password")
        .interact()
        .context("Failed to read password")?;

    let mut credentials = LoginCredentials::new(username, password);
    if let Some(code) = captcha {
        credentials = credentials.with_captcha(code);
    }

    match client.login(credentials).await {
        Outcome::Success(session) => {
            let name = session
                .claims()
                .map(|c| c.subject_name)
                .unwrap_or_default();
            println!(
                "{} Logged in as {}",
                console::style("✓").green(),
                console::style(name).bold()
            );
            Ok(())
        }
        Outcome::BusinessError { message, .. } => {
            anyhow::bail!("Login refused: {}", message)
        }
        Outcome::AuthFailure(reason) => anyhow::bail!("Login failed: {}", reason),
        Outcome::TransportError(failure) => {
            anyhow::bail!("Could not reach {}: {}", config.base_url(), failure)
        }
    }
}

pub async fn cmd_register(config: &CardsConfig, username: Option<&str>) -> Result<()> {
    use dialoguer::{Input, Password};

    let client = CardsClient::from_config(config)?;

    let username = match username {
        Some(name) => name.to_string(),
        None => Input::<String>::new()
            .with_prompt("Username")
            .interact_text()
            .context("Failed to read username")?,
    };
    if client.users().username_taken(&username).await.into_result()? {
        anyhow::bail!("Username {} is already taken", username);
    }
    let password = Password::new()
        .with_prompt("Password")
        .with_confirmation("Repeat password", "Passwords do not match")
        .interact()
        .context("Failed to read password")?;

    client
        .register(LoginCredentials::new(username.as_str(), password))
        .await
        .into_result()
        .context("Registration failed")?;
    println!(
        "{} Registered {}. Log in with `cards login`.",
        console::style("✓").green(),
        console::style(&username).bold()
    );
    Ok(())
}

pub fn cmd_logout(config: &CardsConfig) -> Result<()> {
    let client = CardsClient::from_config(config)?;
    if client.status() == SessionStatus::Absent {
        println!("Not logged in.");
        return Ok(());
    }
    client.session().logout();
    println!("Logged out.");
    Ok(())
}

pub fn cmd_whoami(config: &CardsConfig) -> Result<()> {
    let client = CardsClient::from_config(config)?;
    let view = client.session().session_view();

    let Some(claims) = view.claims else {
        println!("Not logged in.");
        return Ok(());
    };

    println!();
    println!("{}", console::style("Session").bold().cyan());
    println!("  user    = {} (id {})", claims.subject_name, claims.subject_id);
    let status = client.status();
    println!("  status  = {}", status);
    let expires = chrono::DateTime::from_timestamp_millis(claims.expires_at_epoch_ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| claims.expires_at_epoch_ms.to_string());
    println!("  expires = {}", expires);
    if !claims.grants.is_empty() {
        let grants: Vec<&str> = claims.grants.iter().map(String::as_str).collect();
        println!("  grants  = {}", grants.join(", "));
    }
    if status == SessionStatus::Expired {
        println!();
        println!(
            "{}",
            console::style("The access credential has expired; the next call will refresh it.")
                .dim()
        );
    }
    println!();
    Ok(())
}
