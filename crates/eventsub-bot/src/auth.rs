//! `eventsub-bot auth …` subcommands.
//!
//! These talk to a person at a terminal, so results are printed rather than
//! logged.

use eventsub_transport::oauth::{OAuthClient, TokenSet};

use crate::{
    config::{AuthAction, AuthArgs, ConfigError},
    env_file,
};

pub const ACCESS_TOKEN_KEY: &str = "BOT_USER_ACCESS_TOKEN";
pub const REFRESH_TOKEN_KEY: &str = "BOT_REFRESH_TOKEN";

pub async fn run(action: AuthAction, args: AuthArgs) -> anyhow::Result<()> {
    let client_id = required(args.client_id.as_deref(), "TWITCH_CLIENT_ID");

    match action {
        AuthAction::Start { scopes } => {
            let client = OAuthClient::new(&args.id_base, client_id?)?;
            let authorization = client.start_device_flow(&scopes).await?;

            println!("=== Device Code ===");
            println!("Visit: {}", authorization.verification_uri);
            println!("Enter code: {}", authorization.user_code);
            println!("Scopes: {scopes}");
            println!("Waiting for approval ... (Ctrl+C to cancel)");

            let tokens = client.wait_for_token(&authorization).await?;
            println!("Approved! scopes: {:?}", tokens.scope);
            save_tokens(&args, &tokens)?;
            validate(&client, &tokens.access_token).await
        }
        AuthAction::Refresh => {
            let refresh_token = required(args.refresh_token.as_deref(), REFRESH_TOKEN_KEY);
            let (client_id, refresh_token) = match (client_id, refresh_token) {
                (Ok(client_id), Ok(refresh_token)) => (client_id, refresh_token),
                (client_id, refresh_token) => {
                    let missing = [client_id.err(), refresh_token.err()]
                        .into_iter()
                        .flatten()
                        .flat_map(|err| match err {
                            ConfigError::Missing(keys) => keys,
                            ConfigError::Invalid { field, .. } => vec![field],
                        })
                        .collect();
                    return Err(ConfigError::Missing(missing).into());
                }
            };

            let client = OAuthClient::new(&args.id_base, client_id)?;
            let tokens = client.refresh(refresh_token).await?;
            save_tokens(&args, &tokens)?;
            validate(&client, &tokens.access_token).await
        }
        AuthAction::Validate => {
            let client = OAuthClient::new(&args.id_base, client_id?)?;
            let access_token = required(args.access_token.as_deref(), ACCESS_TOKEN_KEY)?;
            validate(&client, access_token).await
        }
    }
}

fn required<'a>(value: Option<&'a str>, key: &'static str) -> Result<&'a str, ConfigError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing(vec![key]))
}

fn save_tokens(args: &AuthArgs, tokens: &TokenSet) -> anyhow::Result<()> {
    let mut updates = vec![(ACCESS_TOKEN_KEY, tokens.access_token.as_str())];
    if let Some(refresh_token) = tokens.refresh_token.as_deref() {
        updates.push((REFRESH_TOKEN_KEY, refresh_token));
    }
    env_file::update(&args.env_file, &updates)?;

    let keys: Vec<&str> = updates.iter().map(|(key, _)| *key).collect();
    println!(
        "Updated {} with keys: {}",
        args.env_file.display(),
        keys.join(", ")
    );
    Ok(())
}

async fn validate(client: &OAuthClient, access_token: &str) -> anyhow::Result<()> {
    let info = client.validate(access_token).await?;
    println!("Token valid for:");
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
