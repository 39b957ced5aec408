//! OAuth device code sign-in for Azure DevOps
//!
//! The user is shown a verification URL and code; the token request then
//! polls until they finish signing in elsewhere.

use crate::config::{
    OAUTH_AUTH_URL, OAUTH_CLIENT_ID, OAUTH_DEVICE_CODE_URL, OAUTH_DEVOPS_SCOPE, OAUTH_TOKEN_URL,
};
use crate::error::{AppError, Result};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, DeviceAuthorizationUrl, Scope, StandardDeviceAuthorizationResponse,
    TokenResponse, TokenUrl,
};

fn auth_error(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::Auth(format!("{}: {}", context, e))
}

/// Obtain an Azure DevOps access token through the device code flow
pub async fn obtain_oauth_token() -> Result<String> {
    let client = BasicClient::new(ClientId::new(OAUTH_CLIENT_ID.to_string()))
        .set_auth_uri(
            AuthUrl::new(OAUTH_AUTH_URL.to_string()).map_err(|e| auth_error("Invalid auth URL", e))?,
        )
        .set_token_uri(
            TokenUrl::new(OAUTH_TOKEN_URL.to_string())
                .map_err(|e| auth_error("Invalid token URL", e))?,
        )
        .set_device_authorization_url(
            DeviceAuthorizationUrl::new(OAUTH_DEVICE_CODE_URL.to_string())
                .map_err(|e| auth_error("Invalid device code URL", e))?,
        );

    // Token endpoints must not be followed through redirects
    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let details: StandardDeviceAuthorizationResponse = client
        .exchange_device_code()
        .add_scope(Scope::new(OAUTH_DEVOPS_SCOPE.to_string()))
        .request_async(&http_client)
        .await
        .map_err(|e| auth_error("Device authorization failed", e))?;

    tracing::info!(
        "To sign in to Azure DevOps, open {} and enter code {}",
        details.verification_uri().url(),
        details.user_code().secret()
    );

    let token = client
        .exchange_device_access_token(&details)
        .request_async(&http_client, tokio::time::sleep, None)
        .await
        .map_err(|e| auth_error("Token exchange failed", e))?;

    tracing::info!("Azure DevOps OAuth sign-in completed");

    Ok(token.access_token().secret().to_string())
}
