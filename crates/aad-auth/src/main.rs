//! aad-verify
//!
//! Operator tool: validates one `Authorization` header value with the gate
//! configured from `AAD_*` environment variables.
//!
//! ```text
//! aad-verify "Bearer eyJ0eXAiOiJKV1Qi..."
//! AAD_AUTHORIZATION="Bearer eyJ0eXAi..." aad-verify
//! ```
//!
//! Prints the validated claims as JSON and exits 0, or prints the error code
//! and message and exits 1.

use aad_auth::{AuthConfig, AuthenticationGate};
use std::env;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aad_auth=info,aad=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AuthConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        client_id = %config.app_client_id,
        token_version = ?config.token_version,
        "Configuration loaded successfully"
    );

    let Some(authorization) = env::args().nth(1).or_else(|| env::var("AAD_AUTHORIZATION").ok())
    else {
        eprintln!("usage: aad-verify <authorization-header-value> (or set AAD_AUTHORIZATION)");
        return Ok(ExitCode::from(2));
    };

    let gate = AuthenticationGate::new(config)?;

    match gate.authenticate(&authorization).await {
        Ok(principal) => {
            let output = serde_json::json!({
                "is_guest": principal.is_guest,
                "claims": principal.claims,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_response())?);
            Ok(ExitCode::FAILURE)
        }
    }
}
