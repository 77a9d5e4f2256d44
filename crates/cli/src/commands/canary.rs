//! Update injection and canary withdrawal

use anyhow::{bail, Result};
use colored::Colorize;
use fleetguard_lib::{unix_now, Envelope, InboundMessage, UpdatePackage};
use serde::Deserialize;

use crate::client::ApiClient;
use crate::output::{print_json, print_success, OutputFormat};

const CANARY_AGENT: &str = "canary_agent";
const SENDER: &str = "fgctl";

#[derive(Debug, Deserialize)]
struct Accepted {
    message_id: String,
}

/// What to inject
#[derive(Debug, Clone)]
pub struct InjectArgs {
    pub update_id: Option<String>,
    pub version: String,
    pub description: String,
    pub targets: Vec<String>,
    pub fleet_size: Option<usize>,
}

/// Build the update package; explicit targets win over a generated fleet
pub fn build_update(args: &InjectArgs) -> Result<UpdatePackage> {
    let target_subjects = if !args.targets.is_empty() {
        args.targets.clone()
    } else if let Some(n) = args.fleet_size {
        (1..=n).map(|i| format!("server-{}", i)).collect()
    } else {
        bail!("Give --target at least once or --fleet-size");
    };

    let timestamp = unix_now();
    Ok(UpdatePackage {
        update_id: args
            .update_id
            .clone()
            .unwrap_or_else(|| format!("UPD-{}", timestamp)),
        version: args.version.clone(),
        description: args.description.clone(),
        target_subjects,
        timestamp,
    })
}

/// Post an update package to the canary agent
pub async fn inject(client: &ApiClient, args: InjectArgs, format: OutputFormat) -> Result<()> {
    let update = build_update(&args)?;
    let message = InboundMessage {
        sender: SENDER.to_string(),
        recipient: CANARY_AGENT.to_string(),
        envelope: Envelope::new(update.clone()),
    };

    let accepted: Accepted = client.post("submit", &message).await?;

    match format {
        OutputFormat::Json => print_json(&message),
        OutputFormat::Table => {
            print_success(&format!(
                "Update {} submitted for canary testing",
                update.update_id.cyan()
            ));
            println!("Message:  {}", accepted.message_id);
            println!("Version:  {}", update.version);
            println!("Targets:  {}", update.target_subjects.len());
        }
    }
    Ok(())
}

/// Abort a running canary test
pub async fn withdraw(client: &ApiClient, update_id: &str, format: OutputFormat) -> Result<()> {
    let path = format!("withdraw/{}", update_id);
    let body: serde_json::Value = client.post_empty(&path).await?;

    match format {
        OutputFormat::Json => print_json(&body),
        OutputFormat::Table => print_success(&format!("Withdrew canary test for {}", update_id)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> InjectArgs {
        InjectArgs {
            update_id: Some("UPD-7".to_string()),
            version: "2.0.0".to_string(),
            description: "new scheduler".to_string(),
            targets: Vec::new(),
            fleet_size: None,
        }
    }

    #[test]
    fn test_fleet_size_generates_targets() {
        let update = build_update(&InjectArgs {
            fleet_size: Some(3),
            ..args()
        })
        .unwrap();
        assert_eq!(update.update_id, "UPD-7");
        assert_eq!(update.target_subjects, vec!["server-1", "server-2", "server-3"]);
    }

    #[test]
    fn test_explicit_targets_win() {
        let update = build_update(&InjectArgs {
            targets: vec!["db-1".to_string()],
            fleet_size: Some(50),
            ..args()
        })
        .unwrap();
        assert_eq!(update.target_subjects, vec!["db-1"]);
    }

    #[test]
    fn test_targets_required() {
        assert!(build_update(&args()).is_err());
    }

    #[tokio::test]
    async fn test_inject_posts_envelope_to_canary() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/submit")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "sender": "fgctl",
                "recipient": "canary_agent",
                "envelope": {"message": {"kind": "update_package", "update_id": "UPD-7"}}
            })))
            .with_status(202)
            .with_body(r#"{"message_id":"abc"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        inject(
            &client,
            InjectArgs {
                fleet_size: Some(2),
                ..args()
            },
            OutputFormat::Json,
        )
        .await
        .unwrap();

        mock.assert_async().await;
    }
}
