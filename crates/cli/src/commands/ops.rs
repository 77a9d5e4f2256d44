//! Status log, counters and health views

use anyhow::Result;
use colored::Colorize;
use fleetguard_lib::{HealthResponse, StatusUpdate};
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_unix, print_json, print_table, print_warning, OutputFormat,
};

/// Row for status updates table
#[derive(Debug, Tabled, Serialize)]
struct StatusRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Incident")]
    incident_id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Affected")]
    affected: usize,
}

/// Row for counters table
#[derive(Debug, Tabled, Serialize)]
struct CounterRow {
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Counter")]
    counter: String,
    #[tabled(rename = "Value")]
    value: u64,
}

/// Show the notifier's most recent status updates
pub async fn show_status(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let updates: Vec<StatusUpdate> = client.get(&format!("status?limit={}", limit)).await?;

    if let OutputFormat::Json = format {
        print_json(&updates);
        return Ok(());
    }

    let rows: Vec<StatusRow> = updates
        .iter()
        .map(|u| StatusRow {
            time: format_unix(u.timestamp),
            incident_id: u.incident_id.clone(),
            status: color_status(&u.status.to_string()),
            title: u.title.clone(),
            affected: u.affected_subjects.len(),
        })
        .collect();
    print_table(&rows, format);
    Ok(())
}

/// Flatten the per-agent counter maps into rows
fn counter_rows(counters: &BTreeMap<String, BTreeMap<String, u64>>) -> Vec<CounterRow> {
    counters
        .iter()
        .flat_map(|(agent, values)| {
            values.iter().map(move |(counter, value)| CounterRow {
                agent: agent.clone(),
                counter: counter.clone(),
                value: *value,
            })
        })
        .collect()
}

/// Show work counters for every agent in the process
pub async fn show_counters(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let counters: BTreeMap<String, BTreeMap<String, u64>> = client.get("counters").await?;

    match format {
        OutputFormat::Json => print_json(&counters),
        OutputFormat::Table => print_table(&counter_rows(&counters), format),
    }
    Ok(())
}

/// Show component health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (code, health): (_, HealthResponse) = client.get_with_status("healthz").await?;

    if let OutputFormat::Json = format {
        print_json(&health);
        return Ok(());
    }

    let overall = serde_json::to_value(health.status)?
        .as_str()
        .unwrap_or_default()
        .to_string();
    println!("{}", "Agent Health".bold());
    println!("{}", "=".repeat(50));
    println!("Overall:  {} ({})", color_status(&overall), code);
    println!();

    let mut names: Vec<&String> = health.components.keys().collect();
    names.sort();
    for name in names {
        let component = &health.components[name];
        let status = serde_json::to_value(component.status)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        match &component.message {
            Some(message) => println!("  {:<12} {}  {}", name, color_status(&status), message),
            None => println!("  {:<12} {}", name, color_status(&status)),
        }
    }

    if !code.is_success() {
        print_warning("Agent reports itself unavailable");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_rows_are_flattened_in_order() {
        let mut counters = BTreeMap::new();
        counters.insert(
            "response_agent".to_string(),
            BTreeMap::from([
                ("actions_taken".to_string(), 4),
                ("incidents_resolved".to_string(), 3),
            ]),
        );
        counters.insert(
            "canary_agent".to_string(),
            BTreeMap::from([("tests_run".to_string(), 2)]),
        );

        let rows = counter_rows(&counters);
        let flat: Vec<(&str, &str, u64)> = rows
            .iter()
            .map(|r| (r.agent.as_str(), r.counter.as_str(), r.value))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("canary_agent", "tests_run", 2),
                ("response_agent", "actions_taken", 4),
                ("response_agent", "incidents_resolved", 3),
            ]
        );
    }

    #[tokio::test]
    async fn test_show_status_reads_agent_log() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/status")
            .match_query(mockito::Matcher::UrlEncoded(
                "limit".to_string(),
                "5".to_string(),
            ))
            .with_status(200)
            .with_body(
                r#"[{"incident_id":"ACTION-1","status":"RESOLVED","title":"ROLLBACK - x",
                     "description":"d","affected_subjects":["UPD-1"],"timestamp":0}]"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        show_status(&client, 5, OutputFormat::Json).await.unwrap();
        mock.assert_async().await;
    }
}
