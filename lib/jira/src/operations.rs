//! Jira operations exposed by the hosted application.

use crate::client::JiraClient;
use async_trait::async_trait;
use keyhost_application::{
    ConfigurationError, HostedApplication, Operation, OperationContext, OperationError,
    OperationHandler, decode_arguments,
};
use keyhost_integration::Integration;
use reqwest::Method;
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

/// Name the application is registered under.
pub const APPLICATION_NAME: &str = "jira";

const DEFAULT_MAX_RESULTS: u32 = 50;
const MAX_RESULTS_LIMIT: u32 = 100;

/// Builds the Jira application bound to `integration`.
///
/// # Errors
///
/// Returns an error if the operation table is invalid.
pub fn application(
    integration: Integration,
    client: JiraClient,
) -> Result<HostedApplication, Report<ConfigurationError>> {
    let client = Arc::new(client);

    HostedApplication::builder(APPLICATION_NAME, integration)
        .operation(
            Operation::public("serverInfo", Arc::new(ServerInfo(client.clone())))
                .with_description("Returns version information about the Jira site"),
        )
        .operation(
            Operation::authenticated("getIssue", Arc::new(GetIssue(client.clone())))
                .with_description("Fetches an issue by key"),
        )
        .operation(
            Operation::authenticated("searchIssues", Arc::new(SearchIssues(client.clone())))
                .with_description("Searches issues with a JQL query"),
        )
        .operation(
            Operation::authenticated("createIssue", Arc::new(CreateIssue(client)))
                .with_description("Creates an issue in a project"),
        )
        .build()
}

/// Checks the `PROJECT-123` shape of an issue key.
fn validate_issue_key(key: &str) -> Result<(), OperationError> {
    let valid = key.split_once('-').is_some_and(|(project, number)| {
        project.starts_with(|c: char| c.is_ascii_uppercase())
            && project
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            && !number.is_empty()
            && number.chars().all(|c| c.is_ascii_digit())
    });

    if valid {
        Ok(())
    } else {
        Err(OperationError::invalid_arguments(format!(
            "'{key}' is not an issue key"
        )))
    }
}

struct ServerInfo(Arc<JiraClient>);

#[async_trait]
impl OperationHandler for ServerInfo {
    async fn call(
        &self,
        _context: OperationContext,
        _arguments: JsonValue,
    ) -> Result<JsonValue, OperationError> {
        let request = self.0.request(Method::GET, "serverInfo", None);
        self.0.send(request).await
    }
}

#[derive(Debug, Deserialize)]
struct GetIssueArgs {
    key: String,
}

struct GetIssue(Arc<JiraClient>);

#[async_trait]
impl OperationHandler for GetIssue {
    async fn call(
        &self,
        context: OperationContext,
        arguments: JsonValue,
    ) -> Result<JsonValue, OperationError> {
        let args: GetIssueArgs = decode_arguments(arguments)?;
        validate_issue_key(&args.key)?;

        let request = self.0.request(
            Method::GET,
            &format!("issue/{}", args.key),
            Some(context.credential()?),
        );
        self.0.send(request).await
    }
}

#[derive(Debug, Deserialize)]
struct SearchIssuesArgs {
    jql: String,
    #[serde(default)]
    max_results: Option<u32>,
}

impl SearchIssuesArgs {
    fn query(&self) -> Result<Vec<(&'static str, String)>, OperationError> {
        if self.jql.trim().is_empty() {
            return Err(OperationError::invalid_arguments("jql must not be empty"));
        }
        let max_results = self
            .max_results
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_LIMIT);

        Ok(vec![
            ("jql", self.jql.clone()),
            ("maxResults", max_results.to_string()),
        ])
    }
}

struct SearchIssues(Arc<JiraClient>);

#[async_trait]
impl OperationHandler for SearchIssues {
    async fn call(
        &self,
        context: OperationContext,
        arguments: JsonValue,
    ) -> Result<JsonValue, OperationError> {
        let args: SearchIssuesArgs = decode_arguments(arguments)?;
        let query = args.query()?;

        let request = self
            .0
            .request(Method::GET, "search", Some(context.credential()?))
            .query(&query);
        self.0.send(request).await
    }
}

#[derive(Debug, Deserialize)]
struct CreateIssueArgs {
    project: String,
    summary: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_issue_type")]
    issue_type: String,
}

fn default_issue_type() -> String {
    "Task".to_string()
}

impl CreateIssueArgs {
    fn body(&self) -> Result<JsonValue, OperationError> {
        if self.project.trim().is_empty() {
            return Err(OperationError::invalid_arguments("project must not be empty"));
        }
        if self.summary.trim().is_empty() {
            return Err(OperationError::invalid_arguments("summary must not be empty"));
        }

        let mut fields = json!({
            "project": { "key": self.project },
            "summary": self.summary,
            "issuetype": { "name": self.issue_type },
        });
        if let Some(description) = &self.description {
            fields["description"] = json!(description);
        }
        Ok(json!({ "fields": fields }))
    }
}

struct CreateIssue(Arc<JiraClient>);

#[async_trait]
impl OperationHandler for CreateIssue {
    async fn call(
        &self,
        context: OperationContext,
        arguments: JsonValue,
    ) -> Result<JsonValue, OperationError> {
        let args: CreateIssueArgs = decode_arguments(arguments)?;
        let body = args.body()?;

        let request = self
            .0
            .request(Method::POST, "issue", Some(context.credential()?))
            .json(&body);
        self.0.send(request).await
    }
}
