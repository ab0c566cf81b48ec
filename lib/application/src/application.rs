//! The hosted application: one integration and an ordered set of operations.

use crate::error::ConfigurationError;
use crate::operation::{Operation, OperationInfo};
use keyhost_integration::Integration;
use rootcause::prelude::Report;
use std::collections::HashMap;
use tracing::debug;

/// An externally-defined application served by the process.
///
/// Owns exactly one integration for its whole lifetime. Operations keep
/// the order they were declared in.
#[derive(Debug)]
pub struct HostedApplication {
    name: String,
    integration: Integration,
    operations: Vec<Operation>,
    by_name: HashMap<String, usize>,
}

impl HostedApplication {
    /// Starts building an application bound to an integration.
    #[must_use]
    pub fn builder(name: impl Into<String>, integration: Integration) -> HostedApplicationBuilder {
        HostedApplicationBuilder {
            name: name.into(),
            integration,
            operations: Vec::new(),
        }
    }

    /// Returns the application name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the application's integration.
    #[must_use]
    pub fn integration(&self) -> &Integration {
        &self.integration
    }

    /// Looks up an operation by name.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.by_name.get(name).map(|&index| &self.operations[index])
    }

    /// Returns operation descriptions in declaration order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationInfo> {
        self.operations.iter().map(Operation::info)
    }
}

/// Builder for [`HostedApplication`].
pub struct HostedApplicationBuilder {
    name: String,
    integration: Integration,
    operations: Vec<Operation>,
}

impl HostedApplicationBuilder {
    /// Adds an operation.
    #[must_use]
    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Validates names and builds the application.
    ///
    /// # Errors
    ///
    /// Returns an error if the application or any operation has an empty
    /// name, or if two operations share a name.
    pub fn build(self) -> Result<HostedApplication, Report<ConfigurationError>> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::InvalidName {
                reason: "application name is empty".to_string(),
            }
            .into());
        }

        let mut by_name = HashMap::with_capacity(self.operations.len());
        for (index, operation) in self.operations.iter().enumerate() {
            if operation.name().trim().is_empty() {
                return Err(ConfigurationError::InvalidName {
                    reason: format!("operation #{index} of '{}' has an empty name", self.name),
                }
                .into());
            }
            if by_name.insert(operation.name().to_string(), index).is_some() {
                return Err(ConfigurationError::DuplicateOperation {
                    application: self.name.clone(),
                    operation: operation.name().to_string(),
                }
                .into());
            }
        }

        debug!(
            application = %self.name,
            operations = self.operations.len(),
            "hosted application built"
        );

        Ok(HostedApplication {
            name: self.name,
            integration: self.integration,
            operations: self.operations,
            by_name,
        })
    }
}
