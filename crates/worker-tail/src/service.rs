// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use std::fmt;

/// API credential used to open tail sessions. Never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiToken(<redacted>)")
    }
}

/// One worker whose logs should be tailed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    /// Worker script name; also the `service_name` label on forwarded records.
    pub name: String,
    pub account_id: String,
    pub api_token: ApiToken,
    /// Deployment environment. Changes the tail endpoint and adds an `env` label.
    #[serde(default)]
    pub env: Option<String>,
}

impl ServiceDescriptor {
    pub fn new(
        name: impl Into<String>,
        account_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            account_id: account_id.into(),
            api_token: ApiToken::new(api_token),
            env: None,
        }
    }

    #[must_use]
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }
}
