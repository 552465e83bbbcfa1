//! Request options for the named operations.
//!
//! Fields the client only forwards (CI metadata, commit info, test results)
//! stay as `serde_json::Value`; the service owns their schema.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which kind of test run is being recorded.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestingType {
    E2e,
    Component,
}

/// Capabilities advertised when creating a run.
pub fn runner_capabilities() -> Value {
    serde_json::json!({
        "dynamicSpecsInSerialMode": true,
        "skipSpecAction": true,
    })
}

/// Options for [`CloudApi::create_run`](crate::CloudApi::create_run).
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunOptions {
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_build_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<Value>,
    pub specs: Vec<String>,
    pub spec_pattern: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testing_type: Option<TestingType>,
    /// A failure count, or `false` to disable auto-cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_cancel_after_failures: Option<Value>,
    /// Only sent during preflight.
    #[serde(skip)]
    pub browser: Option<Value>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl CreateRunOptions {
    /// The subset of run options sent with the preflight negotiation.
    pub fn preflight_info(&self) -> PreflightInfo {
        PreflightInfo {
            project_id: Some(self.project_id.clone()),
            ci_build_id: self.ci_build_id.clone(),
            browser: self.browser.clone(),
            testing_type: self.testing_type,
            parallel: self.parallel,
        }
    }
}

/// Caller-supplied fields merged into the preflight payload.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreflightInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_build_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testing_type: Option<TestingType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
}

/// Options for [`CloudApi::create_instance`](crate::CloudApi::create_instance).
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceOptions {
    #[serde(skip)]
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    pub group_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Value>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

/// Options for [`CloudApi::post_instance_tests`](crate::CloudApi::post_instance_tests).
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTestsOptions {
    #[serde(skip)]
    pub instance_id: String,
    #[serde(skip)]
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    pub tests: Vec<Value>,
    pub hooks: Vec<Value>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

/// Options for [`CloudApi::update_instance_stdout`](crate::CloudApi::update_instance_stdout).
#[derive(Debug, Clone, Default)]
pub struct InstanceStdoutOptions {
    pub instance_id: String,
    pub run_id: String,
    pub stdout: String,
    pub timeout: Option<Duration>,
}

/// Options for [`CloudApi::post_instance_results`](crate::CloudApi::post_instance_results).
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceResultsOptions {
    #[serde(skip)]
    pub instance_id: String,
    #[serde(skip)]
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshots: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter_stats: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

/// Dashboard URLs returned by [`CloudApi::auth_urls`](crate::CloudApi::auth_urls).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthUrls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_logout_url: Option<String>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, Value>,
}
