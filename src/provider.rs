//! Provider abstraction used by the sequencer.
//!
//! The AWS implementation lives in [`crate::aws`]; tests drive the sequencer
//! through a recording fake instead.

use async_trait::async_trait;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Service error ocurred: {0}.")]
    ServiceError(String),

    #[error("Unknown error ocurred: {0}.")]
    UnknownError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRequest {
    pub name: String,
    pub visibility_timeout: u32,
    pub delay_seconds: u32,
    pub wait_time_seconds: u32,
}

impl QueueRequest {
    /// Queue attributes as sent on the wire.
    pub fn attributes(&self) -> [(&'static str, String); 3] {
        [
            ("VisibilityTimeout", self.visibility_timeout.to_string()),
            ("DelaySeconds", self.delay_seconds.to_string()),
            (
                "ReceiveMessageWaitTimeSeconds",
                self.wait_time_seconds.to_string(),
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSummary {
    Ok,
    Initializing,
    Impaired,
    InsufficientData,
    NotApplicable,
    Unknown,
}

#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Launches exactly one instance and returns the ids found in the response.
    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<String>>;

    /// Returns the instance status, or `None` while the provider does not
    /// report the instance yet.
    async fn instance_status(&self, instance_id: &str) -> Result<Option<StatusSummary>>;

    async fn associate_address(&self, instance_id: &str, public_ip: &str) -> Result<()>;

    async fn create_tags(&self, instance_id: &str, tags: &[Tag]) -> Result<()>;

    async fn create_queue(&self, request: &QueueRequest) -> Result<String>;

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()>;

    async fn put_object(&self, bucket: &str, key: &str) -> Result<()>;
}
