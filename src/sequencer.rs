//! Ordered provisioning of the broker, worker, queue, web and storage tiers.
//!
//! Steps run one at a time and the first fatal error ends the run. Nothing is
//! retried and nothing already created is removed; the [`Ledger`] only records
//! what exists so it can be reported.

use std::fmt;
use std::future::Future;
use std::path::Path;

use tracing::{info, warn};

use crate::config::{self, AddressPolicy, AddressedTier, Settings};
use crate::provider::{self, CloudProvider, LaunchRequest, QueueRequest, Tag};
use crate::readiness::{self, WaitError, WaitPolicy};

/// Key of the empty object that materialises the conversations folder.
pub const PLACEHOLDER_KEY: &str = "/conversations/init.txt";

const WORKER_TAG_KEY: &str = "Type";
const WORKER_TAG_VALUE: &str = "echosearch";

const BROKER: &str = "MQTT broker";
const WORKER: &str = "ECHOSEARCH";
const WEB_SERVER: &str = "WEB SERVER";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DeployError {
    #[error("Unable to read configuration: {0}")]
    Config(#[from] config::Error),

    #[error("Could not create {role} EC2 instance: {source}")]
    Launch {
        role: &'static str,
        source: provider::Error,
    },

    #[error("Launching the {role} EC2 instance returned no instances")]
    EmptyLaunch { role: &'static str },

    #[error("Could not read the status of {role} instance {instance_id}: {source}")]
    Status {
        role: &'static str,
        instance_id: String,
        source: provider::Error,
    },

    #[error("{role} instance {instance_id} timed out after {attempts} status checks")]
    ReadinessTimeout {
        role: &'static str,
        instance_id: String,
        attempts: u32,
    },

    #[error("Unable to associate IP address {public_ip} with {instance_id}: {source}")]
    AddressAssociation {
        instance_id: String,
        public_ip: String,
        source: provider::Error,
    },

    #[error("Could not create tags for instance {instance_id}: {source}")]
    Tagging {
        instance_id: String,
        source: provider::Error,
    },

    #[error("Could not create SQS queue {name}: {source}")]
    Queue {
        name: String,
        source: provider::Error,
    },

    #[error("Could not create S3 bucket {bucket}: {source}")]
    Bucket {
        bucket: String,
        source: provider::Error,
    },

    #[error("Could not create object {key} in bucket {bucket}: {source}")]
    Object {
        bucket: String,
        key: String,
        source: provider::Error,
    },
}

impl DeployError {
    /// Process exit status for this failure category. 2 is left to clap
    /// for command-line usage errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            DeployError::Config(_) => 3,
            DeployError::Launch { .. }
            | DeployError::Status { .. }
            | DeployError::Tagging { .. }
            | DeployError::Queue { .. }
            | DeployError::Bucket { .. }
            | DeployError::Object { .. } => 4,
            DeployError::EmptyLaunch { .. } => 5,
            DeployError::ReadinessTimeout { .. } => 6,
            DeployError::AddressAssociation { .. } => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Instance,
    Queue,
    Bucket,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    pub kind: ResourceKind,
    pub id: String,
}

impl fmt::Display for CreatedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ResourceKind::Instance => "EC2 instance",
            ResourceKind::Queue => "SQS queue",
            ResourceKind::Bucket => "S3 bucket",
            ResourceKind::Object => "S3 object",
        };
        write!(f, "{} {}", kind, self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    resources: Vec<CreatedResource>,
}

impl Ledger {
    fn record(&mut self, kind: ResourceKind, id: impl Into<String>) {
        self.resources.push(CreatedResource {
            kind,
            id: id.into(),
        });
    }

    pub fn resources(&self) -> &[CreatedResource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Logs what an aborted run leaves behind.
    pub fn report_abandoned(&self) {
        if self.is_empty() {
            return;
        }
        warn!(
            count = self.len(),
            "Run aborted; these resources were created and are left in place"
        );
        for resource in &self.resources {
            warn!("  {}", resource);
        }
    }
}

pub struct Sequencer<'a> {
    provider: &'a dyn CloudProvider,
    settings: &'a Settings,
    wait_policy: WaitPolicy,
    ledger: Ledger,
}

impl<'a> Sequencer<'a> {
    pub fn new(provider: &'a dyn CloudProvider, settings: &'a Settings) -> Self {
        Self {
            provider,
            settings,
            wait_policy: WaitPolicy::from(&settings.wait),
            ledger: Ledger::default(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    pub async fn run(&mut self) -> Result<(), DeployError> {
        let settings = self.settings;

        self.launch_addressed(BROKER, &settings.mqtt).await?;

        for _ in 0..settings.echosearch.number_of_instances {
            self.launch_worker().await?;
        }

        self.create_queue(
            "Inbox",
            &settings.sqs.inbox_name,
            settings.sqs.inbox_visibility_timeout,
        )
        .await?;
        self.create_queue(
            "Outbox",
            &settings.sqs.outbox_name,
            settings.sqs.outbox_visibility_timeout,
        )
        .await?;

        self.launch_addressed(WEB_SERVER, &settings.webclient).await?;

        self.create_storage().await
    }

    fn launch_request(&self, ami: &str, instance_type: &str) -> LaunchRequest {
        LaunchRequest {
            image_id: ami.to_string(),
            instance_type: instance_type.to_string(),
            key_name: self.settings.general.key_pair_name.clone(),
            security_group: self.settings.general.security_group.clone(),
        }
    }

    async fn launch(
        &mut self,
        role: &'static str,
        request: LaunchRequest,
    ) -> Result<String, DeployError> {
        let instance_ids = match self.provider.run_instances(&request).await {
            Ok(data) => Ok(data),
            Err(source) => Err(DeployError::Launch { role, source }),
        }?;

        let instance_id = instance_ids
            .into_iter()
            .next()
            .ok_or(DeployError::EmptyLaunch { role })?;

        self.ledger.record(ResourceKind::Instance, &instance_id);
        info!(%instance_id, "Created {} EC2 instance", role);
        return Ok(instance_id);
    }

    async fn launch_addressed(
        &mut self,
        role: &'static str,
        tier: &AddressedTier,
    ) -> Result<(), DeployError> {
        let request = self.launch_request(&tier.ami, &tier.instance_type);
        let instance_id = self.launch(role, request).await?;

        readiness::wait_until_ready(self.provider, &instance_id, &self.wait_policy)
            .await
            .map_err(|error| match error {
                WaitError::Timeout { attempts } => DeployError::ReadinessTimeout {
                    role,
                    instance_id: instance_id.clone(),
                    attempts,
                },
                WaitError::Provider(source) => DeployError::Status {
                    role,
                    instance_id: instance_id.clone(),
                    source,
                },
            })?;
        info!(%instance_id, "{} instance running", role);

        let associated = self.provider.associate_address(&instance_id, &tier.ip).await;
        match associated {
            Ok(()) => {
                info!("Successfully allocated {} with instance {}", tier.ip, instance_id);
                Ok(())
            }
            Err(source) => {
                let error = DeployError::AddressAssociation {
                    instance_id,
                    public_ip: tier.ip.clone(),
                    source,
                };
                match self.settings.general.on_address_failure {
                    AddressPolicy::Abort => Err(error),
                    AddressPolicy::Continue => {
                        warn!("{}; continuing", error);
                        Ok(())
                    }
                }
            }
        }
    }

    async fn launch_worker(&mut self) -> Result<(), DeployError> {
        let tier = &self.settings.echosearch;
        let request = self.launch_request(&tier.ami, &tier.instance_type);
        let instance_id = self.launch(WORKER, request).await?;

        let tags = [Tag::new(WORKER_TAG_KEY, WORKER_TAG_VALUE)];
        self.provider
            .create_tags(&instance_id, &tags)
            .await
            .map_err(|source| DeployError::Tagging {
                instance_id: instance_id.clone(),
                source,
            })?;
        info!(%instance_id, "Successfully tagged instance");
        return Ok(());
    }

    async fn create_queue(
        &mut self,
        label: &str,
        name: &str,
        visibility_timeout: u32,
    ) -> Result<(), DeployError> {
        let request = QueueRequest {
            name: name.to_string(),
            visibility_timeout,
            delay_seconds: self.settings.sqs.delay_seconds,
            wait_time_seconds: self.settings.sqs.wait_time_seconds,
        };

        let queue_url = match self.provider.create_queue(&request).await {
            Ok(data) => Ok(data),
            Err(source) => Err(DeployError::Queue {
                name: request.name.clone(),
                source,
            }),
        }?;

        self.ledger.record(ResourceKind::Queue, &queue_url);
        info!(%queue_url, "SQS {} queue successfully created", label);
        return Ok(());
    }

    async fn create_storage(&mut self) -> Result<(), DeployError> {
        let bucket = &self.settings.s3.bucket_name;
        let region = &self.settings.general.region;

        self.provider
            .create_bucket(bucket, region)
            .await
            .map_err(|source| DeployError::Bucket {
                bucket: bucket.clone(),
                source,
            })?;
        self.ledger.record(ResourceKind::Bucket, bucket);

        self.provider
            .put_object(bucket, PLACEHOLDER_KEY)
            .await
            .map_err(|source| DeployError::Object {
                bucket: bucket.clone(),
                key: PLACEHOLDER_KEY.to_string(),
                source,
            })?;
        self.ledger
            .record(ResourceKind::Object, format!("{}{}", bucket, PLACEHOLDER_KEY));

        info!(%bucket, "S3 bucket and conversations folder created");
        return Ok(());
    }
}

/// Reads the configuration, connects to the provider for the configured
/// region and runs every step. A configuration failure returns before
/// `connect` is called.
pub async fn deploy<P, F, Fut>(config_path: &Path, connect: F) -> Result<Ledger, DeployError>
where
    P: CloudProvider,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = P>,
{
    let settings = config::parse(config_path)?;
    info!("Read configuration from file {}", config_path.display());

    let provider = connect(settings.general.region.clone()).await;
    let mut sequencer = Sequencer::new(&provider, &settings);

    match sequencer.run().await {
        Ok(()) => Ok(sequencer.into_ledger()),
        Err(error) => {
            sequencer.ledger().report_abandoned();
            Err(error)
        }
    }
}
