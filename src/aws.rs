use std::fmt::Debug;

use aws_sdk_ec2::model::{InstanceType, SummaryStatus};
use aws_sdk_ec2::types::SdkError;
use aws_sdk_s3::model::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::types::ByteStream;
use aws_sdk_sqs::model::QueueAttributeName;
use aws_types::region::Region;
use async_trait::async_trait;

use crate::provider::{
    CloudProvider, Error, LaunchRequest, QueueRequest, Result, StatusSummary, Tag,
};

/// Region in which S3 rejects an explicit location constraint.
const S3_DEFAULT_REGION: &str = "us-east-1";

const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";

pub struct AwsProvider {
    ec2: aws_sdk_ec2::Client,
    sqs: aws_sdk_sqs::Client,
    s3: aws_sdk_s3::Client,
}

impl AwsProvider {
    /// Builds the EC2, SQS and S3 clients from one shared SDK configuration.
    /// Credentials come from the default provider chain.
    pub async fn connect(region: String) -> Self {
        let sdk_config = aws_config::from_env()
            .region(Region::new(region))
            .load()
            .await;

        Self {
            ec2: aws_sdk_ec2::Client::new(&sdk_config),
            sqs: aws_sdk_sqs::Client::new(&sdk_config),
            s3: aws_sdk_s3::Client::new(&sdk_config),
        }
    }
}

fn describe<E, R>(error: SdkError<E, R>) -> Error
where
    E: std::error::Error + 'static,
    R: Debug,
{
    match error {
        SdkError::ServiceError { err, .. } => Error::ServiceError(err.to_string()),
        err => Error::UnknownError(err.to_string()),
    }
}

fn is_not_yet_visible(code: Option<&str>) -> bool {
    return code == Some(INSTANCE_NOT_FOUND);
}

fn bucket_configuration(region: &str) -> Option<CreateBucketConfiguration> {
    if region == S3_DEFAULT_REGION {
        return None;
    }

    return Some(
        CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(region))
            .build(),
    );
}

impl From<&SummaryStatus> for StatusSummary {
    fn from(status: &SummaryStatus) -> Self {
        match status {
            SummaryStatus::Ok => StatusSummary::Ok,
            SummaryStatus::Initializing => StatusSummary::Initializing,
            SummaryStatus::Impaired => StatusSummary::Impaired,
            SummaryStatus::InsufficientData => StatusSummary::InsufficientData,
            SummaryStatus::NotApplicable => StatusSummary::NotApplicable,
            _ => StatusSummary::Unknown,
        }
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<String>> {
        let output = self
            .ec2
            .run_instances()
            .image_id(&request.image_id)
            .instance_type(InstanceType::from(request.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .key_name(&request.key_name)
            .security_groups(&request.security_group)
            .send()
            .await
            .map_err(describe)?;

        let instance_ids = output
            .instances()
            .unwrap_or_else(|| &[])
            .iter()
            .filter_map(|instance| instance.instance_id())
            .map(str::to_string)
            .collect();

        Ok(instance_ids)
    }

    async fn instance_status(&self, instance_id: &str) -> Result<Option<StatusSummary>> {
        let result = self
            .ec2
            .describe_instance_status()
            .instance_ids(instance_id)
            .send()
            .await;

        let output = match result {
            Ok(data) => data,
            // Freshly launched ids are not visible to every endpoint right away.
            Err(SdkError::ServiceError { err, .. }) if is_not_yet_visible(err.code()) => {
                return Ok(None);
            }
            Err(err) => return Err(describe(err)),
        };

        let status = output
            .instance_statuses()
            .unwrap_or_else(|| &[])
            .iter()
            .find(|status| status.instance_id() == Some(instance_id))
            .and_then(|status| status.instance_status())
            .and_then(|summary| summary.status())
            .map(StatusSummary::from);

        Ok(status)
    }

    async fn associate_address(&self, instance_id: &str, public_ip: &str) -> Result<()> {
        self.ec2
            .associate_address()
            .instance_id(instance_id)
            .public_ip(public_ip)
            .send()
            .await
            .map_err(describe)?;

        Ok(())
    }

    async fn create_tags(&self, instance_id: &str, tags: &[Tag]) -> Result<()> {
        let tags = tags
            .iter()
            .map(|tag| {
                aws_sdk_ec2::model::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build()
            })
            .collect();

        self.ec2
            .create_tags()
            .resources(instance_id)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(describe)?;

        Ok(())
    }

    async fn create_queue(&self, request: &QueueRequest) -> Result<String> {
        let mut builder = self.sqs.create_queue().queue_name(&request.name);
        for (name, value) in request.attributes() {
            builder = builder.attributes(QueueAttributeName::from(name), value);
        }

        let output = builder.send().await.map_err(describe)?;
        output.queue_url().map(str::to_string).ok_or_else(|| {
            Error::UnknownError(format!("no URL returned for queue {}", request.name))
        })
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        self.s3
            .create_bucket()
            .bucket(bucket)
            .set_create_bucket_configuration(bucket_configuration(region))
            .send()
            .await
            .map_err(describe)?;

        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .map_err(describe)?;

        Ok(())
    }
}
