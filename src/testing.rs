//! Recording provider used by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::provider::{
    CloudProvider, Error, LaunchRequest, QueueRequest, Result, StatusSummary, Tag,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    RunInstances,
    InstanceStatus,
    AssociateAddress,
    CreateTags,
    CreateQueue,
    CreateBucket,
    PutObject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    RunInstances(LaunchRequest),
    InstanceStatus(String),
    AssociateAddress {
        instance_id: String,
        public_ip: String,
    },
    CreateTags {
        instance_id: String,
        tags: Vec<Tag>,
    },
    CreateQueue(QueueRequest),
    CreateBucket {
        bucket: String,
        region: String,
    },
    PutObject {
        bucket: String,
        key: String,
    },
}

impl Call {
    pub fn operation(&self) -> Operation {
        match self {
            Call::RunInstances(_) => Operation::RunInstances,
            Call::InstanceStatus(_) => Operation::InstanceStatus,
            Call::AssociateAddress { .. } => Operation::AssociateAddress,
            Call::CreateTags { .. } => Operation::CreateTags,
            Call::CreateQueue(_) => Operation::CreateQueue,
            Call::CreateBucket { .. } => Operation::CreateBucket,
            Call::PutObject { .. } => Operation::PutObject,
        }
    }
}

#[derive(Debug)]
struct State {
    calls: Vec<Call>,
    launched: u32,
    status_checks: HashMap<String, u32>,
    ready_after: Option<u32>,
    empty_launch: bool,
    failure: Option<(Operation, usize)>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            launched: 0,
            status_checks: HashMap::new(),
            ready_after: Some(1),
            empty_launch: false,
            failure: None,
        }
    }
}

/// Cloneable handle; clones share the same call log.
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<State>>,
}

impl FakeProvider {
    /// Makes the `occurrence`-th call (1-based) of `operation` fail.
    pub fn fail_on(self, operation: Operation, occurrence: usize) -> Self {
        self.state.lock().unwrap().failure = Some((operation, occurrence));
        self
    }

    /// Reports `ok` on the `checks`-th status call for each instance.
    pub fn ready_after(self, checks: u32) -> Self {
        self.state.lock().unwrap().ready_after = Some(checks);
        self
    }

    pub fn never_ready(self) -> Self {
        self.state.lock().unwrap().ready_after = None;
        self
    }

    pub fn empty_launch(self) -> Self {
        self.state.lock().unwrap().empty_launch = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.calls().iter().map(Call::operation).collect()
    }

    fn record(&self, call: Call) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let operation = call.operation();
        state.calls.push(call);

        let occurrence = state
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count();
        if state.failure == Some((operation, occurrence)) {
            return Err(Error::ServiceError(format!(
                "injected failure on {:?} #{}",
                operation, occurrence
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for FakeProvider {
    async fn run_instances(&self, request: &LaunchRequest) -> Result<Vec<String>> {
        self.record(Call::RunInstances(request.clone()))?;

        let mut state = self.state.lock().unwrap();
        if state.empty_launch {
            return Ok(Vec::new());
        }
        state.launched += 1;
        Ok(vec![format!("i-{:04}", state.launched)])
    }

    async fn instance_status(&self, instance_id: &str) -> Result<Option<StatusSummary>> {
        self.record(Call::InstanceStatus(instance_id.to_string()))?;

        let mut state = self.state.lock().unwrap();
        let ready_after = state.ready_after;
        let checks = state
            .status_checks
            .entry(instance_id.to_string())
            .or_insert(0);
        *checks += 1;

        match ready_after {
            Some(threshold) if *checks >= threshold => Ok(Some(StatusSummary::Ok)),
            _ if *checks == 1 => Ok(None),
            _ => Ok(Some(StatusSummary::Initializing)),
        }
    }

    async fn associate_address(&self, instance_id: &str, public_ip: &str) -> Result<()> {
        self.record(Call::AssociateAddress {
            instance_id: instance_id.to_string(),
            public_ip: public_ip.to_string(),
        })
    }

    async fn create_tags(&self, instance_id: &str, tags: &[Tag]) -> Result<()> {
        self.record(Call::CreateTags {
            instance_id: instance_id.to_string(),
            tags: tags.to_vec(),
        })
    }

    async fn create_queue(&self, request: &QueueRequest) -> Result<String> {
        self.record(Call::CreateQueue(request.clone()))?;
        Ok(format!(
            "https://sqs.eu-west-2.amazonaws.com/000000000000/{}",
            request.name
        ))
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
        self.record(Call::CreateBucket {
            bucket: bucket.to_string(),
            region: region.to_string(),
        })
    }

    async fn put_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.record(Call::PutObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}
