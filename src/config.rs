use serde::Serialize;
use serde_json::Value;
use std::{fs, io, net::Ipv4Addr, path::Path};
use validator::{Validate, ValidationError};

pub const DEFAULT_REGION: &str = "eu-west-2";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Missing configuration key `{0}`")]
    MissingKey(String),

    #[error("Invalid value for `{key}`: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

/// Raw key-value document addressed by dotted keys such as `mqtt.ami`.
///
/// Key segments are matched case-insensitively, so `mqtt.IP` and `mqtt.ip`
/// name the same entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Value,
}

impl Document {
    pub fn from_toml(contents: &str) -> Result<Self, Error> {
        let root: Value =
            toml::from_str(contents).map_err(|error| Error::ParsingError(error.to_string()))?;
        Self::from_value(root)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let root: Value = serde_yaml::from_str(contents)
            .map_err(|error| Error::ParsingError(error.to_string()))?;
        Self::from_value(root)
    }

    fn from_value(root: Value) -> Result<Self, Error> {
        if !root.is_object() {
            return Err(Error::ParsingError(String::from(
                "expected a table of sections at the document root",
            )));
        }

        return Ok(Self { root });
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut node = &self.root;
        for segment in key.split('.') {
            node = node
                .as_object()?
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(segment))
                .map(|(_, value)| value)?;
        }
        match node {
            Value::Null => None,
            value => Some(value),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<String, Error> {
        match self.lookup(key) {
            Some(Value::String(value)) => Ok(value.clone()),
            Some(Value::Number(value)) => Ok(value.to_string()),
            Some(Value::Bool(value)) => Ok(value.to_string()),
            Some(_) => Err(invalid(key, "expected a string")),
            None => Err(Error::MissingKey(key.to_string())),
        }
    }

    // Numeric strings are accepted.
    pub fn get_int(&self, key: &str) -> Result<i64, Error> {
        match self.lookup(key) {
            Some(Value::Number(value)) => value
                .as_i64()
                .ok_or_else(|| invalid(key, "expected an integer")),
            Some(Value::String(value)) => value
                .trim()
                .parse::<i64>()
                .map_err(|_| invalid(key, "expected an integer")),
            Some(_) => Err(invalid(key, "expected an integer")),
            None => Err(Error::MissingKey(key.to_string())),
        }
    }

    pub fn get_str_or(&self, key: &str, default: &str) -> Result<String, Error> {
        match self.get_str(key) {
            Err(Error::MissingKey(_)) => Ok(default.to_string()),
            other => other,
        }
    }

    pub fn get_int_or(&self, key: &str, default: i64) -> Result<i64, Error> {
        match self.get_int(key) {
            Err(Error::MissingKey(_)) => Ok(default),
            other => other,
        }
    }

    fn get_u32(&self, key: &str) -> Result<u32, Error> {
        to_u32(key, self.get_int(key)?)
    }

    fn get_u32_or(&self, key: &str, default: u32) -> Result<u32, Error> {
        to_u32(key, self.get_int_or(key, i64::from(default))?)
    }
}

fn invalid(key: &str, message: &str) -> Error {
    Error::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn to_u32(key: &str, value: i64) -> Result<u32, Error> {
    u32::try_from(value).map_err(|_| invalid(key, "expected a non-negative integer"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressPolicy {
    Abort,
    Continue,
}

impl AddressPolicy {
    fn parse(key: &str, raw: &str) -> Result<Self, Error> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "continue" => Ok(Self::Continue),
            _ => Err(invalid(key, "expected `abort` or `continue`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct General {
    #[serde(rename = "keypairname")]
    #[validate(length(min = 1))]
    pub key_pair_name: String,

    #[serde(rename = "secgroup")]
    #[validate(length(min = 1))]
    pub security_group: String,

    #[validate(length(min = 1))]
    pub region: String,

    #[serde(rename = "onaddressfailure")]
    pub on_address_failure: AddressPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct AddressedTier {
    #[validate(length(min = 1))]
    pub ami: String,

    #[serde(rename = "instancetype")]
    #[validate(length(min = 1))]
    pub instance_type: String,

    #[serde(rename = "IP")]
    #[validate(custom = "validate_ipv4")]
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct WorkerTier {
    #[validate(length(min = 1))]
    pub ami: String,

    #[serde(rename = "instancetype")]
    #[validate(length(min = 1))]
    pub instance_type: String,

    #[serde(rename = "numberofinstances")]
    pub number_of_instances: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct Queues {
    #[serde(rename = "inboxname")]
    #[validate(length(min = 1, max = 80))]
    pub inbox_name: String,

    #[serde(rename = "inboxvisibilitytimeout")]
    #[validate(range(max = 43200))]
    pub inbox_visibility_timeout: u32,

    #[serde(rename = "outboxname")]
    #[validate(length(min = 1, max = 80))]
    pub outbox_name: String,

    #[serde(rename = "outboxvisibilitytimeout")]
    #[validate(range(max = 43200))]
    pub outbox_visibility_timeout: u32,

    #[serde(rename = "delayseconds")]
    #[validate(range(max = 900))]
    pub delay_seconds: u32,

    #[serde(rename = "waittimeseconds")]
    #[validate(range(max = 20))]
    pub wait_time_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct Storage {
    #[serde(rename = "bucketname")]
    #[validate(length(min = 3, max = 63))]
    pub bucket_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct Wait {
    #[serde(rename = "delayseconds")]
    pub delay_seconds: u32,

    #[serde(rename = "maxattempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,
}

impl Default for Wait {
    fn default() -> Self {
        Self {
            delay_seconds: 15,
            max_attempts: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
pub struct Settings {
    #[validate]
    pub general: General,

    #[validate]
    pub mqtt: AddressedTier,

    #[validate]
    pub echosearch: WorkerTier,

    #[validate]
    pub sqs: Queues,

    #[validate]
    pub webclient: AddressedTier,

    #[validate]
    pub s3: Storage,

    #[validate]
    pub wait: Wait,
}

impl Settings {
    pub fn from_document(document: &Document) -> Result<Self, Error> {
        let wait = Wait::default();

        Ok(Self {
            general: General {
                key_pair_name: document.get_str("general.keypairname")?,
                security_group: document.get_str("general.secgroup")?,
                region: document.get_str_or("general.region", DEFAULT_REGION)?,
                on_address_failure: AddressPolicy::parse(
                    "general.onaddressfailure",
                    &document.get_str_or("general.onaddressfailure", "abort")?,
                )?,
            },
            mqtt: addressed_tier(document, "mqtt")?,
            echosearch: WorkerTier {
                ami: document.get_str("echosearch.ami")?,
                instance_type: document.get_str("echosearch.instancetype")?,
                number_of_instances: document.get_u32("echosearch.numberofinstances")?,
            },
            sqs: Queues {
                inbox_name: document.get_str("sqs.inboxname")?,
                inbox_visibility_timeout: document.get_u32("sqs.inboxvisibilitytimeout")?,
                outbox_name: document.get_str("sqs.outboxname")?,
                outbox_visibility_timeout: document.get_u32("sqs.outboxvisibilitytimeout")?,
                delay_seconds: document.get_u32_or("sqs.delayseconds", 0)?,
                wait_time_seconds: document.get_u32_or("sqs.waittimeseconds", 0)?,
            },
            webclient: addressed_tier(document, "webclient")?,
            s3: Storage {
                bucket_name: document.get_str("s3.bucketname")?,
            },
            wait: Wait {
                delay_seconds: document.get_u32_or("wait.delayseconds", wait.delay_seconds)?,
                max_attempts: document.get_u32_or("wait.maxattempts", wait.max_attempts)?,
            },
        })
    }
}

fn addressed_tier(document: &Document, section: &str) -> Result<AddressedTier, Error> {
    Ok(AddressedTier {
        ami: document.get_str(&format!("{}.ami", section))?,
        instance_type: document.get_str(&format!("{}.instancetype", section))?,
        ip: document.get_str(&format!("{}.IP", section))?,
    })
}

pub fn parse(path: &Path) -> Result<Settings, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_ascii_lowercase());
    let document = match extension.as_deref() {
        Some("toml") => Document::from_toml(&contents),
        Some("yaml") | Some("yml") => Document::from_yaml(&contents),
        _ => Err(Error::ParsingError(format!(
            "{} is neither a `.toml` nor a `.yaml` document",
            path.display()
        ))),
    }?;

    let settings = Settings::from_document(&document)?;
    settings
        .validate()
        .map_err(|error| Error::ValidationError(error.to_string()))?;

    return Ok(settings);
}

fn validate_ipv4(ip: &str) -> Result<(), ValidationError> {
    if ip.parse::<Ipv4Addr>().is_err() {
        return Err(ValidationError::new(
            "The static address has to be a dotted IPv4 address",
        ));
    }

    return Ok(());
}
