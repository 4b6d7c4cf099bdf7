use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardScaleError};
use crate::types::OperationType;

/// Environment variable naming the policy file location.
pub const CONFIG_URL_ENV: &str = "CONFIG_FILE_URL";
/// When set, fatal monitor errors do not fail the health endpoint.
pub const SUPPRESS_ABORT_ENV: &str = "SUPPRESS_ABORT_ON_FATAL";

/// One autoscaling policy per monitored stream, as loaded from the JSON
/// policy file. Unknown keys are ignored; missing required keys fail the
/// load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingPolicy {
    pub stream_name: String,
    pub region: String,
    pub scale_on_operation: Vec<OperationType>,
    pub min_shards: u32,
    pub max_shards: u32,
    #[serde(default = "default_refresh_shards_after_min")]
    pub refresh_shards_number_after_min: u32,
    /// Seconds between monitor iterations.
    pub check_interval: u64,
    pub scale_up: ThresholdSpec,
    pub scale_down: ThresholdSpec,
}

fn default_refresh_shards_after_min() -> u32 {
    10
}

/// Threshold and action parameters for one scaling direction. Exactly one
/// of `scale_count`/`scale_pct` drives the target; count wins when both are
/// present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSpec {
    pub scale_threshold_pct: u32,
    pub scale_after_mins: u32,
    #[serde(default)]
    pub scale_count: Option<u32>,
    #[serde(default)]
    pub scale_pct: Option<u32>,
    pub cool_off_mins: u32,
    #[serde(default, rename = "notificationARN")]
    pub notification_arn: Option<String>,
}

impl AutoscalingPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.stream_name.is_empty() {
            return Err(ShardScaleError::InvalidConfig(
                "streamName cannot be empty".to_string(),
            ));
        }
        if self.scale_on_operation.is_empty() {
            return Err(ShardScaleError::InvalidConfig(format!(
                "stream {}: scaleOnOperation must name at least one of PUT, GET",
                self.stream_name
            )));
        }
        if self.min_shards < 1 {
            return Err(ShardScaleError::InvalidConfig(format!(
                "stream {}: minShards must be at least 1",
                self.stream_name
            )));
        }
        if self.max_shards < self.min_shards {
            return Err(ShardScaleError::InvalidConfig(format!(
                "stream {}: maxShards ({}) is below minShards ({})",
                self.stream_name, self.max_shards, self.min_shards
            )));
        }
        if self.check_interval == 0 {
            return Err(ShardScaleError::InvalidConfig(format!(
                "stream {}: checkInterval must be greater than 0",
                self.stream_name
            )));
        }
        self.scale_up.validate(&self.stream_name, "scaleUp")?;
        self.scale_down.validate(&self.stream_name, "scaleDown")?;
        Ok(())
    }
}

impl ThresholdSpec {
    fn validate(&self, stream: &str, section: &str) -> Result<()> {
        if self.scale_threshold_pct == 0 || self.scale_threshold_pct > 100 {
            return Err(ShardScaleError::InvalidConfig(format!(
                "stream {stream}: {section}.scaleThresholdPct must be in 1..=100"
            )));
        }
        if self.scale_after_mins == 0 {
            return Err(ShardScaleError::InvalidConfig(format!(
                "stream {stream}: {section}.scaleAfterMins must be at least 1"
            )));
        }
        if self.scale_count.is_none() && self.scale_pct.is_none() {
            return Err(ShardScaleError::InvalidConfig(format!(
                "stream {stream}: {section} must set one of scaleCount, scalePct"
            )));
        }
        if matches!(self.scale_count, Some(0)) || matches!(self.scale_pct, Some(0)) {
            return Err(ShardScaleError::InvalidConfig(format!(
                "stream {stream}: {section} scaleCount/scalePct must be greater than 0"
            )));
        }
        Ok(())
    }
}

/// Load and validate the policy file from `location`: a bare filesystem
/// path or a `file://` URL. Remote schemes are not fetched here; the
/// deployer materializes the file locally.
pub fn load_policies(location: &str) -> Result<Vec<AutoscalingPolicy>> {
    let raw = read_location(location)?;
    let policies: Vec<AutoscalingPolicy> = serde_json::from_str(&raw).map_err(|e| {
        ShardScaleError::Config(format!("unable to parse policy file {location}: {e}"))
    })?;
    if policies.is_empty() {
        return Err(ShardScaleError::Config(format!(
            "policy file {location} defines no streams"
        )));
    }
    for policy in &policies {
        policy.validate()?;
    }
    Ok(policies)
}

fn read_location(location: &str) -> Result<String> {
    if let Some(path) = location.strip_prefix("file://") {
        return Ok(std::fs::read_to_string(path)?);
    }
    for scheme in ["http://", "https://", "s3://"] {
        if location.starts_with(scheme) {
            return Err(ShardScaleError::Config(format!(
                "config scheme {scheme} is not fetched by this process; \
                 copy the file locally and point {CONFIG_URL_ENV} at it"
            )));
        }
    }
    Ok(std::fs::read_to_string(location)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
    [
      {
        "streamName": "orders",
        "region": "eu-west-1",
        "scaleOnOperation": ["PUT", "GET"],
        "minShards": 2,
        "maxShards": 64,
        "checkInterval": 45,
        "futureKnob": true,
        "scaleUp": {
          "scaleThresholdPct": 75,
          "scaleAfterMins": 5,
          "scalePct": 50,
          "coolOffMins": 15,
          "notificationARN": "arn:aws:sns:eu-west-1:000000000000:scaling"
        },
        "scaleDown": {
          "scaleThresholdPct": 25,
          "scaleAfterMins": 30,
          "scaleCount": 1,
          "coolOffMins": 60
        }
      }
    ]
    "#;

    #[test]
    fn parses_sample_and_ignores_unknown_keys() {
        let policies: Vec<AutoscalingPolicy> = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(policies.len(), 1);
        let p = &policies[0];
        assert_eq!(p.stream_name, "orders");
        assert_eq!(
            p.scale_on_operation,
            vec![OperationType::Put, OperationType::Get]
        );
        assert_eq!(p.refresh_shards_number_after_min, 10);
        assert_eq!(p.scale_up.scale_pct, Some(50));
        assert_eq!(p.scale_up.scale_count, None);
        assert_eq!(
            p.scale_up.notification_arn.as_deref(),
            Some("arn:aws:sns:eu-west-1:000000000000:scaling")
        );
        assert_eq!(p.scale_down.cool_off_mins, 60);
        p.validate().unwrap();
    }

    #[test]
    fn missing_required_key_fails() {
        let raw = r#"[{ "streamName": "orders" }]"#;
        assert!(serde_json::from_str::<Vec<AutoscalingPolicy>>(raw).is_err());
    }

    #[test]
    fn validation_rejects_inverted_bounds() {
        let mut policies: Vec<AutoscalingPolicy> = serde_json::from_str(SAMPLE).unwrap();
        policies[0].min_shards = 10;
        policies[0].max_shards = 2;
        assert!(matches!(
            policies[0].validate(),
            Err(ShardScaleError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validation_requires_count_or_pct() {
        let mut policies: Vec<AutoscalingPolicy> = serde_json::from_str(SAMPLE).unwrap();
        policies[0].scale_up.scale_pct = None;
        assert!(policies[0].validate().is_err());
    }

    #[test]
    fn validation_rejects_threshold_out_of_range() {
        let mut policies: Vec<AutoscalingPolicy> = serde_json::from_str(SAMPLE).unwrap();
        policies[0].scale_down.scale_threshold_pct = 0;
        assert!(policies[0].validate().is_err());
        policies[0].scale_down.scale_threshold_pct = 101;
        assert!(policies[0].validate().is_err());
    }

    #[test]
    fn loads_from_file_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let url = format!("file://{}", file.path().display());
        let policies = load_policies(&url).unwrap();
        assert_eq!(policies[0].stream_name, "orders");
    }

    #[test]
    fn remote_schemes_are_rejected() {
        let err = load_policies("s3://bucket/config.json").unwrap_err();
        assert!(matches!(err, ShardScaleError::Config(_)));
    }
}
