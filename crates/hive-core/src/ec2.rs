//! EC2 wire structures.
//!
//! JSON encodings of the EC2 operations Hive implements. Field names follow
//! the AWS PascalCase convention; optional fields are omitted when unset so
//! the envelope detection in [`crate::error`] stays unambiguous.

use serde::{Deserialize, Serialize};

use crate::state::{Ec2StateCode, InstanceState, ec2_state_code};

/// A named filter, as used by Describe* operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Filter {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A key/value tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    /// Absent on DeleteTags entries that delete by key alone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

// ── RunInstances ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct RunInstancesInput {
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub min_count: i32,
    #[serde(default)]
    pub max_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    /// Base64-encoded user data (cloud-config or shell script).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_specifications: Vec<TagSpecification>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TagSpecification {
    pub resource_type: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// The instance state as it appears on the wire: numeric code plus name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct WireState {
    pub code: i32,
    pub name: String,
}

impl From<InstanceState> for WireState {
    fn from(state: InstanceState) -> Self {
        let Ec2StateCode { code, name } = ec2_state_code(state);
        WireState {
            code,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub instance_id: String,
    pub image_id: String,
    pub instance_type: String,
    pub state: WireState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Placement {
    pub availability_zone: String,
}

/// One reservation groups the instances launched by a single request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Reservation {
    pub reservation_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

// ── Describe ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstancesInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstancesOutput {
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstanceTypesInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

/// One advertised instance type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceTypeOffering {
    pub instance_type: String,
    pub v_cpus: u32,
    pub memory_gib: u32,
    pub architecture: String,
}

/// Per-daemon reply to DescribeInstanceTypes. Entries may be null when a
/// daemon is mid-update; aggregation skips them silently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstanceTypesOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_types: Option<Vec<Option<InstanceTypeOffering>>>,
}

// ── Start / Stop / Terminate ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceIdsInput {
    #[serde(default)]
    pub instance_ids: Vec<String>,
}

pub type StartInstancesInput = InstanceIdsInput;
pub type StopInstancesInput = InstanceIdsInput;
pub type TerminateInstancesInput = InstanceIdsInput;

/// The per-instance record in a batch state-change reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceStateChange {
    pub instance_id: String,
    pub current_state: WireState,
    pub previous_state: WireState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct StateChangeOutput {
    #[serde(default)]
    pub instance_state_changes: Vec<InstanceStateChange>,
}

pub type StartInstancesOutput = StateChangeOutput;
pub type StopInstancesOutput = StateChangeOutput;
pub type TerminateInstancesOutput = StateChangeOutput;

// ── ModifyInstanceAttribute ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeValue {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeBooleanValue {
    pub value: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ModifyInstanceAttributeInput {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs_optimized: Option<AttributeBooleanValue>,
}

impl ModifyInstanceAttributeInput {
    /// Count of attributes set; exactly one is required.
    pub fn attribute_count(&self) -> usize {
        usize::from(self.instance_type.is_some())
            + usize::from(self.user_data.is_some())
            + usize::from(self.ebs_optimized.is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ModifyInstanceAttributeOutput {
    pub r#return: bool,
}

// ── GetConsoleOutput ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GetConsoleOutputInput {
    #[serde(default)]
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GetConsoleOutputOutput {
    pub instance_id: String,
    /// Base64-encoded tail of the console log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

// ── Tags ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTagsInput {
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTagsOutput {
    pub r#return: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteTagsInput {
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteTagsOutput {
    pub r#return: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeTagsInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TagDescription {
    pub resource_id: String,
    pub resource_type: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeTagsOutput {
    #[serde(default)]
    pub tags: Vec<TagDescription>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_instances_input_uses_pascal_case() {
        let input = RunInstancesInput {
            image_id: "ami-0abcdef1234567890".into(),
            instance_type: "t3.micro".into(),
            min_count: 1,
            max_count: 1,
            key_name: Some("my-key".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["ImageId"], "ami-0abcdef1234567890");
        assert_eq!(json["MinCount"], 1);
        assert_eq!(json["KeyName"], "my-key");
        assert!(json.get("UserData").is_none());
    }

    #[test]
    fn wire_state_from_lifecycle_state() {
        let s: WireState = InstanceState::Running.into();
        assert_eq!(s.code, 16);
        assert_eq!(s.name, "running");
    }

    #[test]
    fn describe_types_tolerates_null_entries() {
        let json = r#"{"InstanceTypes":[null,{"InstanceType":"t3.micro","VCpus":2,"MemoryGib":1,"Architecture":"x86_64"}]}"#;
        let out: DescribeInstanceTypesOutput = serde_json::from_str(json).unwrap();
        let entries = out.instance_types.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_none());
        assert_eq!(entries[1].as_ref().unwrap().instance_type, "t3.micro");
    }

    #[test]
    fn modify_attribute_count() {
        let mut input = ModifyInstanceAttributeInput {
            instance_id: "i-0123456789abcdef0".into(),
            ..Default::default()
        };
        assert_eq!(input.attribute_count(), 0);
        input.instance_type = Some(AttributeValue {
            value: "t3.small".into(),
        });
        assert_eq!(input.attribute_count(), 1);
        input.ebs_optimized = Some(AttributeBooleanValue { value: true });
        assert_eq!(input.attribute_count(), 2);
    }

    #[test]
    fn delete_tags_value_is_optional() {
        let json = r#"{"Resources":["i-0"],"Tags":[{"Key":"Name"}]}"#;
        let input: DeleteTagsInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.tags[0].key, "Name");
        assert!(input.tags[0].value.is_none());
    }
}
