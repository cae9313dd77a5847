//! Input validation.
//!
//! Runs before any dispatch; the first failing rule wins and the error
//! detail names the offending field or value.

use hive_core::ec2::{ModifyInstanceAttributeInput, RunInstancesInput};
use hive_core::{Ec2Error, Ec2ErrorCode};

pub fn validate_run_instances(input: &RunInstancesInput) -> Result<(), Ec2Error> {
    if input.image_id.is_empty() {
        return Err(Ec2Error::new(
            Ec2ErrorCode::MissingParameter,
            "The request must contain the parameter ImageId",
        ));
    }
    if !input.image_id.starts_with("ami-") {
        return Err(Ec2Error::new(
            Ec2ErrorCode::InvalidAmiIdMalformed,
            format!("Invalid id: {:?}", input.image_id),
        ));
    }
    if input.instance_type.is_empty() {
        return Err(Ec2Error::new(
            Ec2ErrorCode::MissingParameter,
            "The request must contain the parameter InstanceType",
        ));
    }
    if input.min_count < 1 {
        return Err(Ec2Error::new(
            Ec2ErrorCode::InvalidParameterValue,
            format!("Value ({}) for parameter MinCount is invalid", input.min_count),
        ));
    }
    if input.max_count < input.min_count {
        return Err(Ec2Error::new(
            Ec2ErrorCode::InvalidParameterValue,
            format!(
                "Value ({}) for parameter MaxCount is invalid: MaxCount must be >= MinCount",
                input.max_count
            ),
        ));
    }
    if let Some(key_name) = &input.key_name {
        if key_name.is_empty() || key_name.len() > 255 || key_name.chars().any(char::is_whitespace)
        {
            return Err(Ec2Error::new(
                Ec2ErrorCode::InvalidKeyPairFormat,
                format!("Invalid key pair name: {key_name:?}"),
            ));
        }
    }
    Ok(())
}

pub fn validate_instance_id(id: &str) -> Result<(), Ec2Error> {
    if !id.starts_with("i-") {
        return Err(Ec2Error::new(
            Ec2ErrorCode::InvalidInstanceIdMalformed,
            format!("Invalid id: {id:?}"),
        ));
    }
    Ok(())
}

pub fn validate_instance_ids(ids: &[String]) -> Result<(), Ec2Error> {
    if ids.is_empty() {
        return Err(Ec2Error::new(
            Ec2ErrorCode::MissingParameter,
            "no instance IDs provided",
        ));
    }
    for id in ids {
        validate_instance_id(id)?;
    }
    Ok(())
}

pub fn validate_modify_instance_attribute(
    input: &ModifyInstanceAttributeInput,
) -> Result<(), Ec2Error> {
    validate_instance_id(&input.instance_id)?;
    if input.attribute_count() != 1 {
        return Err(Ec2Error::new(
            Ec2ErrorCode::InvalidParameterValue,
            "exactly one of InstanceType, UserData or EbsOptimized must be set",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::ec2::{AttributeBooleanValue, AttributeValue};

    fn valid_run() -> RunInstancesInput {
        RunInstancesInput {
            image_id: "ami-0abcdef1234567890".to_string(),
            instance_type: "t3.micro".to_string(),
            min_count: 1,
            max_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_valid_run() {
        assert!(validate_run_instances(&valid_run()).is_ok());
    }

    #[test]
    fn missing_image_id() {
        let mut input = valid_run();
        input.image_id.clear();
        let err = validate_run_instances(&input).unwrap_err();
        assert_eq!(err.code, Ec2ErrorCode::MissingParameter);
        assert!(err.message.contains("ImageId"));
    }

    #[test]
    fn malformed_image_id_names_the_value() {
        let mut input = valid_run();
        input.image_id = "img-123".to_string();
        let err = validate_run_instances(&input).unwrap_err();
        assert_eq!(err.code, Ec2ErrorCode::InvalidAmiIdMalformed);
        assert!(err.message.contains("img-123"));
    }

    #[test]
    fn count_bounds() {
        let mut input = valid_run();
        input.min_count = 0;
        input.max_count = 0;
        assert_eq!(
            validate_run_instances(&input).unwrap_err().code,
            Ec2ErrorCode::InvalidParameterValue
        );

        let mut input = valid_run();
        input.min_count = 3;
        input.max_count = 2;
        assert_eq!(
            validate_run_instances(&input).unwrap_err().code,
            Ec2ErrorCode::InvalidParameterValue
        );
    }

    #[test]
    fn key_name_format() {
        let mut input = valid_run();
        input.key_name = Some("has space".to_string());
        assert_eq!(
            validate_run_instances(&input).unwrap_err().code,
            Ec2ErrorCode::InvalidKeyPairFormat
        );

        let mut input = valid_run();
        input.key_name = Some(String::new());
        assert_eq!(
            validate_run_instances(&input).unwrap_err().code,
            Ec2ErrorCode::InvalidKeyPairFormat
        );
    }

    #[test]
    fn instance_id_prefix() {
        assert!(validate_instance_id("i-0123456789abcdef0").is_ok());
        assert_eq!(
            validate_instance_id("vol-0123").unwrap_err().code,
            Ec2ErrorCode::InvalidInstanceIdMalformed
        );
    }

    #[test]
    fn empty_instance_ids() {
        let err = validate_instance_ids(&[]).unwrap_err();
        assert_eq!(err.code, Ec2ErrorCode::MissingParameter);
        assert!(err.message.contains("no instance IDs provided"));
    }

    #[test]
    fn modify_requires_exactly_one_attribute() {
        let base = ModifyInstanceAttributeInput {
            instance_id: "i-0123456789abcdef0".to_string(),
            ..Default::default()
        };
        // Zero attributes.
        assert_eq!(
            validate_modify_instance_attribute(&base).unwrap_err().code,
            Ec2ErrorCode::InvalidParameterValue
        );

        // One attribute.
        let mut one = base.clone();
        one.instance_type = Some(AttributeValue {
            value: "t3.small".to_string(),
        });
        assert!(validate_modify_instance_attribute(&one).is_ok());

        // Two attributes.
        let mut two = one.clone();
        two.ebs_optimized = Some(AttributeBooleanValue { value: true });
        assert_eq!(
            validate_modify_instance_attribute(&two).unwrap_err().code,
            Ec2ErrorCode::InvalidParameterValue
        );
    }
}
