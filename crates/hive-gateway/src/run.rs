//! RunInstances dispatch.

use tracing::{info, warn};

use hive_broker::subjects;
use hive_core::ec2::{InstanceTypeOffering, Reservation, RunInstancesInput};
use hive_core::{Ec2Error, Ec2ErrorCode};

use crate::validate::validate_run_instances;
use crate::{FANOUT_WINDOW, Gateway, RUN_TIMEOUT};

impl Gateway {
    /// Launch instances.
    ///
    /// The request goes to the type-scoped queue so only daemons exposing
    /// the type can pick it up. A vacant subject is disambiguated with a
    /// DescribeInstanceTypes fan-out: if any node advertises the type the
    /// cluster is at capacity, otherwise the type does not exist here.
    pub async fn run_instances(&self, input: &RunInstancesInput) -> Result<Reservation, Ec2Error> {
        validate_run_instances(input)?;

        let subject = subjects::run_instances(&input.instance_type);
        match self
            .broker
            .request::<_, Reservation>(&subject, input, RUN_TIMEOUT)
            .await
        {
            Ok(reservation) => {
                info!(
                    reservation = %reservation.reservation_id,
                    instances = reservation.instances.len(),
                    "launch dispatched"
                );
                Ok(reservation)
            }
            Err(e) if e.is_no_responders() => {
                warn!(instance_type = %input.instance_type, "no launch workers; probing catalog");
                self.classify_vacant_type(&input.instance_type).await
            }
            Err(hive_broker::BrokerError::Api(err)) => Err(err),
            Err(e) => Err(Ec2Error::internal(e.to_string())),
        }
    }

    /// No worker took the launch: unknown type vs at-capacity.
    async fn classify_vacant_type(&self, instance_type: &str) -> Result<Reservation, Ec2Error> {
        let replies = self
            .broker
            .scatter(
                subjects::DESCRIBE_INSTANCE_TYPES,
                b"{}".to_vec(),
                Some(self.expected_nodes),
                FANOUT_WINDOW,
            )
            .await
            .map_err(|e| Ec2Error::internal(e.to_string()))?;

        let advertised = crate::aggregate::aggregate_instance_types(&replies, false);
        Err(vacant_type_error(&advertised, instance_type))
    }
}

/// A vacant launch subject means one of two things: some node advertises
/// the type but none had a free slot, or the cluster has never heard of
/// the type.
pub(crate) fn vacant_type_error(
    advertised: &[InstanceTypeOffering],
    instance_type: &str,
) -> Ec2Error {
    if advertised.iter().any(|t| t.instance_type == instance_type) {
        Ec2Error::new(
            Ec2ErrorCode::InsufficientInstanceCapacity,
            format!("no capacity available for instance type {instance_type}"),
        )
    } else {
        Ec2Error::new(
            Ec2ErrorCode::InvalidInstanceType,
            format!("instance type {instance_type} is not offered by this cluster"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offering(name: &str) -> InstanceTypeOffering {
        InstanceTypeOffering {
            instance_type: name.to_string(),
            v_cpus: 2,
            memory_gib: 1,
            architecture: "x86_64".to_string(),
        }
    }

    #[test]
    fn unknown_type_when_nobody_advertises_it() {
        let advertised = vec![offering("t3.micro"), offering("t3.small")];
        let err = vacant_type_error(&advertised, "x99.xlarge");
        assert_eq!(err.code, Ec2ErrorCode::InvalidInstanceType);
        assert!(err.message.contains("x99.xlarge"));
    }

    #[test]
    fn at_capacity_when_advertised_but_vacant() {
        let advertised = vec![offering("t3.micro"), offering("x99.xlarge")];
        let err = vacant_type_error(&advertised, "x99.xlarge");
        assert_eq!(err.code, Ec2ErrorCode::InsufficientInstanceCapacity);
    }

    #[test]
    fn empty_cluster_reports_unknown_type() {
        let err = vacant_type_error(&[], "t3.micro");
        assert_eq!(err.code, Ec2ErrorCode::InvalidInstanceType);
    }
}
