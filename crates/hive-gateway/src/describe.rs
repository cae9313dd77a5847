//! Fan-out queries.

use hive_broker::subjects;
use hive_core::Ec2Error;
use hive_core::ec2::{
    DescribeInstanceTypesInput, DescribeInstanceTypesOutput, DescribeInstancesInput,
    DescribeInstancesOutput,
};

use crate::aggregate::{
    aggregate_instance_types, aggregate_reservations, filter_reservations,
    wants_capacity_duplicates,
};
use crate::{FANOUT_WINDOW, Gateway};

impl Gateway {
    /// Collect reservations from every daemon.
    ///
    /// Per-node failures are dropped from the aggregate; the call itself
    /// only fails when the broker connection is gone.
    pub async fn describe_instances(
        &self,
        input: &DescribeInstancesInput,
    ) -> Result<DescribeInstancesOutput, Ec2Error> {
        let payload = serde_json::to_vec(input).map_err(|e| Ec2Error::internal(e.to_string()))?;
        let replies = self
            .broker
            .scatter(
                subjects::DESCRIBE_INSTANCES,
                payload,
                Some(self.expected_nodes),
                FANOUT_WINDOW,
            )
            .await
            .map_err(|e| Ec2Error::internal(e.to_string()))?;

        let reservations = aggregate_reservations(&replies);
        let reservations = filter_reservations(reservations, &input.instance_ids, &input.filters);
        Ok(DescribeInstancesOutput { reservations })
    }

    /// Collect instance-type catalogs from every daemon.
    ///
    /// Deduplicates by type name unless a `capacity=true` filter asks for
    /// each daemon's slot to stay visible.
    pub async fn describe_instance_types(
        &self,
        input: &DescribeInstanceTypesInput,
    ) -> Result<DescribeInstanceTypesOutput, Ec2Error> {
        let payload = serde_json::to_vec(input).map_err(|e| Ec2Error::internal(e.to_string()))?;
        let replies = self
            .broker
            .scatter(
                subjects::DESCRIBE_INSTANCE_TYPES,
                payload,
                Some(self.expected_nodes),
                FANOUT_WINDOW,
            )
            .await
            .map_err(|e| Ec2Error::internal(e.to_string()))?;

        let keep_duplicates = wants_capacity_duplicates(&input.filters);
        let merged = aggregate_instance_types(&replies, keep_duplicates);
        Ok(DescribeInstanceTypesOutput {
            instance_types: Some(merged.into_iter().map(Some).collect()),
        })
    }
}
