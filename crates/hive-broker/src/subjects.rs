//! Broker subject layout.
//!
//! One module so the gateway and the daemons can never drift apart on
//! subject names. Three disciplines are in play: point subjects (exactly one
//! subscriber, keyed by instance ID), queue subjects (worker pools under
//! [`QUEUE_GROUP`]), and fan-out topics answered by every daemon.

/// The single queue group shared by all queued subjects.
pub const QUEUE_GROUP: &str = "hive-workers";

/// Fan-out: every daemon replies with its reservations.
pub const DESCRIBE_INSTANCES: &str = "ec2.DescribeInstances";

/// Fan-out: every daemon replies with its advertised instance types.
pub const DESCRIBE_INSTANCE_TYPES: &str = "ec2.DescribeInstanceTypes";

/// Queue: modify a stopped instance's attributes.
pub const MODIFY_INSTANCE_ATTRIBUTE: &str = "ec2.ModifyInstanceAttribute";

/// Queue: start a stopped instance on whichever daemon picks it up.
pub const START: &str = "ec2.start";

/// Queue: terminate a stopped instance whose owner may be gone.
pub const TERMINATE: &str = "ec2.terminate";

/// Queue: tag operations.
pub const CREATE_TAGS: &str = "ec2.CreateTags";
pub const DESCRIBE_TAGS: &str = "ec2.DescribeTags";
pub const DELETE_TAGS: &str = "ec2.DeleteTags";

/// Fan-out: node status for CLI/diagnostics.
pub const NODE_STATUS: &str = "hive.node.status";

/// Fan-out: per-VM summaries for CLI/diagnostics.
pub const NODE_VMS: &str = "hive.node.vms";

/// Fire-and-forget capacity snapshots.
pub const NODE_CAPACITY: &str = "hive.node.capacity";

/// Type-scoped launch subject: a queue over every daemon exposing the type.
pub fn run_instances(instance_type: &str) -> String {
    format!("ec2.RunInstances.{instance_type}")
}

/// Point subject for one instance's control commands.
pub fn cmd(instance_id: &str) -> String {
    format!("ec2.cmd.{instance_id}")
}

/// Point subject for one instance's console output.
pub fn console_output(instance_id: &str) -> String {
    format!("ec2.{instance_id}.GetConsoleOutput")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_shapes() {
        assert_eq!(run_instances("t3.micro"), "ec2.RunInstances.t3.micro");
        assert_eq!(cmd("i-0abc"), "ec2.cmd.i-0abc");
        assert_eq!(console_output("i-0abc"), "ec2.i-0abc.GetConsoleOutput");
    }
}
