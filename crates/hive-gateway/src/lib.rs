//! The EC2 front door.
//!
//! Stateless: every operation validates its input, dispatches over the
//! broker using one of three disciplines, and aggregates the result.
//!
//! | Discipline | Used for |
//! |---|---|
//! | Point (`ec2.cmd.<id>`) | stop/terminate/start of running instances, console output |
//! | Type-scoped queue (`ec2.RunInstances.<type>`) | launches |
//! | Fallback queue (`ec2.terminate`, `ec2.start`) | control of stopped instances whose owner is gone |
//! | Fan-out (reply inbox) | DescribeInstances, DescribeInstanceTypes |

mod aggregate;
mod describe;
mod http;
mod lifecycle;
mod run;
mod tags;
mod validate;

use std::time::Duration;

use hive_broker::Broker;

pub use http::{ApiState, build_router};

/// Point-request deadline for per-instance control commands.
pub(crate) const CMD_TIMEOUT: Duration = Duration::from_secs(10);

/// Launches cover disk preparation and hypervisor start.
pub(crate) const RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// Attribute changes are quick but touch the shared record.
pub(crate) const MODIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Console reads are bounded tightly.
pub(crate) const CONSOLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fan-out collection window.
pub(crate) const FANOUT_WINDOW: Duration = Duration::from_secs(3);

/// Queue fallbacks get a longer deadline than the point request they
/// replace: the picked-up daemon may need to load the record first.
pub(crate) const TERMINATE_FALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const START_FALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Tag operations are single queued requests.
pub(crate) const TAGS_TIMEOUT: Duration = Duration::from_secs(10);

/// The gateway. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    pub(crate) broker: Broker,
    /// Daemon count for fan-out early exit.
    pub(crate) expected_nodes: usize,
}

impl Gateway {
    pub fn new(broker: Broker, expected_nodes: usize) -> Self {
        Self {
            broker,
            expected_nodes,
        }
    }
}

/// Daemon-side error payloads pass through; transport failures become
/// `ServerInternal`.
pub(crate) fn to_ec2_error(e: hive_broker::BrokerError) -> hive_core::Ec2Error {
    match e {
        hive_broker::BrokerError::Api(err) => err,
        other => hive_core::Ec2Error::internal(other.to_string()),
    }
}
