//! Fan-out reply aggregation.
//!
//! Pure functions over the raw per-node payloads: malformed replies and
//! error payloads are logged and dropped, never failing the overall call.

use bytes::Bytes;
use tracing::{debug, warn};

use hive_core::ec2::{
    DescribeInstanceTypesOutput, DescribeInstancesOutput, Filter, InstanceTypeOffering,
    Reservation,
};
use hive_core::error::validate_error_payload;

/// Decode one fan-out reply, dropping errors and garbage.
fn decode_reply<T: serde::de::DeserializeOwned>(payload: &Bytes) -> Option<T> {
    if let Some(err) = validate_error_payload(payload) {
        warn!(code = %err.code, "fan-out reply carried an error payload; skipping node");
        return None;
    }
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "malformed fan-out reply skipped");
            None
        }
    }
}

/// Concatenate per-daemon reservation lists.
pub fn aggregate_reservations(replies: &[Bytes]) -> Vec<Reservation> {
    replies
        .iter()
        .filter_map(decode_reply::<DescribeInstancesOutput>)
        .flat_map(|out| out.reservations)
        .collect()
}

/// Whether a `capacity=true` filter asks to keep per-daemon duplicates.
pub fn wants_capacity_duplicates(filters: &[Filter]) -> bool {
    filters
        .iter()
        .any(|f| f.name == "capacity" && f.values.iter().any(|v| v == "true"))
}

/// Merge per-daemon instance-type lists.
///
/// Null daemons-side entries are skipped silently. Unless
/// `keep_duplicates`, types deduplicate by name with first-arrival order
/// preserved — with duplicates kept, each daemon's advertised slot stays
/// visible.
pub fn aggregate_instance_types(
    replies: &[Bytes],
    keep_duplicates: bool,
) -> Vec<InstanceTypeOffering> {
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for reply in replies {
        let Some(output) = decode_reply::<DescribeInstanceTypesOutput>(reply) else {
            continue;
        };
        let Some(entries) = output.instance_types else {
            debug!("daemon reply with no instance types skipped");
            continue;
        };
        for entry in entries.into_iter().flatten() {
            if keep_duplicates || seen.insert(entry.instance_type.clone()) {
                result.push(entry);
            }
        }
    }
    result
}

/// Gateway-side filtering of the aggregated reservation list.
pub fn filter_reservations(
    mut reservations: Vec<Reservation>,
    instance_ids: &[String],
    filters: &[Filter],
) -> Vec<Reservation> {
    let state_names: Vec<&String> = filters
        .iter()
        .filter(|f| f.name == "instance-state-name")
        .flat_map(|f| f.values.iter())
        .collect();
    let filter_ids: Vec<&String> = filters
        .iter()
        .filter(|f| f.name == "instance-id")
        .flat_map(|f| f.values.iter())
        .collect();

    for reservation in &mut reservations {
        reservation.instances.retain(|instance| {
            if !instance_ids.is_empty() && !instance_ids.contains(&instance.instance_id) {
                return false;
            }
            if !filter_ids.is_empty() && !filter_ids.contains(&&instance.instance_id) {
                return false;
            }
            if !state_names.is_empty() && !state_names.contains(&&instance.state.name) {
                return false;
            }
            true
        });
    }
    reservations.retain(|r| !r.instances.is_empty());
    reservations
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::ec2::{Instance, WireState};
    use hive_core::state::InstanceState;

    fn types_reply(names: &[&str]) -> Bytes {
        let entries: Vec<Option<InstanceTypeOffering>> = names
            .iter()
            .map(|name| {
                Some(InstanceTypeOffering {
                    instance_type: name.to_string(),
                    v_cpus: 2,
                    memory_gib: 1,
                    architecture: "x86_64".to_string(),
                })
            })
            .collect();
        let output = DescribeInstanceTypesOutput {
            instance_types: Some(entries),
        };
        Bytes::from(serde_json::to_vec(&output).unwrap())
    }

    fn reservation_reply(instance_ids: &[&str], state: InstanceState) -> Bytes {
        let instances = instance_ids
            .iter()
            .map(|id| Instance {
                instance_id: id.to_string(),
                image_id: "ami-0abcdef1234567890".to_string(),
                instance_type: "t3.micro".to_string(),
                state: WireState::from(state),
                key_name: None,
                private_ip_address: None,
                launch_time: None,
                architecture: None,
                placement: None,
                tags: vec![],
            })
            .collect();
        let output = DescribeInstancesOutput {
            reservations: vec![Reservation {
                reservation_id: "r-1".to_string(),
                owner_id: "123456789012".to_string(),
                instances,
            }],
        };
        Bytes::from(serde_json::to_vec(&output).unwrap())
    }

    #[test]
    fn dedup_preserves_first_arrival_order() {
        let replies = vec![
            types_reply(&["t3.micro", "t3.small"]),
            types_reply(&["t3.micro", "m5.large"]),
        ];
        let merged = aggregate_instance_types(&replies, false);
        let names: Vec<_> = merged.iter().map(|t| t.instance_type.as_str()).collect();
        assert_eq!(names, vec!["t3.micro", "t3.small", "m5.large"]);
    }

    #[test]
    fn capacity_filter_keeps_duplicates() {
        let replies = vec![
            types_reply(&["t3.micro", "t3.small"]),
            types_reply(&["t3.micro", "m5.large"]),
        ];
        let merged = aggregate_instance_types(&replies, true);
        assert_eq!(merged.len(), 4);

        let filters = vec![Filter {
            name: "capacity".to_string(),
            values: vec!["true".to_string()],
        }];
        assert!(wants_capacity_duplicates(&filters));
        assert!(!wants_capacity_duplicates(&[]));
    }

    #[test]
    fn null_entries_and_garbage_skipped() {
        let with_null = Bytes::from_static(
            br#"{"InstanceTypes":[null,{"InstanceType":"t3.micro","VCpus":2,"MemoryGib":1,"Architecture":"x86_64"}]}"#,
        );
        let garbage = Bytes::from_static(b"not json at all");
        let error_payload = Bytes::from_static(br#"{"Code":"ServerInternal","Message":"boom"}"#);
        let empty = Bytes::from_static(b"{}");

        let merged =
            aggregate_instance_types(&[with_null, garbage, error_payload, empty], false);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].instance_type, "t3.micro");
    }

    #[test]
    fn reservations_concatenate_and_drop_bad_nodes() {
        let replies = vec![
            reservation_reply(&["i-a"], InstanceState::Running),
            Bytes::from_static(br#"{"Code":"ServerInternal"}"#),
            reservation_reply(&["i-b"], InstanceState::Stopped),
        ];
        let merged = aggregate_reservations(&replies);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn zero_subscribers_zero_replies_is_empty_not_error() {
        assert!(aggregate_reservations(&[]).is_empty());
        assert!(aggregate_instance_types(&[], false).is_empty());
    }

    #[test]
    fn filter_by_state_name() {
        let reservations = aggregate_reservations(&[
            reservation_reply(&["i-a"], InstanceState::Running),
            reservation_reply(&["i-b"], InstanceState::Stopped),
        ]);
        let filters = vec![Filter {
            name: "instance-state-name".to_string(),
            values: vec!["running".to_string()],
        }];
        let filtered = filter_reservations(reservations, &[], &filters);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].instances[0].instance_id, "i-a");
    }

    #[test]
    fn filter_by_instance_id_list() {
        let reservations = aggregate_reservations(&[
            reservation_reply(&["i-a", "i-b"], InstanceState::Running),
        ]);
        let filtered =
            filter_reservations(reservations, &["i-b".to_string()], &[]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].instances.len(), 1);
        assert_eq!(filtered[0].instances[0].instance_id, "i-b");
    }
}
