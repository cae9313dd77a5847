//! The cluster certificate authority.
//!
//! Formation mints one CA per cluster and issues a server certificate to
//! every node as it registers. A node's formation record drives the
//! certificate contents: the common name is the node name, and the SANs
//! cover its cluster-internal DNS name (`<node>.<cluster>.hive.internal`),
//! its bind address, and its backbone address when one was registered.
//!
//! Validity windows come from the formation parameters, anchored at the
//! seed's clock; `not_before` is backdated a day so peers provisioned with
//! slightly-behind clocks accept the material immediately. The CA carries
//! a zero path length: it signs node certificates and nothing below them.

use chrono::{Datelike, Duration, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FormationError, FormationResult};
use crate::types::NodeInfo;

/// A PEM-encoded certificate and private key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CertKeyPair {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Internal zone node certificates answer on.
const CLUSTER_DNS_ZONE: &str = "hive.internal";

/// Clock-skew allowance applied to every `not_before`.
const NOT_BEFORE_SKEW_DAYS: i64 = 1;

fn certificate_error(e: impl std::fmt::Display) -> FormationError {
    FormationError::Certificate(e.to_string())
}

/// Set a validity window of `lifetime_days` starting yesterday.
fn set_validity_window(params: &mut CertificateParams, lifetime_days: u32) {
    let start = Utc::now() - Duration::days(NOT_BEFORE_SKEW_DAYS);
    let end = Utc::now() + Duration::days(lifetime_days as i64);
    params.not_before = rcgen::date_time_ymd(start.year(), start.month() as u8, start.day() as u8);
    params.not_after = rcgen::date_time_ymd(end.year(), end.month() as u8, end.day() as u8);
}

/// The cluster CA, with its signing material still in memory.
pub struct CaAuthority {
    cluster_name: String,
    node_cert_lifetime_days: u32,
    pair: CertKeyPair,
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl CaAuthority {
    /// Mint the CA for a cluster.
    pub fn mint(
        cluster_name: &str,
        ca_lifetime_days: u32,
        node_cert_lifetime_days: u32,
    ) -> FormationResult<CaAuthority> {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        set_validity_window(&mut params, ca_lifetime_days);

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "Hive");
        dn.push(DnType::CommonName, format!("{cluster_name} cluster authority"));
        params.distinguished_name = dn;

        let key = KeyPair::generate().map_err(certificate_error)?;
        let cert = params.self_signed(&key).map_err(certificate_error)?;

        info!(
            cluster = %cluster_name,
            lifetime_days = ca_lifetime_days,
            "cluster authority minted"
        );

        Ok(CaAuthority {
            cluster_name: cluster_name.to_string(),
            node_cert_lifetime_days,
            pair: CertKeyPair {
                cert_pem: cert.pem(),
                key_pem: key.serialize_pem(),
            },
            cert,
            key,
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.pair.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.pair.key_pem
    }

    /// The cluster-internal DNS name a node answers on.
    pub fn node_dns_name(&self, node_name: &str) -> String {
        format!("{node_name}.{}.{CLUSTER_DNS_ZONE}", self.cluster_name)
    }

    /// Issue a server certificate for a registering node.
    ///
    /// Nodes both serve and dial their peers, so the certificate carries
    /// server and client auth. Addresses must be IPs (formation registers
    /// bind addresses, not hostnames); the only DNS SAN is the node's
    /// cluster-internal name.
    pub fn issue_node_cert(&self, node: &NodeInfo) -> FormationResult<CertKeyPair> {
        let mut params = CertificateParams::default();
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        set_validity_window(&mut params, self.node_cert_lifetime_days);

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "Hive");
        dn.push(DnType::CommonName, node.name.as_str());
        params.distinguished_name = dn;

        let dns_name = self.node_dns_name(&node.name);
        params.subject_alt_names.push(SanType::DnsName(
            dns_name.clone().try_into().map_err(certificate_error)?,
        ));
        for addr in node.addresses() {
            let ip: std::net::IpAddr = addr.parse().map_err(|_| {
                FormationError::InvalidNode(format!("address {addr:?} is not an IP"))
            })?;
            params.subject_alt_names.push(SanType::IpAddress(ip));
        }

        let node_key = KeyPair::generate().map_err(certificate_error)?;
        let node_cert = params
            .signed_by(&node_key, &self.cert, &self.key)
            .map_err(certificate_error)?;

        info!(
            node = %node.name,
            dns = %dns_name,
            lifetime_days = self.node_cert_lifetime_days,
            "node certificate issued"
        );

        Ok(CertKeyPair {
            cert_pem: node_cert.pem(),
            key_pem: node_key.serialize_pem(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, bind_ip: &str, cluster_ip: Option<&str>) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            bind_ip: bind_ip.to_string(),
            cluster_ip: cluster_ip.map(str::to_string),
            region: "ap-southeast-2".to_string(),
            az: "ap-southeast-2a".to_string(),
            port: 7000,
            services: vec![],
        }
    }

    #[test]
    fn mint_produces_pem_material() {
        let ca = CaAuthority::mint("test", 3650, 365).unwrap();
        assert!(ca.cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(ca.key_pem().contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn node_dns_name_is_zone_scoped() {
        let ca = CaAuthority::mint("prod", 3650, 365).unwrap();
        assert_eq!(ca.node_dns_name("node1"), "node1.prod.hive.internal");
    }

    #[test]
    fn issues_distinct_certs_per_node() {
        let ca = CaAuthority::mint("test", 3650, 365).unwrap();
        let a = ca.issue_node_cert(&node("node1", "10.0.0.1", None)).unwrap();
        let b = ca.issue_node_cert(&node("node2", "10.0.0.2", None)).unwrap();
        assert!(a.cert_pem.contains("BEGIN CERTIFICATE"));
        assert_ne!(a.cert_pem, b.cert_pem);
        assert_ne!(a.cert_pem, ca.cert_pem());
    }

    #[test]
    fn backbone_address_accepted() {
        let ca = CaAuthority::mint("test", 3650, 365).unwrap();
        let pair = ca
            .issue_node_cert(&node("node1", "10.0.0.1", Some("192.168.0.1")))
            .unwrap();
        assert!(pair.cert_pem.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn non_ip_address_rejected() {
        let ca = CaAuthority::mint("test", 3650, 365).unwrap();
        let err = ca
            .issue_node_cert(&node("node1", "not-an-address", None))
            .unwrap_err();
        assert!(matches!(err, FormationError::InvalidNode(_)));
    }
}
