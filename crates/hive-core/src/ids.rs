//! Resource-ID minting.
//!
//! Every Hive resource is named `<prefix>-<17 lowercase hex chars>`, the
//! prefix determining the resource kind (`i-` instance, `vol-` volume, …).
//! IDs are minted from host entropy and never reused.

/// Kinds of resources addressable by a prefixed ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Instance,
    Volume,
    Image,
    Snapshot,
    Vpc,
    Subnet,
    SecurityGroup,
    RouteTable,
    InternetGateway,
    EgressOnlyInternetGateway,
    Reservation,
}

impl ResourceKind {
    /// The ID prefix for this kind, without the trailing dash.
    pub fn prefix(&self) -> &'static str {
        match self {
            ResourceKind::Instance => "i",
            ResourceKind::Volume => "vol",
            ResourceKind::Image => "ami",
            ResourceKind::Snapshot => "snap",
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::RouteTable => "rtb",
            ResourceKind::InternetGateway => "igw",
            ResourceKind::EgressOnlyInternetGateway => "eigw",
            ResourceKind::Reservation => "r",
        }
    }

    /// The EC2 resource-type name, as used in tag filters.
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::Instance => "instance",
            ResourceKind::Volume => "volume",
            ResourceKind::Image => "image",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::InternetGateway => "internet-gateway",
            ResourceKind::EgressOnlyInternetGateway => "egress-only-internet-gateway",
            ResourceKind::Reservation => "reservation",
        }
    }

    /// Derive the kind from a full resource ID.
    pub fn from_id(id: &str) -> Option<ResourceKind> {
        let prefix = id.split_once('-')?.0;
        Some(match prefix {
            "i" => ResourceKind::Instance,
            "vol" => ResourceKind::Volume,
            "ami" => ResourceKind::Image,
            "snap" => ResourceKind::Snapshot,
            "vpc" => ResourceKind::Vpc,
            "subnet" => ResourceKind::Subnet,
            "sg" => ResourceKind::SecurityGroup,
            "rtb" => ResourceKind::RouteTable,
            "igw" => ResourceKind::InternetGateway,
            "eigw" => ResourceKind::EgressOnlyInternetGateway,
            "r" => ResourceKind::Reservation,
            _ => return None,
        })
    }
}

/// Number of hex characters after the dash.
const ID_HEX_LEN: usize = 17;

/// Mint a new resource ID: `<prefix>-<17 lowercase hex chars>`.
///
/// Panics if the host entropy source fails — without randomness we cannot
/// mint collision-free IDs, and every caller is about to create a resource.
pub fn generate_resource_id(prefix: &str) -> String {
    let mut buf = [0u8; 9];
    getrandom::getrandom(&mut buf).expect("host entropy source failed; cannot mint resource IDs");
    let hex = hex::encode(buf);
    format!("{prefix}-{}", &hex[..ID_HEX_LEN])
}

/// Whether `id` is well-formed for the given prefix: `<prefix>-` followed by
/// exactly 17 lowercase hex characters.
pub fn matches_prefix(id: &str, prefix: &str) -> bool {
    let Some(rest) = id.strip_prefix(prefix).and_then(|s| s.strip_prefix('-')) else {
        return false;
    };
    rest.len() == ID_HEX_LEN && rest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_shape() {
        for prefix in ["i", "vol", "snap", "ami", "eigw", "r"] {
            let id = generate_resource_id(prefix);
            assert_eq!(id.len(), prefix.len() + 1 + ID_HEX_LEN, "{id}");
            let rest = &id[prefix.len() + 1..];
            assert!(rest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn successive_ids_differ() {
        assert_ne!(generate_resource_id("i"), generate_resource_id("i"));
    }

    #[test]
    fn kind_round_trip() {
        let kinds = [
            ResourceKind::Instance,
            ResourceKind::Volume,
            ResourceKind::Image,
            ResourceKind::Snapshot,
            ResourceKind::Vpc,
            ResourceKind::Subnet,
            ResourceKind::SecurityGroup,
            ResourceKind::RouteTable,
            ResourceKind::InternetGateway,
            ResourceKind::EgressOnlyInternetGateway,
            ResourceKind::Reservation,
        ];
        for kind in kinds {
            let id = generate_resource_id(kind.prefix());
            assert_eq!(ResourceKind::from_id(&id), Some(kind));
        }
    }

    #[test]
    fn unknown_prefix_is_none() {
        assert_eq!(ResourceKind::from_id("x-0123456789abcdef0"), None);
        assert_eq!(ResourceKind::from_id("garbage"), None);
    }

    #[test]
    fn matches_prefix_checks_shape() {
        let id = generate_resource_id("vol");
        assert!(matches_prefix(&id, "vol"));
        assert!(!matches_prefix(&id, "i"));
        assert!(!matches_prefix("vol-short", "vol"));
        assert!(!matches_prefix("vol-0123456789ABCDEF0", "vol"));
        assert!(!matches_prefix("vol-0123456789abcdefg", "vol"));
    }
}
