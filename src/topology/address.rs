//! Private address allocation
//!
//! Addresses are `subnet network address + role offset + index`. Bastion,
//! managers and edge nodes share the management subnet; workers live in the
//! application subnet.

use std::net::Ipv4Addr;

use cidr::{IpCidr, Ipv4Cidr};
use serde::{Deserialize, Serialize};

use super::roles::Role;
use super::PlanError;
use crate::config::{AddressOffsets, NetworkSpec};

/// Parse an IPv4 CIDR, naming the offending field on failure.
///
/// The prefix length is required: a bare address would otherwise parse as a
/// single-host network.
pub fn parse_ipv4_cidr(field: &str, value: &str) -> Result<Ipv4Cidr, PlanError> {
    let trimmed = value.trim();
    if !trimmed.contains('/') {
        return Err(PlanError::InvalidCidr {
            field: field.to_string(),
            value: value.to_string(),
            reason: "missing prefix length".to_string(),
        });
    }
    trimmed
        .parse::<Ipv4Cidr>()
        .map_err(|e| PlanError::InvalidCidr {
            field: field.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Parse an IPv4 or IPv6 CIDR, naming the offending field on failure
pub fn parse_ip_cidr(field: &str, value: &str) -> Result<IpCidr, PlanError> {
    value
        .trim()
        .parse::<IpCidr>()
        .map_err(|e| PlanError::InvalidCidr {
            field: field.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Canonical `address/length` form, including host routes
pub fn cidr_string(cidr: &Ipv4Cidr) -> String {
    format!("{}/{}", cidr.first_address(), cidr.network_length())
}

/// Canonical `address/length` form for either address family
pub fn ip_cidr_string(cidr: &IpCidr) -> String {
    format!("{}/{}", cidr.first_address(), cidr.network_length())
}

fn overlaps(a: &Ipv4Cidr, b: &Ipv4Cidr) -> bool {
    a.contains(&b.first_address()) || b.contains(&a.first_address())
}

fn encloses(outer: &Ipv4Cidr, inner: &Ipv4Cidr) -> bool {
    outer.network_length() <= inner.network_length() && outer.contains(&inner.first_address())
}

/// Parsed and checked private network layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterNetwork {
    pub cidr: Ipv4Cidr,
    pub management: Ipv4Cidr,
    pub application: Ipv4Cidr,
}

impl ClusterNetwork {
    /// Parse the configured ranges.
    ///
    /// Malformed ranges fail with `InvalidCidr`; subnets outside the network
    /// or overlapping each other fail with `InvalidSpec`.
    pub fn parse(network: &NetworkSpec) -> Result<Self, PlanError> {
        let cidr = parse_ipv4_cidr("network.cidr", &network.cidr)?;
        let management = parse_ipv4_cidr("network.management_subnet", &network.management_subnet)?;
        let application =
            parse_ipv4_cidr("network.application_subnet", &network.application_subnet)?;

        if overlaps(&management, &application) {
            return Err(PlanError::InvalidSpec(format!(
                "management subnet {} overlaps application subnet {}",
                cidr_string(&management),
                cidr_string(&application)
            )));
        }

        for (label, subnet) in [("management", &management), ("application", &application)] {
            if !encloses(&cidr, subnet) {
                return Err(PlanError::InvalidSpec(format!(
                    "{} subnet {} is outside network {}",
                    label,
                    cidr_string(subnet),
                    cidr_string(&cidr)
                )));
            }
        }

        Ok(Self {
            cidr,
            management,
            application,
        })
    }

    /// Subnet a role is placed in
    pub fn subnet_for(&self, role: Role) -> Ipv4Cidr {
        match role {
            Role::Bastion | Role::Manager | Role::Edge => self.management,
            Role::Worker => self.application,
        }
    }

    pub fn summary(&self, zone: &str) -> NetworkSummary {
        NetworkSummary {
            cidr: cidr_string(&self.cidr),
            management_subnet: cidr_string(&self.management),
            application_subnet: cidr_string(&self.application),
            zone: zone.to_string(),
        }
    }
}

/// Serializable view of the planned network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub cidr: String,
    pub management_subnet: String,
    pub application_subnet: String,
    pub zone: String,
}

/// Maps (role, index) to a private address
#[derive(Debug, Clone, Copy)]
pub struct AddressAllocator {
    network: ClusterNetwork,
    offsets: AddressOffsets,
}

impl AddressAllocator {
    pub fn new(network: ClusterNetwork, offsets: AddressOffsets) -> Self {
        Self { network, offsets }
    }

    pub fn offset(&self, role: Role) -> u32 {
        match role {
            Role::Bastion => self.offsets.bastion,
            Role::Manager => self.offsets.manager,
            Role::Edge => self.offsets.edge,
            Role::Worker => self.offsets.worker,
        }
    }

    /// Highest usable host number in the role's subnet (the broadcast address is excluded)
    fn last_host(&self, role: Role) -> u64 {
        let host_bits = 32 - u32::from(self.network.subnet_for(role).network_length());
        (1u64 << host_bits).saturating_sub(2)
    }

    /// Number of addresses available to a role
    pub fn capacity(&self, role: Role) -> u32 {
        let offset = u64::from(self.offset(role));
        let available = (self.last_host(role) + 1).saturating_sub(offset);
        u32::try_from(available).unwrap_or(u32::MAX)
    }

    /// Fail with `InvalidSpec` if `role`'s offset does not fit its subnet
    pub fn check_fits(&self, role: Role) -> Result<(), PlanError> {
        if self.capacity(role) == 0 {
            return Err(PlanError::InvalidSpec(format!(
                "{} subnet {} is too small for the {} address offset {}",
                role,
                cidr_string(&self.network.subnet_for(role)),
                role,
                self.offset(role)
            )));
        }
        Ok(())
    }

    /// Private address of the `index`th node of `role`
    pub fn allocate(&self, role: Role, index: u32) -> Result<Ipv4Addr, PlanError> {
        let subnet = self.network.subnet_for(role);
        let host = u64::from(self.offset(role)) + u64::from(index);

        if host == 0 || host > self.last_host(role) {
            return Err(PlanError::RangeExhausted {
                role,
                index,
                capacity: self.capacity(role),
                subnet: cidr_string(&subnet),
            });
        }

        let base = u64::from(u32::from(subnet.first_address()));
        // host <= last_host < 2^32 and base + last_host stays inside the subnet
        let addr = u32::try_from(base + host).map_err(|_| PlanError::RangeExhausted {
            role,
            index,
            capacity: self.capacity(role),
            subnet: cidr_string(&subnet),
        })?;
        Ok(Ipv4Addr::from(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_allocator() -> AddressAllocator {
        let network = ClusterNetwork::parse(&NetworkSpec::default()).unwrap();
        AddressAllocator::new(network, AddressOffsets::default())
    }

    #[test]
    fn test_default_bases() {
        let alloc = default_allocator();
        assert_eq!(alloc.allocate(Role::Bastion, 0).unwrap(), Ipv4Addr::new(10, 0, 1, 5));
        assert_eq!(alloc.allocate(Role::Manager, 0).unwrap(), Ipv4Addr::new(10, 0, 1, 10));
        assert_eq!(alloc.allocate(Role::Edge, 0).unwrap(), Ipv4Addr::new(10, 0, 1, 20));
        assert_eq!(alloc.allocate(Role::Worker, 0).unwrap(), Ipv4Addr::new(10, 0, 2, 15));
    }

    #[test]
    fn test_index_increments() {
        let alloc = default_allocator();
        assert_eq!(alloc.allocate(Role::Manager, 2).unwrap(), Ipv4Addr::new(10, 0, 1, 12));
        assert_eq!(alloc.allocate(Role::Worker, 4).unwrap(), Ipv4Addr::new(10, 0, 2, 19));
    }

    #[test]
    fn test_capacity_matches_slash_24() {
        let alloc = default_allocator();
        assert_eq!(alloc.capacity(Role::Manager), 245);
        assert_eq!(alloc.capacity(Role::Worker), 240);
    }

    #[test]
    fn test_last_index_allowed() {
        let alloc = default_allocator();
        // 255 - 10 = 245 managers fit: indices 0..=244
        assert_eq!(
            alloc.allocate(Role::Manager, 244).unwrap(),
            Ipv4Addr::new(10, 0, 1, 254)
        );
    }

    #[test]
    fn test_range_exhausted() {
        let alloc = default_allocator();
        let err = alloc.allocate(Role::Manager, 245).unwrap_err();
        match err {
            PlanError::RangeExhausted { role, index, capacity, subnet } => {
                assert_eq!(role, Role::Manager);
                assert_eq!(index, 245);
                assert_eq!(capacity, 245);
                assert_eq!(subnet, "10.0.1.0/24");
            }
            other => panic!("Expected RangeExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_offset_rejected() {
        let network = ClusterNetwork::parse(&NetworkSpec::default()).unwrap();
        let offsets = AddressOffsets {
            worker: 0,
            ..AddressOffsets::default()
        };
        let alloc = AddressAllocator::new(network, offsets);
        assert!(matches!(
            alloc.allocate(Role::Worker, 0),
            Err(PlanError::RangeExhausted { .. })
        ));
        assert_eq!(alloc.allocate(Role::Worker, 1).unwrap(), Ipv4Addr::new(10, 0, 2, 1));
    }

    #[test]
    fn test_invalid_cidr() {
        let network = NetworkSpec {
            management_subnet: "10.0.1.0/33".to_string(),
            ..NetworkSpec::default()
        };
        let err = ClusterNetwork::parse(&network).unwrap_err();
        assert!(matches!(err, PlanError::InvalidCidr { ref field, .. } if field == "network.management_subnet"));
    }

    #[test]
    fn test_bare_address_rejected() {
        let network = NetworkSpec {
            management_subnet: "10.0.1.0".to_string(),
            ..NetworkSpec::default()
        };
        let err = ClusterNetwork::parse(&network).unwrap_err();
        match err {
            PlanError::InvalidCidr { field, reason, .. } => {
                assert_eq!(field, "network.management_subnet");
                assert_eq!(reason, "missing prefix length");
            }
            other => panic!("Expected InvalidCidr, got {:?}", other),
        }
    }

    #[test]
    fn test_small_subnet_does_not_fit_offsets() {
        let network = ClusterNetwork::parse(&NetworkSpec {
            cidr: "10.0.0.0/16".to_string(),
            management_subnet: "10.0.1.0/29".to_string(),
            ..NetworkSpec::default()
        })
        .unwrap();
        let alloc = AddressAllocator::new(network, AddressOffsets::default());

        // .1 to .6 usable: the bastion at offset 5 fits, managers at 10 do not
        assert!(alloc.check_fits(Role::Bastion).is_ok());
        let err = alloc.check_fits(Role::Manager).unwrap_err();
        assert!(matches!(err, PlanError::InvalidSpec(msg) if msg.contains("10.0.1.0/29")));
    }

    #[test]
    fn test_host_bits_rejected() {
        let err = parse_ipv4_cidr("network.cidr", "10.0.1.5/24").unwrap_err();
        assert!(matches!(err, PlanError::InvalidCidr { .. }));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_ipv4_cidr("x", "not-a-network").is_err());
        assert!(parse_ip_cidr("x", "::/0").is_ok());
        assert!(parse_ip_cidr("x", "0.0.0.0/0").is_ok());
    }

    #[test]
    fn test_overlapping_subnets_rejected() {
        let network = NetworkSpec {
            application_subnet: "10.0.0.0/23".to_string(),
            ..NetworkSpec::default()
        };
        let err = ClusterNetwork::parse(&network).unwrap_err();
        assert!(matches!(err, PlanError::InvalidSpec(_)));
    }

    #[test]
    fn test_subnet_outside_network_rejected() {
        let network = NetworkSpec {
            application_subnet: "192.168.2.0/24".to_string(),
            ..NetworkSpec::default()
        };
        let err = ClusterNetwork::parse(&network).unwrap_err();
        assert!(matches!(err, PlanError::InvalidSpec(msg) if msg.contains("outside")));
    }

    #[test]
    fn test_cidr_string_keeps_host_prefix() {
        let host: Ipv4Cidr = "10.0.1.5/32".parse().unwrap();
        assert_eq!(cidr_string(&host), "10.0.1.5/32");
    }
}
