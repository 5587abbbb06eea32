use std::collections::HashSet;

use tracing::{debug, info};

use crate::address::{CandidateDevice, CandidateSource, DiscoveredDevice, LinkType};
use crate::persistence::PersistedDeviceSet;

/// Ranks bonded, remembered, and freshly scanned peers into connection order.
#[derive(Debug, Clone)]
pub struct CandidateSelector {
    name_prefix: String,
}

impl CandidateSelector {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
        }
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    /// Builds a fresh, deduplicated attempt order.
    ///
    /// Bonded LE peers with the name prefix come first, then remembered
    /// candidates, then vehicle interfaces seen in the last scan window. The
    /// last connected peer, if present in that union, is moved to the front.
    /// When nothing has ever connected, the head of the list is recorded as
    /// `last_connected` so the next attempt has a fixed starting point.
    pub fn rank(
        &self,
        bonded: &[DiscoveredDevice],
        observed: &[DiscoveredDevice],
        persisted: &mut PersistedDeviceSet,
    ) -> Vec<CandidateDevice> {
        let mut seen = HashSet::new();
        let mut ranked = Vec::new();

        let paired = bonded
            .iter()
            .filter(|d| d.name_has_prefix(&self.name_prefix) && d.link_type == LinkType::Le)
            .map(|d| CandidateDevice::from_discovered(d, CandidateSource::Paired));
        let remembered = persisted
            .known_candidates
            .iter()
            .map(|addr| CandidateDevice::persisted(*addr));
        let scanned = observed
            .iter()
            .filter(|d| d.is_vehicle_interface(&self.name_prefix))
            .map(|d| CandidateDevice::from_discovered(d, CandidateSource::Scan));

        for candidate in paired.chain(remembered).chain(scanned) {
            if seen.insert(candidate.address) {
                ranked.push(candidate);
            }
        }

        match persisted.last_connected {
            Some(last) => {
                if let Some(pos) = ranked.iter().position(|c| c.address == last) {
                    debug!("trying last connected vehicle interface {} first", last);
                    let candidate = ranked.remove(pos);
                    ranked.insert(0, candidate);
                }
            }
            None => {
                if let Some(first) = ranked.first() {
                    info!(
                        "no vehicle interface ever connected; storing {} as the next one to try",
                        first.address
                    );
                    persisted.last_connected = Some(first.address);
                }
            }
        }

        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PeerAddress;
    use crate::protocol::OPENXC_SERVICE_UUID;

    fn addr(last: u8) -> PeerAddress {
        PeerAddress::from_octets([0xC0, 0xFF, 0xEE, 0x00, 0x00, last])
    }

    fn addresses(ranked: &[CandidateDevice]) -> Vec<PeerAddress> {
        ranked.iter().map(|c| c.address).collect()
    }

    #[test]
    fn last_connected_goes_first_and_non_matching_bonded_peers_are_skipped() {
        let x = DiscoveredDevice::new(addr(1), "OpenXC-VI-X").bonded(true);
        let y = DiscoveredDevice::new(addr(2), "Headphones").bonded(true);
        let z = addr(3);
        let mut persisted = PersistedDeviceSet {
            last_connected: Some(z),
            known_candidates: [z].into_iter().collect(),
        };

        let ranked = CandidateSelector::new("OpenXC").rank(&[x, y], &[], &mut persisted);

        assert_eq!(addresses(&ranked), vec![z, addr(1)]);
        assert_eq!(ranked[0].source, CandidateSource::Persisted);
        assert_eq!(ranked[1].source, CandidateSource::Paired);
        assert!(ranked[1].is_bonded);
        assert_eq!(persisted.last_connected, Some(z));
    }

    #[test]
    fn classic_only_bonded_devices_are_ignored() {
        let classic = DiscoveredDevice::new(addr(1), "OpenXC-VI-BT")
            .bonded(true)
            .with_link_type(LinkType::Classic);
        let mut persisted = PersistedDeviceSet::default();
        let ranked = CandidateSelector::new("OpenXC").rank(&[classic], &[], &mut persisted);
        assert!(ranked.is_empty());
        assert_eq!(persisted.last_connected, None);
    }

    #[test]
    fn duplicates_collapse_to_first_source() {
        let bonded = DiscoveredDevice::new(addr(1), "OpenXC-VI-1").bonded(true);
        let scanned = DiscoveredDevice::new(addr(1), "OpenXC-VI-1");
        let mut persisted = PersistedDeviceSet {
            last_connected: Some(addr(9)),
            known_candidates: [addr(1)].into_iter().collect(),
        };

        let ranked = CandidateSelector::new("OpenXC").rank(&[bonded], &[scanned], &mut persisted);
        assert_eq!(addresses(&ranked), vec![addr(1)]);
        assert_eq!(ranked[0].source, CandidateSource::Paired);
        // last connected is not in the union, so nothing is promoted or replaced
        assert_eq!(persisted.last_connected, Some(addr(9)));
    }

    #[test]
    fn first_candidate_is_persisted_when_nothing_ever_connected() {
        let scanned = vec![
            DiscoveredDevice::new(addr(5), "OpenXC-VI-5"),
            DiscoveredDevice::new(addr(6), "unrelated"),
            DiscoveredDevice::new(addr(7), "anon").with_service(OPENXC_SERVICE_UUID),
        ];
        let mut persisted = PersistedDeviceSet::default();

        let ranked = CandidateSelector::new("OpenXC").rank(&[], &scanned, &mut persisted);
        assert_eq!(addresses(&ranked), vec![addr(5), addr(7)]);
        assert_eq!(persisted.last_connected, Some(addr(5)));

        // recomputed on each call, and now the stored head leads
        let again = CandidateSelector::new("OpenXC").rank(&[], &scanned, &mut persisted);
        assert_eq!(addresses(&again), vec![addr(5), addr(7)]);
    }
}
