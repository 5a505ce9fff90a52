//! Manufacturer names from the first three octets of a hardware address,
//! looked up in the bundled IEEE OUI registry.

use super::{HardwareAddress, VendorLookup};

/// [`VendorLookup`] backed by the bundled IEEE registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct OuiVendors;

impl VendorLookup for OuiVendors {
    fn vendor_for(&self, mac: &HardwareAddress) -> Option<String> {
        lookup_vendor(mac)
    }
}

/// Manufacturer registered for the prefix of `mac`.
///
/// Multi-line organisation names are joined with `", "`. Locally administered
/// addresses used by common hypervisors and container runtimes are not in the
/// registry and are reported by their well-known prefix instead.
pub fn lookup_vendor(mac: &HardwareAddress) -> Option<String> {
    let normalized = mac.to_string().to_uppercase();

    match oui_data::lookup(&normalized) {
        Some(record) => {
            let vendor_name = tidy_organization(record.organization());
            tracing::debug!(
                "OUI lookup for {}: found {} (registry: {:?})",
                mac,
                vendor_name,
                record.registry()
            );
            Some(vendor_name)
        }
        None => {
            let fallback = virtual_vendor(mac).map(String::from);
            if fallback.is_none() {
                tracing::debug!("OUI lookup for {}: not found in database", mac);
            }
            fallback
        }
    }
}

fn tidy_organization(organization: &str) -> String {
    organization
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Vendor for MAC prefixes handed out by virtualisation software.
fn virtual_vendor(mac: &HardwareAddress) -> Option<&'static str> {
    let key = mac.key();

    match &key[..6] {
        "0242ac" => Some("Docker (virtual)"),
        "005056" | "000c29" | "000569" => Some("VMware (virtual)"),
        "00163e" => Some("Xen (virtual)"),
        "00155d" => Some("Hyper-V (virtual)"),
        "001c42" => Some("Parallels (virtual)"),
        "525400" => Some("QEMU/KVM (virtual)"),
        "080027" => Some("VirtualBox (virtual)"),
        "bc2411" => Some("Proxmox (virtual)"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> HardwareAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_virtual_vendor_prefixes() {
        assert_eq!(
            virtual_vendor(&mac("02:42:ac:11:00:02")),
            Some("Docker (virtual)")
        );
        assert_eq!(
            virtual_vendor(&mac("52:54:00:12:34:56")),
            Some("QEMU/KVM (virtual)")
        );
        assert_eq!(virtual_vendor(&mac("00:17:F2:12:34:56")), None);
    }

    #[test]
    fn test_lookup_falls_back_for_locally_administered_docker_mac() {
        assert_eq!(
            lookup_vendor(&mac("02:42:ac:11:00:02")).as_deref(),
            Some("Docker (virtual)")
        );
    }

    #[test]
    fn test_lookup_registered_prefix() {
        // VMware's prefix is registered; either source yields a vendor
        assert!(OuiVendors.vendor_for(&mac("00:50:56:12:34:56")).is_some());
    }

    #[test]
    fn test_tidy_organization_joins_lines() {
        assert_eq!(
            tidy_organization("Acme Corp\n  Building 4 \n\n"),
            "Acme Corp, Building 4"
        );
    }
}
