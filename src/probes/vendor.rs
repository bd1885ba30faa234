//! OUI-prefix vendor lookup. Rather than reconstruct a full IEEE-registry pipeline,
//! this carries an embedded table of the vendor prefixes the classification
//! heuristics actually care about for home/SOHO network gear.

pub struct StaticOuiVendorLookup {
    entries: &'static [(&'static str, &'static str)],
}

/// (OUI prefix, vendor name), prefix as the first three MAC octets, colon-separated,
/// uppercase. Sourced from common consumer/IoT vendors seen in home-network fleets.
const OUI_TABLE: &[(&str, &str)] = &[
    ("00:1A:11", "Google"),
    ("3C:5A:B4", "Google"),
    ("F4:F5:D8", "Google"),
    ("B4:E6:2D", "Amazon"),
    ("FC:A6:67", "Amazon"),
    ("44:65:0D", "Amazon"),
    ("A4:50:46", "Apple"),
    ("AC:BC:32", "Apple"),
    ("F0:18:98", "Apple"),
    ("3C:06:30", "Apple"),
    ("88:66:5A", "Apple"),
    ("00:17:88", "Philips Hue"),
    ("EC:B5:FA", "Philips"),
    ("B0:7F:B9", "Ubiquiti"),
    ("24:5A:4C", "Ubiquiti"),
    ("FC:EC:DA", "Ubiquiti"),
    ("70:88:6B", "Ring"),
    ("34:3E:A4", "Ring"),
    ("00:24:E4", "Withings"),
    ("18:B4:30", "Nest"),
    ("64:16:66", "Nest"),
    ("D8:31:34", "eero"),
    ("F8:8C:21", "eero"),
    ("B8:27:EB", "Raspberry Pi Foundation"),
    ("DC:A6:32", "Raspberry Pi Foundation"),
    ("E4:5F:01", "Raspberry Pi Foundation"),
    ("00:50:56", "VMware"),
    ("08:00:27", "VirtualBox"),
    ("00:1C:42", "Parallels"),
    ("F4:F2:6D", "TP-Link"),
    ("50:C7:BF", "TP-Link"),
    ("98:DA:C4", "TP-Link"),
    ("00:0C:29", "VMware"),
    ("00:15:5D", "Microsoft Hyper-V"),
    ("7C:2E:BD", "D-Link"),
    ("00:05:CD", "D-Link"),
    ("E0:CB:4E", "Netgear"),
    ("A0:40:A0", "Netgear"),
    ("44:94:FC", "Netgear"),
    ("00:26:B0", "Roku"),
    ("D0:4D:2C", "Roku"),
    ("CC:6D:A0", "Vizio"),
    ("4C:B9:9B", "LG Electronics"),
    ("64:BC:0C", "LG Electronics"),
    ("00:07:AB", "Samsung"),
    ("5C:49:7D", "Samsung"),
    ("8C:79:F5", "Samsung"),
    ("00:1E:C2", "Sonos"),
    ("5C:AA:FD", "Sonos"),
];

impl StaticOuiVendorLookup {
    pub fn new() -> Self {
        StaticOuiVendorLookup { entries: OUI_TABLE }
    }
}

impl Default for StaticOuiVendorLookup {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_prefix(mac: &str) -> Option<String> {
    let octets: Vec<&str> = mac.split([':', '-']).collect();
    if octets.len() < 3 {
        return None;
    }
    Some(
        octets[..3]
            .iter()
            .map(|o| o.to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(":"),
    )
}

impl crate::probes::VendorLookup for StaticOuiVendorLookup {
    fn lookup(&self, mac: &str) -> Option<String> {
        let prefix = normalize_prefix(mac)?;
        self.entries
            .iter()
            .find(|(oui, _)| *oui == prefix)
            .map(|(_, vendor)| vendor.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::VendorLookup;

    #[test]
    fn test_lookup_known_prefix() {
        let lookup = StaticOuiVendorLookup::new();
        assert_eq!(
            lookup.lookup("b8:27:eb:11:22:33"),
            Some("Raspberry Pi Foundation".to_string())
        );
    }

    #[test]
    fn test_lookup_unknown_prefix() {
        let lookup = StaticOuiVendorLookup::new();
        assert_eq!(lookup.lookup("00:00:00:11:22:33"), None);
    }

    #[test]
    fn test_lookup_malformed_mac() {
        let lookup = StaticOuiVendorLookup::new();
        assert_eq!(lookup.lookup("not-a-mac"), None);
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let lookup = StaticOuiVendorLookup::new();
        assert_eq!(
            lookup.lookup("B8:27:EB:11:22:33"),
            lookup.lookup("b8:27:eb:44:55:66")
        );
    }
}
