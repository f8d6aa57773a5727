//! Cross-system identifier derivation
//!
//! Pure functions that translate between the identifiers the compute side
//! reports (NAA disk names, VVol container UUIDs, HBA port names) and the
//! identifiers the array reports (volume serials, array ids, host WWNs/IQNs).

use crate::error::{Error, Result};

/// NAA prefix of every volume served by the array family we manage.
pub const ARRAY_NAA_PREFIX: &str = "naa.624a9370";

/// Offset of the array serial inside a VVol storage-array UUID
/// (`com.purestorage:` is exactly this long).
pub const VVOL_ARRAY_ID_OFFSET: usize = 16;

/// Hex characters per Fibre Channel WWN.
pub const WWN_HEX_LEN: usize = 16;

// =============================================================================
// VMFS / NAA
// =============================================================================

/// Whether `naa` names a volume served by one of our arrays.
pub fn is_array_volume_naa(naa: &str) -> bool {
    naa_to_volume_serial(naa).is_some()
}

/// Volume serial encoded in an NAA disk name, uppercased.
///
/// Returns `None` for disks that are not array volumes; that is a filter,
/// not a failure.
pub fn naa_to_volume_serial(naa: &str) -> Option<String> {
    let prefix = naa.get(..ARRAY_NAA_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(ARRAY_NAA_PREFIX) {
        return None;
    }

    let serial = &naa[ARRAY_NAA_PREFIX.len()..];
    if serial.is_empty() || !serial.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(serial.to_ascii_uppercase())
}

/// NAA disk name the compute side will report for a volume serial.
pub fn volume_serial_to_naa(serial: &str) -> String {
    format!("{}{}", ARRAY_NAA_PREFIX, serial.to_ascii_lowercase())
}

/// Compare two volume serials ignoring case.
pub fn serial_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

// =============================================================================
// VVol
// =============================================================================

/// Array serial embedded in a VVol datastore's storage-array UUID.
pub fn vvol_array_serial(storage_array_uuid: &str) -> Result<String> {
    match storage_array_uuid.get(VVOL_ARRAY_ID_OFFSET..) {
        Some(serial) if !serial.is_empty() => Ok(serial.to_string()),
        _ => Err(Error::InvalidIdentifier {
            kind: "vvol storage-array uuid",
            value: storage_array_uuid.to_string(),
            reason: format!("expected more than {} characters", VVOL_ARRAY_ID_OFFSET),
        }),
    }
}

// =============================================================================
// WWN / IQN
// =============================================================================

/// Split a concatenated hex port-name string into 16-character WWNs.
///
/// Line breaks and spaces are stripped first; chunks keep their order.
pub fn split_wwns(raw: &str) -> Result<Vec<String>> {
    let hex: String = raw
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | ' '))
        .collect();

    if let Some(bad) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(Error::InvalidIdentifier {
            kind: "wwn",
            value: raw.to_string(),
            reason: format!("non-hex character '{}'", bad),
        });
    }
    if hex.len() % WWN_HEX_LEN != 0 {
        return Err(Error::InvalidIdentifier {
            kind: "wwn",
            value: raw.to_string(),
            reason: format!(
                "{} hex characters is not a multiple of {}",
                hex.len(),
                WWN_HEX_LEN
            ),
        });
    }

    // Input is ASCII hex, so byte offsets are char offsets
    Ok((0..hex.len())
        .step_by(WWN_HEX_LEN)
        .map(|start| hex[start..start + WWN_HEX_LEN].to_string())
        .collect())
}

/// Canonical form of a WWN: separators removed, uppercase.
pub fn normalize_wwn(wwn: &str) -> String {
    wwn.chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub fn wwn_eq(a: &str, b: &str) -> bool {
    normalize_wwn(a) == normalize_wwn(b)
}

/// IQNs compare case-insensitively with no other transformation.
pub fn iqn_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

// =============================================================================
// Naming
// =============================================================================

/// Storage host name for a compute host: the first DNS label, with anything
/// the array rejects replaced by `-`. Hosts known only by IP keep every octet.
pub fn storage_host_name(hostname: &str) -> String {
    let label = if hostname.parse::<std::net::IpAddr>().is_ok() {
        hostname
    } else {
        hostname.split('.').next().unwrap_or(hostname)
    };
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_naa_serial() {
        assert_eq!(
            naa_to_volume_serial("naa.624a9370abcdef0123456789abcd").as_deref(),
            Some("ABCDEF0123456789ABCD")
        );
        assert_eq!(
            naa_to_volume_serial("NAA.624A9370C1D2E3F4A5B6C7D8E9F0A1B2").as_deref(),
            Some("C1D2E3F4A5B6C7D8E9F0A1B2")
        );
    }

    #[test]
    fn test_foreign_naa_is_filtered() {
        assert!(!is_array_volume_naa("naa.600508b1001c4d4e5f6a7b8c9d0e1f20"));
        assert!(!is_array_volume_naa("mpx.vmhba32:C0:T0:L0"));
        assert!(!is_array_volume_naa("naa.624a9370"));
        assert!(!is_array_volume_naa("naa.624a"));
        assert!(!is_array_volume_naa(""));
    }

    #[test]
    fn test_serial_to_naa_lowercases() {
        let naa = volume_serial_to_naa("C1D2E3F4A5B6C7D8E9F0A1B2");
        assert_eq!(naa, "naa.624a9370c1d2e3f4a5b6c7d8e9f0a1b2");
        assert!(serial_eq(
            &naa_to_volume_serial(&naa).unwrap(),
            "c1d2e3f4a5b6c7d8e9f0a1b2"
        ));
    }

    #[test]
    fn test_vvol_array_serial() {
        assert_eq!(
            vvol_array_serial("com.purestorage:2dcf29ad-6aca-4913-b62e-a15875c6635d").unwrap(),
            "2dcf29ad-6aca-4913-b62e-a15875c6635d"
        );
        assert_matches!(
            vvol_array_serial("com.purestorage:"),
            Err(Error::InvalidIdentifier { .. })
        );
        assert_matches!(vvol_array_serial("short"), Err(Error::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_split_wwns() {
        let wwns = split_wwns("2100001b32a0c1d2\r\n2101001B32A0C1D2 ").unwrap();
        assert_eq!(wwns, vec!["2100001b32a0c1d2", "2101001B32A0C1D2"]);

        assert!(split_wwns("").unwrap().is_empty());
        assert_matches!(
            split_wwns("2100001b32a0c1"),
            Err(Error::InvalidIdentifier { kind: "wwn", .. })
        );
        assert_matches!(
            split_wwns("21:00:00:1b:32:a0:c1:d2"),
            Err(Error::InvalidIdentifier { kind: "wwn", .. })
        );
    }

    #[test]
    fn test_wwn_and_iqn_compare() {
        assert!(wwn_eq("21:00:00:1b:32:a0:c1:d2", "2100001B32A0C1D2"));
        assert!(!wwn_eq("2100001b32a0c1d2", "2100001b32a0c1d3"));
        assert!(iqn_eq(
            "iqn.1998-01.com.vmware:ESXI-01",
            "iqn.1998-01.com.vmware:esxi-01"
        ));
    }

    #[test]
    fn test_storage_host_name() {
        assert_eq!(storage_host_name("esxi-01.lab.local"), "esxi-01");
        assert_eq!(storage_host_name("10.21.88.11"), "10-21-88-11");
        assert_eq!(storage_host_name("esx_host 2"), "esx-host-2");
    }
}
