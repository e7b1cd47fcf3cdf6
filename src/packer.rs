//! Parent-zone bookkeeping and the label packer: splitting an already
//! encoded subdata string into DNS-legal labels under the parent zone.

use crate::error::{TunnelError, TunnelResult};

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 254;

/// Holds the normalized parent zone and the subdata space derived from it.
#[derive(Debug, Clone)]
pub struct ParentZone {
    /// Exactly one leading and one trailing dot, e.g. `.c2.example.com.`.
    dotted: String,
    subdata_space: usize,
}

impl ParentZone {
    /// Normalizes `zone` and computes the subdata space. Fails at
    /// construction if the parent zone is so long that no subdata would
    /// fit.
    pub fn new(zone: &str) -> TunnelResult<Self> {
        let trimmed = zone.trim_start_matches('.').trim_end_matches('.');
        let dotted = format!(".{}.", trimmed);

        // 254 total octets, minus the parent, minus one separator dot per
        // 63-char label (ceil division), leaves room for subdata labels.
        let len = dotted.len();
        if len >= MAX_NAME_LEN {
            return Err(TunnelError::MsgTooLong { subdata_len: 0, subdata_space: 0 });
        }
        let remaining = MAX_NAME_LEN - len;
        let subdata_space = remaining.saturating_sub(1 + remaining / (MAX_LABEL_LEN + 1));
        if subdata_space == 0 {
            return Err(TunnelError::MsgTooLong { subdata_len: 0, subdata_space: 0 });
        }

        Ok(ParentZone { dotted, subdata_space })
    }

    pub fn subdata_space(&self) -> usize {
        self.subdata_space
    }

    pub fn as_str(&self) -> &str {
        &self.dotted
    }

    /// Splits `subdata` into ≤63-char labels and appends the parent zone,
    /// failing if the subdata or the resulting name is too long.
    pub fn pack(&self, subdata: &str) -> TunnelResult<String> {
        if subdata.len() > self.subdata_space {
            return Err(TunnelError::MsgTooLong {
                subdata_len: subdata.len(),
                subdata_space: self.subdata_space,
            });
        }

        let bytes = subdata.as_bytes();
        let mut labels = Vec::with_capacity(bytes.len() / MAX_LABEL_LEN + 1);
        let mut index = 0;
        while index < bytes.len() {
            let stop = (index + MAX_LABEL_LEN).min(bytes.len());
            labels.push(std::str::from_utf8(&bytes[index..stop]).unwrap());
            index = stop;
        }

        let name = if labels.is_empty() {
            self.dotted.clone()
        } else {
            format!("{}{}", labels.join("."), self.dotted)
        };

        if name.len() > MAX_NAME_LEN {
            return Err(TunnelError::MsgTooLong { subdata_len: subdata.len(), subdata_space: self.subdata_space });
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dots() {
        let a = ParentZone::new("c2.example.com").unwrap();
        let b = ParentZone::new(".c2.example.com.").unwrap();
        let c = ParentZone::new("c2.example.com.").unwrap();
        assert_eq!(a.as_str(), ".c2.example.com.");
        assert_eq!(a.as_str(), b.as_str());
        assert_eq!(a.as_str(), c.as_str());
    }

    #[test]
    fn every_label_is_in_bounds_and_name_fits() {
        let zone = ParentZone::new("c2.example.com").unwrap();
        let subdata = "a".repeat(zone.subdata_space());
        let name = zone.pack(&subdata).unwrap();
        assert!(name.len() <= 254);
        for label in name.trim_end_matches('.').split('.') {
            assert!(!label.is_empty() && label.len() <= 63);
        }
    }

    #[test]
    fn subdata_exceeding_space_is_msg_too_long() {
        let zone = ParentZone::new("c2.example.com").unwrap();
        let subdata = "a".repeat(zone.subdata_space() + 1);
        assert!(matches!(zone.pack(&subdata), Err(TunnelError::MsgTooLong { .. })));
    }

    #[test]
    fn very_long_parent_zone_is_rejected_at_construction() {
        let huge = "a".repeat(253);
        assert!(ParentZone::new(&huge).is_err());
    }

    #[test]
    fn empty_subdata_packs_to_bare_parent() {
        let zone = ParentZone::new("c2.example.com").unwrap();
        assert_eq!(zone.pack("").unwrap(), ".c2.example.com.");
    }
}
