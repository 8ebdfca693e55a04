//! Identifiers for peers, sessions and session revisions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Monotonic per-session revision counter. Revision 0 means "no attributes yet".
pub type RevisionNumber = u32;

/// Length of a [`PeerId`] in bytes.
pub const PEER_ID_LEN: usize = 16;

/// 16-byte identifier of a peer participating in the mesh.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PeerId(#[serde(with = "serde_bytes")] pub [u8; PEER_ID_LEN]);

impl PeerId {
    /// Generate a fresh random peer identity.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Returns the inner bytes.
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// Parse from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {}", e))?;
        Self::try_from(bytes.as_slice()).map_err(|_| {
            format!(
                "expected {} hex characters, got {}",
                PEER_ID_LEN * 2,
                hex_str.len()
            )
        })
    }

    /// First four bytes in hex, for log lines.
    pub fn fmt_short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; PEER_ID_LEN]> for PeerId {
    fn from(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = std::array::TryFromSliceError;
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(<[u8; PEER_ID_LEN]>::try_from(slice)?))
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(self, f)
    }
}

impl fmt::LowerHex for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

/// Globally unique session identifier: the owning peer plus a per-peer sequence number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    pub peer: PeerId,
    pub seq: u64,
}

impl SessionId {
    pub fn new(peer: PeerId, seq: u64) -> Self {
        Self { peer, seq }
    }

    /// True if the session lives on `peer`.
    pub fn is_owned_by(&self, peer: &PeerId) -> bool {
        self.peer == *peer
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.peer, self.seq)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}:{})", self.peer.fmt_short(), self.seq)
    }
}

impl FromStr for SessionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (peer, seq) = s
            .split_once(':')
            .ok_or_else(|| format!("session id {:?} is missing ':'", s))?;
        let peer = PeerId::from_hex(peer)?;
        let seq = seq
            .parse::<u64>()
            .map_err(|e| format!("invalid session sequence {:?}: {}", seq, e))?;
        Ok(Self { peer, seq })
    }
}

// Sessions travel inside application payloads, so they serialize as their display form.
impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A pointer to a session at a specific point of its history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ref {
    pub id: SessionId,
    pub revision: RevisionNumber,
}

impl Ref {
    pub fn new(id: SessionId, revision: RevisionNumber) -> Self {
        Self { id, revision }
    }

    /// Same session, different revision.
    pub fn at(&self, revision: RevisionNumber) -> Self {
        Self { id: self.id, revision }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_display() {
        let peer = PeerId([0xab; PEER_ID_LEN]);
        let expected = "ab".repeat(PEER_ID_LEN);
        assert_eq!(format!("{}", peer), expected);
        assert_eq!(format!("{:?}", peer), format!("PeerId({})", expected));
        assert_eq!(peer.fmt_short(), "abababab");
    }

    #[test]
    fn test_peer_id_from_hex_rejects_wrong_length() {
        assert!(PeerId::from_hex("abcd").is_err());
        assert!(PeerId::from_hex("zz").is_err());
        let peer = PeerId::random();
        assert_eq!(PeerId::from_hex(&peer.to_string()).unwrap(), peer);
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::new(PeerId([7; PEER_ID_LEN]), 42);
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("nocolon".parse::<SessionId>().is_err());
        assert!(format!("{}:x", PeerId::default()).parse::<SessionId>().is_err());
    }

    #[test]
    fn test_session_id_serializes_as_string() {
        let id = SessionId::new(PeerId([1; PEER_ID_LEN]), 3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}:3\"", "01".repeat(PEER_ID_LEN)));
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_ref_display() {
        let id = SessionId::new(PeerId([0; PEER_ID_LEN]), 1);
        let r = Ref::new(id, 5);
        assert_eq!(r.at(6).revision, 6);
        assert!(r.to_string().ends_with(":1@5"));
    }
}
