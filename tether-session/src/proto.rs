//! Wire messages of the `session` RPC service.

use tether_model::{Attr, PeerId, SessionId, VAttr};

/// Service name the session server registers under.
pub const SERVICE: &str = "session";

pub const METHOD_FETCH: &str = "fetch";
pub const METHOD_UPDATE: &str = "update";
pub const METHOD_CLEAR: &str = "clear";
pub const METHOD_DESTROY: &str = "destroy";

/// Identifies the session a request is aimed at.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SessionTarget {
    #[prost(bytes = "vec", tag = "1")]
    pub peer: Vec<u8>,

    #[prost(uint64, tag = "2")]
    pub seq: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireAttr {
    #[prost(string, tag = "1")]
    pub key: String,

    #[prost(string, tag = "2")]
    pub value: String,

    #[prost(bool, tag = "3")]
    pub frozen: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WireVAttr {
    #[prost(message, optional, tag = "1")]
    pub attr: Option<WireAttr>,

    #[prost(uint32, tag = "2")]
    pub created_at: u32,

    #[prost(uint32, tag = "3")]
    pub updated_at: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FetchRequest {
    #[prost(message, optional, tag = "1")]
    pub target: Option<SessionTarget>,

    #[prost(uint32, tag = "2")]
    pub revision: u32,

    #[prost(string, tag = "3")]
    pub namespace: String,

    #[prost(string, repeated, tag = "4")]
    pub keys: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FetchResponse {
    #[prost(uint32, tag = "1")]
    pub revision: u32,

    /// Requested keys that exist, with their revision stamps.
    #[prost(message, repeated, tag = "2")]
    pub attrs: Vec<WireVAttr>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateRequest {
    #[prost(message, optional, tag = "1")]
    pub target: Option<SessionTarget>,

    #[prost(uint32, tag = "2")]
    pub revision: u32,

    #[prost(string, tag = "3")]
    pub namespace: String,

    #[prost(message, repeated, tag = "4")]
    pub attrs: Vec<WireAttr>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateResponse {
    #[prost(uint32, tag = "1")]
    pub revision: u32,

    /// `created_at` of each submitted attribute, in submission order.
    #[prost(uint32, repeated, tag = "2")]
    pub created_at: Vec<u32>,

    /// `updated_at` of each submitted attribute, in submission order.
    #[prost(uint32, repeated, tag = "3")]
    pub updated_at: Vec<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClearRequest {
    #[prost(message, optional, tag = "1")]
    pub target: Option<SessionTarget>,

    #[prost(uint32, tag = "2")]
    pub revision: u32,

    #[prost(string, tag = "3")]
    pub namespace: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClearResponse {
    #[prost(uint32, tag = "1")]
    pub revision: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DestroyRequest {
    #[prost(message, optional, tag = "1")]
    pub target: Option<SessionTarget>,

    #[prost(uint32, tag = "2")]
    pub revision: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DestroyResponse {}

// ==================== Conversions ====================

impl From<SessionId> for SessionTarget {
    fn from(id: SessionId) -> Self {
        Self {
            peer: id.peer.as_bytes().to_vec(),
            seq: id.seq,
        }
    }
}

impl TryFrom<&SessionTarget> for SessionId {
    type Error = String;
    fn try_from(target: &SessionTarget) -> Result<Self, Self::Error> {
        let peer = PeerId::try_from(target.peer.as_slice())
            .map_err(|_| format!("invalid peer id length {}", target.peer.len()))?;
        Ok(SessionId::new(peer, target.seq))
    }
}

impl From<&Attr> for WireAttr {
    fn from(attr: &Attr) -> Self {
        Self {
            key: attr.key.clone(),
            value: attr.value.clone(),
            frozen: attr.frozen,
        }
    }
}

impl From<WireAttr> for Attr {
    fn from(wire: WireAttr) -> Self {
        Self {
            key: wire.key,
            value: wire.value,
            frozen: wire.frozen,
        }
    }
}

impl From<&VAttr> for WireVAttr {
    fn from(vattr: &VAttr) -> Self {
        Self {
            attr: Some(WireAttr::from(&vattr.attr)),
            created_at: vattr.created_at,
            updated_at: vattr.updated_at,
        }
    }
}

impl TryFrom<WireVAttr> for VAttr {
    type Error = String;
    fn try_from(wire: WireVAttr) -> Result<Self, Self::Error> {
        let attr = wire.attr.ok_or("versioned attribute without attribute")?;
        if wire.updated_at < wire.created_at {
            return Err(format!(
                "attribute {:?} updated at {} before its creation at {}",
                attr.key, wire.updated_at, wire.created_at
            ));
        }
        Ok(VAttr {
            attr: attr.into(),
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_rejects_bad_peer() {
        let target = SessionTarget { peer: vec![1, 2, 3], seq: 4 };
        assert!(SessionId::try_from(&target).is_err());

        let id = SessionId::new(PeerId::random(), 4);
        assert_eq!(SessionId::try_from(&SessionTarget::from(id)).unwrap(), id);
    }

    #[test]
    fn test_vattr_rejects_inverted_revisions() {
        let wire = WireVAttr {
            attr: Some(WireAttr { key: "a".into(), value: "1".into(), frozen: false }),
            created_at: 5,
            updated_at: 3,
        };
        assert!(VAttr::try_from(wire).is_err());
        assert!(VAttr::try_from(WireVAttr { attr: None, created_at: 0, updated_at: 0 }).is_err());
    }
}
