//! Link inventory model
//!
//! A link is a unidirectional connection between two device ports, keyed
//! by its (source, destination) pair.

use crate::ids::DeviceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Annotation that marks a link as durable
pub const DURABLE_ANNOTATION: &str = "durable";

/// A port on a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectPoint {
    pub device: DeviceId,
    pub port: u64,
}

impl ConnectPoint {
    pub fn new(device: DeviceId, port: u64) -> Self {
        ConnectPoint { device, port }
    }
}

impl fmt::Display for ConnectPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub src: ConnectPoint,
    pub dst: ConnectPoint,
}

impl LinkKey {
    pub fn new(src: ConnectPoint, dst: ConnectPoint) -> Self {
        LinkKey { src, dst }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    /// Discovered by direct probing between adjacent ports
    Direct,
    /// Inferred across an unmanaged segment
    Indirect,
    Edge,
    Tunnel,
    Optical,
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    Active,
    Inactive,
}

/// What a provider reports about a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDescription {
    pub src: ConnectPoint,
    pub dst: ConnectPoint,
    pub link_type: LinkType,
    pub annotations: BTreeMap<String, String>,
}

impl LinkDescription {
    pub fn new(src: ConnectPoint, dst: ConnectPoint, link_type: LinkType) -> Self {
        LinkDescription {
            src,
            dst,
            link_type,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> LinkKey {
        LinkKey::new(self.src.clone(), self.dst.clone())
    }
}

/// A link as held in the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub src: ConnectPoint,
    pub dst: ConnectPoint,
    pub link_type: LinkType,
    pub state: LinkState,
    pub provider_id: String,
    /// Durable links go inactive instead of disappearing when lost
    pub durable: bool,
    pub annotations: BTreeMap<String, String>,
}

impl Link {
    /// Build an active link from a provider's description
    pub fn from_description(provider_id: impl Into<String>, desc: LinkDescription) -> Self {
        let durable = is_durable(&desc.annotations);
        Link {
            src: desc.src,
            dst: desc.dst,
            link_type: desc.link_type,
            state: LinkState::Active,
            provider_id: provider_id.into(),
            durable,
            annotations: desc.annotations,
        }
    }

    pub fn key(&self) -> LinkKey {
        LinkKey::new(self.src.clone(), self.dst.clone())
    }

    pub fn is_active(&self) -> bool {
        self.state == LinkState::Active
    }

    /// Fold a newer description into this link
    ///
    /// Annotations are unioned with the newer values winning. A direct link
    /// never degrades to indirect, so a later indirect discovery cannot
    /// overwrite a directly discovered one.
    pub fn merged_with(&self, provider_id: impl Into<String>, desc: LinkDescription) -> Link {
        let mut annotations = self.annotations.clone();
        annotations.extend(desc.annotations);
        let link_type = if self.link_type == LinkType::Direct {
            LinkType::Direct
        } else {
            desc.link_type
        };
        Link {
            src: desc.src,
            dst: desc.dst,
            link_type,
            state: LinkState::Active,
            provider_id: provider_id.into(),
            durable: is_durable(&annotations),
            annotations,
        }
    }

    /// Whether replacing `self` with `next` is a change listeners care about
    pub fn differs_from(&self, next: &Link) -> bool {
        self.state != next.state
            || (self.link_type == LinkType::Indirect && next.link_type == LinkType::Direct)
            || self.annotations != next.annotations
    }

    pub fn deactivated(&self) -> Link {
        Link {
            state: LinkState::Inactive,
            ..self.clone()
        }
    }
}

fn is_durable(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(DURABLE_ANNOTATION)
        .map(|v| v == "true")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp(device: &str, port: u64) -> ConnectPoint {
        ConnectPoint::new(DeviceId::new(device), port)
    }

    #[test]
    fn test_durable_annotation() {
        let desc = LinkDescription::new(cp("of:1", 1), cp("of:2", 1), LinkType::Direct)
            .with_annotation(DURABLE_ANNOTATION, "true");
        let link = Link::from_description("lldp", desc);
        assert!(link.durable);
        assert!(link.is_active());
    }

    #[test]
    fn test_direct_never_degrades() {
        let direct = Link::from_description(
            "lldp",
            LinkDescription::new(cp("of:1", 1), cp("of:2", 1), LinkType::Direct),
        );
        let merged = direct.merged_with(
            "bddp",
            LinkDescription::new(cp("of:1", 1), cp("of:2", 1), LinkType::Indirect),
        );
        assert_eq!(merged.link_type, LinkType::Direct);
        assert!(!direct.differs_from(&merged));
    }

    #[test]
    fn test_indirect_upgrades_to_direct() {
        let indirect = Link::from_description(
            "bddp",
            LinkDescription::new(cp("of:1", 1), cp("of:2", 1), LinkType::Indirect),
        );
        let merged = indirect.merged_with(
            "lldp",
            LinkDescription::new(cp("of:1", 1), cp("of:2", 1), LinkType::Direct),
        );
        assert_eq!(merged.link_type, LinkType::Direct);
        assert!(indirect.differs_from(&merged));
    }

    #[test]
    fn test_annotations_are_unioned() {
        let link = Link::from_description(
            "lldp",
            LinkDescription::new(cp("of:1", 1), cp("of:2", 1), LinkType::Direct)
                .with_annotation("latency", "5"),
        );
        let merged = link.merged_with(
            "lldp",
            LinkDescription::new(cp("of:1", 1), cp("of:2", 1), LinkType::Direct)
                .with_annotation("bandwidth", "10G"),
        );
        assert_eq!(merged.annotations.len(), 2);
        assert!(link.differs_from(&merged));
    }

    #[test]
    fn test_display() {
        let key = LinkKey::new(cp("of:1", 3), cp("of:2", 4));
        assert_eq!(key.to_string(), "of:1/3 -> of:2/4");
    }
}
