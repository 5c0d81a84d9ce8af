//! OSM primitive types shared across the staging layer.
//!
//! Coordinates are WGS84 with `x = longitude`, `y = latitude`, carried as
//! [`geo::Coord`] on the public surface. Entity identifiers are signed 64-bit
//! integers; [`ID_NONE`] is reserved as the "no id" sentinel and is never a
//! legitimate entity id.

use geo::Coord;

/// Identifier of an OSM node, way or relation.
pub type OsmId = i64;

/// Sentinel meaning "no id"; used as the drain-empty signal by
/// [`crate::IdTracker`].
pub const ID_NONE: OsmId = OsmId::MAX;

/// Ordered key/value tag list.
///
/// Keys are not required to be unique, although the canonical OSM producers
/// emit them unique. Order is preserved through the staging store.
pub type Tags = Vec<(String, String)>;

/// Look up the first value stored under `key`.
pub fn tag_value<'a>(tags: &'a Tags, key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// The three OSM primitive entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

impl MemberType {
    /// Single-byte marker used in the persisted member encoding.
    #[must_use]
    pub fn marker(self) -> char {
        match self {
            MemberType::Node => 'n',
            MemberType::Way => 'w',
            MemberType::Relation => 'r',
        }
    }

    /// Inverse of [`MemberType::marker`].
    #[must_use]
    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            'n' => Some(MemberType::Node),
            'w' => Some(MemberType::Way),
            'r' => Some(MemberType::Relation),
            _ => None,
        }
    }
}

/// A single relation member: a typed reference plus its role string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub kind: MemberType,
    pub id: OsmId,
    pub role: String,
}

impl Member {
    pub fn new(kind: MemberType, id: OsmId, role: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            role: role.into(),
        }
    }
}

/// A node with resolved coordinates, as handed to the output stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OsmNode {
    pub id: OsmId,
    /// WGS84 position; `x = longitude`, `y = latitude`.
    pub location: Coord<f64>,
}

impl OsmNode {
    #[must_use]
    pub fn new(id: OsmId, lat: f64, lon: f64) -> Self {
        Self {
            id,
            location: Coord { x: lon, y: lat },
        }
    }

    /// Placeholder entry whose coordinates are still unresolved.
    ///
    /// Batched lookups mark pending slots with NaN and later compact the
    /// hydrated entries into a contiguous prefix.
    #[must_use]
    pub fn unset(id: OsmId) -> Self {
        Self::new(id, f64::NAN, f64::NAN)
    }

    #[must_use]
    pub fn lat(&self) -> f64 {
        self.location.y
    }

    #[must_use]
    pub fn lon(&self) -> f64 {
        self.location.x
    }

    /// True while the coordinates have not been hydrated.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.location.x.is_nan() || self.location.y.is_nan()
    }
}

/// A node row read back from the staging store.
///
/// `tags` is populated only when the staging store itself was consulted; a
/// RAM-cache or flat-file hit resolves coordinates alone.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub node: OsmNode,
    pub tags: Tags,
}

/// A way read back from the staging store with its node list resolved to
/// coordinates.
///
/// Node references without a stored coordinate are dropped during
/// resolution, so `nodes` may be shorter than the persisted reference list.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWay {
    pub id: OsmId,
    pub tags: Tags,
    pub nodes: Vec<OsmNode>,
}

/// A relation read back from the staging store.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: OsmId,
    pub members: Vec<Member>,
    pub tags: Tags,
}

/// Convert a coordinate to its fixed-point representation.
#[must_use]
pub fn double_to_fix(value: f64, scale: i32) -> i32 {
    (value * f64::from(scale)).round() as i32
}

/// Inverse of [`double_to_fix`].
#[must_use]
pub fn fix_to_double(value: i32, scale: i32) -> f64 {
    f64::from(value) / f64::from(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(52.5, 10_000_000)]
    #[case(-13.41, 10_000_000)]
    #[case(0.0, 100)]
    #[case(89.999_999_9, 10_000_000)]
    fn fixed_point_round_trips_within_resolution(#[case] value: f64, #[case] scale: i32) {
        let restored = fix_to_double(double_to_fix(value, scale), scale);
        assert!((restored - value).abs() <= 1.0 / f64::from(scale));
    }

    #[rstest]
    fn member_markers_round_trip() {
        for kind in [MemberType::Node, MemberType::Way, MemberType::Relation] {
            assert_eq!(MemberType::from_marker(kind.marker()), Some(kind));
        }
        assert_eq!(MemberType::from_marker('x'), None);
    }

    #[rstest]
    fn tag_value_returns_first_match() {
        let tags: Tags = vec![
            ("name".into(), "first".into()),
            ("name".into(), "second".into()),
        ];
        assert_eq!(tag_value(&tags, "name"), Some("first"));
        assert_eq!(tag_value(&tags, "highway"), None);
    }

    #[rstest]
    fn unset_nodes_are_flagged() {
        assert!(OsmNode::unset(7).is_unset());
        assert!(!OsmNode::new(7, 52.5, 13.4).is_unset());
    }
}
