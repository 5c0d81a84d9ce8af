//! End-to-end behaviour of the staging middle over the in-memory store.

use rstest::{fixture, rstest};
use tempfile::TempDir;

use waymark_core::{
    tag_value, Member, MemberType, Middle, MiddleConfig, MiddleQuery, OsmId, OsmNode, Output,
    Tags,
};
use waymark_staging::{MemoryStoreDriver, StagingMiddle};

#[derive(Debug, Default)]
struct RecordingOutput {
    ways: Vec<(OsmId, Tags, Vec<OsmNode>, bool)>,
    relations: Vec<(OsmId, Vec<Member>, Tags, bool)>,
}

impl Output for RecordingOutput {
    fn pending_way(&mut self, id: OsmId, tags: &Tags, nodes: &[OsmNode], exists: bool) {
        self.ways.push((id, tags.clone(), nodes.to_vec(), exists));
    }

    fn pending_relation(&mut self, id: OsmId, members: &[Member], tags: &Tags, exists: bool) {
        self.relations
            .push((id, members.to_vec(), tags.clone(), exists));
    }
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

fn config() -> MiddleConfig {
    MiddleConfig {
        prefix: "osm".to_owned(),
        cache_mb: 4,
        ..MiddleConfig::default()
    }
}

fn append_config() -> MiddleConfig {
    MiddleConfig {
        append: true,
        ..config()
    }
}

#[fixture]
fn driver() -> MemoryStoreDriver {
    MemoryStoreDriver::new()
}

fn started(driver: &MemoryStoreDriver, config: &MiddleConfig) -> StagingMiddle {
    let mut middle = StagingMiddle::new(Box::new(driver.clone()));
    middle.start(config).expect("start middle");
    middle
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 1.0e-7,
        "expected {expected}, got {actual}"
    );
}

#[rstest]
fn single_node_round_trips(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle
        .node_set(1, 52.5, 13.4, &tags(&[("name", "X")]))
        .expect("node_set");

    // Warm read resolves through the RAM cache.
    let record = middle.node_get(1).expect("node_get").expect("hit");
    assert_close(record.node.lat(), 52.5);
    assert_close(record.node.lon(), 13.4);

    middle.commit().expect("commit");
    middle.stop().expect("stop");

    // A fresh append session starts with a cold cache, so the read goes to
    // the staging store and carries the tags back.
    let mut middle = started(&driver, &append_config());
    let record = middle.node_get(1).expect("node_get").expect("hit");
    assert_close(record.node.lat(), 52.5);
    assert_close(record.node.lon(), 13.4);
    assert_eq!(tag_value(&record.tags, "name"), Some("X"));
    middle.stop().expect("stop");
}

#[rstest]
fn way_resolves_node_coordinates_in_order(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    for id in 1..=5 {
        middle
            .node_set(id, id as f64, id as f64, &Tags::new())
            .expect("node_set");
    }
    middle
        .way_set(100, &[1, 2, 3, 4, 5], &tags(&[("highway", "residential")]))
        .expect("way_set");

    let way = middle.way_get(100).expect("way_get").expect("hit");
    assert_eq!(way.nodes.len(), 5);
    for (index, node) in way.nodes.iter().enumerate() {
        let expected_id = (index + 1) as OsmId;
        assert_eq!(node.id, expected_id);
        assert_close(node.lat(), expected_id as f64);
        assert_close(node.lon(), expected_id as f64);
    }
    assert_eq!(tag_value(&way.tags, "highway"), Some("residential"));
}

#[rstest]
fn way_with_a_missing_node_compacts(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    for id in [1, 2, 4, 5] {
        middle
            .node_set(id, id as f64, id as f64, &Tags::new())
            .expect("node_set");
    }
    middle
        .way_set(200, &[1, 2, 3, 4, 5], &Tags::new())
        .expect("way_set");

    let way = middle.way_get(200).expect("way_get").expect("hit");
    let resolved: Vec<OsmId> = way.nodes.iter().map(|node| node.id).collect();
    assert_eq!(resolved, vec![1, 2, 4, 5]);
}

#[rstest]
fn relation_offsets_partition_members_by_kind(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle
        .relation_set(
            300,
            &[
                Member::new(MemberType::Node, 1, "a"),
                Member::new(MemberType::Way, 10, "b"),
                Member::new(MemberType::Node, 2, "c"),
                Member::new(MemberType::Relation, 20, "d"),
            ],
            &tags(&[("type", "route")]),
        )
        .expect("relation_set");

    let relation = middle.relation_get(300).expect("relation_get").expect("hit");
    assert_eq!(
        relation.members,
        vec![
            Member::new(MemberType::Node, 1, "a"),
            Member::new(MemberType::Node, 2, "c"),
            Member::new(MemberType::Way, 10, "b"),
            Member::new(MemberType::Relation, 20, "d"),
        ]
    );
    assert_eq!(tag_value(&relation.tags, "type"), Some("route"));

    let (way_off, rel_off, parts) = driver.raw_relation(300).expect("persisted row");
    assert_eq!(way_off, 2);
    assert_eq!(rel_off, 3);
    assert_eq!(parts, vec![1, 2, 10, 20]);
}

#[rstest]
fn relation_without_members_round_trips(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle
        .relation_set(400, &[], &tags(&[("type", "site")]))
        .expect("relation_set");

    let relation = middle.relation_get(400).expect("relation_get").expect("hit");
    assert!(relation.members.is_empty());
    assert_eq!(tag_value(&relation.tags, "type"), Some("site"));
}

#[rstest]
fn node_change_marks_containing_ways_and_relations(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle.node_set(1, 0.0, 0.0, &Tags::new()).expect("node_set");
    middle.way_set(100, &[1, 2], &Tags::new()).expect("way_set");
    middle
        .relation_set(
            300,
            &[Member::new(MemberType::Node, 1, "via")],
            &Tags::new(),
        )
        .expect("relation_set");
    middle
        .relation_set(
            301,
            &[Member::new(MemberType::Way, 999, "outer")],
            &Tags::new(),
        )
        .expect("relation_set");

    middle.node_changed(1).expect("node_changed");

    let mut output = RecordingOutput::default();
    middle.iterate_ways(&mut output).expect("iterate_ways");
    middle
        .iterate_relations(&mut output)
        .expect("iterate_relations");

    let way_ids: Vec<OsmId> = output.ways.iter().map(|(id, ..)| *id).collect();
    let rel_ids: Vec<OsmId> = output.relations.iter().map(|(id, ..)| *id).collect();
    assert_eq!(way_ids, vec![100]);
    assert_eq!(rel_ids, vec![300], "only the direct node member is pending");
}

#[rstest]
fn second_pass_drains_each_pending_way_exactly_once(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle.node_set(5, 1.0, 1.0, &Tags::new()).expect("node_set");
    for way_id in [101, 102, 103] {
        middle
            .way_set(way_id, &[5], &Tags::new())
            .expect("way_set");
    }

    // Mark the same set twice; pending marks are idempotent.
    middle.node_changed(5).expect("node_changed");
    middle.node_changed(5).expect("node_changed");

    let mut output = RecordingOutput::default();
    middle.iterate_ways(&mut output).expect("iterate_ways");
    let mut way_ids: Vec<OsmId> = output.ways.iter().map(|(id, ..)| *id).collect();
    way_ids.sort_unstable();
    assert_eq!(way_ids, vec![101, 102, 103]);

    let mut second = RecordingOutput::default();
    middle.iterate_ways(&mut second).expect("iterate_ways");
    assert!(second.ways.is_empty(), "the drain is destructive");
}

#[rstest]
fn way_change_marks_enclosing_relations(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle
        .relation_set(
            310,
            &[Member::new(MemberType::Way, 42, "outer")],
            &Tags::new(),
        )
        .expect("relation_set");

    middle.way_changed(42).expect("way_changed");

    let mut output = RecordingOutput::default();
    middle
        .iterate_relations(&mut output)
        .expect("iterate_relations");
    assert_eq!(output.relations.len(), 1);
    assert_eq!(output.relations[0].0, 310);
}

#[rstest]
fn relation_change_marks_enclosing_relations(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle
        .relation_set(
            320,
            &[Member::new(MemberType::Relation, 321, "subarea")],
            &Tags::new(),
        )
        .expect("relation_set");

    middle.relation_changed(321).expect("relation_changed");

    let mut output = RecordingOutput::default();
    middle
        .iterate_relations(&mut output)
        .expect("iterate_relations");
    assert_eq!(output.relations.len(), 1);
    assert_eq!(output.relations[0].0, 320);
}

#[rstest]
fn deleting_a_relation_marks_its_member_ways(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle.node_set(1, 0.0, 0.0, &Tags::new()).expect("node_set");
    middle.way_set(100, &[1], &Tags::new()).expect("way_set");
    middle
        .relation_set(
            300,
            &[Member::new(MemberType::Way, 100, "outer")],
            &Tags::new(),
        )
        .expect("relation_set");

    middle.relation_delete(300).expect("relation_delete");
    assert!(middle.relation_get(300).expect("relation_get").is_none());

    let mut output = RecordingOutput::default();
    middle.iterate_ways(&mut output).expect("iterate_ways");
    assert_eq!(output.ways.len(), 1);
    assert_eq!(output.ways[0].0, 100);
}

#[rstest]
fn deleted_nodes_are_absent(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle.node_set(1, 52.5, 13.4, &Tags::new()).expect("node_set");
    middle.node_delete(1).expect("node_delete");
    assert!(middle.node_get(1).expect("node_get").is_none());
}

#[rstest]
fn modify_events_are_last_write_wins(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle.node_set(1, 1.0, 1.0, &Tags::new()).expect("node_set");
    middle.way_set(100, &[1], &Tags::new()).expect("way_set");

    middle
        .node_modify(1, 2.0, 3.0, &Tags::new())
        .expect("node_modify");
    let record = middle.node_get(1).expect("node_get").expect("hit");
    assert_close(record.node.lat(), 2.0);
    assert_close(record.node.lon(), 3.0);

    // The containing way became pending through the modify's mark rules.
    let mut output = RecordingOutput::default();
    middle.iterate_ways(&mut output).expect("iterate_ways");
    assert_eq!(output.ways.len(), 1);
    assert_eq!(output.ways[0].0, 100);

    middle
        .way_modify(100, &[1, 1], &Tags::new())
        .expect("way_modify");
    let way = middle.way_get(100).expect("way_get").expect("hit");
    assert_eq!(way.nodes.len(), 2, "rings may repeat node ids");
}

#[rstest]
fn pending_callbacks_flag_existing_entities_in_append_mode(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle.node_set(1, 0.0, 0.0, &Tags::new()).expect("node_set");
    middle.way_set(100, &[1], &Tags::new()).expect("way_set");
    middle.commit().expect("commit");
    middle.stop().expect("stop");

    let mut middle = started(&driver, &append_config());
    middle.node_changed(1).expect("node_changed");
    let mut output = RecordingOutput::default();
    middle.iterate_ways(&mut output).expect("iterate_ways");
    assert_eq!(output.ways.len(), 1);
    assert!(output.ways[0].3, "append-mode callbacks signal an upsert");
}

#[rstest]
fn ways_get_list_returns_rows_in_request_order(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    for id in 1..=4 {
        middle
            .node_set(id, id as f64, id as f64, &Tags::new())
            .expect("node_set");
    }
    middle.way_set(100, &[1, 2], &Tags::new()).expect("way_set");
    middle.way_set(101, &[3, 4], &Tags::new()).expect("way_set");

    let ways = middle
        .ways_get_list(&[101, 555, 100])
        .expect("ways_get_list");
    let ids: Vec<OsmId> = ways.iter().map(|way| way.id).collect();
    assert_eq!(ids, vec![101, 100], "absent ways are skipped");
}

#[rstest]
fn nodes_get_list_reports_all_hits_without_compaction(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    for id in 1..=3 {
        middle
            .node_set(id, id as f64, id as f64, &Tags::new())
            .expect("node_set");
    }

    let ids = [1, 2, 3];
    let mut out = vec![OsmNode::unset(0); ids.len()];
    let count = middle.nodes_get_list(&mut out, &ids).expect("get_list");
    assert_eq!(count, 3);
    let returned: Vec<OsmId> = out.iter().map(|node| node.id).collect();
    assert_eq!(returned, vec![1, 2, 3]);
}

#[rstest]
fn relations_using_way_finds_the_enclosing_relation(driver: MemoryStoreDriver) {
    let mut middle = started(&driver, &config());
    middle
        .relation_set(
            330,
            &[
                Member::new(MemberType::Node, 7, "via"),
                Member::new(MemberType::Way, 70, "outer"),
            ],
            &Tags::new(),
        )
        .expect("relation_set");

    assert_eq!(middle.relations_using_way(70).expect("query"), vec![330]);
    assert!(
        middle.relations_using_way(7).expect("query").is_empty(),
        "node members are outside the way range"
    );
}

#[rstest]
fn droptemp_discards_the_staging_tables(driver: MemoryStoreDriver) {
    let mut middle = StagingMiddle::new(Box::new(driver.clone()));
    let config = MiddleConfig {
        droptemp: true,
        ..config()
    };
    middle.start(&config).expect("start");
    middle.node_set(1, 0.0, 0.0, &Tags::new()).expect("node_set");
    middle.commit().expect("commit");
    middle.stop().expect("stop");

    assert!(driver.node_ids().is_empty());
}

mod flat_node_cache {
    use super::*;

    fn flat_config(dir: &TempDir) -> MiddleConfig {
        MiddleConfig {
            flat_node_file: Some(dir.path().join("nodes.cache")),
            ..config()
        }
    }

    #[rstest]
    fn nodes_resolve_through_the_flat_file(driver: MemoryStoreDriver) {
        let dir = TempDir::new().expect("temp dir");
        // A zero-size (lossy) RAM cache forces every read down to the file.
        let mut middle = started(
            &driver,
            &MiddleConfig {
                cache_mb: 0,
                ..flat_config(&dir)
            },
        );
        for id in 1..=3 {
            middle
                .node_set(id, id as f64, id as f64, &Tags::new())
                .expect("node_set");
        }
        middle.way_set(100, &[1, 2, 3], &Tags::new()).expect("way_set");

        // The staging store holds no node rows in flat mode.
        assert!(driver.node_ids().is_empty());

        let way = middle.way_get(100).expect("way_get").expect("hit");
        assert_eq!(way.nodes.len(), 3);
        assert_close(way.nodes[2].lat(), 3.0);
    }

    #[rstest]
    fn deletes_write_the_tombstone(driver: MemoryStoreDriver) {
        let dir = TempDir::new().expect("temp dir");
        let mut middle = started(&driver, &flat_config(&dir));
        middle.node_set(1, 1.0, 1.0, &Tags::new()).expect("node_set");
        middle.node_delete(1).expect("node_delete");
        assert!(middle.node_get(1).expect("node_get").is_none());
    }

    #[rstest]
    fn second_pass_reopens_the_file_without_losing_entries(driver: MemoryStoreDriver) {
        let dir = TempDir::new().expect("temp dir");
        let mut middle = started(&driver, &flat_config(&dir));
        middle.node_set(1, 1.5, 2.5, &Tags::new()).expect("node_set");
        middle.way_set(100, &[1], &Tags::new()).expect("way_set");
        middle.node_changed(1).expect("node_changed");

        let mut output = RecordingOutput::default();
        middle.iterate_ways(&mut output).expect("iterate_ways");
        assert_eq!(output.ways.len(), 1);
        assert_close(output.ways[0].2[0].lat(), 1.5);

        // The reopened append-mode handle still serves earlier writes.
        middle.stop().expect("stop");
        let mut middle = started(
            &driver,
            &MiddleConfig {
                append: true,
                ..flat_config(&dir)
            },
        );
        let record = middle.node_get(1).expect("node_get").expect("hit");
        assert_close(record.node.lat(), 1.5);
        assert_close(record.node.lon(), 2.5);
    }
}
