mod support;

use std::fs;

use cardex::data::Key;
use cardex::error::UpstreamError;
use cardex::pipeline::run_fetch;
use cardex::reconcile::ReconciliationEngine;
use cardex::upstream::{CardQuery, DexRange, UpstreamClient};
use serde_json::Value;

use support::{card, fast_config, unique_temp_dir, universe, ScriptedSource};

fn read_ids(path: &std::path::Path) -> Vec<String> {
    let raw = fs::read_to_string(path).unwrap_or_else(|err| panic!("{}: {err}", path.display()));
    let json: Value = serde_json::from_str(&raw).expect("artifact should be JSON");
    json.as_array()
        .expect("artifact should be an array")
        .iter()
        .map(|card| card["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn every_key_gets_an_artifact_when_every_query_fails() {
    let root = unique_temp_dir("complete");
    let entries: Vec<(String, u32)> = (1..=12).map(|dex| (format!("Mon {dex}"), dex)).collect();
    let refs: Vec<(&str, u32)> = entries.iter().map(|(n, d)| (n.as_str(), *d)).collect();
    let u = universe(&refs);
    let config = fast_config(root.clone(), vec![(1, 12)]);

    let outcome = run_fetch(ScriptedSource::failing(), &config, &u).await.expect("run should complete");
    assert_eq!(outcome.persist.summary.len(), 24);
    assert!(outcome.persist.is_clean());
    assert!(!outcome.run.failures.is_empty());

    let layout = cardex::index::ArtifactLayout::new(&root);
    for entry in u.entries() {
        assert_eq!(fs::read_to_string(layout.name_path(&entry.name)).expect("name artifact"), "[]");
        for path in layout.dex_paths(entry.dex) {
            assert_eq!(fs::read_to_string(&path).expect("dex artifact"), "[]", "{}", path.display());
        }
    }
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn multi_key_record_is_filed_under_each_dex_and_name() {
    let root = unique_temp_dir("multikey");
    let u = universe(&[("Sinistcha", 1013), ("Poltchageist", 1012)]);
    let mut config = fast_config(root.clone(), vec![(1012, 1013)]);
    config.engine.backfill.min_records = 0;
    config.engine.backfill.sparse_names.clear();

    let source = ScriptedSource::new(|query| match query {
        CardQuery::DexRange(_) => Ok(vec![
            card("dual", &[1012, 1013], "2024-01-01", "1"),
            card("dual", &[1012, 1013], "2024-01-01", "1"),
        ]),
        _ => Ok(Vec::new()),
    });
    run_fetch(source, &config, &u).await.expect("run");

    let layout = cardex::index::ArtifactLayout::new(&root);
    assert_eq!(read_ids(&layout.dex_dir().join("1012.json")), vec!["dual"]);
    assert_eq!(read_ids(&layout.dex_dir().join("1013.json")), vec!["dual"]);
    assert_eq!(read_ids(&layout.name_path("Sinistcha")), vec!["dual"]);
    assert_eq!(read_ids(&layout.name_path("Poltchageist")), vec!["dual"]);
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn arrival_order_does_not_change_artifact_bytes() {
    let records = vec![
        card("b", &[29], "2020/01/01", "10"),
        card("a", &[29], "2020/01/01", "10"),
        card("c", &[29], "2021/06/01", "3"),
        card("d", &[29], "", "99"),
    ];
    let mut reversed = records.clone();
    reversed.reverse();

    let mut outputs = Vec::new();
    for (label, batch) in [("order-a", records), ("order-b", reversed)] {
        let root = unique_temp_dir(label);
        let u = universe(&[("Nidoran♀", 29)]);
        let mut config = fast_config(root.clone(), vec![(29, 29)]);
        config.engine.backfill.sparse_names.clear();
        let source = ScriptedSource::new(move |query| match query {
            CardQuery::DexRange(_) => Ok(batch.clone()),
            _ => Ok(Vec::new()),
        });
        run_fetch(source, &config, &u).await.expect("run");
        let layout = cardex::index::ArtifactLayout::new(&root);
        outputs.push(fs::read(layout.dex_dir().join("0029.json")).expect("artifact"));
        assert_eq!(read_ids(&layout.dex_dir().join("29.json")), vec!["c", "a", "b", "d"]);
        let _ = fs::remove_dir_all(root);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn padded_encodings_are_byte_identical() {
    let root = unique_temp_dir("padding");
    let u = universe(&[("Nidoran♀", 29)]);
    let mut config = fast_config(root.clone(), vec![(1, 50)]);
    config.engine.backfill.sparse_names.clear();
    let source = ScriptedSource::new(|query| match query {
        CardQuery::DexRange(_) => Ok(vec![card("base1-1", &[29], "1999/01/09", "1")]),
        _ => Ok(Vec::new()),
    });
    run_fetch(source, &config, &u).await.expect("run");

    let dex = cardex::index::ArtifactLayout::new(&root).dex_dir();
    let plain = fs::read(dex.join("29.json")).expect("29");
    assert_eq!(fs::read(dex.join("029.json")).expect("029"), plain);
    assert_eq!(fs::read(dex.join("0029.json")).expect("0029"), plain);
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn failing_range_subdivides_to_min_span_then_queries_names() {
    let entries: Vec<(String, u32)> = (1..=100).map(|dex| (format!("Mon {dex}"), dex)).collect();
    let refs: Vec<(&str, u32)> = entries.iter().map(|(n, d)| (n.as_str(), *d)).collect();
    let u = universe(&refs);
    let config = fast_config(unique_temp_dir("subdivide"), vec![(1, 100)]);

    let source = ScriptedSource::new(|query| match query {
        CardQuery::DexRange(_) => Err(UpstreamError::transient(Some(503), "overloaded")),
        CardQuery::Name(name) => Ok(vec![card(&format!("{name}-promo"), &[], "2020/01/01", "1")]),
        _ => Ok(Vec::new()),
    });
    let client = UpstreamClient::new(source, &config.upstream);
    let engine = ReconciliationEngine::new(client, &u, config.engine.clone());
    let (catalog, report) = engine.run().await;

    assert!(!report.fallback_ranges.is_empty());
    assert!(report
        .fallback_ranges
        .iter()
        .all(|range| range.width() <= config.engine.min_split_span));
    let covered: u32 = report.fallback_ranges.iter().map(DexRange::width).sum();
    assert_eq!(covered, 100);
    assert!(catalog.empty_keys().is_empty());
    assert_eq!(catalog.bucket(&Key::Dex(57)).map(<[_]>::len), Some(1));

    let range_calls = engine
        .client()
        .source()
        .calls()
        .iter()
        .filter(|q| q.starts_with("nationalPokedexNumbers:["))
        .count();
    // 1 + 2 + 4 + 8 + 16 ranges, two attempts each.
    assert!(range_calls <= 31 * 2, "{range_calls} range calls");
}

#[tokio::test]
async fn backfill_union_keeps_both_key_assignments() {
    let root = unique_temp_dir("union");
    let u = universe(&[("Bulbasaur", 1), ("Sprigatito", 906)]);
    let mut config = fast_config(root.clone(), vec![(1, 1)]);
    config.engine.backfill.sparse_names.clear();

    // The broad query tags the card as #1; the name query for #906 returns it too.
    let source = ScriptedSource::new(|query| match query {
        CardQuery::DexRange(_) => Ok(vec![card("x", &[1], "2023/03/31", "5")]),
        CardQuery::Name(name) if name == "Sprigatito" => {
            Ok(vec![card("x", &[1], "2023/03/31", "5"), card("s", &[906], "2023/03/31", "6")])
        }
        _ => Ok(Vec::new()),
    });
    let outcome = run_fetch(source, &config, &u).await.expect("run");
    assert_eq!(outcome.run.backfill_keys, vec!["Sprigatito".to_string()]);

    let layout = cardex::index::ArtifactLayout::new(&root);
    assert_eq!(read_ids(&layout.dex_dir().join("0001.json")), vec!["x"]);
    assert_eq!(read_ids(&layout.name_path("Bulbasaur")), vec!["x"]);
    assert_eq!(read_ids(&layout.dex_dir().join("906.json")), vec!["s", "x"]);
    assert_eq!(read_ids(&layout.name_path("Sprigatito")), vec!["s", "x"]);

    let summary: Value =
        serde_json::from_str(&fs::read_to_string(layout.index_path()).expect("index")).expect("json");
    assert_eq!(summary[1], serde_json::json!({ "key": 906, "count": 2 }));
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn unusable_output_dir_fails_before_any_query() {
    let root = unique_temp_dir("setup");
    fs::write(&root, "occupied").expect("seed file");
    let u = universe(&[("Mew", 151)]);
    let config = fast_config(root.clone(), vec![(151, 151)]);
    let source = ScriptedSource::new(|_| Ok(Vec::new()));

    let err = run_fetch(source, &config, &u).await.expect_err("setup should fail");
    assert!(matches!(err, cardex::error::PipelineError::Setup { .. }));
    let _ = fs::remove_file(root);
}

#[tokio::test]
async fn sparse_dex_ids_are_backfilled_with_a_dex_query() {
    let u = universe(&[("Bulbasaur", 1), ("Nidoran♂", 32)]);
    let mut config = fast_config(unique_temp_dir("sparse-dex"), vec![(1, 32)]);
    config.engine.backfill.sparse_names.clear();

    // Only the dex query knows about this card; the name search misses the symbol.
    let source = ScriptedSource::new(|query| match query {
        CardQuery::Dex(32) => Ok(vec![card("nido-m", &[32], "2021/02/19", "40")]),
        _ => Ok(Vec::new()),
    });
    let client = UpstreamClient::new(source, &config.upstream);
    let engine = ReconciliationEngine::new(client, &u, config.engine.clone());
    let (catalog, report) = engine.run().await;

    assert_eq!(report.backfill_keys, vec!["Nidoran♂".to_string()]);
    assert_eq!(catalog.bucket(&Key::Dex(32)).map(<[_]>::len), Some(1));
    assert_eq!(catalog.bucket(&Key::name("Nidoran♂")).map(<[_]>::len), Some(1));
    assert_eq!(catalog.bucket(&Key::Dex(1)).map(<[_]>::len), Some(0));

    let calls = engine.client().source().calls();
    assert!(calls.contains(&"nationalPokedexNumbers:32".to_string()));
    assert!(calls.contains(&"name:\"Nidoran♂\"".to_string()));
    assert!(!calls.contains(&"nationalPokedexNumbers:1".to_string()));
}
