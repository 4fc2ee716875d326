mod support;

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use cardex::config::{PriceConfig, PricechartingConfig};
use cardex::index::ArtifactLayout;
use cardex::prices::{update_price_history_on, PricechartingFeed};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use support::unique_temp_dir;

#[derive(Default)]
struct MockQuotes {
    requests: Mutex<Vec<HashMap<String, String>>>,
}

async fn quote(
    State(mock): State<Arc<MockQuotes>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    mock.requests.lock().unwrap().push(params.clone());
    match params.get("id").map(String::as_str) {
        Some("pc-holo") => Json(json!({
            "price": 4.0,
            "byFinish": {
                "holofoil": { "price": 21.5, "lastSold": "2024-03-30" },
                "reverseHolofoil": { "price": 9.75 }
            }
        }))
        .into_response(),
        Some("pc-flat") => Json(json!({ "price": 1.25, "lastSold": "2024-03-29" })).into_response(),
        _ => (StatusCode::BAD_GATEWAY, "upstream down").into_response(),
    }
}

async fn spawn_mock_quotes(mock: Arc<MockQuotes>) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock quotes");
    let addr = listener.local_addr().expect("mock addr");
    let app = Router::new().route("/quote", get(quote)).with_state(mock);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock quotes");
    });
    (addr, handle)
}

fn card(id: &str) -> Value {
    json!({ "id": id, "tcgplayer": { "prices": { "normal": { "market": 0.5 } } } })
}

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap_or_else(|err| panic!("{}: {err}", path.display())))
        .expect("price history should be JSON")
}

fn seeded(label: &str) -> (ArtifactLayout, PriceConfig) {
    let root = unique_temp_dir(label);
    let layout = ArtifactLayout::new(root.join("public"));
    fs::create_dir_all(layout.name_dir()).expect("name dir");
    let cards = json!([card("sv1-1"), card("sv1-2"), card("sv1-3"), card("sv1-4")]);
    fs::write(layout.name_path("Sprigatito"), cards.to_string()).expect("seed cards");

    let map_path = root.join("pricecharting-map.json");
    fs::write(
        &map_path,
        json!({ "sv1-1": "pc-holo", "sv1-2": "pc-flat", "sv1-3": "pc-missing" }).to_string(),
    )
    .expect("seed map");

    let config = PriceConfig {
        pricecharting: PricechartingConfig {
            map_path,
            timeout_secs: 5,
            ..PricechartingConfig::default()
        },
        ..PriceConfig::default()
    };
    (layout, config)
}

#[tokio::test]
async fn mapped_cards_get_pricecharting_snapshots() {
    let mock = Arc::new(MockQuotes::default());
    let (addr, handle) = spawn_mock_quotes(mock.clone()).await;
    let (layout, mut config) = seeded("pc-quotes");
    config.pricecharting.endpoint = Some(format!("http://{addr}/quote"));
    config.pricecharting.api_key = Some("pc key".to_string());

    let feed = PricechartingFeed::from_config(&config.pricecharting)
        .expect("http client")
        .expect("feed configured");
    let today = NaiveDate::from_ymd_opt(2024, 4, 1).expect("date");
    let report = update_price_history_on(&layout, &config, Some(&feed), today)
        .await
        .expect("run");
    assert_eq!(report.cards_written, 4);
    assert_eq!(report.quotes, 2);

    let holo = read_json(&layout.price_path("sv1-1"));
    assert_eq!(
        holo["pricecharting"]["holofoil"],
        json!([{ "d": "2024-04-01", "price": 21.5, "lastSold": "2024-03-30" }])
    );
    assert_eq!(holo["pricecharting"]["reverseHolofoil"][0]["price"], 9.75);
    assert!(holo["pricecharting"].get("normal").is_none());
    assert_eq!(holo["tcgplayer"]["normal"][0]["market"], 0.5);

    let flat = read_json(&layout.price_path("sv1-2"));
    assert_eq!(flat["pricecharting"]["normal"][0]["price"], 1.25);

    // A failed quote and an unmapped card still get their market snapshots.
    for id in ["sv1-3", "sv1-4"] {
        let history = read_json(&layout.price_path(id));
        assert_eq!(history["pricecharting"], json!({}));
        assert_eq!(history["tcgplayer"]["normal"][0]["d"], "2024-04-01");
    }

    let requests = mock.requests.lock().unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|params| params["k"] == "pc key"));
    let ids: Vec<&str> = requests.iter().map(|params| params["id"].as_str()).collect();
    assert_eq!(ids, vec!["pc-holo", "pc-flat", "pc-missing"]);
    handle.abort();
}

#[tokio::test]
async fn second_run_on_the_same_day_adds_nothing() {
    let mock = Arc::new(MockQuotes::default());
    let (addr, handle) = spawn_mock_quotes(mock.clone()).await;
    let (layout, mut config) = seeded("pc-daily");
    config.pricecharting.endpoint = Some(format!("http://{addr}/quote"));
    config.pricecharting.api_key = Some("k".to_string());
    let feed = PricechartingFeed::from_config(&config.pricecharting)
        .expect("http client")
        .expect("feed configured");

    let today = NaiveDate::from_ymd_opt(2024, 4, 1).expect("date");
    for _ in 0..2 {
        update_price_history_on(&layout, &config, Some(&feed), today)
            .await
            .expect("run");
    }
    let holo = read_json(&layout.price_path("sv1-1"));
    assert_eq!(holo["pricecharting"]["holofoil"].as_array().map(Vec::len), Some(1));
    handle.abort();
}

#[test]
fn feed_is_off_without_endpoint_or_key() {
    let (_, mut config) = seeded("pc-off");
    assert!(PricechartingFeed::from_config(&config.pricecharting)
        .expect("no client needed")
        .is_none());
    config.pricecharting.api_key = Some("k".to_string());
    assert!(PricechartingFeed::from_config(&config.pricecharting)
        .expect("no client needed")
        .is_none());
}
