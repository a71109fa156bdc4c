//! End-to-end tests of the HTTP API
//!
//! A fixture server stands in for the metadata API, DefiLlama and CoinGecko;
//! pracc is started against it on an ephemeral port and queried over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use pracc::api::Server;
use pracc::config::{CacheConfig, Config, UpstreamConfig};
use pracc::{Assembler, Provider, RequestCache};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;

const DAY: i64 = 86_400;
const D0: i64 = 1_700_006_400;

#[derive(Default)]
struct Fixture {
    metadata_down: AtomicBool,
    metadata_calls: AtomicUsize,
}

async fn dataset(State(fixture): State<Arc<Fixture>>) -> Response {
    fixture.metadata_calls.fetch_add(1, Ordering::SeqCst);
    if fixture.metadata_down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({
        "protocols": [
            {
                "id": "zcash",
                "name": "Zcash",
                "logo_url": "https://img/zcash.png",
                "url": "https://z.cash",
                "defillama_slug": "c:Zcash",
                "coingecko_id": "zcash",
                "categories": "L1, Privacy",
                "sub_categories": "Shielded Pool",
                "ipc": 2,
                "overall_score": 11
            },
            {
                "id": "tornado",
                "name": "Tornado Cash",
                "logo_url": "https://img/tornado.png",
                "defillama_slug": "p:tornado-cash",
                "coingecko_id": "tornado-cash",
                "categories": "Mixer",
                "sub_categories": "Mixer",
                "overall_score": "6.5"
            },
            {
                "id": "railgun",
                "name": "Railgun",
                "categories": "Privacy",
                "sub_categories": ""
            }
        ],
        "internal_protocols": [
            {
                "asc_id": "zcash",
                "name": "Orchard",
                "category": "Shielded Pool",
                "privacy_stack": "zk-SNARK, Halo2",
                "priv_who": 3,
                "punk_lv": "N/A"
            }
        ]
    }))
    .into_response()
}

async fn chain_tvl(Path(chain): Path<String>) -> Response {
    if chain != "Zcash" {
        return StatusCode::NOT_FOUND.into_response();
    }
    let points: Vec<Value> = (0..3)
        .map(|i| json!({ "date": D0 + i * DAY, "tvl": 100.0 * (i + 1) as f64 }))
        .collect();
    Json(Value::Array(points)).into_response()
}

async fn protocol_tvl(Path(slug): Path<String>) -> Response {
    if slug != "tornado-cash" {
        return StatusCode::NOT_FOUND.into_response();
    }
    let points: Vec<Value> = (0..3)
        .map(|i| json!({ "date": D0 + i * DAY, "totalLiquidityUSD": 100.0 }))
        .collect();
    Json(json!({ "name": "Tornado Cash", "tvl": points })).into_response()
}

async fn markets() -> Json<Value> {
    Json(json!([
        {
            "id": "zcash",
            "symbol": "zec",
            "image": "https://img/zec.png",
            "current_price": 30.0,
            "total_supply": 21_000_000.0,
            "price_change_percentage_24h": 1.5
        },
        {
            "id": "tornado-cash",
            "symbol": "torn",
            "current_price": 5.0,
            "total_supply": null
        }
    ]))
}

async fn market_chart(Path(id): Path<String>) -> Json<Value> {
    let prices = if id == "zcash" {
        json!([[D0 * 1000, 20.0], [(D0 + DAY) * 1000, 25.0]])
    } else {
        json!([])
    };
    Json(json!({ "prices": prices }))
}

async fn start_upstream(fixture: Arc<Fixture>) -> SocketAddr {
    let app = Router::new()
        .route("/data", get(dataset))
        .route("/llama/v2/historicalChainTvl/{chain}", get(chain_tvl))
        .route("/llama/protocol/{slug}", get(protocol_tvl))
        .route("/gecko/coins/markets", get(markets))
        .route("/gecko/coins/{id}/market_chart", get(market_chart))
        .with_state(fixture);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Harness {
    fixture: Arc<Fixture>,
    base: String,
    client: reqwest::Client,
}

impl Harness {
    async fn start(cache: CacheConfig) -> Self {
        let fixture = Arc::new(Fixture::default());
        let upstream = start_upstream(Arc::clone(&fixture)).await;

        let config = Config {
            upstream: UpstreamConfig {
                data_api_url: format!("http://{upstream}/data"),
                defillama_url: format!("http://{upstream}/llama"),
                coingecko_url: format!("http://{upstream}/gecko"),
                ..UpstreamConfig::default()
            },
            cache,
            ..Config::default()
        };
        config.validate().unwrap();

        let server = Server::new(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener, std::future::pending()));

        Self {
            fixture,
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    async fn uncached() -> Self {
        Self::start(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        })
        .await
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }
}

fn approx(value: &Value, expected: f64) -> bool {
    value.as_f64().is_some_and(|v| (v - expected).abs() < 1e-9)
}

#[tokio::test]
async fn test_overview_joins_all_sources() {
    let harness = Harness::uncached().await;
    let (status, body) = harness.get("/overview").await;
    assert_eq!(status, StatusCode::OK);

    let protocols = body["protocols"].as_array().unwrap();
    let names: Vec<&str> = protocols.iter().map(|p| p["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Zcash", "Tornado Cash", "Railgun"]);

    let zcash = &protocols[0];
    assert_eq!(zcash["categories"], json!(["L1", "Privacy"]));
    assert_eq!(zcash["tier"], "S");
    assert!(approx(&zcash["tvl"], 300.0));
    assert!(approx(&zcash["tvlShare"], 0.75));
    assert!(approx(&zcash["coin"]["fdv"], 630_000_000.0));

    let tornado = &protocols[1];
    assert!(approx(&tornado["overallScore"], 6.5));
    assert!(tornado["coin"]["fdv"].is_null());

    let railgun = &protocols[2];
    assert!(railgun["tvl"].is_null());
    assert!(railgun["coin"].is_null());

    assert_eq!(body["stats"]["protocols"], 3);
    assert_eq!(body["stats"]["categories"], 3);
    assert!(approx(&body["stats"]["totalTvl"], 400.0));

    let month = body["allTvls"]["month"].as_array().unwrap();
    assert_eq!(month.len(), 3);
    let last = &month[2];
    assert_eq!(last["timestamp"], D0 + 2 * DAY);
    assert!(approx(&last["total"], 400.0));
    assert!(approx(&last["perProtocol"]["Zcash"], 300.0));

    // Zcash FDV from two daily history prices; Tornado has no supply.
    let fdv_month = body["allFdvs"]["month"].as_array().unwrap();
    assert_eq!(fdv_month.len(), 2);
    assert!(approx(&fdv_month[1]["total"], 25.0 * 21_000_000.0));
}

#[tokio::test]
async fn test_overview_exclude() {
    let harness = Harness::uncached().await;
    let (status, body) = harness.get("/overview?exclude=Zcash").await;
    assert_eq!(status, StatusCode::OK);

    let month = body["allTvls"]["month"].as_array().unwrap();
    let last = month.last().unwrap();
    assert!(approx(&last["total"], 100.0));
    assert!(last["perProtocol"].get("Zcash").is_none());
    // Rows and stats are not filtered.
    assert_eq!(body["protocols"].as_array().unwrap().len(), 3);
    assert!(body["allFdvs"]["month"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_protocols_filter() {
    let harness = Harness::uncached().await;

    let (status, body) = harness.get("/protocols?category=Mixer").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "tornado");

    let (_, body) = harness.get("/protocols?category=Privacy&subCategory=Shielded%20Pool").await;
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["zcash"]);

    let (_, body) = harness.get("/protocols").await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_protocol_detail() {
    let harness = Harness::uncached().await;
    let (status, body) = harness.get("/protocols/zcash").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["protocol"]["name"], "Zcash");
    assert_eq!(body["protocol"]["marketId"], "zcash");
    let internal = body["internalProtocols"].as_array().unwrap();
    assert_eq!(internal.len(), 1);
    assert_eq!(internal[0]["name"], "Orchard");
    assert_eq!(internal[0]["privacyStack"], json!(["zk-SNARK", "Halo2"]));
    assert_eq!(internal[0]["punkLevel"], "N/A");

    assert_eq!(body["tvl"]["month"].as_array().unwrap().len(), 3);
    assert!(approx(&body["tvlSummary"]["current"], 300.0));
}

#[tokio::test]
async fn test_protocol_detail_without_series() {
    let harness = Harness::uncached().await;
    let (status, body) = harness.get("/protocols/railgun").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["tvl"].is_null());
    assert!(body["internalProtocols"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_protocol_is_404() {
    let harness = Harness::uncached().await;
    let (status, body) = harness.get("/protocols/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Protocol not found: nope");
}

#[tokio::test]
async fn test_dominance() {
    let harness = Harness::uncached().await;
    let (status, body) = harness.get("/dominance").await;
    assert_eq!(status, StatusCode::OK);

    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["name"], "Zcash");
    assert_eq!(entries[0]["logo"], "https://img/zcash.png");
    assert!(approx(&entries[0]["share"], 0.75));
    assert!(approx(&entries[0]["change24h"], 0.5));
    assert_eq!(entries[1]["name"], "Tornado Cash");
    assert!(approx(&entries[1]["change24h"], 0.0));
}

#[tokio::test]
async fn test_metadata_outage_is_502() {
    let harness = Harness::uncached().await;
    harness.fixture.metadata_down.store(true, Ordering::SeqCst);

    for _ in 0..3 {
        let (status, body) = harness.get("/overview").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("metadata"));
    }

    let (status, body) = harness.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");

    harness.fixture.metadata_down.store(false, Ordering::SeqCst);
    let (status, _) = harness.get("/overview").await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = harness.get("/health").await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_snapshot_cache_serves_repeat_requests() {
    let harness = Harness::start(CacheConfig::default()).await;

    let (_, first) = harness.get("/overview?exclude=Zcash,Railgun").await;
    let (_, second) = harness.get("/overview?exclude=Railgun,Zcash").await;
    assert_eq!(first, second);
    assert_eq!(harness.fixture.metadata_calls.load(Ordering::SeqCst), 1);

    let (_, health) = harness.get("/health").await;
    assert_eq!(health["cache"]["hits"], 1);
    assert_eq!(health["cache"]["size"], 1);
}

async fn slow_chain_tvl(Path(chain): Path<String>) -> Response {
    match chain.as_str() {
        "Hang" => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(json!([{ "date": D0, "tvl": 1.0 }])).into_response()
        }
        "Ok" => Json(json!([{ "date": D0, "tvl": 10.0 }])).into_response(),
        "Zero" => Json(json!([
            { "date": D0, "tvl": 0.0 },
            { "date": D0 + DAY, "tvl": 0.0 }
        ]))
        .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn slow_dataset() -> Json<Value> {
    Json(json!([
        { "id": "hang", "name": "Hang", "defillama_slug": "c:Hang" },
        { "id": "ok", "name": "Ok", "defillama_slug": "c:Ok" },
        { "id": "zero", "name": "Zero", "defillama_slug": "c:Zero" }
    ]))
}

#[tokio::test]
async fn test_hanging_upstream_times_out_per_protocol() {
    let app = Router::new()
        .route("/data", get(slow_dataset))
        .route("/llama/v2/historicalChainTvl/{chain}", get(slow_chain_tvl));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = Config {
        upstream: UpstreamConfig {
            data_api_url: format!("http://{upstream}/data"),
            defillama_url: format!("http://{upstream}/llama"),
            coingecko_url: format!("http://{upstream}/gecko"),
            request_timeout: Duration::from_millis(300),
            ..UpstreamConfig::default()
        },
        ..Config::default()
    };
    let assembler = Assembler::from_config(&config).unwrap();

    let started = Instant::now();
    let overview = assembler
        .assemble_overview(&RequestCache::new())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());

    let tvls: Vec<Option<f64>> = overview.protocols.iter().map(|p| p.tvl).collect();
    assert_eq!(tvls, vec![None, Some(10.0), Some(0.0)]);
    assert_eq!(overview.protocols[1].tvl_share, Some(1.0));

    let month = &overview.all_tvls.month;
    assert_eq!(month.len(), 1);
    assert_eq!(month[0].timestamp, D0);
    assert_eq!(month[0].total, 10.0);
    assert_eq!(month[0].per_protocol.keys().map(String::as_str).collect::<Vec<_>>(), vec!["Ok"]);

    let defillama = assembler.sources().health().tracker(Provider::DefiLlama).snapshot();
    assert_eq!(defillama.failure_count, 1);
    assert_eq!(defillama.success_count, 2);
}
