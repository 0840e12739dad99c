//! Integration tests for influxdb-write.
//!
//! These tests require a running InfluxDB instance.
//! Start one with: `docker-compose up -d`
//!
//! Run tests with: `cargo test --test integration`

use std::time::Duration;

use serial_test::serial;

use influxdb_write::{Client, Error, OutcomeRouter, Point, WriteOptions, WritePrecision};

// Test configuration - matches docker-compose.yml
const INFLUXDB_URL: &str = "http://localhost:8086";
const INFLUXDB_ORG: &str = "test-org";
const INFLUXDB_TOKEN: &str = "test-token-for-development-only";
const INFLUXDB_BUCKET: &str = "test-bucket";

/// Helper to check if InfluxDB is available
async fn influxdb_available() -> bool {
    let client = reqwest::Client::new();
    client
        .get(format!("{}/health", INFLUXDB_URL))
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

/// Helper to delete all data in bucket
async fn clear_bucket() -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let url = format!(
        "{}/api/v2/delete?org={}&bucket={}",
        INFLUXDB_URL, INFLUXDB_ORG, INFLUXDB_BUCKET
    );

    let body = serde_json::json!({
        "start": "1970-01-01T00:00:00Z",
        "stop": "2100-01-01T00:00:00Z"
    });

    client
        .post(&url)
        .header("Authorization", format!("Token {}", INFLUXDB_TOKEN))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    Ok(())
}

/// Count stored points of a measurement with a Flux `count()`.
async fn count_points(measurement: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let query = format!(
        r#"from(bucket: "{}")
           |> range(start: 0)
           |> filter(fn: (r) => r._measurement == "{}")
           |> group()
           |> count()"#,
        INFLUXDB_BUCKET, measurement
    );

    let body = serde_json::json!({
        "query": query,
        "type": "flux",
        "dialect": {"header": true, "annotations": []}
    });

    let csv = client
        .post(format!("{}/api/v2/query?org={}", INFLUXDB_URL, INFLUXDB_ORG))
        .header("Authorization", format!("Token {}", INFLUXDB_TOKEN))
        .header("Accept", "application/csv")
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let mut lines = csv.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(header) = lines.next() else {
        return Ok(0);
    };
    let column = header
        .split(',')
        .position(|c| c == "_value")
        .ok_or("no _value column")?;
    let row = lines.next().ok_or("no count row")?;
    let value = row.split(',').nth(column).ok_or("short row")?;
    Ok(value.parse()?)
}

/// Generate N points, one second apart, spread over 10 hosts.
fn generate_points(measurement: &str, count: usize) -> Vec<Point> {
    let base_ts = 1700000000000i64; // 2023-11-14, milliseconds

    (0..count)
        .map(|i| {
            Point::measurement(measurement)
                .tag("host", format!("server{}", i % 10))
                .tag("region", "us-east")
                .field("value", (i % 100) as f64 + (i % 1000) as f64 / 1000.0)
                .field("seq", i as i64)
                .time(base_ts + i as i64 * 1000, WritePrecision::Ms)
        })
        .collect()
}

fn client() -> Client {
    Client::new(INFLUXDB_URL, INFLUXDB_ORG, INFLUXDB_TOKEN).unwrap()
}

// ============================================================================
// Synchronous Writes
// ============================================================================

#[tokio::test]
#[serial]
async fn test_sync_write_points() {
    if !influxdb_available().await {
        eprintln!("Skipping test: InfluxDB not available");
        return;
    }

    clear_bucket().await.unwrap();

    let api = client().sync_write_api(WriteOptions::default()).unwrap();
    api.write_all(
        INFLUXDB_BUCKET,
        INFLUXDB_ORG,
        generate_points("sync_test", 100),
        WritePrecision::Ns,
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    // Two fields per point
    assert_eq!(count_points("sync_test").await.unwrap(), 200);
}

#[tokio::test]
#[serial]
async fn test_various_data_types() {
    if !influxdb_available().await {
        eprintln!("Skipping test: InfluxDB not available");
        return;
    }

    clear_bucket().await.unwrap();

    let point = Point::measurement("types_test")
        .tag("sensor", "temp 01")
        .field("string_field", "hello \"world\"")
        .field("float_field", 2.5)
        .field("int_field", 42)
        .field("uint_field", 7u64)
        .field("bool_field", true)
        .time(1700000000, WritePrecision::S);

    let api = client().sync_write_api(WriteOptions::default()).unwrap();
    api.write(INFLUXDB_BUCKET, INFLUXDB_ORG, point, WritePrecision::Ns)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    // One row per field
    assert_eq!(count_points("types_test").await.unwrap(), 5);
}

// ============================================================================
// Batching Writes
// ============================================================================

#[tokio::test]
#[serial]
async fn test_batching_write() {
    if !influxdb_available().await {
        eprintln!("Skipping test: InfluxDB not available");
        return;
    }

    clear_bucket().await.unwrap();

    let (router, mut outcomes) = OutcomeRouter::new().with_channel();
    let api = client()
        .write_api_builder()
        .options(WriteOptions::default().with_batch_size(25))
        .router(router)
        .build()
        .unwrap();

    api.submit_all(
        INFLUXDB_BUCKET,
        INFLUXDB_ORG,
        generate_points("batch_test", 100),
        WritePrecision::Ns,
    )
    .unwrap();
    api.close(Some(Duration::from_secs(30))).await.unwrap();

    let mut successes = 0;
    while let Ok(outcome) = outcomes.try_recv() {
        assert!(outcome.is_success(), "unexpected outcome: {:?}", outcome.kind);
        successes += 1;
    }
    assert_eq!(successes, 4);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(count_points("batch_test").await.unwrap(), 200);
}

#[tokio::test]
#[serial]
#[ignore] // Run with: cargo test --test integration test_large_batching_write -- --ignored
async fn test_large_batching_write() {
    if !influxdb_available().await {
        eprintln!("Skipping test: InfluxDB not available");
        return;
    }

    clear_bucket().await.unwrap();

    let api = client()
        .write_api(
            WriteOptions::default()
                .with_batch_size(5_000)
                .with_max_concurrency(4),
        )
        .unwrap();

    println!("Writing 100,000 data points...");
    let start = std::time::Instant::now();
    api.submit_all(
        INFLUXDB_BUCKET,
        INFLUXDB_ORG,
        generate_points("large_test", 100_000),
        WritePrecision::Ns,
    )
    .unwrap();
    api.close(Some(Duration::from_secs(120))).await.unwrap();
    let elapsed = start.elapsed();

    println!(
        "Wrote 100000 points in {:?} ({:.0} points/sec)",
        elapsed,
        100_000f64 / elapsed.as_secs_f64()
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    // Two fields per point
    assert_eq!(count_points("large_test").await.unwrap(), 200_000);
}

// ============================================================================
// Error Handling
// ============================================================================

#[tokio::test]
#[serial]
async fn test_invalid_line_rejected() {
    if !influxdb_available().await {
        eprintln!("Skipping test: InfluxDB not available");
        return;
    }

    let api = client().sync_write_api(WriteOptions::default()).unwrap();
    let result = api
        .write(INFLUXDB_BUCKET, INFLUXDB_ORG, "bad_line value=", WritePrecision::Ns)
        .await;

    match result {
        Err(Error::PermanentDelivery { status, .. }) => assert_eq!(status, 400),
        other => panic!("expected a 400 rejection, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn test_nonexistent_bucket() {
    if !influxdb_available().await {
        eprintln!("Skipping test: InfluxDB not available");
        return;
    }

    let api = client().sync_write_api(WriteOptions::default()).unwrap();
    let result = api
        .write("nonexistent-bucket-12345", INFLUXDB_ORG, "m value=1i", WritePrecision::Ns)
        .await;

    assert_eq!(result.unwrap_err().status(), Some(404));
}
