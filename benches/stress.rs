use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

const BASE_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2030, 1, 7) {
    Some(d) => d,
    None => panic!("invalid base date"),
};

/// Bookable hours per day under the all-week rule.
const HOURS_PER_DAY: u64 = 24;

async fn connect(host: &str, port: u16, db: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(db)
        .user("fieldbook")
        .password("fieldbook");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_db() -> String {
    format!("bench_{}", Ulid::new())
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

#[derive(Clone, Copy)]
struct Pitch {
    venue: Ulid,
    field: Ulid,
}

/// Venue + field priced every day of the week, all day.
async fn seed(client: &Client) -> Pitch {
    let pitch = Pitch {
        venue: Ulid::new(),
        field: Ulid::new(),
    };
    client
        .batch_execute(&format!(
            "INSERT INTO venues VALUES ('{}', '{}')",
            pitch.venue,
            Ulid::new()
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO fields VALUES ('{}', '{}')",
            pitch.field, pitch.venue
        ))
        .await
        .unwrap();
    for day in 1..=7 {
        client
            .batch_execute(&format!(
                "INSERT INTO price_rules VALUES ('{}', '{}', {day}, '00:00', '24:00', 100000)",
                Ulid::new(),
                pitch.field
            ))
            .await
            .unwrap();
    }
    pitch
}

/// One-hour booking in the `n`th hour counted from the base date.
fn book_sql(pitch: Pitch, n: u64) -> String {
    let date = BASE_DATE + Days::new(n / HOURS_PER_DAY);
    let hour = n % HOURS_PER_DAY;
    let end = if hour == 23 {
        "24:00".to_string()
    } else {
        format!("{:02}:00", hour + 1)
    };
    format!(
        "INSERT INTO bookings VALUES ('{}', '{}', '{}', '{date}', '{hour:02}:00', '{end}')",
        Ulid::new(),
        pitch.field,
        pitch.venue
    )
}

fn is_conflict(err: &tokio_postgres::Error) -> bool {
    err.code().map(|c| c.code()) == Some("23P01")
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_db()).await;
    let pitch = seed(&client).await;

    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client.batch_execute(&book_sql(pitch, i)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Every task races for the same hours on one field. Exactly one booking per
/// hour may win; everything else must come back as an exclusion violation.
async fn phase2_contention(host: &str, port: u16) {
    let db = fresh_db();
    let setup = connect(host, port, &db).await;
    let pitch = seed(&setup).await;
    drop(setup);

    let n_tasks = 20;
    let n_hours = 200u64;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let db = db.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let mut latencies = Vec::with_capacity(n_hours as usize);
            for hour in 0..n_hours {
                let t = Instant::now();
                match client.batch_execute(&book_sql(pitch, hour)).await {
                    Ok(()) => {
                        won.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if is_conflict(&e) => {
                        lost.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_hours} hours: {won} won, {lost} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won as u64, n_hours, "each hour must be booked exactly once");
    print_latency("contended write latency", &mut all_latencies);
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let db = fresh_db();
    let setup = connect(host, port, &db).await;
    let pitch = seed(&setup).await;
    // Every other hour of the first week is taken.
    for n in (0..7 * HOURS_PER_DAY).step_by(2) {
        setup.batch_execute(&book_sql(pitch, n)).await.unwrap();
    }
    drop(setup);

    // Writers fill later weeks on the same field in the background.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5u64 {
        let host = host.to_string();
        let db = db.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let mut n = (w + 1) * 10_000;
            while !stop.load(Ordering::Relaxed) {
                let _ = client.batch_execute(&book_sql(pitch, n)).await;
                n += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let db = db.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let date = BASE_DATE + Days::new(((r + i) % 7) as u64);
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM unavailable_slots WHERE field_id = '{}' AND date = '{date}'",
                        pitch.field
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("unavailable_slots query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10u64;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_db()).await;
            let pitch = seed(&client).await;
            for i in 0..ops_per_conn {
                client.batch_execute(&book_sql(pitch, i)).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("FIELDBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("FIELDBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid FIELDBOOK_PORT");

    println!("=== fieldbook stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own tenant (unique dbname) to avoid interference

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended bookings on one field");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] availability reads under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
