use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const TIME_WINDOW: &str = "3:00 PM - 4:00 PM";

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("tatami")
        .password("tatami");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn bench_date(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2099, 1, 1).unwrap() + chrono::Days::new(i as u64)
}

/// Create a coach and advertise `n` daily slots in multi-row batches.
async fn setup_coach(client: &tokio_postgres::Client, class_type: &str, n: usize) -> Ulid {
    let coach = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO coaches (id, name) VALUES ('{coach}', 'Bench Coach')"
        ))
        .await
        .unwrap();

    for chunk_start in (0..n).step_by(100) {
        let rows: Vec<String> = (chunk_start..(chunk_start + 100).min(n))
            .map(|i| format!("('{coach}', '{}', '{TIME_WINDOW}', '{class_type}')", bench_date(i)))
            .collect();
        client
            .batch_execute(&format!(
                "INSERT INTO slots (coach_id, date, time, class_type) VALUES {}",
                rows.join(", ")
            ))
            .await
            .unwrap();
    }
    coach
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let n = 2000;
    let coach = setup_coach(&client, "Jiu-Jitsu", n).await;

    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let bid = Ulid::new();
        let uid = Ulid::new();
        let date = bench_date(i);
        let t = Instant::now();
        client
            .batch_execute(&format!(
                "INSERT INTO bookings (id, user_id, coach_id, date, time, class_type) VALUES \
                 ('{bid}', '{uid}', '{coach}', '{date}', '{TIME_WINDOW}', 'Jiu-Jitsu')"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Each task uses its own gym (unique dbname from connect())
            let client = connect(&host, port).await;
            let coach = setup_coach(&client, "Jiu-Jitsu", n_per_task).await;

            for j in 0..n_per_task {
                let bid = Ulid::new();
                let uid = Ulid::new();
                let date = bench_date(j);
                client
                    .batch_execute(&format!(
                        "INSERT INTO bookings (id, user_id, coach_id, date, time, class_type) VALUES \
                         ('{bid}', '{uid}', '{coach}', '{date}', '{TIME_WINDOW}', 'Jiu-Jitsu')"
                    ))
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(host: &str, port: u16) {
    // Writer tasks: continuously add bookings in the background
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let coach = setup_coach(&client, "Jiu-Jitsu", 2000).await;
            let mut i = 0usize;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let bid = Ulid::new();
                let uid = Ulid::new();
                let date = bench_date(i % 2000);
                let _ = client
                    .batch_execute(&format!(
                        "INSERT INTO bookings (id, user_id, coach_id, date, time, class_type) VALUES \
                         ('{bid}', '{uid}', '{coach}', '{date}', '{TIME_WINDOW}', 'Jiu-Jitsu')"
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    // Reader tasks: query the availability listing with the occupancy overlay
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let coach = setup_coach(&client, "Boxing", 200).await;
            // Fill half the slots so occupancy is non-trivial
            for i in (0..200).step_by(2) {
                let date = bench_date(i);
                client
                    .batch_execute(&format!(
                        "INSERT INTO bookings (id, user_id, coach_id, date, time, class_type) VALUES \
                         ('{}', '{}', '{coach}', '{date}', '{TIME_WINDOW}', 'Boxing')",
                        Ulid::new(),
                        Ulid::new()
                    ))
                    .await
                    .unwrap();
            }

            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "SELECT * FROM availability WHERE coach_id = '{coach}' AND occupancy = true"
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

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let coach = setup_coach(&client, "Jiu-Jitsu", ops_per_conn).await;

            for i in 0..ops_per_conn {
                let date = bench_date(i);
                client
                    .batch_execute(&format!(
                        "INSERT INTO bookings (id, user_id, coach_id, date, time, class_type) VALUES \
                         ('{}', '{}', '{coach}', '{date}', '{TIME_WINDOW}', 'Jiu-Jitsu')",
                        Ulid::new(),
                        Ulid::new()
                    ))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("TATAMI_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("TATAMI_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid TATAMI_PORT");

    println!("=== tatami stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own gym (unique dbname) to avoid interference

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
