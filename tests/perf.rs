//! Load test against a running native server.
//!
//! `cargo run`, then `cargo test --features perf --test perf -- --ignored`.
#![cfg(feature = "perf")]

use serde_json::json;
use std::time::Instant;

const BASE_URL: &str = "http://127.0.0.1:5000";
const NUM_USERS: usize = 50;
const POSTS_PER_USER: usize = 4;
const FOLLOWS_PER_USER: usize = 10;
const FEED_PAGES: i64 = 3;

async fn register_and_login(client: &reqwest::Client, username: &str, password: &str) -> Option<(String, String)> {
    let resp = client
        .post(format!("{}/users", BASE_URL))
        .json(&json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": password
        }))
        .send()
        .await
        .ok()?;
    if resp.status() != 201 {
        return None;
    }
    let user = resp.json::<serde_json::Value>().await.ok()?;

    let resp = client
        .post(format!("{}/tokens", BASE_URL))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .ok()?;
    let token = resp.json::<serde_json::Value>().await.ok()?;

    Some((user["id"].as_str()?.to_string(), token["token"].as_str()?.to_string()))
}

#[ignore]
#[tokio::test(flavor = "multi_thread")]
async fn perf_test_followed_feeds() {
    let client = reqwest::Client::new();
    let start = Instant::now();

    println!("\n=== Performance Test ===");
    println!("Creating {} users with {} posts each...", NUM_USERS, POSTS_PER_USER);

    let run_id = uuid::Uuid::new_v4().to_string()[0..8].to_string();
    let mut users = Vec::new();

    let user_creation_start = Instant::now();
    for i in 0..NUM_USERS {
        let username = format!("perf_{}_{}", run_id, i);
        if let Some((id, token)) = register_and_login(&client, &username, "password123").await {
            users.push((id, username, token));
        }
    }
    let user_creation_time = user_creation_start.elapsed();
    println!(
        "User creation done: {} users in {:.2}s",
        users.len(),
        user_creation_time.as_secs_f64()
    );

    let mut posts_created = 0;
    let mut requests_failed = 0;
    let post_creation_start = Instant::now();
    for (idx, (_, _, token)) in users.iter().enumerate() {
        for post_num in 0..POSTS_PER_USER {
            let resp = client
                .post(format!("{}/posts", BASE_URL))
                .header("Authorization", format!("Bearer {}", token))
                .json(&json!({ "body": format!("Post {} from user {}", post_num + 1, idx) }))
                .send()
                .await;
            match resp {
                Ok(r) if r.status() == 201 => posts_created += 1,
                _ => requests_failed += 1,
            }
        }
    }
    let post_creation_time = post_creation_start.elapsed();

    let mut follows = 0;
    for (idx, (_, _, token)) in users.iter().enumerate() {
        for offset in 1..=FOLLOWS_PER_USER.min(users.len().saturating_sub(1)) {
            let (_, target, _) = &users[(idx + offset) % users.len()];
            let resp = client
                .post(format!("{}/follow/{}", BASE_URL, target))
                .header("Authorization", format!("Bearer {}", token))
                .send()
                .await;
            match resp {
                Ok(r) if r.status() == 200 => follows += 1,
                _ => requests_failed += 1,
            }
        }
    }

    let feed_start = Instant::now();
    let mut feed_reads = 0;
    for (_, _, token) in &users {
        for page in 1..=FEED_PAGES {
            let resp = client
                .get(format!("{}/index?page={}", BASE_URL, page))
                .header("Authorization", format!("Bearer {}", token))
                .send()
                .await;
            match resp {
                Ok(r) if r.status() == 200 => feed_reads += 1,
                _ => requests_failed += 1,
            }
        }
    }
    let feed_time = feed_start.elapsed();

    let total_time = start.elapsed();
    println!("\n=== Results ===");
    println!("Total time: {:.2}s", total_time.as_secs_f64());
    println!("Post creation: {} posts in {:.2}s", posts_created, post_creation_time.as_secs_f64());
    println!("Follows: {}", follows);
    println!(
        "Feed reads: {} in {:.2}s ({:.2}ms avg)",
        feed_reads,
        feed_time.as_secs_f64(),
        feed_time.as_secs_f64() * 1000.0 / feed_reads.max(1) as f64
    );
    println!("Failed requests: {}", requests_failed);

    assert_eq!(requests_failed, 0);
}
