//! Database statistics and coverage overview.
//!
//! Quick summary of what has been harvested: row counts, field coverage,
//! waterfront feature counts, and a per-city breakdown. Used by
//! `waterline stats` to sanity-check that runs are landing data.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_properties: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM properties")
        .fetch_one(&pool)
        .await?;

    let total_features: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM waterfront_features")
        .fetch_one(&pool)
        .await?;

    let with_price: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM properties WHERE price IS NOT NULL")
            .fetch_one(&pool)
            .await?;

    let with_description: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM properties WHERE raw_description IS NOT NULL")
            .fetch_one(&pool)
            .await?;

    let with_frontage: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM waterfront_features WHERE waterfront_length_ft IS NOT NULL",
    )
    .fetch_one(&pool)
    .await?;

    let with_dock: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM waterfront_features WHERE dock_length_ft IS NOT NULL",
    )
    .fetch_one(&pool)
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Waterline — Database Stats");
    println!("==========================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Properties:    {total_properties}");
    println!(
        "  With price:    {} ({}%)",
        with_price,
        percent(with_price, total_properties)
    );
    println!(
        "  With text:     {} ({}%)",
        with_description,
        percent(with_description, total_properties)
    );
    println!();
    println!(
        "  Waterfront:    {} ({}%)",
        total_features,
        percent(total_features, total_properties)
    );
    println!("  With frontage: {with_frontage}");
    println!("  With dock:     {with_dock}");

    let city_rows = sqlx::query(
        r#"
        SELECT
            COALESCE(p.city, '(unknown)') AS city,
            COUNT(*) AS property_count,
            COUNT(w.external_id) AS waterfront_count
        FROM properties p
        LEFT JOIN waterfront_features w ON w.external_id = p.external_id
        GROUP BY p.city
        ORDER BY property_count DESC
        LIMIT 15
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !city_rows.is_empty() {
        println!();
        println!("  By city:");
        println!("  {:<24} {:>10} {:>12}", "CITY", "PROPERTIES", "WATERFRONT");
        println!("  {}", "-".repeat(48));
        for row in &city_rows {
            let city: String = row.get("city");
            let property_count: i64 = row.get("property_count");
            let waterfront_count: i64 = row.get("waterfront_count");
            println!("  {city:<24} {property_count:>10} {waterfront_count:>12}");
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
