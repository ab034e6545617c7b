use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. All statements are idempotent so `init` can be run
/// against an existing database.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Properties table, keyed by the source-assigned listing id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS properties (
            external_id TEXT PRIMARY KEY,
            source_url TEXT,
            address TEXT,
            city TEXT,
            state TEXT,
            zip_code TEXT,
            latitude REAL,
            longitude REAL,
            price INTEGER,
            estimated_value INTEGER,
            monthly_fee INTEGER,
            price_history TEXT,
            bedrooms REAL,
            bathrooms REAL,
            living_area_sqft INTEGER,
            lot_area_value REAL,
            lot_area_units TEXT,
            year_built INTEGER,
            property_subtype TEXT,
            status TEXT,
            days_listed INTEGER,
            view_count INTEGER,
            favorite_count INTEGER,
            raw_description TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Waterfront features, 1:1 with properties
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS waterfront_features (
            external_id TEXT PRIMARY KEY,
            waterfront_length_ft INTEGER,
            dock_length_ft INTEGER,
            seawall_length_ft INTEGER,
            any_length_ft INTEGER,
            slip_count INTEGER,
            max_vessel_length_ft INTEGER,
            lift_capacity_lbs INTEGER,
            depth_ft INTEGER,
            bridge_clearance_ft INTEGER,
            canal_width_ft INTEGER,
            has_dock INTEGER NOT NULL DEFAULT 0,
            has_lift INTEGER NOT NULL DEFAULT 0,
            has_ramp INTEGER NOT NULL DEFAULT 0,
            no_fixed_bridges INTEGER,
            water_type TEXT,
            analysis_confidence REAL NOT NULL,
            analysis_notes TEXT NOT NULL DEFAULT '',
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (external_id) REFERENCES properties(external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_properties_city ON properties(city)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_properties_updated_at ON properties(updated_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_features_waterfront_length ON waterfront_features(waterfront_length_ft)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
