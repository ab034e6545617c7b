//! SQLite upsert layer with merge-never-nulls semantics.
//!
//! Both tables use `INSERT .. ON CONFLICT DO UPDATE SET col =
//! COALESCE(excluded.col, table.col)`: a new value replaces the stored
//! one, but an absent value never erases what an earlier run extracted.
//! The upsert is atomic, so concurrent duplicate keys are absorbed at the
//! storage level regardless of arrival order.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::dedup::KeyIndex;
use crate::models::{FeatureRecord, PropertyRecord, UpsertOutcome};

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist one property and its optional waterfront features.
    ///
    /// Inserted-vs-Updated is decided by the key index, not the SQL: the
    /// task whose `add` returns true inserted the row, everyone else
    /// merged into it.
    pub async fn upsert(
        &self,
        record: &PropertyRecord,
        features: Option<&FeatureRecord>,
        index: &KeyIndex,
    ) -> Result<UpsertOutcome> {
        let external_id = record
            .external_id
            .as_deref()
            .context("record has no external id")?;

        let now = Utc::now().timestamp();
        self.upsert_property(external_id, record, now).await?;

        if let Some(features) = features {
            self.upsert_features(external_id, features, now).await?;
        }

        if index.add(external_id).await {
            Ok(UpsertOutcome::Inserted)
        } else {
            Ok(UpsertOutcome::Updated)
        }
    }

    async fn upsert_property(
        &self,
        external_id: &str,
        record: &PropertyRecord,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO properties (
                external_id, source_url, address, city, state, zip_code,
                latitude, longitude, price, estimated_value, monthly_fee,
                price_history, bedrooms, bathrooms, living_area_sqft,
                lot_area_value, lot_area_units, year_built, property_subtype,
                status, days_listed, view_count, favorite_count,
                raw_description, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                source_url = COALESCE(excluded.source_url, properties.source_url),
                address = COALESCE(excluded.address, properties.address),
                city = COALESCE(excluded.city, properties.city),
                state = COALESCE(excluded.state, properties.state),
                zip_code = COALESCE(excluded.zip_code, properties.zip_code),
                latitude = COALESCE(excluded.latitude, properties.latitude),
                longitude = COALESCE(excluded.longitude, properties.longitude),
                price = COALESCE(excluded.price, properties.price),
                estimated_value = COALESCE(excluded.estimated_value, properties.estimated_value),
                monthly_fee = COALESCE(excluded.monthly_fee, properties.monthly_fee),
                price_history = COALESCE(excluded.price_history, properties.price_history),
                bedrooms = COALESCE(excluded.bedrooms, properties.bedrooms),
                bathrooms = COALESCE(excluded.bathrooms, properties.bathrooms),
                living_area_sqft = COALESCE(excluded.living_area_sqft, properties.living_area_sqft),
                lot_area_value = COALESCE(excluded.lot_area_value, properties.lot_area_value),
                lot_area_units = COALESCE(excluded.lot_area_units, properties.lot_area_units),
                year_built = COALESCE(excluded.year_built, properties.year_built),
                property_subtype = COALESCE(excluded.property_subtype, properties.property_subtype),
                status = COALESCE(excluded.status, properties.status),
                days_listed = COALESCE(excluded.days_listed, properties.days_listed),
                view_count = COALESCE(excluded.view_count, properties.view_count),
                favorite_count = COALESCE(excluded.favorite_count, properties.favorite_count),
                raw_description = COALESCE(excluded.raw_description, properties.raw_description),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(external_id)
        .bind(&record.source_url)
        .bind(&record.address)
        .bind(&record.city)
        .bind(&record.state)
        .bind(&record.zip_code)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.price)
        .bind(record.estimated_value)
        .bind(record.monthly_fee)
        .bind(&record.price_history)
        .bind(record.bedrooms)
        .bind(record.bathrooms)
        .bind(record.living_area_sqft)
        .bind(record.lot_area_value)
        .bind(&record.lot_area_units)
        .bind(record.year_built)
        .bind(&record.property_subtype)
        .bind(&record.status)
        .bind(record.days_listed)
        .bind(record.view_count)
        .bind(record.favorite_count)
        .bind(&record.raw_description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert property {external_id}"))?;
        Ok(())
    }

    async fn upsert_features(
        &self,
        external_id: &str,
        features: &FeatureRecord,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO waterfront_features (
                external_id, waterfront_length_ft, dock_length_ft,
                seawall_length_ft, any_length_ft, slip_count,
                max_vessel_length_ft, lift_capacity_lbs, depth_ft,
                bridge_clearance_ft, canal_width_ft, has_dock, has_lift,
                has_ramp, no_fixed_bridges, water_type, analysis_confidence,
                analysis_notes, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                waterfront_length_ft = COALESCE(excluded.waterfront_length_ft, waterfront_features.waterfront_length_ft),
                dock_length_ft = COALESCE(excluded.dock_length_ft, waterfront_features.dock_length_ft),
                seawall_length_ft = COALESCE(excluded.seawall_length_ft, waterfront_features.seawall_length_ft),
                any_length_ft = COALESCE(excluded.any_length_ft, waterfront_features.any_length_ft),
                slip_count = COALESCE(excluded.slip_count, waterfront_features.slip_count),
                max_vessel_length_ft = COALESCE(excluded.max_vessel_length_ft, waterfront_features.max_vessel_length_ft),
                lift_capacity_lbs = COALESCE(excluded.lift_capacity_lbs, waterfront_features.lift_capacity_lbs),
                depth_ft = COALESCE(excluded.depth_ft, waterfront_features.depth_ft),
                bridge_clearance_ft = COALESCE(excluded.bridge_clearance_ft, waterfront_features.bridge_clearance_ft),
                canal_width_ft = COALESCE(excluded.canal_width_ft, waterfront_features.canal_width_ft),
                has_dock = MAX(excluded.has_dock, waterfront_features.has_dock),
                has_lift = MAX(excluded.has_lift, waterfront_features.has_lift),
                has_ramp = MAX(excluded.has_ramp, waterfront_features.has_ramp),
                no_fixed_bridges = COALESCE(excluded.no_fixed_bridges, waterfront_features.no_fixed_bridges),
                water_type = COALESCE(excluded.water_type, waterfront_features.water_type),
                analysis_confidence = MAX(excluded.analysis_confidence, waterfront_features.analysis_confidence),
                analysis_notes = excluded.analysis_notes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(external_id)
        .bind(features.waterfront_length_ft)
        .bind(features.dock_length_ft)
        .bind(features.seawall_length_ft)
        .bind(features.any_length_ft)
        .bind(features.slip_count)
        .bind(features.max_vessel_length_ft)
        .bind(features.lift_capacity_lbs)
        .bind(features.depth_ft)
        .bind(features.bridge_clearance_ft)
        .bind(features.canal_width_ft)
        .bind(features.has_dock)
        .bind(features.has_lift)
        .bind(features.has_ramp)
        .bind(features.no_fixed_bridges)
        .bind(&features.water_type)
        .bind(features.analysis_confidence)
        .bind(&features.analysis_notes)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert features for {external_id}"))?;
        Ok(())
    }
}
