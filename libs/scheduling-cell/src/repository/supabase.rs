// libs/scheduling-cell/src/repository/supabase.rs
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{DatabaseError, SupabaseClient};

use crate::models::{AvailabilityWindow, Booking, SlotRef, TimeSlot};
use crate::repository::{RepositoryError, SchedulingRepository};

const WINDOWS_TABLE: &str = "/rest/v1/availability_windows";
const SLOTS_TABLE: &str = "/rest/v1/slot_instances";
const BOOKINGS_TABLE: &str = "/rest/v1/bookings";

/// PostgREST-backed repository. Conditional writes are expressed as filtered
/// PATCH/DELETE requests (`version=eq.N`); an empty representation means the
/// filter matched nothing and the write lost its race.
pub struct SupabaseRepository {
    supabase: SupabaseClient,
    auth_token: Option<String>,
}

fn slot_filter(slot_ref: &SlotRef) -> String {
    format!(
        "window_id=eq.{}&occurrence_date=eq.{}&slot_index=eq.{}",
        slot_ref.window_id, slot_ref.occurrence_date, slot_ref.slot_index
    )
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, RepositoryError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(RepositoryError::from))
        .collect()
}

impl SupabaseRepository {
    pub fn new(config: &AppConfig, auth_token: Option<String>) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            auth_token,
        }
    }

    async fn select(&self, path: &str) -> Result<Vec<Value>, RepositoryError> {
        let rows: Vec<Value> = self.supabase.request(
            Method::GET,
            path,
            self.auth_token.as_deref(),
            None,
        ).await?;
        Ok(rows)
    }

    async fn write(&self, method: Method, path: &str, body: Option<Value>) -> Result<Vec<Value>, RepositoryError> {
        let rows: Vec<Value> = self.supabase.request_with_headers(
            method,
            path,
            self.auth_token.as_deref(),
            body,
            Some(SupabaseClient::representation_headers()),
        ).await?;
        Ok(rows)
    }

    async fn select_one<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, RepositoryError> {
        let mut rows: Vec<T> = decode_rows(self.select(path).await?)?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    /// Inserts a row; a unique violation is reported as `Ok(false)`.
    async fn insert_row(&self, table: &str, row: Value) -> Result<bool, RepositoryError> {
        match self.write(Method::POST, table, Some(row)).await {
            Ok(rows) => Ok(!rows.is_empty()),
            Err(RepositoryError::Database(DatabaseError::Conflict(msg))) => {
                debug!("Insert into {} rejected as duplicate: {}", table, msg);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SchedulingRepository for SupabaseRepository {
    async fn insert_window(&self, window: &AvailabilityWindow) -> Result<(), RepositoryError> {
        if !self.insert_row(WINDOWS_TABLE, serde_json::to_value(window)?).await? {
            return Err(RepositoryError::Duplicate(format!("window {}", window.id)));
        }
        Ok(())
    }

    async fn get_window(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, RepositoryError> {
        self.select_one(&format!("{}?id=eq.{}", WINDOWS_TABLE, window_id)).await
    }

    async fn list_windows(&self, provider_id: Uuid) -> Result<Vec<AvailabilityWindow>, RepositoryError> {
        let path = format!(
            "{}?provider_id=eq.{}&order=anchor_date.asc,created_at.asc",
            WINDOWS_TABLE, provider_id
        );
        decode_rows(self.select(&path).await?)
    }

    async fn replace_window(
        &self,
        window: &AvailabilityWindow,
        expected_version: u64,
    ) -> Result<bool, RepositoryError> {
        let path = format!("{}?id=eq.{}&version=eq.{}", WINDOWS_TABLE, window.id, expected_version);
        let rows = self.write(Method::PATCH, &path, Some(serde_json::to_value(window)?)).await?;
        Ok(!rows.is_empty())
    }

    async fn delete_window(&self, window_id: Uuid, expected_version: u64) -> Result<bool, RepositoryError> {
        let path = format!("{}?id=eq.{}&version=eq.{}", WINDOWS_TABLE, window_id, expected_version);
        let rows = self.write(Method::DELETE, &path, None).await?;
        Ok(!rows.is_empty())
    }

    async fn get_slot(&self, slot_ref: &SlotRef) -> Result<Option<TimeSlot>, RepositoryError> {
        self.select_one(&format!("{}?{}", SLOTS_TABLE, slot_filter(slot_ref))).await
    }

    async fn list_slots_for_window(&self, window_id: Uuid) -> Result<Vec<TimeSlot>, RepositoryError> {
        let path = format!(
            "{}?window_id=eq.{}&order=occurrence_date.asc,slot_index.asc",
            SLOTS_TABLE, window_id
        );
        decode_rows(self.select(&path).await?)
    }

    async fn compare_and_swap_slot(
        &self,
        slot: &TimeSlot,
        expected_version: u64,
    ) -> Result<bool, RepositoryError> {
        if expected_version == 0 {
            return self.insert_row(SLOTS_TABLE, serde_json::to_value(slot)?).await;
        }

        let path = format!("{}?{}&version=eq.{}", SLOTS_TABLE, slot_filter(&slot.slot_ref), expected_version);
        let body = json!({
            "start": slot.start,
            "end": slot.end,
            "booking_ref": slot.booking_ref,
            "version": slot.version,
        });
        let rows = self.write(Method::PATCH, &path, Some(body)).await?;
        Ok(!rows.is_empty())
    }

    async fn remove_slot(&self, slot_ref: &SlotRef, expected_version: u64) -> Result<bool, RepositoryError> {
        let path = format!("{}?{}&version=eq.{}", SLOTS_TABLE, slot_filter(slot_ref), expected_version);
        let rows = self.write(Method::DELETE, &path, None).await?;
        Ok(!rows.is_empty())
    }

    async fn remove_free_slots(&self, window_id: Uuid) -> Result<usize, RepositoryError> {
        let path = format!("{}?window_id=eq.{}&booking_ref=is.null", SLOTS_TABLE, window_id);
        Ok(self.write(Method::DELETE, &path, None).await?.len())
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), RepositoryError> {
        if !self.insert_row(BOOKINGS_TABLE, serde_json::to_value(booking)?).await? {
            return Err(RepositoryError::Duplicate(format!("booking {}", booking.id)));
        }
        Ok(())
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, RepositoryError> {
        self.select_one(&format!("{}?id=eq.{}", BOOKINGS_TABLE, booking_id)).await
    }

    async fn replace_booking(
        &self,
        booking: &Booking,
        expected_version: u64,
    ) -> Result<bool, RepositoryError> {
        let path = format!("{}?id=eq.{}&version=eq.{}", BOOKINGS_TABLE, booking.id, expected_version);
        let rows = self.write(Method::PATCH, &path, Some(serde_json::to_value(booking)?)).await?;
        Ok(!rows.is_empty())
    }

    async fn list_bookings_for_window(&self, window_id: Uuid) -> Result<Vec<Booking>, RepositoryError> {
        let path = format!("{}?window_id=eq.{}&order=created_at.asc", BOOKINGS_TABLE, window_id);
        decode_rows(self.select(&path).await?)
    }

    async fn list_bookings_for_holder(&self, holder_id: Uuid) -> Result<Vec<Booking>, RepositoryError> {
        let path = format!("{}?holder_id=eq.{}&order=created_at.asc", BOOKINGS_TABLE, holder_id);
        decode_rows(self.select(&path).await?)
    }
}
