use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{
    Booking, BookingSlot, NewBooking, NewBookingSlot, NewPayment, Payment, Studio, User,
    UserSummary,
};
use crate::schema::{booking_slots, bookings, payments, studios, users};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::{
    booking_window, can_perform, find_self_conflict, total_amount, total_duration_minutes,
    validate_slots, Action, BookingStatus, PaymentStatus, Role, SlotError, SlotInput,
    DEFAULT_CURRENCY,
};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

/// Studio fields echoed inside a booking so clients can render and pay
/// without a second fetch.
#[derive(Debug, Clone, Serialize)]
pub struct StudioSummary {
    pub id: Uuid,
    pub name: String,
    pub location: Option<String>,
    pub owner_id: Uuid,
    pub payment_type: String,
    pub paybill_number: Option<String>,
    pub till_number: Option<String>,
}

impl From<&Studio> for StudioSummary {
    fn from(studio: &Studio) -> Self {
        Self {
            id: studio.id,
            name: studio.name.clone(),
            location: studio.location.clone(),
            owner_id: studio.owner_id,
            payment_type: studio.payment_type.clone(),
            paybill_number: studio.paybill_number.clone(),
            till_number: studio.till_number.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub artist: Option<UserSummary>,
    pub studio: Option<StudioSummary>,
    pub payment: Option<Payment>,
    pub booking_slots: Vec<BookingSlot>,
}

/// Joins artists, studios, payments and slots onto a page of bookings with
/// one batched query per relation.
async fn load_views(
    conn: &mut AsyncPgConnection,
    rows: Vec<Booking>,
) -> Result<Vec<BookingView>, ApiError> {
    let booking_ids: Vec<Uuid> = rows.iter().map(|b| b.id).collect();
    let artist_ids: Vec<Uuid> = rows.iter().map(|b| b.artist_id).collect();
    let studio_ids: Vec<Uuid> = rows.iter().map(|b| b.studio_id).collect();

    let artists: HashMap<Uuid, User> = users::table
        .filter(users::id.eq_any(&artist_ids))
        .load::<User>(conn)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();
    let studio_rows: HashMap<Uuid, Studio> = studios::table
        .filter(studios::id.eq_any(&studio_ids))
        .load::<Studio>(conn)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();
    let payment_rows: HashMap<Uuid, Payment> = payments::table
        .filter(payments::booking_id.eq_any(booking_ids.iter().map(|id| Some(*id)).collect::<Vec<_>>()))
        .load::<Payment>(conn)
        .await?
        .into_iter()
        .filter_map(|p| p.booking_id.map(|bid| (bid, p)))
        .collect();
    let mut slot_rows: HashMap<Uuid, Vec<BookingSlot>> = HashMap::new();
    for slot in booking_slots::table
        .filter(booking_slots::booking_id.eq_any(&booking_ids))
        .order(booking_slots::start_time.asc())
        .load::<BookingSlot>(conn)
        .await?
    {
        slot_rows.entry(slot.booking_id).or_default().push(slot);
    }

    Ok(rows
        .into_iter()
        .map(|booking| {
            let artist = artists.get(&booking.artist_id).map(UserSummary::from);
            let studio = studio_rows.get(&booking.studio_id).map(StudioSummary::from);
            let payment = payment_rows.get(&booking.id).cloned();
            let slots = slot_rows.remove(&booking.id).unwrap_or_default();
            BookingView {
                booking,
                artist,
                studio,
                payment,
                booking_slots: slots,
            }
        })
        .collect())
}

/// GET /bookings — role-scoped listing, most recent start time first.
pub async fn list_bookings(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<BookingView>>, ApiError> {
    let mut conn = state.pool.get().await?;

    let rows: Vec<Booking> = match user.role {
        Role::Admin => {
            bookings::table
                .order(bookings::start_time.desc())
                .load(&mut conn)
                .await?
        }
        Role::Artist => {
            bookings::table
                .filter(bookings::artist_id.eq(user.id))
                .order(bookings::start_time.desc())
                .load(&mut conn)
                .await?
        }
        Role::StudioManager => {
            let owned: Vec<Uuid> = studios::table
                .filter(studios::owner_id.eq(user.id))
                .select(studios::id)
                .load(&mut conn)
                .await?;
            bookings::table
                .filter(bookings::studio_id.eq_any(owned))
                .order(bookings::start_time.desc())
                .load(&mut conn)
                .await?
        }
    };

    let views = load_views(&mut conn, rows).await?;
    Ok(Json(views))
}

/// GET /bookings/:id
pub async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> Result<Json<BookingView>, ApiError> {
    let mut conn = state.pool.get().await?;

    let booking: Booking = bookings::table
        .find(id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Booking not found".to_string()))?;
    let studio: Option<Studio> = studios::table
        .find(booking.studio_id)
        .first(&mut conn)
        .await
        .optional()?;

    let allowed = match user.role {
        Role::Admin => true,
        Role::Artist => booking.artist_id == user.id,
        Role::StudioManager => studio
            .as_ref()
            .map(|s| s.owner_id == user.id)
            .unwrap_or(false),
    };
    if !allowed {
        return Err(ApiError::Forbidden(
            "Forbidden: You don't have access".to_string(),
        ));
    }

    let mut views = load_views(&mut conn, vec![booking]).await?;
    let view = views
        .pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("booking view vanished")))?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub studio_id: Uuid,
    #[serde(default)]
    pub slots: Vec<SlotInput>,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateBookingResponse {
    pub message: String,
    pub booking: Booking,
    pub booking_slots: Vec<BookingSlot>,
    pub payment: Payment,
}

fn slot_error(err: SlotError) -> ApiError {
    ApiError::Validation(err.to_string())
}

/// POST /bookings — validate slots, detect conflicts, price, and persist
/// booking + slots + pending payment as one transaction. The studio row is
/// locked FOR UPDATE so concurrent overlapping requests serialize and the
/// conflict re-check inside the transaction sees committed state.
pub async fn create_booking(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<CreateBookingResponse>), ApiError> {
    if !can_perform(user.role, Action::CreateBooking) {
        return Err(ApiError::Forbidden(
            "Forbidden: Only artists can create bookings".to_string(),
        ));
    }

    let validated = validate_slots(&req.slots).map_err(slot_error)?;
    if let Some((start, end)) = find_self_conflict(&validated) {
        return Err(ApiError::SlotConflict { start, end });
    }
    let currency = req
        .currency
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    let artist_id = user.id;
    let studio_id = req.studio_id;
    let booking_id = Uuid::new_v4();

    let mut conn = state.pool.get().await?;
    let (booking, slots, payment) = conn
        .transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                let studio: Studio = studios::table
                    .find(studio_id)
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| ApiError::NotFound("Studio not found".to_string()))?;

                for slot in &validated {
                    let existing: Option<BookingSlot> = booking_slots::table
                        .inner_join(bookings::table)
                        .filter(bookings::studio_id.eq(studio_id))
                        .filter(booking_slots::start_time.lt(slot.end))
                        .filter(booking_slots::end_time.gt(slot.start))
                        .select(booking_slots::all_columns)
                        .first(conn)
                        .await
                        .optional()?;
                    if let Some(conflict) = existing {
                        return Err(ApiError::SlotConflict {
                            start: conflict.start_time,
                            end: conflict.end_time,
                        });
                    }
                }

                let amount = total_amount(&studio.price_per_hour, &validated);
                let (start_time, end_time) = booking_window(&validated)
                    .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("empty validated slots")))?;

                let new_booking = NewBooking {
                    id: booking_id,
                    artist_id,
                    studio_id,
                    start_time,
                    end_time,
                    duration_minutes: total_duration_minutes(&validated),
                    amount: amount.clone(),
                    currency: currency.clone(),
                    status: BookingStatus::Pending.as_str().to_string(),
                };
                let booking: Booking = diesel::insert_into(bookings::table)
                    .values(&new_booking)
                    .get_result(conn)
                    .await?;

                let slot_rows: Vec<NewBookingSlot> = validated
                    .iter()
                    .map(|s| NewBookingSlot {
                        id: Uuid::new_v4(),
                        booking_id,
                        start_time: s.start,
                        end_time: s.end,
                    })
                    .collect();
                let slots: Vec<BookingSlot> = diesel::insert_into(booking_slots::table)
                    .values(&slot_rows)
                    .get_results(conn)
                    .await?;

                let new_payment = NewPayment {
                    id: Uuid::new_v4(),
                    booking_id: Some(booking_id),
                    provider: "MPESA".to_string(),
                    amount,
                    currency: currency.clone(),
                    status: PaymentStatus::Pending.as_str().to_string(),
                };
                let payment: Payment = diesel::insert_into(payments::table)
                    .values(&new_payment)
                    .get_result(conn)
                    .await?;

                Ok((booking, slots, payment))
            })
        })
        .await?;

    info!(booking_id = %booking.id, studio_id = %studio_id, "booking created");
    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            message: "Booking created successfully".to_string(),
            booking,
            booking_slots: slots,
            payment,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// PATCH /bookings/:id/status — admin or the owning studio's manager.
/// Terminal bookings reject further transitions.
pub async fn update_booking_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<BookingView>, ApiError> {
    let target = BookingStatus::from_str(&req.status)
        .map_err(|_| ApiError::Validation("Invalid status".to_string()))?;
    if !can_perform(user.role, Action::UpdateBookingStatus) {
        return Err(ApiError::Forbidden("Forbidden: Access denied".to_string()));
    }

    let mut conn = state.pool.get().await?;
    let booking: Booking = bookings::table
        .find(id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Booking not found".to_string()))?;

    if user.role == Role::StudioManager {
        let studio: Studio = studios::table
            .find(booking.studio_id)
            .first(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| ApiError::NotFound("Studio not found".to_string()))?;
        if studio.owner_id != user.id {
            return Err(ApiError::Forbidden(
                "Forbidden: Cannot update this booking".to_string(),
            ));
        }
    }

    let current = BookingStatus::from_str(&booking.status).map_err(|_| {
        ApiError::Internal(anyhow::anyhow!(
            "booking {} carries unrecognized status {}",
            booking.id,
            booking.status
        ))
    })?;
    if current.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Booking is {current} and cannot change status"
        )));
    }

    let updated: Booking = diesel::update(bookings::table.find(id))
        .set((
            bookings::status.eq(target.as_str()),
            bookings::updated_at.eq(Some(Utc::now())),
        ))
        .get_result(&mut conn)
        .await?;

    info!(booking_id = %id, from = %current, to = %target, "booking status updated");
    let mut views = load_views(&mut conn, vec![updated]).await?;
    let view = views
        .pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("booking view vanished")))?;
    Ok(Json(view))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// DELETE /bookings/:id — admin only; slots and payment go with it via
/// the cascading foreign keys.
pub async fn delete_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    if !can_perform(user.role, Action::DeleteBooking) {
        return Err(ApiError::Forbidden("Forbidden".to_string()));
    }

    let mut conn = state.pool.get().await?;
    let deleted = diesel::delete(bookings::table.find(id))
        .execute(&mut conn)
        .await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("Booking not found".to_string()));
    }

    info!(booking_id = %id, "booking deleted");
    Ok(Json(MessageResponse {
        message: "Booking deleted successfully".to_string(),
    }))
}
