use crate::api::AppState;
use crate::auth::AuthUser;
use crate::bookings::MessageResponse;
use crate::error::ApiError;
use crate::models::{NewStudio, NewUser, Studio, StudioChangeset, User, UserSummary};
use crate::schema::{studios, users};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{can_perform, Action, PaymentChannel, Role};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct StudioView {
    #[serde(flatten)]
    pub studio: Studio,
    pub owner: Option<UserSummary>,
}

/// GET /studios — public listing with owner contact joined in.
pub async fn list_studios(
    State(state): State<AppState>,
) -> Result<Json<Vec<StudioView>>, ApiError> {
    let mut conn = state.pool.get().await?;
    let rows: Vec<Studio> = studios::table.load(&mut conn).await?;

    let owner_ids: Vec<Uuid> = rows.iter().map(|s| s.owner_id).collect();
    let owners: HashMap<Uuid, User> = users::table
        .filter(users::id.eq_any(&owner_ids))
        .load::<User>(&mut conn)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    Ok(Json(
        rows.into_iter()
            .map(|studio| {
                let owner = owners.get(&studio.owner_id).map(UserSummary::from);
                StudioView { studio, owner }
            })
            .collect(),
    ))
}

/// GET /studios/:id — public.
pub async fn get_studio(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StudioView>, ApiError> {
    let mut conn = state.pool.get().await?;
    let studio: Studio = studios::table
        .find(id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Studio not found".to_string()))?;
    let owner: Option<User> = users::table
        .find(studio.owner_id)
        .first(&mut conn)
        .await
        .optional()?;

    Ok(Json(StudioView {
        studio,
        owner: owner.as_ref().map(UserSummary::from),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateStudioRequest {
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<i32>,
    pub price_per_hour: BigDecimal,
    pub amenities: Option<Value>,
    pub payment_type: Option<String>,
    pub paybill_number: Option<String>,
    pub till_number: Option<String>,
    pub owner_id: Option<Uuid>,
}

/// POST /studios — studio managers and admins; an admin may create on
/// behalf of another owner.
pub async fn create_studio(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateStudioRequest>,
) -> Result<(StatusCode, Json<Studio>), ApiError> {
    if !can_perform(user.role, Action::CreateStudio) {
        return Err(ApiError::Forbidden("Forbidden: Access denied".to_string()));
    }

    let payment_type = match req.payment_type {
        Some(raw) => PaymentChannel::from_str(&raw)
            .map_err(|_| ApiError::Validation(format!("Unknown payment type: {raw}")))?,
        None => PaymentChannel::Till,
    };
    let owner_id = match (user.role, req.owner_id) {
        (Role::Admin, Some(owner_id)) => owner_id,
        _ => user.id,
    };

    let new_studio = NewStudio {
        id: Uuid::new_v4(),
        owner_id,
        name: req.name,
        description: req.description,
        location: req.location,
        capacity: req.capacity,
        price_per_hour: req.price_per_hour,
        amenities: req.amenities,
        payment_type: payment_type.as_str().to_string(),
        paybill_number: req.paybill_number,
        till_number: req.till_number,
    };

    let mut conn = state.pool.get().await?;
    let studio: Studio = diesel::insert_into(studios::table)
        .values(&new_studio)
        .get_result(&mut conn)
        .await?;

    info!(studio_id = %studio.id, owner_id = %owner_id, "studio created");
    Ok((StatusCode::CREATED, Json(studio)))
}

async fn load_owned_studio(
    state: &AppState,
    id: Uuid,
    user: &AuthUser,
) -> Result<Studio, ApiError> {
    let mut conn = state.pool.get().await?;
    let studio: Studio = studios::table
        .find(id)
        .first(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Studio not found".to_string()))?;
    if user.role != Role::Admin && studio.owner_id != user.id {
        return Err(ApiError::Forbidden(
            "Forbidden: Not your studio".to_string(),
        ));
    }
    Ok(studio)
}

/// PUT /studios/:id — owner or admin; absent fields stay untouched.
pub async fn update_studio(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
    Json(changes): Json<StudioChangeset>,
) -> Result<Json<Studio>, ApiError> {
    load_owned_studio(&state, id, &user).await?;

    if let Some(raw) = changes.payment_type.as_deref() {
        PaymentChannel::from_str(raw)
            .map_err(|_| ApiError::Validation(format!("Unknown payment type: {raw}")))?;
    }

    let mut conn = state.pool.get().await?;
    let updated: Studio = diesel::update(studios::table.find(id))
        .set(&changes)
        .get_result(&mut conn)
        .await?;

    info!(studio_id = %id, "studio updated");
    Ok(Json(updated))
}

/// DELETE /studios/:id — owner or admin.
pub async fn delete_studio(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    user: AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    load_owned_studio(&state, id, &user).await?;

    let mut conn = state.pool.get().await?;
    diesel::delete(studios::table.find(id))
        .execute(&mut conn)
        .await?;

    info!(studio_id = %id, "studio deleted");
    Ok(Json(MessageResponse {
        message: "Studio deleted successfully".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateManagerRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub studio_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreateManagerResponse {
    pub message: String,
    pub user: User,
}

/// POST /studios/manager — admin creates a studio_manager account and may
/// hand an existing studio over to them.
pub async fn create_manager(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateManagerRequest>,
) -> Result<(StatusCode, Json<CreateManagerResponse>), ApiError> {
    if !can_perform(user.role, Action::CreateManager) {
        return Err(ApiError::Forbidden(
            "Only admins can create studio managers".to_string(),
        ));
    }
    let (Some(full_name), Some(email), Some(password)) =
        (req.full_name, req.email, req.password)
    else {
        return Err(ApiError::Validation(
            "Full name, email, and password are required".to_string(),
        ));
    };

    let mut conn = state.pool.get().await?;

    let existing: Option<User> = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .await
        .optional()?;
    if existing.is_some() {
        return Err(ApiError::Conflict("Email already exists".to_string()));
    }

    if let Some(studio_id) = req.studio_id {
        let studio: Option<Studio> = studios::table
            .find(studio_id)
            .first(&mut conn)
            .await
            .optional()?;
        if studio.is_none() {
            return Err(ApiError::NotFound("Studio not found".to_string()));
        }
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email,
        phone: req.phone,
        full_name: Some(full_name),
        password_hash: state.auth.hash_password(&password),
        role: Role::StudioManager.as_str().to_string(),
    };
    let manager: User = diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(&mut conn)
        .await?;

    if let Some(studio_id) = req.studio_id {
        diesel::update(studios::table.find(studio_id))
            .set(studios::owner_id.eq(manager.id))
            .execute(&mut conn)
            .await?;
    }

    info!(manager_id = %manager.id, "studio manager created");
    Ok((
        StatusCode::CREATED,
        Json(CreateManagerResponse {
            message: "Studio manager created successfully".to_string(),
            user: manager,
        }),
    ))
}
