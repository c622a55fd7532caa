use model::entities::{user, UserRole};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::{debug, instrument};

use crate::clock::Clock;
use crate::error::{ComputeError, Result};

/// Registration data. The password is hashed by the caller.
#[derive(Clone)]
pub struct NewUser {
    pub email: String,
    pub hashed_password: String,
    pub full_name: String,
    pub role: UserRole,
    pub apartment_number: Option<String>,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("role", &self.role)
            .field("apartment_number", &self.apartment_number)
            .finish_non_exhaustive()
    }
}

#[instrument(skip(db, clock))]
pub async fn register_user<C: ConnectionTrait>(
    db: &C,
    clock: &dyn Clock,
    new: NewUser,
) -> Result<user::Model> {
    let apartment_number = new
        .apartment_number
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());

    if new.role == UserRole::Resident && apartment_number.is_none() {
        return Err(ComputeError::Validation(
            "Apartment number is required for residents".to_string(),
        ));
    }

    if find_user_by_email(db, &new.email).await?.is_some() {
        return Err(ComputeError::Conflict("Email already registered".to_string()));
    }

    let user = user::ActiveModel {
        email: Set(new.email),
        hashed_password: Set(new.hashed_password),
        full_name: Set(new.full_name),
        role: Set(new.role),
        apartment_number: Set(apartment_number),
        is_active: Set(true),
        created_at: Set(clock.now()),
        updated_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| match e.sql_err() {
        // Lost a race against a concurrent registration
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => {
            ComputeError::Conflict("Email already registered".to_string())
        }
        _ => ComputeError::Database(e),
    })?;

    debug!("Registered user {} as {}", user.id, user.role);
    Ok(user)
}

pub async fn find_user_by_email<C: ConnectionTrait>(db: &C, email: &str) -> Result<Option<user::Model>> {
    Ok(user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(db)
        .await?)
}

/// Loads the user behind an authenticated request. Deactivated accounts are
/// refused.
#[instrument(skip(db))]
pub async fn find_active_user<C: ConnectionTrait>(db: &C, id: i32) -> Result<user::Model> {
    let user = user::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| ComputeError::not_found(format!("User {}", id)))?;

    if !user.is_active {
        return Err(ComputeError::Forbidden("Inactive user".to_string()));
    }
    Ok(user)
}
