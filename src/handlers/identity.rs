use crate::{error::ApiError, models::UserProfile, services::LibraryService};
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use std::future::{ready, Ready};

pub const USER_ID_HEADER: &str = "X-User-Id";

/// The registered user named by the `X-User-Id` header.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserProfile);

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.0.id
    }
}

fn resolve(req: &HttpRequest) -> Result<UserProfile, ApiError> {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::AuthenticationError(format!("Missing {} header", USER_ID_HEADER))
        })?;

    let library = req
        .app_data::<web::Data<LibraryService>>()
        .ok_or_else(|| ApiError::InternalError("Library service not configured".to_string()))?;

    library.get_user(user_id).map_err(|e| match e {
        ApiError::NotFound(_) => ApiError::AuthenticationError(format!("Unknown user {}", user_id)),
        other => other,
    })
}

impl FromRequest for CurrentUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(resolve(req).map(CurrentUser))
    }
}

/// A [`CurrentUser`] whose stored role is admin.
#[derive(Debug, Clone)]
pub struct AdminUser(pub UserProfile);

impl FromRequest for AdminUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = resolve(req).and_then(|user| {
            let library = req
                .app_data::<web::Data<LibraryService>>()
                .ok_or_else(|| {
                    ApiError::InternalError("Library service not configured".to_string())
                })?;
            library.require_admin(&user.id).map(AdminUser)
        });
        ready(result)
    }
}
