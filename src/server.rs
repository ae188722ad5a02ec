use axum::{
    Json, Router,
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::entry::{AddOutcome, LibraryItem, Page, RemoveOutcome, ToggleOutcome};
use crate::error::LibraryError;
use crate::membership::LibraryMembership;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub membership: LibraryMembership,
}

pub fn create_router(membership: LibraryMembership) -> Router {
    let state = AppState { membership };

    Router::new()
        .route("/library", get(list_library))
        .route("/library/count", get(count_library))
        .route(
            "/library/:song_id",
            get(is_member)
                .post(toggle_song)
                .put(add_song)
                .delete(remove_song),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The calling user, taken from the `x-user-id` header
pub struct CurrentUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match user_id {
            Some(id) => Ok(CurrentUser(id.to_string())),
            None => {
                tracing::warn!("Request without {} header", USER_ID_HEADER);
                Err(error_response(
                    StatusCode::UNAUTHORIZED,
                    format!("Missing {} header", USER_ID_HEADER),
                ))
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

impl IntoResponse for LibraryError {
    fn into_response(self) -> Response {
        let status = match &self {
            LibraryError::Conflict => StatusCode::CONFLICT,
            LibraryError::NotFound(_) => StatusCode::NOT_FOUND,
            LibraryError::Storage(e) => {
                tracing::error!("Library storage error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct MembershipResponse {
    pub song_id: String,
    pub in_library: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Add the song if it isn't in the library, remove it if it is
async fn toggle_song(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(song_id): Path<String>,
) -> Result<Json<ToggleOutcome>, LibraryError> {
    tracing::debug!("Toggle song {} for user {}", song_id, user_id);
    let outcome = state.membership.toggle(&user_id, &song_id).await?;
    Ok(Json(outcome))
}

async fn add_song(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(song_id): Path<String>,
) -> Result<Json<AddOutcome>, LibraryError> {
    tracing::debug!("Add song {} for user {}", song_id, user_id);
    let outcome = state.membership.add(&user_id, &song_id).await?;
    Ok(Json(outcome))
}

async fn remove_song(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(song_id): Path<String>,
) -> Result<Json<RemoveOutcome>, LibraryError> {
    tracing::debug!("Remove song {} for user {}", song_id, user_id);
    let outcome = state.membership.remove(&user_id, &song_id).await?;
    Ok(Json(outcome))
}

async fn is_member(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(song_id): Path<String>,
) -> Result<Json<MembershipResponse>, LibraryError> {
    let in_library = state.membership.is_member(&user_id, &song_id).await?;
    tracing::debug!(
        "Song {} in library of user {}: {}",
        song_id,
        user_id,
        in_library
    );
    Ok(Json(MembershipResponse {
        song_id,
        in_library,
    }))
}

/// List the user's library, newest first
async fn list_library(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(page): Query<Page>,
) -> Result<Json<Vec<LibraryItem>>, LibraryError> {
    let items = state.membership.list_library(&user_id, page).await?;
    tracing::debug!("Returning {} library items for user {}", items.len(), user_id);
    Ok(Json(items))
}

async fn count_library(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<CountResponse>, LibraryError> {
    let count = state.membership.count(&user_id).await?;
    Ok(Json(CountResponse { count }))
}
