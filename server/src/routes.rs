use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tower_http::services::ServeDir;
use tracing::error;
use uuid::Uuid;

use crate::account::SubscriptionTier;
use crate::auth::AuthUser;
use crate::errors::AuthError;
use crate::state::AppState;

/// Build the application router binding the lifecycle engine to its HTTP
/// surface, plus static service of the published avatars.
pub fn routes(app_state: AppState) -> axum::Router {
    let avatar_dir = app_state.config.avatar_dir.clone();

    axum::Router::new()
        .route("/api/users/signup", post(signup))
        .route("/api/users/login", post(login))
        .route("/api/users/logout", get(logout))
        .route("/api/users/current", get(current))
        .route("/api/users/verify", post(resend_verification))
        .route("/api/users/verify/:verification_token", get(verify))
        .route("/api/users", patch(change_subscription))
        .route("/api/users/avatars", patch(update_avatar))
        .nest_service("/avatars", ServeDir::new(avatar_dir))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state)
}

#[derive(Debug, Deserialize)]
struct CredentialsBody {
    email: String,
    password: String,
}

/// Request-schema checks the engine delegates to the transport layer.
fn validate_credentials(body: &CredentialsBody) -> Result<(), AuthError> {
    if !body.email.contains('@') || body.email.len() < 3 {
        return Err(AuthError::Validation(
            "email must be a valid email address".to_string(),
        ));
    }
    if body.password.len() < 6 {
        return Err(AuthError::Validation(
            "password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

async fn signup(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<impl IntoResponse, AuthError> {
    validate_credentials(&body)?;
    let resp = state.engine.signup(&body.email, &body.password).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<impl IntoResponse, AuthError> {
    validate_credentials(&body)?;
    let resp = state.engine.login(&body.email, &body.password).await?;
    Ok(Json(resp))
}

async fn logout(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AuthError> {
    state.engine.logout(auth.account).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn current(auth: AuthUser, State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.current_user(&auth.account))
}

async fn verify(
    State(state): State<AppState>,
    Path(verification_token): Path<String>,
) -> Result<impl IntoResponse, AuthError> {
    state.engine.verify(&verification_token).await?;
    Ok(Json(json!({ "message": "Verification succeed" })))
}

#[derive(Debug, Deserialize)]
struct ResendBody {
    email: String,
}

async fn resend_verification(
    State(state): State<AppState>,
    Json(body): Json<ResendBody>,
) -> Result<impl IntoResponse, AuthError> {
    if body.email.is_empty() {
        return Err(AuthError::Validation(
            "missing required field email".to_string(),
        ));
    }

    state.engine.resend_verification(&body.email).await?;
    Ok(Json(json!({ "message": "Verification email sent" })))
}

#[derive(Debug, Deserialize)]
struct SubscriptionBody {
    subscription: String,
}

async fn change_subscription(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<SubscriptionBody>,
) -> Result<impl IntoResponse, AuthError> {
    let tier = body
        .subscription
        .parse::<SubscriptionTier>()
        .map_err(|err| AuthError::Validation(err.to_string()))?;

    let resp = state.engine.change_subscription(auth.account, tier).await?;
    Ok(Json(resp))
}

async fn update_avatar(
    auth: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AuthError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        AuthError::Validation(format!("malformed multipart body: {err}"))
    })? {
        if field.name() == Some("avatar") {
            upload = Some(field.bytes().await.map_err(|err| {
                AuthError::Validation(format!("failed to read avatar upload: {err}"))
            })?);
            break;
        }
    }
    let Some(upload) = upload else {
        return Err(AuthError::Validation(
            "missing required file field avatar".to_string(),
        ));
    };

    // Stage the upload on disk; the engine owns cleanup from here on.
    let tmp_path = state
        .config
        .tmp_upload_dir
        .join(format!("{}.upload", Uuid::new_v4()));
    if let Err(err) = tokio::fs::create_dir_all(&state.config.tmp_upload_dir).await {
        error!("Failed to create upload directory: {err}");
        return Err(AuthError::Persistence(
            "Failed to update user's avatar".to_string(),
        ));
    }
    if let Err(err) = tokio::fs::write(&tmp_path, &upload).await {
        error!("Failed to stage avatar upload: {err}");
        return Err(AuthError::Persistence(
            "Failed to update user's avatar".to_string(),
        ));
    }

    let resp = state.engine.update_avatar(auth.account, &tmp_path).await?;
    Ok(Json(resp))
}
