use msg_protocol::{tags, Envelope, ErrorKind};

use crate::auth as authcore;
use crate::error::AuthError;
use crate::storage::{self, users};

use super::{error_response_with_message, fail, now_iso8601, required_str, HandlerCtx, HandlerOutcome, HandlerResult};

pub async fn register(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let username = required_str(envelope, "username").map_err(fail)?;
    let password = required_str(envelope, "password").map_err(fail)?;
    let email = required_str(envelope, "email").map_err(fail)?;
    let public_key = super::optional_str(envelope, "public_key");

    let auth_result = try_register(ctx, username, password, email, public_key).await;
    Ok(match auth_result {
        Ok(user_id) => {
            let mut extra = serde_json::Map::new();
            extra.insert("user_id".to_owned(), serde_json::json!(user_id));
            extra.insert("username".to_owned(), serde_json::json!(username));
            HandlerOutcome::just(Envelope::response(tags::REGISTER, true, None, extra, now_iso8601()))
        }
        Err(err) => {
            // §4.C/§8.2: a duplicate username must come back with the literal
            // text `username exists`, not the generic `conflict` kind code.
            HandlerOutcome::just(error_response_with_message(tags::REGISTER, ErrorKind::from(&err), err.to_string()))
        }
    })
}

async fn try_register(
    ctx: &HandlerCtx<'_>,
    username: &str,
    password: &str,
    email: &str,
    public_key: Option<&str>,
) -> Result<i64, AuthError> {
    authcore::validate_username(username, ctx.config.max_username_len)?;
    authcore::validate_password(password, ctx.config.min_password_len)?;
    authcore::validate_public_key(public_key)?;

    if users::get_user_by_username(ctx.pool, username).await.is_ok() {
        return Err(AuthError::UsernameTaken);
    }

    let (password_hash, salt) = authcore::hash_password(password)?;
    let user = users::create_user(ctx.pool, username, email, &password_hash, &salt, public_key).await?;
    Ok(user.user_id)
}

pub async fn login(ctx: &HandlerCtx<'_>, envelope: &Envelope) -> HandlerResult {
    let username = required_str(envelope, "username").map_err(fail)?;
    let password = required_str(envelope, "password").map_err(fail)?;

    match try_login(ctx, username, password).await {
        Ok((user_id, token, public_key)) => {
            ctx.directory
                .authenticate_connection(ctx.connection_id, user_id, username)
                .await
                .map_err(|_| fail(ErrorKind::Quota))?;
            // Stashed so `logout` can invalidate the matching `sessions` row
            // (§3: "invalidated at logout or expiry").
            *ctx.conn.session_token.write().await = Some(token.clone());
            let _ = users::update_online_status(ctx.pool, user_id, true).await;
            let _ = storage::sessions::create_session(ctx.pool, &token, user_id).await;

            let mut extra = serde_json::Map::new();
            extra.insert("user_id".to_owned(), serde_json::json!(user_id));
            extra.insert("username".to_owned(), serde_json::json!(username));
            extra.insert("session_token".to_owned(), serde_json::json!(token));
            extra.insert("public_key".to_owned(), serde_json::json!(public_key.unwrap_or_default()));
            Ok(HandlerOutcome::just(Envelope::response(tags::LOGIN, true, None, extra, now_iso8601())))
        }
        Err(err) => Ok(HandlerOutcome::just(error_response_with_message(tags::LOGIN, ErrorKind::from(&err), err.to_string()))),
    }
}

async fn try_login(ctx: &HandlerCtx<'_>, username: &str, password: &str) -> Result<(i64, String, Option<String>), AuthError> {
    let user = users::get_user_by_username(ctx.pool, username)
        .await
        .map_err(|_| AuthError::BadCredentials)?;
    if !authcore::verify_password(password, &user.password_hash) {
        return Err(AuthError::BadCredentials);
    }
    let token = authcore::issue_token(user.user_id, &user.username, &ctx.config.server_secret);
    Ok((user.user_id, token, user.public_key))
}

pub async fn logout(ctx: &HandlerCtx<'_>, _envelope: &Envelope) -> HandlerResult {
    let user_id = ctx.require_auth().map_err(fail)?;
    let _ = users::update_online_status(ctx.pool, user_id, false).await;
    if let Some(token) = ctx.conn.session_token.read().await.clone() {
        let _ = storage::sessions::invalidate_session(ctx.pool, &token).await;
    }
    Ok(HandlerOutcome::just(Envelope::response(
        tags::LOGOUT,
        true,
        None,
        serde_json::Map::new(),
        now_iso8601(),
    )))
}
