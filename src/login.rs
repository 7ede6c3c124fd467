//! Login flow and session resolution.
//!
//! A successful login records the wall-clock login time in the session file
//! and hands the browser an opaque token cookie. On every later request the
//! token is mapped back to a username and the recorded login time decides
//! whether the session is still live. Validity comes from the file alone;
//! the token itself never expires.

use std::sync::Arc;

use axum::{
    Form,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use tracing::info;
use urlencoding;

use crate::app::{AppState, message_banner};
use crate::error::Result;
use crate::sessions::{SessionRegistry, SessionTracker};
use crate::users::UserInfo;

/// Name of the browser cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Message shown when a login window has lapsed.
pub const SESSION_EXPIRED_MSG: &str = "Session expired, please log in again.";

/// Message shown on a failed credential check.
pub const BAD_CREDENTIALS_MSG: &str = "Incorrect username or password.";

/// Login form data submitted from the login page.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Outcome of resolving a request's session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No usable token was presented.
    LoggedOut,
    /// The token maps to this user, but their login window has lapsed.
    Expired(String),
    /// The token maps to this user and their login is still fresh.
    LoggedIn(String),
}

/// Map a request's cookie to a session state.
///
/// The token only identifies the user; whether the session is live is
/// decided entirely by the recorded login time. A token whose window has
/// lapsed is dropped from the registry here, so the same stale cookie
/// resolves to `LoggedOut` on the next request.
///
/// # Arguments
/// * `registry` - Token-to-username map for this process
/// * `tracker` - On-disk login times
/// * `jar` - Cookie jar from the incoming request
pub fn resolve_session(
    registry: &SessionRegistry,
    tracker: &SessionTracker,
    jar: &CookieJar,
) -> Result<SessionState> {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Ok(SessionState::LoggedOut);
    };

    let Some(username) = registry.resolve(cookie.value()) else {
        return Ok(SessionState::LoggedOut);
    };

    if tracker.is_valid(&username)? {
        Ok(SessionState::LoggedIn(username))
    } else {
        registry.remove(cookie.value());
        Ok(SessionState::Expired(username))
    }
}

/// Result of an admin check: either the caller's identity or the response
/// to send instead.
pub enum AdminGate {
    Granted { username: String, info: UserInfo },
    Denied(Response),
}

/// Require a live session belonging to an admin.
///
/// Non-admin users get a 403; lapsed sessions bounce back to the login page
/// with an expiry notice; everyone else goes to the plain login page.
pub fn authorize_admin(state: &AppState, jar: &CookieJar) -> Result<AdminGate> {
    match resolve_session(&state.tokens, &state.sessions, jar)? {
        SessionState::LoggedIn(username) => {
            let users = state.users.load()?;
            match users.get(&username) {
                Some(info) if info.role.is_admin() => Ok(AdminGate::Granted {
                    username,
                    info: info.clone(),
                }),
                Some(_) => Ok(AdminGate::Denied(
                    (StatusCode::FORBIDDEN, "Admin access required").into_response(),
                )),
                // Account deleted while the session was live.
                None => Ok(AdminGate::Denied(Redirect::to("/").into_response())),
            }
        }
        SessionState::Expired(_) => Ok(AdminGate::Denied(
            Redirect::to("/?expired=1").into_response(),
        )),
        SessionState::LoggedOut => Ok(AdminGate::Denied(Redirect::to("/").into_response())),
    }
}

/// Render the login page with an optional error or notice banner.
pub fn render_login_page(error: Option<&str>, notice: Option<&str>) -> Html<String> {
    let template = include_str!("./static/login.html");
    Html(template.replace("{{MESSAGE}}", &message_banner(error, notice)))
}

/// Handle login form submissions
///
/// Checks the submitted credentials, records the login time, and hands the
/// browser a fresh session token on success.
///
/// # Arguments
/// * `state` - Shared application state
/// * `jar` - Cookie jar for storing the session cookie
/// * `form` - Form data containing the username and password
///
/// # Returns
/// * `Result<Response>` - Redirect to the dashboard if successful, or back
///   to the login page with an error if not
#[axum::debug_handler]
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    if state.users.authenticate(&form.username, &form.password)? {
        state.sessions.touch(&form.username)?;
        let token = state.tokens.create(&form.username);
        info!(username = %form.username, "login succeeded");

        let cookie = Cookie::new(SESSION_COOKIE, token);
        Ok((jar.add(cookie), Redirect::to("/")).into_response())
    } else {
        info!(username = %form.username, "login rejected");
        let target = format!("/?error={}", urlencoding::encode(BAD_CREDENTIALS_MSG));
        Ok(Redirect::to(&target).into_response())
    }
}

/// Handle user logout
///
/// Forgets the session token and clears the cookie, then redirects to the
/// login page.
///
/// # Arguments
/// * `state` - Shared application state
/// * `jar` - Cookie jar containing the session cookie
#[axum::debug_handler]
pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.tokens.remove(cookie.value());
    }

    // Overwrite with a blank value so the browser stops sending the token.
    let cookie = Cookie::new(SESSION_COOKIE, "");
    (jar.add(cookie), Redirect::to("/"))
}
