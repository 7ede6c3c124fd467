//! Application state, routing, and the dashboard handlers.

use std::path::Path;
use std::sync::Arc;

use axum::{
    Form, Router,
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::error::Result;
use crate::login::{self, AdminGate, SESSION_EXPIRED_MSG, SessionState, render_login_page};
use crate::records::{self, HallStore, MachineRecord, Status};
use crate::sessions::{SessionRegistry, SessionTracker};
use crate::users::{Role, UserInfo, UserMap, UserStore};

/// Address the server listens on.
pub const BIND_ADDR: &str = "127.0.0.1:3000";

/// Directory holding the user, session, and hall table files.
pub const DATA_DIR: &str = "data";

const ADMIN_START: &str = "<!--ADMIN-->";
const ADMIN_END: &str = "<!--/ADMIN-->";

/// Shared state behind every handler: the three file-backed stores plus the
/// in-memory token registry.
pub struct AppState {
    pub users: UserStore,
    pub sessions: SessionTracker,
    pub halls: HallStore,
    pub tokens: SessionRegistry,
}

impl AppState {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        AppState {
            users: UserStore::new(data_dir),
            sessions: SessionTracker::new(data_dir),
            halls: HallStore::new(data_dir),
            tokens: SessionRegistry::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HomeQuery {
    error: Option<String>,
    notice: Option<String>,
    expired: Option<String>,
    edit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordForm {
    id: String,
    machine: String,
    status: Status,
    date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddUserForm {
    username: String,
    password: String,
    role: Role,
    hall: String,
}

/// Start the server: seed the default admin, then serve until shutdown.
pub async fn run() -> Result<()> {
    let state = Arc::new(AppState::new(DATA_DIR));
    state.users.ensure_default_admin()?;

    let app = build_router(state);

    let listener = TcpListener::bind(BIND_ADDR).await?;
    info!("listening on http://{BIND_ADDR}");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the full route table over the given state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_home))
        .route("/login", post(login::handle_login))
        .route("/logout", post(login::handle_logout))
        .route("/records/add", post(handle_add_record))
        .route("/records/update", post(handle_update_record))
        .route("/records/delete", post(handle_delete_record))
        .route("/users/add", post(handle_add_user))
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[axum::debug_handler]
async fn serve_home(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HomeQuery>,
    jar: CookieJar,
) -> Result<Response> {
    let username = match login::resolve_session(&state.tokens, &state.sessions, &jar)? {
        SessionState::LoggedIn(username) => username,
        SessionState::Expired(_) => {
            return Ok(render_login_page(Some(SESSION_EXPIRED_MSG), None).into_response());
        }
        SessionState::LoggedOut => {
            let error = if query.expired.is_some() {
                Some(SESSION_EXPIRED_MSG)
            } else {
                query.error.as_deref()
            };
            return Ok(render_login_page(error, query.notice.as_deref()).into_response());
        }
    };

    let users = state.users.load()?;
    let Some(info) = users.get(&username) else {
        // Account removed while the session was live; no redirect, or a
        // still-valid cookie would loop forever.
        return Ok(render_login_page(None, None).into_response());
    };

    let table = state.halls.load_or_create(&info.hall)?;
    Ok(render_dashboard(&username, info, &users, &table, &query).into_response())
}

#[axum::debug_handler]
async fn handle_add_record(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<RecordForm>,
) -> Result<Response> {
    let (username, info) = match login::authorize_admin(&state, &jar)? {
        AdminGate::Granted { username, info } => (username, info),
        AdminGate::Denied(response) => return Ok(response),
    };

    let mut table = state.halls.load_or_create(&info.hall)?;
    records::add_record(
        &mut table,
        MachineRecord {
            id: form.id,
            machine: form.machine,
            status: form.status.to_string(),
            date: form.date,
        },
    );
    state.halls.persist(&info.hall, &table)?;

    info!(username = %username, hall = %info.hall, "record added");
    Ok(redirect_notice("Record added"))
}

#[axum::debug_handler]
async fn handle_update_record(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<RecordForm>,
) -> Result<Response> {
    let (username, info) = match login::authorize_admin(&state, &jar)? {
        AdminGate::Granted { username, info } => (username, info),
        AdminGate::Denied(response) => return Ok(response),
    };

    let mut table = state.halls.load_or_create(&info.hall)?;
    let updated = records::update_record(
        &mut table,
        &form.id,
        &form.machine,
        form.status.as_str(),
        form.date,
    );
    state.halls.persist(&info.hall, &table)?;

    info!(username = %username, hall = %info.hall, rows = updated, "record updated");
    Ok(redirect_notice("Record updated"))
}

#[axum::debug_handler]
async fn handle_delete_record(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<DeleteForm>,
) -> Result<Response> {
    let (username, info) = match login::authorize_admin(&state, &jar)? {
        AdminGate::Granted { username, info } => (username, info),
        AdminGate::Denied(response) => return Ok(response),
    };

    let mut table = state.halls.load_or_create(&info.hall)?;
    let removed = records::delete_record(&mut table, &form.id);
    state.halls.persist(&info.hall, &table)?;

    info!(username = %username, hall = %info.hall, rows = removed, "record deleted");
    Ok(redirect_notice("Record deleted"))
}

#[axum::debug_handler]
async fn handle_add_user(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<AddUserForm>,
) -> Result<Response> {
    let (username, _) = match login::authorize_admin(&state, &jar)? {
        AdminGate::Granted { username, info } => (username, info),
        AdminGate::Denied(response) => return Ok(response),
    };

    let created = state.users.add_user(
        &form.username,
        UserInfo {
            password: form.password,
            role: form.role,
            hall: form.hall,
        },
    )?;

    if created {
        info!(admin = %username, new_user = %form.username, "user added");
        Ok(redirect_notice("User added"))
    } else {
        info!(admin = %username, new_user = %form.username, "duplicate user rejected");
        Ok(redirect_error("User already exists"))
    }
}

fn redirect_notice(text: &str) -> Response {
    Redirect::to(&format!("/?notice={}", urlencoding::encode(text))).into_response()
}

fn redirect_error(text: &str) -> Response {
    Redirect::to(&format!("/?error={}", urlencoding::encode(text))).into_response()
}

fn render_dashboard(
    username: &str,
    info: &UserInfo,
    users: &UserMap,
    table: &[MachineRecord],
    query: &HomeQuery,
) -> Html<String> {
    let is_admin = info.role.is_admin();
    let mut page = include_str!("./static/dashboard.html").to_string();

    // Strip before filling so admin-only data never reaches the page.
    if !is_admin {
        page = strip_admin_sections(page);
    }

    let mut values = vec![
        (
            "MESSAGE",
            message_banner(query.error.as_deref(), query.notice.as_deref()),
        ),
        ("USERNAME", escape_html(username)),
        ("HALL", escape_html(&info.hall)),
        ("ROLE", info.role.to_string()),
        ("RECORD_ROWS", render_record_rows(table, is_admin)),
    ];

    if is_admin {
        let edit_target = query
            .edit
            .as_deref()
            .and_then(|id| table.iter().find(|row| row.id == id));
        let (edit_id, edit_machine, edit_status, edit_date) = match edit_target {
            Some(row) => (
                row.id.clone(),
                row.machine.clone(),
                row.status.clone(),
                row.date.format("%Y-%m-%d").to_string(),
            ),
            None => Default::default(),
        };

        values.push(("STATUS_OPTIONS", render_status_options("")));
        values.push((
            "TODAY",
            Local::now().date_naive().format("%Y-%m-%d").to_string(),
        ));
        values.push(("EDIT_ID", escape_html(&edit_id)));
        values.push(("EDIT_MACHINE", escape_html(&edit_machine)));
        values.push(("EDIT_DATE", edit_date));
        values.push(("EDIT_STATUS_OPTIONS", render_status_options(&edit_status)));
        values.push(("USER_ROWS", render_user_rows(users)));
    }

    Html(fill_placeholders(&page, &values))
}

// Fill every `{{NAME}}` token in one pass over the template. Substituted
// text is never rescanned, so record fields or query text containing token
// syntax come out as literal text. Tokens with no value are left in place.
fn fill_placeholders(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let Some(end) = rest.find("}}") else {
            break;
        };
        match values.iter().find(|(name, _)| *name == &rest[2..end]) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[..end + 2]),
        }
        rest = &rest[end + 2..];
    }

    out.push_str(rest);
    out
}

fn render_record_rows(table: &[MachineRecord], is_admin: bool) -> String {
    if table.is_empty() {
        let span = if is_admin { 5 } else { 4 };
        return format!("<tr><td colspan=\"{span}\" class=\"empty\">No records yet.</td></tr>\n");
    }

    let mut rows = String::new();
    for record in table {
        rows.push_str("<tr>");
        rows.push_str(&format!("<td>{}</td>", escape_html(&record.id)));
        rows.push_str(&format!("<td>{}</td>", escape_html(&record.machine)));
        rows.push_str(&format!("<td>{}</td>", escape_html(&record.status)));
        rows.push_str(&format!("<td>{}</td>", record.date.format("%Y-%m-%d")));
        if is_admin {
            rows.push_str(&format!(
                "<td class=\"actions\"><a href=\"/?edit={}\">Edit</a></td>",
                urlencoding::encode(&record.id)
            ));
        }
        rows.push_str("</tr>\n");
    }
    rows
}

fn render_status_options(selected: &str) -> String {
    let mut out = String::new();
    for status in Status::ALL {
        let mark = if status.as_str() == selected {
            " selected"
        } else {
            ""
        };
        out.push_str(&format!(
            "<option value=\"{0}\"{1}>{0}</option>\n",
            status, mark
        ));
    }
    out
}

fn render_user_rows(users: &UserMap) -> String {
    let mut rows = String::new();
    for (name, info) in users {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(name),
            info.role,
            escape_html(&info.hall)
        ));
    }
    rows
}

// Drop every block bracketed by the admin markers.
fn strip_admin_sections(mut page: String) -> String {
    while let (Some(start), Some(end)) = (page.find(ADMIN_START), page.find(ADMIN_END)) {
        if end < start {
            break;
        }
        page.replace_range(start..end + ADMIN_END.len(), "");
    }
    page
}

pub(crate) fn message_banner(error: Option<&str>, notice: Option<&str>) -> String {
    match (error, notice) {
        (Some(text), _) => format!(r#"<p class="message error">{}</p>"#, escape_html(text)),
        (None, Some(text)) => format!(r#"<p class="message notice">{}</p>"#, escape_html(text)),
        (None, None) => String::new(),
    }
}

pub(crate) fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
