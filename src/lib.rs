/*!
# Hall Status Board

A single-tenant browser application for tracking machine status in
production halls, built in Rust.

## Overview

Each user belongs to one hall. After logging in they see their hall's
machine table (ID, Machine, Status, Date); admins can additionally add,
edit, and delete records and register new users. The whole application
state lives in a handful of plain files, so a deployment is just the
binary plus a data directory.

## Architecture

The application follows a classic form-post architecture:

### Web Layer
- **Technologies**: axum, tower-http
- **Key Components**:
  - Login page and dashboard rendered from HTML templates
  - Cookie-based session tokens mapped to usernames in memory
  - Admin gate in front of every mutating route

### Storage Layer
- `users.json` - usernames mapped to password, role, and hall
- `state.json` - last login time per user; a login is good for ten
  minutes, with no sliding extension
- `data_hall_<hall>.csv` - one table per hall, created empty on first
  access

All writes go through a temp-file-and-rename step so a crash never
leaves a half-written file behind.

Passwords are stored and compared in plain text. The tool is meant for a
trusted shop-floor network; do not expose it to anything wider.

## Modules

- **app**: Application state, routing, and the dashboard handlers
- **login**: Login flow, session resolution, and the admin gate
- **users**: Credential store backed by `users.json`
- **sessions**: Login-time tracking plus the in-memory token registry
- **records**: Per-hall machine tables and their CSV codec
- **saving**: Atomic file persistence helpers
- **error**: Shared error type for every fallible operation

## Endpoints

- `GET /` - Login page, or the dashboard when a live session exists
- `POST /login`, `POST /logout` - Session management
- `POST /records/add`, `/records/update`, `/records/delete` - Admin-only
  table edits
- `POST /users/add` - Admin-only user registration
- `GET /static/...` - Stylesheet and other assets
*/

pub mod app;
pub mod error;
pub mod login;
pub mod records;
pub mod saving;
pub mod sessions;
pub mod users;

pub use error::{AppError, Result};
