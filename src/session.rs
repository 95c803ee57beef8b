// Contract between the pipeline and the remote image server.
//
// The pipeline only ever talks to these traits. `api.rs` provides the
// OMERO.web implementation; tests provide in-memory ones.

use crate::error::{ImportError, Result};
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// Login details collected from the user. All three are non-empty.
#[derive(Clone)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Validate prompt answers. A missing or blank answer is an input error
    /// naming the first field that was left empty.
    pub fn new(
        host: Option<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let host = require("Host", host)?;
        let username = require("Username", username)?;
        // Passwords are taken verbatim, only emptiness is rejected.
        let password = match password {
            Some(p) if !p.is_empty() => p,
            _ => return Err(ImportError::MissingField("Password")),
        };
        Ok(Credentials {
            host,
            username,
            password,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

fn require(field: &'static str, value: Option<String>) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ImportError::MissingField(field)),
    }
}

/// An access group the logged-in user belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

/// Rectangle region as submitted to the server. It is never bound to a
/// plane, so it shows on every Z layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rectangle {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub label: String,
}

impl Rectangle {
    /// Rectangle spanning all Z layers, labelled `Rectangle {segment_id}`.
    pub fn all_layers(x: i64, y: i64, width: i64, height: i64, segment_id: &str) -> Self {
        Rectangle {
            x,
            y,
            width,
            height,
            label: format!("Rectangle {}", segment_id),
        }
    }
}

/// Opens authenticated sessions.
pub trait Connector {
    type Session: RemoteSession;

    /// Authenticate against `credentials.host`. Fails with
    /// `ImportError::Connection` when the handshake does not succeed.
    fn open_session(&self, credentials: &Credentials) -> Result<Self::Session>;
}

/// An authenticated, group-scoped connection.
pub trait RemoteSession {
    /// Groups the current identity is a member of, in server order.
    fn list_groups(&self) -> Result<Vec<Group>>;

    /// Group currently scoping the session, if known.
    fn active_group(&self) -> Option<i64>;

    /// Switch the session's group context. Switching to the already active
    /// group is a no-op.
    fn set_active_group(&mut self, group_id: i64) -> Result<()>;

    /// Attach one rectangle region to `image_id`.
    fn submit_rectangle(&self, image_id: i64, rect: &Rectangle) -> Result<()>;

    /// Release the session. Implementations log their own failures.
    fn close(&mut self);
}

/// Owns an open session and closes it exactly once: either through
/// `close()` or when dropped on an early return or panic.
pub struct SessionGuard<S: RemoteSession> {
    session: Option<S>,
}

impl<S: RemoteSession> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        SessionGuard {
            session: Some(session),
        }
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("closing session");
            session.close();
        }
    }
}

impl<S: RemoteSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        // Only `release` empties the option, and it consumes or drops the guard.
        self.session.as_ref().expect("session already released")
    }
}

impl<S: RemoteSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        self.session.as_mut().expect("session already released")
    }
}

impl<S: RemoteSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}
