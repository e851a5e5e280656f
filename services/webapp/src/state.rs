//! Application state shared across request handlers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

/// Identity of this instance, surfaced in responses so the rotation is
/// observable from the outside.
#[derive(Debug, Clone, Serialize)]
pub struct PodInfo {
    pub pod_name: Option<String>,
    pub pod_ip: Option<String>,
}

impl PodInfo {
    /// Read identity from the downward-API environment.
    pub fn from_env() -> Self {
        Self {
            pod_name: std::env::var("HOSTNAME").ok(),
            pod_ip: std::env::var("POD_IP").ok(),
        }
    }
}

struct Session {
    user: String,
    expires_at: Instant,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    sessions: Mutex<HashMap<String, Session>>,
    session_ttl: Duration,
    upload_dir: PathBuf,
    download_dir: PathBuf,
    pod_info: PodInfo,
}

impl AppState {
    /// Create a new application state.
    pub fn new(upload_dir: PathBuf, download_dir: PathBuf, session_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                sessions: Mutex::new(HashMap::new()),
                session_ttl,
                upload_dir,
                download_dir,
                pod_info: PodInfo::from_env(),
            }),
        }
    }

    /// This instance's identity.
    pub fn pod_info(&self) -> &PodInfo {
        &self.inner.pod_info
    }

    /// Directory holding user uploads.
    pub fn upload_dir(&self) -> &PathBuf {
        &self.inner.upload_dir
    }

    /// Directory holding generated sample files.
    pub fn download_dir(&self) -> &PathBuf {
        &self.inner.download_dir
    }

    /// Look up the user for a session, expiring lazily.
    pub fn session_user(&self, session_id: &str) -> Option<String> {
        let mut sessions = self.inner.sessions.lock().unwrap();
        match sessions.get(session_id) {
            Some(session) if session.expires_at > Instant::now() => Some(session.user.clone()),
            Some(_) => {
                sessions.remove(session_id);
                None
            }
            None => None,
        }
    }

    /// Create or refresh a session for `user`, reusing `existing` as the
    /// session id when the client already has one.
    pub fn login(&self, user: &str, existing: Option<&str>) -> String {
        let session_id = existing
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let mut sessions = self.inner.sessions.lock().unwrap();
        sessions.insert(
            session_id.clone(),
            Session {
                user: user.to_string(),
                expires_at: Instant::now() + self.inner.session_ttl,
            },
        );
        session_id
    }
}
