use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::StockError;

const USERS_FILE: &str = "users.json";
const EVENT_CAPACITY: usize = 64;

/// Registered account.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Lower-cased email address; also the map key in `users.json`
    pub email: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    pub created_at: DateTime<Utc>,
}

/// Credentials posted by the sign-in form.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    pub email: String,
    pub password: String,
}

/// Who is signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub email: String,
}

/// An authenticated browser session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub identity: Identity,
    pub expires_at: SystemTime,
}

/// Identity transitions, published to everyone who called [`Accounts::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityChange {
    SignedIn { session_id: String, identity: Identity },
    SignedOut { session_id: String, identity: Identity },
    Expired { session_id: String, identity: Identity },
}

impl IdentityChange {
    pub fn session_id(&self) -> &str {
        match self {
            IdentityChange::SignedIn { session_id, .. }
            | IdentityChange::SignedOut { session_id, .. }
            | IdentityChange::Expired { session_id, .. } => session_id,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            IdentityChange::SignedIn { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

/// Account registry and session table.
///
/// Accounts live in `<data_dir>/users.json`; sessions are in memory only and
/// vanish on restart.
pub struct Accounts {
    users_file: PathBuf,
    session_duration: Duration,
    sessions: RwLock<HashMap<String, Session>>,
    events: broadcast::Sender<IdentityChange>,
}

impl Accounts {
    /// Open the account registry under `data_dir`, creating the users file if needed.
    pub fn open(data_dir: impl AsRef<Path>, session_duration: Duration) -> Result<Self, StockError> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            create_dir_all(data_dir)?;
        }

        let users_file = data_dir.join(USERS_FILE);
        if !users_file.exists() {
            let mut file = File::create(&users_file)?;
            file.write_all(b"{}")?;
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Accounts {
            users_file,
            session_duration,
            sessions: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// All registered users keyed by email.
    pub fn get_users(&self) -> Result<HashMap<String, User>, StockError> {
        let mut contents = String::new();
        File::open(&self.users_file)?.read_to_string(&mut contents)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save_users(&self, users: &HashMap<String, User>) -> Result<(), StockError> {
        let json = serde_json::to_string_pretty(users)?;
        fs::write(&self.users_file, json)?;
        Ok(())
    }

    /// Register a new account.
    ///
    /// # Errors
    /// * `StockError::AccountExists` if the email is already registered
    /// * `StockError::InvalidCredentials` if email or password is empty
    pub fn register_user(&self, email: &str, password: &str) -> Result<(), StockError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(StockError::InvalidCredentials);
        }

        let mut users = self.get_users()?;
        if users.contains_key(&email) {
            return Err(StockError::AccountExists(email));
        }

        let user = User {
            email: email.clone(),
            password_hash: hash_password(password)?,
            created_at: Utc::now(),
        };
        users.insert(email.clone(), user);
        self.save_users(&users)?;

        log::info!("registered account {}", email);
        Ok(())
    }

    /// Check credentials and open a session.
    pub fn sign_in(&self, email: &str, password: &str) -> Result<Session, StockError> {
        self.expire_sessions();
        let email = normalize_email(email);
        let users = self.get_users()?;

        let verified = match users.get(&email) {
            Some(user) => verify_password(password, &user.password_hash)?,
            None => false,
        };
        if !verified {
            log::warn!("failed sign-in for {}", email);
            return Err(StockError::InvalidCredentials);
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            identity: Identity { email },
            expires_at: SystemTime::now() + self.session_duration,
        };
        self.sessions_mut().insert(session.id.clone(), session.clone());

        log::info!("{} signed in", session.identity.email);
        self.publish(IdentityChange::SignedIn {
            session_id: session.id.clone(),
            identity: session.identity.clone(),
        });
        Ok(session)
    }

    /// End a session. Returns the identity that was signed in, if any.
    pub fn sign_out(&self, session_id: &str) -> Option<Identity> {
        let session = self.sessions_mut().remove(session_id)?;
        log::info!("{} signed out", session.identity.email);
        self.publish(IdentityChange::SignedOut {
            session_id: session.id,
            identity: session.identity.clone(),
        });
        Some(session.identity)
    }

    /// Identity behind a live session; expired sessions are dropped.
    pub fn validate_session(&self, session_id: &str) -> Option<Identity> {
        let expired = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            match sessions.get(session_id) {
                Some(session) if session.expires_at > SystemTime::now() => {
                    return Some(session.identity.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            if let Some(session) = self.sessions_mut().remove(session_id) {
                self.publish_expired(session);
            }
        }
        None
    }

    /// Drop every session past its expiry and announce each one.
    ///
    /// Returns how many sessions were dropped.
    pub fn expire_sessions(&self) -> usize {
        let now = SystemTime::now();
        let expired: Vec<Session> = {
            let mut sessions = self.sessions_mut();
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.expires_at <= now)
                .map(|s| s.id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        let count = expired.len();
        for session in expired {
            self.publish_expired(session);
        }
        count
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stream of sign-in, sign-out and expiry events.
    pub fn subscribe(&self) -> broadcast::Receiver<IdentityChange> {
        self.events.subscribe()
    }

    fn sessions_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    fn publish_expired(&self, session: Session) {
        log::info!("session for {} expired", session.identity.email);
        self.publish(IdentityChange::Expired {
            session_id: session.id,
            identity: session.identity,
        });
    }

    fn publish(&self, change: IdentityChange) {
        // No subscribers is fine.
        let _ = self.events.send(change);
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(password: &str) -> Result<String, StockError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| StockError::Storage(format!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, StockError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| StockError::Storage("invalid password hash format".to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
