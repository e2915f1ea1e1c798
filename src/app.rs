use std::collections::HashMap;
use std::error::Error;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path as AxumPath, State},
    http::header,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, patch, post, put},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::downloader::ExportFile;
use crate::error::StockError;
use crate::guard::{Action, TaskGuard};
use crate::login::{Accounts, Identity, IdentityChange, UserCredentials};
use crate::row::RowPatch;
use crate::saving::{DocumentStore, FileStore};
use crate::workspace::{LoadOutcome, Workspace};

const SESSION_COOKIE: &str = "session";
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared server state: the account registry, the document store, and one
/// guarded workspace per signed-in session.
pub struct AppState {
    accounts: Accounts,
    store: Arc<dyn DocumentStore>,
    workspaces: RwLock<HashMap<String, TaskGuard<Workspace>>>,
    max_upload_bytes: usize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(accounts: Accounts, store: Arc<dyn DocumentStore>, max_upload_bytes: usize) -> Self {
        AppState {
            accounts,
            store,
            workspaces: RwLock::new(HashMap::new()),
            max_upload_bytes,
        }
    }

    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn workspace(&self, session_id: &str, identity: Identity) -> TaskGuard<Workspace> {
        let mut workspaces = self.workspaces.write().unwrap_or_else(|e| e.into_inner());
        workspaces
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let mut workspace = Workspace::new(Arc::clone(&self.store));
                workspace.attach_identity(identity);
                TaskGuard::new(workspace)
            })
            .clone()
    }

    fn insert_workspace(&self, session_id: &str, workspace: TaskGuard<Workspace>) {
        self.workspaces
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), workspace);
    }

    fn remove_workspace(&self, session_id: &str) -> Option<TaskGuard<Workspace>> {
        self.workspaces
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
    }
}

/// The caller's session, resolved from the `session` cookie.
struct CurrentSession {
    id: String,
    identity: Identity,
    workspace: TaskGuard<Workspace>,
}

fn current_session(state: &AppState, jar: &CookieJar) -> Result<CurrentSession, StockError> {
    let id = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(StockError::NotSignedIn)?;
    let identity = state
        .accounts
        .validate_session(&id)
        .ok_or(StockError::NotSignedIn)?;
    let workspace = state.workspace(&id, identity.clone());
    Ok(CurrentSession {
        id,
        identity,
        workspace,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AsAtDateUpdate {
    as_at_date: String,
}

pub fn router(state: SharedState, static_dir: impl AsRef<Path>) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    Router::new()
        .route("/", get(serve_index))
        .route("/api/login", post(handle_login))
        .route("/api/logout", post(handle_logout))
        .route("/api/table", get(get_table))
        .route("/api/import", post(import_file))
        .route("/api/rows/:index", patch(edit_row))
        .route("/api/as-at-date", put(set_as_at_date))
        .route("/api/save", post(save_table))
        .route("/api/load", post(load_table))
        .route("/api/document", delete(delete_table))
        .route("/api/export", get(export_xlsx))
        .route("/api/export.csv", get(export_csv))
        .nest_service("/static", ServeDir::new(static_dir.as_ref()))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Start the web server and block until it stops.
pub async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let store: Arc<dyn DocumentStore> = Arc::new(FileStore::open(&config.data_dir)?);
    let accounts = Accounts::open(&config.data_dir, config.session_duration())?;
    let state = Arc::new(AppState::new(accounts, store, config.max_upload_bytes()));

    tokio::spawn(drop_workspaces_on_sign_out(
        Arc::clone(&state),
        state.accounts.subscribe(),
    ));
    tokio::spawn(expire_sessions_every(Arc::clone(&state), SESSION_SWEEP_INTERVAL));

    let app = router(state, &config.static_dir);
    let listener = TcpListener::bind(&config.listen).await?;
    log::info!("Listening on http://{}", config.listen);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Clear a session's table as soon as its identity goes away.
///
/// Takes the receiver rather than subscribing itself, so no event sent
/// between spawning and the first poll is missed.
pub async fn drop_workspaces_on_sign_out(
    state: SharedState,
    mut events: broadcast::Receiver<IdentityChange>,
) {
    loop {
        match events.recv().await {
            Ok(IdentityChange::SignedIn { .. }) => {}
            Ok(change) => {
                if let Some(workspace) = state.remove_workspace(change.session_id()) {
                    // A busy workspace is already unreachable and goes away with its last action.
                    if let Ok(mut ws) = workspace.try_begin(Action::SignOut).await {
                        ws.detach_identity();
                    }
                    log::debug!("dropped workspace for session {}", change.session_id());
                }
            }
            Err(RecvError::Lagged(missed)) => {
                log::warn!("identity listener missed {} events", missed);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Expire sessions whose browsers never came back, on a fixed period.
pub async fn expire_sessions_every(state: SharedState, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let expired = state.accounts.expire_sessions();
        if expired > 0 {
            log::info!("expired {} idle sessions", expired);
        }
    }
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

async fn handle_login(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(credentials): Json<UserCredentials>,
) -> Result<Response, StockError> {
    let mut workspace = Workspace::new(Arc::clone(&state.store));
    let session = workspace.sign_in(&state.accounts, &credentials.email, &credentials.password)?;

    // Signed in regardless of whether the saved table can be read.
    let load_message = match workspace.load() {
        Ok(LoadOutcome::Loaded { rows, .. }) => format!("Loaded {} saved rows", rows),
        Ok(LoadOutcome::NothingSaved) => "No saved table yet".to_string(),
        Err(e) => e.to_string(),
    };
    let table = workspace.snapshot();
    let totals = workspace.totals();
    state.insert_workspace(&session.id, TaskGuard::new(workspace));

    let cookie = Cookie::build((SESSION_COOKIE, session.id))
        .path("/")
        .http_only(true);
    let body = json!({
        "status": "ok",
        "email": session.identity.email,
        "message": load_message,
        "table": table,
        "totals": totals,
    });
    Ok((jar.add(cookie), Json(body)).into_response())
}

async fn handle_logout(State(state): State<SharedState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let session_id = cookie.value().to_string();
        match state.remove_workspace(&session_id) {
            Some(workspace) => match workspace.try_begin(Action::SignOut).await {
                Ok(mut ws) => ws.sign_out(&state.accounts, &session_id),
                // The in-flight action finishes against a workspace nobody can reach any more.
                Err(_) => {
                    state.accounts.sign_out(&session_id);
                }
            },
            None => {
                state.accounts.sign_out(&session_id);
            }
        }
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Json(json!({ "status": "ok" }))).into_response()
}

async fn get_table(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, StockError> {
    let session = current_session(&state, &jar)?;
    let ws = session.workspace.read().await;
    let in_flight = session.workspace.in_flight();
    Ok(Json(json!({
        "email": session.identity.email,
        "busy": in_flight,
        "table": ws.snapshot(),
        "totals": ws.totals(),
    })))
}

async fn import_file(
    State(state): State<SharedState>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, StockError> {
    let session = current_session(&state, &jar)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| StockError::Import(e.to_string()))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("upload.xlsx").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| StockError::Import(e.to_string()))?;
            upload = Some((file_name, bytes));
        }
    }
    let (file_name, bytes) =
        upload.ok_or_else(|| StockError::Import("No file data received".to_string()))?;

    let mut ws = session.workspace.try_begin(Action::Import).await?;
    let summary = ws.import(&file_name, &bytes)?;
    Ok(Json(json!({
        "status": "ok",
        "import": summary,
        "table": ws.snapshot(),
        "totals": ws.totals(),
    })))
}

async fn edit_row(
    State(state): State<SharedState>,
    jar: CookieJar,
    AxumPath(index): AxumPath<usize>,
    Json(patch): Json<RowPatch>,
) -> Result<Json<serde_json::Value>, StockError> {
    let session = current_session(&state, &jar)?;
    let mut ws = session.workspace.try_begin(Action::Edit).await?;
    let row = ws.edit(index, &patch)?;
    Ok(Json(json!({
        "status": "ok",
        "index": index,
        "row": row,
        "totals": ws.totals(),
    })))
}

async fn set_as_at_date(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(update): Json<AsAtDateUpdate>,
) -> Result<Json<serde_json::Value>, StockError> {
    let session = current_session(&state, &jar)?;
    let mut ws = session.workspace.try_begin(Action::SetAsAtDate).await?;
    ws.set_as_at_date(&update.as_at_date)?;
    Ok(Json(json!({
        "status": "ok",
        "asAtDate": ws.table().as_at_date(),
    })))
}

async fn save_table(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, StockError> {
    let session = current_session(&state, &jar)?;
    let mut ws = session.workspace.try_begin(Action::Save).await?;
    let saved = ws.save()?;
    Ok(Json(json!({
        "status": "ok",
        "rows": saved.rows.len(),
        "updatedAt": saved.updated_at,
    })))
}

async fn load_table(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, StockError> {
    let session = current_session(&state, &jar)?;
    let mut ws = session.workspace.try_begin(Action::Load).await?;
    let message = match ws.load()? {
        LoadOutcome::Loaded { rows, .. } => format!("Loaded {} saved rows", rows),
        LoadOutcome::NothingSaved => "No saved table yet".to_string(),
    };
    Ok(Json(json!({
        "status": "ok",
        "message": message,
        "table": ws.snapshot(),
        "totals": ws.totals(),
    })))
}

async fn delete_table(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, StockError> {
    let session = current_session(&state, &jar)?;
    let mut ws = session.workspace.try_begin(Action::Delete).await?;
    ws.delete()?;
    log::debug!("session {} cleared its table", session.id);
    Ok(Json(json!({ "status": "ok" })))
}

async fn export_xlsx(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<Response, StockError> {
    let session = current_session(&state, &jar)?;
    let ws = session.workspace.try_begin(Action::Export).await?;
    Ok(download(ws.export_xlsx()?))
}

async fn export_csv(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> Result<Response, StockError> {
    let session = current_session(&state, &jar)?;
    let ws = session.workspace.try_begin(Action::Export).await?;
    Ok(download(ws.export_csv()?))
}

fn download(file: ExportFile) -> Response {
    (
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.file_name),
            ),
        ],
        file.bytes,
    )
        .into_response()
}
