use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use trolley_core::builder::{self, GeneratedItem, GeneratedList};
use trolley_core::bulk;
use trolley_core::db::Database;
use trolley_core::grid::{self, GridCell, Progress};
use trolley_core::models::{
    ListSelection, NewRecipe, NewRecipeIngredient, NewStaple, ShoppingList, validate_name,
};
use trolley_core::share;
use trolley_core::tracker::{AUTOSAVE_INTERVAL, ListTracker};

const BODY_LIMIT: usize = 5 * 1024 * 1024; // 5 MB

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    /// Lists whose check state has been touched since the server started.
    trackers: Arc<Mutex<HashMap<i64, ListTracker>>>,
    api_key: Option<String>,
}

impl AppState {
    fn new(db: Database, api_key: Option<String>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            trackers: Arc::new(Mutex::new(HashMap::new())),
            api_key,
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Always taken after `db()` when both are needed.
    fn trackers(&self) -> MutexGuard<'_, HashMap<i64, ListTracker>> {
        self.trackers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct NameRequest {
    name: String,
}

#[derive(Deserialize)]
struct MoveSectorRequest {
    /// 0-based; past the end moves to the end.
    position: usize,
}

#[derive(Deserialize)]
struct RecipeQuery {
    /// Comma-separated ingredient names the recipe must all contain.
    ingredients: Option<String>,
}

#[derive(Deserialize)]
struct RecipeLineRequest {
    name: String,
    quantity: Option<String>,
    unit: Option<String>,
    /// Sector for an ingredient not seen before; created if unknown.
    sector: Option<String>,
}

#[derive(Deserialize)]
struct RecipeRequest {
    name: String,
    image_url: Option<String>,
    instructions: Option<String>,
    #[serde(default)]
    ingredients: Vec<RecipeLineRequest>,
}

#[derive(Deserialize)]
struct SelectionRequest {
    #[serde(default)]
    recipe_ids: Vec<i64>,
    /// Absent means the default staples.
    staple_ids: Option<Vec<i64>>,
    name: Option<String>,
}

#[derive(Serialize)]
struct ListResponse {
    #[serde(flatten)]
    list: GeneratedList,
    progress: Progress,
    grid: Vec<GridCell>,
}

#[derive(Serialize)]
struct HistoryEntry {
    #[serde(flatten)]
    list: ShoppingList,
    item_count: usize,
    checked_count: usize,
}

#[derive(Serialize)]
struct ToggleResponse {
    item_id: i64,
    is_checked: bool,
    /// False when the write failed; the next autosave retries it.
    saved: bool,
    progress: Progress,
}

#[derive(Serialize)]
struct ShareResponse {
    text: String,
    whatsapp: String,
    email: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn bad_request(err: &anyhow::Error) -> ApiError {
    ApiError::BadRequest(format!("{err}"))
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Sector handlers ---

async fn list_sectors(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let sectors = state.db().list_sectors().context("database error")?;
    let value = serde_json::to_value(sectors).context("failed to serialize sectors")?;
    Ok(Json(value))
}

async fn create_sector(
    State(state): State<AppState>,
    Json(req): Json<NameRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let name = validate_name("sector", &req.name).map_err(|e| bad_request(&e))?;
    let db = state.db();
    if db.find_sector_by_name(&name).context("database error")?.is_some() {
        return Err(ApiError::BadRequest(format!(
            "A sector named '{name}' already exists"
        )));
    }
    let sector = db.add_sector(&name)?;
    let value = serde_json::to_value(sector).context("failed to serialize sector")?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn rename_sector(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = validate_name("sector", &req.name).map_err(|e| bad_request(&e))?;
    let db = state.db();
    db.get_sector(id)
        .map_err(|_| ApiError::NotFound(format!("Sector {id} not found")))?;
    let sector = db.rename_sector(id, &name)?;
    let value = serde_json::to_value(sector).context("failed to serialize sector")?;
    Ok(Json(value))
}

async fn move_sector(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<MoveSectorRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db();
    db.get_sector(id)
        .map_err(|_| ApiError::NotFound(format!("Sector {id} not found")))?;
    let sectors = db.move_sector(id, req.position)?;
    let value = serde_json::to_value(sectors).context("failed to serialize sectors")?;
    Ok(Json(value))
}

async fn delete_sector(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db().delete_sector(id).context("database error")? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Sector {id} not found")))
    }
}

async fn list_ingredients(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ingredients = state.db().list_ingredients().context("database error")?;
    let value = serde_json::to_value(ingredients).context("failed to serialize ingredients")?;
    Ok(Json(value))
}

// --- Recipe handlers ---

/// Resolve request lines to stored ingredients, creating unknown ones.
fn resolve_recipe_lines(
    db: &Database,
    lines: &[RecipeLineRequest],
) -> Result<Vec<NewRecipeIngredient>, ApiError> {
    let mut resolved = Vec::with_capacity(lines.len());
    for line in lines {
        let name = validate_name("ingredient", &line.name).map_err(|e| bad_request(&e))?;
        let sector_id = match line.sector.as_deref().map(str::trim) {
            Some(sector) if !sector.is_empty() => Some(db.resolve_sector(sector)?.id),
            _ => None,
        };
        let ingredient = db.get_or_create_ingredient(&name, sector_id)?;
        resolved.push(NewRecipeIngredient {
            ingredient_id: ingredient.id,
            quantity: line.quantity.clone(),
            unit: line.unit.clone(),
        });
    }
    Ok(resolved)
}

fn new_recipe(db: &Database, req: RecipeRequest) -> Result<NewRecipe, ApiError> {
    let name = validate_name("recipe", &req.name).map_err(|e| bad_request(&e))?;
    let ingredients = resolve_recipe_lines(db, &req.ingredients)?;
    Ok(NewRecipe {
        name,
        image_url: req.image_url,
        instructions: req.instructions,
        ingredients,
    })
}

async fn list_recipes(
    State(state): State<AppState>,
    Query(params): Query<RecipeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let wanted: Vec<String> = params
        .ingredients
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    let recipes = state.db().list_recipes().context("database error")?;
    let matching: Vec<_> = recipes
        .into_iter()
        .filter(|r| r.contains_all_ingredients(&wanted))
        .collect();
    let value = serde_json::to_value(matching).context("failed to serialize recipes")?;
    Ok(Json(value))
}

async fn create_recipe(
    State(state): State<AppState>,
    Json(req): Json<RecipeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let db = state.db();
    let recipe = new_recipe(&db, req)?;
    let created = db.create_recipe(&recipe)?;
    let value = serde_json::to_value(created).context("failed to serialize recipe")?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let recipe = state
        .db()
        .get_recipe(id)
        .map_err(|_| ApiError::NotFound(format!("Recipe {id} not found")))?;
    let value = serde_json::to_value(recipe).context("failed to serialize recipe")?;
    Ok(Json(value))
}

async fn update_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RecipeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db();
    db.get_recipe(id)
        .map_err(|_| ApiError::NotFound(format!("Recipe {id} not found")))?;
    let recipe = new_recipe(&db, req)?;
    let updated = db.update_recipe(id, &recipe)?;
    let value = serde_json::to_value(updated).context("failed to serialize recipe")?;
    Ok(Json(value))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db().delete_recipe(id).context("database error")? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Recipe {id} not found")))
    }
}

// --- Staple handlers ---

fn check_staple(db: &Database, req: &NewStaple) -> Result<(), ApiError> {
    validate_name("staple", &req.name).map_err(|e| bad_request(&e))?;
    if let Some(sector_id) = req.sector_id {
        db.get_sector(sector_id)
            .map_err(|_| ApiError::BadRequest(format!("Sector {sector_id} not found")))?;
    }
    Ok(())
}

async fn list_staples(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let staples = state.db().list_staples().context("database error")?;
    let value = serde_json::to_value(staples).context("failed to serialize staples")?;
    Ok(Json(value))
}

async fn default_staples(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ids = state.db().default_staple_ids().context("database error")?;
    Ok(Json(serde_json::json!({ "staple_ids": ids })))
}

async fn create_staple(
    State(state): State<AppState>,
    Json(req): Json<NewStaple>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let db = state.db();
    check_staple(&db, &req)?;
    let staple = db.create_staple(&req)?;
    let value = serde_json::to_value(staple).context("failed to serialize staple")?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn get_staple(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let staple = state
        .db()
        .get_staple(id)
        .map_err(|_| ApiError::NotFound(format!("Staple {id} not found")))?;
    let value = serde_json::to_value(staple).context("failed to serialize staple")?;
    Ok(Json(value))
}

async fn update_staple(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewStaple>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db();
    db.get_staple(id)
        .map_err(|_| ApiError::NotFound(format!("Staple {id} not found")))?;
    check_staple(&db, &req)?;
    let staple = db.update_staple(id, &req)?;
    let value = serde_json::to_value(staple).context("failed to serialize staple")?;
    Ok(Json(value))
}

async fn delete_staple(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db().delete_staple(id).context("database error")? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Staple {id} not found")))
    }
}

// --- Shopping list handlers ---

fn selection_from(db: &Database, req: &SelectionRequest) -> Result<ListSelection, ApiError> {
    for &id in &req.recipe_ids {
        db.get_recipe(id)
            .map_err(|_| ApiError::BadRequest(format!("Recipe {id} not found")))?;
    }
    let staple_ids = match req.staple_ids {
        Some(ref ids) => {
            for &id in ids {
                db.get_staple(id)
                    .map_err(|_| ApiError::BadRequest(format!("Staple {id} not found")))?;
            }
            ids.clone()
        }
        None => db.default_staple_ids().context("database error")?,
    };
    let selection = ListSelection::new(req.recipe_ids.iter().copied(), staple_ids);
    if selection.is_empty() {
        return Err(ApiError::BadRequest(
            "Select at least one recipe or staple".to_string(),
        ));
    }
    Ok(selection)
}

/// Apply unsaved tracker state so a reload never shows an older value.
fn overlay_tracker(list: &mut GeneratedList, tracker: &ListTracker) {
    let apply = |item: &mut GeneratedItem| {
        if let Some(checked) = tracker.is_checked(item.id) {
            item.is_checked = checked;
        }
    };
    list.items.iter_mut().for_each(apply);
    list.grouped
        .iter_mut()
        .flat_map(|g| g.items.iter_mut())
        .for_each(apply);
}

fn list_response(db: &Database, list: GeneratedList) -> Result<ListResponse, ApiError> {
    let sectors = db.list_sectors().context("database error")?;
    let grid = grid::layout(&sectors, &list);
    let progress = Progress::of(&list.items);
    Ok(ListResponse {
        list,
        progress,
        grid,
    })
}

fn load_list(db: &Database, id: i64) -> Result<GeneratedList, ApiError> {
    db.get_shopping_list(id)
        .map_err(|_| ApiError::NotFound(format!("Shopping list {id} not found")))?;
    Ok(builder::load_list(db, id)?)
}

async fn list_history(State(state): State<AppState>) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let db = state.db();
    let lists = db.list_shopping_lists().context("database error")?;
    let mut entries = Vec::with_capacity(lists.len());
    for list in lists {
        let items = db.get_list_items(list.id).context("database error")?;
        entries.push(HistoryEntry {
            item_count: items.len(),
            checked_count: items.iter().filter(|i| i.is_checked).count(),
            list,
        });
    }
    Ok(Json(entries))
}

async fn generate_list(
    State(state): State<AppState>,
    Json(req): Json<SelectionRequest>,
) -> Result<(StatusCode, Json<ListResponse>), ApiError> {
    let db = state.db();
    let selection = selection_from(&db, &req)?;
    let list = builder::generate_list(&db, &selection, req.name.as_deref())?;
    Ok((StatusCode::CREATED, Json(list_response(&db, list)?)))
}

async fn get_list(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ListResponse>, ApiError> {
    let db = state.db();
    let mut list = load_list(&db, id)?;
    if let Some(tracker) = state.trackers().get(&id) {
        overlay_tracker(&mut list, tracker);
    }
    Ok(Json(list_response(&db, list)?))
}

async fn update_list(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SelectionRequest>,
) -> Result<Json<ListResponse>, ApiError> {
    let db = state.db();
    db.get_shopping_list(id)
        .map_err(|_| ApiError::NotFound(format!("Shopping list {id} not found")))?;
    let selection = selection_from(&db, &req)?;
    let list = builder::update_list(&db, id, &selection)?;
    // Item ids changed; any tracker for the old items is stale.
    state.trackers().remove(&id);
    Ok(Json(list_response(&db, list)?))
}

async fn rename_list(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NameRequest>,
) -> Result<Json<ShoppingList>, ApiError> {
    let name = validate_name("shopping list", &req.name).map_err(|e| bad_request(&e))?;
    let db = state.db();
    db.get_shopping_list(id)
        .map_err(|_| ApiError::NotFound(format!("Shopping list {id} not found")))?;
    Ok(Json(db.rename_shopping_list(id, &name)?))
}

async fn complete_list(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ShoppingList>, ApiError> {
    let db = state.db();
    db.get_shopping_list(id)
        .map_err(|_| ApiError::NotFound(format!("Shopping list {id} not found")))?;
    // A completed list leaves the viewer; save what is pending and stop tracking it.
    // Failed items are logged by the tracker.
    if let Some(mut tracker) = state.trackers().remove(&id) {
        let _ = tracker.flush(&db);
    }
    Ok(Json(db.complete_shopping_list(id)?))
}

async fn delete_list(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let db = state.db();
    if db.delete_shopping_list(id).context("database error")? {
        state.trackers().remove(&id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Shopping list {id} not found")))
    }
}

/// The cached tracker for `list_id`, loading it on first use.
fn tracker_for<'a>(
    db: &Database,
    trackers: &'a mut HashMap<i64, ListTracker>,
    list_id: i64,
) -> Result<&'a mut ListTracker, ApiError> {
    if !trackers.contains_key(&list_id) {
        db.get_shopping_list(list_id)
            .map_err(|_| ApiError::NotFound(format!("Shopping list {list_id} not found")))?;
        let tracker = ListTracker::load(db, list_id)?;
        trackers.insert(list_id, tracker);
    }
    trackers
        .get_mut(&list_id)
        .ok_or_else(|| ApiError::NotFound(format!("Shopping list {list_id} not found")))
}

async fn toggle_item(
    State(state): State<AppState>,
    Path((list_id, item_id)): Path<(i64, i64)>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let db = state.db();
    let mut trackers = state.trackers();
    let tracker = tracker_for(&db, &mut trackers, list_id)?;
    if tracker.is_checked(item_id).is_none() {
        return Err(ApiError::NotFound(format!(
            "Item {item_id} not found on shopping list {list_id}"
        )));
    }
    let saved = tracker.toggle(&db, item_id).is_ok();
    // A failed write keeps the item; a deleted item is dropped.
    let Some(is_checked) = tracker.is_checked(item_id) else {
        return Err(ApiError::NotFound(format!(
            "Item {item_id} not found on shopping list {list_id}"
        )));
    };
    Ok(Json(ToggleResponse {
        item_id,
        is_checked,
        saved,
        progress: tracker.progress(),
    }))
}

fn set_all(state: &AppState, list_id: i64, checked: bool) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db();
    let mut trackers = state.trackers();
    let tracker = tracker_for(&db, &mut trackers, list_id)?;
    let saved = tracker.set_all(&db, checked).is_ok();
    Ok(Json(serde_json::json!({
        "list_id": list_id,
        "saved": saved,
        "progress": tracker.progress(),
    })))
}

async fn check_all(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    set_all(&state, id, true)
}

async fn clear_all(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    set_all(&state, id, false)
}

async fn share_list(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ShareResponse>, ApiError> {
    let db = state.db();
    let list = load_list(&db, id)?;
    let cells = grid::layout(&db.list_sectors().context("database error")?, &list);
    let text = share::render_text(Some(&list.name), &cells);
    Ok(Json(ShareResponse {
        whatsapp: share::whatsapp_link(&text),
        email: share::mailto_link(Some(&list.name), &text),
        text,
    }))
}

// --- CSV handlers ---

#[derive(Clone, Copy)]
enum CsvKind {
    Recipes,
    Staples,
}

impl CsvKind {
    fn parse(kind: &str) -> Result<Self, ApiError> {
        match kind {
            "recipes" => Ok(Self::Recipes),
            "staples" => Ok(Self::Staples),
            other => Err(ApiError::NotFound(format!(
                "Unknown CSV kind '{other}'. Use recipes or staples"
            ))),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Recipes => "Recipes",
            Self::Staples => "Staples",
        }
    }

    fn file_stem(self) -> &'static str {
        match self {
            Self::Recipes => "recipes",
            Self::Staples => "staples",
        }
    }
}

async fn import_csv(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = CsvKind::parse(&kind)?;
    let db = state.db();
    let summary = match kind {
        CsvKind::Recipes => bulk::import_recipes(&db, &body),
        CsvKind::Staples => bulk::import_staples(&db, &body),
    }
    .map_err(|e| bad_request(&e))?;
    Ok(Json(serde_json::json!({
        "imported": summary.imported,
        "updated": summary.updated,
        "message": summary.message(kind.label()),
    })))
}

async fn export_csv(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Response, ApiError> {
    let kind = CsvKind::parse(&kind)?;
    let csv = {
        let db = state.db();
        match kind {
            CsvKind::Recipes => bulk::export_recipes(&db)?,
            CsvKind::Staples => bulk::export_staples(&db)?,
        }
    };
    let filename = bulk::export_filename(kind.file_stem(), Local::now().date_naive());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    )
        .into_response())
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sectors", get(list_sectors).post(create_sector))
        .route(
            "/api/sectors/{id}",
            put(rename_sector).delete(delete_sector),
        )
        .route("/api/sectors/{id}/move", post(move_sector))
        .route("/api/ingredients", get(list_ingredients))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/{id}",
            get(get_recipe).put(update_recipe).delete(delete_recipe),
        )
        .route("/api/staples", get(list_staples).post(create_staple))
        .route("/api/staples/defaults", get(default_staples))
        .route(
            "/api/staples/{id}",
            get(get_staple).put(update_staple).delete(delete_staple),
        )
        .route("/api/lists", get(list_history).post(generate_list))
        .route(
            "/api/lists/{id}",
            get(get_list)
                .put(update_list)
                .patch(rename_list)
                .delete(delete_list),
        )
        .route("/api/lists/{id}/complete", post(complete_list))
        .route("/api/lists/{id}/items/{item_id}/toggle", post(toggle_item))
        .route("/api/lists/{id}/check-all", post(check_all))
        .route("/api/lists/{id}/clear", post(clear_all))
        .route("/api/lists/{id}/share", get(share_list))
        .route("/api/import/{kind}", post(import_csv))
        .route("/api/export/{kind}", get(export_csv))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Autosave ---

/// Re-write every dirty item of every tracked list. Failures stay dirty and
/// are logged by the tracker.
fn flush_trackers(state: &AppState) -> usize {
    let db = state.db();
    let mut trackers = state.trackers();
    let mut written = 0;
    for tracker in trackers.values_mut() {
        if let Ok(n) = tracker.flush(&db) {
            written += n;
        }
    }
    written
}

fn spawn_autosave(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(AUTOSAVE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            flush_trackers(&state);
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

// --- Server startup ---

/// `abcd...wxyz` for display; keys too short to mask are not shown.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 8 {
        return "(hidden)".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub async fn start_server(
    db: Database,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    new_api_key: bool,
) -> anyhow::Result<()> {
    let state = AppState::new(db, api_key.clone());
    let app = build_router(state.clone());

    if let Some(ref key) = api_key {
        // A fresh key was already printed in full when it was generated.
        if !new_api_key {
            eprintln!(
                "API key: {} (see api_key file in data directory)",
                mask_key(key)
            );
        }
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let autosave = spawn_autosave(state.clone());

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("Failed to bind {bind}:{port}"))?;
    eprintln!("Listening on http://{bind}:{port}");
    info!(bind, port, "server started");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    autosave.abort();
    let written = flush_trackers(&state);
    info!(written, "server stopped");
    served?;
    Ok(())
}
