#![forbid(unsafe_code)]

//! Axum backend serving the Baluflix catalog and media streams.
//!
//! The HTTP surface is deliberately small: two read-only catalog endpoints,
//! the byte-range streaming endpoint, a download variant, and a static
//! fallback for the SPA. All byte serving goes through the single responder
//! in `baluflix::stream`; there is exactly one range implementation in the
//! process no matter how many routes serve files.

use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use baluflix::catalog::{CatalogReader, MovieRecord};
use baluflix::config::{RuntimeOverrides, resolve_runtime_config};
use baluflix::startup::{ensure_media_root, ensure_not_root};
use baluflix::stream::{self, MediaResource, StreamError, StreamSettings};
use baluflix::media_type;
use parking_lot::RwLock;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// Catalog database file relative to the media root. Movie binaries live in
// the same tree, named by the catalog's `file_name` column.
const CATALOG_DB_FILE: &str = "catalog.db";

#[derive(Debug, Clone)]
struct BackendArgs {
    media_root: PathBuf,
    www_root: PathBuf,
    port: u16,
    listen_host: IpAddr,
    chunk_bytes: usize,
    stall_timeout: Option<Duration>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut media_root_override: Option<PathBuf> = None;
        let mut www_root_override: Option<PathBuf> = None;
        let mut port_override: Option<u16> = None;
        let mut host_override: Option<IpAddr> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--media-root=") {
                media_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--www-root=") {
                www_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(parse_host_arg(value)?);
                continue;
            }

            match arg.as_str() {
                "--media-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--media-root requires a value"))?;
                    media_root_override = Some(PathBuf::from(value));
                }
                "--www-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--www-root requires a value"))?;
                    www_root_override = Some(PathBuf::from(value));
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(parse_host_arg(&value)?);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let runtime = resolve_runtime_config(RuntimeOverrides {
            media_root: media_root_override,
            www_root: www_root_override,
            port: port_override,
            host: host_override.map(|host| host.to_string()),
            ..RuntimeOverrides::default()
        })?;
        let listen_host = parse_host_arg(&runtime.host)?;

        Ok(Self {
            media_root: runtime.media_root,
            www_root: runtime.www_root,
            port: runtime.port,
            listen_host,
            chunk_bytes: runtime.stream_chunk_bytes,
            stall_timeout: runtime.stream_stall_timeout,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/BALUFLIX_HOST")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    reader: Arc<CatalogReader>,
    cache: Arc<ApiCache>,
    media_root: Arc<PathBuf>,
    www_root: Arc<PathBuf>,
    stream: StreamSettings,
}

/// Small in-memory cache over the catalog so repeated browsing does not
/// re-query SQLite. Invalidated whenever the DB's data_version moves, which
/// is how commits from the external upload pipeline become visible.
struct ApiCache {
    movies: RwLock<Option<Vec<MovieRecord>>>,
    details: RwLock<HashMap<String, MovieRecord>>,
    last_db_version: RwLock<Option<i64>>,
}

impl ApiCache {
    fn new() -> Self {
        Self {
            movies: RwLock::new(None),
            details: RwLock::new(HashMap::new()),
            last_db_version: RwLock::new(None),
        }
    }

    fn clear(&self) {
        self.movies.write().take();
        self.details.write().clear();
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = BackendArgs::parse()?;

    ensure_not_root("backend")?;
    ensure_media_root(&args.media_root)?;

    let catalog_path = args.media_root.join(CATALOG_DB_FILE);
    let reader = CatalogReader::new(&catalog_path)
        .await
        .context("initializing catalog reader")?;

    let state = AppState {
        reader: Arc::new(reader),
        cache: Arc::new(ApiCache::new()),
        media_root: Arc::new(args.media_root),
        www_root: Arc::new(args.www_root),
        stream: StreamSettings {
            chunk_bytes: args.chunk_bytes,
            stall_timeout: args.stall_timeout,
        },
    };

    let app = Router::new()
        .route("/api/movies", get(list_movies))
        .route("/api/movies/{id}", get(get_movie))
        .route("/api/categories", get(list_categories))
        .route("/stream/{id}", get(stream_movie))
        .route("/download/{id}", get(download_movie))
        .fallback(static_fallback)
        .with_state(state);

    let addr = SocketAddr::new(args.listen_host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(%addr, "backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running backend")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown is affected if this fails; the process still
    // terminates when Ctrl+C fires.
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn list_movies(State(state): State<AppState>) -> ApiResult<Json<Vec<MovieRecord>>> {
    let movies = state.get_movies().await?;
    Ok(Json(sanitize_movie_records(&movies)))
}

async fn get_movie(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<MovieRecord>> {
    let record = state.get_movie_record(&id).await?;
    Ok(Json(sanitize_movie_record(&record)))
}

/// Home-screen view: the whole catalog grouped by category. Records without
/// a category land in a single "Uncategorized" bucket.
async fn list_categories(
    State(state): State<AppState>,
) -> ApiResult<Json<BTreeMap<String, Vec<MovieRecord>>>> {
    let movies = state.get_movies().await?;
    let mut grouped: BTreeMap<String, Vec<MovieRecord>> = BTreeMap::new();
    for record in &movies {
        let key = record
            .category
            .clone()
            .unwrap_or_else(|| "Uncategorized".to_string());
        grouped
            .entry(key)
            .or_default()
            .push(sanitize_movie_record(record));
    }
    Ok(Json(grouped))
}

async fn stream_movie(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let resource = resolve_resource(&state, &id).await?;
    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    stream::respond(&resource, range_header, &state.stream)
        .await
        .map_err(|err| stream_error_to_api(&id, err))
}

/// Same bytes as `/stream/{id}` but framed as an attachment, mirroring the
/// "save for offline" link in the browsing UI. Always a full-file response.
async fn download_movie(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Response> {
    let record = state.get_movie_record(&id).await?;
    let resource = resource_from_record(&state, &record)?;

    let mut response = stream::respond(&resource, None, &state.stream)
        .await
        .map_err(|err| stream_error_to_api(&id, err))?;

    let file_name = record.file_name.as_deref().unwrap_or(&record.id);
    let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', ""));
    if let Ok(value) = disposition.parse() {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Maps pre-body streaming failures onto the API error shape. Anything that
/// fails after the first body byte is already on the wire and never reaches
/// this function.
fn stream_error_to_api(id: &str, err: StreamError) -> ApiError {
    match err {
        StreamError::NotFound => ApiError::not_found("media file not found"),
        StreamError::SizeMismatch { expected, actual } => {
            warn!(movie = id, expected, actual, "catalog size drift");
            ApiError::internal("media file inconsistent with catalog")
        }
        StreamError::Io(io_err) => {
            warn!(movie = id, error = %io_err, "filesystem error before streaming");
            ApiError::internal("failed to open media file")
        }
    }
}

/// The `resolve(id)` step: catalog record to a concrete on-disk resource.
async fn resolve_resource(state: &AppState, id: &str) -> ApiResult<MediaResource> {
    let record = state.get_movie_record(id).await?;
    resource_from_record(state, &record)
}

fn resource_from_record(state: &AppState, record: &MovieRecord) -> ApiResult<MediaResource> {
    let file_name = record
        .file_name
        .as_deref()
        .ok_or_else(|| ApiError::not_found("movie has no published media file"))?;
    ensure_safe_path_segment(file_name)?;

    let path = state.media_root.join(file_name);
    let size_bytes = u64::try_from(record.size_bytes)
        .map_err(|_| ApiError::internal("catalog recorded a negative file size"))?;
    let content_type = media_type::resolve(&path, record.content_type.as_deref());

    Ok(MediaResource {
        id: record.id.clone(),
        path,
        size_bytes,
        content_type,
    })
}

impl AppState {
    /// Drops cached catalog data whenever another connection committed a
    /// write since the last check.
    async fn ensure_fresh_cache(&self) -> ApiResult<()> {
        let version = self
            .reader
            .data_version()
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?;

        let mut last = self.cache.last_db_version.write();
        if let Some(previous) = *last
            && version != previous
        {
            self.cache.clear();
        }
        *last = Some(version);
        Ok(())
    }

    async fn get_movies(&self) -> ApiResult<Vec<MovieRecord>> {
        self.ensure_fresh_cache().await?;
        if let Some(cached) = self.cache.movies.read().clone() {
            return Ok(cached);
        }

        let records = self
            .reader
            .list_movies()
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?;

        self.cache.movies.write().replace(records.clone());
        let mut details = self.cache.details.write();
        for record in &records {
            details.insert(record.id.clone(), record.clone());
        }

        Ok(records)
    }

    async fn get_movie_record(&self, id: &str) -> ApiResult<MovieRecord> {
        self.ensure_fresh_cache().await?;
        if let Some(record) = self.cache.details.read().get(id).cloned() {
            return Ok(record);
        }

        let record = self
            .reader
            .get_movie(id)
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?
            .ok_or_else(|| ApiError::not_found("movie not found"))?;

        self.cache
            .details
            .write()
            .insert(id.to_owned(), record.clone());

        Ok(record)
    }
}

/// Stored file locations never leave the process; the frontend only needs
/// the `/stream/{id}` indirection.
fn sanitize_movie_records(records: &[MovieRecord]) -> Vec<MovieRecord> {
    records.iter().map(sanitize_movie_record).collect()
}

fn sanitize_movie_record(record: &MovieRecord) -> MovieRecord {
    let mut clone = record.clone();
    clone.file_name = None;
    clone
}

/// Validates that a single dynamic path segment never escapes its base
/// folder.
fn ensure_safe_path_segment(value: &str) -> ApiResult<()> {
    if value.is_empty()
        || Path::new(value)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }

    Ok(())
}

async fn serve_www_path(state: &AppState, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(&state.www_root, request_path)?;
    let metadata = tokio::fs::metadata(&target).await;

    match metadata {
        Ok(meta) if meta.is_dir() => {
            serve_static_file(state, state.www_root.join("index.html")).await
        }
        Ok(_) => serve_static_file(state, target).await,
        Err(_) => {
            if should_fallback_to_index(request_path) {
                serve_static_file(state, state.www_root.join("index.html")).await
            } else {
                Err(ApiError::not_found("file not found"))
            }
        }
    }
}

/// Static assets reuse the streaming responder with the current on-disk
/// size, so even the SPA bundle is served with bounded-memory chunking.
async fn serve_static_file(state: &AppState, path: PathBuf) -> ApiResult<Response> {
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let resource = MediaResource {
        id: path.to_string_lossy().into_owned(),
        path: path.clone(),
        size_bytes: meta.len(),
        content_type: media_type::resolve(&path, None),
    };
    stream::respond(&resource, None, &state.stream)
        .await
        .map_err(|err| stream_error_to_api(&resource.id, err))
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return true;
    }
    Path::new(trimmed).extension().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, extract::State as AxumState};
    use baluflix::catalog::CatalogStore;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::{env, sync::Arc};
    use tempfile::tempdir;

    struct BackendTestContext {
        _temp: tempfile::TempDir,
        store: CatalogStore,
        state: AppState,
    }

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_file(vars: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let mut contents = String::new();
        for (key, value) in vars {
            contents.push_str(&format!("{key}=\"{value}\"\n"));
        }
        std::fs::write(dir.path().join(".env"), contents).unwrap();
        let cwd = env::current_dir().unwrap();
        env::set_current_dir(dir.path()).unwrap();
        f();
        env::set_current_dir(cwd).unwrap();
    }

    impl BackendTestContext {
        async fn new() -> Self {
            let temp = tempdir().unwrap();
            let db_path = temp.path().join(CATALOG_DB_FILE);
            let store = CatalogStore::open(&db_path).await.unwrap();
            let reader = CatalogReader::new(&db_path).await.unwrap();
            let www_root = temp.path().join("www");
            std::fs::create_dir_all(&www_root).unwrap();

            Self {
                state: AppState {
                    reader: Arc::new(reader),
                    cache: Arc::new(ApiCache::new()),
                    media_root: Arc::new(temp.path().to_path_buf()),
                    www_root: Arc::new(www_root),
                    stream: StreamSettings::default(),
                },
                store,
                _temp: temp,
            }
        }

        /// Writes the media file and catalogs it with its real size.
        async fn publish_movie(&self, id: &str, contents: &[u8]) {
            let file_name = format!("{id}.mp4");
            std::fs::write(self.state.media_root.join(&file_name), contents).unwrap();
            self.store
                .upsert_movie(&sample_movie(id, contents.len() as i64))
                .await
                .unwrap();
        }
    }

    fn sample_movie(id: &str, size_bytes: i64) -> MovieRecord {
        MovieRecord {
            id: id.into(),
            title: format!("Movie {id}"),
            description: "desc".into(),
            category: Some("Action".into()),
            language: Some("en".into()),
            poster_url: Some(format!("/posters/{id}.jpg")),
            duration_text: Some("1:40:00".into()),
            views: Some(3),
            size_bytes,
            file_name: Some(format!("{id}.mp4")),
            content_type: Some("video/mp4".into()),
            added_at: Some(Utc::now()),
        }
    }

    fn ten_k() -> Vec<u8> {
        (0..10_000u32).map(|i| (i % 251) as u8).collect()
    }

    fn range_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, value.parse().unwrap());
        headers
    }

    async fn body_bytes(response: Response) -> axum::body::Bytes {
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    fn parse_backend_args(env_values: &[(&str, &str)], extra: &[&str]) -> BackendArgs {
        let argv = extra
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>();
        let mut parsed = None;
        with_env_file(env_values, || {
            parsed = Some(BackendArgs::from_iter(argv.clone()).expect("parsed args"));
        });
        parsed.expect("args set")
    }

    #[test]
    fn backend_args_resolve_from_env_file() {
        let args = parse_backend_args(
            &[
                ("MEDIA_ROOT", "/media/test"),
                ("WWW_ROOT", "/www/test"),
                ("BALUFLIX_PORT", "4242"),
                ("BALUFLIX_HOST", "127.0.0.1"),
            ],
            &[],
        );
        assert_eq!(args.media_root, PathBuf::from("/media/test"));
        assert_eq!(args.www_root, PathBuf::from("/www/test"));
        assert_eq!(args.port, 4242);
    }

    #[test]
    fn backend_args_cli_overrides_win() {
        let args = parse_backend_args(
            &[
                ("MEDIA_ROOT", "/media/test"),
                ("WWW_ROOT", "/www/test"),
                ("BALUFLIX_PORT", "4242"),
                ("BALUFLIX_HOST", "127.0.0.1"),
            ],
            &[
                "--media-root",
                "/custom/media",
                "--port",
                "9000",
                "--host=0.0.0.0",
            ],
        );
        assert_eq!(args.media_root, PathBuf::from("/custom/media"));
        assert_eq!(args.port, 9000);
        assert_eq!(args.listen_host, "0.0.0.0".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn stream_without_range_is_full_200() {
        let ctx = BackendTestContext::new().await;
        let contents = ten_k();
        ctx.publish_movie("heat", &contents).await;

        let response = stream_movie(
            AxumState(ctx.state.clone()),
            AxumPath("heat".into()),
            HeaderMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "10000"
        );
        assert_eq!(
            response.headers().get(header::ACCEPT_RANGES).unwrap(),
            "bytes"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "video/mp4"
        );
        assert_eq!(body_bytes(response).await.as_ref(), &contents[..]);
    }

    #[tokio::test]
    async fn stream_with_range_is_partial_206() {
        let ctx = BackendTestContext::new().await;
        let contents = ten_k();
        ctx.publish_movie("heat", &contents).await;

        let response = stream_movie(
            AxumState(ctx.state.clone()),
            AxumPath("heat".into()),
            range_headers("bytes=0-999"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 0-999/10000"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "1000"
        );
        assert_eq!(body_bytes(response).await.as_ref(), &contents[..1000]);
    }

    #[tokio::test]
    async fn stream_open_ended_range_reaches_eof() {
        let ctx = BackendTestContext::new().await;
        let contents = ten_k();
        ctx.publish_movie("heat", &contents).await;

        let response = stream_movie(
            AxumState(ctx.state.clone()),
            AxumPath("heat".into()),
            range_headers("bytes=9900-"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 9900-9999/10000"
        );
        assert_eq!(body_bytes(response).await.as_ref(), &contents[9900..]);
    }

    #[tokio::test]
    async fn stream_out_of_bounds_range_is_416() {
        let ctx = BackendTestContext::new().await;
        ctx.publish_movie("heat", &ten_k()).await;

        let response = stream_movie(
            AxumState(ctx.state.clone()),
            AxumPath("heat".into()),
            range_headers("bytes=20000-30000"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */10000"
        );
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn stream_malformed_range_falls_back_to_full() {
        let ctx = BackendTestContext::new().await;
        let contents = ten_k();
        ctx.publish_movie("heat", &contents).await;

        let response = stream_movie(
            AxumState(ctx.state.clone()),
            AxumPath("heat".into()),
            range_headers("bytes=abc-def"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await.len(), contents.len());
    }

    #[tokio::test]
    async fn stream_unknown_id_is_404_with_and_without_range() {
        let ctx = BackendTestContext::new().await;

        let err = stream_movie(
            AxumState(ctx.state.clone()),
            AxumPath("ghost".into()),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = stream_movie(
            AxumState(ctx.state.clone()),
            AxumPath("ghost".into()),
            range_headers("bytes=0-10"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_cataloged_but_missing_file_is_404() {
        let ctx = BackendTestContext::new().await;
        ctx.store
            .upsert_movie(&sample_movie("heat", 10_000))
            .await
            .unwrap();

        let err = stream_movie(
            AxumState(ctx.state.clone()),
            AxumPath("heat".into()),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stream_size_drift_is_500() {
        let ctx = BackendTestContext::new().await;
        let contents = ten_k();
        std::fs::write(ctx.state.media_root.join("heat.mp4"), &contents).unwrap();
        // Catalog lies about the size by one byte.
        ctx.store
            .upsert_movie(&sample_movie("heat", contents.len() as i64 - 1))
            .await
            .unwrap();

        let err = stream_movie(
            AxumState(ctx.state.clone()),
            AxumPath("heat".into()),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn concurrent_streams_get_independent_bytes() {
        let ctx = BackendTestContext::new().await;
        let contents = ten_k();
        ctx.publish_movie("heat", &contents).await;

        let (a, b, c) = tokio::join!(
            stream_movie(
                AxumState(ctx.state.clone()),
                AxumPath("heat".into()),
                range_headers("bytes=0-999"),
            ),
            stream_movie(
                AxumState(ctx.state.clone()),
                AxumPath("heat".into()),
                range_headers("bytes=500-1499"),
            ),
            stream_movie(
                AxumState(ctx.state.clone()),
                AxumPath("heat".into()),
                HeaderMap::new(),
            ),
        );

        assert_eq!(body_bytes(a.unwrap()).await.as_ref(), &contents[..1000]);
        assert_eq!(body_bytes(b.unwrap()).await.as_ref(), &contents[500..1500]);
        assert_eq!(body_bytes(c.unwrap()).await.as_ref(), &contents[..]);
    }

    #[tokio::test]
    async fn download_sets_attachment_disposition() {
        let ctx = BackendTestContext::new().await;
        let contents = ten_k();
        ctx.publish_movie("heat", &contents).await;

        let response = download_movie(AxumState(ctx.state.clone()), AxumPath("heat".into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_DISPOSITION)
                .unwrap(),
            "attachment; filename=\"heat.mp4\""
        );
        assert_eq!(body_bytes(response).await.len(), contents.len());
    }

    #[tokio::test]
    async fn api_responses_strip_file_names() {
        let ctx = BackendTestContext::new().await;
        ctx.publish_movie("heat", b"bytes").await;

        let Json(movies) = super::list_movies(AxumState(ctx.state.clone()))
            .await
            .unwrap();
        assert_eq!(movies.len(), 1);
        assert!(movies[0].file_name.is_none());

        let Json(single) = super::get_movie(AxumState(ctx.state.clone()), AxumPath("heat".into()))
            .await
            .unwrap();
        assert!(single.file_name.is_none());
        assert_eq!(single.title, "Movie heat");
    }

    #[tokio::test]
    async fn categories_group_the_catalog() {
        let ctx = BackendTestContext::new().await;
        ctx.publish_movie("heat", b"bytes").await;

        let mut drama = sample_movie("ronin", 5);
        drama.category = Some("Drama".into());
        ctx.store.upsert_movie(&drama).await.unwrap();

        let mut uncategorized = sample_movie("blob", 5);
        uncategorized.category = None;
        ctx.store.upsert_movie(&uncategorized).await.unwrap();

        let Json(grouped) = super::list_categories(AxumState(ctx.state.clone()))
            .await
            .unwrap();
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped["Action"][0].id, "heat");
        assert_eq!(grouped["Drama"][0].id, "ronin");
        assert_eq!(grouped["Uncategorized"][0].id, "blob");
        assert!(grouped["Drama"][0].file_name.is_none());
    }

    #[tokio::test]
    async fn catalog_cache_invalidates_on_new_publish() {
        let ctx = BackendTestContext::new().await;
        ctx.publish_movie("heat", b"bytes").await;

        let Json(first) = super::list_movies(AxumState(ctx.state.clone()))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        ctx.publish_movie("ronin", b"more bytes").await;
        let Json(second) = super::list_movies(AxumState(ctx.state.clone()))
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn unsafe_file_names_never_escape_the_media_root() {
        let ctx = BackendTestContext::new().await;
        let mut record = sample_movie("evil", 4);
        record.file_name = Some("../../../etc/passwd".into());
        ctx.store.upsert_movie(&record).await.unwrap();

        let err = stream_movie(
            AxumState(ctx.state.clone()),
            AxumPath("evil".into()),
            HeaderMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_fallback_serves_spa_index() {
        let ctx = BackendTestContext::new().await;
        std::fs::write(ctx.state.www_root.join("index.html"), "<html>spa</html>").unwrap();

        let response = serve_www_path(&ctx.state, "/watch/heat").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await.as_ref(), b"<html>spa</html>");

        let err = serve_www_path(&ctx.state, "/missing.js").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_fallback_rejects_path_traversal() {
        let ctx = BackendTestContext::new().await;
        let err = serve_www_path(&ctx.state, "/../catalog.db")
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
