use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::header::CONTENT_TYPE;
use axum::middleware::from_fn_with_state;
use clap::{Parser, Subcommand};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite, SqlitePool};
use tokio::time::{self, Duration as TokioDuration};
use tower_http::compression::predicate::{DefaultPredicate, Predicate};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sharewarez::{admin, config, db, images, middleware, naming::NameCleaner, routes, state::AppState, watcher};

#[derive(Parser)]
#[command(name = "sharewarez", version, about = "Self-hosted game library server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create the first admin account
    CreateAdmin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Find new locations for games whose folder moved
    ReconcilePaths {
        /// Library to reconcile
        #[arg(long)]
        library: String,
        /// Directory to search; defaults to the library's watch path
        #[arg(long)]
        root: Option<PathBuf>,
        /// Minimum name similarity (0..=1)
        #[arg(long, default_value_t = 0.8)]
        threshold: f64,
        /// Write the matches to the database
        #[arg(long)]
        apply: bool,
    },
    /// Print the cleaned title for a raw folder or file name
    CleanName { raw: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging: stdout plus a daily rotated file under ./logs
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "sharewarez.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Dropping the guards would stop the non-blocking writers from flushing
    let _log_guards = (stdout_guard, file_guard);

    // Embedded defaults -> sharewarez.toml -> env/.env
    let app_cfg = config::load()?;
    let pool = open_pool(&app_cfg.database.url).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, app_cfg).await,
        Command::CreateAdmin { username, email, password } => {
            let id = admin::create_admin(&pool, &username, &email, &password).await?;
            println!("Created admin '{}' with id {}", username.trim(), id);
            Ok(())
        }
        Command::ReconcilePaths { library, root, threshold, apply } => {
            reconcile(&pool, &library, root, threshold, apply).await
        }
        Command::CleanName { raw } => {
            let cleaner = NameCleaner::new(&db::load_release_groups(&pool).await?);
            println!("{}", cleaner.clean(&raw));
            Ok(())
        }
    }
}

async fn open_pool(db_url: &str) -> anyhow::Result<SqlitePool> {
    config::ensure_sqlite_parent_dir(db_url)?;
    if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
        info!("Creating SQLite database at {}", db_url);
        Sqlite::create_database(db_url).await?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                let _ = sqlx::query("PRAGMA foreign_keys=ON;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA busy_timeout=10000;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA temp_store=MEMORY;").execute(&mut *conn).await;
                Ok(())
            })
        })
        .connect(db_url)
        .await?;
    db::init_db(&pool).await?;
    Ok(pool)
}

async fn reconcile(
    pool: &SqlitePool,
    library: &str,
    root: Option<PathBuf>,
    threshold: f64,
    apply: bool,
) -> anyhow::Result<()> {
    let watch_path: Option<Option<String>> = sqlx::query_scalar("SELECT watch_path FROM libraries WHERE uuid = ?1")
        .bind(library)
        .fetch_optional(pool)
        .await?;
    let Some(watch_path) = watch_path else {
        anyhow::bail!("library {} not found", library);
    };
    let root = root
        .or_else(|| watch_path.map(PathBuf::from))
        .ok_or_else(|| anyhow::anyhow!("library {} has no watch path; pass --root", library))?;

    let report = admin::reconcile_paths(pool, library, &root, threshold, apply).await?;
    if report.is_empty() {
        println!("No missing games in library {}", library);
        return Ok(());
    }
    for m in &report {
        match &m.new_path {
            Some(p) => println!(
                "{}\n  {} -> {} ({:.2}){}",
                m.game_name,
                m.old_path,
                p,
                m.similarity,
                if m.applied { " [applied]" } else { "" }
            ),
            None => println!("{}\n  {} -> no candidate (best {:.2})", m.game_name, m.old_path, m.similarity),
        }
    }
    if !apply {
        println!("Dry run; rerun with --apply to update the database");
    }
    Ok(())
}

async fn serve(pool: SqlitePool, app_cfg: config::AppConfig) -> anyhow::Result<()> {
    let state = AppState::new(pool.clone(), app_cfg.clone());

    let global_limiter = middleware::rate_limit::RateLimiter::from_env();

    // Periodic cleanup of rate limiters to avoid memory growth
    {
        let rl = state.rate_limiter.clone();
        let global = global_limiter.clone();
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(TokioDuration::from_secs(300));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        rl.cleanup_all().await;
                        global.cleanup_old_entries().await;
                    }
                }
            }
        });
    }

    let monitors = watcher::spawn_watchers(&state).await?;
    info!("Watching {} library folders", monitors.len());

    let image_task = if app_cfg.images.enabled {
        Some(tokio::spawn(images::run_image_downloader(
            pool.clone(),
            app_cfg.images.clone(),
            state.metrics.clone(),
            state.shutdown.clone(),
        )))
    } else {
        None
    };

    // Compression, but never for SSE (text/event-stream) so live streams keep flowing
    #[derive(Clone)]
    struct NoSseDefault(DefaultPredicate);
    impl Predicate for NoSseDefault {
        fn should_compress<B: axum::body::HttpBody>(&self, res: &axum::http::Response<B>) -> bool {
            if let Some(ct) = res.headers().get(CONTENT_TYPE) {
                if let Ok(s) = ct.to_str() {
                    if s.starts_with("text/event-stream") || s.starts_with("application/zip") {
                        return false;
                    }
                }
            }
            self.0.should_compress(res)
        }
    }
    let compression = CompressionLayer::new().compress_when(NoSseDefault(DefaultPredicate::new()));

    let shutdown = state.shutdown.clone();
    let app = routes::router(state)
        .layer(from_fn_with_state(global_limiter, middleware::rate_limit::rate_limit_middleware))
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Permissive CORS in debug builds for a separately served UI
    let app = if cfg!(debug_assertions) { app.layer(CorsLayer::permissive()) } else { app };

    let host = app_cfg.server.host.clone();
    let port = app_cfg.server.port;
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", host, port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("SharewareZ listening on http://{}", listener.local_addr()?);
    db::log_system_event(&pool, "server_started", &format!("Listening on {}", addr), "information").await;

    let signal_token = shutdown.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await?;

    // Stops scan jobs (child tokens), watchers and the image downloader
    shutdown.cancel();
    for m in monitors {
        let root = m.root().display().to_string();
        if tokio::task::spawn_blocking(move || m.join()).await.is_err() {
            tracing::warn!("Watcher for {} did not stop cleanly", root);
        }
    }
    if let Some(task) = image_task {
        let _ = task.await;
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
