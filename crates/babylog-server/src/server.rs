//! Server bootstrap: listener setup, middleware stack and graceful
//! shutdown, adapted from the teacher's `rostra-web-ui` bootstrap.

use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr as _;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use babylog_store::{Database, StoreError, DEFAULT_BUSY_TIMEOUT};
use snafu::{ResultExt as _, Snafu};
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal;
use tower_cookies::CookieManagerLayer;
use tower_http::compression::CompressionLayer;
use tower_http::compression::predicate::SizeAbove;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tower_http::CompressionLevel;
use tracing::info;

use crate::hub::Hub;
use crate::LOG_TARGET;

pub struct Opts {
    pub listen: String,
    pub data_dir: PathBuf,
    pub cors_origin: Option<String>,
    pub admin_token: String,
    /// Ceiling on how long a record store write waits for the writer slot.
    /// Defaults to [`babylog_store::DEFAULT_BUSY_TIMEOUT`] if unset.
    pub busy_timeout: Option<Duration>,
}

pub struct AppState {
    pub db: Database,
    pub hub: Arc<Hub>,
    pub admin_token: String,
}

pub type SharedAppState = Arc<AppState>;

#[derive(Debug, Snafu)]
pub enum ServerError {
    #[snafu(transparent)]
    Io { source: io::Error },
    ListenAddr { source: AddrParseError },
    Cors { source: axum::http::header::InvalidHeaderValue },
    #[snafu(transparent)]
    Store { source: StoreError },
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

pub struct Server {
    listener: TcpListener,
    state: SharedAppState,
    opts: Opts,
}

impl Server {
    pub async fn init(opts: Opts) -> ServerResult<Server> {
        let listener = Self::get_listener(&opts).await?;
        let db = Database::open_with_busy_timeout(
            opts.data_dir.join("babylog.redb"),
            opts.busy_timeout.unwrap_or(DEFAULT_BUSY_TIMEOUT),
        )
        .await?;
        let state = Arc::new(AppState {
            db,
            hub: Hub::new(),
            admin_token: opts.admin_token.clone(),
        });

        let addr = listener.local_addr()?;
        info!(target: LOG_TARGET, %addr, "Listening");
        Ok(Self {
            listener,
            state,
            opts,
        })
    }

    pub async fn get_listener(opts: &Opts) -> ServerResult<TcpListener> {
        let addr = SocketAddr::from_str(&opts.listen).context(ListenAddrSnafu)?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_nodelay(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(1024)?)
    }

    pub fn addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> ServerResult<()> {
        let listen = self.addr()?;
        let router = crate::routes::router(self.state.clone())
            .layer(CookieManagerLayer::new())
            .layer(cors_layer(&self.opts, listen)?)
            .layer(compression_layer())
            .layer(TraceLayer::new_for_http());

        info!(target: LOG_TARGET, "Starting server");
        axum::serve(self.listener, router.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

fn compression_layer() -> CompressionLayer<SizeAbove> {
    CompressionLayer::new()
        .quality(CompressionLevel::Precise(4))
        .compress_when(SizeAbove::new(512))
}

fn cors_layer(opts: &Opts, listen: SocketAddr) -> ServerResult<CorsLayer> {
    let origin: HeaderValue = opts
        .cors_origin
        .clone()
        .unwrap_or_else(|| format!("http://{listen}"))
        .parse()
        .context(CorsSnafu)?;

    Ok(CorsLayer::new()
        .allow_credentials(true)
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .max_age(Duration::from_secs(86400))
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
