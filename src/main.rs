use anyhow::Result;
use bms_hil::{api, config, session, telemetry};
use config::Config;
use session::Session;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    if !init_tracing() {
        warn!("tracing subscriber already installed");
    }

    let cfg = Config::load()?;

    let (session, events) = Session::start(cfg.clone());
    let app_state = api::AppState::new(session.clone());
    let pump = api::spawn_event_pump(app_state.hub.clone(), events);

    let app = api::router(app_state, &cfg);
    let addr = cfg.server.socket_addr()?;

    if cfg.server.host == "0.0.0.0" {
        warn!(
            "WARNING: Server binding to 0.0.0.0 - the control channel will be reachable from the network!"
        );
    }

    info!(%addr, tick_ms = cfg.simulation.tick_ms, "starting BMS HIL simulator");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    session.stop().await;
    pump.abort();
    warn!("shutdown complete");
    Ok(())
}
