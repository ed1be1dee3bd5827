//! Process entry point: boot configuration, the shared [`App`] state, the
//! background memory manager, and the HTTP/WebSocket listener.
//!
//! Grounded in the teacher's `server/src/lib.rs::ServerBuilder::run` (the same
//! `tracing_subscriber::fmt().with_env_filter(...).init()` followed by
//! `TcpListener::bind` + `axum::serve`), trimmed to this core's single
//! listener instead of the teacher's HTTPS/HTTP pair.

use braid_collab::app::App;
use braid_collab::config::Config;
use braid_collab::routes;

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_target(false)
		.init();

	let config = Config::from_env();
	let listen = config.listen.clone();
	let (app, memory_manager) = App::new(config);

	let memory_task = memory_manager.spawn();
	let router = routes::router(app);

	let listener = match tokio::net::TcpListener::bind(listen.as_ref()).await {
		Ok(listener) => listener,
		Err(err) => {
			tracing::error!(addr = %listen, error = %err, "failed to bind listener");
			memory_task.abort();
			std::process::exit(1);
		}
	};

	tracing::info!(addr = %listen, "listening");

	let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
	if let Err(err) = serve.await {
		tracing::error!(error = %err, "server exited with error");
	}

	memory_task.abort();
}

async fn shutdown_signal() {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler");
		signal.recv().await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {}
		_ = terminate => {}
	}

	tracing::info!("shutdown signal received");
}

// vim: ts=4
