use code_relay::config;

#[tokio::main]
async fn main() {
    code_relay::bootstrap();

    let settings = config::load_settings();
    let addr = config::resolve_listen_addr(&settings.listen_addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            code_relay::logger::error("server", &format!("failed to bind {}: {}", addr, e));
            eprintln!("failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    code_relay::logger::info("server", &format!("code-relay listening on {}", addr));

    let app = code_relay::server::router();
    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    // Give in-flight requests 5 seconds to finish before the process exits,
    // matching the shutdown budget the relay has always used.
    match tokio::time::timeout(std::time::Duration::from_secs(5), serve).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => code_relay::logger::error("server", &format!("server exited with error: {}", e)),
        Err(_) => code_relay::logger::warn("server", "graceful shutdown timed out after 5s"),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    code_relay::logger::info("server", "received shutdown signal, stopping");
}
