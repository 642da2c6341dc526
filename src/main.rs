use huddle::relay::{DEFAULT_RELAY_PORT, RelayServer};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let bind_addr = format!("0.0.0.0:{}", DEFAULT_RELAY_PORT);

    println!("   Huddle Relay Server");
    println!("   Binding to {}", bind_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = RelayServer::new();
    server.run(&bind_addr).await
}
