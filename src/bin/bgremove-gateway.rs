//! Background removal HTTP gateway
//!
//! Serves `GET /health` and `POST /remove-bg` on top of the ONNX Runtime or
//! Tract backend.

#[cfg(feature = "cli")]
use bgremove_gateway::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
