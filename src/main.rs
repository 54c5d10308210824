//! Pieceflow CLI
//!
//! Run with: cargo run --bin pieceflow -- <command>

#[tokio::main]
async fn main() {
    // Load .env before config so PIECEFLOW_* overrides apply
    let _ = dotenvy::dotenv();

    if let Err(e) = pieceflow::cli::run().await {
        eprintln!("Error [{}]: {}", e.code(), e);
        std::process::exit(1);
    }
}
