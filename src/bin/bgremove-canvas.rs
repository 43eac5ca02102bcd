//! Batch background removal onto a fixed portrait canvas

use bgremove_canvas::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
